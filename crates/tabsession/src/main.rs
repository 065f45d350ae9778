use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use tabsession::address::MemoryAddressBar;
use tabsession::config::{FailurePolicy, SessionConfig};
use tabsession::graph::TabGraph;
use tabsession::metadata::{MetadataSource, Tab, open_sources};
use tabsession::recovery::RecoveryOrchestrator;
use tabsession::state::SessionState;
use tabsession::{Error, Result, cleaner, codec, hierarchy, logging};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Session config TOML ([metadata], [recovery], [logging])
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Encode a session state JSON file into recovery query parameters
    Encode {
        /// Path to a serialized session state
        state: PathBuf,
    },
    /// Print the recovery descriptors carried by a URL
    Decode { url: String },
    /// Strip tab/record parameters that do not come in pairs
    Repair { url: String },
    /// Recover every window described by a URL
    Recover {
        url: String,
        /// Override the configured failure policy
        #[arg(long, value_enum)]
        policy: Option<PolicyArg>,
        /// Max number of windows recovered concurrently (0 = use CPU count)
        #[arg(long)]
        max_parallel: Option<usize>,
    },
    /// Print the ancestor chain and rebuilt tab state for one record
    Hierarchy {
        window_id: String,
        tab_id: String,
        record_id: String,
    },
    /// Print the tab tree of a window
    Graph {
        window_id: String,
        /// Print GraphViz dot instead of an indented tree
        #[arg(long)]
        dot: bool,
    },
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum PolicyArg {
    AllOrNothing,
    Isolated,
}

impl From<PolicyArg> for FailurePolicy {
    fn from(p: PolicyArg) -> Self {
        match p {
            PolicyArg::AllOrNothing => FailurePolicy::AllOrNothing,
            PolicyArg::Isolated => FailurePolicy::Isolated,
        }
    }
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    let cfg = match &args.config {
        Some(path) => SessionConfig::load(path)?,
        None => SessionConfig::default(),
    };
    logging::init(&cfg.logging);

    match args.cmd {
        Command::Encode { state } => cmd_encode(&state),
        Command::Decode { url } => cmd_decode(&url),
        Command::Repair { url } => cmd_repair(&url),
        Command::Recover {
            url,
            policy,
            max_parallel,
        } => cmd_recover(cfg, &url, policy, max_parallel),
        Command::Hierarchy {
            window_id,
            tab_id,
            record_id,
        } => cmd_hierarchy(&cfg, &window_id, &tab_id, &record_id),
        Command::Graph { window_id, dot } => cmd_graph(&cfg, &window_id, dot),
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_encode(path: &Path) -> Result<()> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| Error::msg(format!("failed to read {}: {e}", path.display())))?;
    let state: SessionState = serde_json::from_str(&data)?;
    println!("{}", codec::encode(&state.windows));
    Ok(())
}

fn cmd_decode(url: &str) -> Result<()> {
    let bar = MemoryAddressBar::parse(url)?;
    print_json(&codec::decode_url(bar.url()))
}

fn cmd_repair(url: &str) -> Result<()> {
    let mut bar = MemoryAddressBar::parse(url)?;
    let repaired = cleaner::clean_invalid_parameters(&mut bar);
    if !repaired.is_empty() {
        eprintln!("repaired windows: {repaired:?}");
    }
    println!("{}", bar.url());
    Ok(())
}

fn cmd_recover(
    mut cfg: SessionConfig,
    url: &str,
    policy: Option<PolicyArg>,
    max_parallel: Option<usize>,
) -> Result<()> {
    if let Some(p) = policy {
        cfg.recovery.failure_policy = p.into();
    }
    if let Some(n) = max_parallel {
        cfg.recovery.max_parallel = n;
    }

    let (metadata, resolver) = open_sources(&cfg.metadata)?;
    let mut bar = MemoryAddressBar::parse(url)?;
    let mut orchestrator =
        RecoveryOrchestrator::new(metadata, cfg.recovery).with_resolver(resolver);
    orchestrator.run_once(&mut bar);
    let snapshot = orchestrator.snapshot();

    print_json(&serde_json::json!({
        "phase": orchestrator.phase(),
        "snapshot": snapshot,
        "url": bar.url().as_str(),
    }))
}

fn cmd_hierarchy(cfg: &SessionConfig, window_id: &str, tab_id: &str, record_id: &str) -> Result<()> {
    let (metadata, resolver) = open_sources(&cfg.metadata)?;
    let meta = metadata.load_window_metadata(window_id)?;
    let descriptor = codec::RecoveryDescriptor::new(
        0,
        window_id.to_string(),
        Some(tab_id.to_string()),
        Some(record_id.to_string()),
    );
    let chain = hierarchy::calculate_hierarchy(&descriptor, &meta)?;
    let rebuilt = hierarchy::reconstruct_state(&chain, resolver.as_ref())?;
    print_json(&serde_json::json!({
        "hierarchy": chain,
        "state": rebuilt,
    }))
}

fn cmd_graph(cfg: &SessionConfig, window_id: &str, dot: bool) -> Result<()> {
    let (metadata, _) = open_sources(&cfg.metadata)?;
    let meta = metadata.load_window_metadata(window_id)?;
    let graph = TabGraph::build_from_tabs(&meta.tabs)?;

    if dot {
        print!("{}", graph.to_dot());
        return Ok(());
    }

    println!("{} ({} tabs)", meta.title(), graph.len());
    let mut stack: Vec<(&Tab, usize)> = graph.roots().into_iter().rev().map(|t| (t, 0)).collect();
    while let Some((tab, depth)) = stack.pop() {
        println!(
            "{:indent$}- {:<22} level {:<2} {}",
            "",
            tab.id,
            tab.level,
            tab.name,
            indent = depth * 2
        );
        let children = graph.get_children(&tab.id)?;
        stack.extend(children.into_iter().rev().map(|c| (c, depth + 1)));
    }
    Ok(())
}
