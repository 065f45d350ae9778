use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde::de::DeserializeOwned;
use toml::Value;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct ConfigDoc {
    pub path: PathBuf,
    pub value: Value,
}

impl ConfigDoc {
    pub fn in_memory(value: Value) -> Self {
        Self {
            path: PathBuf::from("<mem>"),
            value,
        }
    }

    pub fn value_path(&self, path: &str) -> Option<&Value> {
        let path = path.trim();
        if path.is_empty() {
            return Some(&self.value);
        }

        let mut cur = &self.value;
        for seg in path.split('.') {
            cur = cur.as_table()?.get(seg)?;
        }
        Some(cur)
    }

    pub fn deserialize_path<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let Some(v) = self.value_path(path) else {
            return Ok(None);
        };
        let parsed = v
            .clone()
            .try_into()
            .map_err(|e| Error::msg(format!("failed to deserialize config at '{}': {e}", path)))?;
        Ok(Some(parsed))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MetadataSourceKind {
    Dir,
    Http,
}

fn default_metadata_dir() -> String {
    "metadata".into()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    pub source: MetadataSourceKind,
    #[serde(default = "default_metadata_dir")]
    pub dir: String,
    pub base_url: Option<String>,
    // Name of the env var holding a bearer token, never the token itself.
    pub token_env: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_true")]
    pub cache: bool,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            source: MetadataSourceKind::Dir,
            dir: default_metadata_dir(),
            base_url: None,
            token_env: None,
            timeout_secs: default_timeout_secs(),
            cache: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Any failed window discards every recovered window.
    #[default]
    AllOrNothing,
    /// Failed windows are dropped individually; siblings still recover.
    Isolated,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub failure_policy: FailurePolicy,
    /// 0 = use CPU count.
    pub max_parallel: usize,
    #[serde(default = "default_true")]
    pub cleanup_on_failure: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::AllOrNothing,
            max_parallel: 0,
            cleanup_on_failure: true,
        }
    }
}

impl RecoveryConfig {
    pub fn effective_parallelism(&self) -> usize {
        if self.max_parallel == 0 {
            num_cpus::get().max(1)
        } else {
            self.max_parallel
        }
    }
}

fn default_filter() -> String {
    "info".into()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    #[serde(default = "default_filter")]
    pub filter: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub metadata: MetadataConfig,
    pub recovery: RecoveryConfig,
    pub logging: LoggingConfig,
}

impl SessionConfig {
    pub fn from_doc(doc: &ConfigDoc) -> Result<Self> {
        Ok(Self {
            metadata: doc.deserialize_path("metadata")?.unwrap_or_default(),
            recovery: doc.deserialize_path("recovery")?.unwrap_or_default(),
            logging: doc.deserialize_path("logging")?.unwrap_or_default(),
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let doc = load(path)?;
        let mut cfg = Self::from_doc(&doc)?;
        // A relative metadata dir is resolved against the config file, not the cwd.
        let dir = PathBuf::from(&cfg.metadata.dir);
        if dir.is_relative() {
            cfg.metadata.dir = resolve_ref_path(path, &cfg.metadata.dir)
                .to_string_lossy()
                .into_owned();
        }
        Ok(cfg)
    }
}

pub fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Table(base_tbl), Value::Table(overlay_tbl)) => {
            for (k, v) in overlay_tbl {
                match base_tbl.get_mut(&k) {
                    Some(existing) => merge(existing, v),
                    None => {
                        base_tbl.insert(k, v);
                    }
                }
            }
        }
        (slot, v) => *slot = v,
    }
}

fn resolve_ref_path(from_file: &Path, reference: &str) -> PathBuf {
    let p = PathBuf::from(reference);
    if p.is_absolute() {
        p
    } else {
        from_file.parent().unwrap_or_else(|| Path::new(".")).join(p)
    }
}

fn load_value_inner(path: &Path, stack: &mut HashSet<PathBuf>) -> Result<Value> {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if !stack.insert(canonical.clone()) {
        return Err(Error::msg(format!(
            "config extends cycle detected at {}",
            canonical.display()
        )));
    }

    let data = fs::read_to_string(path)
        .map_err(|e| Error::msg(format!("failed to read config {}: {e}", path.display())))?;
    let mut value: Value = toml::from_str(&data)
        .map_err(|e| Error::msg(format!("TOML parse error in {}: {e}", path.display())))?;

    let mut out = Value::Table(Default::default());
    if let Some(ext) = value.get("extends").and_then(Value::as_str) {
        out = load_value_inner(&resolve_ref_path(path, ext), stack)?;
    }
    if let Some(tbl) = value.as_table_mut() {
        tbl.remove("extends");
    }
    merge(&mut out, value);

    stack.remove(&canonical);
    Ok(out)
}

pub fn load(path: &Path) -> Result<ConfigDoc> {
    let mut stack = HashSet::<PathBuf>::new();
    let value = load_value_inner(path, &mut stack)?;
    Ok(ConfigDoc {
        path: path.to_path_buf(),
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_for_missing_sections() {
        let doc = ConfigDoc::in_memory(toml::from_str("[logging]\njson = true\n").unwrap());
        let cfg = SessionConfig::from_doc(&doc).unwrap();
        assert!(cfg.logging.json);
        assert_eq!(cfg.logging.filter, "info");
        assert_eq!(cfg.metadata.source, MetadataSourceKind::Dir);
        assert_eq!(cfg.recovery.failure_policy, FailurePolicy::AllOrNothing);
        assert!(cfg.recovery.cleanup_on_failure);
    }

    #[test]
    fn parses_kebab_case_policy() {
        let doc = ConfigDoc::in_memory(
            toml::from_str(
                r#"
[recovery]
failure_policy = "isolated"
max_parallel = 2

[metadata]
source = "http"
base_url = "http://localhost:8080/api"
"#,
            )
            .unwrap(),
        );
        let cfg = SessionConfig::from_doc(&doc).unwrap();
        assert_eq!(cfg.recovery.failure_policy, FailurePolicy::Isolated);
        assert_eq!(cfg.recovery.effective_parallelism(), 2);
        assert_eq!(cfg.metadata.source, MetadataSourceKind::Http);
        assert_eq!(cfg.metadata.timeout_secs, 30);
    }

    #[test]
    fn extends_merges_parent_tables() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let dir = tmp.path();
        fs::write(
            dir.join("base.toml"),
            "[recovery]\nmax_parallel = 4\n[logging]\nfilter = \"debug\"\n",
        )
        .unwrap();
        fs::write(
            dir.join("child.toml"),
            "extends = \"base.toml\"\n[logging]\njson = true\n",
        )
        .unwrap();

        let cfg = SessionConfig::load(&dir.join("child.toml")).unwrap();
        assert_eq!(cfg.recovery.max_parallel, 4);
        assert_eq!(cfg.logging.filter, "debug");
        assert!(cfg.logging.json);
        assert!(cfg.metadata.dir.ends_with("metadata"));
    }

    #[test]
    fn extends_cycle_is_rejected() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let dir = tmp.path();
        fs::write(dir.join("a.toml"), "extends = \"b.toml\"\n").unwrap();
        fs::write(dir.join("b.toml"), "extends = \"a.toml\"\n").unwrap();

        let err = load(&dir.join("a.toml")).unwrap_err().to_string();
        assert!(err.contains("cycle"), "unexpected err: {err}");
    }
}
