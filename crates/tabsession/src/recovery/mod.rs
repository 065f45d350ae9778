//! Recovery orchestrator: rebuild every window described in the URL, one
//! worker per window, joined at a single barrier.

use std::collections::{BTreeMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, mpsc};
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info};

use crate::address::AddressBar;
use crate::cleaner;
use crate::codec::{self, RecoveryDescriptor};
use crate::config::{FailurePolicy, RecoveryConfig};
use crate::error::{Error, Result};
use crate::hierarchy::{calculate_hierarchy, reconstruct_state};
use crate::log_sanitize::{sanitize_log_value, strip_controls};
use crate::metadata::{MetadataSource, ParentRecordResolver, UnresolvedParents};
use crate::state::{WindowState, mark_window_as_initialized};

pub mod events;

pub use events::{ChannelSink, RecoveryEvent, RecoverySink, TracingSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryPhase {
    Idle,
    Loading,
    Settled,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedWindow {
    pub index: usize,
    pub window_identifier: String,
    pub error: String,
}

/// What the UI layer reads after (or during) a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoverySnapshot {
    pub recovered_windows: Vec<Arc<WindowState>>,
    pub is_recovery_loading: bool,
    pub recovery_error: Option<String>,
    pub failed_windows: Vec<FailedWindow>,
}

/// Rebuild one window: fetch its metadata, then either reconstruct the
/// nested tab state or return a minimal window with only a title.
pub fn recover_window(
    descriptor: &RecoveryDescriptor,
    metadata: &dyn MetadataSource,
    resolver: &dyn ParentRecordResolver,
) -> Result<WindowState> {
    let window_id = descriptor.window_id();
    let meta = metadata.load_window_metadata(window_id).map_err(|e| {
        Error::new(
            e.kind(),
            format!(
                "loading metadata for window '{}': {}",
                sanitize_log_value(window_id),
                strip_controls(e.message())
            ),
        )
    })?;

    let mut window =
        WindowState::new(descriptor.window_identifier.clone()).with_title(meta.title());
    if !descriptor.has_recovery_data {
        return Ok(window);
    }

    let chain = calculate_hierarchy(descriptor, &meta)?;
    let rebuilt = reconstruct_state(&chain, resolver)?;
    window.tabs = rebuilt.tabs;
    window.navigation = rebuilt.navigation;
    Ok(mark_window_as_initialized(&window))
}

type TaskResult = (usize, Result<WindowState>, u128);

/// Recover every descriptor with at most `max_parallel` workers. Results come
/// back in input order, one `Result` per descriptor.
pub fn recover_windows(
    descriptors: &[RecoveryDescriptor],
    metadata: Arc<dyn MetadataSource>,
    resolver: Arc<dyn ParentRecordResolver>,
    max_parallel: usize,
    sink: &dyn RecoverySink,
) -> Vec<Result<WindowState>> {
    let max_parallel = max_parallel.max(1);
    let mut results: Vec<Option<Result<WindowState>>> =
        (0..descriptors.len()).map(|_| None).collect();
    let mut ready: VecDeque<usize> = (0..descriptors.len()).collect();
    let mut running: BTreeMap<usize, std::thread::JoinHandle<()>> = BTreeMap::new();
    let (tx, rx) = mpsc::channel::<TaskResult>();

    while !ready.is_empty() || !running.is_empty() {
        while running.len() < max_parallel {
            let Some(slot) = ready.pop_front() else {
                break;
            };
            let descriptor = descriptors[slot].clone();
            sink.emit(RecoveryEvent::WindowSpawned {
                index: descriptor.index,
                window_identifier: sanitize_log_value(&descriptor.window_identifier),
            });
            let tx = tx.clone();
            let metadata = Arc::clone(&metadata);
            let resolver = Arc::clone(&resolver);
            let handle = std::thread::spawn(move || {
                let start = Instant::now();
                // Always report, even on panic, so the join loop cannot hang.
                let r = panic::catch_unwind(AssertUnwindSafe(|| {
                    recover_window(&descriptor, metadata.as_ref(), resolver.as_ref())
                }))
                .unwrap_or_else(|_| Err(Error::recovery("recovery worker panicked")));
                let _ = tx.send((slot, r, start.elapsed().as_millis()));
            });
            running.insert(slot, handle);
        }

        let Ok((slot, res, elapsed_ms)) = rx.recv() else {
            break;
        };
        let d = &descriptors[slot];
        if let Some(h) = running.remove(&slot) {
            let _ = h.join();
        }
        match &res {
            Ok(_) => sink.emit(RecoveryEvent::WindowRecovered {
                index: d.index,
                window_identifier: sanitize_log_value(&d.window_identifier),
                elapsed_ms,
            }),
            Err(e) => sink.emit(RecoveryEvent::WindowFailed {
                index: d.index,
                window_identifier: sanitize_log_value(&d.window_identifier),
                error: strip_controls(&e.to_string()),
                elapsed_ms,
            }),
        }
        results[slot] = Some(res);
    }

    results
        .into_iter()
        .map(|r| r.unwrap_or_else(|| Err(Error::recovery("worker exited without a result"))))
        .collect()
}

pub struct RecoveryOrchestrator {
    metadata: Arc<dyn MetadataSource>,
    resolver: Arc<dyn ParentRecordResolver>,
    sink: Arc<dyn RecoverySink>,
    config: RecoveryConfig,
    phase: RecoveryPhase,
    has_run: bool,
    snapshot: RecoverySnapshot,
}

impl RecoveryOrchestrator {
    pub fn new(metadata: Arc<dyn MetadataSource>, config: RecoveryConfig) -> Self {
        Self {
            metadata,
            resolver: Arc::new(UnresolvedParents),
            sink: Arc::new(TracingSink),
            config,
            phase: RecoveryPhase::Idle,
            has_run: false,
            snapshot: RecoverySnapshot::default(),
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn ParentRecordResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn RecoverySink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn phase(&self) -> RecoveryPhase {
        self.phase
    }

    pub fn snapshot(&self) -> &RecoverySnapshot {
        &self.snapshot
    }

    /// Run recovery unless it already ran for this page load.
    pub fn run_once(&mut self, bar: &mut dyn AddressBar) -> &RecoverySnapshot {
        if !self.has_run {
            self.has_run = true;
            self.run(bar);
        }
        &self.snapshot
    }

    /// Re-arm the run-once guard and run again.
    pub fn trigger_recovery(&mut self, bar: &mut dyn AddressBar) -> &RecoverySnapshot {
        self.has_run = false;
        self.run_once(bar)
    }

    fn settle(&mut self, phase: RecoveryPhase, snapshot: RecoverySnapshot) {
        self.sink.emit(RecoveryEvent::RecoveryDone {
            ok: phase == RecoveryPhase::Settled && snapshot.recovery_error.is_none(),
            recovered: snapshot.recovered_windows.len(),
            failed: snapshot.failed_windows.len(),
            error: snapshot.recovery_error.clone(),
        });
        self.phase = phase;
        self.snapshot = snapshot;
    }

    fn run(&mut self, bar: &mut dyn AddressBar) {
        if !codec::has_recovery_params(&bar.current()) {
            debug!("no recovery parameters in url");
            self.settle(RecoveryPhase::Settled, RecoverySnapshot::default());
            return;
        }

        self.phase = RecoveryPhase::Loading;
        self.snapshot = RecoverySnapshot {
            is_recovery_loading: true,
            ..Default::default()
        };

        let repaired = cleaner::clean_invalid_parameters(bar);
        if !repaired.is_empty() {
            info!(?repaired, "repaired invalid recovery parameters");
        }
        let descriptors = codec::decode_url(&bar.current());
        if descriptors.is_empty() {
            cleaner::cleanup_url(bar);
            self.settle(RecoveryPhase::Settled, RecoverySnapshot::default());
            return;
        }

        let results = recover_windows(
            &descriptors,
            Arc::clone(&self.metadata),
            Arc::clone(&self.resolver),
            self.config.effective_parallelism(),
            self.sink.as_ref(),
        );

        let mut recovered: Vec<WindowState> = Vec::new();
        let mut failed: Vec<FailedWindow> = Vec::new();
        for (d, r) in descriptors.iter().zip(results) {
            match r {
                Ok(w) => recovered.push(w),
                Err(e) => failed.push(FailedWindow {
                    index: d.index,
                    window_identifier: sanitize_log_value(&d.window_identifier),
                    error: strip_controls(&e.to_string()),
                }),
            }
        }

        match self.config.failure_policy {
            FailurePolicy::AllOrNothing => self.settle_all_or_nothing(bar, recovered, failed),
            FailurePolicy::Isolated => self.settle_isolated(bar, recovered, failed),
        }
    }

    fn settle_all_or_nothing(
        &mut self,
        bar: &mut dyn AddressBar,
        recovered: Vec<WindowState>,
        failed: Vec<FailedWindow>,
    ) {
        if failed.is_empty() {
            cleaner::cleanup_url(bar);
            let snapshot = RecoverySnapshot {
                recovered_windows: activate_last(recovered),
                ..Default::default()
            };
            self.settle(RecoveryPhase::Settled, snapshot);
            return;
        }

        if self.config.cleanup_on_failure {
            cleaner::cleanup_url(bar);
        }
        let snapshot = RecoverySnapshot {
            recovery_error: Some(describe_failures(&failed)),
            failed_windows: failed,
            ..Default::default()
        };
        self.settle(RecoveryPhase::Failed, snapshot);
    }

    // The URL keeps describing the surviving windows so a reload repeats
    // the same recovery minus the broken entries.
    fn settle_isolated(
        &mut self,
        bar: &mut dyn AddressBar,
        recovered: Vec<WindowState>,
        failed: Vec<FailedWindow>,
    ) {
        let indices: Vec<usize> = failed.iter().map(|f| f.index).collect();
        cleaner::cleanup_failed_windows_url(bar, &indices);

        let phase = if recovered.is_empty() && !failed.is_empty() {
            RecoveryPhase::Failed
        } else {
            RecoveryPhase::Settled
        };
        let snapshot = RecoverySnapshot {
            recovered_windows: activate_last(recovered),
            is_recovery_loading: false,
            recovery_error: (!failed.is_empty()).then(|| describe_failures(&failed)),
            failed_windows: failed,
        };
        self.settle(phase, snapshot);
    }
}

/// Only the last window (in URL order) is active.
fn activate_last(windows: Vec<WindowState>) -> Vec<Arc<WindowState>> {
    let last = windows.len().saturating_sub(1);
    windows
        .into_iter()
        .enumerate()
        .map(|(i, mut w)| {
            w.is_active = i == last;
            Arc::new(w)
        })
        .collect()
}

fn describe_failures(failed: &[FailedWindow]) -> String {
    let detail: Vec<String> = failed
        .iter()
        .map(|f| format!("{} ({})", f.window_identifier, f.error))
        .collect();
    format!(
        "failed to recover {} window(s): {}",
        failed.len(),
        detail.join("; ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{StaticMetadataSource, Tab, WindowMetadata};

    fn source() -> StaticMetadataSource {
        StaticMetadataSource::new().with_window(WindowMetadata {
            id: "143".into(),
            name: "Sales Order".into(),
            tabs: vec![Tab::new("header", 0), Tab::new("lines", 1).with_parent("header")],
        })
    }

    #[test]
    fn minimal_window_has_title_and_default_navigation() {
        let d = RecoveryDescriptor::new(0, "143_1", None, None);
        let w = recover_window(&d, &source(), &UnresolvedParents).unwrap();
        assert_eq!(w.title, "Sales Order");
        assert_eq!(w.window_id, "143");
        assert!(w.tabs.is_empty());
        assert_eq!(w.navigation, Default::default());
        assert!(!w.initialized);
    }

    #[test]
    fn full_window_is_initialized() {
        let d = RecoveryDescriptor::new(0, "143_1", Some("lines".into()), Some("L".into()));
        let w = recover_window(&d, &source(), &UnresolvedParents).unwrap();
        assert!(w.initialized && w.navigation.initialized);
        assert_eq!(w.navigation.active_levels, vec![1]);
        assert_eq!(w.tabs.len(), 2);
    }

    #[test]
    fn metadata_error_keeps_kind() {
        let d = RecoveryDescriptor::new(0, "999_1", None, None);
        let err = recover_window(&d, &source(), &UnresolvedParents).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
        assert!(err.to_string().contains("999"));
    }

    #[test]
    fn results_follow_input_order_with_single_worker() {
        let descriptors = vec![
            RecoveryDescriptor::new(0, "143_1", None, None),
            RecoveryDescriptor::new(1, "999_2", None, None),
            RecoveryDescriptor::new(2, "143_3", None, None),
        ];
        let (tx, rx) = mpsc::channel();
        let results = recover_windows(
            &descriptors,
            Arc::new(source()),
            Arc::new(UnresolvedParents),
            1,
            &ChannelSink::new(tx),
        );
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert_eq!(results[2].as_ref().unwrap().window_identifier, "143_3");

        let events: Vec<RecoveryEvent> = rx.try_iter().collect();
        assert_eq!(events.len(), 6);
        assert!(matches!(events[0], RecoveryEvent::WindowSpawned { index: 0, .. }));
        assert!(matches!(events[3], RecoveryEvent::WindowFailed { index: 1, .. }));
    }

    #[test]
    fn activate_last_marks_exactly_one() {
        let ws = activate_last(vec![WindowState::new("1_1"), WindowState::new("2_2")]);
        assert!(!ws[0].is_active);
        assert!(ws[1].is_active);
        assert!(activate_last(Vec::new()).is_empty());
    }
}
