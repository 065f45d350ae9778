use std::sync::mpsc;

use tracing::{error, info};

use crate::log_sanitize::{sanitize_log_value, strip_controls};

#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryEvent {
    WindowSpawned {
        index: usize,
        window_identifier: String,
    },
    WindowRecovered {
        index: usize,
        window_identifier: String,
        elapsed_ms: u128,
    },
    WindowFailed {
        index: usize,
        window_identifier: String,
        error: String,
        elapsed_ms: u128,
    },
    RecoveryDone {
        ok: bool,
        recovered: usize,
        failed: usize,
        error: Option<String>,
    },
}

pub trait RecoverySink: Send + Sync {
    fn emit(&self, ev: RecoveryEvent);
}

/// Default sink: every event becomes a log line. Identifiers and errors are
/// cleaned again here since events may come from any producer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl RecoverySink for TracingSink {
    fn emit(&self, ev: RecoveryEvent) {
        match ev {
            RecoveryEvent::WindowSpawned {
                index,
                window_identifier,
            } => info!(
                index,
                window = %sanitize_log_value(&window_identifier),
                "recovering window"
            ),
            RecoveryEvent::WindowRecovered {
                index,
                window_identifier,
                elapsed_ms,
            } => info!(
                index,
                window = %sanitize_log_value(&window_identifier),
                elapsed_ms,
                "window recovered"
            ),
            RecoveryEvent::WindowFailed {
                index,
                window_identifier,
                error,
                elapsed_ms,
            } => error!(
                index,
                window = %sanitize_log_value(&window_identifier),
                elapsed_ms,
                error = %strip_controls(&error),
                "window recovery failed"
            ),
            RecoveryEvent::RecoveryDone {
                ok,
                recovered,
                failed,
                error,
            } => {
                if ok {
                    info!(recovered, "recovery settled");
                } else {
                    error!(
                        recovered,
                        failed,
                        error = %strip_controls(error.as_deref().unwrap_or_default()),
                        "recovery failed"
                    );
                }
            }
        }
    }
}

#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<RecoveryEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<RecoveryEvent>) -> Self {
        Self { tx }
    }
}

impl RecoverySink for ChannelSink {
    fn emit(&self, ev: RecoveryEvent) {
        let _ = self.tx.send(ev);
    }
}
