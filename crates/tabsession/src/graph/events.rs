use std::sync::mpsc;

use crate::metadata::TabId;
use crate::state::RecordId;

/// A record held by a tab selection. Only the id is required; the remaining
/// fields are carried through for listeners.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Record {
    pub id: RecordId,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl Record {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: serde_json::Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GraphEvent {
    Selected { tab_id: TabId, record: Record },
    SelectedMultiple { tab_id: TabId, records: Vec<Record> },
    Update { tab_id: TabId },
}

impl GraphEvent {
    pub fn tab_id(&self) -> &str {
        match self {
            GraphEvent::Selected { tab_id, .. }
            | GraphEvent::SelectedMultiple { tab_id, .. }
            | GraphEvent::Update { tab_id } => tab_id,
        }
    }
}

pub trait GraphSink {
    fn emit(&self, ev: &GraphEvent);
}

impl<F: Fn(&GraphEvent)> GraphSink for F {
    fn emit(&self, ev: &GraphEvent) {
        self(ev)
    }
}

#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<GraphEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<GraphEvent>) -> Self {
        Self { tx }
    }
}

impl GraphSink for ChannelSink {
    fn emit(&self, ev: &GraphEvent) {
        let _ = self.tx.send(ev.clone());
    }
}
