//! Window State Tree: per open window instance, its navigation state and the
//! state of every tab it has touched.
//!
//! Snapshots are immutable. Updaters in [`update`] return a new
//! `Arc<SessionState>` that shares every untouched window and tab with the
//! previous snapshot.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::identifier::window_id_from_identifier;
use crate::metadata::TabId;

pub mod update;

pub use update::*;

pub type RecordId = String;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnFilter {
    pub id: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub id: String,
    #[serde(default)]
    pub desc: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TableState {
    pub filters: Vec<ColumnFilter>,
    pub visibility: BTreeMap<String, bool>,
    pub sorting: Vec<SortSpec>,
    pub order: Vec<String>,
    pub is_implicit_filter_applied: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TabMode {
    Table,
    Form,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormMode {
    New,
    Edit,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FormState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<RecordId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<TabMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub form_mode: Option<FormMode>,
}

impl FormState {
    pub fn edit(record_id: impl Into<String>) -> Self {
        Self {
            record_id: Some(record_id.into()),
            mode: Some(TabMode::Form),
            form_mode: Some(FormMode::Edit),
        }
    }

    pub fn has_record(&self) -> bool {
        self.record_id.as_deref().is_some_and(|r| !r.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TabState {
    pub table: TableState,
    pub form: FormState,
    pub level: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_record: Option<RecordId>,
}

impl TabState {
    pub fn at_level(level: u32) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NavigationState {
    pub active_levels: Vec<u32>,
    pub active_tabs_by_level: BTreeMap<u32, TabId>,
    pub initialized: bool,
}

impl Default for NavigationState {
    fn default() -> Self {
        Self {
            active_levels: vec![0],
            active_tabs_by_level: BTreeMap::new(),
            initialized: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowState {
    pub window_id: String,
    pub window_identifier: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub initialized: bool,
    #[serde(default)]
    pub navigation: NavigationState,
    #[serde(default)]
    pub tabs: BTreeMap<TabId, Arc<TabState>>,
}

impl WindowState {
    pub fn new(window_identifier: impl Into<String>) -> Self {
        let window_identifier = window_identifier.into();
        Self {
            window_id: window_id_from_identifier(&window_identifier).to_string(),
            window_identifier,
            title: String::new(),
            is_active: false,
            initialized: false,
            navigation: NavigationState::default(),
            tabs: BTreeMap::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn tab(&self, tab_id: &str) -> Option<&TabState> {
        self.tabs.get(tab_id).map(Arc::as_ref)
    }

    /// The deepest tab that has both a selected record and an open form.
    /// Ties at the same level go to the lowest tab id.
    pub fn deepest_open_form(&self) -> Option<(&str, &TabState)> {
        let mut best: Option<(&str, &TabState)> = None;
        for (id, tab) in &self.tabs {
            if tab.selected_record.is_none() || !tab.form.has_record() {
                continue;
            }
            if best.is_none_or(|(_, b)| tab.level > b.level) {
                best = Some((id.as_str(), tab.as_ref()));
            }
        }
        best
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    /// Open windows in the order they were opened.
    pub windows: Vec<Arc<WindowState>>,
}

impl SessionState {
    pub fn new(windows: Vec<WindowState>) -> Self {
        Self {
            windows: windows.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn window(&self, window_identifier: &str) -> Option<&WindowState> {
        self.windows
            .iter()
            .find(|w| w.window_identifier == window_identifier)
            .map(Arc::as_ref)
    }

    pub fn active_window(&self) -> Option<&WindowState> {
        self.windows.iter().find(|w| w.is_active).map(Arc::as_ref)
    }

    pub fn tab(&self, window_identifier: &str, tab_id: &str) -> Option<&TabState> {
        self.window(window_identifier)?.tab(tab_id)
    }
}
