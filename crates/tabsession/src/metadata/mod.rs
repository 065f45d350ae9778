//! Tab metadata: the immutable per-window catalogue of tabs, and the
//! collaborators that load it.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{MetadataConfig, MetadataSourceKind};
use crate::error::{Error, Result};

pub mod dir;
pub mod http;

pub use dir::DirMetadataSource;
pub use http::HttpMetadataSource;

pub type TabId = String;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tab {
    pub id: TabId,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_tab_id: Option<TabId>,
    #[serde(default)]
    pub level: u32,
    #[serde(default)]
    pub sequence_number: i64,
    #[serde(default)]
    pub entity_name: String,
    #[serde(default)]
    pub key_field: Option<String>,
    /// Field of this tab's entity holding the parent tab's record id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_column: Option<String>,
    #[serde(default)]
    pub window: String,
}

impl Tab {
    pub fn new(id: impl Into<String>, level: u32) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            parent_tab_id: None,
            level,
            sequence_number: 0,
            entity_name: String::new(),
            key_field: None,
            parent_column: None,
            window: String::new(),
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent_tab_id = Some(parent.into());
        self
    }

    pub fn with_sequence(mut self, seq: i64) -> Self {
        self.sequence_number = seq;
        self
    }

    pub fn with_entity(mut self, entity: impl Into<String>) -> Self {
        self.entity_name = entity.into();
        self
    }

    pub fn with_parent_column(mut self, column: impl Into<String>) -> Self {
        self.parent_column = Some(column.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowMetadata {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tabs: Vec<Tab>,
}

impl WindowMetadata {
    pub fn tab(&self, id: &str) -> Option<&Tab> {
        self.tabs.iter().find(|t| t.id == id)
    }

    pub fn title(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

pub trait MetadataSource: Send + Sync {
    fn load_window_metadata(&self, window_id: &str) -> Result<WindowMetadata>;
}

impl<S: MetadataSource + ?Sized> MetadataSource for Arc<S> {
    fn load_window_metadata(&self, window_id: &str) -> Result<WindowMetadata> {
        (**self).load_window_metadata(window_id)
    }
}

/// Resolves which record of `parent_tab` owns `child_record_id` in `child_tab`.
///
/// Ancestor selection cannot be derived client-side from the target record
/// alone; implementations perform a reverse lookup against the backend.
pub trait ParentRecordResolver: Send + Sync {
    fn resolve_parent_record(
        &self,
        parent_tab: &Tab,
        child_tab: &Tab,
        child_record_id: &str,
    ) -> Result<Option<String>>;
}

impl<R: ParentRecordResolver + ?Sized> ParentRecordResolver for Arc<R> {
    fn resolve_parent_record(
        &self,
        parent_tab: &Tab,
        child_tab: &Tab,
        child_record_id: &str,
    ) -> Result<Option<String>> {
        (**self).resolve_parent_record(parent_tab, child_tab, child_record_id)
    }
}

/// Leaves ancestor tabs without a selected record.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnresolvedParents;

impl ParentRecordResolver for UnresolvedParents {
    fn resolve_parent_record(&self, _: &Tab, _: &Tab, _: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

/// Fetches each window type once and serves later requests from memory.
pub struct CachedMetadataSource<S> {
    inner: S,
    cache: Mutex<BTreeMap<String, WindowMetadata>>,
}

impl<S: MetadataSource> CachedMetadataSource<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            cache: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn invalidate(&self, window_id: &str) {
        if let Ok(mut g) = self.cache.lock() {
            g.remove(window_id);
        }
    }
}

impl<S: MetadataSource> MetadataSource for CachedMetadataSource<S> {
    fn load_window_metadata(&self, window_id: &str) -> Result<WindowMetadata> {
        if let Some(hit) = self
            .cache
            .lock()
            .ok()
            .and_then(|g| g.get(window_id).cloned())
        {
            debug!(window_id, "window metadata cache hit");
            return Ok(hit);
        }
        // Not holding the lock across the fetch; two racing misses both fetch.
        let meta = self.inner.load_window_metadata(window_id)?;
        if let Ok(mut g) = self.cache.lock() {
            g.insert(window_id.to_string(), meta.clone());
        }
        Ok(meta)
    }
}

/// In-memory source, mostly for tests and embedding.
#[derive(Debug, Default, Clone)]
pub struct StaticMetadataSource {
    windows: BTreeMap<String, WindowMetadata>,
}

impl StaticMetadataSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_window(mut self, meta: WindowMetadata) -> Self {
        self.windows.insert(meta.id.clone(), meta);
        self
    }

    pub fn insert(&mut self, meta: WindowMetadata) {
        self.windows.insert(meta.id.clone(), meta);
    }
}

impl MetadataSource for StaticMetadataSource {
    fn load_window_metadata(&self, window_id: &str) -> Result<WindowMetadata> {
        self.windows
            .get(window_id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("window metadata '{window_id}'")))
    }
}

/// Metadata source and ancestor resolver described by `[metadata]`.
pub fn open_sources(
    cfg: &MetadataConfig,
) -> Result<(Arc<dyn MetadataSource>, Arc<dyn ParentRecordResolver>)> {
    match cfg.source {
        MetadataSourceKind::Dir => {
            let dir = DirMetadataSource::open(&cfg.dir)?;
            let source: Arc<dyn MetadataSource> = if cfg.cache {
                Arc::new(CachedMetadataSource::new(dir))
            } else {
                Arc::new(dir)
            };
            let resolver: Arc<dyn ParentRecordResolver> = Arc::new(UnresolvedParents);
            Ok((source, resolver))
        }
        MetadataSourceKind::Http => {
            let http = Arc::new(HttpMetadataSource::from_config(cfg)?);
            let source: Arc<dyn MetadataSource> = if cfg.cache {
                Arc::new(CachedMetadataSource::new(Arc::clone(&http)))
            } else {
                Arc::clone(&http) as Arc<dyn MetadataSource>
            };
            let resolver: Arc<dyn ParentRecordResolver> = http;
            Ok((source, resolver))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct Counting {
        calls: AtomicUsize,
    }

    impl MetadataSource for Counting {
        fn load_window_metadata(&self, window_id: &str) -> Result<WindowMetadata> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(WindowMetadata {
                id: window_id.into(),
                name: String::new(),
                tabs: vec![Tab::new("t1", 0)],
            })
        }
    }

    #[test]
    fn cached_source_fetches_once_per_window_type() {
        let cached = CachedMetadataSource::new(Counting {
            calls: AtomicUsize::new(0),
        });
        cached.load_window_metadata("143").unwrap();
        cached.load_window_metadata("143").unwrap();
        cached.load_window_metadata("144").unwrap();
        assert_eq!(cached.inner().calls.load(Ordering::SeqCst), 2);

        cached.invalidate("143");
        cached.load_window_metadata("143").unwrap();
        assert_eq!(cached.inner().calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn title_falls_back_to_window_id() {
        let meta = WindowMetadata {
            id: "143".into(),
            name: " ".into(),
            tabs: vec![],
        };
        assert_eq!(meta.title(), "143");
    }

    #[test]
    fn static_source_reports_not_found() {
        let err = StaticMetadataSource::new()
            .load_window_metadata("999")
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotFound);
    }
}
