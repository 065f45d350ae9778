//! Live session store: holds the current state snapshot, keeps the address
//! bar in sync with it and respects the callout queue.

use std::sync::Arc;

use tracing::debug;

use crate::address::AddressBar;
use crate::callout::CalloutQueue;
use crate::codec;
use crate::error::{Error, Result};
use crate::graph::{Record, TabGraph};
use crate::identifier::IdentifierClock;
use crate::state::{self, SessionState, WindowState};

pub struct Session<B: AddressBar> {
    state: Arc<SessionState>,
    bar: B,
    callouts: Option<Arc<CalloutQueue>>,
    clock: IdentifierClock,
}

impl<B: AddressBar> Session<B> {
    pub fn new(bar: B) -> Self {
        Self {
            state: Arc::new(SessionState::default()),
            bar,
            callouts: None,
            clock: IdentifierClock::new(),
        }
    }

    pub fn with_callouts(mut self, queue: Arc<CalloutQueue>) -> Self {
        self.callouts = Some(queue);
        self
    }

    pub fn state(&self) -> &Arc<SessionState> {
        &self.state
    }

    pub fn address_bar(&self) -> &B {
        &self.bar
    }

    pub fn address_bar_mut(&mut self) -> &mut B {
        &mut self.bar
    }

    fn ensure_idle(&self) -> Result<()> {
        if let Some(q) = &self.callouts {
            let st = q.state();
            if st.is_running {
                return Err(Error::busy(format!(
                    "a callout is running ({} queued)",
                    st.queue_length
                )));
            }
        }
        Ok(())
    }

    /// Replace the snapshot with `f(snapshot)` and re-encode the URL.
    pub fn apply(
        &mut self,
        f: impl FnOnce(&Arc<SessionState>) -> Arc<SessionState>,
    ) -> Result<()> {
        self.ensure_idle()?;
        let next = f(&self.state);
        if Arc::ptr_eq(&next, &self.state) {
            return Ok(());
        }
        self.state = next;
        self.sync_url();
        Ok(())
    }

    fn sync_url(&mut self) {
        let current = self.bar.current();
        let next = codec::sync_url(&current, &self.state.windows);
        if next != current {
            debug!(query = next.query().unwrap_or_default(), "address bar synced");
            self.bar.replace(next);
        }
    }

    /// Adopt windows produced by recovery, in order. A window already in the
    /// session is replaced in place. The last adopted active window becomes
    /// the only active one.
    pub fn adopt_recovered(&mut self, windows: &[Arc<WindowState>]) -> Result<()> {
        let active = windows
            .iter()
            .rev()
            .find(|w| w.is_active)
            .map(|w| w.window_identifier.clone());
        self.apply(|s| {
            let mut next = Arc::clone(s);
            for w in windows {
                next = state::insert_window(&next, WindowState::clone(w));
            }
            match active {
                Some(id) => state::set_active_window(&next, &id),
                None => next,
            }
        })
    }

    /// Open a new instance of `window_id`; returns its identifier.
    pub fn open_window(&mut self, window_id: &str, title: &str) -> Result<String> {
        let identifier = self.clock.next(window_id);
        self.apply(|s| state::open_window(s, &identifier, title))?;
        Ok(identifier)
    }

    pub fn close_window(&mut self, window_identifier: &str) -> Result<()> {
        self.apply(|s| state::close_window(s, window_identifier))
    }

    /// Select a record in both the graph and the window state; descendants
    /// lose their selection in both.
    pub fn select_record(
        &mut self,
        graph: &mut TabGraph,
        window_identifier: &str,
        tab_id: &str,
        record: Record,
    ) -> Result<()> {
        self.ensure_idle()?;
        let level = graph.node(tab_id)?.tab.level;
        let descendants = graph.descendants(tab_id)?;
        let record_id = record.id.clone();
        graph.set_selected(tab_id, record)?;
        self.apply(|s| {
            let s = state::clear_selected_record(
                s,
                window_identifier,
                descendants.iter().map(String::as_str),
            );
            state::set_selected_record(&s, window_identifier, tab_id, &record_id, level)
        })
    }

    /// Save, then navigate, refusing to start while a callout is running.
    pub fn navigate_with_autosave(
        &mut self,
        save: impl FnOnce(&Arc<SessionState>) -> Result<()>,
        navigate: impl FnOnce(&Arc<SessionState>) -> Arc<SessionState>,
    ) -> Result<()> {
        self.ensure_idle()?;
        save(&self.state)?;
        self.apply(navigate)
    }
}
