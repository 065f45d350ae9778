use std::collections::BTreeMap;
use std::sync::Arc;

use super::{
    ColumnFilter, FormState, NavigationState, SessionState, SortSpec, TabMode, TabState,
    WindowState,
};
use crate::metadata::TabId;

/// One replaceable field of a tab's table state.
#[derive(Debug, Clone, PartialEq)]
pub enum TableProperty {
    Filters(Vec<ColumnFilter>),
    Visibility(BTreeMap<String, bool>),
    Sorting(Vec<SortSpec>),
    Order(Vec<String>),
    ImplicitFilterApplied(bool),
}

impl TableProperty {
    fn apply(self, tab: &mut TabState) {
        let table = &mut tab.table;
        match self {
            TableProperty::Filters(v) => table.filters = v,
            TableProperty::Visibility(v) => table.visibility = v,
            TableProperty::Sorting(v) => table.sorting = v,
            TableProperty::Order(v) => table.order = v,
            TableProperty::ImplicitFilterApplied(v) => table.is_implicit_filter_applied = v,
        }
    }
}

/// One replaceable field of a window's navigation state.
#[derive(Debug, Clone, PartialEq)]
pub enum NavigationProperty {
    ActiveLevels(Vec<u32>),
    ActiveTabsByLevel(BTreeMap<u32, TabId>),
    Initialized(bool),
}

impl NavigationProperty {
    fn apply(self, nav: &mut NavigationState) {
        match self {
            NavigationProperty::ActiveLevels(v) => nav.active_levels = v,
            NavigationProperty::ActiveTabsByLevel(v) => nav.active_tabs_by_level = v,
            NavigationProperty::Initialized(v) => nav.initialized = v,
        }
    }
}

// Copy the window list (cheap: a Vec of Arcs), then copy-on-write only the
// window being changed. A missing window is created with defaults.
fn modify_window(
    state: &Arc<SessionState>,
    window_identifier: &str,
    f: impl FnOnce(&mut WindowState),
) -> Arc<SessionState> {
    let mut next = SessionState::clone(state);
    match next
        .windows
        .iter()
        .position(|w| w.window_identifier == window_identifier)
    {
        Some(i) => f(Arc::make_mut(&mut next.windows[i])),
        None => {
            let mut w = WindowState::new(window_identifier);
            f(&mut w);
            next.windows.push(Arc::new(w));
        }
    }
    Arc::new(next)
}

fn modify_tab(
    state: &Arc<SessionState>,
    window_identifier: &str,
    tab_id: &str,
    level: u32,
    f: impl FnOnce(&mut TabState),
) -> Arc<SessionState> {
    modify_window(state, window_identifier, |w| {
        let tab = w
            .tabs
            .entry(tab_id.to_string())
            .or_insert_with(|| Arc::new(TabState::at_level(level)));
        f(Arc::make_mut(tab));
    })
}

/// Returns `state` itself when the window and tab already exist.
pub fn ensure_tab_exists(
    state: &Arc<SessionState>,
    window_identifier: &str,
    tab_id: &str,
    level: u32,
) -> Arc<SessionState> {
    if state.tab(window_identifier, tab_id).is_some() {
        return Arc::clone(state);
    }
    modify_tab(state, window_identifier, tab_id, level, |_| {})
}

pub fn update_table_property(
    state: &Arc<SessionState>,
    window_identifier: &str,
    tab_id: &str,
    property: TableProperty,
    level: u32,
) -> Arc<SessionState> {
    modify_tab(state, window_identifier, tab_id, level, |tab| {
        property.apply(tab)
    })
}

pub fn update_navigation_property(
    state: &Arc<SessionState>,
    window_identifier: &str,
    property: NavigationProperty,
) -> Arc<SessionState> {
    modify_window(state, window_identifier, |w| property.apply(&mut w.navigation))
}

/// A tab renders as a form only in form mode, with a record, and when its
/// parent (if it has one) has a selection to filter by.
pub fn is_form_view(
    current_mode: Option<TabMode>,
    record_id: Option<&str>,
    has_parent_selection: bool,
) -> bool {
    current_mode == Some(TabMode::Form)
        && record_id.is_some_and(|r| !r.is_empty())
        && has_parent_selection
}

pub fn mark_window_as_initialized(window: &WindowState) -> WindowState {
    let mut next = window.clone();
    next.initialized = true;
    next.navigation.initialized = true;
    next
}

/// Navigation readiness is tracked separately and not required here.
pub fn is_window_ready(window: &WindowState) -> bool {
    window.initialized
}

pub fn mark_initialized(state: &Arc<SessionState>, window_identifier: &str) -> Arc<SessionState> {
    modify_window(state, window_identifier, |w| {
        *w = mark_window_as_initialized(w);
    })
}

/// Append a new window and make it the only active one.
pub fn open_window(
    state: &Arc<SessionState>,
    window_identifier: &str,
    title: &str,
) -> Arc<SessionState> {
    let next = modify_window(state, window_identifier, |w| {
        w.title = title.to_string();
    });
    set_active_window(&next, window_identifier)
}

/// Insert or replace a whole window, keeping its position when it exists.
pub fn insert_window(state: &Arc<SessionState>, window: WindowState) -> Arc<SessionState> {
    let identifier = window.window_identifier.clone();
    modify_window(state, &identifier, move |w| *w = window)
}

pub fn close_window(state: &Arc<SessionState>, window_identifier: &str) -> Arc<SessionState> {
    if state.window(window_identifier).is_none() {
        return Arc::clone(state);
    }
    let mut next = SessionState::clone(state);
    let was_active = next
        .windows
        .iter()
        .any(|w| w.window_identifier == window_identifier && w.is_active);
    next.windows
        .retain(|w| w.window_identifier != window_identifier);
    // Closing the active window hands focus to the most recently opened one.
    if was_active && let Some(last) = next.windows.last_mut() {
        Arc::make_mut(last).is_active = true;
    }
    Arc::new(next)
}

pub fn set_active_window(state: &Arc<SessionState>, window_identifier: &str) -> Arc<SessionState> {
    let mut next = SessionState::clone(state);
    for w in &mut next.windows {
        let active = w.window_identifier == window_identifier;
        if w.is_active != active {
            Arc::make_mut(w).is_active = active;
        }
    }
    Arc::new(next)
}

pub fn set_selected_record(
    state: &Arc<SessionState>,
    window_identifier: &str,
    tab_id: &str,
    record_id: &str,
    level: u32,
) -> Arc<SessionState> {
    modify_tab(state, window_identifier, tab_id, level, |tab| {
        tab.selected_record = Some(record_id.to_string());
    })
}

/// Drop selection and form for each listed tab (a tab plus its descendants).
/// Tabs the window never touched are skipped rather than created.
pub fn clear_selected_record<'a>(
    state: &Arc<SessionState>,
    window_identifier: &str,
    tab_ids: impl IntoIterator<Item = &'a str>,
) -> Arc<SessionState> {
    let Some(window) = state.window(window_identifier) else {
        return Arc::clone(state);
    };
    let targets: Vec<&str> = tab_ids
        .into_iter()
        .filter(|id| window.tabs.contains_key(*id))
        .collect();
    if targets.is_empty() {
        return Arc::clone(state);
    }
    modify_window(state, window_identifier, |w| {
        for id in targets {
            if let Some(tab) = w.tabs.get_mut(id) {
                let tab = Arc::make_mut(tab);
                tab.selected_record = None;
                tab.form = FormState::default();
            }
        }
    })
}

pub fn set_form_state(
    state: &Arc<SessionState>,
    window_identifier: &str,
    tab_id: &str,
    form: FormState,
    level: u32,
) -> Arc<SessionState> {
    modify_tab(state, window_identifier, tab_id, level, |tab| tab.form = form)
}

pub fn clear_form_state(
    state: &Arc<SessionState>,
    window_identifier: &str,
    tab_id: &str,
) -> Arc<SessionState> {
    if state.tab(window_identifier, tab_id).is_none() {
        return Arc::clone(state);
    }
    modify_window(state, window_identifier, |w| {
        if let Some(tab) = w.tabs.get_mut(tab_id) {
            Arc::make_mut(tab).form = FormState::default();
        }
    })
}
