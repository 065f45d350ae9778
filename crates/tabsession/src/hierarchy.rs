//! Cold-start reconstruction: from a recovery descriptor and the window's tab
//! metadata, rebuild the ancestor chain and the nested tab state it implies.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::codec::RecoveryDescriptor;
use crate::error::{Error, Result};
use crate::graph::resolve_parents;
use crate::log_sanitize::sanitize_log_value;
use crate::metadata::{ParentRecordResolver, Tab, TabId, WindowMetadata};
use crate::state::{FormState, NavigationState, RecordId, TabState};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetTab {
    pub tab: Tab,
    pub level: u32,
    pub record_id: RecordId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HierarchyChain {
    pub root_tab: Tab,
    /// Ancestors ordered root first; the target itself is not included.
    pub parent_tabs: Vec<Tab>,
    pub target_tab: TargetTab,
}

impl HierarchyChain {
    /// Root to target, target last.
    pub fn path(&self) -> impl Iterator<Item = &Tab> {
        self.parent_tabs
            .iter()
            .chain(std::iter::once(&self.target_tab.tab))
    }
}

pub fn calculate_hierarchy(
    descriptor: &RecoveryDescriptor,
    meta: &WindowMetadata,
) -> Result<HierarchyChain> {
    let (Some(tab_id), Some(record_id)) = (
        descriptor.tab_id.as_deref(),
        descriptor.record_id.as_deref(),
    ) else {
        return Err(Error::invalid_parameters(format!(
            "window {} has no tab/record pair to recover",
            descriptor.index
        )));
    };

    let target = meta.tab(tab_id).ok_or_else(|| {
        Error::not_found(format!("tab '{tab_id}' is not part of window '{}'", meta.id))
    })?;

    let parents: BTreeMap<TabId, Option<TabId>> = resolve_parents(&meta.tabs).into_iter().collect();

    let mut ancestors: Vec<Tab> = Vec::new();
    let mut seen: BTreeSet<&str> = BTreeSet::from([target.id.as_str()]);
    let mut cur = target;
    loop {
        match parents.get(&cur.id).cloned().flatten() {
            None if cur.level == 0 => break,
            None => {
                return Err(Error::cycle(format!(
                    "tab '{}' at level {} has no parent and is not a root",
                    cur.id, cur.level
                )));
            }
            Some(p) => {
                let Some(parent) = meta.tab(&p) else {
                    return Err(Error::cycle(format!(
                        "tab '{}' references missing parent tab '{p}'",
                        cur.id
                    )));
                };
                if !seen.insert(parent.id.as_str()) {
                    return Err(Error::cycle(format!(
                        "parent chain of tab '{tab_id}' loops at '{}'",
                        parent.id
                    )));
                }
                ancestors.push(parent.clone());
                cur = parent;
            }
        }
    }
    ancestors.reverse();

    let root_tab = ancestors.first().unwrap_or(target).clone();
    debug!(
        window = %meta.id,
        target = %sanitize_log_value(tab_id),
        depth = ancestors.len(),
        "calculated tab hierarchy"
    );
    Ok(HierarchyChain {
        root_tab,
        parent_tabs: ancestors,
        target_tab: TargetTab {
            tab: target.clone(),
            level: target.level,
            record_id: record_id.to_string(),
        },
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconstructedState {
    pub tabs: BTreeMap<TabId, Arc<TabState>>,
    pub navigation: NavigationState,
}

/// Expand a chain into per-tab state. The target opens in edit form; each
/// ancestor gets the record that owns its child's record, as far up as the
/// resolver can answer.
pub fn reconstruct_state(
    chain: &HierarchyChain,
    resolver: &dyn ParentRecordResolver,
) -> Result<ReconstructedState> {
    let target = &chain.target_tab;
    let mut tabs: BTreeMap<TabId, Arc<TabState>> = BTreeMap::new();
    let mut active_tabs_by_level: BTreeMap<u32, TabId> = BTreeMap::new();

    tabs.insert(
        target.tab.id.clone(),
        Arc::new(TabState {
            form: FormState::edit(target.record_id.clone()),
            level: target.level,
            selected_record: Some(target.record_id.clone()),
            ..Default::default()
        }),
    );
    active_tabs_by_level.insert(target.level, target.tab.id.clone());

    let mut child = &target.tab;
    let mut child_record: Option<RecordId> = Some(target.record_id.clone());
    for ancestor in chain.parent_tabs.iter().rev() {
        let resolved = match child_record.as_deref() {
            Some(r) => resolver.resolve_parent_record(ancestor, child, r)?,
            None => None,
        };
        tabs.insert(
            ancestor.id.clone(),
            Arc::new(TabState {
                level: ancestor.level,
                selected_record: resolved.clone(),
                ..Default::default()
            }),
        );
        active_tabs_by_level.insert(ancestor.level, ancestor.id.clone());
        child = ancestor;
        child_record = resolved;
    }

    Ok(ReconstructedState {
        tabs,
        navigation: NavigationState {
            active_levels: vec![target.level],
            active_tabs_by_level,
            initialized: true,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::metadata::UnresolvedParents;
    use crate::state::{FormMode, TabMode};

    fn meta() -> WindowMetadata {
        WindowMetadata {
            id: "143".into(),
            name: "Sales Order".into(),
            tabs: vec![
                Tab::new("header", 0).with_entity("Order"),
                Tab::new("lines", 1)
                    .with_parent("header")
                    .with_entity("OrderLine")
                    .with_parent_column("order"),
                Tab::new("discounts", 2)
                    .with_parent("lines")
                    .with_entity("LineDiscount")
                    .with_parent_column("line"),
            ],
        }
    }

    fn descriptor(tab: &str, record: &str) -> RecoveryDescriptor {
        RecoveryDescriptor::new(0, "143_1000", Some(tab.into()), Some(record.into()))
    }

    struct Prefixing;

    impl ParentRecordResolver for Prefixing {
        fn resolve_parent_record(
            &self,
            parent_tab: &Tab,
            _child_tab: &Tab,
            child_record_id: &str,
        ) -> Result<Option<String>> {
            Ok(Some(format!("{}-of-{}", parent_tab.id, child_record_id)))
        }
    }

    #[test]
    fn chain_runs_root_to_target() {
        let chain = calculate_hierarchy(&descriptor("discounts", "D1"), &meta()).unwrap();
        assert_eq!(chain.root_tab.id, "header");
        assert_eq!(
            chain.parent_tabs.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(),
            vec!["header", "lines"]
        );
        assert_eq!(chain.target_tab.level, 2);
        assert_eq!(chain.target_tab.record_id, "D1");
        assert_eq!(chain.path().count(), 3);
    }

    #[test]
    fn root_target_has_no_parents() {
        let chain = calculate_hierarchy(&descriptor("header", "H1"), &meta()).unwrap();
        assert_eq!(chain.root_tab.id, "header");
        assert!(chain.parent_tabs.is_empty());
    }

    #[test]
    fn missing_target_is_not_found() {
        let err = calculate_hierarchy(&descriptor("ghost", "1"), &meta()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn descriptor_without_pair_is_rejected() {
        let d = RecoveryDescriptor::new(0, "143_1", Some("lines".into()), None);
        let err = calculate_hierarchy(&d, &meta()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameters);
    }

    #[test]
    fn dangling_parent_aborts() {
        let mut m = meta();
        m.tabs[1].parent_tab_id = Some("gone".into());
        let err = calculate_hierarchy(&descriptor("discounts", "1"), &m).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CycleOrDanglingParent);
    }

    #[test]
    fn parent_cycle_aborts() {
        let mut m = meta();
        m.tabs[0].parent_tab_id = Some("discounts".into());
        let err = calculate_hierarchy(&descriptor("discounts", "1"), &m).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CycleOrDanglingParent);
    }

    #[test]
    fn inferred_parents_are_followed() {
        let m = WindowMetadata {
            id: "200".into(),
            name: String::new(),
            tabs: vec![
                Tab::new("root", 0).with_sequence(10),
                Tab::new("child", 1).with_sequence(10),
            ],
        };
        let chain = calculate_hierarchy(&descriptor("child", "C"), &m).unwrap();
        assert_eq!(chain.root_tab.id, "root");
    }

    #[test]
    fn orphan_without_root_is_dangling() {
        let m = WindowMetadata {
            id: "201".into(),
            name: String::new(),
            tabs: vec![Tab::new("floating", 2)],
        };
        let err = calculate_hierarchy(&descriptor("floating", "F"), &m).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CycleOrDanglingParent);
    }

    #[test]
    fn reconstruct_opens_target_form_and_selects_ancestors() {
        let chain = calculate_hierarchy(&descriptor("discounts", "D1"), &meta()).unwrap();
        let state = reconstruct_state(&chain, &Prefixing).unwrap();

        let target = &state.tabs["discounts"];
        assert_eq!(target.form.record_id.as_deref(), Some("D1"));
        assert_eq!(target.form.mode, Some(TabMode::Form));
        assert_eq!(target.form.form_mode, Some(FormMode::Edit));
        assert_eq!(target.selected_record.as_deref(), Some("D1"));
        assert_eq!(target.level, 2);

        let lines = &state.tabs["lines"];
        assert_eq!(lines.selected_record.as_deref(), Some("lines-of-D1"));
        assert_eq!(lines.form, FormState::default());
        assert_eq!(
            state.tabs["header"].selected_record.as_deref(),
            Some("header-of-lines-of-D1")
        );

        assert_eq!(state.navigation.active_levels, vec![2]);
        assert!(state.navigation.initialized);
        assert_eq!(
            state.navigation.active_tabs_by_level,
            BTreeMap::from([
                (0, "header".to_string()),
                (1, "lines".to_string()),
                (2, "discounts".to_string()),
            ])
        );
    }

    #[test]
    fn unresolved_ancestors_have_no_selection() {
        let chain = calculate_hierarchy(&descriptor("lines", "L1"), &meta()).unwrap();
        let state = reconstruct_state(&chain, &UnresolvedParents).unwrap();
        assert!(state.tabs["header"].selected_record.is_none());
        assert_eq!(state.tabs["lines"].selected_record.as_deref(), Some("L1"));
    }
}
