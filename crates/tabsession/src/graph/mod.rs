//! Tab hierarchy graph for one open window: a forest of tabs where each
//! child's rows are filtered by its parent's selected record.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::error::{Error, Result};
use crate::metadata::{Tab, TabId};

pub mod events;

pub use events::{ChannelSink, GraphEvent, GraphSink, Record};

/// Assign a parent to every tab.
///
/// Explicit `parent_tab_id` links win. Otherwise tabs are visited ordered by
/// `(level, sequence_number)` (input order breaks ties) and a tab at level `n`
/// takes the most recently visited tab at level `n - 1`. With several level-0
/// tabs the last one visited adopts every orphaned level-1 tab; this is a
/// known limitation of the heuristic.
pub fn resolve_parents(tabs: &[Tab]) -> Vec<(TabId, Option<TabId>)> {
    let mut order: Vec<(usize, &Tab)> = tabs.iter().enumerate().collect();
    order.sort_by(|(ia, a), (ib, b)| {
        a.level
            .cmp(&b.level)
            .then(a.sequence_number.cmp(&b.sequence_number))
            .then(ia.cmp(ib))
    });

    let mut last_at_level: BTreeMap<u32, &str> = BTreeMap::new();
    let mut out = Vec::with_capacity(tabs.len());
    for (_, tab) in order {
        let parent = match tab.parent_tab_id.as_deref() {
            Some(p) if !p.is_empty() => Some(p.to_string()),
            _ if tab.level > 0 => last_at_level.get(&(tab.level - 1)).map(|p| p.to_string()),
            _ => None,
        };
        last_at_level.insert(tab.level, tab.id.as_str());
        out.push((tab.id.clone(), parent));
    }
    out
}

#[derive(Debug, Clone)]
pub struct TabNode {
    pub tab: Tab,
    pub children: BTreeSet<TabId>,
    pub selected: Option<Record>,
    pub selected_multiple: Vec<Record>,
}

impl TabNode {
    fn new(tab: Tab) -> Self {
        Self {
            tab,
            children: BTreeSet::new(),
            selected: None,
            selected_multiple: Vec::new(),
        }
    }

    fn clear_selection(&mut self) {
        self.selected = None;
        self.selected_multiple.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

#[derive(Default)]
pub struct TabGraph {
    nodes: BTreeMap<TabId, TabNode>,
    // Traversal order used for parent inference; also the display order.
    order: Vec<TabId>,
    current_level: u32,
    sinks: Vec<(SubscriptionId, Box<dyn GraphSink>)>,
    next_subscription: u64,
}

impl std::fmt::Debug for TabGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TabGraph")
            .field("nodes", &self.nodes)
            .field("current_level", &self.current_level)
            .field("subscribers", &self.sinks.len())
            .finish()
    }
}

impl TabGraph {
    pub fn build_from_tabs(tabs: &[Tab]) -> Result<Self> {
        let mut nodes: BTreeMap<TabId, TabNode> = BTreeMap::new();
        for tab in tabs {
            if nodes.insert(tab.id.clone(), TabNode::new(tab.clone())).is_some() {
                return Err(Error::msg(format!("duplicate tab id '{}'", tab.id)));
            }
        }

        let parents = resolve_parents(tabs);
        let mut order = Vec::with_capacity(parents.len());
        let mut roots = Vec::new();
        for (id, parent) in parents {
            match parent {
                Some(p) => {
                    let Some(parent_node) = nodes.get_mut(&p) else {
                        return Err(Error::not_found(format!(
                            "tab '{id}' references unknown parent tab '{p}'"
                        )));
                    };
                    parent_node.children.insert(id.clone());
                }
                None => roots.push(id.clone()),
            }
            order.push(id);
        }

        // Every tab must hang off exactly one root; anything else sits on a cycle.
        let mut reached: BTreeSet<&str> = BTreeSet::new();
        let mut stack: Vec<&str> = roots.iter().map(String::as_str).collect();
        while let Some(id) = stack.pop() {
            if !reached.insert(id) {
                continue;
            }
            if let Some(n) = nodes.get(id) {
                stack.extend(n.children.iter().map(String::as_str));
            }
        }
        if reached.len() != nodes.len() {
            let stranded: Vec<&str> = nodes
                .keys()
                .map(String::as_str)
                .filter(|id| !reached.contains(id))
                .collect();
            return Err(Error::cycle(format!(
                "tab graph contains a cycle; unreachable tabs: {}",
                stranded.join(", ")
            )));
        }

        debug!(tabs = nodes.len(), roots = roots.len(), "built tab graph");
        Ok(Self {
            nodes,
            order,
            ..Default::default()
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn current_level(&self) -> u32 {
        self.current_level
    }

    pub fn tabs(&self) -> impl Iterator<Item = &Tab> {
        self.order
            .iter()
            .filter_map(|id| self.nodes.get(id).map(|n| &n.tab))
    }

    pub fn node(&self, tab_id: &str) -> Result<&TabNode> {
        self.nodes
            .get(tab_id)
            .ok_or_else(|| Error::not_found(format!("tab '{tab_id}' is not in the graph")))
    }

    fn node_mut(&mut self, tab_id: &str) -> Result<&mut TabNode> {
        self.nodes
            .get_mut(tab_id)
            .ok_or_else(|| Error::not_found(format!("tab '{tab_id}' is not in the graph")))
    }

    pub fn get_parent(&self, tab_id: &str) -> Result<Option<&Tab>> {
        self.node(tab_id)?;
        Ok(self
            .nodes
            .values()
            .find(|n| n.children.contains(tab_id))
            .map(|n| &n.tab))
    }

    pub fn get_children(&self, tab_id: &str) -> Result<Vec<&Tab>> {
        let node = self.node(tab_id)?;
        Ok(node
            .children
            .iter()
            .filter_map(|c| self.nodes.get(c).map(|n| &n.tab))
            .collect())
    }

    pub fn roots(&self) -> Vec<&Tab> {
        self.tabs()
            .filter(|t| !self.nodes.values().any(|n| n.children.contains(&t.id)))
            .collect()
    }

    /// All tabs below `tab_id`, depth first, excluding `tab_id` itself.
    pub fn descendants(&self, tab_id: &str) -> Result<Vec<TabId>> {
        let mut out = Vec::new();
        let mut stack: Vec<&str> = self
            .node(tab_id)?
            .children
            .iter()
            .rev()
            .map(String::as_str)
            .collect();
        while let Some(id) = stack.pop() {
            out.push(id.to_string());
            if let Some(n) = self.nodes.get(id) {
                stack.extend(n.children.iter().rev().map(String::as_str));
            }
        }
        Ok(out)
    }

    pub fn get_selected(&self, tab_id: &str) -> Result<Option<&Record>> {
        Ok(self.node(tab_id)?.selected.as_ref())
    }

    pub fn get_selected_multiple(&self, tab_id: &str) -> Result<&[Record]> {
        Ok(&self.node(tab_id)?.selected_multiple)
    }

    pub fn set_selected(&mut self, tab_id: &str, record: Record) -> Result<()> {
        let node = self.node_mut(tab_id)?;
        node.selected = Some(record.clone());
        let level = node.tab.level;
        self.cascade_clear(tab_id)?;
        self.current_level = level;
        debug!(tab_id, record_id = %record.id, "tab selection changed");

        self.emit(&GraphEvent::Selected {
            tab_id: tab_id.to_string(),
            record,
        });
        self.emit(&GraphEvent::Update {
            tab_id: tab_id.to_string(),
        });
        Ok(())
    }

    pub fn clear_selected(&mut self, tab_id: &str) -> Result<()> {
        self.node_mut(tab_id)?.selected = None;
        self.cascade_clear(tab_id)?;
        let parent_level = self.get_parent(tab_id)?.map(|p| p.level).unwrap_or(0);
        self.current_level = parent_level;
        debug!(tab_id, "tab selection cleared");

        self.emit(&GraphEvent::Update {
            tab_id: tab_id.to_string(),
        });
        Ok(())
    }

    pub fn set_selected_multiple(&mut self, tab_id: &str, records: Vec<Record>) -> Result<()> {
        self.node_mut(tab_id)?.selected_multiple = records.clone();
        self.cascade_clear(tab_id)?;

        self.emit(&GraphEvent::SelectedMultiple {
            tab_id: tab_id.to_string(),
            records,
        });
        self.emit(&GraphEvent::Update {
            tab_id: tab_id.to_string(),
        });
        Ok(())
    }

    pub fn clear_selected_multiple(&mut self, tab_id: &str) -> Result<()> {
        self.node_mut(tab_id)?.selected_multiple.clear();
        self.cascade_clear(tab_id)?;

        self.emit(&GraphEvent::Update {
            tab_id: tab_id.to_string(),
        });
        Ok(())
    }

    // Children filter on the parent's selection, so any change above drops theirs.
    fn cascade_clear(&mut self, tab_id: &str) -> Result<()> {
        for id in self.descendants(tab_id)? {
            if let Some(n) = self.nodes.get_mut(&id) {
                n.clear_selection();
            }
        }
        Ok(())
    }

    pub fn subscribe(&mut self, sink: impl GraphSink + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.sinks.push((id, Box::new(sink)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.sinks.len();
        self.sinks.retain(|(sid, _)| *sid != id);
        self.sinks.len() != before
    }

    fn emit(&self, ev: &GraphEvent) {
        for (_, sink) in &self.sinks {
            sink.emit(ev);
        }
    }

    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph tabs {\n  rankdir=TB;\n");
        for tab in self.tabs() {
            out.push_str(&format!(
                "  \"{}\" [label=\"{}\\n{}:{}\"];\n",
                tab.id,
                if tab.name.is_empty() { &tab.id } else { &tab.name },
                tab.entity_name,
                tab.level
            ));
        }
        for id in &self.order {
            if let Some(n) = self.nodes.get(id) {
                for child in &n.children {
                    out.push_str(&format!("  \"{}\" -> \"{}\";\n", id, child));
                }
            }
        }
        out.push_str("}\n");
        out
    }
}
