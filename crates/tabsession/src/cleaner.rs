//! Removal of used or broken recovery parameters from the address bar.

use std::collections::BTreeSet;

use tracing::{info, warn};

use crate::address::AddressBar;
use crate::codec::{self, ParamKind, RecoveryDescriptor};
use crate::log_sanitize::sanitize_log_value;

fn replace_if_changed(bar: &mut dyn AddressBar, next: url::Url) -> bool {
    if next == bar.current() {
        return false;
    }
    bar.replace(next);
    true
}

/// Drop every `wi_*`/`ti_*`/`ri_*` parameter, keeping everything else.
pub fn cleanup_url(bar: &mut dyn AddressBar) -> bool {
    let next = codec::strip_recovery_params(&bar.current());
    replace_if_changed(bar, next)
}

/// Drop the triple of one window and renumber the survivors `0..n` in their
/// previous order.
pub fn cleanup_failed_window_url(bar: &mut dyn AddressBar, index: usize) -> bool {
    cleanup_failed_windows_url(bar, &[index])
}

/// Like [`cleanup_failed_window_url`] for several windows at once. Indices
/// refer to the URL as it is now, before any renumbering.
pub fn cleanup_failed_windows_url(bar: &mut dyn AddressBar, indices: &[usize]) -> bool {
    let current = bar.current();
    let descriptors = codec::decode_url(&current);
    let failed: BTreeSet<usize> = indices
        .iter()
        .copied()
        .filter(|i| descriptors.iter().any(|d| d.index == *i))
        .collect();
    if failed.is_empty() {
        return false;
    }

    let mut pairs = Vec::new();
    let survivors = descriptors.iter().filter(|d| !failed.contains(&d.index));
    for (i, d) in survivors.enumerate() {
        pairs.push((ParamKind::Window.key(i), d.window_identifier.clone()));
        if let Some(t) = &d.tab_id {
            pairs.push((ParamKind::Tab.key(i), t.clone()));
        }
        if let Some(r) = &d.record_id {
            pairs.push((ParamKind::Record.key(i), r.clone()));
        }
    }
    info!(removed = ?failed, "removed failed windows from url");
    let next = codec::rewrite_query(&current, |k| !codec::is_recovery_key(k), &pairs);
    replace_if_changed(bar, next)
}

/// Strip the `ti_*`/`ri_*` pair of every descriptor that breaks the
/// co-occurrence rule, keeping its `wi_*`. Returns the repaired indices.
pub fn clean_invalid_parameters(bar: &mut dyn AddressBar) -> Vec<usize> {
    let current = bar.current();
    let invalid: BTreeSet<usize> = codec::decode_url(&current)
        .iter()
        .filter(|d| !d.is_valid())
        .inspect(|d| log_repair(d))
        .map(|d| d.index)
        .collect();
    if invalid.is_empty() {
        return Vec::new();
    }

    let next = codec::rewrite_query(
        &current,
        |k| match codec::parse_param_key(k) {
            Some((ParamKind::Tab | ParamKind::Record, i)) => !invalid.contains(&i),
            _ => true,
        },
        &[],
    );
    replace_if_changed(bar, next);
    invalid.into_iter().collect()
}

fn log_repair(d: &RecoveryDescriptor) {
    warn!(
        index = d.index,
        window = %sanitize_log_value(&d.window_identifier),
        tab_id = %d.tab_id.as_deref().map(sanitize_log_value).unwrap_or_default(),
        record_id = %d.record_id.as_deref().map(sanitize_log_value).unwrap_or_default(),
        "repairing recovery parameters: tab and record ids must come together"
    );
}
