//! URL codec for open windows.
//!
//! ```text
//! wi_<i> = "<windowTypeId>_<creationTimestampMillis>"   required per window
//! ti_<i> = "<tabId>"                                     deepest tab with form + selection
//! ri_<i> = "<recordId>"                                  paired with ti_<i>
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};
use url::Url;
use url::form_urlencoded;

use crate::log_sanitize::sanitize_log_value;
use crate::state::WindowState;

pub const WINDOW_PREFIX: &str = "wi";
pub const TAB_PREFIX: &str = "ti";
pub const RECORD_PREFIX: &str = "ri";

static PARAM_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(wi|ti|ri)_(\d+)$").expect("static regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Window,
    Tab,
    Record,
}

impl ParamKind {
    pub fn prefix(self) -> &'static str {
        match self {
            ParamKind::Window => WINDOW_PREFIX,
            ParamKind::Tab => TAB_PREFIX,
            ParamKind::Record => RECORD_PREFIX,
        }
    }

    pub fn key(self, index: usize) -> String {
        format!("{}_{}", self.prefix(), index)
    }
}

/// Parse `wi_3` / `ti_3` / `ri_3`. Anything else is not a recovery key.
pub fn parse_param_key(key: &str) -> Option<(ParamKind, usize)> {
    let caps = PARAM_KEY.captures(key)?;
    let kind = match &caps[1] {
        "wi" => ParamKind::Window,
        "ti" => ParamKind::Tab,
        _ => ParamKind::Record,
    };
    let index = caps[2].parse().ok()?;
    Some((kind, index))
}

/// True for keys in the recovery namespace, including malformed ones such as
/// `wi_x`, so that cleanup never leaves half-recognised state behind.
pub fn is_recovery_key(key: &str) -> bool {
    [WINDOW_PREFIX, TAB_PREFIX, RECORD_PREFIX]
        .iter()
        .any(|p| key.strip_prefix(p).is_some_and(|rest| rest.starts_with('_')))
}

/// Decoded per-window unit of URL state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryDescriptor {
    /// Position of the window among open windows (the `<i>` in `wi_<i>`).
    pub index: usize,
    pub window_identifier: String,
    pub tab_id: Option<String>,
    pub record_id: Option<String>,
    pub has_recovery_data: bool,
}

impl RecoveryDescriptor {
    pub fn new(
        index: usize,
        window_identifier: impl Into<String>,
        tab_id: Option<String>,
        record_id: Option<String>,
    ) -> Self {
        let tab_id = tab_id.filter(|t| !t.is_empty());
        let record_id = record_id.filter(|r| !r.is_empty());
        Self {
            index,
            window_identifier: window_identifier.into(),
            has_recovery_data: tab_id.is_some() && record_id.is_some(),
            tab_id,
            record_id,
        }
    }

    pub fn window_id(&self) -> &str {
        crate::identifier::window_id_from_identifier(&self.window_identifier)
    }

    pub fn is_valid(&self) -> bool {
        is_valid(self)
    }

    /// Drop a lone tab or record id; a valid descriptor is returned unchanged.
    pub fn repaired(&self) -> Self {
        if self.is_valid() {
            return self.clone();
        }
        Self::new(self.index, self.window_identifier.clone(), None, None)
    }
}

/// Tab and record ids must co-occur: both present or both absent.
pub fn is_valid(descriptor: &RecoveryDescriptor) -> bool {
    descriptor.tab_id.is_some() == descriptor.record_id.is_some()
}

/// Ordered `(key, value)` pairs for the given windows.
pub fn encode_pairs(windows: &[Arc<WindowState>]) -> Vec<(String, String)> {
    let mut out = Vec::with_capacity(windows.len() * 3);
    for (i, w) in windows.iter().enumerate() {
        out.push((ParamKind::Window.key(i), w.window_identifier.clone()));
        if let Some((tab_id, tab)) = w.deepest_open_form()
            && let Some(record_id) = tab.form.record_id.as_deref()
        {
            out.push((ParamKind::Tab.key(i), tab_id.to_string()));
            out.push((ParamKind::Record.key(i), record_id.to_string()));
        }
    }
    out
}

pub fn encode(windows: &[Arc<WindowState>]) -> String {
    let mut ser = form_urlencoded::Serializer::new(String::new());
    for (k, v) in encode_pairs(windows) {
        ser.append_pair(&k, &v);
    }
    ser.finish()
}

#[derive(Default)]
struct Slot {
    window: Option<String>,
    tab: Option<String>,
    record: Option<String>,
}

/// Decode recovery descriptors from query pairs, ordered by window index.
pub fn decode_pairs<K, V, I>(pairs: I) -> Vec<RecoveryDescriptor>
where
    K: AsRef<str>,
    V: AsRef<str>,
    I: IntoIterator<Item = (K, V)>,
{
    let mut slots: BTreeMap<usize, Slot> = BTreeMap::new();
    for (k, v) in pairs {
        let (k, v) = (k.as_ref(), v.as_ref());
        let Some((kind, index)) = parse_param_key(k) else {
            if is_recovery_key(k) {
                debug!(key = %sanitize_log_value(k), "ignoring malformed recovery parameter");
            }
            continue;
        };
        let slot = slots.entry(index).or_default();
        let field = match kind {
            ParamKind::Window => &mut slot.window,
            ParamKind::Tab => &mut slot.tab,
            ParamKind::Record => &mut slot.record,
        };
        // First occurrence wins on duplicates.
        if field.is_none() {
            *field = Some(v.to_string());
        }
    }

    slots
        .into_iter()
        .filter_map(|(index, slot)| {
            let Some(window) = slot.window.filter(|w| !w.is_empty()) else {
                if slot.tab.is_some() || slot.record.is_some() {
                    debug!(index, "ignoring tab/record parameters without a window");
                }
                return None;
            };
            if !is_safe_id(&window) {
                warn!(index, window = %sanitize_log_value(&window), "ignoring window with a path-like identifier");
                return None;
            }
            let tab = safe_or_absent(index, "tab", slot.tab);
            let record = safe_or_absent(index, "record", slot.record);
            Some(RecoveryDescriptor::new(index, window, tab, record))
        })
        .collect()
}

/// Ids end up as single path segments in backend requests; anything that
/// could address another path is refused.
pub fn is_safe_id(value: &str) -> bool {
    !value.is_empty() && value != "." && value != ".." && !value.contains(['/', '\\'])
}

fn safe_or_absent(index: usize, what: &str, value: Option<String>) -> Option<String> {
    match value {
        Some(v) if !v.is_empty() && !is_safe_id(&v) => {
            warn!(index, what, value = %sanitize_log_value(&v), "dropping path-like recovery parameter");
            None
        }
        other => other,
    }
}

pub fn decode(query: &str) -> Vec<RecoveryDescriptor> {
    let query = query.strip_prefix('?').unwrap_or(query);
    decode_pairs(form_urlencoded::parse(query.as_bytes()))
}

pub fn decode_url(url: &Url) -> Vec<RecoveryDescriptor> {
    decode_pairs(url.query_pairs())
}

pub fn has_recovery_params(url: &Url) -> bool {
    url.query_pairs().any(|(k, _)| is_recovery_key(&k))
}

/// Rebuild the query of `url`: keep the raw `key=value` segments whose
/// decoded key passes `keep`, byte for byte and in order, then append
/// `extra` form-encoded. An empty result clears the query.
pub fn rewrite_query(
    url: &Url,
    mut keep: impl FnMut(&str) -> bool,
    extra: &[(String, String)],
) -> Url {
    let mut ser = form_urlencoded::Serializer::new(String::new());
    for (k, v) in extra {
        ser.append_pair(k, v);
    }
    let encoded = ser.finish();

    let mut parts: Vec<&str> = url
        .query()
        .unwrap_or_default()
        .split('&')
        .filter(|seg| !seg.is_empty())
        .filter(|seg| {
            let key = form_urlencoded::parse(seg.as_bytes())
                .next()
                .map(|(k, _)| k)
                .unwrap_or_default();
            keep(key.as_ref())
        })
        .collect();
    if !encoded.is_empty() {
        parts.push(&encoded);
    }

    let mut next = url.clone();
    if parts.is_empty() {
        next.set_query(None);
    } else {
        next.set_query(Some(&parts.join("&")));
    }
    next
}

/// `url` without any recovery parameter; everything else is left untouched.
pub fn strip_recovery_params(url: &Url) -> Url {
    rewrite_query(url, |k| !is_recovery_key(k), &[])
}

/// Re-encode `windows` into `url`, keeping unrelated parameters first.
pub fn sync_url(url: &Url, windows: &[Arc<WindowState>]) -> Url {
    rewrite_query(url, |k| !is_recovery_key(k), &encode_pairs(windows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{FormState, TabState};

    fn window(identifier: &str, tabs: &[(&str, u32, Option<&str>, Option<&str>)]) -> Arc<WindowState> {
        let mut w = WindowState::new(identifier);
        for (id, level, selected, form_record) in tabs {
            let mut t = TabState::at_level(*level);
            t.selected_record = selected.map(str::to_string);
            if let Some(r) = form_record {
                t.form = FormState::edit(*r);
            }
            w.tabs.insert(id.to_string(), Arc::new(t));
        }
        Arc::new(w)
    }

    #[test]
    fn deepest_tab_wins() {
        let windows = vec![window(
            "143_1000",
            &[("t1", 0, Some("A"), Some("A")), ("t2", 1, Some("B"), Some("B"))],
        )];
        assert_eq!(encode(&windows), "wi_0=143_1000&ti_0=t2&ri_0=B");
    }

    #[test]
    fn tab_needs_both_selection_and_form_record() {
        let windows = vec![
            window(
                "143_1",
                &[("t1", 0, Some("A"), Some("A")), ("t2", 1, Some("B"), None)],
            ),
            window("144_2", &[("x", 0, None, Some("C"))]),
        ];
        assert_eq!(encode(&windows), "wi_0=143_1&ti_0=t1&ri_0=A&wi_1=144_2");
    }

    #[test]
    fn decode_pairs_lone_tab_without_record() {
        let got = decode("wi_0=143_1&ti_0=t1");
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].tab_id.as_deref(), Some("t1"));
        assert!(got[0].record_id.is_none());
        assert!(!got[0].has_recovery_data);
        assert!(!got[0].is_valid());
        assert_eq!(got[0].repaired().tab_id, None);
    }

    #[test]
    fn decode_orders_by_index_not_position() {
        let got = decode("?wi_2=c_3&foo=bar&wi_0=a_1&ri_0=r&ti_0=t&wi_1=b_2");
        let ids: Vec<&str> = got.iter().map(|d| d.window_identifier.as_str()).collect();
        assert_eq!(ids, vec!["a_1", "b_2", "c_3"]);
        assert!(got[0].has_recovery_data);
        assert_eq!(got[0].window_id(), "a");
        assert_eq!(got[2].index, 2);
    }

    #[test]
    fn decode_ignores_malformed_and_orphan_keys() {
        let got = decode("wi_x=1&ti_3=t&ri_3=r&wi_=2&wi_1=");
        assert!(got.is_empty());
    }

    #[test]
    fn empty_values_count_as_absent() {
        let got = decode("wi_0=143_1&ti_0=&ri_0=");
        assert!(got[0].tab_id.is_none());
        assert!(got[0].record_id.is_none());
        assert!(got[0].is_valid());
    }

    #[test]
    fn validity_rule() {
        let both = RecoveryDescriptor::new(0, "1_1", Some("t".into()), Some("r".into()));
        let none = RecoveryDescriptor::new(0, "1_1", None, None);
        let tab_only = RecoveryDescriptor::new(0, "1_1", Some("t".into()), None);
        let record_only = RecoveryDescriptor::new(0, "1_1", None, Some("r".into()));
        assert!(is_valid(&both));
        assert!(is_valid(&none));
        assert!(!is_valid(&tab_only));
        assert!(!is_valid(&record_only));
    }

    #[test]
    fn recovery_key_namespace() {
        assert_eq!(parse_param_key("wi_12"), Some((ParamKind::Window, 12)));
        assert_eq!(parse_param_key("ri_0"), Some((ParamKind::Record, 0)));
        assert_eq!(parse_param_key("wi_1a"), None);
        assert!(is_recovery_key("wi_1a"));
        assert!(!is_recovery_key("width"));
        assert!(!is_recovery_key("wi"));
    }

    #[test]
    fn sync_url_keeps_foreign_params() {
        let url = Url::parse("https://erp.example/app?lang=en&wi_0=old_1&ti_0=x&ri_0=y").unwrap();
        let windows = vec![window("143_5", &[])];
        let next = sync_url(&url, &windows);
        assert_eq!(next.query(), Some("lang=en&wi_0=143_5"));

        let cleared = sync_url(&Url::parse("https://erp.example/app?wi_0=a_1").unwrap(), &[]);
        assert_eq!(cleared.query(), None);
    }

    #[test]
    fn values_are_percent_encoded() {
        let windows = vec![window("143_1", &[("t 1", 0, Some("a&b"), Some("a&b"))])];
        let q = encode(&windows);
        assert_eq!(q, "wi_0=143_1&ti_0=t+1&ri_0=a%26b");
        let back = decode(&q);
        assert_eq!(back[0].tab_id.as_deref(), Some("t 1"));
        assert_eq!(back[0].record_id.as_deref(), Some("a&b"));
    }

    #[test]
    fn foreign_params_keep_their_exact_text() {
        let url = Url::parse("https://erp.example/app?debug&q=a%20b&wi_0=1_1&ti_0=t&ri_0=r&x=1+2")
            .unwrap();
        assert_eq!(strip_recovery_params(&url).query(), Some("debug&q=a%20b&x=1+2"));

        let synced = sync_url(&url, &[window("143_5", &[])]);
        assert_eq!(synced.query(), Some("debug&q=a%20b&x=1+2&wi_0=143_5"));
    }

    #[test]
    fn path_like_ids_are_refused() {
        assert!(decode("wi_0=..%2F..%2Fadmin%2Fusers_1").is_empty());
        assert!(decode("wi_0=..").is_empty());

        let got = decode("wi_0=143_1&ti_0=lines&ri_0=a%5Cb");
        assert_eq!(got[0].tab_id.as_deref(), Some("lines"));
        assert!(got[0].record_id.is_none());
        assert!(!got[0].is_valid());
    }
}
