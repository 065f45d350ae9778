use std::sync::Arc;

use tabsession::address::MemoryAddressBar;
use tabsession::cleaner;
use tabsession::codec::{self, RecoveryDescriptor};
use tabsession::identifier::window_id_from_identifier;
use tabsession::state::{FormState, SessionState, TabState, WindowState};

fn tab(level: u32, record: &str) -> Arc<TabState> {
    Arc::new(TabState {
        level,
        selected_record: Some(record.to_string()),
        form: FormState::edit(record),
        ..Default::default()
    })
}

#[test]
fn deepest_open_form_is_encoded() {
    let mut w = WindowState::new("143_1000");
    w.tabs.insert("t1".into(), tab(0, "A"));
    w.tabs.insert("t2".into(), tab(1, "B"));

    assert_eq!(codec::encode(&[Arc::new(w)]), "wi_0=143_1000&ti_0=t2&ri_0=B");
}

#[test]
fn encoded_windows_decode_back_in_order() {
    let mut sales = WindowState::new("143_1000");
    sales.tabs.insert("lines".into(), tab(1, "L-7"));
    let invoice = WindowState::new("144_2000");
    let windows = vec![Arc::new(sales), Arc::new(invoice)];

    let decoded = codec::decode(&codec::encode(&windows));
    assert_eq!(
        decoded,
        vec![
            RecoveryDescriptor::new(0, "143_1000", Some("lines".into()), Some("L-7".into())),
            RecoveryDescriptor::new(1, "144_2000", None, None),
        ]
    );
    assert!(decoded[0].has_recovery_data);
    assert_eq!(decoded[1].window_id(), "144");
}

#[test]
fn tab_without_record_is_repaired_in_place() {
    let mut bar = MemoryAddressBar::parse("https://erp.example/app?wi_0=143_1&ti_0=t1").unwrap();
    let d = codec::decode_url(bar.url());
    assert_eq!(d.len(), 1);
    assert!(!d[0].has_recovery_data);
    assert!(!codec::is_valid(&d[0]));

    assert_eq!(cleaner::clean_invalid_parameters(&mut bar), vec![0]);
    assert_eq!(bar.url().query(), Some("wi_0=143_1"));
}

#[test]
fn decoding_tolerates_noise_and_sorts_by_index() {
    let d = codec::decode("?wi_2=9_3&lang=en&wi_0=7_1&ti_x=1&ri_1=dangling&wi_0=8_2");
    let ids: Vec<&str> = d.iter().map(|d| d.window_identifier.as_str()).collect();
    assert_eq!(ids, vec!["7_1", "9_3"]);
    assert_eq!(d[1].index, 2);
}

#[test]
fn sync_keeps_foreign_params_and_round_trips_state() {
    let base = url::Url::parse("https://erp.example/app?lang=en&wi_0=old_1").unwrap();
    let mut w = WindowState::new("143_5");
    w.tabs.insert("header".into(), tab(0, "H"));
    let state = SessionState::new(vec![w]);

    let synced = codec::sync_url(&base, &state.windows);
    assert_eq!(synced.query(), Some("lang=en&wi_0=143_5&ti_0=header&ri_0=H"));
    assert_eq!(codec::sync_url(&synced, &state.windows), synced);
}

#[test]
fn window_ids_come_from_the_identifier_prefix() {
    assert_eq!(window_id_from_identifier("144_9999"), "144");
    assert_eq!(window_id_from_identifier("144"), "144");
    assert_eq!(window_id_from_identifier("_9999"), "");
}
