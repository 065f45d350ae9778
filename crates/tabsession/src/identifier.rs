//! Window instance identifiers: `"{windowTypeId}_{creationTimestampMillis}"`.

use std::sync::atomic::{AtomicI64, Ordering};

/// Window type id of an instance identifier: everything before the first `_`.
pub fn window_id_from_identifier(identifier: &str) -> &str {
    identifier
        .split_once('_')
        .map(|(id, _)| id)
        .unwrap_or(identifier)
}

/// Split an identifier into its window type and creation timestamp.
pub fn parse_identifier(identifier: &str) -> (&str, Option<i64>) {
    match identifier.split_once('_') {
        Some((id, ts)) => (id, ts.parse().ok()),
        None => (identifier, None),
    }
}

/// Issues instance identifiers with a strictly increasing timestamp part, so
/// two windows of the same type opened in the same millisecond never collide.
#[derive(Debug, Default)]
pub struct IdentifierClock {
    last: AtomicI64,
}

impl IdentifierClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self, window_id: &str) -> String {
        let stamp = self.next_stamp(chrono::Utc::now().timestamp_millis());
        format!("{window_id}_{stamp}")
    }

    fn next_stamp(&self, now: i64) -> i64 {
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(prev + 1);
            match self
                .last
                .compare_exchange_weak(prev, candidate, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return candidate,
                Err(actual) => prev = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use super::*;

    #[test]
    fn window_id_is_prefix_before_first_underscore() {
        assert_eq!(window_id_from_identifier("144_9999"), "144");
        assert_eq!(window_id_from_identifier("144"), "144");
        assert_eq!(window_id_from_identifier("_9999"), "");
        assert_eq!(window_id_from_identifier("144_1_2"), "144");
    }

    #[test]
    fn parse_identifier_splits_timestamp() {
        assert_eq!(parse_identifier("143_1000"), ("143", Some(1000)));
        assert_eq!(parse_identifier("143_x"), ("143", None));
        assert_eq!(parse_identifier("143"), ("143", None));
    }

    #[test]
    fn stamps_never_repeat_within_same_millisecond() {
        let clock = IdentifierClock::new();
        assert_eq!(clock.next_stamp(1000), 1000);
        assert_eq!(clock.next_stamp(1000), 1001);
        assert_eq!(clock.next_stamp(999), 1002);
        assert_eq!(clock.next_stamp(5000), 5000);
    }

    #[test]
    fn concurrent_identifiers_are_unique() {
        let clock = Arc::new(IdentifierClock::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let clock = Arc::clone(&clock);
                std::thread::spawn(move || (0..50).map(|_| clock.next("143")).collect::<Vec<_>>())
            })
            .collect();
        let mut all = BTreeSet::new();
        for h in handles {
            for id in h.join().unwrap() {
                assert!(id.starts_with("143_"));
                assert!(all.insert(id));
            }
        }
        assert_eq!(all.len(), 200);
    }
}
