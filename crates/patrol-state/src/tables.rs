//! redb table definitions for the Patrol result store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized
//! `CheckResult`s). Key components are joined with [`KEY_SEP`].

use redb::TableDefinition;

/// ASCII unit separator. Cannot appear in a sensible service or check name,
/// so `a/b` + `c` never shares a prefix with `a` + `b/c`.
pub const KEY_SEP: char = '\u{1f}';

/// Status results keyed by `{service}␟{check}␟{day:02}`. Upserted.
pub const STATUS_RESULTS: TableDefinition<&str, &[u8]> = TableDefinition::new("status_results");

/// Metric results keyed by `{service}␟{check}␟{micros:020}␟{seq:010}`. Append-only.
pub const METRIC_RESULTS: TableDefinition<&str, &[u8]> = TableDefinition::new("metric_results");

/// Key prefix shared by every record of one check.
pub fn check_prefix(service: &str, check: &str) -> String {
    format!("{service}{KEY_SEP}{check}{KEY_SEP}")
}

/// Exclusive upper bound of a check's key range: the prefix with its
/// trailing separator bumped to the next code point.
pub fn check_prefix_end(service: &str, check: &str) -> String {
    format!("{service}{KEY_SEP}{check}\u{20}")
}
