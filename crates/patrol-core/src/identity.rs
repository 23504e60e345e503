//! Sandbox identity derivation.
//!
//! Every check owns exactly one sandbox name. A run always reclaims whatever
//! sandbox currently holds that name before creating its own, so the name is
//! the only mutual exclusion between runs of the same check.

/// Prefix shared by every sandbox Patrol creates.
pub const SANDBOX_PREFIX: &str = "patrol_";

/// Derive the sandbox name for a `(service, check)` pair.
///
/// Lowercases the input and replaces every character that is not an ASCII
/// letter or digit with `_`.
pub fn sandbox_identity(service: &str, check: &str) -> String {
    let raw = format!("{service}_{check}");
    let mut out = String::with_capacity(SANDBOX_PREFIX.len() + raw.len());
    out.push_str(SANDBOX_PREFIX);
    out.extend(raw.chars().map(|c| {
        if c.is_ascii_alphanumeric() {
            c.to_ascii_lowercase()
        } else {
            '_'
        }
    }));
    out
}
