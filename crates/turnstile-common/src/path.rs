//! Lock path helpers
//!
//! Every lock key owns a child root `<base>/<key>`; contenders create
//! `<base>/<key>/lock-<seq>` nodes whose zero-padded suffix is assigned by the
//! coordination service.

use crate::error::TurnstileError;
use crate::{NODE_PREFIX, SEQUENCE_WIDTH};

/// Check that a lock key is usable as a single path segment.
///
/// Keys are opaque: anything non-empty is accepted except `/`, control
/// characters and the relative segments `.` and `..`.
///
/// # Examples
///
/// ```
/// use turnstile_common::is_valid_lock_key;
///
/// assert!(is_valid_lock_key("orders"));
/// assert!(is_valid_lock_key("tenant-1:invoice.pdf"));
/// assert!(is_valid_lock_key("order 42"));
/// assert!(is_valid_lock_key("user@example.com"));
/// assert!(is_valid_lock_key("订单"));
/// assert!(!is_valid_lock_key(""));
/// assert!(!is_valid_lock_key("a/b"));
/// assert!(!is_valid_lock_key(".."));
/// assert!(!is_valid_lock_key("line\nbreak"));
/// ```
pub fn is_valid_lock_key(key: &str) -> bool {
    !key.is_empty()
        && key != "."
        && key != ".."
        && !key.contains('/')
        && !key.chars().any(char::is_control)
}

/// Build the lock root for `key` under `base` (e.g. `/locks` + `orders` -> `/locks/orders`).
pub fn lock_root(base: &str, key: &str) -> Result<String, TurnstileError> {
    if !is_valid_lock_key(key) {
        return Err(TurnstileError::IllegalArgument(format!(
            "invalid lock key '{}'",
            key
        )));
    }
    Ok(join(base, key))
}

/// Path prefix handed to the coordination service for sequential creation.
pub fn node_prefix(root: &str) -> String {
    join(root, NODE_PREFIX)
}

/// Append a zero-padded sequence suffix to a prefix, the way the service names
/// sequential nodes.
pub fn sequential_name(prefix: &str, sequence: u64) -> String {
    format!("{}{:0width$}", prefix, sequence, width = SEQUENCE_WIDTH)
}

/// Parse the sequence suffix of a node name or full node path.
///
/// The whole trailing digit run is the sequence, so counters that outgrow
/// the padding still parse. Returns `None` when the last segment ends in
/// fewer than `SEQUENCE_WIDTH` digits or the value overflows.
pub fn parse_sequence(name_or_path: &str) -> Option<u64> {
    let name = node_name(name_or_path);
    let digits = name
        .bytes()
        .rev()
        .take_while(|b| b.is_ascii_digit())
        .count();
    if digits < SEQUENCE_WIDTH {
        return None;
    }
    name[name.len() - digits..].parse().ok()
}

/// Join a parent path and a child name.
pub fn join(parent: &str, child: &str) -> String {
    if parent.ends_with('/') {
        format!("{}{}", parent, child)
    } else {
        format!("{}/{}", parent, child)
    }
}

/// Last segment of a path.
pub fn node_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Parent of a path (`/` for top-level nodes).
pub fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(idx) => &path[..idx],
        None => "/",
    }
}
