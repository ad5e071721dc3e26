//! Sibling ordering under a lock root
//!
//! The node with the smallest sequence number holds the lock. Every other
//! node waits on its immediate predecessor: the sibling with the greatest
//! sequence number strictly below its own.

use turnstile_common::parse_sequence;

/// Where a node stands in the queue
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Position {
    Holder,
    Waiting {
        /// Name of the immediate predecessor
        predecessor: String,
        /// Number of nodes ahead in the queue
        ahead: usize,
    },
    /// The node is not among the siblings
    Missing,
}

/// Sequence-ordered siblings. Names without a sequence suffix are skipped.
pub fn sorted_siblings(children: &[String]) -> Vec<(u64, String)> {
    let mut siblings: Vec<(u64, String)> = children
        .iter()
        .filter_map(|name| parse_sequence(name).map(|seq| (seq, name.clone())))
        .collect();
    siblings.sort();
    siblings
}

pub fn position_of(siblings: &[(u64, String)], own_name: &str) -> Position {
    let Some(idx) = siblings.iter().position(|(_, name)| name == own_name) else {
        return Position::Missing;
    };
    let own_seq = siblings[idx].0;
    let ahead = siblings[..idx].iter().filter(|(seq, _)| *seq < own_seq).count();

    match siblings[..idx].iter().rev().find(|(seq, _)| *seq < own_seq) {
        Some((_, predecessor)) => Position::Waiting {
            predecessor: predecessor.clone(),
            ahead,
        },
        None => Position::Holder,
    }
}

/// Name of the current holder, if any.
pub fn holder(siblings: &[(u64, String)]) -> Option<&str> {
    siblings.first().map(|(_, name)| name.as_str())
}
