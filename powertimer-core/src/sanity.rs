//! Overlap detection between pending timers.

use serde::Serialize;

use crate::entry::TimerEntry;
use crate::types::TimerId;

/// The part of an entry the sanity check looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimerSpan {
    pub id: TimerId,
    pub begin: i64,
    pub end: i64,
    pub disabled: bool,
}

impl TimerSpan {
    /// Half-open `[begin, end)` intersection.
    pub fn overlaps(&self, other: &TimerSpan) -> bool {
        self.begin < other.end && other.begin < self.end
    }
}

/// Outcome of a sanity check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SanityReport {
    /// The candidate first, then every entry overlapping it in
    /// `(begin, end)` order.
    pub simultaneous: Vec<TimerSpan>,
}

impl SanityReport {
    pub fn is_ok(&self) -> bool {
        self.simultaneous.len() <= 1
    }

    /// Earliest entry overlapping the candidate.
    pub fn first_conflict(&self) -> Option<&TimerSpan> {
        self.simultaneous.get(1)
    }

    pub fn conflicts(&self) -> &[TimerSpan] {
        self.simultaneous.get(1..).unwrap_or(&[])
    }

    /// Candidate and conflicting ids.
    pub fn ids(&self) -> Vec<TimerId> {
        self.simultaneous.iter().map(|s| s.id).collect()
    }
}

/// Find the enabled, unfinished entries in `pending` that overlap `candidate`.
///
/// An entry with the candidate's id is ignored, and a disabled candidate
/// never conflicts. Nothing is modified.
pub fn check(candidate: &TimerSpan, pending: &[TimerEntry]) -> SanityReport {
    let mut simultaneous = vec![*candidate];
    if candidate.disabled {
        return SanityReport { simultaneous };
    }

    let mut conflicts: Vec<TimerSpan> = pending
        .iter()
        .filter(|e| e.id() != candidate.id && !e.is_disabled() && !e.state().is_terminal())
        .map(TimerEntry::span)
        .filter(|span| span.overlaps(candidate))
        .collect();
    conflicts.sort_by_key(|s| (s.begin, s.end, s.id));
    simultaneous.extend(conflicts);

    SanityReport { simultaneous }
}
