// Bookkeeping for deferred (two-phase) task removal

use crate::task::TaskId;
use std::collections::HashMap;
use std::time::Instant;

/// Handle for one pending removal
///
/// Only the most recently issued token for a task is honoured. Marking the
/// same task again makes earlier tokens stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RemovalToken {
    id: TaskId,
    seq: u64,
}

impl RemovalToken {
    pub fn task_id(&self) -> TaskId {
        self.id
    }
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    seq: u64,
    deadline: Instant,
}

/// Tasks currently marked for removal, keyed per task
#[derive(Debug, Default)]
pub struct PendingRemovals {
    entries: HashMap<TaskId, Pending>,
    next_seq: u64,
}

impl PendingRemovals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `id` as pending until `deadline`, superseding any earlier token
    pub fn mark(&mut self, id: TaskId, deadline: Instant) -> RemovalToken {
        self.next_seq += 1;
        let seq = self.next_seq;
        self.entries.insert(id, Pending { seq, deadline });
        RemovalToken { id, seq }
    }

    /// Whether `token` is the live token for its task
    pub fn is_current(&self, token: &RemovalToken) -> bool {
        self.entries.get(&token.id).is_some_and(|p| p.seq == token.seq)
    }

    /// Consume a live token. Stale tokens leave the entry alone.
    pub fn take(&mut self, token: &RemovalToken) -> bool {
        if self.is_current(token) {
            self.entries.remove(&token.id);
            true
        } else {
            false
        }
    }

    /// Drop whatever is pending for `id`, regardless of token
    pub fn forget(&mut self, id: TaskId) -> bool {
        self.entries.remove(&id).is_some()
    }

    /// Live tokens whose deadline is at or before `now`, oldest deadline first
    pub fn due(&self, now: Instant) -> Vec<RemovalToken> {
        let mut due: Vec<(Instant, RemovalToken)> = self
            .entries
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(id, p)| (p.deadline, RemovalToken { id: *id, seq: p.seq }))
            .collect();
        due.sort_by_key(|(deadline, token)| (*deadline, token.seq));
        due.into_iter().map(|(_, token)| token).collect()
    }

    /// Earliest pending deadline, if any
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.values().map(|p| p.deadline).min()
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.entries.contains_key(&id)
    }
}
