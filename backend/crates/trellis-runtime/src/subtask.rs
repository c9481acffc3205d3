//! Pending continuations inside the tenant runtime.
//!
//! Every outstanding host interaction (database query, fetch, timer) is a
//! subtask keyed by a 31-bit identifier that is randomly seeded at runtime
//! start, strictly monotonic thereafter, and never reused. Promise-backed
//! subtasks have exactly one terminal transition; callback subtasks (timers)
//! survive resumption so intervals can re-fire.

use crate::context::Context;
use crate::error::TaskError;
use serde_json::Value as JsonValue;
use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context as PollContext, Poll};

/// Shared completion state of a promise-backed subtask.
#[derive(Debug, Default)]
pub(crate) struct PromiseState {
    pub outcome: Option<Result<JsonValue, TaskError>>,
    /// Advisory ids for tenant-side logging. Untrusted: tenant code holding
    /// the future may read them but they carry no authority.
    pub advisory_subtask_id: u32,
    pub advisory_request_id: u32,
}

pub(crate) type SharedPromise = Rc<RefCell<PromiseState>>;
pub(crate) type SubtaskCallback = Rc<RefCell<Box<dyn FnMut(JsonValue)>>>;

pub(crate) enum SubtaskKind {
    Promise(SharedPromise),
    Callback(SubtaskCallback),
}

pub(crate) struct Subtask {
    pub kind: SubtaskKind,
    pub context: Context,
}

impl Subtask {
    pub fn is_promise(&self) -> bool {
        matches!(self.kind, SubtaskKind::Promise(_))
    }
}

/// Registry of outstanding subtasks, reverse-indexable by request id through
/// each entry's context.
pub(crate) struct SubtaskRegistry {
    entries: HashMap<u32, Subtask>,
    next_id: u32,
}

impl SubtaskRegistry {
    pub fn new(seed: u32) -> Self {
        // Keep the seed in the lower 30 bits so the strictly monotonic counter
        // has headroom below 2^31 for the lifetime of the runtime.
        let next_id = (seed & 0x3fff_ffff) | 1;
        SubtaskRegistry {
            entries: HashMap::new(),
            next_id,
        }
    }

    fn alloc(&mut self) -> u32 {
        let id = self.next_id;
        debug_assert!(id < 1 << 31, "subtask id space exhausted");
        self.next_id += 1;
        id
    }

    pub fn insert_promise(&mut self, context: Context) -> (u32, SharedPromise) {
        let id = self.alloc();
        let state = Rc::new(RefCell::new(PromiseState {
            outcome: None,
            advisory_subtask_id: id,
            advisory_request_id: context.id(),
        }));
        self.entries.insert(
            id,
            Subtask {
                kind: SubtaskKind::Promise(state.clone()),
                context,
            },
        );
        (id, state)
    }

    pub fn insert_callback(&mut self, context: Context, callback: Box<dyn FnMut(JsonValue)>) -> u32 {
        let id = self.alloc();
        self.entries.insert(
            id,
            Subtask {
                kind: SubtaskKind::Callback(Rc::new(RefCell::new(callback))),
                context,
            },
        );
        id
    }

    pub fn get(&self, id: u32) -> Option<&Subtask> {
        self.entries.get(&id)
    }

    pub fn remove(&mut self, id: u32) -> Option<Subtask> {
        self.entries.remove(&id)
    }

    /// Put an entry back under its original id after a speculative removal.
    pub fn entries_reinsert(&mut self, id: u32, subtask: Subtask) {
        self.entries.insert(id, subtask);
    }

    pub fn contains(&self, id: u32) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Ids of all promise-backed subtasks belonging to `request_id`.
    pub fn promise_ids_of_request(&self, request_id: u32) -> Vec<u32> {
        let mut ids: Vec<u32> = self
            .entries
            .iter()
            .filter(|(_, s)| s.is_promise() && s.context.id() == request_id)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }
}

/// Future side of a promise-backed subtask. Resolves when the host resumes
/// the subtask or the owning request is cancelled.
pub struct SubtaskFuture {
    state: SharedPromise,
}

impl SubtaskFuture {
    pub(crate) fn new(state: SharedPromise) -> Self {
        SubtaskFuture { state }
    }

    /// Advisory subtask id for logging; carries no authority.
    pub fn untrusted_subtask_id(&self) -> u32 {
        self.state.borrow().advisory_subtask_id
    }

    /// Advisory request id for logging; carries no authority.
    pub fn untrusted_request_id(&self) -> u32 {
        self.state.borrow().advisory_request_id
    }
}

impl Future for SubtaskFuture {
    type Output = Result<JsonValue, TaskError>;

    fn poll(self: Pin<&mut Self>, _cx: &mut PollContext<'_>) -> Poll<Self::Output> {
        match self.state.borrow_mut().outcome.take() {
            Some(outcome) => Poll::Ready(outcome),
            None => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;

    fn context(id: u32) -> Context {
        Context::detached_for_tests(id)
    }

    #[test]
    fn test_ids_monotonic_and_unique() {
        let mut registry = SubtaskRegistry::new(0x1234_5678);
        let mut seen = Vec::new();
        for i in 0..32 {
            let (id, _) = registry.insert_promise(context(i));
            assert!(id < 1 << 31);
            if let Some(last) = seen.last() {
                assert!(id > *last);
            }
            seen.push(id);
        }
        // Removal never recycles an id.
        let removed = seen[0];
        registry.remove(removed);
        let (fresh, _) = registry.insert_promise(context(99));
        assert!(fresh > *seen.last().unwrap());
        assert!(!seen.contains(&fresh));
    }

    #[test]
    fn test_reverse_index_by_request() {
        let mut registry = SubtaskRegistry::new(1);
        let (a, _) = registry.insert_promise(context(5));
        let (b, _) = registry.insert_promise(context(5));
        let (_c, _) = registry.insert_promise(context(6));
        let timer = registry.insert_callback(context(5), Box::new(|_| {}));

        let ids = registry.promise_ids_of_request(5);
        assert_eq!(ids, vec![a, b]);
        assert!(!ids.contains(&timer));
    }
}
