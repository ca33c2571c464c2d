//! The crawl frontier: a FIFO task queue with a visited set and an
//! in-flight counter. Push canonicalises, scope-checks and de-duplicates
//! atomically, so each `(method, url)` key is fetched at most once.

use crate::model::Task;
use crate::scope::{ScopeFilter, dedup_key};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::Mutex;
use url::Url;

#[derive(Debug, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    Duplicate,
    OutOfScope,
    Invalid,
}

#[derive(Debug)]
pub enum PopOutcome {
    Task(Task),
    /// Queue is empty but work is still in flight; poll again shortly.
    Wait,
    /// Queue is empty and nothing is in flight: the crawl is done.
    Drained,
}

#[derive(Debug, Default)]
struct FrontierState {
    queue: VecDeque<Task>,
    visited: HashSet<(String, String)>,
    in_flight: usize,
    deduped: u64,
}

pub struct Frontier {
    scope: Arc<ScopeFilter>,
    state: Mutex<FrontierState>,
}

impl Frontier {
    pub fn new(scope: Arc<ScopeFilter>) -> Self {
        Self {
            scope,
            state: Mutex::new(FrontierState::default()),
        }
    }

    /// Canonicalises the task URL, checks scope and the visited set, and
    /// enqueues when new. Idempotent: concurrent pushes of the same key
    /// yield exactly one enqueue.
    pub fn push(&self, mut task: Task) -> PushOutcome {
        let canonical = match self.scope.canonicalize(&task.url) {
            Ok(url) => url,
            Err(_) => return PushOutcome::Invalid,
        };
        if !self.scope.in_scope(&canonical) {
            return PushOutcome::OutOfScope;
        }
        task.url = canonical.to_string();
        let key = (task.method.clone(), dedup_key(&canonical));

        let mut state = self.state.lock().unwrap();
        if !state.visited.insert(key) {
            state.deduped += 1;
            return PushOutcome::Duplicate;
        }
        state.queue.push_back(task);
        PushOutcome::Queued
    }

    /// Marks a canonical URL as visited without queueing it. Used for the
    /// GET fallback after a HEAD probe, which re-fetches the same URL with
    /// a different method.
    pub fn mark_visited(&self, method: &str, url: &Url) -> bool {
        let key = (method.to_string(), dedup_key(url));
        self.state.lock().unwrap().visited.insert(key)
    }

    pub fn pop(&self) -> PopOutcome {
        let mut state = self.state.lock().unwrap();
        match state.queue.pop_front() {
            Some(task) => {
                state.in_flight += 1;
                PopOutcome::Task(task)
            }
            None if state.in_flight > 0 => PopOutcome::Wait,
            None => PopOutcome::Drained,
        }
    }

    /// Called once per popped task after its extraction finished.
    pub fn task_done(&self) {
        let mut state = self.state.lock().unwrap();
        debug_assert!(state.in_flight > 0);
        state.in_flight = state.in_flight.saturating_sub(1);
    }

    pub fn deduped(&self) -> u64 {
        self.state.lock().unwrap().deduped
    }

    pub fn visited_count(&self) -> usize {
        self.state.lock().unwrap().visited.len()
    }
}
