//! Suite-body task queue
//!
//! Registration enqueues suite bodies here; they run one at a time, in FIFO
//! order, so sibling suite bodies never interleave their tree mutations even
//! when a body awaits. This is what lets test-authoring code await inside a
//! suite body (e.g. to register tests from an async fixture) while keeping
//! sibling declaration order deterministic.

use futures::future::BoxFuture;
use std::collections::VecDeque;

use crate::model::JobId;
use crate::runner::TestRunner;

/// A suite body: receives a handle to the runner so nested registrations
/// land on the suite that is open while the body runs.
pub type BodyFn =
    Box<dyn FnOnce(TestRunner) -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// A suite body waiting to run.
pub struct QueuedBody {
    pub suite: JobId,
    pub body: BodyFn,
}

/// FIFO queue of pending suite bodies.
#[derive(Default)]
pub struct BodyQueue {
    pending: VecDeque<QueuedBody>,
}

impl BodyQueue {
    pub fn push(&mut self, suite: JobId, body: BodyFn) {
        self.pending.push_back(QueuedBody { suite, body });
    }

    pub fn pop(&mut self) -> Option<QueuedBody> {
        self.pending.pop_front()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl std::fmt::Debug for BodyQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BodyQueue")
            .field("pending", &self.pending.len())
            .finish()
    }
}
