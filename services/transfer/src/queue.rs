//! Bounded-parallelism task queue.
//!
//! Every upload and download is submitted here. At most `max_concurrent`
//! tasks run at once. Tasks are admitted in submission order whenever a slot
//! frees, and may complete in any order. A task's failure never touches its
//! siblings, and there is no cancellation: once admitted, a task runs to
//! completion.

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::trace;

/// Errors surfaced through a [`TaskHandle`]
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("Task panicked before producing a result")]
    TaskPanicked,
}

/// A queued task; it receives its running slot when admitted
type Job = Box<dyn FnOnce(SlotGuard) -> BoxFuture<'static, ()> + Send>;

struct QueueState {
    running: usize,
    pending: VecDeque<Job>,
}

struct Inner {
    max_concurrent: usize,
    state: Mutex<QueueState>,
}

/// Concurrency-bounded task queue
#[derive(Clone)]
pub struct ConcurrencyQueue {
    inner: Arc<Inner>,
}

impl ConcurrencyQueue {
    /// Create a queue admitting at most `max_concurrent` tasks (minimum 1)
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                max_concurrent: max_concurrent.max(1),
                state: Mutex::new(QueueState {
                    running: 0,
                    pending: VecDeque::new(),
                }),
            }),
        }
    }

    /// Submit a task. It is enqueued immediately, whether or not the returned
    /// handle is ever awaited; dropping the handle does not cancel the task.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime, like `tokio::spawn`.
    pub fn submit<F, T>(&self, task: F) -> TaskHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let runtime = Handle::current();
        let (tx, rx) = oneshot::channel();

        let job: Job = Box::new(move |slot| {
            Box::pin(async move {
                let output = task.await;
                // Free the slot first so the caller never observes a stale running count.
                drop(slot);
                // The receiver may be gone; the task still ran to completion.
                let _ = tx.send(output);
            })
        });

        self.inner.state.lock().pending.push_back(job);
        Inner::process_next(&self.inner, &runtime);

        TaskHandle { rx }
    }

    /// Tasks waiting for a slot
    pub fn queue_length(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    /// Tasks currently running
    pub fn running_count(&self) -> usize {
        self.inner.state.lock().running
    }

    pub fn max_concurrent(&self) -> usize {
        self.inner.max_concurrent
    }
}

impl Inner {
    /// Admit pending jobs while slots are free
    fn process_next(self: &Arc<Self>, runtime: &Handle) {
        loop {
            let job = {
                let mut state = self.state.lock();
                if state.running >= self.max_concurrent {
                    return;
                }
                match state.pending.pop_front() {
                    Some(job) => {
                        state.running += 1;
                        trace!(
                            running = state.running,
                            pending = state.pending.len(),
                            "Admitting queued task"
                        );
                        job
                    }
                    None => return,
                }
            };

            let slot = SlotGuard {
                inner: Arc::clone(self),
                runtime: runtime.clone(),
            };
            runtime.spawn(job(slot));
        }
    }
}

/// Releases a running slot when the task finishes, including by panic
struct SlotGuard {
    inner: Arc<Inner>,
    runtime: Handle,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.inner.state.lock().running -= 1;
        Inner::process_next(&self.inner, &self.runtime);
    }
}

/// Resolves exactly once with the submitted task's output
pub struct TaskHandle<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, QueueError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.map_err(|_| QueueError::TaskPanicked))
    }
}
