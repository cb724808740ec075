//! Thread-lifecycle plumbing shared by the engine's sender and receiver
//! tasks: a named OS thread, a stop flag both sides can observe, and a
//! cloneable channel handle for enqueueing work.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use log::info;

/// A cooperative stop flag shared between an engine and the tasks it spawned.
///
/// Starts `true` (running); `stop()` flips it to `false` and every task
/// observes that on its own schedule (the sender wakes on its next dequeue,
/// the receiver on its next 1-second socket-read timeout).
#[derive(Debug, Clone)]
pub(crate) struct AbortSignal {
    running: Arc<AtomicBool>,
}

impl AbortSignal {
    pub(crate) fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Cloneable sender half of an unbounded task queue.
pub(crate) struct TaskTx<T> {
    inner: flume::Sender<T>,
}

impl<T> TaskTx<T> {
    pub(crate) fn send(&self, task: T) {
        // The only receiver is the worker thread this channel was created
        // for; a send failure means that thread already exited, which can
        // only happen after `stop()`, so dropping the task is correct.
        let _ignore = self.inner.send(task);
    }
}

impl<T> Clone for TaskTx<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Spawns `name` as a named OS thread running `body`, which receives its
/// own [`AbortSignal`] to poll for shutdown.
pub(crate) fn spawn_named<F>(name: &str, abort: AbortSignal, body: F) -> std::thread::JoinHandle<()>
where
    F: FnOnce(AbortSignal) + Send + 'static,
{
    let name = name.to_owned();
    let thread_name = name.clone();
    std::thread::Builder::new()
        .name(name)
        .spawn(move || {
            info!("worker {thread_name} running");
            body(abort);
            info!("worker {thread_name} exited");
        })
        .expect("failed to spawn worker thread")
}

/// Creates an unbounded task queue, returning the cloneable sender and the
/// raw `flume` receiver for the worker thread to consume.
pub(crate) fn task_channel<T>() -> (TaskTx<T>, flume::Receiver<T>) {
    let (tx, rx) = flume::unbounded();
    (TaskTx { inner: tx }, rx)
}
