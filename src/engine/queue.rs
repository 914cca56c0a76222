//! Serial work queue owning the engine thread.

use crate::error::{BridgeError, Result};
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{JoinHandle, ThreadId};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// A unit of work for the queue thread
pub type QueueWork = Box<dyn FnOnce() + Send + 'static>;

/// A host-provided serial queue running work on one thread
pub trait MessageQueueThread: Send + Sync {
    /// Enqueue `work`; it runs after everything enqueued before it
    fn run_on_queue(&self, work: QueueWork);

    /// Whether the caller is on the queue's thread
    fn is_on_thread(&self) -> bool;

    /// Stop accepting work and wait for the thread to exit
    fn quit_synchronous(&self);
}

/// Run `work` on the queue and wait for its result.
///
/// Runs inline when already on the queue thread. Must not be called from
/// inside an async runtime.
pub fn run_on_queue_sync<R, F>(queue: &dyn MessageQueueThread, work: F) -> Result<R>
where
    R: Send + 'static,
    F: FnOnce() -> R + Send + 'static,
{
    if queue.is_on_thread() {
        return Ok(work());
    }

    let (tx, rx) = oneshot::channel();
    queue.run_on_queue(Box::new(move || {
        let _ = tx.send(work());
    }));

    rx.blocking_recv()
        .map_err(|_| BridgeError::Queue("Engine queue dropped the work item".into()))
}

/// A named OS thread draining a channel of work items.
///
/// A panicking work item is logged and the thread keeps running.
pub struct QueueThread {
    name: String,
    sender: Mutex<Option<mpsc::UnboundedSender<QueueWork>>>,
    thread_id: ThreadId,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl QueueThread {
    /// Spawn the thread
    pub fn spawn(name: impl Into<String>) -> Result<Arc<Self>> {
        let name = name.into();
        let (sender, mut receiver) = mpsc::unbounded_channel::<QueueWork>();

        let thread_name = name.clone();
        let join = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                debug!(queue = %thread_name, "Queue thread started");
                while let Some(work) = receiver.blocking_recv() {
                    if let Err(panic) = catch_unwind(AssertUnwindSafe(work)) {
                        let reason = panic
                            .downcast_ref::<&str>()
                            .map(|s| s.to_string())
                            .or_else(|| panic.downcast_ref::<String>().cloned())
                            .unwrap_or_else(|| "unknown panic".to_string());
                        error!(queue = %thread_name, reason = %reason, "Work item panicked");
                    }
                }
                debug!(queue = %thread_name, "Queue thread exiting");
            })?;

        info!(queue = %name, "Spawned queue thread");

        Ok(Arc::new(Self {
            name,
            sender: Mutex::new(Some(sender)),
            thread_id: join.thread().id(),
            join: Mutex::new(Some(join)),
        }))
    }

    /// Thread name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the queue still accepts work
    pub fn is_running(&self) -> bool {
        self.sender.lock().is_some()
    }
}

impl MessageQueueThread for QueueThread {
    fn run_on_queue(&self, work: QueueWork) {
        match self.sender.lock().as_ref() {
            Some(sender) => {
                if sender.send(work).is_err() {
                    warn!(queue = %self.name, "Queue thread is gone, dropping work");
                }
            }
            None => warn!(queue = %self.name, "Queue has quit, dropping work"),
        }
    }

    fn is_on_thread(&self) -> bool {
        std::thread::current().id() == self.thread_id
    }

    fn quit_synchronous(&self) {
        self.sender.lock().take();

        if self.is_on_thread() {
            return;
        }
        if let Some(join) = self.join.lock().take() {
            if join.join().is_err() {
                error!(queue = %self.name, "Queue thread panicked");
            }
        }
    }
}

impl Drop for QueueThread {
    fn drop(&mut self) {
        self.quit_synchronous();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_runs_in_order_on_queue_thread() {
        let queue = QueueThread::spawn("test-queue").unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..10 {
            let seen = seen.clone();
            queue.run_on_queue(Box::new(move || seen.lock().push(i)));
        }

        let name = run_on_queue_sync(&*queue, || {
            std::thread::current().name().map(str::to_string)
        })
        .unwrap();

        assert_eq!(name.as_deref(), Some("test-queue"));
        assert_eq!(*seen.lock(), (0..10).collect::<Vec<_>>());
        assert!(!queue.is_on_thread());
    }

    #[test]
    fn test_sync_call_inline_on_queue_thread() {
        let queue = QueueThread::spawn("inline-queue").unwrap();
        let inner = queue.clone();
        let nested = run_on_queue_sync(&*queue, move || {
            // Would deadlock if it went through the channel.
            run_on_queue_sync(&*inner, || 41).map(|n| n + 1)
        })
        .unwrap()
        .unwrap();
        assert_eq!(nested, 42);
    }

    #[test]
    fn test_panicking_work_is_contained() {
        let queue = QueueThread::spawn("panic-queue").unwrap();
        let err = run_on_queue_sync(&*queue, || -> u32 { panic!("boom") }).unwrap_err();
        assert!(matches!(err, BridgeError::Queue(_)));

        // The thread survives.
        assert_eq!(run_on_queue_sync(&*queue, || 7).unwrap(), 7);
    }

    #[test]
    fn test_quit_drops_later_work() {
        let queue = QueueThread::spawn("quit-queue").unwrap();
        let ran = Arc::new(AtomicUsize::new(0));
        queue.quit_synchronous();
        assert!(!queue.is_running());

        let counter = ran.clone();
        let result = run_on_queue_sync(&*queue, move || counter.fetch_add(1, Ordering::SeqCst));
        assert!(result.is_err());
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }
}
