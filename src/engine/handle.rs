//! Thread-safe handle to an executor living on its queue thread.
//!
//! The executor itself is created on the queue thread and parked in a
//! thread-local registry. Every handle operation is marshaled onto that
//! thread with [`run_on_queue_sync`] and blocks until it completes.
//! Handle operations must not be called from inside an async runtime.

use super::queue::{run_on_queue_sync, MessageQueueThread, QueueThread};
use super::{JsExecutor, MemoryPressure};
use crate::bundle::BundleRegistry;
use crate::config::ExecutorConfig;
use crate::delegate::ExecutorDelegate;
use crate::error::{JsError, Result};
use crate::metrics::{BridgeMetrics, ExecutorStats};
use crate::value::BridgeValue;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Executors owned by the current thread
#[derive(Default)]
struct ExecutorRegistry(RefCell<HashMap<String, Rc<JsExecutor>>>);

impl Drop for ExecutorRegistry {
    fn drop(&mut self) {
        for (id, executor) in self.0.get_mut().drain() {
            warn!(executor_id = %id, "Destroying executor left behind on its thread");
            if let Err(e) = executor.destroy() {
                error!(executor_id = %id, "Failed to destroy executor: {}", e);
            }
        }
    }
}

thread_local! {
    static EXECUTORS: ExecutorRegistry = ExecutorRegistry::default();
}

fn lookup(id: &str) -> Result<Rc<JsExecutor>> {
    EXECUTORS
        .try_with(|registry| registry.0.borrow().get(id).cloned())
        .ok()
        .flatten()
        .ok_or_else(|| JsError::invalid_state(format!("Executor {} is not on this thread", id)).into())
}

/// Handle to a [`JsExecutor`] running on a [`MessageQueueThread`].
///
/// [`ExecutorHandle::destroy`] must run before the handle is dropped.
pub struct ExecutorHandle {
    id: String,
    queue: Arc<dyn MessageQueueThread>,
    metrics: Arc<BridgeMetrics>,
    destroyed: AtomicBool,
}

impl ExecutorHandle {
    /// Create an executor on `queue`'s thread
    #[instrument(skip(config, delegate, queue), fields(context = %config.context_name))]
    pub fn spawn(
        config: ExecutorConfig,
        delegate: Option<Arc<dyn ExecutorDelegate>>,
        queue: Arc<dyn MessageQueueThread>,
    ) -> Result<Self> {
        let (id, metrics) = run_on_queue_sync(&*queue, move || -> Result<(String, Arc<BridgeMetrics>)> {
            let executor = JsExecutor::new(config, delegate)?;
            let id = executor.id().to_string();
            let metrics = executor.metrics();

            let registered = EXECUTORS.try_with(|registry| {
                registry.0.borrow_mut().insert(id.clone(), Rc::new(executor));
            });
            if registered.is_err() {
                return Err(JsError::invalid_state("Queue thread is shutting down").into());
            }
            Ok((id, metrics))
        })??;

        info!(executor_id = %id, "Spawned executor on queue thread");

        Ok(Self {
            id,
            queue,
            metrics,
            destroyed: AtomicBool::new(false),
        })
    }

    /// Create an executor on a new queue thread named after
    /// `config.queue_thread_name`.
    ///
    /// The thread stops once the returned queue is quit or dropped.
    pub fn spawn_with_queue(
        config: ExecutorConfig,
        delegate: Option<Arc<dyn ExecutorDelegate>>,
    ) -> Result<(Self, Arc<QueueThread>)> {
        config.validate()?;
        let queue = QueueThread::spawn(config.queue_thread_name.clone())?;
        let handle = Self::spawn(config, delegate, queue.clone())?;
        Ok((handle, queue))
    }

    /// Executor id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Metrics recorded by the executor
    pub fn metrics(&self) -> Arc<BridgeMetrics> {
        self.metrics.clone()
    }

    /// Whether `destroy()` has run
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Run `f` against the executor on its thread
    pub fn with_executor<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&JsExecutor) -> Result<R> + Send + 'static,
    {
        if self.is_destroyed() {
            return Err(JsError::invalid_state("The executor has been destroyed").into());
        }

        let id = self.id.clone();
        run_on_queue_sync(&*self.queue, move || {
            let executor = lookup(&id)?;
            f(&executor)
        })?
    }

    /// See [`JsExecutor::load_script`]
    pub fn load_script(&self, source: impl Into<String>, source_url: impl Into<String>) -> Result<()> {
        let source = source.into();
        let source_url = source_url.into();
        self.with_executor(move |executor| executor.load_script(&source, &source_url))
    }

    /// See [`JsExecutor::call_function`]
    pub fn call_function(
        &self,
        module: impl Into<String>,
        method: impl Into<String>,
        args: BridgeValue,
    ) -> Result<()> {
        let module = module.into();
        let method = method.into();
        self.with_executor(move |executor| executor.call_function(&module, &method, &args))
    }

    /// See [`JsExecutor::invoke_callback`]
    pub fn invoke_callback(&self, callback_id: u64, args: BridgeValue) -> Result<()> {
        self.with_executor(move |executor| executor.invoke_callback(callback_id, &args))
    }

    /// See [`JsExecutor::call_function_sync`]
    pub fn call_function_sync(
        &self,
        module: impl Into<String>,
        method: impl Into<String>,
        args: BridgeValue,
    ) -> Result<Option<BridgeValue>> {
        let module = module.into();
        let method = method.into();
        self.with_executor(move |executor| executor.call_function_sync(&module, &method, &args))
    }

    /// See [`JsExecutor::set_global_variable`]
    pub fn set_global_variable(&self, name: impl Into<String>, json: impl Into<String>) -> Result<()> {
        let name = name.into();
        let json = json.into();
        self.with_executor(move |executor| executor.set_global_variable(&name, &json))
    }

    /// See [`JsExecutor::load_module`]
    pub fn load_module(&self, bundle_id: Option<u32>, module_id: u32) -> Result<()> {
        self.with_executor(move |executor| executor.load_module(bundle_id, module_id))
    }

    /// See [`JsExecutor::set_bundle_registry`]
    pub fn set_bundle_registry(&self, registry: Arc<dyn BundleRegistry>) -> Result<()> {
        self.with_executor(move |executor| {
            executor.set_bundle_registry(registry);
            Ok(())
        })
    }

    /// See [`JsExecutor::handle_memory_pressure`]
    pub fn handle_memory_pressure(&self, level: MemoryPressure) -> Result<()> {
        self.with_executor(move |executor| {
            executor.handle_memory_pressure(level);
            Ok(())
        })
    }

    /// See [`JsExecutor::stats`]
    pub fn stats(&self) -> Result<ExecutorStats> {
        self.with_executor(|executor| Ok(executor.stats()))
    }

    /// Tear the executor down on its thread and wait for it. Idempotent.
    #[instrument(skip(self), fields(executor_id = %self.id))]
    pub fn destroy(&self) -> Result<()> {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let id = self.id.clone();
        let result = run_on_queue_sync(&*self.queue, move || {
            let executor = EXECUTORS
                .try_with(|registry| registry.0.borrow_mut().remove(&id))
                .ok()
                .flatten();
            let Some(executor) = executor else {
                return Ok(());
            };

            executor.destroy().map_err(|e| {
                // Still running an operation: hand it back.
                let _ = EXECUTORS.try_with(|registry| {
                    registry.0.borrow_mut().insert(id.clone(), executor.clone());
                });
                e
            })
        });

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.destroyed.store(false, Ordering::Release);
                Err(e)
            }
            // The queue thread is gone and took its executors with it.
            Err(e) => {
                warn!("Queue closed before destroy: {}", e);
                Err(e)
            }
        }
    }
}

impl Drop for ExecutorHandle {
    fn drop(&mut self) {
        if self.is_destroyed() {
            return;
        }

        error!(executor_id = %self.id, "Executor handle dropped without destroy()");
        let _ = self.destroy();

        if !std::thread::panicking() {
            panic!("ExecutorHandle {} dropped without calling destroy()", self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delegate::testing::RecordingDelegate;
    use crate::delegate::Delivery;
    use crate::error::ErrorCode;

    const BRIDGE: &str = r#"
        var __fbBatchedBridge = {
            callFunctionReturnFlushedQueue: function (m, f, args) { return [[1], [2], [args], 0]; },
            invokeCallbackAndReturnFlushedQueue: function () { return null; },
            flushedQueue: function () { return null; },
            callFunctionReturnResultAndFlushedQueue: function (m, f, args) { return [args.length, null]; }
        };
    "#;

    fn spawn(delegate: &Arc<RecordingDelegate>) -> (ExecutorHandle, Arc<QueueThread>) {
        let queue = QueueThread::spawn("handle-test").unwrap();
        let handle = ExecutorHandle::spawn(
            ExecutorConfig::default(),
            Some(delegate.clone() as Arc<dyn ExecutorDelegate>),
            queue.clone(),
        )
        .unwrap();
        (handle, queue)
    }

    #[test]
    fn test_operations_run_on_queue_thread() {
        let delegate = RecordingDelegate::new();
        let (handle, queue) = spawn(&delegate);

        handle.load_script(BRIDGE, "bridge.js").unwrap();
        handle.call_function("A", "b", BridgeValue::Array(vec![])).unwrap();
        let result = handle
            .call_function_sync("A", "c", BridgeValue::Array(vec![BridgeValue::Null]))
            .unwrap();
        assert_eq!(result, Some(BridgeValue::Number(1.0)));

        let on_queue = handle
            .with_executor(|_| Ok(std::thread::current().name().map(str::to_string)))
            .unwrap();
        assert_eq!(on_queue.as_deref(), Some("handle-test"));

        let deliveries = delegate.take_deliveries();
        assert_eq!(deliveries.len(), 3);
        assert!(deliveries.iter().all(|(_, delivery)| *delivery == Delivery::Batched));
        assert_eq!(handle.metrics().function_calls(), 1);
        assert!(handle.stats().unwrap().bridge_bound);

        handle.destroy().unwrap();
        queue.quit_synchronous();
    }

    #[test]
    fn test_errors_cross_the_queue() {
        let delegate = RecordingDelegate::new();
        let (handle, _queue) = spawn(&delegate);

        let err = handle.load_script("null.foo", "bad.js").unwrap_err();
        assert_eq!(err.code(), ErrorCode::ExecutionError);

        handle.set_global_variable("answer", "42").unwrap();
        handle.handle_memory_pressure(MemoryPressure::Moderate).unwrap();

        handle.destroy().unwrap();
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let delegate = RecordingDelegate::new();
        let (handle, _queue) = spawn(&delegate);

        handle.destroy().unwrap();
        handle.destroy().unwrap();
        assert!(handle.is_destroyed());

        let err = handle.load_script("1", "late.js").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidState);
    }

    #[test]
    fn test_executors_are_independent() {
        let delegate = RecordingDelegate::new();
        let queue = QueueThread::spawn("shared-queue").unwrap();
        let spawn = || {
            ExecutorHandle::spawn(
                ExecutorConfig::default(),
                Some(delegate.clone() as Arc<dyn ExecutorDelegate>),
                queue.clone(),
            )
            .unwrap()
        };
        let first = spawn();
        let second = spawn();
        assert_ne!(first.id(), second.id());

        first.set_global_variable("who", "\"first\"").unwrap();
        second
            .load_script(
                BRIDGE.replace("return [args.length, null];", "return [typeof who, null];"),
                "bridge.js",
            )
            .unwrap();
        let seen = second
            .call_function_sync("X", "y", BridgeValue::Array(vec![]))
            .unwrap();
        assert_eq!(seen, Some(BridgeValue::from("undefined")));

        first.destroy().unwrap();
        second.destroy().unwrap();
    }

    #[test]
    fn test_spawn_with_queue_uses_configured_name() {
        let config = ExecutorConfig::default().with_queue_thread_name("js-app");
        let (handle, queue) = ExecutorHandle::spawn_with_queue(config, None).unwrap();
        assert_eq!(queue.name(), "js-app");

        let thread = handle
            .with_executor(|_| Ok(std::thread::current().name().map(str::to_string)))
            .unwrap();
        assert_eq!(thread.as_deref(), Some("js-app"));

        handle.destroy().unwrap();
        queue.quit_synchronous();

        let config = ExecutorConfig::default().with_queue_thread_name(" ");
        let err = ExecutorHandle::spawn_with_queue(config, None).err().unwrap();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[test]
    fn test_spawn_failure_reported() {
        let queue = QueueThread::spawn("bad-config").unwrap();
        let config = ExecutorConfig::default().with_context_name("");
        let err = ExecutorHandle::spawn(config, None, queue).err().unwrap();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[test]
    fn test_queue_shutdown_destroys_leftovers() {
        let queue = QueueThread::spawn("shutdown").unwrap();
        let handle = ExecutorHandle::spawn(ExecutorConfig::default(), None, queue.clone()).unwrap();
        queue.quit_synchronous();

        assert!(handle.destroy().is_err());
        assert!(handle.is_destroyed());
    }

    #[test]
    #[should_panic(expected = "dropped without calling destroy()")]
    fn test_drop_without_destroy_panics() {
        let delegate = RecordingDelegate::new();
        let (handle, _queue) = spawn(&delegate);
        drop(handle);
    }
}
