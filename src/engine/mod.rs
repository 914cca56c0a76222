//! Script engine management.
//!
//! This module provides the [`JsExecutor`], which owns one QuickJS runtime and
//! context, installs the native hooks and drives the batched bridge protocol.
//! A `JsExecutor` never leaves the thread that created it; use
//! [`handle::ExecutorHandle`] to drive one from other threads.

mod bridge;
mod exception;
pub mod handle;
pub mod queue;
mod state;

pub use bridge::{BATCHED_BRIDGE_GLOBAL, REQUIRE_BATCHED_BRIDGE_GLOBAL};
pub(crate) use exception::{eval_program, exception_text, script_fault};
pub(crate) use state::ExecutorState;

use crate::bundle::{BundleRegistry, MAIN_BUNDLE_ID};
use crate::config::ExecutorConfig;
use crate::delegate::ExecutorDelegate;
use crate::error::{JsError, Result};
use crate::host_functions::{self, require, HookError};
use crate::metrics::{BridgeMetrics, ExecutorStats, OperationTimer};
use crate::value::{from_js, json_to_js, to_js, BridgeValue};
use bridge::BridgeFunction;
use rquickjs::function::This;
use rquickjs::{Context, Ctx, Runtime, Value};
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Memory pressure level reported by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MemoryPressure {
    /// The UI is no longer visible
    UiHidden,
    /// The system is running low on memory
    Moderate,
    /// The system is about to kill processes
    Critical,
}

/// The batched bridge executor.
///
/// All operations run synchronously on the calling thread. An operation that
/// arrives while another one is running on the same executor (from inside a
/// delegate callback) is rejected with `InvalidState`.
///
/// [`JsExecutor::destroy`] must run before the executor is dropped.
pub struct JsExecutor {
    state: Rc<ExecutorState>,
    // Dropped before the runtime.
    context: RefCell<Option<Context>>,
    runtime: Runtime,
    destroyed: Cell<bool>,
    in_turn: Cell<bool>,
}

impl JsExecutor {
    /// Create the engine, its context and the native hooks
    #[instrument(skip(config, delegate), fields(context = %config.context_name))]
    pub fn new(config: ExecutorConfig, delegate: Option<Arc<dyn ExecutorDelegate>>) -> Result<Self> {
        config.validate()?;

        let runtime = Runtime::new().map_err(|e| engine_failure("create the engine runtime", e))?;
        if config.memory_limit_bytes > 0 {
            runtime.set_memory_limit(config.memory_limit_bytes as usize);
        }
        runtime.set_max_stack_size(config.max_stack_size_bytes as usize);
        runtime.set_gc_threshold(config.gc_threshold_bytes as usize);

        let context = Context::full(&runtime).map_err(|e| engine_failure("create the engine context", e))?;

        let id = uuid::Uuid::new_v4().to_string();
        let module_registry = delegate.as_ref().and_then(|d| d.module_registry());
        let state = Rc::new(ExecutorState::new(
            id,
            config.context_name.clone(),
            config.debug,
            delegate,
            module_registry,
            Arc::new(BridgeMetrics::new()),
        ));

        context.with(|ctx| {
            host_functions::install(&ctx, &state, &config).map_err(|e| {
                JsError::internal_error(format!(
                    "Failed to install native hooks: {}",
                    exception_text(&ctx, e)
                ))
            })
        })?;

        info!(
            executor_id = %state.id,
            memory_limit = config.memory_limit_bytes,
            has_delegate = state.delegate.is_some(),
            "Initialized JS executor"
        );

        Ok(Self {
            state,
            context: RefCell::new(Some(context)),
            runtime,
            destroyed: Cell::new(false),
            in_turn: Cell::new(false),
        })
    }

    /// Executor id
    pub fn id(&self) -> &str {
        &self.state.id
    }

    /// Engine name
    pub fn description(&self) -> &'static str {
        "quickjs"
    }

    /// Context name used in logs
    pub fn context_name(&self) -> String {
        self.state.context_name()
    }

    /// Change the context name used in logs
    pub fn set_context_name(&self, name: impl Into<String>) {
        *self.state.context_name.borrow_mut() = name.into();
    }

    /// Metrics recorded by this executor
    pub fn metrics(&self) -> Arc<BridgeMetrics> {
        self.state.metrics.clone()
    }

    /// Whether `destroy()` has run
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.get()
    }

    /// Set the registry `nativeRequire` loads modules from
    pub fn set_bundle_registry(&self, registry: Arc<dyn BundleRegistry>) {
        *self.state.bundle_registry.borrow_mut() = Some(registry);
    }

    /// Run a script as a top-level program, then flush the queue
    #[instrument(skip(self, source, source_url), fields(executor_id = %self.state.id, source_url = %source_url))]
    pub fn load_script(&self, source: &str, source_url: &str) -> Result<()> {
        self.with_turn(|ctx, state| {
            eval_program(ctx, source).map_err(|e| {
                script_fault(ctx, state, e, "Error executing script", Some(source_url))
            })?;
            debug!("Script evaluated");

            bridge::flush(ctx, state)?;
            state.metrics.record_script_loaded();
            Ok(())
        })
    }

    /// Call a method on a script module and flush the resulting queue
    #[instrument(skip(self, args), fields(executor_id = %self.state.id))]
    pub fn call_function(&self, module: &str, method: &str, args: &BridgeValue) -> Result<()> {
        self.with_turn(|ctx, state| {
            state.metrics.record_function_call();
            let args = to_js(ctx, args)?;
            let queue = bridge::call(
                ctx,
                state,
                BridgeFunction::CallFunctionReturnFlushedQueue,
                (This(ctx.globals()), module, method, args),
            )?;
            bridge::flush_value(ctx, state, queue)
        })
    }

    /// Invoke a script callback and flush the resulting queue
    #[instrument(skip(self, args), fields(executor_id = %self.state.id))]
    pub fn invoke_callback(&self, callback_id: u64, args: &BridgeValue) -> Result<()> {
        self.with_turn(|ctx, state| {
            state.metrics.record_callback();
            let args = to_js(ctx, args)?;
            let queue = bridge::call(
                ctx,
                state,
                BridgeFunction::InvokeCallbackAndReturnFlushedQueue,
                (This(ctx.globals()), callback_id as f64, args),
            )?;
            bridge::flush_value(ctx, state, queue)
        })
    }

    /// Call a method on a script module and return its result.
    ///
    /// The script returns `[result, queue]`; the queue is flushed before the
    /// result is handed back. `None` when the result has no JSON form.
    #[instrument(skip(self, args), fields(executor_id = %self.state.id))]
    pub fn call_function_sync(
        &self,
        module: &str,
        method: &str,
        args: &BridgeValue,
    ) -> Result<Option<BridgeValue>> {
        self.with_turn(|ctx, state| {
            state.metrics.record_sync_function_call();
            let args = to_js(ctx, args)?;
            let pair = bridge::call(
                ctx,
                state,
                BridgeFunction::CallFunctionReturnResultAndFlushedQueue,
                (This(ctx.globals()), module, method, args),
            )?;

            let pair = pair.as_array().filter(|array| array.len() == 2).ok_or_else(|| {
                JsError::protocol_violation(format!(
                    "{} must return [result, queue]",
                    BridgeFunction::CallFunctionReturnResultAndFlushedQueue.name()
                ))
            })?;
            let result: Value = pair
                .get(0)
                .map_err(|e| JsError::internal_error(exception_text(ctx, e)))?;
            let queue: Value = pair
                .get(1)
                .map_err(|e| JsError::internal_error(exception_text(ctx, e)))?;

            bridge::flush_value(ctx, state, queue)?;
            from_js(ctx, result)
        })
    }

    /// Parse `json` in the engine and assign it to a global property
    #[instrument(skip(self, json), fields(executor_id = %self.state.id))]
    pub fn set_global_variable(&self, name: &str, json: &str) -> Result<()> {
        self.with_turn(|ctx, state| {
            let what = format!("Failed to set global variable {}", name);
            let value = json_to_js(ctx, json)
                .map_err(|e| JsError::execution_error(what.clone()).with_cause(e.to_js_error()))?;
            ctx.globals()
                .set(name, value)
                .map_err(|e| script_fault(ctx, state, e, &what, None))?;
            Ok(())
        })
    }

    /// Load and run one module from the bundle registry, without flushing.
    ///
    /// `None` addresses the main bundle.
    #[instrument(skip(self), fields(executor_id = %self.state.id))]
    pub fn load_module(&self, bundle_id: Option<u32>, module_id: u32) -> Result<()> {
        self.with_turn(|ctx, state| {
            require::load_module(ctx, state, bundle_id.unwrap_or(MAIN_BUNDLE_ID), module_id).map_err(
                |e| match e {
                    HookError::Host(err) => err.into(),
                    HookError::Js(e) => script_fault(ctx, state, e, "Error executing module", None).into(),
                },
            )
        })
    }

    /// React to host memory pressure. Moderate and critical levels run a full
    /// GC cycle.
    pub fn handle_memory_pressure(&self, level: MemoryPressure) {
        if self.destroyed.get() {
            return;
        }
        match level {
            MemoryPressure::UiHidden => {
                debug!(executor_id = %self.state.id, "UI hidden, keeping engine heap");
            }
            MemoryPressure::Moderate | MemoryPressure::Critical => {
                info!(executor_id = %self.state.id, ?level, "Running GC for memory pressure");
                self.runtime.run_gc();
            }
        }
    }

    /// Whether `start_profiler` does anything
    pub fn supports_profiling(&self) -> bool {
        false
    }

    /// Start a named profile. QuickJS has no sampling profiler, so this only logs.
    pub fn start_profiler(&self, title: &str) {
        debug!(executor_id = %self.state.id, title, "Profiling is not supported");
    }

    /// Stop a named profile
    pub fn stop_profiler(&self, title: &str, filename: &str) {
        debug!(executor_id = %self.state.id, title, filename, "Profiling is not supported");
    }

    /// Snapshot of the executor and its engine heap
    pub fn stats(&self) -> ExecutorStats {
        let usage = self.runtime.memory_usage();
        ExecutorStats {
            executor_id: self.state.id.clone(),
            context_name: self.state.context_name(),
            bridge_bound: self.state.bridge.is_bound(),
            cached_modules: self.state.native_modules.len(),
            memory_used_bytes: usage.memory_used_size.max(0) as u64,
            malloc_bytes: usage.malloc_size.max(0) as u64,
            object_count: usage.obj_count.max(0) as u64,
            destroyed: self.destroyed.get(),
        }
    }

    /// Tear the engine down. Idempotent.
    ///
    /// Fails only when called from inside a running operation.
    #[instrument(skip(self), fields(executor_id = %self.state.id))]
    pub fn destroy(&self) -> Result<()> {
        if self.destroyed.get() {
            return Ok(());
        }
        if self.in_turn.get() {
            return Err(JsError::invalid_state("Cannot destroy the executor from inside an operation").into());
        }

        self.destroyed.set(true);
        self.teardown();
        info!("JS executor destroyed");
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn bind_resolutions(&self) -> u32 {
        self.state.bridge.resolutions()
    }

    fn teardown(&self) {
        let context = self.context.borrow_mut().take();
        if let Some(context) = context {
            context.with(|_ctx| {
                self.state.native_modules.reset();
                self.state.bridge.reset();
            });
        }
        self.runtime.run_gc();
    }

    fn with_turn<R, F>(&self, f: F) -> Result<R>
    where
        F: for<'js> FnOnce(&Ctx<'js>, &ExecutorState) -> Result<R>,
    {
        if self.destroyed.get() {
            return Err(JsError::invalid_state("The executor has been destroyed").into());
        }
        if self.in_turn.get() {
            return Err(JsError::invalid_state("The executor is already running an operation").into());
        }
        let context = self
            .context
            .borrow()
            .clone()
            .ok_or_else(|| JsError::invalid_state("The executor has no context"))?;

        let turn = TurnGuard::enter(&self.in_turn);
        self.state.clear_pending_error();
        let timer = OperationTimer::start();

        let result = context.with(|ctx| f(&ctx, &self.state));

        drop(turn);
        timer.finish(&self.state.metrics);

        if let Err(e) = &result {
            warn!(executor_id = %self.state.id, code = %e.code(), "Operation failed: {}", e);
            self.state.metrics.record_error(&e.code().to_string());
        }
        result
    }
}

impl Drop for JsExecutor {
    fn drop(&mut self) {
        if self.destroyed.get() {
            return;
        }

        error!(executor_id = %self.state.id, "JS executor dropped without destroy()");
        self.destroyed.set(true);
        self.teardown();

        if !std::thread::panicking() {
            panic!("JsExecutor {} dropped without calling destroy()", self.state.id);
        }
    }
}

/// Marks an operation in progress; cleared on drop, unwinding included
struct TurnGuard<'a>(&'a Cell<bool>);

impl<'a> TurnGuard<'a> {
    fn enter(flag: &'a Cell<bool>) -> Self {
        flag.set(true);
        Self(flag)
    }
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

fn engine_failure(what: &str, e: rquickjs::Error) -> JsError {
    JsError::internal_error(format!("Failed to {}: {}", what, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{BundleModule, RamBundleRegistry};
    use crate::delegate::testing::RecordingDelegate;
    use crate::delegate::Delivery;
    use crate::error::ErrorCode;
    use crate::modules::{MethodKind, NativeModuleDescriptor, StaticModuleRegistry};

    const BRIDGE: &str = r#"
        var __fbBatchedBridge = {
            callFunctionReturnFlushedQueue: function (module, method, args) {
                globalThis.lastCall = [module, method, args];
                return [[1], [2], [args], 7];
            },
            invokeCallbackAndReturnFlushedQueue: function (id, args) {
                return [[3], [4], [args], id];
            },
            flushedQueue: function () { return null; },
            callFunctionReturnResultAndFlushedQueue: function (module, method, args) {
                return [args[0] * 2, [[5], [6], [[]], 9]];
            }
        };
    "#;

    fn executor(delegate: &Arc<RecordingDelegate>) -> JsExecutor {
        JsExecutor::new(ExecutorConfig::default(), Some(delegate.clone() as Arc<dyn ExecutorDelegate>))
            .unwrap()
    }

    fn eval(executor: &JsExecutor, source: &str) -> Option<BridgeValue> {
        executor
            .with_turn(|ctx, _state| {
                let value: Value = ctx
                    .eval(source)
                    .map_err(|e| JsError::execution_error(exception_text(ctx, e)))?;
                from_js(ctx, value)
            })
            .unwrap()
    }

    fn numbers(values: &[f64]) -> BridgeValue {
        BridgeValue::Array(values.iter().map(|n| BridgeValue::Number(*n)).collect())
    }

    #[test]
    fn test_call_function_delivers_one_batch() {
        let delegate = RecordingDelegate::new();
        let executor = executor(&delegate);
        executor.load_script(BRIDGE, "bridge.js").unwrap();
        delegate.take_deliveries();

        let args = BridgeValue::Array(vec![
            BridgeValue::Number(1.0),
            BridgeValue::Number(1000.0),
            BridgeValue::Number(1_700_000_000_000.0),
            BridgeValue::Bool(false),
        ]);
        executor.call_function("Timing", "createTimer", &args).unwrap();

        let expected = BridgeValue::Array(vec![
            numbers(&[1.0]),
            numbers(&[2.0]),
            BridgeValue::Array(vec![args.clone()]),
            BridgeValue::Number(7.0),
        ]);
        assert_eq!(delegate.take_deliveries(), vec![(expected, Delivery::Batched)]);

        let last = eval(&executor, "lastCall").unwrap();
        assert_eq!(last.as_array().unwrap()[0], BridgeValue::from("Timing"));
        assert_eq!(executor.metrics().function_calls(), 1);

        executor.destroy().unwrap();
    }

    #[test]
    fn test_sync_hook_rejects_non_array_params() {
        let delegate = RecordingDelegate::new();
        let executor = executor(&delegate);

        let err = executor
            .load_script(r#"nativeCallSyncHook(5, 2, "{\"foo\":1}");"#, "sync.js")
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
        assert!(err.to_string().contains("should be array, but are string"));
        assert!(delegate.sync_calls.lock().is_empty());

        executor.destroy().unwrap();
    }

    #[test]
    fn test_sync_hook_returns_delegate_result() {
        let delegate = RecordingDelegate::new();
        *delegate.sync_result.lock() = Some(BridgeValue::from("pong"));
        let executor = executor(&delegate);

        executor
            .load_script("var reply = nativeCallSyncHook(5, 2, ['ping', 1]);", "sync.js")
            .unwrap();
        assert_eq!(eval(&executor, "reply"), Some(BridgeValue::from("pong")));

        let calls = delegate.sync_calls.lock().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!((calls[0].0, calls[0].1), (5, 2));
        assert_eq!(calls[0].2, vec![BridgeValue::from("ping"), BridgeValue::Number(1.0)]);

        *delegate.sync_result.lock() = None;
        executor
            .load_script("var nothing = nativeCallSyncHook(1, 1, []) === undefined;", "sync.js")
            .unwrap();
        assert_eq!(eval(&executor, "nothing"), Some(BridgeValue::Bool(true)));

        executor.destroy().unwrap();
    }

    #[test]
    fn test_require_unknown_module() {
        let delegate = RecordingDelegate::new();
        let executor = executor(&delegate);
        executor.set_bundle_registry(Arc::new(RamBundleRegistry::with_main_bundle([(
            1,
            BundleModule::new("one.js", "globalThis.ran = true;"),
        )])));

        let err = executor.load_script("nativeRequire(42);", "main.js").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
        assert!(err.to_string().contains("42"));
        assert_eq!(eval(&executor, "typeof ran"), Some(BridgeValue::from("undefined")));

        executor.load_script("nativeRequire(1, 0);", "main.js").unwrap();
        assert_eq!(eval(&executor, "ran"), Some(BridgeValue::Bool(true)));

        executor.destroy().unwrap();
    }

    #[test]
    fn test_require_without_registry_is_noop() {
        let delegate = RecordingDelegate::new();
        let executor = executor(&delegate);
        executor.load_script("nativeRequire(3);", "main.js").unwrap();
        executor.load_module(None, 3).unwrap();
        executor.destroy().unwrap();
    }

    #[test]
    fn test_module_fault_names_module() {
        let delegate = RecordingDelegate::new();
        let executor = executor(&delegate);
        executor.set_bundle_registry(Arc::new(RamBundleRegistry::with_main_bundle([(
            3,
            BundleModule::new("broken.js", "throw new Error('module boom');"),
        )])));

        let err = executor.load_script("nativeRequire(3);", "main.js").unwrap_err();
        let js = err.to_js_error();
        assert_eq!(js.code, ErrorCode::ExecutionError);
        assert_eq!(js.message, "Error executing module");
        assert_eq!(js.source_url.as_deref(), Some("broken.js"));
        assert!(js.root_cause().message.contains("module boom"));

        let err = executor.load_module(Some(0), 3).unwrap_err();
        assert_eq!(err.to_js_error().source_url.as_deref(), Some("broken.js"));

        executor.destroy().unwrap();
    }

    #[test]
    fn test_script_can_catch_hook_errors() {
        let delegate = RecordingDelegate::new();
        let executor = executor(&delegate);
        executor.set_bundle_registry(Arc::new(RamBundleRegistry::new()));

        executor
            .load_script(
                "try { nativeRequire(99); } catch (e) { globalThis.caught = e.message; }",
                "main.js",
            )
            .unwrap();
        assert_eq!(
            eval(&executor, "caught"),
            Some(BridgeValue::from("Module 99 not found in bundle 0"))
        );

        // A later, unrelated script fault is not mistaken for the hook error.
        let err = executor.load_script("null.foo", "main.js").unwrap_err();
        assert_eq!(err.code(), ErrorCode::ExecutionError);

        executor.destroy().unwrap();
    }

    #[test]
    fn test_bind_runs_once() {
        let delegate = RecordingDelegate::new();
        let executor = executor(&delegate);
        executor.load_script(BRIDGE, "bridge.js").unwrap();

        executor.call_function("A", "b", &BridgeValue::Array(vec![])).unwrap();
        executor.invoke_callback(4, &BridgeValue::Array(vec![])).unwrap();
        executor.load_script("var more = 1;", "more.js").unwrap();
        executor
            .call_function_sync("A", "c", &numbers(&[1.0]))
            .unwrap();

        assert_eq!(executor.bind_resolutions(), 1);
        assert!(executor.stats().bridge_bound);

        executor.destroy().unwrap();
    }

    #[test]
    fn test_missing_bridge_is_protocol_violation() {
        let delegate = RecordingDelegate::new();
        let executor = executor(&delegate);

        let err = executor
            .call_function("A", "b", &BridgeValue::Array(vec![]))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ProtocolViolation);
        assert!(err.to_string().contains("packaged correctly"));

        // The failure is remembered even after the bridge shows up.
        executor.load_script(BRIDGE, "bridge.js").unwrap_err();
        assert_eq!(executor.bind_resolutions(), 1);

        executor.destroy().unwrap();
    }

    #[test]
    fn test_invoke_callback() {
        let delegate = RecordingDelegate::new();
        let executor = executor(&delegate);
        executor.load_script(BRIDGE, "bridge.js").unwrap();
        delegate.take_deliveries();

        executor.invoke_callback(12, &numbers(&[1.0])).unwrap();
        let deliveries = delegate.take_deliveries();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].0.as_array().unwrap()[3], BridgeValue::Number(12.0));
        assert_eq!(executor.metrics().callbacks_invoked(), 1);

        executor.destroy().unwrap();
    }

    #[test]
    fn test_call_function_sync() {
        let delegate = RecordingDelegate::new();
        let executor = executor(&delegate);
        executor.load_script(BRIDGE, "bridge.js").unwrap();
        delegate.take_deliveries();

        let result = executor.call_function_sync("Math", "double", &numbers(&[21.0])).unwrap();
        assert_eq!(result, Some(BridgeValue::Number(42.0)));

        let deliveries = delegate.take_deliveries();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].0.as_array().unwrap()[3], BridgeValue::Number(9.0));

        executor.destroy().unwrap();
    }

    #[test]
    fn test_call_function_sync_requires_pair() {
        let delegate = RecordingDelegate::new();
        let executor = executor(&delegate);
        executor
            .load_script(
                &BRIDGE.replace("return [args[0] * 2, [[5], [6], [[]], 9]];", "return 5;"),
                "bridge.js",
            )
            .unwrap();

        let err = executor.call_function_sync("A", "b", &numbers(&[1.0])).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ProtocolViolation);

        executor.destroy().unwrap();
    }

    #[test]
    fn test_script_error() {
        let delegate = RecordingDelegate::new();
        let executor = executor(&delegate);

        let err = executor.load_script("null.foo", "bad.js").unwrap_err();
        let js = err.to_js_error();
        assert_eq!(js.code, ErrorCode::ExecutionError);
        assert_eq!(js.source_url.as_deref(), Some("bad.js"));
        let cause = js.cause.as_deref().unwrap();
        assert_eq!(cause.code, ErrorCode::JsException);
        assert!(cause.message.starts_with("TypeError"));

        let err = executor.load_script("function (", "syntax.js").unwrap_err();
        assert_eq!(err.code(), ErrorCode::ExecutionError);

        assert_eq!(executor.metrics().error_counts().get("EXECUTION_ERROR"), Some(&2));
        executor.destroy().unwrap();
    }

    #[test]
    fn test_module_proxy() {
        let registry = Arc::new(StaticModuleRegistry::new());
        let index = registry.register(
            NativeModuleDescriptor::new("Timing")
                .with_constant("precision", 1.0)
                .with_method("createTimer", MethodKind::Async),
        );
        let delegate = RecordingDelegate::with_registry(registry);
        let executor = executor(&delegate);
        executor.load_script(crate::BATCHED_BRIDGE_PRELUDE, "prelude.js").unwrap();
        delegate.take_deliveries();

        executor
            .load_script(
                r#"
                var same = nativeModuleProxy.Timing === nativeModuleProxy.Timing;
                var proxyName = nativeModuleProxy.name;
                var missing = nativeModuleProxy.Missing === undefined;
                var precision = nativeModuleProxy.Timing.precision;
                nativeModuleProxy.Timing.createTimer(1, 1000, 5, false);
                "#,
                "app.js",
            )
            .unwrap();

        assert_eq!(eval(&executor, "same"), Some(BridgeValue::Bool(true)));
        assert_eq!(eval(&executor, "proxyName"), Some(BridgeValue::from("NativeModules")));
        assert_eq!(eval(&executor, "missing"), Some(BridgeValue::Bool(true)));
        assert_eq!(eval(&executor, "precision"), Some(BridgeValue::Number(1.0)));

        let deliveries = delegate.take_deliveries();
        assert_eq!(deliveries.len(), 1);
        let calls = crate::batch::parse_method_calls(&deliveries[0].0).unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].module_id, index);
        assert_eq!(calls[0].method_id, 0);
        assert_eq!(calls[0].arguments, vec![
            BridgeValue::Number(1.0),
            BridgeValue::Number(1000.0),
            BridgeValue::Number(5.0),
            BridgeValue::Bool(false),
        ]);

        assert_eq!(executor.stats().cached_modules, 1);
        executor.destroy().unwrap();
    }

    #[test]
    fn test_prelude_round_trip() {
        let registry = Arc::new(StaticModuleRegistry::new());
        registry.register(NativeModuleDescriptor::new("Timing").with_method("createTimer", MethodKind::Async));
        let delegate = RecordingDelegate::with_registry(registry);
        let executor = executor(&delegate);

        executor.load_script(crate::BATCHED_BRIDGE_PRELUDE, "prelude.js").unwrap();
        executor
            .load_script(
                r#"
                __fbBatchedBridge.registerCallableModule('Greeter', {
                    greet: function (name) {
                        nativeModuleProxy.Timing.createTimer(function () { globalThis.fired = name; });
                        return 'hi ' + name;
                    }
                });
                "#,
                "app.js",
            )
            .unwrap();
        delegate.take_deliveries();

        let result = executor
            .call_function_sync("Greeter", "greet", &BridgeValue::Array(vec![BridgeValue::from("bob")]))
            .unwrap();
        assert_eq!(result, Some(BridgeValue::from("hi bob")));

        let deliveries = delegate.take_deliveries();
        let calls = crate::batch::parse_method_calls(&deliveries[0].0).unwrap();
        let callback_id = calls[0].arguments[0].as_number().unwrap() as u64;

        executor.invoke_callback(callback_id, &BridgeValue::Array(vec![])).unwrap();
        assert_eq!(eval(&executor, "fired"), Some(BridgeValue::from("bob")));

        let err = executor
            .call_function("Nobody", "home", &BridgeValue::Array(vec![]))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ExecutionError);

        executor.destroy().unwrap();
    }

    #[test]
    fn test_flush_queue_immediate() {
        let delegate = RecordingDelegate::new();
        let executor = executor(&delegate);

        executor
            .load_script("nativeFlushQueueImmediate([[1], [2], [[]], 0]);", "main.js")
            .unwrap();
        let deliveries = delegate.take_deliveries();
        assert_eq!(deliveries.len(), 2);
        assert_eq!(deliveries[0].1, Delivery::Immediate);
        assert_eq!(deliveries[1], (BridgeValue::Null, Delivery::Batched));

        let err = executor.load_script("nativeFlushQueueImmediate(5);", "main.js").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
        assert_eq!(executor.metrics().immediate_flushes(), 1);

        executor.destroy().unwrap();
    }

    #[test]
    fn test_logging_and_clock_hooks() {
        let delegate = RecordingDelegate::new();
        let executor = executor(&delegate);
        executor
            .load_script(
                "nativeLoggingHook('careful', 2); nativeLoggingHook('plain'); var t = nativePerformanceNow();",
                "main.js",
            )
            .unwrap();

        let logs = executor.metrics().script_logs();
        assert_eq!(logs.get("warn"), Some(&1));
        assert_eq!(logs.get("debug"), Some(&1));
        assert!(eval(&executor, "t").unwrap().as_number().unwrap() >= 0.0);

        executor.destroy().unwrap();
    }

    #[test]
    fn test_disabled_hooks_are_absent() {
        let config = ExecutorConfig::default()
            .with_logging_hook(false)
            .with_performance_now(false);
        let executor = JsExecutor::new(config, None).unwrap();
        assert_eq!(
            eval(&executor, "typeof nativeLoggingHook + typeof nativePerformanceNow"),
            Some(BridgeValue::from("undefinedundefined"))
        );
        executor.destroy().unwrap();
    }

    #[test]
    fn test_set_global_variable() {
        let delegate = RecordingDelegate::new();
        let executor = executor(&delegate);

        executor.set_global_variable("__config", r#"{"a": [1, 2]}"#).unwrap();
        assert_eq!(eval(&executor, "__config.a[1]"), Some(BridgeValue::Number(2.0)));

        let err = executor.set_global_variable("__broken", "{not json").unwrap_err();
        let js = err.to_js_error();
        assert_eq!(js.code, ErrorCode::ExecutionError);
        assert!(js.message.contains("__broken"));

        executor.destroy().unwrap();
    }

    #[test]
    fn test_without_delegate() {
        let executor = JsExecutor::new(ExecutorConfig::default(), None).unwrap();
        executor.load_script("var x = 1;", "main.js").unwrap();

        let err = executor
            .load_script("nativeCallSyncHook(1, 2, []);", "main.js")
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidState);
        executor.destroy().unwrap();
    }

    #[test]
    fn test_reentrant_operation_rejected() {
        let executor = JsExecutor::new(ExecutorConfig::default(), None).unwrap();
        executor.in_turn.set(true);
        let err = executor.load_script("1", "main.js").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidState);
        assert_eq!(executor.destroy().unwrap_err().code(), ErrorCode::InvalidState);
        executor.in_turn.set(false);
        executor.destroy().unwrap();
    }

    #[test]
    fn test_turn_released_after_delegate_panic() {
        struct PanickingDelegate;

        impl ExecutorDelegate for PanickingDelegate {
            fn call_native_modules(&self, _queue: BridgeValue, _delivery: Delivery) {
                panic!("delegate failed");
            }

            fn call_sync_hook(&self, _: u32, _: u32, _: Vec<BridgeValue>) -> Option<BridgeValue> {
                None
            }
        }

        let delegate: Arc<dyn ExecutorDelegate> = Arc::new(PanickingDelegate);
        let executor = JsExecutor::new(ExecutorConfig::default(), Some(delegate)).unwrap();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            executor.load_script("var x = 1;", "main.js")
        }));
        assert!(outcome.is_err());
        assert!(!executor.in_turn.get());

        assert_eq!(eval(&executor, "x"), Some(BridgeValue::Number(1.0)));
        executor.destroy().unwrap();
    }

    #[test]
    fn test_sloppy_mode_script() {
        let delegate = RecordingDelegate::new();
        let executor = executor(&delegate);
        executor.set_bundle_registry(Arc::new(RamBundleRegistry::with_main_bundle([(
            1,
            BundleModule::new("sloppy-module.js", "moduleGlobal = 'set';"),
        )])));

        executor.load_script("implicitGlobal = 1;", "sloppy.js").unwrap();
        executor.load_script("nativeRequire(1);", "main.js").unwrap();

        assert_eq!(eval(&executor, "implicitGlobal"), Some(BridgeValue::Number(1.0)));
        assert_eq!(eval(&executor, "moduleGlobal"), Some(BridgeValue::from("set")));
        executor.destroy().unwrap();
    }

    #[test]
    fn test_script_stack_names_source() {
        let delegate = RecordingDelegate::new();
        let executor = executor(&delegate);

        let err = executor
            .load_script("function boom() {\n  throw new Error('named');\n}\nboom();", "named.js")
            .unwrap_err();
        let js = err.to_js_error();
        let stack = js.cause.as_deref().and_then(|cause| cause.stack.clone()).unwrap();
        assert!(stack.contains("named.js"), "stack was {}", stack);
        assert!(!stack.contains("eval_script"));

        executor.destroy().unwrap();
    }

    #[test]
    fn test_entry_points_called_on_global() {
        let delegate = RecordingDelegate::new();
        let executor = executor(&delegate);
        executor
            .load_script(
                r#"
                var __fbBatchedBridge = {
                    callFunctionReturnFlushedQueue: function () {
                        'use strict';
                        globalThis.callReceiver = this === globalThis;
                        return null;
                    },
                    invokeCallbackAndReturnFlushedQueue: function () {
                        'use strict';
                        globalThis.callbackReceiver = this === globalThis;
                        return null;
                    },
                    flushedQueue: function () {
                        'use strict';
                        globalThis.flushReceiver = this === globalThis;
                        return null;
                    },
                    callFunctionReturnResultAndFlushedQueue: function () {
                        'use strict';
                        return [this === globalThis, null];
                    }
                };
                "#,
                "bridge.js",
            )
            .unwrap();

        executor.call_function("M", "m", &BridgeValue::Array(vec![])).unwrap();
        executor.invoke_callback(1, &BridgeValue::Array(vec![])).unwrap();
        let sync = executor.call_function_sync("M", "m", &BridgeValue::Array(vec![])).unwrap();

        assert_eq!(eval(&executor, "flushReceiver"), Some(BridgeValue::Bool(true)));
        assert_eq!(eval(&executor, "callReceiver"), Some(BridgeValue::Bool(true)));
        assert_eq!(eval(&executor, "callbackReceiver"), Some(BridgeValue::Bool(true)));
        assert_eq!(sync, Some(BridgeValue::Bool(true)));

        executor.destroy().unwrap();
    }

    #[test]
    fn test_misc_surface() {
        let executor = JsExecutor::new(ExecutorConfig::default(), None).unwrap();
        assert_eq!(executor.description(), "quickjs");
        assert!(!executor.supports_profiling());
        executor.start_profiler("boot");
        executor.stop_profiler("boot", "/tmp/boot.cpuprofile");

        executor.set_context_name("renamed");
        assert_eq!(executor.context_name(), "renamed");
        assert_eq!(executor.stats().context_name, "renamed");

        executor.load_script("var big = []; for (var i = 0; i < 1000; i++) big.push({ i: i });", "m.js")
            .unwrap();
        executor.handle_memory_pressure(MemoryPressure::UiHidden);
        executor.handle_memory_pressure(MemoryPressure::Critical);
        assert!(executor.stats().object_count > 0);

        executor.destroy().unwrap();
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ExecutorConfig::default().with_context_name("  ");
        assert!(JsExecutor::new(config, None).is_err());
    }

    #[test]
    fn test_destroy_then_drop() {
        let delegate = RecordingDelegate::new();
        let executor = executor(&delegate);
        executor.load_script(BRIDGE, "bridge.js").unwrap();

        executor.destroy().unwrap();
        executor.destroy().unwrap();
        assert!(executor.is_destroyed());
        assert!(executor.stats().destroyed);

        let err = executor.load_script("1", "late.js").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidState);
        drop(executor);
    }

    #[test]
    #[should_panic(expected = "dropped without calling destroy()")]
    fn test_drop_without_destroy_panics() {
        let executor = JsExecutor::new(ExecutorConfig::default(), None).unwrap();
        executor.load_script("var x = 1;", "main.js").unwrap();
        drop(executor);
    }
}
