//! State shared between an executor and the native hooks it installs.
//!
//! Hooks hold a `Weak` reference; only the executor owns the state. All
//! fields are engine-thread only, so interior mutability is `Cell`/`RefCell`.
//! No `RefCell` borrow is held across a call into the engine.

use super::bridge::BridgeHandles;
use crate::bundle::BundleRegistry;
use crate::delegate::{Delivery, ExecutorDelegate};
use crate::error::{ErrorCode, JsError};
use crate::metrics::BridgeMetrics;
use crate::modules::{ModuleRegistry, NativeModules};
use crate::value::BridgeValue;
use rquickjs::{Ctx, Exception};
use std::cell::RefCell;
use std::sync::Arc;
use tracing::{debug, warn};

pub(crate) struct ExecutorState {
    pub(crate) id: String,
    pub(crate) context_name: RefCell<String>,
    pub(crate) debug: bool,
    pub(crate) delegate: Option<Arc<dyn ExecutorDelegate>>,
    pub(crate) bundle_registry: RefCell<Option<Arc<dyn BundleRegistry>>>,
    pub(crate) native_modules: NativeModules,
    pub(crate) bridge: BridgeHandles,
    pub(crate) metrics: Arc<BridgeMetrics>,
    pending_error: RefCell<Option<JsError>>,
}

impl ExecutorState {
    pub(crate) fn new(
        id: String,
        context_name: String,
        debug: bool,
        delegate: Option<Arc<dyn ExecutorDelegate>>,
        module_registry: Option<Arc<dyn ModuleRegistry>>,
        metrics: Arc<BridgeMetrics>,
    ) -> Self {
        Self {
            id,
            context_name: RefCell::new(context_name),
            debug,
            delegate,
            bundle_registry: RefCell::new(None),
            native_modules: NativeModules::new(module_registry),
            bridge: BridgeHandles::new(),
            metrics,
            pending_error: RefCell::new(None),
        }
    }

    pub(crate) fn context_name(&self) -> String {
        self.context_name.borrow().clone()
    }

    /// Hand a queue to the delegate. Without a delegate the queue is dropped.
    pub(crate) fn deliver(&self, queue: BridgeValue, delivery: Delivery) {
        let Some(delegate) = &self.delegate else {
            debug!(executor_id = %self.id, ?delivery, "No delegate registered, dropping queue");
            return;
        };

        if self.debug {
            debug!(executor_id = %self.id, ?delivery, queue = ?queue, "Delivering queue");
        }

        self.metrics.record_flush(delivery);
        delegate.call_native_modules(queue, delivery);
    }

    /// Record `error` as raised by a native hook and build the exception that
    /// carries it through the script.
    pub(crate) fn raise<'js>(&self, ctx: &Ctx<'js>, error: JsError) -> rquickjs::Error {
        warn!(
            executor_id = %self.id,
            code = %error.code,
            "Native hook raised: {}",
            error.message
        );
        self.metrics.record_error(&error.code.to_string());

        let message = error.message.clone();
        let code = error.code;
        *self.pending_error.borrow_mut() = Some(error);

        match code {
            ErrorCode::InvalidArgument => Exception::throw_type(ctx, &message),
            _ => Exception::throw_message(ctx, &message),
        }
    }

    /// Take the hook error behind an exception with `message`, if any.
    ///
    /// An exception whose message differs was thrown by the script itself;
    /// the hook error it replaced is discarded.
    pub(crate) fn take_pending_error(&self, message: Option<&str>) -> Option<JsError> {
        let pending = self.pending_error.borrow_mut().take()?;
        (message == Some(pending.message.as_str())).then_some(pending)
    }

    pub(crate) fn clear_pending_error(&self) {
        self.pending_error.borrow_mut().take();
    }
}
