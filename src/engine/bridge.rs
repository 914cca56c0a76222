//! The batched bridge: bind, flush and the persistent entry-point handles.

use super::exception::script_fault;
use super::state::ExecutorState;
use crate::delegate::Delivery;
use crate::error::{JsError, Result};
use crate::value::{from_js, BridgeValue};
use rquickjs::function::{IntoArgs, This};
use rquickjs::{Ctx, Function, Persistent, Value};
use std::cell::{Cell, RefCell};
use tracing::{debug, info, warn};

/// Global holding the bridge object once the bundle has set it up
pub const BATCHED_BRIDGE_GLOBAL: &str = "__fbBatchedBridge";

/// Global function returning the bridge object, for bundles that set it up lazily
pub const REQUIRE_BATCHED_BRIDGE_GLOBAL: &str = "__fbRequireBatchedBridge";

const BIND_FAILURE: &str = "Could not get BatchedBridge, make sure your bundle is packaged correctly";

/// The four script entry points the executor calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BridgeFunction {
    CallFunctionReturnFlushedQueue,
    InvokeCallbackAndReturnFlushedQueue,
    FlushedQueue,
    CallFunctionReturnResultAndFlushedQueue,
}

impl BridgeFunction {
    pub(crate) const ALL: [BridgeFunction; 4] = [
        BridgeFunction::CallFunctionReturnFlushedQueue,
        BridgeFunction::InvokeCallbackAndReturnFlushedQueue,
        BridgeFunction::FlushedQueue,
        BridgeFunction::CallFunctionReturnResultAndFlushedQueue,
    ];

    pub(crate) fn name(self) -> &'static str {
        match self {
            BridgeFunction::CallFunctionReturnFlushedQueue => "callFunctionReturnFlushedQueue",
            BridgeFunction::InvokeCallbackAndReturnFlushedQueue => {
                "invokeCallbackAndReturnFlushedQueue"
            }
            BridgeFunction::FlushedQueue => "flushedQueue",
            BridgeFunction::CallFunctionReturnResultAndFlushedQueue => {
                "callFunctionReturnResultAndFlushedQueue"
            }
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

enum BindState {
    Unbound,
    Bound,
    Failed(JsError),
}

/// Persistent handles to the bridge entry points, behind a one-shot gate
pub(crate) struct BridgeHandles {
    gate: RefCell<BindState>,
    handles: RefCell<[Option<Persistent<Function<'static>>>; 4]>,
    resolutions: Cell<u32>,
}

impl BridgeHandles {
    pub(crate) fn new() -> Self {
        Self {
            gate: RefCell::new(BindState::Unbound),
            handles: RefCell::new([None, None, None, None]),
            resolutions: Cell::new(0),
        }
    }

    pub(crate) fn is_bound(&self) -> bool {
        matches!(*self.gate.borrow(), BindState::Bound)
    }

    /// How many times bind resolution actually ran
    #[cfg(test)]
    pub(crate) fn resolutions(&self) -> u32 {
        self.resolutions.get()
    }

    fn function<'js>(&self, ctx: &Ctx<'js>, which: BridgeFunction) -> Result<Function<'js>> {
        let handle = self.handles.borrow()[which.slot()].clone();
        let handle = handle.ok_or_else(|| {
            JsError::invalid_state(format!("{} used before the bridge was bound", which.name()))
        })?;
        handle.restore(ctx).map_err(|e| {
            JsError::internal_error(format!("Failed to restore {}: {}", which.name(), e)).into()
        })
    }

    /// Release all handles. The gate stays closed.
    pub(crate) fn reset(&self) {
        let mut handles = self.handles.borrow_mut();
        for handle in handles.iter_mut() {
            handle.take();
        }
    }
}

/// Run bind resolution unless it already ran.
///
/// A failed resolution is remembered and reported again on every later call.
pub(crate) fn ensure_bound<'js>(ctx: &Ctx<'js>, state: &ExecutorState) -> Result<()> {
    match &*state.bridge.gate.borrow() {
        BindState::Bound => return Ok(()),
        BindState::Failed(err) => return Err(err.clone().into()),
        BindState::Unbound => {}
    }

    state.bridge.resolutions.set(state.bridge.resolutions.get() + 1);

    match resolve(ctx, state) {
        Ok(functions) => {
            *state.bridge.handles.borrow_mut() = functions.map(Some);
            *state.bridge.gate.borrow_mut() = BindState::Bound;
            info!(executor_id = %state.id, "Batched bridge bound");
            Ok(())
        }
        Err(err) => {
            warn!(executor_id = %state.id, code = %err.code, "Failed to bind batched bridge: {}", err.message);
            *state.bridge.gate.borrow_mut() = BindState::Failed(err.clone());
            Err(err.into())
        }
    }
}

fn resolve<'js>(
    ctx: &Ctx<'js>,
    state: &ExecutorState,
) -> std::result::Result<[Persistent<Function<'static>>; 4], JsError> {
    let lookup_failed = |e: rquickjs::Error| script_fault(ctx, state, e, BIND_FAILURE, None);
    let globals = ctx.globals();

    let mut bridge: Value<'js> = globals.get(BATCHED_BRIDGE_GLOBAL).map_err(lookup_failed)?;
    if !bridge.is_object() {
        let require: Value<'js> = globals
            .get(REQUIRE_BATCHED_BRIDGE_GLOBAL)
            .map_err(lookup_failed)?;
        if let Some(require) = require.as_function() {
            bridge = require.call(()).map_err(|e| {
                script_fault(ctx, state, e, "Error calling __fbRequireBatchedBridge", None)
            })?;
        }
    }

    let bridge = bridge
        .as_object()
        .ok_or_else(|| JsError::protocol_violation(BIND_FAILURE))?;

    let mut functions = Vec::with_capacity(BridgeFunction::ALL.len());
    for which in BridgeFunction::ALL {
        let value: Value<'js> = bridge.get(which.name()).map_err(lookup_failed)?;
        let function = value.as_function().ok_or_else(|| {
            JsError::protocol_violation(format!(
                "BatchedBridge.{} is not a function, make sure your bundle is packaged correctly",
                which.name()
            ))
        })?;
        functions.push(Persistent::save(ctx, function.clone()));
    }

    functions
        .try_into()
        .map_err(|_| JsError::internal_error("Bridge handle count mismatch"))
}

/// Bind if needed and call one of the bridge entry points.
///
/// `args` carries the receiver; callers pass `This(ctx.globals())` first.
pub(crate) fn call<'js, A>(
    ctx: &Ctx<'js>,
    state: &ExecutorState,
    which: BridgeFunction,
    args: A,
) -> Result<Value<'js>>
where
    A: IntoArgs<'js>,
{
    ensure_bound(ctx, state)?;
    let function = state.bridge.function(ctx, which)?;
    function.call(args).map_err(|e| {
        script_fault(ctx, state, e, &format!("Exception in {}", which.name()), None).into()
    })
}

/// Flush a value returned by the script.
///
/// Objects (the queue array) are delivered as they are, anything else as
/// `Null`.
pub(crate) fn flush_value<'js>(ctx: &Ctx<'js>, state: &ExecutorState, value: Value<'js>) -> Result<()> {
    let queue = if value.is_object() {
        from_js(ctx, value)?.unwrap_or(BridgeValue::Null)
    } else {
        BridgeValue::Null
    };
    state.deliver(queue, Delivery::Batched);
    Ok(())
}

/// Drain whatever the script has queued.
pub(crate) fn flush<'js>(ctx: &Ctx<'js>, state: &ExecutorState) -> Result<()> {
    if state.bridge.is_bound() {
        let queue = call(ctx, state, BridgeFunction::FlushedQueue, (This(ctx.globals()),))?;
        return flush_value(ctx, state, queue);
    }

    let bridge_defined = ctx
        .globals()
        .get::<_, Value<'js>>(BATCHED_BRIDGE_GLOBAL)
        .map(|value| !value.is_undefined())
        .unwrap_or(false);

    if bridge_defined {
        debug!(executor_id = %state.id, "Batched bridge found during flush");
        let queue = call(ctx, state, BridgeFunction::FlushedQueue, (This(ctx.globals()),))?;
        flush_value(ctx, state, queue)
    } else if state.delegate.is_some() {
        // No bridge, so no calls can be queued.
        state.deliver(BridgeValue::Null, Delivery::Batched);
        Ok(())
    } else {
        Ok(())
    }
}
