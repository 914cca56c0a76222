//! `nativeCallSyncHook(moduleId, methodId, args)`: run a native method and
//! return its result within the same script turn.

use super::{expect_args, index_arg, upgrade, HookResult, HostFunction};
use crate::engine::ExecutorState;
use crate::error::JsError;
use crate::value::{from_js, to_js, BridgeValue};
use rquickjs::function::Rest;
use rquickjs::{Ctx, Function, Value};
use std::rc::Weak;
use tracing::debug;

const NAME: &str = "nativeCallSyncHook";

/// The `nativeCallSyncHook` hook
pub(crate) struct CallSyncHook;

impl HostFunction for CallSyncHook {
    fn name(&self) -> &'static str {
        NAME
    }

    fn signature(&self) -> &'static str {
        "nativeCallSyncHook(moduleId: number, methodId: number, args: array): any"
    }

    fn install<'js>(&self, ctx: &Ctx<'js>, state: Weak<ExecutorState>) -> rquickjs::Result<()> {
        let hook = Function::new(ctx.clone(), move |ctx: Ctx<'js>, args: Rest<Value<'js>>| {
            let state = upgrade(&ctx, &state)?;
            call_sync_hook(&ctx, &state, args.0).map_err(|e| e.throw(&ctx, &state))
        })?;
        ctx.globals().set(NAME, hook)
    }
}

fn call_sync_hook<'js>(
    ctx: &Ctx<'js>,
    state: &ExecutorState,
    args: Vec<Value<'js>>,
) -> HookResult<Value<'js>> {
    state.metrics.record_sync_hook_call();
    expect_args(NAME, args.len(), 3..=3)?;

    let module_id = index_arg(&args[0], "moduleId")?;
    let method_id = index_arg(&args[1], "methodId")?;

    let params = match from_js(ctx, args[2].clone())? {
        Some(BridgeValue::Array(params)) => params,
        other => {
            let kind = other.as_ref().map_or("undefined", BridgeValue::type_name);
            return Err(JsError::invalid_argument(format!(
                "method parameters should be array, but are {}",
                kind
            ))
            .into());
        }
    };

    let Some(delegate) = &state.delegate else {
        return Err(JsError::invalid_state(format!("{} called without a delegate", NAME)).into());
    };

    debug!(module_id, method_id, "Synchronous native call");
    match delegate.call_sync_hook(module_id, method_id, params) {
        Some(result) => Ok(to_js(ctx, &result)?),
        None => Ok(Value::new_undefined(ctx.clone())),
    }
}
