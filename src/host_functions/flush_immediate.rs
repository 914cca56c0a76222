//! `nativeFlushQueueImmediate(queue)`: hand the queue to the host mid-turn.

use super::{expect_args, js_type_name, upgrade, HookResult, HostFunction};
use crate::delegate::Delivery;
use crate::engine::ExecutorState;
use crate::error::JsError;
use crate::value::{from_js, BridgeValue};
use rquickjs::function::Rest;
use rquickjs::{Ctx, Function, Value};
use std::rc::Weak;

const NAME: &str = "nativeFlushQueueImmediate";

/// The `nativeFlushQueueImmediate` hook
pub(crate) struct FlushQueueImmediate;

impl HostFunction for FlushQueueImmediate {
    fn name(&self) -> &'static str {
        NAME
    }

    fn signature(&self) -> &'static str {
        "nativeFlushQueueImmediate(queue: object): undefined"
    }

    fn install<'js>(&self, ctx: &Ctx<'js>, state: Weak<ExecutorState>) -> rquickjs::Result<()> {
        let hook = Function::new(ctx.clone(), move |ctx: Ctx<'js>, args: Rest<Value<'js>>| {
            let state = upgrade(&ctx, &state)?;
            flush_queue_immediate(&ctx, &state, args.0).map_err(|e| e.throw(&ctx, &state))
        })?;
        ctx.globals().set(NAME, hook)
    }
}

fn flush_queue_immediate<'js>(
    ctx: &Ctx<'js>,
    state: &ExecutorState,
    args: Vec<Value<'js>>,
) -> HookResult<()> {
    expect_args(NAME, args.len(), 1..=1)?;
    let queue = args.into_iter().next().unwrap_or_else(|| Value::new_undefined(ctx.clone()));

    if !queue.is_object() {
        return Err(JsError::invalid_argument(format!(
            "{} expects the call queue, got {}",
            NAME,
            js_type_name(&queue)
        ))
        .into());
    }

    let queue = from_js(ctx, queue)?.unwrap_or(BridgeValue::Null);
    state.deliver(queue, Delivery::Immediate);
    Ok(())
}
