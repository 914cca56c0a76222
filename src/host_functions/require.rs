//! `nativeRequire(moduleId[, bundleId])`: load one module from the bundle
//! registry and run it.

use super::{expect_args, index_arg, upgrade, HookResult, HostFunction};
use crate::bundle::MAIN_BUNDLE_ID;
use crate::engine::{eval_program, script_fault, ExecutorState};
use crate::error::JsError;
use rquickjs::function::Rest;
use rquickjs::{Ctx, Function, Value};
use std::rc::Weak;
use tracing::debug;

const NAME: &str = "nativeRequire";

/// The `nativeRequire` hook
pub(crate) struct NativeRequire;

impl HostFunction for NativeRequire {
    fn name(&self) -> &'static str {
        NAME
    }

    fn signature(&self) -> &'static str {
        "nativeRequire(moduleId: number, bundleId?: number): undefined"
    }

    fn install<'js>(&self, ctx: &Ctx<'js>, state: Weak<ExecutorState>) -> rquickjs::Result<()> {
        let hook = Function::new(ctx.clone(), move |ctx: Ctx<'js>, args: Rest<Value<'js>>| {
            let state = upgrade(&ctx, &state)?;
            native_require(&ctx, &state, args.0).map_err(|e| e.throw(&ctx, &state))
        })?;
        ctx.globals().set(NAME, hook)
    }
}

fn native_require<'js>(ctx: &Ctx<'js>, state: &ExecutorState, args: Vec<Value<'js>>) -> HookResult<()> {
    state.metrics.record_native_require();
    expect_args(NAME, args.len(), 1..=2)?;

    let module_id = index_arg(&args[0], "moduleId")?;
    let bundle_id = match args.get(1) {
        Some(value) if !value.is_undefined() => index_arg(value, "bundleId")?,
        _ => MAIN_BUNDLE_ID,
    };

    load_module(ctx, state, bundle_id, module_id)
}

/// Resolve a module from the bundle registry and run it.
///
/// Without a bundle registry this does nothing. Unlike a loaded application
/// script, a module does not flush the queue.
pub(crate) fn load_module<'js>(
    ctx: &Ctx<'js>,
    state: &ExecutorState,
    bundle_id: u32,
    module_id: u32,
) -> HookResult<()> {
    let registry = state.bundle_registry.borrow().clone();
    let Some(registry) = registry else {
        debug!(bundle_id, module_id, "No bundle registry, ignoring module request");
        return Ok(());
    };

    let module = registry.get_module(bundle_id, module_id).ok_or_else(|| {
        JsError::invalid_argument(format!(
            "Module {} not found in bundle {}",
            module_id, bundle_id
        ))
    })?;

    debug!(bundle_id, module_id, name = %module.name, "Loading module");
    eval_program(ctx, &module.code).map_err(|e| {
        script_fault(ctx, state, e, "Error executing module", Some(&module.name))
    })?;
    Ok(())
}
