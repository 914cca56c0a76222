//! `nativeModuleProxy`: the object whose property reads resolve native
//! modules.
//!
//! The proxy is a script `Proxy` over an ordinary object. Its `get` trap asks
//! the executor for the module and falls back to the target's own property
//! when the registry has nothing under that name.

use super::{upgrade, HookResult, HostFunction};
use crate::engine::ExecutorState;
use rquickjs::{Ctx, Function, IntoJs, Value};
use std::rc::Weak;
use tracing::debug;

const NAME: &str = "nativeModuleProxy";

/// What `nativeModuleProxy.name` reads as
pub const NATIVE_MODULES_NAME: &str = "NativeModules";

const PROXY_FACTORY: &str = r#"(function (getModule) {
    return new Proxy({}, {
        get: function (target, name) {
            if (typeof name !== 'string') {
                return target[name];
            }
            var module = getModule(name);
            return module === undefined ? target[name] : module;
        }
    });
})"#;

/// The `nativeModuleProxy` object
pub(crate) struct NativeModuleProxy;

impl HostFunction for NativeModuleProxy {
    fn name(&self) -> &'static str {
        NAME
    }

    fn signature(&self) -> &'static str {
        "nativeModuleProxy[name: string]: object | undefined"
    }

    fn install<'js>(&self, ctx: &Ctx<'js>, state: Weak<ExecutorState>) -> rquickjs::Result<()> {
        let get_module = Function::new(ctx.clone(), move |ctx: Ctx<'js>, name: String| {
            let state = upgrade(&ctx, &state)?;
            lookup(&ctx, &state, &name).map_err(|e| e.throw(&ctx, &state))
        })?;

        let factory: Function<'js> = ctx.eval(PROXY_FACTORY)?;
        let proxy: Value<'js> = factory.call((get_module,))?;
        ctx.globals().set(NAME, proxy)
    }
}

fn lookup<'js>(ctx: &Ctx<'js>, state: &ExecutorState, name: &str) -> HookResult<Value<'js>> {
    if name == "name" {
        return Ok(NATIVE_MODULES_NAME.into_js(ctx)?);
    }

    let cache_hit = state.native_modules.contains(name);
    state.metrics.record_module_lookup(cache_hit);

    match state.native_modules.get_module(ctx, name)? {
        Some(module) => Ok(module.into_value()),
        None => {
            debug!(module = name, "Unknown native module");
            Ok(Value::new_undefined(ctx.clone()))
        }
    }
}
