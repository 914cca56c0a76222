//! Native hooks installed into the script global object.
//!
//! Each hook holds a `Weak` reference to the executor state. Errors a hook
//! raises itself are recorded on the state before being thrown, so the host
//! operation that was running reports them with their own kind instead of
//! as a generic script fault.

pub mod flush_immediate;
pub mod logging;
pub mod module_proxy;
pub mod performance;
pub mod require;
pub mod sync_hook;

use crate::config::ExecutorConfig;
use crate::engine::ExecutorState;
use crate::error::{BridgeError, JsError};
use rquickjs::{Ctx, Exception, Value};
use std::rc::{Rc, Weak};

/// Error inside a native hook
pub(crate) enum HookError {
    /// An engine exception, already pending in the context
    Js(rquickjs::Error),
    /// An error raised by the hook itself
    Host(JsError),
}

impl From<rquickjs::Error> for HookError {
    fn from(e: rquickjs::Error) -> Self {
        HookError::Js(e)
    }
}

impl From<JsError> for HookError {
    fn from(e: JsError) -> Self {
        HookError::Host(e)
    }
}

impl From<BridgeError> for HookError {
    fn from(e: BridgeError) -> Self {
        HookError::Host(e.to_js_error())
    }
}

impl HookError {
    /// Turn into the exception handed back to the engine
    pub(crate) fn throw<'js>(self, ctx: &Ctx<'js>, state: &ExecutorState) -> rquickjs::Error {
        match self {
            HookError::Js(e) => e,
            HookError::Host(err) => state.raise(ctx, err),
        }
    }
}

/// Result type for hook bodies
pub(crate) type HookResult<T> = std::result::Result<T, HookError>;

/// A native hook installed on the global object
pub(crate) trait HostFunction {
    /// The global name (e.g., "nativeRequire")
    fn name(&self) -> &'static str;

    /// The function signature description
    fn signature(&self) -> &'static str;

    /// Install the hook into `ctx`
    fn install<'js>(&self, ctx: &Ctx<'js>, state: Weak<ExecutorState>) -> rquickjs::Result<()>;
}

/// Hooks enabled by `config`, in installation order
pub(crate) fn enabled_hooks(config: &ExecutorConfig) -> Vec<&'static dyn HostFunction> {
    let mut hooks: Vec<&'static dyn HostFunction> = vec![
        &flush_immediate::FlushQueueImmediate,
        &sync_hook::CallSyncHook,
        &require::NativeRequire,
        &module_proxy::NativeModuleProxy,
    ];
    if config.enable_logging_hook {
        hooks.push(&logging::LoggingHook);
    }
    if config.enable_performance_now {
        hooks.push(&performance::PerformanceNow);
    }
    hooks
}

/// Install every enabled hook
pub(crate) fn install<'js>(
    ctx: &Ctx<'js>,
    state: &Rc<ExecutorState>,
    config: &ExecutorConfig,
) -> rquickjs::Result<()> {
    for hook in enabled_hooks(config) {
        hook.install(ctx, Rc::downgrade(state))?;
        tracing::trace!(hook = hook.name(), "Installed native hook");
    }
    Ok(())
}

/// Get the state back from a hook's weak reference
pub(crate) fn upgrade<'js>(ctx: &Ctx<'js>, state: &Weak<ExecutorState>) -> rquickjs::Result<Rc<ExecutorState>> {
    state
        .upgrade()
        .ok_or_else(|| Exception::throw_message(ctx, "The executor has been destroyed"))
}

/// `typeof`-style name of a script value, for error messages
pub(crate) fn js_type_name(value: &Value<'_>) -> &'static str {
    if value.is_undefined() {
        "undefined"
    } else if value.is_null() {
        "null"
    } else if value.is_bool() {
        "boolean"
    } else if value.is_number() {
        "number"
    } else if value.is_string() {
        "string"
    } else if value.is_array() {
        "array"
    } else if value.is_function() {
        "function"
    } else if value.is_object() {
        "object"
    } else {
        "unknown"
    }
}

/// Read a non-negative integer argument
pub(crate) fn index_arg(value: &Value<'_>, what: &str) -> HookResult<u32> {
    match value.as_number() {
        Some(n) if n >= 0.0 && n.fract() == 0.0 && n <= u32::MAX as f64 => Ok(n as u32),
        _ => Err(JsError::invalid_argument(format!(
            "{} must be a non-negative integer, got {}",
            what,
            js_type_name(value)
        ))
        .into()),
    }
}

/// Check a hook's argument count
pub(crate) fn expect_args(hook: &str, got: usize, allowed: std::ops::RangeInclusive<usize>) -> HookResult<()> {
    if allowed.contains(&got) {
        Ok(())
    } else if allowed.start() == allowed.end() {
        Err(JsError::invalid_argument(format!(
            "{} expects {} argument(s), got {}",
            hook,
            allowed.start(),
            got
        ))
        .into())
    } else {
        Err(JsError::invalid_argument(format!(
            "{} expects {} to {} arguments, got {}",
            hook,
            allowed.start(),
            allowed.end(),
            got
        ))
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enabled_hooks() {
        let all = enabled_hooks(&ExecutorConfig::default());
        let names: Vec<&str> = all.iter().map(|hook| hook.name()).collect();
        assert_eq!(
            names,
            vec![
                "nativeFlushQueueImmediate",
                "nativeCallSyncHook",
                "nativeRequire",
                "nativeModuleProxy",
                "nativeLoggingHook",
                "nativePerformanceNow",
            ]
        );

        let config = ExecutorConfig::default()
            .with_logging_hook(false)
            .with_performance_now(false);
        assert_eq!(enabled_hooks(&config).len(), 4);
    }

    #[test]
    fn test_expect_args() {
        assert!(expect_args("nativeRequire", 1, 1..=2).is_ok());
        assert!(expect_args("nativeRequire", 2, 1..=2).is_ok());
        match expect_args("nativeRequire", 3, 1..=2) {
            Err(HookError::Host(err)) => assert!(err.message.contains("1 to 2")),
            _ => panic!("expected an argument error"),
        }
        match expect_args("nativeFlushQueueImmediate", 0, 1..=1) {
            Err(HookError::Host(err)) => assert!(err.message.contains("expects 1 argument")),
            _ => panic!("expected an argument error"),
        }
    }
}
