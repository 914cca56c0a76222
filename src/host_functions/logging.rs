//! `nativeLoggingHook(message, level)`: script logging.
//!
//! Script log lines go to `tracing` under the `nexus_js_bridge::js` target,
//! tagged with the executor's context name.

use super::{upgrade, HostFunction};
use crate::config::DEFAULT_SCRIPT_LOG_TARGET;
use crate::engine::ExecutorState;
use rquickjs::convert::Coerced;
use rquickjs::function::Rest;
use rquickjs::{Ctx, Function, Value};
use serde::{Deserialize, Serialize};
use std::rc::Weak;

const NAME: &str = "nativeLoggingHook";

/// Log level passed by scripts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptLogLevel {
    /// Debug level (0)
    Debug,
    /// Info level (1)
    Info,
    /// Warning level (2)
    Warn,
    /// Error level (3 and above)
    Error,
}

impl From<i32> for ScriptLogLevel {
    fn from(level: i32) -> Self {
        match level {
            i32::MIN..=0 => ScriptLogLevel::Debug,
            1 => ScriptLogLevel::Info,
            2 => ScriptLogLevel::Warn,
            _ => ScriptLogLevel::Error,
        }
    }
}

impl ScriptLogLevel {
    /// Lowercase level name
    pub fn as_str(self) -> &'static str {
        match self {
            ScriptLogLevel::Debug => "debug",
            ScriptLogLevel::Info => "info",
            ScriptLogLevel::Warn => "warn",
            ScriptLogLevel::Error => "error",
        }
    }
}

/// Emit one script log line
pub fn log(context: &str, level: ScriptLogLevel, message: &str) {
    match level {
        ScriptLogLevel::Debug => {
            tracing::debug!(target: DEFAULT_SCRIPT_LOG_TARGET, context = %context, "{}", message)
        }
        ScriptLogLevel::Info => {
            tracing::info!(target: DEFAULT_SCRIPT_LOG_TARGET, context = %context, "{}", message)
        }
        ScriptLogLevel::Warn => {
            tracing::warn!(target: DEFAULT_SCRIPT_LOG_TARGET, context = %context, "{}", message)
        }
        ScriptLogLevel::Error => {
            tracing::error!(target: DEFAULT_SCRIPT_LOG_TARGET, context = %context, "{}", message)
        }
    }
}

/// The `nativeLoggingHook` hook
pub(crate) struct LoggingHook;

impl HostFunction for LoggingHook {
    fn name(&self) -> &'static str {
        NAME
    }

    fn signature(&self) -> &'static str {
        "nativeLoggingHook(message: string, level?: number): undefined"
    }

    fn install<'js>(&self, ctx: &Ctx<'js>, state: Weak<ExecutorState>) -> rquickjs::Result<()> {
        let hook = Function::new(ctx.clone(), move |ctx: Ctx<'js>, args: Rest<Value<'js>>| {
            let state = upgrade(&ctx, &state)?;
            let mut args = args.0.into_iter();

            let message = match args.next() {
                Some(value) => value.get::<Coerced<String>>()?.0,
                None => String::new(),
            };
            let level = args
                .next()
                .and_then(|value| value.as_number())
                .map(|n| ScriptLogLevel::from(n as i32))
                .unwrap_or(ScriptLogLevel::Debug);

            state.metrics.record_script_log(level.as_str());
            log(&state.context_name(), level, &message);
            Ok::<_, rquickjs::Error>(())
        })?;
        ctx.globals().set(NAME, hook)
    }
}
