//! Turning engine exceptions into [`JsError`]s.

use super::state::ExecutorState;
use crate::error::JsError;
use rquickjs::context::EvalOptions;
use rquickjs::convert::Coerced;
use rquickjs::{Ctx, Value};

/// File name the engine records for every evaluated source
const ENGINE_SOURCE_NAME: &str = "eval_script:";

/// Run `source` as a non-strict global program
pub(crate) fn eval_program<'js>(ctx: &Ctx<'js>, source: &str) -> rquickjs::Result<()> {
    let options = EvalOptions {
        global: true,
        strict: false,
        backtrace_barrier: false,
    };
    ctx.eval_with_options(source, options)
}

/// An exception taken out of the engine
#[derive(Debug, Clone, Default)]
pub(crate) struct CaughtException {
    /// `"Name: message"`, or the stringified thrown value
    pub text: String,
    /// The `message` property, when an error object was thrown
    pub message: Option<String>,
    /// The `stack` property, when present
    pub stack: Option<String>,
}

/// Take the pending exception for `err` out of the context.
///
/// Non-exception errors (type conversion, allocation) are described by their
/// own display text.
pub(crate) fn catch_exception<'js>(ctx: &Ctx<'js>, err: rquickjs::Error) -> CaughtException {
    if !matches!(err, rquickjs::Error::Exception) {
        return CaughtException {
            text: err.to_string(),
            ..CaughtException::default()
        };
    }
    describe(ctx.catch())
}

/// Text of the exception behind `err`
pub(crate) fn exception_text<'js>(ctx: &Ctx<'js>, err: rquickjs::Error) -> String {
    catch_exception(ctx, err).text
}

fn describe(value: Value<'_>) -> CaughtException {
    if let Some(object) = value.as_object() {
        let name: Option<String> = object.get("name").ok().flatten();
        let message: Option<String> = object.get("message").ok().flatten();
        let stack: Option<String> = object.get("stack").ok().flatten();

        if message.is_some() || name.is_some() {
            let text = match (&name, &message) {
                (Some(name), Some(message)) if !message.is_empty() => format!("{}: {}", name, message),
                (Some(name), _) => name.clone(),
                (None, Some(message)) => message.clone(),
                (None, None) => String::new(),
            };
            return CaughtException {
                text,
                message,
                stack: stack.filter(|s| !s.is_empty()),
            };
        }
    }

    let text = value
        .get::<Coerced<String>>()
        .map(|coerced| coerced.0)
        .unwrap_or_else(|_| "<unprintable exception>".to_string());
    CaughtException {
        text,
        message: None,
        stack: None,
    }
}

/// Build the error a failed engine call reports to the host.
///
/// When the exception is one a native hook raised during this turn, the
/// hook's own error comes back with its kind. Anything else is a script
/// fault: `ExecutionError` with `what` as message and the engine text as
/// `JsException` cause.
pub(crate) fn script_fault<'js>(
    ctx: &Ctx<'js>,
    state: &ExecutorState,
    err: rquickjs::Error,
    what: &str,
    source_url: Option<&str>,
) -> JsError {
    let caught = catch_exception(ctx, err);

    if let Some(hook_error) = state.take_pending_error(caught.message.as_deref()) {
        return hook_error;
    }

    let mut cause = JsError::js_exception(caught.text);
    if let Some(stack) = caught.stack {
        let stack = match source_url {
            Some(url) => stack.replace(ENGINE_SOURCE_NAME, &format!("{}:", url)),
            None => stack,
        };
        cause = cause.with_stack(stack);
    }

    let mut fault = JsError::execution_error(what).with_cause(cause);
    if let Some(url) = source_url {
        fault = fault.with_source_url(url);
    }
    fault
}

#[cfg(test)]
mod tests {
    use super::*;
    use rquickjs::{Context, Runtime};

    fn caught(source: &str) -> CaughtException {
        let runtime = Runtime::new().unwrap();
        let context = Context::full(&runtime).unwrap();
        context.with(|ctx| {
            let err = ctx.eval::<(), _>(source).unwrap_err();
            catch_exception(&ctx, err)
        })
    }

    #[test]
    fn test_error_object() {
        let exception = caught("null.foo");
        assert!(exception.text.starts_with("TypeError"));
        assert!(exception.message.is_some());
    }

    #[test]
    fn test_thrown_primitive() {
        let exception = caught("throw 42");
        assert_eq!(exception.text, "42");
        assert!(exception.message.is_none());
        assert!(exception.stack.is_none());
    }

    #[test]
    fn test_eval_program_is_sloppy() {
        let runtime = Runtime::new().unwrap();
        let context = Context::full(&runtime).unwrap();
        context.with(|ctx| {
            eval_program(&ctx, "undeclared = 5; var self_ref = this === globalThis;").unwrap();
            assert_eq!(ctx.globals().get::<_, i32>("undeclared").unwrap(), 5);
            assert!(ctx.globals().get::<_, bool>("self_ref").unwrap());
        });
    }

    #[test]
    fn test_custom_error() {
        let exception = caught("throw new RangeError('out of range')");
        assert_eq!(exception.text, "RangeError: out of range");
        assert_eq!(exception.message.as_deref(), Some("out of range"));
    }
}
