//! `nativePerformanceNow()`: monotonic milliseconds for `performance.now()`.

use super::HostFunction;
use crate::engine::ExecutorState;
use once_cell::sync::Lazy;
use rquickjs::{Ctx, Function};
use std::rc::Weak;
use std::time::Instant;

const NAME: &str = "nativePerformanceNow";

static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Milliseconds since the first call in this process, with sub-millisecond
/// precision. Never goes backwards.
pub fn now_ms() -> f64 {
    EPOCH.elapsed().as_secs_f64() * 1000.0
}

/// The `nativePerformanceNow` hook
pub(crate) struct PerformanceNow;

impl HostFunction for PerformanceNow {
    fn name(&self) -> &'static str {
        NAME
    }

    fn signature(&self) -> &'static str {
        "nativePerformanceNow(): number"
    }

    fn install<'js>(&self, ctx: &Ctx<'js>, _state: Weak<ExecutorState>) -> rquickjs::Result<()> {
        let hook = Function::new(ctx.clone(), now_ms)?;
        ctx.globals().set(NAME, hook)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_now_is_monotonic() {
        let first = now_ms();
        std::thread::sleep(Duration::from_millis(2));
        let second = now_ms();
        assert!(second >= first + 1.0);
    }
}
