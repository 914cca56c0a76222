//! Host-side sink for calls coming out of the engine.

use crate::modules::ModuleRegistry;
use crate::value::BridgeValue;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// How a queue reached the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Delivery {
    /// Drained at the end of a host operation (`flush`)
    Batched,
    /// Pushed by the script mid-turn through `nativeFlushQueueImmediate`
    Immediate,
}

impl Delivery {
    /// Whether this delivery ends a host operation
    pub fn is_batched(self) -> bool {
        matches!(self, Delivery::Batched)
    }
}

/// Receives native-module traffic produced by scripts.
///
/// Implementations are called on the engine thread while a script turn is in
/// progress. They must not call back into the same executor synchronously.
pub trait ExecutorDelegate: Send + Sync {
    /// Receive a flushed call queue.
    ///
    /// `queue` is normally the `[moduleIds, methodIds, params, callId]` array
    /// (see [`crate::batch::parse_method_calls`]), or `Null` when the script
    /// produced nothing.
    fn call_native_modules(&self, queue: BridgeValue, delivery: Delivery);

    /// Run a synchronous native method for `nativeCallSyncHook`.
    ///
    /// Returning `None` hands `undefined` back to the script.
    fn call_sync_hook(&self, module_id: u32, method_id: u32, args: Vec<BridgeValue>)
        -> Option<BridgeValue>;

    /// Registry backing `nativeModuleProxy`, if any
    fn module_registry(&self) -> Option<Arc<dyn ModuleRegistry>> {
        None
    }
}
