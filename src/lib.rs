//! # Nexus JS Bridge
//!
//! This library runs application scripts in an embedded QuickJS engine and
//! carries native-module traffic between the scripts and the host through a
//! batched call queue.
//!
//! ## Architecture
//!
//! ```text
//! Host (ExecutorDelegate, ModuleRegistry, BundleRegistry)
//!     │
//!     │ ExecutorHandle (any thread)
//!     ▼
//! MessageQueueThread ── JsExecutor (engine thread)
//!     │
//!     │ bridge entry points / native hooks
//!     ▼
//! QuickJS context (__fbBatchedBridge, nativeModuleProxy, ...)
//! ```
//!
//! ## Features
//!
//! - **Batched calls**: script-side calls to native modules accumulate in a
//!   queue that is flushed back to the host once per operation
//! - **Lazy module proxies**: `nativeModuleProxy.Name` builds and caches a
//!   module object on first access
//! - **Bundle loading**: `nativeRequire` runs modules from a bundle registry
//! - **Thread affinity**: the engine is only touched from its own thread
//! - **Deterministic teardown**: executors must be destroyed explicitly

#![deny(missing_docs)]

pub mod batch;
pub mod bundle;
pub mod config;
pub mod delegate;
pub mod engine;
pub mod error;
pub mod host_functions;
pub mod metrics;
pub mod modules;
pub mod value;

// Re-export commonly used types
pub use batch::{parse_method_calls, MethodCall};
pub use bundle::{BundleModule, BundleRegistry, DirectoryBundle, RamBundleRegistry, MAIN_BUNDLE_ID};
pub use config::ExecutorConfig;
pub use delegate::{Delivery, ExecutorDelegate};
pub use engine::handle::ExecutorHandle;
pub use engine::queue::{run_on_queue_sync, MessageQueueThread, QueueThread};
pub use engine::{JsExecutor, MemoryPressure};
pub use error::{BridgeError, ErrorCode, JsError};
pub use metrics::{BridgeMetrics, ExecutorStats};
pub use modules::{
    MethodKind, ModuleConfig, ModuleRegistry, NativeModuleDescriptor, StaticModuleRegistry,
};
pub use value::BridgeValue;

/// A minimal batched bridge script defining `__fbBatchedBridge`,
/// `__fbRequireBatchedBridge` and `__fbGenNativeModule`, for bundles that do
/// not bring their own.
pub const BATCHED_BRIDGE_PRELUDE: &str = include_str!("batched_bridge.js");

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Install a `tracing` subscriber honoring `RUST_LOG`, defaulting to
/// `nexus_js_bridge=debug`. Does nothing if a subscriber is already set.
pub fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("nexus_js_bridge=debug"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, "1.0.0");
    }

    #[test]
    fn test_prelude_loaded() {
        assert!(!BATCHED_BRIDGE_PRELUDE.is_empty());
        assert!(BATCHED_BRIDGE_PRELUDE.contains(engine::BATCHED_BRIDGE_GLOBAL));
        assert!(BATCHED_BRIDGE_PRELUDE.contains(engine::REQUIRE_BATCHED_BRIDGE_GLOBAL));
        assert!(BATCHED_BRIDGE_PRELUDE.contains(modules::native_modules::GEN_NATIVE_MODULE_GLOBAL));
    }

    #[test]
    fn test_init_logging_twice() {
        init_logging();
        init_logging();
    }
}
