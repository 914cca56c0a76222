//! Bridge metrics for monitoring and observability.
//!
//! This module provides types for collecting and reporting metrics about
//! bridge traffic: operations issued by the host, flushes delivered back to
//! it, native hook calls made by scripts, and module cache behavior.

use crate::delegate::Delivery;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Point-in-time view of one executor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutorStats {
    /// Executor id
    pub executor_id: String,

    /// Context name used in logs
    pub context_name: String,

    /// Whether the bridge entry points have been bound
    pub bridge_bound: bool,

    /// Number of module proxies currently cached
    pub cached_modules: usize,

    /// Bytes in use by the engine allocator
    pub memory_used_bytes: u64,

    /// Bytes requested from the system allocator
    pub malloc_bytes: u64,

    /// Live engine objects
    pub object_count: u64,

    /// Whether `destroy()` has run
    pub destroyed: bool,
}

/// Metrics collector for aggregating bridge metrics
pub struct BridgeMetrics {
    function_calls: AtomicU64,
    callbacks_invoked: AtomicU64,
    sync_function_calls: AtomicU64,
    scripts_loaded: AtomicU64,
    batched_flushes: AtomicU64,
    immediate_flushes: AtomicU64,
    sync_hook_calls: AtomicU64,
    native_requires: AtomicU64,
    module_cache_hits: AtomicU64,
    module_cache_misses: AtomicU64,
    total_operations: AtomicU64,
    total_operation_time_us: AtomicU64,
    script_logs: parking_lot::Mutex<HashMap<String, u64>>,
    error_counts: parking_lot::Mutex<HashMap<String, u64>>,
}

impl BridgeMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            function_calls: AtomicU64::new(0),
            callbacks_invoked: AtomicU64::new(0),
            sync_function_calls: AtomicU64::new(0),
            scripts_loaded: AtomicU64::new(0),
            batched_flushes: AtomicU64::new(0),
            immediate_flushes: AtomicU64::new(0),
            sync_hook_calls: AtomicU64::new(0),
            native_requires: AtomicU64::new(0),
            module_cache_hits: AtomicU64::new(0),
            module_cache_misses: AtomicU64::new(0),
            total_operations: AtomicU64::new(0),
            total_operation_time_us: AtomicU64::new(0),
            script_logs: parking_lot::Mutex::new(HashMap::new()),
            error_counts: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Record a `callFunction` from the host
    pub fn record_function_call(&self) {
        self.function_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an `invokeCallback` from the host
    pub fn record_callback(&self) {
        self.callbacks_invoked.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a synchronous function call from the host
    pub fn record_sync_function_call(&self) {
        self.sync_function_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a loaded application script
    pub fn record_script_loaded(&self) {
        self.scripts_loaded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a queue delivered to the host
    pub fn record_flush(&self, delivery: Delivery) {
        match delivery {
            Delivery::Batched => self.batched_flushes.fetch_add(1, Ordering::Relaxed),
            Delivery::Immediate => self.immediate_flushes.fetch_add(1, Ordering::Relaxed),
        };
    }

    /// Record a `nativeCallSyncHook` call
    pub fn record_sync_hook_call(&self) {
        self.sync_hook_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a `nativeRequire` call
    pub fn record_native_require(&self) {
        self.native_requires.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a module proxy lookup
    pub fn record_module_lookup(&self, cache_hit: bool) {
        if cache_hit {
            self.module_cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.module_cache_misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record the duration of one host operation
    pub fn record_operation(&self, duration: Duration) {
        self.total_operations.fetch_add(1, Ordering::Relaxed);
        self.total_operation_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Record a script log line
    pub fn record_script_log(&self, level: &str) {
        let mut logs = self.script_logs.lock();
        *logs.entry(level.to_string()).or_insert(0) += 1;
    }

    /// Record an error
    pub fn record_error(&self, error_code: &str) {
        let mut counts = self.error_counts.lock();
        *counts.entry(error_code.to_string()).or_insert(0) += 1;
    }

    /// Get `callFunction` count
    pub fn function_calls(&self) -> u64 {
        self.function_calls.load(Ordering::Relaxed)
    }

    /// Get `invokeCallback` count
    pub fn callbacks_invoked(&self) -> u64 {
        self.callbacks_invoked.load(Ordering::Relaxed)
    }

    /// Get synchronous function call count
    pub fn sync_function_calls(&self) -> u64 {
        self.sync_function_calls.load(Ordering::Relaxed)
    }

    /// Get loaded script count
    pub fn scripts_loaded(&self) -> u64 {
        self.scripts_loaded.load(Ordering::Relaxed)
    }

    /// Get batched delivery count
    pub fn batched_flushes(&self) -> u64 {
        self.batched_flushes.load(Ordering::Relaxed)
    }

    /// Get immediate delivery count
    pub fn immediate_flushes(&self) -> u64 {
        self.immediate_flushes.load(Ordering::Relaxed)
    }

    /// Get `nativeCallSyncHook` count
    pub fn sync_hook_calls(&self) -> u64 {
        self.sync_hook_calls.load(Ordering::Relaxed)
    }

    /// Get `nativeRequire` count
    pub fn native_requires(&self) -> u64 {
        self.native_requires.load(Ordering::Relaxed)
    }

    /// Get module cache hit rate
    pub fn module_cache_hit_rate(&self) -> f64 {
        let hits = self.module_cache_hits.load(Ordering::Relaxed);
        let misses = self.module_cache_misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Get average host operation time in microseconds
    pub fn avg_operation_time_us(&self) -> f64 {
        let total = self.total_operations.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            self.total_operation_time_us.load(Ordering::Relaxed) as f64 / total as f64
        }
    }

    /// Get script log counts by level
    pub fn script_logs(&self) -> HashMap<String, u64> {
        self.script_logs.lock().clone()
    }

    /// Get error counts
    pub fn error_counts(&self) -> HashMap<String, u64> {
        self.error_counts.lock().clone()
    }

    /// Reset all metrics
    pub fn reset(&self) {
        for counter in [
            &self.function_calls,
            &self.callbacks_invoked,
            &self.sync_function_calls,
            &self.scripts_loaded,
            &self.batched_flushes,
            &self.immediate_flushes,
            &self.sync_hook_calls,
            &self.native_requires,
            &self.module_cache_hits,
            &self.module_cache_misses,
            &self.total_operations,
            &self.total_operation_time_us,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.script_logs.lock().clear();
        self.error_counts.lock().clear();
    }

    /// Export Prometheus-format metrics
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP nexus_bridge_operations_total Host operations by kind\n");
        output.push_str("# TYPE nexus_bridge_operations_total counter\n");
        for (kind, count) in [
            ("call_function", self.function_calls()),
            ("invoke_callback", self.callbacks_invoked()),
            ("call_function_sync", self.sync_function_calls()),
            ("load_script", self.scripts_loaded()),
        ] {
            output.push_str(&format!(
                "nexus_bridge_operations_total{{kind=\"{}\"}} {}\n",
                kind, count
            ));
        }

        output.push_str("\n# HELP nexus_bridge_flushes_total Queues delivered to the host\n");
        output.push_str("# TYPE nexus_bridge_flushes_total counter\n");
        output.push_str(&format!(
            "nexus_bridge_flushes_total{{delivery=\"batched\"}} {}\n",
            self.batched_flushes()
        ));
        output.push_str(&format!(
            "nexus_bridge_flushes_total{{delivery=\"immediate\"}} {}\n",
            self.immediate_flushes()
        ));

        output.push_str("\n# HELP nexus_bridge_hook_calls_total Native hook calls from scripts\n");
        output.push_str("# TYPE nexus_bridge_hook_calls_total counter\n");
        output.push_str(&format!(
            "nexus_bridge_hook_calls_total{{hook=\"nativeCallSyncHook\"}} {}\n",
            self.sync_hook_calls()
        ));
        output.push_str(&format!(
            "nexus_bridge_hook_calls_total{{hook=\"nativeRequire\"}} {}\n",
            self.native_requires()
        ));

        output.push_str("\n# HELP nexus_bridge_operation_time_us Average operation time\n");
        output.push_str("# TYPE nexus_bridge_operation_time_us gauge\n");
        output.push_str(&format!(
            "nexus_bridge_operation_time_us {:.2}\n",
            self.avg_operation_time_us()
        ));

        output.push_str("\n# HELP nexus_bridge_module_cache_hit_rate Module proxy cache hit rate\n");
        output.push_str("# TYPE nexus_bridge_module_cache_hit_rate gauge\n");
        output.push_str(&format!(
            "nexus_bridge_module_cache_hit_rate {:.4}\n",
            self.module_cache_hit_rate()
        ));

        output.push_str("\n# HELP nexus_bridge_script_logs_total Script log lines by level\n");
        output.push_str("# TYPE nexus_bridge_script_logs_total counter\n");
        for (level, count) in self.script_logs() {
            output.push_str(&format!(
                "nexus_bridge_script_logs_total{{level=\"{}\"}} {}\n",
                level, count
            ));
        }

        output.push_str("\n# HELP nexus_bridge_errors_total Error counts by code\n");
        output.push_str("# TYPE nexus_bridge_errors_total counter\n");
        for (code, count) in self.error_counts() {
            output.push_str(&format!(
                "nexus_bridge_errors_total{{code=\"{}\"}} {}\n",
                code, count
            ));
        }

        output
    }
}

impl Default for BridgeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Timer for measuring host operation duration
pub struct OperationTimer {
    start: Instant,
}

impl OperationTimer {
    /// Start a new timer
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed time
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and record into `metrics`
    pub fn finish(self, metrics: &BridgeMetrics) {
        metrics.record_operation(self.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flush_counters() {
        let metrics = BridgeMetrics::new();
        metrics.record_flush(Delivery::Batched);
        metrics.record_flush(Delivery::Batched);
        metrics.record_flush(Delivery::Immediate);

        assert_eq!(metrics.batched_flushes(), 2);
        assert_eq!(metrics.immediate_flushes(), 1);
    }

    #[test]
    fn test_module_cache_hit_rate() {
        let metrics = BridgeMetrics::new();
        assert_eq!(metrics.module_cache_hit_rate(), 0.0);

        metrics.record_module_lookup(false);
        metrics.record_module_lookup(true);
        metrics.record_module_lookup(true);

        assert!((metrics.module_cache_hit_rate() - 0.666).abs() < 0.01);
    }

    #[test]
    fn test_reset() {
        let metrics = BridgeMetrics::new();
        metrics.record_function_call();
        metrics.record_error("INVALID_ARGUMENT");
        metrics.record_script_log("warn");

        metrics.reset();

        assert_eq!(metrics.function_calls(), 0);
        assert!(metrics.error_counts().is_empty());
        assert!(metrics.script_logs().is_empty());
    }

    #[test]
    fn test_prometheus_output() {
        let metrics = BridgeMetrics::new();
        metrics.record_function_call();
        metrics.record_error("PROTOCOL_VIOLATION");

        let output = metrics.to_prometheus();
        assert!(output.contains("nexus_bridge_operations_total{kind=\"call_function\"} 1"));
        assert!(output.contains("nexus_bridge_errors_total{code=\"PROTOCOL_VIOLATION\"} 1"));
        assert!(output.contains("nexus_bridge_module_cache_hit_rate"));
    }

    #[test]
    fn test_operation_timer() {
        let metrics = BridgeMetrics::new();
        let timer = OperationTimer::start();
        std::thread::sleep(Duration::from_millis(5));
        assert!(timer.elapsed() >= Duration::from_millis(5));
        timer.finish(&metrics);
        assert!(metrics.avg_operation_time_us() >= 5_000.0);
    }
}
