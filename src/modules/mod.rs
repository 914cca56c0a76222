//! Native module registry.
//!
//! The executor only needs one thing from the registry: the config array and
//! index that `__fbGenNativeModule` turns into a script-side module proxy.
//! [`StaticModuleRegistry`] builds those from plain module descriptors.

pub mod native_modules;

pub use native_modules::NativeModules;

use crate::value::BridgeValue;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

/// Config handed to the script-side module generator
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleConfig {
    /// `[name, constants, methodNames?, promiseIds?, syncIds?]`
    pub config: BridgeValue,
    /// Numeric module id used in call queues
    pub index: u32,
}

/// Source of native module configs.
pub trait ModuleRegistry: Send + Sync {
    /// Look up the config for a module by name
    fn get_config(&self, name: &str) -> Option<ModuleConfig>;
}

/// How a native method returns to the script
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MethodKind {
    /// Fire-and-forget, results come back through callbacks
    Async,
    /// Returns a promise
    Promise,
    /// Runs through `nativeCallSyncHook`
    Sync,
}

/// A method exposed by a native module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodDescriptor {
    /// Method name
    pub name: String,
    /// Calling convention
    pub kind: MethodKind,
}

impl MethodDescriptor {
    /// Create a method descriptor
    pub fn new(name: impl Into<String>, kind: MethodKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// A native module as the registry knows it
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeModuleDescriptor {
    /// Module name as seen by scripts
    pub name: String,
    /// Constants exported to scripts
    #[serde(default)]
    pub constants: HashMap<String, BridgeValue>,
    /// Exported methods, in method-id order
    #[serde(default)]
    pub methods: Vec<MethodDescriptor>,
}

impl NativeModuleDescriptor {
    /// Create an empty module descriptor
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Add a constant
    pub fn with_constant(mut self, key: impl Into<String>, value: impl Into<BridgeValue>) -> Self {
        self.constants.insert(key.into(), value.into());
        self
    }

    /// Add a method
    pub fn with_method(mut self, name: impl Into<String>, kind: MethodKind) -> Self {
        self.methods.push(MethodDescriptor::new(name, kind));
        self
    }

    /// Build the generator config array.
    ///
    /// Returns `None` for a module with neither constants nor methods.
    pub fn to_config(&self) -> Option<BridgeValue> {
        if self.constants.is_empty() && self.methods.is_empty() {
            return None;
        }

        let mut config = vec![
            BridgeValue::from(self.name.as_str()),
            BridgeValue::Object(self.constants.clone()),
        ];

        if !self.methods.is_empty() {
            let mut promise_ids = Vec::new();
            let mut sync_ids = Vec::new();
            let mut names = Vec::with_capacity(self.methods.len());

            for (id, method) in self.methods.iter().enumerate() {
                names.push(BridgeValue::from(method.name.as_str()));
                match method.kind {
                    MethodKind::Async => {}
                    MethodKind::Promise => promise_ids.push(BridgeValue::from(id as u32)),
                    MethodKind::Sync => sync_ids.push(BridgeValue::from(id as u32)),
                }
            }

            config.push(BridgeValue::Array(names));
            if !promise_ids.is_empty() || !sync_ids.is_empty() {
                config.push(BridgeValue::Array(promise_ids));
                if !sync_ids.is_empty() {
                    config.push(BridgeValue::Array(sync_ids));
                }
            }
        }

        Some(BridgeValue::Array(config))
    }
}

/// In-memory registry of module descriptors.
///
/// Modules get consecutive indices in registration order. Registering a name
/// again replaces the descriptor and keeps its index.
#[derive(Default)]
pub struct StaticModuleRegistry {
    modules: DashMap<String, (u32, NativeModuleDescriptor)>,
    next_index: AtomicU32,
}

impl StaticModuleRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module and return its index
    pub fn register(&self, descriptor: NativeModuleDescriptor) -> u32 {
        let mut entry = self
            .modules
            .entry(descriptor.name.clone())
            .or_insert_with(|| {
                let index = self.next_index.fetch_add(1, Ordering::Relaxed);
                (index, NativeModuleDescriptor::default())
            });
        entry.1 = descriptor;
        entry.0
    }

    /// Index of a registered module
    pub fn index_of(&self, name: &str) -> Option<u32> {
        self.modules.get(name).map(|entry| entry.0)
    }

    /// Names of all registered modules
    pub fn module_names(&self) -> Vec<String> {
        let mut names: Vec<(u32, String)> = self
            .modules
            .iter()
            .map(|entry| (entry.0, entry.key().clone()))
            .collect();
        names.sort();
        names.into_iter().map(|(_, name)| name).collect()
    }

    /// Number of registered modules
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl ModuleRegistry for StaticModuleRegistry {
    fn get_config(&self, name: &str) -> Option<ModuleConfig> {
        let entry = self.modules.get(name)?;
        let (index, descriptor) = entry.value();
        descriptor.to_config().map(|config| ModuleConfig {
            config,
            index: *index,
        })
    }
}
