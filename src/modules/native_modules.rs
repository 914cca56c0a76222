//! Lazily generated, cached module proxies behind `nativeModuleProxy`.

use super::ModuleRegistry;
use crate::error::JsError;
use crate::host_functions::HookResult;
use crate::value::to_js;
use rquickjs::{Ctx, Function, Object, Persistent, Value};
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Global function that turns a module config into a module proxy
pub const GEN_NATIVE_MODULE_GLOBAL: &str = "__fbGenNativeModule";

/// Per-context cache of module proxies.
///
/// Entries live until [`NativeModules::reset`], which only runs at teardown.
/// Registry misses are not cached.
pub struct NativeModules {
    registry: Option<Arc<dyn ModuleRegistry>>,
    generator: RefCell<Option<Persistent<Function<'static>>>>,
    cache: RefCell<HashMap<String, Persistent<Object<'static>>>>,
}

impl NativeModules {
    /// Create an empty cache backed by `registry`
    pub fn new(registry: Option<Arc<dyn ModuleRegistry>>) -> Self {
        Self {
            registry,
            generator: RefCell::new(None),
            cache: RefCell::new(HashMap::new()),
        }
    }

    /// Number of cached proxies
    pub fn len(&self) -> usize {
        self.cache.borrow().len()
    }

    /// Whether nothing is cached
    pub fn is_empty(&self) -> bool {
        self.cache.borrow().is_empty()
    }

    /// Whether a proxy for `name` is cached
    pub fn contains(&self, name: &str) -> bool {
        self.cache.borrow().contains_key(name)
    }

    /// Proxy for `name`, generating and caching it on first use.
    ///
    /// Returns `None` when the registry does not know the module.
    pub(crate) fn get_module<'js>(&self, ctx: &Ctx<'js>, name: &str) -> HookResult<Option<Object<'js>>> {
        let cached = self.cache.borrow().get(name).cloned();
        if let Some(module) = cached {
            return Ok(Some(module.restore(ctx)?));
        }

        let Some(registry) = &self.registry else {
            return Ok(None);
        };
        let Some(config) = registry.get_config(name) else {
            debug!(module = name, "Native module not found in registry");
            return Ok(None);
        };

        let generator = self.generator(ctx)?;
        let config_value = to_js(ctx, &config.config)?;
        let generated: Value<'js> = generator.call((config_value, config.index))?;

        let generated = generated.as_object().ok_or_else(|| {
            JsError::protocol_violation(format!(
                "Module {} could not be generated: {} returned {}",
                name,
                GEN_NATIVE_MODULE_GLOBAL,
                crate::host_functions::js_type_name(&generated)
            ))
        })?;
        let module: Value<'js> = generated.get("module")?;
        let module = module.as_object().cloned().ok_or_else(|| {
            JsError::protocol_violation(format!(
                "Module {} could not be generated: result has no module object",
                name
            ))
        })?;

        debug!(module = name, index = config.index, "Generated native module");
        self.cache
            .borrow_mut()
            .insert(name.to_string(), Persistent::save(ctx, module.clone()));
        Ok(Some(module))
    }

    fn generator<'js>(&self, ctx: &Ctx<'js>) -> HookResult<Function<'js>> {
        let memoized = self.generator.borrow().clone();
        if let Some(generator) = memoized {
            return Ok(generator.restore(ctx)?);
        }

        let value: Value<'js> = ctx.globals().get(GEN_NATIVE_MODULE_GLOBAL)?;
        let generator = value.as_function().cloned().ok_or_else(|| {
            JsError::protocol_violation(format!(
                "{} is not defined, make sure your bundle is packaged correctly",
                GEN_NATIVE_MODULE_GLOBAL
            ))
        })?;
        *self.generator.borrow_mut() = Some(Persistent::save(ctx, generator.clone()));
        Ok(generator)
    }

    /// Drop the generator handle and every cached proxy
    pub fn reset(&self) {
        self.generator.borrow_mut().take();
        self.cache.borrow_mut().clear();
    }
}
