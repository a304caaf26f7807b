//! Stable references to hot-swappable functions and classes.
//!
//! A [`HotswapProxy`] is created the first time a module defines a
//! hotswap-marked name and lives for as long as anything references it.
//! Reloads replace the implementation *inside* the proxy, so every holder
//! (other modules, application code, existing instances) observes the new
//! definition on its next call.
//!
//! # Example
//!
//! ```rust,ignore
//! let adder = registry.proxy("app::math", "adder").unwrap();
//! assert_eq!(adder.call(&[2.into(), 3.into()])?, Value::Int(5));
//!
//! // edit the file: `x + y` -> `x + y + 1`, then
//! reloader.reload("app::math")?;
//! assert_eq!(adder.call(&[2.into(), 3.into()])?, Value::Int(6));
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::error::{RuntimeError, SwapError};
use crate::value::{Class, Function, Instance, Value};

/// Name of the method called on every live instance after its class is swapped.
pub const REINIT_HOOK: &str = "reinit";

/// Dead instance references are pruned whenever the list grows by this much.
const PRUNE_EVERY: usize = 64;

/// What a proxy currently dispatches to.
#[derive(Debug, Clone)]
pub enum Implementation {
    /// A function.
    Function(Arc<Function>),
    /// A class.
    Class(Arc<Class>),
}

impl Implementation {
    /// Extracts a wrappable implementation from a plain value.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Function(f) => Some(Self::Function(Arc::clone(f))),
            Value::Class(c) => Some(Self::Class(Arc::clone(c))),
            _ => None,
        }
    }

    /// The implementation as a plain value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Function(f) => Value::Function(Arc::clone(f)),
            Self::Class(c) => Value::Class(Arc::clone(c)),
        }
    }

    /// `"fn"` or `"struct"`.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Function(_) => "fn",
            Self::Class(_) => "struct",
        }
    }
}

/// A stable, swappable reference to a function or class.
///
/// There is at most one proxy per `(module, name)` pair in a
/// [`Registry`](crate::Registry). Swaps are atomic: a concurrent caller runs
/// either the old or the new implementation in full.
pub struct HotswapProxy {
    module: String,
    name: String,

    /// Current implementation, replaced atomically on reload.
    current: ArcSwap<Implementation>,

    /// Set when the name disappeared from its module.
    stale: AtomicBool,

    /// Incremented on every swap.
    generation: AtomicU64,

    /// Instances created through this proxy (classes only).
    instances: Mutex<Vec<Weak<Instance>>>,
}

impl HotswapProxy {
    pub(crate) fn new(module: &str, name: &str, implementation: Implementation) -> Arc<Self> {
        Arc::new(Self {
            module: module.to_string(),
            name: name.to_string(),
            current: ArcSwap::from_pointee(implementation),
            stale: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            instances: Mutex::new(Vec::new()),
        })
    }

    /// Owning module name.
    #[must_use]
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Wrapped name within the module.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `module::name`.
    #[must_use]
    pub fn qualname(&self) -> String {
        format!("{}::{}", self.module, self.name)
    }

    /// The current implementation, even if the proxy is stale.
    #[must_use]
    pub fn implementation(&self) -> Arc<Implementation> {
        self.current.load_full()
    }

    /// Whether the proxy currently wraps a class.
    #[must_use]
    pub fn is_class(&self) -> bool {
        matches!(**self.current.load(), Implementation::Class(_))
    }

    /// Whether the wrapped name was removed from its module.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }

    /// Number of swaps applied since the proxy was created.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Calls the wrapped function, or constructs an instance of the wrapped
    /// class through its `new`.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::StaleProxy`] if the name was removed, or any
    /// error raised by the call.
    pub fn call(self: &Arc<Self>, args: &[Value]) -> Result<Value, RuntimeError> {
        Value::Proxy(Arc::clone(self)).call(args)
    }

    /// Replaces the implementation and clears the stale flag.
    ///
    /// Returns the previous implementation.
    pub fn swap(&self, implementation: Implementation) -> Arc<Implementation> {
        let previous = self.current.swap(Arc::new(implementation));
        self.stale.store(false, Ordering::Release);
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::debug!(proxy = %self.qualname(), generation, "implementation swapped");
        previous
    }

    /// Runs the `reinit` hook of the current class on every live instance.
    ///
    /// Does nothing for functions or for classes without a `reinit(&mut self)`
    /// method. A failing hook is logged and collected; the remaining
    /// instances are still visited.
    pub fn reinitialize(&self) -> Vec<SwapError> {
        self.reinitialize_except(&[])
    }

    /// [`reinitialize`](Self::reinitialize), skipping `fresh` instances.
    pub(crate) fn reinitialize_except(&self, fresh: &[Weak<Instance>]) -> Vec<SwapError> {
        let Implementation::Class(class) = &*self.implementation() else {
            return Vec::new();
        };
        if !class.method(REINIT_HOOK).is_some_and(|m| m.receiver) {
            return Vec::new();
        }

        let mut errors = Vec::new();
        for instance in self.instances() {
            if fresh.iter().any(|weak| std::ptr::eq(weak.as_ptr(), Arc::as_ptr(&instance))) {
                continue;
            }
            if let Err(source) = instance.call_method(REINIT_HOOK, &[]) {
                tracing::warn!(
                    proxy = %self.qualname(),
                    error = %source,
                    "reinit hook failed"
                );
                errors.push(SwapError::Reinit {
                    module: self.module.clone(),
                    class: self.name.clone(),
                    source,
                });
            }
        }
        errors
    }

    /// Live instances created through this proxy.
    #[must_use]
    pub fn instances(&self) -> Vec<Arc<Instance>> {
        let mut tracked = self.instances.lock();
        tracked.retain(|weak| weak.strong_count() > 0);
        tracked.iter().filter_map(Weak::upgrade).collect()
    }

    /// Number of live instances created through this proxy.
    #[must_use]
    pub fn instance_count(&self) -> usize {
        self.instances
            .lock()
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// The implementation, failing if the proxy is stale.
    pub(crate) fn checked(&self) -> Result<Arc<Implementation>, RuntimeError> {
        if self.is_stale() {
            return Err(RuntimeError::StaleProxy {
                module: self.module.clone(),
                name: self.name.clone(),
            });
        }
        Ok(self.implementation())
    }

    pub(crate) fn mark_stale(&self) {
        if !self.stale.swap(true, Ordering::AcqRel) {
            tracing::debug!(proxy = %self.qualname(), "marked stale");
        }
    }

    pub(crate) fn register_instance(&self, instance: &Arc<Instance>) {
        let mut tracked = self.instances.lock();
        if tracked.len() % PRUNE_EVERY == PRUNE_EVERY - 1 {
            tracked.retain(|weak| weak.strong_count() > 0);
        }
        tracked.push(Arc::downgrade(instance));
    }
}

/// A proxy as seen by the module that is being (re)loaded.
///
/// The staged implementation is visible to that module's top level only.
/// Everyone else dispatches to the committed one until the load commits.
#[derive(Debug)]
pub(crate) struct PendingSwap {
    pub(crate) proxy: Arc<HotswapProxy>,
    pub(crate) implementation: Arc<Implementation>,
    /// The proxy is not in the registry yet.
    pub(crate) is_new: bool,
    /// Instances constructed by the staged top level. They already run the
    /// new class, so they skip `reinit`.
    fresh: Mutex<Vec<Weak<Instance>>>,
}

impl PendingSwap {
    /// Stages `implementation` for `existing`, or for a new proxy.
    pub(crate) fn new(
        module: &str,
        name: &str,
        implementation: Implementation,
        existing: Option<Arc<HotswapProxy>>,
    ) -> Self {
        let is_new = existing.is_none();
        let proxy =
            existing.unwrap_or_else(|| HotswapProxy::new(module, name, implementation.clone()));
        Self {
            proxy,
            implementation: Arc::new(implementation),
            is_new,
            fresh: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn track(&self, instance: &Arc<Instance>) {
        self.fresh.lock().push(Arc::downgrade(instance));
    }

    pub(crate) fn into_fresh(self) -> Vec<Weak<Instance>> {
        self.fresh.into_inner()
    }
}

impl fmt::Debug for HotswapProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HotswapProxy")
            .field("module", &self.module)
            .field("name", &self.name)
            .field("kind", &self.implementation().kind())
            .field("stale", &self.is_stale())
            .field("generation", &self.generation())
            .finish()
    }
}
