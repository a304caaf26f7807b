//! Loading and reloading script modules.
//!
//! Every load goes through the same pipeline:
//!
//! 1. read the source and fingerprint it,
//! 2. compile it,
//! 3. execute the top level into a staging namespace,
//! 4. commit: fold hotswap-eligible definitions into proxies, publish the
//!    namespace, then swap proxies and run `reinit` hooks.
//!
//! Steps 1-3 have no observable effect, so a failed reload leaves the module
//! exactly as it was.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::error::{ReinitFailures, ReloadError, RuntimeError, SwapError};
use crate::hotswap::{HotswapProxy, Implementation, PendingSwap};
use crate::registry::{Fingerprint, ModuleRecord, Registry, module_name};
use crate::script::ast::{Item, ModuleAst};
use crate::script::eval::{Interpreter, Staging};
use crate::script::{self, CompileError};
use crate::value::{Class, Function, Namespace, Value};

/// What caused a module to be (re)loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ReloadTrigger {
    /// First load of the module.
    Initial,

    /// An explicit [`Reloader::reload`] call.
    Manual,

    /// The watched source file was modified.
    FileModified(PathBuf),

    /// The watched source file was created (usually an atomic save).
    FileCreated(PathBuf),

    /// A [`WatchHandle::flush`](crate::WatchHandle::flush) found the file changed.
    Flush,
}

impl std::fmt::Display for ReloadTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initial => write!(f, "initial load"),
            Self::Manual => write!(f, "manual reload"),
            Self::FileModified(p) => write!(f, "file modified: {}", p.display()),
            Self::FileCreated(p) => write!(f, "file created: {}", p.display()),
            Self::Flush => write!(f, "flush"),
        }
    }
}

/// Outcome of a successful load or reload.
#[derive(Debug, Clone)]
pub struct ReloadReport {
    /// Module name.
    pub module: String,

    /// Generation of the module after the commit.
    pub generation: u64,

    /// What caused the reload.
    pub trigger: ReloadTrigger,

    /// Existing proxies that received a new implementation.
    pub swapped: Vec<String>,

    /// Proxies created by this load.
    pub created: Vec<String>,

    /// Proxies whose definition disappeared or lost its hotswap marking.
    pub stale: Vec<String>,

    /// Names defined now but not before.
    pub added: Vec<String>,

    /// Names defined before but not now.
    pub removed: Vec<String>,

    /// `reinit` hooks that failed. The swaps were applied regardless.
    pub reinit_failures: Vec<SwapError>,

    /// When the commit finished.
    pub timestamp: Instant,
}

impl ReloadReport {
    /// Returns `true` if this was the module's first load.
    #[must_use]
    pub const fn is_initial(&self) -> bool {
        matches!(self.trigger, ReloadTrigger::Initial)
    }

    /// Returns `true` if any `reinit` hook failed.
    #[must_use]
    pub fn has_reinit_failures(&self) -> bool {
        !self.reinit_failures.is_empty()
    }

    /// The reinit failures as one diagnostic, if there were any.
    #[must_use]
    pub fn reinit_error(&self) -> Option<ReinitFailures> {
        self.has_reinit_failures().then(|| ReinitFailures {
            module: self.module.clone(),
            failures: self.reinit_failures.clone(),
        })
    }
}

/// A module that compiled and executed but is not committed yet.
struct Staged {
    namespace: Namespace,
    pending: Vec<PendingSwap>,
    auto_wrap: bool,
    fingerprint: Fingerprint,
}

/// Loads and reloads modules into a [`Registry`].
///
/// The reloader itself holds no locks; callers serialize reloads of a module
/// (the watcher does so by running them on one thread or one context).
#[derive(Debug, Clone)]
pub struct Reloader {
    registry: Arc<Registry>,
}

impl Reloader {
    /// Creates a reloader for `registry`.
    #[must_use]
    pub const fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// The registry modules are loaded into.
    #[must_use]
    pub const fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Loads `path` as module `name`.
    ///
    /// Loading a module that is already loaded from the same path returns
    /// the existing record without re-executing it.
    ///
    /// # Errors
    ///
    /// Returns [`ReloadError`] if the source cannot be read, compiled or
    /// executed, or if the name or path is already taken.
    pub fn load(&self, name: &str, path: impl AsRef<Path>) -> Result<Arc<ModuleRecord>, ReloadError> {
        let path = canonical(name, path.as_ref())?;
        if let Some(existing) = self.registry.existing(name, &path)? {
            tracing::debug!(module = name, "module already loaded");
            return Ok(existing);
        }

        let record = ModuleRecord::new(name, path);
        let staged = prepare(&self.registry, &record)?;
        let registered = self.registry.insert(Arc::clone(&record))?;
        if !Arc::ptr_eq(&registered, &record) {
            return Ok(registered);
        }

        let report = self.commit(&record, staged, ReloadTrigger::Initial);
        tracing::info!(
            module = %report.module,
            path = %record.path().display(),
            proxies = report.created.len(),
            "module loaded"
        );
        Ok(record)
    }

    /// Loads `path` under the name derived from its location below `root`.
    ///
    /// See [`module_name`] for the naming rules.
    ///
    /// # Errors
    ///
    /// Returns [`ReloadError`] like [`load`](Self::load), and
    /// [`ReloadError::Io`] if `path` is not an `.rs` file below `root`.
    pub fn import(
        &self,
        root: impl AsRef<Path>,
        path: impl AsRef<Path>,
    ) -> Result<Arc<ModuleRecord>, ReloadError> {
        let display = path.as_ref().display().to_string();
        let root = canonical(&display, root.as_ref())?;
        let path = canonical(&display, path.as_ref())?;
        let name = module_name(&root, &path).ok_or_else(|| ReloadError::Io {
            module: display.clone(),
            path: path.clone(),
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("not a `.rs` file below {}", root.display()),
            ),
        })?;
        self.load(&name, path)
    }

    /// Re-executes a loaded module and swaps its proxies.
    ///
    /// # Errors
    ///
    /// Returns [`ReloadError`] if the new source cannot be read, compiled or
    /// executed. The module is unchanged in that case.
    pub fn reload(&self, record: &Arc<ModuleRecord>) -> Result<ReloadReport, ReloadError> {
        self.reload_with(record, ReloadTrigger::Manual)
    }

    /// Like [`reload`](Self::reload), but does nothing if the source content
    /// is unchanged since the last commit.
    ///
    /// # Errors
    ///
    /// Returns [`ReloadError`] like [`reload`](Self::reload).
    pub fn reload_if_changed(
        &self,
        record: &Arc<ModuleRecord>,
    ) -> Result<Option<ReloadReport>, ReloadError> {
        self.reload_if_changed_with(record, ReloadTrigger::Manual)
    }

    pub(crate) fn reload_with(
        &self,
        record: &Arc<ModuleRecord>,
        trigger: ReloadTrigger,
    ) -> Result<ReloadReport, ReloadError> {
        let staged = prepare(&self.registry, record)?;
        Ok(self.finish(record, staged, trigger))
    }

    pub(crate) fn reload_if_changed_with(
        &self,
        record: &Arc<ModuleRecord>,
        trigger: ReloadTrigger,
    ) -> Result<Option<ReloadReport>, ReloadError> {
        let (source, fingerprint) = read_source(record)?;
        if record
            .fingerprint()
            .is_some_and(|committed| committed.same_content(&fingerprint))
        {
            tracing::debug!(module = record.name(), "source unchanged, skipping reload");
            return Ok(None);
        }
        let staged = stage(&self.registry, record, &source, fingerprint)?;
        Ok(Some(self.finish(record, staged, trigger)))
    }

    fn finish(&self, record: &Arc<ModuleRecord>, staged: Staged, trigger: ReloadTrigger) -> ReloadReport {
        let report = self.commit(record, staged, trigger);
        tracing::info!(
            module = %report.module,
            generation = report.generation,
            swapped = report.swapped.len(),
            created = report.created.len(),
            stale = report.stale.len(),
            "module reloaded"
        );
        report
    }

    /// Publishes a staged module. Cannot fail; reinit failures are reported.
    fn commit(&self, record: &ModuleRecord, staged: Staged, trigger: ReloadTrigger) -> ReloadReport {
        let Staged {
            mut namespace,
            pending,
            auto_wrap,
            fingerprint,
        } = staged;
        let module = record.name();
        let eligible_names: HashSet<String> = pending
            .iter()
            .map(|swap| swap.proxy.name().to_string())
            .collect();

        let mut created = Vec::new();
        let mut swaps: Vec<(Arc<HotswapProxy>, PendingSwap)> = Vec::new();
        for swap in pending {
            let (proxy, adopted) = if swap.is_new {
                self.registry.adopt(Arc::clone(&swap.proxy))
            } else {
                (Arc::clone(&swap.proxy), false)
            };
            if adopted {
                created.push(proxy.name().to_string());
            } else {
                // a host `wrap` may have claimed the name since staging
                namespace.insert(proxy.name(), Value::Proxy(Arc::clone(&proxy)));
                swaps.push((proxy, swap));
            }
        }

        let previous = record.namespace();
        let added = names_missing_from(&namespace, &previous);
        let removed = names_missing_from(&previous, &namespace);

        let stale_proxies: Vec<_> = self
            .registry
            .proxies_of(module)
            .into_iter()
            .filter(|proxy| !eligible_names.contains(proxy.name()) && !proxy.is_stale())
            .collect();

        record.commit(namespace, fingerprint, auto_wrap);

        let mut stale = Vec::with_capacity(stale_proxies.len());
        for proxy in stale_proxies {
            proxy.mark_stale();
            stale.push(proxy.name().to_string());
        }

        let mut swapped = Vec::with_capacity(swaps.len());
        let mut reinit_failures = Vec::new();
        for (proxy, swap) in swaps {
            proxy.swap(Implementation::clone(&swap.implementation));
            reinit_failures.extend(proxy.reinitialize_except(&swap.into_fresh()));
            swapped.push(proxy.name().to_string());
        }

        ReloadReport {
            module: module.to_string(),
            generation: record.generation(),
            trigger,
            swapped,
            created,
            stale,
            added,
            removed,
            reinit_failures,
            timestamp: Instant::now(),
        }
    }
}

fn canonical(module: &str, path: &Path) -> Result<PathBuf, ReloadError> {
    path.canonicalize().map_err(|source| ReloadError::Io {
        module: module.to_string(),
        path: path.to_path_buf(),
        source,
    })
}

fn read_source(record: &ModuleRecord) -> Result<(String, Fingerprint), ReloadError> {
    let io_error = |source| ReloadError::Io {
        module: record.name().to_string(),
        path: record.path().to_path_buf(),
        source,
    };
    let source = std::fs::read_to_string(record.path()).map_err(io_error)?;
    let modified = std::fs::metadata(record.path())
        .and_then(|meta| meta.modified())
        .ok();
    let fingerprint = Fingerprint::of(source.as_bytes(), modified);
    Ok((source, fingerprint))
}

fn prepare(registry: &Registry, record: &Arc<ModuleRecord>) -> Result<Staged, ReloadError> {
    let (source, fingerprint) = read_source(record)?;
    stage(registry, record, &source, fingerprint)
}

fn stage(
    registry: &Registry,
    record: &Arc<ModuleRecord>,
    source: &str,
    fingerprint: Fingerprint,
) -> Result<Staged, ReloadError> {
    let ast = script::compile(record.path(), source).map_err(|err: CompileError| {
        tracing::debug!(module = record.name(), error = %err.summary(), "compile failed");
        ReloadError::Compile {
            module: record.name().to_string(),
            source: err,
        }
    })?;
    let (namespace, pending) =
        execute(registry, record, &ast).map_err(|source| ReloadError::Execute {
            module: record.name().to_string(),
            source,
        })?;

    Ok(Staged {
        namespace,
        pending,
        auto_wrap: ast.auto_wrap,
        fingerprint,
    })
}

/// Runs a module's top level into a fresh namespace.
///
/// Functions and classes are defined first so `const` initializers can call
/// them; `const` and `static` items are then evaluated in source order.
/// Hotswap definitions are bound to their proxies before any initializer
/// runs, so instances and aliases created at the top level go through them.
/// New proxies are only registered on commit.
pub(crate) fn execute(
    registry: &Registry,
    record: &Arc<ModuleRecord>,
    ast: &ModuleAst,
) -> Result<(Namespace, Vec<PendingSwap>), RuntimeError> {
    let module = Arc::downgrade(record);
    let mut namespace = Namespace::new();
    let mut pending = Vec::new();

    for item in &ast.items {
        let (implementation, hotswap) = match item {
            Item::Function(def) => {
                let function = Function::new(Arc::clone(def), module.clone(), record.name());
                (Implementation::Function(Arc::new(function)), def.hotswap)
            }
            Item::Class(decl) => {
                let class = Class::new(Arc::clone(decl), module.clone(), record.name());
                (Implementation::Class(Arc::new(class)), decl.hotswap)
            }
            Item::Value { .. } => continue,
        };

        let name = item.name();
        if ast.auto_wrap || hotswap {
            let existing = registry.proxy(record.name(), name);
            let swap = PendingSwap::new(record.name(), name, implementation, existing);
            namespace.insert(name, Value::Proxy(Arc::clone(&swap.proxy)));
            pending.push(swap);
        } else {
            namespace.insert(name, implementation.to_value());
        }
    }

    for item in &ast.items {
        if let Item::Value { name, expr } = item {
            let value = Interpreter::staged(Staging {
                module: &module,
                namespace: &namespace,
                pending: &pending,
            })
            .eval_item(&module, record.name(), expr)?;
            namespace.insert(name.as_str(), value);
        }
    }

    Ok((namespace, pending))
}

fn names_missing_from(names: &Namespace, other: &Namespace) -> Vec<String> {
    names
        .names()
        .filter(|name| !other.contains(name))
        .map(str::to_string)
        .collect()
}
