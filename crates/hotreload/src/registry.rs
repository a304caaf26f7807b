//! The registry of loaded modules, hotswap proxies and live watchers.
//!
//! A [`Registry`] is an ordinary owned value, usually shared as
//! `Arc<Registry>`. Independent registries never see each other's modules.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::SystemTime;

use arc_swap::ArcSwap;
use parking_lot::{Mutex, RwLock};

use crate::error::{ReloadError, RuntimeError};
use crate::hotswap::{HotswapProxy, Implementation};
use crate::value::{Namespace, Value};
use crate::watch::handle::{Shared, WatchHandle};
use crate::watch::WatchError;

/// Content fingerprint of a module source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint {
    hash: blake3::Hash,
    modified: Option<SystemTime>,
}

impl Fingerprint {
    /// Fingerprints source bytes read at the given modification time.
    #[must_use]
    pub fn of(source: &[u8], modified: Option<SystemTime>) -> Self {
        Self {
            hash: blake3::hash(source),
            modified,
        }
    }

    /// Whether both fingerprints describe the same content.
    ///
    /// Modification times are ignored; touching a file does not change it.
    #[must_use]
    pub fn same_content(&self, other: &Self) -> bool {
        self.hash == other.hash
    }

    /// Modification time when the source was read, if the platform has one.
    #[must_use]
    pub const fn modified(&self) -> Option<SystemTime> {
        self.modified
    }

    /// Hex-encoded content hash.
    #[must_use]
    pub fn to_hex(&self) -> String {
        self.hash.to_hex().to_string()
    }
}

/// Bookkeeping for one loaded module.
///
/// There is exactly one record per loaded source path. Records are created
/// by the first successful load and updated in place by every reload.
pub struct ModuleRecord {
    name: String,
    path: PathBuf,
    namespace: ArcSwap<Namespace>,
    fingerprint: Mutex<Option<Fingerprint>>,
    auto_wrap: AtomicBool,
    generation: AtomicU64,
}

impl ModuleRecord {
    pub(crate) fn new(name: &str, path: PathBuf) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            path,
            namespace: ArcSwap::from_pointee(Namespace::new()),
            fingerprint: Mutex::new(None),
            auto_wrap: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        })
    }

    /// Fully qualified module name, e.g. `app::handlers`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Canonical source path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The committed namespace.
    #[must_use]
    pub fn namespace(&self) -> Arc<Namespace> {
        self.namespace.load_full()
    }

    /// Looks up a name in the committed namespace.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Value> {
        self.namespace.load().get(name).cloned()
    }

    /// Whether the module set `const HOTSWAP: bool = true;` in its last
    /// committed version.
    #[must_use]
    pub fn auto_wrap(&self) -> bool {
        self.auto_wrap.load(Ordering::Acquire)
    }

    /// Number of committed loads (1 after the first load).
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Fingerprint of the committed source.
    #[must_use]
    pub fn fingerprint(&self) -> Option<Fingerprint> {
        *self.fingerprint.lock()
    }

    /// Publishes a new namespace and returns the previous one.
    pub(crate) fn commit(
        &self,
        namespace: Namespace,
        fingerprint: Fingerprint,
        auto_wrap: bool,
    ) -> Arc<Namespace> {
        let previous = self.namespace.swap(Arc::new(namespace));
        *self.fingerprint.lock() = Some(fingerprint);
        self.auto_wrap.store(auto_wrap, Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel);
        previous
    }
}

impl std::fmt::Debug for ModuleRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRecord")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("generation", &self.generation())
            .field("auto_wrap", &self.auto_wrap())
            .finish_non_exhaustive()
    }
}

/// Loaded modules, hotswap proxies and running watchers.
#[derive(Default)]
pub struct Registry {
    modules: RwLock<HashMap<String, Arc<ModuleRecord>>>,
    proxies: RwLock<HashMap<(String, String), Arc<HotswapProxy>>>,
    watchers: Mutex<HashMap<PathBuf, Weak<Shared>>>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The record of a loaded module.
    #[must_use]
    pub fn module(&self, name: &str) -> Option<Arc<ModuleRecord>> {
        self.modules.read().get(name).cloned()
    }

    /// All loaded modules, sorted by name.
    #[must_use]
    pub fn modules(&self) -> Vec<Arc<ModuleRecord>> {
        let mut modules: Vec<_> = self.modules.read().values().cloned().collect();
        modules.sort_by(|a, b| a.name.cmp(&b.name));
        modules
    }

    /// Modules loaded from exactly this (canonical) path.
    #[must_use]
    pub fn modules_at(&self, path: &Path) -> Vec<Arc<ModuleRecord>> {
        self.modules
            .read()
            .values()
            .filter(|record| record.path == path)
            .cloned()
            .collect()
    }

    /// The proxy for `module::name`, if one was ever created.
    #[must_use]
    pub fn proxy(&self, module: &str, name: &str) -> Option<Arc<HotswapProxy>> {
        self.proxies
            .read()
            .get(&(module.to_string(), name.to_string()))
            .cloned()
    }

    /// All proxies owned by a module, sorted by name.
    #[must_use]
    pub fn proxies_of(&self, module: &str) -> Vec<Arc<HotswapProxy>> {
        let mut proxies: Vec<_> = self
            .proxies
            .read()
            .iter()
            .filter(|((owner, _), _)| owner == module)
            .map(|(_, proxy)| Arc::clone(proxy))
            .collect();
        proxies.sort_by(|a, b| a.name().cmp(b.name()));
        proxies
    }

    /// Wraps a function or class in the proxy for `module::name`.
    ///
    /// Creates the proxy on first use. Wrapping again folds the value into
    /// the existing proxy (swap plus reinit hooks), so re-wrapping is
    /// idempotent with respect to identity. Wrapping a proxy returns it.
    ///
    /// # Errors
    ///
    /// Returns [`RuntimeError::NotWrappable`] for values other than
    /// functions, classes and proxies.
    pub fn wrap(
        &self,
        module: &str,
        name: &str,
        value: &Value,
    ) -> Result<Arc<HotswapProxy>, RuntimeError> {
        if let Value::Proxy(proxy) = value {
            return Ok(Arc::clone(proxy));
        }
        let implementation =
            Implementation::from_value(value).ok_or(RuntimeError::NotWrappable {
                type_name: value.type_name(),
            })?;

        let (proxy, created) = self.proxy_entry(module, name, implementation.clone());
        if !created {
            proxy.swap(implementation);
            for err in proxy.reinitialize() {
                tracing::warn!(proxy = %proxy.qualname(), error = %err, "reinit failed while wrapping");
            }
        }
        Ok(proxy)
    }

    /// Returns the proxy for `module::name`, creating it around
    /// `implementation` if it does not exist yet.
    pub(crate) fn proxy_entry(
        &self,
        module: &str,
        name: &str,
        implementation: Implementation,
    ) -> (Arc<HotswapProxy>, bool) {
        let key = (module.to_string(), name.to_string());
        if let Some(proxy) = self.proxies.read().get(&key) {
            return (Arc::clone(proxy), false);
        }

        let mut proxies = self.proxies.write();
        if let Some(proxy) = proxies.get(&key) {
            return (Arc::clone(proxy), false);
        }
        let proxy = HotswapProxy::new(module, name, implementation);
        proxies.insert(key, Arc::clone(&proxy));
        tracing::debug!(proxy = %proxy.qualname(), "proxy created");
        (proxy, true)
    }

    /// Registers a proxy staged by a load. Returns the proxy now registered
    /// under its name and whether it is `proxy` itself.
    pub(crate) fn adopt(&self, proxy: Arc<HotswapProxy>) -> (Arc<HotswapProxy>, bool) {
        let key = (proxy.module().to_string(), proxy.name().to_string());
        let mut proxies = self.proxies.write();
        if let Some(existing) = proxies.get(&key) {
            return (Arc::clone(existing), false);
        }
        proxies.insert(key, Arc::clone(&proxy));
        tracing::debug!(proxy = %proxy.qualname(), "proxy created");
        (proxy, true)
    }

    /// Finds the record already loaded under `name` from `path`.
    ///
    /// # Errors
    ///
    /// Fails if the name is bound to another path or the path to another name.
    pub(crate) fn existing(
        &self,
        name: &str,
        path: &Path,
    ) -> Result<Option<Arc<ModuleRecord>>, ReloadError> {
        let modules = self.modules.read();
        if let Some(record) = modules.get(name) {
            if record.path == path {
                return Ok(Some(Arc::clone(record)));
            }
            return Err(ReloadError::NameConflict {
                module: name.to_string(),
                existing: record.path.clone(),
                path: path.to_path_buf(),
            });
        }
        if let Some(record) = modules.values().find(|record| record.path == path) {
            return Err(ReloadError::PathConflict {
                module: name.to_string(),
                path: path.to_path_buf(),
                existing: record.name.clone(),
            });
        }
        Ok(None)
    }

    /// Registers a freshly loaded record.
    ///
    /// If another thread registered the same module in the meantime, that
    /// record wins and is returned.
    pub(crate) fn insert(&self, record: Arc<ModuleRecord>) -> Result<Arc<ModuleRecord>, ReloadError> {
        let mut modules = self.modules.write();
        if let Some(existing) = modules.get(&record.name) {
            if existing.path == record.path {
                return Ok(Arc::clone(existing));
            }
            return Err(ReloadError::NameConflict {
                module: record.name.clone(),
                existing: existing.path.clone(),
                path: record.path.clone(),
            });
        }
        if let Some(existing) = modules.values().find(|r| r.path == record.path) {
            return Err(ReloadError::PathConflict {
                module: record.name.clone(),
                path: record.path.clone(),
                existing: existing.name.clone(),
            });
        }
        modules.insert(record.name.clone(), Arc::clone(&record));
        Ok(record)
    }

    /// Returns the live watcher for `root`, or starts one with `start`.
    ///
    /// The boolean is `true` when a new watcher was started.
    pub(crate) fn watcher_for<F>(&self, root: &Path, start: F) -> Result<(WatchHandle, bool), WatchError>
    where
        F: FnOnce() -> Result<WatchHandle, WatchError>,
    {
        let mut watchers = self.watchers.lock();
        watchers.retain(|_, weak| weak.strong_count() > 0);

        if let Some(handle) = watchers
            .get(root)
            .and_then(Weak::upgrade)
            .map(WatchHandle::from_shared)
            && handle.is_running()
        {
            tracing::debug!(root = %root.display(), "reusing running watcher");
            return Ok((handle, false));
        }

        let handle = start()?;
        watchers.insert(root.to_path_buf(), handle.downgrade());
        Ok((handle, true))
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("modules", &self.modules.read().len())
            .field("proxies", &self.proxies.read().len())
            .finish_non_exhaustive()
    }
}

/// Derives a module name from a source path relative to `root`.
///
/// `root/a/b.rs` is `a::b`, and `root/a/mod.rs` is `a`. A `mod.rs` directly
/// in the root takes the root directory's name. Returns `None` for paths
/// outside `root` and for files without an `.rs` extension.
#[must_use]
pub fn module_name(root: &Path, path: &Path) -> Option<String> {
    if path.extension().is_none_or(|ext| ext != "rs") {
        return None;
    }
    let relative = path.strip_prefix(root).ok()?;

    let mut segments = Vec::new();
    for component in relative.parent().into_iter().flat_map(Path::components) {
        match component {
            Component::Normal(part) => segments.push(part.to_str()?.to_string()),
            Component::CurDir => {}
            _ => return None,
        }
    }

    let stem = relative.file_stem()?.to_str()?;
    if stem != "mod" {
        segments.push(stem.to_string());
    }
    if segments.is_empty() {
        segments.push(root.file_name()?.to_str()?.to_string());
    }
    Some(segments.join("::"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_name_from_file() {
        let root = Path::new("/app");
        assert_eq!(module_name(root, Path::new("/app/m.rs")).as_deref(), Some("m"));
        assert_eq!(
            module_name(root, Path::new("/app/handlers/user.rs")).as_deref(),
            Some("handlers::user")
        );
    }

    #[test]
    fn test_module_name_mod_rs() {
        let root = Path::new("/app");
        assert_eq!(
            module_name(root, Path::new("/app/handlers/mod.rs")).as_deref(),
            Some("handlers")
        );
        assert_eq!(module_name(root, Path::new("/app/mod.rs")).as_deref(), Some("app"));
    }

    #[test]
    fn test_module_name_rejects_foreign_paths() {
        let root = Path::new("/app");
        assert_eq!(module_name(root, Path::new("/other/m.rs")), None);
        assert_eq!(module_name(root, Path::new("/app/notes.txt")), None);
        assert_eq!(module_name(root, Path::new("/app/Makefile")), None);
    }

    #[test]
    fn test_fingerprint_ignores_mtime() {
        let a = Fingerprint::of(b"fn f() {}", None);
        let b = Fingerprint::of(b"fn f() {}", Some(SystemTime::now()));
        let c = Fingerprint::of(b"fn g() {}", None);
        assert!(a.same_content(&b));
        assert!(!a.same_content(&c));
        assert_eq!(a.to_hex().len(), 64);
    }

    #[test]
    fn test_registry_conflicts() {
        let registry = Registry::new();
        let record = ModuleRecord::new("m", PathBuf::from("/app/m.rs"));
        registry.insert(record).unwrap();

        assert!(registry.existing("m", Path::new("/app/m.rs")).unwrap().is_some());
        assert!(matches!(
            registry.existing("m", Path::new("/app/other.rs")),
            Err(ReloadError::NameConflict { .. })
        ));
        assert!(matches!(
            registry.existing("alias", Path::new("/app/m.rs")),
            Err(ReloadError::PathConflict { .. })
        ));
        assert!(registry.existing("n", Path::new("/app/n.rs")).unwrap().is_none());
    }

    #[test]
    fn test_wrap_rejects_scalars() {
        let registry = Registry::new();
        let err = registry.wrap("m", "x", &Value::Int(1)).unwrap_err();
        assert!(matches!(err, RuntimeError::NotWrappable { type_name: "int" }));
    }
}
