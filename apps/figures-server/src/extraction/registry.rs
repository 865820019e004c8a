//! Active request registry
//!
//! Paths owned by in-flight requests. Request paths write to it through
//! [`RegistryGuard`]s; the cleanup worker only reads it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

/// Set of paths currently in use, shared across requests
#[derive(Clone, Default)]
pub struct ActiveRequestRegistry {
    inner: Arc<Mutex<HashMap<PathBuf, usize>>>,
}

impl ActiveRequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register paths until the returned guard is dropped
    ///
    /// The same path may be registered by several owners; it stays
    /// registered until the last guard goes away.
    pub fn register<I, P>(&self, paths: I) -> RegistryGuard
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let paths: Vec<PathBuf> = paths.into_iter().map(|p| normalize(p.into())).collect();
        {
            let mut entries = self.inner.lock();
            for path in &paths {
                *entries.entry(path.clone()).or_insert(0) += 1;
            }
        }
        RegistryGuard {
            registry: self.clone(),
            paths,
        }
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.inner.lock().contains_key(&normalize(path.to_path_buf()))
    }

    /// True when `path` is registered or lies above a registered path
    pub fn is_protected(&self, path: &Path) -> bool {
        let path = normalize(path.to_path_buf());
        self.inner
            .lock()
            .keys()
            .any(|registered| registered.starts_with(&path))
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the registered paths
    pub fn snapshot(&self) -> Vec<PathBuf> {
        self.inner.lock().keys().cloned().collect()
    }

    fn release(&self, paths: &[PathBuf]) {
        let mut entries = self.inner.lock();
        for path in paths {
            if let Some(count) = entries.get_mut(path) {
                *count -= 1;
                if *count == 0 {
                    entries.remove(path);
                }
            }
        }
    }
}

/// Unregisters its paths on drop
#[must_use = "paths are unregistered as soon as the guard is dropped"]
pub struct RegistryGuard {
    registry: ActiveRequestRegistry,
    paths: Vec<PathBuf>,
}

impl RegistryGuard {
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

impl Drop for RegistryGuard {
    fn drop(&mut self) {
        self.registry.release(&self.paths);
    }
}

/// Canonicalize the deepest existing ancestor and re-attach the rest
///
/// Registration happens before a work directory is created, so a path must
/// normalize the same way before and after it exists.
fn normalize(path: PathBuf) -> PathBuf {
    for ancestor in path.ancestors() {
        if let Ok(canonical) = ancestor.canonicalize() {
            return match path.strip_prefix(ancestor) {
                Ok(rest) if rest.as_os_str().is_empty() => canonical,
                Ok(rest) => canonical.join(rest),
                Err(_) => path,
            };
        }
    }
    path
}
