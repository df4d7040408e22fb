//! Loading of custom kernel shared objects.
//!
//! Shared objects are loaded at most once per process for as long as any
//! lowering context holds them. The registry keeps weak references keyed by
//! shared-object name; the check, the load and the insert happen under one
//! lock so concurrent lowerings of the same object observe a single load.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

/// Loads and unloads kernel shared objects on the device runtime.
pub trait SoLoader: Send + Sync {
    /// Load `bin` under `so_name` and return a runtime handle.
    fn load(&self, so_name: &str, bin: &[u8]) -> Result<u64, String>;

    fn unload(&self, handle: u64);
}

/// Loader that only hands out handles; the executor performs the real load
/// through the `LoadCustomAicpuSo` holder.
#[derive(Debug, Default)]
pub struct DeferredSoLoader {
    next: AtomicU64,
}

impl SoLoader for DeferredSoLoader {
    fn load(&self, _so_name: &str, _bin: &[u8]) -> Result<u64, String> {
        Ok(self.next.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn unload(&self, _handle: u64) {}
}

/// A loaded shared object. Unloaded when the last reference drops.
pub struct LoadedSo {
    pub so_name: String,
    pub handle: u64,
    loader: Arc<dyn SoLoader>,
}

impl std::fmt::Debug for LoadedSo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedSo")
            .field("so_name", &self.so_name)
            .field("handle", &self.handle)
            .finish()
    }
}

impl Drop for LoadedSo {
    fn drop(&mut self) {
        tracing::debug!(so_name = %self.so_name, handle = self.handle, "unloading custom kernel");
        self.loader.unload(self.handle);
    }
}

/// Process-wide map of loaded custom kernels.
pub struct CustomKernelRegistry {
    loader: Arc<dyn SoLoader>,
    loaded: Mutex<HashMap<String, Weak<LoadedSo>>>,
}

impl CustomKernelRegistry {
    pub fn new(loader: Arc<dyn SoLoader>) -> Self {
        Self {
            loader,
            loaded: Mutex::new(HashMap::new()),
        }
    }

    /// Shared registry used by lowering contexts that do not inject their own.
    pub fn global() -> Arc<CustomKernelRegistry> {
        static GLOBAL: OnceLock<Arc<CustomKernelRegistry>> = OnceLock::new();
        GLOBAL
            .get_or_init(|| Arc::new(Self::new(Arc::new(DeferredSoLoader::default()))))
            .clone()
    }

    /// Return the loaded object for `so_name`, loading it on first use.
    ///
    /// The second element is `true` when this call performed the load.
    pub fn get_or_load(&self, so_name: &str, bin: &[u8]) -> Result<(Arc<LoadedSo>, bool), String> {
        let mut loaded = self.loaded.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(so) = loaded.get(so_name).and_then(Weak::upgrade) {
            return Ok((so, false));
        }
        let handle = self.loader.load(so_name, bin)?;
        tracing::debug!(so_name, handle, "loaded custom kernel");
        let so = Arc::new(LoadedSo {
            so_name: so_name.to_string(),
            handle,
            loader: self.loader.clone(),
        });
        loaded.insert(so_name.to_string(), Arc::downgrade(&so));
        Ok((so, true))
    }

    /// Whether `so_name` is currently loaded.
    pub fn is_loaded(&self, so_name: &str) -> bool {
        self.loaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(so_name)
            .is_some_and(|so| so.strong_count() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingLoader {
        loads: AtomicUsize,
        unloads: AtomicUsize,
    }

    impl SoLoader for CountingLoader {
        fn load(&self, _so_name: &str, _bin: &[u8]) -> Result<u64, String> {
            Ok(self.loads.fetch_add(1, Ordering::SeqCst) as u64 + 100)
        }

        fn unload(&self, _handle: u64) {
            self.unloads.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_loads_once_and_unloads_on_drop() {
        let loader = Arc::new(CountingLoader::default());
        let registry = CustomKernelRegistry::new(loader.clone());

        let (a, first) = registry.get_or_load("libcust.so", b"elf").unwrap();
        let (b, second) = registry.get_or_load("libcust.so", b"elf").unwrap();
        assert!(first);
        assert!(!second);
        assert_eq!(a.handle, b.handle);
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);

        drop(a);
        assert!(registry.is_loaded("libcust.so"));
        drop(b);
        assert!(!registry.is_loaded("libcust.so"));
        assert_eq!(loader.unloads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_loads_share_one_handle() {
        let loader = Arc::new(CountingLoader::default());
        let registry = Arc::new(CustomKernelRegistry::new(loader.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || registry.get_or_load("libshared.so", &[]).unwrap().0)
            })
            .collect();
        let loaded: Vec<Arc<LoadedSo>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert!(loaded.iter().all(|so| so.handle == loaded[0].handle));
    }
}
