// SPDX-FileCopyrightText: 2025 2025 Contributors to the Media eXchange Layer project.
// SPDX-License-Identifier: Apache-2.0

//! Loading and reference counting of codec core modules.
//!
//! A codec core is a shared library exporting `OMX_Init`, `OMX_Deinit`,
//! `OMX_GetHandle` and `OMX_FreeHandle`. Several components may live in the
//! same core, so the core must be initialized once when its first user appears
//! and deinitialized once when its last user goes away. [`CoreRegistry`] keeps
//! that bookkeeping, keyed by module path.

use std::{
    collections::HashMap,
    ffi::{CString, c_char},
    path::{Path, PathBuf},
    ptr,
    sync::{Arc, LazyLock},
};

use libloading::Library;
use parking_lot::Mutex;
use tracing::{debug, error};

use crate::{
    Error, ErrorCode, EventBridge, OmxResult, Result,
    handle::{self, ComponentHandle, RawHandle},
};

/// Entry points of a loaded codec core.
pub trait CoreApi: Send + Sync {
    fn init(&self) -> OmxResult;

    fn deinit(&self) -> OmxResult;

    /// Creates a component instance that reports to `bridge`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Omx`] if the core refuses to create the component and
    /// [`Error::NulString`] if `name` contains an interior NUL byte.
    fn get_handle(&self, name: &str, bridge: Arc<EventBridge>) -> Result<Box<dyn ComponentHandle>>;
}

/// Opens codec core modules by path.
pub trait CoreLoader: Send + Sync {
    /// # Errors
    ///
    /// Returns [`Error::Load`] if the module cannot be opened or lacks one of
    /// the required entry points.
    fn load(&self, path: &Path) -> Result<Arc<dyn CoreApi>>;
}

/// Loads codec cores as shared libraries with `libloading`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LibraryLoader;

impl CoreLoader for LibraryLoader {
    fn load(&self, path: &Path) -> Result<Arc<dyn CoreApi>> {
        Ok(Arc::new(DynamicCore::open(path)?))
    }
}

/// A codec core backed by a dynamically loaded library.
pub struct DynamicCore {
    init: omx_sys::InitFn,
    deinit: omx_sys::DeinitFn,
    get_handle: omx_sys::GetHandleFn,
    free_handle: omx_sys::FreeHandleFn,
    library: Arc<Library>,
}

impl DynamicCore {
    /// Opens the library at `path` and resolves the core entry points.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Load`] if the library cannot be opened or a symbol is
    /// missing. The library is closed again in that case.
    pub fn open(path: &Path) -> Result<Self> {
        let load_error = |reason: String| Error::Load {
            path: path.to_path_buf(),
            reason,
        };

        debug!("Loading codec core {}", path.display());
        let library = unsafe { Library::new(path) }.map_err(|e| load_error(e.to_string()))?;

        // Safety: the signatures match the OpenMAX IL core entry points.
        unsafe {
            let init = *library
                .get::<omx_sys::InitFn>(omx_sys::OMX_INIT_SYMBOL)
                .map_err(|e| load_error(format!("OMX_Init: {e}")))?;
            let deinit = *library
                .get::<omx_sys::DeinitFn>(omx_sys::OMX_DEINIT_SYMBOL)
                .map_err(|e| load_error(format!("OMX_Deinit: {e}")))?;
            let get_handle = *library
                .get::<omx_sys::GetHandleFn>(omx_sys::OMX_GET_HANDLE_SYMBOL)
                .map_err(|e| load_error(format!("OMX_GetHandle: {e}")))?;
            let free_handle = *library
                .get::<omx_sys::FreeHandleFn>(omx_sys::OMX_FREE_HANDLE_SYMBOL)
                .map_err(|e| load_error(format!("OMX_FreeHandle: {e}")))?;

            Ok(Self {
                init,
                deinit,
                get_handle,
                free_handle,
                library: Arc::new(library),
            })
        }
    }
}

impl CoreApi for DynamicCore {
    fn init(&self) -> OmxResult {
        ErrorCode::check(unsafe { (self.init)() })
    }

    fn deinit(&self) -> OmxResult {
        ErrorCode::check(unsafe { (self.deinit)() })
    }

    fn get_handle(&self, name: &str, bridge: Arc<EventBridge>) -> Result<Box<dyn ComponentHandle>> {
        let name = CString::new(name)?;
        let mut raw: omx_sys::Handle = ptr::null_mut();
        ErrorCode::check(unsafe {
            (self.get_handle)(
                &mut raw,
                name.as_ptr() as *mut c_char,
                handle::app_data(&bridge),
                handle::callbacks(),
            )
        })
        .map_err(Error::Omx)?;
        if raw.is_null() {
            return Err(Error::Omx(ErrorCode::INSUFFICIENT_RESOURCES));
        }
        Ok(Box::new(RawHandle::new(
            raw,
            self.free_handle,
            bridge,
            self.library.clone(),
        )))
    }
}

/// A codec core module registered in a [`CoreRegistry`].
pub struct CoreModule {
    path: PathBuf,
    api: Arc<dyn CoreApi>,
    // Guards only the init/deinit transitions.
    users: Mutex<usize>,
}

impl CoreModule {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn api(&self) -> &Arc<dyn CoreApi> {
        &self.api
    }

    /// Number of outstanding acquisitions.
    pub fn user_count(&self) -> usize {
        *self.users.lock()
    }
}

impl std::fmt::Debug for CoreModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreModule")
            .field("path", &self.path)
            .field("users", &self.user_count())
            .finish()
    }
}

struct RegistryInner {
    loader: Box<dyn CoreLoader>,
    modules: Mutex<HashMap<PathBuf, Arc<CoreModule>>>,
}

/// Table of loaded codec cores, keyed by module path.
///
/// Cloning a registry yields another handle to the same table. Most users share
/// [`CoreRegistry::global`]; tests create isolated instances with their own
/// [`CoreLoader`].
///
/// # Examples
///
/// ```no_run
/// use omx::CoreRegistry;
///
/// # fn main() -> Result<(), omx::Error> {
/// let registry = CoreRegistry::global();
/// let core = registry.acquire("/usr/lib/libOmxCore.so")?;
/// // ... create components ...
/// registry.release(&core);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct CoreRegistry {
    inner: Arc<RegistryInner>,
}

static GLOBAL: LazyLock<CoreRegistry> = LazyLock::new(|| CoreRegistry::new(LibraryLoader));

impl CoreRegistry {
    pub fn new(loader: impl CoreLoader + 'static) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                loader: Box::new(loader),
                modules: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The process-wide registry loading cores as shared libraries.
    pub fn global() -> Self {
        GLOBAL.clone()
    }

    /// Returns the module at `path`, loading it on first use and initializing
    /// it when it gains its first user.
    ///
    /// Every successful call must be paired with a [`CoreRegistry::release`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Load`] if the module cannot be loaded and
    /// [`Error::Init`] if its initialization fails. In both cases the module is
    /// not left in the registry.
    pub fn acquire(&self, path: impl AsRef<Path>) -> Result<Arc<CoreModule>> {
        let path = path.as_ref();
        let mut modules = self.inner.modules.lock();

        let module = match modules.get(path) {
            Some(module) => module.clone(),
            None => {
                let api = self.inner.loader.load(path).inspect_err(|e| {
                    error!("Failed to load codec core {}: {}", path.display(), e);
                })?;
                let module = Arc::new(CoreModule {
                    path: path.to_path_buf(),
                    api,
                    users: Mutex::new(0),
                });
                modules.insert(path.to_path_buf(), module.clone());
                module
            }
        };

        let mut users = module.users.lock();
        if *users == 0 {
            debug!("Initializing codec core {}", path.display());
            if let Err(code) = module.api.init() {
                error!(
                    "Failed to initialize codec core {}: {}",
                    path.display(),
                    code
                );
                drop(users);
                modules.remove(path);
                return Err(Error::Init {
                    path: path.to_path_buf(),
                    code,
                });
            }
        }
        *users += 1;
        debug!("Codec core {} has {} users", path.display(), *users);
        drop(users);
        Ok(module)
    }

    /// Drops one user of `module`, deinitializing it when it was the last one.
    pub fn release(&self, module: &Arc<CoreModule>) {
        let mut modules = self.inner.modules.lock();
        let mut users = module.users.lock();
        if *users == 0 {
            error!(
                "Codec core {} released more often than acquired",
                module.path.display()
            );
            return;
        }
        *users -= 1;
        if *users > 0 {
            return;
        }

        debug!("Deinitializing codec core {}", module.path.display());
        if let Err(code) = module.api.deinit() {
            error!(
                "Failed to deinitialize codec core {}: {}",
                module.path.display(),
                code
            );
        }
        drop(users);
        if modules
            .get(&module.path)
            .is_some_and(|registered| Arc::ptr_eq(registered, module))
        {
            modules.remove(&module.path);
        }
    }

    pub fn is_loaded(&self, path: impl AsRef<Path>) -> bool {
        self.inner.modules.lock().contains_key(path.as_ref())
    }

    /// Number of registered modules.
    pub fn len(&self) -> usize {
        self.inner.modules.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
