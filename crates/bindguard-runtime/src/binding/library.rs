//! `NativeBinding` over a shared library opened with `libloading`.
//!
//! Only ever used inside a verification worker. Opening a candidate runs its
//! initializers, and any call into it may crash the process.

#![allow(unsafe_code)]

use std::ffi::{CStr, CString, c_char, c_int};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use libloading::Library;
use tracing::debug;

use bindguard_core::{BindingError, BindingLoader, LogVerbosity, MemoryInfo, NativeBinding};

const LOAD_BACKENDS: &str = "bindguard_load_backends";
const GET_BACKEND_KIND: &str = "bindguard_get_backend_kind";
const INITIALIZE: &str = "bindguard_initialize";
const GET_MEMORY_INFO: &str = "bindguard_get_memory_info";
const GET_DEVICE_NAMES: &str = "bindguard_get_device_names";
const ASSERT_DEVICE_SUPPORTED: &str = "bindguard_assert_device_supported";
const SET_LOG_LEVEL: &str = "bindguard_set_log_level";

/// Functions a candidate binary must export.
pub const REQUIRED_SYMBOLS: [&str; 7] = [
    LOAD_BACKENDS,
    GET_BACKEND_KIND,
    INITIALIZE,
    GET_MEMORY_INFO,
    GET_DEVICE_NAMES,
    ASSERT_DEVICE_SUPPORTED,
    SET_LOG_LEVEL,
];

type StatusFn = unsafe extern "C" fn() -> c_int;
type LoadBackendsFn = unsafe extern "C" fn(*const c_char) -> c_int;
type StringFn = unsafe extern "C" fn() -> *const c_char;
type MemoryInfoFn = unsafe extern "C" fn(*mut u64, *mut u64) -> c_int;
type SetLogLevelFn = unsafe extern "C" fn(c_int);

/// Opens candidate binaries as shared libraries.
#[derive(Debug, Clone, Copy, Default)]
pub struct LibraryLoader;

impl BindingLoader for LibraryLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn NativeBinding>, BindingError> {
        // SAFETY: running the candidate's initializers is the purpose of the
        // worker process; a faulty binary can only take this process down.
        let library = unsafe { Library::new(path) }.map_err(|e| BindingError::LoadFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        debug!(path = %path.display(), "Candidate library opened");

        Ok(Box::new(LibraryBinding {
            library: Arc::new(library),
            path: path.to_path_buf(),
        }))
    }
}

/// A loaded candidate binary.
#[derive(Debug)]
pub struct LibraryBinding {
    library: Arc<Library>,
    path: PathBuf,
}

impl LibraryBinding {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Resolve `name` as a function pointer of type `T`.
///
/// The pointer is only valid while `library` stays loaded.
fn symbol<T: Copy>(library: &Library, name: &'static str) -> Result<T, BindingError> {
    // SAFETY: every `T` used here is the C signature the binding ABI
    // documents for `name`; callers hold `library` for every call made
    // through the returned pointer.
    unsafe { library.get::<T>(name.as_bytes()) }
        .map(|sym| *sym)
        .map_err(|_| BindingError::MissingSymbol(name.to_string()))
}

const fn check_status(function: &'static str, code: c_int) -> Result<(), BindingError> {
    if code == 0 {
        Ok(())
    } else {
        Err(BindingError::CallFailed { function, code })
    }
}

/// Copy a string returned by the binding. Null means "none".
fn read_string(function: &'static str, ptr: *const c_char) -> Result<Option<String>, BindingError> {
    if ptr.is_null() {
        return Ok(None);
    }
    // SAFETY: non-null strings returned through the ABI are NUL-terminated
    // and owned by the binding for at least the duration of this call.
    let value = unsafe { CStr::from_ptr(ptr) };
    value
        .to_str()
        .map(|s| Some(s.to_string()))
        .map_err(|_| BindingError::InvalidString { function })
}

#[async_trait]
impl NativeBinding for LibraryBinding {
    fn check_symbols(&self) -> Result<(), BindingError> {
        let missing: Vec<&str> = REQUIRED_SYMBOLS
            .iter()
            .copied()
            .filter(|name| symbol::<StatusFn>(&self.library, name).is_err())
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(BindingError::MissingSymbol(missing.join(", ")))
        }
    }

    fn load_backends(&self, directory_hint: Option<PathBuf>) -> Result<(), BindingError> {
        let load: LoadBackendsFn = symbol(&self.library, LOAD_BACKENDS)?;
        let hint = directory_hint
            .map(|dir| CString::new(dir.to_string_lossy().into_owned()))
            .transpose()
            .map_err(|_| BindingError::InvalidString {
                function: LOAD_BACKENDS,
            })?;
        let hint_ptr = hint.as_ref().map_or(std::ptr::null(), |c| c.as_ptr());

        // SAFETY: `hint_ptr` is null or points into `hint`, alive for the call.
        let code = unsafe { load(hint_ptr) };
        check_status(LOAD_BACKENDS, code)
    }

    fn backend_kind(&self) -> Result<Option<String>, BindingError> {
        let get: StringFn = symbol(&self.library, GET_BACKEND_KIND)?;
        // SAFETY: takes no arguments; the result is checked by `read_string`.
        read_string(GET_BACKEND_KIND, unsafe { get() })
    }

    async fn initialize(&self) -> Result<(), BindingError> {
        let library = Arc::clone(&self.library);
        let joined = tokio::task::spawn_blocking(move || {
            let init: StatusFn = symbol(&library, INITIALIZE)?;
            // SAFETY: takes no arguments; `library` is held by this closure.
            let code = unsafe { init() };
            check_status(INITIALIZE, code)
        })
        .await;

        match joined {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(BindingError::TaskAborted(e.to_string())),
        }
    }

    fn memory_info(&self) -> Result<MemoryInfo, BindingError> {
        let get: MemoryInfoFn = symbol(&self.library, GET_MEMORY_INFO)?;
        let mut total: u64 = 0;
        let mut used: u64 = 0;
        // SAFETY: both pointers refer to live, writable locals.
        let code = unsafe { get(&raw mut total, &raw mut used) };
        check_status(GET_MEMORY_INFO, code)?;
        Ok(MemoryInfo {
            total_bytes: total,
            used_bytes: used,
        })
    }

    fn device_names(&self) -> Result<Vec<String>, BindingError> {
        let get: StringFn = symbol(&self.library, GET_DEVICE_NAMES)?;
        // SAFETY: takes no arguments; the result is checked by `read_string`.
        let names = read_string(GET_DEVICE_NAMES, unsafe { get() })?.unwrap_or_default();
        Ok(names
            .lines()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn assert_device_supported(&self) -> Result<(), BindingError> {
        let assert: StatusFn = symbol(&self.library, ASSERT_DEVICE_SUPPORTED)?;
        // SAFETY: takes no arguments.
        let code = unsafe { assert() };
        check_status(ASSERT_DEVICE_SUPPORTED, code)
    }

    fn set_log_verbosity(&self, level: LogVerbosity) -> Result<(), BindingError> {
        let set: SetLogLevelFn = symbol(&self.library, SET_LOG_LEVEL)?;
        // SAFETY: plain integer argument.
        unsafe { set(level.as_level()) };
        Ok(())
    }
}
