//! C ABI
//!
//! Registries are referenced by opaque non-zero `u64` handles resolved
//! through a process-wide table, so a stale or doubly-freed handle is
//! detected instead of dereferenced. Every string returned to the caller is
//! owned by the caller and must be released with [`lsp_free_string`].

use std::collections::HashMap;
use std::ffi::{CStr, CString, c_char};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, OnceLock};

use crate::error::{LspError, status};
use crate::infra::lsp::servers::installation_status;
use crate::registry::Registry;
use crate::services::config::load_or_default;

/// Filter for logs emitted on behalf of a foreign host.
pub const LOG_ENV: &str = "LSP_REGISTRY_LOG";

static REGISTRIES: LazyLock<Mutex<HashMap<u64, Arc<Registry>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));
static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);
static LOGGING: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGING.get_or_init(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_env(LOG_ENV)
            .unwrap_or_else(|_| "lsp_registry=warn".into());
        // the host may already have installed a subscriber
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .compact()
            .try_init();
    });
}

fn registries() -> MutexGuard<'static, HashMap<u64, Arc<Registry>>> {
    REGISTRIES
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn lookup(handle: u64) -> Result<Arc<Registry>, LspError> {
    registries()
        .get(&handle)
        .cloned()
        .ok_or_else(|| LspError::InvalidParams(format!("unknown registry handle {}", handle)))
}

/// Borrow a required C string argument.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string valid for `'a`.
unsafe fn arg<'a>(ptr: *const c_char, name: &str) -> Result<&'a str, LspError> {
    if ptr.is_null() {
        return Err(LspError::InvalidParams(format!("{} must not be null", name)));
    }
    // SAFETY: non-null and NUL-terminated per the caller contract
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map_err(|_| LspError::InvalidParams(format!("{} is not valid UTF-8", name)))
}

/// Borrow an optional C string argument; null means absent.
///
/// # Safety
/// Same contract as [`arg`].
unsafe fn optional_arg<'a>(ptr: *const c_char, name: &str) -> Result<Option<&'a str>, LspError> {
    if ptr.is_null() {
        return Ok(None);
    }
    // SAFETY: forwarded caller contract
    unsafe { arg(ptr, name) }.map(Some)
}

fn into_c_string(text: String) -> *mut c_char {
    CString::new(text)
        .unwrap_or_else(|e| {
            tracing::warn!("Returned string contained NUL at {}", e.nul_position());
            CString::default()
        })
        .into_raw()
}

fn status_of(result: Result<(), LspError>) -> i32 {
    match result {
        Ok(()) => status::OK,
        Err(e) => {
            tracing::debug!("LSP call failed: {}", e);
            e.status_code()
        }
    }
}

/// Create a registry rooted at `root_uri`. Returns `0` on failure.
///
/// # Safety
/// `root_uri` must be null or a valid NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lsp_registry_new(root_uri: *const c_char) -> u64 {
    init_logging();

    // SAFETY: forwarded caller contract
    let root_uri = match unsafe { arg(root_uri, "root_uri") } {
        Ok(root_uri) => root_uri,
        Err(e) => {
            tracing::warn!("lsp_registry_new: {}", e);
            return 0;
        }
    };

    match Registry::new(root_uri) {
        Ok(registry) => {
            let handle = NEXT_HANDLE.fetch_add(1, Ordering::Relaxed);
            registries().insert(handle, Arc::new(registry));
            handle
        }
        Err(e) => {
            tracing::warn!("lsp_registry_new({}): {}", root_uri, e);
            0
        }
    }
}

/// Release a registry, shutting its servers down. Unknown handles are ignored.
#[unsafe(no_mangle)]
pub extern "C" fn lsp_registry_free(handle: u64) {
    let registry = registries().remove(&handle);
    if let Some(registry) = registry {
        // in-flight calls on other threads hold their own Arc
        registry.close();
    }
}

/// # Safety
/// String arguments must be null or valid NUL-terminated strings.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lsp_ensure_servers(
    handle: u64,
    language_id: *const c_char,
    file_uri: *const c_char,
) -> i32 {
    status_of((|| -> Result<(), LspError> {
        let registry = lookup(handle)?;
        // SAFETY: forwarded caller contract
        let language_id = unsafe { arg(language_id, "language_id") }?;
        let file_uri = unsafe { optional_arg(file_uri, "file_uri") }?.unwrap_or_default();
        registry.ensure_servers(language_id, file_uri)
    })())
}

/// Send a request and block until it resolves.
///
/// Returns the JSON result, or `{"error":{...}}`. Never returns null.
///
/// # Safety
/// String arguments must be null or valid NUL-terminated strings.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lsp_request(
    handle: u64,
    language_id: *const c_char,
    file_uri: *const c_char,
    method: *const c_char,
    params_json: *const c_char,
) -> *mut c_char {
    let outcome = (|| -> Result<String, LspError> {
        let registry = lookup(handle)?;
        // SAFETY: forwarded caller contract
        let language_id = unsafe { arg(language_id, "language_id") }?;
        let file_uri = unsafe { optional_arg(file_uri, "file_uri") }?.unwrap_or_default();
        let method = unsafe { arg(method, "method") }?;
        let params_json = unsafe { optional_arg(params_json, "params_json") }?;
        Ok(registry.request_json(language_id, file_uri, method, params_json))
    })();

    into_c_string(outcome.unwrap_or_else(|e| e.to_json().to_string()))
}

/// # Safety
/// String arguments must be null or valid NUL-terminated strings.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lsp_notify(
    handle: u64,
    language_id: *const c_char,
    file_uri: *const c_char,
    method: *const c_char,
    params_json: *const c_char,
) -> i32 {
    status_of((|| -> Result<(), LspError> {
        let registry = lookup(handle)?;
        // SAFETY: forwarded caller contract
        let language_id = unsafe { arg(language_id, "language_id") }?;
        let file_uri = unsafe { optional_arg(file_uri, "file_uri") }?.unwrap_or_default();
        let method = unsafe { arg(method, "method") }?;
        let params_json = unsafe { optional_arg(params_json, "params_json") }?;
        registry.notify_json(language_id, file_uri, method, params_json)
    })())
}

/// Next buffered event as JSON, or null when none is pending.
#[unsafe(no_mangle)]
pub extern "C" fn lsp_poll_event(handle: u64) -> *mut c_char {
    match lookup(handle).map(|registry| registry.poll_event_json()) {
        Ok(Some(json)) => into_c_string(json),
        Ok(None) => std::ptr::null_mut(),
        Err(e) => {
            tracing::debug!("lsp_poll_event: {}", e);
            std::ptr::null_mut()
        }
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn lsp_shutdown_all(handle: u64) -> i32 {
    status_of(lookup(handle).and_then(|registry| registry.shutdown_all()))
}

/// Installation status of every configured server as a JSON array.
#[unsafe(no_mangle)]
pub extern "C" fn lsp_check_status() -> *mut c_char {
    init_logging();
    let statuses = installation_status(&load_or_default().server_table());
    let json = serde_json::to_string(&statuses).unwrap_or_else(|_| String::from("[]"));
    into_c_string(json)
}

/// Release a string returned by this library. Null is ignored.
///
/// # Safety
/// `ptr` must be null or a pointer previously returned by this library and
/// not yet freed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lsp_free_string(ptr: *mut c_char) {
    if ptr.is_null() {
        return;
    }
    // SAFETY: produced by CString::into_raw in this module
    drop(unsafe { CString::from_raw(ptr) });
}
