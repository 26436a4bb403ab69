//! FFI bindings for engagement scoring
//!
//! This module provides C-compatible functions for scoring event batches from
//! other languages. Batches go in and outcomes come out as JSON. All functions
//! use C strings (null-terminated) and return allocated memory that must be
//! freed by the caller using `engage_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use crate::config::ScoringConfig;
use crate::error::ComputeError;
use crate::pipeline::{score_json, EngagementProcessor};
use crate::schema::RawEventAdapter;
use crate::types::BatchOutcome;

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Set the last error message
fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

/// Clear the last error message
fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Helper to convert C string to Rust string
unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Helper to convert Rust string to C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Parse an optional JSON config; NULL or blank means defaults
unsafe fn config_from_ptr(config_json: *const c_char) -> Result<ScoringConfig, ComputeError> {
    if config_json.is_null() {
        return Ok(ScoringConfig::default());
    }
    let raw = cstr_to_string(config_json)
        .ok_or_else(|| ComputeError::ConfigError("config is not valid UTF-8".to_string()))?;
    if raw.trim().is_empty() {
        return Ok(ScoringConfig::default());
    }
    let config: ScoringConfig = serde_json::from_str(&raw)?;
    config.validate()?;
    Ok(config)
}

fn outcome_to_cstr(result: Result<BatchOutcome, ComputeError>) -> *mut c_char {
    let json =
        result.and_then(|outcome| serde_json::to_string(&outcome).map_err(ComputeError::from));
    match json {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Stateless API
// ============================================================================

/// Score a JSON array of raw events and return the batch outcome as JSON.
///
/// # Safety
/// - `events_json` must be a valid null-terminated C string.
/// - `config_json` may be NULL (defaults) or a null-terminated JSON object
///   with any of `average_reading_speed`, `sampling_interval_seconds`,
///   `max_parallelism`.
/// - Returns a newly allocated string that must be freed with `engage_free_string`.
/// - Returns NULL on error; call `engage_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn engage_score_batch(
    events_json: *const c_char,
    config_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let events_str = match cstr_to_string(events_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid events string pointer");
            return ptr::null_mut();
        }
    };

    let config = match config_from_ptr(config_json) {
        Ok(config) => config,
        Err(e) => {
            set_last_error(&e.to_string());
            return ptr::null_mut();
        }
    };

    outcome_to_cstr(score_json(&events_str, &config))
}

// ============================================================================
// Stateful Processor API
// ============================================================================

/// Opaque handle to an EngagementProcessor
pub struct EngageProcessorHandle {
    processor: EngagementProcessor,
}

/// Create a new processor.
///
/// # Safety
/// - `config_json` may be NULL (defaults) or a null-terminated JSON object.
/// - Returns a pointer to a newly allocated processor.
/// - Must be freed with `engage_processor_free`.
/// - Returns NULL on error; call `engage_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn engage_processor_new(
    config_json: *const c_char,
) -> *mut EngageProcessorHandle {
    clear_last_error();

    let processor = match config_from_ptr(config_json).and_then(EngagementProcessor::new) {
        Ok(processor) => processor,
        Err(e) => {
            set_last_error(&e.to_string());
            return ptr::null_mut();
        }
    };

    Box::into_raw(Box::new(EngageProcessorHandle { processor }))
}

/// Free a processor.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `engage_processor_new`.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn engage_processor_free(processor: *mut EngageProcessorHandle) {
    if !processor.is_null() {
        drop(Box::from_raw(processor));
    }
}

/// Score NDJSON events with a processor and return the batch outcome as JSON.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `engage_processor_new`.
/// - `events_ndjson` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `engage_free_string`.
/// - Returns NULL on error; call `engage_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn engage_processor_score(
    processor: *const EngageProcessorHandle,
    events_ndjson: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if processor.is_null() {
        set_last_error("Null processor pointer");
        return ptr::null_mut();
    }

    let handle = &*processor;

    let events_str = match cstr_to_string(events_ndjson) {
        Some(s) => s,
        None => {
            set_last_error("Invalid events string pointer");
            return ptr::null_mut();
        }
    };

    let result = RawEventAdapter::parse_ndjson(&events_str)
        .map(|records| handle.processor.score_batch(records));
    outcome_to_cstr(result)
}

/// Cancel the current and future runs on a processor until
/// `engage_processor_reset` is called.
///
/// Sessions already scored are kept; the rest are reported as abandoned.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `engage_processor_new`.
#[no_mangle]
pub unsafe extern "C" fn engage_processor_cancel(processor: *const EngageProcessorHandle) {
    if !processor.is_null() {
        (*processor).processor.cancel_token().cancel();
    }
}

/// Clear a cancellation so the processor scores again.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `engage_processor_new`.
#[no_mangle]
pub unsafe extern "C" fn engage_processor_reset(processor: *const EngageProcessorHandle) {
    if !processor.is_null() {
        (*processor).processor.cancel_token().reset();
    }
}

/// Free a string returned by engage functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by an engage function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn engage_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next engage function call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn engage_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn engage_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}
