//! FFI bindings for the GameBuddy engine
//!
//! This module provides C-compatible functions for driving the engine from the
//! desktop shell. All functions use C strings (null-terminated) and return
//! allocated memory that must be freed by the caller using `gb_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use chrono::{DateTime, Utc};

use crate::config::EngineConfig;
use crate::pipeline::{replay_to_json, FocusProcessor, DEFAULT_PROFILE};

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

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

/// Parse an optional JSON array of context tags; NULL means no tags
unsafe fn tags_from_cstr(ptr: *const c_char) -> Result<Vec<String>, String> {
    if ptr.is_null() {
        return Ok(Vec::new());
    }
    let json = cstr_to_string(ptr).ok_or("Invalid tags string pointer")?;
    serde_json::from_str(&json).map_err(|e| format!("Invalid tags JSON: {e}"))
}

/// Milliseconds since the Unix epoch to a timestamp
fn timestamp_from_millis(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(millis)
}

// ============================================================================
// Stateless API
// ============================================================================

/// Replay a JSON array of feature records and return a JSON session report.
///
/// # Safety
/// - `records_json` must be a valid null-terminated C string.
/// - `config_json` may be NULL for the default configuration.
/// - Returns a newly allocated string that must be freed with `gb_free_string`.
/// - Returns NULL on error; call `gb_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn gb_replay(
    records_json: *const c_char,
    config_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let Some(records) = cstr_to_string(records_json) else {
        set_last_error("Invalid records string pointer");
        return ptr::null_mut();
    };

    let config = if config_json.is_null() {
        None
    } else {
        match cstr_to_string(config_json) {
            Some(s) => Some(s),
            None => {
                set_last_error("Invalid config string pointer");
                return ptr::null_mut();
            }
        }
    };

    match replay_to_json(&records, config.as_deref()) {
        Ok(report) => string_to_cstr(&report),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Stateful Engine API
// ============================================================================

/// Opaque handle to a FocusProcessor
pub struct GbEngineHandle {
    processor: FocusProcessor,
}

/// Create an engine for one profile.
///
/// # Safety
/// - `profile_id` may be NULL for the default profile.
/// - `config_json` may be NULL for the default configuration.
/// - Returns a pointer that must be freed with `gb_engine_free`.
/// - Returns NULL on error; call `gb_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn gb_engine_new(
    profile_id: *const c_char,
    config_json: *const c_char,
) -> *mut GbEngineHandle {
    clear_last_error();

    let profile = if profile_id.is_null() {
        DEFAULT_PROFILE.to_string()
    } else {
        match cstr_to_string(profile_id) {
            Some(s) => s,
            None => {
                set_last_error("Invalid profile_id string pointer");
                return ptr::null_mut();
            }
        }
    };

    let config = if config_json.is_null() {
        Ok(EngineConfig::default())
    } else {
        match cstr_to_string(config_json) {
            Some(json) => EngineConfig::from_json(&json),
            None => {
                set_last_error("Invalid config string pointer");
                return ptr::null_mut();
            }
        }
    };

    let processor = config.and_then(|config| FocusProcessor::new(&profile, config, Utc::now()));
    match processor {
        Ok(processor) => Box::into_raw(Box::new(GbEngineHandle { processor })),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Free an engine.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `gb_engine_new`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn gb_engine_free(engine: *mut GbEngineHandle) {
    if !engine.is_null() {
        drop(Box::from_raw(engine));
    }
}

/// Run one cycle with a JSON feature record; returns a JSON cycle envelope.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `gb_engine_new`.
/// - `record_json` must be a valid null-terminated C string.
/// - `tags_json` may be NULL, otherwise a JSON array of strings.
/// - Returns a newly allocated string that must be freed with `gb_free_string`.
/// - Returns NULL on error; call `gb_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn gb_engine_process(
    engine: *mut GbEngineHandle,
    record_json: *const c_char,
    tags_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return ptr::null_mut();
    }
    let handle = &mut *engine;

    let Some(record) = cstr_to_string(record_json) else {
        set_last_error("Invalid record string pointer");
        return ptr::null_mut();
    };
    let tags = match tags_from_cstr(tags_json) {
        Ok(tags) => tags,
        Err(msg) => {
            set_last_error(&msg);
            return ptr::null_mut();
        }
    };

    match handle.processor.process_json(&record, &tags) {
        Ok(envelope) => string_to_cstr(&envelope),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Run one cycle with no new record; the previous output is repeated as stale.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `gb_engine_new`.
/// - Returns a newly allocated string that must be freed with `gb_free_string`.
/// - Returns NULL on error; call `gb_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn gb_engine_tick(
    engine: *mut GbEngineHandle,
    now_millis: i64,
) -> *mut c_char {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return ptr::null_mut();
    }
    let handle = &mut *engine;

    let Some(now) = timestamp_from_millis(now_millis) else {
        set_last_error("Timestamp out of range");
        return ptr::null_mut();
    };

    match handle.processor.tick_json(now) {
        Ok(envelope) => string_to_cstr(&envelope),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Stage a new configuration, applied at the next cycle.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `gb_engine_new`.
/// - `config_json` must be a valid null-terminated C string.
/// - Returns 0 on success, non-zero on error (active configuration unchanged).
#[no_mangle]
pub unsafe extern "C" fn gb_engine_set_config(
    engine: *mut GbEngineHandle,
    config_json: *const c_char,
) -> i32 {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return -1;
    }
    let handle = &*engine;

    let Some(json) = cstr_to_string(config_json) else {
        set_last_error("Invalid config string pointer");
        return -1;
    };

    match handle.processor.stage_config_json(&json) {
        Ok(()) => 0,
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

/// Start a calibration session at `now_millis`.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `gb_engine_new`.
/// - Returns 0 on success, non-zero on error.
#[no_mangle]
pub unsafe extern "C" fn gb_engine_start_calibration(
    engine: *mut GbEngineHandle,
    now_millis: i64,
) -> i32 {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return -1;
    }
    let handle = &mut *engine;

    match timestamp_from_millis(now_millis) {
        Some(now) => {
            handle.processor.start_calibration(now);
            0
        }
        None => {
            set_last_error("Timestamp out of range");
            -1
        }
    }
}

/// Cancel a running calibration session.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `gb_engine_new`.
/// - Returns 0 on success, non-zero on error.
#[no_mangle]
pub unsafe extern "C" fn gb_engine_cancel_calibration(engine: *mut GbEngineHandle) -> i32 {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return -1;
    }
    let handle = &mut *engine;
    handle.processor.cancel_calibration();
    0
}

/// Report an external event (e.g. `break_taken`); returns a JSON array of
/// achievements it unlocked.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `gb_engine_new`.
/// - `name` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `gb_free_string`.
/// - Returns NULL on error; call `gb_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn gb_engine_record_event(
    engine: *mut GbEngineHandle,
    name: *const c_char,
    now_millis: i64,
) -> *mut c_char {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return ptr::null_mut();
    }
    let handle = &mut *engine;

    let Some(name) = cstr_to_string(name) else {
        set_last_error("Invalid event name pointer");
        return ptr::null_mut();
    };
    let Some(now) = timestamp_from_millis(now_millis) else {
        set_last_error("Timestamp out of range");
        return ptr::null_mut();
    };

    match handle.processor.record_event_json(&name, now) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Context tags ranked by how often they accompany a state.
///
/// With `state` NULL, returns a JSON object keyed by state; otherwise a JSON
/// array for that state (e.g. `"highly_frustrated"`).
///
/// # Safety
/// - `engine` must be a valid pointer returned by `gb_engine_new`.
/// - `state` must be NULL or a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `gb_free_string`.
/// - Returns NULL on error; call `gb_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn gb_engine_correlations(
    engine: *const GbEngineHandle,
    state: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return ptr::null_mut();
    }
    let handle = &*engine;

    let state = if state.is_null() {
        None
    } else {
        match cstr_to_string(state) {
            Some(s) => Some(s),
            None => {
                set_last_error("Invalid state pointer");
                return ptr::null_mut();
            }
        }
    };

    match handle.processor.correlations_json(state.as_deref()) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Save durable profile state to JSON.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `gb_engine_new`.
/// - Returns a newly allocated string that must be freed with `gb_free_string`.
/// - Returns NULL on error; call `gb_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn gb_engine_save_state(engine: *mut GbEngineHandle) -> *mut c_char {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return ptr::null_mut();
    }
    let handle = &*engine;

    match handle.processor.save_state() {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Load durable profile state from JSON.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `gb_engine_new`.
/// - `json` must be a valid null-terminated C string.
/// - Returns 0 on success, non-zero on error.
/// - On error, call `gb_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn gb_engine_load_state(
    engine: *mut GbEngineHandle,
    json: *const c_char,
) -> i32 {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return -1;
    }
    let handle = &mut *engine;

    let Some(json_str) = cstr_to_string(json) else {
        set_last_error("Invalid JSON string pointer");
        return -1;
    };

    match handle.processor.load_state(&json_str) {
        Ok(()) => 0,
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by GameBuddy functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a `gb_` function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn gb_free_string(ptr: *mut c_char) {
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
/// - The returned pointer is valid until the next `gb_` call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn gb_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

/// Get the engine library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn gb_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FeatureRecord;
    use chrono::{Duration, TimeZone};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn record_json(secs: i64) -> CString {
        CString::new(serde_json::to_string(&FeatureRecord::no_face(t(secs))).unwrap()).unwrap()
    }

    unsafe fn take_string(ptr: *mut c_char) -> String {
        assert!(!ptr.is_null());
        let s = CStr::from_ptr(ptr).to_str().unwrap().to_string();
        gb_free_string(ptr);
        s
    }

    #[test]
    fn test_ffi_replay() {
        let records: Vec<FeatureRecord> = (0..3).map(|i| FeatureRecord::no_face(t(i * 3))).collect();
        let json = CString::new(serde_json::to_string(&records).unwrap()).unwrap();

        unsafe {
            let report = take_string(gb_replay(json.as_ptr(), ptr::null()));
            assert!(report.contains("\"cycle_count\": 3"));
        }
    }

    #[test]
    fn test_ffi_engine_lifecycle() {
        let profile = CString::new("alice").unwrap();
        let tags = CString::new(r#"["game:chess"]"#).unwrap();

        unsafe {
            let engine = gb_engine_new(profile.as_ptr(), ptr::null());
            assert!(!engine.is_null());

            let record = record_json(0);
            let envelope = take_string(gb_engine_process(engine, record.as_ptr(), tags.as_ptr()));
            assert!(envelope.contains("highly_distracted"));

            let stale = take_string(gb_engine_tick(engine, t(3).timestamp_millis()));
            assert!(stale.contains("\"stale\":true"));

            let event = CString::new("break_taken").unwrap();
            let unlocked = take_string(gb_engine_record_event(
                engine,
                event.as_ptr(),
                t(4).timestamp_millis(),
            ));
            assert!(unlocked.contains("first_break_taken"));

            let record = record_json(6);
            let envelope = take_string(gb_engine_process(engine, record.as_ptr(), tags.as_ptr()));
            assert!(!envelope.contains("first_break_taken"));

            let all = take_string(gb_engine_correlations(engine, ptr::null()));
            assert_eq!(all, "{}");
            let state = CString::new("highly_distracted").unwrap();
            let ranked = take_string(gb_engine_correlations(engine, state.as_ptr()));
            assert_eq!(ranked, "[]");
            let bogus = CString::new("sleepy").unwrap();
            assert!(gb_engine_correlations(engine, bogus.as_ptr()).is_null());
            assert!(!gb_last_error().is_null());

            let state = gb_engine_save_state(engine);
            assert!(!state.is_null());

            let engine2 = gb_engine_new(profile.as_ptr(), ptr::null());
            assert_eq!(gb_engine_load_state(engine2, state), 0);

            gb_free_string(state);
            gb_engine_free(engine);
            gb_engine_free(engine2);
        }
    }

    #[test]
    fn test_ffi_calibration_and_config() {
        unsafe {
            let engine = gb_engine_new(ptr::null(), ptr::null());
            assert_eq!(gb_engine_start_calibration(engine, t(0).timestamp_millis()), 0);

            let record = record_json(3);
            let envelope = take_string(gb_engine_process(engine, record.as_ptr(), ptr::null()));
            assert!(envelope.contains("\"calibrating\":true"));
            assert_eq!(gb_engine_cancel_calibration(engine), 0);

            let bad = CString::new(r#"{ "cycle_period_secs": -3 }"#).unwrap();
            assert_eq!(gb_engine_set_config(engine, bad.as_ptr()), -1);
            assert!(!gb_last_error().is_null());

            let good = CString::new(r#"{ "cycle_period_secs": 5 }"#).unwrap();
            assert_eq!(gb_engine_set_config(engine, good.as_ptr()), 0);

            gb_engine_free(engine);
        }
    }

    #[test]
    fn test_ffi_error_handling() {
        unsafe {
            let engine = gb_engine_new(ptr::null(), ptr::null());
            let invalid = CString::new("not json").unwrap();
            let result = gb_engine_process(engine, invalid.as_ptr(), ptr::null());
            assert!(result.is_null());

            let error = gb_last_error();
            assert!(!error.is_null());
            assert!(!CStr::from_ptr(error).to_str().unwrap().is_empty());

            let bad_tags = CString::new("{").unwrap();
            let record = record_json(0);
            assert!(gb_engine_process(engine, record.as_ptr(), bad_tags.as_ptr()).is_null());

            assert!(gb_engine_process(ptr::null_mut(), record.as_ptr(), ptr::null()).is_null());
            gb_engine_free(engine);
        }
    }

    #[test]
    fn test_ffi_version() {
        unsafe {
            let version = CStr::from_ptr(gb_version()).to_str().unwrap();
            assert_eq!(version, env!("CARGO_PKG_VERSION"));
        }
    }
}
