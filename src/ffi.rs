//! FFI bindings for Synheart Nudge
//!
//! This module provides C-compatible functions for calling the insight engine
//! from host apps. All functions use C strings (null-terminated) and return
//! allocated memory that must be freed by the caller using `nudge_free_string`.
//!
//! The FFI surface is synchronous and stateless with respect to storage: the
//! host owns persistence and passes the last-sent map in and out as JSON.
//! A string argument that is not valid UTF-8 is an error, never a default.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::clock::DayReference;
use crate::config::InsightConfig;
use crate::dedupe::{select_candidate, GapPolicy, LastSentMap};
use crate::error::InsightError;
use crate::evaluator::{EvaluateOptions, InsightEvaluator};
use crate::ranker::rank_candidates;
use crate::types::{HealthHistory, InsightCandidate};

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

/// Read an optional C string argument. NULL is `Ok(None)`.
unsafe fn cstr_to_string(ptr: *const c_char, arg: &str) -> Result<Option<String>, InsightError> {
    if ptr.is_null() {
        return Ok(None);
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map(|s| Some(s.to_string()))
        .map_err(|e| InsightError::InvalidArgument(format!("{arg} is not valid UTF-8: {e}")))
}

/// Read a C string argument that must be present
unsafe fn required_cstr(ptr: *const c_char, arg: &str) -> Result<String, InsightError> {
    cstr_to_string(ptr, arg)?
        .ok_or_else(|| InsightError::InvalidArgument(format!("{arg} must not be NULL")))
}

/// Helper to convert Rust string to C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Hand a JSON result to the caller, or record the error and return NULL
fn finish(result: Result<String, InsightError>) -> *mut c_char {
    match result {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

fn parse_now(now: Option<String>) -> Result<Option<DateTime<Utc>>, InsightError> {
    now.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| InsightError::DateParseError(format!("{s}: {e}")))
    })
    .transpose()
}

unsafe fn evaluate_args(
    evaluator: &InsightEvaluator,
    history_json: *const c_char,
    now_rfc3339: *const c_char,
) -> Result<String, InsightError> {
    let history = HealthHistory::from_json(&required_cstr(history_json, "history_json")?)?;
    let now = parse_now(cstr_to_string(now_rfc3339, "now_rfc3339")?)?;
    let candidates = evaluator.evaluate(&history, EvaluateOptions { now });
    Ok(serde_json::to_string(&candidates)?)
}

#[derive(Serialize)]
struct Selection<'a> {
    accepted: Option<&'a InsightCandidate>,
    last_sent: LastSentMap,
}

unsafe fn rank_and_select_args(
    policy: &GapPolicy,
    candidates_json: *const c_char,
    last_sent_json: *const c_char,
    today: *const c_char,
) -> Result<String, InsightError> {
    let candidates: Vec<InsightCandidate> =
        serde_json::from_str(&required_cstr(candidates_json, "candidates_json")?)?;
    let mut last_sent = match cstr_to_string(last_sent_json, "last_sent_json")? {
        Some(json) if !json.trim().is_empty() => LastSentMap::from_json(&json)?,
        _ => LastSentMap::new(),
    };
    let today = DayReference::parse_day_key(&required_cstr(today, "today")?)?;

    let ranked = rank_candidates([candidates]);
    let accepted = select_candidate(&ranked, &last_sent, policy, today);
    if let Some(candidate) = accepted {
        last_sent.record(&candidate.id, today);
    }

    Ok(serde_json::to_string(&Selection {
        accepted,
        last_sent,
    })?)
}

// ============================================================================
// Stateless API
// ============================================================================

/// Evaluate a health history JSON array with the default configuration and
/// return the ranked candidate JSON array.
///
/// # Safety
/// - `history_json` must be a valid null-terminated C string.
/// - `now_rfc3339` may be NULL (system clock) or an RFC 3339 timestamp.
/// - Returns a newly allocated string that must be freed with `nudge_free_string`.
/// - Returns NULL on error; call `nudge_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn nudge_evaluate_insights(
    history_json: *const c_char,
    now_rfc3339: *const c_char,
) -> *mut c_char {
    clear_last_error();
    finish(evaluate_args(
        &InsightEvaluator::default(),
        history_json,
        now_rfc3339,
    ))
}

/// Rank candidates and pick the first one outside its gap, using the
/// default gap policy.
///
/// Returns `{"accepted": <candidate or null>, "last_sent": {...}}`; the
/// returned map already records the accepted candidate for `today`. The host
/// persists it.
///
/// # Safety
/// - `candidates_json` and `today` (`YYYY-MM-DD`) must be valid null-terminated C strings.
/// - `last_sent_json` may be NULL, meaning nothing has been sent yet.
/// - Returns a newly allocated string that must be freed with `nudge_free_string`.
/// - Returns NULL on error; call `nudge_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn nudge_rank_and_select(
    candidates_json: *const c_char,
    last_sent_json: *const c_char,
    today: *const c_char,
) -> *mut c_char {
    clear_last_error();
    finish(rank_and_select_args(
        &GapPolicy::default(),
        candidates_json,
        last_sent_json,
        today,
    ))
}

// ============================================================================
// Configured Evaluator API
// ============================================================================

/// Opaque handle to a configured InsightEvaluator
pub struct NudgeEvaluatorHandle {
    evaluator: InsightEvaluator,
}

/// Create an evaluator from an `InsightConfig` JSON document.
///
/// # Safety
/// - `config_json` may be NULL for the default configuration.
/// - Must be freed with `nudge_evaluator_free`.
/// - Returns NULL on error; call `nudge_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn nudge_evaluator_new(config_json: *const c_char) -> *mut NudgeEvaluatorHandle {
    clear_last_error();

    let config = match cstr_to_string(config_json, "config_json") {
        Ok(Some(json)) => InsightConfig::from_json(&json),
        Ok(None) => Ok(InsightConfig::default()),
        Err(e) => Err(e),
    };

    match config.and_then(InsightEvaluator::new) {
        Ok(evaluator) => Box::into_raw(Box::new(NudgeEvaluatorHandle { evaluator })),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Free an evaluator.
///
/// # Safety
/// - `evaluator` must be a valid pointer returned by `nudge_evaluator_new`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn nudge_evaluator_free(evaluator: *mut NudgeEvaluatorHandle) {
    if !evaluator.is_null() {
        drop(Box::from_raw(evaluator));
    }
}

/// Evaluate a history with a configured evaluator.
///
/// # Safety
/// - `evaluator` must be a valid pointer returned by `nudge_evaluator_new`.
/// - Other arguments as for `nudge_evaluate_insights`.
#[no_mangle]
pub unsafe extern "C" fn nudge_evaluator_evaluate(
    evaluator: *const NudgeEvaluatorHandle,
    history_json: *const c_char,
    now_rfc3339: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if evaluator.is_null() {
        set_last_error("Null evaluator pointer");
        return ptr::null_mut();
    }

    let handle = &*evaluator;
    finish(evaluate_args(&handle.evaluator, history_json, now_rfc3339))
}

/// Rank and select with the evaluator's configured gap policy.
///
/// # Safety
/// - `evaluator` must be a valid pointer returned by `nudge_evaluator_new`.
/// - Other arguments as for `nudge_rank_and_select`.
#[no_mangle]
pub unsafe extern "C" fn nudge_evaluator_rank_and_select(
    evaluator: *const NudgeEvaluatorHandle,
    candidates_json: *const c_char,
    last_sent_json: *const c_char,
    today: *const c_char,
) -> *mut c_char {
    clear_last_error();

    if evaluator.is_null() {
        set_last_error("Null evaluator pointer");
        return ptr::null_mut();
    }

    let handle = &*evaluator;
    finish(rank_and_select_args(
        &handle.evaluator.config().gap_policy,
        candidates_json,
        last_sent_json,
        today,
    ))
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by Nudge functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a Nudge function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn nudge_free_string(ptr: *mut c_char) {
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
/// - The returned pointer is valid until the next Nudge function call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn nudge_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

/// Get the Nudge library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn nudge_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    fn short_sleep_history() -> CString {
        // Five short nights with rising latency: tier 2
        CString::new(
            r#"[
            {"date":"2024-03-06","sleep_minutes":340,"time_in_bed_minutes":380},
            {"date":"2024-03-07","sleep_minutes":340,"time_in_bed_minutes":380},
            {"date":"2024-03-08","sleep_minutes":340,"time_in_bed_minutes":390},
            {"date":"2024-03-09","sleep_minutes":340,"time_in_bed_minutes":390},
            {"date":"2024-03-10","sleep_minutes":340,"time_in_bed_minutes":395}
        ]"#,
        )
        .unwrap()
    }

    unsafe fn take(ptr: *mut c_char) -> String {
        assert!(!ptr.is_null());
        let s = CStr::from_ptr(ptr).to_str().unwrap().to_string();
        nudge_free_string(ptr);
        s
    }

    #[test]
    fn test_ffi_evaluate_insights() {
        let history = short_sleep_history();
        let now = CString::new("2024-03-10T08:00:00Z").unwrap();

        unsafe {
            let result = take(nudge_evaluate_insights(history.as_ptr(), now.as_ptr()));
            let candidates: Vec<InsightCandidate> = serde_json::from_str(&result).unwrap();
            assert_eq!(candidates.len(), 1);
            assert_eq!(candidates[0].id, "tier2_sleep_latency");
        }
    }

    #[test]
    fn test_ffi_rank_and_select_records_day() {
        let history = short_sleep_history();
        let now = CString::new("2024-03-10T08:00:00Z").unwrap();
        let today = CString::new("2024-03-10").unwrap();

        unsafe {
            let candidates =
                CString::new(take(nudge_evaluate_insights(history.as_ptr(), now.as_ptr()))).unwrap();

            let first = take(nudge_rank_and_select(candidates.as_ptr(), ptr::null(), today.as_ptr()));
            let value: serde_json::Value = serde_json::from_str(&first).unwrap();
            assert_eq!(value["accepted"]["id"], "tier2_sleep_latency");
            assert_eq!(value["last_sent"]["tier2_sleep_latency"], "2024-03-10");

            let last_sent = CString::new(value["last_sent"].to_string()).unwrap();
            let second = take(nudge_rank_and_select(
                candidates.as_ptr(),
                last_sent.as_ptr(),
                today.as_ptr(),
            ));
            let value: serde_json::Value = serde_json::from_str(&second).unwrap();
            assert!(value["accepted"].is_null());
        }
    }

    #[test]
    fn test_ffi_evaluator_lifecycle() {
        let config = CString::new(r#"{"tiers":{"moderate_below_minutes":330}}"#).unwrap();
        let history = short_sleep_history();
        let now = CString::new("2024-03-10T08:00:00Z").unwrap();

        unsafe {
            let evaluator = nudge_evaluator_new(config.as_ptr());
            assert!(!evaluator.is_null());

            // 340 minutes is now tier 3
            let result = take(nudge_evaluator_evaluate(evaluator, history.as_ptr(), now.as_ptr()));
            assert!(!result.contains("tier2_"));

            nudge_evaluator_free(evaluator);
        }
    }

    #[test]
    fn test_ffi_error_handling() {
        let invalid = CString::new("not json").unwrap();
        let bad_config = CString::new(r#"{"tiers":{"critical_below_minutes":500}}"#).unwrap();

        unsafe {
            assert!(nudge_evaluate_insights(invalid.as_ptr(), ptr::null()).is_null());
            let error = CStr::from_ptr(nudge_last_error()).to_str().unwrap();
            assert!(error.starts_with("Invalid JSON"));

            assert!(nudge_evaluator_new(bad_config.as_ptr()).is_null());
            assert!(!nudge_last_error().is_null());

            let today = CString::new("10/03/2024").unwrap();
            let empty = CString::new("[]").unwrap();
            assert!(nudge_rank_and_select(empty.as_ptr(), ptr::null(), today.as_ptr()).is_null());
        }
    }

    #[test]
    fn test_ffi_version() {
        unsafe {
            let version = CStr::from_ptr(nudge_version()).to_str().unwrap();
            assert_eq!(version, crate::NUDGE_VERSION);
        }
    }

    #[test]
    fn test_ffi_invalid_utf8_last_sent_is_rejected() {
        let candidates = CString::new(
            r#"[{"id":"tier2_sleep_latency","tier":2,"category":"sleep_health","title":"t","body":"b",
                "source":{"name":"s","url":"https://example.org"}}]"#,
        )
        .unwrap();
        let today = CString::new("2024-03-10").unwrap();
        let mut corrupt = br#"{"tier2_sleep_latency":"2024-03-10"}"#.to_vec();
        corrupt.push(0xFF);
        let corrupt = CString::new(corrupt).unwrap();

        unsafe {
            let result = nudge_rank_and_select(candidates.as_ptr(), corrupt.as_ptr(), today.as_ptr());
            assert!(result.is_null());
            let error = CStr::from_ptr(nudge_last_error()).to_str().unwrap();
            assert!(error.contains("last_sent_json is not valid UTF-8"));
        }
    }

    #[test]
    fn test_ffi_invalid_utf8_optional_arguments_are_rejected() {
        let history = short_sleep_history();
        let bad = CString::new(vec![b'2', 0xFE, b'0']).unwrap();

        unsafe {
            assert!(nudge_evaluate_insights(history.as_ptr(), bad.as_ptr()).is_null());
            let error = CStr::from_ptr(nudge_last_error()).to_str().unwrap();
            assert!(error.contains("now_rfc3339"));

            assert!(nudge_evaluator_new(bad.as_ptr()).is_null());
            let error = CStr::from_ptr(nudge_last_error()).to_str().unwrap();
            assert!(error.contains("config_json"));
        }
    }

    #[test]
    fn test_ffi_null_required_argument() {
        unsafe {
            assert!(nudge_evaluate_insights(ptr::null(), ptr::null()).is_null());
            let error = CStr::from_ptr(nudge_last_error()).to_str().unwrap();
            assert!(error.contains("history_json must not be NULL"));
        }
    }

    #[test]
    fn test_ffi_evaluator_rank_and_select_uses_configured_gap() {
        let config = CString::new(r#"{"gap_policy":{"min_gap_days":{"sleep_health":3}}}"#).unwrap();
        let history = short_sleep_history();
        let now = CString::new("2024-03-10T08:00:00Z").unwrap();
        let today = CString::new("2024-03-10").unwrap();
        let last_sent = CString::new(r#"{"tier2_sleep_latency":"2024-03-08"}"#).unwrap();

        unsafe {
            let candidates =
                CString::new(take(nudge_evaluate_insights(history.as_ptr(), now.as_ptr()))).unwrap();

            // two days since the last delivery: enough for the default one-day gap
            let default = take(nudge_rank_and_select(
                candidates.as_ptr(),
                last_sent.as_ptr(),
                today.as_ptr(),
            ));
            let value: serde_json::Value = serde_json::from_str(&default).unwrap();
            assert_eq!(value["accepted"]["id"], "tier2_sleep_latency");

            let evaluator = nudge_evaluator_new(config.as_ptr());
            assert!(!evaluator.is_null());
            let configured = take(nudge_evaluator_rank_and_select(
                evaluator,
                candidates.as_ptr(),
                last_sent.as_ptr(),
                today.as_ptr(),
            ));
            let value: serde_json::Value = serde_json::from_str(&configured).unwrap();
            assert!(value["accepted"].is_null());
            assert_eq!(value["last_sent"]["tier2_sleep_latency"], "2024-03-08");

            nudge_evaluator_free(evaluator);
        }
    }
}
