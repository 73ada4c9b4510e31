//! Handle-based C interface to the rule registry.
//!
//! Handles are opaque pointers returned by `waf_create_rules_set` and
//! released with `waf_rules_cleanup`; there is no implicit global
//! registry. Status returns follow the engine convention: a non-negative
//! count of rules affected on success, `-1` on failure.
//!
//! On failure, when the caller passes a non-null `error` out-parameter it
//! receives a NUL-terminated diagnostic allocated by this library; the
//! caller owns that buffer and must release it with `waf_error_free`.
//!
//! Transaction handles are produced by the embedding engine; this surface
//! only dispatches evaluation against them.

use std::ffi::{c_char, c_int, CStr, CString};

use crate::registry::RulesSet;
use crate::transaction::Transaction;

/// Allocate a diagnostic for the caller, if an out-parameter was given.
unsafe fn set_error(error: *mut *mut c_char, message: &str) {
    if error.is_null() {
        return;
    }
    let message = CString::new(message).unwrap_or_default();
    *error = message.into_raw();
}

/// Borrow a UTF-8 string from a C pointer.
unsafe fn borrow_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok()
}

/// Create an empty rule set. Release it with [`waf_rules_cleanup`].
#[no_mangle]
pub extern "C" fn waf_create_rules_set() -> *mut RulesSet {
    Box::into_raw(Box::new(RulesSet::new()))
}

/// Print the rule set's diagnostic listing to stdout.
///
/// # Safety
///
/// `set` must be null or a live handle from [`waf_create_rules_set`].
#[no_mangle]
pub unsafe extern "C" fn waf_rules_dump(set: *mut RulesSet) {
    if let Some(set) = set.as_ref() {
        let _ = set.dump();
    }
}

/// Merge every rule from `src` into `dst`.
///
/// # Safety
///
/// `dst` and `src` must be distinct live handles; `error` must be null or
/// a valid out-parameter.
#[no_mangle]
pub unsafe extern "C" fn waf_rules_merge(
    dst: *mut RulesSet,
    src: *const RulesSet,
    error: *mut *mut c_char,
) -> c_int {
    let (Some(dst), Some(src)) = (dst.as_mut(), src.as_ref()) else {
        set_error(error, "null rules set handle");
        return -1;
    };
    match dst.merge(src) {
        Ok(count) => count as c_int,
        Err(err) => {
            set_error(error, &err.to_string());
            -1
        }
    }
}

/// Fetch a rule document from a remote server and add its rules.
///
/// # Safety
///
/// `set` must be a live handle; `key` and `uri` must be NUL-terminated
/// strings; `error` must be null or a valid out-parameter.
#[no_mangle]
pub unsafe extern "C" fn waf_rules_add_remote(
    set: *mut RulesSet,
    key: *const c_char,
    uri: *const c_char,
    error: *mut *mut c_char,
) -> c_int {
    let Some(set) = set.as_mut() else {
        set_error(error, "null rules set handle");
        return -1;
    };
    let (Some(key), Some(uri)) = (borrow_str(key), borrow_str(uri)) else {
        set_error(error, "key and uri must be valid UTF-8 strings");
        return -1;
    };
    match set.load_remote(key, uri) {
        Ok(count) => count as c_int,
        Err(err) => {
            set_error(error, &err.to_string());
            -1
        }
    }
}

/// Load a rule document from a file and add its rules.
///
/// # Safety
///
/// `set` must be a live handle; `path` must be a NUL-terminated string;
/// `error` must be null or a valid out-parameter.
#[no_mangle]
pub unsafe extern "C" fn waf_rules_add_file(
    set: *mut RulesSet,
    path: *const c_char,
    error: *mut *mut c_char,
) -> c_int {
    let Some(set) = set.as_mut() else {
        set_error(error, "null rules set handle");
        return -1;
    };
    let Some(path) = borrow_str(path) else {
        set_error(error, "path must be a valid UTF-8 string");
        return -1;
    };
    match set.load_from_uri(path) {
        Ok(count) => count as c_int,
        Err(err) => {
            set_error(error, &err.to_string());
            -1
        }
    }
}

/// Parse a rule document given as text and add its rules.
///
/// # Safety
///
/// `set` must be a live handle; `plain_rules` must be a NUL-terminated
/// string; `error` must be null or a valid out-parameter.
#[no_mangle]
pub unsafe extern "C" fn waf_rules_add(
    set: *mut RulesSet,
    plain_rules: *const c_char,
    error: *mut *mut c_char,
) -> c_int {
    let Some(set) = set.as_mut() else {
        set_error(error, "null rules set handle");
        return -1;
    };
    let Some(text) = borrow_str(plain_rules) else {
        set_error(error, "rules text must be a valid UTF-8 string");
        return -1;
    };
    match set.load(text) {
        Ok(count) => count as c_int,
        Err(err) => {
            set_error(error, &err.to_string());
            -1
        }
    }
}

/// Evaluate one phase of a rule set against a transaction.
///
/// Returns 1 when processing should continue to the next phase, 0 when a
/// disruptive action short-circuited it, -1 on a bad handle or phase.
///
/// # Safety
///
/// `set` and `tx` must be live handles owned by the caller.
#[no_mangle]
pub unsafe extern "C" fn waf_rules_process(
    set: *const RulesSet,
    phase: c_int,
    tx: *mut Transaction,
) -> c_int {
    let (Some(set), Some(tx)) = (set.as_ref(), tx.as_mut()) else {
        return -1;
    };
    if phase < 0 {
        return -1;
    }
    if set.evaluate(phase as usize, tx).should_continue() {
        1
    } else {
        0
    }
}

/// Destroy a rule set, releasing its share of every held rule.
///
/// # Safety
///
/// `set` must be null or a live handle; it must not be used afterwards.
#[no_mangle]
pub unsafe extern "C" fn waf_rules_cleanup(set: *mut RulesSet) -> c_int {
    if set.is_null() {
        return -1;
    }
    drop(Box::from_raw(set));
    1
}

/// Release an error buffer produced by this interface.
///
/// # Safety
///
/// `message` must be null or a buffer received through an `error`
/// out-parameter of this interface, not yet freed.
#[no_mangle]
pub unsafe extern "C" fn waf_error_free(message: *mut c_char) {
    if !message.is_null() {
        drop(CString::from_raw(message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr;

    const DOC_A: &str = "rules:\n  - {id: 100, phase: 2, target: uri, operator: contains, value: a}\n";
    const DOC_B: &str = "rules:\n  - {id: 200, phase: 2, target: uri, operator: contains, value: b}\n";

    fn c(text: &str) -> CString {
        CString::new(text).unwrap()
    }

    #[test]
    fn test_add_and_cleanup() {
        unsafe {
            let set = waf_create_rules_set();
            let mut error: *mut c_char = ptr::null_mut();

            let doc = c(DOC_A);
            let status = waf_rules_add(set, doc.as_ptr(), &mut error);
            assert_eq!(status, 1);
            assert!(error.is_null());

            assert_eq!(waf_rules_cleanup(set), 1);
        }
    }

    #[test]
    fn test_add_reports_parse_error() {
        unsafe {
            let set = waf_create_rules_set();
            let mut error: *mut c_char = ptr::null_mut();

            let doc = c("rules: [bogus]");
            let status = waf_rules_add(set, doc.as_ptr(), &mut error);
            assert_eq!(status, -1);
            assert!(!error.is_null());

            let message = CStr::from_ptr(error).to_str().unwrap().to_string();
            assert!(message.contains("invalid rule document"));
            waf_error_free(error);
            waf_rules_cleanup(set);
        }
    }

    #[test]
    fn test_merge_duplicate_reports_id() {
        unsafe {
            let dst = waf_create_rules_set();
            let src = waf_create_rules_set();
            let mut error: *mut c_char = ptr::null_mut();

            let doc = c(DOC_A);
            assert_eq!(waf_rules_add(dst, doc.as_ptr(), &mut error), 1);
            assert_eq!(waf_rules_add(src, doc.as_ptr(), &mut error), 1);

            let status = waf_rules_merge(dst, src, &mut error);
            assert_eq!(status, -1);
            let message = CStr::from_ptr(error).to_str().unwrap().to_string();
            assert_eq!(message, "Rule id: 100 is duplicated");

            waf_error_free(error);
            waf_rules_cleanup(dst);
            waf_rules_cleanup(src);
        }
    }

    #[test]
    fn test_merge_disjoint_counts_rules() {
        unsafe {
            let dst = waf_create_rules_set();
            let src = waf_create_rules_set();

            let doc_a = c(DOC_A);
            let doc_b = c(DOC_B);
            assert_eq!(waf_rules_add(dst, doc_a.as_ptr(), ptr::null_mut()), 1);
            assert_eq!(waf_rules_add(src, doc_b.as_ptr(), ptr::null_mut()), 1);
            assert_eq!(waf_rules_merge(dst, src, ptr::null_mut()), 1);

            waf_rules_cleanup(dst);
            waf_rules_cleanup(src);
        }
    }

    #[test]
    fn test_process_dispatches_evaluation() {
        unsafe {
            let set = waf_create_rules_set();
            let doc = c("rules:\n  - {id: 1, phase: 1, target: uri, operator: contains, value: admin, action: deny}\n");
            assert_eq!(waf_rules_add(set, doc.as_ptr(), ptr::null_mut()), 1);

            let tx = Box::into_raw(Box::new(Transaction::new("GET", "/admin")));
            assert_eq!(waf_rules_process(set, 1, tx), 0);
            assert!((*tx).is_disrupted());

            drop(Box::from_raw(tx));
            waf_rules_cleanup(set);
        }
    }

    #[test]
    fn test_null_handles() {
        unsafe {
            let mut error: *mut c_char = ptr::null_mut();
            let doc = c("x");
            assert_eq!(waf_rules_add(ptr::null_mut(), doc.as_ptr(), &mut error), -1);
            assert!(!error.is_null());
            waf_error_free(error);

            assert_eq!(waf_rules_cleanup(ptr::null_mut()), -1);
            assert_eq!(waf_rules_process(ptr::null(), 0, ptr::null_mut()), -1);
            waf_error_free(ptr::null_mut());
        }
    }
}
