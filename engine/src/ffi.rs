//! FFI layer for mobile hosts.
//!
//! C-compatible functions that expose the record store to Dart, Swift or
//! Kotlin. All data crosses the boundary as JSON strings.
//!
//! # Memory Management
//!
//! - Strings returned by `fitsync_*` functions are allocated by Rust
//! - Caller must free them with `fitsync_string_free`
//! - Store pointers must be freed with `fitsync_store_free`
//!
//! # Error Handling
//!
//! Functions return JSON with either:
//! - `{"ok": <result>}` on success
//! - `{"error": "<message>"}` on failure

use crate::{
    CollectionKind, CollectionSnapshot, Mutation, RecordId, RecordStore, ReconcilePlan, Revision,
    Schema,
};
use std::ffi::{c_char, CStr, CString};
use std::ptr;

/// Result wrapper for FFI responses.
#[derive(serde::Serialize)]
#[serde(untagged)]
enum FfiResult<T: serde::Serialize> {
    Ok { ok: T },
    Err { error: String },
}

impl<T: serde::Serialize> FfiResult<T> {
    fn ok(value: T) -> Self {
        FfiResult::Ok { ok: value }
    }

    fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|e| format!(r#"{{"error":"serialization failed: {}"}}"#, e))
    }
}

fn error_json(message: impl Into<String>) -> *mut c_char {
    to_c_string(
        FfiResult::<()>::Err {
            error: message.into(),
        }
        .to_json(),
    )
}

/// Convert a Rust string to a C string pointer.
/// Caller must free with `fitsync_string_free`.
fn to_c_string(s: String) -> *mut c_char {
    CString::new(s)
        .unwrap_or_else(|_| CString::from(c"{\"error\":\"string contained null bytes\"}"))
        .into_raw()
}

/// Convert a C string pointer to a Rust string.
/// Returns None if pointer is null or invalid UTF-8.
unsafe fn from_c_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

unsafe fn collection_arg(ptr: *const c_char) -> Result<CollectionKind, String> {
    from_c_string(ptr)
        .ok_or_else(|| "invalid collection".to_string())?
        .parse()
        .map_err(|e: crate::Error| e.to_string())
}

// ============================================================================
// Store Lifecycle
// ============================================================================

/// Create a new store with no owner signed in.
///
/// # Arguments
/// - `schema_json`: JSON string of Schema, or null for the built-in schema
///
/// # Returns
/// Pointer to RecordStore, or null if the schema does not parse.
///
/// # Safety
/// - `schema_json` must be a valid null-terminated C string or null
/// - Caller must free the returned pointer with `fitsync_store_free`
#[no_mangle]
pub unsafe extern "C" fn fitsync_store_new(schema_json: *const c_char) -> *mut RecordStore {
    let schema = match from_c_string(schema_json) {
        Some(json) => match serde_json::from_str::<Schema>(&json) {
            Ok(s) => s,
            Err(_) => return ptr::null_mut(),
        },
        None => Schema::fitness(),
    };

    Box::into_raw(Box::new(RecordStore::new(schema)))
}

/// Free a store.
///
/// # Safety
/// - `store` must be a valid pointer from `fitsync_store_new`
/// - Must not be called twice on the same pointer
#[no_mangle]
pub unsafe extern "C" fn fitsync_store_free(store: *mut RecordStore) {
    if !store.is_null() {
        drop(Box::from_raw(store));
    }
}

/// Free a string allocated by the engine.
///
/// # Safety
/// - `s` must be a valid pointer from a `fitsync_*` function
/// - Must not be called twice on the same pointer
#[no_mangle]
pub unsafe extern "C" fn fitsync_string_free(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}

/// Sign an owner in, or out when `owner_id` is null.
///
/// Changing owner clears every collection.
///
/// # Safety
/// - `store` must be a valid pointer from `fitsync_store_new` or null
/// - `owner_id` must be a valid null-terminated C string or null
/// - Caller must free the returned string with `fitsync_string_free`
#[no_mangle]
pub unsafe extern "C" fn fitsync_store_set_owner(
    store: *mut RecordStore,
    owner_id: *const c_char,
) -> *mut c_char {
    let store = match store.as_mut() {
        Some(s) => s,
        None => return error_json("null store pointer"),
    };

    store.set_owner(from_c_string(owner_id));
    to_c_string(FfiResult::ok(()).to_json())
}

// ============================================================================
// Store Operations
// ============================================================================

/// Apply a mutation to the store.
///
/// # Arguments
/// - `mutation_json`: JSON string of Mutation
/// - `timestamp`: Timestamp in milliseconds
///
/// # Returns
/// JSON string: `{"ok": ApplyResult}` or `{"error": "message"}`
///
/// # Safety
/// - `store` must be a valid pointer from `fitsync_store_new` or null
/// - `mutation_json` must be a valid null-terminated C string or null
/// - Caller must free the returned string with `fitsync_string_free`
#[no_mangle]
pub unsafe extern "C" fn fitsync_store_apply(
    store: *mut RecordStore,
    mutation_json: *const c_char,
    timestamp: u64,
) -> *mut c_char {
    let store = match store.as_mut() {
        Some(s) => s,
        None => return error_json("null store pointer"),
    };

    let mutation_str = match from_c_string(mutation_json) {
        Some(s) => s,
        None => return error_json("invalid mutation JSON"),
    };

    let mutation: Mutation = match serde_json::from_str(&mutation_str) {
        Ok(m) => m,
        Err(e) => return error_json(format!("parse error: {}", e)),
    };

    match store.apply(mutation, timestamp) {
        Ok(result) => to_c_string(FfiResult::ok(result).to_json()),
        Err(e) => error_json(e.to_string()),
    }
}

/// Get an active record by collection and ID.
///
/// # Returns
/// JSON string: `{"ok": Record}` or `{"ok": null}` or `{"error": "message"}`
///
/// # Safety
/// - `store` must be a valid pointer from `fitsync_store_new` or null
/// - `collection` and `id` must be valid null-terminated C strings or null
/// - Caller must free the returned string with `fitsync_string_free`
#[no_mangle]
pub unsafe extern "C" fn fitsync_store_get(
    store: *const RecordStore,
    collection: *const c_char,
    id: *const c_char,
) -> *mut c_char {
    let store = match store.as_ref() {
        Some(s) => s,
        None => return error_json("null store pointer"),
    };

    let kind = match collection_arg(collection) {
        Ok(k) => k,
        Err(e) => return error_json(e),
    };

    let id_str = match from_c_string(id) {
        Some(s) => s,
        None => return error_json("invalid id"),
    };

    to_c_string(FfiResult::ok(store.get(kind, &id_str)).to_json())
}

/// Query all records in a collection.
///
/// # Arguments
/// - `include_deleted`: 0 for active only, non-zero to include tombstones
///
/// # Returns
/// JSON string: `{"ok": [Record, ...]}` or `{"error": "message"}`
///
/// # Safety
/// - `store` must be a valid pointer from `fitsync_store_new` or null
/// - `collection` must be a valid null-terminated C string or null
/// - Caller must free the returned string with `fitsync_string_free`
#[no_mangle]
pub unsafe extern "C" fn fitsync_store_query(
    store: *const RecordStore,
    collection: *const c_char,
    include_deleted: i32,
) -> *mut c_char {
    let store = match store.as_ref() {
        Some(s) => s,
        None => return error_json("null store pointer"),
    };

    let kind = match collection_arg(collection) {
        Ok(k) => k,
        Err(e) => return error_json(e),
    };

    let query = match store.query(kind) {
        Some(q) => q,
        None => return error_json("collection not found"),
    };

    let records: Vec<_> = if include_deleted != 0 {
        query.include_deleted().all()
    } else {
        query.all()
    };

    to_c_string(FfiResult::ok(records).to_json())
}

/// Per-collection counts of active, unsynchronized and tombstoned records.
///
/// # Safety
/// - `store` must be a valid pointer from `fitsync_store_new` or null
/// - Caller must free the returned string with `fitsync_string_free`
#[no_mangle]
pub unsafe extern "C" fn fitsync_store_summary(store: *const RecordStore) -> *mut c_char {
    match store.as_ref() {
        Some(s) => to_c_string(FfiResult::ok(s.summary()).to_json()),
        None => error_json("null store pointer"),
    }
}

// ============================================================================
// Reconciliation
// ============================================================================

/// Build the reconciliation plan for a collection.
///
/// # Returns
/// JSON string: `{"ok": ReconcilePlan}` or `{"error": "message"}`
///
/// # Safety
/// - `store` must be a valid pointer from `fitsync_store_new` or null
/// - `collection` must be a valid null-terminated C string or null
/// - Caller must free the returned string with `fitsync_string_free`
#[no_mangle]
pub unsafe extern "C" fn fitsync_store_plan(
    store: *const RecordStore,
    collection: *const c_char,
) -> *mut c_char {
    let store = match store.as_ref() {
        Some(s) => s,
        None => return error_json("null store pointer"),
    };

    match collection_arg(collection) {
        Ok(kind) => to_c_string(FfiResult::ok(ReconcilePlan::build(store, kind)).to_json()),
        Err(e) => error_json(e),
    }
}

/// Confirm remote writes.
///
/// # Arguments
/// - `confirmations_json`: JSON array of `[id, revision]` pairs
///
/// # Returns
/// JSON string: `{"ok": [confirmed ids]}` or `{"error": "message"}`
///
/// # Safety
/// - `store` must be a valid pointer from `fitsync_store_new` or null
/// - `collection` and `confirmations_json` must be valid null-terminated C
///   strings or null
/// - Caller must free the returned string with `fitsync_string_free`
#[no_mangle]
pub unsafe extern "C" fn fitsync_store_confirm(
    store: *mut RecordStore,
    collection: *const c_char,
    confirmations_json: *const c_char,
) -> *mut c_char {
    let store = match store.as_mut() {
        Some(s) => s,
        None => return error_json("null store pointer"),
    };

    let kind = match collection_arg(collection) {
        Ok(k) => k,
        Err(e) => return error_json(e),
    };

    let confirmations: Vec<(RecordId, Revision)> = match from_c_string(confirmations_json)
        .map(|s| serde_json::from_str(&s))
    {
        Some(Ok(c)) => c,
        Some(Err(e)) => return error_json(format!("parse error: {}", e)),
        None => return error_json("invalid confirmations JSON"),
    };

    to_c_string(FfiResult::ok(store.confirm_synced(kind, &confirmations)).to_json())
}

/// Purge tombstones whose remote delete was confirmed.
///
/// # Arguments
/// - `ids_json`: JSON array of record ids
///
/// # Returns
/// JSON string: `{"ok": [purged ids]}` or `{"error": "message"}`
///
/// # Safety
/// - `store` must be a valid pointer from `fitsync_store_new` or null
/// - `collection` and `ids_json` must be valid null-terminated C strings or
///   null
/// - Caller must free the returned string with `fitsync_string_free`
#[no_mangle]
pub unsafe extern "C" fn fitsync_store_purge(
    store: *mut RecordStore,
    collection: *const c_char,
    ids_json: *const c_char,
) -> *mut c_char {
    let store = match store.as_mut() {
        Some(s) => s,
        None => return error_json("null store pointer"),
    };

    let kind = match collection_arg(collection) {
        Ok(k) => k,
        Err(e) => return error_json(e),
    };

    let ids: Vec<RecordId> = match from_c_string(ids_json).map(|s| serde_json::from_str(&s)) {
        Some(Ok(ids)) => ids,
        Some(Err(e)) => return error_json(format!("parse error: {}", e)),
        None => return error_json("invalid ids JSON"),
    };

    to_c_string(FfiResult::ok(store.purge(kind, &ids)).to_json())
}

// ============================================================================
// Persistence
// ============================================================================

/// Export one collection as a snapshot.
///
/// # Returns
/// JSON string: `{"ok": CollectionSnapshot}` or `{"error": "message"}`
///
/// # Safety
/// - `store` must be a valid pointer from `fitsync_store_new` or null
/// - `collection` must be a valid null-terminated C string or null
/// - Caller must free the returned string with `fitsync_string_free`
#[no_mangle]
pub unsafe extern "C" fn fitsync_store_export(
    store: *const RecordStore,
    collection: *const c_char,
) -> *mut c_char {
    let store = match store.as_ref() {
        Some(s) => s,
        None => return error_json("null store pointer"),
    };

    let kind = match collection_arg(collection) {
        Ok(k) => k,
        Err(e) => return error_json(e),
    };

    match store.export_collection(kind) {
        Ok(snapshot) => to_c_string(FfiResult::ok(snapshot).to_json()),
        Err(e) => error_json(e.to_string()),
    }
}

/// Replace a collection from a snapshot.
///
/// # Arguments
/// - `snapshot_json`: JSON string of CollectionSnapshot
///
/// # Returns
/// JSON string: `{"ok": null}` or `{"error": "message"}`
///
/// # Safety
/// - `store` must be a valid pointer from `fitsync_store_new` or null
/// - `snapshot_json` must be a valid null-terminated C string or null
/// - Caller must free the returned string with `fitsync_string_free`
#[no_mangle]
pub unsafe extern "C" fn fitsync_store_import(
    store: *mut RecordStore,
    snapshot_json: *const c_char,
) -> *mut c_char {
    let store = match store.as_mut() {
        Some(s) => s,
        None => return error_json("null store pointer"),
    };

    let snapshot_str = match from_c_string(snapshot_json) {
        Some(s) => s,
        None => return error_json("invalid snapshot JSON"),
    };

    let snapshot = match CollectionSnapshot::from_json(&snapshot_str) {
        Ok(s) => s,
        Err(e) => return error_json(e.to_string()),
    };

    match store.import_collection(snapshot) {
        Ok(()) => to_c_string(FfiResult::ok(()).to_json()),
        Err(e) => error_json(e.to_string()),
    }
}

// ============================================================================
// Utility
// ============================================================================

/// Get the engine version.
///
/// # Returns
/// Static string pointer (do not free)
#[no_mangle]
pub extern "C" fn fitsync_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

/// Get the snapshot format version.
#[no_mangle]
pub extern "C" fn fitsync_snapshot_format_version() -> u32 {
    crate::SNAPSHOT_FORMAT_VERSION
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    unsafe fn take(result: *mut c_char) -> serde_json::Value {
        let json = CStr::from_ptr(result).to_str().unwrap().to_string();
        fitsync_string_free(result);
        serde_json::from_str(&json).unwrap()
    }

    unsafe fn signed_in_store() -> *mut RecordStore {
        let store = fitsync_store_new(ptr::null());
        let owner = CString::new("owner-1").unwrap();
        take(fitsync_store_set_owner(store, owner.as_ptr()));
        store
    }

    fn banana_insert() -> CString {
        CString::new(
            r#"{
                "type": "insert",
                "id": "n-1",
                "collection": "nutritionEntries",
                "ownerId": "owner-1",
                "payload": {"name": "Banana", "calories": 105, "protein": 1, "carbs": 27, "fats": 0}
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn ffi_store_lifecycle() {
        unsafe {
            let store = fitsync_store_new(ptr::null());
            assert!(!store.is_null());
            fitsync_store_free(store);

            let bad = CString::new("not a schema").unwrap();
            assert!(fitsync_store_new(bad.as_ptr()).is_null());
        }
    }

    #[test]
    fn ffi_apply_requires_owner() {
        unsafe {
            let store = fitsync_store_new(ptr::null());
            let op = banana_insert();
            let result = take(fitsync_store_apply(store, op.as_ptr(), 1000));
            assert_eq!(result["error"], "no owner is signed in");
            fitsync_store_free(store);
        }
    }

    #[test]
    fn ffi_store_apply_and_get() {
        unsafe {
            let store = signed_in_store();

            let op = banana_insert();
            let result = take(fitsync_store_apply(store, op.as_ptr(), 1000));
            assert_eq!(result["ok"]["touched"][0]["id"], "n-1");

            let collection = CString::new("nutritionEntries").unwrap();
            let id = CString::new("n-1").unwrap();
            let record = take(fitsync_store_get(store, collection.as_ptr(), id.as_ptr()));
            assert_eq!(record["ok"]["payload"]["name"], "Banana");
            assert_eq!(record["ok"]["synced"], false);

            let records = take(fitsync_store_query(store, collection.as_ptr(), 0));
            assert_eq!(records["ok"].as_array().unwrap().len(), 1);

            fitsync_store_free(store);
        }
    }

    #[test]
    fn ffi_plan_confirm_purge() {
        unsafe {
            let store = signed_in_store();
            let op = banana_insert();
            take(fitsync_store_apply(store, op.as_ptr(), 1000));

            let collection = CString::new("nutritionEntries").unwrap();
            let plan = take(fitsync_store_plan(store, collection.as_ptr()));
            assert_eq!(plan["ok"]["upserts"][0]["id"], "n-1");

            let confirmations = CString::new(r#"[["n-1", 1]]"#).unwrap();
            let confirmed = take(fitsync_store_confirm(
                store,
                collection.as_ptr(),
                confirmations.as_ptr(),
            ));
            assert_eq!(confirmed["ok"], serde_json::json!(["n-1"]));

            let delete = CString::new(
                r#"{"type": "tombstone", "id": "n-1", "collection": "nutritionEntries"}"#,
            )
            .unwrap();
            take(fitsync_store_apply(store, delete.as_ptr(), 2000));

            let summary = take(fitsync_store_summary(store));
            let nutrition = summary["ok"]
                .as_array()
                .unwrap()
                .iter()
                .find(|s| s["collection"] == "nutritionEntries")
                .unwrap()
                .clone();
            assert_eq!(nutrition["tombstoned"], 1);

            let ids = CString::new(r#"["n-1"]"#).unwrap();
            let purged = take(fitsync_store_purge(store, collection.as_ptr(), ids.as_ptr()));
            assert_eq!(purged["ok"], serde_json::json!(["n-1"]));

            fitsync_store_free(store);
        }
    }

    #[test]
    fn ffi_store_export_import() {
        unsafe {
            let store = signed_in_store();
            let op = banana_insert();
            take(fitsync_store_apply(store, op.as_ptr(), 1000));

            let collection = CString::new("nutritionEntries").unwrap();
            let exported = take(fitsync_store_export(store, collection.as_ptr()));
            let snapshot_json = serde_json::to_string(&exported["ok"]).unwrap();

            let store2 = signed_in_store();
            let snapshot = CString::new(snapshot_json).unwrap();
            let imported = take(fitsync_store_import(store2, snapshot.as_ptr()));
            assert!(imported.get("ok").is_some());

            let id = CString::new("n-1").unwrap();
            let record = take(fitsync_store_get(store2, collection.as_ptr(), id.as_ptr()));
            assert_eq!(record["ok"]["payload"]["name"], "Banana");

            fitsync_store_free(store);
            fitsync_store_free(store2);
        }
    }

    #[test]
    fn ffi_version() {
        unsafe {
            let version = fitsync_version();
            let version_str = CStr::from_ptr(version).to_str().unwrap();
            assert_eq!(version_str, env!("CARGO_PKG_VERSION"));
        }
        assert_eq!(fitsync_snapshot_format_version(), crate::SNAPSHOT_FORMAT_VERSION);
    }

    #[test]
    fn ffi_error_handling() {
        unsafe {
            let collection = CString::new("nutritionEntries").unwrap();
            let id = CString::new("n-1").unwrap();
            let result = take(fitsync_store_get(ptr::null(), collection.as_ptr(), id.as_ptr()));
            assert!(result.get("error").is_some());

            let store = signed_in_store();
            let invalid_op = CString::new("not valid json").unwrap();
            let result = take(fitsync_store_apply(store, invalid_op.as_ptr(), 1000));
            assert!(result.get("error").is_some());

            let unknown = CString::new("meals").unwrap();
            let result = take(fitsync_store_query(store, unknown.as_ptr(), 0));
            assert_eq!(result["error"], "unknown collection: meals");

            fitsync_store_free(store);
        }
    }
}
