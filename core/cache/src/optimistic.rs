//! Synthetic optimistic responses for writes admitted while offline.

use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use fieldline_common::OpType;

/// Build the optimistic body returned when an operation is queued
/// instead of sent.
///
/// The shape is chosen by the caller-supplied operation type, never by
/// inspecting the endpoint. Every shape carries a locally generated id,
/// the `offline` and `pending_sync` markers, and an echo of the client
/// payload so the UI can render the write as if it had landed.
pub fn synthetic_response(op_type: OpType, payload: &Value) -> Value {
    let id = format!("offline_{}", Uuid::new_v4());
    let now = Utc::now();

    match op_type {
        OpType::ActivityComplete => json!({
            "id": id,
            "status": "completed",
            "completed_at": now,
            "offline": true,
            "pending_sync": true,
            "data": payload,
        }),
        OpType::DocumentCreate => json!({
            "id": id,
            "status": "created",
            "created_at": now,
            "offline": true,
            "pending_sync": true,
            "document": payload,
        }),
        OpType::DocumentUpdate => json!({
            "id": id,
            "status": "updated",
            "updated_at": now,
            "offline": true,
            "pending_sync": true,
            "document": payload,
        }),
        OpType::FormSubmit => json!({
            "id": id,
            "status": "submitted",
            "submitted_at": now,
            "offline": true,
            "pending_sync": true,
            "form": payload,
        }),
        OpType::Generic => json!({
            "id": id,
            "offline": true,
            "pending_sync": true,
            "data": payload,
        }),
    }
}
