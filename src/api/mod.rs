//
// Numeric-ID allocation stub (§4.8)
//
// The real allocator is out of scope; this exists so the permission gate has
// a route to guard end-to-end. Mirrors the teacher's `api/core/mod.rs`
// route-aggregation convention: one `routes()` function per module, mounted
// by `main.rs`.
//
use std::sync::Arc;

use rocket::serde::json::{Json, Value, json};
use rocket::{Route, State, get, routes};

use crate::activity_log::ActivityLogger;
use crate::binding::{NinjaHeaders, PermissionGate};

pub fn routes() -> Vec<Route> {
    routes![next_id]
}

/// `/api/v1/nextId` — returns a placeholder id once the permission gate has
/// let the request through. The real allocator (out of scope here) would
/// replace the body of this handler without touching its binding.
#[get("/v1/nextId")]
async fn next_id(gate: PermissionGate, headers: NinjaHeaders, logger: &State<Arc<ActivityLogger>>) -> Json<Value> {
    if let (Some(app_id), Some(email)) = (headers.app_id.as_deref(), headers.git_email.clone()) {
        let app_id = app_id.to_string();
        let logger = Arc::clone(logger.inner());
        tokio::spawn(async move { logger.log_activity(&app_id, &email, "nextId").await });
    }

    Json(gate.respond(json!({ "id": 0 })))
}
