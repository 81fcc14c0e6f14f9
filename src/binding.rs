//
// Request binding (§4.7)
//
// Header extraction and permission-result attachment, in the teacher's
// `AdminToken`-style async `FromRequest` guard: a guard borrows what it needs
// from the request, runs the domain logic, and on denial caches the deny
// body on the request itself (`request.local_cache`) so the matching catcher
// can read it back without re-running the check.
//
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome, Request};
use rocket::serde::json::{json, Json, Value};
use rocket::{Catcher, catch, catchers};

use crate::checker::{CheckResult, PermissionChecker};
use crate::config::CONFIG;
use crate::error::Error;

/// The §6.2 request headers, trimmed and lowercased where the spec calls for
/// it. `app_id` is the only header that is itself required for a gated
/// route — it is enforced by the `PermissionGate` guard, not here, so that
/// routes which don't need permission checking can still read `NinjaHeaders`.
#[derive(Debug, Clone, Default)]
pub struct NinjaHeaders {
    pub app_id: Option<String>,
    pub git_email: Option<String>,
    pub git_name: Option<String>,
    pub git_branch: Option<String>,
    pub publisher: Option<String>,
    pub app_name: Option<String>,
}

fn header_trimmed(request: &Request<'_>, name: &str) -> Option<String> {
    request.headers().get_one(name).map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for NinjaHeaders {
    type Error = std::convert::Infallible;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        Outcome::Success(Self {
            app_id: header_trimmed(request, "Ninja-App-Id"),
            git_email: header_trimmed(request, "Ninja-Git-Email").map(|e| e.to_lowercase()),
            git_name: header_trimmed(request, "Ninja-Git-Name"),
            git_branch: header_trimmed(request, "Ninja-Git-Branch"),
            publisher: header_trimmed(request, "Ninja-App-Publisher"),
            app_name: header_trimmed(request, "Ninja-App-Name"),
        })
    }
}

/// Cached on the request by `PermissionGate` when it denies, so the 403
/// catcher can render the body without re-running `check()` (§6.3).
struct DenyBody {
    code: &'static str,
    git_email: Option<String>,
}

/// A gated route's permission guard (§4.7). Forwards to a 400 when
/// `Ninja-App-Id` is missing, short-circuits to a synthetic allow in
/// private-backend mode (§4.7's closing paragraph), and otherwise runs
/// `PermissionChecker::check` and attaches the result.
pub struct PermissionGate {
    pub result: CheckResult,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for PermissionGate {
    type Error = Error;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let headers = match NinjaHeaders::from_request(request).await {
            Outcome::Success(headers) => headers,
            _ => unreachable!("NinjaHeaders::from_request never errors or forwards"),
        };

        let Some(app_id) = headers.app_id.as_deref() else {
            let msg = "missing required header Ninja-App-Id";
            return Outcome::Error((Status::BadRequest, Error::MissingAppIdHeader(msg.to_string(), String::new())));
        };

        if CONFIG.private_backend() {
            return Outcome::Success(Self { result: CheckResult::Allow });
        }

        let Some(checker) = request.rocket().state::<PermissionChecker>() else {
            error!("PermissionChecker is not managed state; private-backend mode is off");
            return Outcome::Error((Status::InternalServerError, Error::new("permission checker unavailable")));
        };

        let result = match checker
            .check(app_id, headers.git_email.as_deref(), headers.publisher.as_deref(), headers.app_name.as_deref())
            .await
        {
            Ok(result) => result,
            Err(e) => return Outcome::Error((e.status(), e)),
        };

        if let CheckResult::Deny { code, git_email } = &result {
            let deny = DenyBody {
                code,
                git_email: git_email.clone(),
            };
            request.local_cache(|| Some(deny));
            return Outcome::Error((Status::Forbidden, Error::new("permission denied")));
        }

        Outcome::Success(Self { result })
    }
}

impl PermissionGate {
    /// Merges a pending `warning` object into a JSON object response body
    /// (§6.3: "strings and non-object responses are not augmented").
    pub fn respond(&self, body: Value) -> Value {
        let CheckResult::AllowWithWarning { code, time_remaining, git_email } = &self.result else {
            return body;
        };

        let Value::Object(mut map) = body else {
            return body;
        };

        let mut warning = serde_json::Map::new();
        warning.insert("code".to_string(), json!(code));
        if let Some(time_remaining) = time_remaining {
            warning.insert("timeRemaining".to_string(), json!(time_remaining));
        }
        if let Some(git_email) = git_email {
            warning.insert("gitEmail".to_string(), json!(git_email));
        }

        map.insert("warning".to_string(), Value::Object(warning));
        Value::Object(map)
    }
}

#[catch(403)]
fn permission_denied(request: &Request<'_>) -> Json<Value> {
    let body = match request.local_cache(|| Option::<DenyBody>::None) {
        Some(deny) => {
            let mut error = serde_json::Map::new();
            error.insert("code".to_string(), json!(deny.code));
            if let Some(git_email) = &deny.git_email {
                error.insert("gitEmail".to_string(), json!(git_email));
            }
            json!({ "error": Value::Object(error) })
        }
        None => json!({ "error": { "code": "FORBIDDEN" } }),
    };

    Json(body)
}

#[catch(400)]
fn bad_request() -> &'static str {
    "missing required header Ninja-App-Id"
}

/// Mounted at the application root in `main.rs` (teacher's `routes()`
/// aggregation convention, applied to catchers here).
pub fn catchers() -> Vec<Catcher> {
    catchers![permission_denied, bad_request]
}
