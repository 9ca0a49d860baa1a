//! Ingress HTTP (spec.md §6): the single `/webhook` route the code host
//! posts deliveries to. Grounded in the teacher's `routes.rs` header/guard
//! idiom (`FromRequest` for cheap header extraction, `rocket::post` +
//! `Data` for the raw body HMAC verification needs).

use chrono::Utc;
use rocket::data::{Data, ToByteUnit};
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome, Request};
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use rocket::{catch, get, post, State};

use crate::errors::IngressError;
use crate::models::WebhookEvent;
use crate::webhook::WebhookDispatcher;

const MAX_BODY_BYTES: u64 = 10 * 1024 * 1024;

/// The three headers spec.md §6 names: event type, delivery id, and
/// either signature header GitHub has used across API versions.
pub struct WebhookHeaders {
    pub event_type: Option<String>,
    pub delivery_id: Option<String>,
    pub signature: Option<String>,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for WebhookHeaders {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let headers = req.headers();
        Outcome::Success(WebhookHeaders {
            event_type: headers.get_one("X-GitHub-Event").map(String::from),
            delivery_id: headers.get_one("X-GitHub-Delivery").map(String::from),
            signature: headers
                .get_one("X-Hub-Signature-256")
                .or_else(|| headers.get_one("X-Hub-Signature"))
                .map(String::from),
        })
    }
}

#[get("/healthz")]
pub fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok", "service": "gh-relay-core", "version": env!("CARGO_PKG_VERSION")}))
}

/// `POST /webhook` (spec.md §6): `202` on enqueue/accept, `400` on
/// missing headers or malformed JSON, `503` when no dispatcher is wired
/// (never the case once `build_rocket` has run, but a caller could still
/// hit this during a lifecycle edge), `500` on any other internal
/// rejection.
#[post("/webhook", data = "<body>")]
pub async fn webhook(
    dispatcher: &State<std::sync::Arc<WebhookDispatcher>>,
    headers: WebhookHeaders,
    body: Data<'_>,
) -> Custom<Json<serde_json::Value>> {
    let Some(event_type) = headers.event_type else {
        return bad_request("missing X-GitHub-Event header");
    };
    let Some(delivery_id) = headers.delivery_id else {
        return bad_request("missing X-GitHub-Delivery header");
    };

    let raw_body = match body.open(MAX_BODY_BYTES.bytes()).into_bytes().await {
        Ok(bytes) => bytes.into_inner(),
        Err(e) => return bad_request(&format!("could not read request body: {e}")),
    };

    let payload: serde_json::Value = match serde_json::from_slice(&raw_body) {
        Ok(v) => v,
        Err(e) => return bad_request(&format!("malformed JSON payload: {e}")),
    };

    let repository = WebhookEvent::derive_repository(&payload);
    let event = WebhookEvent {
        event_type,
        delivery_id: delivery_id.clone(),
        signature: headers.signature,
        raw_body,
        payload,
        repository,
        timestamp: Utc::now(),
        error: None,
    };

    match dispatcher.submit(event) {
        Ok(()) => Custom(
            Status::Accepted,
            Json(serde_json::json!({
                "status": "accepted",
                "message": "delivery queued",
                "timestamp": Utc::now(),
                "delivery_id": delivery_id,
            })),
        ),
        Err(e @ IngressError::QueueFull) => Custom(
            Status::ServiceUnavailable,
            Json(serde_json::json!({"status": "error", "message": e.to_string(), "delivery_id": delivery_id})),
        ),
        Err(e @ (IngressError::MissingField(_) | IngressError::UnsupportedEvent(_) | IngressError::MissingSignature | IngressError::SignatureMismatch)) => {
            bad_request(&e.to_string())
        }
        Err(e) => Custom(
            Status::InternalServerError,
            Json(serde_json::json!({"status": "error", "message": e.to_string(), "delivery_id": delivery_id})),
        ),
    }
}

fn bad_request(message: &str) -> Custom<Json<serde_json::Value>> {
    Custom(Status::BadRequest, Json(serde_json::json!({"status": "error", "message": message})))
}

#[catch(429)]
pub fn too_many_requests() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "error", "message": "rate limit exceeded"}))
}

#[catch(404)]
pub fn not_found() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "error", "message": "not found"}))
}
