use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::header::{HeaderName, HeaderValue, ALLOW, CONTENT_TYPE};
use hyper::{Method, Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::api::ApiState;
use crate::error::{Error, ErrorKind};
use crate::registry::Rule;
use crate::service::{CheckOutcome, CheckRequest};

const JSON: &str = "application/json";
const PROMETHEUS: &str = "text/plain; version=0.0.4; charset=utf-8";

const REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
const LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
const RETRY_AFTER_MS: HeaderName = HeaderName::from_static("x-ratelimit-retry-after-ms");

/// Body of a check response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResponse {
    pub allowed: bool,
    pub remaining: u64,
    /// 0 when allowed, -1 when the bucket never refills
    pub retry_after_ms: i64,
}

/// Body of a rule deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleId {
    #[serde(alias = "tennant_id")]
    pub tenant_id: String,
    pub resource: String,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

type HttpResponse = Response<Full<Bytes>>;

/// Dispatch one request.
///
/// Generic over the request body so it can be driven without a socket.
pub async fn route<B>(state: &ApiState, req: Request<B>) -> HttpResponse
where
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    debug!("{} {}", method, path);

    match (path.as_str(), method) {
        ("/v1/ratelimit/check", Method::POST) => match read_json(state, req).await {
            Ok(body) => check(state, body).await,
            Err(resp) => resp,
        },
        ("/v1/rules", Method::POST) => match read_json::<Rule, _>(state, req).await {
            Ok(rule) => match state.service.add_rule(rule).await {
                Ok(()) => text(StatusCode::CREATED, JSON, Bytes::from_static(b"{}")),
                Err(e) => error_response(&e),
            },
            Err(resp) => resp,
        },
        ("/v1/rules", Method::GET) => match state.service.list_rules().await {
            Ok(rules) => json(StatusCode::OK, &rules),
            Err(e) => error_response(&e),
        },
        ("/v1/rules", Method::DELETE) => match read_json::<RuleId, _>(state, req).await {
            Ok(id) => match state.service.delete_rule(&id.tenant_id, &id.resource).await {
                Ok(true) => text(StatusCode::NO_CONTENT, JSON, Bytes::new()),
                Ok(false) => json_error(StatusCode::NOT_FOUND, "rule not found"),
                Err(e) => error_response(&e),
            },
            Err(resp) => resp,
        },
        ("/health", Method::GET) => text(StatusCode::OK, "text/plain", Bytes::from_static(b"ok")),
        ("/metrics", Method::GET) => {
            let body = state.service.metrics().to_prometheus_string();
            text(StatusCode::OK, PROMETHEUS, Bytes::from(body))
        }
        ("/v1/ratelimit/check", _) => method_not_allowed("POST"),
        ("/v1/rules", _) => method_not_allowed("GET, POST, DELETE"),
        ("/health" | "/metrics", _) => method_not_allowed("GET"),
        _ => json_error(StatusCode::NOT_FOUND, "not found"),
    }
}

async fn check(state: &ApiState, req: CheckRequest) -> HttpResponse {
    let CheckOutcome { admission, limit } = match state.service.check(req).await {
        Ok(outcome) => outcome,
        Err(e) => return error_response(&e),
    };

    let retry_after_ms = admission.retry_after_ms();
    let mut resp = json(
        StatusCode::OK,
        &CheckResponse {
            allowed: admission.allowed,
            remaining: admission.remaining,
            retry_after_ms,
        },
    );

    let headers = resp.headers_mut();
    headers.insert(REMAINING, HeaderValue::from(admission.remaining));
    headers.insert(LIMIT, HeaderValue::from(limit));
    if !admission.allowed && retry_after_ms >= 0 {
        headers.insert(RETRY_AFTER_MS, HeaderValue::from(retry_after_ms));
    }
    resp
}

/// Read and decode a JSON body no larger than the configured cap.
async fn read_json<T, B>(state: &ApiState, req: Request<B>) -> Result<T, HttpResponse>
where
    T: DeserializeOwned,
    B: Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let body = match Limited::new(req.into_body(), state.max_body_bytes).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            return Err(json_error(StatusCode::PAYLOAD_TOO_LARGE, "request body too large"));
        }
        Err(e) => {
            debug!("Failed to read request body: {}", e);
            return Err(json_error(StatusCode::BAD_REQUEST, "unreadable request body"));
        }
    };

    serde_json::from_slice(&body).map_err(|e| {
        let metrics = state.service.metrics();
        metrics.inc(&metrics.validation_errors);
        json_error(StatusCode::BAD_REQUEST, &format!("invalid request body: {}", e))
    })
}

fn error_response(e: &Error) -> HttpResponse {
    match e.kind() {
        ErrorKind::Validation => json_error(StatusCode::BAD_REQUEST, &e.to_string()),
        ErrorKind::NotFound => json_error(StatusCode::NOT_FOUND, &e.to_string()),
        ErrorKind::Store => {
            warn!("Request failed: {}", e);
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "rate limit store unavailable")
        }
    }
}

fn method_not_allowed(allow: &'static str) -> HttpResponse {
    let mut resp = json_error(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
    resp.headers_mut().insert(ALLOW, HeaderValue::from_static(allow));
    resp
}

fn json_error(status: StatusCode, msg: &str) -> HttpResponse {
    json(status, &ErrorBody { error: msg })
}

fn json<T: Serialize>(status: StatusCode, value: &T) -> HttpResponse {
    match serde_json::to_vec(value) {
        Ok(body) => text(status, JSON, Bytes::from(body)),
        Err(e) => {
            warn!("Failed to encode response: {}", e);
            text(StatusCode::INTERNAL_SERVER_ERROR, JSON, Bytes::new())
        }
    }
}

fn text(status: StatusCode, content_type: &'static str, body: Bytes) -> HttpResponse {
    let mut resp = Response::new(Full::new(body));
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    resp
}
