use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::{header, HeaderMap, Method},
    middleware::Next,
    response::Response,
};
use futures_util::{stream, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::metrics::{Observation, Outcome, Purchase, TrackedMethod};
use crate::AppState;

/// Which credential identifies an active session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKey {
    /// `email` field of a JSON request body.
    #[default]
    Email,
    /// Token from `Authorization: Bearer <token>`.
    BearerToken,
    /// Bearer token if present, otherwise the body email.
    Either,
}

/// Route-family rules applied to every finished request.
#[derive(Debug, Clone)]
pub struct ObservationRules {
    pub auth_prefix: String,
    pub order_prefix: String,
    pub session_key: SessionKey,
    /// Bodies larger than this are forwarded without being inspected.
    pub max_body_bytes: usize,
}

impl ObservationRules {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            auth_prefix: cfg.metrics.auth_prefix.clone(),
            order_prefix: cfg.metrics.order_prefix.clone(),
            session_key: cfg.metrics.session_key,
            max_body_bytes: cfg.server.max_body_bytes,
        }
    }

    /// Classify a finished request.
    pub fn classify(
        &self,
        facts: &RequestFacts,
        status: u16,
        latency_ms: f64,
        at: Instant,
    ) -> Observation {
        let method = &facts.method;
        let path = facts.path.as_str();

        let auth = (path.starts_with(&self.auth_prefix)
            && (*method == Method::POST || *method == Method::PUT))
            .then_some(if status == 200 {
                Outcome::Success
            } else {
                Outcome::Failure
            });

        let purchase = (path.starts_with(&self.order_prefix) && *method == Method::POST).then(|| {
            if status == 200 {
                let revenue = order_revenue(facts.body.as_ref());
                if revenue.is_none() {
                    debug!(%path, "order body has no priceable items");
                }
                Purchase::Success { revenue }
            } else {
                Purchase::Failure
            }
        });

        Observation {
            method: TrackedMethod::from_method(method),
            auth,
            session: self.session_of(facts),
            purchase,
            latency_ms,
            at,
        }
    }

    fn session_of(&self, facts: &RequestFacts) -> Option<String> {
        let email = || {
            facts
                .body
                .as_ref()
                .and_then(|b| b.get("email"))
                .and_then(Value::as_str)
                .filter(|e| !e.is_empty())
                .map(str::to_owned)
        };
        match self.session_key {
            SessionKey::Email => email(),
            SessionKey::BearerToken => facts.bearer.clone(),
            SessionKey::Either => facts.bearer.clone().or_else(email),
        }
    }
}

/// What the middleware keeps from the request before handing it on.
#[derive(Debug, Clone)]
pub struct RequestFacts {
    pub method: Method,
    pub path: String,
    pub bearer: Option<String>,
    /// Parsed JSON body; `None` when absent, oversized or not JSON.
    pub body: Option<Value>,
}

/// Sum of `items[].price`. Any missing or non-numeric price voids the total.
pub fn order_revenue(body: Option<&Value>) -> Option<f64> {
    body?
        .get("items")?
        .as_array()?
        .iter()
        .map(|item| item.get("price").and_then(Value::as_f64))
        .sum()
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_owned)
}

/// Buffer a small JSON body so it can be both inspected and forwarded.
///
/// Bodies without a declared length are read frame by frame up to
/// `max_body_bytes`. Past the limit, the buffered prefix is replayed ahead of
/// the unread remainder and the body stays uninspected. A read error reaches
/// the handler after the bytes already read, as if nothing had buffered them.
async fn capture(req: Request, max_body_bytes: usize) -> (Request, RequestFacts) {
    let (parts, body) = req.into_parts();
    let mut facts = RequestFacts {
        method: parts.method.clone(),
        path: parts.uri.path().to_owned(),
        bearer: bearer_token(&parts.headers),
        body: None,
    };

    let is_json = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("json"));
    let declared_len = parts
        .headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());

    let inspect = is_json
        && match declared_len {
            Some(len) => len > 0 && len <= max_body_bytes,
            None => true,
        };
    if !inspect {
        return (Request::from_parts(parts, body), facts);
    }

    let mut frames = body.into_data_stream();
    let mut buf = Vec::new();
    while let Some(frame) = frames.next().await {
        match frame {
            Ok(chunk) => {
                buf.extend_from_slice(&chunk);
                if buf.len() > max_body_bytes {
                    debug!(path = %facts.path, limit = max_body_bytes, "request body too large to inspect");
                    let replay = stream::iter([Ok(Bytes::from(buf))]).chain(frames);
                    return (Request::from_parts(parts, Body::from_stream(replay)), facts);
                }
            }
            Err(e) => {
                warn!(path = %facts.path, error = %e, "request body read failed");
                let replay = stream::iter([Ok(Bytes::from(buf)), Err(e)]);
                return (Request::from_parts(parts, Body::from_stream(replay)), facts);
            }
        }
    }

    let bytes = Bytes::from(buf);
    facts.body = serde_json::from_slice(&bytes).ok();
    (Request::from_parts(parts, Body::from(bytes)), facts)
}

/// Tower-compatible middleware that folds every request into the metrics
/// registers once the handler has produced a response.
///
/// The response is returned untouched whatever the observation finds.
pub async fn observe_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let (req, facts) = capture(req, state.rules.max_body_bytes).await;

    let response = next.run(req).await;
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

    let status = response.status().as_u16();
    let obs = state
        .rules
        .classify(&facts, status, latency_ms, Instant::now());
    state.metrics.observe(obs);

    debug!(
        method = %facts.method,
        path = %facts.path,
        status,
        latency_ms,
        "request observed"
    );

    response
}
