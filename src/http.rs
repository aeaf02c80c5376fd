//! HTTP transport: REST tools, OpenAPI description, and streamable MCP
//!
//! Routes:
//! - `GET /` service info (never requires a key)
//! - `GET /openapi.json`
//! - `POST /tool/{summarize_emails,read_emails,send_email}`
//! - `/mcp` streamable-HTTP MCP endpoint
//!
//! When an API key is configured every route except `GET /` requires
//! `Authorization: Bearer <key>` (a bare key is accepted too).

use axum::extract::rejection::JsonRejection;
use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rmcp::transport::streamable_http_server::session::local::LocalSessionManager;
use rmcp::transport::streamable_http_server::{StreamableHttpServerConfig, StreamableHttpService};
use schemars::{JsonSchema, schema_for};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};
use subtle::ConstantTimeEq;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::digest::MailDigestService;
use crate::errors::{AppError, AppResult};
use crate::models::{EmailDigest, SendEmailInput, SendEmailResult, TimeRangeInput};
use crate::server::MailDigestServer;

const SERVICE_NAME: &str = env!("CARGO_PKG_NAME");
const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Shared handler state
#[derive(Clone)]
pub struct HttpState {
    service: MailDigestService,
    api_key: Option<SecretString>,
}

impl HttpState {
    pub fn new(service: MailDigestService) -> Self {
        let api_key = service.config().api_key.clone();
        Self { service, api_key }
    }
}

/// Build the full router
///
/// `shutdown` also terminates open MCP sessions.
pub fn router(state: HttpState, shutdown: CancellationToken) -> Router {
    let mcp_server = MailDigestServer::new(state.service.clone());
    let mut mcp_config = StreamableHttpServerConfig::default();
    mcp_config.cancellation_token = shutdown;
    let mcp_service = StreamableHttpService::new(
        move || Ok(mcp_server.clone()),
        LocalSessionManager::default().into(),
        mcp_config,
    );

    let protected = Router::new()
        .route("/openapi.json", get(openapi))
        .route("/tool/summarize_emails", post(summarize_emails))
        .route("/tool/read_emails", post(read_emails))
        .route("/tool/send_email", post(send_email))
        .nest_service("/mcp", mcp_service)
        .layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .route("/", get(service_info))
        .merge(protected)
        .with_state(state)
}

/// Bind and serve until `shutdown` is cancelled
///
/// # Errors
///
/// `Internal` if the listener cannot bind or the server fails.
pub async fn serve(
    service: MailDigestService,
    bind: &str,
    shutdown: CancellationToken,
) -> AppResult<()> {
    let listener = TcpListener::bind(bind)
        .await
        .map_err(|e| AppError::Internal(format!("cannot bind {bind}: {e}")))?;
    let state = HttpState::new(service);
    if state.api_key.is_none() {
        warn!("MAIL_DIGEST_API_KEY is not set; HTTP endpoints are unauthenticated");
    }
    info!(%bind, "HTTP server listening");

    let app = router(state, shutdown.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| AppError::Internal(format!("HTTP server failed: {e}")))?;
    info!("HTTP server stopped");
    Ok(())
}

async fn require_api_key(State(state): State<HttpState>, request: Request, next: Next) -> Response {
    let Some(expected) = &state.api_key else {
        return next.run(request).await;
    };

    let provided = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.strip_prefix("Bearer ").unwrap_or(value).trim());

    match provided {
        Some(key) if key_matches(key, expected) => next.run(request).await,
        Some(_) => AppError::Unauthorized("invalid API key".to_owned()).into_response(),
        None => AppError::Unauthorized("missing API key".to_owned()).into_response(),
    }
}

/// Compare a presented key against the configured one in constant time
fn key_matches(provided: &str, expected: &SecretString) -> bool {
    provided
        .as_bytes()
        .ct_eq(expected.expose_secret().as_bytes())
        .into()
}

async fn service_info() -> Json<Value> {
    Json(json!({
        "name": SERVICE_NAME,
        "version": SERVICE_VERSION,
        "status": "ok",
        "endpoints": {
            "openapi": "/openapi.json",
            "mcp": "/mcp",
            "tools": [
                "/tool/summarize_emails",
                "/tool/read_emails",
                "/tool/send_email"
            ]
        }
    }))
}

/// Turn an axum body rejection into our error shape
fn body<T>(payload: Result<Json<T>, JsonRejection>) -> AppResult<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| AppError::InvalidInput(rejection.body_text()))
}

async fn summarize_emails(
    State(state): State<HttpState>,
    payload: Result<Json<TimeRangeInput>, JsonRejection>,
) -> AppResult<Json<EmailDigest>> {
    let input = body(payload)?;
    state.service.summarize_emails(&input).await.map(Json)
}

async fn read_emails(
    State(state): State<HttpState>,
    payload: Result<Json<TimeRangeInput>, JsonRejection>,
) -> AppResult<Json<EmailDigest>> {
    let input = body(payload)?;
    state.service.read_emails(&input).await.map(Json)
}

async fn send_email(
    State(state): State<HttpState>,
    payload: Result<Json<SendEmailInput>, JsonRejection>,
) -> AppResult<Json<SendEmailResult>> {
    let input = body(payload)?;
    state.service.send_email(&input).await.map(Json)
}

async fn openapi() -> Json<Value> {
    Json(openapi_document())
}

fn schema_value<T: JsonSchema>() -> Value {
    serde_json::to_value(schema_for!(T)).unwrap_or(Value::Null)
}

fn tool_operation(id: &str, summary: &str, request: &str, response: &str) -> Value {
    json!({
        "post": {
            "operationId": id,
            "summary": summary,
            "security": [{ "bearerAuth": [] }],
            "requestBody": {
                "required": true,
                "content": {
                    "application/json": {
                        "schema": { "$ref": format!("#/components/schemas/{request}") }
                    }
                }
            },
            "responses": {
                "200": {
                    "description": "Success",
                    "content": {
                        "application/json": {
                            "schema": { "$ref": format!("#/components/schemas/{response}") }
                        }
                    }
                },
                "400": { "description": "Invalid input" },
                "401": { "description": "Missing or invalid API key" },
                "403": { "description": "Operation disabled" },
                "502": { "description": "Mailbox, summarizer, or SMTP failure" },
                "504": { "description": "Upstream timeout" }
            }
        }
    })
}

/// OpenAPI 3 description of the REST tools
pub fn openapi_document() -> Value {
    json!({
        "openapi": "3.1.0",
        "info": {
            "title": "Mail Digest",
            "version": SERVICE_VERSION,
            "description": "Read, summarize, and send email by UTC time window"
        },
        "paths": {
            "/tool/summarize_emails": tool_operation(
                "summarize_emails",
                "Fetch emails in a UTC window and summarize them",
                "TimeRangeInput",
                "EmailDigest"
            ),
            "/tool/read_emails": tool_operation(
                "read_emails",
                "Fetch emails in a UTC window",
                "TimeRangeInput",
                "EmailDigest"
            ),
            "/tool/send_email": tool_operation(
                "send_email",
                "Send an email via SMTP",
                "SendEmailInput",
                "SendEmailResult"
            )
        },
        "components": {
            "schemas": {
                "TimeRangeInput": schema_value::<TimeRangeInput>(),
                "SendEmailInput": schema_value::<SendEmailInput>(),
                "EmailDigest": schema_value::<EmailDigest>(),
                "SendEmailResult": schema_value::<SendEmailResult>()
            },
            "securitySchemes": {
                "bearerAuth": { "type": "http", "scheme": "bearer" }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{Body, to_bytes};
    use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
    use axum::http::{Request, StatusCode};
    use axum::response::Response;
    use secrecy::SecretString;
    use serde_json::Value;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    use super::{HttpState, key_matches, router};
    use crate::config::ServerConfig;
    use crate::digest::MailDigestService;

    const REVERSED_WINDOW: &str =
        r#"{"start_iso":"2024-06-06T00:00:00Z","end_iso":"2024-06-05T00:00:00Z"}"#;

    fn app(api_key: Option<&str>) -> axum::Router {
        let mut config = ServerConfig::sample();
        config.api_key = api_key.map(|k| SecretString::from(k.to_owned()));
        let service = MailDigestService::with_summarizer(Arc::new(config), None);
        router(HttpState::new(service), CancellationToken::new())
    }

    fn post_json(uri: &str, body: &str, auth: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(CONTENT_TYPE, "application/json");
        if let Some(auth) = auth {
            builder = builder.header(AUTHORIZATION, auth);
        }
        builder
            .body(Body::from(body.to_owned()))
            .expect("valid request")
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body readable");
        serde_json::from_slice(&bytes).expect("JSON body")
    }

    #[tokio::test]
    async fn root_is_public_even_with_api_key() {
        let response = app(Some("k3y"))
            .oneshot(Request::get("/").body(Body::empty()).expect("valid request"))
            .await
            .expect("router responds");
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["name"], "mail-digest-mcp");
    }

    #[tokio::test]
    async fn reversed_window_is_bad_request() {
        let response = app(None)
            .oneshot(post_json("/tool/read_emails", REVERSED_WINDOW, None))
            .await
            .expect("router responds");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["code"], "invalid_input");
    }

    #[tokio::test]
    async fn malformed_body_is_bad_request() {
        let response = app(None)
            .oneshot(post_json("/tool/summarize_emails", r#"{"start_iso": 1}"#, None))
            .await
            .expect("router responds");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn key_comparison_requires_exact_bytes() {
        let expected = SecretString::from("k3y".to_owned());
        assert!(key_matches("k3y", &expected));
        assert!(!key_matches("k3", &expected));
        assert!(!key_matches("k3y ", &expected));
        assert!(!key_matches("K3Y", &expected));
        assert!(!key_matches("", &expected));
    }

    #[tokio::test]
    async fn api_key_is_enforced() {
        let missing = app(Some("k3y"))
            .oneshot(post_json("/tool/read_emails", REVERSED_WINDOW, None))
            .await
            .expect("router responds");
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let wrong = app(Some("k3y"))
            .oneshot(post_json("/tool/read_emails", REVERSED_WINDOW, Some("Bearer nope")))
            .await
            .expect("router responds");
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

        let bearer = app(Some("k3y"))
            .oneshot(post_json("/tool/read_emails", REVERSED_WINDOW, Some("Bearer k3y")))
            .await
            .expect("router responds");
        assert_eq!(bearer.status(), StatusCode::BAD_REQUEST);

        let bare = app(Some("k3y"))
            .oneshot(post_json("/tool/read_emails", REVERSED_WINDOW, Some("k3y")))
            .await
            .expect("router responds");
        assert_eq!(bare.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn send_is_forbidden_when_disabled() {
        let body = r#"{"to":["alice@example.com"],"subject":"Hi","body":"Hello"}"#;
        let response = app(None)
            .oneshot(post_json("/tool/send_email", body, None))
            .await
            .expect("router responds");
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn openapi_describes_tool_routes() {
        let response = app(None)
            .oneshot(
                Request::get("/openapi.json")
                    .body(Body::empty())
                    .expect("valid request"),
            )
            .await
            .expect("router responds");
        assert_eq!(response.status(), StatusCode::OK);
        let doc = json_body(response).await;
        for path in [
            "/tool/summarize_emails",
            "/tool/read_emails",
            "/tool/send_email",
        ] {
            assert!(doc["paths"][path]["post"].is_object(), "missing {path}");
        }
        let time_range = &doc["components"]["schemas"]["TimeRangeInput"]["properties"];
        assert!(time_range["start_iso"].is_object());
        assert!(time_range["end_iso"].is_object());
    }
}
