//! Axum HTTP surface for the gateway.
//!
//! Two JSON endpoints: submission (`/api/chat`) and polling
//! (`/api/chat/result`). Every response carries a `code` discriminator:
//! `0` success, `1` pending, negative values terminal failure.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Error, JobError, ServerError};
use crate::jobs::runner::{self, ChatJobRequest};
use crate::jobs::store::{ChatOutcome, JobStatus, JobStore};
use crate::llm::content::HistoryTurn;
use crate::llm::gemini::GeminiClient;
use crate::llm::provider::ChatBackend;
use crate::storage::uploader::CloudStorage;

/// Timeout for fetching caller-hosted input images.
const INPUT_FETCH_TIMEOUT: Duration = Duration::from_secs(60);

/// Shared state for all handlers and background jobs.
pub struct AppState {
    pub jobs: JobStore,
    /// `None` when no API key was configured; submissions then fail fast.
    pub backend: Option<Arc<dyn ChatBackend>>,
    /// `None` when the object store is unconfigured; generated images are
    /// then reported as undeliverable instead of failing jobs.
    pub storage: Option<Arc<CloudStorage>>,
    pub http: reqwest::Client,
    pub default_model: String,
}

impl AppState {
    pub fn from_config(config: &Config) -> Result<Self, Error> {
        let backend: Option<Arc<dyn ChatBackend>> = match &config.llm.api_key {
            Some(key) => {
                let mut client = GeminiClient::new(key.clone())?;
                if let Some(base) = &config.llm.base_url {
                    client = client.with_base_url(base.clone());
                }
                Some(Arc::new(client))
            }
            None => {
                tracing::warn!("GEMINI_API_KEY not set; chat submissions will be rejected");
                None
            }
        };

        let storage = match (
            &config.storage.app_id,
            &config.storage.app_secret,
            &config.storage.env_id,
        ) {
            (Some(app_id), Some(app_secret), Some(env_id)) => {
                let mut storage =
                    CloudStorage::new(app_id.clone(), app_secret.clone(), env_id.clone())?;
                if let Some(base) = &config.storage.base_url {
                    storage = storage.with_base_url(base.clone());
                }
                Some(Arc::new(storage))
            }
            _ => {
                tracing::warn!(
                    "cloud storage not fully configured; generated images will not be persisted"
                );
                None
            }
        };

        let http = reqwest::Client::builder()
            .timeout(INPUT_FETCH_TIMEOUT)
            .build()
            .map_err(|e| {
                Error::Server(ServerError::Serve(format!(
                    "failed to build HTTP client: {e}"
                )))
            })?;

        Ok(Self {
            jobs: JobStore::new(),
            backend,
            storage,
            http,
            default_model: config.llm.default_model.clone(),
        })
    }
}

// --- request/response types ---

#[derive(Debug, Deserialize)]
pub struct ChatRequestBody {
    pub prompt: Option<String>,
    #[serde(rename = "imageUrl")]
    pub image_url: Option<String>,
    pub model: Option<String>,
    #[serde(default)]
    pub history: Vec<HistoryTurn>,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResultRequestBody {
    pub job_id: String,
}

#[derive(Debug, Serialize)]
pub struct ResultResponse {
    pub code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResultResponse {
    fn processing() -> Self {
        Self {
            code: 1,
            status: Some("processing"),
            reply: None,
            generated_image: None,
            error: None,
        }
    }

    fn success(outcome: ChatOutcome) -> Self {
        Self {
            code: 0,
            status: Some("success"),
            reply: Some(outcome.reply),
            generated_image: outcome.generated_image,
            error: None,
        }
    }

    fn failed(message: String) -> Self {
        Self {
            code: -1,
            status: Some("fail"),
            reply: None,
            generated_image: None,
            error: Some(message),
        }
    }

    fn not_found() -> Self {
        Self {
            code: -2,
            status: None,
            reply: None,
            generated_image: None,
            error: Some("unknown or already delivered job id".to_string()),
        }
    }
}

// --- handlers ---

async fn index_handler() -> &'static str {
    "minichat gateway is running"
}

async fn chat_submit_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ChatRequestBody>,
) -> Json<SubmitResponse> {
    let request = ChatJobRequest {
        prompt: body.prompt,
        image_url: body.image_url,
        model: body.model,
        history: body.history,
    };

    match runner::submit(&state, request) {
        Ok(id) => Json(SubmitResponse {
            code: 0,
            job_id: Some(id.to_string()),
            error: None,
        }),
        Err(e) => Json(SubmitResponse {
            code: -1,
            job_id: None,
            error: Some(e.to_string()),
        }),
    }
}

async fn chat_result_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ResultRequestBody>,
) -> Json<ResultResponse> {
    // A malformed id is indistinguishable from an evicted one by design.
    let Ok(id) = Uuid::parse_str(&body.job_id) else {
        return Json(ResultResponse::not_found());
    };

    let response = match state.jobs.poll(id) {
        Err(JobError::NotFound { .. }) => ResultResponse::not_found(),
        Ok(JobStatus::Processing) => ResultResponse::processing(),
        Ok(JobStatus::Succeeded(outcome)) => ResultResponse::success(outcome),
        Ok(JobStatus::Failed(message)) => ResultResponse::failed(message),
    };

    Json(response)
}

// --- router & lifecycle ---

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/api/chat", post(chat_submit_handler))
        .route("/api/chat/result", post(chat_result_handler))
        .layer(DefaultBodyLimit::max(1024 * 1024)) // 1 MB max request body
        // Mini-program webviews call from opaque origins.
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until ctrl-c.
pub async fn serve(addr: SocketAddr, state: Arc<AppState>) -> Result<(), ServerError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::Bind {
            addr: addr.to_string(),
            reason: e.to_string(),
        })?;

    tracing::info!(%addr, "gateway listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("gateway shutting down");
        })
        .await
        .map_err(|e| ServerError::Serve(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use tower::ServiceExt;

    use crate::error::LlmError;
    use crate::llm::provider::{ChatReplyParts, Content};

    struct EchoBackend;

    #[async_trait]
    impl ChatBackend for EchoBackend {
        async fn generate(
            &self,
            _model: &str,
            _contents: &[Content],
        ) -> Result<ChatReplyParts, LlmError> {
            Ok(ChatReplyParts {
                text: "echo".to_string(),
                attachments: Vec::new(),
            })
        }
    }

    fn state(backend: Option<Arc<dyn ChatBackend>>) -> Arc<AppState> {
        Arc::new(AppState {
            jobs: JobStore::new(),
            backend,
            storage: None,
            http: reqwest::Client::new(),
            default_model: "gemini-1.5-flash".to_string(),
        })
    }

    async fn post_json(app: Router, uri: &str, body: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn index_reports_liveness() {
        let response = router(state(None))
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn submit_without_backend_fails_fast() {
        let (status, body) =
            post_json(router(state(None)), "/api/chat", r#"{"prompt":"hi"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["code"], -1);
        assert!(
            body["error"].as_str().unwrap().contains("not configured"),
            "error should say the backend is missing: {body}"
        );
        assert!(body.get("job_id").is_none(), "no job may be created");
    }

    #[tokio::test]
    async fn submit_empty_input_is_rejected() {
        let (_, body) = post_json(
            router(state(Some(Arc::new(EchoBackend)))),
            "/api/chat",
            r#"{"prompt":"  "}"#,
        )
        .await;
        assert_eq!(body["code"], -1);
        assert!(body["error"].as_str().unwrap().contains("no prompt"));
    }

    #[tokio::test]
    async fn poll_with_bogus_id_is_not_found() {
        for id in ["not-a-uuid", "00000000-0000-0000-0000-000000000000"] {
            let (_, body) = post_json(
                router(state(None)),
                "/api/chat/result",
                &format!(r#"{{"job_id":"{id}"}}"#),
            )
            .await;
            assert_eq!(body["code"], -2, "id {id} should be indistinguishable");
            assert!(body["error"].is_string());
        }
    }

    #[tokio::test]
    async fn submit_returns_job_id_and_eventually_succeeds() {
        let state = state(Some(Arc::new(EchoBackend)));
        let app = router(Arc::clone(&state));

        let (_, body) = post_json(app.clone(), "/api/chat", r#"{"prompt":"hi"}"#).await;
        assert_eq!(body["code"], 0);
        let job_id = body["job_id"].as_str().expect("job id present").to_string();

        // The pipeline runs on a spawned task; poll until terminal.
        let poll_body = format!(r#"{{"job_id":"{job_id}"}}"#);
        let mut outcome = None;
        for _ in 0..50 {
            let (_, body) = post_json(app.clone(), "/api/chat/result", &poll_body).await;
            match body["code"].as_i64().unwrap() {
                1 => tokio::time::sleep(Duration::from_millis(10)).await,
                _ => {
                    outcome = Some(body);
                    break;
                }
            }
        }

        let outcome = outcome.expect("job should reach a terminal state");
        assert_eq!(outcome["code"], 0, "unexpected outcome: {outcome}");
        assert_eq!(outcome["status"], "success");
        assert_eq!(outcome["reply"], "echo");

        let (_, body) = post_json(app, "/api/chat/result", &poll_body).await;
        assert_eq!(body["code"], -2, "terminal outcome is delivered exactly once");
    }
}
