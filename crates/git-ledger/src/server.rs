//! HTTP intake: request decoding, URL validation, dispatch into the
//! ingestion pipeline.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use git_ledger_app::{ingest_repository, list_org_repos};
use git_ledger_core::RepoUrl;
use git_ledger_db::LedgerStore;
use git_ledger_git::{check_reachable, GitProvider};
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};
use url::Url;

/// Everything a request handler needs, shared across workers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn LedgerStore>,
    pub provider: Arc<GitProvider>,
    pub forge: reqwest::Client,
}

/// Build the service router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/bake", post(bake))
        .route("/ping", get(ping))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug, Deserialize)]
struct BakeRequest {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    org: Option<String>,
    #[serde(default)]
    wait: bool,
    #[serde(default)]
    archives: bool,
}

struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, self.message).into_response()
    }
}

async fn ping() -> &'static str {
    "pong"
}

async fn bake(State(state): State<AppState>, body: Bytes) -> Result<StatusCode, AppError> {
    let request: BakeRequest = serde_json::from_slice(&body).map_err(|err| {
        AppError::new(
            StatusCode::BAD_REQUEST,
            format!("could not decode request body: {err}"),
        )
    })?;

    if let Some(org) = request.org.as_deref() {
        return bake_org(state, org, request.archives, request.wait).await;
    }

    let Some(raw) = request.url.as_deref() else {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "one of url or org must be provided",
        ));
    };

    let url = RepoUrl::parse(raw)
        .map_err(|err| AppError::new(StatusCode::BAD_REQUEST, err.to_string()))?;
    check_reachable(&url).await.map_err(|err| {
        AppError::new(
            StatusCode::BAD_REQUEST,
            format!("repository is not reachable: {err}"),
        )
    })?;

    if request.wait {
        ingest_repository(&*state.store, &state.provider, &url)
            .await
            .map_err(|err| {
                error!(%url, error = ?err, "ingestion failed");
                AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "could not process input")
            })?;
    } else {
        spawn_ingestion(state, url);
    }

    Ok(StatusCode::ACCEPTED)
}

async fn bake_org(
    state: AppState,
    org: &str,
    archives: bool,
    wait: bool,
) -> Result<StatusCode, AppError> {
    // Input problems are the caller's; listing problems are the forge's.
    let parsed = Url::parse(org)
        .map_err(|err| AppError::new(StatusCode::BAD_REQUEST, format!("invalid org URL: {err}")))?;
    if parsed.host_str() != Some("github.com") {
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            format!(
                "cannot expand organizations on {}",
                parsed.host_str().unwrap_or("<no host>")
            ),
        ));
    }

    let repos = list_org_repos(&state.forge, org, archives)
        .await
        .map_err(|err| {
            error!(org, error = ?err, "org expansion failed");
            AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "could not process input")
        })?;

    let urls: Vec<RepoUrl> = repos
        .iter()
        .filter_map(|repo| match RepoUrl::parse(&repo.url) {
            Ok(url) => Some(url),
            Err(err) => {
                warn!(listed = %repo.url, error = %err, "skipping unusable repo URL from org listing");
                None
            }
        })
        .collect();

    if wait {
        for url in urls {
            ingest_repository(&*state.store, &state.provider, &url)
                .await
                .map_err(|err| {
                    error!(%url, error = ?err, "ingestion failed");
                    AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "could not process input")
                })?;
        }
    } else {
        // One worker per repository; failures are independent and only
        // reported through the log.
        for url in urls {
            spawn_ingestion(state.clone(), url);
        }
    }

    Ok(StatusCode::ACCEPTED)
}

fn spawn_ingestion(state: AppState, url: RepoUrl) {
    tokio::spawn(async move {
        if let Err(err) = ingest_repository(&*state.store, &state.provider, &url).await {
            error!(%url, error = ?err, "background ingestion failed");
        }
    });
}
