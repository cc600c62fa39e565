use axum::{
    body::Body,
    extract::{rejection::JsonRejection, RawQuery, Request, State},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::StreamExt;
use http::{header, HeaderValue, StatusCode};
use serde_json::json;
use std::any::Any;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::assistant::{
    fetcher::ReportFetcher,
    request::{now_eastern, ReportType, ResearchPayload, ResearchRequest},
    state::ReportResult,
};
use crate::configuration::{Configuration, CorsOrigins, DateValidation};
use crate::error::{panic_message, RelayError, Result, UNHANDLED_DETAIL};

pub struct AppState {
    fetcher: ReportFetcher,
    api_key: String,
    date_validation: DateValidation,
}

impl AppState {
    pub fn new(fetcher: ReportFetcher, api_key: impl Into<String>, date_validation: DateValidation) -> Self {
        Self {
            fetcher,
            api_key: api_key.into(),
            date_validation,
        }
    }

    fn validate(&self, payload: ResearchPayload) -> Result<ResearchRequest> {
        ResearchRequest::from_payload(payload, self.date_validation, now_eastern())
    }
}

/// Builds the application router. `/health` is public; research routes need the bearer token.
pub fn router(state: Arc<AppState>, cors_origins: &CorsOrigins) -> Router {
    let protected = Router::new()
        .route("/research", post(handle_research))
        .route("/research_direct", post(handle_research_direct))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_bearer));

    Router::new()
        .route("/health", get(health))
        .merge(protected)
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(cors_origins))
        .with_state(state)
}

fn cors_layer(origins: &CorsOrigins) -> CorsLayer {
    match origins {
        CorsOrigins::Any => CorsLayer::permissive(),
        CorsOrigins::List(list) => {
            let allowed: Vec<HeaderValue> = list
                .iter()
                .filter_map(|origin| match HeaderValue::from_str(origin) {
                    Ok(value) => Some(value),
                    Err(e) => {
                        tracing::warn!(%origin, error = %e, "Ignoring invalid CORS origin");
                        None
                    }
                })
                .collect();
            CorsLayer::permissive().allow_origin(AllowOrigin::list(allowed))
        }
    }
}

pub async fn run_server(config: Configuration, fetcher: ReportFetcher) -> anyhow::Result<()> {
    let api_key = config.require_api_key()?.to_string();
    let state = Arc::new(AppState::new(fetcher, api_key, config.date_validation));
    let app = router(state, &config.server.cors_origins);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(
        %addr,
        date_validation = ?config.date_validation,
        research_mode = ?config.engine.research_mode,
        "Research relay listening"
    );

    axum::serve(listener, app).await?;
    Ok(())
}

async fn require_bearer(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> std::result::Result<Response, RelayError> {
    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token)
        .is_some_and(|token| token == state.api_key);

    if !authorized {
        tracing::warn!(path = %request.uri().path(), "Rejected request with invalid API key");
        return Err(RelayError::Unauthorized);
    }
    Ok(next.run(request).await)
}

/// Token of a `Bearer` credential. The scheme is matched case-insensitively.
fn bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then(|| token.trim_start())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn handle_research(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<ResearchPayload>, JsonRejection>,
) -> Result<Response> {
    let Json(payload) = payload.map_err(|rejection| RelayError::invalid(rejection.body_text()))?;
    let request = state.validate(payload)?;
    tracing::info!(query = %request.query, report_type = %request.report_type, "Received streaming research request");

    let body = Body::from_stream(
        state
            .fetcher
            .stream(request)
            .map(|chunk| Ok::<_, Infallible>(chunk.to_string())),
    );

    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response())
}

async fn handle_research_direct(
    State(state): State<Arc<AppState>>,
    RawQuery(query): RawQuery,
) -> Result<Json<ReportResult>> {
    let payload = direct_payload(query.as_deref().unwrap_or_default())?;
    let request = state.validate(payload)?;
    tracing::info!(query = %request.query, report_type = %request.report_type, "Received direct research request");

    Ok(Json(state.fetcher.fetch(&request).await))
}

/// Reads a research payload from URL query parameters.
/// `sources` may repeat or hold a comma-separated list.
fn direct_payload(raw_query: &str) -> Result<ResearchPayload> {
    let mut query = None;
    let mut payload = ResearchPayload::default();
    let mut sources = Vec::new();

    for (key, value) in url::form_urlencoded::parse(raw_query.as_bytes()) {
        match &*key {
            "query" => query = Some(value.into_owned()),
            "report_type" => payload.report_type = Some(value.parse::<ReportType>()?),
            "start_date" => payload.start_date = Some(value.into_owned()),
            "end_date" => payload.end_date = Some(value.into_owned()),
            "sources" => sources.extend(value.split(',').map(str::to_string)),
            other => tracing::debug!(parameter = other, "Ignoring unknown query parameter"),
        }
    }

    payload.query = query.ok_or_else(|| RelayError::invalid("Missing required query parameter 'query'"))?;
    payload.sources = Some(sources);
    Ok(payload)
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let details = panic_message(&*err);
    tracing::error!(panic = %details, "Handler panicked");

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "detail": UNHANDLED_DETAIL })),
    )
        .into_response()
}
