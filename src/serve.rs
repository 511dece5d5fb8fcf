use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Path as AxumPath, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tower::ServiceExt;
use tower::service_fn;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::convert::{FilterOptions, IssueRecord, RecordFilter, filter_options};
use crate::error::{SessionError, TreeError, UpstreamError};
use crate::layout::{LinkGap, MapLayout, ViewTransform};
use crate::render::{SvgOptions, render_svg};
use crate::session::MapSession;
use crate::sync::{Decision, Deferred, PendingWrite, RemoteChange, SyncOutcome, push_change, resolve};
use crate::tree::{Node, NodePatch, Point};
use crate::upstream::{GraphQlClient, StateDirectory, fetch_all, parse_records};

/// Arguments for running the issuemap web backend
#[derive(Debug, Clone, Parser)]
#[command(name = "issuemap serve", about = "Start the issuemap web backend.")]
pub struct ServeArgs {
    /// Saved records (JSON) to open instead of fetching from the tracker.
    #[arg(short = 'i', long = "input")]
    pub input: Option<PathBuf>,

    /// Address to bind the HTTP server to.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 3000)]
    pub port: u16,

    /// Directory holding the built web UI.
    #[arg(long = "web-root")]
    pub web_root: Option<PathBuf>,

    /// Mirror map edits to the tracker.
    #[arg(long)]
    pub sync: bool,
}

type ApiError = (StatusCode, String);

struct MapState {
    session: MapSession,
    pending: Option<PendingWrite>,
    states: Option<StateDirectory>,
    fetched_at: Option<DateTime<Utc>>,
}

pub struct ServeState {
    config: AppConfig,
    http: reqwest::Client,
    writer: Option<GraphQlClient>,
    map: Mutex<MapState>,
}

impl ServeState {
    pub fn new(config: AppConfig, session: MapSession) -> Result<Self> {
        let http = config
            .http_client()
            .context("failed to build HTTP client")?;
        Ok(Self {
            config,
            http,
            writer: None,
            map: Mutex::new(MapState {
                session,
                pending: None,
                states: None,
                fetched_at: None,
            }),
        })
    }

    /// Sends every map edit to the tracker with the cached token.
    pub fn with_sync(mut self) -> Result<Self> {
        let client = self
            .config
            .client(None)
            .context("--sync needs an API token (set ISSUEMAP_API_KEY or LINEAR_API_KEY)")?;
        self.writer = Some(client);
        Ok(self)
    }

    pub fn with_writer(mut self, writer: GraphQlClient) -> Self {
        self.writer = Some(writer);
        self
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MapPayload {
    tree: Node,
    layout: MapLayout,
    transform: Option<ViewTransform>,
    selected: Option<String>,
    warning: Option<String>,
    filter: RecordFilter,
    filter_options: FilterOptions,
    record_count: usize,
    fetched_at: Option<DateTime<Utc>>,
    pending: Option<PendingPayload>,
    sync: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PendingPayload {
    node_id: String,
    action: &'static str,
    error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenStatus {
    has_token: bool,
    source: Option<&'static str>,
}

#[derive(Debug, Deserialize, Default)]
struct RefreshRequest {
    #[serde(default)]
    records: Option<Vec<IssueRecord>>,
    #[serde(default)]
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SelectRequest {
    #[serde(default)]
    id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MoveRequest {
    dx: f32,
    dy: f32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReparentRequest {
    parent_id: String,
}

#[derive(Debug, Deserialize)]
struct DecisionRequest {
    decision: Decision,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SpacingPayload {
    gaps: Vec<LinkGap>,
    unique_distances: Vec<i64>,
    is_constant_spacing: bool,
    expected_distance: f32,
}

pub fn router(state: Arc<ServeState>) -> Router {
    Router::new()
        .route("/api/token-status", get(token_status))
        .route("/api/cached-token", get(cached_token))
        .route("/api/linear", post(proxy_graphql))
        .route("/api/map", get(get_map))
        .route("/api/map/svg", get(get_svg))
        .route("/api/map/spacing", get(get_spacing))
        .route("/api/map/refresh", post(refresh_map))
        .route("/api/map/filter", put(put_filter))
        .route("/api/map/transform", put(put_transform))
        .route("/api/map/select", post(select_node))
        .route("/api/map/divergence", post(decide_divergence))
        .route("/api/map/nodes/:id", axum::routing::patch(patch_node).delete(delete_node))
        .route("/api/map/nodes/:id/collapse", post(collapse_node))
        .route("/api/map/nodes/:id/move", post(move_node))
        .route("/api/map/nodes/:id/reparent", post(reparent_node))
        .route("/api/map/nodes/:id/children", post(create_child))
        .with_state(state)
}

pub async fn run_serve(args: ServeArgs, config: AppConfig) -> Result<()> {
    let ui_root = locate_ui_dist(args.web_root.as_ref(), config.web_dist.as_ref());
    let (records, fetched_at) = initial_records(&args, &config).await?;
    let session = MapSession::from_records(records, RecordFilter::default());

    let mut state = ServeState::new(config, session)?;
    if args.sync {
        state = state.with_sync()?;
    }
    state.map.get_mut().fetched_at = fetched_at;
    let state = Arc::new(state);

    let mut app = router(state);

    match ui_root {
        Some(root) => {
            let static_dir = ServeDir::new(root.clone())
                .append_index_html_on_directories(true)
                .fallback(ServeFile::new(root.join("index.html")));
            let dir_for_service = static_dir.clone();

            let static_service = service_fn(move |req| {
                let svc = dir_for_service.clone();
                async move {
                    match svc.oneshot(req).await {
                        Ok(response) => Ok(response.map(axum::body::Body::new)),
                        Err(error) => {
                            let message = format!("Static file error: {error}");
                            Ok((StatusCode::INTERNAL_SERVER_ERROR, message).into_response())
                        }
                    }
                }
            });

            println!("Serving web UI from {}", root.display());
            app = app.fallback_service(static_service);
        }
        None => info!("no web UI found; serving the API only"),
    }

    let app = app
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("{}:{}", args.host, args.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind HTTP server to {addr}"))?;

    println!("issuemap server listening on http://{addr}");
    println!("Press Ctrl+C to stop.");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("HTTP server error")?;

    Ok(())
}

async fn initial_records(
    args: &ServeArgs,
    config: &AppConfig,
) -> Result<(Vec<IssueRecord>, Option<DateTime<Utc>>)> {
    if let Some(path) = &args.input {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read '{}'", path.display()))?;
        let records = parse_records(&text)
            .with_context(|| format!("failed to parse records in '{}'", path.display()))?;
        return Ok((records, None));
    }
    if config.token.is_none() {
        info!("no API token configured; the map starts empty");
        return Ok((Vec::new(), None));
    }
    let client = config.client(None)?;
    match fetch_all(&client, config.max_pages, |_| {}).await {
        Ok(summary) => Ok((summary.records, Some(Utc::now()))),
        Err(err) => {
            warn!(error = %err, "initial fetch failed; the map starts empty");
            Ok((Vec::new(), None))
        }
    }
}

/// Finds the built web UI: the explicit flag, then `ISSUEMAP_WEB_DIST`, then
/// the directory bundled at build time, then `web/dist` beside the working
/// directory or the executable.
fn locate_ui_dist(flag: Option<&PathBuf>, env: Option<&PathBuf>) -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = flag.into_iter().chain(env).cloned().collect();

    if let Some(bundled) = option_env!("ISSUEMAP_BUNDLED_WEB_DIST") {
        candidates.push(PathBuf::from(bundled));
    }
    if let Ok(cwd) = std::env::current_dir() {
        candidates.push(cwd.join("web/dist"));
    }
    if let Ok(exe) = std::env::current_exe() {
        for ancestor in exe.ancestors() {
            candidates.push(ancestor.join("web/dist"));
        }
    }

    candidates
        .into_iter()
        .find(|candidate| candidate.join("index.html").is_file())
}

fn internal_error(err: anyhow::Error) -> ApiError {
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

fn upstream_error(err: UpstreamError) -> ApiError {
    match err {
        UpstreamError::MissingToken => (StatusCode::UNAUTHORIZED, err.to_string()),
        other => (StatusCode::BAD_GATEWAY, other.to_string()),
    }
}

fn session_error(err: SessionError) -> ApiError {
    let status = match &err {
        SessionError::Tree(TreeError::NotFound(_)) => StatusCode::NOT_FOUND,
        SessionError::GestureActive | SessionError::NoGesture => StatusCode::CONFLICT,
        _ => StatusCode::BAD_REQUEST,
    };
    (status, err.to_string())
}

fn payload(state: &ServeState, map: &mut MapState) -> MapPayload {
    if map.session.rendered().is_none() {
        map.session.render();
    }
    let session = &mut map.session;
    MapPayload {
        warning: session.take_warning(),
        tree: session.tree().clone(),
        layout: session.rendered().cloned().unwrap_or_default(),
        transform: session.transform(),
        selected: session.selected().map(str::to_string),
        filter: session.filter().clone(),
        filter_options: filter_options(session.records()),
        record_count: session.records().len(),
        fetched_at: map.fetched_at,
        pending: map.pending.as_ref().map(|pending| PendingPayload {
            node_id: pending.change.node_id().to_string(),
            action: pending.change.action(),
            error: pending.error.clone(),
        }),
        sync: state.writer.is_some(),
    }
}

/// Mirrors a local change upstream when syncing is on. A rejected write stays
/// applied locally and is parked until the client decides what to do. Only
/// one write is parked; an older one still waiting is kept locally.
async fn mirror(state: &ServeState, map: &mut MapState, change: RemoteChange) -> Result<(), ApiError> {
    let Some(writer) = &state.writer else {
        return Ok(());
    };
    if map.states.is_none() {
        match writer.workflow_states().await {
            Ok(states) => map.states = Some(states),
            Err(err) => warn!(error = %err, "could not load workflow states"),
        }
    }
    let empty = StateDirectory::default();
    let states = map.states.as_ref().unwrap_or(&empty);
    match push_change(&mut map.session, writer, states, &Deferred, change).await {
        SyncOutcome::Deferred(pending) => {
            let message = format!(
                "the tracker did not accept the change ({}); choose keepLocal or discard",
                pending.error
            );
            if let Some(displaced) = map.pending.replace(pending) {
                warn!(
                    node_id = displaced.change.node_id(),
                    "an earlier undecided write is kept locally"
                );
                resolve(&mut map.session, displaced, Decision::KeepLocal);
            }
            Err((StatusCode::CONFLICT, message))
        }
        _ => Ok(()),
    }
}

async fn token_status(State(state): State<Arc<ServeState>>) -> Json<TokenStatus> {
    Json(TokenStatus {
        has_token: state.config.token.is_some(),
        source: state.config.token.as_ref().map(|token| token.source),
    })
}

async fn cached_token(State(state): State<Arc<ServeState>>) -> Response {
    match state.config.token_value() {
        Some(token) => Json(json!({ "token": token })).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "No cached token available" })),
        )
            .into_response(),
    }
}

/// Forwards a GraphQL request. A token in the request wins over the cached
/// one.
async fn proxy_graphql(
    State(state): State<Arc<ServeState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(crate::utils::bearer_token)
        .or(state.config.token_value())
        .map(str::to_string);

    match forward(&state, token, &body).await {
        Ok((status, data)) => (status, Json(data)).into_response(),
        Err(err) => {
            warn!(error = %err, "proxy request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "errors": [{ "message": format!("Proxy server error: {err}") }] })),
            )
                .into_response()
        }
    }
}

async fn forward(state: &ServeState, token: Option<String>, body: &Value) -> Result<(StatusCode, Value)> {
    let mut request = state.http.post(&state.config.upstream_url).json(body);
    if let Some(token) = token {
        request = request.header("Authorization", token);
    }
    let response = request.send().await?;
    let status = StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let data: Value = response
        .json()
        .await
        .context("upstream returned a non-JSON body")?;
    Ok((status, data))
}

async fn get_map(State(state): State<Arc<ServeState>>) -> Json<MapPayload> {
    let mut map = state.map.lock().await;
    Json(payload(&state, &mut map))
}

async fn get_svg(State(state): State<Arc<ServeState>>) -> Result<Response, ApiError> {
    let mut map = state.map.lock().await;
    let layout = map.session.render().clone();
    drop(map);

    let svg = render_svg(&layout, &SvgOptions::default()).map_err(internal_error)?;
    let mut response = Response::new(svg.into());
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("image/svg+xml"),
    );
    Ok(response)
}

async fn get_spacing(State(state): State<Arc<ServeState>>) -> Json<SpacingPayload> {
    let mut map = state.map.lock().await;
    let expected = map.session.config().spacing;
    let gaps = map.session.render().link_gaps();
    let mut unique: Vec<i64> = gaps
        .iter()
        .map(|gap| gap.distance.round() as i64)
        .collect();
    unique.sort_unstable();
    unique.dedup();
    Json(SpacingPayload {
        is_constant_spacing: unique.len() <= 1,
        unique_distances: unique,
        gaps,
        expected_distance: expected,
    })
}

async fn refresh_map(
    State(state): State<Arc<ServeState>>,
    request: Option<Json<RefreshRequest>>,
) -> Result<Json<MapPayload>, ApiError> {
    let request = request.map(|Json(request)| request).unwrap_or_default();
    let records = match request.records {
        Some(records) => records,
        None => {
            let client = state
                .config
                .client(request.token.as_deref())
                .map_err(upstream_error)?;
            let summary = fetch_all(&client, state.config.max_pages, |_| {})
                .await
                .map_err(upstream_error)?;
            if summary.hit_ceiling {
                warn!(pages = summary.pages, "refresh stopped at the page ceiling");
            }
            summary.records
        }
    };

    let mut map = state.map.lock().await;
    info!(records = records.len(), "refreshing map");
    map.session.refresh(records);
    map.fetched_at = Some(Utc::now());
    Ok(Json(payload(&state, &mut map)))
}

async fn put_filter(
    State(state): State<Arc<ServeState>>,
    Json(filter): Json<RecordFilter>,
) -> Json<MapPayload> {
    let mut map = state.map.lock().await;
    map.session.set_filter(filter);
    Json(payload(&state, &mut map))
}

async fn put_transform(
    State(state): State<Arc<ServeState>>,
    Json(transform): Json<ViewTransform>,
) -> Result<Json<MapPayload>, ApiError> {
    let mut map = state.map.lock().await;
    if !map.session.set_transform(transform) {
        return Err((StatusCode::CONFLICT, "a drag is in progress".to_string()));
    }
    Ok(Json(payload(&state, &mut map)))
}

async fn select_node(
    State(state): State<Arc<ServeState>>,
    Json(request): Json<SelectRequest>,
) -> Result<Json<MapPayload>, ApiError> {
    let mut map = state.map.lock().await;
    map.session
        .select(request.id.as_deref())
        .map_err(session_error)?;
    Ok(Json(payload(&state, &mut map)))
}

async fn decide_divergence(
    State(state): State<Arc<ServeState>>,
    Json(request): Json<DecisionRequest>,
) -> Result<Json<MapPayload>, ApiError> {
    let mut map = state.map.lock().await;
    let pending = map.pending.take().ok_or((
        StatusCode::NOT_FOUND,
        "no failed write is waiting for a decision".to_string(),
    ))?;
    if let SyncOutcome::Deferred(pending) = resolve(&mut map.session, pending, request.decision) {
        map.pending = Some(pending);
    }
    Ok(Json(payload(&state, &mut map)))
}

async fn collapse_node(
    State(state): State<Arc<ServeState>>,
    AxumPath(node_id): AxumPath<String>,
) -> Result<Json<MapPayload>, ApiError> {
    let mut map = state.map.lock().await;
    map.session
        .toggle_collapse(&node_id)
        .map_err(session_error)?;
    Ok(Json(payload(&state, &mut map)))
}

async fn move_node(
    State(state): State<Arc<ServeState>>,
    AxumPath(node_id): AxumPath<String>,
    Json(request): Json<MoveRequest>,
) -> Result<Json<MapPayload>, ApiError> {
    let mut map = state.map.lock().await;
    map.session
        .move_by(&node_id, Point::new(request.dx, request.dy))
        .map_err(session_error)?;
    Ok(Json(payload(&state, &mut map)))
}

async fn reparent_node(
    State(state): State<Arc<ServeState>>,
    AxumPath(node_id): AxumPath<String>,
    Json(request): Json<ReparentRequest>,
) -> Result<Json<MapPayload>, ApiError> {
    let mut map = state.map.lock().await;
    let moved = map
        .session
        .reparent(&node_id, &request.parent_id)
        .map_err(session_error)?;
    mirror(&state, &mut map, moved.into()).await?;
    Ok(Json(payload(&state, &mut map)))
}

async fn create_child(
    State(state): State<Arc<ServeState>>,
    AxumPath(parent_id): AxumPath<String>,
    Json(fields): Json<NodePatch>,
) -> Result<impl IntoResponse, ApiError> {
    let mut map = state.map.lock().await;
    map.session
        .begin_new_child(&parent_id)
        .map_err(session_error)?;
    map.session.update_draft(&fields).map_err(session_error)?;
    let created = map.session.confirm_edit().map_err(session_error)?;
    mirror(&state, &mut map, created.into()).await?;
    Ok((StatusCode::CREATED, Json(payload(&state, &mut map))))
}

async fn patch_node(
    State(state): State<Arc<ServeState>>,
    AxumPath(node_id): AxumPath<String>,
    Json(patch): Json<NodePatch>,
) -> Result<Json<MapPayload>, ApiError> {
    if patch.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "nothing to change".to_string()));
    }
    let mut map = state.map.lock().await;
    let updated = map
        .session
        .patch_node(&node_id, &patch)
        .map_err(session_error)?;
    mirror(&state, &mut map, updated.into()).await?;
    Ok(Json(payload(&state, &mut map)))
}

async fn delete_node(
    State(state): State<Arc<ServeState>>,
    AxumPath(node_id): AxumPath<String>,
) -> Result<Json<MapPayload>, ApiError> {
    let mut map = state.map.lock().await;
    let deleted = map.session.delete(&node_id).map_err(session_error)?;
    mirror(&state, &mut map, deleted.into()).await?;
    Ok(Json(payload(&state, &mut map)))
}
