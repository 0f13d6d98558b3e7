use crate::config::AppConfig;
use crate::error::PipelineError;
use crate::pipeline::Pipeline;
use crate::selection::SelectionState;
use crate::types::{FilterCriteria, Gender};
use anyhow::Result;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::info;

/// Per-session state: the linked selection plus the criteria of the last
/// run, so a click can re-render without the UI resending its inputs.
#[derive(Debug, Clone)]
pub struct Session {
    pub selection: SelectionState,
    pub criteria: FilterCriteria,
    // Country ids that had a mark in the last run
    pub marked: BTreeSet<u32>,
}

pub struct AppState {
    pipeline: Pipeline,
    default_criteria: FilterCriteria,
    endpoint: String,
    sessions: Mutex<HashMap<String, Arc<Mutex<Session>>>>,
    next_session: AtomicU64,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unknown session \"{0}\"")]
    UnknownSession(String),
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::UnknownSession(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Pipeline(PipelineError::InvalidFilterRange { .. }) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            ApiError::Pipeline(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session: String,
    pub criteria: FilterCriteria,
    pub indicators: Vec<(String, String)>,
}

#[derive(Debug, Serialize)]
pub struct RenderResponse {
    pub session: String,
    pub spec: Value,
    pub no_data: bool,
    pub ranking: Vec<String>,
    pub selected: Vec<u32>,
    pub diagnostics: Vec<String>,
}

/// Filter inputs from the UI. Anything omitted keeps the session's last
/// value. `genders` is comma separated; an empty string selects nobody.
#[derive(Debug, Default, Deserialize)]
pub struct RenderParams {
    pub session: String,
    pub age_min: Option<i32>,
    pub age_max: Option<i32>,
    pub genders: Option<String>,
    pub indicator: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ToggleRequest {
    pub session: String,
    pub id: u32,
}

#[derive(Debug, Deserialize)]
pub struct ClearRequest {
    pub session: String,
}

fn parse_genders(raw: &str) -> Result<BTreeSet<Gender>, ApiError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<Gender>().map_err(ApiError::BadRequest))
        .collect()
}

impl AppState {
    pub fn new(pipeline: Pipeline, default_criteria: FilterCriteria, endpoint: String) -> Self {
        Self {
            pipeline,
            default_criteria,
            endpoint,
            sessions: Mutex::new(HashMap::new()),
            next_session: AtomicU64::new(1),
        }
    }

    pub fn open_session(&self) -> Result<SessionResponse, ApiError> {
        let id = format!("s{}", self.next_session.fetch_add(1, Ordering::Relaxed));
        let selection = SelectionState::new();
        let output = self.pipeline.run(&self.default_criteria, &selection)?;
        let session = Session {
            selection,
            criteria: self.default_criteria.clone(),
            marked: output.join.rows.iter().map(|row| row.id).collect(),
        };
        self.sessions
            .lock()
            .map_err(|_| ApiError::Internal("session table lock poisoned".to_string()))?
            .insert(id.clone(), Arc::new(Mutex::new(session)));
        info!(session = %id, "opened session");
        Ok(SessionResponse {
            session: id,
            criteria: self.default_criteria.clone(),
            indicators: self.pipeline.config().indicators.options(),
        })
    }

    fn session(&self, id: &str) -> Result<Arc<Mutex<Session>>, ApiError> {
        self.sessions
            .lock()
            .map_err(|_| ApiError::Internal("session table lock poisoned".to_string()))?
            .get(id)
            .cloned()
            .ok_or_else(|| ApiError::UnknownSession(id.to_string()))
    }

    /// Applies `update` to the session and re-renders while holding the
    /// session lock, so runs within one session never interleave.
    fn with_session<F>(&self, id: &str, update: F) -> Result<RenderResponse, ApiError>
    where
        F: FnOnce(&mut Session) -> Result<(), ApiError>,
    {
        let session = self.session(id)?;
        let mut session = session
            .lock()
            .map_err(|_| ApiError::Internal("session lock poisoned".to_string()))?;

        // A rejected run leaves the session untouched
        let mut next = session.clone();
        update(&mut next)?;
        let output = self.pipeline.run(&next.criteria, &next.selection)?;
        next.marked = output.join.rows.iter().map(|row| row.id).collect();
        *session = next;

        Ok(RenderResponse {
            session: id.to_string(),
            spec: output.document.spec,
            no_data: output.document.no_data,
            ranking: output.document.ranking,
            selected: session.selection.ids().collect(),
            diagnostics: output.join.diagnostics.iter().map(|d| d.to_string()).collect(),
        })
    }

    pub fn render(&self, params: &RenderParams) -> Result<RenderResponse, ApiError> {
        let genders = params.genders.as_deref().map(parse_genders).transpose()?;
        self.with_session(&params.session, |session| {
            let criteria = &mut session.criteria;
            if let Some(age_min) = params.age_min {
                criteria.age_min = age_min;
            }
            if let Some(age_max) = params.age_max {
                criteria.age_max = age_max;
            }
            if let Some(genders) = genders {
                criteria.genders = genders;
            }
            if let Some(indicator) = &params.indicator {
                criteria.indicator = indicator.clone();
            }
            Ok(())
        })
    }

    /// Toggles `id` when it had a mark in the last run. Any other id is a
    /// click outside the marks and clears the selection.
    pub fn toggle(&self, session: &str, id: u32) -> Result<RenderResponse, ApiError> {
        self.with_session(session, |session| {
            if session.marked.contains(&id) {
                session.selection.toggle(id);
            } else {
                session.selection.clear();
            }
            Ok(())
        })
    }

    pub fn clear(&self, session: &str) -> Result<RenderResponse, ApiError> {
        self.with_session(session, |session| {
            session.selection.clear();
            Ok(())
        })
    }

    pub fn fragment(&self, params: &RenderParams) -> Result<String, ApiError> {
        let response = self.render(params)?;
        let document = crate::render::VisualizationDocument {
            spec: response.spec,
            no_data: response.no_data,
            ranking: response.ranking,
        };
        Ok(document.to_html(&self.endpoint, Some(params.session.as_str())))
    }
}

pub async fn start_server(config: AppConfig, pipeline: Pipeline) -> Result<()> {
    let default_criteria = config.default_criteria();
    let state = Arc::new(AppState::new(
        pipeline,
        default_criteria,
        config.render.endpoint.clone(),
    ));

    let port = config.server.port;
    let addr = SocketAddr::from(([127, 0, 0, 1], port));

    info!("Starting server on http://{}", addr);

    let app = router(state).fallback_service(ServeDir::new(&config.server.static_dir));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/session", post(session_handler))
        .route("/api/render", get(render_handler))
        .route("/api/fragment", get(fragment_handler))
        .route("/api/selection/toggle", post(toggle_handler))
        .route("/api/selection/clear", post(clear_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn session_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SessionResponse>, ApiError> {
    state.open_session().map(Json)
}

async fn render_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RenderParams>,
) -> Result<Json<RenderResponse>, ApiError> {
    state.render(&params).map(Json)
}

async fn fragment_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RenderParams>,
) -> Result<Html<String>, ApiError> {
    state.fragment(&params).map(Html)
}

async fn toggle_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ToggleRequest>,
) -> Result<Json<RenderResponse>, ApiError> {
    state.toggle(&request.session, request.id).map(Json)
}

async fn clear_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ClearRequest>,
) -> Result<Json<RenderResponse>, ApiError> {
    state.clear(&request.session).map(Json)
}
