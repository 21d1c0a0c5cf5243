use crate::cities::{City, CityIndex, CITIES};
use crate::config::{AppConfig, MapConfig};
use crate::error::OpError;
use crate::ops::{self, Command, Outcome};
use crate::render::Views;
use crate::store::{FileStorage, RegistryStore, Storage};
use anyhow::Result;
use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{info, warn};

pub type SharedStore = RegistryStore<Box<dyn Storage + Send>>;

pub struct AppState {
    // Handlers take the lock for a whole load-modify-save cycle
    pub store: Mutex<SharedStore>,
    pub config: AppConfig,
    pub cities: CityIndex,
}

impl AppState {
    pub fn new(config: AppConfig, storage: Box<dyn Storage + Send>) -> Self {
        let store = RegistryStore::new(storage, config.storage.key.clone());
        Self {
            store: Mutex::new(store),
            config,
            cities: CityIndex::new(),
        }
    }

    fn with_store<T>(&self, f: impl FnOnce(&mut SharedStore) -> T) -> T {
        let mut store = self.store.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut *store)
    }

    fn views(&self) -> Views {
        let registry = self.with_store(|store| store.load());
        Views::render(&registry, self.config.ranking.limit)
    }
}

#[derive(Serialize)]
pub struct CommandResponse {
    message: String,
    outcome: Outcome,
    views: Views,
}

#[derive(Deserialize)]
pub struct NearestParams {
    lat: f64,
    lon: f64,
}

#[derive(Serialize)]
pub struct NearestResponse {
    city: &'static str,
    distance_km: f64,
    total: u64,
}

/// JSON error body with a status matching the kind of rejection.
#[derive(Debug)]
pub enum ApiError {
    Command(OpError),
    Payload(JsonRejection),
}

impl From<OpError> for ApiError {
    fn from(err: OpError) -> Self {
        ApiError::Command(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Payload(rejection)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Payload(rejection) => (rejection.status(), rejection.body_text()),
            ApiError::Command(err) => {
                let status = match &err {
                    OpError::EmptyName
                    | OpError::MissingCity
                    | OpError::UnknownCity(_)
                    | OpError::InvalidQuantity(_)
                    | OpError::TotalOverflow { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                    OpError::ConfirmationRequired(_) => StatusCode::PRECONDITION_REQUIRED,
                    OpError::ImportShape(_) | OpError::ImportParse(_) => StatusCode::BAD_REQUEST,
                    OpError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if !err.is_user_error() {
                    warn!(error = %err, "Command failed");
                }
                (status, err.to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let static_dir = ServeDir::new(&state.config.server.static_dir);

    Router::new()
        .route("/api/config", get(config_handler))
        .route("/api/cities", get(cities_handler))
        .route("/api/views", get(views_handler))
        .route("/api/commands", post(command_handler))
        .route("/api/export", get(export_handler))
        .route("/api/import", post(import_handler))
        .route("/api/nearest", get(nearest_handler))
        .fallback_service(static_dir)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start_server(config: AppConfig) -> Result<()> {
    let storage = FileStorage::new(&config.storage.data_dir);
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let state = Arc::new(AppState::new(config, Box::new(storage)));

    info!("Starting server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn config_handler(State(state): State<Arc<AppState>>) -> Json<MapConfig> {
    Json(state.config.map.clone())
}

async fn cities_handler() -> Json<&'static [City]> {
    Json(CITIES)
}

async fn views_handler(State(state): State<Arc<AppState>>) -> Json<Views> {
    Json(state.views())
}

async fn command_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Command>, JsonRejection>,
) -> Result<Json<CommandResponse>, ApiError> {
    let Json(command) = payload?;
    run(&state, command)
}

async fn import_handler(
    State(state): State<Arc<AppState>>,
    contents: String,
) -> Result<Json<CommandResponse>, ApiError> {
    run(&state, Command::Import { contents })
}

async fn export_handler(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let contents = state
        .with_store(|store| store.export())
        .map_err(OpError::from)?;
    let disposition = format!("attachment; filename=\"{}\"", state.config.export.filename);
    Ok((
        [
            (header::CONTENT_TYPE, "application/json".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        contents,
    )
        .into_response())
}

async fn nearest_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<NearestParams>,
) -> Json<Option<NearestResponse>> {
    let Some(nearest) = state.cities.nearest(params.lat, params.lon) else {
        return Json(None);
    };
    let total = state.with_store(|store| {
        store
            .load()
            .get(nearest.city.name)
            .map(|r| r.total)
            .unwrap_or(0)
    });
    Json(Some(NearestResponse {
        city: nearest.city.name,
        distance_km: nearest.distance_km,
        total,
    }))
}

fn run(state: &AppState, command: Command) -> Result<Json<CommandResponse>, ApiError> {
    let name = command.name();
    let outcome = state.with_store(|store| ops::execute(store, command))?;
    info!(command = name, "Command applied");

    Ok(Json(CommandResponse {
        message: outcome.message(),
        outcome,
        views: state.views(),
    }))
}
