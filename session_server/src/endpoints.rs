//! Endpoints of HTTP server.
//!
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use axum::{
    body::StreamBody,
    extract::Query,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use bytes::Bytes;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::BroadcastStream;

use crate::{
    collector::{run_collection_window, CollectionWindow},
    error::{ErrorKind, SessionError},
    model::Task,
    persist,
    predictor::{PredictInput, PredictOutput},
    pubsub::NamedPubSub,
    session::Phase,
    store::Target,
    trainer::TrainConfig,
    worker::{spawn_training, SharedSession},
};

/// State shared by all handlers.
pub struct ServerState {
    pub session: SharedSession,
    pub pubsub: Arc<NamedPubSub>,
    pub data_dir: PathBuf,
}

/// Session error rendered as JSON with a status code matching its kind.
pub struct ApiError(SessionError);

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        ApiError(err)
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    kind: String,
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = match kind {
            ErrorKind::ArityMismatch | ErrorKind::InvalidConfig => StatusCode::BAD_REQUEST,
            ErrorKind::EmptyStore
            | ErrorKind::NotFitted
            | ErrorKind::InsufficientData
            | ErrorKind::InvalidState
            | ErrorKind::NotReady => StatusCode::CONFLICT,
            ErrorKind::Persist | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            log::error!("Request failed: {}", self.0);
        }
        let body = ErrorBody {
            kind: format!("{kind:?}"),
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub task: Task,
    pub phase: Phase,
    pub samples: usize,
    pub labels: Vec<String>,
    pub input_arity: Option<usize>,
    pub active_target: Option<Target>,
    pub training_run: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct CollectRequest {
    pub target: Target,
}

/// Timed collection, seconds default to a 5 s countdown and 10 s of recording.
#[derive(Debug, Deserialize)]
pub struct WindowRequest {
    pub target: Target,
    #[serde(default)]
    pub delay_secs: Option<f64>,
    #[serde(default)]
    pub duration_secs: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct SampleRequest {
    pub inputs: Vec<f64>,
    /// Record directly with this target instead of using the active one.
    #[serde(default)]
    pub target: Option<Target>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TrainResponse {
    pub run_id: u64,
}

/// Search parameters of endpoints working on files.
#[derive(Debug, Deserialize)]
pub struct FileParams {
    #[serde(default)]
    name: Option<String>,
}

/// Search parameters available to streams.
#[derive(Debug, Deserialize)]
pub struct StreamParams {
    #[serde(default)]
    name: Option<String>,
}

/// Health check endpoint.
pub async fn healthcheck() -> &'static str {
    "healthy"
}

async fn status_of(state: &ServerState) -> StatusResponse {
    let session = state.session.lock().await;
    StatusResponse {
        task: session.task(),
        phase: session.phase(),
        samples: session.store().size(),
        labels: session.store().labels().to_vec(),
        input_arity: session.store().input_arity(),
        active_target: session.active_target().cloned(),
        training_run: session.in_flight(),
    }
}

pub async fn status(Extension(state): Extension<Arc<ServerState>>) -> Json<StatusResponse> {
    Json(status_of(&state).await)
}

pub async fn begin_collecting(
    Extension(state): Extension<Arc<ServerState>>,
    Json(request): Json<CollectRequest>,
) -> ApiResult<StatusResponse> {
    state.session.lock().await.begin_collecting(request.target)?;
    Ok(Json(status_of(&state).await))
}

pub async fn end_collecting(
    Extension(state): Extension<Arc<ServerState>>,
) -> ApiResult<StatusResponse> {
    state.session.lock().await.end_collecting()?;
    Ok(Json(status_of(&state).await))
}

/// Start a timed collection window in the background.
pub async fn collect_window(
    Extension(state): Extension<Arc<ServerState>>,
    Json(request): Json<WindowRequest>,
) -> Result<StatusCode, ApiError> {
    let mut window = CollectionWindow::default();
    if let Some(delay) = request.delay_secs {
        window.delay = seconds(delay)?;
    }
    if let Some(duration) = request.duration_secs {
        window.duration = seconds(duration)?;
    }
    let phase = state.session.lock().await.phase();
    if phase != Phase::Idle {
        return Err(SessionError::InvalidState {
            operation: "collect_window",
            phase,
        }
        .into());
    }

    let session = Arc::clone(&state.session);
    tokio::spawn(async move {
        match run_collection_window(session, request.target, window).await {
            Ok(count) => log::info!("Collection window recorded {count} samples"),
            Err(e) => log::warn!("Collection window failed: {e}"),
        }
    });

    Ok(StatusCode::ACCEPTED)
}

fn seconds(value: f64) -> Result<Duration, SessionError> {
    Duration::try_from_secs_f64(value)
        .map_err(|e| SessionError::InvalidConfig(format!("invalid duration {value}: {e}")))
}

pub async fn add_sample(
    Extension(state): Extension<Arc<ServerState>>,
    Json(request): Json<SampleRequest>,
) -> ApiResult<StatusResponse> {
    {
        let mut session = state.session.lock().await;
        match request.target {
            Some(target) => session.record(request.inputs, target)?,
            None => session.sample(request.inputs)?,
        }
    }
    Ok(Json(status_of(&state).await))
}

/// Start training in the background. Poll `/status` to see it finish.
///
/// An empty body trains with the default configuration.
pub async fn train(
    Extension(state): Extension<Arc<ServerState>>,
    body: Bytes,
) -> Result<(StatusCode, Json<TrainResponse>), ApiError> {
    let config = train_config_from_body(&body)?;
    let training = spawn_training(Arc::clone(&state.session), config).await?;
    let run_id = training.run_id;

    tokio::spawn(async move {
        match training.handle.await {
            Ok(Ok(completion)) => log::info!("Training run {run_id}: {completion:?}"),
            Ok(Err(e)) => log::warn!("Training run {run_id} failed: {e}"),
            Err(e) => log::error!("Training run {run_id} panicked: {e}"),
        }
    });

    Ok((StatusCode::ACCEPTED, Json(TrainResponse { run_id })))
}

fn train_config_from_body(body: &[u8]) -> Result<TrainConfig, SessionError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(TrainConfig::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| SessionError::InvalidConfig(format!("malformed training config: {e}")))
}

pub async fn predict(
    Extension(state): Extension<Arc<ServerState>>,
    Json(input): Json<PredictInput>,
) -> ApiResult<PredictOutput> {
    let predictor = state.session.lock().await.predictor()?;
    Ok(Json(predictor.predict(input)?))
}

pub async fn reset(Extension(state): Extension<Arc<ServerState>>) -> ApiResult<StatusResponse> {
    state.session.lock().await.reset()?;
    Ok(Json(status_of(&state).await))
}

pub async fn save_dataset(
    Extension(state): Extension<Arc<ServerState>>,
    Query(params): Query<FileParams>,
) -> ApiResult<StatusResponse> {
    let path = file_path(&state.data_dir, params.name, "dataset", "json")?;
    {
        let session = state.session.lock().await;
        persist::save_dataset(session.store(), &path)?;
    }
    Ok(Json(status_of(&state).await))
}

pub async fn load_dataset(
    Extension(state): Extension<Arc<ServerState>>,
    Query(params): Query<FileParams>,
) -> ApiResult<StatusResponse> {
    let path = file_path(&state.data_dir, params.name, "dataset", "json")?;
    let store = persist::load_dataset(&path)?;
    state.session.lock().await.load_store(store)?;
    Ok(Json(status_of(&state).await))
}

pub async fn save_model(
    Extension(state): Extension<Arc<ServerState>>,
    Query(params): Query<FileParams>,
) -> ApiResult<StatusResponse> {
    let path = file_path(&state.data_dir, params.name, "model", "bin")?;
    let model = state
        .session
        .lock()
        .await
        .model()
        .cloned()
        .ok_or(SessionError::NotReady)?;
    persist::save_model(&model, &path)?;
    Ok(Json(status_of(&state).await))
}

pub async fn load_model(
    Extension(state): Extension<Arc<ServerState>>,
    Query(params): Query<FileParams>,
) -> ApiResult<StatusResponse> {
    let path = file_path(&state.data_dir, params.name, "model", "bin")?;
    let model = persist::load_model(&path)?;
    state.session.lock().await.load_model(model)?;
    Ok(Json(status_of(&state).await))
}

/// Newline-delimited JSON stream of the predictions made for a data socket client.
pub async fn prediction_stream(
    Extension(state): Extension<Arc<ServerState>>,
    Query(params): Query<StreamParams>,
) -> impl IntoResponse {
    let name = params.name.unwrap_or_else(|| "unknown".into());
    log::info!("Prediction stream for {} requested", &name);

    let rx = state.pubsub.get_broadcast_receiver(&name).await;

    // Lagging listeners skip the predictions they missed.
    let stream = BroadcastStream::new(rx)
        .filter_map(|item| async move { item.ok().map(Ok::<_, String>) });

    let body = StreamBody::new(stream);
    let headers = [(header::CONTENT_TYPE, "application/x-ndjson")];

    (headers, body)
}

/// Resolve a user supplied file name inside the data directory.
fn file_path(
    data_dir: &Path,
    name: Option<String>,
    default: &str,
    extension: &str,
) -> Result<PathBuf, SessionError> {
    let name = name.unwrap_or_else(|| default.to_owned());
    if name.is_empty()
        || name.contains(['/', '\\'])
        || name.starts_with('.')
    {
        return Err(SessionError::InvalidConfig(format!(
            "invalid file name {name:?}"
        )));
    }
    Ok(data_dir.join(format!("{name}.{extension}")))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn file_names_stay_inside_data_dir() {
        let dir = Path::new("/tmp/sketches");
        assert_eq!(
            file_path(dir, None, "dataset", "json").unwrap(),
            dir.join("dataset.json")
        );
        assert_eq!(
            file_path(dir, Some("ymca".into()), "model", "bin").unwrap(),
            dir.join("ymca.bin")
        );
        for bad in ["../etc/passwd", "a/b", ".hidden", ""] {
            assert!(file_path(dir, Some(bad.into()), "model", "bin").is_err());
        }
    }

    #[test]
    fn malformed_training_config_is_refused() {
        assert_eq!(train_config_from_body(b"").unwrap(), TrainConfig::default());
        assert_eq!(train_config_from_body(b" \n").unwrap(), TrainConfig::default());

        let config = train_config_from_body(br#"{"epochs": 35, "batch_size": 12}"#).unwrap();
        assert_eq!((config.epochs, config.batch_size), (35, 12));

        let malformed: [&[u8]; 3] = [br#"{"epochs": "lots"}"#, b"{not json", b"[1, 2]"];
        for body in malformed {
            let err = train_config_from_body(body).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidConfig);
            let response = ApiError(err).into_response();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }
    }

    #[test]
    fn error_status_follows_kind() {
        let response = ApiError(SessionError::NotReady).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let response = ApiError(SessionError::ArityMismatch {
            what: "input",
            expected: 2,
            got: 3,
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
