use std::sync::Arc;

use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Host, Multipart, State},
    response::Html,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

use crate::{
    disease::DiseaseTable,
    error::ApiError,
    model::{self, Classifier},
    upload::{allowed_file, UploadStore},
};

/// Where stored uploads are served from.
pub const UPLOADS_ROUTE: &str = "/static/uploads";

/// Read-only state shared by every request.
pub struct AppState {
    pub classifier: Arc<dyn Classifier>,
    pub diseases: DiseaseTable,
    pub uploads: UploadStore,
    pub public_base_url: Option<String>,
}

pub type SharedState = Arc<AppState>;

#[derive(Debug, Serialize)]
pub struct PredictionResponse {
    pub prediction: String,
    pub confidence: f64,
    pub image_url: String,
    pub solution: Value,
}

pub fn router(state: SharedState, body_limit_bytes: usize) -> Router {
    let uploads = ServeDir::new(state.uploads.dir());

    Router::new()
        .route("/", get(home))
        .route("/api/predict", post(predict_handler))
        .layer(DefaultBodyLimit::max(body_limit_bytes))
        .route("/health", get(health_check))
        .nest_service(UPLOADS_ROUTE, uploads)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn home() -> Html<&'static str> {
    Html(include_str!("../templates/index.html"))
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "OK" }))
}

async fn predict_handler(
    State(state): State<SharedState>,
    host: Option<Host>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<PredictionResponse>, ApiError> {
    let mut multipart = multipart.map_err(|rejection| {
        tracing::debug!(%rejection, "request is not multipart");
        ApiError::NoFilePart
    })?;

    let mut upload = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        // A `file` field without a filename is a plain form value, not an upload.
        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let bytes = field.bytes().await?;
        upload = Some((file_name, bytes));
        break;
    }

    let (file_name, bytes) = upload.ok_or(ApiError::NoFilePart)?;
    if file_name.is_empty() {
        return Err(ApiError::NoFileSelected);
    }
    if !allowed_file(&file_name) {
        return Err(ApiError::InvalidFileType);
    }

    let stored = state
        .uploads
        .save(&file_name, &bytes)
        .await
        .map_err(ApiError::Save)?;

    let classifier = Arc::clone(&state.classifier);
    let path = stored.path.clone();
    let prediction =
        tokio::task::spawn_blocking(move || model::classify(&*classifier, &path)).await??;

    tracing::info!(
        file = %stored.name,
        label = %prediction.label,
        confidence = prediction.confidence,
        "prediction"
    );

    let image_url = image_url(&state, host, &stored.name);
    let solution = state.diseases.solution(&prediction.label);

    Ok(Json(PredictionResponse {
        prediction: prediction.label,
        confidence: prediction.confidence,
        image_url,
        solution,
    }))
}

fn image_url(state: &AppState, host: Option<Host>, name: &str) -> String {
    let base = match &state.public_base_url {
        Some(base) => base.clone(),
        None => {
            let host = host.map(|Host(host)| host).unwrap_or_else(|| "localhost".into());
            format!("http://{host}")
        }
    };
    format!("{base}{UPLOADS_ROUTE}/{name}")
}
