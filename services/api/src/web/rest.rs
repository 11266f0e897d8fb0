//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::error::{invalid_input_rejection, not_configured, pipeline_rejection, Rejection};
use crate::web::{
    auth,
    middleware::CurrentUser,
    protocol::{
        CropBody, DrawingBody, GraphBody, GraphDataBody, GraphStatus, HistoryRecordBody,
        PlotPointBody, PointBody, SaveStatus, SolveResultBody, StrokeBody, StrokeModeBody,
    },
    state::AppState,
};
use axum::{
    extract::{Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json},
    Extension,
};
use equation_ace_core::{
    domain::{GraphSpec, ImageBlob, ProblemInput, SolveOutcome},
    history::HistoryRecorder,
    input::{CropRect, InputCapture, InvalidInputError},
    ports::PortError,
    presentation::{render_graph, ResultView},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        status_handler,
        solve_handler,
        solve_upload_handler,
        graph_handler,
        list_history_handler,
        export_history_handler,
        auth::signup_handler,
        auth::login_handler,
        auth::logout_handler,
        auth::me_handler,
    ),
    components(
        schemas(
            StatusResponse, SolveRequest, SolveResponse, GraphRequest, SolveResultBody,
            GraphDataBody, GraphBody, GraphStatus, PlotPointBody, HistoryRecordBody, SaveStatus,
            CropBody, DrawingBody, StrokeBody, StrokeModeBody, PointBody,
            auth::SignupRequest, auth::LoginRequest, auth::AuthResponse,
        )
    ),
    tags(
        (name = "Equation Ace API", description = "Solve math problems from images, drawings, or text.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

/// Which features this deployment can offer.
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub solver_configured: bool,
    pub history_configured: bool,
    pub missing_variables: Vec<String>,
    /// A human-readable notice when some feature is unavailable.
    pub notice: Option<String>,
}

/// A solve request. Exactly one of the three input forms must be present.
#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SolveRequest {
    pub problem_statement: Option<String>,
    /// `data:image/png;base64,...` or `data:image/jpeg;base64,...`
    pub photo_data_uri: Option<String>,
    /// Only valid together with `photoDataUri`.
    pub crop: Option<CropBody>,
    pub drawing: Option<DrawingBody>,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SolveResponse {
    pub result: SolveResultBody,
    pub save_status: SaveStatus,
}

#[derive(Deserialize, ToSchema)]
pub struct GraphRequest {
    /// A single-variable expression in x, without `y =`.
    pub expression: String,
}

//=========================================================================================
// Shared Solve Flow
//=========================================================================================

/// Runs the consolidated pipeline and hands the result to the history store.
async fn solve_and_record(
    state: &AppState,
    user: CurrentUser,
    input: ProblemInput,
) -> Result<SolveResponse, Rejection> {
    let pipeline = state.pipeline.as_ref().ok_or_else(|| not_configured("Solving"))?;
    let outcome = pipeline
        .solve(&input)
        .await
        .map_err(|e| pipeline_rejection(&e))?;

    let save_status = queue_save(state.history.as_ref(), user.0, &outcome, input.image());
    Ok(SolveResponse {
        result: SolveResultBody::from_outcome(&outcome),
        save_status,
    })
}

/// Persists a result in the background; failures are only logged.
pub(crate) fn queue_save(
    history: Option<&Arc<HistoryRecorder>>,
    user_id: Option<Uuid>,
    outcome: &SolveOutcome,
    image: Option<&ImageBlob>,
) -> SaveStatus {
    let Some(history) = history else {
        return SaveStatus::NotConfigured;
    };
    if user_id.is_none() {
        return SaveStatus::SignInRequired;
    }

    let history = history.clone();
    let outcome = outcome.clone();
    let image = image.cloned();
    tokio::spawn(async move {
        if let Err(e) = history.record(user_id, &outcome, image.as_ref()).await {
            error!("Failed to save history record: {}", e);
        }
    });
    SaveStatus::Queued
}

//=========================================================================================
// REST API Handlers
//=========================================================================================

/// Report which features are configured.
#[utoipa::path(
    get,
    path = "/status",
    responses((status = 200, description = "Configuration status", body = StatusResponse))
)]
pub async fn status_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let missing: Vec<String> = state
        .config
        .missing_variables()
        .into_iter()
        .map(str::to_string)
        .collect();
    let notice = (!missing.is_empty()).then(|| {
        format!(
            "Some features are not configured. Set {} to enable them.",
            missing.join(", ")
        )
    });
    Json(StatusResponse {
        solver_configured: state.pipeline.is_some(),
        history_configured: state.history.is_some(),
        missing_variables: missing,
        notice,
    })
}

/// Solve a problem given as text, an image data URI, or a drawing.
#[utoipa::path(
    post,
    path = "/solve",
    request_body = SolveRequest,
    responses(
        (status = 200, description = "The problem was solved", body = SolveResponse),
        (status = 400, description = "No input, more than one input, or an invalid image"),
        (status = 422, description = "Nothing to solve in the input"),
        (status = 502, description = "The language model failed"),
        (status = 503, description = "Solving is not configured")
    )
)]
pub async fn solve_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Json(req): Json<SolveRequest>,
) -> Result<impl IntoResponse, Rejection> {
    let input = normalize_blocking(move || {
        let image = req
            .photo_data_uri
            .as_deref()
            .map(ImageBlob::from_data_uri)
            .transpose()?;
        let drawing = req.drawing.map(DrawingBody::into_canvas).transpose()?;
        InputCapture::from_parts(
            req.problem_statement,
            image,
            req.crop.map(CropRect::from),
            drawing,
        )?
        .normalize()
    })
    .await?;

    info!(
        "Solving {} input for {}",
        if input.is_image() { "image" } else { "text" },
        user.0.map_or("anonymous user".to_string(), |id| id.to_string())
    );
    Ok(Json(solve_and_record(&state, user, input).await?))
}

/// Solve a problem from an uploaded image file.
///
/// Accepts a multipart/form-data request with a `file` part (PNG or JPEG) and
/// an optional `crop` part holding a JSON crop rectangle.
#[utoipa::path(
    post,
    path = "/solve/upload",
    request_body(content_type = "multipart/form-data", description = "The image to solve."),
    responses(
        (status = 200, description = "The problem was solved", body = SolveResponse),
        (status = 400, description = "Missing file, unsupported type, or invalid crop"),
        (status = 422, description = "Nothing to solve in the image"),
        (status = 502, description = "The language model failed"),
        (status = 503, description = "Solving is not configured")
    )
)]
pub async fn solve_upload_handler(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, Rejection> {
    let mut upload = None;
    let mut crop = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            format!("Failed to read multipart data: {}", e),
        )
    })? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let mime = field.content_type().unwrap_or_default().to_string();
                let data = field.bytes().await.map_err(|e| {
                    (
                        StatusCode::BAD_REQUEST,
                        format!("Failed to read file bytes: {}", e),
                    )
                })?;
                upload = Some((mime, data));
            }
            Some("crop") => {
                let text = field.text().await.map_err(|e| {
                    (StatusCode::BAD_REQUEST, format!("Failed to read crop: {}", e))
                })?;
                let body: CropBody = serde_json::from_str(&text).map_err(|e| {
                    (StatusCode::BAD_REQUEST, format!("Invalid crop: {}", e))
                })?;
                crop = Some(CropRect::from(body));
            }
            _ => {}
        }
    }

    let (mime, data) = upload.ok_or_else(|| {
        (
            StatusCode::BAD_REQUEST,
            "Multipart form must include a file".to_string(),
        )
    })?;
    let input = normalize_blocking(move || {
        let image = ImageBlob::from_upload(&mime, data.to_vec())?;
        InputCapture::from_parts(None, Some(image), crop, None)?.normalize()
    })
    .await?;

    Ok(Json(solve_and_record(&state, user, input).await?))
}

/// Decodes and normalizes request input on the blocking pool; image decoding
/// and rasterizing are CPU-bound.
async fn normalize_blocking<F>(work: F) -> Result<ProblemInput, Rejection>
where
    F: FnOnce() -> Result<ProblemInput, InvalidInputError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| {
            error!("Input normalization task failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to process input".to_string(),
            )
        })?
        .map_err(invalid_input_rejection)
}

/// Sample a function expression for the graph panel.
#[utoipa::path(
    post,
    path = "/graph",
    request_body = GraphRequest,
    responses(
        (status = 200, description = "The sampled graph, or notPlottable", body = GraphBody),
        (status = 422, description = "The expression could not be plotted", body = GraphBody)
    )
)]
pub async fn graph_handler(Json(req): Json<GraphRequest>) -> impl IntoResponse {
    let graph = GraphSpec::plottable(&req.expression);
    let body = GraphBody::from(render_graph(Some(&graph)));
    let status = match body.status {
        GraphStatus::Error => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::OK,
    };
    (status, Json(body))
}

fn history_rejection(e: PortError) -> Rejection {
    match e {
        PortError::NotFound(message) => (StatusCode::NOT_FOUND, message),
        other => {
            error!("History lookup failed: {:?}", other);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to load history".to_string(),
            )
        }
    }
}

/// List the signed-in user's history, newest first.
#[utoipa::path(
    get,
    path = "/history",
    responses(
        (status = 200, description = "The user's saved solves", body = [HistoryRecordBody]),
        (status = 401, description = "Not signed in"),
        (status = 503, description = "History is not configured")
    )
)]
pub async fn list_history_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
) -> Result<impl IntoResponse, Rejection> {
    let history = state.history.as_ref().ok_or_else(|| not_configured("History"))?;
    let records = history.list(user_id).await.map_err(history_rejection)?;
    let body: Vec<HistoryRecordBody> = records.iter().map(HistoryRecordBody::from).collect();
    Ok(Json(body))
}

/// Export one saved solve as plain text.
#[utoipa::path(
    get,
    path = "/history/{id}/export",
    params(("id" = Uuid, Path, description = "The history record id.")),
    responses(
        (status = 200, description = "The exported result", content_type = "text/plain", body = String),
        (status = 401, description = "Not signed in"),
        (status = 404, description = "No such record for this user")
    )
)]
pub async fn export_history_handler(
    State(state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(record_id): Path<Uuid>,
) -> Result<impl IntoResponse, Rejection> {
    let history = state.history.as_ref().ok_or_else(|| not_configured("History"))?;
    let record = history
        .find(user_id, record_id)
        .await
        .map_err(history_rejection)?;
    let text = ResultView::from_record(&record).export_text();
    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"equation-{}.txt\"", record.id),
            ),
        ],
        text,
    ))
}
