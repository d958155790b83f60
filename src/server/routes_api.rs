use crate::conversion::{JobStatus, ResolvedArtifact, Upload};
use crate::server::{error::AppError, AppContext};
use crate::state::JobState;
use axum::{
    body::Body,
    extract::{Multipart, Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use subforged_common::{Error, JobId};
use tokio_util::io::ReaderStream;

/// Multipart field carrying the uploaded video.
const UPLOAD_FIELD: &str = "video";

pub fn api_routes() -> Router<AppContext> {
    Router::new()
        .route("/stats", get(stats))
        .route("/convert", post(convert))
        .route("/status/:id", get(status))
        .route("/conversions/:id/artifact", get(artifact))
        .route("/download/:file_name", get(download))
}

async fn stats(State(ctx): State<AppContext>) -> impl IntoResponse {
    let counts = ctx.store.counts();
    Json(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "jobs": counts,
        "total": counts.total(),
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConvertResponse {
    pub conversion_id: JobId,
    pub status: JobState,
}

async fn convert(
    State(ctx): State<AppContext>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<ConvertResponse>), AppError> {
    let mut upload = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::bad_request(e.to_string()))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let file_name = field.file_name().unwrap_or("upload").to_string();
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::bad_request(e.to_string()))?;
        upload = Some(Upload {
            file_name,
            content_type,
            bytes,
        });
    }

    let upload = upload.ok_or_else(|| AppError::bad_request("No file uploaded"))?;
    let id = ctx.orchestrator.submit(upload).await?;
    let status = ctx.orchestrator.query(id)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ConvertResponse {
            conversion_id: id,
            status: status.state,
        }),
    ))
}

fn parse_job_id(raw: &str) -> Result<JobId, AppError> {
    raw.parse()
        .map_err(|_| AppError::bad_request(format!("Invalid conversion id: {raw}")))
}

async fn status(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<JobStatus>, AppError> {
    let id = parse_job_id(&id)?;
    Ok(Json(ctx.orchestrator.query(id)?))
}

async fn artifact(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let id = parse_job_id(&id)?;
    let artifact = ctx.orchestrator.resolve_artifact(id).await?;
    serve_artifact(artifact).await
}

async fn download(
    State(ctx): State<AppContext>,
    Path(file_name): Path<String>,
) -> Result<Response, AppError> {
    let artifact = ctx.orchestrator.resolve_reference(&file_name).await?;
    serve_artifact(artifact).await
}

/// Stream a verified artifact back as an attachment.
async fn serve_artifact(artifact: ResolvedArtifact) -> Result<Response, AppError> {
    let file = tokio::fs::File::open(&artifact.path)
        .await
        .map_err(|_| Error::not_found("artifact", &artifact.reference))?;

    let body = Body::from_stream(ReaderStream::new(file));
    let disposition = format!(
        "attachment; filename=\"{}\"",
        artifact.download_name().replace('"', "")
    );

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type_for(&artifact).to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

fn content_type_for(artifact: &ResolvedArtifact) -> &'static str {
    match artifact.path.extension().and_then(|e| e.to_str()) {
        Some("srt") => "application/x-subrip",
        Some("vtt") => "text/vtt",
        Some("ass") | Some("ssa") => "text/x-ssa",
        _ => "application/octet-stream",
    }
}
