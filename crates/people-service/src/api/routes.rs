use crate::error::ApiError;
use crate::state::{new_run_id, PeopleServiceState, UploadJob};
use axum::{
    extract::{multipart::Field, Multipart, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use common::report::UploadResponse;
use common::validation::sanitize_filename;
use common::zones::ZonePolygons;
use serde_json::json;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

/// Accept a video plus optional zone polygons, process it and forward the report
pub async fn upload_people(
    State(state): State<PeopleServiceState>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let run_id = new_run_id();
    let run_upload_dir = state.config().upload_dir.join(&run_id);
    let mut upload: Option<(String, PathBuf)> = None;
    let mut points: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart body: {}", e)))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") if upload.is_none() => {
                let client_name = field.file_name().unwrap_or_default().to_string();
                if client_name.trim().is_empty() {
                    return Err(ApiError::bad_request("No selected file"));
                }

                let file_name = sanitize_filename(&client_name)
                    .map_err(|e| ApiError::bad_request(e.to_string()))?;
                tokio::fs::create_dir_all(&run_upload_dir).await.map_err(|e| {
                    ApiError::internal(format!("Failed to store upload: {}", e))
                })?;
                let path = run_upload_dir.join(&file_name);
                save_field(field, &path).await?;
                upload = Some((file_name, path));
            }
            Some("points") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Invalid points field: {}", e)))?;
                points = Some(text);
            }
            _ => {}
        }
    }

    let Some((file_name, source_video)) = upload else {
        return Err(ApiError::bad_request("No file part"));
    };

    let zones = match parse_points(points.as_deref()) {
        Ok(zones) => zones,
        Err(e) => {
            discard_upload(&run_upload_dir).await;
            return Err(e);
        }
    };

    info!(
        run_id = %run_id,
        file = %file_name,
        entry_points = zones.entry.points().len(),
        exit_points = zones.exit.points().len(),
        restricted_points = zones.restricted.points().len(),
        "processing uploaded video"
    );

    let response = state
        .process_upload(UploadJob {
            run_id,
            file_name,
            source_video,
            zones,
        })
        .await?;

    Ok(Json(response))
}

/// Parse the `points` form field. Missing or blank input disables every zone.
pub fn parse_points(raw: Option<&str>) -> Result<ZonePolygons, ApiError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(ZonePolygons::default()),
        Some(text) => serde_json::from_str(text)
            .map_err(|e| ApiError::bad_request(format!("Invalid JSON in points: {}", e))),
    }
}

async fn save_field(mut field: Field<'_>, path: &Path) -> Result<(), ApiError> {
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to store upload: {}", e)))?;

    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| ApiError::bad_request(format!("Failed to read upload: {}", e)))?
    {
        file.write_all(&chunk)
            .await
            .map_err(|e| ApiError::internal(format!("Failed to store upload: {}", e)))?;
    }

    file.flush()
        .await
        .map_err(|e| ApiError::internal(format!("Failed to store upload: {}", e)))
}

/// Remove a rejected upload together with its run directory
async fn discard_upload(path: &Path) {
    if let Err(e) = tokio::fs::remove_dir_all(path).await {
        warn!(path = %path.display(), error = %e, "failed to remove rejected upload");
    }
}

/// Health check endpoint
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "service": "people-service"
        })),
    )
}

/// Readiness check endpoint
pub async fn readyz(State(state): State<PeopleServiceState>) -> impl IntoResponse {
    let components = state.readiness();
    let all_healthy = components.values().all(|&healthy| healthy);

    if all_healthy {
        (
            StatusCode::OK,
            Json(json!({
                "status": "ready",
                "components": components
            })),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "not ready",
                "components": components
            })),
        )
    }
}

/// Metrics endpoint (Prometheus format)
pub async fn metrics() -> impl IntoResponse {
    match telemetry::metrics::gather_text() {
        Ok(text) => text.into_response(),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response()
        }
    }
}
