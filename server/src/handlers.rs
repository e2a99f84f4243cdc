#![allow(clippy::unused_async)]
use std::io;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{SecondsFormat, Utc};
use futures::{Stream, TryStreamExt};
use kernel::{DeleteResult, ErrorBody, Health, ImageList, Stats, UploadResult};
use serde::Deserialize;
use tokio::io::AsyncReadExt;
use tokio_util::io::StreamReader;
use utoipa::{IntoParams, OpenApi};

use crate::AppState;
use crate::derivatives::OptimizeParams;
use crate::error::Error;
use crate::image_reply::ImageReply;
use crate::service::{ListQuery, Upload};

const IMAGE_FIELD: &str = "image";
const FOLDER_FIELD: &str = "folder";

#[derive(OpenApi)]
#[openapi(
    paths(upload, list_images, delete_image, get_stats, optimize, health),
    components(
        schemas(
            UploadResult,
            ImageList,
            kernel::ImageItem,
            kernel::Pagination,
            kernel::Dimensions,
            Stats,
            kernel::FolderStats,
            DeleteResult,
            ErrorBody,
            Health,
            kernel::SortOrder,
            kernel::Fit,
        ),
        responses(ImageReply)
    ),
    tags(
        (name = "images", description = "Upload, listing and removal of stored images"),
        (name = "service", description = "Service level information"),
    )
)]
pub struct ApiDoc;

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Processing(_) | Error::Storage { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!("{self}");
        } else {
            tracing::debug!("{self}");
        }
        let body = ErrorBody {
            code: self.code().to_owned(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListParams {
    /// Restrict the listing to one folder
    folder: Option<String>,
    /// 1-indexed page, default 1
    page: Option<String>,
    /// Page size between 1 and 100, default 20
    limit: Option<String>,
    /// `date`, `size` or `name`, default `date`
    sort: Option<String>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct OptimizeQuery {
    /// Target width between 1 and 5000
    w: Option<String>,
    /// Target height between 1 and 5000
    h: Option<String>,
    /// WebP quality between 1 and 100
    q: Option<String>,
    /// `cover`, `contain`, `fill`, `inside` or `outside`
    fit: Option<String>,
}

/// Uploads an image and stores its optimized original, thumbnail and small variants.
#[utoipa::path(
    post,
    path = "/upload",
    tag = "images",
    request_body(content_type = "multipart/form-data", description = "`image` file part and optional `folder` field"),
    responses(
        (status = 201, description = "Image stored", body = UploadResult),
        (status = 400, description = "Missing, oversized or unsupported file", body = ErrorBody),
        (status = 500, description = "Processing or storage failure", body = ErrorBody)
    ),
)]
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResult>), Error> {
    let limit = state.service.settings().max_file_size;
    let mut upload = Upload::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::Validation(format!("malformed multipart body: {e}")))?
    {
        match field.name() {
            Some(IMAGE_FIELD) => {
                let file_name = field.file_name().unwrap_or_default().to_owned();
                upload.content_type = field.content_type().map(ToOwned::to_owned);
                upload.data = read_from_stream(field, limit)
                    .await
                    .map_err(|e| Error::Validation(format!("cannot read file part: {e}")))?;
                tracing::info!(
                    file_name = %file_name,
                    size = upload.data.len(),
                    content_type = ?upload.content_type,
                    "image received"
                );
            }
            Some(FOLDER_FIELD) => {
                upload.folder = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| Error::Validation(format!("cannot read folder: {e}")))?,
                );
            }
            _ => {}
        }
    }

    let result = state.service.upload(upload).await?;
    Ok((StatusCode::CREATED, Json(result)))
}

/// Lists stored originals with pagination.
#[utoipa::path(
    get,
    path = "/api/images",
    tag = "images",
    params(ListParams),
    responses(
        (status = 200, description = "One page of stored originals", body = ImageList),
        (status = 400, description = "Invalid query parameter", body = ErrorBody),
        (status = 500, description = "Storage failure", body = ErrorBody)
    ),
)]
pub async fn list_images(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<ImageList>, Error> {
    let query = ListQuery::parse(
        params.folder.as_deref(),
        params.page.as_deref(),
        params.limit.as_deref(),
        params.sort.as_deref(),
    )?;
    tracing::debug!(?query, "listing images");
    let list = state.service.list(&query).await?;
    Ok(Json(list))
}

/// Deletes a stored original together with its thumbnail and small variants.
#[utoipa::path(
    delete,
    path = "/api/images/{path}",
    tag = "images",
    params(
        ("path" = String, Path, description = "Path of the original relative to the upload root, URL encoded")
    ),
    responses(
        (status = 200, description = "Removed files", body = DeleteResult),
        (status = 400, description = "Path escapes the upload root or names a derivative", body = ErrorBody),
        (status = 404, description = "None of the files existed", body = ErrorBody),
        (status = 500, description = "Storage failure", body = ErrorBody)
    ),
)]
pub async fn delete_image(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Json<DeleteResult>, Error> {
    tracing::info!("delete image: {path}");
    let result = state.service.delete_image(&path).await?;
    Ok(Json(result))
}

/// Usage statistics over the whole upload root.
#[utoipa::path(
    get,
    path = "/api/stats",
    tag = "service",
    responses(
        (status = 200, description = "Usage statistics", body = Stats),
        (status = 500, description = "Storage failure", body = ErrorBody)
    ),
)]
pub async fn get_stats(State(state): State<AppState>) -> Result<Json<Stats>, Error> {
    let stats = state.service.stats().await?;
    Ok(Json(stats))
}

/// Re-encodes a stored image with custom size and quality. The result is not stored.
#[utoipa::path(
    get,
    path = "/optimize/{folder}/{year}/{month}/{filename}",
    tag = "images",
    params(
        ("folder" = String, Path, description = "Folder"),
        ("year" = String, Path, description = "Upload year, e.g. 2026"),
        ("month" = String, Path, description = "Upload month, two digits"),
        ("filename" = String, Path, description = "Stored file name"),
        OptimizeQuery
    ),
    responses(
        (status = 200, response = ImageReply),
        (status = 400, description = "Invalid query parameter", body = ErrorBody),
        (status = 404, description = "File not found", body = ErrorBody),
        (status = 500, description = "Processing failure", body = ErrorBody)
    ),
)]
pub async fn optimize(
    State(state): State<AppState>,
    Path((folder, year, month, filename)): Path<(String, String, String, String)>,
    Query(query): Query<OptimizeQuery>,
) -> Result<ImageReply, Error> {
    let params = OptimizeParams::parse(
        query.w.as_deref(),
        query.h.as_deref(),
        query.q.as_deref(),
        query.fit.as_deref(),
    )?;
    let relative = format!("{folder}/{year}/{month}/{filename}");
    let data = state.service.optimize(&relative, params).await?;
    Ok(ImageReply::new(data))
}

/// Liveness probe.
#[utoipa::path(
    get,
    path = "/health",
    tag = "service",
    responses(
        (status = 200, description = "Service is running", body = Health)
    ),
)]
pub async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok".to_owned(),
        uptime: state.started.elapsed().as_secs(),
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    })
}

pub async fn openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Reads at most `limit + 1` bytes so callers can tell an oversized body apart.
async fn read_from_stream<S, E>(stream: S, limit: usize) -> io::Result<Vec<u8>>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Sync + std::error::Error + Send + 'static,
{
    let body_with_io_error = stream.map_err(io::Error::other);
    let body_reader = StreamReader::new(body_with_io_error);
    futures::pin_mut!(body_reader);
    let mut buffer = Vec::new();

    let cap = u64::try_from(limit).unwrap_or(u64::MAX).saturating_add(1);
    body_reader.take(cap).read_to_end(&mut buffer).await?;
    Ok(buffer)
}
