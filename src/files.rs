//! 请求分发：GET 下载/列目录，POST 上传。

use axum::Router;
use axum::body::Body as AxumBody;
use axum::extract::{DefaultBodyLimit, Extension};
use axum::http::{HeaderMap, HeaderValue, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use http_body_util::BodyExt;
use httpdate::fmt_http_date;
use percent_encoding::percent_decode_str;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use tokio::fs::File;
use tracing::{info, trace};

use crate::access_log::AccessLogLayer;
use crate::config::{CHUNK_SIZE, SPA_INDEX, ServerConfig};
use crate::content_type::resolve_content_type;
use crate::copy::file_body;
use crate::error::ApiError;
use crate::listing::render_listing;
use crate::storage::{FileMeta, PathKind, Storage};
use crate::upload::{NamingPolicy, ingest, parse_boundary};

/// 构建包含访问日志层的路由。
pub fn router(config: Arc<ServerConfig>) -> Router {
    let storage = Arc::new(Storage::new(config.root.clone()));
    Router::new()
        .route("/", get(serve_path).post(upload_files))
        .route("/{*path}", get(serve_path).post(upload_files))
        .layer(DefaultBodyLimit::disable())
        .layer(Extension(storage))
        .layer(Extension(config))
        .layer(AccessLogLayer)
}

/// GET：文件、目录列表、规范化重定向或 SPA 回退。
pub async fn serve_path(
    uri: Uri,
    Extension(storage): Extension<Arc<Storage>>,
    Extension(config): Extension<Arc<ServerConfig>>,
) -> Result<Response, ApiError> {
    let raw_path = uri.path();
    let url_path = decode_path(raw_path)?;
    trace!(url_path, "serve path");

    if config.spa && url_path == "/" {
        return serve_spa_index(&storage).await;
    }

    let resolved = storage.resolve(&url_path).await?;
    match resolved.kind {
        PathKind::Directory => {
            if !raw_path.ends_with('/') {
                return Ok(redirect_found(&format!("{raw_path}/")));
            }
            let entries = storage.list_dir(&resolved.path).await?;
            let html = render_listing(&url_path, &entries)?;
            info!(path = url_path, count = entries.len(), "list directory");
            Ok((
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
                html,
            )
                .into_response())
        }
        PathKind::File(meta) => send_file(&resolved.path, meta).await,
        PathKind::NotFound if config.spa => {
            info!(path = url_path, "not found, responding with {SPA_INDEX}");
            serve_spa_index(&storage).await
        }
        PathKind::NotFound => Err(ApiError::NotFound(format!(
            "{url_path}: no such file or directory"
        ))),
    }
}

/// POST：上传到请求路径的父目录。
pub async fn upload_files(
    uri: Uri,
    headers: HeaderMap,
    Extension(storage): Extension<Arc<Storage>>,
    Extension(config): Extension<Arc<ServerConfig>>,
    body: AxumBody,
) -> Result<StatusCode, ApiError> {
    let url_path = decode_path(uri.path())?;
    let dir_url = parent_url_path(&url_path);
    let target_dir = storage.confine(dir_url)?;
    let boundary = parse_boundary(&headers)?;
    trace!(dir = dir_url, boundary, "upload");

    let stored = ingest(
        body.into_data_stream(),
        boundary,
        &target_dir,
        NamingPolicy::from_keep_original(config.keep_upload_filename),
    )
    .await?;
    info!(dir = dir_url, files = stored.len(), "upload complete");
    Ok(StatusCode::OK)
}

async fn serve_spa_index(storage: &Storage) -> Result<Response, ApiError> {
    let resolved = storage.resolve(SPA_INDEX).await?;
    match resolved.kind {
        PathKind::File(meta) => send_file(&resolved.path, meta).await,
        _ => Err(ApiError::NotFound(format!(
            "/{SPA_INDEX}: no such file or directory"
        ))),
    }
}

/// 发送文件：所有响应头在响应体之前确定。
async fn send_file(path: &Path, meta: FileMeta) -> Result<Response, ApiError> {
    let mut file = File::open(path).await.map_err(|err| match err.kind() {
        ErrorKind::NotFound => ApiError::NotFound(err.to_string()),
        _ => ApiError::Internal(err.to_string()),
    })?;
    let mut buf = vec![0u8; CHUNK_SIZE];
    let content_type = resolve_content_type(path, &mut file, &mut buf).await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&content_type)
            .map_err(|_| ApiError::Internal("无效的 MIME 类型".into()))?,
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(meta.size));
    if let Some(modified) = meta.modified {
        headers.insert(
            header::LAST_MODIFIED,
            HeaderValue::from_str(&fmt_http_date(modified))
                .map_err(|_| ApiError::Internal("响应头构建失败".into()))?,
        );
    }

    info!(path = ?path, size = meta.size, content_type, "download file");
    Ok((
        StatusCode::OK,
        headers,
        file_body(file, path.to_path_buf()),
    )
        .into_response())
}

fn redirect_found(location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => (StatusCode::FOUND, [(header::LOCATION, value)]).into_response(),
        Err(_) => ApiError::Internal("响应头构建失败".into()).into_response(),
    }
}

fn decode_path(raw: &str) -> Result<String, ApiError> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|path| path.into_owned())
        .map_err(|_| ApiError::BadRequest("path is not valid utf-8".into()))
}

/// `/a/b` 与 `/a/b/x` 的父目录分别为 `/a/` 与 `/a/b/`。
fn parent_url_path(url_path: &str) -> &str {
    match url_path.rfind('/') {
        Some(index) => &url_path[..=index],
        None => "/",
    }
}
