//! multipart 上传：逐个 part 流式写入目标目录。

use axum::body::Bytes;
use axum::http::{HeaderMap, header};
use futures_util::{Stream, TryStreamExt};
use multer::{Field, Multipart};
use std::fmt;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio_util::io::StreamReader;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::atomic::AtomicFile;
use crate::config::CHUNK_SIZE;
use crate::copy::{CopyError, copy_chunked};

/// 唯一接受的表单字段名。
pub const FILE_FIELD: &str = "file";
const FALLBACK_FILE_NAME: &str = "upload";

/// 单个 part 写入完成后的结果。
#[derive(Debug)]
pub struct UploadResult {
    pub path: PathBuf,
    pub bytes: u64,
}

/// 上传的命名策略。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NamingPolicy {
    /// `<stem>-<token><ext>`
    Randomized,
    /// 保留客户端文件名，写完后原子重命名。
    KeepOriginal,
}

impl NamingPolicy {
    pub fn from_keep_original(keep_original: bool) -> Self {
        if keep_original {
            NamingPolicy::KeepOriginal
        } else {
            NamingPolicy::Randomized
        }
    }

    fn destination(self, dir: &Path, file_name: &str) -> PathBuf {
        match self {
            NamingPolicy::KeepOriginal => dir.join(file_name),
            NamingPolicy::Randomized => dir.join(unique_name(file_name)),
        }
    }
}

#[derive(Debug)]
pub enum UploadError {
    BadRequest(String),
    ClientDisconnected(io::Error),
    NotFound(String),
    Io(io::Error),
}

impl fmt::Display for UploadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadError::BadRequest(msg) | UploadError::NotFound(msg) => f.write_str(msg),
            UploadError::ClientDisconnected(err) => {
                write!(f, "client closed the connection: {err}")
            }
            UploadError::Io(err) => write!(f, "{err}"),
        }
    }
}

/// 从 `Content-Type` 中解析 multipart 边界。
pub fn parse_boundary(headers: &HeaderMap) -> Result<String, UploadError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| UploadError::BadRequest("missing Content-Type header".into()))?;
    multer::parse_boundary(content_type)
        .map_err(|err| UploadError::BadRequest(format!("parse media type error: {err}")))
}

/// 读取 multipart 请求体并将每个 `file` 字段写入 `target_dir`。
///
/// 遇到其它字段名立即中止，剩余请求体不再处理。
pub async fn ingest<S, E>(
    body: S,
    boundary: String,
    target_dir: &Path,
    policy: NamingPolicy,
) -> Result<Vec<UploadResult>, UploadError>
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
{
    ensure_target_dir(target_dir).await?;

    let mut multipart = Multipart::new(body, boundary);
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut stored = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(classify_multer)? {
        let field_name = field.name().unwrap_or_default().to_string();
        if field_name != FILE_FIELD {
            warn!(field = field_name, "rejected multipart field");
            return Err(UploadError::BadRequest(format!(
                "Field Name != '{FILE_FIELD}'. Got {field_name}"
            )));
        }

        let file_name = sanitize_file_name(field.file_name().unwrap_or_default());
        debug!(
            file_name,
            content_type = ?field.content_type(),
            "multipart part received"
        );
        let destination = policy.destination(target_dir, &file_name);
        let result = store_field(field, &destination, &mut buf).await?;
        info!(path = ?result.path, bytes = result.bytes, "file stored");
        stored.push(result);
    }

    Ok(stored)
}

async fn ensure_target_dir(target_dir: &Path) -> Result<(), UploadError> {
    match fs::metadata(target_dir).await {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(UploadError::NotFound(format!(
            "upload target is not a directory: {}",
            target_dir.display()
        ))),
        Err(err) if matches!(err.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) => {
            Err(UploadError::NotFound(format!(
                "upload directory not found: {}",
                target_dir.display()
            )))
        }
        Err(err) => Err(UploadError::Io(err)),
    }
}

async fn store_field(
    field: Field<'static>,
    destination: &Path,
    buf: &mut [u8],
) -> Result<UploadResult, UploadError> {
    let mut atomic = AtomicFile::new(destination)
        .await
        .map_err(UploadError::Io)?;
    debug!(temp = ?atomic.temp_path(), target = ?destination, "writing upload");
    let reader = StreamReader::new(field.map_err(multer_to_io));
    tokio::pin!(reader);

    let copied = copy_chunked(&mut reader, atomic.file_mut(), buf).await;
    match copied {
        Ok(bytes) => {
            let path = atomic.finalize().await.map_err(UploadError::Io)?;
            Ok(UploadResult { path, bytes })
        }
        Err(err) => {
            atomic.cleanup().await;
            Err(classify_copy(err))
        }
    }
}

fn multer_to_io(err: multer::Error) -> io::Error {
    let kind = match &err {
        multer::Error::IncompleteFieldData { .. }
        | multer::Error::IncompleteStream
        | multer::Error::StreamReadFailed(_) => ErrorKind::UnexpectedEof,
        _ => ErrorKind::InvalidData,
    };
    io::Error::new(kind, err)
}

fn classify_multer(err: multer::Error) -> UploadError {
    let err = multer_to_io(err);
    match err.kind() {
        ErrorKind::UnexpectedEof => UploadError::ClientDisconnected(err),
        _ => UploadError::BadRequest(format!("multipart reader error: {err}")),
    }
}

fn classify_copy(err: CopyError) -> UploadError {
    match err {
        CopyError::Read(err) => match err.kind() {
            ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe => UploadError::ClientDisconnected(err),
            ErrorKind::InvalidData => {
                UploadError::BadRequest(format!("multipart reader error: {err}"))
            }
            _ => UploadError::Io(err),
        },
        CopyError::Write(err) => UploadError::Io(err),
    }
}

/// 仅保留客户端文件名的最后一段。
pub fn sanitize_file_name(raw: &str) -> String {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or_default().trim();
    match base {
        "" | "." | ".." => FALLBACK_FILE_NAME.to_string(),
        other => other.to_string(),
    }
}

/// 生成 `<stem>-<token><ext>` 形式的唯一文件名。
pub fn unique_name(file_name: &str) -> String {
    let (stem, ext) = match file_name.rfind('.') {
        Some(index) if index > 0 => file_name.split_at(index),
        _ => (file_name, ""),
    };
    format!("{stem}-{}{ext}", Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use tempfile::tempdir;

    const BOUNDARY: &str = "X-BOUNDARY";

    fn multipart_body(parts: &[(&str, &str, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (field, file_name, content) in parts {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
            body.extend_from_slice(content);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    fn body_stream(
        chunks: Vec<io::Result<Bytes>>,
    ) -> impl Stream<Item = io::Result<Bytes>> + Send + 'static {
        stream::iter(chunks)
    }

    fn dir_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .expect("read dir")
            .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn randomized_name_keeps_stem_and_extension() {
        let temp = tempdir().expect("tempdir");
        let body = multipart_body(&[("file", "a.txt", b"xyz")]);

        let stored = ingest(
            body_stream(vec![Ok(Bytes::from(body))]),
            BOUNDARY.to_string(),
            temp.path(),
            NamingPolicy::Randomized,
        )
        .await
        .expect("ingest");

        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].bytes, 3);
        let names = dir_names(temp.path());
        assert_eq!(names.len(), 1);
        assert!(names[0].starts_with("a-"), "unexpected name {}", names[0]);
        assert!(names[0].ends_with(".txt"), "unexpected name {}", names[0]);
        assert_eq!(std::fs::read(&stored[0].path).expect("read"), b"xyz");
    }

    #[tokio::test]
    async fn keep_original_stores_literal_name_without_temp_files() {
        let temp = tempdir().expect("tempdir");
        let content = vec![7u8; CHUNK_SIZE * 2 + 5];
        let body = multipart_body(&[
            ("file", "report.pdf", content.as_slice()),
            ("file", "notes.txt", b"second"),
        ]);

        let stored = ingest(
            body_stream(vec![Ok(Bytes::from(body))]),
            BOUNDARY.to_string(),
            temp.path(),
            NamingPolicy::KeepOriginal,
        )
        .await
        .expect("ingest");

        assert_eq!(stored.len(), 2);
        assert_eq!(dir_names(temp.path()), ["notes.txt", "report.pdf"]);
        assert_eq!(
            std::fs::read(temp.path().join("report.pdf")).expect("read"),
            content
        );
    }

    #[tokio::test]
    async fn wrong_field_name_is_bad_request_and_creates_nothing() {
        let temp = tempdir().expect("tempdir");
        let body = multipart_body(&[("document", "a.txt", b"xyz")]);

        let result = ingest(
            body_stream(vec![Ok(Bytes::from(body))]),
            BOUNDARY.to_string(),
            temp.path(),
            NamingPolicy::Randomized,
        )
        .await;

        assert!(matches!(result, Err(UploadError::BadRequest(_))));
        assert!(dir_names(temp.path()).is_empty());
    }

    #[tokio::test]
    async fn truncated_body_is_client_disconnect_and_cleans_up() {
        let temp = tempdir().expect("tempdir");
        let mut body = multipart_body(&[("file", "big.bin", &[1u8; 10_000][..])]);
        body.truncate(5_000);

        let result = ingest(
            body_stream(vec![Ok(Bytes::from(body))]),
            BOUNDARY.to_string(),
            temp.path(),
            NamingPolicy::KeepOriginal,
        )
        .await;

        assert!(matches!(result, Err(UploadError::ClientDisconnected(_))));
        assert!(dir_names(temp.path()).is_empty());
    }

    #[tokio::test]
    async fn body_read_failure_is_client_disconnect() {
        let temp = tempdir().expect("tempdir");
        let mut body = multipart_body(&[("file", "big.bin", &[1u8; 10_000][..])]);
        body.truncate(5_000);

        let result = ingest(
            body_stream(vec![
                Ok(Bytes::from(body)),
                Err(io::Error::new(ErrorKind::ConnectionReset, "reset by peer")),
            ]),
            BOUNDARY.to_string(),
            temp.path(),
            NamingPolicy::Randomized,
        )
        .await;

        assert!(matches!(result, Err(UploadError::ClientDisconnected(_))));
        assert!(dir_names(temp.path()).is_empty());
    }

    #[tokio::test]
    async fn missing_target_directory_is_not_found() {
        let temp = tempdir().expect("tempdir");
        let body = multipart_body(&[("file", "a.txt", b"xyz")]);

        let result = ingest(
            body_stream(vec![Ok(Bytes::from(body))]),
            BOUNDARY.to_string(),
            &temp.path().join("missing"),
            NamingPolicy::Randomized,
        )
        .await;

        assert!(matches!(result, Err(UploadError::NotFound(_))));
    }

    #[test]
    fn parse_boundary_requires_multipart() {
        let mut headers = HeaderMap::new();
        assert!(matches!(
            parse_boundary(&headers),
            Err(UploadError::BadRequest(_))
        ));

        headers.insert(header::CONTENT_TYPE, "text/plain".parse().expect("header"));
        assert!(matches!(
            parse_boundary(&headers),
            Err(UploadError::BadRequest(_))
        ));

        headers.insert(
            header::CONTENT_TYPE,
            "multipart/form-data; boundary=abc123".parse().expect("header"),
        );
        assert_eq!(parse_boundary(&headers).expect("boundary"), "abc123");
    }

    #[test]
    fn file_names_are_reduced_to_last_component() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\Users\\me\\photo.jpg"), "photo.jpg");
        assert_eq!(sanitize_file_name(".."), "upload");
        assert_eq!(sanitize_file_name(""), "upload");
    }

    #[test]
    fn unique_name_handles_missing_extension() {
        let name = unique_name("Makefile");
        assert!(name.starts_with("Makefile-"));
        assert!(!name.contains('.'));

        let hidden = unique_name(".bashrc");
        assert!(hidden.starts_with(".bashrc-"));
        assert_ne!(unique_name("a.txt"), unique_name("a.txt"));
    }
}
