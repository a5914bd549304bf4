//! 文件 MIME 类型推断：先按扩展名，失败时嗅探文件头。

use mime_guess::mime;
use std::fmt;
use std::io::{self, ErrorKind, SeekFrom};
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
const TEXT_HTML: &str = "text/html; charset=utf-8";
const OCTET_STREAM: &str = "application/octet-stream";

const HTML_SIGNATURES: &[&[u8]] = &[
    b"<!doctype html",
    b"<html",
    b"<head",
    b"<body",
    b"<script",
    b"<title",
];

#[derive(Debug)]
pub enum ContentTypeError {
    Read(io::Error),
}

impl fmt::Display for ContentTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentTypeError::Read(err) => write!(f, "get content-type error: {err}"),
        }
    }
}

/// 推断 `path` 的 Content-Type。
///
/// 扩展名无法识别时读取至多 `buf.len()` 字节进行嗅探，随后将读取位置
/// 重置到文件开头，保证后续拷贝发送完整内容。
pub async fn resolve_content_type<R>(
    path: &Path,
    file: &mut R,
    buf: &mut [u8],
) -> Result<String, ContentTypeError>
where
    R: AsyncRead + AsyncSeek + Unpin,
{
    if let Some(guess) = mime_guess::from_path(path).first() {
        return Ok(with_charset(&guess));
    }

    let read = read_prefix(file, buf)
        .await
        .map_err(ContentTypeError::Read)?;
    let content_type = sniff(&buf[..read]);
    file.seek(SeekFrom::Start(0))
        .await
        .map_err(ContentTypeError::Read)?;
    Ok(content_type.to_string())
}

fn with_charset(guess: &mime::Mime) -> String {
    if guess.type_() == mime::TEXT && guess.get_param(mime::CHARSET).is_none() {
        format!("{}; charset=utf-8", guess.essence_str())
    } else {
        guess.to_string()
    }
}

/// 读满缓冲区或直到 EOF。
async fn read_prefix<R>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await {
            Ok(0) => break,
            Ok(read) => filled += read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

/// 根据内容前缀判断类型。
pub fn sniff(prefix: &[u8]) -> &'static str {
    if prefix.is_empty() {
        return TEXT_PLAIN;
    }

    let trimmed = prefix.trim_ascii_start();
    if HTML_SIGNATURES.iter().any(|signature| {
        trimmed.len() >= signature.len() && trimmed[..signature.len()].eq_ignore_ascii_case(signature)
    }) {
        return TEXT_HTML;
    }

    if let Some(kind) = infer::get(prefix) {
        return kind.mime_type();
    }

    if content_inspector::inspect(prefix).is_text() {
        TEXT_PLAIN
    } else {
        OCTET_STREAM
    }
}
