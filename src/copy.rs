//! 固定缓冲区的流式拷贝。

use axum::body::Body as AxumBody;
use futures_util::TryStreamExt;
use std::fmt;
use std::io::{self, ErrorKind};
use std::path::PathBuf;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tracing::warn;

use crate::config::CHUNK_SIZE;

#[derive(Debug)]
pub enum CopyError {
    Read(io::Error),
    Write(io::Error),
}

impl fmt::Display for CopyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CopyError::Read(err) => write!(f, "read error: {err}"),
            CopyError::Write(err) => write!(f, "write error: {err}"),
        }
    }
}

/// 以 `buf` 为中转逐块拷贝，返回写入的总字节数。
pub async fn copy_chunked<R, W>(
    reader: &mut R,
    writer: &mut W,
    buf: &mut [u8],
) -> Result<u64, CopyError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut total: u64 = 0;
    loop {
        let read = match reader.read(buf).await {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(CopyError::Read(err)),
        };
        writer
            .write_all(&buf[..read])
            .await
            .map_err(CopyError::Write)?;
        total += read as u64;
    }
    writer.flush().await.map_err(CopyError::Write)?;
    Ok(total)
}

/// 将已打开的文件包装为分块响应体。
///
/// 响应头发出后状态码已无法更改，读取失败只记录日志并中断连接。
pub fn file_body(file: File, path: PathBuf) -> AxumBody {
    let stream = ReaderStream::with_capacity(file, CHUNK_SIZE).inspect_err(move |err| {
        warn!(path = ?path, error = %err, "download aborted after headers were sent");
    });
    AxumBody::from_stream(stream)
}
