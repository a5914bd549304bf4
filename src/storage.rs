//! 根目录受限的路径解析与目录枚举。

use std::fmt;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tokio::io::ErrorKind;

use crate::atomic;

#[derive(Clone, Debug)]
pub struct Storage {
    root: PathBuf,
}

/// 单次请求的路径解析结果。
#[derive(Debug)]
pub struct ResolvedPath {
    pub path: PathBuf,
    pub kind: PathKind,
}

#[derive(Debug)]
pub enum PathKind {
    File(FileMeta),
    Directory,
    NotFound,
}

#[derive(Clone, Copy, Debug)]
pub struct FileMeta {
    pub size: u64,
    pub modified: Option<SystemTime>,
}

#[derive(Debug)]
pub struct DirectoryEntry {
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
    pub modified: Option<SystemTime>,
}

impl Storage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// 将 URL 路径拼接到根目录；`..` 最多回退到根目录本身。
    pub fn confine(&self, url_path: &str) -> Result<PathBuf, StorageError> {
        let mut normalized = PathBuf::new();
        for segment in url_path.split('/') {
            match segment {
                "" | "." => continue,
                ".." => {
                    normalized.pop();
                }
                other => {
                    let mut components = Path::new(other).components();
                    match (components.next(), components.next()) {
                        (Some(Component::Normal(_)), None) => normalized.push(other),
                        _ => return Err(StorageError::InvalidPath),
                    }
                }
            }
        }

        Ok(self.root.join(normalized))
    }

    /// 解析并探测路径类型（只读）。
    pub async fn resolve(&self, url_path: &str) -> Result<ResolvedPath, StorageError> {
        let path = self.confine(url_path)?;
        let kind = match fs::metadata(&path).await {
            Ok(metadata) if metadata.is_dir() => PathKind::Directory,
            Ok(metadata) if metadata.is_file() => PathKind::File(FileMeta {
                size: metadata.len(),
                modified: metadata.modified().ok(),
            }),
            Ok(_) => return Err(StorageError::NotRegular(path)),
            Err(err) if matches!(err.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) => {
                PathKind::NotFound
            }
            Err(err) => return Err(StorageError::Io(err)),
        };

        Ok(ResolvedPath { path, kind })
    }

    /// 枚举目录的直接子项，按名称忽略大小写升序排列。
    pub async fn list_dir(&self, dir: &Path) -> Result<Vec<DirectoryEntry>, StorageError> {
        let mut read_dir = fs::read_dir(dir).await?;
        let mut entries = Vec::new();

        while let Some(entry) = read_dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if atomic::is_temp_name(&name) {
                continue;
            }
            if let Some(listed) = describe_entry(&entry, name).await? {
                entries.push(listed);
            }
        }

        sort_entries(&mut entries);
        Ok(entries)
    }
}

/// 读取单个子项的元数据；枚举后已被删除或改名的子项返回 `None`。
async fn describe_entry(
    entry: &fs::DirEntry,
    name: String,
) -> Result<Option<DirectoryEntry>, StorageError> {
    // 跟随符号链接；悬空链接退回链接自身的元数据
    let metadata = match fs::metadata(entry.path()).await {
        Ok(metadata) => metadata,
        Err(_) => match entry.metadata().await {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        },
    };
    Ok(Some(DirectoryEntry {
        name,
        size: metadata.len(),
        is_dir: metadata.is_dir(),
        modified: metadata.modified().ok(),
    }))
}

pub fn sort_entries(entries: &mut [DirectoryEntry]) {
    entries.sort_by(|a, b| {
        a.name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.name.cmp(&b.name))
    });
}

#[derive(Debug)]
pub enum StorageError {
    InvalidPath,
    NotRegular(PathBuf),
    Io(io::Error),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::InvalidPath => f.write_str("invalid path"),
            StorageError::NotRegular(path) => {
                write!(f, "file is not regular: {}", path.display())
            }
            StorageError::Io(err) => write!(f, "{err}"),
        }
    }
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        StorageError::Io(err)
    }
}
