//! CLI 参数、运行时配置与默认常量。

use clap::Parser;
use std::path::PathBuf;

/// 下载、上传与内容嗅探共用的缓冲区大小。
pub const CHUNK_SIZE: usize = 4096;
/// SPA 模式下的回退页面（相对根目录）。
pub const SPA_INDEX: &str = "index.html";
pub const DEFAULT_PORT: u16 = 8000;

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug)]
#[command(
    name = "upload-server",
    version,
    about = "Serve a directory over HTTP and accept uploads into it"
)]
pub struct Args {
    #[arg(
        env = "UPLOAD_SERVER_ROOT",
        default_value = ".",
        help = "Directory to serve"
    )]
    pub path: PathBuf,
    #[arg(
        short = 'b',
        long,
        env = "UPLOAD_SERVER_BIND",
        default_value = "0.0.0.0",
        help = "Bind address"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "UPLOAD_SERVER_PORT",
        default_value_t = DEFAULT_PORT,
        help = "Port to use"
    )]
    pub port: u16,
    #[arg(
        long,
        env = "UPLOAD_SERVER_KEEP_UPLOAD_FILENAME",
        help = "Keep original upload file name: use 'filename.ext' instead of 'filename-<random>.ext'"
    )]
    pub keep_upload_filename: bool,
    #[arg(
        long,
        env = "UPLOAD_SERVER_SPA",
        help = "Respond with /index.html to every GET that does not match a file"
    )]
    pub spa: bool,
    #[arg(long, env = "UPLOAD_SERVER_DEV", help = "Use development settings (trace logging)")]
    pub dev: bool,
}

/// 启动后不可变的服务配置。
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub root: PathBuf,
    pub keep_upload_filename: bool,
    pub spa: bool,
}

impl ServerConfig {
    /// 由命令行参数构建配置；根目录存在时规范化为绝对路径。
    pub fn from_args(args: &Args) -> std::io::Result<Self> {
        let root = std::fs::canonicalize(&args.path)?;
        if !root.is_dir() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is not a directory", root.display()),
            ));
        }
        Ok(Self {
            root,
            keep_upload_filename: args.keep_upload_filename,
            spa: args.spa,
        })
    }
}
