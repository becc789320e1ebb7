use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use directories::ProjectDirs;

use crate::cli::*;
use crate::service::DEFAULT_PROMPT;

static CONF_DIR: LazyLock<ConfDir> = LazyLock::new(|| {
    let path = ProjectDirs::from("", "", "imcatalog")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".imcatalog"));
    ConfDir { path }
});

fn default_config_dir() -> &'static str {
    CONF_DIR.path().to_str().unwrap_or(".imcatalog")
}

/// 外部服务相关选项
#[derive(Parser, Debug, Clone)]
pub struct ServiceOptions {
    /// Ollama 服务地址
    #[arg(long, global = true, value_name = "URL", default_value = "http://localhost:11434")]
    pub ollama_url: String,
    /// 生成图片描述的视觉模型
    #[arg(long, global = true, value_name = "MODEL", default_value = "gemma3")]
    pub describe_model: String,
    /// 计算文本嵌入的模型
    #[arg(long, global = true, value_name = "MODEL", default_value = "all-minilm")]
    pub embed_model: String,
    /// 生成图片描述时使用的提示词
    #[arg(long, global = true, default_value = DEFAULT_PROMPT, hide_default_value = true)]
    pub prompt: String,
    /// 单次请求超时时间，单位为秒
    #[arg(long, global = true, value_name = "SECONDS", default_value_t = 120)]
    pub timeout: u64,
}

impl ServiceOptions {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

/// 图片入库相关选项
#[derive(Parser, Debug, Clone)]
pub struct CatalogOptions {
    /// 发送给描述服务前，图片最长边的最大像素数，0 表示不缩放
    #[arg(long, value_name = "PIXELS", default_value_t = 1024)]
    pub max_image_size: u32,
    /// 同时处理的图片数量
    #[arg(short = 'j', long, value_name = "N", default_value_t = num_cpus::get())]
    pub concurrency: usize,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "imcatalog", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// 图片目录的数据文件夹
    #[arg(short, long, global = true, default_value = default_config_dir())]
    pub conf_dir: ConfDir,
    #[command(flatten)]
    pub service: ServiceOptions,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 扫描目录并添加图片
    Add(AddCommand),
    /// 分页列出已添加的图片
    List(ListCommand),
    /// 按描述搜索图片
    Search(SearchCommand),
    /// 重新计算所有描述的向量并重建向量索引
    Build(BuildCommand),
    /// 修复全文索引、向量索引与图片记录之间的不一致
    Sync(SyncCommand),
    /// 删除文件已不存在的图片记录
    Prune(PruneCommand),
    /// 启动 HTTP 搜索服务
    Server(ServerCommand),
}

#[derive(Debug, Clone)]
pub struct ConfDir {
    path: PathBuf,
}

impl ConfDir {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回数据库文件的路径
    pub fn database(&self) -> PathBuf {
        self.path.join("catalog.db")
    }

    /// 返回向量索引文件的路径
    pub fn vector_index(&self) -> PathBuf {
        self.path.join("vectors.bin")
    }
}

impl FromStr for ConfDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl std::fmt::Display for ConfDir {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// 每行一条结果，字段以制表符分隔
    Table,
    Json,
}
