use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::db::ImageRecord;

fn default_k() -> usize {
    10
}

fn default_limit() -> usize {
    20
}

/// 语义搜索请求
#[derive(Debug, Deserialize, ToSchema)]
pub struct SearchRequest {
    /// 查询文本
    pub query: String,
    /// 返回的结果数量
    #[serde(default = "default_k")]
    #[schema(default = 10)]
    pub k: usize,
}

/// 全文检索请求
#[derive(Debug, Deserialize, ToSchema)]
pub struct LexicalRequest {
    /// 查询文本，按单词切分，所有单词都需要匹配
    pub query: String,
    /// 最多返回的结果数量，不填则返回全部
    #[serde(default)]
    pub limit: Option<usize>,
}

/// 列出图片的参数
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    #[param(default = 20)]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
    /// 只列出描述匹配该查询的图片
    pub filter: Option<String>,
}

/// 添加图片请求，路径为服务器上的文件路径
#[derive(Debug, Deserialize, ToSchema)]
pub struct AddRequest {
    pub path: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SemanticHit {
    /// 平方欧氏距离，越小越相似
    pub distance: f32,
    pub record: ImageRecord,
}

/// 语义搜索响应
#[derive(Debug, Serialize, ToSchema)]
pub struct SearchResponse {
    /// 搜索耗时，单位为毫秒
    pub time: u64,
    /// 使用的向量索引版本
    pub version: u64,
    pub result: Vec<SemanticHit>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LexicalHit {
    /// 相关度，越大越相关
    pub score: f64,
    pub record: ImageRecord,
}

/// 全文检索响应
#[derive(Debug, Serialize, ToSchema)]
pub struct LexicalResponse {
    pub time: u64,
    pub result: Vec<LexicalHit>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ListResponse {
    /// 图片总数
    pub total: u64,
    pub result: Vec<ImageRecord>,
}

/// 添加图片响应
#[derive(Debug, Serialize, ToSchema)]
pub struct AddResponse {
    /// indexed / pending / skipped
    pub outcome: String,
    pub id: Option<i64>,
}
