use std::sync::Arc;

use crate::Catalog;

/// 应用状态
pub struct AppState {
    pub catalog: Catalog,
    /// 鉴权 token
    pub token: String,
}

impl AppState {
    pub fn new(catalog: Catalog, token: String) -> Arc<Self> {
        Arc::new(AppState { catalog, token })
    }
}
