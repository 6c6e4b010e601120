use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

use crate::browser::backend::{BrowserBackend, BrowserConnection};
use crate::browser::page::PooledPage;

/// 一条浏览器连接及其空闲页面池
pub struct BrowserInstance<B: BrowserBackend> {
    /// 端点地址，同时是注册表里的主键
    pub endpoint: String,
    /// 代次编号：同一端点重连后会换新编号，
    /// 防止旧连接的页面归还进新连接的池
    pub id: u64,
    pub conn: Arc<B::Connection>,
    /// 空闲页面，长度不会超过 pool_size
    pub pages: Vec<PooledPage<B>>,
    /// 只由健康检查和重连流程改写
    pub healthy: bool,
    pub last_health_check: Instant,
    /// 预留：优雅下线用，目前没有代码路径会消费它
    pub marked_for_shutdown: bool,
}

impl<B: BrowserBackend> BrowserInstance<B> {
    pub(crate) fn new(endpoint: String, id: u64, conn: Arc<B::Connection>, pages: Vec<PooledPage<B>>) -> Self {
        Self {
            endpoint,
            id,
            conn,
            pages,
            healthy: true,
            last_health_check: Instant::now(),
            marked_for_shutdown: false,
        }
    }

    /// 尽力关闭所有页面和底层连接，错误只记日志
    pub(crate) async fn teardown(mut self) {
        for page in self.pages.drain(..) {
            page.close().await;
        }
        if let Err(e) = self.conn.close().await {
            warn!("关闭浏览器连接失败 {}: {}", self.endpoint, e);
        }
    }
}
