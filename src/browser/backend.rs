use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// 浏览器后端：负责把一个端点地址变成一条活的连接。
/// 生产环境只有 CDP 实现，测试里用 mock 替换。
#[async_trait]
pub trait BrowserBackend: Send + Sync + 'static {
    type Connection: BrowserConnection<Page = Self::Page>;
    type Page: BrowserPage;

    async fn connect(&self, endpoint: &str) -> Result<Self::Connection>;
}

/// 一条活的浏览器连接，独占底层会话
#[async_trait]
pub trait BrowserConnection: Send + Sync + 'static {
    type Page: BrowserPage;

    /// 新建一个已加固的页面（UA、禁下载、屏蔽弹窗等都在实现里完成）
    async fn new_page(&self) -> Result<Self::Page>;

    async fn is_connected(&self) -> bool;

    async fn close(&self) -> Result<()>;
}

/// 一个可复用的渲染页面
#[async_trait]
pub trait BrowserPage: Send + Sync + 'static {
    /// 在给定超时内导航到空白页
    async fn goto_blank(&self, timeout: Duration) -> Result<()>;

    /// 存活探测：执行一个无副作用的表达式
    async fn probe(&self) -> Result<()>;

    async fn is_closed(&self) -> bool;

    async fn close(&self) -> Result<()>;
}
