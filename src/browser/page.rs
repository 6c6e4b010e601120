use std::time::Duration;
use tracing::debug;

use crate::browser::backend::{BrowserBackend, BrowserConnection, BrowserPage};
use crate::error::{PoolError, Result};

/// 页面重置（导航回空白页）的超时，比默认操作超时短得多
pub const PAGE_RESET_TIMEOUT: Duration = Duration::from_millis(500);

/// 池里的一个页面，带着指回所属连接的查找键。
/// 键只用于归还时查找，不控制连接的生命周期——
/// 连接可能在页面外借期间被替换掉。
pub struct PooledPage<B: BrowserBackend> {
    page: B::Page,
    endpoint: String,
    instance_id: u64,
}

impl<B: BrowserBackend> PooledPage<B> {
    pub(crate) async fn create(
        conn: &B::Connection,
        endpoint: &str,
        instance_id: u64,
    ) -> Result<Self> {
        let page = conn.new_page().await?;
        Ok(Self {
            page,
            endpoint: endpoint.to_string(),
            instance_id,
        })
    }

    pub fn page(&self) -> &B::Page {
        &self.page
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn instance_id(&self) -> u64 {
        self.instance_id
    }

    /// 页面是否还能用：已关闭或探测失败都算不可用，本身不抛错
    pub async fn validate(&self) -> bool {
        if self.page.is_closed().await {
            return false;
        }
        self.page.probe().await.is_ok()
    }

    /// 复用前重置页面；导航失败就关掉并从同一连接重建。
    /// 只有重建也失败时才返回错误。
    pub(crate) async fn reset(self, conn: &B::Connection) -> Result<Self> {
        match self.page.goto_blank(PAGE_RESET_TIMEOUT).await {
            Ok(()) => Ok(self),
            Err(e) => {
                debug!("页面重置失败（{}），重新创建", e);
                self.close().await;
                Self::create(conn, &self.endpoint, self.instance_id)
                    .await
                    .map_err(|err| PoolError::PageRecreation(err.to_string()))
            }
        }
    }

    /// 尽力关闭，失败只记日志
    pub(crate) async fn close(&self) {
        if let Err(e) = self.page.close().await {
            debug!("关闭页面失败: {}", e);
        }
    }
}
