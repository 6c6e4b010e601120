use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::browser::{
    SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
};
use chromiumoxide::cdp::browser_protocol::network::SetBypassServiceWorkerParams;
use chromiumoxide::cdp::browser_protocol::page::{
    EventJavascriptDialogOpening, HandleJavaScriptDialogParams,
};
use chromiumoxide::cdp::browser_protocol::target::{
    CloseTargetParams, EventTargetCreated, SetDiscoverTargetsParams,
};
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::browser::backend::{BrowserBackend, BrowserConnection, BrowserPage};
use crate::error::{PoolError, Result};

/// 页面默认操作超时
pub const DEFAULT_PAGE_TIMEOUT: Duration = Duration::from_millis(5000);

/// 池里页面统一使用的 UA，避免暴露无头环境
const POOL_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// 给每个 CDP 调用套上默认超时
async fn with_timeout<T>(
    timeout: Duration,
    fut: impl Future<Output = chromiumoxide::error::Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) => Err(PoolError::Cdp(e.to_string())),
        Err(_) => Err(PoolError::Timeout(timeout.as_millis() as u64)),
    }
}

/// 基于 chromiumoxide 的生产后端
#[derive(Debug, Clone, Default)]
pub struct ChromeBackend;

impl ChromeBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BrowserBackend for ChromeBackend {
    type Connection = ChromeConnection;
    type Page = ChromePage;

    async fn connect(&self, endpoint: &str) -> Result<Self::Connection> {
        debug!("尝试连接浏览器端点: {}", endpoint);
        let (browser, mut handler) = Browser::connect(endpoint)
            .await
            .map_err(|e| PoolError::connection(endpoint, e))?;

        // 在后台消费浏览器事件；循环退出即视为连接断开
        let connected = Arc::new(AtomicBool::new(true));
        let flag = connected.clone();
        let handler_task = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
            flag.store(false, Ordering::SeqCst);
        });

        // 回收页面弹出的新标签（target=_blank、表单提交等），
        // 否则长连接上会越积越多
        browser
            .execute(SetDiscoverTargetsParams::new(true))
            .await
            .map_err(|e| PoolError::Cdp(e.to_string()))?;
        let mut spawned_targets = browser
            .event_listener::<EventTargetCreated>()
            .await
            .map_err(|e| PoolError::Cdp(e.to_string()))?;

        let browser = Arc::new(Mutex::new(browser));
        let reaper = browser.clone();
        let reaper_task = tokio::spawn(async move {
            while let Some(ev) = spawned_targets.next().await {
                let info = &ev.target_info;
                if !is_popup_target(info.r#type.as_str(), info.opener_id.is_some()) {
                    continue;
                }
                let target_id = info.target_id.clone();
                debug!("关闭页面弹出的新标签: {}", target_id.as_ref().to_string());
                let close = CloseTargetParams::new(target_id);
                let browser = reaper.lock().await;
                let _ = browser.execute(close).await;
            }
        });

        info!("✓ 已连接浏览器端点: {}", endpoint);
        Ok(ChromeConnection {
            browser,
            connected,
            handler_task,
            reaper_task,
        })
    }
}

/// 只回收页面自己弹出来的新标签；我们主动创建的页面没有 opener
fn is_popup_target(kind: &str, has_opener: bool) -> bool {
    kind == "page" && has_opener
}

pub struct ChromeConnection {
    browser: Arc<Mutex<Browser>>,
    connected: Arc<AtomicBool>,
    handler_task: JoinHandle<()>,
    reaper_task: JoinHandle<()>,
}

#[async_trait]
impl BrowserConnection for ChromeConnection {
    type Page = ChromePage;

    async fn new_page(&self) -> Result<Self::Page> {
        let page = {
            let browser = self.browser.lock().await;
            with_timeout(DEFAULT_PAGE_TIMEOUT, browser.new_page("about:blank"))
                .await
                .map_err(|e| PoolError::PageCreation(e.to_string()))?
        };
        harden_page(&page).await?;
        Ok(ChromePage {
            page,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        {
            let mut browser = self.browser.lock().await;
            if let Err(e) = browser.close().await {
                debug!("关闭浏览器连接失败: {}", e);
            }
        }
        self.handler_task.abort();
        self.reaper_task.abort();
        Ok(())
    }
}

/// 对新页面做统一加固：固定 UA、禁下载、绕过 Service Worker、
/// 屏蔽 window.open、自动取消原生对话框
async fn harden_page(page: &Page) -> Result<()> {
    with_timeout(DEFAULT_PAGE_TIMEOUT, page.set_user_agent(POOL_USER_AGENT)).await?;

    let deny_download = SetDownloadBehaviorParams::builder()
        .behavior(SetDownloadBehaviorBehavior::Deny)
        .build()
        .map_err(PoolError::Cdp)?;
    with_timeout(DEFAULT_PAGE_TIMEOUT, page.execute(deny_download)).await?;

    let bypass_sw = SetBypassServiceWorkerParams::builder()
        .bypass(true)
        .build()
        .map_err(PoolError::Cdp)?;
    with_timeout(DEFAULT_PAGE_TIMEOUT, page.execute(bypass_sw)).await?;

    with_timeout(
        DEFAULT_PAGE_TIMEOUT,
        page.evaluate_on_new_document("window.open = () => null;"),
    )
    .await?;

    let mut dialogs = page
        .event_listener::<EventJavascriptDialogOpening>()
        .await
        .map_err(|e| PoolError::Cdp(e.to_string()))?;
    let dialog_page = page.clone();
    tokio::spawn(async move {
        while let Some(_ev) = dialogs.next().await {
            debug!("自动取消页面对话框");
            if let Ok(params) = HandleJavaScriptDialogParams::builder().accept(false).build() {
                let _ = dialog_page.execute(params).await;
            }
        }
    });

    Ok(())
}

pub struct ChromePage {
    page: Page,
    closed: Arc<AtomicBool>,
}

impl ChromePage {
    /// 暴露底层页面给渲染层（截图 / PDF 在池外完成）
    pub fn page(&self) -> &Page {
        &self.page
    }
}

#[async_trait]
impl BrowserPage for ChromePage {
    async fn goto_blank(&self, timeout: Duration) -> Result<()> {
        with_timeout(timeout, self.page.goto("about:blank")).await?;
        Ok(())
    }

    async fn probe(&self) -> Result<()> {
        with_timeout(DEFAULT_PAGE_TIMEOUT, self.page.evaluate("1 + 1")).await?;
        Ok(())
    }

    async fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.page
            .clone()
            .close()
            .await
            .map_err(|e| PoolError::Cdp(e.to_string()))
    }
}
