//! 测试用的内存后端：不碰真实浏览器，
//! 可按端点注入连接失败、断线、建页失败和页面失效。

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::browser::backend::{BrowserBackend, BrowserConnection, BrowserPage};
use crate::error::{PoolError, Result};

#[derive(Clone, Default)]
pub(crate) struct MockBackend {
    inner: Arc<BackendState>,
}

#[derive(Default)]
struct BackendState {
    /// 端点 → 剩余连接失败次数，u32::MAX 表示一直失败
    connect_failures: Mutex<HashMap<String, u32>>,
    connect_calls: AtomicUsize,
    open_pages: Arc<AtomicUsize>,
    page_counter: Arc<AtomicUsize>,
    connections: Mutex<Vec<(String, Arc<ConnState>)>>,
}

impl MockBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail_connect(&self, endpoint: &str, times: u32) {
        self.inner
            .connect_failures
            .lock()
            .unwrap()
            .insert(endpoint.to_string(), times);
    }

    pub(crate) fn always_fail_connect(&self, endpoint: &str) {
        self.fail_connect(endpoint, u32::MAX);
    }

    pub(crate) fn clear_connect_failures(&self, endpoint: &str) {
        self.inner.connect_failures.lock().unwrap().remove(endpoint);
    }

    pub(crate) fn connect_calls(&self) -> usize {
        self.inner.connect_calls.load(Ordering::SeqCst)
    }

    /// 当前仍处于打开状态的页面总数
    pub(crate) fn open_pages(&self) -> usize {
        self.inner.open_pages.load(Ordering::SeqCst)
    }

    /// 某端点最近一次成功建立的连接
    pub(crate) fn last_connection(&self, endpoint: &str) -> Option<Arc<ConnState>> {
        self.inner
            .connections
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(ep, _)| ep == endpoint)
            .map(|(_, state)| state.clone())
    }
}

#[async_trait]
impl BrowserBackend for MockBackend {
    type Connection = MockConnection;
    type Page = MockPage;

    async fn connect(&self, endpoint: &str) -> Result<Self::Connection> {
        self.inner.connect_calls.fetch_add(1, Ordering::SeqCst);
        {
            let mut failures = self.inner.connect_failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(endpoint) {
                if *remaining > 0 {
                    if *remaining != u32::MAX {
                        *remaining -= 1;
                    }
                    return Err(PoolError::connection(endpoint, "模拟连接失败"));
                }
            }
        }
        let state = Arc::new(ConnState {
            connected: AtomicBool::new(true),
            fail_new_page: AtomicBool::new(false),
            pages: Mutex::new(Vec::new()),
            open_pages: self.inner.open_pages.clone(),
            page_counter: self.inner.page_counter.clone(),
        });
        self.inner
            .connections
            .lock()
            .unwrap()
            .push((endpoint.to_string(), state.clone()));
        Ok(MockConnection { state })
    }
}

pub(crate) struct ConnState {
    connected: AtomicBool,
    fail_new_page: AtomicBool,
    pages: Mutex<Vec<Arc<PageState>>>,
    open_pages: Arc<AtomicUsize>,
    page_counter: Arc<AtomicUsize>,
}

impl ConnState {
    pub(crate) fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    pub(crate) fn set_fail_new_page(&self, fail: bool) {
        self.fail_new_page.store(fail, Ordering::SeqCst);
    }

    /// 让已创建的页面探测失败（模拟页面悄悄挂掉）
    pub(crate) fn poison_pages(&self) {
        for page in self.pages.lock().unwrap().iter() {
            page.fail_probe.store(true, Ordering::SeqCst);
        }
    }

    /// 让已创建的页面重置（导航空白页）失败
    pub(crate) fn fail_goto_pages(&self) {
        for page in self.pages.lock().unwrap().iter() {
            page.fail_goto.store(true, Ordering::SeqCst);
        }
    }
}

pub(crate) struct MockConnection {
    state: Arc<ConnState>,
}

#[async_trait]
impl BrowserConnection for MockConnection {
    type Page = MockPage;

    async fn new_page(&self) -> Result<Self::Page> {
        if !self.state.connected.load(Ordering::SeqCst) {
            return Err(PoolError::ConnectionLost("模拟断线".to_string()));
        }
        if self.state.fail_new_page.load(Ordering::SeqCst) {
            return Err(PoolError::PageCreation("模拟建页失败".to_string()));
        }
        let page_state = Arc::new(PageState {
            id: self.state.page_counter.fetch_add(1, Ordering::SeqCst),
            closed: AtomicBool::new(false),
            fail_probe: AtomicBool::new(false),
            fail_goto: AtomicBool::new(false),
            open_pages: self.state.open_pages.clone(),
        });
        self.state.pages.lock().unwrap().push(page_state.clone());
        self.state.open_pages.fetch_add(1, Ordering::SeqCst);
        Ok(MockPage { state: page_state })
    }

    async fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        self.state.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

pub(crate) struct PageState {
    id: usize,
    closed: AtomicBool,
    fail_probe: AtomicBool,
    fail_goto: AtomicBool,
    open_pages: Arc<AtomicUsize>,
}

pub(crate) struct MockPage {
    state: Arc<PageState>,
}

impl MockPage {
    pub(crate) fn id(&self) -> usize {
        self.state.id
    }
}

#[async_trait]
impl BrowserPage for MockPage {
    async fn goto_blank(&self, timeout: Duration) -> Result<()> {
        if self.state.closed.load(Ordering::SeqCst) {
            return Err(PoolError::Cdp("页面已关闭".to_string()));
        }
        if self.state.fail_goto.load(Ordering::SeqCst) {
            return Err(PoolError::Timeout(timeout.as_millis() as u64));
        }
        Ok(())
    }

    async fn probe(&self) -> Result<()> {
        if self.state.closed.load(Ordering::SeqCst)
            || self.state.fail_probe.load(Ordering::SeqCst)
        {
            return Err(PoolError::Cdp("模拟探测失败".to_string()));
        }
        Ok(())
    }

    async fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        if !self.state.closed.swap(true, Ordering::SeqCst) {
            self.state.open_pages.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
