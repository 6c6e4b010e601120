use serde::Serialize;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::browser::backend::{BrowserBackend, BrowserConnection};
use crate::browser::instance::BrowserInstance;
use crate::browser::page::PooledPage;
use crate::config::AppConfig;
use crate::error::{PoolError, Result};

/// 池的只读快照
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PoolMetrics {
    pub total_instances: usize,
    pub healthy_instances: usize,
    /// 名义容量：健康实例数 × pool_size
    pub total_pages: usize,
    /// 健康实例里当前空闲的页面总数
    pub available_pages: usize,
}

pub(crate) struct PoolInner<B: BrowserBackend> {
    pub(crate) backend: B,
    pub(crate) config: AppConfig,
    /// 端点 → 实例。所有变更都经由这把锁串行化，
    /// 借出路径在持锁状态下完成整个「校验或重建」序列，
    /// 保证同一页面不会被借出两次。
    pub(crate) state: Mutex<HashMap<String, BrowserInstance<B>>>,
    pub(crate) shutdown: CancellationToken,
    pub(crate) shutting_down: AtomicBool,
    /// 全局恢复是否在途，避免池耗尽时重复触发
    pub(crate) recovering: AtomicBool,
    next_instance_id: AtomicU64,
}

/// 浏览器连接与页面池的管理器。
/// 显式构造、显式 init/shutdown，由上层渲染服务按引用持有。
pub struct BrowserPool<B: BrowserBackend> {
    pub(crate) inner: Arc<PoolInner<B>>,
}

impl<B: BrowserBackend> Clone for BrowserPool<B> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<B: BrowserBackend> BrowserPool<B> {
    pub fn new(backend: B, config: AppConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                backend,
                config,
                state: Mutex::new(HashMap::new()),
                shutdown: CancellationToken::new(),
                shutting_down: AtomicBool::new(false),
                recovering: AtomicBool::new(false),
                next_instance_id: AtomicU64::new(1),
            }),
        }
    }

    /// 建立所有配置的连接并启动健康检查
    pub async fn init(&self) -> Result<()> {
        self.initialize_connections().await?;
        self.spawn_health_monitor();
        Ok(())
    }

    /// 逐个连接配置的端点。这里刻意串行执行，
    /// 部分失败时不会在共享状态上互相竞争。
    pub async fn initialize_connections(&self) -> Result<()> {
        let endpoints = self.inner.config.endpoints.clone();
        if endpoints.is_empty() {
            return Err(PoolError::NoEndpointsConfigured);
        }

        for endpoint in &endpoints {
            {
                let state = self.inner.state.lock().await;
                if state.contains_key(endpoint) {
                    debug!("端点 {} 已注册，跳过", endpoint);
                    continue;
                }
            }
            match self.connect_endpoint(endpoint).await {
                Ok(instance) => {
                    let mut state = self.inner.state.lock().await;
                    info!("✓ 端点 {} 就绪，预热 {} 个页面", endpoint, instance.pages.len());
                    state.insert(endpoint.clone(), instance);
                }
                Err(e) => {
                    warn!("❌ 连接端点 {} 失败: {}", endpoint, e);
                }
            }
        }

        if self.inner.state.lock().await.is_empty() {
            return Err(PoolError::AllConnectionsFailed);
        }
        Ok(())
    }

    /// 连接单个端点并把页面池预热到 pool_size。
    /// 中途任何一步失败都会清理掉已创建的资源再返回错误，
    /// 不会留下半成品实例。
    pub(crate) async fn connect_endpoint(&self, endpoint: &str) -> Result<BrowserInstance<B>> {
        let conn = Arc::new(self.inner.backend.connect(endpoint).await?);
        let id = self.inner.next_instance_id.fetch_add(1, Ordering::SeqCst);

        let pool_size = self.inner.config.pool_size;
        let mut pages = Vec::with_capacity(pool_size);
        for _ in 0..pool_size {
            match PooledPage::create(conn.as_ref(), endpoint, id).await {
                Ok(page) => pages.push(page),
                Err(e) => {
                    warn!("预热端点 {} 的页面池失败: {}", endpoint, e);
                    for page in &pages {
                        page.close().await;
                    }
                    if let Err(close_err) = conn.close().await {
                        debug!("清理失败连接时出错: {}", close_err);
                    }
                    return Err(e);
                }
            }
        }

        Ok(BrowserInstance::new(endpoint.to_string(), id, conn, pages))
    }

    /// 借出一个可用页面。优先从池最满的健康实例取，
    /// 没有可用页面时返回 None 并在后台触发一次恢复。
    pub async fn get_available_page(&self) -> Option<PooledPage<B>> {
        let mut state = self.inner.state.lock().await;

        let mut candidates: Vec<(String, usize)> = state
            .iter()
            .filter(|(_, inst)| inst.healthy)
            .map(|(endpoint, inst)| (endpoint.clone(), inst.pages.len()))
            .collect();
        // 池大的在前；持平时按端点名排序，保证顺序稳定
        candidates.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        for (endpoint, _) in candidates {
            let Some(inst) = state.get_mut(&endpoint) else {
                continue;
            };
            if let Some(page) = inst.pages.pop() {
                if page.validate().await {
                    debug!("借出端点 {} 的池内页面", endpoint);
                    return Some(page);
                }
                warn!("⚠️ 端点 {} 的池内页面校验失败，关闭并重建", endpoint);
                page.close().await;
            }
            // 池空了或弹出的页面不可用，就地新建一个
            let conn = inst.conn.clone();
            let id = inst.id;
            match PooledPage::create(conn.as_ref(), &endpoint, id).await {
                Ok(page) => {
                    debug!("端点 {} 新建页面借出", endpoint);
                    return Some(page);
                }
                Err(e) => {
                    warn!("❌ 端点 {} 创建页面失败，标记为不健康: {}", endpoint, e);
                    if let Some(inst) = state.get_mut(&endpoint) {
                        inst.healthy = false;
                    }
                }
            }
        }

        drop(state);
        warn!("⚠️ 当前没有可用页面，触发后台恢复");
        self.trigger_recovery();
        None
    }

    /// 归还页面：有位置就重置后入池，否则关闭。
    /// 这条路径不向调用方抛任何错误——归还的页面要么回池要么被关掉。
    pub async fn return_page(&self, page: PooledPage<B>) {
        let endpoint = page.endpoint().to_string();
        let instance_id = page.instance_id();
        let pool_size = self.inner.config.pool_size;

        let mut state = self.inner.state.lock().await;
        match state.get_mut(&endpoint) {
            Some(inst) if inst.id == instance_id => {
                if inst.pages.len() >= pool_size {
                    debug!("端点 {} 页面池已满，关闭归还的页面", endpoint);
                    page.close().await;
                    return;
                }
                let conn = inst.conn.clone();
                match page.reset(conn.as_ref()).await {
                    Ok(fresh) => inst.pages.push(fresh),
                    Err(e) => warn!("❌ 归还端点 {} 的页面失败，已丢弃: {}", endpoint, e),
                }
            }
            _ => {
                drop(state);
                warn!("⚠️ 找不到页面所属的浏览器实例（{}），直接关闭", endpoint);
                page.close().await;
            }
        }
    }

    /// 池耗尽时的全局恢复：重跑一遍 initialize_connections。
    /// 同一时刻只允许一个恢复任务在途。
    pub(crate) fn trigger_recovery(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        if self.inner.recovering.swap(true, Ordering::SeqCst) {
            return;
        }
        let pool = self.clone();
        tokio::spawn(async move {
            info!("🔄 开始全局恢复");
            if let Err(e) = pool.initialize_connections().await {
                warn!("全局恢复失败: {}", e);
            }
            pool.inner.recovering.store(false, Ordering::SeqCst);
        });
    }

    pub async fn metrics(&self) -> PoolMetrics {
        let state = self.inner.state.lock().await;
        let total_instances = state.len();
        let healthy: Vec<_> = state.values().filter(|inst| inst.healthy).collect();
        let healthy_instances = healthy.len();
        PoolMetrics {
            total_instances,
            healthy_instances,
            total_pages: healthy_instances * self.inner.config.pool_size,
            available_pages: healthy.iter().map(|inst| inst.pages.len()).sum(),
        }
    }

    /// 幂等关闭：停掉后台任务，关闭所有页面和连接，清空注册表。
    /// 重复调用和关闭过程中再次触发都安全。
    pub async fn shutdown(&self) {
        if self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            debug!("关闭流程已在进行中");
            return;
        }
        info!("🛑 正在关闭浏览器页面池...");
        self.inner.shutdown.cancel();

        let instances: Vec<BrowserInstance<B>> = {
            let mut state = self.inner.state.lock().await;
            state.drain().map(|(_, inst)| inst).collect()
        };
        for instance in instances {
            instance.teardown().await;
        }
        info!("✓ 浏览器页面池已关闭");
    }

    /// 重连成功后登记新实例；若端点已被并发恢复占先，则放弃新实例
    pub(crate) async fn register_reconnected(&self, instance: BrowserInstance<B>) {
        if self.inner.shutdown.is_cancelled() {
            instance.teardown().await;
            return;
        }
        {
            let mut state = self.inner.state.lock().await;
            if let Entry::Vacant(slot) = state.entry(instance.endpoint.clone()) {
                info!("✓ 端点 {} 重连后重新入池", instance.endpoint);
                slot.insert(instance);
                return;
            }
        }
        debug!("端点已被并发恢复注册，丢弃本次重连结果");
        instance.teardown().await;
    }
}
