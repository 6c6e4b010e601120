use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::browser::backend::{BrowserBackend, BrowserConnection, BrowserPage};
use crate::browser::cdp::DEFAULT_PAGE_TIMEOUT;
use crate::browser::manager::BrowserPool;
use crate::error::{PoolError, Result};

/// 指数退避：第 n 次尝试的延迟 = min(initial * 2^(n-1), initial * max_multiplier)
pub(crate) fn backoff_delay(attempt: u32, initial: Duration, max_multiplier: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(31);
    let factor = (1u64 << exp).min(u64::from(max_multiplier.max(1)));
    initial * factor as u32
}

impl<B: BrowserBackend> BrowserPool<B> {
    /// 启动固定间隔的健康检查任务，随关闭令牌退出
    pub(crate) fn spawn_health_monitor(&self) {
        let pool = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(pool.inner.config.health_check_interval());
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = pool.inner.shutdown.cancelled() => break,
                    _ = interval.tick() => pool.run_health_checks().await,
                }
            }
            debug!("健康检查任务退出");
        });
    }

    /// 对每条已注册连接做一轮探测。各端点的检查互不影响，
    /// 单个端点失败不会中断对其余端点的检查。
    pub(crate) async fn run_health_checks(&self) {
        let targets: Vec<(String, u64, Arc<B::Connection>)> = {
            let state = self.inner.state.lock().await;
            state
                .values()
                .map(|inst| (inst.endpoint.clone(), inst.id, inst.conn.clone()))
                .collect()
        };
        if targets.is_empty() {
            return;
        }

        let checks = targets.into_iter().map(|(endpoint, id, conn)| {
            let pool = self.clone();
            async move {
                match pool.probe_connection(conn.as_ref()).await {
                    Ok(()) => {
                        let mut state = pool.inner.state.lock().await;
                        if let Some(inst) = state.get_mut(&endpoint) {
                            if inst.id == id {
                                inst.healthy = true;
                                inst.last_health_check = Instant::now();
                            }
                        }
                    }
                    Err(e) => {
                        warn!("❌ 端点 {} 健康检查失败: {}", endpoint, e);
                        let mut should_reconnect = false;
                        {
                            let mut state = pool.inner.state.lock().await;
                            if let Some(inst) = state.get_mut(&endpoint) {
                                if inst.id == id {
                                    inst.healthy = false;
                                    should_reconnect = true;
                                }
                            }
                        }
                        // 实例已被别的流程替换时就不再重连
                        if should_reconnect {
                            pool.spawn_reconnect(endpoint);
                        }
                    }
                }
            }
        });
        futures::future::join_all(checks).await;
    }

    /// 真探测：会话在线的前提下，建一个加固页面、
    /// 导航到空白页再关掉
    async fn probe_connection(&self, conn: &B::Connection) -> Result<()> {
        if !conn.is_connected().await {
            return Err(PoolError::ConnectionLost("会话已断开".to_string()));
        }
        let page = conn.new_page().await?;
        let result = page.goto_blank(DEFAULT_PAGE_TIMEOUT).await;
        if let Err(e) = page.close().await {
            debug!("关闭探测页面失败: {}", e);
        }
        result
    }

    pub(crate) fn spawn_reconnect(&self, endpoint: String) {
        let pool = self.clone();
        tokio::spawn(async move {
            pool.reconnect_endpoint(endpoint).await;
        });
    }

    /// 针对单个端点的重连：先摘除并清理旧实例，
    /// 然后带退避无限重试直到成功或进程关闭。
    /// 不设重试上限——假定端点终会恢复。
    pub(crate) async fn reconnect_endpoint(&self, endpoint: String) {
        let old = {
            let mut state = self.inner.state.lock().await;
            state.remove(&endpoint)
        };
        if let Some(instance) = old {
            info!("🔌 摘除端点 {} 的失效连接", endpoint);
            instance.teardown().await;
        }

        let initial = self.inner.config.reconnect_initial_delay();
        let max_multiplier = self.inner.config.reconnect_max_multiplier;
        let mut attempt: u32 = 1;
        loop {
            if self.inner.shutdown.is_cancelled() {
                return;
            }
            match self.connect_endpoint(&endpoint).await {
                Ok(instance) => {
                    info!("✓ 端点 {} 第 {} 次尝试重连成功", endpoint, attempt);
                    self.register_reconnected(instance).await;
                    return;
                }
                Err(e) => {
                    let delay = backoff_delay(attempt, initial, max_multiplier);
                    warn!(
                        "重连端点 {} 失败（第 {} 次）: {}，{} 毫秒后重试",
                        endpoint,
                        attempt,
                        e,
                        delay.as_millis()
                    );
                    tokio::select! {
                        _ = self.inner.shutdown.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::mock::MockBackend;
    use crate::config::AppConfig;

    fn test_config(endpoints: &[&str], pool_size: usize) -> AppConfig {
        AppConfig {
            endpoints: endpoints.iter().map(|s| s.to_string()).collect(),
            pool_size,
            ..AppConfig::default()
        }
    }

    #[test]
    fn reconnect_delay_doubles_then_caps() {
        let initial = Duration::from_millis(1000);
        let delays: Vec<u128> = (1..=4)
            .map(|n| backoff_delay(n, initial, 3).as_millis())
            .collect();
        assert_eq!(delays, vec![1000, 2000, 3000, 3000]);
    }

    #[test]
    fn reconnect_delay_large_attempt_stays_capped() {
        let initial = Duration::from_millis(500);
        assert_eq!(
            backoff_delay(40, initial, 5),
            Duration::from_millis(2500)
        );
    }

    #[test]
    fn reconnect_delay_zero_multiplier_treated_as_one() {
        let initial = Duration::from_millis(1000);
        assert_eq!(backoff_delay(3, initial, 0), initial);
    }

    #[tokio::test]
    async fn successful_probe_restores_health_flag() {
        let backend = MockBackend::new();
        let pool = BrowserPool::new(backend.clone(), test_config(&["ws://a"], 1));
        pool.initialize_connections().await.unwrap();
        {
            let mut state = pool.inner.state.lock().await;
            state.get_mut("ws://a").unwrap().healthy = false;
        }

        pool.run_health_checks().await;

        let state = pool.inner.state.lock().await;
        assert!(state.get("ws://a").unwrap().healthy);
        drop(state);
        // 探测用的页面已经关掉，池里仍是原来那一个
        assert_eq!(backend.open_pages(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dead_connection_is_removed_then_restored_with_backoff() {
        let backend = MockBackend::new();
        let pool = BrowserPool::new(backend.clone(), test_config(&["ws://a"], 2));
        pool.initialize_connections().await.unwrap();
        assert_eq!(backend.open_pages(), 2);

        backend.always_fail_connect("ws://a");
        backend.last_connection("ws://a").unwrap().disconnect();

        pool.run_health_checks().await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        // 失效实例已被摘除，页面随之关闭
        assert_eq!(pool.metrics().await.total_instances, 0);
        assert_eq!(backend.open_pages(), 0);

        // 退避重试一直在进行（1s、2s、3s……）
        let calls_before = backend.connect_calls();
        tokio::time::sleep(Duration::from_secs(7)).await;
        assert!(backend.connect_calls() > calls_before);

        backend.clear_connect_failures("ws://a");
        tokio::time::sleep(Duration::from_secs(4)).await;

        let metrics = pool.metrics().await;
        assert_eq!(metrics.total_instances, 1);
        assert_eq!(metrics.healthy_instances, 1);
        assert_eq!(metrics.available_pages, 2);
        assert_eq!(backend.open_pages(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_stops_on_shutdown() {
        let backend = MockBackend::new();
        backend.always_fail_connect("ws://a");
        let pool = BrowserPool::new(backend.clone(), test_config(&["ws://a", "ws://b"], 1));
        pool.initialize_connections().await.unwrap();

        pool.spawn_reconnect("ws://a".to_string());
        tokio::time::sleep(Duration::from_millis(10)).await;

        pool.shutdown().await;
        let calls_at_shutdown = backend.connect_calls();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(backend.connect_calls(), calls_at_shutdown);
    }
}
