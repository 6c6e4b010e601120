//! 浏览器页面池：为 HTML 渲染服务维护一组无头浏览器连接，
//! 池化可复用的渲染页面，定期健康检查并在断线后带退避重连。
//!
//! 上层渲染服务通过 [`BrowserPool`] 借出/归还页面；
//! 截图、PDF 等渲染调用在借出的页面上由上层完成，不属于本 crate。

pub mod browser;
pub mod config;
pub mod error;

pub use browser::{BrowserPool, ChromeBackend, PoolMetrics, PooledPage};
pub use config::AppConfig;
pub use error::{PoolError, Result};

/// 生产环境使用的池类型
pub type ChromePool = BrowserPool<ChromeBackend>;
