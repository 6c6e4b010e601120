use thiserror::Error;

pub type Result<T> = std::result::Result<T, PoolError>;

/// 浏览器页面池的错误类型
#[derive(Debug, Error)]
pub enum PoolError {
    /// 启动时未配置任何端点，不可重试
    #[error("未配置任何浏览器端点")]
    NoEndpointsConfigured,

    /// 所有端点都尝试过之后注册表仍为空
    #[error("所有浏览器端点均连接失败")]
    AllConnectionsFailed,

    #[error("连接浏览器端点 {endpoint} 失败: {message}")]
    Connection { endpoint: String, message: String },

    #[error("浏览器连接已断开: {0}")]
    ConnectionLost(String),

    #[error("创建页面失败: {0}")]
    PageCreation(String),

    #[error("页面重建失败: {0}")]
    PageRecreation(String),

    #[error("页面操作超时（{0} 毫秒）")]
    Timeout(u64),

    #[error("CDP 错误: {0}")]
    Cdp(String),

    #[error("配置错误: {0}")]
    Config(String),
}

impl PoolError {
    pub fn connection(endpoint: impl Into<String>, message: impl ToString) -> Self {
        Self::Connection {
            endpoint: endpoint.into(),
            message: message.to_string(),
        }
    }
}
