pub mod backend;
pub mod cdp;
pub mod health;
pub mod instance;
pub mod manager;
pub mod page;

#[cfg(test)]
pub(crate) mod mock;

pub use backend::{BrowserBackend, BrowserConnection, BrowserPage};
pub use cdp::ChromeBackend;
pub use manager::{BrowserPool, PoolMetrics};
pub use page::PooledPage;
