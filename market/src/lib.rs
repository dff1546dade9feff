//! `market` crate 入口。
//!
//! 职责：在连接器之上提供行情编排服务与数据落地。
//! 该文件只做模块装配与统一导出，具体实现位于各子模块。
//!
//! 模块分工：
//! - `market_data`：实时订阅协调（自动重连、回调隔离、统一取消）。
//! - `historical`：历史 bar 请求编排。
//! - `reconnect`：固定间隔重连策略。
//! - `stats`：服务运行计数快照。
//! - `storage`：tick / bar 的 SQLite 持久化。
//!
//! 快速示例：
//! ```rust
//! use std::sync::Arc;
//! use connector::{SimulatedConfig, SimulatedConnector};
//! use market::HistoricalDataService;
//! use chrono::{Duration, Utc};
//!
//! let connector = Arc::new(SimulatedConnector::new(SimulatedConfig {
//!     connect_latency: std::time::Duration::ZERO,
//!     ..SimulatedConfig::default()
//! }));
//! let service = HistoricalDataService::new(connector);
//! let end = Utc::now();
//! let bars = service
//!     .get_historical_bars("ES 12-25", "5m", end - Duration::hours(1), end)
//!     .unwrap();
//! assert_eq!(bars.len(), 12);
//! ```

mod historical;
mod market_data;
mod reconnect;
mod stats;
mod storage;

pub use historical::HistoricalDataService;
pub use market_data::MarketDataService;
pub use reconnect::ReconnectPolicy;
pub use stats::ServiceStats;
pub use storage::{
	BarQuery, SqliteStorage, StorageBackend, StorageError, StorageService, TickQuery,
};
