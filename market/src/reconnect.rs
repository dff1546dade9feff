//! 连接保持策略。
//!
//! 固定间隔、无上限地重试 `connect()`，直到连接成功为止。

use std::thread;
use std::time::Duration;

use connector::{Connector, ConnectorError};
use tracing::{info, warn};

use crate::stats::StatsRecorder;

/// 重连策略：固定退避间隔，不增长、不设上限。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
	/// 两次连接尝试之间的等待时间。
	pub delay: Duration,
}

impl Default for ReconnectPolicy {
	fn default() -> Self {
		Self {
			delay: Duration::from_secs(2),
		}
	}
}

/// 阻塞直到 `connector` 处于已连接状态。
///
/// 仅 `ConnectionFailure` 会被吞掉并重试；其余错误直接返回。
pub(crate) fn ensure_connected(
	connector: &dyn Connector,
	policy: ReconnectPolicy,
	stats: &StatsRecorder,
) -> Result<(), ConnectorError> {
	while !connector.is_connected() {
		info!(kind = connector.kind().as_str(), "connecting to data provider");
		stats.connect_attempt();
		match connector.connect() {
			Ok(()) => break,
			Err(ConnectorError::ConnectionFailure(reason)) => {
				stats.connect_failure();
				warn!(%reason, delay_ms = policy.delay.as_millis() as u64, "connection failed, retrying");
				thread::sleep(policy.delay);
			}
			Err(other) => return Err(other),
		}
	}
	Ok(())
}
