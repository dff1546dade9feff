//! 实时行情协调服务。
//!
//! 负责：保证连接可用（固定间隔无限重试）、包装用户回调以隔离 panic、
//! 登记每个订阅的取消句柄，并在 `stop_all` / drop 时统一取消。

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use connector::{Connector, ConnectorError, Subscription};
use mdkit::Tick;
use parking_lot::Mutex;
use tracing::{error, info};

use crate::reconnect::{ensure_connected, ReconnectPolicy};
use crate::stats::{ServiceStats, StatsRecorder};

/// 实时行情协调服务。
pub struct MarketDataService {
	connector: Arc<dyn Connector>,
	policy: ReconnectPolicy,
	subscriptions: Mutex<Vec<Subscription>>,
	stats: Arc<StatsRecorder>,
}

impl MarketDataService {
	/// 使用默认重连策略创建服务。
	pub fn new(connector: Arc<dyn Connector>) -> Self {
		Self::with_policy(connector, ReconnectPolicy::default())
	}

	/// 使用指定重连策略创建服务。
	pub fn with_policy(connector: Arc<dyn Connector>, policy: ReconnectPolicy) -> Self {
		Self {
			connector,
			policy,
			subscriptions: Mutex::new(Vec::new()),
			stats: Arc::new(StatsRecorder::default()),
		}
	}

	/// 已连接时立即返回；否则阻塞重试直到连接成功。
	pub fn ensure_connection(&self) -> Result<(), ConnectorError> {
		if self.connector.is_connected() {
			return Ok(());
		}
		ensure_connected(self.connector.as_ref(), self.policy, &self.stats)
	}

	/// 订阅实时 tick，返回可取消的订阅句柄。
	///
	/// 回调中的 panic 会被捕获并记录，不会传播到 connector 的生成循环。
	pub fn subscribe_realtime_ticks<F>(
		&self,
		instrument: &str,
		callback: F,
	) -> Result<Subscription, ConnectorError>
	where
		F: Fn(Tick) + Send + 'static,
	{
		if !self.connector.supports_realtime() {
			return Err(ConnectorError::UnsupportedOperation(format!(
				"{} connector does not support realtime subscriptions",
				self.connector.kind().as_str()
			)));
		}
		self.ensure_connection()?;

		let stats = Arc::clone(&self.stats);
		let callback_instrument = instrument.to_string();
		let guarded = move |tick: Tick| {
			if panic::catch_unwind(AssertUnwindSafe(|| callback(tick))).is_err() {
				stats.callback_failure();
				error!(instrument = %callback_instrument, "user tick callback panicked");
			}
		};

		let subscription = self
			.connector
			.subscribe_market_data(instrument, Box::new(guarded))?;
		self.stats.subscription_opened();
		self.subscriptions.lock().push(subscription.clone());
		info!(id = subscription.id(), instrument, "realtime subscription registered");
		Ok(subscription)
	}

	/// 取消全部已登记订阅；单个取消失败只记录日志，不影响其余订阅。
	pub fn stop_all(&self) {
		let subscriptions = std::mem::take(&mut *self.subscriptions.lock());
		for subscription in subscriptions {
			if let Err(err) = subscription.cancel() {
				self.stats.cancel_failure();
				error!(
					id = subscription.id(),
					instrument = subscription.instrument(),
					error = %err,
					"failed to cancel subscription"
				);
			}
		}
	}

	/// 当前登记的订阅数量。
	pub fn active_subscriptions(&self) -> usize {
		self.subscriptions.lock().len()
	}

	/// 返回指标快照。
	pub fn stats(&self) -> ServiceStats {
		self.stats.snapshot(self.active_subscriptions())
	}
}

impl Drop for MarketDataService {
	fn drop(&mut self) {
		self.stop_all();
	}
}
