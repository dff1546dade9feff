//! 协调服务运行指标。

use std::sync::atomic::{AtomicU64, Ordering};

/// 协调服务指标快照。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceStats {
	/// `connect()` 调用次数。
	pub connect_attempts: u64,
	/// 失败并触发重试的连接次数。
	pub connect_failures: u64,
	/// 成功建立的订阅数量（累计）。
	pub subscriptions_opened: u64,
	/// 用户回调 panic 次数。
	pub callback_failures: u64,
	/// 取消失败次数。
	pub cancel_failures: u64,
	/// 当前登记的订阅数量。
	pub active_subscriptions: usize,
}

#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
	connect_attempts: AtomicU64,
	connect_failures: AtomicU64,
	subscriptions_opened: AtomicU64,
	callback_failures: AtomicU64,
	cancel_failures: AtomicU64,
}

impl StatsRecorder {
	pub(crate) fn connect_attempt(&self) {
		self.connect_attempts.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn connect_failure(&self) {
		self.connect_failures.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn subscription_opened(&self) {
		self.subscriptions_opened.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn callback_failure(&self) {
		self.callback_failures.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn cancel_failure(&self) {
		self.cancel_failures.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn snapshot(&self, active_subscriptions: usize) -> ServiceStats {
		ServiceStats {
			connect_attempts: self.connect_attempts.load(Ordering::Relaxed),
			connect_failures: self.connect_failures.load(Ordering::Relaxed),
			subscriptions_opened: self.subscriptions_opened.load(Ordering::Relaxed),
			callback_failures: self.callback_failures.load(Ordering::Relaxed),
			cancel_failures: self.cancel_failures.load(Ordering::Relaxed),
			active_subscriptions,
		}
	}
}
