//! 运行配置。
//!
//! 所有键以 `MDKIT_` 为前缀从环境变量读取；空值视为未设置。
//! `from_lookup` 接受任意查找函数，便于测试时不触碰进程环境。

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

pub const ENV_PREFIX: &str = "MDKIT_";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
	#[error("invalid value for {key}: {value:?}")]
	Invalid { key: String, value: String },
	#[error("unsupported data provider: {0}")]
	UnsupportedProvider(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
	Simulated,
	FileHandshake,
}

impl ProviderKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			ProviderKind::Simulated => "simulated",
			ProviderKind::FileHandshake => "file_handshake",
		}
	}
}

impl FromStr for ProviderKind {
	type Err = ConfigError;

	fn from_str(value: &str) -> Result<Self, Self::Err> {
		match value.trim().to_ascii_lowercase().as_str() {
			"simulated" | "simulator" => Ok(ProviderKind::Simulated),
			"file_handshake" | "eod" | "kinetick_eod" => Ok(ProviderKind::FileHandshake),
			_ => Err(ConfigError::UnsupportedProvider(value.to_string())),
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
	pub instrument: String,
	pub timeframe: String,
	pub historical_days: u32,
	pub realtime_duration: Duration,
	pub data_dir: PathBuf,
	pub database_path: PathBuf,
	pub use_simulator: bool,
	/// 原样保存；构建连接器时才解析为 `ProviderKind`。
	pub data_provider: String,
	pub commands_dir: PathBuf,
	pub export_dir: PathBuf,
	pub export_timeout: Duration,
	pub export_poll_interval: Duration,
	pub tick_interval: Duration,
	pub reconnect_delay: Duration,
}

impl Default for Settings {
	fn default() -> Self {
		let data_dir = PathBuf::from("data");
		Self {
			instrument: "ES 12-25".to_string(),
			timeframe: "5m".to_string(),
			historical_days: 5,
			realtime_duration: Duration::from_secs(15),
			database_path: data_dir.join("market_data.db"),
			use_simulator: true,
			data_provider: ProviderKind::FileHandshake.as_str().to_string(),
			commands_dir: data_dir.join("commands"),
			export_dir: data_dir.join("exports"),
			export_timeout: Duration::from_secs(90),
			export_poll_interval: Duration::from_secs(1),
			tick_interval: Duration::from_secs(1),
			reconnect_delay: Duration::from_secs(2),
			data_dir,
		}
	}
}

impl Settings {
	pub fn from_env() -> Result<Self, ConfigError> {
		Self::from_lookup(|key| std::env::var(key).ok())
	}

	/// `lookup` 接收完整键名（含前缀）。
	pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		let env = Lookup(lookup);
		let defaults = Settings::default();

		let data_dir = env.path("DATA_DIR").unwrap_or(defaults.data_dir);
		Ok(Self {
			instrument: env.string("INSTRUMENT").unwrap_or(defaults.instrument),
			timeframe: env.string("TIMEFRAME").unwrap_or(defaults.timeframe),
			historical_days: env.parse("HISTORICAL_DAYS")?.unwrap_or(defaults.historical_days),
			realtime_duration: env
				.parse::<u64>("REALTIME_SECONDS")?
				.map(Duration::from_secs)
				.unwrap_or(defaults.realtime_duration),
			database_path: env
				.path("DATABASE_PATH")
				.unwrap_or_else(|| data_dir.join("market_data.db")),
			use_simulator: env.flag("USE_SIMULATOR")?.unwrap_or(defaults.use_simulator),
			data_provider: env.string("DATA_PROVIDER").unwrap_or(defaults.data_provider),
			commands_dir: env.path("COMMANDS_DIR").unwrap_or_else(|| data_dir.join("commands")),
			export_dir: env.path("EXPORT_DIR").unwrap_or_else(|| data_dir.join("exports")),
			export_timeout: env.seconds("EXPORT_TIMEOUT_SECONDS")?.unwrap_or(defaults.export_timeout),
			export_poll_interval: env
				.seconds("EXPORT_POLL_SECONDS")?
				.unwrap_or(defaults.export_poll_interval),
			tick_interval: env.seconds("TICK_INTERVAL_SECONDS")?.unwrap_or(defaults.tick_interval),
			reconnect_delay: env
				.seconds("RECONNECT_DELAY_SECONDS")?
				.unwrap_or(defaults.reconnect_delay),
			data_dir,
		})
	}

	pub fn provider_kind(&self) -> Result<ProviderKind, ConfigError> {
		self.data_provider.parse()
	}
}

struct Lookup<F>(F);

impl<F> Lookup<F>
where
	F: Fn(&str) -> Option<String>,
{
	fn raw(&self, key: &str) -> Option<(String, String)> {
		let full = format!("{ENV_PREFIX}{key}");
		let value = (self.0)(full.as_str())?;
		let value = value.trim().to_string();
		if value.is_empty() { None } else { Some((full, value)) }
	}

	fn string(&self, key: &str) -> Option<String> {
		self.raw(key).map(|(_, value)| value)
	}

	fn path(&self, key: &str) -> Option<PathBuf> {
		self.string(key).map(PathBuf::from)
	}

	fn parse<T: FromStr>(&self, key: &str) -> Result<Option<T>, ConfigError> {
		match self.raw(key) {
			None => Ok(None),
			Some((full, value)) => value
				.parse::<T>()
				.map(Some)
				.map_err(|_| ConfigError::Invalid { key: full, value }),
		}
	}

	fn flag(&self, key: &str) -> Result<Option<bool>, ConfigError> {
		match self.raw(key) {
			None => Ok(None),
			Some((full, value)) => match value.to_ascii_lowercase().as_str() {
				"true" | "1" | "yes" | "on" => Ok(Some(true)),
				"false" | "0" | "no" | "off" => Ok(Some(false)),
				_ => Err(ConfigError::Invalid { key: full, value }),
			},
		}
	}

	fn seconds(&self, key: &str) -> Result<Option<Duration>, ConfigError> {
		match self.raw(key) {
			None => Ok(None),
			Some((full, value)) => value
				.parse::<f64>()
				.ok()
				.and_then(|secs| Duration::try_from_secs_f64(secs).ok())
				.map(Some)
				.ok_or(ConfigError::Invalid { key: full, value }),
		}
	}
}
