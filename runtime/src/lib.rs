use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use chrono::{DateTime, TimeDelta, Utc};
use config::{ConfigError, ProviderKind, Settings};
use connector::{
	Connector, ConnectorKind, HandshakeConfig, HandshakeConnector, SimulatedConfig, SimulatedConnector,
};
use market::{
	BarQuery, HistoricalDataService, MarketDataService, ReconnectPolicy, ServiceStats, StorageService,
	TickQuery,
};
use mdkit::{Bar, Tick};
use parking_lot::Mutex;
use tracing::{info, warn};

pub const USAGE: &str =
	"usage: collector [--instrument NAME] [--timeframe TF] [--seconds N] [--simulator] [--provider NAME]";

/// 命令行覆盖项；优先级高于 `Settings`。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOverrides {
	pub instrument: Option<String>,
	pub timeframe: Option<String>,
	pub seconds: Option<u64>,
	pub simulator: bool,
	pub provider: Option<String>,
}

impl RunOverrides {
	/// 解析参数（不含程序名）。支持 `--flag value` 与 `--flag=value`。
	pub fn parse<I>(args: I) -> anyhow::Result<Self>
	where
		I: IntoIterator<Item = String>,
	{
		let mut overrides = Self::default();
		let mut args = args.into_iter();
		while let Some(arg) = args.next() {
			let (flag, inline) = match arg.split_once('=') {
				Some((flag, value)) => (flag.to_string(), Some(value.to_string())),
				None => (arg, None),
			};

			if flag == "--simulator" {
				if inline.is_some() {
					bail!("--simulator takes no value");
				}
				overrides.simulator = true;
				continue;
			}

			let mut value = || {
				inline
					.clone()
					.or_else(|| args.next())
					.ok_or_else(|| anyhow!("missing value for {flag}"))
			};
			match flag.as_str() {
				"--instrument" => overrides.instrument = Some(value()?),
				"--timeframe" => overrides.timeframe = Some(value()?),
				"--provider" => overrides.provider = Some(value()?),
				"--seconds" => {
					let raw = value()?;
					let seconds = raw
						.parse::<u64>()
						.with_context(|| format!("invalid --seconds value {raw:?}"))?;
					overrides.seconds = Some(seconds);
				}
				_ => bail!("unknown argument {flag}\n{USAGE}"),
			}
		}
		Ok(overrides)
	}

	/// `--seconds 0` 视为未指定。
	pub fn apply(self, mut settings: Settings) -> Settings {
		if let Some(instrument) = self.instrument {
			settings.instrument = instrument;
		}
		if let Some(timeframe) = self.timeframe {
			settings.timeframe = timeframe;
		}
		if let Some(seconds) = self.seconds.filter(|seconds| *seconds > 0) {
			settings.realtime_duration = Duration::from_secs(seconds);
		}
		if self.simulator {
			settings.use_simulator = true;
		}
		if let Some(provider) = self.provider {
			settings.data_provider = provider;
		}
		settings
	}
}

/// 根据配置构建连接器。`use_simulator` 优先于 `data_provider`。
pub fn build_connector(settings: &Settings) -> Result<Arc<dyn Connector>, ConfigError> {
	let kind = if settings.use_simulator {
		ProviderKind::Simulated
	} else {
		settings.provider_kind()?
	};

	let connector: Arc<dyn Connector> = match kind {
		ProviderKind::Simulated => Arc::new(SimulatedConnector::new(SimulatedConfig {
			tick_interval: settings.tick_interval,
			..SimulatedConfig::default()
		})),
		ProviderKind::FileHandshake => Arc::new(HandshakeConnector::new(HandshakeConfig {
			commands_dir: settings.commands_dir.clone(),
			export_dir: settings.export_dir.clone(),
			export_timeout: settings.export_timeout,
			poll_interval: settings.export_poll_interval,
		})),
	};
	info!(provider = connector.kind().as_str(), "connector ready");
	Ok(connector)
}

#[derive(Debug, Clone)]
pub struct RunSummary {
	pub instrument: String,
	pub provider: ConnectorKind,
	pub database_path: PathBuf,
	pub ticks_collected: usize,
	pub ticks_saved: usize,
	pub bars_saved: usize,
	pub sample_tick: Option<Tick>,
	pub sample_bar: Option<Bar>,
	pub stats: ServiceStats,
}

/// 采集主流程：实时 tick（若支持）→ 历史 bar → 落库 → 回读样本。
pub fn run(settings: &Settings) -> anyhow::Result<RunSummary> {
	let connector = build_connector(settings)?;
	let market_service = MarketDataService::with_policy(
		Arc::clone(&connector),
		ReconnectPolicy {
			delay: settings.reconnect_delay,
		},
	);
	let historical_service = HistoricalDataService::new(Arc::clone(&connector));
	let storage = StorageService::open(&settings.database_path)
		.with_context(|| format!("failed to open database {}", settings.database_path.display()))?;

	let instrument = settings.instrument.as_str();
	let mut ticks_collected = 0;
	let mut ticks_saved = 0;

	if connector.supports_realtime() {
		let collected = Arc::new(Mutex::new(Vec::new()));
		let sink = Arc::clone(&collected);
		let subscription = market_service.subscribe_realtime_ticks(instrument, move |tick: Tick| {
			info!(
				instrument = %tick.instrument,
				bid = ?tick.bid_price,
				ask = ?tick.ask_price,
				last = ?tick.last_price,
				volume = ?tick.volume,
				"tick"
			);
			sink.lock().push(tick);
		})?;

		info!(
			instrument,
			seconds = settings.realtime_duration.as_secs_f64(),
			"collecting realtime ticks"
		);
		thread::sleep(settings.realtime_duration);

		if let Err(err) = subscription.cancel() {
			warn!(id = subscription.id(), error = %err, "failed to cancel tick subscription");
		}
		market_service.stop_all();

		let ticks = std::mem::take(&mut *collected.lock());
		ticks_collected = ticks.len();
		ticks_saved = storage.save_ticks(&ticks)?;
	} else {
		info!(
			provider = connector.kind().as_str(),
			"provider has no realtime feed; skipping tick capture"
		);
	}

	let (history_start, history_end) = history_window(settings.historical_days)?;
	let bars = historical_service.get_historical_bars(
		instrument,
		&settings.timeframe,
		history_start,
		history_end,
	)?;
	let bars_saved = storage.save_bars(&bars)?;

	// bar 的存储标签可能与请求的周期不同（如日线统一为 1D）。
	let stored_timeframe = bars
		.first()
		.map(|bar| bar.timeframe.clone())
		.unwrap_or_else(|| settings.timeframe.clone());
	let sample_tick = storage
		.get_ticks(&TickQuery::new().instrument(instrument).limit(1))?
		.into_iter()
		.next();
	let sample_bar = storage
		.get_bars(
			&BarQuery::new()
				.instrument(instrument)
				.timeframe(stored_timeframe)
				.limit(1),
		)?
		.into_iter()
		.next();

	info!(
		ticks = ticks_collected,
		bars = bars_saved,
		database = %settings.database_path.display(),
		"collection summary"
	);
	if let Some(tick) = &sample_tick {
		info!(time = %tick.datetime, bid = ?tick.bid_price, ask = ?tick.ask_price, "sample stored tick");
	}
	if let Some(bar) = &sample_bar {
		info!(
			time = %bar.datetime,
			open = bar.open_price,
			high = bar.high_price,
			low = bar.low_price,
			close = bar.close_price,
			"sample stored bar"
		);
	}

	Ok(RunSummary {
		instrument: settings.instrument.clone(),
		provider: connector.kind(),
		database_path: settings.database_path.clone(),
		ticks_collected,
		ticks_saved,
		bars_saved,
		sample_tick,
		sample_bar,
		stats: market_service.stats(),
	})
}

/// 截止当前时刻、回溯 `days` 天的历史区间。
fn history_window(days: u32) -> anyhow::Result<(DateTime<Utc>, DateTime<Utc>)> {
	let end = Utc::now();
	let start = TimeDelta::try_days(i64::from(days))
		.and_then(|span| end.checked_sub_signed(span))
		.ok_or_else(|| anyhow!("historical window of {days} days is out of range"))?;
	Ok((start, end))
}
