//! 数据落地与存储模块。
//!
//! - `StorageBackend`：tick / bar 的 append-only 持久化与按条件读取契约。
//! - `SqliteStorage`：基于 SQLite 的实现（WAL，写操作串行化，读可并发）。
//! - `StorageService`：在任意后端之上记录写入日志的门面。
//!
//! 时间以定宽 RFC 3339（UTC，微秒）文本存储，文本序即时间序。

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use mdkit::{Bar, Tick};
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};
use thiserror::Error;
use tracing::info;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS ticks (
	id INTEGER PRIMARY KEY AUTOINCREMENT,
	instrument TEXT NOT NULL,
	time TEXT NOT NULL,
	bid REAL,
	ask REAL,
	last REAL,
	volume INTEGER
);

CREATE TABLE IF NOT EXISTS bars (
	id INTEGER PRIMARY KEY AUTOINCREMENT,
	instrument TEXT NOT NULL,
	timeframe TEXT NOT NULL,
	time TEXT NOT NULL,
	open REAL NOT NULL,
	high REAL NOT NULL,
	low REAL NOT NULL,
	close REAL NOT NULL,
	volume INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_ticks_instrument_time ON ticks(instrument, time);
CREATE INDEX IF NOT EXISTS idx_bars_instrument_time ON bars(instrument, timeframe, time);
"#;

#[derive(Debug, Error)]
pub enum StorageError {
	#[error("sqlite error: {0}")]
	Sqlite(#[from] rusqlite::Error),
	#[error("io error: {0}")]
	Io(#[from] std::io::Error),
	#[error("invalid stored timestamp: {0}")]
	InvalidTimestamp(String),
}

/// tick 查询条件；全部字段可选。
#[derive(Debug, Clone, Default)]
pub struct TickQuery {
	pub instrument: Option<String>,
	pub start: Option<DateTime<Utc>>,
	pub end: Option<DateTime<Utc>>,
	pub limit: Option<usize>,
}

impl TickQuery {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn instrument(mut self, instrument: impl Into<String>) -> Self {
		self.instrument = Some(instrument.into());
		self
	}

	/// 闭区间 `[start, end]`。
	pub fn between(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
		self.start = Some(start);
		self.end = Some(end);
		self
	}

	pub fn limit(mut self, limit: usize) -> Self {
		self.limit = Some(limit);
		self
	}
}

/// bar 查询条件；全部字段可选。
#[derive(Debug, Clone, Default)]
pub struct BarQuery {
	pub instrument: Option<String>,
	pub timeframe: Option<String>,
	pub start: Option<DateTime<Utc>>,
	pub end: Option<DateTime<Utc>>,
	pub limit: Option<usize>,
}

impl BarQuery {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn instrument(mut self, instrument: impl Into<String>) -> Self {
		self.instrument = Some(instrument.into());
		self
	}

	pub fn timeframe(mut self, timeframe: impl Into<String>) -> Self {
		self.timeframe = Some(timeframe.into());
		self
	}

	/// 闭区间 `[start, end]`。
	pub fn between(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
		self.start = Some(start);
		self.end = Some(end);
		self
	}

	pub fn limit(mut self, limit: usize) -> Self {
		self.limit = Some(limit);
		self
	}
}

/// 存储后端契约。
///
/// 写入：空输入返回 0 且不触碰存储；否则整批原子追加。
/// 读取：按时间升序返回。
pub trait StorageBackend: Send + Sync {
	fn save_ticks(&self, ticks: &[Tick]) -> Result<usize, StorageError>;
	fn save_bars(&self, bars: &[Bar]) -> Result<usize, StorageError>;
	fn fetch_ticks(&self, query: &TickQuery) -> Result<Vec<Tick>, StorageError>;
	fn fetch_bars(&self, query: &BarQuery) -> Result<Vec<Bar>, StorageError>;
}

/// SQLite 存储实现。
///
/// 每次操作使用独立连接；批量写入通过 `write_lock` 串行化。
#[derive(Debug)]
pub struct SqliteStorage {
	path: PathBuf,
	write_lock: Mutex<()>,
}

impl SqliteStorage {
	/// 打开（不存在则创建）数据库并初始化表结构。
	pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
		let path = path.as_ref().to_path_buf();
		if let Some(parent) = path.parent() {
			if !parent.as_os_str().is_empty() {
				fs::create_dir_all(parent)?;
			}
		}

		let storage = Self {
			path,
			write_lock: Mutex::new(()),
		};
		storage.connect()?.execute_batch(SCHEMA)?;
		info!(path = %storage.path.display(), "database initialized");
		Ok(storage)
	}

	/// 数据库文件路径。
	pub fn path(&self) -> &Path {
		&self.path
	}

	fn connect(&self) -> Result<Connection, StorageError> {
		let conn = Connection::open(&self.path)?;
		conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
		conn.busy_timeout(Duration::from_secs(5))?;
		Ok(conn)
	}
}

impl StorageBackend for SqliteStorage {
	fn save_ticks(&self, ticks: &[Tick]) -> Result<usize, StorageError> {
		if ticks.is_empty() {
			return Ok(0);
		}

		let _guard = self.write_lock.lock();
		let mut conn = self.connect()?;
		let tx = conn.transaction()?;
		{
			let mut stmt = tx.prepare(
				"INSERT INTO ticks (instrument, time, bid, ask, last, volume) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
			)?;
			for tick in ticks {
				stmt.execute(params![
					tick.instrument,
					format_time(tick.datetime),
					tick.bid_price,
					tick.ask_price,
					tick.last_price,
					tick.volume,
				])?;
			}
		}
		tx.commit()?;
		Ok(ticks.len())
	}

	fn save_bars(&self, bars: &[Bar]) -> Result<usize, StorageError> {
		if bars.is_empty() {
			return Ok(0);
		}

		let _guard = self.write_lock.lock();
		let mut conn = self.connect()?;
		let tx = conn.transaction()?;
		{
			let mut stmt = tx.prepare(
				"INSERT INTO bars (instrument, timeframe, time, open, high, low, close, volume) \
				 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
			)?;
			for bar in bars {
				stmt.execute(params![
					bar.instrument,
					bar.timeframe,
					format_time(bar.datetime),
					bar.open_price,
					bar.high_price,
					bar.low_price,
					bar.close_price,
					bar.volume,
				])?;
			}
		}
		tx.commit()?;
		Ok(bars.len())
	}

	fn fetch_ticks(&self, query: &TickQuery) -> Result<Vec<Tick>, StorageError> {
		let mut filter = SqlFilter::default();
		filter.text("instrument = ?", query.instrument.as_deref());
		filter.bounds(query.start, query.end);
		let (sql, values) = filter.finish(
			"SELECT instrument, time, bid, ask, last, volume FROM ticks",
			query.limit,
		);

		let conn = self.connect()?;
		let mut stmt = conn.prepare(&sql)?;
		let rows = stmt
			.query_map(params_from_iter(values.iter()), |row| {
				Ok((
					row.get::<_, String>(0)?,
					row.get::<_, String>(1)?,
					row.get::<_, Option<f64>>(2)?,
					row.get::<_, Option<f64>>(3)?,
					row.get::<_, Option<f64>>(4)?,
					row.get::<_, Option<i64>>(5)?,
				))
			})?
			.collect::<Result<Vec<_>, _>>()?;

		rows.into_iter()
			.map(|(instrument, time, bid_price, ask_price, last_price, volume)| -> Result<Tick, StorageError> {
				Ok(Tick {
					instrument,
					datetime: parse_time(&time)?,
					bid_price,
					ask_price,
					last_price,
					volume,
				})
			})
			.collect()
	}

	fn fetch_bars(&self, query: &BarQuery) -> Result<Vec<Bar>, StorageError> {
		let mut filter = SqlFilter::default();
		filter.text("instrument = ?", query.instrument.as_deref());
		filter.text("timeframe = ?", query.timeframe.as_deref());
		filter.bounds(query.start, query.end);
		let (sql, values) = filter.finish(
			"SELECT instrument, timeframe, time, open, high, low, close, volume FROM bars",
			query.limit,
		);

		let conn = self.connect()?;
		let mut stmt = conn.prepare(&sql)?;
		let rows = stmt
			.query_map(params_from_iter(values.iter()), |row| {
				Ok((
					row.get::<_, String>(0)?,
					row.get::<_, String>(1)?,
					row.get::<_, String>(2)?,
					row.get::<_, f64>(3)?,
					row.get::<_, f64>(4)?,
					row.get::<_, f64>(5)?,
					row.get::<_, f64>(6)?,
					row.get::<_, i64>(7)?,
				))
			})?
			.collect::<Result<Vec<_>, _>>()?;

		rows.into_iter()
			.map(|(instrument, timeframe, time, open, high, low, close, volume)| -> Result<Bar, StorageError> {
				Ok(Bar {
					instrument,
					timeframe,
					datetime: parse_time(&time)?,
					open_price: open,
					high_price: high,
					low_price: low,
					close_price: close,
					volume,
				})
			})
			.collect()
	}
}

/// WHERE 子句与参数的增量构造器。
#[derive(Default)]
struct SqlFilter {
	clauses: Vec<&'static str>,
	values: Vec<Value>,
}

impl SqlFilter {
	/// 空字符串与 `None` 一样视为不过滤。
	fn text(&mut self, clause: &'static str, value: Option<&str>) {
		if let Some(value) = value.filter(|value| !value.is_empty()) {
			self.clauses.push(clause);
			self.values.push(Value::Text(value.to_string()));
		}
	}

	fn bounds(&mut self, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) {
		if let Some(start) = start {
			self.clauses.push("time >= ?");
			self.values.push(Value::Text(format_time(start)));
		}
		if let Some(end) = end {
			self.clauses.push("time <= ?");
			self.values.push(Value::Text(format_time(end)));
		}
	}

	fn finish(mut self, select: &str, limit: Option<usize>) -> (String, Vec<Value>) {
		let mut sql = select.to_string();
		if !self.clauses.is_empty() {
			sql.push_str(" WHERE ");
			sql.push_str(&self.clauses.join(" AND "));
		}
		sql.push_str(" ORDER BY time, id");
		if let Some(limit) = limit.filter(|limit| *limit > 0) {
			sql.push_str(" LIMIT ?");
			self.values.push(Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
		}
		(sql, self.values)
	}
}

fn format_time(datetime: DateTime<Utc>) -> String {
	datetime.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(value: &str) -> Result<DateTime<Utc>, StorageError> {
	DateTime::parse_from_rfc3339(value)
		.map(|datetime| datetime.with_timezone(&Utc))
		.map_err(|_| StorageError::InvalidTimestamp(value.to_string()))
}

/// 存储门面：委托给后端并记录写入数量。
pub struct StorageService {
	backend: Box<dyn StorageBackend>,
}

impl StorageService {
	pub fn new(backend: Box<dyn StorageBackend>) -> Self {
		Self { backend }
	}

	/// 以 SQLite 后端打开指定数据库文件。
	pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StorageError> {
		Ok(Self::new(Box::new(SqliteStorage::open(db_path)?)))
	}

	pub fn save_ticks(&self, ticks: &[Tick]) -> Result<usize, StorageError> {
		let count = self.backend.save_ticks(ticks)?;
		info!(count, "ticks saved to database");
		Ok(count)
	}

	pub fn save_bars(&self, bars: &[Bar]) -> Result<usize, StorageError> {
		let count = self.backend.save_bars(bars)?;
		info!(count, "bars saved to database");
		Ok(count)
	}

	pub fn get_ticks(&self, query: &TickQuery) -> Result<Vec<Tick>, StorageError> {
		self.backend.fetch_ticks(query)
	}

	pub fn get_bars(&self, query: &BarQuery) -> Result<Vec<Bar>, StorageError> {
		self.backend.fetch_bars(query)
	}
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;
	use std::thread;

	use chrono::{Duration, TimeZone, Utc};
	use mdkit::{Bar, Tick};
	use tempfile::TempDir;

	use super::{BarQuery, SqliteStorage, StorageBackend, StorageService, TickQuery};

	fn tick(instrument: &str, minute: u32, last: f64) -> Tick {
		Tick {
			instrument: instrument.to_string(),
			datetime: Utc.with_ymd_and_hms(2025, 1, 2, 9, minute, 0).unwrap(),
			bid_price: Some(last - 0.25),
			ask_price: Some(last + 0.25),
			last_price: Some(last),
			volume: Some(10),
		}
	}

	fn bar(instrument: &str, timeframe: &str, minute: u32, close: f64) -> Bar {
		Bar {
			instrument: instrument.to_string(),
			timeframe: timeframe.to_string(),
			datetime: Utc.with_ymd_and_hms(2025, 1, 2, 9, minute, 0).unwrap(),
			open_price: 1.0,
			high_price: 2.0,
			low_price: 0.5,
			close_price: close,
			volume: 100,
		}
	}

	#[test]
	fn service_round_trips_tick_and_bar() {
		let dir = TempDir::new().expect("tempdir");
		let service = StorageService::open(dir.path().join("market.db")).expect("storage should open");

		let ticks = vec![Tick {
			instrument: "ES".to_string(),
			datetime: Utc.with_ymd_and_hms(2025, 1, 2, 9, 30, 15).unwrap() + Duration::microseconds(250),
			bid_price: Some(1.0),
			ask_price: Some(1.5),
			last_price: Some(1.25),
			volume: Some(10),
		}];
		let bars = vec![bar("ES", "5m", 0, 1.5)];

		assert_eq!(service.save_ticks(&ticks).expect("save ticks"), 1);
		assert_eq!(service.save_bars(&bars).expect("save bars"), 1);

		let fetched_ticks = service.get_ticks(&TickQuery::new().instrument("ES")).expect("fetch ticks");
		let fetched_bars = service.get_bars(&BarQuery::new().instrument("ES")).expect("fetch bars");
		assert_eq!(fetched_ticks.len(), 1);
		assert_eq!(fetched_ticks[0].last_price, Some(1.25));
		assert_eq!(fetched_ticks[0].datetime, ticks[0].datetime);
		assert_eq!(fetched_bars.len(), 1);
		assert_eq!(fetched_bars[0].close_price, 1.5);
		assert_eq!(fetched_bars[0].timeframe, "5m");
	}

	#[test]
	fn empty_batches_are_noops() {
		let dir = TempDir::new().expect("tempdir");
		let storage = SqliteStorage::open(dir.path().join("nested/dir/market.db")).expect("storage should open");
		assert_eq!(storage.save_ticks(&[]).expect("save ticks"), 0);
		assert_eq!(storage.save_bars(&[]).expect("save bars"), 0);
		assert!(storage.fetch_ticks(&TickQuery::new()).expect("fetch").is_empty());
		assert!(storage.path().exists());
	}

	#[test]
	fn missing_tick_fields_stay_missing() {
		let dir = TempDir::new().expect("tempdir");
		let storage = SqliteStorage::open(dir.path().join("market.db")).expect("storage should open");
		let sparse = Tick {
			instrument: "CL".to_string(),
			datetime: Utc.with_ymd_and_hms(2025, 1, 2, 9, 0, 0).unwrap(),
			bid_price: None,
			ask_price: None,
			last_price: Some(70.5),
			volume: None,
		};
		storage.save_ticks(std::slice::from_ref(&sparse)).expect("save ticks");

		let fetched = storage.fetch_ticks(&TickQuery::new()).expect("fetch");
		assert_eq!(fetched, vec![sparse]);
	}

	#[test]
	fn fetch_filters_and_orders_by_time() {
		let dir = TempDir::new().expect("tempdir");
		let storage = SqliteStorage::open(dir.path().join("market.db")).expect("storage should open");
		storage
			.save_bars(&[
				bar("ES", "5m", 10, 3.0),
				bar("ES", "5m", 0, 1.0),
				bar("ES", "1h", 5, 9.0),
				bar("NQ", "5m", 5, 7.0),
				bar("ES", "5m", 5, 2.0),
			])
			.expect("save bars");

		let es_5m = storage
			.fetch_bars(&BarQuery::new().instrument("ES").timeframe("5m"))
			.expect("fetch");
		let closes = es_5m.iter().map(|bar| bar.close_price).collect::<Vec<_>>();
		assert_eq!(closes, vec![1.0, 2.0, 3.0]);

		let first = storage
			.fetch_bars(&BarQuery::new().instrument("ES").timeframe("5m").limit(1))
			.expect("fetch");
		assert_eq!(first.len(), 1);
		assert_eq!(first[0].close_price, 1.0);

		let start = Utc.with_ymd_and_hms(2025, 1, 2, 9, 5, 0).unwrap();
		let window = storage
			.fetch_bars(&BarQuery::new().between(start, start + Duration::minutes(5)))
			.expect("fetch");
		assert_eq!(window.len(), 4);
		assert!(window.windows(2).all(|pair| pair[0].datetime <= pair[1].datetime));
	}

	#[test]
	fn tick_time_bounds_are_inclusive() {
		let dir = TempDir::new().expect("tempdir");
		let storage = SqliteStorage::open(dir.path().join("market.db")).expect("storage should open");
		storage
			.save_ticks(&[tick("ES", 0, 1.0), tick("ES", 1, 2.0), tick("ES", 2, 3.0)])
			.expect("save ticks");

		let start = Utc.with_ymd_and_hms(2025, 1, 2, 9, 1, 0).unwrap();
		let fetched = storage
			.fetch_ticks(&TickQuery::new().instrument("ES").between(start, start + Duration::minutes(1)))
			.expect("fetch");
		let lasts = fetched.iter().filter_map(|tick| tick.last_price).collect::<Vec<_>>();
		assert_eq!(lasts, vec![2.0, 3.0]);
	}

	#[test]
	fn concurrent_writers_are_serialized() {
		let dir = TempDir::new().expect("tempdir");
		let storage = Arc::new(SqliteStorage::open(dir.path().join("market.db")).expect("storage should open"));

		let handles = (0..4)
			.map(|writer| {
				let storage = Arc::clone(&storage);
				thread::spawn(move || {
					let instrument = format!("I{writer}");
					let batch = (0..25).map(|minute| tick(&instrument, minute, 1.0)).collect::<Vec<_>>();
					storage.save_ticks(&batch).expect("save ticks")
				})
			})
			.collect::<Vec<_>>();
		let saved: usize = handles
			.into_iter()
			.map(|handle| handle.join().expect("writer thread"))
			.sum();

		assert_eq!(saved, 100);
		assert_eq!(storage.fetch_ticks(&TickQuery::new()).expect("fetch").len(), 100);
	}
}
