//! 历史数据编排服务。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use connector::{Connector, ConnectorError};
use mdkit::Bar;
use tracing::{error, info};

/// 在请求历史 bar 前确保连接可用。
pub struct HistoricalDataService {
	connector: Arc<dyn Connector>,
}

impl HistoricalDataService {
	pub fn new(connector: Arc<dyn Connector>) -> Self {
		Self { connector }
	}

	/// 未连接时先连接一次（失败直接返回），再原样返回 connector 的结果。
	pub fn get_historical_bars(
		&self,
		instrument: &str,
		timeframe: &str,
		start: DateTime<Utc>,
		end: DateTime<Utc>,
	) -> Result<Vec<Bar>, ConnectorError> {
		if !self.connector.is_connected() {
			if let Err(err) = self.connector.connect() {
				error!(error = %err, "could not connect to download history");
				return Err(err);
			}
		}
		info!(
			instrument,
			timeframe,
			start = %start.to_rfc3339(),
			end = %end.to_rfc3339(),
			"requesting historical bars"
		);
		self.connector
			.request_historical_data(instrument, timeframe, start, end)
	}
}
