use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use mdkit::{interval_for, Bar, Tick};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{error, info, warn};

use crate::error::ConnectorError;
use crate::protocol::{Connector, ConnectorKind, Subscription, TickCallback};
use crate::stream::{StopSignal, StreamRegistry};

#[derive(Debug, Clone, Copy)]
pub struct SimulatedConfig {
    pub tick_interval: Duration,
    pub connect_latency: Duration,
    /// Upper bound on waiting for a stream loop to exit.
    pub join_timeout: Duration,
    /// Fixed seed for reproducible data; streams derive theirs from it.
    pub seed: Option<u64>,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            connect_latency: Duration::from_millis(200),
            join_timeout: Duration::from_secs(1),
            seed: None,
        }
    }
}

/// In-process random-walk data source.
pub struct SimulatedConnector {
    config: SimulatedConfig,
    streams: Arc<StreamRegistry>,
    history_rng: Mutex<StdRng>,
}

impl SimulatedConnector {
    pub fn new(config: SimulatedConfig) -> Self {
        Self {
            config,
            streams: Arc::new(StreamRegistry::default()),
            history_rng: Mutex::new(make_rng(config.seed)),
        }
    }

    pub fn active_subscriptions(&self) -> usize {
        self.streams.len()
    }
}

impl Default for SimulatedConnector {
    fn default() -> Self {
        Self::new(SimulatedConfig::default())
    }
}

impl Connector for SimulatedConnector {
    fn kind(&self) -> ConnectorKind {
        ConnectorKind::Simulated
    }

    fn connect(&self) -> Result<(), ConnectorError> {
        info!("connecting simulated connector");
        if !self.config.connect_latency.is_zero() {
            thread::sleep(self.config.connect_latency);
        }
        self.streams.open_session();
        info!("simulated connector connected");
        Ok(())
    }

    fn disconnect(&self) {
        info!("disconnecting simulated connector");
        for worker in self.streams.close_session() {
            let id = worker.id();
            let instrument = worker.instrument().to_string();
            if let Err(err) = worker.stop(self.config.join_timeout) {
                warn!(id, instrument = %instrument, error = %err, "stream did not stop in time");
            }
        }
        info!("simulated connector disconnected");
    }

    fn is_connected(&self) -> bool {
        self.streams.is_open()
    }

    fn subscribe_market_data(
        &self,
        instrument: &str,
        on_tick: TickCallback,
    ) -> Result<Subscription, ConnectorError> {
        let interval = self.config.tick_interval;
        let seed = self.config.seed;
        let stream_instrument = instrument.to_string();

        let id = self.streams.spawn(instrument, move |id, signal| {
            let walk = PriceWalk::new(make_rng(seed.map(|s| s.wrapping_add(id))));
            run_stream(&stream_instrument, &on_tick, walk, &signal, interval);
        })?;
        info!(id, instrument, "simulated subscription started");

        let streams = Arc::clone(&self.streams);
        let join_timeout = self.config.join_timeout;
        Ok(Subscription::new(id, instrument, move || {
            streams.cancel(id, join_timeout)
        }))
    }

    fn request_historical_data(
        &self,
        instrument: &str,
        timeframe: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, ConnectorError> {
        if !self.is_connected() {
            return Err(ConnectorError::not_connected());
        }
        info!(instrument, timeframe, "generating simulated history");
        let mut rng = self.history_rng.lock();
        Ok(generate_bars(&mut rng, instrument, timeframe, start, end))
    }
}

impl Drop for SimulatedConnector {
    fn drop(&mut self) {
        if self.streams.is_open() || self.streams.len() > 0 {
            self.disconnect();
        }
    }
}

fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    }
}

fn run_stream(
    instrument: &str,
    on_tick: &TickCallback,
    mut walk: PriceWalk,
    signal: &StopSignal,
    interval: Duration,
) {
    while !signal.is_stopped() {
        let tick = walk.next_tick(instrument);
        if panic::catch_unwind(AssertUnwindSafe(|| on_tick(tick))).is_err() {
            error!(instrument, "tick callback panicked");
        }
        if signal.wait(interval) {
            break;
        }
    }
}

struct PriceWalk {
    rng: StdRng,
    last_price: f64,
}

impl PriceWalk {
    fn new(mut rng: StdRng) -> Self {
        let last_price = rng.random_range(1000.0..5000.0);
        Self { rng, last_price }
    }

    /// `bid <= last <= ask`, with a spread of at least 0.25 before rounding.
    fn next_tick(&mut self, instrument: &str) -> Tick {
        let change = self.rng.random_range(-1.5..=1.5);
        let bid = (self.last_price + change - 0.5).max(0.0);
        let ask = bid + self.rng.random_range(0.25..=1.25);
        self.last_price = bid + self.rng.random_range(0.0..=(ask - bid));

        Tick {
            instrument: instrument.to_string(),
            datetime: Utc::now(),
            bid_price: Some(round2(bid)),
            ask_price: Some(round2(ask)),
            last_price: Some(round2(self.last_price)),
            volume: Some(self.rng.random_range(1..=10)),
        }
    }
}

/// Contiguous bars from `start` (inclusive) to `end` (exclusive); each open
/// is the previous close. Generation stops early if the next step would
/// leave the representable date range.
fn generate_bars(
    rng: &mut StdRng,
    instrument: &str,
    timeframe: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<Bar> {
    let step = interval_for(timeframe);
    let mut bars = Vec::new();
    let mut current = start;
    let mut price = round2(rng.random_range(1000.0..5000.0));

    while current < end {
        let high = round2(price + rng.random_range(0.0..=5.0));
        let low = round2(price - rng.random_range(0.0..=5.0));
        let close = round2(rng.random_range(low..=high)).clamp(low, high);
        bars.push(Bar {
            instrument: instrument.to_string(),
            timeframe: timeframe.to_string(),
            datetime: current,
            open_price: price,
            high_price: high,
            low_price: low,
            close_price: close,
            volume: rng.random_range(10..=1000),
        });
        price = close;
        match current.checked_add_signed(step) {
            Some(next) => current = next,
            None => break,
        }
    }
    bars
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use crossbeam::channel;
    use mdkit::Tick;
    use parking_lot::Mutex;

    use super::{SimulatedConfig, SimulatedConnector};
    use crate::error::ConnectorError;
    use crate::protocol::Connector;

    fn fast_connector() -> SimulatedConnector {
        SimulatedConnector::new(SimulatedConfig {
            tick_interval: Duration::from_millis(10),
            connect_latency: Duration::ZERO,
            join_timeout: Duration::from_secs(1),
            seed: Some(7),
        })
    }

    #[test]
    fn history_is_contiguous_and_consistent() {
        let connector = fast_connector();
        connector.connect().expect("connect should succeed");

        let start = Utc.with_ymd_and_hms(2025, 1, 2, 9, 0, 0).unwrap();
        let end = start + ChronoDuration::hours(1);
        let bars = connector
            .request_historical_data("ES 12-25", "5m", start, end)
            .expect("history should be generated");

        assert_eq!(bars.len(), 12);
        assert_eq!(bars[0].datetime, start);
        for pair in bars.windows(2) {
            assert_eq!(pair[1].datetime - pair[0].datetime, ChronoDuration::minutes(5));
            assert_eq!(pair[1].open_price, pair[0].close_price);
        }
        for bar in &bars {
            assert!(bar.is_consistent(), "inconsistent bar {bar:?}");
            assert!(bar.high_price - bar.open_price <= 5.0 + 1e-9);
            assert!(bar.open_price - bar.low_price <= 5.0 + 1e-9);
            assert!((10..=1000).contains(&bar.volume));
            assert_eq!(bar.instrument, "ES 12-25");
            assert_eq!(bar.timeframe, "5m");
        }
        assert!((1000.0..5000.0).contains(&bars[0].open_price) || bars[0].open_price == 5000.0);
    }

    #[test]
    fn empty_window_yields_no_bars() {
        let connector = fast_connector();
        connector.connect().expect("connect should succeed");
        let start = Utc::now();
        let bars = connector
            .request_historical_data("ES", "1m", start, start)
            .expect("history should be generated");
        assert!(bars.is_empty());
    }

    #[test]
    fn oversized_step_stops_at_date_range_limit() {
        let connector = fast_connector();
        connector.connect().expect("connect should succeed");
        let end = Utc::now();
        let bars = connector
            .request_historical_data("ES", "3000000000h", end - ChronoDuration::hours(1), end)
            .expect("history should be generated");
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].timeframe, "3000000000h");
    }

    #[test]
    fn operations_require_connection() {
        let connector = fast_connector();
        let now = Utc::now();
        assert!(matches!(
            connector.request_historical_data("ES", "1m", now, now),
            Err(ConnectorError::ConnectionFailure(_))
        ));
        assert!(matches!(
            connector.subscribe_market_data("ES", Box::new(|_| {})),
            Err(ConnectorError::ConnectionFailure(_))
        ));
    }

    #[test]
    fn ticks_keep_bid_last_ask_order() {
        let connector = fast_connector();
        connector.connect().expect("connect should succeed");
        let (tx, rx) = channel::unbounded::<Tick>();

        let subscription = connector
            .subscribe_market_data("ES", Box::new(move |tick| {
                let _ = tx.send(tick);
            }))
            .expect("subscribe should succeed");

        let mut received = Vec::new();
        while received.len() < 5 {
            let tick = rx
                .recv_timeout(Duration::from_secs(1))
                .expect("tick should arrive");
            received.push(tick);
        }
        subscription.cancel().expect("cancel should succeed");

        for tick in &received {
            let bid = tick.bid_price.expect("bid");
            let ask = tick.ask_price.expect("ask");
            let last = tick.last_price.expect("last");
            assert!(bid <= last && last <= ask, "bad tick {tick:?}");
            assert!(tick.spread().expect("spread") > 0.0);
            assert!((1..=10).contains(&tick.volume.expect("volume")));
            assert_eq!(tick.instrument, "ES");
        }
        for pair in received.windows(2) {
            assert!(pair[0].datetime <= pair[1].datetime);
        }
    }

    #[test]
    fn no_ticks_after_cancel_returns() {
        let connector = fast_connector();
        connector.connect().expect("connect should succeed");
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);

        let subscription = connector
            .subscribe_market_data("ES", Box::new(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            }))
            .expect("subscribe should succeed");
        subscription.cancel().expect("cancel should succeed");

        let after_cancel = count.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(count.load(Ordering::SeqCst), after_cancel);
        assert_eq!(connector.active_subscriptions(), 0);
    }

    #[test]
    fn panicking_callback_does_not_stop_stream() {
        let connector = fast_connector();
        connector.connect().expect("connect should succeed");
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let subscription = connector
            .subscribe_market_data("ES", Box::new(move |_| {
                let call = counter.fetch_add(1, Ordering::SeqCst);
                if call == 0 {
                    panic!("first tick rejected");
                }
            }))
            .expect("subscribe should succeed");

        let mut waited = 0;
        while calls.load(Ordering::SeqCst) < 3 && waited < 100 {
            thread::sleep(Duration::from_millis(10));
            waited += 1;
        }
        subscription.cancel().expect("cancel should succeed");
        assert!(calls.load(Ordering::SeqCst) >= 3);
    }

    #[test]
    fn disconnect_stops_every_stream() {
        let connector = fast_connector();
        connector.connect().expect("connect should succeed");
        let ticks = Arc::new(Mutex::new(Vec::<Tick>::new()));

        for instrument in ["ES", "NQ", "CL"] {
            let sink = Arc::clone(&ticks);
            connector
                .subscribe_market_data(instrument, Box::new(move |tick| sink.lock().push(tick)))
                .expect("subscribe should succeed");
        }
        assert_eq!(connector.active_subscriptions(), 3);
        thread::sleep(Duration::from_millis(30));

        connector.disconnect();
        assert!(!connector.is_connected());
        assert_eq!(connector.active_subscriptions(), 0);

        let after_disconnect = ticks.lock().len();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(ticks.lock().len(), after_disconnect);
    }

    #[test]
    fn disconnect_races_with_subscribers() {
        let connector = Arc::new(fast_connector());
        connector.connect().expect("connect should succeed");
        let ticks = Arc::new(AtomicUsize::new(0));

        let subscribers = (0..4)
            .map(|index| {
                let connector = Arc::clone(&connector);
                let ticks = Arc::clone(&ticks);
                thread::spawn(move || {
                    let mut opened = 0;
                    loop {
                        let sink = Arc::clone(&ticks);
                        let result = connector.subscribe_market_data(
                            &format!("I{index}"),
                            Box::new(move |_| {
                                sink.fetch_add(1, Ordering::SeqCst);
                            }),
                        );
                        match result {
                            Ok(_) => opened += 1,
                            Err(err) => {
                                assert!(matches!(err, ConnectorError::ConnectionFailure(_)), "{err}");
                                return opened;
                            }
                        }
                        thread::sleep(Duration::from_millis(2));
                    }
                })
            })
            .collect::<Vec<_>>();

        thread::sleep(Duration::from_millis(40));
        connector.disconnect();
        let opened: usize = subscribers
            .into_iter()
            .map(|handle| handle.join().expect("subscriber thread should finish"))
            .sum();

        assert!(opened > 0);
        assert_eq!(connector.active_subscriptions(), 0);
        let after_disconnect = ticks.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(ticks.load(Ordering::SeqCst), after_disconnect);
    }

    #[test]
    fn disconnect_without_streams_is_safe() {
        let connector = fast_connector();
        connector.disconnect();
        connector.connect().expect("connect should succeed");
        connector.disconnect();
        connector.disconnect();
        assert!(!connector.is_connected());
    }

    #[test]
    fn reconnect_allows_new_streams() {
        let connector = fast_connector();
        connector.connect().expect("connect should succeed");
        connector.disconnect();
        connector.connect().expect("reconnect should succeed");

        let (tx, rx) = channel::unbounded::<Tick>();
        let subscription = connector
            .subscribe_market_data("ES", Box::new(move |tick| {
                let _ = tx.send(tick);
            }))
            .expect("subscribe should succeed");
        assert!(rx.recv_timeout(Duration::from_secs(1)).is_ok());
        subscription.cancel().expect("cancel should succeed");
    }

    #[test]
    fn concurrent_subscribe_and_cancel() {
        let connector = Arc::new(fast_connector());
        connector.connect().expect("connect should succeed");

        let handles = (0..4)
            .map(|index| {
                let connector = Arc::clone(&connector);
                thread::spawn(move || {
                    for _ in 0..5 {
                        let subscription = connector
                            .subscribe_market_data(&format!("I{index}"), Box::new(|_| {}))
                            .expect("subscribe should succeed");
                        subscription.cancel().expect("cancel should succeed");
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().expect("worker thread should finish");
        }

        assert_eq!(connector.active_subscriptions(), 0);
        connector.disconnect();
    }
}
