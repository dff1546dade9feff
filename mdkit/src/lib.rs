pub mod bar;
pub mod logging;
pub mod order_book;
pub mod tick;
pub mod timeframe;

pub use bar::Bar;
pub use logging::init_logging;
pub use order_book::{OrderBookSnapshot, PriceLevel};
pub use tick::Tick;
pub use timeframe::{daily_label, interval_for, is_daily, DAILY_LABEL};
