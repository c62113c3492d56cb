pub mod calendar;
pub mod due;
pub mod registry;

pub use calendar::{days_in_month, is_market_open, is_trading_day, most_recent_on_or_before};
pub use due::is_due;
pub use registry::{Category, ScheduleRegistry, ScheduleRule};
