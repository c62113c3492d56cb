pub mod aggregator;

pub use aggregator::{
    AggregatorConfig, AggregatorHandle, OverflowCheck, PendingUpdateRecord, UpdateEventAggregator,
    UpdateNotification, UpdateSender, DEFAULT_FLUSH_THRESHOLD,
};
