mod executor;
mod options;
mod outcome;
mod report;
mod sink;
mod worker;

pub use options::{ConsumerOptions, DEFAULT_TOPIC, PREFETCH};
pub use outcome::{AckDecision, Outcome};
pub use report::{ConsumerStats, DeliveryReport, ExhaustedReport};
pub use sink::{FailureSink, LogSink, MemorySink};
pub use worker::{Consumer, DELIVERY_LOG_TARGET};
