pub mod policy;

pub use policy::{RetryPolicy, DEFAULT_MAX_RETRIES};
