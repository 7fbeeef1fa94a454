pub mod memory_transport;
pub mod sqlite_transport;
pub use memory_transport::{MemoryTransport, TransportCall};
pub use sqlite_transport::SqliteTransport;
