pub mod engine;
pub mod error;
pub mod http;

pub use engine::{PutTransport, RetryPolicy, TransferEngine, TransferReport, MAX_RETRIES, RETRY_DELAY_BASE};
pub use error::{TransferError, TransferResult};
pub use http::HttpPutTransport;
