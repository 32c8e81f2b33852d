pub mod http;
pub mod mock;

pub use http::{HttpTransport, HttpTransportConfig};
pub use mock::{MockOutcome, MockTransport};
