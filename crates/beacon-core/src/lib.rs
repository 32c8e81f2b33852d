pub mod consent;
pub mod errors;
pub mod events;
pub mod ids;
pub mod storage;
pub mod transport;

pub use consent::{ConsentDecision, ConsentPrompt, ConsentState};
pub use errors::{StoreError, TransportError};
pub use events::{AttrValue, Attributes, Event};
pub use ids::{BatchId, EventId};
pub use storage::KeyValueStore;
pub use transport::Transport;
