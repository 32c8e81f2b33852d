use async_trait::async_trait;

use crate::errors::TransportError;
use crate::events::Event;

/// Delivers one batch of events to the analytics backend.
///
/// The pipeline never imposes a timeout on `send`; that policy belongs to
/// the implementation.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, batch: &[Event]) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Attributes;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTransport {
        delivered: AtomicUsize,
    }

    #[async_trait]
    impl Transport for CountingTransport {
        fn name(&self) -> &str {
            "counting"
        }

        async fn send(&self, batch: &[Event]) -> Result<(), TransportError> {
            self.delivered.fetch_add(batch.len(), Ordering::Relaxed);
            Ok(())
        }
    }

    #[tokio::test]
    async fn transport_is_object_safe() {
        let transport: std::sync::Arc<dyn Transport> = std::sync::Arc::new(CountingTransport {
            delivered: AtomicUsize::new(0),
        });
        let batch = vec![
            Event::new("a", Attributes::new()),
            Event::new("b", Attributes::new()),
        ];
        transport.send(&batch).await.unwrap();
        assert_eq!(transport.name(), "counting");
    }
}
