use std::future::Future;
use std::pin::Pin;

use domain::common::error::DomainError;
use domain::ingest::entity::CanonicalFlow;

/// Downstream destination for admitted, enriched flows.
///
/// Uses `Pin<Box<dyn Future>>` so sinks can be held as `Arc<dyn FlowSink>`.
/// A failed delivery is dead-lettered by the caller.
pub trait FlowSink: Send + Sync {
    fn name(&self) -> &str;

    fn deliver<'a>(
        &'a self,
        flows: &'a [CanonicalFlow],
    ) -> Pin<Box<dyn Future<Output = Result<(), DomainError>> + Send + 'a>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DummySink;
    impl FlowSink for DummySink {
        fn name(&self) -> &str {
            "dummy"
        }

        fn deliver<'a>(
            &'a self,
            _flows: &'a [CanonicalFlow],
        ) -> Pin<Box<dyn Future<Output = Result<(), DomainError>> + Send + 'a>> {
            Box::pin(async { Ok(()) })
        }
    }

    #[test]
    fn sink_trait_is_implementable() {
        fn _assert_send_sync<T: FlowSink>() {}
        _assert_send_sync::<DummySink>();
    }
}
