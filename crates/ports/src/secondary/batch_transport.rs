use std::future::Future;
use std::pin::Pin;

use domain::common::error::DomainError;
use domain::ingest::payload::EncodedBatch;

/// Delivers encoded mapper batches to the gateway intake endpoint.
///
/// `Ok(status)` carries whatever HTTP status the gateway answered with;
/// the caller classifies it. `Err` is reserved for failures that never
/// produced a response (connect, reset, timeout).
pub trait BatchTransport: Send + Sync {
    fn send<'a>(
        &'a self,
        batch: &'a EncodedBatch,
        trace_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<u16, DomainError>> + Send + 'a>>;
}
