use std::future::Future;
use std::pin::Pin;

use domain::common::error::DomainError;
use domain::ingest::entity::CanonicalFlow;
use ports::secondary::flow_sink::FlowSink;

/// Sink that writes each flow as a structured `info` event.
///
/// Used when no external destination is configured, so admitted flows
/// are always observable somewhere.
pub struct LogSink {
    name: String,
}

impl LogSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl FlowSink for LogSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn deliver<'a>(
        &'a self,
        flows: &'a [CanonicalFlow],
    ) -> Pin<Box<dyn Future<Output = Result<(), DomainError>> + Send + 'a>> {
        Box::pin(async move {
            for flow in flows {
                tracing::info!(
                    sink = %self.name,
                    src_addr = %flow.src_addr,
                    dst_addr = %flow.dst_addr,
                    src_port = flow.src_port,
                    dst_port = flow.dst_port,
                    protocol = %flow.protocol,
                    bytes = flow.bytes,
                    packets = flow.packets,
                    annotations = flow.annotations.len(),
                    "flow exported"
                );
            }
            Ok(())
        })
    }
}
