use std::net::SocketAddr;
use std::sync::Arc;

use application::admission_service::AdmissionService;
use domain::admission::entity::IntakePath;
use infrastructure::constants::MAX_DATAGRAM_BYTES;
use ports::secondary::metrics_port::MetricsPort;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::Datagram;

/// UDP receive loop.
///
/// Each datagram is attributed to a source by sender address, checked
/// against admission (one datagram counts as one record), and pushed
/// into the bounded FIFO. A full FIFO drops the datagram instead of
/// stalling the socket.
pub struct UdpListener {
    socket: UdpSocket,
    admission: Arc<AdmissionService>,
    metrics: Arc<dyn MetricsPort>,
}

impl UdpListener {
    pub async fn bind(
        addr: SocketAddr,
        admission: Arc<AdmissionService>,
        metrics: Arc<dyn MetricsPort>,
    ) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        tracing::info!(addr = %socket.local_addr()?, "UDP intake listening");
        Ok(Self {
            socket,
            admission,
            metrics,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Receive until `cancel` fires. Socket errors are logged and the
    /// loop keeps going.
    pub async fn run(self, fifo: mpsc::Sender<Datagram>, cancel: CancellationToken) {
        let mut buf = vec![0u8; MAX_DATAGRAM_BYTES];
        loop {
            let (len, peer) = tokio::select! {
                () = cancel.cancelled() => break,
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::warn!(error = %e, "UDP receive failed");
                        continue;
                    }
                },
            };
            self.metrics.record_udp_packet();

            if !self.admit(peer) {
                continue;
            }
            let datagram = Datagram {
                peer,
                payload: buf[..len].to_vec(),
            };
            if fifo.try_send(datagram).is_err() {
                self.metrics.record_fifo_dropped();
                tracing::debug!(peer = %peer, "FIFO full, dropping datagram");
            }
        }
        tracing::info!("UDP intake stopped");
    }

    fn admit(&self, peer: SocketAddr) -> bool {
        let source_id = self.admission.resolve_source(peer.ip()).unwrap_or_default();
        self.admission
            .check(IntakePath::Udp, &source_id, peer.ip(), 1)
            .allowed()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use application::change_history::ChangeHistory;
    use application::feature_flag_service::FeatureFlagService;
    use application::source_registry::{RegistrySettings, SourceRegistry};
    use domain::admission::flags::FeatureFlags;
    use domain::source::entity::{HealthStatus, Source, SourceStatus};
    use ports::test_utils::{InMemorySourceRepository, RecordingMetrics};

    use super::*;

    fn make_source(id: &str, allowed: &str, status: SourceStatus) -> Source {
        Source {
            id: id.to_string(),
            tenant_id: "t".to_string(),
            source_type: "netflow".to_string(),
            status,
            health_status: HealthStatus::Stale,
            allowed_ips: vec![allowed.to_string()],
            max_eps: 0,
            block_on_exceed: true,
            description: None,
            created_at_ms: 0,
            updated_at_ms: 0,
        }
    }

    fn make_admission(
        sources: Vec<Source>,
        flags: FeatureFlags,
        metrics: Arc<RecordingMetrics>,
    ) -> Arc<AdmissionService> {
        let history = Arc::new(ChangeHistory::default());
        let registry = Arc::new(SourceRegistry::new(
            Arc::new(InMemorySourceRepository::with_sources(sources)),
            RegistrySettings::default(),
            Arc::clone(&history),
        ));
        registry.refresh().unwrap();
        let flags = Arc::new(FeatureFlagService::new(flags, history));
        Arc::new(AdmissionService::new(registry, flags, metrics))
    }

    async fn make_listener(
        admission: Arc<AdmissionService>,
        metrics: Arc<RecordingMetrics>,
    ) -> (UdpListener, SocketAddr) {
        let listener = UdpListener::bind("127.0.0.1:0".parse().unwrap(), admission, metrics)
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        (listener, addr)
    }

    #[tokio::test]
    async fn admitted_datagram_reaches_fifo() {
        let metrics = Arc::new(RecordingMetrics::default());
        let admission = make_admission(
            vec![make_source("lo", "127.0.0.0/8", SourceStatus::Enabled)],
            FeatureFlags {
                udp_enabled: true,
                log_only: false,
                ..FeatureFlags::default()
            },
            Arc::clone(&metrics),
        );
        let (listener, addr) = make_listener(admission, Arc::clone(&metrics)).await;
        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(listener.run(tx, cancel.clone()));

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender.send_to(b"netflow-v5", addr).await.unwrap();

        let got = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.payload, b"netflow-v5");
        cancel.cancel();
        task.await.unwrap();
        assert_eq!(metrics.count_prefix("udp_packet"), 1);
    }

    #[tokio::test]
    async fn blocked_datagram_is_counted_not_forwarded() {
        let metrics = Arc::new(RecordingMetrics::default());
        let admission = make_admission(
            vec![make_source("lo", "127.0.0.0/8", SourceStatus::Disabled)],
            FeatureFlags {
                udp_enabled: true,
                log_only: false,
                fail_open: false,
                ..FeatureFlags::default()
            },
            Arc::clone(&metrics),
        );
        let (listener, addr) = make_listener(admission, Arc::clone(&metrics)).await;
        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(listener.run(tx, cancel.clone()));

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender.send_to(b"x", addr).await.unwrap();

        let got = tokio::time::timeout(Duration::from_millis(300), rx.recv()).await;
        assert!(got.is_err(), "blocked datagram must not be queued");
        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn full_fifo_drops_and_counts() {
        let metrics = Arc::new(RecordingMetrics::default());
        let admission = make_admission(Vec::new(), FeatureFlags::default(), Arc::clone(&metrics));
        let (listener, addr) = make_listener(admission, Arc::clone(&metrics)).await;
        let (tx, _rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(listener.run(tx, cancel.clone()));

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        for _ in 0..3 {
            sender.send_to(b"x", addr).await.unwrap();
        }
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while metrics.count_prefix("fifo_dropped") < 2 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cancel.cancel();
        task.await.unwrap();
        assert_eq!(metrics.count_prefix("fifo_dropped"), 2);
    }
}
