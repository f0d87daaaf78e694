use std::net::SocketAddr;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::Datagram;

/// Drains the intake FIFO toward the downstream collector.
///
/// With no target configured the datagrams are consumed and discarded,
/// which keeps the FIFO from filling while only admission is wanted.
pub struct UdpForwarder {
    socket: UdpSocket,
    target: Option<SocketAddr>,
}

impl UdpForwarder {
    pub async fn new(target: Option<SocketAddr>) -> std::io::Result<Self> {
        let bind: SocketAddr = match target {
            Some(SocketAddr::V6(_)) => SocketAddr::from(([0u16; 8], 0)),
            _ => SocketAddr::from(([0u8; 4], 0)),
        };
        let socket = UdpSocket::bind(bind).await?;
        Ok(Self { socket, target })
    }

    /// Run until `cancel` fires or every sender is gone. Returns the
    /// number of datagrams sent downstream.
    pub async fn run(self, mut fifo: mpsc::Receiver<Datagram>, cancel: CancellationToken) -> u64 {
        let mut forwarded = 0u64;
        loop {
            let datagram = tokio::select! {
                () = cancel.cancelled() => break,
                next = fifo.recv() => match next {
                    Some(d) => d,
                    None => break,
                },
            };
            let Some(target) = self.target else {
                continue;
            };
            match self.socket.send_to(&datagram.payload, target).await {
                Ok(_) => forwarded += 1,
                Err(e) => {
                    tracing::warn!(peer = %datagram.peer, target = %target, error = %e, "UDP forward failed");
                }
            }
        }
        tracing::info!(forwarded, "UDP forwarder stopped");
        forwarded
    }
}
