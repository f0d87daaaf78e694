//! Listener configuration.

use serde::{Deserialize, Serialize};

use super::common::{ConfigError, default_true, require_nonzero};
use crate::constants::{
    DEFAULT_BIND_ADDRESS, DEFAULT_BODY_LIMIT_BYTES, DEFAULT_FIFO_CAPACITY, DEFAULT_HTTP_PORT,
    DEFAULT_MAX_RECORDS_PER_REQUEST, DEFAULT_UDP_PORT,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Set to `0.0.0.0` to listen on all interfaces.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_http_port")]
    pub http_port: u16,

    #[serde(default = "default_true")]
    pub udp_enabled: bool,

    /// Port for raw NetFlow/IPFIX datagrams. Also reported by the
    /// allowlist status endpoint.
    #[serde(default = "default_udp_port")]
    pub udp_port: u16,

    /// Downstream `host:port` that admitted datagrams are forwarded to.
    /// Without it admitted datagrams are only counted.
    #[serde(default)]
    pub udp_forward_to: Option<String>,

    #[serde(default = "default_fifo_capacity")]
    pub fifo_capacity: usize,

    /// Cap on the decompressed `/ingest` body.
    #[serde(default = "default_body_limit_bytes")]
    pub body_limit_bytes: usize,

    #[serde(default = "default_max_records_per_request")]
    pub max_records_per_request: usize,
}

fn default_bind_address() -> String {
    DEFAULT_BIND_ADDRESS.to_string()
}
fn default_http_port() -> u16 {
    DEFAULT_HTTP_PORT
}
fn default_udp_port() -> u16 {
    DEFAULT_UDP_PORT
}
fn default_fifo_capacity() -> usize {
    DEFAULT_FIFO_CAPACITY
}
fn default_body_limit_bytes() -> usize {
    DEFAULT_BODY_LIMIT_BYTES
}
fn default_max_records_per_request() -> usize {
    DEFAULT_MAX_RECORDS_PER_REQUEST
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            http_port: default_http_port(),
            udp_enabled: true,
            udp_port: default_udp_port(),
            udp_forward_to: None,
            fifo_capacity: default_fifo_capacity(),
            body_limit_bytes: default_body_limit_bytes(),
            max_records_per_request: default_max_records_per_request(),
        }
    }
}

impl ServerConfig {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if self.bind_address.parse::<std::net::IpAddr>().is_err() {
            return Err(ConfigError::Validation {
                field: "server.bind_address".to_string(),
                message: format!("'{}' is not an IP address", self.bind_address),
            });
        }
        require_nonzero("server.http_port", u64::from(self.http_port))?;
        require_nonzero("server.udp_port", u64::from(self.udp_port))?;
        require_nonzero("server.fifo_capacity", self.fifo_capacity as u64)?;
        require_nonzero("server.body_limit_bytes", self.body_limit_bytes as u64)?;
        require_nonzero(
            "server.max_records_per_request",
            self.max_records_per_request as u64,
        )?;
        if let Some(ref target) = self.udp_forward_to
            && target.parse::<std::net::SocketAddr>().is_err()
        {
            return Err(ConfigError::Validation {
                field: "server.udp_forward_to".to_string(),
                message: format!("'{target}' is not a host:port socket address"),
            });
        }
        Ok(())
    }
}
