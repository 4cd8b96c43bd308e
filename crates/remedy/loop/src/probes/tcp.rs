//! TCP connectivity probe for storage endpoints.

use async_trait::async_trait;
use remedy_types::{ProbeId, ProbeKind};
use tokio::net::TcpStream;
use tracing::instrument;

use super::{Probe, ProbeReading};
use crate::error::{ProbeError, ProbeResult};

/// Storage probe: healthy when a TCP connection to `address` succeeds.
///
/// Connection errors are returned as [`ProbeError::Connection`], which the
/// detector turns into a failing signal.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    id: ProbeId,
    address: String,
}

impl TcpProbe {
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: ProbeId::new(id),
            address: address.into(),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

#[async_trait]
impl Probe for TcpProbe {
    fn id(&self) -> &ProbeId {
        &self.id
    }

    fn kind(&self) -> ProbeKind {
        ProbeKind::Storage
    }

    #[instrument(skip(self), fields(probe = %self.id, address = %self.address))]
    async fn probe(&self) -> ProbeResult<ProbeReading> {
        match TcpStream::connect(&self.address).await {
            Ok(_) => Ok(ProbeReading::healthy(format!(
                "connected to {}",
                self.address
            ))),
            Err(e) => Err(ProbeError::Connection(format!(
                "storage at {} unreachable: {}",
                self.address, e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_probe_connects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let probe = TcpProbe::new("db", addr.to_string());
        assert_eq!(probe.kind(), ProbeKind::Storage);
        let reading = probe.probe().await.unwrap();
        assert!(reading.ok);
    }

    #[tokio::test]
    async fn test_tcp_probe_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = TcpProbe::new("db", addr.to_string()).probe().await.unwrap_err();
        assert!(matches!(err, ProbeError::Connection(_)));
    }
}
