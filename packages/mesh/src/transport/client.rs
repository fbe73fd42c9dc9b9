// packages/mesh/src/transport/client.rs
//! Worker side of the host connection

use crate::grpc::proto::agent_host_client::AgentHostClient;
use crate::grpc::proto::{HostFrame, WorkerFrame};
use crate::transport::frame_sink::{channel, FrameSink};
use crate::utils::config::WorkerConfig;
use crate::utils::errors::{MeshError, Result};
use tonic::transport::Endpoint;
use tonic::Streaming;
use tracing::{debug, info};

/// An open worker <-> host channel
pub struct WorkerChannel {
    /// Frames towards the host
    pub sink: FrameSink<WorkerFrame>,

    /// Frames from the host
    pub inbound: Streaming<HostFrame>,
}

/// Dial the host and open the duplex channel
pub async fn connect(config: &WorkerConfig) -> Result<WorkerChannel> {
    let uri = config.endpoint_uri();
    debug!("Connecting to host at {}", uri);

    let endpoint = Endpoint::from_shared(uri.clone())?
        .connect_timeout(config.connect_timeout())
        .tcp_nodelay(true);

    let transport = tokio::time::timeout(config.connect_timeout(), endpoint.connect())
        .await
        .map_err(|_| MeshError::ConnectTimeout(uri.clone()))??;

    let mut client = AgentHostClient::new(transport);
    let (sink, outbound) = channel::<WorkerFrame>(config.outbound_capacity, uri.clone());

    let response = tokio::time::timeout(config.connect_timeout(), client.open_channel(outbound))
        .await
        .map_err(|_| MeshError::ConnectTimeout(uri.clone()))??;

    info!("Opened channel to host at {}", uri);

    Ok(WorkerChannel {
        sink,
        inbound: response.into_inner(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_to_missing_host_fails() {
        // Nothing listens on port 1
        let config = WorkerConfig {
            connect_timeout_ms: 500,
            ..WorkerConfig::for_host("127.0.0.1:1")
        };

        let result = connect(&config).await;
        assert!(result.is_err());
    }
}
