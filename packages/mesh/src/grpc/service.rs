// packages/mesh/src/grpc/service.rs
//! `AgentHost` gRPC service
//!
//! Each `OpenChannel` call is one worker connection. The response stream is
//! the host -> worker half; a spawned task reads the worker -> host half and
//! feeds it to the router one frame at a time.

use crate::grpc::convert::rejection_frame;
use crate::grpc::proto::agent_host_server::{AgentHost, AgentHostServer};
use crate::grpc::proto::{worker_frame, HostFrame, WorkerFrame};
use crate::host::router::{ConnectionId, Router};
use crate::transport::{self, CloseReason, Flow};
use crate::utils::errors::MeshError;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, info, warn};

pub struct AgentHostService {
    router: Arc<Router>,
    channel_capacity: usize,
    shutdown: CancellationToken,
}

impl AgentHostService {
    pub fn new(router: Arc<Router>, channel_capacity: usize, shutdown: CancellationToken) -> Self {
        Self {
            router,
            channel_capacity,
            shutdown,
        }
    }

    pub fn into_service(self) -> AgentHostServer<Self> {
        AgentHostServer::new(self)
    }
}

#[tonic::async_trait]
impl AgentHost for AgentHostService {
    type OpenChannelStream = ReceiverStream<Result<HostFrame, Status>>;

    async fn open_channel(
        &self,
        request: Request<Streaming<WorkerFrame>>,
    ) -> Result<Response<Self::OpenChannelStream>, Status> {
        if self.shutdown.is_cancelled() {
            return Err(Status::unavailable("host is shutting down"));
        }

        let peer = request
            .remote_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let inbound = request.into_inner();

        let (sink, outbound) = transport::channel(self.channel_capacity, peer.clone());
        let id = self.router.open(peer.clone(), sink);
        info!("Accepted worker channel {} from {}", id, peer);

        let router = Arc::clone(&self.router);
        let cancel = self.shutdown.child_token();
        tokio::spawn(async move {
            let reason = transport::drive(inbound, cancel, &peer, |frame| {
                let router = Arc::clone(&router);
                async move { handle_worker_frame(&router, id, frame).await }
            })
            .await;

            match reason {
                CloseReason::Error(e) => warn!("Connection {} failed: {}", id, e),
                other => debug!("Connection {} ended: {:?}", id, other),
            }
            router.close(id);
        });

        Ok(Response::new(outbound))
    }
}

async fn handle_worker_frame(router: &Router, id: ConnectionId, frame: WorkerFrame) -> Flow {
    match frame.frame {
        Some(worker_frame::Frame::Hello(hello)) => match router.register(id, hello).await {
            Ok(()) => Flow::Continue,
            Err(e) => {
                warn!("Registration on {} rejected: {}", id, e);
                reject(router, id, &e, "");
                Flow::Stop
            }
        },
        Some(worker_frame::Frame::Envelope(envelope)) => {
            let message_id = envelope.message_id.clone();
            match router.route(id, envelope) {
                Ok(_) => Flow::Continue,
                Err(e @ MeshError::TransportClosed(_)) => {
                    debug!("Dropping frame on closed connection {}: {}", id, e);
                    Flow::Stop
                }
                Err(e) => {
                    warn!("Envelope {} from {} rejected: {}", message_id, id, e);
                    reject(router, id, &e, message_id);
                    Flow::Continue
                }
            }
        }
        None => {
            let e = MeshError::Protocol("empty worker frame".to_string());
            reject(router, id, &e, "");
            Flow::Continue
        }
    }
}

fn reject(router: &Router, id: ConnectionId, error: &MeshError, message_id: impl Into<String>) {
    if let Err(e) = router.send_to(id, rejection_frame(error, message_id)) {
        debug!("Could not send rejection to {}: {}", id, e);
    }
}
