// packages/mesh/src/host/host_runtime.rs
//! Host process lifecycle: bind, serve, shut down

use crate::grpc::proto;
use crate::grpc::AgentHostService;
use crate::host::router::Router;
use crate::host::subscription_table::Subscription;
use crate::utils::config::HostConfig;
use crate::utils::errors::{MeshError, Result};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tracing::{debug, error, info, warn};

/// Host lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for HostState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

struct Serving {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    server: JoinHandle<std::result::Result<(), tonic::transport::Error>>,
}

struct HostInner {
    config: HostConfig,
    state: RwLock<HostState>,
    router: Arc<Router>,
    serving: Mutex<Option<Serving>>,
}

/// Handle to the host process; cheap to clone
#[derive(Clone)]
pub struct HostHandle {
    inner: Arc<HostInner>,
}

impl HostHandle {
    pub fn new(config: HostConfig) -> Self {
        let router = Arc::new(Router::new(config.deliver_to_origin));
        Self {
            inner: Arc::new(HostInner {
                config,
                state: RwLock::new(HostState::Stopped),
                router,
                serving: Mutex::new(None),
            }),
        }
    }

    /// Host with default settings listening on `address`
    pub fn bind(address: impl Into<String>) -> Self {
        Self::new(HostConfig {
            address: address.into(),
            ..HostConfig::default()
        })
    }

    pub fn state(&self) -> HostState {
        *self.inner.state.read()
    }

    /// Bound address while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.serving.lock().as_ref().map(|s| s.local_addr)
    }

    pub fn router(&self) -> &Router {
        &self.inner.router
    }

    pub fn connection_count(&self) -> usize {
        self.inner.router.connection_count()
    }

    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.inner.router.subscriptions()
    }

    fn transition(&self, from: HostState, to: HostState) -> Result<()> {
        let mut state = self.inner.state.write();
        if *state != from {
            return Err(MeshError::InvalidState {
                expected: match from {
                    HostState::Stopped => "Stopped",
                    HostState::Starting => "Starting",
                    HostState::Running => "Running",
                    HostState::Stopping => "Stopping",
                },
                actual: state.to_string(),
            });
        }
        *state = to;
        Ok(())
    }

    /// Bind the listener and start accepting workers
    ///
    /// Returns the bound address; port `0` in the configured address picks
    /// a free port.
    pub async fn start(&self) -> Result<SocketAddr> {
        self.transition(HostState::Stopped, HostState::Starting)?;

        match self.serve().await {
            Ok(addr) => {
                *self.inner.state.write() = HostState::Running;
                info!("Agent host listening on {}", addr);
                Ok(addr)
            }
            Err(e) => {
                error!("Agent host failed to start: {}", e);
                *self.inner.state.write() = HostState::Stopped;
                Err(e)
            }
        }
    }

    async fn serve(&self) -> Result<SocketAddr> {
        let config = &self.inner.config;
        let listener = TcpListener::bind(config.socket_addr()?).await?;
        let local_addr = listener.local_addr()?;

        let shutdown = CancellationToken::new();
        let service = AgentHostService::new(
            Arc::clone(&self.inner.router),
            config.channel_capacity,
            shutdown.clone(),
        );

        let reflection = if config.enable_reflection {
            let reflection = tonic_reflection::server::Builder::configure()
                .register_encoded_file_descriptor_set(proto::FILE_DESCRIPTOR_SET)
                .build()
                .map_err(|e| MeshError::ConfigError(format!("reflection service: {}", e)))?;
            Some(reflection)
        } else {
            None
        };

        let routes = Server::builder()
            .add_service(service.into_service())
            .add_optional_service(reflection);

        let signal = shutdown.clone();
        let server = tokio::spawn(async move {
            routes
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                    signal.cancelled().await;
                })
                .await
        });

        *self.inner.serving.lock() = Some(Serving {
            local_addr,
            shutdown,
            server,
        });
        Ok(local_addr)
    }

    /// Close every worker connection and stop serving
    pub async fn stop(&self) -> Result<()> {
        self.transition(HostState::Running, HostState::Stopping)?;

        let closed = self.inner.router.close_all();
        debug!("Closed {} worker connections", closed);

        let serving = self.inner.serving.lock().take();
        if let Some(serving) = serving {
            serving.shutdown.cancel();

            let grace = self.inner.config.shutdown_grace();
            let abort = serving.server.abort_handle();
            match tokio::time::timeout(grace, serving.server).await {
                Ok(Ok(Ok(()))) => debug!("gRPC server stopped"),
                Ok(Ok(Err(e))) => warn!("gRPC server error during shutdown: {}", e),
                Ok(Err(e)) => warn!("gRPC server task failed: {}", e),
                Err(_) => {
                    warn!("gRPC server did not stop within {:?}, aborting", grace);
                    abort.abort();
                }
            }
        }

        *self.inner.state.write() = HostState::Stopped;
        info!("Agent host stopped");
        Ok(())
    }
}

impl Drop for HostInner {
    fn drop(&mut self) {
        if let Some(serving) = self.serving.get_mut().take() {
            serving.shutdown.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ephemeral() -> HostHandle {
        HostHandle::bind("127.0.0.1:0")
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let host = ephemeral();
        assert_eq!(host.state(), HostState::Stopped);

        let addr = host.start().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(host.state(), HostState::Running);
        assert_eq!(host.local_addr(), Some(addr));
        assert_eq!(host.connection_count(), 0);

        host.stop().await.unwrap();
        assert_eq!(host.state(), HostState::Stopped);
        assert_eq!(host.local_addr(), None);
    }

    #[tokio::test]
    async fn test_double_start_is_invalid() {
        let host = ephemeral();
        host.start().await.unwrap();
        assert!(matches!(host.start().await, Err(MeshError::InvalidState { .. })));
        host.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_when_stopped_is_invalid() {
        let host = ephemeral();
        assert!(matches!(host.stop().await, Err(MeshError::InvalidState { .. })));
    }

    #[tokio::test]
    async fn test_bad_address_leaves_host_stopped() {
        let host = HostHandle::bind("not-an-address");
        assert!(host.start().await.is_err());
        assert_eq!(host.state(), HostState::Stopped);
    }

    #[tokio::test]
    async fn test_start_with_reflection() {
        let host = HostHandle::new(HostConfig {
            address: "127.0.0.1:0".to_string(),
            enable_reflection: true,
            ..HostConfig::default()
        });
        host.start().await.unwrap();
        host.stop().await.unwrap();
    }
}
