//! Accept loop for a serving node.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::context::NodeContext;
use crate::error::{FcrP2pError, Result};
use crate::handler::serve_connection;
use crate::transport::Acceptor;

/// Serves inbound requests, one task per connection.
#[derive(Debug, Clone)]
pub struct Server {
    ctx: Arc<NodeContext>,
}

impl Server {
    /// Create a server over a shared node context.
    pub fn new(ctx: Arc<NodeContext>) -> Self {
        Self { ctx }
    }

    /// The node context this server answers for.
    pub fn context(&self) -> &Arc<NodeContext> {
        &self.ctx
    }

    /// Accept connections until the acceptor closes.
    ///
    /// Per-connection I/O failures are logged and skipped.
    pub async fn run<A: Acceptor>(self, mut acceptor: A) -> Result<()> {
        info!("Node {} serving as {:?}", self.ctx.node_id(), self.ctx.role);

        loop {
            match acceptor.accept().await {
                Ok(conn) => {
                    let ctx = self.ctx.clone();
                    tokio::spawn(async move {
                        let remote = conn.remote().to_string();
                        if let Err(e) = serve_connection(ctx, conn).await {
                            debug!("Connection from {} ended: {}", remote, e);
                        }
                    });
                }
                Err(FcrP2pError::Io(e)) => {
                    warn!("Accept failed: {}", e);
                }
                Err(e) => {
                    error!("Listener closed: {}", e);
                    return Err(e);
                }
            }
        }
    }

    /// Run the accept loop on a background task.
    pub fn spawn<A: Acceptor + 'static>(self, acceptor: A) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run(acceptor))
    }
}
