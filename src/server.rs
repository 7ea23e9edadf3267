//! TCP server for the inference protocol.
//!
//! `InferenceServer` accepts connections in a loop and gives each one its own
//! task. A connection reads frames, hands each [`RpcMessage`] to the
//! [`InferenceService`] and writes the reply before reading the next frame.
//! Calls on different connections run concurrently; the service serializes
//! the part that touches the card.

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

use crate::config::NetworkConfig;
use crate::rpc::{ErrorResponse, MessagePayload, RequestStatusCode, RpcMessage};
use crate::service::InferenceService;
use crate::wire::RpcCodec;

pub struct InferenceServer {
    listen_address: String,
    max_message_size: usize,
    service: Arc<InferenceService>,
}

impl InferenceServer {
    pub fn new(network: &NetworkConfig, service: Arc<InferenceService>) -> Self {
        Self {
            listen_address: network.listen_address.clone(),
            max_message_size: network.max_message_size,
            service,
        }
    }

    /// Bind the configured listen address.
    pub async fn bind(&self) -> Result<TcpListener> {
        TcpListener::bind(&self.listen_address)
            .await
            .with_context(|| format!("failed to bind TCP listener on {}", self.listen_address))
    }

    /// Accept connections on `listener` until `shutdown` completes.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let local_addr = listener.local_addr().context("listener has no local address")?;
        info!(addr = %local_addr, "inference server listening");

        tokio::pin!(shutdown);
        loop {
            let (stream, peer_addr) = tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested, no longer accepting connections");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!(error = %e, "failed to accept TCP connection");
                        continue;
                    }
                },
            };

            debug!(peer_addr = %peer_addr, "accepted TCP connection");

            let service = Arc::clone(&self.service);
            let max_message_size = self.max_message_size;
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, service, max_message_size).await {
                    debug!(
                        peer_addr = %peer_addr,
                        error = %e,
                        "connection handler finished with error"
                    );
                } else {
                    debug!(peer_addr = %peer_addr, "connection closed by peer");
                }
            });
        }
    }
}

/// Serve one connection until the peer hangs up or a frame is unreadable.
async fn handle_connection(
    stream: TcpStream,
    service: Arc<InferenceService>,
    max_message_size: usize,
) -> Result<()> {
    let mut framed = Framed::new(stream, RpcCodec::new(max_message_size));

    while let Some(frame) = framed.next().await {
        let msg = frame?;
        let request_id = msg.request_id.clone();
        debug!(request_id = %request_id, "received message");

        let reply = service.dispatch(msg).await;
        if let Err(e) = framed.send(reply).await {
            // Usually a reply too large for one frame; the caller still gets
            // a structured answer.
            warn!(request_id = %request_id, error = %e, "failed to send reply");
            framed
                .send(RpcMessage {
                    request_id,
                    payload: MessagePayload::Error(ErrorResponse {
                        code: RequestStatusCode::Internal,
                        message: format!("reply could not be sent: {}", e),
                    }),
                })
                .await
                .context("failed to send error reply")?;
        }
    }

    Ok(())
}
