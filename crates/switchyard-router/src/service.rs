//! Router gRPC service
//!
//! One operation: `Stream`. The capability token names the stream id; the
//! first arrival parks in the pending registry, the second consumes the
//! entry, cancels the waiter's scope and bridges the two streams. The
//! router keeps no state about a session once forwarding returns.

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tonic::{Request, Response, Status, Streaming};
use tracing::{error, info, warn};

use switchyard_common::tokenholder_subject;
use switchyard_directory::TokenReviewer;
use switchyard_proto::router_server::{Router, RouterServer};
use switchyard_proto::StreamFrame;

use crate::auth;
use crate::forward::{forward, FORWARD_BUFFER};
use crate::registry::{Claim, PendingEntry, PendingRegistry};

/// The router service
pub struct RouterService {
    reviewer: Arc<dyn TokenReviewer>,
    pending: Arc<PendingRegistry>,
    endpoint: String,
    subject: String,
}

impl RouterService {
    /// Create a router that accepts capabilities bound to `endpoint` and
    /// signed for the well-known tokenholder subject
    pub fn new(reviewer: Arc<dyn TokenReviewer>, endpoint: impl Into<String>) -> Self {
        Self {
            reviewer,
            pending: Arc::new(PendingRegistry::new()),
            endpoint: endpoint.into(),
            subject: tokenholder_subject(),
        }
    }

    /// Override the subject expected on reviewed capabilities
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    /// Handle on the pending registry
    pub fn pending(&self) -> Arc<PendingRegistry> {
        self.pending.clone()
    }

    /// Convert to a tonic service
    pub fn into_service(self) -> RouterServer<Self> {
        RouterServer::new(self)
    }

    /// Serve on the given address until the task is cancelled
    pub async fn serve(self, addr: SocketAddr) -> Result<(), tonic::transport::Error> {
        info!(%addr, "Starting router gRPC service");
        Server::builder()
            .add_service(self.into_service())
            .serve(addr)
            .await
    }
}

#[tonic::async_trait]
impl Router for RouterService {
    type StreamStream = Pin<Box<dyn Stream<Item = Result<StreamFrame, Status>> + Send + 'static>>;

    async fn stream(
        &self,
        request: Request<Streaming<StreamFrame>>,
    ) -> Result<Response<Self::StreamStream>, Status> {
        let stream_id = auth::authenticate(
            self.reviewer.as_ref(),
            &self.endpoint,
            &self.subject,
            request.metadata(),
        )
        .await
        .inspect_err(|e| error!(error = %e, "Failed to authenticate"))?;

        let inbound = request.into_inner();
        let (tx, rx) = mpsc::channel(FORWARD_BUFFER);
        let cancel = CancellationToken::new();
        let id = self.pending.next_id();
        let entry = PendingEntry::new(id, cancel.clone(), inbound, tx.clone());

        match self.pending.claim(&stream_id, entry) {
            Claim::Paired { first, second } => {
                info!(stream = %stream_id, "Forwarding");

                // Wake the waiter's cleanup; its entry is already consumed
                first.cancel().cancel();

                let shared = CancellationToken::new();
                tokio::spawn(async move {
                    if let Err(status) =
                        forward(shared, first.into_parts(), second.into_parts()).await
                    {
                        warn!(stream = %stream_id, error = %status, "Forwarding ended with error");
                    } else {
                        info!(stream = %stream_id, "Forwarding finished");
                    }
                });
            }
            Claim::Waiter => {
                info!(stream = %stream_id, "Waiting for the other side");

                // Evict the entry when the waiter's scope ends before a
                // peer arrives; the id guard leaves a later occupant alone
                let pending = self.pending.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = tx.closed() => {}
                    }
                    pending.remove_if_current(&stream_id, id);
                });
            }
        }

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }
}
