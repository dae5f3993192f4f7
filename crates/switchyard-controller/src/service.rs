//! Controller gRPC service
//!
//! Four operations: `Register`/`Unregister` publish exporter availability
//! to the directory, `Listen` parks an exporter's long-lived offer stream
//! in the registry, and `Dial` performs the rendezvous: mint a fresh
//! stream id, have the token oracle sign a capability bound to it, push
//! the offer down the exporter's stream and return the same offer to the
//! caller. After `Dial` returns the controller holds no per-session state.

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use kube::ResourceExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::{error, info};

use switchyard_common::crd::{Device, ExporterStatus};
use switchyard_common::{Error, STREAM_TOKEN_TTL};
use switchyard_directory::{AllowAll, Authorizer, Directory, TokenIssuer};
use switchyard_proto::controller_server::{Controller, ControllerServer};
use switchyard_proto::{
    stream_audience, DialRequest, DialResponse, ListenRequest, ListenResponse, RegisterRequest,
    RegisterResponse, UnregisterRequest, UnregisterResponse,
};

use crate::auth;
use crate::registry::{ListenEntry, ListenRegistry};

/// Buffered rendezvous offers per listen stream
const LISTEN_BUFFER: usize = 16;

/// The controller service
pub struct ControllerService {
    directory: Arc<dyn Directory>,
    issuer: Arc<dyn TokenIssuer>,
    authorizer: Arc<dyn Authorizer>,
    registry: Arc<ListenRegistry>,
    router_endpoint: String,
}

impl ControllerService {
    /// Create a controller advertising `router_endpoint` in rendezvous
    /// offers and capability audiences
    pub fn new(
        directory: Arc<dyn Directory>,
        issuer: Arc<dyn TokenIssuer>,
        router_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            directory,
            issuer,
            authorizer: Arc::new(AllowAll),
            registry: Arc::new(ListenRegistry::new()),
            router_endpoint: router_endpoint.into(),
        }
    }

    /// Replace the dial authorization policy
    pub fn with_authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = authorizer;
        self
    }

    /// Handle on the listen registry
    pub fn registry(&self) -> Arc<ListenRegistry> {
        self.registry.clone()
    }

    /// Convert to a tonic service
    pub fn into_service(self) -> ControllerServer<Self> {
        ControllerServer::new(self)
    }

    /// Serve on the given address until the task is cancelled
    pub async fn serve(self, addr: SocketAddr) -> Result<(), tonic::transport::Error> {
        info!(%addr, "Starting controller gRPC service");
        Server::builder()
            .add_service(self.into_service())
            .serve(addr)
            .await
    }
}

#[tonic::async_trait]
impl Controller for ControllerService {
    async fn register(
        &self,
        request: Request<RegisterRequest>,
    ) -> Result<Response<RegisterResponse>, Status> {
        let exporter = auth::authenticate_exporter(self.directory.as_ref(), request.metadata())
            .await
            .inspect_err(|e| error!(error = %e, "Unable to authenticate exporter"))?;

        let name = exporter.name_any();
        let namespace = exporter.namespace().unwrap_or_default();
        let devices: Vec<Device> = request
            .into_inner()
            .reports
            .into_iter()
            .map(|report| Device {
                uuid: report.uuid,
                labels: report.labels.into_iter().collect(),
            })
            .collect();

        info!(exporter = %name, devices = devices.len(), "Registering exporter");

        let status =
            ExporterStatus::registered(exporter.metadata.generation.unwrap_or(0), devices);
        self.directory
            .publish_exporter_status(&namespace, &name, status)
            .await
            .inspect_err(|e| error!(exporter = %name, error = %e, "Unable to update exporter status"))?;

        Ok(Response::new(RegisterResponse {}))
    }

    async fn unregister(
        &self,
        request: Request<UnregisterRequest>,
    ) -> Result<Response<UnregisterResponse>, Status> {
        let exporter = auth::authenticate_exporter(self.directory.as_ref(), request.metadata())
            .await
            .inspect_err(|e| error!(error = %e, "Unable to authenticate exporter"))?;

        let name = exporter.name_any();
        let namespace = exporter.namespace().unwrap_or_default();
        let reason = request.into_inner().reason;

        let status =
            ExporterStatus::unregistered(exporter.metadata.generation.unwrap_or(0), reason);
        self.directory
            .publish_exporter_status(&namespace, &name, status)
            .await
            .inspect_err(|e| error!(exporter = %name, error = %e, "Unable to update exporter status"))?;

        info!(exporter = %name, "Exporter unregistered, marked unavailable");

        Ok(Response::new(UnregisterResponse {}))
    }

    type ListenStream = Pin<Box<dyn Stream<Item = Result<ListenResponse, Status>> + Send + 'static>>;

    async fn listen(
        &self,
        request: Request<ListenRequest>,
    ) -> Result<Response<Self::ListenStream>, Status> {
        let exporter = auth::authenticate_exporter(self.directory.as_ref(), request.metadata())
            .await
            .inspect_err(|e| error!(error = %e, "Unable to authenticate exporter"))?;
        let name = exporter.name_any();

        let (tx, rx) = mpsc::channel(LISTEN_BUFFER);
        let cancel = CancellationToken::new();
        let id = self.registry.next_id();

        self.registry
            .insert(&name, ListenEntry::new(id, cancel.clone(), tx.clone()))?;

        // Evict the entry once the exporter goes away or the scope is torn
        // down. The id guard keeps a stale cleanup from removing a newer
        // listener that reclaimed the name.
        let registry = self.registry.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tx.closed() => {}
            }
            registry.remove_if_current(&name, id);
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }

    async fn dial(
        &self,
        request: Request<DialRequest>,
    ) -> Result<Response<DialResponse>, Status> {
        let identity = auth::authenticate_client(self.directory.as_ref(), request.metadata())
            .await
            .inspect_err(|e| error!(error = %e, "Unable to authenticate client identity"))?;
        let client = identity.name_any();
        let exporter = request.into_inner().uuid;

        if !self
            .authorizer
            .authorize(&identity, &exporter)
            .await
            .map_err(Status::from)?
        {
            return Err(Error::denied(&exporter).into());
        }

        let sender = self.registry.sender(&exporter).ok_or_else(|| {
            error!(client = %client, exporter = %exporter, "No matching listener");
            Error::no_listener(&exporter)
        })?;

        let stream_id = uuid::Uuid::new_v4().to_string();
        let audience = stream_audience(&self.router_endpoint, &stream_id);

        let token = self.issuer.issue(&audience, STREAM_TOKEN_TTL).await.map_err(
            |e| {
                error!(error = %e, "Failed to issue stream token");
                Status::from(e)
            },
        )?;

        let offer = ListenResponse {
            router_endpoint: self.router_endpoint.clone(),
            router_token: token.clone(),
        };
        // The session is fatal if the offer cannot reach the exporter; the
        // token is never used and simply expires.
        sender.send(Ok(offer)).await.map_err(|_| {
            error!(client = %client, exporter = %exporter, "Failed to send rendezvous offer");
            Status::from(Error::listen_closed(&exporter))
        })?;

        info!(client = %client, stream = %audience, "Client dial assigned stream");

        Ok(Response::new(DialResponse {
            router_endpoint: self.router_endpoint.clone(),
            router_token: token,
        }))
    }
}
