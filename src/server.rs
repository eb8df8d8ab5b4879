//! DNS server setup and lifecycle management.

use async_trait::async_trait;
use hickory_proto::op::{Edns, Header, Message, ResponseCode};
use hickory_proto::rr::Record;
use hickory_server::authority::MessageResponseBuilder;
use hickory_server::server::{Request, RequestHandler, ResponseHandler, ResponseInfo};
use hickory_server::ServerFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::authority::{echo_edns, NetworkAuthority};
use crate::config::{load_json, DnsConfig};
use crate::error::DnsError;
use crate::model::Doc;
use crate::state::DnsState;

/// Interval for emitting state metrics.
const METRICS_INTERVAL: Duration = Duration::from_secs(10);

/// Periodically emit state metrics.
async fn metrics_loop(state: DnsState, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(METRICS_INTERVAL);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                state.emit_metrics();
                let snapshot = state.snapshot();
                debug!(
                    generation = snapshot.generation(),
                    records = snapshot.doc().dns.len(),
                    labels = snapshot.forward_count(),
                    "emitted state metrics"
                );
            }
            _ = shutdown.cancelled() => {
                debug!("metrics loop shutting down");
                return;
            }
        }
    }
}

/// Rebuild a wire message from a parsed request.
pub fn request_message(request: &Request) -> Message {
    let mut message = Message::new();
    message.set_header(*request.header());
    message.add_queries(request.queries().iter().map(|q| q.original().clone()));
    if let Some(edns) = request.edns() {
        message.set_edns(edns.clone());
    }
    message
}

/// OPT record for the reply, present only when the client sent one. A
/// delegated reply keeps the upstream's OPT.
fn reply_edns(request: &Request, response: &Message) -> Option<Edns> {
    let requested = request.edns()?;
    Some(
        response
            .extensions()
            .clone()
            .unwrap_or_else(|| echo_edns(requested)),
    )
}

fn unanswered(request: &Request) -> ResponseInfo {
    let mut header = Header::response_from_request(request.header());
    header.set_response_code(ResponseCode::ServFail);
    header.into()
}

/// Hands each inbound request to the [`NetworkAuthority`].
///
/// The server runs one task per request; handlers share the authority and
/// never hold a lock across the upstream exchange.
#[derive(Clone)]
pub struct QueryHandler {
    authority: Arc<NetworkAuthority>,
}

impl QueryHandler {
    /// Create a handler for `authority`.
    pub fn new(authority: Arc<NetworkAuthority>) -> Self {
        Self { authority }
    }
}

#[async_trait]
impl RequestHandler for QueryHandler {
    async fn handle_request<R: ResponseHandler>(
        &self,
        request: &Request,
        mut response_handle: R,
    ) -> ResponseInfo {
        let query = request_message(request);

        let Some(response) = self.authority.answer(&query).await else {
            trace!(src = %request.src(), id = request.id(), "no answer, dropping query");
            return unanswered(request);
        };

        let mut builder = MessageResponseBuilder::from_message_request(request);
        if let Some(edns) = reply_edns(request, &response) {
            builder.edns(edns);
        }
        let message = builder.build(
            *response.header(),
            response.answers(),
            response.name_servers(),
            std::iter::empty::<&Record>(),
            response.additionals(),
        );

        match response_handle.send_response(message).await {
            Ok(info) => info,
            Err(e) => {
                warn!(src = %request.src(), "failed to send DNS response: {}", e);
                unanswered(request)
            }
        }
    }
}

/// DNS server answering from the network document.
pub struct DnsServer {
    config: DnsConfig,
    authority: Arc<NetworkAuthority>,
}

impl DnsServer {
    /// Create a server, loading the initial document if one is configured.
    pub fn new(config: DnsConfig) -> Result<Self, DnsError> {
        let doc = match &config.initial_doc {
            Some(path) => {
                let doc: Doc = load_json(path)?;
                info!(path = %path.display(), entities = doc.len(), "loaded initial document");
                doc
            }
            None => Doc::default(),
        };

        let authority = NetworkAuthority::from_config(&config, DnsState::with_doc(doc));
        Ok(Self {
            config,
            authority: Arc::new(authority),
        })
    }

    /// The authority, for pushing documents and diffs.
    pub fn authority(&self) -> &Arc<NetworkAuthority> {
        &self.authority
    }

    /// Get a reference to the DNS state.
    pub fn state(&self) -> &DnsState {
        self.authority.state()
    }

    /// Run the DNS server until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), DnsError> {
        info!(
            listen_addr = %self.config.listen_addr,
            upstream = ?self.authority.upstream().map(|u| u.addr()),
            instance_subnet = ?self.config.instance_subnet,
            "Starting netstate-dns server"
        );

        let mut server = ServerFuture::new(QueryHandler::new(Arc::clone(&self.authority)));

        // Bind UDP
        let udp_socket = UdpSocket::bind(self.config.listen_addr).await?;
        info!(addr = %self.config.listen_addr, "DNS UDP listening");
        server.register_socket(udp_socket);

        // Bind TCP
        let tcp_listener = TcpListener::bind(self.config.listen_addr).await?;
        info!(addr = %self.config.listen_addr, "DNS TCP listening");
        server.register_listener(tcp_listener, self.config.tcp_timeout());

        // Start metrics loop
        let metrics_state = self.state().clone();
        let metrics_shutdown = shutdown.child_token();
        let metrics_handle = tokio::spawn(async move {
            metrics_loop(metrics_state, metrics_shutdown).await;
        });

        // Emit initial metrics
        self.state().emit_metrics();

        info!("DNS server ready to serve queries");

        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("DNS server shutdown requested");
            }
            result = server.block_until_done() => {
                if let Err(e) = result {
                    error!("DNS server error: {}", e);
                }
                shutdown.cancel();
            }
        }

        let _ = metrics_handle.await;

        info!("DNS server stopped");
        Ok(())
    }
}
