//! Upstream resolver used for queries the local document does not answer.
//!
//! Queries are forwarded as raw wire messages over UDP, falling back to TCP
//! when the UDP reply comes back truncated.

use hickory_proto::op::Message;
use hickory_resolver::system_conf::read_system_conf;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::{debug, info};

use crate::config::DNS_PORT;
use crate::error::DnsError;

/// Largest DNS message we accept over UDP.
const MAX_UDP_MESSAGE: usize = 65_535;

/// Pick the first usable upstream from `candidates`.
///
/// When the server listens on the standard DNS port, upstreams on loopback,
/// on the unspecified address or on the listen address itself are skipped,
/// since forwarding to them would loop back into this server.
pub fn select_upstream(candidates: &[SocketAddr], listen_addr: SocketAddr) -> Option<SocketAddr> {
    candidates
        .iter()
        .copied()
        .find(|candidate| {
            listen_addr.port() != DNS_PORT || !points_at_self(candidate.ip(), listen_addr.ip())
        })
}

fn points_at_self(candidate: IpAddr, listen: IpAddr) -> bool {
    candidate.is_loopback() || candidate.is_unspecified() || candidate == listen
}

fn unspecified_for(addr: SocketAddr) -> SocketAddr {
    match addr {
        SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
        SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
    }
}

/// A single upstream resolver, chosen once at startup.
#[derive(Debug, Clone)]
pub struct Upstream {
    addr: SocketAddr,
    timeout: Duration,
}

impl Upstream {
    /// Use the resolver at `addr`, bounding each exchange by `timeout`.
    pub fn new(addr: SocketAddr, timeout: Duration) -> Self {
        Self { addr, timeout }
    }

    /// Select an upstream from the host resolver configuration.
    pub fn discover(listen_addr: SocketAddr, timeout: Duration) -> Result<Self, DnsError> {
        let (config, _opts) = read_system_conf()
            .map_err(|e| DnsError::Config(format!("cannot read host resolver config: {e}")))?;

        let candidates: Vec<SocketAddr> = config
            .name_servers()
            .iter()
            .map(|ns| ns.socket_addr)
            .collect();
        debug!(candidates = ?candidates, "host resolver name servers");

        let addr = select_upstream(&candidates, listen_addr).ok_or_else(|| {
            DnsError::Config("no usable upstream resolver in host configuration".to_string())
        })?;
        info!(upstream = %addr, "selected upstream resolver");

        Ok(Self::new(addr, timeout))
    }

    /// Address of the upstream resolver.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Bound on one exchange.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send `query` upstream and return the decoded reply.
    pub async fn exchange(&self, query: &Message) -> Result<Message, DnsError> {
        let bytes = query.to_vec()?;

        let mut response = timeout(self.timeout, self.exchange_udp(&bytes))
            .await
            .map_err(|_| DnsError::Timeout(self.addr))??;

        if response.truncated() {
            debug!(upstream = %self.addr, id = query.id(), "truncated reply, retrying over TCP");
            response = timeout(self.timeout, self.exchange_tcp(&bytes))
                .await
                .map_err(|_| DnsError::Timeout(self.addr))??;
        }

        if response.id() != query.id() {
            return Err(DnsError::MismatchedId {
                expected: query.id(),
                got: response.id(),
            });
        }

        Ok(response)
    }

    async fn exchange_udp(&self, bytes: &[u8]) -> Result<Message, DnsError> {
        let socket = UdpSocket::bind(unspecified_for(self.addr)).await?;
        socket.connect(self.addr).await?;
        socket.send(bytes).await?;

        let mut buf = vec![0u8; MAX_UDP_MESSAGE];
        let len = socket.recv(&mut buf).await?;
        Ok(Message::from_vec(&buf[..len])?)
    }

    async fn exchange_tcp(&self, bytes: &[u8]) -> Result<Message, DnsError> {
        let len = u16::try_from(bytes.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "query too large for TCP"))?;

        let mut stream = TcpStream::connect(self.addr).await?;
        stream.write_all(&len.to_be_bytes()).await?;
        stream.write_all(bytes).await?;

        let mut len_buf = [0u8; 2];
        stream.read_exact(&mut len_buf).await?;
        let mut buf = vec![0u8; u16::from_be_bytes(len_buf) as usize];
        stream.read_exact(&mut buf).await?;
        Ok(Message::from_vec(&buf)?)
    }
}
