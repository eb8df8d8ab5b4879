//! netstate-dns - Declarative host network state with an in-memory DNS engine.
//!
//! This crate models the desired network configuration of a host (dummy
//! interfaces, NAT fan-out groups, 6-in-4 tunnels and AAAA records) as a
//! single document, applies incremental diffs to it, translates those diffs
//! into host configuration commands, and serves DNS straight from the live
//! document, delegating everything else to an upstream resolver.
//!
//! ## Features
//!
//! - Typed `Add`/`Remove` changesets per entity category
//! - Host command generation for interfaces, NAT fans and tunnels
//! - AAAA, PTR and A-suppression answers from the live document
//! - Lock-free reads: the document and its indexes are swapped atomically
//! - Raw-message delegation to an upstream resolver with a bounded timeout
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         netstate-dns                            │
//! │                                                                 │
//! │  Doc / Diff ──┬──▶ DnsState ──────────▶ NetworkAuthority        │
//! │  (control)    │    (snapshot swap)        │        ▲            │
//! │               │                           │        │ UDP/TCP    │
//! │               │                           ▼        │            │
//! │               │                       Upstream   QueryHandler   │
//! │               │                       resolver   (hickory)      │
//! │               ▼                                                 │
//! │         translate_diff ──▶ host commands (executed elsewhere)   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Query handling
//!
//! ```text
//! AAAA foo.bar      → addresses of foo.bar (localized ones only if local)
//! A    foo.bar      → NXDOMAIN when foo.bar only has AAAA records
//! PTR  <rev>.arpa   → label owning the address
//! anything else     → upstream resolver, or no reply
//! ```
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use netstate_dns::{DnsConfig, DnsServer};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = DnsConfig {
//!         listen_addr: "[::]:8053".parse().unwrap(),
//!         instance_subnet: Some("fc75:0:9fb2::/48".parse().unwrap()),
//!         ..Default::default()
//!     };
//!
//!     let server = DnsServer::new(config).unwrap();
//!     server.run(CancellationToken::new()).await.unwrap();
//! }
//! ```

#![warn(missing_docs)]

pub mod authority;
pub mod command;
pub mod config;
pub mod diff;
pub mod error;
pub mod metrics;
pub mod model;
pub mod server;
pub mod state;
pub mod telemetry;
pub mod upstream;

// Re-export main types
pub use authority::NetworkAuthority;
pub use command::{translate_diff, Command};
pub use config::{Config, DnsConfig, TelemetryConfig};
pub use diff::{apply, Change, Diff};
pub use error::{DnsError, EntityError, TranslateError};
pub use model::{DnsRecord, Doc, Interface, NatFan, NetworkEntity, Tunnel};
pub use server::{DnsServer, QueryHandler};
pub use state::{reverse_key, DnsState, Snapshot};
pub use upstream::Upstream;
