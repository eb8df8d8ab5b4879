//! Error types for netstate-dns.

use thiserror::Error;

/// Errors raised while constructing network entities.
///
/// These never reach the Doc/Diff pipeline: a caller that gets one of these
/// has nothing to apply.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EntityError {
    /// An address string did not parse.
    #[error("invalid {kind} address for `{key}`: {value}")]
    InvalidAddress {
        /// Entity category (e.g. "interface").
        kind: &'static str,
        /// Identity key of the entity being built.
        key: String,
        /// The offending input.
        value: String,
    },

    /// A subnet string did not parse.
    #[error("invalid subnet for `{key}`: {value}")]
    InvalidSubnet {
        /// Identity key of the entity being built.
        key: String,
        /// The offending input.
        value: String,
    },

    /// The identity key is empty or contains whitespace. Record labels must
    /// also be valid DNS names.
    #[error("invalid {kind} identity key: {key:?}")]
    InvalidKey {
        /// Entity category.
        kind: &'static str,
        /// The offending key.
        key: String,
    },
}

/// Errors raised while translating a change into a host command.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TranslateError {
    /// The identity key cannot be emitted as a single command token.
    #[error("{kind} `{key}` cannot be used as a command token")]
    InvalidKey {
        /// Entity category.
        kind: &'static str,
        /// The offending key.
        key: String,
    },

    /// A field the command needs is empty.
    #[error("{kind} `{key}` is missing {field}")]
    MissingField {
        /// Entity category.
        kind: &'static str,
        /// Identity key of the entity.
        key: String,
        /// What is missing.
        field: &'static str,
    },
}

/// Errors that can occur in the DNS server.
#[derive(Debug, Error)]
pub enum DnsError {
    /// IO error (network, file, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// DNS protocol error
    #[error("DNS protocol error: {0}")]
    Proto(#[from] hickory_proto::ProtoError),

    /// Document or diff could not be decoded
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Upstream resolver did not answer in time
    #[error("upstream {0} timed out")]
    Timeout(std::net::SocketAddr),

    /// Upstream answered with a different message ID
    #[error("upstream reply ID {got} does not match query ID {expected}")]
    MismatchedId {
        /// ID sent upstream.
        expected: u16,
        /// ID received back.
        got: u16,
    },

    /// Entity construction failed
    #[error(transparent)]
    Entity(#[from] EntityError),

    /// Command translation failed
    #[error(transparent)]
    Translate(#[from] TranslateError),
}
