//! Error taxonomy for the tunnel.
//!
//! [`ConfigError`] covers the fatal class: anything that should abort the
//! process before the accept loop starts. [`SessionError`] covers the
//! per-session class: anything that ends one relay session while leaving the
//! listener and every other session untouched.

use std::net::SocketAddr;

use thiserror::Error;

/// Fatal errors raised while building a [`crate::config::TunnelConfig`].
///
/// Every variant here is deliberately unrecoverable: `main` logs it and exits
/// non-zero rather than falling back to a default.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not resolve {kind} address {addr:?}: {source}")]
    Resolve {
        kind: &'static str,
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{kind} address {addr:?} resolved to no socket addresses")]
    NoAddresses { kind: &'static str, addr: String },

    #[error("no backend addresses configured")]
    NoBackends,

    #[error("unknown crypto method {0:?}")]
    UnknownCipher(String),

    #[error("failed to read host list file {path:?}: {source}")]
    HostList {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors that unwind a single session without affecting the listener.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("dial to {addr} failed: {source}")]
    Dial {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("preamble write failed: {0}")]
    Preamble(#[source] std::io::Error),
}
