//! Command-line surface and validated tunnel configuration.
//!
//! `CliArgs` is the raw, unresolved shape a user types on the command line.
//! `TunnelConfig::from_args` turns it into something the rest of the crate
//! can trust: every address resolved, the cipher method known, the host
//! list loaded — all before the accept loop starts, so a bad flag is a
//! startup failure, never a per-connection surprise.

use std::net::{SocketAddr, ToSocketAddrs};

use clap::Parser;

use crate::cipher::CipherMethod;
use crate::error::ConfigError;
use crate::hostlist::HostList;

const DEFAULT_BUFFER_SIZE: usize = 4096;
const DEFAULT_INSPECT_CEILING: usize = 2 * 1024 * 1024;

#[derive(Parser, Debug)]
#[command(name = "tunnel-core", about = "A two-role TCP relay with an optional stream cipher.")]
pub struct CliArgs {
    /// Frontend bind address.
    #[arg(long, default_value = ":9001")]
    pub listen: String,

    /// Comma-separated encrypted-path backend addresses.
    #[arg(long, default_value = "127.0.0.1:6400,127.0.0.1:6401")]
    pub backend: String,

    /// Off-list / server-mode local service address.
    #[arg(long, default_value = "127.0.0.1:39770")]
    pub direct: String,

    /// Stream cipher selector.
    #[arg(long, default_value = "rc4")]
    pub crypto: String,

    /// Shared secret used to derive the cipher key.
    #[arg(long, default_value = "secret")]
    pub secret: String,

    /// Path to the host-list file (client mode only).
    #[arg(long, default_value = "./hostlist.conf")]
    pub hostlist: String,

    /// Run as the client-side relay (performs first-packet inspection).
    #[arg(long)]
    pub clientmode: bool,

    /// Log sink: `stdout` or `syslog`.
    #[arg(long, default_value = "stdout")]
    pub logto: String,

    /// Pool buffer size in bytes.
    #[arg(long, default_value_t = DEFAULT_BUFFER_SIZE)]
    pub buffer_size: usize,

    /// Post-header inspector read ceiling in bytes.
    #[arg(long, default_value_t = DEFAULT_INSPECT_CEILING)]
    pub inspect_ceiling: usize,
}

/// Fully resolved, validated configuration. Built once at startup and
/// shared (via `Arc`) with every session.
#[derive(Debug)]
pub struct TunnelConfig {
    pub listen: SocketAddr,
    pub backends: Vec<SocketAddr>,
    pub direct: SocketAddr,
    pub cipher_method: CipherMethod,
    pub secret: Vec<u8>,
    pub host_list: HostList,
    pub client_mode: bool,
    pub log_to_syslog_requested: bool,
    pub buffer_size: usize,
    pub inspect_ceiling: usize,
}

impl TunnelConfig {
    pub fn from_args(args: CliArgs) -> Result<Self, ConfigError> {
        let listen = resolve_one("listen", &normalize_bare_port(&args.listen))?;
        let direct = resolve_one("direct", &args.direct)?;

        let mut backends = Vec::new();
        for raw in args.backend.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            backends.push(resolve_one("backend", raw)?);
        }
        if backends.is_empty() {
            return Err(ConfigError::NoBackends);
        }

        let cipher_method = CipherMethod::parse(&args.crypto)
            .ok_or_else(|| ConfigError::UnknownCipher(args.crypto.clone()))?;

        let host_list = if args.clientmode {
            HostList::load(&args.hostlist)?
        } else {
            HostList::empty()
        };

        Ok(TunnelConfig {
            listen,
            backends,
            direct,
            cipher_method,
            secret: args.secret.into_bytes(),
            host_list,
            client_mode: args.clientmode,
            log_to_syslog_requested: args.logto.eq_ignore_ascii_case("syslog"),
            buffer_size: args.buffer_size,
            inspect_ceiling: args.inspect_ceiling,
        })
    }
}

/// `:9001`-style bare-port addresses resolve against every local interface;
/// `ToSocketAddrs` wants a host, so an empty host is filled in as the
/// wildcard address the way the original tunnel's bind flag works.
fn normalize_bare_port(addr: &str) -> String {
    if let Some(port) = addr.strip_prefix(':') {
        format!("0.0.0.0:{port}")
    } else {
        addr.to_string()
    }
}

fn resolve_one(kind: &'static str, addr: &str) -> Result<SocketAddr, ConfigError> {
    let mut iter = addr.to_socket_addrs().map_err(|source| ConfigError::Resolve {
        kind,
        addr: addr.to_string(),
        source,
    })?;
    iter.next().ok_or_else(|| ConfigError::NoAddresses {
        kind,
        addr: addr.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> CliArgs {
        CliArgs {
            listen: "127.0.0.1:9001".to_string(),
            backend: "127.0.0.1:6400,127.0.0.1:6401".to_string(),
            direct: "127.0.0.1:39770".to_string(),
            crypto: "rc4".to_string(),
            secret: "secret".to_string(),
            hostlist: "./hostlist.conf".to_string(),
            clientmode: false,
            logto: "stdout".to_string(),
            buffer_size: DEFAULT_BUFFER_SIZE,
            inspect_ceiling: DEFAULT_INSPECT_CEILING,
        }
    }

    #[test]
    fn resolves_all_addresses_in_server_mode() {
        let cfg = TunnelConfig::from_args(base_args()).unwrap();
        assert_eq!(cfg.backends.len(), 2);
        assert!(!cfg.client_mode);
        assert_eq!(cfg.host_list.len(), 0);
    }

    #[test]
    fn bare_port_listen_becomes_wildcard() {
        let mut args = base_args();
        args.listen = ":9001".to_string();
        let cfg = TunnelConfig::from_args(args).unwrap();
        assert_eq!(cfg.listen.port(), 9001);
    }

    #[test]
    fn empty_backend_list_is_fatal() {
        let mut args = base_args();
        args.backend = "".to_string();
        let err = TunnelConfig::from_args(args).unwrap_err();
        assert!(matches!(err, ConfigError::NoBackends));
    }

    #[test]
    fn unknown_cipher_is_fatal() {
        let mut args = base_args();
        args.crypto = "aes256".to_string();
        let err = TunnelConfig::from_args(args).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownCipher(_)));
    }

    #[test]
    fn missing_hostlist_in_client_mode_is_fatal() {
        let mut args = base_args();
        args.clientmode = true;
        args.hostlist = "/nonexistent/path/to/hostlist.conf".to_string();
        let err = TunnelConfig::from_args(args).unwrap_err();
        assert!(matches!(err, ConfigError::HostList { .. }));
    }
}
