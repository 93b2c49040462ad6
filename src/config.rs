use std::net::SocketAddr;
use std::path::PathBuf;

use log::warn;

const DEFAULT_BIND_ADDR: ([u8; 4], u16) = ([0, 0, 0, 0], 2052);

pub struct Config {
    pub bind_addr: SocketAddr,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    pub notify_even_if_online: bool,
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            bind_addr: parse_bind_addr(std::env::var("BIND_ADDR").ok()),
            tls_cert: std::env::var("TLS_CERT").ok().map(PathBuf::from),
            tls_key: std::env::var("TLS_KEY").ok().map(PathBuf::from),
            notify_even_if_online: bool_flag(std::env::var("NOTIFY_EVEN_IF_ONLINE").ok()),
        }
    }

    /// TLS serving needs both halves of the key pair on disk.
    pub fn tls_pair(&self) -> Option<(&PathBuf, &PathBuf)> {
        match (&self.tls_cert, &self.tls_key) {
            (Some(cert), Some(key)) if cert.is_file() && key.is_file() => Some((cert, key)),
            (Some(_), Some(_)) => {
                warn!("TLS_CERT/TLS_KEY set but unreadable, falling back to plain websocket");
                None
            }
            _ => None,
        }
    }
}

fn parse_bind_addr(raw: Option<String>) -> SocketAddr {
    match raw {
        Some(value) => value.parse().unwrap_or_else(|_| {
            warn!("invalid BIND_ADDR {value:?}, using default");
            DEFAULT_BIND_ADDR.into()
        }),
        None => DEFAULT_BIND_ADDR.into(),
    }
}

fn bool_flag(raw: Option<String>) -> bool {
    matches!(
        raw.as_deref().map(str::trim),
        Some("1") | Some("true") | Some("yes")
    )
}
