use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

/// Runtime configuration for the script host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    /// Directory served at the root; holds the managed script and index page.
    pub public_dir: PathBuf,
    /// Directory holding the version record and the backups directory.
    pub data_root: PathBuf,
    pub enable_cors: bool,
    pub max_body_bytes: usize,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let host: IpAddr = std::env::var("BIND_HOST")
            .unwrap_or_else(|_| "0.0.0.0".to_string())
            .parse()
            .context("failed to parse BIND_HOST")?;
        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .context("failed to parse PORT")?;

        let public_dir =
            PathBuf::from(std::env::var("PUBLIC_DIR").unwrap_or_else(|_| "public".to_string()));
        let data_root = PathBuf::from(std::env::var("DATA_DIR").unwrap_or_else(|_| ".".to_string()));

        let enable_cors = std::env::var("ENABLE_CORS")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let max_body_bytes = std::env::var("MAX_BODY_BYTES")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(5 * 1024 * 1024);

        Ok(Self {
            bind_addr: SocketAddr::new(host, port),
            public_dir,
            data_root,
            enable_cors,
            max_body_bytes,
        })
    }
}
