use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

pub const DEFAULT_TOKEN: &str = "dev_token";
pub const DB_FILE_NAME: &str = "locations.json";

/// Startup configuration. Every option can also be set through the
/// environment (or a `.env` file loaded by the binary).
#[derive(Parser, Clone, Debug)]
#[clap(author, version, about = "Location ingestion server", long_about = None)]
pub struct ServerConfig {
    #[clap(long, env = "PORT", default_value = "3000")]
    pub port: u16,

    #[clap(long, env = "GEOTRAIL_HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Loaded but not checked on any route yet
    #[clap(long = "token", env = "TOKEN", default_value = DEFAULT_TOKEN, hide_env_values = true)]
    pub auth_token: String,

    #[clap(long, env = "DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    #[clap(long, env = "PUBLIC_DIR", default_value = "public")]
    pub public_dir: PathBuf,
}

impl ServerConfig {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn db_file(&self) -> PathBuf {
        self.data_dir.join(DB_FILE_NAME)
    }

    pub fn index_file(&self) -> PathBuf {
        self.public_dir.join("index.html")
    }

    pub fn uses_default_token(&self) -> bool {
        self.auth_token == DEFAULT_TOKEN
    }
}
