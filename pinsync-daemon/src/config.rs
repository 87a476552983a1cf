use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use config::{ConfigError, Map, Source, Value};
use serde::{Deserialize, Serialize};

use pinsync_cas::{Auth, HttpStore};
use pinsync_util::insert_into_config_map;

/// CONFIG_FILE_NAME is the name of the optional config file located in the
/// pinsync home directory
pub const CONFIG_FILE_NAME: &str = "daemon.config.toml";
/// ENV_PREFIX should be used along side the config field name to set a
/// config field using environment variables
pub const ENV_PREFIX: &str = "PINSYNC";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// TCP port the gRPC server listens on.
    pub port: u16,
    /// Base URL of the content-addressed store's HTTP API.
    pub cas_url: String,
    pub cas_project_id: String,
    pub cas_project_secret: String,
    /// Attach basic-auth credentials to every store request.
    pub cas_use_auth: bool,
    /// Where the identifier of the last committed index is persisted.
    pub cid_cache: PathBuf,
    /// How often watched files are re-hashed, in seconds.
    pub refresh_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8081,
            cas_url: "http://127.0.0.1:5001".to_string(),
            cas_project_id: String::new(),
            cas_project_secret: String::new(),
            cas_use_auth: false,
            cid_cache: pinsync_util::pinsync_home_path("cid_cache")
                .unwrap_or_else(|| PathBuf::from("cid_cache")),
            refresh_seconds: 10,
        }
    }
}

impl Config {
    pub fn server_addr(&self) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], self.port))
    }

    pub fn store_config(&self) -> pinsync_store::Config {
        pinsync_store::Config {
            refresh_interval: Duration::from_secs(self.refresh_seconds),
            cid_cache: self.cid_cache.clone(),
        }
    }

    /// The store client this config describes; credentials are attached only
    /// when `cas_use_auth` is set.
    pub fn cas(&self) -> Result<HttpStore, pinsync_cas::Error> {
        if self.cas_use_auth {
            HttpStore::with_auth(
                self.cas_url.clone(),
                Auth {
                    project_id: self.cas_project_id.clone(),
                    project_secret: self.cas_project_secret.clone(),
                },
            )
        } else {
            HttpStore::new(self.cas_url.clone())
        }
    }
}

impl Source for Config {
    fn clone_into_box(&self) -> Box<dyn Source + Send + Sync> {
        Box::new(self.clone())
    }

    fn collect(&self) -> Result<Map<String, Value>, ConfigError> {
        let mut map: Map<String, Value> = Map::new();
        insert_into_config_map(&mut map, "port", self.port as i64);
        insert_into_config_map(&mut map, "cas_url", self.cas_url.clone());
        insert_into_config_map(&mut map, "cas_project_id", self.cas_project_id.clone());
        insert_into_config_map(
            &mut map,
            "cas_project_secret",
            self.cas_project_secret.clone(),
        );
        insert_into_config_map(&mut map, "cas_use_auth", self.cas_use_auth);
        insert_into_config_map(
            &mut map,
            "cid_cache",
            self.cid_cache.to_string_lossy().to_string(),
        );
        insert_into_config_map(&mut map, "refresh_seconds", self.refresh_seconds as i64);
        Ok(map)
    }
}
