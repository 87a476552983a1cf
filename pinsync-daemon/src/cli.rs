use std::collections::HashMap;
use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[clap(author, version, about = "the pinsync daemon")]
pub struct Args {
    /// TCP port to listen on
    #[clap(long)]
    pub port: Option<u16>,
    /// Base URL of the content-addressed store's HTTP API
    #[clap(long)]
    pub cas_url: Option<String>,
    /// Path to the recovery pointer file
    #[clap(long)]
    pub cid_cache: Option<PathBuf>,
    /// Seconds between file refreshes
    #[clap(long)]
    pub refresh_seconds: Option<u64>,
    /// Path to the config file
    #[clap(long)]
    pub cfg: Option<PathBuf>,
}

impl Args {
    pub fn make_overrides_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        if let Some(port) = self.port {
            map.insert("port".to_string(), port.to_string());
        }
        if let Some(url) = &self.cas_url {
            map.insert("cas_url".to_string(), url.clone());
        }
        if let Some(path) = &self.cid_cache {
            map.insert(
                "cid_cache".to_string(),
                path.to_string_lossy().to_string(),
            );
        }
        if let Some(secs) = self.refresh_seconds {
            map.insert("refresh_seconds".to_string(), secs.to_string());
        }
        map
    }
}
