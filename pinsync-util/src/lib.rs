use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use anyhow::Result;
use config::{Config, Environment, File, Map, Value};
use dirs::home_dir;
use serde::de::DeserializeOwned;

pub mod lock;

pub use crate::lock::ProgramLock;

const PINSYNC_DIR: &str = ".pinsync";

/// Resolves when the process is asked to shut down: ctrl-c, or SIGTERM on
/// unix (how a service manager stops the daemon).
pub async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = term.recv() => {}
                }
            }
            Err(_) => {
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    ctrl_c.await.ok();
}

/// Path that leads to a file in the pinsync home directory
pub fn pinsync_home_path(file_name: &str) -> Option<PathBuf> {
    let home = home_dir()?;
    Some(Path::new(&home).join(PINSYNC_DIR).join(file_name))
}

/// Merge the given sources into a configuration of type `T`, in increasing
/// order of precedence: `default`, any existing file in `file_paths`,
/// environment variables prefixed with `env_prefix`, and finally the map of
/// present command line flags.
pub fn make_config<T, S, V>(
    default: T,
    file_paths: Vec<Option<PathBuf>>,
    env_prefix: &str,
    flag_overrides: HashMap<S, V>,
) -> Result<T>
where
    T: DeserializeOwned + config::Source + Send + Sync + 'static,
    S: AsRef<str>,
    V: Into<Value>,
{
    let mut builder = Config::builder().add_source(default);

    for path in file_paths.into_iter().flatten() {
        if path.is_file() {
            builder = builder.add_source(File::from(path));
        }
    }

    builder = builder.add_source(Environment::with_prefix(env_prefix));

    for (flag, val) in flag_overrides.into_iter() {
        builder = builder.set_override(flag.as_ref(), val)?;
    }

    let cfg = builder.build()?;
    let cfg: T = cfg.try_deserialize()?;
    Ok(cfg)
}

/// Insert a field/value pair into a `config::Map`, for use in
/// `config::Source` implementations.
pub fn insert_into_config_map<I: Into<String>, V: Into<Value>>(
    map: &mut Map<String, Value>,
    field: I,
    val: V,
) {
    map.insert(field.into(), val.into());
}
