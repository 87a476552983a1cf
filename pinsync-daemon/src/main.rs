use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pinsync_daemon::cli::Args;
use pinsync_daemon::config::{Config, CONFIG_FILE_NAME, ENV_PREFIX};
use pinsync_util::ProgramLock;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().pretty())
        .with(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let sources = vec![
        pinsync_util::pinsync_home_path(CONFIG_FILE_NAME),
        args.cfg.clone(),
    ];
    let config: Config = pinsync_util::make_config(
        // default
        Config::default(),
        // potential config files
        sources,
        // env var prefix for this config
        ENV_PREFIX,
        // map of present command line arguments
        args.make_overrides_map(),
    )?;

    let _lock = ProgramLock::acquire("pinsyncd")?;

    pinsync_daemon::run::run(config).await
}
