use anyhow::Result;
use clap::Parser;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let cli = pinsync_ctl::run::Cli::parse();
    pinsync_ctl::run::run_cli(cli).await
}
