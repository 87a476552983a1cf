use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::client::Client;

#[derive(Parser, Debug)]
#[clap(
    name = "pinsync",
    version,
    about = "command line client for the pinsync daemon"
)]
pub struct Cli {
    /// Address of the daemon's gRPC endpoint
    #[clap(long, default_value = "http://127.0.0.1:8081")]
    pub daemon: String,
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[clap(about = "Mirror matching files into the store and watch them")]
    Add {
        pattern: String,
        /// Directory the pattern is resolved against
        #[clap(long)]
        cwd: Option<PathBuf>,
    },
    #[clap(about = "List watched files; an empty pattern lists everything")]
    List {
        pattern: Option<String>,
        #[clap(long)]
        cwd: Option<PathBuf>,
    },
    #[clap(about = "Stop watching matching files")]
    Remove {
        pattern: String,
        #[clap(long)]
        cwd: Option<PathBuf>,
    },
    #[clap(about = "Print the identifier of the current index")]
    Backup,
    #[clap(about = "Rehydrate the index named by the given identifier")]
    Restore { cid: String },
}

pub async fn run_cli(cli: Cli) -> Result<()> {
    let mut client = Client::connect(cli.daemon.clone()).await?;

    match cli.command {
        Commands::Add { pattern, cwd } => {
            let mut stream = client.add_files(pattern, cwd_or_current(cwd)?).await?;
            while let Some(status) = stream.message().await? {
                print_status(&status);
            }
        }
        Commands::List { pattern, cwd } => {
            let mut stream = client
                .list_files(pattern.unwrap_or_default(), cwd_or_current(cwd)?)
                .await?;
            while let Some(status) = stream.message().await? {
                print_status(&status);
            }
        }
        Commands::Remove { pattern, cwd } => {
            let mut stream = client.delete_files(pattern, cwd_or_current(cwd)?).await?;
            while let Some(status) = stream.message().await? {
                print_status(&status);
            }
        }
        Commands::Backup => {
            let cid = client.backup().await?;
            println!("{cid}");
        }
        Commands::Restore { cid } => {
            let mut stream = client.restore(cid).await?;
            while let Some(update) = stream.message().await? {
                if let Some(file) = update.file {
                    print_status(&file);
                }
            }
        }
    }

    Ok(())
}

fn cwd_or_current(cwd: Option<PathBuf>) -> Result<String> {
    let dir = match cwd {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    Ok(dir.to_string_lossy().into_owned())
}

fn print_status(status: &pinsync_rpc_types::FileStatus) {
    println!("{}\t{}", status.cid, status.absolute_path);
}
