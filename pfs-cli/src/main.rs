mod cli;
mod files;
mod serve;

use std::error::Error;
use std::process::ExitCode;

use clap::Parser;
use pfs_transport::ClusterList;

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    let cli = Cli::parse();
    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> Result<(), Box<dyn Error>> {
    let list = ClusterList::load(&cli.cluster_list)?;

    match &cli.command {
        Commands::Meta => serve::run_meta(&list).await,
        Commands::Node(cmd) => serve::run_node(&list, cmd).await,
        Commands::Put(cmd) => files::put(&list, cmd).await,
        Commands::Get(cmd) => files::get(&list, cmd).await,
        Commands::Stat(cmd) => files::stat(&list, cmd).await,
        Commands::Rm(cmd) => files::rm(&list, cmd).await,
    }
}
