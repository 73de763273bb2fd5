use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(version, about = "PFS cluster daemons and client tools", long_about = None)]
pub struct Cli {
    /// Cluster bootstrap file: line 1 the metadata service, following
    /// lines the storage nodes, one host:port per line.
    #[arg(short = 'l', long, default_value = "pfs_list.txt")]
    pub cluster_list: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Runs the metadata server named on line 1 of the cluster list.
    Meta,
    /// Runs one storage node from the cluster list.
    Node(NodeCmd),
    /// Copies a local file into the cluster.
    Put(PutCmd),
    /// Copies a file out of the cluster.
    Get(GetCmd),
    /// Prints a file's metadata and the session's cache counters.
    Stat(StatCmd),
    /// Deletes a file from the cluster.
    Rm(RmCmd),
}

#[derive(Parser, Debug)]
pub struct NodeCmd {
    /// Node index into the cluster list (0-based).
    pub index: usize,

    /// Directory the node stores its files under.
    #[arg(short, long, default_value = "pfs_storage")]
    pub storage: PathBuf,
}

#[derive(Parser, Debug)]
pub struct PutCmd {
    /// Local source file.
    pub from: PathBuf,
    /// Name of the file inside the cluster.
    pub to: String,

    /// Number of storage nodes to stripe the file over.
    #[arg(short = 'w', long, default_value_t = 1)]
    pub stripe_width: u32,

    /// Overwrite an existing file.
    #[arg(short, long)]
    pub force: bool,
}

#[derive(Parser, Debug)]
pub struct GetCmd {
    /// Name of the file inside the cluster.
    pub from: String,
    /// Local destination file.
    pub to: PathBuf,
}

#[derive(Parser, Debug)]
pub struct StatCmd {
    pub name: String,
}

#[derive(Parser, Debug)]
pub struct RmCmd {
    pub name: String,
}
