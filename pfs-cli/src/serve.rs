//! Daemon subcommands: metadata server and storage node.

use std::error::Error;

use pfs_meta::MetaServer;
use pfs_node::NodeServer;
use pfs_transport::ClusterList;

use crate::cli::NodeCmd;

pub async fn run_meta(list: &ClusterList) -> Result<(), Box<dyn Error>> {
    let server = MetaServer::bind(&list.meta, list.node_count() as u32).await?;
    server.run().await?;
    Ok(())
}

pub async fn run_node(list: &ClusterList, cmd: &NodeCmd) -> Result<(), Box<dyn Error>> {
    let addr = list
        .nodes
        .get(cmd.index)
        .ok_or_else(|| format!("node index {} not in cluster list", cmd.index))?;
    let server = NodeServer::bind(addr, cmd.storage.clone()).await?;
    server.run().await?;
    Ok(())
}
