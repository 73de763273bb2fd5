//! Client subcommands: put, get, stat, rm.

use std::error::Error;

use pfs_client::{Client, ClientConfig, ClusterList, Error as PfsError, OpenMode, BLOCK_SIZE};

use crate::cli::{GetCmd, PutCmd, RmCmd, StatCmd};

/// Bytes moved per client call when streaming a file in or out.
const CHUNK_SIZE: usize = 64 * BLOCK_SIZE as usize;

async fn connect(list: &ClusterList) -> Result<Client, Box<dyn Error>> {
    Ok(Client::initialize(ClientConfig::new(list.clone())).await?)
}

pub async fn put(list: &ClusterList, cmd: &PutCmd) -> Result<(), Box<dyn Error>> {
    let data = tokio::fs::read(&cmd.from).await?;
    let client = connect(list).await?;

    if cmd.force {
        match client.delete(&cmd.to).await {
            Ok(()) | Err(PfsError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
    }
    client.create(&cmd.to, cmd.stripe_width).await?;

    let fd = client.open(&cmd.to, OpenMode::ReadWrite).await?;
    let mut offset = 0u64;
    for chunk in data.chunks(CHUNK_SIZE) {
        let written = client.write(fd, chunk, offset).await?;
        offset += written as u64;
    }
    client.close(fd).await?;
    client.finish(client.client_id()).await?;

    log::info!("stored {} bytes as {:?}", data.len(), cmd.to);
    Ok(())
}

pub async fn get(list: &ClusterList, cmd: &GetCmd) -> Result<(), Box<dyn Error>> {
    let client = connect(list).await?;

    let fd = client.open(&cmd.from, OpenMode::Read).await?;
    let size = client.fstat(fd).await?.size;

    let mut data = vec![0u8; size as usize];
    let mut offset = 0usize;
    while offset < data.len() {
        let end = (offset + CHUNK_SIZE).min(data.len());
        let n = client.read(fd, &mut data[offset..end], offset as u64).await?;
        if n == 0 {
            break;
        }
        offset += n;
    }
    data.truncate(offset);

    tokio::fs::write(&cmd.to, &data).await?;
    client.close(fd).await?;
    client.finish(client.client_id()).await?;

    log::info!("fetched {} bytes from {:?}", data.len(), cmd.from);
    Ok(())
}

pub async fn stat(list: &ClusterList, cmd: &StatCmd) -> Result<(), Box<dyn Error>> {
    let client = connect(list).await?;

    let fd = client.open(&cmd.name, OpenMode::Read).await?;
    let meta = client.fstat(fd).await?;
    client.close(fd).await?;

    println!("name:         {}", meta.name);
    println!("size:         {}", meta.size);
    println!("ctime:        {}", meta.ctime);
    println!("mtime:        {}", meta.mtime);
    println!("stripe width: {}", meta.stripe_width);

    let stats = client.execstat();
    println!("session counters: {stats:?}");

    client.finish(client.client_id()).await?;
    Ok(())
}

pub async fn rm(list: &ClusterList, cmd: &RmCmd) -> Result<(), Box<dyn Error>> {
    let client = connect(list).await?;
    client.delete(&cmd.name).await?;
    client.finish(client.client_id()).await?;
    log::info!("deleted {:?}", cmd.name);
    Ok(())
}
