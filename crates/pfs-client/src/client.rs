//! The client coherence agent.
//!
//! One [`Client`] owns: the unary metadata connection, one connection per
//! storage node, the long-lived token stream, the local token mirror, the
//! block cache and the open-file table. A background task reads the token
//! stream; it applies grants and close-acks to the token mirror in stream
//! order before waking the requesting call, and it services revocations
//! under the coordinator lock (write back, invalidate, split, acknowledge)
//! so no call can observe a torn state.
//!
//! The coordinator lock is released around storage-node I/O. Read and
//! write paths re-validate their token coverage after every reacquisition,
//! and an in-flight flush set keeps a revocation from acknowledging while
//! an unlocked eviction writeback of the revoked range is still on the
//! wire.
//!
//! The cache is authoritative for written data: user writes dirty cached
//! blocks and reach a storage node only on eviction, revocation or close.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use pfs_msg::{
    block_index, block_range, node_for_block, FileMetadata, MetaRequest, MetaResponse,
    NodeRequest, NodeResponse, TokenAction, TokenMode, TokenRequest, TokenResponse, BLOCK_SIZE,
};
use pfs_transport::{ConnectionReader, ConnectionWriter, PfsConnection, TransportError};
use time::OffsetDateTime;
use tokio::sync::{oneshot, Mutex, MutexGuard, Notify};

use crate::cache::{BlockCache, BlockKey, CacheBlock};
use crate::stats::{bump, Counters, ExecStats};
use crate::tokens::TokenSet;
use crate::{ClientConfig, Error, Result};

/// Mode a file is opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Reads only.
    Read = 1,
    /// Reads and writes.
    ReadWrite = 2,
}

#[derive(Debug, Clone)]
struct OpenFile {
    name: String,
    mode: OpenMode,
    /// Size as last reported by the metadata service, grown locally by
    /// this client's own writes. Reads are clamped against it.
    size: u64,
    stripe_width: u32,
}

/// Everything the coordinator lock guards: the open-file table, the local
/// token set and the block cache.
struct CoordState {
    open_files: HashMap<u32, OpenFile>,
    free_fds: BinaryHeap<Reverse<u32>>,
    next_fd: u32,
    tokens: TokenSet,
    cache: BlockCache,
    /// Evicted blocks being written back with the lock released. A
    /// revocation or close touching these ranges waits for them to land.
    flushing: HashSet<BlockKey>,
}

struct ClientInner {
    client_id: u32,
    meta: Mutex<PfsConnection>,
    nodes: Vec<Mutex<PfsConnection>>,
    stream_writer: Mutex<ConnectionWriter>,
    /// Serializes request/response cycles on the token stream: at most one
    /// REQUEST or CLOSE may be outstanding at a time.
    stream_turn: Mutex<()>,
    /// Wakes the call waiting for the stream's next GRANT or ACK.
    pending: parking_lot::Mutex<Option<oneshot::Sender<TokenResponse>>>,
    state: Mutex<CoordState>,
    /// Signaled each time an unlocked eviction writeback completes.
    flush_done: Notify,
    counters: Counters,
    finished: AtomicBool,
}

/// A PFS client.
pub struct Client {
    inner: Arc<ClientInner>,
    reader_task: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl Client {
    /// Connects to every process named in the cluster list, registers with
    /// the metadata service and opens the token stream.
    pub async fn initialize(config: ClientConfig) -> Result<Client> {
        let timeout = config.timeout;

        let mut meta = PfsConnection::connect(&config.cluster.meta, timeout).await?;
        expect_pong_meta(meta.call(&MetaRequest::Ping).await?)?;

        let client_id = match meta.call(&MetaRequest::Initialize).await? {
            MetaResponse::ClientId { client_id } => client_id,
            MetaResponse::Error(e) => return Err(e.into()),
            other => return Err(unexpected("client id", &other)),
        };

        let mut nodes = Vec::with_capacity(config.cluster.nodes.len());
        for addr in &config.cluster.nodes {
            let mut node = PfsConnection::connect(addr, timeout).await?;
            match node.call(&NodeRequest::Ping).await? {
                NodeResponse::Pong => {}
                other => return Err(unexpected("pong", &other)),
            }
            nodes.push(Mutex::new(node));
        }

        let mut stream = PfsConnection::connect(&config.cluster.meta, timeout).await?;
        match stream
            .call(&MetaRequest::OpenTokenStream { client_id })
            .await?
        {
            MetaResponse::Ok => {}
            MetaResponse::Error(e) => return Err(e.into()),
            other => return Err(unexpected("stream ok", &other)),
        }
        let (stream_reader, stream_writer) = stream.into_split();

        let inner = Arc::new(ClientInner {
            client_id,
            meta: Mutex::new(meta),
            nodes,
            stream_writer: Mutex::new(stream_writer),
            stream_turn: Mutex::new(()),
            pending: parking_lot::Mutex::new(None),
            state: Mutex::new(CoordState {
                open_files: HashMap::new(),
                free_fds: BinaryHeap::new(),
                next_fd: 1,
                tokens: TokenSet::default(),
                cache: BlockCache::new(config.cache_blocks),
                flushing: HashSet::new(),
            }),
            flush_done: Notify::new(),
            counters: Counters::default(),
            finished: AtomicBool::new(false),
        });

        let reader_task = tokio::spawn(run_stream_reader(Arc::downgrade(&inner), stream_reader));

        log::info!(
            "client {client_id} initialized, {} storage nodes",
            config.cluster.nodes.len()
        );
        Ok(Client {
            inner,
            reader_task: parking_lot::Mutex::new(Some(reader_task)),
        })
    }

    /// The id the metadata service assigned to this client.
    pub fn client_id(&self) -> u32 {
        self.inner.client_id
    }

    /// Creates a file striped over `stripe_width` storage nodes.
    pub async fn create(&self, name: &str, stripe_width: u32) -> Result<()> {
        if name.is_empty() {
            return Err(Error::InvalidArgument("empty file name".to_string()));
        }
        if stripe_width == 0 || stripe_width as usize > self.inner.nodes.len() {
            return Err(Error::InvalidArgument(format!(
                "stripe width {stripe_width} not in [1, {}]",
                self.inner.nodes.len()
            )));
        }

        let response = self
            .inner
            .meta
            .lock()
            .await
            .call(&MetaRequest::Create {
                name: name.into(),
                stripe_width,
            })
            .await?;
        expect_ok_meta(response)
    }

    /// Opens a file, returning a descriptor. A file may be open at most
    /// once per client.
    pub async fn open(&self, name: &str, mode: OpenMode) -> Result<u32> {
        if name.is_empty() {
            return Err(Error::InvalidArgument("empty file name".to_string()));
        }

        let meta = fetch_metadata(&self.inner, name).await?;

        let mut state = self.inner.state.lock().await;
        if state.open_files.values().any(|f| f.name == name) {
            return Err(Error::Busy(format!("file {name:?} is already open")));
        }

        let fd = match state.free_fds.pop() {
            Some(Reverse(fd)) => fd,
            None => {
                let fd = state.next_fd;
                state.next_fd += 1;
                fd
            }
        };
        state.open_files.insert(
            fd,
            OpenFile {
                name: name.to_string(),
                mode,
                size: meta.size,
                stripe_width: meta.stripe_width,
            },
        );
        log::debug!("opened {name:?} as fd {fd}, size {}", meta.size);
        Ok(fd)
    }

    /// Reads into `buf` at `offset`, returning the number of bytes read.
    /// Reads past EOF are truncated; a read entirely past EOF returns 0.
    pub async fn read(&self, fd: u32, buf: &mut [u8], offset: u64) -> Result<usize> {
        if buf.is_empty() {
            return Err(Error::InvalidArgument("zero-size buffer".to_string()));
        }
        let inner = &self.inner;

        let mut state = inner.state.lock().await;
        let file = lookup_fd(&state, fd)?;

        if offset >= file.size {
            return Ok(0);
        }
        let n = (buf.len() as u64).min(file.size - offset) as usize;
        let (start, end) = (offset, offset + n as u64 - 1);

        let mut index = block_index(start);
        while index <= block_index(end) {
            // Tokens can be revoked whenever the lock is released, so
            // coverage is re-established before each block is touched.
            if !state.tokens.covers(&file.name, start, end, false) {
                drop(state);
                acquire_token(inner, fd, &file.name, TokenMode::Read, start, end).await?;
                state = inner.state.lock().await;
                // The descriptor may have gone away while we waited.
                lookup_fd(&state, fd)?;
                continue;
            }

            let (block_start, block_end) = block_range(index);
            let seg_start = start.max(block_start);
            let seg_end = end.min(block_end);
            let in_block = (seg_start - block_start) as usize..(seg_end - block_start + 1) as usize;
            let in_buf = (seg_start - start) as usize..(seg_end - start + 1) as usize;

            let key = BlockKey::new(&file.name, index);
            let mut hit = false;
            if let Some(block) = state.cache.get_mut(&key) {
                buf[in_buf.clone()].copy_from_slice(&block.data[in_block.clone()]);
                hit = true;
            }
            if hit {
                bump(&inner.counters.read_hits);
                index += 1;
                continue;
            }

            // Miss: fetch with the coordinator lock released, so a
            // revocation is serviced while the round-trip is in flight.
            drop(state);
            let data = fetch_block(inner, &file.name, index, file.stripe_width).await?;
            state = inner.state.lock().await;
            lookup_fd(&state, fd)?;

            // The fetched bytes are stale if the covering token was revoked
            // while the lock was released; reacquire and redo this block.
            if !state.tokens.covers(&file.name, seg_start, seg_end, false) {
                continue;
            }
            buf[in_buf].copy_from_slice(&data[in_block]);

            // Only a block whose entire range is covered by held tokens may
            // live in the cache; edge blocks of an exact-range READ token
            // are served straight from the storage node.
            if let Some(mode) = state.tokens.mode_over(&file.name, block_start, block_end) {
                state = admit_block(inner, state, key, CacheBlock::clean(data, mode)).await?;
            }
            index += 1;
        }

        Ok(n)
    }

    /// Writes `buf` at `offset`, returning the number of bytes written.
    /// The data is buffered in the cache; storage nodes see it on
    /// eviction, revocation or close.
    pub async fn write(&self, fd: u32, buf: &[u8], offset: u64) -> Result<usize> {
        if buf.is_empty() {
            return Err(Error::InvalidArgument("zero-size buffer".to_string()));
        }
        let inner = &self.inner;

        let mut state = inner.state.lock().await;
        let file = lookup_fd(&state, fd)?;
        if file.mode != OpenMode::ReadWrite {
            return Err(Error::PermissionDenied(format!(
                "file {:?} is open read-only",
                file.name
            )));
        }

        let (start, end) = (offset, offset + buf.len() as u64 - 1);
        // The write token is block-aligned so that every dirty block is
        // fully covered by a WRITE token until it is flushed.
        let aligned_start = block_range(block_index(start)).0;
        let aligned_end = block_range(block_index(end)).1;

        let mut index = block_index(start);
        while index <= block_index(end) {
            if !state.tokens.covers(&file.name, aligned_start, aligned_end, true) {
                drop(state);
                acquire_token(
                    inner,
                    fd,
                    &file.name,
                    TokenMode::Write,
                    aligned_start,
                    aligned_end,
                )
                .await?;
                state = inner.state.lock().await;
                lookup_fd(&state, fd)?;
                continue;
            }

            let (block_start, block_end) = block_range(index);
            let seg_start = start.max(block_start);
            let seg_end = end.min(block_end);
            let in_block = (seg_start - block_start) as usize..(seg_end - block_start + 1) as usize;
            let in_buf = (seg_start - start) as usize..(seg_end - start + 1) as usize;

            let key = BlockKey::new(&file.name, index);
            let mut hit = false;
            if let Some(block) = state.cache.get_mut(&key) {
                block.data[in_block.clone()].copy_from_slice(&buf[in_buf.clone()]);
                block.dirty = true;
                block.mode = TokenMode::Write;
                hit = true;
            }
            if hit {
                bump(&inner.counters.write_hits);
                index += 1;
                continue;
            }

            let covers_whole_block = seg_start == block_start && seg_end == block_end;
            let mut data = if covers_whole_block {
                vec![0u8; BLOCK_SIZE as usize]
            } else {
                // Partial block: merge with whatever the storage node has,
                // fetching with the coordinator lock released. A
                // never-written region reads back as zeros.
                drop(state);
                let data = fetch_block(inner, &file.name, index, file.stripe_width).await?;
                state = inner.state.lock().await;
                lookup_fd(&state, fd)?;
                if !state.tokens.covers(&file.name, block_start, block_end, true) {
                    // Revoked mid-fetch; the merge base is stale.
                    continue;
                }
                data
            };
            data[in_block].copy_from_slice(&buf[in_buf]);

            state = admit_block(
                inner,
                state,
                key,
                CacheBlock {
                    data,
                    dirty: true,
                    mode: TokenMode::Write,
                },
            )
            .await?;
            index += 1;
        }

        if let Some(file) = state.open_files.get_mut(&fd) {
            file.size = file.size.max(end + 1);
        }

        // Report the write to the metadata service right away so fstat
        // observes the growth even though no storage node has been touched.
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let response = inner
            .meta
            .lock()
            .await
            .call(&MetaRequest::Update {
                name: file.name.as_str().into(),
                size: end + 1,
                mtime: now,
            })
            .await?;
        expect_ok_meta(response)?;

        Ok(buf.len())
    }

    /// Closes a descriptor: flushes and drops the file's cached blocks,
    /// then releases every token held on the file.
    pub async fn close(&self, fd: u32) -> Result<()> {
        let inner = &self.inner;

        let state = inner.state.lock().await;
        let file = lookup_fd(&state, fd)?;
        drop(state);

        // Let any in-flight eviction writeback for this file land first,
        // then flush and drop what is still cached.
        let mut state = lock_after_flushes(inner, &file.name, 0, u64::MAX).await;
        let blocks = state.cache.take_file(&file.name);
        for (key, block) in blocks {
            if block.dirty {
                write_back(inner, &key, &block.data, file.stripe_width).await?;
                bump(&inner.counters.close_writebacks);
            }
            bump(&inner.counters.close_evictions);
        }
        drop(state);

        {
            let _turn = inner.stream_turn.lock().await;
            let ack = stream_round_trip(inner, &TokenRequest::close(inner.client_id, fd, &file.name))
                .await?;
            if ack.action != TokenAction::Ack {
                return Err(unexpected_action("close ack", ack.action));
            }
        }

        // The reader task dropped the file's tokens when the ack arrived.
        let mut state = inner.state.lock().await;
        state.open_files.remove(&fd);
        state.free_fds.push(Reverse(fd));
        log::debug!("closed fd {fd} ({:?})", file.name);
        Ok(())
    }

    /// Deletes a file everywhere. Fails with [`Error::Busy`] while any
    /// client holds a token on it.
    pub async fn delete(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::InvalidArgument("empty file name".to_string()));
        }
        let inner = &self.inner;

        let response = inner
            .meta
            .lock()
            .await
            .call(&MetaRequest::Delete { name: name.into() })
            .await?;
        expect_ok_meta(response)?;

        // Metadata is gone; now drop the stripes.
        for node in &inner.nodes {
            let response = node
                .lock()
                .await
                .call(&NodeRequest::Delete { name: name.into() })
                .await?;
            match response {
                NodeResponse::Deleted => {}
                NodeResponse::Error(e) => return Err(e.into()),
                other => return Err(unexpected("delete ack", &other)),
            }
        }
        log::debug!("deleted {name:?}");
        Ok(())
    }

    /// Fetches fresh metadata for an open file and refreshes the local
    /// size the descriptor clamps reads against.
    pub async fn fstat(&self, fd: u32) -> Result<FileMetadata> {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;
        let name = lookup_fd(&state, fd)?.name;

        let meta = fetch_metadata(inner, &name).await?;
        if let Some(file) = state.open_files.get_mut(&fd) {
            file.size = meta.size;
        }
        Ok(meta)
    }

    /// Snapshot of the cache counters.
    pub fn execstat(&self) -> ExecStats {
        self.inner.counters.snapshot()
    }

    /// Closes every open descriptor, notifies the metadata service and
    /// tears the client down. Idempotent.
    pub async fn finish(&self, client_id: u32) -> Result<()> {
        let inner = &self.inner;
        if client_id != inner.client_id {
            return Err(Error::InvalidArgument(format!(
                "client id {client_id} does not belong to this client"
            )));
        }
        if inner.finished.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let fds: Vec<u32> = inner.state.lock().await.open_files.keys().copied().collect();
        for fd in fds {
            self.close(fd).await?;
        }

        let response = inner
            .meta
            .lock()
            .await
            .call(&MetaRequest::Shutdown { client_id })
            .await?;
        expect_ok_meta(response)?;

        if let Some(task) = self
            .reader_task
            .lock()
            .take()
        {
            task.abort();
        }
        log::info!("client {client_id} finished");
        Ok(())
    }
}

fn lookup_fd(state: &CoordState, fd: u32) -> Result<OpenFile> {
    state
        .open_files
        .get(&fd)
        .cloned()
        .ok_or_else(|| Error::NotFound(format!("file descriptor {fd}")))
}

async fn fetch_metadata(inner: &ClientInner, name: &str) -> Result<FileMetadata> {
    let response = inner
        .meta
        .lock()
        .await
        .call(&MetaRequest::Fetch { name: name.into() })
        .await?;
    match response {
        MetaResponse::Metadata { meta } => Ok(meta),
        MetaResponse::Error(e) => Err(e.into()),
        other => Err(unexpected("metadata", &other)),
    }
}

/// Requests a token and waits for the grant. The stream-turn lock keeps
/// exactly one request outstanding; the coordinator lock must NOT be held
/// here, so the reader task can service revocations while we wait. By the
/// time this returns, the reader task has already recorded the granted
/// token in the local mirror.
async fn acquire_token(
    inner: &ClientInner,
    fd: u32,
    name: &str,
    mode: TokenMode,
    start: u64,
    end: u64,
) -> Result<()> {
    let _turn = inner.stream_turn.lock().await;
    log::debug!("requesting {mode} token [{start}, {end}] on {name:?}");
    let response = stream_round_trip(
        inner,
        &TokenRequest::acquire(inner.client_id, fd, name, mode, start, end),
    )
    .await?;
    match response.action {
        TokenAction::Grant => {
            log::debug!("granted {mode} token [{}, {}] on {name:?}", response.start, response.end);
            Ok(())
        }
        other => Err(unexpected_action("grant", other)),
    }
}

/// Sends one stream request and waits for the matching GRANT or ACK,
/// delivered by the reader task. Caller holds the stream-turn lock.
async fn stream_round_trip(
    inner: &ClientInner,
    request: &TokenRequest,
) -> Result<TokenResponse> {
    let (tx, rx) = oneshot::channel();
    {
        let mut pending = inner.pending.lock();
        debug_assert!(pending.is_none(), "a stream request is already outstanding");
        *pending = Some(tx);
    }

    if let Err(e) = inner.stream_writer.lock().await.send(request).await {
        inner.pending.lock().take();
        return Err(e.into());
    }

    rx.await
        .map_err(|_| Error::Transport(TransportError::Closed))
}

async fn fetch_block(
    inner: &ClientInner,
    name: &str,
    index: u64,
    stripe_width: u32,
) -> Result<Vec<u8>> {
    let node_index = node_for_block(index, stripe_width);
    let (offset, _) = block_range(index);
    let response = inner.nodes[node_index]
        .lock()
        .await
        .call(&NodeRequest::Read {
            name: name.into(),
            offset,
            size: BLOCK_SIZE as u32,
        })
        .await?;
    match response {
        NodeResponse::Data { mut data } => {
            data.resize(BLOCK_SIZE as usize, 0);
            Ok(data)
        }
        NodeResponse::Error(e) => Err(e.into()),
        other => Err(unexpected("block data", &other)),
    }
}

async fn write_back(
    inner: &ClientInner,
    key: &BlockKey,
    data: &[u8],
    stripe_width: u32,
) -> Result<()> {
    let node_index = node_for_block(key.index, stripe_width);
    let (offset, _) = key.byte_range();
    log::debug!("writing back block {} of {:?}", key.index, key.name);
    let response = inner.nodes[node_index]
        .lock()
        .await
        .call(&NodeRequest::Write {
            name: key.name.as_str().into(),
            offset,
            data: data.to_vec(),
        })
        .await?;
    match response {
        NodeResponse::Written { .. } => Ok(()),
        NodeResponse::Error(e) => Err(e.into()),
        other => Err(unexpected("write ack", &other)),
    }
}

/// Admits a block. A dirty LRU victim is flushed with the coordinator lock
/// released; it is registered in the in-flight flush set first, so a
/// concurrent revocation of its range waits for the flush to land before
/// acknowledging.
async fn admit_block<'a>(
    inner: &'a ClientInner,
    mut state: MutexGuard<'a, CoordState>,
    key: BlockKey,
    block: CacheBlock,
) -> Result<MutexGuard<'a, CoordState>> {
    if let Some((victim_key, victim)) = state.cache.admit(key, block) {
        if victim.dirty {
            let width = stripe_width_of(&state, &victim_key.name);
            state.flushing.insert(victim_key.clone());
            drop(state);

            let flushed = write_back(inner, &victim_key, &victim.data, width).await;

            state = inner.state.lock().await;
            state.flushing.remove(&victim_key);
            inner.flush_done.notify_waiters();
            flushed?;
            bump(&inner.counters.writebacks);
        }
        bump(&inner.counters.evictions);
    }
    Ok(state)
}

/// Locks the coordinator once no unlocked flush is in flight for blocks of
/// `name` intersecting `[start, end]`.
async fn lock_after_flushes<'a>(
    inner: &'a ClientInner,
    name: &str,
    start: u64,
    end: u64,
) -> MutexGuard<'a, CoordState> {
    loop {
        let state = inner.state.lock().await;
        let busy = state.flushing.iter().any(|key| {
            let (block_start, block_end) = key.byte_range();
            key.name == name && block_end >= start && block_start <= end
        });
        if !busy {
            return state;
        }
        // Register for the wakeup before releasing the lock so a flush
        // landing in between cannot be missed.
        let notified = inner.flush_done.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        drop(state);
        notified.await;
    }
}

fn stripe_width_of(state: &CoordState, name: &str) -> u32 {
    state
        .open_files
        .values()
        .find(|f| f.name == name)
        .map(|f| f.stripe_width)
        .unwrap_or(1)
}

/// Token stream reader task. Every message mutates the local token mirror
/// here, before the next frame is read, so grants, close-acks and
/// revocations land in stream order; the call parked in
/// [`stream_round_trip`] is only woken afterwards.
async fn run_stream_reader(inner: Weak<ClientInner>, mut reader: ConnectionReader) {
    loop {
        let message: TokenResponse = match reader.recv().await {
            Ok(message) => message,
            Err(e) => {
                if !e.is_closed() {
                    log::error!("token stream failed: {e}");
                }
                break;
            }
        };

        let Some(inner) = inner.upgrade() else {
            break;
        };

        match message.action {
            TokenAction::Grant | TokenAction::Ack => {
                {
                    let mut state = inner.state.lock().await;
                    match message.action {
                        TokenAction::Grant => state.tokens.grant(
                            &message.name,
                            message.mode,
                            message.start,
                            message.end,
                        ),
                        _ => state.tokens.remove_file(&message.name),
                    }
                }
                let waiter = inner.pending.lock().take();
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(message);
                    }
                    None => log::warn!("unsolicited {:?} on token stream", message.action),
                }
            }
            TokenAction::Revoke => {
                if let Err(e) = handle_revoke(&inner, &message).await {
                    log::error!(
                        "failed to service revocation of [{}, {}] on {:?}: {e}",
                        message.start,
                        message.end,
                        message.name
                    );
                }
            }
        }
    }
}

/// Services one revocation: under the coordinator lock, flush and drop
/// every cached block intersecting the revoked range and split the local
/// tokens exactly as the metadata service did; then acknowledge. No call
/// can be served from the revoked bytes in between, because the lock is
/// held for the whole mutation.
async fn handle_revoke(inner: &Arc<ClientInner>, message: &TokenResponse) -> Result<()> {
    let name: &str = &message.name;
    log::debug!(
        "revocation of {} [{}, {}] on {name:?}",
        message.mode,
        message.start,
        message.end
    );

    // An eviction may be flushing a block of this range right now with the
    // lock released; those bytes must land before the range is given up.
    let mut state = lock_after_flushes(inner, name, message.start, message.end).await;
    let width = stripe_width_of(&state, name);
    let victims = state.cache.take_range(name, message.start, message.end);
    for (key, block) in victims {
        if block.dirty {
            write_back(inner, &key, &block.data, width).await?;
            bump(&inner.counters.writebacks);
        }
        bump(&inner.counters.invalidations);
    }
    state.tokens.revoke(name, message.start, message.end);
    drop(state);

    inner
        .stream_writer
        .lock()
        .await
        .send(&TokenRequest::ack(
            inner.client_id,
            name,
            message.start,
            message.end,
        ))
        .await?;
    Ok(())
}

fn expect_ok_meta(response: MetaResponse) -> Result<()> {
    match response {
        MetaResponse::Ok => Ok(()),
        MetaResponse::Error(e) => Err(e.into()),
        other => Err(unexpected("ok", &other)),
    }
}

fn expect_pong_meta(response: MetaResponse) -> Result<()> {
    match response {
        MetaResponse::Pong => Ok(()),
        MetaResponse::Error(e) => Err(e.into()),
        other => Err(unexpected("pong", &other)),
    }
}

fn unexpected(expected: &str, got: &dyn std::fmt::Debug) -> Error {
    Error::Protocol(format!("expected {expected}, got {got:?}"))
}

fn unexpected_action(expected: &str, got: TokenAction) -> Error {
    Error::Protocol(format!("expected {expected}, got {got:?}"))
}
