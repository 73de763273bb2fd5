//! Byte-range token engine.
//!
//! The engine owns, per file, an ordered list of granted tokens and
//! arbitrates every grant and revocation. Each connected client has an
//! outbox channel; grants and revocations are queued there and drained by
//! the client's stream-writer task, so revoke delivery never blocks on
//! request processing.
//!
//! Locking: every file entry carries a grant gate (an async mutex held for
//! the whole request, serializing grants on that file) and a token list
//! mutex (held only to carve and to insert). The revoke-acknowledge wait
//! happens with the list lock released, so token traffic on other files is
//! never blocked behind it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use pfs_msg::{TokenMode, TokenResponse};
use tokio::sync::{mpsc, oneshot};

/// One granted byte-range token, as stored in the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub client_id: u32,
    pub mode: TokenMode,
    /// First byte of the range.
    pub start: u64,
    /// Last byte of the range, inclusive.
    pub end: u64,
}

impl Token {
    fn overlaps(&self, start: u64, end: u64) -> bool {
        self.end >= start && self.start <= end
    }

    /// Overlap, or exact adjacency, with another same-file range.
    fn touches(&self, start: u64, end: u64) -> bool {
        self.start <= end.saturating_add(1) && start <= self.end.saturating_add(1)
    }
}

/// The part of a conflicting token that must be taken away from its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revocation {
    pub client_id: u32,
    pub mode: TokenMode,
    pub start: u64,
    pub end: u64,
}

struct FileTokens {
    gate: tokio::sync::Mutex<()>,
    list: Mutex<Vec<Token>>,
}

impl FileTokens {
    fn new() -> Self {
        FileTokens {
            gate: tokio::sync::Mutex::new(()),
            list: Mutex::new(Vec::new()),
        }
    }
}

/// Pending revocations are matched to their acknowledgment by exact
/// `(client, file, start, end)` identity.
type AckKey = (u32, String, u64, u64);

pub struct TokenEngine {
    files: Mutex<HashMap<String, Arc<FileTokens>>>,
    outboxes: Mutex<HashMap<u32, mpsc::UnboundedSender<TokenResponse>>>,
    pending_acks: Mutex<HashMap<AckKey, oneshot::Sender<()>>>,
}

impl TokenEngine {
    pub fn new() -> Self {
        TokenEngine {
            files: Mutex::new(HashMap::new()),
            outboxes: Mutex::new(HashMap::new()),
            pending_acks: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a client's token stream and returns the receiving end of
    /// its outbox. A second registration for the same id replaces the first.
    pub fn register_client(&self, client_id: u32) -> mpsc::UnboundedReceiver<TokenResponse> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.outboxes
            .lock()
            .insert(client_id, tx);
        log::debug!("registered token stream for client {client_id}");
        rx
    }

    /// Queues a message on a client's outbox. Returns false if the client
    /// has no live stream.
    pub fn notify(&self, client_id: u32, message: TokenResponse) -> bool {
        let outboxes = self.outboxes.lock();
        match outboxes.get(&client_id) {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }

    /// Handles one token request: carves conflicting tokens, revokes the
    /// overlapping portions from their owners, waits for every
    /// acknowledgment, then inserts the new token and queues the grant.
    pub async fn acquire(&self, client_id: u32, name: &str, mode: TokenMode, start: u64, end: u64) {
        let end = if start > end {
            log::warn!("client {client_id} requested inverted range [{start}, {end}] on {name:?}");
            start
        } else {
            end
        };

        let entry = self.file_entry(name);
        let _gate = entry.gate.lock().await;

        let revocations = {
            let mut list = entry.list.lock();
            carve(&mut list, mode, start, end)
        };

        let mut waiters = Vec::with_capacity(revocations.len());
        for revocation in revocations {
            log::debug!(
                "revoking {} [{}, {}] of {name:?} from client {}",
                revocation.mode,
                revocation.start,
                revocation.end,
                revocation.client_id
            );
            let (tx, rx) = oneshot::channel();
            let key = (
                revocation.client_id,
                name.to_string(),
                revocation.start,
                revocation.end,
            );
            self.pending_acks
                .lock()
                .insert(key.clone(), tx);

            let delivered = self.notify(
                revocation.client_id,
                TokenResponse::revoke(
                    revocation.client_id,
                    name,
                    revocation.mode,
                    revocation.start,
                    revocation.end,
                ),
            );
            if delivered {
                waiters.push(rx);
            } else {
                // The owner is gone; its tokens were already carved out, so
                // the revocation is trivially complete.
                log::warn!(
                    "client {} unreachable for revoke on {name:?}",
                    revocation.client_id
                );
                self.pending_acks
                    .lock()
                    .remove(&key);
            }
        }

        // Wait with the token list unlocked; only this file's gate is held.
        for rx in waiters {
            // A dropped sender means the owner shut down mid-revoke, which
            // releases its tokens and counts as acknowledged.
            let _ = rx.await;
        }

        {
            let mut list = entry.list.lock();
            insert_granted(
                &mut list,
                Token {
                    client_id,
                    mode,
                    start,
                    end,
                },
            );
        }

        log::debug!("granting {mode} [{start}, {end}] of {name:?} to client {client_id}");
        let delivered = self.notify(
            client_id,
            TokenResponse::grant(client_id, name, mode, start, end),
        );
        if !delivered {
            // The requester went away before its grant could be delivered;
            // an undeliverable token must not outlive its owner.
            entry.list.lock().retain(|t| t.client_id != client_id);
            log::warn!("client {client_id} gone before grant on {name:?}, token released");
        }
    }

    /// Completes a pending revocation.
    pub fn ack(&self, client_id: u32, name: &str, start: u64, end: u64) {
        let key = (client_id, name.to_string(), start, end);
        let waiter = self
            .pending_acks
            .lock()
            .remove(&key);
        match waiter {
            Some(tx) => {
                let _ = tx.send(());
            }
            None => log::warn!(
                "client {client_id} acked unknown revocation [{start}, {end}] on {name:?}"
            ),
        }
    }

    /// Drops every token `client_id` holds on `name` (explicit CLOSE), and
    /// completes any revocation still pending against that pair.
    pub fn release_file(&self, client_id: u32, name: &str) {
        let entry = self.file_entry(name);
        entry
            .list
            .lock()
            .retain(|t| t.client_id != client_id);
        self.complete_pending(|key| key.0 == client_id && key.1 == name);
        log::debug!("released tokens of client {client_id} on {name:?}");
    }

    /// Drops every token the client holds across all files (shutdown or
    /// stream break) and unregisters its outbox.
    pub fn release_client(&self, client_id: u32) {
        self.outboxes
            .lock()
            .remove(&client_id);
        let files = self.files.lock();
        for entry in files.values() {
            entry
                .list
                .lock()
                .retain(|t| t.client_id != client_id);
        }
        drop(files);
        self.complete_pending(|key| key.0 == client_id);
        log::info!("released all tokens of client {client_id}");
    }

    /// Whether any client holds a token on the file.
    pub fn file_has_tokens(&self, name: &str) -> bool {
        let files = self.files.lock();
        match files.get(name) {
            Some(entry) => !entry.list.lock().is_empty(),
            None => false,
        }
    }

    /// Drops the table entry of a deleted file.
    pub fn forget_file(&self, name: &str) {
        self.files
            .lock()
            .remove(name);
    }

    /// Snapshot of all live tokens, for the periodic debug dump and tests.
    pub fn snapshot(&self) -> Vec<(String, Vec<Token>)> {
        let files = self.files.lock();
        files
            .iter()
            .map(|(name, entry)| {
                (
                    name.clone(),
                    entry.list.lock().clone(),
                )
            })
            .filter(|(_, tokens)| !tokens.is_empty())
            .collect()
    }

    /// Logs the current token table at debug level.
    pub fn dump_state(&self) {
        let snapshot = self.snapshot();
        if snapshot.is_empty() {
            log::debug!("token table empty");
            return;
        }
        for (name, tokens) in snapshot {
            log::debug!("tokens for {name:?}:");
            for t in tokens {
                log::debug!(
                    "  [{}, {}] ({}) client {}",
                    t.start,
                    t.end,
                    t.mode,
                    t.client_id
                );
            }
        }
    }

    fn file_entry(&self, name: &str) -> Arc<FileTokens> {
        self.files
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(FileTokens::new()))
            .clone()
    }

    fn complete_pending<F>(&self, mut matches: F)
    where
        F: FnMut(&AckKey) -> bool,
    {
        let mut pending = self.pending_acks.lock();
        let keys: Vec<AckKey> = pending.keys().filter(|k| matches(k)).cloned().collect();
        for key in keys {
            if let Some(tx) = pending.remove(&key) {
                let _ = tx.send(());
            }
        }
    }
}

impl Default for TokenEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Removes every token conflicting with a `[start, end]` request of `mode`
/// from the list, reinserting non-overlapping prefixes and suffixes for
/// their owners, and returns the overlapping portions to revoke.
fn carve(list: &mut Vec<Token>, mode: TokenMode, start: u64, end: u64) -> Vec<Revocation> {
    let mut revoked = Vec::new();
    let mut kept = Vec::with_capacity(list.len());

    for token in list.drain(..) {
        if !(token.overlaps(start, end) && token.mode.conflicts_with(mode)) {
            kept.push(token);
            continue;
        }

        if token.start < start {
            kept.push(Token {
                end: start - 1,
                ..token.clone()
            });
        }
        if token.end > end {
            kept.push(Token {
                start: end + 1,
                ..token.clone()
            });
        }
        revoked.push(Revocation {
            client_id: token.client_id,
            mode: token.mode,
            start: token.start.max(start),
            end: token.end.min(end),
        });
    }

    *list = kept;
    revoked
}

/// Inserts a freshly granted token, merging any same-client same-mode
/// token it overlaps or abuts.
fn insert_granted(list: &mut Vec<Token>, mut token: Token) {
    list.retain(|t| {
        if t.client_id == token.client_id && t.mode == token.mode && t.touches(token.start, token.end)
        {
            token.start = token.start.min(t.start);
            token.end = token.end.max(t.end);
            false
        } else {
            true
        }
    });
    list.push(token);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token(client_id: u32, mode: TokenMode, start: u64, end: u64) -> Token {
        Token {
            client_id,
            mode,
            start,
            end,
        }
    }

    #[test]
    fn test_carve_splits_overlapping_writer() {
        // Holder: WRITE [0, 99]. Request: WRITE [50, 149].
        let mut list = vec![token(1, TokenMode::Write, 0, 99)];
        let revoked = carve(&mut list, TokenMode::Write, 50, 149);

        assert_eq!(list, vec![token(1, TokenMode::Write, 0, 49)]);
        assert_eq!(
            revoked,
            vec![Revocation {
                client_id: 1,
                mode: TokenMode::Write,
                start: 50,
                end: 99,
            }]
        );
    }

    #[test]
    fn test_carve_keeps_prefix_and_suffix() {
        let mut list = vec![token(1, TokenMode::Write, 0, 199)];
        let revoked = carve(&mut list, TokenMode::Read, 50, 99);

        assert_eq!(
            list,
            vec![
                token(1, TokenMode::Write, 0, 49),
                token(1, TokenMode::Write, 100, 199),
            ]
        );
        assert_eq!(revoked.len(), 1);
        assert_eq!((revoked[0].start, revoked[0].end), (50, 99));
    }

    #[test]
    fn test_carve_ignores_read_read_overlap() {
        let mut list = vec![token(1, TokenMode::Read, 0, 99)];
        let revoked = carve(&mut list, TokenMode::Read, 0, 99);
        assert_eq!(list, vec![token(1, TokenMode::Read, 0, 99)]);
        assert!(revoked.is_empty());
    }

    #[test]
    fn test_carve_ignores_disjoint_ranges() {
        let mut list = vec![token(1, TokenMode::Write, 0, 9)];
        let revoked = carve(&mut list, TokenMode::Write, 4096, 4105);
        assert_eq!(list.len(), 1);
        assert!(revoked.is_empty());
    }

    #[test]
    fn test_carve_hits_every_conflicting_holder() {
        let mut list = vec![
            token(1, TokenMode::Read, 0, 9),
            token(2, TokenMode::Read, 5, 14),
            token(3, TokenMode::Write, 20, 29),
        ];
        let revoked = carve(&mut list, TokenMode::Write, 0, 24);

        assert_eq!(list, vec![token(3, TokenMode::Write, 25, 29)]);
        assert_eq!(revoked.len(), 3);
    }

    #[test]
    fn test_insert_granted_coalesces_same_client_same_mode() {
        let mut list = vec![
            token(1, TokenMode::Write, 0, 49),
            token(2, TokenMode::Write, 200, 299),
        ];
        insert_granted(&mut list, token(1, TokenMode::Write, 50, 149));

        assert_eq!(list.len(), 2);
        assert!(list.contains(&token(1, TokenMode::Write, 0, 149)));
        assert!(list.contains(&token(2, TokenMode::Write, 200, 299)));
    }

    #[test]
    fn test_insert_granted_does_not_merge_across_modes() {
        let mut list = vec![token(1, TokenMode::Read, 0, 49)];
        insert_granted(&mut list, token(1, TokenMode::Write, 50, 99));
        assert_eq!(list.len(), 2);
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn test_acquire_grants_without_conflicts() {
        let engine = TokenEngine::new();
        let mut rx = engine.register_client(1);

        engine.acquire(1, "f", TokenMode::Write, 0, 99).await;

        let grant = rx.recv().await.unwrap();
        assert_eq!(grant, TokenResponse::grant(1, "f", TokenMode::Write, 0, 99));
        assert!(engine.file_has_tokens("f"));
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn test_acquire_waits_for_revoke_ack() {
        let engine = Arc::new(TokenEngine::new());
        let mut rx_a = engine.register_client(1);
        let mut rx_b = engine.register_client(2);

        engine.acquire(1, "f", TokenMode::Write, 0, 99).await;
        let _ = rx_a.recv().await.unwrap();

        // B requests an overlapping write; A must be revoked first.
        let engine2 = engine.clone();
        let b = tokio::spawn(async move {
            engine2.acquire(2, "f", TokenMode::Write, 50, 149).await;
        });

        let revoke = rx_a.recv().await.unwrap();
        assert_eq!(
            revoke,
            TokenResponse::revoke(1, "f", TokenMode::Write, 50, 99)
        );
        assert!(!b.is_finished());

        engine.ack(1, "f", 50, 99);
        b.await.unwrap();

        let grant = rx_b.recv().await.unwrap();
        assert_eq!(
            grant,
            TokenResponse::grant(2, "f", TokenMode::Write, 50, 149)
        );

        // A keeps the residual prefix.
        let snapshot = engine.snapshot();
        let tokens = &snapshot.iter().find(|(n, _)| n == "f").unwrap().1;
        assert!(tokens.contains(&token(1, TokenMode::Write, 0, 49)));
        assert!(tokens.contains(&token(2, TokenMode::Write, 50, 149)));
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn test_release_client_unblocks_pending_revocation() {
        let engine = Arc::new(TokenEngine::new());
        let mut rx_a = engine.register_client(1);
        let mut rx_b = engine.register_client(2);

        engine.acquire(1, "f", TokenMode::Write, 0, 99).await;
        let _ = rx_a.recv().await.unwrap();

        let engine2 = engine.clone();
        let b = tokio::spawn(async move {
            engine2.acquire(2, "f", TokenMode::Read, 0, 9).await;
        });
        let _ = rx_a.recv().await.unwrap();

        // A never acks; it disconnects instead.
        engine.release_client(1);
        b.await.unwrap();
        assert_eq!(
            rx_b.recv().await.unwrap(),
            TokenResponse::grant(2, "f", TokenMode::Read, 0, 9)
        );
    }

    #[test_log::test(tokio::test(flavor = "multi_thread"))]
    async fn test_close_releases_only_that_file() {
        let engine = TokenEngine::new();
        let mut rx = engine.register_client(1);

        engine.acquire(1, "f", TokenMode::Read, 0, 0).await;
        engine.acquire(1, "g", TokenMode::Read, 0, 0).await;
        let _ = rx.recv().await.unwrap();
        let _ = rx.recv().await.unwrap();

        engine.release_file(1, "f");
        assert!(!engine.file_has_tokens("f"));
        assert!(engine.file_has_tokens("g"));
    }
}
