//! The token-versioned batch log.
//!
//! An append-only chain of event batches, all sharing the current token id.
//! The head batch is open and accepts new paths; every older batch is closed
//! and immutable. Serving a query freezes the head, which is the boundary
//! between what the client has seen and what comes next. A resync replaces
//! the whole chain under a fresh token id, implicitly invalidating every
//! outstanding client token.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::daemon::token::{self, format_token};

/// One contiguous interval of observed changes.
#[derive(Debug)]
pub struct Batch {
    seq: u64,
    /// Worktree-relative paths in forward-slash form. A set, not a multiset:
    /// duplicates collapse at append time.
    paths: BTreeSet<String>,
}

impl Batch {
    fn new(seq: u64) -> Self {
        Self {
            seq,
            paths: BTreeSet::new(),
        }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(String::as_str)
    }
}

/// Outcome of a token query. Closed batches are handed out as `Arc` clones
/// so the caller can serialise after releasing the log mutex; a concurrent
/// resync never waits on a slow client.
#[derive(Debug)]
pub struct QueryReply {
    /// Wire token to hand back to the client.
    pub token: String,
    /// Batches newer than the client's sequence number.
    pub batches: Vec<Arc<Batch>>,
    /// The client token was stale; it must assume everything changed.
    pub trivial: bool,
}

impl QueryReply {
    /// Union of the reply's paths, deduplicated across batches.
    pub fn paths(&self) -> BTreeSet<&str> {
        self.batches.iter().flat_map(|b| b.paths()).collect()
    }
}

#[derive(Debug)]
pub struct BatchLog {
    token_id: String,
    /// Closed batches, oldest first; sequence numbers strictly increasing.
    closed: Vec<Arc<Batch>>,
    /// Open head; allocated lazily on the first append after a freeze.
    open: Option<Batch>,
    /// Sequence number the next allocated head will carry. Kept strictly
    /// greater than any sequence number already handed to a client, so a
    /// change arriving after a query is always visible to the next one.
    next_seq: u64,
}

impl BatchLog {
    pub fn new(token_id: String) -> Self {
        Self {
            token_id,
            closed: Vec::new(),
            open: None,
            next_seq: 0,
        }
    }

    pub fn token_id(&self) -> &str {
        &self.token_id
    }

    /// Sequence number of the current head.
    pub fn head_seq(&self) -> u64 {
        if let Some(open) = &self.open {
            open.seq
        } else if let Some(last) = self.closed.last() {
            last.seq
        } else {
            0
        }
    }

    /// Wire form of the current token.
    pub fn current_token(&self) -> String {
        format_token(&self.token_id, self.head_seq())
    }

    /// Record one reportable worktree-relative path into the open head.
    pub fn append(&mut self, rel_path: String) {
        let next_seq = self.next_seq;
        let open = self.open.get_or_insert_with(|| Batch::new(next_seq));
        open.paths.insert(rel_path);
    }

    /// Answer a query and freeze the head.
    ///
    /// A token with a different id (or one we cannot parse) gets a trivial
    /// reply: the current token and no batches, meaning "assume everything
    /// changed". A matching token collects every batch with a sequence
    /// number greater than the client's.
    pub fn query(&mut self, client_token: &str) -> QueryReply {
        let head_seq = self.head_seq();
        let token = format_token(&self.token_id, head_seq);

        let since = token::parse_token(client_token)
            .filter(|(id, _)| *id == self.token_id)
            .map(|(_, seq)| seq);

        // Freeze regardless of staleness: the head sequence number was just
        // published, so later events must land in a newer batch.
        self.freeze(head_seq);

        match since {
            None => QueryReply {
                token,
                batches: Vec::new(),
                trivial: true,
            },
            Some(since) => QueryReply {
                token,
                batches: self
                    .closed
                    .iter()
                    .filter(|b| b.seq > since)
                    .cloned()
                    .collect(),
                trivial: false,
            },
        }
    }

    fn freeze(&mut self, published_seq: u64) {
        if let Some(open) = self.open.take() {
            self.next_seq = open.seq + 1;
            self.closed.push(Arc::new(open));
        } else {
            self.next_seq = self.next_seq.max(published_seq + 1);
        }
    }

    /// Mint a fresh token id and drop the chain. In-flight queries keep the
    /// batches they already cloned alive until their responses are written.
    pub fn resync(&mut self) {
        *self = BatchLog::new(token::mint_token_id());
    }
}
