//! Cancellation primitives: a generation counter for feed sessions and a
//! keyed registry of in-flight requests for the explanation service.
//! Stale tasks must check their guard before publishing anything.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

/// Each refresh/teardown advances the generation and cancels every task
/// holding a token from the previous one.
pub struct TaskGeneration {
    current_token: RwLock<CancellationToken>,
    generation: Arc<AtomicU64>,
}

impl Default for TaskGeneration {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskGeneration {
    pub fn new() -> Self {
        Self {
            current_token: RwLock::new(CancellationToken::new()),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Cancel all current tasks, advance the generation, return a guard for the new one.
    pub fn cancel_and_advance(&self) -> GenerationGuard {
        let mut token_guard = self.current_token.write();
        token_guard.cancel();
        let new_root = CancellationToken::new();
        let child = new_root.child_token();
        *token_guard = new_root;
        let gen = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        GenerationGuard::new(Arc::clone(&self.generation), gen, child)
    }

    /// Guard for the current generation without cancelling anything.
    pub fn guard(&self) -> GenerationGuard {
        let token_guard = self.current_token.read();
        let child = token_guard.child_token();
        let gen = self.generation.load(Ordering::SeqCst);
        GenerationGuard::new(Arc::clone(&self.generation), gen, child)
    }

    pub fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

/// Checked by a task before it writes results.
#[derive(Clone)]
pub struct GenerationGuard {
    generation: Arc<AtomicU64>,
    my_generation: u64,
    token: CancellationToken,
}

impl GenerationGuard {
    fn new(generation: Arc<AtomicU64>, my_generation: u64, token: CancellationToken) -> Self {
        Self {
            generation,
            my_generation,
            token,
        }
    }

    #[inline]
    pub fn is_current(&self) -> bool {
        self.generation.load(Ordering::SeqCst) == self.my_generation
    }

    #[inline]
    pub fn should_continue(&self) -> bool {
        !self.token.is_cancelled() && self.is_current()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn my_generation(&self) -> u64 {
        self.my_generation
    }
}

/// Ticket for one registered in-flight request.
#[derive(Clone, Debug)]
pub struct RequestTicket {
    pub seq: u64,
    pub token: CancellationToken,
}

/// At most one live request per key. Registering a key cancels and replaces
/// whatever was registered before, under a single lock.
pub struct KeyedCancellation<K> {
    inflight: Mutex<HashMap<K, RequestTicket>>,
    next_seq: AtomicU64,
}

impl<K: Eq + Hash + Clone> Default for KeyedCancellation<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone> KeyedCancellation<K> {
    pub fn new() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
            next_seq: AtomicU64::new(1),
        }
    }

    /// Cancel the prior request for `key` (if any) and register a fresh one.
    pub fn begin(&self, key: K) -> RequestTicket {
        let ticket = RequestTicket {
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            token: CancellationToken::new(),
        };
        let mut map = self.inflight.lock();
        if let Some(prev) = map.insert(key, ticket.clone()) {
            prev.token.cancel();
        }
        ticket
    }

    /// True while `ticket` is still the registered request for `key`.
    pub fn is_current(&self, key: &K, ticket: &RequestTicket) -> bool {
        self.inflight
            .lock()
            .get(key)
            .is_some_and(|t| t.seq == ticket.seq)
    }

    /// Run `commit` only if `ticket` is still current, then unregister it.
    /// Returns whether the commit ran.
    pub fn finish_with<F: FnOnce()>(&self, key: &K, ticket: &RequestTicket, commit: F) -> bool {
        let mut map = self.inflight.lock();
        match map.get(key) {
            Some(t) if t.seq == ticket.seq && !ticket.token.is_cancelled() => {
                commit();
                map.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Cancel and forget every in-flight request. Returns how many were live.
    pub fn cancel_all(&self) -> usize {
        let mut map = self.inflight.lock();
        let n = map.len();
        for (_, ticket) in map.drain() {
            ticket.token.cancel();
        }
        n
    }

    pub fn inflight_len(&self) -> usize {
        self.inflight.lock().len()
    }
}
