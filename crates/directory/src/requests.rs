/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Asynchronous "please fetch/verify this key" request queue
//! (SPEC_FULL.md §B.4, grounded on `original_source/goodcrypto/mail/
//! crypto_rq.py`). The resolver pushes onto it; the key-exchange
//! coordinator drains it once per cycle. Actually fetching a successor
//! key over the network is an external collaborator — key management is
//! a Non-goal (spec §1) — this queue only records that a domain is
//! waiting and avoids re-issuing the same request every tick.

use std::collections::VecDeque;

use ahash::AHashSet;
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyRequestKind {
    FingerprintSync,
    PrivateKeyCreation,
    KeyExchange,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRequest {
    pub kind: KeyRequestKind,
    pub domain: String,
}

#[derive(Default)]
struct State {
    queue: VecDeque<KeyRequest>,
    pending: AHashSet<(KeyRequestKind, String)>,
}

/// FIFO of pending key requests, deduplicated by `(kind, domain)` so a
/// domain stuck waiting on an external key exchange is not re-enqueued
/// every scheduler tick.
#[derive(Default)]
pub struct KeyRequestQueue {
    state: Mutex<State>,
}

impl KeyRequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a request unless an identical one is already pending.
    /// Returns `true` if a new request was added.
    pub fn enqueue(&self, kind: KeyRequestKind, domain: &str) -> bool {
        let mut state = self.state.lock();
        let key = (kind, domain.to_string());
        if state.pending.contains(&key) {
            return false;
        }
        state.pending.insert(key.clone());
        state.queue.push_back(KeyRequest {
            kind,
            domain: key.1,
        });
        true
    }

    /// Marks a request for `(kind, domain)` as handled, allowing it to
    /// be enqueued again in a future cycle if still needed.
    pub fn acknowledge(&self, kind: KeyRequestKind, domain: &str) {
        self.state
            .lock()
            .pending
            .remove(&(kind, domain.to_string()));
    }

    /// Drains all currently queued requests (the pending-dedup set is
    /// left untouched — callers must `acknowledge` once resolved).
    pub fn drain(&self) -> Vec<KeyRequest> {
        self.state.lock().queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_requests_are_deduplicated() {
        let queue = KeyRequestQueue::new();
        assert!(queue.enqueue(KeyRequestKind::FingerprintSync, "peer.example"));
        assert!(!queue.enqueue(KeyRequestKind::FingerprintSync, "peer.example"));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn acknowledge_allows_re_enqueue() {
        let queue = KeyRequestQueue::new();
        queue.enqueue(KeyRequestKind::KeyExchange, "peer.example");
        queue.drain();
        assert!(!queue.enqueue(KeyRequestKind::KeyExchange, "peer.example"));
        queue.acknowledge(KeyRequestKind::KeyExchange, "peer.example");
        assert!(queue.enqueue(KeyRequestKind::KeyExchange, "peer.example"));
    }
}
