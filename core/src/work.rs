//! Proof-of-work nonce search (§4.C), grounded on `btcb::lib::work.cpp`'s
//! `work_pool`/`work_value`/`work_validate`.

use crate::numbers::BlockHash;
use rand::{RngCore, SeedableRng};
use rand::rngs::SmallRng;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

/// `BLAKE2B-8(work ‖ root)` interpreted as a little-endian u64 (§4.C, §6).
pub fn work_value(root: &BlockHash, work: u64) -> u64 {
    use blake2::digest::{Update, VariableOutput};
    use blake2::Blake2bVar;
    let mut hasher = Blake2bVar::new(8).expect("valid digest size");
    hasher.update(&work.to_le_bytes());
    hasher.update(&root.0);
    let mut out = [0u8; 8];
    hasher.finalize_variable(&mut out).expect("finalize");
    u64::from_le_bytes(out)
}

/// A block (or any root) is valid if its nonce's work value meets or exceeds
/// `threshold`.
pub fn work_validate(root: &BlockHash, work: u64, threshold: u64) -> bool {
    work_value(root, work) >= threshold
}

type OffloadFn = dyn Fn(&BlockHash, u64) -> Option<u64> + Send + Sync;

struct PendingItem {
    root: BlockHash,
    difficulty: u64,
    callback: Box<dyn FnOnce(Option<u64>) + Send>,
}

struct Shared {
    pending: Mutex<VecDeque<PendingItem>>,
    condvar: Condvar,
    ticket: AtomicU64,
    done: std::sync::atomic::AtomicBool,
    offload: Option<Box<OffloadFn>>,
    pow_sleep: std::time::Duration,
}

/// Multi-threaded nonce search with root-keyed cancellation (§4.C).
///
/// Workers poll `pending.front()`, search candidate nonces in batches, and
/// bail out the instant `ticket` changes — either because another worker won
/// the race or because `cancel(root)` fired. Matches the original's
/// "sample ticket inside the inner loop" cancellation contract.
pub struct WorkPool {
    shared: Arc<Shared>,
    threads: Vec<JoinHandle<()>>,
}

impl WorkPool {
    pub fn new(max_threads: usize, pow_sleep: std::time::Duration, offload: Option<Box<OffloadFn>>) -> Self {
        let shared = Arc::new(Shared {
            pending: Mutex::new(VecDeque::new()),
            condvar: Condvar::new(),
            ticket: AtomicU64::new(0),
            done: std::sync::atomic::AtomicBool::new(false),
            offload,
            pow_sleep,
        });
        let count = max_threads.max(1).min(num_cpus::get().max(1));
        let mut threads = Vec::with_capacity(count);
        for i in 0..count {
            let shared = Arc::clone(&shared);
            threads.push(std::thread::Builder::new()
                .name(format!("work-{i}"))
                .spawn(move || Self::worker_loop(shared))
                .expect("spawn work thread"));
        }
        WorkPool { shared, threads }
    }

    fn worker_loop(shared: Arc<Shared>) {
        let mut rng = SmallRng::from_entropy();
        loop {
            let mut guard = shared.pending.lock().unwrap();
            loop {
                if shared.done.load(Ordering::SeqCst) && guard.is_empty() {
                    return;
                }
                if !guard.is_empty() {
                    break;
                }
                guard = shared.condvar.wait(guard).unwrap();
            }
            let ticket_at_start = shared.ticket.load(Ordering::SeqCst);
            let root = guard.front().unwrap().root;
            let difficulty = guard.front().unwrap().difficulty;
            drop(guard);

            let mut found: Option<u64> = None;
            while shared.ticket.load(Ordering::SeqCst) == ticket_at_start {
                let candidate = rng.next_u64();
                if work_value(&root, candidate) >= difficulty {
                    found = Some(candidate);
                    break;
                }
                if !shared.pow_sleep.is_zero() {
                    std::thread::sleep(shared.pow_sleep);
                }
            }

            if let Some(work) = found {
                let mut guard = shared.pending.lock().unwrap();
                if shared.ticket.load(Ordering::SeqCst) == ticket_at_start {
                    shared.ticket.fetch_add(1, Ordering::SeqCst);
                    let item = guard.pop_front();
                    drop(guard);
                    if let Some(item) = item {
                        (item.callback)(Some(work));
                    }
                }
            }
        }
    }

    /// Enqueues a search for `root` at `difficulty`, invoking `callback`
    /// with the nonce (or `None` if cancelled) once resolved. Consults the
    /// optional hardware offload hook first.
    pub fn generate_async(
        &self,
        root: BlockHash,
        difficulty: u64,
        callback: impl FnOnce(Option<u64>) + Send + 'static,
    ) {
        if let Some(offload) = &self.shared.offload {
            if let Some(work) = offload(&root, difficulty) {
                callback(Some(work));
                return;
            }
        }
        let mut guard = self.shared.pending.lock().unwrap();
        guard.push_back(PendingItem {
            root,
            difficulty,
            callback: Box::new(callback),
        });
        self.shared.condvar.notify_all();
    }

    /// Blocking convenience wrapper used by tests and synchronous callers.
    pub fn generate(&self, root: BlockHash, difficulty: u64) -> Option<u64> {
        let (tx, rx) = std::sync::mpsc::channel();
        self.generate_async(root, difficulty, move |work| {
            let _ = tx.send(work);
        });
        rx.recv().ok().flatten()
    }

    /// Cancels any pending search for `root`, invoking its callback with
    /// `None`.
    pub fn cancel(&self, root: &BlockHash) {
        let mut guard = self.shared.pending.lock().unwrap();
        if guard.front().map(|i| &i.root) == Some(root) {
            self.shared.ticket.fetch_add(1, Ordering::SeqCst);
        }
        let mut remaining = VecDeque::new();
        while let Some(item) = guard.pop_front() {
            if item.root == *root {
                (item.callback)(None);
            } else {
                remaining.push_back(item);
            }
        }
        *guard = remaining;
    }

    pub fn pending_count(&self) -> usize {
        self.shared.pending.lock().unwrap().len()
    }

    pub fn stop(&self) {
        self.shared.done.store(true, Ordering::SeqCst);
        self.shared.condvar.notify_all();
    }
}

impl Drop for WorkPool {
    fn drop(&mut self) {
        self.stop();
        for t in self.threads.drain(..) {
            let _ = t.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_meets_threshold() {
        let pool = WorkPool::new(1, std::time::Duration::ZERO, None);
        let root = BlockHash([5u8; 32]);
        let difficulty = 0xff00000000000000u64; // easy target for fast tests
        let work = pool.generate(root, difficulty).expect("solution found");
        assert!(work_validate(&root, work, difficulty));
    }

    #[test]
    fn cancel_invokes_callback_with_none() {
        let pool = WorkPool::new(1, std::time::Duration::from_millis(5), None);
        let root = BlockHash([6u8; 32]);
        // A difficulty that will not be found quickly, so cancel always wins.
        let impossible = u64::MAX;
        let (tx, rx) = std::sync::mpsc::channel();
        pool.generate_async(root, impossible, move |work| {
            let _ = tx.send(work);
        });
        std::thread::sleep(std::time::Duration::from_millis(20));
        pool.cancel(&root);
        let result = rx.recv_timeout(std::time::Duration::from_secs(2)).unwrap();
        assert_eq!(result, None);
        assert_eq!(pool.pending_count(), 0);
    }
}
