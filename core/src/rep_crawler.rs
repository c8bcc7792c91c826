//! Representative discovery and the online-weight trend (§4.O, binds §4.J).
//!
//! The original drives this off the active-transactions request loop's
//! timer and a live `confirm_ack` stream; since the transport layer is this
//! crate's collaborator (§1), [`RepCrawler`] exposes the bookkeeping it
//! would otherwise hide behind socket calls: record an acknowledgement
//! when one arrives, and ask for the peers most overdue for a probe.
//! Grounded on `btcb::active_transactions`'s peer/timer interplay and the
//! `online_weight` table already defined in `store.rs`.

use crate::numbers::{Account, Amount};
use crate::store::{Store, Transaction, WriteTransaction};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

struct RepInfo {
    peer: SocketAddr,
    weight: Amount,
    last_request: Instant,
}

/// Tracks which peers have identified themselves as representatives, and
/// how much weight each carries, so the request loop can target `confirm_req`
/// probes rather than broadcasting blindly.
pub struct RepCrawler {
    reps: Mutex<HashMap<Account, RepInfo>>,
}

impl RepCrawler {
    pub fn new() -> Self {
        RepCrawler {
            reps: Mutex::new(HashMap::new()),
        }
    }

    /// Called when a `confirm_ack` is received from a peer claiming to be
    /// `account`, carrying `weight` of voting power.
    pub fn record_ack(&self, account: Account, peer: SocketAddr, weight: Amount) {
        self.reps.lock().insert(
            account,
            RepInfo {
                peer,
                weight,
                last_request: Instant::now(),
            },
        );
    }

    pub fn representatives(&self) -> Vec<(Account, Amount)> {
        self.reps.lock().iter().map(|(a, i)| (*a, i.weight)).collect()
    }

    pub fn total_known_weight(&self) -> Amount {
        Amount(self.reps.lock().values().map(|i| i.weight.0).sum())
    }

    /// The `max` peers least recently probed, oldest first — the crawler's
    /// candidates for the next `keepalive`/`confirm_req` round.
    pub fn peers_due_for_probe(&self, max: usize, min_interval: Duration) -> Vec<SocketAddr> {
        let now = Instant::now();
        let mut reps = self.reps.lock();
        let mut due: Vec<(Account, SocketAddr, Instant)> = reps
            .iter()
            .filter(|(_, i)| now.duration_since(i.last_request) >= min_interval)
            .map(|(a, i)| (*a, i.peer, i.last_request))
            .collect();
        due.sort_by_key(|(_, _, last)| *last);
        due.truncate(max);
        for (account, _, _) in &due {
            if let Some(info) = reps.get_mut(account) {
                info.last_request = now;
            }
        }
        due.into_iter().map(|(_, peer, _)| peer).collect()
    }
}

impl Default for RepCrawler {
    fn default() -> Self {
        Self::new()
    }
}

/// Maintains a rolling window of total-online-weight samples and reports a
/// trimmed mean used as the quorum denominator in
/// [`crate::active_transactions::Election::confirm_if_quorum`] (§4.H).
pub struct OnlineWeightTracker<'a> {
    store: &'a Store,
    max_samples: usize,
    minimum: Amount,
}

impl<'a> OnlineWeightTracker<'a> {
    pub fn new(store: &'a Store, max_samples: usize, minimum: Amount) -> Self {
        OnlineWeightTracker {
            store,
            max_samples: max_samples.max(1),
            minimum,
        }
    }

    pub fn sample(&self, txn: &mut WriteTransaction, now_ts: u64, current_online_weight: Amount) {
        self.store.online_weight_put(txn, now_ts, current_online_weight);
        self.store.online_weight_trim(txn, self.max_samples);
    }

    /// The network's quorum denominator: the larger of the configured
    /// minimum and the trimmed mean of recent samples (dropping the top and
    /// bottom 10% to resist a single outlying sample skewing quorum).
    pub fn trimmed_mean(&self, txn: &impl Transaction) -> Amount {
        let mut samples: Vec<u128> = self.store.online_weight_samples(txn).into_iter().map(|a| a.0).collect();
        if samples.is_empty() {
            return self.minimum;
        }
        samples.sort_unstable();
        let trim = samples.len() / 10;
        let kept = &samples[trim..samples.len() - trim.min(samples.len() - 1).min(samples.len() / 2)];
        let kept = if kept.is_empty() { &samples[..] } else { kept };
        let sum: u128 = kept.iter().sum();
        let mean = sum / kept.len() as u128;
        Amount(mean).max(self.minimum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crawler_returns_only_overdue_peers() {
        let crawler = RepCrawler::new();
        let account = Account([1u8; 32]);
        let peer: SocketAddr = "127.0.0.1:7075".parse().unwrap();
        crawler.record_ack(account, peer, Amount(500));
        assert_eq!(crawler.peers_due_for_probe(10, Duration::from_secs(0)).len(), 1);
        assert_eq!(crawler.peers_due_for_probe(10, Duration::from_secs(60)).len(), 0);
    }

    #[test]
    fn online_weight_falls_back_to_minimum_without_samples() {
        let store = Store::new();
        let tracker = OnlineWeightTracker::new(&store, 10, Amount(1_000));
        let txn = store.tx_begin_read();
        assert_eq!(tracker.trimmed_mean(&txn), Amount(1_000));
    }

    #[test]
    fn online_weight_tracks_recent_samples() {
        let store = Store::new();
        let tracker = OnlineWeightTracker::new(&store, 10, Amount(0));
        let mut txn = store.tx_begin_write();
        tracker.sample(&mut txn, 1, Amount(1_000));
        tracker.sample(&mut txn, 2, Amount(2_000));
        tracker.sample(&mut txn, 3, Amount(3_000));
        drop(txn);
        let read = store.tx_begin_read();
        let mean = tracker.trimmed_mean(&read);
        assert!(mean.0 >= 1_000 && mean.0 <= 3_000);
    }
}
