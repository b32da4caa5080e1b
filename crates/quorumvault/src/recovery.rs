//! root key recovery
//!
//! the coordinator contacts every share holder concurrently, one task per
//! holder, and collects shares keyed by index until the threshold is met.
//! holders still in flight at that point are cancelled, not awaited.
//!
//! ```text
//! Uninitialized -> Collecting -> Reconstructing -> Ready
//!                      ^              |
//!                      +--------------+  inconsistent share, holders left
//!                                     |
//!                                     +-> Failed   (nothing left / deadline)
//! ```
//!
//! per-holder contact is retried with bounded exponential backoff on
//! transient errors only. an unauthorized or integrity failure from a holder
//! is final for that holder. the whole collection runs under an outer
//! deadline independent of the per-holder timeout.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::share::Share;
use crate::store::{RootKey, SecretStore};
use crate::vss;
use crate::{Error, Result};

/// upper bound on threshold-subsets tried when locating bad shares
const MAX_SUBSET_SEARCH: usize = 4096;

/// somewhere a share can be fetched from
#[async_trait]
pub trait ShareSource: Send + Sync {
    /// stable name for logs
    fn id(&self) -> &str;

    /// fetch this source's share
    async fn fetch_share(&self) -> Result<Share>;
}

/// observable coordinator state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RecoveryState {
    Uninitialized,
    Collecting { collected: usize, needed: usize },
    Reconstructing,
    Ready,
    Failed { reason: String },
}

impl RecoveryState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RecoveryState::Ready | RecoveryState::Failed { .. })
    }
}

/// retry and timeout knobs
#[derive(Debug, Clone)]
pub struct RecoveryPolicy {
    /// bound on a single holder contact
    pub holder_timeout: Duration,
    /// bound on the whole collection phase
    pub deadline: Duration,
    /// attempts per holder, including the first
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            holder_timeout: Duration::from_secs(5),
            deadline: Duration::from_secs(60),
            max_attempts: 5,
            backoff_base: Duration::from_millis(200),
            backoff_max: Duration::from_secs(5),
        }
    }
}

impl RecoveryPolicy {
    /// delay before retry number `attempt` (0-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.backoff_base
            .checked_mul(factor)
            .unwrap_or(self.backoff_max)
            .min(self.backoff_max)
    }
}

/// result of one holder task
struct HolderOutcome {
    source: String,
    result: Result<Share>,
}

pub struct RecoveryCoordinator {
    sources: Vec<Arc<dyn ShareSource>>,
    threshold: usize,
    policy: RecoveryPolicy,
    state: watch::Sender<RecoveryState>,
}

impl RecoveryCoordinator {
    pub fn new(
        sources: Vec<Arc<dyn ShareSource>>,
        threshold: usize,
        policy: RecoveryPolicy,
    ) -> Result<Self> {
        if threshold < 1 || threshold > sources.len() {
            return Err(Error::InvalidParameters(format!(
                "threshold {} with {} share holders",
                threshold,
                sources.len()
            )));
        }
        if policy.max_attempts == 0 {
            return Err(Error::InvalidParameters("max_attempts must be at least 1".into()));
        }
        let (state, _) = watch::channel(RecoveryState::Uninitialized);
        Ok(Self {
            sources,
            threshold,
            policy,
            state,
        })
    }

    pub fn state(&self) -> RecoveryState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RecoveryState> {
        self.state.subscribe()
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    fn set_state(&self, state: RecoveryState) {
        debug!(?state, "recovery state");
        self.state.send_replace(state);
    }

    fn fail(&self, reason: String) -> Error {
        error!("recovery failed: {}", reason);
        self.set_state(RecoveryState::Failed {
            reason: reason.clone(),
        });
        Error::RecoveryFailed(reason)
    }

    /// recover the root key and install it into `store`
    pub async fn recover_into(&self, store: &SecretStore) -> Result<()> {
        let key = self.recover().await?;
        match store.unseal(key) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.fail(format!("recovered key rejected by store: {}", e));
                Err(e)
            }
        }
    }

    /// collect shares and reconstruct the root key
    pub async fn recover(&self) -> Result<RootKey> {
        info!(
            holders = self.sources.len(),
            threshold = self.threshold,
            "starting root key recovery"
        );
        self.set_state(RecoveryState::Collecting {
            collected: 0,
            needed: self.threshold,
        });

        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(self.sources.len());
        let mut tasks = JoinSet::new();

        for source in &self.sources {
            tasks.spawn(contact_holder(
                source.clone(),
                self.policy.clone(),
                cancel.child_token(),
                tx.clone(),
            ));
        }
        drop(tx);

        let outcome = tokio::time::timeout(self.policy.deadline, self.collect(&mut rx)).await;

        // stragglers are cancelled, not awaited
        cancel.cancel();
        tasks.abort_all();

        match outcome {
            Ok(Ok(key)) => {
                info!(key_id = %key.id(), "root key recovered");
                self.set_state(RecoveryState::Ready);
                Ok(key)
            }
            Ok(Err(Error::RecoveryFailed(reason))) => Err(self.fail(reason)),
            Ok(Err(e)) => Err(self.fail(e.to_string())),
            Err(_) => Err(self.fail(format!(
                "deadline of {:?} exceeded",
                self.policy.deadline
            ))),
        }
    }

    async fn collect(&self, rx: &mut mpsc::Receiver<HolderOutcome>) -> Result<RootKey> {
        // candidates per index; a conflicting pair is kept whole until a
        // consistent subset tells them apart
        let mut shares: BTreeMap<u8, Vec<Share>> = BTreeMap::new();
        let mut pending = self.sources.len();
        let mut needed = self.threshold;

        while let Some(HolderOutcome { source, result }) = rx.recv().await {
            pending -= 1;

            match result {
                Ok(share) => self.accept(&source, share, &mut shares),
                Err(e @ Error::Unauthorized(_)) => {
                    error!(holder = %source, "holder refused our identity: {}", e)
                }
                Err(e) if e.is_integrity() => {
                    error!(holder = %source, "holder returned bad share: {}", e)
                }
                Err(e) => warn!(holder = %source, "holder unavailable: {}", e),
            }

            self.set_state(RecoveryState::Collecting {
                collected: shares.len(),
                needed,
            });

            if shares.len() >= needed {
                self.set_state(RecoveryState::Reconstructing);

                match self.reconstruct(&shares) {
                    Ok(key) => return Ok(key),
                    Err(Error::InconsistentShares { suspect }) => {
                        let contested = suspect
                            .and_then(|index| shares.get(&index))
                            .is_some_and(|candidates| candidates.len() > 1);
                        match suspect {
                            Some(index) if !contested => {
                                warn!(index, "discarding inconsistent share");
                                shares.remove(&index);
                            }
                            _ => {
                                // culprit unknown: require one more share so
                                // the subset search has something to work with
                                needed = shares.len() + 1;
                                warn!(needed, "shares inconsistent, collecting more");
                            }
                        }
                        self.set_state(RecoveryState::Collecting {
                            collected: shares.len(),
                            needed,
                        });
                    }
                    Err(e) => return Err(e),
                }
            }

            if shares.len() + pending < needed {
                return Err(Error::RecoveryFailed(format!(
                    "collected {} usable shares, {} holders pending, need {}",
                    shares.len(),
                    pending,
                    needed
                )));
            }
        }

        Err(Error::RecoveryFailed(format!(
            "collected {} of {} shares",
            shares.len(),
            needed
        )))
    }

    fn accept(&self, source: &str, share: Share, shares: &mut BTreeMap<u8, Vec<Share>>) {
        if let Err(e) = share.verify() {
            error!(holder = %source, "share failed checksum: {}", e);
            return;
        }
        if share.threshold as usize != self.threshold {
            error!(
                holder = %source,
                share_threshold = share.threshold,
                "share belongs to a split with a different threshold"
            );
            return;
        }
        let candidates = shares.entry(share.index).or_default();
        if candidates.iter().any(|c| c.value == share.value) {
            debug!(holder = %source, index = share.index, "duplicate share ignored");
            return;
        }
        if candidates.is_empty() {
            info!(holder = %source, index = share.index, "share collected");
        } else {
            error!(holder = %source, index = share.index, "conflicting share for index, keeping both");
        }
        candidates.push(share);
    }

    /// combine everything collected; on inconsistency look for a threshold
    /// subset of distinct indices whose interpolated tag verifies
    fn reconstruct(&self, shares: &BTreeMap<u8, Vec<Share>>) -> Result<RootKey> {
        let all: Vec<Share> = shares.values().flatten().cloned().collect();

        let err = match vss::combine(&all, self.threshold) {
            Ok(secret) => return self.to_key(&secret),
            Err(e @ Error::InconsistentShares { .. }) => e,
            Err(e) => return Err(e),
        };

        if all.len() > self.threshold {
            let distinct = |subset: &Vec<usize>| {
                let mut indices: Vec<u8> = subset.iter().map(|&i| all[i].index).collect();
                indices.dedup();
                indices.len() == subset.len()
            };
            for subset in Combinations::new(all.len(), self.threshold)
                .filter(distinct)
                .take(MAX_SUBSET_SEARCH)
            {
                let chosen: Vec<Share> = subset.iter().map(|&i| all[i].clone()).collect();
                if let Ok(secret) = vss::combine(&chosen, self.threshold) {
                    let used: Vec<u8> = chosen.iter().map(|s| s.index).collect();
                    let excluded = all.len() - used.len();
                    warn!(?used, excluded, "reconstructed without inconsistent shares");
                    return self.to_key(&secret);
                }
            }
        }

        Err(err)
    }

    fn to_key(&self, secret: &[u8]) -> Result<RootKey> {
        RootKey::from_slice(secret)
            .map_err(|e| Error::RecoveryFailed(format!("reconstructed secret is not a root key: {}", e)))
    }
}

/// contact one holder until it yields a share, fails permanently or runs
/// out of attempts
async fn contact_holder(
    source: Arc<dyn ShareSource>,
    policy: RecoveryPolicy,
    cancel: CancellationToken,
    tx: mpsc::Sender<HolderOutcome>,
) {
    let id = source.id().to_string();
    let mut last = Error::Network("no attempt made".into());

    for attempt in 0..policy.max_attempts {
        let fetched = tokio::select! {
            _ = cancel.cancelled() => return,
            r = tokio::time::timeout(policy.holder_timeout, source.fetch_share()) => r,
        };

        match fetched {
            Ok(Ok(share)) => {
                let _ = tx.send(HolderOutcome { source: id, result: Ok(share) }).await;
                return;
            }
            Ok(Err(e)) if !e.is_transient() => {
                let _ = tx.send(HolderOutcome { source: id, result: Err(e) }).await;
                return;
            }
            Ok(Err(e)) => last = e,
            Err(_) => last = Error::Timeout,
        }

        if attempt + 1 < policy.max_attempts {
            let delay = policy.backoff(attempt);
            debug!(holder = %id, attempt, ?delay, "retrying holder: {}", last);
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    let _ = tx.send(HolderOutcome { source: id, result: Err(last) }).await;
}

/// k-combinations of 0..n in lexicographic order
struct Combinations {
    n: usize,
    current: Option<Vec<usize>>,
}

impl Combinations {
    fn new(n: usize, k: usize) -> Self {
        Self {
            n,
            current: if k <= n { Some((0..k).collect()) } else { None },
        }
    }
}

impl Iterator for Combinations {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Vec<usize>> {
        let out = self.current.clone()?;
        let k = out.len();

        // advance to the next combination
        let mut next = out.clone();
        let mut i = k;
        loop {
            if i == 0 {
                self.current = None;
                break;
            }
            i -= 1;
            if next[i] < self.n - k + i {
                next[i] += 1;
                for j in i + 1..k {
                    next[j] = next[j - 1] + 1;
                }
                self.current = Some(next);
                break;
            }
        }

        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// scripted share source for exercising the coordinator
    struct Scripted {
        id: String,
        delay: Duration,
        /// transient failures before success
        flaky: usize,
        calls: AtomicUsize,
        outcome: Box<dyn Fn() -> Result<Share> + Send + Sync>,
    }

    impl Scripted {
        fn ok(id: &str, share: Share) -> Arc<dyn ShareSource> {
            Self::build(id, Duration::ZERO, 0, move || Ok(share.clone()))
        }

        fn build(
            id: &str,
            delay: Duration,
            flaky: usize,
            outcome: impl Fn() -> Result<Share> + Send + Sync + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                delay,
                flaky,
                calls: AtomicUsize::new(0),
                outcome: Box::new(outcome),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ShareSource for Scripted {
        fn id(&self) -> &str {
            &self.id
        }

        async fn fetch_share(&self) -> Result<Share> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if n < self.flaky {
                return Err(Error::Network("connection reset".into()));
            }
            (self.outcome)()
        }
    }

    fn fast_policy() -> RecoveryPolicy {
        RecoveryPolicy {
            holder_timeout: Duration::from_millis(200),
            deadline: Duration::from_secs(5),
            max_attempts: 3,
            backoff_base: Duration::from_millis(1),
            backoff_max: Duration::from_millis(5),
        }
    }

    fn split_key(t: usize, n: usize) -> (RootKey, Vec<Share>) {
        let key = RootKey::generate();
        let shares = vss::split(key.as_bytes(), t, n).unwrap();
        (key, shares)
    }

    fn sources(shares: &[Share]) -> Vec<Arc<dyn ShareSource>> {
        shares
            .iter()
            .enumerate()
            .map(|(i, s)| Scripted::ok(&format!("holder-{}", i + 1), s.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_recovers_and_unseals() {
        let (key, shares) = split_key(3, 5);
        let coordinator = RecoveryCoordinator::new(sources(&shares), 3, fast_policy()).unwrap();
        assert_eq!(coordinator.state(), RecoveryState::Uninitialized);

        let store = SecretStore::in_memory();
        coordinator.recover_into(&store).await.unwrap();

        assert_eq!(coordinator.state(), RecoveryState::Ready);
        assert!(!store.is_sealed());
        // unsealing again with the original key is a no-op
        store.unseal(key).unwrap();
    }

    #[tokio::test]
    async fn test_stragglers_cancelled_after_threshold() {
        let (key, shares) = split_key(2, 3);
        let slow = Scripted::build("slow", Duration::from_secs(30), 0, {
            let s = shares[2].clone();
            move || Ok(s.clone())
        });
        let srcs: Vec<Arc<dyn ShareSource>> = vec![
            Scripted::ok("a", shares[0].clone()),
            Scripted::ok("b", shares[1].clone()),
            slow as Arc<dyn ShareSource>,
        ];
        let coordinator = RecoveryCoordinator::new(srcs, 2, fast_policy()).unwrap();

        let started = std::time::Instant::now();
        let recovered = coordinator.recover().await.unwrap();
        assert_eq!(recovered, key);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_transient_errors_retried() {
        let (key, shares) = split_key(2, 2);
        let flaky = Scripted::build("flaky", Duration::ZERO, 2, {
            let s = shares[1].clone();
            move || Ok(s.clone())
        });
        let srcs: Vec<Arc<dyn ShareSource>> = vec![Scripted::ok("a", shares[0].clone()), flaky.clone() as Arc<dyn ShareSource>];
        let coordinator = RecoveryCoordinator::new(srcs, 2, fast_policy()).unwrap();

        assert_eq!(coordinator.recover().await.unwrap(), key);
        assert_eq!(flaky.calls(), 3);
    }

    #[tokio::test]
    async fn test_unauthorized_not_retried() {
        let (_, shares) = split_key(2, 2);
        let refusing = Scripted::build("refusing", Duration::ZERO, 0, || {
            Err(Error::Unauthorized("wrong peer".into()))
        });
        let srcs: Vec<Arc<dyn ShareSource>> = vec![Scripted::ok("a", shares[0].clone()), refusing.clone() as Arc<dyn ShareSource>];
        let coordinator = RecoveryCoordinator::new(srcs, 2, fast_policy()).unwrap();

        let err = coordinator.recover().await.unwrap_err();
        assert!(matches!(err, Error::RecoveryFailed(_)));
        assert_eq!(refusing.calls(), 1);
        assert!(matches!(coordinator.state(), RecoveryState::Failed { .. }));
    }

    #[tokio::test]
    async fn test_retries_exhausted_fails() {
        let (_, shares) = split_key(2, 2);
        let down = Scripted::build("down", Duration::ZERO, usize::MAX, || unreachable!());
        let srcs: Vec<Arc<dyn ShareSource>> = vec![Scripted::ok("a", shares[0].clone()), down.clone() as Arc<dyn ShareSource>];
        let coordinator = RecoveryCoordinator::new(srcs, 2, fast_policy()).unwrap();

        assert!(coordinator.recover().await.is_err());
        assert_eq!(down.calls(), 3);
    }

    #[tokio::test]
    async fn test_deadline_fails_regardless_of_progress() {
        let (_, shares) = split_key(2, 3);
        let hang = |id: &str, s: Share| {
            Scripted::build(id, Duration::from_secs(60), 0, move || Ok(s.clone())) as Arc<dyn ShareSource>
        };
        let srcs: Vec<Arc<dyn ShareSource>> = vec![
            Scripted::ok("a", shares[0].clone()),
            hang("b", shares[1].clone()),
            hang("c", shares[2].clone()),
        ];
        let policy = RecoveryPolicy {
            holder_timeout: Duration::from_secs(120),
            deadline: Duration::from_millis(100),
            ..fast_policy()
        };
        let coordinator = RecoveryCoordinator::new(srcs, 2, policy).unwrap();

        let err = coordinator.recover().await.unwrap_err();
        assert!(matches!(err, Error::RecoveryFailed(ref r) if r.contains("deadline")));
    }

    #[tokio::test]
    async fn test_corrupted_share_discarded_and_more_collected() {
        let (key, shares) = split_key(2, 3);
        let mut corrupted = shares[0].clone();
        corrupted.value[3] ^= 0x10;

        // the corrupted holder answers first, the good ones later
        let srcs: Vec<Arc<dyn ShareSource>> = vec![
            Scripted::ok("bad", corrupted),
            Scripted::build("b", Duration::from_millis(20), 0, {
                let s = shares[1].clone();
                move || Ok(s.clone())
            }) as Arc<dyn ShareSource>,
            Scripted::build("c", Duration::from_millis(40), 0, {
                let s = shares[2].clone();
                move || Ok(s.clone())
            }) as Arc<dyn ShareSource>,
        ];
        let coordinator = RecoveryCoordinator::new(srcs, 2, fast_policy()).unwrap();
        assert_eq!(coordinator.recover().await.unwrap(), key);
    }

    #[tokio::test]
    async fn test_forged_share_isolated_by_subset_search() {
        let (key, shares) = split_key(2, 3);
        // well-formed checksum, wrong value: only the interpolated tag catches it
        let forged = Share::new(1, vec![0u8; shares[0].value.len()], 2, 3, shares[0].split_id);

        let srcs: Vec<Arc<dyn ShareSource>> = vec![
            Scripted::ok("forger", forged),
            Scripted::build("b", Duration::from_millis(20), 0, {
                let s = shares[1].clone();
                move || Ok(s.clone())
            }) as Arc<dyn ShareSource>,
            Scripted::build("c", Duration::from_millis(60), 0, {
                let s = shares[2].clone();
                move || Ok(s.clone())
            }) as Arc<dyn ShareSource>,
        ];
        let coordinator = RecoveryCoordinator::new(srcs, 2, fast_policy()).unwrap();
        assert_eq!(coordinator.recover().await.unwrap(), key);
    }

    #[tokio::test]
    async fn test_honest_share_kept_when_forgery_claims_its_index_first() {
        let (key, shares) = split_key(2, 3);
        let forged = Share::new(1, vec![0u8; shares[0].value.len()], 2, 3, shares[0].split_id);

        let srcs: Vec<Arc<dyn ShareSource>> = vec![
            Scripted::ok("forger", forged),
            Scripted::build("a", Duration::from_millis(20), 0, {
                let s = shares[0].clone();
                move || Ok(s.clone())
            }) as Arc<dyn ShareSource>,
            Scripted::build("b", Duration::from_millis(60), 0, {
                let s = shares[1].clone();
                move || Ok(s.clone())
            }) as Arc<dyn ShareSource>,
        ];
        let coordinator = RecoveryCoordinator::new(srcs, 2, fast_policy()).unwrap();
        assert_eq!(coordinator.recover().await.unwrap(), key);
    }

    #[tokio::test]
    async fn test_inconsistent_with_no_holders_left_fails() {
        let (_, shares) = split_key(2, 2);
        let forged = Share::new(1, vec![0u8; shares[0].value.len()], 2, 2, shares[0].split_id);
        let srcs: Vec<Arc<dyn ShareSource>> = vec![
            Scripted::ok("forger", forged),
            Scripted::ok("b", shares[1].clone()),
        ];
        let coordinator = RecoveryCoordinator::new(srcs, 2, fast_policy()).unwrap();

        assert!(matches!(coordinator.recover().await, Err(Error::RecoveryFailed(_))));
        assert!(matches!(coordinator.state(), RecoveryState::Failed { .. }));
    }

    #[tokio::test]
    async fn test_duplicate_holders_deduplicated() {
        let (_, shares) = split_key(2, 3);
        let srcs: Vec<Arc<dyn ShareSource>> = vec![
            Scripted::ok("a", shares[0].clone()),
            Scripted::ok("a-again", shares[0].clone()),
        ];
        let coordinator = RecoveryCoordinator::new(srcs, 2, fast_policy()).unwrap();
        assert!(coordinator.recover().await.is_err());
    }

    #[tokio::test]
    async fn test_key_mismatch_fails_recovery() {
        let (_, shares) = split_key(1, 1);
        let coordinator = RecoveryCoordinator::new(sources(&shares), 1, fast_policy()).unwrap();

        let store = SecretStore::in_memory();
        store.unseal(RootKey::generate()).unwrap();

        assert!(matches!(coordinator.recover_into(&store).await, Err(Error::KeyMismatch)));
        assert!(matches!(coordinator.state(), RecoveryState::Failed { .. }));
    }

    #[test]
    fn test_invalid_construction() {
        let (_, shares) = split_key(2, 2);
        assert!(RecoveryCoordinator::new(sources(&shares), 3, fast_policy()).is_err());
        assert!(RecoveryCoordinator::new(sources(&shares), 0, fast_policy()).is_err());
    }

    #[test]
    fn test_backoff_bounded() {
        let policy = RecoveryPolicy {
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_secs(1),
            ..RecoveryPolicy::default()
        };
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(800));
        assert_eq!(policy.backoff(4), Duration::from_secs(1));
        assert_eq!(policy.backoff(40), Duration::from_secs(1));
    }

    #[test]
    fn test_combinations() {
        let all: Vec<Vec<usize>> = Combinations::new(4, 2).collect();
        assert_eq!(
            all,
            vec![
                vec![0, 1],
                vec![0, 2],
                vec![0, 3],
                vec![1, 2],
                vec![1, 3],
                vec![2, 3]
            ]
        );
        assert_eq!(Combinations::new(5, 5).count(), 1);
        assert_eq!(Combinations::new(2, 3).count(), 0);
    }
}
