//! Transaction redispatch
//!
//! Watches pending transactions and automatically re-broadcasts them at an
//! escalated gas price when they stall, so they are not dropped from the
//! mempool or stuck behind underpriced fees.
//!
//! Per nonce the lifecycle is: submitted -> watching -> re-broadcast zero or
//! more times -> mined or abandoned. Gas prices are strictly increasing
//! across re-broadcasts and at most one re-broadcast is in flight per nonce.

use super::backend::{Dispatched, SignerBackend};
use crate::error::{ToolError, ToolResult};

use chrono::{DateTime, Utc};
use ethers::types::{Address, TransactionRequest, H256, U256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, OnceCell, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Escalation and polling parameters. Immutable once the watcher starts.
#[derive(Debug, Clone)]
pub struct RedispatchPolicy {
    /// Poll cadence; a transaction unmined for this long is stalled.
    pub watch_interval: Duration,
    /// Replacement gas price as a percentage of the previous one. Must
    /// exceed 100.
    pub escalation_percent: u64,
    /// Re-broadcasts allowed per nonce before giving up.
    pub max_resubmissions: u32,
    /// Pause after a failed poll before the next sweep.
    pub poll_backoff: Duration,
}

impl Default for RedispatchPolicy {
    fn default() -> Self {
        Self {
            watch_interval: Duration::from_secs(15),
            escalation_percent: 125,
            max_resubmissions: 5,
            poll_backoff: Duration::from_secs(5),
        }
    }
}

/// A transaction we are responsible for until it reaches a terminal state.
#[derive(Debug, Clone)]
struct PendingTx {
    gas_price: U256,
    hash: H256,
    request: TransactionRequest,
    submitted_at: Instant,
    resubmissions: u32,
}

/// Emitted on every dispatch for a nonce after its first, and on
/// abandonment.
#[derive(Debug, Clone)]
pub enum DispatchEvent {
    Dispatched {
        nonce: u64,
        hash: H256,
        gas_price: U256,
        at: DateTime<Utc>,
    },
    Abandoned {
        nonce: u64,
        hash: H256,
        resubmissions: u32,
        at: DateTime<Utc>,
    },
}

/// Pending map and seen-nonce set behind one lock. Holding it across a
/// broadcast serializes submissions with the sweep, so nothing races the
/// backend's serial nonce assignment.
#[derive(Default)]
struct WatchState {
    pending: HashMap<u64, PendingTx>,
    seen: HashSet<u64>,
}

/// Watches everything submitted through it and re-broadcasts stalled
/// transactions at an escalated price. One instance per signer.
pub struct RedispatchSigner {
    backend: Arc<dyn SignerBackend>,
    policy: RedispatchPolicy,
    state: Mutex<WatchState>,
    events: broadcast::Sender<DispatchEvent>,
    shutdown: RwLock<bool>,
    watcher: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl RedispatchSigner {
    /// Start a watcher bound to `backend`.
    pub fn start(
        backend: Arc<dyn SignerBackend>,
        policy: RedispatchPolicy,
        events: broadcast::Sender<DispatchEvent>,
    ) -> Arc<Self> {
        let signer = Arc::new(Self {
            backend,
            policy,
            state: Mutex::new(WatchState::default()),
            events,
            shutdown: RwLock::new(false),
            watcher: std::sync::Mutex::new(None),
        });

        let handle = tokio::spawn(Arc::clone(&signer).watch());
        if let Ok(mut slot) = signer.watcher.lock() {
            *slot = Some(handle);
        }

        signer
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.events.subscribe()
    }

    /// Submit a transaction and watch it until mined or abandoned.
    ///
    /// Returns the initial broadcast result immediately; escalation happens
    /// in the background. The request must already be sanitized by the
    /// wrapping [`ManagedSigner`].
    pub(crate) async fn send(&self, request: TransactionRequest) -> ToolResult<Dispatched> {
        let mut state = self.state.lock().await;
        let dispatched = self.backend.submit(request.clone()).await?;

        state.pending.insert(
            dispatched.nonce,
            PendingTx {
                gas_price: dispatched.gas_price,
                hash: dispatched.hash,
                request,
                submitted_at: Instant::now(),
                resubmissions: 0,
            },
        );

        // The very first dispatch of a nonce is not announced; every later
        // one is.
        if !state.seen.insert(dispatched.nonce) {
            let _ = self.events.send(DispatchEvent::Dispatched {
                nonce: dispatched.nonce,
                hash: dispatched.hash,
                gas_price: dispatched.gas_price,
                at: Utc::now(),
            });
        }

        debug!(
            "submitted nonce {} as {:?}",
            dispatched.nonce, dispatched.hash
        );
        Ok(dispatched)
    }

    /// True when no transaction is being watched.
    pub async fn settled(&self) -> bool {
        self.state.lock().await.pending.is_empty()
    }

    /// Wait until every watched transaction reached a terminal state.
    pub async fn wait_settled(&self) {
        loop {
            if self.settled().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }

    /// Stop the watch loop. Pending entries are dropped unwatched.
    pub async fn shutdown(&self) {
        *self.shutdown.write().await = true;
        if let Ok(mut slot) = self.watcher.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }

    async fn watch(self: Arc<Self>) {
        let mut ticker = interval(self.policy.watch_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if *self.shutdown.read().await {
                break;
            }
            if let Err(e) = self.sweep().await {
                warn!("redispatch poll failed: {e}");
                tokio::time::sleep(self.policy.poll_backoff).await;
            }
        }
    }

    /// One pass over the pending map: drop mined nonces, escalate stalled
    /// ones.
    async fn sweep(&self) -> ToolResult<()> {
        let confirmed = self.backend.confirmed_nonce().await?;
        let mut state = self.state.lock().await;

        let mined: Vec<u64> = state
            .pending
            .keys()
            .copied()
            .filter(|nonce| *nonce < confirmed)
            .collect();
        for nonce in mined {
            if let Some(tx) = state.pending.remove(&nonce) {
                info!("transaction {:?} (nonce {nonce}) mined", tx.hash);
            }
        }

        let now = Instant::now();
        let mut stalled: Vec<u64> = state
            .pending
            .iter()
            .filter(|(_, tx)| now.duration_since(tx.submitted_at) >= self.policy.watch_interval)
            .map(|(nonce, _)| *nonce)
            .collect();
        stalled.sort_unstable();

        for nonce in stalled {
            let (request, gas_price, hash, resubmissions) = match state.pending.get(&nonce) {
                Some(tx) => (tx.request.clone(), tx.gas_price, tx.hash, tx.resubmissions),
                None => continue,
            };

            if resubmissions >= self.policy.max_resubmissions {
                state.pending.remove(&nonce);
                warn!(
                    "giving up on nonce {nonce} after {resubmissions} re-broadcasts, \
                     last hash {hash:?}"
                );
                let _ = self.events.send(DispatchEvent::Abandoned {
                    nonce,
                    hash,
                    resubmissions,
                    at: Utc::now(),
                });
                continue;
            }

            let bumped = escalate(gas_price, self.policy.escalation_percent);
            // Still holding the state lock: at most one re-broadcast is in
            // flight and submissions cannot interleave with it.
            match self.backend.resubmit(request, nonce, bumped).await {
                Ok(dispatched) => {
                    if let Some(tx) = state.pending.get_mut(&nonce) {
                        tx.gas_price = dispatched.gas_price;
                        tx.hash = dispatched.hash;
                        tx.submitted_at = Instant::now();
                        tx.resubmissions += 1;
                    }
                    info!(
                        "re-broadcast nonce {nonce} at gas price {} as {:?}",
                        dispatched.gas_price, dispatched.hash
                    );
                    let _ = self.events.send(DispatchEvent::Dispatched {
                        nonce,
                        hash: dispatched.hash,
                        gas_price: dispatched.gas_price,
                        at: Utc::now(),
                    });
                }
                // Retried on the next tick without consuming an attempt.
                Err(e) => warn!("re-broadcast of nonce {nonce} failed: {e}"),
            }
        }

        Ok(())
    }
}

/// Entry point wrapping a signer. Persistent accounts pass straight
/// through; everything else is watched by a lazily started
/// [`RedispatchSigner`] - exactly one per signer, no matter how many
/// transactions go through it.
pub struct ManagedSigner {
    backend: Arc<dyn SignerBackend>,
    policy: RedispatchPolicy,
    events: broadcast::Sender<DispatchEvent>,
    redispatcher: OnceCell<Arc<RedispatchSigner>>,
}

impl ManagedSigner {
    pub fn new(backend: Arc<dyn SignerBackend>, policy: RedispatchPolicy) -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            backend,
            policy,
            events,
            redispatcher: OnceCell::new(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.events.subscribe()
    }

    pub fn address(&self) -> Address {
        self.backend.address()
    }

    pub async fn send_transaction(&self, request: TransactionRequest) -> ToolResult<Dispatched> {
        let request = sanitize_request(request)?;

        if self.backend.persistent() {
            // The account manages its own resubmission; no watcher.
            return self.backend.submit(request).await;
        }

        let redispatcher = self
            .redispatcher
            .get_or_init(|| async {
                RedispatchSigner::start(
                    Arc::clone(&self.backend),
                    self.policy.clone(),
                    self.events.clone(),
                )
            })
            .await;
        redispatcher.send(request).await
    }

    /// The redispatcher, if one was started.
    pub fn redispatcher(&self) -> Option<&Arc<RedispatchSigner>> {
        self.redispatcher.get()
    }

    /// Wait for every watched transaction to reach a terminal state.
    pub async fn wait_settled(&self) {
        if let Some(redispatcher) = self.redispatcher.get() {
            redispatcher.wait_settled().await;
        }
    }

    pub async fn shutdown(&self) {
        if let Some(redispatcher) = self.redispatcher.get() {
            redispatcher.shutdown().await;
        }
    }
}

/// Validate a request and strip the caller-supplied `from`; the signer
/// derives its own sending address.
pub fn sanitize_request(mut request: TransactionRequest) -> ToolResult<TransactionRequest> {
    if request.to.is_none() {
        return Err(ToolError::InvalidRequest(
            "transaction has no destination".to_string(),
        ));
    }
    request.from = None;
    Ok(request)
}

/// Next gas price for a replacement: `escalation_percent` of the previous
/// price, always strictly greater.
fn escalate(price: U256, escalation_percent: u64) -> U256 {
    let bumped = price * escalation_percent / 100;
    if bumped > price {
        bumped
    } else {
        price + U256::one()
    }
}
