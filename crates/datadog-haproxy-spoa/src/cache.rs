// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Time-bounded store of the in-flight transactions, keyed by the span id
//! HAProxy echoes back in every message following the request headers.
//!
//! Entries leave the cache in three ways, and every one of them goes through
//! the eviction callback exactly once:
//!
//! - explicitly, after a terminal decision (block or finish);
//! - by expiry, when no message refreshed the entry before its timeout;
//! - on shutdown, when the owning handler is closed.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::state::RequestState;

/// Lifetime of an entry stored without a usable timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
/// Period of the background sweeper.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    /// The entry outlived its timeout.
    Expired,
    /// The entry was removed after a terminal decision.
    Deleted,
    /// The cache was emptied because its owner shut down.
    Shutdown,
}

/// Called with every state leaving the cache.
pub type EvictionCallback = Arc<dyn Fn(u64, RequestState, EvictionReason) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Lifetime of an entry when the message does not declare a usable
    /// timeout.
    pub default_timeout: Duration,
    /// How often expired entries are reclaimed.
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_timeout: DEFAULT_REQUEST_TIMEOUT,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

struct Entry {
    state: RequestState,
    expires_at: Instant,
}

struct Inner {
    entries: DashMap<u64, Entry>,
    on_evict: EvictionCallback,
    config: CacheConfig,
    stop: CancellationToken,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

/// Concurrent request-state cache. Cloning is cheap and every clone shares
/// the same entries.
#[derive(Clone)]
pub struct RequestStateCache {
    inner: Arc<Inner>,
}

impl RequestStateCache {
    /// Creates an empty cache. The sweeper only runs once
    /// [`RequestStateCache::start`] is called.
    ///
    /// # Arguments
    ///
    /// * `config` - default entry lifetime and sweep period.
    /// * `on_evict` - called with every state leaving the cache, whatever the
    ///   reason.
    pub fn new(config: CacheConfig, on_evict: EvictionCallback) -> Self {
        Self::with_cancellation(config, on_evict, &CancellationToken::new())
    }

    /// Creates a cache whose sweeper also stops when `parent` is cancelled.
    pub fn with_cancellation(
        config: CacheConfig,
        on_evict: EvictionCallback,
        parent: &CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: DashMap::new(),
                on_evict,
                config,
                stop: parent.child_token(),
                sweeper: Mutex::new(None),
            }),
        }
    }

    /// Spawns the background sweeper on the current Tokio runtime. Calling it
    /// again while the sweeper runs is a no-op.
    pub fn start(&self) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            Error::internal(format!("request state cache needs a Tokio runtime: {e}"))
        })?;

        let mut sweeper = self
            .inner
            .sweeper
            .lock()
            .map_err(|_| Error::internal("request state cache sweeper lock poisoned"))?;
        if sweeper.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Ok(());
        }

        let cache = self.clone();
        let stop = self.inner.stop.clone();
        let period = self.inner.config.sweep_interval;
        *sweeper = Some(runtime.spawn(async move {
            debug!("haproxy_spoa: request state sweeper started");
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = stop.cancelled() => break,
                    _ = interval.tick() => {
                        let evicted = cache.sweep();
                        if evicted > 0 {
                            debug!("haproxy_spoa: evicted {evicted} expired request states");
                        }
                    }
                }
            }
            debug!("haproxy_spoa: request state sweeper stopped");
        }));
        Ok(())
    }

    /// Stops the background sweeper. Entries stay in place; see
    /// [`RequestStateCache::clear`].
    pub fn stop(&self) {
        self.inner.stop.cancel();
    }

    /// Whether the sweeper was stopped, directly or through the parent token.
    pub fn is_stopped(&self) -> bool {
        self.inner.stop.is_cancelled()
    }

    /// Takes the state out of the cache so the caller can hand it to the
    /// message processor. It must be stored back, or discarded, once the
    /// message has been handled.
    ///
    /// # Returns
    ///
    /// [`Error::NotFound`] when no state is cached for `id`. An entry past
    /// its expiry that the sweeper has not reached yet is evicted here and
    /// reported the same way.
    pub fn take(&self, id: u64) -> Result<RequestState> {
        let (_, entry) = self.inner.entries.remove(&id).ok_or(Error::NotFound(id))?;

        if entry.expires_at <= Instant::now() {
            self.evict(id, entry.state, EvictionReason::Expired);
            return Err(Error::NotFound(id));
        }
        Ok(entry.state)
    }

    /// Inserts or replaces the state of `id`. The entry expires after
    /// `timeout`, a HAProxy duration such as `"1m"` or `"500ms"`; the
    /// configured default is used when it is absent or invalid.
    pub fn store(&self, id: u64, state: RequestState, timeout: Option<&str>) -> Result<()> {
        if id == 0 {
            self.evict(id, state, EvictionReason::Deleted);
            return Err(Error::malformed("span id 0 cannot identify a request"));
        }

        let ttl = parse_timeout(timeout, self.inner.config.default_timeout);
        let entry = Entry {
            state,
            expires_at: Instant::now() + ttl,
        };

        if let Some(previous) = self.inner.entries.insert(id, entry) {
            warn!("haproxy_spoa: request state for span id {id} replaced while still cached");
            self.evict(id, previous.state, EvictionReason::Deleted);
        }
        Ok(())
    }

    /// Removes the entry of `id`. Returns `false`, without calling the
    /// eviction callback, when there was nothing to remove.
    pub fn delete(&self, id: u64) -> bool {
        match self.inner.entries.remove(&id) {
            Some((_, entry)) => {
                self.evict(id, entry.state, EvictionReason::Deleted);
                true
            }
            None => false,
        }
    }

    /// Ends the life of a state previously returned by
    /// [`RequestStateCache::take`].
    pub fn discard(&self, id: u64, state: RequestState) {
        self.evict(id, state, EvictionReason::Deleted);
    }

    /// Evicts every expired entry and returns how many were evicted.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<u64> = self
            .inner
            .entries
            .iter()
            .filter(|entry| entry.expires_at <= now)
            .map(|entry| *entry.key())
            .collect();

        let mut evicted = 0;
        for id in expired {
            // The entry may have been refreshed or taken since the scan.
            if let Some((_, entry)) = self
                .inner
                .entries
                .remove_if(&id, |_, entry| entry.expires_at <= now)
            {
                self.evict(id, entry.state, EvictionReason::Expired);
                evicted += 1;
            }
        }
        evicted
    }

    /// Evicts every entry.
    pub fn clear(&self) {
        let ids: Vec<u64> = self.inner.entries.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, entry)) = self.inner.entries.remove(&id) {
                self.evict(id, entry.state, EvictionReason::Shutdown);
            }
        }
    }

    /// Whether a state is cached for `id`, expired or not.
    pub fn contains(&self, id: u64) -> bool {
        self.inner.entries.contains_key(&id)
    }

    /// Number of cached states, including expired ones not swept yet.
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    fn evict(&self, id: u64, state: RequestState, reason: EvictionReason) {
        (self.inner.on_evict)(id, state, reason);
    }
}

pub(crate) fn parse_timeout(timeout: Option<&str>, default: Duration) -> Duration {
    let Some(timeout) = timeout else {
        return default;
    };

    match humantime::parse_duration(timeout.trim()) {
        Ok(ttl) if !ttl.is_zero() => ttl,
        Ok(_) => {
            warn!("haproxy_spoa: zero request timeout, falling back to {default:?}");
            default
        }
        Err(e) => {
            warn!("haproxy_spoa: invalid request timeout {timeout:?} ({e}), falling back to {default:?}");
            default
        }
    }
}
