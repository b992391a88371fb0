//! Directory snapshot materialization.
//!
//! The current snapshot is published by swapping one `Arc`; readers clone the
//! `Arc` and never observe a half-built directory. Refreshes are single-flight:
//! a caller that arrives while a rebuild is running waits for it and takes its
//! result instead of starting another.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{debug, info, instrument};

use shopfront_core::Clock;
use shopfront_directory::{DirectorySnapshot, ExclusionReason, FreshnessPolicy, materialize};

use crate::config::DirectoryConfig;
use crate::store::{DirectorySource, StoreError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MaterializeError {
    #[error("failed to load directory inputs: {0}")]
    Source(#[from] StoreError),

    #[error("invalid directory configuration: {0}")]
    InvalidConfig(String),
}

/// How a refresh call obtained its snapshot.
#[derive(Debug, Clone)]
pub enum RefreshOutcome {
    /// This call rebuilt and published the snapshot.
    Built(Arc<DirectorySnapshot>),
    /// Another refresh was in flight; this call shares its result.
    Joined(Arc<DirectorySnapshot>),
}

impl RefreshOutcome {
    pub fn snapshot(&self) -> &Arc<DirectorySnapshot> {
        match self {
            Self::Built(s) | Self::Joined(s) => s,
        }
    }

    pub fn into_snapshot(self) -> Arc<DirectorySnapshot> {
        match self {
            Self::Built(s) | Self::Joined(s) => s,
        }
    }

    pub fn was_joined(&self) -> bool {
        matches!(self, Self::Joined(_))
    }
}

pub struct DirectoryMaterializer<S> {
    source: S,
    clock: Arc<dyn Clock>,
    policy: RwLock<FreshnessPolicy>,
    refresh_interval: Duration,
    current: RwLock<Arc<DirectorySnapshot>>,
    refresh_gate: tokio::sync::Mutex<()>,
    published: AtomicU64,
}

impl<S: DirectorySource> DirectoryMaterializer<S> {
    /// Start with an empty generation-0 snapshot.
    pub fn new(source: S, clock: Arc<dyn Clock>, config: &DirectoryConfig) -> Result<Self, MaterializeError> {
        let window = config
            .freshness_window()
            .map_err(|e| MaterializeError::InvalidConfig(e.to_string()))?;
        let policy = FreshnessPolicy::new(window).map_err(|e| MaterializeError::InvalidConfig(e.to_string()))?;
        let refresh_interval = config
            .refresh_interval()
            .map_err(|e| MaterializeError::InvalidConfig(e.to_string()))?;
        let empty = DirectorySnapshot::empty(clock.now());

        Ok(Self {
            source,
            clock,
            policy: RwLock::new(policy),
            refresh_interval,
            current: RwLock::new(Arc::new(empty)),
            refresh_gate: tokio::sync::Mutex::new(()),
            published: AtomicU64::new(0),
        })
    }

    /// The most recently published snapshot.
    pub fn current_snapshot(&self) -> Arc<DirectorySnapshot> {
        self.current.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn freshness_window(&self) -> Duration {
        self.policy.read().unwrap_or_else(|e| e.into_inner()).window()
    }

    /// Change the freshness window. Takes effect on the next refresh.
    pub fn set_freshness_window(&self, window: Duration) -> Result<(), MaterializeError> {
        let policy = FreshnessPolicy::new(window).map_err(|e| MaterializeError::InvalidConfig(e.to_string()))?;
        *self.policy.write().unwrap_or_else(|e| e.into_inner()) = policy;
        info!(window_secs = window.num_seconds(), "directory freshness window changed");
        Ok(())
    }

    /// Whether the published snapshot is older than the refresh interval.
    pub fn refresh_due(&self, now: DateTime<Utc>) -> bool {
        let current = self.current_snapshot();
        current.generation() == 0 || now - current.built_at() >= self.refresh_interval
    }

    /// Rebuild the directory from the source and publish it.
    ///
    /// On failure the previous snapshot stays published. Dropping the returned
    /// future before it completes leaves the previous snapshot in place too.
    #[instrument(skip(self), err)]
    pub async fn refresh(&self) -> Result<RefreshOutcome, MaterializeError> {
        let observed = self.published.load(Ordering::Acquire);
        let _gate = self.refresh_gate.lock().await;

        let latest = self.published.load(Ordering::Acquire);
        if latest != observed {
            debug!(generation = latest, "joined in-flight directory refresh");
            return Ok(RefreshOutcome::Joined(self.current_snapshot()));
        }

        let policy = *self.policy.read().unwrap_or_else(|e| e.into_inner());
        let inputs = self.source.load_directory_inputs().await?;
        let now = self.clock.now();
        let generation = latest + 1;

        let snapshot = Arc::new(materialize(&inputs, &policy, now, generation));
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = Arc::clone(&snapshot);
        self.published.store(generation, Ordering::Release);

        let stats = snapshot.stats();
        info!(
            generation,
            considered = stats.considered,
            included = stats.included,
            stale = stats.excluded_for(ExclusionReason::Stale),
            never_synced = stats.excluded_for(ExclusionReason::NeverSynced),
            no_public_inventory = stats.excluded_for(ExclusionReason::NoPublicInventory),
            "directory snapshot published"
        );
        Ok(RefreshOutcome::Built(snapshot))
    }

    /// Refresh only when [`refresh_due`](Self::refresh_due) says so.
    pub async fn refresh_if_due(&self) -> Result<Option<RefreshOutcome>, MaterializeError> {
        if !self.refresh_due(self.clock.now()) {
            return Ok(None);
        }
        self.refresh().await.map(Some)
    }
}
