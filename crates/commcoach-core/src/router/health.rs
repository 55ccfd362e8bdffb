//! Per-provider circuit breaker.
//!
//! Closed (healthy) circuits count consecutive failures; reaching the
//! threshold opens the circuit. An open circuit is closed again by the first
//! health query made after `reset_timeout` has passed, and the next real
//! request acts as the probe. There is no separate half-open state, so a
//! burst of requests right at expiry can all hit the recovering provider and
//! re-open it together.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::types::ProviderId;

/// Circuit-breaker tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthSettings {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

/// Health record for one provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderHealth {
    pub healthy: bool,
    pub consecutive_failures: u32,
    #[serde(skip)]
    pub last_transition: Option<Instant>,
    /// Wall-clock time of `last_transition`, for display.
    pub last_transition_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Default for ProviderHealth {
    fn default() -> Self {
        Self {
            healthy: true,
            consecutive_failures: 0,
            last_transition: None,
            last_transition_at: None,
            last_error: None,
        }
    }
}

impl ProviderHealth {
    /// Whether the open period has run out at `now`.
    fn expired(&self, now: Instant, reset_timeout: Duration) -> bool {
        match self.last_transition {
            Some(opened) if !self.healthy => now.saturating_duration_since(opened) > reset_timeout,
            _ => false,
        }
    }

    fn close(&mut self) {
        self.healthy = true;
        self.consecutive_failures = 0;
    }
}

/// Tracks circuit state for every provider. Each record is updated under its
/// own map-entry lock; there is no cross-provider ordering.
pub struct HealthTracker {
    settings: HealthSettings,
    records: DashMap<ProviderId, ProviderHealth>,
}

impl HealthTracker {
    pub fn new(settings: HealthSettings) -> Self {
        let records = DashMap::new();
        for id in ProviderId::ALL {
            records.insert(id, ProviderHealth::default());
        }
        Self { settings, records }
    }

    pub fn settings(&self) -> HealthSettings {
        self.settings
    }

    pub fn is_healthy(&self, id: ProviderId) -> bool {
        self.is_healthy_at(id, Instant::now())
    }

    /// Health query with the passive reset applied.
    pub fn is_healthy_at(&self, id: ProviderId, now: Instant) -> bool {
        let mut record = self.records.entry(id).or_default();
        if record.expired(now, self.settings.reset_timeout) {
            record.close();
            record.last_transition = Some(now);
            record.last_transition_at = Some(Utc::now());
            info!("Circuit for {} closed after {:?}; next request will probe it", id, self.settings.reset_timeout);
        }
        record.healthy
    }

    pub fn record_success(&self, id: ProviderId) {
        self.record_success_at(id, Instant::now());
    }

    pub fn record_success_at(&self, id: ProviderId, now: Instant) {
        let mut record = self.records.entry(id).or_default();
        record.consecutive_failures = 0;
        if !record.healthy {
            // A request that started before the circuit opened came back fine
            record.healthy = true;
            record.last_transition = Some(now);
            record.last_transition_at = Some(Utc::now());
            info!("Circuit for {} closed by a successful request", id);
        }
    }

    /// Count a failure. Returns true when this call opened the circuit.
    pub fn record_failure(&self, id: ProviderId, error: &str) -> bool {
        self.record_failure_at(id, error, Instant::now())
    }

    pub fn record_failure_at(&self, id: ProviderId, error: &str, now: Instant) -> bool {
        let mut record = self.records.entry(id).or_default();
        record.consecutive_failures = record.consecutive_failures.saturating_add(1);
        record.last_error = Some(error.to_string());

        if record.healthy && record.consecutive_failures >= self.settings.failure_threshold {
            record.healthy = false;
            record.last_transition = Some(now);
            record.last_transition_at = Some(Utc::now());
            warn!(
                "Circuit for {} opened after {} consecutive failures; excluded for {:?}",
                id, record.consecutive_failures, self.settings.reset_timeout
            );
            return true;
        }
        false
    }

    /// Read a record as a health query at `now` would see it, without
    /// storing the passive reset. Transition timestamps are left as stored.
    pub fn peek(&self, id: ProviderId, now: Instant) -> ProviderHealth {
        let mut record = self
            .records
            .get(&id)
            .map(|r| r.clone())
            .unwrap_or_default();
        if record.expired(now, self.settings.reset_timeout) {
            record.close();
        }
        record
    }

    /// Force-close every circuit.
    pub fn reset(&self) {
        for id in ProviderId::ALL {
            self.records.insert(id, ProviderHealth::default());
        }
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new(HealthSettings::default())
    }
}
