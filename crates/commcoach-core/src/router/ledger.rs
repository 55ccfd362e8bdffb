use dashmap::DashMap;
use serde::Serialize;

use crate::types::ProviderId;

/// Accumulated spend for one provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CostEntry {
    pub provider: ProviderId,
    pub request_count: u64,
    pub total_cost_usd: f64,
}

impl CostEntry {
    fn empty(provider: ProviderId) -> Self {
        Self {
            provider,
            request_count: 0,
            total_cost_usd: 0.0,
        }
    }
}

/// Per-provider request and cost counters. Only grows until `reset`.
pub struct CostLedger {
    entries: DashMap<ProviderId, CostEntry>,
}

impl CostLedger {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Record one successful request. Negative or NaN costs count as zero.
    pub fn record(&self, provider: ProviderId, cost: f64) {
        let cost = if cost.is_finite() && cost > 0.0 { cost } else { 0.0 };
        let mut entry = self
            .entries
            .entry(provider)
            .or_insert_with(|| CostEntry::empty(provider));
        entry.request_count += 1;
        entry.total_cost_usd += cost;
    }

    pub fn get(&self, provider: ProviderId) -> CostEntry {
        self.entries
            .get(&provider)
            .map(|e| e.clone())
            .unwrap_or_else(|| CostEntry::empty(provider))
    }

    /// One entry per provider, in tier order.
    pub fn snapshot(&self) -> Vec<CostEntry> {
        ProviderId::ALL.iter().map(|&id| self.get(id)).collect()
    }

    pub fn total_cost(&self) -> f64 {
        self.entries.iter().map(|e| e.total_cost_usd).sum()
    }

    pub fn reset(&self) {
        self.entries.clear();
    }
}

impl Default for CostLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_total() {
        let ledger = CostLedger::new();
        ledger.record(ProviderId::Gemini, 0.0);
        ledger.record(ProviderId::OpenRouter, 0.0075);
        ledger.record(ProviderId::OpenRouter, 0.0025);

        assert_eq!(ledger.get(ProviderId::Gemini).request_count, 1);
        let or = ledger.get(ProviderId::OpenRouter);
        assert_eq!(or.request_count, 2);
        assert!((or.total_cost_usd - 0.01).abs() < 1e-12);
        assert!((ledger.total_cost() - 0.01).abs() < 1e-12);
    }

    #[test]
    fn test_snapshot_has_every_provider() {
        let ledger = CostLedger::new();
        ledger.record(ProviderId::Ollama, 0.0);
        let snap = ledger.snapshot();
        assert_eq!(snap.len(), 3);
        assert_eq!(snap[0].provider, ProviderId::Gemini);
        assert_eq!(snap[0].request_count, 0);
        assert_eq!(snap[1].request_count, 1);
    }

    #[test]
    fn test_bogus_cost_ignored() {
        let ledger = CostLedger::new();
        ledger.record(ProviderId::OpenRouter, f64::NAN);
        ledger.record(ProviderId::OpenRouter, -1.0);
        let entry = ledger.get(ProviderId::OpenRouter);
        assert_eq!(entry.request_count, 2);
        assert_eq!(entry.total_cost_usd, 0.0);
    }

    #[test]
    fn test_reset() {
        let ledger = CostLedger::new();
        ledger.record(ProviderId::OpenRouter, 1.0);
        ledger.reset();
        assert_eq!(ledger.total_cost(), 0.0);
        assert_eq!(ledger.get(ProviderId::OpenRouter).request_count, 0);
    }
}
