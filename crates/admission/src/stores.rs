//! Durable-state traits for calls and usage records, with the in-memory
//! implementations the runtime and tests use. A database-backed deployment
//! implements the same traits over its engine.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use vx_domain::call::{CallRecord, CallStatus, UsageRecord};
use vx_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CallStore
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One row per call id.
#[async_trait::async_trait]
pub trait CallStore: Send + Sync {
    /// Insert a fresh in-progress record. Duplicate call ids are an error.
    async fn insert(&self, record: CallRecord) -> Result<()>;

    async fn get(&self, call_id: &str) -> Result<Option<CallRecord>>;

    async fn update(&self, record: &CallRecord) -> Result<()>;

    /// Count of non-terminal calls for a tenant.
    async fn count_active(&self, tenant_id: &str) -> Result<u32>;

    /// In-progress calls started before `cutoff` (stale-sweep candidates).
    async fn list_in_progress_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<CallRecord>>;
}

#[derive(Default)]
pub struct MemoryCallStore {
    calls: RwLock<HashMap<String, CallRecord>>,
}

impl MemoryCallStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl CallStore for MemoryCallStore {
    async fn insert(&self, record: CallRecord) -> Result<()> {
        let mut calls = self.calls.write();
        if calls.contains_key(&record.call_id) {
            return Err(Error::Internal(format!(
                "duplicate call record: {}",
                record.call_id
            )));
        }
        calls.insert(record.call_id.clone(), record);
        Ok(())
    }

    async fn get(&self, call_id: &str) -> Result<Option<CallRecord>> {
        Ok(self.calls.read().get(call_id).cloned())
    }

    async fn update(&self, record: &CallRecord) -> Result<()> {
        let mut calls = self.calls.write();
        match calls.get_mut(&record.call_id) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(Error::NotFound(format!("call record: {}", record.call_id))),
        }
    }

    async fn count_active(&self, tenant_id: &str) -> Result<u32> {
        Ok(self
            .calls
            .read()
            .values()
            .filter(|c| c.tenant_id == tenant_id && !c.status.is_terminal())
            .count() as u32)
    }

    async fn list_in_progress_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<CallRecord>> {
        Ok(self
            .calls
            .read()
            .values()
            .filter(|c| c.status == CallStatus::InProgress && c.started_at < cutoff)
            .cloned()
            .collect())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// UsageStore
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Append-only usage records, write-once per call id.
#[async_trait::async_trait]
pub trait UsageStore: Send + Sync {
    /// Append the record unless one already exists for its call id.
    /// Returns whether the record was inserted.
    async fn record_once(&self, record: UsageRecord) -> Result<bool>;

    /// Billed minutes a tenant consumed inside a billing period.
    async fn used_minutes(
        &self,
        tenant_id: &str,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<u64>;
}

#[derive(Default)]
pub struct MemoryUsageStore {
    records: RwLock<Vec<UsageRecord>>,
}

impl MemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot for assertions in tests.
    pub fn all(&self) -> Vec<UsageRecord> {
        self.records.read().clone()
    }
}

#[async_trait::async_trait]
impl UsageStore for MemoryUsageStore {
    async fn record_once(&self, record: UsageRecord) -> Result<bool> {
        let mut records = self.records.write();
        if records.iter().any(|r| r.call_id == record.call_id) {
            return Ok(false);
        }
        records.push(record);
        Ok(true)
    }

    async fn used_minutes(
        &self,
        tenant_id: &str,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Result<u64> {
        Ok(self
            .records
            .read()
            .iter()
            .filter(|r| {
                r.tenant_id == tenant_id
                    && r.period_start >= period_start
                    && r.period_end <= period_end
            })
            .map(|r| r.quantity)
            .sum())
    }
}
