use std::collections::BTreeMap;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Mutex;

use crate::config::TrackerConfig;
use crate::models::ProfileRow;

/// The opaque upstream table store.
///
/// The one real correctness contract in the system lives here: `upsert`
/// must treat `user_id` as a unique key, so a second write for the same
/// visitor replaces the existing record instead of creating a duplicate.
/// Overlapping writes are tolerated as last-write-wins.
#[async_trait]
pub trait ProfileSink: Send + Sync {
    async fn upsert(&self, table: &str, row: &ProfileRow) -> Result<()>;
    async fn insert_rows(&self, table: &str, rows: &[Value]) -> Result<()>;
    async fn select_all(&self, table: &str) -> Result<Vec<ProfileRow>>;
}

/// Supabase (PostgREST) implementation of the sink.
#[derive(Clone, Debug)]
pub struct SupabaseSink {
    base_url: String,
    api_key: String,
    http: reqwest::Client,
}

impl SupabaseSink {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        if base_url.is_empty() {
            return Err(anyhow!("supabase base url is empty"));
        }
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            base_url,
            api_key: api_key.into(),
            http,
        })
    }

    /// Builds a sink from the tracker configuration, or `None` when the
    /// endpoint/credential is absent (fail closed: no writes attempted).
    pub fn from_config(config: &TrackerConfig) -> Option<Self> {
        if !config.sink_configured() {
            return None;
        }
        Self::new(&config.supabase_url, &config.api_key).ok()
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authed(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }
}

#[async_trait]
impl ProfileSink for SupabaseSink {
    async fn upsert(&self, table: &str, row: &ProfileRow) -> Result<()> {
        let url = format!("{}?on_conflict=user_id", self.table_url(table));
        let response = self
            .authed(self.http.post(&url))
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&[row])
            .send()
            .await
            .with_context(|| format!("upsert request to {table} failed"))?;
        response
            .error_for_status()
            .with_context(|| format!("upsert into {table} rejected"))?;
        Ok(())
    }

    async fn insert_rows(&self, table: &str, rows: &[Value]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let response = self
            .authed(self.http.post(self.table_url(table)))
            .header("Prefer", "return=minimal")
            .json(rows)
            .send()
            .await
            .with_context(|| format!("insert request to {table} failed"))?;
        response
            .error_for_status()
            .with_context(|| format!("insert into {table} rejected"))?;
        Ok(())
    }

    async fn select_all(&self, table: &str) -> Result<Vec<ProfileRow>> {
        let url = format!("{}?select=*&order=last_updated.desc", self.table_url(table));
        let response = self
            .authed(self.http.get(&url))
            .send()
            .await
            .with_context(|| format!("select request to {table} failed"))?
            .error_for_status()
            .with_context(|| format!("select from {table} rejected"))?;
        let rows = response
            .json::<Vec<ProfileRow>>()
            .await
            .context("malformed rows in select response")?;
        Ok(rows)
    }
}

/// In-memory sink with real upsert-by-key semantics. Backs the tests and
/// any embedding that wants to inspect writes without a network.
#[derive(Default)]
pub struct MemorySink {
    rows: Mutex<BTreeMap<String, ProfileRow>>,
    inserted: Mutex<Vec<Value>>,
    fail_writes: Mutex<bool>,
    upsert_count: Mutex<u64>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent writes fail, for exercising the retry path.
    pub fn set_failing(&self, failing: bool) {
        *self.fail_writes.lock().unwrap_or_else(|e| e.into_inner()) = failing;
    }

    pub fn row(&self, user_id: &str) -> Option<ProfileRow> {
        self.rows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(user_id)
            .cloned()
    }

    pub fn row_count(&self) -> usize {
        self.rows.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn upsert_count(&self) -> u64 {
        *self.upsert_count.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn inserted_rows(&self) -> Vec<Value> {
        self.inserted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn seed(&self, rows: Vec<ProfileRow>) {
        let mut guard = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        for row in rows {
            guard.insert(row.user_id.clone(), row);
        }
    }

    fn check_failing(&self) -> Result<()> {
        if *self.fail_writes.lock().unwrap_or_else(|e| e.into_inner()) {
            return Err(anyhow!("sink write failure (injected)"));
        }
        Ok(())
    }
}

#[async_trait]
impl ProfileSink for MemorySink {
    async fn upsert(&self, _table: &str, row: &ProfileRow) -> Result<()> {
        self.check_failing()?;
        *self.upsert_count.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        self.rows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(row.user_id.clone(), row.clone());
        Ok(())
    }

    async fn insert_rows(&self, _table: &str, rows: &[Value]) -> Result<()> {
        self.check_failing()?;
        self.inserted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend_from_slice(rows);
        Ok(())
    }

    async fn select_all(&self, _table: &str) -> Result<Vec<ProfileRow>> {
        Ok(self
            .rows
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect())
    }
}
