//! Query statistics.
//!
//! Every terminal request emits one [StatsRecord] describing the query. The
//! records flow through a bounded queue into the document store so that the
//! insert never happens on the request path. When the queue is full the
//! record is dropped and a counter is incremented; statistics are strictly
//! best-effort.

use crate::metrics::STATS_RECORDS_DROPPED;
use crate::store::MongoStore;

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Capacity of the statistics queue.
const QUEUE_CAPACITY: usize = 4096;

/// One append-only record describing a terminal request.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct StatsRecord {
    /// ISO-8601 UTC timestamp at which the request finished.
    pub timestamp: String,
    /// Route template that served the request.
    pub route: String,
    /// Username of the authenticated principal, if any.
    pub principal: Option<String>,
    /// The flavour the query was issued against.
    pub flavour: String,
    /// The canonicalised search facets.
    pub facets: HashMap<String, String>,
    /// Number of results the backend reported.
    pub result_count: i64,
    /// Wall-clock duration of the request in milliseconds.
    pub duration_ms: u64,
    /// HTTP status the request terminated with.
    pub status: u16,
}

impl StatsRecord {
    /// Create a record stamped with the current time.
    #[allow(clippy::too_many_arguments)]
    pub fn now(
        route: &str,
        principal: Option<String>,
        flavour: &str,
        facets: HashMap<String, String>,
        result_count: i64,
        duration_ms: u64,
        status: u16,
    ) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            route: route.to_string(),
            principal,
            flavour: flavour.to_string(),
            facets,
            result_count,
            duration_ms,
            status,
        }
    }
}

/// Producer handle of the statistics queue.
#[derive(Clone)]
pub struct StatsQueue {
    sender: mpsc::Sender<StatsRecord>,
}

impl StatsQueue {
    /// Create the queue and spawn the consumer task that drains it into the
    /// document store.
    pub fn new(store: MongoStore) -> Self {
        Self::with_capacity(store, QUEUE_CAPACITY)
    }

    fn with_capacity(store: MongoStore, capacity: usize) -> Self {
        let (sender, mut receiver) = mpsc::channel::<StatsRecord>(capacity);
        tokio::spawn(async move {
            while let Some(record) = receiver.recv().await {
                if let Err(error) = store.insert_stats(&record).await {
                    tracing::warn!("could not add stats to the document store: {error}");
                }
            }
        });
        Self { sender }
    }

    /// Enqueue one record without blocking. Overflow drops the newest record.
    pub fn record(&self, record: StatsRecord) {
        if self.sender.try_send(record).is_err() {
            STATS_RECORDS_DROPPED.inc();
            tracing::debug!("statistics queue full, dropping record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_serialises_without_principal() {
        let record = StatsRecord::now("/databrowser/data-search", None, "freva", HashMap::new(), 3, 12, 200);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["principal"], serde_json::Value::Null);
        assert_eq!(json["result_count"], 3);
        assert_eq!(json["status"], 200);
    }

    #[test]
    fn record_keeps_facets() {
        let facets = HashMap::from([("project".to_string(), "observations".to_string())]);
        let record = StatsRecord::now(
            "/databrowser/metadata-search",
            Some("janedoe".to_string()),
            "cmip6",
            facets,
            0,
            5,
            200,
        );
        assert_eq!(record.facets["project"], "observations");
        assert_eq!(record.principal.as_deref(), Some("janedoe"));
    }
}
