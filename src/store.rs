//! Document store access.
//!
//! Wraps the MongoDB collections used by the service: `searches` for
//! append-only query statistics, `user_flavours` for user defined flavours
//! and `user_data_meta` for auxiliary metadata about user-uploaded files.
//! The authoritative copy of user data lives in the search index; everything
//! in here is either append-only or best-effort.

use crate::config::ServerConfig;
use crate::error::FrevaRestError;
use crate::stats::StatsRecord;

use std::collections::HashMap;
use std::time::Duration;

use futures::TryStreamExt;
use mongodb::bson::{doc, to_bson, Document};
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection};
use serde::{Deserialize, Serialize};

/// Owner name of flavours that are visible to everybody.
pub const GLOBAL_OWNER: &str = "global";

/// A stored user flavour definition. Unique by `(name, owner)`.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct FlavourRecord {
    pub name: String,
    pub owner: String,
    pub mapping: HashMap<String, String>,
    pub created_at: String,
}

/// Auxiliary metadata kept per user-uploaded file.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct UserDataMeta {
    pub file: String,
    pub uri: String,
    pub user: String,
    pub metadata: HashMap<String, String>,
}

/// Handle on the document store.
#[derive(Clone)]
pub struct MongoStore {
    stats: Collection<StatsRecord>,
    flavours: Collection<FlavourRecord>,
    user_data: Collection<UserDataMeta>,
}

impl MongoStore {
    /// Connect to the document store described by the server configuration.
    pub async fn new(config: &ServerConfig) -> Result<Self, FrevaRestError> {
        let mut options = ClientOptions::parse(&config.mongo_url).await?;
        options.server_selection_timeout = Some(Duration::from_secs(5));
        options.app_name = Some("freva-rest".to_string());
        let client = Client::with_options(options)?;
        let db = client.database(&config.mongo_db);
        Ok(Self {
            stats: db.collection("searches"),
            flavours: db.collection("user_flavours"),
            user_data: db.collection("user_data_meta"),
        })
    }

    /// Append one statistics record. Never on the hot path; the caller runs
    /// this from the statistics consumer task.
    pub async fn insert_stats(&self, record: &StatsRecord) -> Result<(), FrevaRestError> {
        self.stats.insert_one(record, None).await?;
        Ok(())
    }

    /// Look up one flavour by its `(name, owner)` key.
    pub async fn find_flavour(
        &self,
        name: &str,
        owner: &str,
    ) -> Result<Option<FlavourRecord>, FrevaRestError> {
        let filter = doc! {"name": name, "owner": owner};
        Ok(self.flavours.find_one(filter, None).await?)
    }

    /// List the global flavours plus, if given, those of one user.
    pub async fn list_flavours(
        &self,
        owner: Option<&str>,
    ) -> Result<Vec<FlavourRecord>, FrevaRestError> {
        let filter = match owner {
            Some(owner) => doc! {"owner": {"$in": [GLOBAL_OWNER, owner]}},
            None => doc! {"owner": GLOBAL_OWNER},
        };
        let cursor = self.flavours.find(filter, None).await?;
        Ok(cursor.try_collect().await?)
    }

    /// Insert a new flavour definition.
    pub async fn insert_flavour(&self, record: &FlavourRecord) -> Result<(), FrevaRestError> {
        self.flavours.insert_one(record, None).await?;
        Ok(())
    }

    /// Replace the flavour stored under `(old_name, owner)` with `record`.
    /// This performs a rename when `record.name` differs from `old_name`.
    pub async fn replace_flavour(
        &self,
        old_name: &str,
        owner: &str,
        record: &FlavourRecord,
    ) -> Result<(), FrevaRestError> {
        let filter = doc! {"name": old_name, "owner": owner};
        self.flavours.replace_one(filter, record, None).await?;
        Ok(())
    }

    /// Delete a flavour; returns whether a document was removed.
    pub async fn delete_flavour(&self, name: &str, owner: &str) -> Result<bool, FrevaRestError> {
        let filter = doc! {"name": name, "owner": owner};
        let result = self.flavours.delete_one(filter, None).await?;
        Ok(result.deleted_count > 0)
    }

    /// Upsert auxiliary metadata for a batch of user-uploaded files, keyed
    /// by `(file, uri)`.
    pub async fn upsert_user_meta(&self, entries: &[UserDataMeta]) -> Result<(), FrevaRestError> {
        for entry in entries {
            let filter = doc! {"file": &entry.file, "uri": &entry.uri};
            let update = doc! {"$set": to_bson(entry).map_err(|error| {
                FrevaRestError::Internal(format!("could not encode user metadata: {error}"))
            })?};
            let options = mongodb::options::UpdateOptions::builder()
                .upsert(true)
                .build();
            self.user_data.update_one(filter, update, options).await?;
        }
        Ok(())
    }

    /// Remove auxiliary metadata matching the given search keys.
    pub async fn delete_user_meta(
        &self,
        search_keys: &HashMap<String, String>,
    ) -> Result<u64, FrevaRestError> {
        let mut filter = Document::new();
        for (key, value) in search_keys {
            if key.eq_ignore_ascii_case("file") {
                filter.insert(key.to_lowercase(), value.clone());
            } else {
                filter.insert(key.to_lowercase(), value.to_lowercase());
            }
        }
        let result = self.user_data.delete_many(filter, None).await?;
        Ok(result.deleted_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flavour_record_round_trip() {
        let record = FlavourRecord {
            name: "nextgem".to_string(),
            owner: "janedoe".to_string(),
            mapping: HashMap::from([
                ("project".to_string(), "mip_era".to_string()),
                ("model".to_string(), "source_id".to_string()),
            ]),
            created_at: "2024-01-15T10:30:00Z".to_string(),
        };
        let bson = to_bson(&record).unwrap();
        let back: FlavourRecord = mongodb::bson::from_bson(bson).unwrap();
        assert_eq!(record, back);
    }
}
