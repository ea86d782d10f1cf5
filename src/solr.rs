//! Search index adapter.
//!
//! Issues queries against the Apache Solr full-text index: facet counts,
//! document retrieval and cursor-based streaming. Cross-cutting rules the
//! index cannot express natively (time-range semantics, bounding boxes,
//! the multi-version rule, user-data visibility) are applied here by
//! generating the appropriate filter queries. The adapter also implements
//! insert and delete for user data.

use crate::bbox::BoundingBox;
use crate::config::ServerConfig;
use crate::error::FrevaRestError;
use crate::facet;
use crate::flavour::{BuiltInFlavour, Flavour, Translator};
use crate::store::{MongoStore, UserDataMeta};
use crate::timespec::{self, TimeRange, TimeSelect};

use std::collections::HashMap;
use std::time::Duration;

use futures::stream::{self, Stream};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

/// Page size for cursor-based streaming.
pub const CURSOR_BATCH_SIZE: usize = 150;

/// Deadline for a single call to the search backend.
const BACKEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Back-off delays between retries on connection errors.
const RETRY_DELAYS_MS: [u64; 3] = [100, 400, 1600];

/// The two unique keys a search can return.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UniqKey {
    File,
    Uri,
}

impl UniqKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            UniqKey::File => "file",
            UniqKey::Uri => "uri",
        }
    }

    pub fn from_param(value: &str) -> Result<Self, FrevaRestError> {
        match value {
            "file" => Ok(UniqKey::File),
            "uri" => Ok(UniqKey::Uri),
            other => Err(FrevaRestError::InvalidInput(format!(
                "uniq_key must be 'file' or 'uri'; got: {other}"
            ))),
        }
    }
}

/// One document as stored in the index.
pub type SolrDocument = Map<String, Value>;

/// Get a document field as a single string; multi-valued fields yield their
/// first entry.
pub fn doc_field_str(doc: &SolrDocument, key: &str) -> Option<String> {
    match doc.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Array(values) => values.first().and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// A fully canonicalised search, ready to be rendered into index syntax.
#[derive(Clone, Debug)]
pub struct SearchQuery {
    pub uniq_key: UniqKey,
    /// Canonical facet constraints (keys may carry the `_not_` marker).
    pub facets: Vec<(String, Vec<String>)>,
    pub time: Option<TimeRange>,
    pub time_select: TimeSelect,
    pub bbox: Option<BoundingBox>,
    pub multi_version: bool,
    /// Only expose user-ingested documents (the `user` flavour does this).
    pub user_scope_only: bool,
}

impl SearchQuery {
    /// Build a query from raw `key=value` pairs. Special keys (`time`,
    /// `time_select`, `bbox`) are pulled out; everything else is
    /// canonicalised through the translator. Unknown facets and the
    /// `version` facet outside multi-version mode are rejected.
    pub fn parse(
        translator: &Translator,
        uniq_key: UniqKey,
        pairs: &[(String, String)],
        multi_version: bool,
    ) -> Result<Self, FrevaRestError> {
        let mut time_spec = String::new();
        let mut time_select = TimeSelect::default();
        let mut bbox = None;
        let mut grouped: Vec<(String, Vec<String>)> = Vec::new();
        for (key, value) in pairs {
            match key.as_str() {
                "time" => time_spec = value.clone(),
                "time_select" => time_select = TimeSelect::from_param(value)?,
                "bbox" => bbox = Some(BoundingBox::parse(value)?),
                _ => match grouped.iter_mut().find(|(k, _)| k == key) {
                    Some((_, values)) => values.push(value.clone()),
                    None => grouped.push((key.clone(), vec![value.clone()])),
                },
            }
        }
        let facets = translator.translate_in(&grouped)?;
        if !multi_version
            && facets
                .iter()
                .any(|(key, _)| key.trim_end_matches("_not_") == "version")
        {
            return Err(FrevaRestError::InvalidInput(
                "the version facet requires multi_version=true".to_string(),
            ));
        }
        Ok(Self {
            uniq_key,
            facets,
            time: timespec::parse_time_spec(&time_spec)?,
            time_select,
            bbox,
            multi_version,
            user_scope_only: translator.flavour == Flavour::BuiltIn(BuiltInFlavour::User),
        })
    }

    /// Render the filter queries that encode this search.
    pub fn filter_queries(&self) -> Result<Vec<String>, FrevaRestError> {
        let mut filters = Vec::new();
        if let Some(time) = &self.time {
            filters.push(time.to_filter(self.time_select));
        }
        if let Some(bbox) = &self.bbox {
            filters.push(bbox.to_filter());
        }
        if self.user_scope_only {
            filters.push("user:*".to_string());
        } else {
            filters.push("{!ex=userTag}-user:*".to_string());
        }
        filters.push(facet::build_filter_query(&self.facets)?);
        Ok(filters)
    }

    /// The canonical facets as a flat map, for statistics records.
    pub fn facets_for_stats(&self) -> HashMap<String, String> {
        self.facets
            .iter()
            .map(|(key, values)| (key.clone(), values.join("&")))
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct SolrSelectResponse {
    #[serde(default)]
    response: SolrResponseBody,
    #[serde(rename = "nextCursorMark")]
    next_cursor_mark: Option<String>,
    facet_counts: Option<SolrFacetCounts>,
}

#[derive(Debug, Default, Deserialize)]
struct SolrResponseBody {
    #[serde(rename = "numFound", default)]
    num_found: u64,
    #[serde(default)]
    docs: Vec<SolrDocument>,
}

#[derive(Debug, Deserialize)]
struct SolrFacetCounts {
    #[serde(default)]
    facet_fields: HashMap<String, Vec<Value>>,
}

/// Facet counts for one field: `(value, count)` pairs in index order.
pub type FacetCounts = Vec<(String, u64)>;

/// Result of a metadata (facet) search.
#[derive(Debug)]
pub struct MetadataResult {
    pub total_count: u64,
    pub facets: Vec<(String, FacetCounts)>,
}

/// Outcome of a user-data ingest.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub ingested: usize,
    pub skipped: usize,
}

/// The search index adapter.
#[derive(Clone)]
pub struct Solr {
    config: ServerConfig,
    store: MongoStore,
    client: reqwest::Client,
}

impl Solr {
    pub fn new(config: ServerConfig, store: MongoStore) -> Self {
        let client = reqwest::Client::builder()
            .timeout(BACKEND_TIMEOUT)
            .build()
            .expect("the reqwest client builder accepts a plain timeout");
        Self {
            config,
            store,
            client,
        }
    }

    /// The select URL for the core a query addresses: the multi-version
    /// core or the latest-version view.
    fn select_url(&self, multi_version: bool) -> String {
        let (multi, latest) = self.config.solr_cores();
        let core = if multi_version { multi } else { latest };
        self.config.solr_select_url(core)
    }

    /// The update URL; user data always lives in the latest-version view.
    fn update_url(&self) -> String {
        let (_, latest) = self.config.solr_cores();
        self.config.solr_update_url(latest)
    }

    /// Issue one GET against the index, retrying connection failures with
    /// exponential back-off before surfacing `BACKEND_UNAVAILABLE`.
    async fn select(
        &self,
        url: &str,
        params: &[(String, String)],
    ) -> Result<SolrSelectResponse, FrevaRestError> {
        let mut delays = RETRY_DELAYS_MS.iter();
        loop {
            let result = self.client.get(url).query(params).send().await;
            match result {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response.json().await.map_err(|error| {
                            FrevaRestError::BackendUnavailable(format!(
                                "search backend returned an unreadable reply: {error}"
                            ))
                        });
                    }
                    let body = response.text().await.unwrap_or_default();
                    tracing::error!("search backend replied {status}: {body}");
                    if status.is_client_error() {
                        return Err(FrevaRestError::InvalidInput(
                            "the search backend rejected the query".to_string(),
                        ));
                    }
                    return Err(FrevaRestError::BackendUnavailable(
                        "search backend error".to_string(),
                    ));
                }
                Err(error) if error.is_connect() || error.is_timeout() => {
                    match delays.next() {
                        Some(delay) => {
                            tracing::warn!("search backend unreachable, retrying: {error}");
                            tokio::time::sleep(Duration::from_millis(*delay)).await;
                        }
                        None => {
                            return Err(FrevaRestError::BackendUnavailable(
                                "could not connect to the search backend".to_string(),
                            ));
                        }
                    }
                }
                Err(error) => {
                    return Err(FrevaRestError::BackendUnavailable(format!(
                        "search backend request failed: {error}"
                    )));
                }
            }
        }
    }

    /// POST a JSON payload to the index update handler.
    async fn update(&self, payload: &Value) -> Result<(), FrevaRestError> {
        let response = self
            .client
            .post(self.update_url())
            .json(payload)
            .send()
            .await
            .map_err(|error| {
                FrevaRestError::BackendUnavailable(format!(
                    "could not connect to the search backend: {error}"
                ))
            })?;
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FrevaRestError::BackendUnavailable(format!(
                "search backend rejected the update: {body}"
            )));
        }
        Ok(())
    }

    fn base_params(query: &SearchQuery) -> Result<Vec<(String, String)>, FrevaRestError> {
        let mut params = vec![
            ("q".to_string(), "*:*".to_string()),
            ("wt".to_string(), "json".to_string()),
            ("sort".to_string(), "id asc".to_string()),
        ];
        for fq in query.filter_queries()? {
            params.push(("fq".to_string(), fq));
        }
        Ok(params)
    }

    /// Count the documents matching a query.
    pub async fn count_results(&self, query: &SearchQuery) -> Result<u64, FrevaRestError> {
        let mut params = Self::base_params(query)?;
        params.push(("rows".to_string(), "0".to_string()));
        let response = self.select(&self.select_url(query.multi_version), &params).await?;
        Ok(response.response.num_found)
    }

    /// Facet counts for the given canonical fields, plus the total count.
    /// Passing no fields uses the full canonical facet set.
    pub async fn facet_counts(
        &self,
        query: &SearchQuery,
        fields: &[String],
        rows: usize,
    ) -> Result<(MetadataResult, Vec<SolrDocument>), FrevaRestError> {
        let mut params = Self::base_params(query)?;
        params.push(("rows".to_string(), rows.to_string()));
        params.push(("facet".to_string(), "true".to_string()));
        params.push(("facet.sort".to_string(), "index".to_string()));
        params.push(("facet.mincount".to_string(), "1".to_string()));
        params.push(("facet.limit".to_string(), "-1".to_string()));
        for field in fields {
            params.push(("facet.field".to_string(), field.clone()));
        }
        params.push((
            "fl".to_string(),
            format!("{},fs_type", query.uniq_key.as_str()),
        ));
        let response = self.select(&self.select_url(query.multi_version), &params).await?;
        let mut facets = Vec::new();
        if let Some(counts) = response.facet_counts {
            // Preserve the requested field order.
            for field in fields {
                if let Some(flat) = counts.facet_fields.get(field) {
                    facets.push((field.clone(), parse_facet_counts(flat)));
                }
            }
        }
        Ok((
            MetadataResult {
                total_count: response.response.num_found,
                facets,
            },
            response.response.docs,
        ))
    }

    /// Retrieve one page of documents using plain offset pagination.
    pub async fn fetch_page(
        &self,
        query: &SearchQuery,
        fields: &[&str],
        start: usize,
        rows: usize,
        extra_fq: Option<String>,
        descending: bool,
    ) -> Result<(u64, Vec<SolrDocument>), FrevaRestError> {
        let mut params = Self::base_params(query)?;
        if descending {
            // Used for backwards pagination; callers reverse the page.
            params.retain(|(key, _)| key != "sort");
            params.push(("sort".to_string(), "id desc".to_string()));
        }
        if let Some(fq) = extra_fq {
            params.push(("fq".to_string(), fq));
        }
        params.push(("start".to_string(), start.to_string()));
        params.push(("rows".to_string(), rows.to_string()));
        params.push(("fl".to_string(), fields.join(",")));
        let response = self.select(&self.select_url(query.multi_version), &params).await?;
        Ok((response.response.num_found, response.response.docs))
    }

    /// Stream all matching documents lazily through the index cursor.
    /// The order is the index order: `id` ascending, stable across pages.
    /// The stream is pull-based; nothing is fetched until it is polled and
    /// dropping it releases the backend cursor.
    pub fn stream_docs(
        &self,
        query: &SearchQuery,
        fields: Vec<String>,
    ) -> Result<impl Stream<Item = Result<SolrDocument, FrevaRestError>> + Send + 'static, FrevaRestError>
    {
        struct CursorState {
            solr: Solr,
            url: String,
            base: Vec<(String, String)>,
            cursor: String,
            buffer: std::collections::VecDeque<SolrDocument>,
            done: bool,
        }

        let mut base = Self::base_params(query)?;
        base.push(("rows".to_string(), CURSOR_BATCH_SIZE.to_string()));
        base.push(("fl".to_string(), fields.join(",")));
        let state = CursorState {
            solr: self.clone(),
            url: self.select_url(query.multi_version),
            base,
            cursor: "*".to_string(),
            buffer: Default::default(),
            done: false,
        };

        Ok(stream::try_unfold(state, |mut state| async move {
            loop {
                if let Some(doc) = state.buffer.pop_front() {
                    return Ok(Some((doc, state)));
                }
                if state.done {
                    return Ok(None);
                }
                let mut params = state.base.clone();
                params.push(("cursorMark".to_string(), state.cursor.clone()));
                let response = state.solr.select(&state.url, &params).await?;
                state.buffer.extend(response.response.docs);
                match response.next_cursor_mark {
                    Some(next) if next != state.cursor => state.cursor = next,
                    _ => state.done = true,
                }
                if state.buffer.is_empty() {
                    state.done = true;
                }
            }
        }))
    }

    /// Stream the unique keys (file paths or URIs) of all matching
    /// documents, honouring a start offset and an optional limit.
    pub fn stream_uniq_keys(
        &self,
        query: &SearchQuery,
        start: usize,
        limit: Option<usize>,
    ) -> Result<impl Stream<Item = Result<String, FrevaRestError>> + Send + 'static, FrevaRestError>
    {
        use futures::StreamExt;
        let uniq_key = query.uniq_key.as_str().to_string();
        let docs = self.stream_docs(query, vec![uniq_key.clone()])?;
        let keyed = docs.filter_map(move |item| {
            let uniq_key = uniq_key.clone();
            async move {
                match item {
                    Ok(doc) => doc_field_str(&doc, &uniq_key).map(Ok),
                    Err(error) => Some(Err(error)),
                }
            }
        });
        let skipped = keyed.skip(start);
        Ok(match limit {
            Some(limit) => skipped.take(limit).left_stream(),
            None => skipped.right_stream(),
        })
    }

    /// Check whether a document with the given URI or file path exists.
    async fn is_duplicate(&self, uri: &str, file: &str) -> Result<bool, FrevaRestError> {
        let query = format!(
            "uri:\"{}\" OR file:\"{}\"",
            facet::escape_lucene(uri),
            facet::escape_lucene(file)
        );
        let params = vec![
            ("q".to_string(), query),
            ("fl".to_string(), "id".to_string()),
            ("rows".to_string(), "1".to_string()),
            ("wt".to_string(), "json".to_string()),
        ];
        let (_, latest) = self.config.solr_cores();
        let response = self
            .select(&self.config.solr_select_url(latest), &params)
            .await?;
        Ok(response.response.num_found > 0)
    }

    /// Ingest user data. Each entry must carry `file`, `variable`, `time`
    /// and `time_frequency`; the shared facets apply to every entry with
    /// per-entry overrides. Entries already present in the index are
    /// skipped. Every document is stamped with the uploader's username.
    pub async fn add_user_data(
        &self,
        username: &str,
        entries: &[HashMap<String, String>],
        facets: &HashMap<String, String>,
    ) -> Result<IngestReport, FrevaRestError> {
        const REQUIRED: [&str; 4] = ["file", "variable", "time", "time_frequency"];
        let mut report = IngestReport::default();
        let mut documents = Vec::new();
        let mut meta_entries = Vec::new();
        for entry in entries {
            if REQUIRED.iter().any(|field| !entry.contains_key(*field)) {
                report.skipped += 1;
                continue;
            }
            let mut merged: HashMap<String, String> = facets.clone();
            merged.extend(entry.clone());
            let file = merged.get("file").cloned().unwrap_or_default();
            let uri = merged.get("uri").cloned().unwrap_or_else(|| file.clone());
            merged.insert("uri".to_string(), uri.clone());
            merged
                .entry("fs_type".to_string())
                .or_insert_with(|| "posix".to_string());
            merged.insert("user".to_string(), username.to_string());
            if self.is_duplicate(&uri, &file).await? {
                report.skipped += 1;
                continue;
            }
            let mut doc = Map::new();
            doc.insert("id".to_string(), json!(stable_id(&uri)));
            for (key, value) in &merged {
                if key == "file" || key == "uri" || key == "time" {
                    doc.insert(key.clone(), json!(value));
                } else {
                    doc.insert(key.clone(), json!(value.to_lowercase()));
                }
            }
            documents.push(Value::Object(doc));
            meta_entries.push(UserDataMeta {
                file,
                uri,
                user: username.to_string(),
                metadata: merged,
            });
            report.ingested += 1;
        }
        if documents.is_empty() && report.skipped > 0 && report.ingested == 0 {
            return Ok(report);
        }
        if documents.is_empty() {
            return Err(FrevaRestError::InvalidInput(
                "no valid metadata found in the input".to_string(),
            ));
        }
        self.update(&Value::Array(documents)).await?;
        if let Err(error) = self.store.upsert_user_meta(&meta_entries).await {
            tracing::warn!("could not mirror user metadata to the document store: {error}");
        }
        Ok(report)
    }

    /// Delete user data matching the given search keys. The request is
    /// rejected when any matched document belongs to somebody else; admins
    /// may act on behalf of another user by passing `user=<name>`
    /// explicitly.
    pub async fn delete_user_data(
        &self,
        username: &str,
        is_admin: bool,
        search_keys: &HashMap<String, String>,
    ) -> Result<u64, FrevaRestError> {
        let mut keys = search_keys.clone();
        let target_user = match keys.remove("user") {
            Some(explicit) if explicit != username => {
                if !is_admin {
                    return Err(FrevaRestError::Forbidden(
                        "only admins may delete data of other users".to_string(),
                    ));
                }
                explicit
            }
            Some(explicit) => explicit,
            None => username.to_string(),
        };

        let mut query_parts = vec!["user:*".to_string()];
        for (key, value) in &keys {
            let key = key.to_lowercase();
            let value = if key == "file" || key == "uri" {
                facet::escape_lucene(value)
            } else {
                facet::escape_lucene(&value.to_lowercase())
            };
            query_parts.push(format!("{key}:{value}"));
        }
        let match_query = query_parts.join(" AND ");

        // Every matched document must belong to the target user; a mixed
        // result set rejects the whole request.
        let params = vec![
            ("q".to_string(), match_query.clone()),
            ("rows".to_string(), "0".to_string()),
            ("wt".to_string(), "json".to_string()),
            ("facet".to_string(), "true".to_string()),
            ("facet.mincount".to_string(), "1".to_string()),
            ("facet.limit".to_string(), "-1".to_string()),
            ("facet.field".to_string(), "user".to_string()),
        ];
        let (_, latest) = self.config.solr_cores();
        let response = self
            .select(&self.config.solr_select_url(latest), &params)
            .await?;
        let matched = response.response.num_found;
        if matched == 0 {
            return Ok(0);
        }
        if let Some(counts) = response.facet_counts {
            if let Some(flat) = counts.facet_fields.get("user") {
                for (owner, _) in parse_facet_counts(flat) {
                    if owner != target_user.to_lowercase() {
                        return Err(FrevaRestError::Forbidden(
                            "matched documents that belong to another user".to_string(),
                        ));
                    }
                }
            }
        }

        let delete_query = format!(
            "{match_query} AND user:{}",
            facet::escape_lucene(&target_user.to_lowercase())
        );
        self.update(&json!({"delete": {"query": delete_query}}))
            .await?;
        keys.insert("user".to_string(), target_user);
        if let Err(error) = self.store.delete_user_meta(&keys).await {
            tracing::warn!("could not remove user metadata from the document store: {error}");
        }
        Ok(matched)
    }
}

/// Parse the index's flat `[value, count, value, count, …]` facet array.
fn parse_facet_counts(flat: &[Value]) -> FacetCounts {
    flat.chunks_exact(2)
        .filter_map(|pair| {
            let value = pair[0].as_str()?.to_string();
            let count = pair[1].as_u64()?;
            Some((value, count))
        })
        .collect()
}

/// Derive the stable 64-bit document id for a user-ingested URI.
fn stable_id(uri: &str) -> i64 {
    let digest = Sha256::digest(uri.as_bytes());
    let mut bytes = [0_u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes).abs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flavour::Translator;

    fn translator() -> Translator {
        Translator::for_builtin(BuiltInFlavour::Freva, true)
    }

    fn pairs(kv: &[(&str, &str)]) -> Vec<(String, String)> {
        kv.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn query_collects_repeated_keys() {
        let query = SearchQuery::parse(
            &translator(),
            UniqKey::File,
            &pairs(&[("variable", "tas"), ("variable", "pr"), ("project", "cmip6")]),
            false,
        )
        .unwrap();
        assert_eq!(
            query.facets,
            vec![
                ("variable".to_string(), vec!["tas".to_string(), "pr".to_string()]),
                ("project".to_string(), vec!["cmip6".to_string()]),
            ]
        );
    }

    #[test]
    fn filter_queries_exclude_user_documents_by_default() {
        let query = SearchQuery::parse(
            &translator(),
            UniqKey::File,
            &pairs(&[("project", "observations")]),
            false,
        )
        .unwrap();
        let filters = query.filter_queries().unwrap();
        assert!(filters.contains(&"{!ex=userTag}-user:*".to_string()));
        assert!(filters.contains(&"project:(observations)".to_string()));
    }

    #[test]
    fn user_flavour_scopes_to_user_documents() {
        let translator = Translator::for_builtin(BuiltInFlavour::User, true);
        let query =
            SearchQuery::parse(&translator, UniqKey::File, &pairs(&[]), false).unwrap();
        assert!(query.filter_queries().unwrap().contains(&"user:*".to_string()));
    }

    #[test]
    fn version_facet_requires_multi_version() {
        let result = SearchQuery::parse(
            &translator(),
            UniqKey::File,
            &pairs(&[("version", "v20190101")]),
            false,
        );
        assert!(result.is_err());
        let result = SearchQuery::parse(
            &translator(),
            UniqKey::File,
            &pairs(&[("version", "v20190101")]),
            true,
        );
        assert!(result.is_ok());
    }

    #[test]
    fn time_and_bbox_become_filters() {
        let query = SearchQuery::parse(
            &translator(),
            UniqKey::Uri,
            &pairs(&[
                ("time", "2000 to 2010"),
                ("time_select", "strict"),
                ("bbox", "-10,-10,10,10"),
            ]),
            false,
        )
        .unwrap();
        let filters = query.filter_queries().unwrap();
        assert!(filters[0].starts_with("{!field f=time op=Within}"));
        assert!(filters[1].starts_with("{!field f=bbox}"));
    }

    #[test]
    fn unknown_facet_is_invalid() {
        let result = SearchQuery::parse(
            &translator(),
            UniqKey::File,
            &pairs(&[("banana", "yellow")]),
            false,
        );
        assert!(matches!(result, Err(FrevaRestError::InvalidInput(_))));
    }

    #[test]
    fn facet_count_array_is_parsed_pairwise() {
        let flat = vec![json!("cpc"), json!(10), json!("era5"), json!(2)];
        assert_eq!(
            parse_facet_counts(&flat),
            vec![("cpc".to_string(), 10), ("era5".to_string(), 2)]
        );
    }

    #[test]
    fn stable_ids_are_deterministic() {
        assert_eq!(stable_id("/arch/a.nc"), stable_id("/arch/a.nc"));
        assert_ne!(stable_id("/arch/a.nc"), stable_id("/arch/b.nc"));
        assert!(stable_id("/arch/a.nc") >= 0);
    }

    #[test]
    fn doc_fields_flatten_multi_values() {
        let mut doc = Map::new();
        doc.insert("file".to_string(), json!(["/a.nc", "/b.nc"]));
        doc.insert("uri".to_string(), json!("slk:///a.nc"));
        doc.insert("id".to_string(), json!(42));
        assert_eq!(doc_field_str(&doc, "file").unwrap(), "/a.nc");
        assert_eq!(doc_field_str(&doc, "uri").unwrap(), "slk:///a.nc");
        assert_eq!(doc_field_str(&doc, "id").unwrap(), "42");
        assert!(doc_field_str(&doc, "missing").is_none());
    }
}
