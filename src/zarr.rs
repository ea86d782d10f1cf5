//! Zarr streaming broker.
//!
//! Turns conversion requests into stable, token-addressed Zarr URLs. A
//! request derives a deterministic UUIDv5 token, writes a status record into
//! the cache (set-if-not-exists, so identical requests collapse onto one
//! job) and publishes the job onto the worker channel. The data-loading
//! worker writes consolidated metadata and chunk bytes back into the cache
//! under the token key; this module serves them to clients.

use crate::cache::CacheBroker;
use crate::config::DATA_PORTAL_CHANNEL;
use crate::error::FrevaRestError;

use std::collections::BTreeMap;
use std::time::Duration;

use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use uuid::Uuid;
use validator::Validate;

/// Namespace GUID of this service, XOR-ed with the principal's subject to
/// give per-user token namespaces.
const SERVICE_GUID: Uuid = Uuid::from_bytes([
    0x6b, 0xa7, 0xb8, 0x14, 0x9d, 0xad, 0x11, 0xd1, 0x80, 0xb4, 0x00, 0xc0, 0x4f, 0xd4, 0x30,
    0xc8,
]);

/// Default job TTL of one day.
pub const DEFAULT_TTL_SECONDS: u64 = 86_400;

/// Interval between cache polls while waiting for the worker.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Zarr v2 store keys with special meaning.
pub const ZMETADATA_JSON: &str = ".zmetadata";
pub const ZGROUP_JSON: &str = ".zgroup";
pub const ZATTRS_JSON: &str = ".zattrs";
pub const ZARRAY_JSON: &str = ".zarray";
const ZARR_V3_JSON: &str = "zarr.json";

/// Lifecycle states of a conversion job.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum JobStatus {
    Queued,
    Running,
    Ready,
    Failed,
}

impl JobStatus {
    pub fn code(&self) -> u8 {
        match self {
            JobStatus::Queued => 1,
            JobStatus::Running => 2,
            JobStatus::Ready => 3,
            JobStatus::Failed => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(JobStatus::Queued),
            2 => Some(JobStatus::Running),
            3 => Some(JobStatus::Ready),
            4 => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

/// The status record stored under `zarr:<token>:status`. The worker mutates
/// `status`/`reason` via compare-and-swap; everything else is written once
/// at submission time.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ZarrJob {
    pub status: u8,
    pub reason: String,
    pub owner: String,
    pub created_at: i64,
    pub expiry: i64,
    pub paths: Vec<String>,
    pub options: BTreeMap<String, String>,
    pub public: bool,
}

impl ZarrJob {
    pub fn is_expired(&self) -> bool {
        self.expiry <= Utc::now().timestamp()
    }
}

/// Cache key of a job's status record.
pub fn status_key(token: &str) -> String {
    format!("zarr:{token}:status")
}

/// Cache key of one metadata or chunk blob.
pub fn blob_key(token: &str, key: &str) -> String {
    format!("zarr:{token}:blob:{key}")
}

/// How the worker combines multiple input paths.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateMode {
    Auto,
    Merge,
    Concat,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinMethod {
    Outer,
    Inner,
    Left,
    Right,
    Exact,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompatMode {
    Equals,
    NoConflicts,
    Override,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CombineVars {
    Minimal,
    Different,
    All,
}

/// One or many input paths.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum PathArg {
    One(String),
    Many(Vec<String>),
}

impl PathArg {
    pub fn into_paths(self) -> Vec<String> {
        match self {
            PathArg::One(path) => vec![path],
            PathArg::Many(paths) => paths,
        }
    }
}

/// Body of a conversion request.
#[derive(Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ConvertRequest {
    pub path: PathArg,
    #[serde(default)]
    pub aggregate: Option<AggregateMode>,
    #[serde(default)]
    pub join: Option<JoinMethod>,
    #[serde(default)]
    pub compat: Option<CompatMode>,
    #[serde(default)]
    pub data_vars: Option<CombineVars>,
    #[serde(default)]
    pub coords: Option<CombineVars>,
    #[serde(default)]
    pub dim: Option<String>,
    #[serde(default)]
    pub group_by: Option<String>,
    #[serde(default)]
    pub public: bool,
    #[serde(default = "default_ttl")]
    #[validate(range(min = 60, message = "ttl_seconds must be at least one minute"))]
    pub ttl_seconds: u64,
}

fn default_ttl() -> u64 {
    DEFAULT_TTL_SECONDS
}

impl ConvertRequest {
    /// The enumerable options, rendered into the deterministic map that
    /// feeds token derivation and the worker message.
    pub fn options(&self) -> Result<BTreeMap<String, String>, FrevaRestError> {
        fn render<T: Serialize>(value: &T) -> String {
            serde_json::to_value(value)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default()
        }
        let mut options = BTreeMap::new();
        if let Some(aggregate) = &self.aggregate {
            options.insert("aggregate".to_string(), render(aggregate));
        }
        if let Some(join) = &self.join {
            options.insert("join".to_string(), render(join));
        }
        if let Some(compat) = &self.compat {
            options.insert("compat".to_string(), render(compat));
        }
        if let Some(data_vars) = &self.data_vars {
            options.insert("data_vars".to_string(), render(data_vars));
        }
        if let Some(coords) = &self.coords {
            options.insert("coords".to_string(), render(coords));
        }
        if let Some(dim) = &self.dim {
            options.insert("dim".to_string(), dim.clone());
        }
        if let Some(group_by) = &self.group_by {
            options.insert("group_by".to_string(), group_by.clone());
        }
        if self.aggregate.is_none() && options.keys().any(|k| k != "group_by") {
            return Err(FrevaRestError::InvalidInput(
                "join, compat, data_vars, coords and dim require aggregate".to_string(),
            ));
        }
        Ok(options)
    }
}

/// The token namespace of one principal: the service GUID XOR-ed with the
/// hashed subject.
fn user_namespace(sub: &str) -> Uuid {
    let digest = Sha256::digest(sub.as_bytes());
    let mut bytes = *SERVICE_GUID.as_bytes();
    for (slot, byte) in bytes.iter_mut().zip(digest.iter()) {
        *slot ^= byte;
    }
    Uuid::from_bytes(bytes)
}

/// Derive the deterministic conversion token: identical `(principal,
/// paths, options)` always collapse onto the same token.
pub fn derive_token(sub: &str, paths: &[String], options: &BTreeMap<String, String>) -> String {
    let canonical = serde_json::to_string(&json!({
        "paths": paths,
        "options": options,
    }))
    .expect("paths and options serialise to JSON");
    Uuid::new_v5(&user_namespace(sub), canonical.as_bytes()).to_string()
}

/// Submit one conversion job: write the status record (once) and publish
/// the request to the worker. Returns the public URL of the Zarr store.
pub async fn submit_conversion(
    cache: &CacheBroker,
    proxy: &str,
    owner_sub: &str,
    owner_name: &str,
    mut paths: Vec<String>,
    options: BTreeMap<String, String>,
    ttl_seconds: u64,
    public: bool,
) -> Result<String, FrevaRestError> {
    for path in paths.iter_mut() {
        if let Some(stripped) = path.strip_prefix("file://") {
            *path = stripped.to_string();
        }
    }
    paths.sort();
    let token = derive_token(owner_sub, &paths, &options);
    let now = Utc::now().timestamp();
    let job = ZarrJob {
        status: JobStatus::Queued.code(),
        reason: "submitted".to_string(),
        owner: owner_name.to_string(),
        created_at: now,
        expiry: now + ttl_seconds as i64,
        paths: paths.clone(),
        options: options.clone(),
        public,
    };
    let record = serde_json::to_vec(&job)
        .map_err(|error| FrevaRestError::Internal(format!("could not encode job: {error}")))?;
    let created = cache
        .set_if_absent(&status_key(&token), &record, ttl_seconds)
        .await?;

    let message = serde_json::to_vec(&json!({
        "token": &token,
        "paths": &paths,
        "options": &options,
    }))
    .expect("the worker message serialises to JSON");
    if let Err(error) = cache.publish(DATA_PORTAL_CHANNEL, &message).await {
        if created {
            // Roll back our own record, but never a concurrent writer's.
            let _ = cache.delete_if_equals(&status_key(&token), &record).await;
        }
        tracing::error!("could not publish conversion request: {error}");
        return Err(FrevaRestError::BackendUnavailable(
            "broker unavailable".to_string(),
        ));
    }
    Ok(format!(
        "{proxy}/api/freva-nextgen/data-portal/zarr/{token}.zarr"
    ))
}

/// Read a job's status record.
pub async fn load_job(
    cache: &CacheBroker,
    token: &str,
) -> Result<Option<ZarrJob>, FrevaRestError> {
    match cache.get(&status_key(token)).await? {
        Some(bytes) => {
            let job = serde_json::from_slice(&bytes).map_err(|error| {
                FrevaRestError::Internal(format!("corrupt job record for {token}: {error}"))
            })?;
            Ok(Some(job))
        }
        None => Ok(None),
    }
}

/// Strip the `.zarr` suffix from a store path segment.
pub fn token_from_store(store: &str) -> Result<&str, FrevaRestError> {
    store.strip_suffix(".zarr").ok_or_else(|| {
        FrevaRestError::InvalidInput(format!("not a zarr store: {store}"))
    })
}

/// What one store key refers to.
#[derive(Debug, Eq, PartialEq)]
pub enum KeyKind {
    /// Root or variable level JSON metadata.
    Metadata,
    /// Raw chunk bytes.
    Chunk,
}

/// Classify a slash-separated store key, rejecting malformed shapes.
pub fn classify_key(key: &str) -> Result<KeyKind, FrevaRestError> {
    let key = key.trim_start_matches('/');
    if key == ZARR_V3_JSON {
        return Err(FrevaRestError::NotFound("Zarr v3 not supported".to_string()));
    }
    if key == ZMETADATA_JSON || key == ZGROUP_JSON || key == ZATTRS_JSON {
        return Ok(KeyKind::Metadata);
    }
    if key == ZARRAY_JSON {
        // A variable path must precede `.zarray`.
        return Err(FrevaRestError::InvalidInput(
            "a group or variable name must precede .zarray".to_string(),
        ));
    }
    if !key.contains('/') {
        return Err(FrevaRestError::InvalidInput(format!(
            "invalid zarr key, expected a slash-separated variable/chunk path: {key}"
        )));
    }
    let (_, leaf) = key.rsplit_once('/').expect("key contains a slash");
    if leaf == ZARRAY_JSON || leaf == ZATTRS_JSON || leaf == ZGROUP_JSON {
        Ok(KeyKind::Metadata)
    } else {
        Ok(KeyKind::Chunk)
    }
}

/// Serve one store key from the cache. On a miss the worker is nudged with
/// a chunk request and the cache is polled until `timeout` seconds have
/// passed.
pub async fn serve_key(
    cache: &CacheBroker,
    token: &str,
    key: &str,
    timeout: u64,
) -> Result<Response, FrevaRestError> {
    let kind = classify_key(key)?;
    let key = key.trim_start_matches('/');
    let cache_key = blob_key(token, key);

    let mut blob = cache.get(&cache_key).await?;
    if blob.is_none() {
        // Nudge the worker; chunks may be evicted and re-created on demand.
        let message = serde_json::to_vec(&json!({"token": token, "chunk": key}))
            .expect("the chunk request serialises to JSON");
        let _ = cache.publish(DATA_PORTAL_CHANNEL, &message).await;
        let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout);
        while tokio::time::Instant::now() < deadline {
            tokio::time::sleep(POLL_INTERVAL).await;
            blob = cache.get(&cache_key).await?;
            if blob.is_some() {
                break;
            }
        }
    }
    let blob = blob.ok_or_else(|| {
        FrevaRestError::NotFound(format!("no such key in store {token}.zarr: {key}"))
    })?;
    let content_type = match kind {
        KeyKind::Metadata => mime::APPLICATION_JSON.as_ref(),
        KeyKind::Chunk => mime::APPLICATION_OCTET_STREAM.as_ref(),
    };
    Ok(([(CONTENT_TYPE, content_type)], blob).into_response())
}

/// Whether a request may read a store: any valid bearer, or a public,
/// unexpired job.
pub async fn authorise_store_access(
    cache: &CacheBroker,
    token: &str,
    authenticated: bool,
) -> Result<(), FrevaRestError> {
    if authenticated {
        return Ok(());
    }
    match load_job(cache, token).await? {
        Some(job) if job.public && !job.is_expired() => Ok(()),
        _ => Err(FrevaRestError::Unauthenticated(
            "authorization header is required".to_string(),
        )),
    }
}

/// A small HTML page embedding the consolidated metadata for interactive
/// exploration; rendering happens client-side.
pub fn render_html_preview(token: &str, metadata: &serde_json::Value) -> String {
    let rendered = serde_json::to_string_pretty(metadata).unwrap_or_else(|_| "{}".to_string());
    format!(
        "<!DOCTYPE html>\n<html>\n<head><title>{token}.zarr</title></head>\n\
         <body>\n<h1>{token}.zarr</h1>\n\
         <pre id=\"zarr-metadata\">{}</pre>\n\
         </body>\n</html>\n",
        html_escape(&rendered)
    )
}

fn html_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn identical_requests_derive_identical_tokens() {
        let paths = vec!["/a.nc".to_string(), "/b.nc".to_string()];
        let opts = options(&[("aggregate", "concat"), ("dim", "time")]);
        let first = derive_token("sub-1", &paths, &opts);
        let second = derive_token("sub-1", &paths, &opts);
        assert_eq!(first, second);
        // Different principal, different namespace.
        assert_ne!(first, derive_token("sub-2", &paths, &opts));
        // Different options, different token.
        assert_ne!(first, derive_token("sub-1", &paths, &options(&[])));
        // Tokens are valid UUIDs.
        assert!(Uuid::parse_str(&first).is_ok());
    }

    #[test]
    fn aggregate_options_require_aggregate() {
        let request: ConvertRequest = serde_json::from_str(
            r#"{"path": "/a.nc", "join": "outer"}"#,
        )
        .unwrap();
        assert!(request.options().is_err());
        let request: ConvertRequest = serde_json::from_str(
            r#"{"path": ["/a.nc", "/b.nc"], "aggregate": "concat", "join": "outer", "compat": "no_conflicts"}"#,
        )
        .unwrap();
        let opts = request.options().unwrap();
        assert_eq!(opts["aggregate"], "concat");
        assert_eq!(opts["join"], "outer");
        assert_eq!(opts["compat"], "no_conflicts");
    }

    #[test]
    fn path_accepts_one_or_many() {
        let request: ConvertRequest = serde_json::from_str(r#"{"path": "/a.nc"}"#).unwrap();
        assert_eq!(request.path.clone().into_paths(), vec!["/a.nc"]);
        assert_eq!(request.ttl_seconds, DEFAULT_TTL_SECONDS);
        let request: ConvertRequest =
            serde_json::from_str(r#"{"path": ["/a.nc", "/b.nc"]}"#).unwrap();
        assert_eq!(request.path.into_paths().len(), 2);
    }

    #[test]
    fn unknown_body_fields_are_rejected() {
        let result =
            serde_json::from_str::<ConvertRequest>(r#"{"path": "/a.nc", "banana": true}"#);
        assert!(result.is_err());
    }

    // The following tests use serde_test to validate the correct function
    // of the option deserialisers.

    #[test]
    fn test_join_method_tokens() {
        use serde_test::{assert_de_tokens, assert_de_tokens_error, Token};
        assert_de_tokens(
            &JoinMethod::Outer,
            &[Token::Enum { name: "JoinMethod" }, Token::Str("outer"), Token::Unit],
        );
        assert_de_tokens_error::<JoinMethod>(
            &[Token::Enum { name: "JoinMethod" }, Token::Str("sideways"), Token::Unit],
            "unknown variant `sideways`, expected one of `outer`, `inner`, `left`, `right`, `exact`",
        );
    }

    #[test]
    fn test_compat_mode_tokens() {
        use serde_test::{assert_de_tokens, Token};
        assert_de_tokens(
            &CompatMode::NoConflicts,
            &[
                Token::Enum { name: "CompatMode" },
                Token::Str("no_conflicts"),
                Token::Unit,
            ],
        );
    }

    #[test]
    fn key_classification() {
        assert_eq!(classify_key(".zmetadata").unwrap(), KeyKind::Metadata);
        assert_eq!(classify_key(".zgroup").unwrap(), KeyKind::Metadata);
        assert_eq!(classify_key("tas/.zarray").unwrap(), KeyKind::Metadata);
        assert_eq!(classify_key("tas/.zattrs").unwrap(), KeyKind::Metadata);
        assert_eq!(classify_key("tas/0.0.0").unwrap(), KeyKind::Chunk);
        assert_eq!(classify_key("group0/tas/1.2").unwrap(), KeyKind::Chunk);
        assert!(matches!(
            classify_key(".zarray"),
            Err(FrevaRestError::InvalidInput(_))
        ));
        assert!(matches!(
            classify_key("0.0.0"),
            Err(FrevaRestError::InvalidInput(_))
        ));
        assert!(matches!(
            classify_key("zarr.json"),
            Err(FrevaRestError::NotFound(_))
        ));
    }

    #[test]
    fn store_suffix_is_mandatory() {
        assert_eq!(token_from_store("abc.zarr").unwrap(), "abc");
        assert!(token_from_store("abc").is_err());
    }

    #[test]
    fn job_records_round_trip() {
        let job = ZarrJob {
            status: JobStatus::Queued.code(),
            reason: "submitted".to_string(),
            owner: "janedoe".to_string(),
            created_at: 1000,
            expiry: 2000,
            paths: vec!["/a.nc".to_string()],
            options: BTreeMap::new(),
            public: false,
        };
        let bytes = serde_json::to_vec(&job).unwrap();
        let back: ZarrJob = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(job, back);
        assert_eq!(JobStatus::from_code(back.status), Some(JobStatus::Queued));
    }

    #[test]
    fn status_codes_are_stable() {
        assert_eq!(JobStatus::Queued.code(), 1);
        assert_eq!(JobStatus::Running.code(), 2);
        assert_eq!(JobStatus::Ready.code(), 3);
        assert_eq!(JobStatus::Failed.code(), 4);
        assert_eq!(JobStatus::from_code(9), None);
    }

    #[test]
    fn html_preview_escapes_metadata() {
        let preview = render_html_preview("abc", &json!({"note": "<b>x</b>"}));
        assert!(preview.contains("abc.zarr"));
        assert!(preview.contains("&lt;b&gt;x&lt;/b&gt;"));
    }
}
