//! The data-portal HTTP surface.
//!
//! Routes conversion requests into the Zarr broker, answers status polls,
//! serves store keys and issues/verifies the pre-signed share URLs.

use crate::app_state::SharedAppState;
use crate::auth::{OptionalPrincipal, Principal};
use crate::error::FrevaRestError;
use crate::share::{self, ShareRequest};
use crate::validated_json::ValidatedJson;
use crate::zarr::{self, ConvertRequest, JobStatus};

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, Json, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use serde_json::{json, Value};
use validator::Validate;

/// Response of a conversion request: one URL per future Zarr store.
async fn run_convert(
    state: &SharedAppState,
    principal: &Principal,
    request: ConvertRequest,
) -> Result<Json<Value>, FrevaRestError> {
    let cache = state.cache()?;
    let options = request.options()?;
    let paths = request.path.clone().into_paths();
    if paths.is_empty() {
        return Err(FrevaRestError::InvalidInput(
            "at least one path is required".to_string(),
        ));
    }
    let mut urls = Vec::new();
    if request.aggregate.is_some() {
        // Aggregated requests collapse onto one token over the sorted
        // path set.
        urls.push(
            zarr::submit_conversion(
                cache,
                &state.config.proxy,
                &principal.sub,
                &principal.username,
                paths,
                options,
                request.ttl_seconds,
                request.public,
            )
            .await?,
        );
    } else {
        for path in paths {
            urls.push(
                zarr::submit_conversion(
                    cache,
                    &state.config.proxy,
                    &principal.sub,
                    &principal.username,
                    vec![path],
                    options.clone(),
                    request.ttl_seconds,
                    request.public,
                )
                .await?,
            );
        }
    }
    Ok(Json(json!({ "urls": urls })))
}

/// Request asynchronous Zarr conversion (POST).
async fn convert(
    State(state): State<SharedAppState>,
    principal: Principal,
    ValidatedJson(request): ValidatedJson<ConvertRequest>,
) -> Result<Json<Value>, FrevaRestError> {
    run_convert(&state, &principal, request).await
}

/// GET alias of [convert] with identical semantics; paths and options come
/// from the query string.
async fn convert_get(
    State(state): State<SharedAppState>,
    principal: Principal,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Json<Value>, FrevaRestError> {
    let mut body = serde_json::Map::new();
    let mut paths = Vec::new();
    for (key, value) in pairs {
        match key.as_str() {
            "path" => paths.push(Value::String(value)),
            "public" => {
                body.insert(key, json!(matches!(value.as_str(), "true" | "1" | "")));
            }
            "ttl_seconds" => {
                let ttl: u64 = value.parse().map_err(|_| {
                    FrevaRestError::InvalidInput(format!("ttl_seconds is not a number: {value}"))
                })?;
                body.insert(key, json!(ttl));
            }
            _ => {
                body.insert(key, Value::String(value));
            }
        }
    }
    body.insert("path".to_string(), Value::Array(paths));
    let request: ConvertRequest = serde_json::from_value(Value::Object(body))
        .map_err(|error| FrevaRestError::InvalidInput(error.to_string()))?;
    request.validate()?;
    run_convert(&state, &principal, request).await
}

#[derive(Debug, Deserialize)]
struct StatusParams {
    token: String,
}

/// Check the status of a conversion job.
async fn status(
    State(state): State<SharedAppState>,
    Query(params): Query<StatusParams>,
    principal: OptionalPrincipal,
) -> Result<Json<Value>, FrevaRestError> {
    let cache = state.cache()?;
    zarr::authorise_store_access(cache, &params.token, principal.0.is_some()).await?;
    let job = zarr::load_job(cache, &params.token)
        .await?
        .ok_or_else(|| {
            FrevaRestError::NotFound(format!("unknown token: {}", params.token))
        })?;
    Ok(Json(json!({
        "status": job.status,
        "reason": job.reason,
    })))
}

#[derive(Debug, Deserialize)]
struct ChunkParams {
    #[serde(default = "default_timeout")]
    timeout: u64,
}

fn default_timeout() -> u64 {
    1
}

/// Serve one Zarr store key.
async fn zarr_key(
    State(state): State<SharedAppState>,
    Path((store, key)): Path<(String, String)>,
    Query(params): Query<ChunkParams>,
    principal: OptionalPrincipal,
) -> Result<Response, FrevaRestError> {
    let cache = state.cache()?;
    let token = zarr::token_from_store(&store)?;
    zarr::authorise_store_access(cache, token, principal.0.is_some()).await?;
    zarr::serve_key(cache, token, &key, params.timeout).await
}

#[derive(Debug, Deserialize)]
struct ShareQueryParams {
    expires: i64,
    #[serde(default = "default_timeout")]
    timeout: u64,
}

/// A bare GET on a share URL: verify the grant and report the job status.
async fn shared_store_root(
    State(state): State<SharedAppState>,
    Path((sig, store)): Path<(String, String)>,
    Query(params): Query<ShareQueryParams>,
) -> Result<Json<Value>, FrevaRestError> {
    let cache = state.cache()?;
    let token = zarr::token_from_store(&store)?;
    share::verify_share(
        &state.config.redis_password,
        "GET",
        token,
        params.expires,
        &sig,
    )?;
    let job = zarr::load_job(cache, token)
        .await?
        .ok_or_else(|| FrevaRestError::NotFound(format!("unknown token: {token}")))?;
    Ok(Json(json!({
        "status": job.status,
        "reason": job.reason,
    })))
}

/// Serve one Zarr store key through a share grant; no Authorization header
/// is required, the signature authorises the request.
async fn shared_zarr_key(
    State(state): State<SharedAppState>,
    Path((sig, store, key)): Path<(String, String, String)>,
    Query(params): Query<ShareQueryParams>,
) -> Result<Response, FrevaRestError> {
    let cache = state.cache()?;
    let token = zarr::token_from_store(&store)?;
    share::verify_share(
        &state.config.redis_password,
        "GET",
        token,
        params.expires,
        &sig,
    )?;
    zarr::serve_key(cache, token, &key, params.timeout).await
}

/// Create a pre-signed share URL for an existing Zarr store.
async fn share_zarr(
    State(state): State<SharedAppState>,
    principal: Principal,
    ValidatedJson(request): ValidatedJson<ShareRequest>,
) -> Result<(StatusCode, Json<Value>), FrevaRestError> {
    let cache = state.cache()?;
    let token = share::token_from_path(&request.path)?;
    let job = zarr::load_job(cache, &token).await?.ok_or_else(|| {
        FrevaRestError::NotFound(format!("unknown token: {token}"))
    })?;
    if job.owner != principal.username && !principal.is_admin {
        return Err(FrevaRestError::Forbidden(
            "only the owner may share this store".to_string(),
        ));
    }
    let grant = share::issue_grant(
        &state.config.redis_password,
        &state.config.proxy,
        &token,
        request.ttl_seconds,
    );
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "url": grant.url,
            "sig": grant.sig,
            "token": grant.token,
            "expires": grant.expires,
            "method": grant.method,
        })),
    ))
}

#[derive(Debug, Deserialize)]
struct HtmlParams {
    token: String,
    #[serde(default = "default_timeout")]
    timeout: u64,
}

/// Human-readable HTML summary of a converted dataset.
async fn zarr_html(
    State(state): State<SharedAppState>,
    Query(params): Query<HtmlParams>,
    _principal: Principal,
) -> Result<Html<String>, FrevaRestError> {
    let cache = state.cache()?;
    let job = zarr::load_job(cache, &params.token)
        .await?
        .ok_or_else(|| {
            FrevaRestError::NotFound(format!("unknown token: {}", params.token))
        })?;
    if JobStatus::from_code(job.status) == Some(JobStatus::Failed) {
        return Err(FrevaRestError::Internal(job.reason));
    }
    let response = zarr::serve_key(cache, &params.token, zarr::ZMETADATA_JSON, params.timeout).await?;
    let body = hyper::body::to_bytes(response.into_body())
        .await
        .map_err(|error| FrevaRestError::Internal(error.to_string()))?;
    let metadata: Value = serde_json::from_slice(&body)
        .map_err(|error| FrevaRestError::Internal(format!("corrupt metadata: {error}")))?;
    Ok(Html(zarr::render_html_preview(&params.token, &metadata)))
}

/// The `/data-portal/*` routes.
pub fn router() -> Router<SharedAppState> {
    Router::new()
        .route(
            "/api/freva-nextgen/data-portal/zarr/convert",
            get(convert_get).post(convert),
        )
        .route(
            "/api/freva-nextgen/data-portal/zarr-utils/status",
            get(status),
        )
        .route(
            "/api/freva-nextgen/data-portal/zarr-utils/html",
            get(zarr_html),
        )
        .route(
            "/api/freva-nextgen/data-portal/zarr/:store/*key",
            get(zarr_key),
        )
        .route(
            "/api/freva-nextgen/data-portal/zarr/share-zarr",
            axum::routing::post(share_zarr),
        )
        .route(
            "/api/freva-nextgen/data-portal/share/:sig/:store",
            get(shared_store_root),
        )
        .route(
            "/api/freva-nextgen/data-portal/share/:sig/:store/*key",
            get(shared_zarr_key),
        )
}
