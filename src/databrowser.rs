//! The databrowser HTTP surface.
//!
//! Maps the `/databrowser/*` routes onto the flavour registry and the
//! search adapter, manages the streaming response lifecycles, translates
//! errors into HTTP statuses and records statistics off the critical path.

use crate::app_state::SharedAppState;
use crate::auth::{OptionalPrincipal, Principal};
use crate::error::FrevaRestError;
use crate::flavour::{search_facets, BuiltInFlavour, FlavourDefinition, Translator};
use crate::intake;
use crate::solr::{SearchQuery, UniqKey};
use crate::stats::StatsRecord;
use crate::validated_json::ValidatedJson;

use std::collections::HashMap;
use std::time::Instant;

use axum::body::StreamBody;
use axum::extract::{Path, Query, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use validator::Validate;

/// Largest page a streaming request may ask for.
const STREAM_BATCH_LIMIT: usize = 10_000;

/// Largest page for non-streaming requests.
const PAGE_BATCH_LIMIT: usize = 1_000;

/// The non-facet request options shared by the search routes.
struct SearchParams {
    start: usize,
    batch_size: Option<usize>,
    multi_version: bool,
    translate: bool,
    ndjson: bool,
    extended: bool,
    detail: bool,
    facet_filter: Vec<String>,
    facet_pairs: Vec<(String, String)>,
}

fn parse_bool(value: &str) -> bool {
    matches!(value, "true" | "True" | "1" | "")
}

impl SearchParams {
    fn parse(pairs: Vec<(String, String)>) -> Result<Self, FrevaRestError> {
        let mut params = Self {
            start: 0,
            batch_size: None,
            multi_version: false,
            translate: true,
            ndjson: false,
            extended: false,
            detail: false,
            facet_filter: Vec::new(),
            facet_pairs: Vec::new(),
        };
        for (key, value) in pairs {
            match key.as_str() {
                "start" => {
                    params.start = value.parse().map_err(|_| {
                        FrevaRestError::InvalidInput(format!("start is not a number: {value}"))
                    })?;
                }
                "max-results" | "batch-size" => {
                    let size: usize = value.parse().map_err(|_| {
                        FrevaRestError::InvalidInput(format!(
                            "batch size is not a number: {value}"
                        ))
                    })?;
                    params.batch_size = Some(size);
                }
                "multi-version" | "multi_version" => params.multi_version = parse_bool(&value),
                "translate" => params.translate = parse_bool(&value),
                "extended" => params.extended = parse_bool(&value),
                "detail" => params.detail = parse_bool(&value),
                "--json" => params.ndjson = true,
                "facets" => params.facet_filter.push(value),
                _ => params.facet_pairs.push((key, value)),
            }
        }
        Ok(params)
    }
}

/// Resolve the path flavour and build the canonical search query.
async fn resolve_query(
    state: &SharedAppState,
    flavour: &str,
    uniq_key: &str,
    params: &SearchParams,
    principal: Option<&Principal>,
) -> Result<(Translator, SearchQuery), FrevaRestError> {
    let translator = state
        .flavours
        .resolve(
            flavour,
            principal.map(|p| p.username.as_str()),
            params.translate,
        )
        .await?;
    let query = SearchQuery::parse(
        &translator,
        UniqKey::from_param(uniq_key)?,
        &params.facet_pairs,
        params.multi_version,
    )?;
    Ok((translator, query))
}

fn record_stats(
    state: &SharedAppState,
    route: &str,
    principal: Option<&Principal>,
    translator: &Translator,
    query: &SearchQuery,
    result_count: i64,
    started: Instant,
    status: u16,
) {
    state.stats.record(StatsRecord::now(
        route,
        principal.map(|p| p.username.clone()),
        translator.flavour.name(),
        query.facets_for_stats(),
        result_count,
        started.elapsed().as_millis() as u64,
        status,
    ));
}

/// Get all available search flavours and their attributes.
async fn overview(
    State(state): State<SharedAppState>,
    principal: OptionalPrincipal,
) -> Result<Json<Value>, FrevaRestError> {
    let mut flavours: Vec<String> = BuiltInFlavour::ALL
        .iter()
        .map(|f| f.as_str().to_string())
        .collect();
    let mut attributes = serde_json::Map::new();
    for builtin in BuiltInFlavour::ALL {
        let translator = Translator::for_builtin(builtin, true);
        let facets: Vec<String> = search_facets()
            .iter()
            .map(|field| translator.facet_out(field))
            .collect();
        attributes.insert(builtin.as_str().to_string(), json!(facets));
    }
    let username = principal.0.as_ref().map(|p| p.username.as_str());
    for record in state.flavours.list(username).await? {
        let translator = Translator::new(
            crate::flavour::Flavour::User {
                owner: record.owner.clone(),
                name: record.name.clone(),
            },
            &record.mapping,
            true,
        );
        let facets: Vec<String> = search_facets()
            .iter()
            .map(|field| translator.facet_out(field))
            .collect();
        attributes.insert(record.name.clone(), json!(facets));
        flavours.push(record.name);
    }
    Ok(Json(json!({
        "flavours": flavours,
        "attributes": attributes,
    })))
}

/// Search for datasets, streaming one location per line.
async fn data_search(
    State(state): State<SharedAppState>,
    Path((flavour, uniq_key)): Path<(String, String)>,
    Query(pairs): Query<Vec<(String, String)>>,
    principal: OptionalPrincipal,
) -> Result<Response, FrevaRestError> {
    let started = Instant::now();
    let params = SearchParams::parse(pairs)?;
    if let Some(size) = params.batch_size {
        if size > STREAM_BATCH_LIMIT {
            return Err(FrevaRestError::InvalidInput(format!(
                "batch size must not exceed {STREAM_BATCH_LIMIT}"
            )));
        }
    }
    let (translator, query) =
        resolve_query(&state, &flavour, &uniq_key, &params, principal.0.as_ref()).await?;

    let total = state.solr.count_results(&query).await?;
    record_stats(
        &state,
        "databrowser/data-search",
        principal.0.as_ref(),
        &translator,
        &query,
        total as i64,
        started,
        StatusCode::OK.as_u16(),
    );

    let ndjson = params.ndjson;
    let uniq = query.uniq_key.as_str().to_string();
    let keys = state
        .solr
        .stream_uniq_keys(&query, params.start, params.batch_size)?;
    // Backend errors discovered mid-stream are logged and close the
    // connection; clients detect the truncation from the missing
    // Content-Length.
    let body = keys.scan(false, move |errored, item| {
        futures::future::ready(if *errored {
            None
        } else {
            match item {
                Ok(location) => {
                    let line = if ndjson {
                        let mut object = serde_json::Map::new();
                        object.insert(uniq.clone(), json!(location));
                        format!("{}\n", Value::Object(object))
                    } else {
                        format!("{location}\n")
                    };
                    Some(Ok::<Bytes, std::convert::Infallible>(Bytes::from(line)))
                }
                Err(error) => {
                    tracing::error!("search stream aborted: {error}");
                    *errored = true;
                    None
                }
            }
        })
    });
    let content_type = if params.ndjson {
        "application/x-ndjson"
    } else {
        "text/plain; charset=utf-8"
    };
    Ok((
        StatusCode::OK,
        [(CONTENT_TYPE, content_type)],
        StreamBody::new(body),
    )
        .into_response())
}

/// Query the available metadata (facet values and counts).
async fn metadata_search(
    State(state): State<SharedAppState>,
    Path((flavour, uniq_key)): Path<(String, String)>,
    Query(pairs): Query<Vec<(String, String)>>,
    principal: OptionalPrincipal,
) -> Result<Json<Value>, FrevaRestError> {
    let started = Instant::now();
    let params = SearchParams::parse(pairs)?;
    let (translator, query) =
        resolve_query(&state, &flavour, &uniq_key, &params, principal.0.as_ref()).await?;

    let fields = facet_fields(&translator, &params)?;
    let (result, _) = state.solr.facet_counts(&query, &fields, 0).await?;
    record_stats(
        &state,
        "databrowser/metadata-search",
        principal.0.as_ref(),
        &translator,
        &query,
        result.total_count as i64,
        started,
        StatusCode::OK.as_u16(),
    );

    let mut facets = serde_json::Map::new();
    let mut facet_mapping = serde_json::Map::new();
    for (field, counts) in &result.facets {
        let name = translator.facet_out(field);
        let interleaved: Vec<Value> = counts
            .iter()
            .flat_map(|(value, count)| [json!(value), json!(count)])
            .collect();
        facet_mapping.insert(field.clone(), json!(name));
        facets.insert(name, json!(interleaved));
    }
    Ok(Json(json!({
        "total_count": result.total_count,
        "facets": facets,
        "facet_mapping": facet_mapping,
        "primary_facets": translator.primary_facets(),
    })))
}

/// The canonical facet fields a metadata search reports.
fn facet_fields(
    translator: &Translator,
    params: &SearchParams,
) -> Result<Vec<String>, FrevaRestError> {
    if !params.facet_filter.is_empty() {
        let pairs: Vec<(String, Vec<String>)> = params
            .facet_filter
            .iter()
            .filter(|f| f.as_str() != "*" && f.as_str() != "all")
            .map(|f| (f.clone(), Vec::new()))
            .collect();
        if !pairs.is_empty() {
            return Ok(translator
                .translate_in(&pairs)?
                .into_iter()
                .map(|(field, _)| field)
                .collect());
        }
    }
    let fields = if params.extended {
        search_facets()
    } else {
        crate::flavour::PRIMARY_FACETS.to_vec()
    };
    Ok(fields.iter().map(|f| f.to_string()).collect())
}

/// Count matching documents, optionally per facet value.
async fn count(
    State(state): State<SharedAppState>,
    Path((flavour, uniq_key)): Path<(String, String)>,
    Query(pairs): Query<Vec<(String, String)>>,
    principal: OptionalPrincipal,
) -> Result<Json<Value>, FrevaRestError> {
    let started = Instant::now();
    let params = SearchParams::parse(pairs)?;
    let (translator, query) =
        resolve_query(&state, &flavour, &uniq_key, &params, principal.0.as_ref()).await?;

    let response = if params.detail {
        let fields = facet_fields(&translator, &params)?;
        let (result, _) = state.solr.facet_counts(&query, &fields, 0).await?;
        record_stats(
            &state,
            "databrowser/count",
            principal.0.as_ref(),
            &translator,
            &query,
            result.total_count as i64,
            started,
            StatusCode::OK.as_u16(),
        );
        let mut detail = serde_json::Map::new();
        for (field, counts) in &result.facets {
            let values: serde_json::Map<String, Value> = counts
                .iter()
                .map(|(value, count)| (value.clone(), json!(count)))
                .collect();
            detail.insert(translator.facet_out(field), json!(values));
        }
        json!(detail)
    } else {
        let total = state.solr.count_results(&query).await?;
        record_stats(
            &state,
            "databrowser/count",
            principal.0.as_ref(),
            &translator,
            &query,
            total as i64,
            started,
            StatusCode::OK.as_u16(),
        );
        json!(total)
    };
    Ok(Json(response))
}

/// Create an intake-esm catalogue from a search.
async fn intake_catalogue(
    State(state): State<SharedAppState>,
    Path((flavour, uniq_key)): Path<(String, String)>,
    Query(pairs): Query<Vec<(String, String)>>,
    principal: OptionalPrincipal,
) -> Result<Response, FrevaRestError> {
    let started = Instant::now();
    let params = SearchParams::parse(pairs)?;
    if let Some(size) = params.batch_size {
        if size > PAGE_BATCH_LIMIT {
            return Err(FrevaRestError::InvalidInput(format!(
                "batch size must not exceed {PAGE_BATCH_LIMIT}"
            )));
        }
    }
    let (translator, query) =
        resolve_query(&state, &flavour, &uniq_key, &params, principal.0.as_ref()).await?;

    let hierarchy: Vec<String> = crate::flavour::DATASET_HIERARCHY
        .iter()
        .map(|f| f.to_string())
        .collect();
    let (result, _) = state.solr.facet_counts(&query, &hierarchy, 0).await?;
    record_stats(
        &state,
        "databrowser/intake-catalogue",
        principal.0.as_ref(),
        &translator,
        &query,
        result.total_count as i64,
        started,
        StatusCode::OK.as_u16(),
    );
    if result.total_count == 0 {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(json!({"detail": "no results found"})),
        )
            .into_response());
    }
    if let Some(max) = params.batch_size {
        if result.total_count > max as u64 {
            return Ok((
                StatusCode::PAYLOAD_TOO_LARGE,
                Json(json!({"detail": "result stream too big"})),
            )
                .into_response());
        }
    }

    let attributes: Vec<String> = result
        .facets
        .iter()
        .filter(|(_, counts)| !counts.is_empty())
        .map(|(field, _)| field.clone())
        .collect();
    let header = intake::catalogue_header(&translator, query.uniq_key, &attributes);

    let mut fields: Vec<String> = hierarchy;
    fields.push(query.uniq_key.as_str().to_string());
    fields.push("format".to_string());
    let docs = state.solr.stream_docs(&query, fields)?;
    let catalogue = intake::stream_catalogue(header, docs, query.uniq_key, translator.clone());
    let body = catalogue.scan(false, |errored, item| {
        futures::future::ready(if *errored {
            None
        } else {
            match item {
                Ok(bytes) => Some(Ok::<Bytes, std::convert::Infallible>(bytes)),
                Err(error) => {
                    tracing::error!("catalogue stream aborted: {error}");
                    *errored = true;
                    None
                }
            }
        })
    });
    let file_name = format!(
        "IntakeEsmCatalogue_{}_{}.json",
        translator.flavour.name(),
        query.uniq_key.as_str()
    );
    Ok((
        StatusCode::OK,
        [
            (CONTENT_TYPE, mime::APPLICATION_JSON.as_ref().to_string()),
            (
                CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file_name}\""),
            ),
        ],
        StreamBody::new(body),
    )
        .into_response())
}

/// Request body for adding user data.
#[derive(Debug, Deserialize, Validate)]
pub struct AddUserDataRequest {
    /// The metadata entries to index.
    #[validate(length(min = 1, message = "user_metadata must not be empty"))]
    pub user_metadata: Vec<HashMap<String, String>>,
    /// Facets applied to every entry.
    #[serde(default)]
    pub facets: HashMap<String, String>,
}

/// Index user-owned metadata and make it searchable.
async fn add_user_data(
    State(state): State<SharedAppState>,
    principal: Principal,
    ValidatedJson(request): ValidatedJson<AddUserDataRequest>,
) -> Result<(StatusCode, Json<Value>), FrevaRestError> {
    let report = state
        .solr
        .add_user_data(&principal.username, &request.user_metadata, &request.facets)
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "ingested": report.ingested,
            "skipped": report.skipped,
        })),
    ))
}

/// Delete previously indexed user metadata.
async fn delete_user_data(
    State(state): State<SharedAppState>,
    principal: Principal,
    Json(search_keys): Json<HashMap<String, String>>,
) -> Result<(StatusCode, Json<Value>), FrevaRestError> {
    let deleted = state
        .solr
        .delete_user_data(&principal.username, principal.is_admin, &search_keys)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "deleted": deleted }))))
}

/// Request body for creating a flavour.
#[derive(Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct FlavourBody {
    pub flavour_name: String,
    pub mapping: HashMap<String, String>,
    #[serde(default)]
    pub is_global: bool,
}

/// Request body for updating a flavour; a new name performs a rename.
#[derive(Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct FlavourUpdateBody {
    #[serde(default)]
    pub flavour_name: Option<String>,
    #[serde(default)]
    pub mapping: HashMap<String, String>,
    #[serde(default)]
    pub is_global: bool,
}

fn flavour_json(record: &crate::store::FlavourRecord) -> Value {
    json!({
        "flavour_name": record.name,
        "mapping": record.mapping,
        "owner": record.owner,
        "created_at": record.created_at,
    })
}

/// List the flavours visible to the caller.
async fn list_flavours(
    State(state): State<SharedAppState>,
    principal: OptionalPrincipal,
) -> Result<Json<Value>, FrevaRestError> {
    let username = principal.0.as_ref().map(|p| p.username.as_str());
    let stored = state.flavours.list(username).await?;
    let flavours: Vec<Value> = stored.iter().map(flavour_json).collect();
    Ok(Json(json!({
        "total": flavours.len(),
        "flavours": flavours,
    })))
}

/// Create a user flavour.
async fn create_flavour(
    State(state): State<SharedAppState>,
    principal: Principal,
    ValidatedJson(body): ValidatedJson<FlavourBody>,
) -> Result<(StatusCode, Json<Value>), FrevaRestError> {
    if principal.is_guest {
        return Err(FrevaRestError::Forbidden(
            "guests may not create flavours".to_string(),
        ));
    }
    let record = state
        .flavours
        .create(
            &FlavourDefinition {
                name: body.flavour_name,
                mapping: body.mapping,
                global: body.is_global,
            },
            &principal.username,
            principal.is_admin,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(flavour_json(&record))))
}

/// Update or rename a user flavour.
async fn update_flavour(
    State(state): State<SharedAppState>,
    Path(name): Path<String>,
    principal: Principal,
    ValidatedJson(body): ValidatedJson<FlavourUpdateBody>,
) -> Result<Json<Value>, FrevaRestError> {
    if principal.is_guest {
        return Err(FrevaRestError::Forbidden(
            "guests may not update flavours".to_string(),
        ));
    }
    let record = state
        .flavours
        .update(
            &name,
            body.flavour_name.as_deref(),
            &body.mapping,
            body.is_global,
            &principal.username,
            principal.is_admin,
        )
        .await?;
    Ok(Json(flavour_json(&record)))
}

#[derive(Debug, Deserialize)]
struct DeleteFlavourParams {
    #[serde(default)]
    is_global: bool,
}

/// Delete a user flavour.
async fn delete_flavour(
    State(state): State<SharedAppState>,
    Path(name): Path<String>,
    Query(params): Query<DeleteFlavourParams>,
    principal: Principal,
) -> Result<Json<Value>, FrevaRestError> {
    if principal.is_guest {
        return Err(FrevaRestError::Forbidden(
            "guests may not delete flavours".to_string(),
        ));
    }
    state
        .flavours
        .delete(&name, params.is_global, &principal.username, principal.is_admin)
        .await?;
    Ok(Json(json!({
        "status": format!("flavour '{name}' deleted")
    })))
}

/// The `/databrowser/*` routes.
pub fn router() -> Router<SharedAppState> {
    Router::new()
        .route("/api/freva-nextgen/databrowser/overview", get(overview))
        .route(
            "/api/freva-nextgen/databrowser/data-search/:flavour/:uniq_key",
            get(data_search),
        )
        .route(
            "/api/freva-nextgen/databrowser/metadata-search/:flavour/:uniq_key",
            get(metadata_search),
        )
        .route(
            "/api/freva-nextgen/databrowser/count/:flavour/:uniq_key",
            get(count),
        )
        .route(
            "/api/freva-nextgen/databrowser/intake-catalogue/:flavour/:uniq_key",
            get(intake_catalogue),
        )
        .route(
            "/api/freva-nextgen/databrowser/userdata",
            axum::routing::post(add_user_data).delete(delete_user_data),
        )
        .route(
            "/api/freva-nextgen/databrowser/flavours",
            get(list_flavours).post(create_flavour),
        )
        .route(
            "/api/freva-nextgen/databrowser/flavours/:name",
            axum::routing::put(update_flavour).delete(delete_flavour),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(kv: &[(&str, &str)]) -> Vec<(String, String)> {
        kv.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn reserved_keys_are_not_facets() {
        let params = SearchParams::parse(pairs(&[
            ("start", "10"),
            ("max-results", "100"),
            ("multi-version", "true"),
            ("translate", "false"),
            ("project", "observations"),
            ("--json", ""),
        ]))
        .unwrap();
        assert_eq!(params.start, 10);
        assert_eq!(params.batch_size, Some(100));
        assert!(params.multi_version);
        assert!(!params.translate);
        assert!(params.ndjson);
        assert_eq!(
            params.facet_pairs,
            pairs(&[("project", "observations")])
        );
    }

    #[test]
    fn malformed_numbers_are_invalid() {
        assert!(SearchParams::parse(pairs(&[("start", "x")])).is_err());
        assert!(SearchParams::parse(pairs(&[("max-results", "-3")])).is_err());
    }

    #[test]
    fn facet_filter_overrides_field_selection() {
        let translator = Translator::for_builtin(BuiltInFlavour::Cmip6, true);
        let params = SearchParams::parse(pairs(&[("facets", "variable_id")])).unwrap();
        assert_eq!(
            facet_fields(&translator, &params).unwrap(),
            vec!["variable".to_string()]
        );
        let params = SearchParams::parse(pairs(&[("facets", "*")])).unwrap();
        let fields = facet_fields(&translator, &params).unwrap();
        assert!(fields.contains(&"project".to_string()));
        let params = SearchParams::parse(pairs(&[("extended", "true")])).unwrap();
        let fields = facet_fields(&translator, &params).unwrap();
        assert!(fields.contains(&"grid_label".to_string()));
    }
}
