//! STAC API (1.1.0).
//!
//! Projects the search index onto a SpatioTemporal Asset Catalog: every
//! canonical `project` becomes a collection and every indexed file an item.
//! Conformance classes advertised: core, collections and item-search.
//! Item pages are addressed with opaque `direction:collection:item_id`
//! tokens so that concatenating all pages yields the full, duplicate-free
//! result set in a total order.

use crate::app_state::SharedAppState;
use crate::auth::urlencode;
use crate::error::FrevaRestError;
use crate::flavour::{search_facets, BuiltInFlavour, Translator};
use crate::solr::{doc_field_str, SearchQuery, SolrDocument, UniqKey};
use crate::stats::StatsRecord;
use crate::timespec;

use std::collections::HashMap;
use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};

/// The STAC version all documents declare.
pub const STAC_VERSION: &str = "1.1.0";

/// Identifier of the landing catalogue.
const LANDING_ID: &str = "freva";

/// Default and maximum item page sizes.
const DEFAULT_LIMIT: usize = 12;
const MAX_LIMIT: usize = 1_000;

/// The conformance classes this API implements.
pub const CONFORMANCE_URLS: [&str; 3] = [
    "https://api.stacspec.org/v1.0.0/core",
    "https://api.stacspec.org/v1.0.0/collections",
    "https://api.stacspec.org/v1.0.0/item-search",
];

/// Pagination direction of an item token.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Direction {
    Next,
    Prev,
}

impl Direction {
    fn as_str(&self) -> &'static str {
        match self {
            Direction::Next => "next",
            Direction::Prev => "prev",
        }
    }
}

/// An opaque pagination token: `direction:collection_id:item_id`,
/// base64url encoded.
#[derive(Clone, Debug, PartialEq)]
pub struct PageToken {
    pub direction: Direction,
    pub collection: String,
    pub item_id: String,
}

impl PageToken {
    pub fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(format!(
            "{}:{}:{}",
            self.direction.as_str(),
            self.collection,
            self.item_id
        ))
    }

    pub fn decode(token: &str) -> Result<Self, FrevaRestError> {
        let invalid = || FrevaRestError::InvalidInput("invalid pagination token".to_string());
        let decoded = URL_SAFE_NO_PAD.decode(token).map_err(|_| invalid())?;
        let decoded = String::from_utf8(decoded).map_err(|_| invalid())?;
        let mut fields = decoded.splitn(3, ':');
        let direction = match fields.next() {
            Some("next") => Direction::Next,
            Some("prev") => Direction::Prev,
            _ => return Err(invalid()),
        };
        let collection = fields.next().ok_or_else(invalid)?.to_string();
        let item_id = fields.next().ok_or_else(invalid)?.to_string();
        if collection.is_empty() || item_id.parse::<i64>().is_err() {
            return Err(invalid());
        }
        Ok(Self {
            direction,
            collection,
            item_id,
        })
    }
}

fn stac_base(state: &SharedAppState) -> String {
    format!("{}/api/freva-nextgen/stacapi", state.config.proxy)
}

fn freva_translator() -> Translator {
    Translator::for_builtin(BuiltInFlavour::Freva, true)
}

/// An empty canonical query over one collection.
fn collection_query(collection: Option<&str>) -> SearchQuery {
    let mut pairs = Vec::new();
    if let Some(collection) = collection {
        pairs.push(("project".to_string(), collection.to_string()));
    }
    SearchQuery::parse(&freva_translator(), UniqKey::File, &pairs, false)
        .expect("project is always a valid canonical facet")
}

/// All collection ids: the canonical `project` values, lowercased.
async fn collection_ids(state: &SharedAppState) -> Result<Vec<String>, FrevaRestError> {
    let query = collection_query(None);
    let (result, _) = state
        .solr
        .facet_counts(&query, &["project".to_string()], 0)
        .await?;
    Ok(result
        .facets
        .first()
        .map(|(_, counts)| {
            counts
                .iter()
                .map(|(value, _)| value.to_lowercase())
                .collect()
        })
        .unwrap_or_default())
}

fn record_stats(state: &SharedAppState, route: &str, result_count: i64, started: Instant) {
    state.stats.record(StatsRecord::now(
        route,
        None,
        "freva",
        HashMap::new(),
        result_count,
        started.elapsed().as_millis() as u64,
        StatusCode::OK.as_u16(),
    ));
}

/// STAC API landing page.
async fn landing_page(State(state): State<SharedAppState>) -> Result<Json<Value>, FrevaRestError> {
    let started = Instant::now();
    let base = stac_base(&state);
    let ids = collection_ids(&state).await?;
    let mut links = vec![
        json!({"rel": "self", "href": &base, "type": "application/json", "title": "Landing Page"}),
        json!({"rel": "root", "href": &base, "type": "application/json"}),
        json!({"rel": "conformance", "href": format!("{base}/conformance"), "type": "application/json"}),
        json!({"rel": "data", "href": format!("{base}/collections"), "type": "application/json"}),
        json!({"rel": "search", "href": format!("{base}/search"), "type": "application/geo+json", "method": "GET"}),
        json!({"rel": "search", "href": format!("{base}/search"), "type": "application/geo+json", "method": "POST"}),
        json!({
            "rel": "http://www.opengis.net/def/rel/ogc/1.0/queryables",
            "href": format!("{base}/queryables"),
            "type": "application/schema+json",
        }),
    ];
    for id in &ids {
        links.push(json!({
            "rel": "child",
            "href": format!("{base}/collections/{id}"),
            "type": "application/json",
        }));
    }
    record_stats(&state, "stacapi/landing", ids.len() as i64, started);
    Ok(Json(json!({
        "type": "Catalog",
        "id": LANDING_ID,
        "title": "Freva STAC API",
        "description": "Climate datasets indexed by the freva databrowser",
        "stac_version": STAC_VERSION,
        "conformsTo": CONFORMANCE_URLS,
        "links": links,
    })))
}

/// Conformance declaration.
async fn conformance() -> Json<Value> {
    Json(json!({ "conformsTo": CONFORMANCE_URLS }))
}

fn collection_json(state: &SharedAppState, id: &str) -> Value {
    let base = stac_base(state);
    json!({
        "type": "Collection",
        "id": id,
        "stac_version": STAC_VERSION,
        "title": id.to_uppercase(),
        "description": format!("Collection {}", id.to_uppercase()),
        "license": "proprietary",
        "extent": {
            "spatial": {"bbox": [[-180.0, -90.0, 180.0, 90.0]]},
            "temporal": {"interval": [[Value::Null, Value::Null]]},
        },
        "keywords": [id, "climate", "freva"],
        "links": [
            {"rel": "self", "href": format!("{base}/collections/{id}"), "type": "application/json"},
            {"rel": "parent", "href": &base, "type": "application/json"},
            {"rel": "root", "href": &base, "type": "application/json"},
            {"rel": "items", "href": format!("{base}/collections/{id}/items"), "type": "application/geo+json"},
            {
                "rel": "queryables",
                "href": format!("{base}/collections/{id}/queryables"),
                "type": "application/schema+json",
            },
        ],
    })
}

/// List all collections.
async fn collections(State(state): State<SharedAppState>) -> Result<Json<Value>, FrevaRestError> {
    let started = Instant::now();
    let base = stac_base(&state);
    let ids = collection_ids(&state).await?;
    let rendered: Vec<Value> = ids.iter().map(|id| collection_json(&state, id)).collect();
    record_stats(&state, "stacapi/collections", rendered.len() as i64, started);
    Ok(Json(json!({
        "collections": rendered,
        "links": [
            {"rel": "self", "href": format!("{base}/collections"), "type": "application/json"},
            {"rel": "root", "href": base, "type": "application/json"},
        ],
    })))
}

/// Get one collection.
async fn collection(
    State(state): State<SharedAppState>,
    Path(collection_id): Path<String>,
) -> Result<Json<Value>, FrevaRestError> {
    let ids = collection_ids(&state).await?;
    if !ids.contains(&collection_id) {
        return Err(FrevaRestError::NotFound(format!(
            "no such collection: {collection_id}"
        )));
    }
    Ok(Json(collection_json(&state, &collection_id)))
}

/// Parse a STAC `datetime` parameter (`start/end`, `..` for open sides)
/// into the internal time-range form.
fn parse_stac_datetime(value: &str) -> Result<Option<timespec::TimeRange>, FrevaRestError> {
    if value.is_empty() {
        return Ok(None);
    }
    let spec = match value.split_once('/') {
        Some((start, end)) => {
            let start = if start == ".." { "" } else { start };
            let end = if end == ".." { "" } else { end };
            format!("{start} to {end}")
        }
        None => value.to_string(),
    };
    timespec::parse_time_spec(&spec)
}

/// Query options for the item routes.
#[derive(Debug, Default, Deserialize)]
struct ItemsParams {
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    datetime: Option<String>,
    #[serde(default)]
    bbox: Option<String>,
}

fn validate_limit(limit: Option<usize>) -> Result<usize, FrevaRestError> {
    let limit = limit.unwrap_or(DEFAULT_LIMIT);
    if !(1..=MAX_LIMIT).contains(&limit) {
        return Err(FrevaRestError::InvalidInput(format!(
            "limit must be between 1 and {MAX_LIMIT}"
        )));
    }
    Ok(limit)
}

/// One page of items: the features plus next/prev tokens.
struct ItemPage {
    features: Vec<Value>,
    next: Option<PageToken>,
    prev: Option<PageToken>,
}

async fn fetch_item_page(
    state: &SharedAppState,
    collection_id: &str,
    mut query: SearchQuery,
    limit: usize,
    token: Option<&PageToken>,
) -> Result<ItemPage, FrevaRestError> {
    let fields = ["id", "file", "uri", "time", "bbox", "project"]
        .iter()
        .chain(
            crate::flavour::DATASET_HIERARCHY
                .iter()
                .filter(|field| **field != "project"),
        )
        .copied()
        .collect::<Vec<_>>();

    let (extra_fq, descending) = match token {
        Some(token) => {
            let id = &token.item_id;
            match token.direction {
                Direction::Next => (Some(format!("id:{{{id} TO *]")), false),
                Direction::Prev => (Some(format!("id:[* TO {id}}}")), true),
            }
        }
        None => (None, false),
    };
    query.multi_version = false;
    let (_, mut docs) = state
        .solr
        .fetch_page(&query, &fields, 0, limit, extra_fq, descending)
        .await?;
    if descending {
        docs.reverse();
    }

    let translator = freva_translator();
    let features: Vec<Value> = docs
        .iter()
        .map(|doc| build_item(state, doc, collection_id, &translator))
        .collect();

    let next = docs
        .last()
        .filter(|_| docs.len() == limit)
        .and_then(|doc| doc_field_str(doc, "id"))
        .map(|id| PageToken {
            direction: Direction::Next,
            collection: collection_id.to_string(),
            item_id: id,
        });
    let prev = docs
        .first()
        .filter(|_| token.is_some())
        .and_then(|doc| doc_field_str(doc, "id"))
        .map(|id| PageToken {
            direction: Direction::Prev,
            collection: collection_id.to_string(),
            item_id: id,
        });
    Ok(ItemPage {
        features,
        next,
        prev,
    })
}

/// Parse the index's serialised time interval `[start TO end]`.
fn parse_doc_interval(value: &str) -> (Option<String>, Option<String>) {
    let trimmed = value
        .trim_start_matches(['[', '{'])
        .trim_end_matches([']', '}']);
    match trimmed.split_once(" TO ") {
        Some((start, end)) => {
            let clean = |s: &str| {
                let s = s.trim();
                if s.is_empty() || s == "*" {
                    None
                } else {
                    Some(s.to_string())
                }
            };
            (clean(start), clean(end))
        }
        None => (None, None),
    }
}

/// Build one STAC item from an index document.
fn build_item(
    state: &SharedAppState,
    doc: &SolrDocument,
    collection_id: &str,
    translator: &Translator,
) -> Value {
    let base = stac_base(state);
    let item_id = doc_field_str(doc, "id").unwrap_or_default();
    // A cross-collection search has no path collection; fall back to the
    // document's project.
    let collection_id = if collection_id.is_empty() {
        doc_field_str(doc, "project")
            .unwrap_or_default()
            .to_lowercase()
    } else {
        collection_id.to_string()
    };
    let collection_id = collection_id.as_str();
    let location = doc_field_str(doc, "file")
        .or_else(|| doc_field_str(doc, "uri"))
        .unwrap_or_default();

    let bbox = doc
        .get("bbox")
        .and_then(Value::as_array)
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_f64)
                .collect::<Vec<f64>>()
        })
        .filter(|values| values.len() == 4)
        .unwrap_or_else(|| vec![-180.0, -90.0, 180.0, 90.0]);
    let geometry = json!({
        "type": "Polygon",
        "coordinates": [[
            [bbox[0], bbox[1]],
            [bbox[2], bbox[1]],
            [bbox[2], bbox[3]],
            [bbox[0], bbox[3]],
            [bbox[0], bbox[1]],
        ]],
    });

    let mut properties = serde_json::Map::new();
    let (start, end) = doc
        .get("time")
        .and_then(Value::as_str)
        .map(parse_doc_interval)
        .unwrap_or((None, None));
    properties.insert("datetime".to_string(), json!(start.clone()));
    properties.insert("start_datetime".to_string(), json!(start));
    properties.insert("end_datetime".to_string(), json!(end));
    for field in search_facets() {
        if let Some(value) = doc_field_str(doc, field) {
            properties.insert(translator.facet_out(field), json!(value));
        }
    }

    let zarr_href = format!(
        "{}/api/freva-nextgen/databrowser/load/freva?file={}",
        state.config.proxy,
        urlencode(&location)
    );
    json!({
        "type": "Feature",
        "stac_version": STAC_VERSION,
        "id": &item_id,
        "collection": collection_id,
        "geometry": geometry,
        "bbox": bbox,
        "properties": properties,
        "links": [
            {"rel": "self", "href": format!("{base}/collections/{collection_id}/items/{item_id}"), "type": "application/geo+json"},
            {"rel": "collection", "href": format!("{base}/collections/{collection_id}"), "type": "application/json"},
            {"rel": "root", "href": base, "type": "application/json"},
        ],
        "assets": {
            "data": {
                "href": location,
                "type": "application/netcdf",
                "title": "Direct data access",
                "roles": ["data"],
            },
            "zarr-access": {
                "href": zarr_href,
                "type": "application/vnd+zarr",
                "title": "Stream as Zarr",
                "roles": ["data"],
            },
        },
    })
}

fn feature_collection(
    state: &SharedAppState,
    self_href: String,
    page: ItemPage,
) -> Response {
    let bare = self_href.split('?').next().unwrap_or(&self_href).to_string();
    let mut links = vec![
        json!({"rel": "self", "href": self_href, "type": "application/geo+json"}),
        json!({"rel": "root", "href": stac_base(state), "type": "application/json"}),
    ];
    if let Some(next) = &page.next {
        links.push(json!({
            "rel": "next",
            "href": format!("{bare}?token={}", next.encode()),
            "type": "application/geo+json",
        }));
    }
    if let Some(prev) = &page.prev {
        links.push(json!({
            "rel": "prev",
            "href": format!("{bare}?token={}", prev.encode()),
            "type": "application/geo+json",
        }));
    }
    let body = json!({
        "type": "FeatureCollection",
        "features": page.features,
        "links": links,
    });
    (
        StatusCode::OK,
        [(CONTENT_TYPE, "application/geo+json")],
        Json(body),
    )
        .into_response()
}

/// List items of one collection.
async fn collection_items(
    State(state): State<SharedAppState>,
    Path(collection_id): Path<String>,
    Query(params): Query<ItemsParams>,
) -> Result<Response, FrevaRestError> {
    let started = Instant::now();
    let limit = validate_limit(params.limit)?;
    let token = params
        .token
        .as_deref()
        .map(PageToken::decode)
        .transpose()?;
    if let Some(token) = &token {
        if token.collection != collection_id {
            return Err(FrevaRestError::InvalidInput(
                "pagination token does not belong to this collection".to_string(),
            ));
        }
    }
    let ids = collection_ids(&state).await?;
    if !ids.contains(&collection_id) {
        return Err(FrevaRestError::NotFound(format!(
            "no such collection: {collection_id}"
        )));
    }
    let mut query = collection_query(Some(&collection_id));
    query.time = params
        .datetime
        .as_deref()
        .map(parse_stac_datetime)
        .transpose()?
        .flatten();
    query.bbox = params
        .bbox
        .as_deref()
        .map(crate::bbox::BoundingBox::parse)
        .transpose()?;

    let page = fetch_item_page(&state, &collection_id, query, limit, token.as_ref()).await?;
    record_stats(
        &state,
        "stacapi/items",
        page.features.len() as i64,
        started,
    );
    let base = stac_base(&state);
    Ok(feature_collection(
        &state,
        format!("{base}/collections/{collection_id}/items"),
        page,
    ))
}

/// Get one item.
async fn collection_item(
    State(state): State<SharedAppState>,
    Path((collection_id, item_id)): Path<(String, String)>,
) -> Result<Response, FrevaRestError> {
    let item_id: i64 = item_id.parse().map_err(|_| {
        FrevaRestError::NotFound(format!("no such item: {collection_id}/{item_id}"))
    })?;
    let query = collection_query(Some(&collection_id));
    let extra_fq = Some(format!("id:{item_id}"));
    let (_, docs) = state
        .solr
        .fetch_page(
            &query,
            &["id", "file", "uri", "time", "bbox", "project"],
            0,
            1,
            extra_fq,
            false,
        )
        .await?;
    let doc = docs.first().ok_or_else(|| {
        FrevaRestError::NotFound(format!("no such item: {collection_id}/{item_id}"))
    })?;
    let item = build_item(&state, doc, &collection_id, &freva_translator());
    Ok((
        StatusCode::OK,
        [(CONTENT_TYPE, "application/geo+json")],
        Json(item),
    )
        .into_response())
}

/// Body of a POST item search.
#[derive(Debug, Default, Deserialize)]
struct SearchBody {
    #[serde(default)]
    collections: Vec<String>,
    #[serde(default)]
    ids: Vec<String>,
    #[serde(default)]
    bbox: Option<Value>,
    #[serde(default)]
    datetime: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    token: Option<String>,
}

async fn run_search(
    state: &SharedAppState,
    body: SearchBody,
) -> Result<Response, FrevaRestError> {
    let started = Instant::now();
    let limit = validate_limit(body.limit)?;
    let token = body.token.as_deref().map(PageToken::decode).transpose()?;

    let collection_id = match (&token, body.collections.first()) {
        (Some(token), _) => token.collection.clone(),
        (None, Some(first)) => first.to_lowercase(),
        (None, None) => String::new(),
    };
    let mut query = if collection_id.is_empty() {
        collection_query(None)
    } else {
        collection_query(Some(&collection_id))
    };
    if !body.ids.is_empty() {
        query
            .facets
            .push(("id".to_string(), body.ids.clone()));
    }
    query.time = body
        .datetime
        .as_deref()
        .map(parse_stac_datetime)
        .transpose()?
        .flatten();
    query.bbox = match &body.bbox {
        Some(Value::String(s)) => Some(crate::bbox::BoundingBox::parse(s)?),
        Some(Value::Array(values)) => {
            let coords: Vec<f64> = values.iter().filter_map(Value::as_f64).collect();
            if coords.len() != 4 {
                return Err(FrevaRestError::InvalidInput(
                    "bbox must have four coordinates".to_string(),
                ));
            }
            Some(crate::bbox::BoundingBox::new(
                coords[0], coords[1], coords[2], coords[3],
            )?)
        }
        _ => None,
    };

    let page = fetch_item_page(state, &collection_id, query, limit, token.as_ref()).await?;
    record_stats(state, "stacapi/search", page.features.len() as i64, started);
    let base = stac_base(state);
    Ok(feature_collection(state, format!("{base}/search"), page))
}

/// Item search (GET).
async fn search_get(
    State(state): State<SharedAppState>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Response, FrevaRestError> {
    let mut body = SearchBody::default();
    for (key, value) in pairs {
        match key.as_str() {
            "collections" => {
                body.collections
                    .extend(value.split(',').map(|s| s.trim().to_string()));
            }
            "ids" => body.ids.extend(value.split(',').map(|s| s.trim().to_string())),
            "bbox" => body.bbox = Some(Value::String(value)),
            "datetime" => body.datetime = Some(value),
            "limit" => {
                body.limit = Some(value.parse().map_err(|_| {
                    FrevaRestError::InvalidInput(format!("limit is not a number: {value}"))
                })?);
            }
            "token" => body.token = Some(value),
            other => {
                return Err(FrevaRestError::InvalidInput(format!(
                    "unknown search parameter: {other}"
                )));
            }
        }
    }
    run_search(&state, body).await
}

/// Item search (POST).
async fn search_post(
    State(state): State<SharedAppState>,
    Json(body): Json<SearchBody>,
) -> Result<Response, FrevaRestError> {
    run_search(&state, body).await
}

/// The queryables JSON schema over the canonical facets.
async fn queryables(State(state): State<SharedAppState>) -> Response {
    let mut properties = serde_json::Map::new();
    properties.insert(
        "datetime".to_string(),
        json!({"type": "string", "format": "date-time"}),
    );
    properties.insert(
        "bbox".to_string(),
        json!({"type": "array", "items": {"type": "number"}}),
    );
    for field in search_facets() {
        properties.insert(field.to_string(), json!({"type": "string"}));
    }
    let body = json!({
        "$schema": "https://json-schema.org/draft/2020-12/schema",
        "$id": format!("{}/queryables", stac_base(&state)),
        "type": "object",
        "title": "Queryables for the freva STAC API",
        "properties": properties,
        "additionalProperties": true,
    });
    (
        StatusCode::OK,
        [(CONTENT_TYPE, "application/schema+json")],
        Json(body),
    )
        .into_response()
}

/// The `/stacapi/*` routes.
pub fn router() -> Router<SharedAppState> {
    Router::new()
        .route("/api/freva-nextgen/stacapi", get(landing_page))
        .route("/api/freva-nextgen/stacapi/", get(landing_page))
        .route("/api/freva-nextgen/stacapi/conformance", get(conformance))
        .route("/api/freva-nextgen/stacapi/collections", get(collections))
        .route(
            "/api/freva-nextgen/stacapi/collections/:collection_id",
            get(collection),
        )
        .route(
            "/api/freva-nextgen/stacapi/collections/:collection_id/items",
            get(collection_items),
        )
        .route(
            "/api/freva-nextgen/stacapi/collections/:collection_id/items/:item_id",
            get(collection_item),
        )
        .route(
            "/api/freva-nextgen/stacapi/collections/:collection_id/queryables",
            get(queryables),
        )
        .route("/api/freva-nextgen/stacapi/queryables", get(queryables))
        .route(
            "/api/freva-nextgen/stacapi/search",
            get(search_get).post(search_post),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_tokens_round_trip() {
        let token = PageToken {
            direction: Direction::Next,
            collection: "observations".to_string(),
            item_id: "4711".to_string(),
        };
        let encoded = token.encode();
        assert_eq!(PageToken::decode(&encoded).unwrap(), token);
        let token = PageToken {
            direction: Direction::Prev,
            collection: "cmip6".to_string(),
            item_id: "1".to_string(),
        };
        assert_eq!(PageToken::decode(&token.encode()).unwrap(), token);
    }

    #[test]
    fn bad_tokens_are_invalid_input() {
        assert!(PageToken::decode("!!!").is_err());
        let garbage = URL_SAFE_NO_PAD.encode("sideways:observations:1");
        assert!(PageToken::decode(&garbage).is_err());
        let empty = URL_SAFE_NO_PAD.encode("next::");
        assert!(PageToken::decode(&empty).is_err());
    }

    #[test]
    fn limits_are_bounded() {
        assert_eq!(validate_limit(None).unwrap(), DEFAULT_LIMIT);
        assert_eq!(validate_limit(Some(2)).unwrap(), 2);
        assert!(validate_limit(Some(0)).is_err());
        assert!(validate_limit(Some(1001)).is_err());
    }

    #[test]
    fn stac_datetime_intervals() {
        let range = parse_stac_datetime("2020-01-01/2021-01-01").unwrap().unwrap();
        assert!(!range.instant);
        let range = parse_stac_datetime("../2021").unwrap().unwrap();
        assert_eq!(range.start.format("%Y").to_string(), "0001");
        let range = parse_stac_datetime("2020-05-01").unwrap().unwrap();
        assert!(range.instant);
        assert!(parse_stac_datetime("").unwrap().is_none());
    }

    #[test]
    fn doc_intervals_are_split() {
        assert_eq!(
            parse_doc_interval("[2016-09-02T22:15:00Z TO 2016-10-01T00:00:00Z]"),
            (
                Some("2016-09-02T22:15:00Z".to_string()),
                Some("2016-10-01T00:00:00Z".to_string())
            )
        );
        assert_eq!(parse_doc_interval("[* TO *]"), (None, None));
        assert_eq!(parse_doc_interval("static"), (None, None));
    }
}
