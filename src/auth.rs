//! OIDC authentication mediator.
//!
//! Terminates OAuth2/OIDC for the whole service: discovery-document and
//! JWKS caching, authorisation-code and device-code flows, bearer token
//! validation with configurable claim filters, and the mapping from a
//! validated token to an internal [Principal].
//!
//! The two process-wide caches (discovery document, JWKS) are read-mostly:
//! a single refresh path swaps the cached value atomically while readers
//! keep using the previous one.

use crate::app_state::SharedAppState;
use crate::config::{ClaimFilters, ServerConfig};
use crate::error::FrevaRestError;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, DecodingKey, Validation};
use rand::distributions::{Alphanumeric, DistString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};

/// Timeout for identity-provider interactions.
const IDP_TIMEOUT: Duration = Duration::from_secs(5);

/// How long the discovery document is cached.
const DISCOVERY_TTL: Duration = Duration::from_secs(600);

/// How long a login `state` stays valid; states are single-use.
const STATE_TTL: Duration = Duration::from_secs(600);

/// The relevant endpoints of the identity provider.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Discovery {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: String,
    pub jwks_uri: String,
    #[serde(default)]
    pub device_authorization_endpoint: Option<String>,
    #[serde(default)]
    pub end_session_endpoint: Option<String>,
}

/// The internal identity a validated token maps to.
#[derive(Clone, Debug)]
pub struct Principal {
    pub sub: String,
    pub username: String,
    pub email: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub exp: i64,
    pub is_guest: bool,
    pub is_admin: bool,
}

/// Token response handed back to clients.
#[derive(Debug, Deserialize, Serialize)]
pub struct Token {
    pub access_token: String,
    pub token_type: String,
    pub expires: i64,
    pub refresh_token: String,
    pub refresh_expires: i64,
    pub scope: String,
}

struct StateEntry {
    redirect_uri: String,
    created: Instant,
}

/// The authentication mediator.
pub struct AuthMediator {
    config: ServerConfig,
    client: reqwest::Client,
    discovery: RwLock<Option<(Instant, Discovery)>>,
    jwks: RwLock<Option<JwkSet>>,
    states: Mutex<HashMap<String, StateEntry>>,
}

impl AuthMediator {
    pub fn new(config: ServerConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(IDP_TIMEOUT)
            .build()
            .expect("the reqwest client builder accepts a plain timeout");
        Self {
            config,
            client,
            discovery: RwLock::new(None),
            jwks: RwLock::new(None),
            states: Mutex::new(HashMap::new()),
        }
    }

    /// The cached discovery document, refreshed every ten minutes.
    pub async fn discovery(&self) -> Result<Discovery, FrevaRestError> {
        {
            let cached = self.discovery.read().await;
            if let Some((fetched, discovery)) = cached.as_ref() {
                if fetched.elapsed() < DISCOVERY_TTL {
                    return Ok(discovery.clone());
                }
            }
        }
        let discovery = self.fetch_discovery().await?;
        *self.discovery.write().await = Some((Instant::now(), discovery.clone()));
        Ok(discovery)
    }

    async fn fetch_discovery(&self) -> Result<Discovery, FrevaRestError> {
        if self.config.oidc_discovery_url.is_empty() {
            return Err(FrevaRestError::BackendUnavailable(
                "no OIDC discovery URL configured".to_string(),
            ));
        }
        let response = self
            .client
            .get(&self.config.oidc_discovery_url)
            .send()
            .await
            .map_err(|error| {
                FrevaRestError::BackendUnavailable(format!(
                    "could not connect to the OIDC server: {error}"
                ))
            })?;
        if !response.status().is_success() {
            return Err(FrevaRestError::BackendUnavailable(
                "OIDC discovery document not available".to_string(),
            ));
        }
        response.json().await.map_err(|error| {
            FrevaRestError::BackendUnavailable(format!(
                "OIDC discovery document is unreadable: {error}"
            ))
        })
    }

    /// The raw discovery document with the endpoints this service proxies
    /// rewritten to point at itself.
    pub async fn rewritten_discovery(&self) -> Result<Value, FrevaRestError> {
        let response = self
            .client
            .get(&self.config.oidc_discovery_url)
            .send()
            .await
            .map_err(|error| {
                FrevaRestError::BackendUnavailable(format!(
                    "could not connect to the OIDC server: {error}"
                ))
            })?;
        let mut document: Value = response.json().await.map_err(|error| {
            FrevaRestError::BackendUnavailable(format!(
                "OIDC discovery document is unreadable: {error}"
            ))
        })?;
        if let Some(object) = document.as_object_mut() {
            object.insert(
                "token_endpoint".to_string(),
                Value::String(format!(
                    "{}/api/freva-nextgen/auth/v2/token",
                    self.config.proxy
                )),
            );
            object.insert(
                "userinfo_endpoint".to_string(),
                Value::String(format!(
                    "{}/api/freva-nextgen/auth/v2/userinfo",
                    self.config.proxy
                )),
            );
        }
        Ok(document)
    }

    /// The cached JWKS; `refresh` forces a re-fetch (used once on an
    /// unknown key id).
    async fn jwks(&self, refresh: bool) -> Result<JwkSet, FrevaRestError> {
        if !refresh {
            let cached = self.jwks.read().await;
            if let Some(jwks) = cached.as_ref() {
                return Ok(jwks.clone());
            }
        }
        let discovery = self.discovery().await?;
        let response = self
            .client
            .get(&discovery.jwks_uri)
            .send()
            .await
            .map_err(|error| {
                FrevaRestError::BackendUnavailable(format!("could not fetch the JWKS: {error}"))
            })?;
        let jwks: JwkSet = response.json().await.map_err(|error| {
            FrevaRestError::BackendUnavailable(format!("the JWKS is unreadable: {error}"))
        })?;
        *self.jwks.write().await = Some(jwks.clone());
        Ok(jwks)
    }

    /// Validate a bearer token: signature against the cached JWKS, `exp`,
    /// `nbf` and `iss`, then the configured claim filters.
    pub async fn validate_token(&self, token: &str) -> Result<Principal, FrevaRestError> {
        let unauthenticated =
            |reason: String| FrevaRestError::Unauthenticated(format!("invalid token: {reason}"));
        let header = decode_header(token).map_err(|error| unauthenticated(error.to_string()))?;
        let kid = header
            .kid
            .ok_or_else(|| unauthenticated("token has no key id".to_string()))?;

        let mut jwks = self.jwks(false).await?;
        if jwks.find(&kid).is_none() {
            jwks = self.jwks(true).await?;
        }
        let jwk = jwks
            .find(&kid)
            .ok_or_else(|| unauthenticated("unknown signing key".to_string()))?;
        let key =
            DecodingKey::from_jwk(jwk).map_err(|error| unauthenticated(error.to_string()))?;

        let discovery = self.discovery().await?;
        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[&discovery.issuer]);
        validation.validate_nbf = true;
        let data = decode::<Value>(token, &key, &validation)
            .map_err(|error| unauthenticated(error.to_string()))?;
        let claims = data.claims;

        if !claim_filters_match(&self.config.oidc_token_claims, &claims) {
            return Err(FrevaRestError::Unauthenticated(
                "insufficient permissions based on token claims".to_string(),
            ));
        }
        let is_admin = !self.config.oidc_admin_claims.is_empty()
            && claim_filters_match(&self.config.oidc_admin_claims, &claims);
        principal_from_claims(&claims, is_admin)
            .ok_or_else(|| unauthenticated("token carries no usable identity".to_string()))
    }

    /// Register a login `state` bound to the client's redirect URI.
    pub async fn register_state(&self, redirect_uri: &str) -> String {
        let state = Alphanumeric.sample_string(&mut rand::thread_rng(), 22);
        let mut states = self.states.lock().await;
        states.retain(|_, entry| entry.created.elapsed() < STATE_TTL);
        states.insert(
            state.clone(),
            StateEntry {
                redirect_uri: redirect_uri.to_string(),
                created: Instant::now(),
            },
        );
        state
    }

    /// Consume a login `state`, returning the redirect URI it was bound to.
    /// States are single-use and expire after ten minutes.
    pub async fn consume_state(&self, state: &str) -> Option<String> {
        let mut states = self.states.lock().await;
        let entry = states.remove(state)?;
        if entry.created.elapsed() < STATE_TTL {
            Some(entry.redirect_uri)
        } else {
            None
        }
    }

    /// Whether a redirect URI is acceptable for the code flow: a registered
    /// absolute URL under the proxy, or localhost on one of the configured
    /// auth ports.
    pub fn redirect_uri_is_valid(&self, redirect_uri: &str) -> bool {
        if redirect_uri.starts_with(&self.config.proxy) {
            return true;
        }
        let Ok(url) = url::Url::parse(redirect_uri) else {
            return false;
        };
        if url.scheme() != "http" {
            return false;
        }
        let is_local = matches!(url.host_str(), Some("localhost") | Some("127.0.0.1"));
        match (is_local, url.port()) {
            (true, Some(port)) => self.config.oidc_auth_ports.contains(&port),
            _ => false,
        }
    }

    /// Exchange credentials at the identity provider's token endpoint.
    pub async fn exchange_token(
        &self,
        form: &[(String, String)],
    ) -> Result<Token, FrevaRestError> {
        let discovery = self.discovery().await?;
        let response = self.idp_post(&discovery.token_endpoint, form).await?;
        token_from_idp_response(&response)
            .ok_or_else(|| FrevaRestError::InvalidInput("token creation failed".to_string()))
    }

    /// Start a device authorisation.
    pub async fn start_device_flow(&self) -> Result<Value, FrevaRestError> {
        let discovery = self.discovery().await?;
        let endpoint = discovery.device_authorization_endpoint.ok_or_else(|| {
            FrevaRestError::BackendUnavailable(
                "the identity provider does not support the device flow".to_string(),
            )
        })?;
        let form = vec![("scope".to_string(), "openid profile offline_access".to_string())];
        self.idp_post(&endpoint, &form).await
    }

    /// POST a form to the identity provider, adding client authentication.
    async fn idp_post(
        &self,
        endpoint: &str,
        form: &[(String, String)],
    ) -> Result<Value, FrevaRestError> {
        let mut form: Vec<(String, String)> = form.to_vec();
        let mut request = self.client.post(endpoint);
        if self.config.oidc_client_secret.is_empty() {
            form.push(("client_id".to_string(), self.config.oidc_client_id.clone()));
        } else {
            let credentials = BASE64.encode(format!(
                "{}:{}",
                self.config.oidc_client_id, self.config.oidc_client_secret
            ));
            request = request.header(AUTHORIZATION, format!("Basic {credentials}"));
        }
        let response = request.form(&form).send().await.map_err(|error| {
            FrevaRestError::BackendUnavailable(format!(
                "could not connect to the OIDC server: {error}"
            ))
        })?;
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        if status.is_client_error() {
            let detail = body
                .get("error_description")
                .or_else(|| body.get("error"))
                .and_then(Value::as_str)
                .unwrap_or("the identity provider rejected the request");
            return Err(FrevaRestError::Unauthenticated(detail.to_string()));
        }
        if !status.is_success() {
            return Err(FrevaRestError::BackendUnavailable(
                "OIDC server error".to_string(),
            ));
        }
        Ok(body)
    }

    /// Fetch userinfo from the identity provider on behalf of a client.
    pub async fn userinfo_upstream(&self, authorization: &str) -> Result<Value, FrevaRestError> {
        let discovery = self.discovery().await?;
        let response = self
            .client
            .get(&discovery.userinfo_endpoint)
            .header(AUTHORIZATION, authorization)
            .send()
            .await
            .map_err(|error| {
                FrevaRestError::BackendUnavailable(format!(
                    "could not connect to the OIDC server: {error}"
                ))
            })?;
        if !response.status().is_success() {
            return Err(FrevaRestError::Unauthenticated(
                "the identity provider rejected the token".to_string(),
            ));
        }
        response.json().await.map_err(|error| {
            FrevaRestError::BackendUnavailable(format!("unreadable userinfo reply: {error}"))
        })
    }

    /// The end-session URL the browser is sent to on logout.
    pub async fn logout_url(&self, post_logout_redirect_uri: Option<&str>) -> Result<String, FrevaRestError> {
        let discovery = self.discovery().await?;
        let endpoint = discovery.end_session_endpoint.ok_or_else(|| {
            FrevaRestError::BackendUnavailable(
                "the identity provider does not support logout".to_string(),
            )
        })?;
        let mut query = vec![("client_id".to_string(), self.config.oidc_client_id.clone())];
        if let Some(uri) = post_logout_redirect_uri {
            query.push(("post_logout_redirect_uri".to_string(), uri.to_string()));
        }
        let rendered: String = query
            .iter()
            .map(|(k, v)| format!("{k}={}", urlencode(v)))
            .collect::<Vec<_>>()
            .join("&");
        Ok(format!("{endpoint}?{rendered}"))
    }
}

/// Minimal percent-encoding for query string values.
pub fn urlencode(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            other => encoded.push_str(&format!("%{other:02X}")),
        }
    }
    encoded
}

/// Resolve a `.`-separated claim path by repeated key descent.
fn walk_claims<'a>(claims: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = claims;
    for key in path.split('.') {
        current = current.get(key)?;
    }
    Some(current)
}

/// Flatten a claim value into the strings a filter pattern is matched
/// against: scalars become one string, arrays match per element.
fn claim_values(value: &Value) -> Vec<String> {
    match value {
        Value::Array(values) => values.iter().flat_map(claim_values).collect(),
        Value::String(s) => vec![s.clone()],
        Value::Number(n) => vec![n.to_string()],
        Value::Bool(b) => vec![b.to_string()],
        _ => vec![],
    }
}

/// Apply claim filters: each filter matches when its pattern matches any of
/// the claim's values (as substring or regular expression); all filters
/// must pass.
pub fn claim_filters_match(filters: &ClaimFilters, claims: &Value) -> bool {
    for (path, patterns) in filters {
        let values = walk_claims(claims, path)
            .map(claim_values)
            .unwrap_or_default();
        for pattern in patterns {
            let matched = match regex::Regex::new(pattern) {
                Ok(re) => values.iter().any(|value| re.is_match(value)),
                Err(_) => values.iter().any(|value| value.contains(pattern.as_str())),
            };
            if !matched {
                return false;
            }
        }
    }
    true
}

/// The claim names, in order of preference, that carry each identity field.
fn first_claim<'a>(claims: &'a Value, names: &[&str]) -> Option<&'a str> {
    for name in names {
        for variant in [
            name.to_string(),
            name.replace('-', "_"),
            name.replace('-', ""),
        ] {
            if let Some(value) = claims.get(&variant).and_then(Value::as_str) {
                if !value.is_empty() {
                    return Some(value);
                }
            }
        }
    }
    None
}

/// Map validated claims to a [Principal].
pub fn principal_from_claims(claims: &Value, is_admin: bool) -> Option<Principal> {
    let sub = claims.get("sub")?.as_str()?.to_string();
    let username = first_claim(claims, &["preferred-username", "user-name", "uid"])?.to_string();
    let email = first_claim(claims, &["email", "mail"]).map(str::to_string);
    let first_name = first_claim(claims, &["first-name", "given-name"])
        .unwrap_or_default()
        .to_string();
    let last_name = first_claim(claims, &["last-name", "family-name", "surname"])
        .unwrap_or_default()
        .to_string();
    let is_guest = match claims.get("is_guest") {
        Some(Value::Bool(guest)) => *guest,
        Some(Value::String(guest)) => guest == "true",
        _ => false,
    };
    Some(Principal {
        sub,
        username,
        email,
        first_name,
        last_name,
        exp: claims.get("exp").and_then(Value::as_i64).unwrap_or(0),
        is_guest,
        is_admin,
    })
}

/// Normalise the identity provider's token response into our [Token].
fn token_from_idp_response(body: &Value) -> Option<Token> {
    let now = chrono::Utc::now().timestamp();
    let expires = body
        .get("exp")
        .or_else(|| body.get("expires"))
        .or_else(|| body.get("expires_at"))
        .and_then(Value::as_i64)
        .unwrap_or_else(|| now + body.get("expires_in").and_then(Value::as_i64).unwrap_or(180));
    let refresh_expires = body
        .get("refresh_exp")
        .or_else(|| body.get("refresh_expires"))
        .or_else(|| body.get("refresh_expires_at"))
        .and_then(Value::as_i64)
        .unwrap_or_else(|| {
            now + body
                .get("refresh_expires_in")
                .and_then(Value::as_i64)
                .unwrap_or(180)
        });
    Some(Token {
        access_token: body.get("access_token")?.as_str()?.to_string(),
        token_type: body.get("token_type")?.as_str()?.to_string(),
        expires,
        refresh_token: body.get("refresh_token")?.as_str()?.to_string(),
        refresh_expires,
        scope: body.get("scope")?.as_str()?.to_string(),
    })
}

/// Extract the bearer token from an Authorization header value.
pub fn bearer_token(header: Option<&str>) -> Option<&str> {
    let header = header?;
    header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
}

// Extractor for routes that require authentication.
#[async_trait]
impl FromRequestParts<SharedAppState> for Principal {
    type Rejection = FrevaRestError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedAppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());
        let token = bearer_token(header).ok_or_else(|| {
            FrevaRestError::Unauthenticated("authorization header is required".to_string())
        })?;
        state.auth.validate_token(token).await
    }
}

/// Extractor for routes where authentication is optional.
pub struct OptionalPrincipal(pub Option<Principal>);

#[async_trait]
impl FromRequestParts<SharedAppState> for OptionalPrincipal {
    type Rejection = FrevaRestError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedAppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());
        match bearer_token(header) {
            Some(token) => match state.auth.validate_token(token).await {
                Ok(principal) => Ok(OptionalPrincipal(Some(principal))),
                Err(_) => Ok(OptionalPrincipal(None)),
            },
            None => Ok(OptionalPrincipal(None)),
        }
    }
}

/// A Unix password database entry, read from `/etc/passwd`.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct PasswdEntry {
    pub pw_name: String,
    pub pw_passwd: String,
    pub pw_uid: u32,
    pub pw_gid: u32,
    pub pw_gecos: String,
    pub pw_dir: String,
    pub pw_shell: String,
}

/// Look up a user in the password database.
pub fn passwd_entry(username: &str) -> Option<PasswdEntry> {
    let content = std::fs::read_to_string("/etc/passwd").ok()?;
    parse_passwd(&content, username)
}

fn parse_passwd(content: &str, username: &str) -> Option<PasswdEntry> {
    for line in content.lines() {
        let fields: Vec<&str> = line.split(':').collect();
        if fields.len() < 7 || fields[0] != username {
            continue;
        }
        return Some(PasswdEntry {
            pw_name: fields[0].to_string(),
            pw_passwd: fields[1].to_string(),
            pw_uid: fields[2].parse().ok()?,
            pw_gid: fields[3].parse().ok()?,
            pw_gecos: fields[4].to_string(),
            pw_dir: fields[5].to_string(),
            pw_shell: fields[6].to_string(),
        });
    }
    None
}

// ---------------------------------------------------------------------------
// HTTP surface
// ---------------------------------------------------------------------------

use axum::extract::{Query as AxumQuery, State};
use axum::http::header::{LOCATION, SET_COOKIE};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Router};

/// Pass through the identity provider's configuration, with the endpoints
/// this service proxies rewritten to point at itself.
async fn well_known(
    State(state): State<SharedAppState>,
) -> Result<Json<Value>, FrevaRestError> {
    Ok(Json(state.auth.rewritten_discovery().await?))
}

/// The localhost ports that are valid code-flow redirect targets.
async fn auth_ports(State(state): State<SharedAppState>) -> Json<Value> {
    Json(serde_json::json!({
        "valid_ports": &state.config.oidc_auth_ports,
    }))
}

#[derive(Debug, Deserialize)]
struct LoginParams {
    redirect_uri: Option<String>,
    #[serde(default)]
    offline_access: bool,
    #[serde(default)]
    prompt: Option<String>,
}

/// Initiate the authorisation code flow: redirect the browser to the
/// identity provider with a generated, single-use `state`.
async fn login(
    State(state): State<SharedAppState>,
    AxumQuery(params): AxumQuery<LoginParams>,
) -> Result<Redirect, FrevaRestError> {
    let redirect_uri = params.redirect_uri.ok_or_else(|| {
        FrevaRestError::InvalidInput("missing redirect_uri".to_string())
    })?;
    if !state.auth.redirect_uri_is_valid(&redirect_uri) {
        return Err(FrevaRestError::InvalidInput(format!(
            "redirect_uri is not an allowed target: {redirect_uri}"
        )));
    }
    let discovery = state.auth.discovery().await?;
    let login_state = state.auth.register_state(&redirect_uri).await;
    let scope = if params.offline_access {
        "openid profile offline_access"
    } else {
        "openid profile"
    };
    let mut query = vec![
        ("response_type".to_string(), "code".to_string()),
        ("client_id".to_string(), state.config.oidc_client_id.clone()),
        (
            "redirect_uri".to_string(),
            format!("{}/api/freva-nextgen/auth/v2/callback", state.config.proxy),
        ),
        ("scope".to_string(), scope.to_string()),
        ("state".to_string(), login_state),
    ];
    if let Some(prompt) = params.prompt.filter(|p| p != "none") {
        query.push(("prompt".to_string(), prompt));
    }
    let rendered: String = query
        .iter()
        .map(|(k, v)| format!("{k}={}", urlencode(v)))
        .collect::<Vec<_>>()
        .join("&");
    Ok(Redirect::temporary(&format!(
        "{}?{rendered}",
        discovery.authorization_endpoint
    )))
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
}

/// Return leg of the code flow: verify the `state` and send the browser
/// back to the client with the authorisation code.
async fn callback(
    State(state): State<SharedAppState>,
    AxumQuery(params): AxumQuery<CallbackParams>,
) -> Result<Redirect, FrevaRestError> {
    let (code, login_state) = match (params.code, params.state) {
        (Some(code), Some(state)) => (code, state),
        _ => {
            return Err(FrevaRestError::InvalidInput(
                "missing code or state".to_string(),
            ));
        }
    };
    let redirect_uri = state.auth.consume_state(&login_state).await.ok_or_else(|| {
        FrevaRestError::Unauthenticated("unknown or expired state".to_string())
    })?;
    let separator = if redirect_uri.contains('?') { '&' } else { '?' };
    Ok(Redirect::temporary(&format!(
        "{redirect_uri}{separator}code={}&state={}",
        urlencode(&code),
        urlencode(&login_state)
    )))
}

#[derive(Debug, Deserialize)]
struct TokenRequest {
    grant_type: Option<String>,
    code: Option<String>,
    redirect_uri: Option<String>,
    refresh_token: Option<String>,
    device_code: Option<String>,
}

/// Exchange an authorisation code, refresh token or device code for
/// tokens.
async fn token(
    State(state): State<SharedAppState>,
    Form(request): Form<TokenRequest>,
) -> Result<Json<Token>, FrevaRestError> {
    let grant_type = request.grant_type.as_deref().unwrap_or("");
    let mut form: Vec<(String, String)> = Vec::new();
    match grant_type {
        "authorization_code" => {
            let code = request.code.ok_or_else(|| {
                FrevaRestError::InvalidInput("missing code".to_string())
            })?;
            let redirect_uri = request.redirect_uri.unwrap_or_else(|| {
                format!("{}/api/freva-nextgen/auth/v2/callback", state.config.proxy)
            });
            form.push(("grant_type".to_string(), "authorization_code".to_string()));
            form.push(("code".to_string(), code));
            form.push(("redirect_uri".to_string(), redirect_uri));
        }
        "refresh_token" => {
            let refresh_token = request.refresh_token.ok_or_else(|| {
                FrevaRestError::InvalidInput("missing refresh_token".to_string())
            })?;
            form.push(("grant_type".to_string(), "refresh_token".to_string()));
            form.push(("refresh_token".to_string(), refresh_token));
        }
        "urn:ietf:params:oauth:grant-type:device_code" => {
            let device_code = request.device_code.ok_or_else(|| {
                FrevaRestError::InvalidInput("missing device_code".to_string())
            })?;
            form.push((
                "grant_type".to_string(),
                "urn:ietf:params:oauth:grant-type:device_code".to_string(),
            ));
            form.push(("device_code".to_string(), device_code));
        }
        other => {
            return Err(FrevaRestError::InvalidInput(format!(
                "unsupported grant_type: {other}"
            )));
        }
    }
    Ok(Json(state.auth.exchange_token(&form).await?))
}

/// Start the device authorisation flow.
async fn device(State(state): State<SharedAppState>) -> Result<Json<Value>, FrevaRestError> {
    let reply = state.auth.start_device_flow().await?;
    for field in ["device_code", "user_code", "verification_uri", "expires_in"] {
        if reply.get(field).is_none() {
            return Err(FrevaRestError::BackendUnavailable(format!(
                "malformed device authorisation reply, missing: {field}"
            )));
        }
    }
    let mut reply = reply;
    if let Some(object) = reply.as_object_mut() {
        object.entry("interval").or_insert(Value::from(5));
    }
    Ok(Json(reply))
}

/// Check the status of an access token.
async fn token_status(principal: Principal) -> Json<Value> {
    Json(serde_json::json!({
        "sub": principal.sub,
        "exp": principal.exp,
        "email": principal.email,
    }))
}

/// Basic user info for the current token.
async fn userinfo(
    State(state): State<SharedAppState>,
    parts: axum::http::HeaderMap,
    principal: Principal,
) -> Result<Json<Value>, FrevaRestError> {
    let mut principal = principal;
    if principal.first_name.is_empty() && principal.last_name.is_empty() {
        // The access token may be slim; ask the identity provider.
        if let Some(authorization) = parts.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) {
            if let Ok(upstream) = state.auth.userinfo_upstream(authorization).await {
                if let Some(given) = upstream.get("given_name").and_then(Value::as_str) {
                    principal.first_name = given.to_string();
                }
                if let Some(family) = upstream.get("family_name").and_then(Value::as_str) {
                    principal.last_name = family.to_string();
                }
                if principal.email.is_none() {
                    principal.email = upstream
                        .get("email")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                }
            }
        }
    }
    let home = passwd_entry(&principal.username)
        .map(|entry| entry.pw_dir)
        .unwrap_or_default();
    Ok(Json(serde_json::json!({
        "username": principal.username,
        "first_name": principal.first_name,
        "last_name": principal.last_name,
        "email": principal.email,
        "home": home,
        "is_guest": principal.is_guest,
    })))
}

/// The password database entry of the token's user.
async fn systemuser(principal: Principal) -> Result<Json<PasswdEntry>, FrevaRestError> {
    if principal.is_guest {
        return Err(FrevaRestError::Forbidden(
            "guests have no system user".to_string(),
        ));
    }
    let entry = passwd_entry(&principal.username).ok_or_else(|| {
        FrevaRestError::NotFound(format!("unknown system user: {}", principal.username))
    })?;
    Ok(Json(entry))
}

/// Report the canonical username iff the principal is a primary user.
async fn checkuser(principal: Principal) -> Result<Json<Value>, FrevaRestError> {
    if principal.is_guest {
        return Err(FrevaRestError::Forbidden(
            "guests are not primary users".to_string(),
        ));
    }
    let entry = passwd_entry(&principal.username).ok_or_else(|| {
        FrevaRestError::NotFound(format!("not a primary user: {}", principal.username))
    })?;
    Ok(Json(serde_json::json!({ "pw_name": entry.pw_name })))
}

#[derive(Debug, Deserialize)]
struct LogoutParams {
    post_logout_redirect_uri: Option<String>,
}

/// End the session: clear the session cookie and send the browser to the
/// identity provider's end-session endpoint.
async fn logout(
    State(state): State<SharedAppState>,
    AxumQuery(params): AxumQuery<LogoutParams>,
) -> Result<Response, FrevaRestError> {
    let url = state
        .auth
        .logout_url(params.post_logout_redirect_uri.as_deref())
        .await?;
    Ok((
        StatusCode::TEMPORARY_REDIRECT,
        [
            (LOCATION, url),
            (
                SET_COOKIE,
                "session=; Path=/; Max-Age=0; HttpOnly".to_string(),
            ),
        ],
    )
        .into_response())
}

/// The `/auth/v2/*` routes.
pub fn router() -> Router<SharedAppState> {
    Router::new()
        .route(
            "/api/freva-nextgen/auth/v2/.well-known/openid-configuration",
            get(well_known),
        )
        .route("/api/freva-nextgen/auth/v2/auth-ports", get(auth_ports))
        .route("/api/freva-nextgen/auth/v2/login", get(login))
        .route("/api/freva-nextgen/auth/v2/callback", get(callback))
        .route("/api/freva-nextgen/auth/v2/token", post(token))
        .route("/api/freva-nextgen/auth/v2/device", post(device))
        .route("/api/freva-nextgen/auth/v2/status", get(token_status))
        .route("/api/freva-nextgen/auth/v2/userinfo", get(userinfo))
        .route("/api/freva-nextgen/auth/v2/systemuser", get(systemuser))
        .route("/api/freva-nextgen/auth/v2/checkuser", get(checkuser))
        .route("/api/freva-nextgen/auth/v2/logout", get(logout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::CommandLineArgs;
    use clap::Parser;
    use serde_json::json;

    fn config(argv: &[&str]) -> ServerConfig {
        let mut full = vec!["freva-rest"];
        full.extend_from_slice(argv);
        ServerConfig::new(&CommandLineArgs::parse_from(full)).unwrap()
    }

    #[test]
    fn claim_filters_walk_nested_paths() {
        let claims = json!({
            "realm_access": {"roles": ["user", "freva-admin"]},
            "email": "jane@dkrz.de",
        });
        let filters = crate::config::parse_claim_filters("realm_access.roles:freva-admin");
        assert!(claim_filters_match(&filters, &claims));
        let filters = crate::config::parse_claim_filters("realm_access.roles:operator");
        assert!(!claim_filters_match(&filters, &claims));
        let filters = crate::config::parse_claim_filters("email:.*@dkrz\\.de");
        assert!(claim_filters_match(&filters, &claims));
        let filters = crate::config::parse_claim_filters("missing.claim:anything");
        assert!(!claim_filters_match(&filters, &claims));
    }

    #[test]
    fn all_filters_must_pass() {
        let claims = json!({"groups": ["a"], "org": "dkrz"});
        let filters =
            crate::config::parse_claim_filters("groups:a,org:dkrz");
        assert!(claim_filters_match(&filters, &claims));
        let filters = crate::config::parse_claim_filters("groups:a,org:mpim");
        assert!(!claim_filters_match(&filters, &claims));
    }

    #[test]
    fn principal_prefers_preferred_username() {
        let claims = json!({
            "sub": "abc-123",
            "preferred_username": "janedoe",
            "given_name": "Jane",
            "family_name": "Doe",
            "email": "jane@dkrz.de",
            "exp": 1234,
            "is_guest": false,
        });
        let principal = principal_from_claims(&claims, true).unwrap();
        assert_eq!(principal.username, "janedoe");
        assert_eq!(principal.first_name, "Jane");
        assert_eq!(principal.email.as_deref(), Some("jane@dkrz.de"));
        assert!(principal.is_admin);
        assert!(!principal.is_guest);
    }

    #[test]
    fn principal_falls_back_to_uid() {
        let claims = json!({"sub": "abc", "uid": "jdoe", "exp": 1});
        let principal = principal_from_claims(&claims, false).unwrap();
        assert_eq!(principal.username, "jdoe");
        let claims = json!({"sub": "abc", "exp": 1});
        assert!(principal_from_claims(&claims, false).is_none());
    }

    #[test]
    fn guest_flag_accepts_strings() {
        let claims = json!({"sub": "s", "uid": "u", "is_guest": "true"});
        assert!(principal_from_claims(&claims, false).unwrap().is_guest);
    }

    #[test]
    fn redirect_uris_are_restricted() {
        let config = config(&["--proxy", "https://www.freva.dkrz.de", "--oidc-auth-ports", "8085,8086"]);
        let auth = AuthMediator::new(config);
        assert!(auth.redirect_uri_is_valid("https://www.freva.dkrz.de/callback"));
        assert!(auth.redirect_uri_is_valid("http://localhost:8085/callback"));
        assert!(auth.redirect_uri_is_valid("http://127.0.0.1:8086/"));
        assert!(!auth.redirect_uri_is_valid("http://localhost:9999/callback"));
        assert!(!auth.redirect_uri_is_valid("https://evil.example.org/"));
        assert!(!auth.redirect_uri_is_valid("not a url"));
    }

    #[tokio::test]
    async fn states_are_single_use() {
        let auth = AuthMediator::new(config(&[]));
        let state = auth.register_state("http://localhost:8085/cb").await;
        assert_eq!(
            auth.consume_state(&state).await.as_deref(),
            Some("http://localhost:8085/cb")
        );
        assert!(auth.consume_state(&state).await.is_none());
        assert!(auth.consume_state("unknown").await.is_none());
    }

    #[test]
    fn token_normalisation_prefers_expiry_fields() {
        let body = json!({
            "access_token": "at",
            "token_type": "bearer",
            "refresh_token": "rt",
            "scope": "openid",
            "expires": 1000,
            "refresh_expires": 2000,
        });
        let token = token_from_idp_response(&body).unwrap();
        assert_eq!(token.expires, 1000);
        assert_eq!(token.refresh_expires, 2000);

        let body = json!({
            "access_token": "at",
            "token_type": "bearer",
            "refresh_token": "rt",
            "scope": "openid",
            "expires_in": 300,
        });
        let token = token_from_idp_response(&body).unwrap();
        assert!(token.expires >= chrono::Utc::now().timestamp() + 299);
    }

    #[test]
    fn passwd_lines_are_parsed() {
        let content = "root:x:0:0:root:/root:/bin/bash\njane:x:1001:1001:Jane Doe:/home/jane:/bin/zsh\n";
        let entry = parse_passwd(content, "jane").unwrap();
        assert_eq!(entry.pw_name, "jane");
        assert_eq!(entry.pw_uid, 1001);
        assert_eq!(entry.pw_dir, "/home/jane");
        assert!(parse_passwd(content, "john").is_none());
    }

    #[test]
    fn bearer_tokens_are_extracted() {
        assert_eq!(bearer_token(Some("Bearer abc")), Some("abc"));
        assert_eq!(bearer_token(Some("bearer abc")), Some("abc"));
        assert_eq!(bearer_token(Some("Basic abc")), None);
        assert_eq!(bearer_token(None), None);
    }

    #[test]
    fn query_values_are_percent_encoded() {
        assert_eq!(
            urlencode("http://localhost:8080/cb?a=1"),
            "http%3A%2F%2Flocalhost%3A8080%2Fcb%3Fa%3D1"
        );
    }
}
