//! Flavour registry.
//!
//! A flavour is a named vocabulary that maps the canonical field set onto
//! domain-specific facet names (the various Data Reference Syntax standards).
//! The registry owns the built-in flavours, loads user defined flavours from
//! the document store through a read-mostly cache and hands out [Translator]
//! values that canonicalise inbound query keys and de-canonicalise outbound
//! document fields.

use crate::error::FrevaRestError;
use crate::store::{FlavourRecord, MongoStore, GLOBAL_OWNER};

use std::collections::HashMap;
use std::fmt;

use chrono::Utc;
use tokio::sync::RwLock;

/// The canonical field set every search document exposes.
pub const CANONICAL_FIELDS: [&str; 26] = [
    "project",
    "product",
    "institute",
    "model",
    "experiment",
    "ensemble",
    "realm",
    "variable",
    "time_frequency",
    "time_aggregation",
    "cmor_table",
    "grid_label",
    "grid_id",
    "level_type",
    "format",
    "dataset",
    "driving_model",
    "rcm_name",
    "rcm_version",
    "fs_type",
    "file",
    "uri",
    "time",
    "bbox",
    "version",
    "user",
];

/// The facet hierarchy that defines a dataset; also the intake-ESM group key.
pub const DATASET_HIERARCHY: [&str; 12] = [
    "project",
    "product",
    "institute",
    "model",
    "experiment",
    "time_frequency",
    "realm",
    "variable",
    "ensemble",
    "cmor_table",
    "fs_type",
    "grid_label",
];

/// The facets shown first by clients.
pub const PRIMARY_FACETS: [&str; 10] = [
    "project",
    "product",
    "institute",
    "model",
    "experiment",
    "time_frequency",
    "realm",
    "variable",
    "ensemble",
    "time_aggregation",
];

/// The canonical fields clients can facet on. The unique keys, the spatial
/// and temporal ranges and the version field are queried through dedicated
/// syntax instead.
pub fn search_facets() -> Vec<&'static str> {
    CANONICAL_FIELDS
        .iter()
        .copied()
        .filter(|field| !matches!(*field, "file" | "uri" | "bbox" | "version"))
        .collect()
}

/// The built-in, immutable flavours.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BuiltInFlavour {
    Freva,
    Cmip5,
    Cmip6,
    Cordex,
    Nextgems,
    User,
}

impl BuiltInFlavour {
    pub const ALL: [BuiltInFlavour; 6] = [
        BuiltInFlavour::Freva,
        BuiltInFlavour::Cmip6,
        BuiltInFlavour::Cmip5,
        BuiltInFlavour::Cordex,
        BuiltInFlavour::Nextgems,
        BuiltInFlavour::User,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BuiltInFlavour::Freva => "freva",
            BuiltInFlavour::Cmip5 => "cmip5",
            BuiltInFlavour::Cmip6 => "cmip6",
            BuiltInFlavour::Cordex => "cordex",
            BuiltInFlavour::Nextgems => "nextgems",
            BuiltInFlavour::User => "user",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.as_str() == name)
    }

    /// The canonical-to-flavour renames this standard applies. Fields that
    /// are not listed keep their canonical name.
    fn renames(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            BuiltInFlavour::Freva | BuiltInFlavour::User => &[],
            BuiltInFlavour::Cmip5 => &[
                ("ensemble", "member_id"),
                ("institute", "institution_id"),
                ("model", "model_id"),
            ],
            BuiltInFlavour::Cmip6 => &[
                ("experiment", "experiment_id"),
                ("ensemble", "member_id"),
                ("institute", "institution_id"),
                ("model", "source_id"),
                ("project", "mip_era"),
                ("product", "activity_id"),
                ("variable", "variable_id"),
                ("time_frequency", "frequency"),
                ("cmor_table", "table_id"),
            ],
            BuiltInFlavour::Cordex => &[("institute", "institution"), ("product", "domain")],
            BuiltInFlavour::Nextgems => &[
                ("ensemble", "member_id"),
                ("institute", "institution_id"),
                ("model", "source_id"),
                ("product", "experiment_id"),
                ("variable", "variable_id"),
                ("time_aggregation", "time_reduction"),
            ],
        }
    }
}

/// A resolved flavour: either one of the immutable built-ins or a stored
/// user definition addressed by `(owner, name)`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Flavour {
    BuiltIn(BuiltInFlavour),
    User { owner: String, name: String },
}

impl Flavour {
    pub fn name(&self) -> &str {
        match self {
            Flavour::BuiltIn(builtin) => builtin.as_str(),
            Flavour::User { name, .. } => name,
        }
    }
}

impl fmt::Display for Flavour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Flavour::BuiltIn(builtin) => write!(f, "{}", builtin.as_str()),
            Flavour::User { owner, name } => write!(f, "{owner}:{name}"),
        }
    }
}

/// Translates facet names between a flavour vocabulary and the canonical
/// field set, in both directions.
#[derive(Clone, Debug)]
pub struct Translator {
    pub flavour: Flavour,
    /// Whether outbound fields are translated at all.
    pub translate: bool,
    forward: HashMap<String, String>,
    backward: HashMap<String, String>,
}

impl Translator {
    /// Build a translator from a canonical-to-flavour rename mapping.
    /// Canonical fields absent from the mapping keep their name.
    pub fn new(flavour: Flavour, renames: &HashMap<String, String>, translate: bool) -> Self {
        let mut forward = HashMap::with_capacity(CANONICAL_FIELDS.len());
        for field in CANONICAL_FIELDS {
            let target = renames.get(field).cloned().unwrap_or_else(|| field.to_string());
            forward.insert(field.to_string(), target);
        }
        let backward = forward
            .iter()
            .map(|(canonical, name)| (name.clone(), canonical.clone()))
            .collect();
        Self {
            flavour,
            translate,
            forward,
            backward,
        }
    }

    pub fn for_builtin(builtin: BuiltInFlavour, translate: bool) -> Self {
        let renames = builtin
            .renames()
            .iter()
            .map(|(canonical, name)| (canonical.to_string(), name.to_string()))
            .collect();
        Self::new(Flavour::BuiltIn(builtin), &renames, translate)
    }

    /// All facet names valid on the query side of this flavour.
    pub fn valid_facets(&self) -> Vec<String> {
        let mut facets: Vec<String> = if self.translate {
            self.backward.keys().cloned().collect()
        } else {
            self.forward.keys().cloned().collect()
        };
        facets.sort();
        facets
    }

    /// The flavour-specific names of the primary facets. The cordex
    /// standard promotes the keys that make a regional dataset.
    pub fn primary_facets(&self) -> Vec<String> {
        let mut facets: Vec<String> = PRIMARY_FACETS.iter().map(|f| self.facet_out(f)).collect();
        if self.flavour == Flavour::BuiltIn(BuiltInFlavour::Cordex) {
            for key in ["rcm_name", "driving_model", "rcm_version"] {
                facets.push(self.facet_out(key));
            }
        }
        facets
    }

    /// Canonicalise one inbound query key. Unknown keys are an error.
    pub fn facet_in(&self, key: &str) -> Result<String, FrevaRestError> {
        let known = if self.translate {
            self.backward.get(key).cloned()
        } else {
            // Client-side translation: keys must already be canonical.
            self.forward.get(key).map(|_| key.to_string())
        };
        known.ok_or_else(|| {
            FrevaRestError::InvalidInput(format!(
                "no such facet in flavour '{}': {key}",
                self.flavour
            ))
        })
    }

    /// De-canonicalise one outbound field name. Fields absent from the
    /// mapping pass through under their canonical name.
    pub fn facet_out(&self, canonical: &str) -> String {
        if !self.translate {
            return canonical.to_string();
        }
        self.forward
            .get(canonical)
            .cloned()
            .unwrap_or_else(|| canonical.to_string())
    }

    /// Canonicalise all keys of a query, keeping the values untouched
    /// (wildcard and regex syntax is resolved later, at search time).
    pub fn translate_in(
        &self,
        pairs: &[(String, Vec<String>)],
    ) -> Result<Vec<(String, Vec<String>)>, FrevaRestError> {
        pairs
            .iter()
            .map(|(key, values)| {
                // `<key>_not_` negates; the marker is not part of the name.
                let (bare, negated) = match key.strip_suffix("_not_") {
                    Some(bare) => (bare, true),
                    None => (key.as_str(), false),
                };
                let mut canonical = self.facet_in(bare)?;
                if negated {
                    canonical.push_str("_not_");
                }
                Ok((canonical, values.clone()))
            })
            .collect()
    }

    /// De-canonicalise the keys of an outbound document or facet map.
    pub fn translate_out<V: Clone>(&self, fields: &[(String, V)]) -> Vec<(String, V)> {
        fields
            .iter()
            .map(|(key, value)| (self.facet_out(key), value.clone()))
            .collect()
    }
}

/// Definition of a user flavour as supplied by clients.
#[derive(Clone, Debug)]
pub struct FlavourDefinition {
    pub name: String,
    pub mapping: HashMap<String, String>,
    pub global: bool,
}

/// Validate a flavour name: letters, digits, underscores and hyphens only,
/// and no clash with the built-in names.
pub fn validate_flavour_name(name: &str) -> Result<(), FrevaRestError> {
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(FrevaRestError::InvalidInput(format!(
            "flavour name may only contain letters, numbers, underscores and hyphens: {name}"
        )));
    }
    if BuiltInFlavour::from_name(name).is_some() {
        return Err(FrevaRestError::Immutable(name.to_string()));
    }
    Ok(())
}

/// Validate a flavour mapping: keys must be canonical fields and the mapping
/// must be injective.
pub fn validate_mapping(mapping: &HashMap<String, String>) -> Result<(), FrevaRestError> {
    for key in mapping.keys() {
        if !CANONICAL_FIELDS.contains(&key.as_str()) {
            return Err(FrevaRestError::InvalidInput(format!(
                "not a canonical field: {key}"
            )));
        }
    }
    let mut seen = Vec::with_capacity(mapping.len());
    for value in mapping.values() {
        if value.is_empty() {
            return Err(FrevaRestError::InvalidInput(
                "facet names must not be empty".to_string(),
            ));
        }
        if seen.contains(&value) {
            return Err(FrevaRestError::InvalidInput(format!(
                "mapping is not injective, '{value}' appears twice"
            )));
        }
        seen.push(value);
    }
    Ok(())
}

/// The registry of built-in and stored flavours.
pub struct FlavourRegistry {
    store: MongoStore,
    /// Read-mostly cache of stored flavours, keyed by `(owner, name)`.
    /// Cleared on any successful write.
    cache: RwLock<HashMap<(String, String), FlavourRecord>>,
}

impl FlavourRegistry {
    pub fn new(store: MongoStore) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve a flavour path (`name` or `owner:name`) to a translator.
    /// Bare names resolve built-ins first, then the caller's own flavours,
    /// then global ones.
    pub async fn resolve(
        &self,
        path: &str,
        username: Option<&str>,
        translate: bool,
    ) -> Result<Translator, FrevaRestError> {
        let (owner, name) = match path.split_once(':') {
            Some((owner, name)) => (Some(owner), name),
            None => (None, path),
        };
        if owner.is_none() {
            if let Some(builtin) = BuiltInFlavour::from_name(name) {
                return Ok(Translator::for_builtin(builtin, translate));
            }
        }
        let mut candidates: Vec<(&str, &str)> = Vec::new();
        match owner {
            Some(owner) => candidates.push((owner, name)),
            None => {
                if let Some(username) = username {
                    candidates.push((username, name));
                }
                candidates.push((GLOBAL_OWNER, name));
            }
        }
        for (owner, name) in candidates {
            if let Some(record) = self.lookup(owner, name).await? {
                return Ok(Translator::new(
                    Flavour::User {
                        owner: record.owner.clone(),
                        name: record.name.clone(),
                    },
                    &record.mapping,
                    translate,
                ));
            }
        }
        Err(FrevaRestError::NotFound(format!("no such flavour: {path}")))
    }

    async fn lookup(
        &self,
        owner: &str,
        name: &str,
    ) -> Result<Option<FlavourRecord>, FrevaRestError> {
        let key = (owner.to_string(), name.to_string());
        {
            let cache = self.cache.read().await;
            if let Some(record) = cache.get(&key) {
                return Ok(Some(record.clone()));
            }
        }
        let record = self.store.find_flavour(name, owner).await?;
        if let Some(record) = &record {
            self.cache.write().await.insert(key, record.clone());
        }
        Ok(record)
    }

    async fn invalidate(&self) {
        self.cache.write().await.clear();
    }

    /// List the flavours visible to a user: built-ins, global ones and the
    /// user's own.
    pub async fn list(&self, username: Option<&str>) -> Result<Vec<FlavourRecord>, FrevaRestError> {
        self.store.list_flavours(username).await
    }

    /// Create a new user flavour.
    pub async fn create(
        &self,
        definition: &FlavourDefinition,
        username: &str,
        is_admin: bool,
    ) -> Result<FlavourRecord, FrevaRestError> {
        validate_flavour_name(&definition.name)?;
        validate_mapping(&definition.mapping)?;
        let owner = self.resolve_owner(definition.global, username, is_admin)?;
        if self.store.find_flavour(&definition.name, &owner).await?.is_some() {
            return Err(FrevaRestError::Conflict(format!(
                "flavour '{}' already exists",
                definition.name
            )));
        }
        let record = FlavourRecord {
            name: definition.name.clone(),
            owner,
            mapping: definition.mapping.clone(),
            created_at: Utc::now().to_rfc3339(),
        };
        self.store.insert_flavour(&record).await?;
        self.invalidate().await;
        Ok(record)
    }

    /// Update an existing user flavour, optionally renaming it. Unchanged
    /// mapping keys retain their prior values.
    pub async fn update(
        &self,
        name: &str,
        new_name: Option<&str>,
        mapping: &HashMap<String, String>,
        global: bool,
        username: &str,
        is_admin: bool,
    ) -> Result<FlavourRecord, FrevaRestError> {
        if BuiltInFlavour::from_name(name).is_some() {
            return Err(FrevaRestError::Immutable(name.to_string()));
        }
        validate_mapping(mapping)?;
        let owner = self.resolve_owner(global, username, is_admin)?;
        let existing = self
            .store
            .find_flavour(name, &owner)
            .await?
            .ok_or_else(|| FrevaRestError::NotFound(format!("no such flavour: {name}")))?;
        let target_name = new_name.unwrap_or(name);
        if target_name != name {
            validate_flavour_name(target_name)?;
            if self.store.find_flavour(target_name, &owner).await?.is_some() {
                return Err(FrevaRestError::Conflict(format!(
                    "flavour '{target_name}' already exists"
                )));
            }
        }
        let mut merged = existing.mapping.clone();
        for (key, value) in mapping {
            merged.insert(key.clone(), value.clone());
        }
        let record = FlavourRecord {
            name: target_name.to_string(),
            owner,
            mapping: merged,
            created_at: existing.created_at,
        };
        self.store.replace_flavour(name, &record.owner, &record).await?;
        self.invalidate().await;
        Ok(record)
    }

    /// Delete a user flavour.
    pub async fn delete(
        &self,
        name: &str,
        global: bool,
        username: &str,
        is_admin: bool,
    ) -> Result<(), FrevaRestError> {
        if BuiltInFlavour::from_name(name).is_some() {
            return Err(FrevaRestError::Immutable(name.to_string()));
        }
        let owner = self.resolve_owner(global, username, is_admin)?;
        if !self.store.delete_flavour(name, &owner).await? {
            return Err(FrevaRestError::NotFound(format!("no such flavour: {name}")));
        }
        self.invalidate().await;
        Ok(())
    }

    fn resolve_owner(
        &self,
        global: bool,
        username: &str,
        is_admin: bool,
    ) -> Result<String, FrevaRestError> {
        if global {
            if !is_admin {
                return Err(FrevaRestError::Forbidden(
                    "only admins may manage global flavours".to_string(),
                ));
            }
            Ok(GLOBAL_OWNER.to_string())
        } else {
            Ok(username.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmip6() -> Translator {
        Translator::for_builtin(BuiltInFlavour::Cmip6, true)
    }

    #[test]
    fn inbound_keys_use_the_flavour_vocabulary() {
        let translator = cmip6();
        assert_eq!(translator.facet_in("variable_id").unwrap(), "variable");
        assert_eq!(translator.facet_in("mip_era").unwrap(), "project");
        assert_eq!(translator.facet_in("realm").unwrap(), "realm");
        assert!(translator.facet_in("variable").is_err());
        assert!(translator.facet_in("banana").is_err());
    }

    #[test]
    fn outbound_fields_pass_through_when_unmapped() {
        let translator = cmip6();
        assert_eq!(translator.facet_out("variable"), "variable_id");
        assert_eq!(translator.facet_out("realm"), "realm");
        // Extended facets keep their index-level name.
        assert_eq!(translator.facet_out("extra_facet"), "extra_facet");
    }

    #[test]
    fn negated_keys_keep_their_marker() {
        let translator = cmip6();
        let pairs = vec![("source_id_not_".to_string(), vec!["mpi*".to_string()])];
        let canonical = translator.translate_in(&pairs).unwrap();
        assert_eq!(canonical[0].0, "model_not_");
        assert_eq!(canonical[0].1, vec!["mpi*".to_string()]);
    }

    #[test]
    fn round_trip_is_identity_on_mapped_fields() {
        for builtin in BuiltInFlavour::ALL {
            let translator = Translator::for_builtin(builtin, true);
            for field in CANONICAL_FIELDS {
                let out = translator.facet_out(field);
                assert_eq!(
                    translator.facet_in(&out).unwrap(),
                    field,
                    "round trip failed for {field} in {builtin:?}"
                );
            }
        }
    }

    #[test]
    fn user_flavour_overlays_canonical_identity() {
        let mapping = HashMap::from([("model".to_string(), "m2".to_string())]);
        let translator = Translator::new(
            Flavour::User {
                owner: "janedoe".to_string(),
                name: "my1".to_string(),
            },
            &mapping,
            true,
        );
        assert_eq!(translator.facet_in("m2").unwrap(), "model");
        assert_eq!(translator.facet_in("project").unwrap(), "project");
        assert!(translator.facet_in("model").is_err());
    }

    #[test]
    fn translate_disabled_accepts_canonical_keys() {
        let translator = Translator::for_builtin(BuiltInFlavour::Cmip6, false);
        assert_eq!(translator.facet_in("variable").unwrap(), "variable");
        assert_eq!(translator.facet_out("variable"), "variable");
        assert!(translator.facet_in("variable_id").is_err());
    }

    #[test]
    fn builtin_names_are_immutable() {
        assert!(matches!(
            validate_flavour_name("cmip6"),
            Err(FrevaRestError::Immutable(_))
        ));
        assert!(validate_flavour_name("nextgem-2").is_ok());
        assert!(validate_flavour_name("no spaces").is_err());
    }

    #[test]
    fn mappings_must_be_injective_over_canonical_fields() {
        let valid = HashMap::from([
            ("model".to_string(), "source_id".to_string()),
            ("project".to_string(), "mip_era".to_string()),
        ]);
        assert!(validate_mapping(&valid).is_ok());

        let unknown_key = HashMap::from([("banana".to_string(), "x".to_string())]);
        assert!(validate_mapping(&unknown_key).is_err());

        let duplicate_value = HashMap::from([
            ("model".to_string(), "same".to_string()),
            ("project".to_string(), "same".to_string()),
        ]);
        assert!(validate_mapping(&duplicate_value).is_err());
    }
}
