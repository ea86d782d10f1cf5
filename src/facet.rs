//! Facet value syntax.
//!
//! Each `key=value` search constraint supports exact matches, `*` wildcards,
//! `/…/` regular expressions, `{a,b}` disjunctions, repeated keys
//! (disjunction) and `key_not_` negation. Values are rendered into Lucene
//! clauses; combination across different keys is conjunctive. Matching is
//! case-insensitive: the index stores lowercased facet values, so values are
//! lowercased here, except for the unique keys `file` and `uri` which are
//! indexed verbatim.

use crate::error::FrevaRestError;

/// The unique keys of the indexing system.
pub const UNIQ_KEYS: [&str; 2] = ["file", "uri"];

/// Lucene special characters that need escaping in plain values.
/// `*` is deliberately absent so wildcards pass through to the backend.
const ESCAPE_CHARS: [&str; 16] = [
    "\\", "+", "-", "&&", "||", "!", "(", ")", "{", "}", "[", "]", "^", "~", ":", "/",
];

/// One rendered constraint for a single canonical key.
#[derive(Debug, PartialEq)]
pub struct FacetClause {
    pub key: String,
    /// Lucene-rendered values that must match (OR-ed).
    pub positive: Vec<String>,
    /// Lucene-rendered values that must not match (OR-ed under negation,
    /// which makes repeated negations compose conjunctively).
    pub negative: Vec<String>,
}

impl FacetClause {
    /// Render the clause as a Lucene filter query, or `None` for an empty
    /// clause.
    pub fn to_query(&self) -> Option<String> {
        let mut parts = Vec::new();
        if !self.positive.is_empty() {
            parts.push(format!("{}:({})", self.key, self.positive.join(" OR ")));
        }
        if !self.negative.is_empty() {
            parts.push(format!("-{}:({})", self.key, self.negative.join(" OR ")));
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" AND "))
        }
    }
}

/// Escape Lucene special characters in a plain (non-regex) value.
pub fn escape_lucene(value: &str) -> String {
    let mut escaped = value.to_string();
    for c in ESCAPE_CHARS {
        if escaped.contains(c) {
            escaped = escaped.replace(c, &format!("\\{c}"));
        }
    }
    escaped.replace('"', "\\\"")
}

/// Render one value into its Lucene form: regexes pass through untouched,
/// braces expand to a disjunction, everything else is escaped (wildcards
/// excepted).
fn render_values(key: &str, value: &str) -> Vec<String> {
    let value = if UNIQ_KEYS.contains(&key) {
        value.to_string()
    } else {
        value.to_lowercase()
    };
    if value.len() > 2 && value.starts_with('/') && value.ends_with('/') {
        // Regular expression, handed to the backend verbatim.
        return vec![value];
    }
    if value.len() > 1 && value.starts_with('{') && value.ends_with('}') {
        return value[1..value.len() - 1]
            .split(',')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(escape_lucene)
            .collect();
    }
    vec![escape_lucene(&value)]
}

/// Build the Lucene clause for one canonical key from all its values.
///
/// A `_not_` suffix on the key negates every value; in addition single
/// values may carry a `not ` / `!` / `-` negation prefix.
pub fn build_clause(key: &str, values: &[String]) -> Result<FacetClause, FrevaRestError> {
    let (bare, key_negated) = match key.strip_suffix("_not_") {
        Some(bare) => (bare, true),
        None => (key, false),
    };
    if bare.is_empty() {
        return Err(FrevaRestError::InvalidInput("empty facet key".to_string()));
    }
    let mut positive = Vec::new();
    let mut negative = Vec::new();
    for raw in values {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let (value, negated) = if let Some(stripped) = raw.strip_prefix("not ") {
            (stripped, true)
        } else if let Some(stripped) = raw.strip_prefix('!') {
            (stripped, true)
        } else if let Some(stripped) = raw.strip_prefix('-') {
            (stripped, true)
        } else {
            (raw, false)
        };
        let rendered = render_values(bare, value);
        if negated || key_negated {
            negative.extend(rendered);
        } else {
            positive.extend(rendered);
        }
    }
    Ok(FacetClause {
        key: bare.to_string(),
        positive,
        negative,
    })
}

/// Build the conjunctive filter query over all canonical facet constraints.
/// Returns `*:*` when there is nothing to constrain.
pub fn build_filter_query(
    facets: &[(String, Vec<String>)],
) -> Result<String, FrevaRestError> {
    let mut clauses = Vec::new();
    for (key, values) in facets {
        if let Some(query) = build_clause(key, values)?.to_query() {
            clauses.push(query);
        }
    }
    if clauses.is_empty() {
        Ok("*:*".to_string())
    } else {
        Ok(clauses.join(" AND "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn bare_value_is_escaped_and_lowercased() {
        let clause = build_clause("model", &values(&["MPI-ESM:HR"])).unwrap();
        assert_eq!(clause.to_query().unwrap(), r"model:(mpi\-esm\:hr)");
    }

    #[test]
    fn wildcards_pass_through() {
        let clause = build_clause("model", &values(&["cp*"])).unwrap();
        assert_eq!(clause.to_query().unwrap(), "model:(cp*)");
        let clause = build_clause("model", &values(&["*esm*"])).unwrap();
        assert_eq!(clause.to_query().unwrap(), "model:(*esm*)");
    }

    #[test]
    fn regex_values_are_untouched() {
        let clause = build_clause("variable", &values(&["/ta.?s/"])).unwrap();
        assert_eq!(clause.to_query().unwrap(), "variable:(/ta.?s/)");
    }

    #[test]
    fn braces_expand_to_a_disjunction() {
        let clause = build_clause("experiment", &values(&["{historical,ssp585}"])).unwrap();
        assert_eq!(
            clause.to_query().unwrap(),
            "experiment:(historical OR ssp585)"
        );
    }

    #[test]
    fn repeated_keys_are_a_disjunction() {
        let clause = build_clause("variable", &values(&["tas", "pr"])).unwrap();
        assert_eq!(clause.to_query().unwrap(), "variable:(tas OR pr)");
    }

    #[test]
    fn negated_key_composes_conjunctively() {
        let clause = build_clause("model_not_", &values(&["cpc", "era5"])).unwrap();
        assert_eq!(clause.to_query().unwrap(), "-model:(cpc OR era5)");
    }

    #[test]
    fn value_negation_prefixes() {
        let clause = build_clause("model", &values(&["not cpc", "!era5", "-merra"])).unwrap();
        assert_eq!(clause.to_query().unwrap(), "-model:(cpc OR era5 OR merra)");
    }

    #[test]
    fn mixed_positive_and_negative() {
        let clause = build_clause("model", &values(&["cp*", "!cpc"])).unwrap();
        assert_eq!(clause.to_query().unwrap(), "model:(cp*) AND -model:(cpc)");
    }

    #[test]
    fn uniq_keys_keep_their_case() {
        let clause = build_clause("file", &values(&["/Arch/CPC/file.nc"])).unwrap();
        assert_eq!(
            clause.to_query().unwrap(),
            r"file:(\/Arch\/CPC\/file.nc)"
        );
    }

    #[test]
    fn conjunction_across_keys() {
        let query = build_filter_query(&[
            ("project".to_string(), values(&["observations"])),
            ("variable".to_string(), values(&["pr"])),
        ])
        .unwrap();
        assert_eq!(query, "project:(observations) AND variable:(pr)");
    }

    #[test]
    fn empty_facets_match_everything() {
        assert_eq!(build_filter_query(&[]).unwrap(), "*:*");
    }
}
