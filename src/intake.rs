//! Intake-ESM catalogue synthesis.
//!
//! An intake-esm catalogue (esmcat 0.1.0) is a JSON document with a static
//! header describing the columns and aggregation rules, followed by one
//! flattened entry per search result in `catalog_dict`. The header is
//! produced up front; the entries are streamed lazily from the index cursor
//! so arbitrarily large result sets never materialise in memory.

use crate::error::FrevaRestError;
use crate::flavour::{Translator, DATASET_HIERARCHY};
use crate::solr::{doc_field_str, SolrDocument, UniqKey};

use bytes::Bytes;
use chrono::Utc;
use futures::stream::{self, Stream, StreamExt};
use serde_json::{json, Value};

/// The esmcat version this catalogue conforms to.
const ESMCAT_VERSION: &str = "0.1.0";

/// Build the catalogue header, without the `catalog_dict` entries.
///
/// `attributes` are the canonical dataset-hierarchy fields that actually
/// occur in the result set.
pub fn catalogue_header(
    translator: &Translator,
    uniq_key: UniqKey,
    attributes: &[String],
) -> Value {
    let columns: Vec<Value> = attributes
        .iter()
        .map(|field| {
            json!({
                "column_name": translator.facet_out(field),
                "vocabulary": "",
            })
        })
        .collect();
    json!({
        "esmcat_version": ESMCAT_VERSION,
        "id": translator.flavour.name(),
        "description": "Catalogue from freva-databrowser",
        "title": "freva-databrowser catalogue",
        "last_updated": Utc::now().to_rfc3339(),
        "attributes": columns,
        "assets": {
            "column_name": uniq_key.as_str(),
            "format_column_name": "format",
        },
        "aggregation_control": {
            "variable_column_name": translator.facet_out("variable"),
            "groupby_attrs": DATASET_HIERARCHY
                .iter()
                .map(|field| translator.facet_out(field))
                .collect::<Vec<_>>(),
            "aggregations": [
                {"type": "union", "attribute_name": translator.facet_out("variable")},
                {
                    "type": "join_existing",
                    "attribute_name": translator.facet_out("time"),
                    "options": {"dim": "time"},
                },
            ],
        },
    })
}

/// Flatten one index document into a catalogue entry: the unique key plus
/// all hierarchy fields that are present, single-element lists unwrapped
/// and field names translated outbound.
pub fn flatten_doc(doc: &SolrDocument, uniq_key: UniqKey, translator: &Translator) -> Value {
    let mut entry = serde_json::Map::new();
    if let Some(location) = doc_field_str(doc, uniq_key.as_str()) {
        entry.insert(uniq_key.as_str().to_string(), json!(location));
    }
    for field in DATASET_HIERARCHY {
        if let Some(value) = doc.get(field) {
            let flattened = match value {
                Value::Array(values) if values.len() == 1 => values[0].clone(),
                other => other.clone(),
            };
            entry.insert(translator.facet_out(field), flattened);
        }
    }
    Value::Object(entry)
}

/// Stream the whole catalogue: the header document with the entry stream
/// spliced in as `catalog_dict`.
pub fn stream_catalogue<S>(
    header: Value,
    docs: S,
    uniq_key: UniqKey,
    translator: Translator,
) -> impl Stream<Item = Result<Bytes, FrevaRestError>> + Send
where
    S: Stream<Item = Result<SolrDocument, FrevaRestError>> + Send + 'static,
{
    let mut head = serde_json::to_string_pretty(&header)
        .expect("the catalogue header serialises to JSON");
    // Re-open the header object so catalog_dict can be appended.
    head.truncate(head.trim_end().len() - 1);
    head.push_str(",\n  \"catalog_dict\": [");

    let entries = docs.enumerate().map(move |(index, item)| {
        let doc = item?;
        let entry = flatten_doc(&doc, uniq_key, &translator);
        let rendered = serde_json::to_string_pretty(&entry)
            .expect("catalogue entries serialise to JSON");
        let separator = if index == 0 { "\n" } else { ",\n" };
        Ok(Bytes::from(format!("{separator}{rendered}")))
    });

    stream::once(async move { Ok(Bytes::from(head)) })
        .chain(entries)
        .chain(stream::once(async { Ok(Bytes::from("\n  ]\n}")) }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flavour::BuiltInFlavour;

    fn cmip6() -> Translator {
        Translator::for_builtin(BuiltInFlavour::Cmip6, true)
    }

    #[test]
    fn header_conforms_to_esmcat() {
        let header = catalogue_header(
            &cmip6(),
            UniqKey::Uri,
            &["project".to_string(), "variable".to_string()],
        );
        assert_eq!(header["esmcat_version"], "0.1.0");
        assert_eq!(header["id"], "cmip6");
        assert_eq!(header["assets"]["column_name"], "uri");
        assert_eq!(header["assets"]["format_column_name"], "format");
        assert_eq!(
            header["attributes"][0],
            json!({"column_name": "mip_era", "vocabulary": ""})
        );
        let control = &header["aggregation_control"];
        assert_eq!(control["variable_column_name"], "variable_id");
        assert_eq!(control["groupby_attrs"][0], "mip_era");
        assert_eq!(control["aggregations"][0]["type"], "union");
        assert_eq!(control["aggregations"][1]["type"], "join_existing");
        assert_eq!(control["aggregations"][1]["options"]["dim"], "time");
    }

    #[test]
    fn docs_flatten_single_element_lists() {
        let doc: SolrDocument = serde_json::from_value(json!({
            "file": ["/arch/tas.nc"],
            "project": ["cmip6"],
            "variable": ["tas", "pr"],
            "ensemble": "r1i1p1f1",
        }))
        .unwrap();
        let entry = flatten_doc(&doc, UniqKey::File, &cmip6());
        assert_eq!(entry["file"], "/arch/tas.nc");
        assert_eq!(entry["mip_era"], "cmip6");
        assert_eq!(entry["variable_id"], json!(["tas", "pr"]));
        assert_eq!(entry["member_id"], "r1i1p1f1");
    }

    #[tokio::test]
    async fn catalogue_stream_is_valid_json() {
        use futures::TryStreamExt;
        let docs = vec![
            serde_json::from_value::<SolrDocument>(json!({"file": "/a.nc", "project": ["obs"]}))
                .unwrap(),
            serde_json::from_value::<SolrDocument>(json!({"file": "/b.nc", "project": ["obs"]}))
                .unwrap(),
        ];
        let header = catalogue_header(&cmip6(), UniqKey::File, &["project".to_string()]);
        let stream = stream_catalogue(
            header,
            stream::iter(docs.into_iter().map(Ok)),
            UniqKey::File,
            cmip6(),
        );
        let chunks: Vec<Bytes> = stream.try_collect().await.unwrap();
        let body: String = chunks
            .iter()
            .map(|b| String::from_utf8_lossy(b).to_string())
            .collect();
        let parsed: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["catalog_dict"].as_array().unwrap().len(), 2);
        assert_eq!(parsed["catalog_dict"][0]["file"], "/a.nc");
    }
}
