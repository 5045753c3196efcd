//! Named post-processing transforms applied to detail documents.
//!
//! Transforms are pure `Document -> Document` functions referenced by name
//! from provider configuration. The registry is closed: unregistered names
//! are rejected when the provider registry is built, not at call time.

use std::collections::HashMap;

use anyhow::Context;
use serde_json::{Map, json};

use crate::{config::TransformConfig, error::SondaError, model::Document};

pub(crate) type Kwargs = Map<String, Document>;
type TransformFn = fn(Document, &Kwargs) -> anyhow::Result<Document>;

#[derive(Clone, Debug)]
pub(crate) struct Transform {
  pub(crate) name: String,
  pub(crate) kwargs: Kwargs,
  pub(crate) func: TransformFn,
}

impl Transform {
  pub(crate) fn resolve(config: TransformConfig) -> Result<Transform, SondaError> {
    let func = lookup(&config.name).ok_or_else(|| SondaError::ConfigError(format!("unknown transform: {}", config.name)))?;

    Ok(Transform {
      name: config.name,
      kwargs: config.kwargs,
      func,
    })
  }
}

fn lookup(name: &str) -> Option<TransformFn> {
  match name {
    "wikidata_flatten" => Some(wikidata_flatten),
    "normalize_pidinst_record" => Some(normalize_pidinst_record),
    "normalize_b2inst_record" => Some(normalize_b2inst_record),
    "o2a_contacts" => Some(o2a_contacts),
    "o2a_parameters_with_units" => Some(o2a_parameters_with_units),
    _ => None,
  }
}

/// Run the transform chain. A failing transform is logged and skipped; the
/// document carried into the next transform is the last one successfully
/// produced.
pub(crate) fn apply_transforms(mut doc: Document, transforms: &[Transform]) -> Document {
  for transform in transforms {
    match (transform.func)(doc.clone(), &transform.kwargs) {
      Ok(next) => doc = next,

      Err(err) => tracing::warn!(transform = transform.name, error = err.to_string(), "transform failed, skipping"),
    }
  }

  doc
}

fn kwarg_langs(kwargs: &Kwargs) -> Vec<String> {
  kwargs
    .get("prefer_langs")
    .and_then(Document::as_array)
    .map(|langs| langs.iter().filter_map(Document::as_str).map(str::to_string).collect())
    .unwrap_or_else(|| vec!["en".to_string(), "de".to_string()])
}

fn pick_lang(bag: &Document, langs: &[String]) -> Document {
  for lang in langs {
    if let Some(value) = bag.pointer(&format!("/{lang}/value"))
      && value.as_str().is_some_and(|text| !text.is_empty())
    {
      return value.clone();
    }
  }

  bag
    .as_object()
    .and_then(|bag| bag.values().next())
    .and_then(|entry| entry.get("value"))
    .cloned()
    .unwrap_or(Document::Null)
}

/// Flatten a `wbgetentities` payload into the shape the attribute mappings
/// expect: `{qid, label, description, aliases, claims}` plus the Commons
/// image when claim `P18` is present.
fn wikidata_flatten(doc: Document, kwargs: &Kwargs) -> anyhow::Result<Document> {
  let entities = doc.get("entities").and_then(Document::as_object).context("no entities in payload")?;

  let Some(item) = entities.values().next() else {
    return Ok(json!({}));
  };

  let langs = kwarg_langs(kwargs);

  let aliases = langs
    .iter()
    .flat_map(|lang| {
      item
        .pointer(&format!("/aliases/{lang}"))
        .and_then(Document::as_array)
        .map(|entries| entries.iter().filter_map(|alias| alias.get("value").cloned()).collect::<Vec<_>>())
        .unwrap_or_default()
    })
    .collect::<Vec<_>>();

  let mut flattened = json!({
    "qid": item.get("id").cloned().unwrap_or(Document::Null),
    "label": pick_lang(item.get("labels").unwrap_or(&json!({})), &langs),
    "description": pick_lang(item.get("descriptions").unwrap_or(&json!({})), &langs),
    "aliases": aliases,
    "claims": item.get("claims").cloned().unwrap_or_else(|| json!({})),
  });

  if let Some(filename) = item.pointer("/claims/P18/0/mainsnak/datavalue/value").and_then(Document::as_str) {
    flattened["image_filename"] = json!(filename);
    flattened["image_url"] = json!(format!("https://commons.wikimedia.org/wiki/Special:FilePath/{filename}?width=800"));
  }

  Ok(flattened)
}

const PIDINST_STRING_FIELDS: &[&str] = &[
  "pid",
  "name",
  "owner",
  "owner_identifier",
  "manufacturer",
  "manufacturer_identifier",
  "instrument_type",
  "instrument_type_identifier",
  "model",
  "measured_variable",
  "technical_info",
  "landing_page",
];

/// Normalize a PIDINST instrument record: trim common string fields and
/// backfill `name` from the first DataCite title.
fn normalize_pidinst_record(mut doc: Document, _kwargs: &Kwargs) -> anyhow::Result<Document> {
  let fields = doc.as_object_mut().context("record is not an object")?;

  for key in PIDINST_STRING_FIELDS {
    if let Some(Document::String(value)) = fields.get_mut(*key) {
      *value = value.trim().to_string();
    }
  }

  let name_missing = !fields.get("name").is_some_and(|name| name.as_str().is_some_and(|name| !name.is_empty()));

  let datacite_title = fields
    .get("datacite_attributes")
    .and_then(|datacite| datacite.pointer("/titles/0/title"))
    .and_then(Document::as_str)
    .map(str::trim)
    .filter(|title| !title.is_empty())
    .map(str::to_string);

  if name_missing && let Some(title) = datacite_title {
    fields.insert("name".to_string(), json!(title));
  }

  fields.entry("datacite_attributes").or_insert_with(|| json!({}));
  fields.entry("b2inst_attributes").or_insert_with(|| json!({}));

  Ok(doc)
}

fn first_string(candidates: &[Option<&Document>]) -> Option<String> {
  for candidate in candidates.iter().flatten() {
    match candidate {
      Document::String(text) if !text.trim().is_empty() => return Some(text.trim().to_string()),

      Document::Array(items) => {
        for item in items {
          if let Some(text) = item.as_str().or_else(|| item.pointer("/title").and_then(Document::as_str))
            && !text.trim().is_empty()
          {
            return Some(text.trim().to_string());
          }
        }
      }

      _ => {}
    }
  }

  None
}

/// Normalize an InvenioRDM-shaped B2INST record: extract the handle PID, a
/// human-readable title, the landing page and the nested metadata blocks,
/// wherever the API happened to expose them.
fn normalize_b2inst_record(mut doc: Document, _kwargs: &Kwargs) -> anyhow::Result<Document> {
  let metadata = doc.get("metadata").cloned().unwrap_or_else(|| json!({}));

  let datacite = metadata.get("datacite_attributes").or_else(|| metadata.get("datacite_attribute")).cloned().unwrap_or_else(|| json!({}));

  let b2inst_attrs = metadata
    .get("b2inst_attributes")
    .or_else(|| metadata.get("b2inst_attribute"))
    .or_else(|| metadata.get("b2inst"))
    .cloned()
    .unwrap_or_else(|| json!({}));

  let pid = [
    metadata.pointer("/pids/handle/identifier"),
    doc.pointer("/pids/handle/identifier"),
    metadata.get("pid"),
    doc.get("pid"),
    b2inst_attrs.pointer("/Identifier/identifierValue"),
    doc.get("id"),
  ]
  .into_iter()
  .flatten()
  .find_map(|value| value.as_str().map(str::trim).filter(|text| !text.is_empty()).map(str::to_string));

  let name = first_string(&[
    metadata.get("Name"),
    b2inst_attrs.get("Name"),
    metadata.get("title"),
    metadata.get("titles"),
    datacite.get("titles"),
  ]);

  let landing_page = [
    metadata.pointer("/links/self_html"),
    doc.pointer("/links/self_html"),
    metadata.pointer("/links/self"),
    doc.pointer("/links/self"),
    metadata.get("landing_page"),
    doc.get("landing_page"),
    metadata.get("LandingPage"),
    b2inst_attrs.get("LandingPage"),
  ]
  .into_iter()
  .flatten()
  .find_map(|value| value.as_str().map(str::trim).filter(|text| !text.is_empty()).map(str::to_string));

  let fields = doc.as_object_mut().context("record is not an object")?;

  if let Some(name) = name {
    fields.insert("name".to_string(), json!(name));
  }
  if let Some(pid) = pid {
    fields.insert("pid".to_string(), json!(pid));
  }
  if let Some(landing_page) = landing_page {
    fields.insert("landing_page".to_string(), json!(landing_page));
  }

  fields.entry("datacite_attributes").or_insert(datacite);
  fields.entry("b2inst_attributes").or_insert(b2inst_attrs);

  Ok(doc)
}

/// Lift `{firstName, lastName, email}` contacts out of a fetch step assigned
/// to `_contacts`. The records key defaults to `records`.
fn o2a_contacts(mut doc: Document, kwargs: &Kwargs) -> anyhow::Result<Document> {
  let records_path = kwargs.get("records_path").and_then(Document::as_str).unwrap_or("records");

  let contacts = doc
    .pointer(&format!("/_contacts/{records_path}"))
    .and_then(Document::as_array)
    .map(|records| {
      records
        .iter()
        .filter_map(|record| record.get("contact").and_then(Document::as_object))
        .map(|contact| {
          let mut slim = Map::new();

          for key in ["firstName", "lastName", "email"] {
            if let Some(value) = contact.get(key) {
              slim.insert(key.to_string(), value.clone());
            }
          }

          Document::Object(slim)
        })
        .collect::<Vec<_>>()
    })
    .unwrap_or_default();

  let fields = doc.as_object_mut().context("record is not an object")?;
  fields.insert("contacts".to_string(), json!(contacts));

  Ok(doc)
}

/// Join `_parameters.records` with `_units.records` (uuid -> unit code) into
/// `parameters: [{name, unit}]`.
fn o2a_parameters_with_units(mut doc: Document, _kwargs: &Kwargs) -> anyhow::Result<Document> {
  let unit_lookup: HashMap<String, String> = doc
    .pointer("/_units/records")
    .and_then(Document::as_array)
    .map(|units| {
      units
        .iter()
        .filter_map(|unit| {
          let uuid = unit.get("@uuid").and_then(Document::as_str)?;

          Some((uuid.to_string(), unit.get("code").and_then(Document::as_str).unwrap_or_default().to_string()))
        })
        .collect()
    })
    .unwrap_or_default();

  let parameters = doc
    .pointer("/_parameters/records")
    .and_then(Document::as_array)
    .map(|records| {
      records
        .iter()
        .map(|parameter| {
          let name = parameter.get("name").and_then(Document::as_str).unwrap_or_default();

          let unit = match parameter.get("unit") {
            Some(Document::Object(unit)) => unit.get("code").and_then(Document::as_str).unwrap_or_default().to_string(),
            Some(Document::String(uuid)) => unit_lookup.get(uuid).cloned().unwrap_or_default(),
            _ => String::new(),
          };

          json!({ "name": name, "unit": unit })
        })
        .collect::<Vec<_>>()
    })
    .unwrap_or_default();

  let fields = doc.as_object_mut().context("record is not an object")?;
  fields.insert("parameters".to_string(), json!(parameters));

  Ok(doc)
}

#[cfg(test)]
mod tests {
  use serde_json::{Map, json};

  use super::{Kwargs, Transform, apply_transforms};
  use crate::config::TransformConfig;

  fn resolve(name: &str) -> Transform {
    Transform::resolve(TransformConfig {
      name: name.to_string(),
      kwargs: Map::new(),
    })
    .unwrap()
  }

  #[test]
  fn unknown_transform_is_rejected() {
    let result = Transform::resolve(TransformConfig {
      name: "no_such_transform".to_string(),
      kwargs: Map::new(),
    });

    assert!(result.is_err());
  }

  #[test]
  fn failing_transform_is_skipped() {
    fn explode(_doc: super::Document, _kwargs: &Kwargs) -> anyhow::Result<super::Document> {
      anyhow::bail!("boom");
    }

    let failing = Transform {
      name: "explode".to_string(),
      kwargs: Map::new(),
      func: explode,
    };

    let doc = apply_transforms(json!({"pid": " p1 "}), &[failing, resolve("normalize_pidinst_record")]);

    // The failure is skipped and the next transform still runs on the
    // last successfully-produced document.
    assert_eq!(doc["pid"], json!("p1"));
    assert_eq!(doc["datacite_attributes"], json!({}));
  }

  #[test]
  fn wikidata_flatten() {
    let payload = json!({
      "entities": {
        "Q1234": {
          "id": "Q1234",
          "labels": {"en": {"language": "en", "value": "spectrometer"}, "de": {"language": "de", "value": "Spektrometer"}},
          "descriptions": {"en": {"language": "en", "value": "optical instrument"}},
          "aliases": {"en": [{"value": "spectroscope"}], "de": []},
          "claims": {"P18": [{"mainsnak": {"datavalue": {"value": "Spectrometer.jpg"}}}]}
        }
      }
    });

    let doc = apply_transforms(payload, &[resolve("wikidata_flatten")]);

    assert_eq!(doc["qid"], json!("Q1234"));
    assert_eq!(doc["label"], json!("spectrometer"));
    assert_eq!(doc["description"], json!("optical instrument"));
    assert_eq!(doc["aliases"], json!(["spectroscope"]));
    assert_eq!(doc["image_filename"], json!("Spectrometer.jpg"));
    assert_eq!(doc["image_url"], json!("https://commons.wikimedia.org/wiki/Special:FilePath/Spectrometer.jpg?width=800"));
  }

  #[test]
  fn wikidata_flatten_prefers_configured_langs() {
    let payload = json!({
      "entities": {
        "Q1234": {
          "id": "Q1234",
          "labels": {"en": {"value": "spectrometer"}, "de": {"value": "Spektrometer"}},
          "descriptions": {},
          "aliases": {},
          "claims": {}
        }
      }
    });

    let transform = Transform::resolve(TransformConfig {
      name: "wikidata_flatten".to_string(),
      kwargs: json!({"prefer_langs": ["de", "en"]}).as_object().unwrap().clone(),
    })
    .unwrap();

    let doc = apply_transforms(payload, &[transform]);

    assert_eq!(doc["label"], json!("Spektrometer"));
  }

  #[test]
  fn pidinst_normalization() {
    let record = json!({
      "pid": " 21.T11998/123 ",
      "name": "",
      "datacite_attributes": {"titles": [{"title": " Benchtop Spectrometer "}]}
    });

    let doc = apply_transforms(record, &[resolve("normalize_pidinst_record")]);

    assert_eq!(doc["pid"], json!("21.T11998/123"));
    assert_eq!(doc["name"], json!("Benchtop Spectrometer"));
    assert_eq!(doc["b2inst_attributes"], json!({}));
  }

  #[test]
  fn b2inst_normalization() {
    let record = json!({
      "id": "b2inst-1",
      "metadata": {
        "pids": {"handle": {"identifier": "21.T11998/456"}},
        "titles": [{"title": "Deep Sea Camera"}],
        "links": {"self_html": "https://b2inst.example.org/records/1"},
        "b2inst_attributes": {"Model": "DSC-2"}
      }
    });

    let doc = apply_transforms(record, &[resolve("normalize_b2inst_record")]);

    assert_eq!(doc["pid"], json!("21.T11998/456"));
    assert_eq!(doc["name"], json!("Deep Sea Camera"));
    assert_eq!(doc["landing_page"], json!("https://b2inst.example.org/records/1"));
    assert_eq!(doc["b2inst_attributes"]["Model"], json!("DSC-2"));
    assert_eq!(doc["datacite_attributes"], json!({}));
  }

  #[test]
  fn o2a_contacts() {
    let record = json!({
      "_contacts": {
        "records": [
          {"contact": {"firstName": "Ada", "lastName": "Lovelace", "email": "ada@example.org", "internal": true}},
          {"contact": "ref-only"},
        ]
      }
    });

    let doc = apply_transforms(record, &[resolve("o2a_contacts")]);

    assert_eq!(doc["contacts"], json!([{"firstName": "Ada", "lastName": "Lovelace", "email": "ada@example.org"}]));
  }

  #[test]
  fn o2a_parameters_join_units() {
    let record = json!({
      "_parameters": {
        "records": [
          {"name": "temperature", "unit": {"code": "degC"}},
          {"name": "pressure", "unit": "uuid-1"},
          {"name": "unknown", "unit": "uuid-2"},
        ]
      },
      "_units": {"records": [{"@uuid": "uuid-1", "code": "hPa"}]}
    });

    let doc = apply_transforms(record, &[resolve("o2a_parameters_with_units")]);

    assert_eq!(
      doc["parameters"],
      json!([
        {"name": "temperature", "unit": "degC"},
        {"name": "pressure", "unit": "hPa"},
        {"name": "unknown", "unit": ""},
      ])
    );
  }
}
