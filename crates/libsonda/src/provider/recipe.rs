//! Declarative recipe execution for one configured source.

use std::collections::HashMap;

use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde_json::Map;
use tracing::instrument;

use crate::{
  config::{ClientFilterSearchConfig, DetailConfig, FetchStepConfig, ProviderConfig, SearchConfig, ServerSearchConfig, SparqlSearchConfig, WikidataSearchConfig},
  error::SondaError,
  fetch::{Fetcher, is_error_document},
  mapper::render,
  model::{Document, Hit},
  paths,
  transforms::{Transform, apply_transforms},
  wikidata::{self, EntityCache},
};

/// The collection concatenated across fetch steps instead of being replaced.
const SIDECAR_KEY: &str = "included";

const LABEL_FALLBACK_LANGS: &[&str] = &["en", "de"];

#[derive(Debug)]
pub(crate) struct RecipeProvider {
  id_prefix: String,
  base_url: String,
  text_prefix: Option<String>,
  max_hits: usize,
  search: Option<SearchConfig>,
  steps: Vec<FetchStepConfig>,
  transforms: Vec<Transform>,
}

impl RecipeProvider {
  pub(crate) fn build(config: &ProviderConfig, search: Option<SearchConfig>, detail: Option<DetailConfig>) -> Result<RecipeProvider, SondaError> {
    let detail = detail.unwrap_or_default();

    Ok(RecipeProvider {
      id_prefix: config.id_prefix.clone(),
      base_url: config.base_url.clone(),
      text_prefix: config.text_prefix.clone(),
      max_hits: config.max_hits,
      search,
      steps: detail.steps,
      transforms: detail.transforms.into_iter().map(Transform::resolve).collect::<Result<_, _>>()?,
    })
  }

  #[instrument(level = "debug", skip_all, fields(provider = %self.id_prefix))]
  pub(crate) async fn search<F: Fetcher>(&self, fetcher: &F, query: &str, lang: &str) -> Result<Vec<Hit>, SondaError> {
    let Some(search) = &self.search else {
      return Ok(Vec::new());
    };

    if query.is_empty() {
      return Ok(Vec::new());
    }

    match search {
      SearchConfig::Server(spec) => self.search_server(fetcher, spec, query).await,
      SearchConfig::ClientFilter(spec) => self.search_client_filter(fetcher, spec, query).await,
      SearchConfig::Sparql(spec) => self.search_sparql(fetcher, spec, query, lang).await,
      SearchConfig::WikidataAction(spec) => self.search_wikidata(fetcher, spec, query, lang).await,
    }
  }

  async fn search_server<F: Fetcher>(&self, fetcher: &F, spec: &ServerSearchConfig, query: &str) -> Result<Vec<Hit>, SondaError> {
    let Some(url) = self.search_url(&spec.url, query) else {
      return Ok(Vec::new());
    };

    let doc = fetcher.fetch_json(&url).await;
    let items = items_at(&spec.items_path, &doc);

    Ok(self.items_to_hits(items.iter().take(self.max_hits), &spec.id_path, spec.label_path.as_deref(), spec.label_template.as_deref()))
  }

  async fn search_client_filter<F: Fetcher>(&self, fetcher: &F, spec: &ClientFilterSearchConfig, query: &str) -> Result<Vec<Hit>, SondaError> {
    let Some(url) = self.search_url(&spec.url, query) else {
      return Ok(Vec::new());
    };

    let doc = fetcher.fetch_json(&url).await;
    let items = items_at(&spec.items_path, &doc);
    let query = query.to_lowercase();

    let mut survivors = Vec::new();

    // The cap applies during the filter pass, not after.
    for item in &items {
      if spec.filter_any_paths.iter().any(|path| contains(item, path, &query)) {
        survivors.push(item);
      }

      if survivors.len() >= self.max_hits {
        break;
      }
    }

    Ok(self.items_to_hits(survivors.into_iter(), &spec.id_path, spec.label_path.as_deref(), spec.label_template.as_deref()))
  }

  async fn search_sparql<F: Fetcher>(&self, fetcher: &F, spec: &SparqlSearchConfig, query: &str, lang: &str) -> Result<Vec<Hit>, SondaError> {
    let sparql = spec
      .query
      .replace("{query}", query)
      .replace("{lang}", lang)
      .replace("{root_qid}", spec.root_qid.as_deref().unwrap_or_default());

    let doc = fetcher.sparql_post(&spec.endpoint, &sparql).await;
    let rows = items_at(&spec.items_path, &doc);

    let mut hits = Vec::new();

    for row in rows.iter().take(self.max_hits) {
      let Some(id) = paths::eval(&spec.id_path, row).as_ref().and_then(paths::scalar_to_string) else {
        continue;
      };
      let Some(label) = paths::eval(&spec.label_path, row).as_ref().and_then(paths::scalar_to_string) else {
        continue;
      };

      let id = id.strip_prefix(&spec.strip_uri_prefix).unwrap_or(&id);

      hits.push(Hit::new(format!("{}:{id}", self.id_prefix), self.decorate(&label)));
    }

    Ok(hits)
  }

  async fn search_wikidata<F: Fetcher>(&self, fetcher: &F, spec: &WikidataSearchConfig, query: &str, lang: &str) -> Result<Vec<Hit>, SondaError> {
    // Over-fetch to absorb candidates lost to classification.
    let candidates = wikidata::search_entity_ids(fetcher, &spec.api_url, query, lang, self.max_hits * 3).await;

    if candidates.is_empty() {
      return Ok(Vec::new());
    }

    let mut cache = EntityCache::default();
    cache.fetch_missing(fetcher, &spec.api_url, &candidates).await;

    let mut hits = Vec::new();

    for qid in &candidates {
      if hits.len() >= self.max_hits {
        break;
      }

      if !wikidata::is_instrument(fetcher, &spec.api_url, qid, &spec.root_qid, spec.max_depth, &mut cache).await {
        continue;
      }

      let langs = std::iter::once(lang).chain(LABEL_FALLBACK_LANGS.iter().copied()).collect::<Vec<_>>();
      let label = cache.get(qid).and_then(|entity| wikidata::pick_label(entity, &langs)).unwrap_or_else(|| qid.clone());

      hits.push(Hit::new(format!("{}:{qid}", self.id_prefix), self.decorate(&label)));
    }

    Ok(hits)
  }

  /// Execute the ordered fetch steps against one accumulating document, then
  /// run the transform chain. A provider configured with `client_filter`
  /// search and no steps serves detail out of its search source instead.
  #[instrument(level = "debug", skip_all, fields(provider = %self.id_prefix, id = remote_id))]
  pub(crate) async fn detail<F: Fetcher>(&self, fetcher: &F, remote_id: &str) -> Result<Document, SondaError> {
    let mut doc = Map::new();

    if self.steps.is_empty() {
      if let Some(SearchConfig::ClientFilter(spec)) = &self.search
        && let Some(Document::Object(record)) = self.record_from_search(fetcher, spec, remote_id).await
      {
        doc = record;
      }
    } else {
      let context = HashMap::from([("base_url".to_string(), self.base_url.clone()), ("id".to_string(), remote_id.to_string())]);

      for step in &self.steps {
        let Some(url) = render(&step.url, &context) else {
          tracing::warn!(url = step.url, "could not render detail step url");

          continue;
        };

        let part = fetcher.fetch_json(&url).await;

        if is_error_document(&part) {
          tracing::warn!(url = url, "detail step failed, skipping");

          continue;
        }

        let Document::Object(part) = part else {
          tracing::warn!(url = url, "detail step did not return an object, skipping");

          continue;
        };

        merge_step(&mut doc, step, part);
      }
    }

    Ok(apply_transforms(Document::Object(doc), &self.transforms))
  }

  /// Detail fallback for index-backed sources with no per-record endpoint:
  /// re-run the search fetch and locate the record by id.
  async fn record_from_search<F: Fetcher>(&self, fetcher: &F, spec: &ClientFilterSearchConfig, remote_id: &str) -> Option<Document> {
    let url = self.search_url(&spec.url, "")?;
    let doc = fetcher.fetch_json(&url).await;

    items_at(&spec.items_path, &doc)
      .into_iter()
      .find(|item| paths::eval(&spec.id_path, item).as_ref().and_then(paths::scalar_to_string).is_some_and(|id| id == remote_id))
  }

  fn search_url(&self, template: &str, query: &str) -> Option<String> {
    let context = HashMap::from([
      ("base_url".to_string(), self.base_url.clone()),
      ("query".to_string(), utf8_percent_encode(query, NON_ALPHANUMERIC).to_string()),
    ]);

    let url = render(template, &context);

    if url.is_none() {
      tracing::warn!(provider = self.id_prefix, template = template, "could not render search url");
    }

    url
  }

  fn items_to_hits<'i>(&self, items: impl Iterator<Item = &'i Document>, id_path: &str, label_path: Option<&str>, label_template: Option<&str>) -> Vec<Hit> {
    let mut hits = Vec::new();

    for item in items {
      let Some(id) = paths::eval(id_path, item).as_ref().and_then(paths::scalar_to_string) else {
        continue;
      };

      let label = label_path.and_then(|path| paths::eval(path, item)).as_ref().and_then(paths::scalar_to_string);

      if label.is_none() && label_template.is_none() {
        continue;
      }

      let prefix = self.text_prefix.as_deref().unwrap_or_default().trim().to_string();
      let label = label.unwrap_or_default();

      let context = HashMap::from([
        ("prefix".to_string(), prefix.clone()),
        ("label".to_string(), label.clone()),
        ("id".to_string(), id.clone()),
        // Convenience lookup for templates of device-registry sources.
        ("code".to_string(), paths::eval("Instrument.code", item).as_ref().and_then(paths::scalar_to_string).unwrap_or_default()),
      ]);

      let Some(text) = render(label_template.unwrap_or("{label}"), &context) else {
        tracing::warn!(provider = self.id_prefix, "could not render label template");

        continue;
      };

      hits.push(Hit::new(format!("{}:{id}", self.id_prefix), text.trim().to_string()));
    }

    hits
  }

  fn decorate(&self, label: &str) -> String {
    match self.text_prefix.as_deref().map(str::trim).filter(|prefix| !prefix.is_empty()) {
      Some(prefix) => format!("{prefix} {label}"),
      None => label.to_string(),
    }
  }
}

/// Merge one fetched part into the accumulating detail document. A step with
/// an `assign` key stores the whole part under that key for later transforms
/// that need the raw sub-response. The `included` side-car collection is
/// concatenated across steps, never replaced.
fn merge_step(doc: &mut Map<String, Document>, step: &FetchStepConfig, mut part: Map<String, Document>) {
  if let Some(key) = &step.assign {
    doc.insert(key.clone(), Document::Object(part));

    return;
  }

  // merge_included only moves the point where the side-car concatenation
  // fires; the concatenation itself happens for every step.
  if step.merge_included
    && let Some(value) = part.remove(SIDECAR_KEY)
  {
    concat_sidecar(doc, value);
  }

  for (key, value) in part {
    if key == SIDECAR_KEY {
      concat_sidecar(doc, value);
    } else {
      doc.insert(key, value);
    }
  }
}

fn concat_sidecar(doc: &mut Map<String, Document>, value: Document) {
  let Document::Array(incoming) = value else {
    tracing::debug!("ignoring non-list {SIDECAR_KEY} collection");

    return;
  };

  let slot = doc.entry(SIDECAR_KEY).or_insert_with(|| Document::Array(Vec::new()));

  if let Some(existing) = slot.as_array_mut() {
    existing.extend(incoming);
  }
}

fn items_at(items_path: &str, doc: &Document) -> Vec<Document> {
  match paths::eval(items_path, doc) {
    Some(Document::Array(items)) => items,
    _ => Vec::new(),
  }
}

fn contains(item: &Document, path: &str, query: &str) -> bool {
  match paths::eval(path, item) {
    None | Some(Document::Null) => false,
    Some(Document::String(text)) => text.to_lowercase().contains(query),
    Some(value) => value.to_string().to_lowercase().contains(query),
  }
}
