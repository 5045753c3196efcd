//! Providers backed by a local, pre-loaded JSON index instead of a live API.

use std::collections::HashMap;

use ahash::RandomState;
use serde_json::json;
use tokio::sync::OnceCell;
use tracing::instrument;

use crate::{
  config::{DetailConfig, LocalIndexSearchConfig, ProviderConfig},
  error::SondaError,
  fetch::{Fetcher, HttpFetcher, user_agent},
  mapper::render,
  model::{Document, Hit},
  paths,
  transforms::{Transform, apply_transforms},
};

#[derive(Debug)]
pub(crate) struct LocalIndexProvider {
  id_prefix: String,
  text_prefix: Option<String>,
  max_hits: usize,

  path: String,
  items_path: String,
  id_path: String,
  label_path: String,
  label_template: String,
  filter_any_paths: Vec<String>,
  transforms: Vec<Transform>,

  // Loaded once on first use; the cells make the lazy initialization
  // single-flight under concurrent first access.
  items: OnceCell<Vec<Document>>,
  by_id: OnceCell<HashMap<String, Document, RandomState>>,
}

impl LocalIndexProvider {
  pub(crate) fn build(config: &ProviderConfig, search: LocalIndexSearchConfig, detail: Option<DetailConfig>) -> Result<LocalIndexProvider, SondaError> {
    let detail = detail.unwrap_or_default();

    Ok(LocalIndexProvider {
      id_prefix: config.id_prefix.clone(),
      text_prefix: config.text_prefix.clone(),
      max_hits: config.max_hits,
      path: search.path,
      items_path: search.items_path,
      label_path: search.label_path.unwrap_or_else(|| search.id_path.clone()),
      id_path: search.id_path,
      label_template: search.label_template,
      filter_any_paths: search.filter_any_paths,
      transforms: detail.transforms.into_iter().map(Transform::resolve).collect::<Result<_, _>>()?,
      items: OnceCell::new(),
      by_id: OnceCell::new(),
    })
  }

  #[instrument(level = "debug", skip_all, fields(provider = %self.id_prefix))]
  pub(crate) async fn search(&self, query: &str) -> Result<Vec<Hit>, SondaError> {
    let query = query.trim().to_lowercase();

    if query.is_empty() {
      return Ok(Vec::new());
    }

    let mut hits = Vec::new();

    for item in self.items().await {
      if !self.matches_item(item, &query) {
        continue;
      }

      let Some(id) = paths::eval(&self.id_path, item).as_ref().and_then(paths::scalar_to_string) else {
        continue;
      };

      let label = paths::eval(&self.label_path, item).as_ref().and_then(paths::scalar_to_string).unwrap_or_else(|| id.clone());

      hits.push(Hit::new(format!("{}:{id}", self.id_prefix), self.render_text(&label, &id)));

      if hits.len() >= self.max_hits {
        break;
      }
    }

    Ok(hits)
  }

  /// Exact-id lookup through a lazily built id index, then the usual
  /// transform-chain contract.
  #[instrument(level = "debug", skip_all, fields(provider = %self.id_prefix, id = remote_id))]
  pub(crate) async fn detail(&self, remote_id: &str) -> Result<Document, SondaError> {
    if remote_id.is_empty() {
      return Ok(json!({}));
    }

    let by_id = self.by_id.get_or_init(|| self.build_id_index()).await;

    let Some(doc) = by_id.get(remote_id) else {
      tracing::debug!(provider = self.id_prefix, id = remote_id, "no document in local index");

      return Ok(json!({}));
    };

    Ok(apply_transforms(doc.clone(), &self.transforms))
  }

  async fn items(&self) -> &[Document] {
    self.items.get_or_init(|| self.load_index()).await
  }

  async fn build_id_index(&self) -> HashMap<String, Document, RandomState> {
    self
      .items()
      .await
      .iter()
      .filter_map(|item| paths::eval(&self.id_path, item).as_ref().and_then(paths::scalar_to_string).map(|id| (id, item.clone())))
      .collect()
  }

  async fn load_index(&self) -> Vec<Document> {
    // The index may live on disk or in the bundled assets; the fetch
    // contract already folds every failure into an error document.
    let fetcher = match HttpFetcher::new(&user_agent(None, None)) {
      Ok(fetcher) => fetcher,

      Err(err) => {
        tracing::error!(error = err.to_string(), "could not build local index fetcher");

        return Vec::new();
      }
    };

    let doc = fetcher.fetch_json(&self.path).await;

    match paths::eval(&self.items_path, &doc) {
      Some(Document::Array(items)) => {
        tracing::info!(provider = self.id_prefix, count = items.len(), path = self.path, "loaded local index");

        items
      }

      _ => {
        tracing::warn!(provider = self.id_prefix, path = self.path, "items path did not yield a list");

        Vec::new()
      }
    }
  }

  fn render_text(&self, label: &str, id: &str) -> String {
    let prefix = self.text_prefix.as_deref().unwrap_or_default().trim().to_string();

    let context = HashMap::from([
      ("prefix".to_string(), prefix.clone()),
      ("label".to_string(), label.to_string()),
      ("id".to_string(), id.to_string()),
    ]);

    render(&self.label_template, &context).unwrap_or_else(|| format!("{prefix} {label}")).trim().to_string()
  }

  /// Substring OR-match over the configured paths, falling back to the id
  /// and label paths when none are set.
  fn matches_item(&self, item: &Document, query: &str) -> bool {
    let defaults = [self.id_path.clone(), self.label_path.clone()];
    let paths: &[String] = match self.filter_any_paths.is_empty() {
      true => &defaults,
      false => &self.filter_any_paths,
    };

    paths.iter().any(|path| match paths::eval(path, item) {
      None | Some(Document::Null) => false,
      Some(Document::Array(values)) => values.iter().any(|value| value_contains(value, query)),
      Some(value) => value_contains(&value, query),
    })
  }
}

fn value_contains(value: &Document, query: &str) -> bool {
  match value {
    Document::Null => false,
    Document::String(text) => text.to_lowercase().contains(query),
    value => value.to_string().to_lowercase().contains(query),
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use crate::{
    config::{Config, EngineConfig},
    model::Hit,
  };

  use super::LocalIndexProvider;

  fn write_index(name: &str, content: &serde_json::Value) -> String {
    let path = std::env::temp_dir().join(name);
    std::fs::write(&path, content.to_string()).unwrap();

    path.to_str().unwrap().to_string()
  }

  fn provider(toml: &str) -> LocalIndexProvider {
    let config = Config::parse(toml).unwrap();
    let provider = config.providers.into_iter().next().unwrap();

    let EngineConfig::LocalIndex { search, detail } = provider.engine.clone() else {
      panic!("expected a local index provider");
    };

    LocalIndexProvider::build(&provider, search, detail).unwrap()
  }

  fn pidinst_provider(index_path: &str) -> LocalIndexProvider {
    provider(&format!(
      r#"
        [[providers]]
        id_prefix = "pidinst"
        engine = "local_index"
        text_prefix = "PIDINST:"
        max_hits = 2

        [providers.search]
        path = "{index_path}"
        id_path = "pid"
        label_path = "name"
        filter_any_paths = ["name"]

        [[providers.detail.transforms]]
        name = "normalize_pidinst_record"
      "#
    ))
  }

  #[tokio::test]
  async fn search_matches_substring_case_insensitively() {
    let path = write_index(
      "sonda-local-index-search.json",
      &json!([{"pid": "p1", "name": "Spectrometer"}, {"pid": "p2", "name": "Camera"}]),
    );

    let hits = pidinst_provider(&path).search("spec").await.unwrap();

    assert_eq!(hits, vec![Hit::new("pidinst:p1", "PIDINST: Spectrometer")]);
  }

  #[tokio::test]
  async fn search_falls_back_to_id_and_label_paths() {
    let path = write_index(
      "sonda-local-index-defaults.json",
      &json!([{"pid": "spec-1", "name": "Thing"}, {"pid": "x", "name": "Other"}]),
    );

    let provider = provider(&format!(
      r#"
        [[providers]]
        id_prefix = "pidinst"
        engine = "local_index"

        [providers.search]
        path = "{path}"
        id_path = "pid"
        label_path = "name"
      "#
    ));

    let hits = provider.search("SPEC").await.unwrap();

    assert_eq!(hits, vec![Hit::new("pidinst:spec-1", "Thing")]);
  }

  #[tokio::test]
  async fn search_caps_at_max_hits() {
    let items = (0..5).map(|index| json!({"pid": format!("p{index}"), "name": "Camera"})).collect::<Vec<_>>();
    let path = write_index("sonda-local-index-cap.json", &json!(items));

    assert_eq!(pidinst_provider(&path).search("camera").await.unwrap().len(), 2);
  }

  #[tokio::test]
  async fn detail_finds_record_by_exact_id() {
    let path = write_index(
      "sonda-local-index-detail.json",
      &json!([{"pid": "p1", "name": " Spectrometer "}, {"pid": "p2", "name": "Camera"}]),
    );

    let provider = pidinst_provider(&path);
    let doc = provider.detail("p1").await.unwrap();

    assert_eq!(doc["pid"], json!("p1"));
    // Transform chain applied to the looked-up record.
    assert_eq!(doc["name"], json!("Spectrometer"));

    assert_eq!(provider.detail("p999").await.unwrap(), json!({}));
    assert_eq!(provider.detail("").await.unwrap(), json!({}));
  }

  #[tokio::test]
  async fn nested_items_path() {
    let path = write_index("sonda-local-index-nested.json", &json!({"results": {"items": [{"pid": "p1", "name": "Camera"}]}}));

    let provider = provider(&format!(
      r#"
        [[providers]]
        id_prefix = "pidinst"
        engine = "local_index"

        [providers.search]
        path = "{path}"
        items_path = "results.items"
        id_path = "pid"
        label_path = "name"
      "#
    ));

    assert_eq!(provider.search("cam").await.unwrap().len(), 1);
  }

  #[tokio::test]
  async fn unreadable_index_degrades_to_empty() {
    let provider = provider(
      r#"
        [[providers]]
        id_prefix = "pidinst"
        engine = "local_index"

        [providers.search]
        path = "/nonexistent/sonda-index.json"
        id_path = "pid"
      "#,
    );

    assert!(provider.search("anything").await.unwrap().is_empty());
    assert_eq!(provider.detail("p1").await.unwrap(), json!({}));
  }

  #[tokio::test]
  async fn bundled_index_loads_through_static_scheme() {
    let provider = provider(
      r#"
        [[providers]]
        id_prefix = "pidinst"
        engine = "local_index"

        [providers.search]
        path = "static://instruments-sample.json"
        items_path = "items"
        id_path = "pid"
        label_path = "name"
      "#,
    );

    let hits = provider.search("spectrometer").await.unwrap();

    assert_eq!(hits.len(), 1);
    assert!(hits[0].id.starts_with("pidinst:21."));
  }
}
