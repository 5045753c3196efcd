//! Typed provider and handler configuration.
//!
//! The TOML file is deserialized eagerly at startup. The provider `engine`
//! and search `mode` fields discriminate closed tagged unions, so an unknown
//! kind fails deserialization immediately instead of surfacing at first use.
//! Everything serde cannot express (duplicate prefixes, placeholder sets,
//! hit bounds) is checked by [`Config::validate`]; any violation is fatal.

use std::{
  collections::{HashMap, HashSet},
  path::Path,
};

use serde::Deserialize;
use serde_json::Map;

use crate::{error::SondaError, model::Document};

pub(crate) const WIKIDATA_ENTITY_PREFIX: &str = "http://www.wikidata.org/entity/";

fn default_min_search_len() -> usize {
  3
}

fn default_lang() -> String {
  "en".to_string()
}

fn default_max_hits() -> usize {
  10
}

fn default_true() -> bool {
  true
}

fn default_items_path() -> String {
  "@".to_string()
}

fn default_sparql_items_path() -> String {
  "results.bindings".to_string()
}

fn default_label_template() -> String {
  "{prefix} {label}".to_string()
}

fn default_wikidata_api() -> String {
  "https://www.wikidata.org/w/api.php".to_string()
}

fn default_entity_prefix() -> String {
  WIKIDATA_ENTITY_PREFIX.to_string()
}

fn default_max_depth() -> usize {
  5
}

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
  #[serde(default = "default_min_search_len")]
  pub min_search_len: usize,
  #[serde(default)]
  pub max_total_hits: Option<usize>,
  #[serde(default)]
  pub max_workers: Option<usize>,
  #[serde(default)]
  pub sort: Option<SortKey>,
  #[serde(default = "default_lang")]
  pub lang: String,

  #[serde(default)]
  pub user_agent_domain: Option<String>,
  #[serde(default)]
  pub user_agent_contact: Option<String>,

  #[serde(default)]
  pub providers: Vec<ProviderConfig>,
  #[serde(default)]
  pub handlers: Vec<HandlerConfig>,
}

impl Config {
  pub fn parse(content: &str) -> Result<Config, SondaError> {
    let config: Config = toml::from_str(content).map_err(|err| SondaError::ConfigError(err.to_string()))?;

    config.validate()?;

    Ok(config)
  }

  pub fn from_path(path: impl AsRef<Path>) -> Result<Config, SondaError> {
    let path = path.as_ref();

    tracing::debug!(path = %path.display(), "loading configuration");

    let content = std::fs::read_to_string(path).map_err(|err| SondaError::ConfigError(format!("cannot open configuration file {}: {err}", path.display())))?;

    Config::parse(&content)
  }

  pub fn validate(&self) -> Result<(), SondaError> {
    let mut prefixes = HashSet::new();

    for provider in &self.providers {
      if provider.id_prefix.is_empty() || provider.id_prefix.contains(':') {
        return Err(SondaError::ConfigError(format!("invalid provider id_prefix: {:?}", provider.id_prefix)));
      }

      if !prefixes.insert(&provider.id_prefix) {
        return Err(SondaError::ConfigError(format!("duplicate provider id_prefix: {}", provider.id_prefix)));
      }

      if provider.max_hits == 0 {
        return Err(SondaError::ConfigError(format!("[{}] max_hits must be at least 1", provider.id_prefix)));
      }

      provider.validate_templates()?;
    }

    let mut handled = HashSet::new();

    for handler in &self.handlers {
      if !handled.insert(&handler.id_prefix) {
        return Err(SondaError::ConfigError(format!("duplicate handler id_prefix: {}", handler.id_prefix)));
      }
    }

    Ok(())
  }
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
  Id,
  Text,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ProviderConfig {
  pub id_prefix: String,
  #[serde(default)]
  pub base_url: String,
  #[serde(default)]
  pub text_prefix: Option<String>,
  #[serde(default = "default_max_hits")]
  pub max_hits: usize,
  #[serde(default = "default_true")]
  pub available: bool,

  #[serde(flatten)]
  pub engine: EngineConfig,
}

impl ProviderConfig {
  fn validate_templates(&self) -> Result<(), SondaError> {
    let check = |template: &str, allowed: &[&str], what: &str| -> Result<(), SondaError> {
      for placeholder in placeholders(template) {
        let placeholder = placeholder.map_err(|err| SondaError::ConfigError(format!("[{}] {what}: {err}", self.id_prefix)))?;

        if !allowed.contains(&placeholder) {
          return Err(SondaError::ConfigError(format!("[{}] {what}: unknown placeholder {{{placeholder}}}", self.id_prefix)));
        }
      }

      Ok(())
    };

    let detail = match &self.engine {
      EngineConfig::Recipe { search, detail } => {
        match search {
          Some(SearchConfig::Server(spec)) => {
            check(&spec.url, &["base_url", "query"], "search.url")?;

            if let Some(template) = &spec.label_template {
              check(template, &["prefix", "label", "code", "id"], "search.label_template")?;
            }
          }

          Some(SearchConfig::ClientFilter(spec)) => {
            check(&spec.url, &["base_url", "query"], "search.url")?;

            if let Some(template) = &spec.label_template {
              check(template, &["prefix", "label", "code", "id"], "search.label_template")?;
            }
          }

          // SPARQL text contains literal braces, so only the known
          // substitution tokens are checked, not the whole template.
          Some(SearchConfig::Sparql(spec)) => {
            if spec.root_qid.is_none() && spec.query.contains("{root_qid}") {
              return Err(SondaError::ConfigError(format!("[{}] search.query references {{root_qid}} but none is configured", self.id_prefix)));
            }
          }

          Some(SearchConfig::WikidataAction(_)) | None => {}
        }

        detail
      }

      EngineConfig::LocalIndex { search, detail } => {
        if search.path.is_empty() {
          return Err(SondaError::ConfigError(format!("[{}] search.path is required for local index providers", self.id_prefix)));
        }

        check(&search.label_template, &["prefix", "label", "id"], "search.label_template")?;

        if detail.as_ref().is_some_and(|detail| !detail.steps.is_empty()) {
          return Err(SondaError::ConfigError(format!("[{}] local index providers do not take detail steps", self.id_prefix)));
        }

        detail
      }
    };

    if let Some(detail) = detail {
      for step in &detail.steps {
        check(&step.url, &["base_url", "id"], "detail step url")?;
      }
    }

    Ok(())
  }
}

/// Iterate over `{placeholder}` names in a template, yielding an error item
/// on unbalanced braces.
fn placeholders(template: &str) -> impl Iterator<Item = Result<&str, &'static str>> {
  let mut rest = template;

  std::iter::from_fn(move || {
    let open = rest.find('{')?;
    let after = &rest[open + 1..];

    match after.find('}') {
      None => {
        rest = "";

        Some(Err("unbalanced braces"))
      }

      Some(close) => {
        let name = &after[..close];
        rest = &after[close + 1..];

        Some(Ok(name))
      }
    }
  })
}

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "engine", rename_all = "snake_case")]
pub enum EngineConfig {
  Recipe {
    #[serde(default)]
    search: Option<SearchConfig>,
    #[serde(default)]
    detail: Option<DetailConfig>,
  },

  LocalIndex {
    search: LocalIndexSearchConfig,
    #[serde(default)]
    detail: Option<DetailConfig>,
  },
}

#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SearchConfig {
  Server(ServerSearchConfig),
  ClientFilter(ClientFilterSearchConfig),
  Sparql(SparqlSearchConfig),
  WikidataAction(WikidataSearchConfig),
}

#[derive(Clone, Debug, Deserialize)]
pub struct ServerSearchConfig {
  pub url: String,
  pub items_path: String,
  pub id_path: String,
  #[serde(default)]
  pub label_path: Option<String>,
  #[serde(default)]
  pub label_template: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ClientFilterSearchConfig {
  pub url: String,
  pub items_path: String,
  pub id_path: String,
  #[serde(default)]
  pub label_path: Option<String>,
  #[serde(default)]
  pub label_template: Option<String>,
  #[serde(default)]
  pub filter_any_paths: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SparqlSearchConfig {
  pub endpoint: String,
  pub query: String,
  #[serde(default = "default_sparql_items_path")]
  pub items_path: String,
  pub id_path: String,
  pub label_path: String,
  #[serde(default = "default_entity_prefix")]
  pub strip_uri_prefix: String,
  #[serde(default)]
  pub root_qid: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct WikidataSearchConfig {
  #[serde(default = "default_wikidata_api")]
  pub api_url: String,
  pub root_qid: String,
  #[serde(default = "default_max_depth")]
  pub max_depth: usize,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct DetailConfig {
  #[serde(default)]
  pub steps: Vec<FetchStepConfig>,
  #[serde(default)]
  pub transforms: Vec<TransformConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct FetchStepConfig {
  pub url: String,
  #[serde(default)]
  pub merge_included: bool,
  #[serde(default)]
  pub assign: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TransformConfig {
  pub name: String,
  #[serde(default)]
  pub kwargs: Map<String, Document>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct LocalIndexSearchConfig {
  pub path: String,
  #[serde(default = "default_items_path")]
  pub items_path: String,
  pub id_path: String,
  #[serde(default)]
  pub label_path: Option<String>,
  #[serde(default = "default_label_template")]
  pub label_template: String,
  #[serde(default)]
  pub filter_any_paths: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct HandlerConfig {
  pub id_prefix: String,
  pub attribute_mapping: HashMap<String, String>,
}
