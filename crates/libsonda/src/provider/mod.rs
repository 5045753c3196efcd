//! The closed set of provider kinds and the registry built from
//! configuration at startup.

pub(crate) mod local_index;
pub(crate) mod recipe;

use std::collections::HashMap;

use ahash::RandomState;

use crate::{
  config::{Config, EngineConfig, SortKey},
  error::SondaError,
  fetch::Fetcher,
  model::{Document, Hit},
  provider::{local_index::LocalIndexProvider, recipe::RecipeProvider},
};

/// One configured source. Unknown kinds cannot reach this point: the
/// configuration layer rejects them during deserialization.
#[derive(Debug)]
pub(crate) enum Provider {
  Recipe(RecipeProvider),
  LocalIndex(LocalIndexProvider),
}

impl Provider {
  pub(crate) async fn search<F: Fetcher>(&self, fetcher: &F, query: &str, lang: &str) -> Result<Vec<Hit>, SondaError> {
    match self {
      Provider::Recipe(provider) => provider.search(fetcher, query, lang).await,
      Provider::LocalIndex(provider) => provider.search(query).await,
    }
  }

  pub(crate) async fn detail<F: Fetcher>(&self, fetcher: &F, remote_id: &str) -> Result<Document, SondaError> {
    match self {
      Provider::Recipe(provider) => provider.detail(fetcher, remote_id).await,
      Provider::LocalIndex(provider) => provider.detail(remote_id).await,
    }
  }
}

/// Immutable context object holding every configured provider and attribute
/// handler, built once at startup and shared by reference afterwards.
#[derive(Debug)]
pub(crate) struct Registry {
  providers: HashMap<String, Provider, RandomState>,
  handlers: HashMap<String, HashMap<String, String>, RandomState>,

  pub(crate) min_search_len: usize,
  pub(crate) max_total_hits: Option<usize>,
  pub(crate) max_workers: Option<usize>,
  pub(crate) sort: Option<SortKey>,
  pub(crate) lang: String,
}

impl Registry {
  pub(crate) fn build(config: Config) -> Result<Registry, SondaError> {
    config.validate()?;

    let mut providers = HashMap::default();

    for entry in config.providers {
      if !entry.available {
        tracing::info!(provider = entry.id_prefix, "provider disabled, skipping");

        continue;
      }

      let prefix = entry.id_prefix.clone();

      let provider = match entry.engine.clone() {
        EngineConfig::Recipe { search, detail } => Provider::Recipe(RecipeProvider::build(&entry, search, detail)?),
        EngineConfig::LocalIndex { search, detail } => Provider::LocalIndex(LocalIndexProvider::build(&entry, search, detail)?),
      };

      providers.insert(prefix, provider);
    }

    let handlers = config.handlers.into_iter().map(|handler| (handler.id_prefix, handler.attribute_mapping)).collect();

    tracing::info!(providers = providers.len(), "built provider registry");

    Ok(Registry {
      providers,
      handlers,
      min_search_len: config.min_search_len,
      max_total_hits: config.max_total_hits,
      max_workers: config.max_workers,
      sort: config.sort,
      lang: config.lang,
    })
  }

  pub(crate) fn provider(&self, prefix: &str) -> Option<&Provider> {
    self.providers.get(prefix)
  }

  pub(crate) fn handler(&self, prefix: &str) -> Option<&HashMap<String, String>> {
    self.handlers.get(prefix)
  }

  pub(crate) fn prefixes(&self) -> impl Iterator<Item = &String> {
    self.providers.keys()
  }
}
