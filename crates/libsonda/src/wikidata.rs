//! Transitive classification of Wikidata entities.
//!
//! An entity counts as an instrument when the configured root type is
//! reachable from it through `P279` (subclass-of) within a bounded depth,
//! either starting from the entity itself or from its `P31` (instance-of)
//! classes. Real linked-data subclass graphs contain cycles; the visited set
//! accumulated across the whole traversal is what guarantees termination.

use std::collections::{HashMap, HashSet};

use ahash::RandomState;
use itertools::Itertools;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};

use crate::{fetch::Fetcher, model::Document};

const BATCH_SIZE: usize = 50;

/// Entity payloads fetched during one classification pass. The cache is
/// scoped to a single search call and shared across its candidates; it is
/// never persisted across unrelated calls.
#[derive(Debug, Default)]
pub(crate) struct EntityCache {
  entities: HashMap<String, Document, RandomState>,
}

impl EntityCache {
  pub(crate) fn get(&self, id: &str) -> Option<&Document> {
    self.entities.get(id)
  }

  /// Batch-fetch any of `ids` not already cached, via `wbgetentities`.
  pub(crate) async fn fetch_missing<F: Fetcher>(&mut self, fetcher: &F, api_url: &str, ids: &[String]) {
    let missing = ids.iter().filter(|id| !self.entities.contains_key(*id)).unique().cloned().collect::<Vec<_>>();

    for chunk in missing.chunks(BATCH_SIZE) {
      let url = format!("{api_url}?action=wbgetentities&ids={}&props=labels%7Cclaims&format=json", chunk.join("%7C"));
      let doc = fetcher.fetch_json(&url).await;

      let Some(entities) = doc.get("entities").and_then(Document::as_object) else {
        tracing::warn!(count = chunk.len(), "could not fetch entity batch");

        continue;
      };

      for (id, entity) in entities {
        self.entities.insert(id.clone(), entity.clone());
      }
    }
  }

  #[cfg(test)]
  pub(crate) fn insert(&mut self, id: &str, entity: Document) {
    self.entities.insert(id.to_string(), entity);
  }
}

/// Text-search candidate entity ids through `wbsearchentities`.
pub(crate) async fn search_entity_ids<F: Fetcher>(fetcher: &F, api_url: &str, query: &str, lang: &str, limit: usize) -> Vec<String> {
  let query = utf8_percent_encode(query, NON_ALPHANUMERIC);
  let url = format!("{api_url}?action=wbsearchentities&search={query}&language={lang}&uselang={lang}&format=json&limit={limit}");

  fetcher
    .fetch_json(&url)
    .await
    .get("search")
    .and_then(Document::as_array)
    .map(|results| results.iter().filter_map(|result| result.get("id").and_then(Document::as_str)).map(str::to_string).collect())
    .unwrap_or_default()
}

pub(crate) fn instance_classes(entity: &Document) -> Vec<String> {
  claim_targets(entity, "P31")
}

fn parent_classes(entity: &Document) -> Vec<String> {
  claim_targets(entity, "P279")
}

fn claim_targets(entity: &Document, property: &str) -> Vec<String> {
  entity
    .pointer(&format!("/claims/{property}"))
    .and_then(Document::as_array)
    .map(|claims| {
      claims
        .iter()
        .filter_map(|claim| claim.pointer("/mainsnak/datavalue/value/id").and_then(Document::as_str))
        .map(str::to_string)
        .collect()
    })
    .unwrap_or_default()
}

/// Language-preference label lookup, falling back through `langs` in order.
pub(crate) fn pick_label(entity: &Document, langs: &[&str]) -> Option<String> {
  langs
    .iter()
    .find_map(|lang| entity.pointer(&format!("/labels/{lang}/value")).and_then(Document::as_str))
    .map(str::to_string)
}

/// Breadth-first reachability of `root` from `start_ids` over `P279`, bounded
/// by `max_depth`. Frontier entities are batch-fetched into the cache round
/// by round; the visited set spans the whole traversal so cyclic subclass
/// chains terminate.
pub(crate) async fn reaches_root<F: Fetcher>(fetcher: &F, api_url: &str, start_ids: &[String], root: &str, max_depth: usize, cache: &mut EntityCache) -> bool {
  let mut frontier = start_ids.to_vec();
  let mut visited = HashSet::<String, RandomState>::default();
  let mut depth = 0;

  while !frontier.is_empty() && depth <= max_depth {
    cache.fetch_missing(fetcher, api_url, &frontier).await;

    if frontier.iter().any(|id| id == root) {
      return true;
    }

    let mut next = Vec::new();

    for id in frontier {
      if !visited.insert(id.clone()) {
        continue;
      }

      let Some(entity) = cache.get(&id) else {
        continue;
      };

      let parents = parent_classes(entity);

      if parents.iter().any(|parent| parent == root) {
        return true;
      }

      next.extend(parents.into_iter().filter(|parent| !visited.contains(parent)));
    }

    frontier = next;
    depth += 1;
  }

  false
}

/// Classify one entity. The entity's own id is tried first ("this is itself
/// a subtype of the root"), then its `P31` classes ("this is an instance of
/// a subtype of the root").
pub(crate) async fn is_instrument<F: Fetcher>(fetcher: &F, api_url: &str, entity_id: &str, root: &str, max_depth: usize, cache: &mut EntityCache) -> bool {
  if reaches_root(fetcher, api_url, &[entity_id.to_string()], root, max_depth, cache).await {
    return true;
  }

  let classes = cache.get(entity_id).map(instance_classes).unwrap_or_default();

  if classes.is_empty() {
    return false;
  }

  reaches_root(fetcher, api_url, &classes, root, max_depth, cache).await
}
