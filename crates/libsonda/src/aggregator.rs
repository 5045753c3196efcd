//! Concurrent fan-out of one query to every configured provider.

use std::{
  collections::HashSet,
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
};

use ahash::RandomState;
use metrics::{counter, histogram};
use tokio::{sync::Semaphore, task::JoinSet, time::Instant};
use tracing::instrument;

use crate::{
  config::SortKey,
  fetch::Fetcher,
  model::Hit,
  provider::Registry,
};

const MAX_DEFAULT_WORKERS: usize = 6;

/// Fan the query out to all providers over a bounded worker pool, merging
/// results as tasks complete. Hits are deduplicated by id with
/// first-completion-wins semantics. When the total cap is reached,
/// not-yet-started tasks are cancelled cooperatively; tasks already running
/// complete but their results are discarded on arrival.
#[instrument(level = "debug", skip_all, fields(query = query))]
pub(crate) async fn search_all<F: Fetcher + 'static>(registry: &Arc<Registry>, fetcher: &Arc<F>, query: &str) -> Vec<Hit> {
  if query.chars().count() < registry.min_search_len {
    return Vec::new();
  }

  let then = Instant::now();

  let workers = registry.max_workers.unwrap_or_else(|| registry.prefixes().count().clamp(1, MAX_DEFAULT_WORKERS));
  let semaphore = Arc::new(Semaphore::new(workers.max(1)));
  let cancelled = Arc::new(AtomicBool::new(false));

  let mut tasks = JoinSet::new();

  for prefix in registry.prefixes().cloned() {
    let registry = Arc::clone(registry);
    let fetcher = Arc::clone(fetcher);
    let semaphore = Arc::clone(&semaphore);
    let cancelled = Arc::clone(&cancelled);
    let query = query.to_string();

    tasks.spawn(async move {
      let Ok(_permit) = semaphore.acquire_owned().await else {
        return (prefix, Ok(Vec::new()));
      };

      // Queued work checks the flag once it gets a slot; in-flight network
      // calls are never interrupted.
      if cancelled.load(Ordering::Relaxed) {
        return (prefix, Ok(Vec::new()));
      }

      let Some(provider) = registry.provider(&prefix) else {
        return (prefix, Ok(Vec::new()));
      };

      let hits = provider.search(fetcher.as_ref(), &query, &registry.lang).await;

      (prefix, hits)
    });
  }

  let mut seen = HashSet::<String, RandomState>::default();
  let mut results = Vec::new();

  while let Some(joined) = tasks.join_next().await {
    match joined {
      Err(err) => {
        counter!("sonda_provider_failures").increment(1);
        tracing::warn!(error = err.to_string(), "provider task failed");
      }

      Ok((prefix, Err(err))) => {
        counter!("sonda_provider_failures", "provider" => prefix.clone()).increment(1);
        tracing::warn!(provider = prefix, error = err.to_string(), "provider search failed");
      }

      Ok((prefix, Ok(hits))) => {
        if cancelled.load(Ordering::Relaxed) {
          tracing::debug!(provider = prefix, discarded = hits.len(), "discarding late results");

          continue;
        }

        for hit in hits {
          if hit.id.is_empty() || !seen.insert(hit.id.clone()) {
            continue;
          }

          results.push(hit);

          if registry.max_total_hits.is_some_and(|cap| results.len() >= cap) {
            cancelled.store(true, Ordering::Relaxed);

            break;
          }
        }
      }
    }
  }

  match registry.sort {
    Some(SortKey::Id) => results.sort_by_key(|hit| hit.id.to_lowercase()),
    Some(SortKey::Text) => results.sort_by_key(|hit| hit.text.to_lowercase()),
    None => {}
  }

  histogram!("sonda_search_latency_seconds").record(then.elapsed().as_secs_f64());

  tracing::debug!(hits = results.len(), latency = then.elapsed().as_millis() as u64, "merged provider results");

  results
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use serde_json::json;

  use crate::{config::Config, fetch::TestFetcher, provider::Registry};

  use super::search_all;

  fn two_local_providers(extra: &str) -> Arc<Registry> {
    let index_a = std::env::temp_dir().join("sonda-aggregator-a.json");
    let index_b = std::env::temp_dir().join("sonda-aggregator-b.json");

    std::fs::write(&index_a, json!([{"pid": "1", "name": "Widget"}]).to_string()).unwrap();
    std::fs::write(&index_b, json!([{"pid": "1", "name": "Widget duplicate"}, {"pid": "2", "name": "Widget gadget"}]).to_string()).unwrap();

    let config = Config::parse(&format!(
      r#"
        min_search_len = 3
        {extra}

        [[providers]]
        id_prefix = "x"
        engine = "local_index"

        [providers.search]
        path = "{}"
        id_path = "pid"
        label_path = "name"

        [[providers]]
        id_prefix = "y"
        engine = "local_index"

        [providers.search]
        path = "{}"
        id_path = "pid"
        label_path = "name"
      "#,
      index_a.display(),
      index_b.display(),
    ))
    .unwrap();

    Arc::new(Registry::build(config).unwrap())
  }

  #[tokio::test]
  async fn deduplicates_by_id_across_providers() {
    // Both providers return pid 1; provider y also knows pid 2. Which text
    // wins for x:1 vs y:1 depends on completion order, but ids are unique.
    let registry = two_local_providers("");
    let fetcher = Arc::new(TestFetcher::default());

    let hits = search_all(&registry, &fetcher, "widget").await;

    let mut ids = hits.iter().map(|hit| hit.id.as_str()).collect::<Vec<_>>();
    ids.sort_unstable();

    assert_eq!(ids, vec!["x:1", "y:1", "y:2"]);
  }

  #[tokio::test]
  async fn duplicate_ids_are_merged_once() {
    let index = std::env::temp_dir().join("sonda-aggregator-dup.json");
    std::fs::write(&index, json!([{"pid": "1", "name": "Widget"}, {"pid": "1", "name": "Widget again"}]).to_string()).unwrap();

    let config = Config::parse(&format!(
      r#"
        [[providers]]
        id_prefix = "x"
        engine = "local_index"

        [providers.search]
        path = "{}"
        id_path = "pid"
        label_path = "name"
      "#,
      index.display(),
    ))
    .unwrap();

    let registry = Arc::new(Registry::build(config).unwrap());
    let hits = search_all(&registry, &Arc::new(TestFetcher::default()), "widget").await;

    // Either text is acceptable; uniqueness of the id is the invariant.
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "x:1");
  }

  #[tokio::test]
  async fn short_queries_short_circuit() {
    let registry = two_local_providers("");
    let fetcher = Arc::new(TestFetcher::default());

    assert!(search_all(&registry, &fetcher, "wi").await.is_empty());
  }

  #[tokio::test]
  async fn total_cap_truncates_without_error() {
    let registry = two_local_providers("max_total_hits = 1");
    let fetcher = Arc::new(TestFetcher::default());

    let hits = search_all(&registry, &fetcher, "widget").await;

    assert_eq!(hits.len(), 1);
  }

  #[tokio::test]
  async fn sorted_output_is_deterministic() {
    let registry = two_local_providers(r#"sort = "text""#);
    let fetcher = Arc::new(TestFetcher::default());

    let hits = search_all(&registry, &fetcher, "widget").await;
    let texts = hits.iter().map(|hit| hit.text.as_str()).collect::<Vec<_>>();

    let mut expected = texts.clone();
    expected.sort_unstable();

    assert_eq!(texts, expected);
    assert_eq!(hits.len(), 3);
  }

  #[tokio::test]
  async fn failing_provider_is_isolated() {
    // One provider points at an unreadable index; the other still answers.
    let index = std::env::temp_dir().join("sonda-aggregator-ok.json");
    std::fs::write(&index, json!([{"pid": "1", "name": "Widget"}]).to_string()).unwrap();

    let config = Config::parse(&format!(
      r#"
        [[providers]]
        id_prefix = "broken"
        engine = "local_index"

        [providers.search]
        path = "/nonexistent/index.json"
        id_path = "pid"

        [[providers]]
        id_prefix = "ok"
        engine = "local_index"

        [providers.search]
        path = "{}"
        id_path = "pid"
        label_path = "name"
      "#,
      index.display(),
    ))
    .unwrap();

    let registry = Arc::new(Registry::build(config).unwrap());
    let hits = search_all(&registry, &Arc::new(TestFetcher::default()), "widget").await;

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "ok:1");
  }
}
