use std::{collections::HashMap, sync::Arc};

use crate::{
  aggregator,
  config::Config,
  error::SondaError,
  fetch::{Fetcher, HttpFetcher, user_agent},
  mapper,
  model::{AttributeMap, Document, Hit},
  provider::Registry,
};

/// The main entrypoint for using the sonda library.
///
/// A `Sonda` is the explicit context object built once from configuration:
/// it owns the provider registry, the attribute handlers and the fetcher
/// talking to the outside world. It can be cloned cheaply and shared across
/// tasks; nothing in it mutates after construction apart from lazy local
/// index loads, which are single-flight.
///
/// # Examples
///
/// ```rust
/// # use libsonda::prelude::*;
/// # tokio_test::block_on(async {
///   let config = Config::parse(r#"
///     [[providers]]
///     id_prefix = "pidinst"
///     engine = "local_index"
///
///     [providers.search]
///     path = "static://instruments-sample.json"
///     items_path = "items"
///     id_path = "pid"
///     label_path = "name"
///   "#).unwrap();
///
///   let sonda = Sonda::new(config).unwrap();
///
///   for hit in sonda.search("spectrometer").await {
///     println!("{}: {}", hit.id, hit.text);
///   }
/// # });
/// ```
#[derive(Debug)]
pub struct Sonda<F: Fetcher = HttpFetcher> {
  fetcher: Arc<F>,
  registry: Arc<Registry>,
}

impl<F: Fetcher> Clone for Sonda<F> {
  fn clone(&self) -> Sonda<F> {
    Sonda {
      fetcher: Arc::clone(&self.fetcher),
      registry: Arc::clone(&self.registry),
    }
  }
}

impl Sonda<HttpFetcher> {
  /// Build the context from a validated configuration, with an HTTP-backed
  /// fetcher carrying the configured User-Agent.
  pub fn new(config: Config) -> Result<Sonda<HttpFetcher>, SondaError> {
    let agent = user_agent(config.user_agent_domain.as_deref(), config.user_agent_contact.as_deref());
    let fetcher = HttpFetcher::new(&agent)?;

    Sonda::with_fetcher(config, fetcher)
  }
}

impl<F: Fetcher> Sonda<F> {
  /// Build the context with a custom fetcher implementation.
  pub fn with_fetcher(config: Config, fetcher: F) -> Result<Sonda<F>, SondaError> {
    Ok(Sonda {
      fetcher: Arc::new(fetcher),
      registry: Arc::new(Registry::build(config)?),
    })
  }
}

impl<F: Fetcher + 'static> Sonda<F> {
  /// Typeahead search across every configured provider: a short, ranked,
  /// deduplicated list of options. Degrades to partial or empty results,
  /// never to an error.
  pub async fn search(&self, query: &str) -> Vec<Hit> {
    aggregator::search_all(&self.registry, &self.fetcher, query).await
  }

  /// Resolve and flatten the full record behind one previously-returned
  /// option id (`<prefix>:<remote id>`). The document may be empty when the
  /// source has nothing for the id.
  pub async fn detail(&self, id: &str) -> Result<Document, SondaError> {
    let (prefix, remote_id) = split_id(id)?;
    let provider = self.registry.provider(prefix).ok_or_else(|| SondaError::UnknownProvider(prefix.to_string()))?;

    provider.detail(self.fetcher.as_ref(), remote_id).await
  }

  /// Resolve the detail document for `id` and map it into canonical
  /// attribute identifiers through the handler bound to the id's prefix.
  /// Every mapping key is present in the output; `null` marks an explicit
  /// absence.
  pub async fn resolve_attributes(&self, id: &str) -> Result<AttributeMap, SondaError> {
    let (prefix, _) = split_id(id)?;
    let mapping = self.registry.handler(prefix).ok_or_else(|| SondaError::UnknownHandler(prefix.to_string()))?;

    let doc = self.detail(id).await?;
    let context = HashMap::from([("lang".to_string(), self.registry.lang.clone())]);

    Ok(mapper::map_attributes(mapping, &doc, &context))
  }
}

fn split_id(id: &str) -> Result<(&str, &str), SondaError> {
  id.split_once(':')
    .filter(|(prefix, remote_id)| !prefix.is_empty() && !remote_id.is_empty())
    .ok_or_else(|| SondaError::InvalidId(id.to_string()))
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use crate::{config::Config, error::SondaError, fetch::TestFetcher};

  use super::{Sonda, split_id};

  fn sonda(fetcher: TestFetcher) -> Sonda<TestFetcher> {
    let config = Config::parse(
      r#"
        lang = "de"

        [[providers]]
        id_prefix = "gfz"
        engine = "recipe"
        base_url = "https://sensors.example.org"

        [providers.search]
        mode = "server"
        url = "{base_url}/devices?q={query}"
        items_path = "data"
        id_path = "id"
        label_path = "name"

        [[providers.detail.steps]]
        url = "{base_url}/devices/{id}"

        [[handlers]]
        id_prefix = "gfz"

        [handlers.attribute_mapping]
        "labels.{lang} || name" = "https://rdm.example.org/terms/instrument/name"
        "serial" = "https://rdm.example.org/terms/instrument/serial"
      "#,
    )
    .unwrap();

    Sonda::with_fetcher(config, fetcher).unwrap()
  }

  #[test]
  fn split_ids() {
    assert_eq!(split_id("gfz:42").unwrap(), ("gfz", "42"));
    assert_eq!(split_id("pidinst:21.T11998/x:y").unwrap(), ("pidinst", "21.T11998/x:y"));

    assert!(matches!(split_id("no-colon"), Err(SondaError::InvalidId(_))));
    assert!(matches!(split_id(":remote"), Err(SondaError::InvalidId(_))));
    assert!(matches!(split_id("prefix:"), Err(SondaError::InvalidId(_))));
  }

  #[tokio::test]
  async fn search_routes_through_providers() {
    let fetcher = TestFetcher::default().respond(
      "https://sensors.example.org/devices?q=spectro",
      json!({"data": [{"id": 1, "name": "Spectrometer"}]}),
    );

    let hits = sonda(fetcher).search("spectro").await;

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "gfz:1");
  }

  #[tokio::test]
  async fn detail_dispatches_by_prefix() {
    let fetcher = TestFetcher::default().respond("https://sensors.example.org/devices/1", json!({"name": "Spectrometer", "serial": "XS-1"}));

    let sonda = sonda(fetcher);
    let doc = sonda.detail("gfz:1").await.unwrap();

    assert_eq!(doc["serial"], json!("XS-1"));

    assert!(matches!(sonda.detail("nope:1").await, Err(SondaError::UnknownProvider(_))));
    assert!(matches!(sonda.detail("malformed").await, Err(SondaError::InvalidId(_))));
  }

  #[tokio::test]
  async fn attributes_map_with_language_context() {
    let fetcher = TestFetcher::default().respond(
      "https://sensors.example.org/devices/1",
      json!({"name": "Spectrometer", "labels": {"de": "Spektrometer"}}),
    );

    let sonda = sonda(fetcher);
    let attributes = sonda.resolve_attributes("gfz:1").await.unwrap();

    assert_eq!(attributes["https://rdm.example.org/terms/instrument/name"], json!("Spektrometer"));
    // Unresolved attributes are still present, as explicit absences.
    assert_eq!(attributes["https://rdm.example.org/terms/instrument/serial"], json!(null));

    assert!(matches!(sonda.resolve_attributes("other:1").await, Err(SondaError::UnknownHandler(_))));
  }
}
