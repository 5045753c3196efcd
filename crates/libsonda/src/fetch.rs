//! Source clients: one fetch, one document, never a panic or an error.

use std::{collections::HashMap, future::Future, time::Duration};

use anyhow::Context;
use rust_embed::Embed;
use serde_json::json;

use crate::{error::SondaError, model::Document};

const HTTP_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Embed)]
#[folder = "assets"]
struct Assets;

/// The seam between providers and the outside world. Implementations must
/// uphold the two degradation contracts:
///
///  - `fetch_json` returns `{"errors": [...]}` for every failure mode
///    (missing file, malformed payload, network error, non-2xx response) and
///    never errors out;
///  - `sparql_post` returns an *empty* document on failure instead. The
///    asymmetry is intentional: SPARQL failures are expected to be silently
///    filtered away by downstream path evaluation.
pub trait Fetcher: Send + Sync {
  fn fetch_json(&self, url: &str) -> impl Future<Output = Document> + Send;
  fn sparql_post(&self, endpoint: &str, query: &str) -> impl Future<Output = Document> + Send;
}

pub(crate) fn error_document(message: String) -> Document {
  json!({ "errors": [message] })
}

/// Error-shaped documents are terminal: callers treat them as empty results.
pub fn is_error_document(doc: &Document) -> bool {
  doc.as_object().is_some_and(|fields| fields.contains_key("errors"))
}

/// Standardized polite User-Agent, decorated with the operator's domain and
/// contact when configured.
pub fn user_agent(domain: Option<&str>, contact: Option<&str>) -> String {
  let base = concat!("sonda/", env!("CARGO_PKG_VERSION"), " Instrument Search");
  let mut meta = Vec::new();

  if let Some(domain) = domain {
    meta.push(format!("https://{domain}"));
  }
  if let Some(contact) = contact {
    meta.push(contact.to_string());
  }

  match meta.is_empty() {
    true => base.to_string(),
    false => format!("{base} (+{})", meta.join("; ")),
  }
}

/// Production fetcher, resolving in order: the `static://` bundled-asset
/// scheme, `file://` or bare filesystem paths, and HTTP(S) GET.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new(user_agent: &str) -> Result<HttpFetcher, SondaError> {
    let client = reqwest::Client::builder()
      .user_agent(user_agent)
      .timeout(HTTP_TIMEOUT)
      .build()
      .context("could not build http client")?;

    Ok(HttpFetcher { client })
  }

  async fn get_json(&self, url: &str) -> reqwest::Result<Document> {
    self.client.get(url).send().await?.error_for_status()?.json().await
  }

  async fn post_sparql(&self, endpoint: &str, query: &str) -> reqwest::Result<Document> {
    self
      .client
      .post(endpoint)
      .header("Accept", "application/sparql-results+json")
      .query(&[("format", "json")])
      .form(&[("query", query)])
      .send()
      .await?
      .error_for_status()?
      .json()
      .await
  }
}

impl Fetcher for HttpFetcher {
  async fn fetch_json(&self, url: &str) -> Document {
    if url.is_empty() {
      return json!({});
    }

    if let Some(asset) = url.strip_prefix("static://") {
      return load_static(asset.trim_start_matches('/'));
    }

    if let Some(path) = url.strip_prefix("file://") {
      return load_local(path).await;
    }

    if !url.contains("://") {
      return load_local(url).await;
    }

    tracing::info!(url = url, "fetching json");

    match self.get_json(url).await {
      Ok(doc) => doc,

      Err(err) => {
        tracing::error!(url = url, error = err.to_string(), "request failed");

        error_document(err.to_string())
      }
    }
  }

  async fn sparql_post(&self, endpoint: &str, query: &str) -> Document {
    match self.post_sparql(endpoint, query).await {
      Ok(doc) => doc,

      Err(err) => {
        tracing::warn!(endpoint = endpoint, error = err.to_string(), "sparql request failed");

        json!({})
      }
    }
  }
}

fn load_static(asset: &str) -> Document {
  tracing::info!(asset = asset, "loading bundled json");

  let Some(file) = Assets::get(asset) else {
    tracing::error!(asset = asset, "bundled asset not found");

    return error_document(format!("asset not found: {asset}"));
  };

  match serde_json::from_slice(&file.data) {
    Ok(doc) => doc,

    Err(err) => {
      tracing::error!(asset = asset, error = err.to_string(), "invalid bundled json");

      error_document(format!("invalid json: {asset}: {err}"))
    }
  }
}

async fn load_local(path: &str) -> Document {
  tracing::info!(path = path, "loading local json");

  let content = match tokio::fs::read_to_string(path).await {
    Ok(content) => content,

    Err(err) => {
      tracing::error!(path = path, error = err.to_string(), "could not read local json");

      return error_document(format!("file not found: {path}"));
    }
  };

  match serde_json::from_str(&content) {
    Ok(doc) => doc,

    Err(err) => {
      tracing::error!(path = path, error = err.to_string(), "invalid local json");

      error_document(format!("invalid json: {path}: {err}"))
    }
  }
}

/// In-memory fetcher serving canned responses, for tests and offline runs.
#[derive(Clone, Debug, Default)]
pub struct TestFetcher {
  responses: HashMap<String, Document>,
  sparql_responses: HashMap<String, Document>,
}

impl TestFetcher {
  pub fn respond(mut self, url: &str, doc: Document) -> TestFetcher {
    self.responses.insert(url.to_string(), doc);
    self
  }

  pub fn respond_sparql(mut self, endpoint: &str, doc: Document) -> TestFetcher {
    self.sparql_responses.insert(endpoint.to_string(), doc);
    self
  }
}

impl Fetcher for TestFetcher {
  async fn fetch_json(&self, url: &str) -> Document {
    self.responses.get(url).cloned().unwrap_or_else(|| error_document(format!("no canned response for {url}")))
  }

  async fn sparql_post(&self, endpoint: &str, _query: &str) -> Document {
    self.sparql_responses.get(endpoint).cloned().unwrap_or_else(|| json!({}))
  }
}
