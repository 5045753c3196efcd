use axum_test::TestServer;
use libsonda::{Sonda, TestFetcher};
use serde_json::json;

use crate::api;

fn server(fetcher: TestFetcher) -> TestServer {
  let config = crate::api::config::Config {
    env: crate::api::config::Env::Dev,
    listen_addr: "127.0.0.1:0".to_string(),
    config_path: String::new(),
    enable_prometheus: false,
  };

  let providers = libsonda::Config::parse(
    r#"
      [[providers]]
      id_prefix = "gfz"
      engine = "recipe"
      base_url = "https://sensors.example.org"
      text_prefix = "GFZ:"

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
      "name" = "https://rdm.example.org/terms/instrument/name"
      "serial" = "https://rdm.example.org/terms/instrument/serial"
    "#,
  )
  .unwrap();

  let sonda = Sonda::with_fetcher(providers, fetcher).unwrap();
  let app = api::routes(&config, sonda).unwrap();

  TestServer::try_new(app).unwrap()
}

#[tokio::test]
async fn search_returns_hits() {
  let fetcher = TestFetcher::default().respond(
    "https://sensors.example.org/devices?q=spectro",
    json!({"data": [{"id": 1, "name": "Spectrometer"}]}),
  );

  let response = server(fetcher).get("/search").add_query_param("q", "spectro").await;

  response.assert_status_ok();
  response.assert_json(&json!([{"id": "gfz:1", "text": "GFZ: Spectrometer"}]));
}

#[tokio::test]
async fn short_queries_return_empty_results() {
  let response = server(TestFetcher::default()).get("/search").add_query_param("q", "sp").await;

  response.assert_status_ok();
  response.assert_json(&json!([]));
}

#[tokio::test]
async fn detail_resolves_record() {
  let fetcher = TestFetcher::default().respond("https://sensors.example.org/devices/1", json!({"name": "Spectrometer", "serial": "XS-1"}));

  let response = server(fetcher).get("/detail/gfz:1").await;

  response.assert_status_ok();
  response.assert_json(&json!({"name": "Spectrometer", "serial": "XS-1"}));
}

#[tokio::test]
async fn detail_unknown_prefix_is_not_found() {
  let response = server(TestFetcher::default()).get("/detail/unknown:1").await;

  response.assert_status_not_found();
}

#[tokio::test]
async fn detail_malformed_id_is_bad_request() {
  let response = server(TestFetcher::default()).get("/detail/no-prefix").await;

  response.assert_status_bad_request();
}

#[tokio::test]
async fn attributes_map_with_explicit_absences() {
  let fetcher = TestFetcher::default().respond("https://sensors.example.org/devices/1", json!({"name": "Spectrometer"}));

  let response = server(fetcher).get("/attributes/gfz:1").await;

  response.assert_status_ok();
  response.assert_json(&json!({
    "https://rdm.example.org/terms/instrument/name": "Spectrometer",
    "https://rdm.example.org/terms/instrument/serial": null,
  }));
}

#[tokio::test]
async fn healthz() {
  server(TestFetcher::default()).get("/healthz").await.assert_status_ok();
}

#[tokio::test]
async fn metrics_disabled_is_not_found() {
  server(TestFetcher::default()).get("/metrics").await.assert_status_not_found();
}

#[tokio::test]
async fn unknown_route_is_not_found() {
  server(TestFetcher::default()).get("/nope").await.assert_status_not_found();
}
