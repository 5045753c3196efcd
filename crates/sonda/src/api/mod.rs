use std::time::Duration;

use axum::{
  Router,
  extract::Request,
  middleware,
  routing::get,
};
use libsonda::{Fetcher, HttpFetcher, Sonda};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use uuid::Uuid;

use crate::api::config::Config;

pub mod config;
pub mod dto;
pub mod errors;

mod handlers;
mod middlewares;

#[derive(Clone)]
pub struct AppState<F: Fetcher = HttpFetcher> {
  pub config: Config,
  pub prometheus: Option<PrometheusHandle>,
  pub sonda: Sonda<F>,
}

pub fn routes<F: Fetcher + Clone + 'static>(config: &Config, sonda: Sonda<F>) -> anyhow::Result<Router> {
  let prometheus = match config.enable_prometheus {
    true => Some(PrometheusBuilder::new().add_global_label("service", "sonda").install_recorder()?),
    false => None,
  };

  let state = AppState {
    config: config.clone(),
    prometheus,
    sonda,
  };

  Ok(
    Router::new()
      .route("/search", get(handlers::search))
      .route("/detail/{id}", get(handlers::detail))
      .route("/attributes/{id}", get(handlers::attributes))
      .fallback(handlers::not_found)
      .layer(TimeoutLayer::new(Duration::from_secs(30)))
      .layer(TraceLayer::new_for_http().make_span_with(|_req: &Request| {
        let request_id = Uuid::new_v4();

        tracing::info_span!("request", %request_id)
      }))
      // The routes below will not go through the observability layers above.
      .route("/healthz", get(handlers::healthz))
      .route("/metrics", get(handlers::prometheus))
      .layer(middleware::from_fn(middlewares::api_logger))
      .layer(middleware::from_fn(middlewares::request_id))
      .with_state(state),
  )
}
