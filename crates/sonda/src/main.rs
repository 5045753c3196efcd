mod api;
mod trace;

#[cfg(test)]
mod tests;

use libsonda::{Fetcher, Sonda};
use tokio::signal;

use crate::api::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  let config = Config::from_env()?;
  let sonda = Sonda::new(libsonda::Config::from_path(&config.config_path)?)?;

  run(config, sonda).await
}

async fn run<F: Fetcher + Clone + 'static>(config: Config, sonda: Sonda<F>) -> anyhow::Result<()> {
  let _guard = trace::init_tracing(&config);
  let app = api::routes(&config, sonda)?;

  let listener = tokio::net::TcpListener::bind(&config.listen_addr).await.expect("could not create listener");

  tracing::info!(sonda = env!("CARGO_PKG_VERSION"), "listening on {}", listener.local_addr()?.to_string());

  axum::serve(listener, app).with_graceful_shutdown(shutdown()).await.expect("could not start app");

  Ok(())
}

async fn shutdown() {
  let ctrl_c = async {
    signal::ctrl_c().await.expect("failed to install ^C handler");
  };

  let terminate = async {
    signal::unix::signal(signal::unix::SignalKind::terminate())
      .expect("failed to install terminate signal handler")
      .recv()
      .await;
  };

  tokio::select! {
      () = ctrl_c => tracing::info!("received ^C, initiating shutdown"),
      () = terminate => tracing::info!("received terminate signal, initiating shutdown"),
  }
}
