use axum::{
  body::{Body, HttpBody},
  http::{Request, StatusCode},
  middleware::Next,
  response::Response,
};
use tokio::time::Instant;
use uuid::Uuid;

#[allow(dead_code)]
#[derive(Clone, Debug)]
pub(crate) struct RequestId(pub Uuid);

pub(crate) async fn request_id(request: Request<Body>, next: Next) -> Result<Response, StatusCode> {
  let (mut parts, body) = request.into_parts();
  let request_id = RequestId(Uuid::new_v4());

  parts.extensions.insert(request_id.clone());

  let mut response = next.run(Request::from_parts(parts, body)).await;

  response.extensions_mut().insert::<RequestId>(request_id);

  Ok(response)
}

pub(crate) async fn api_logger(request: Request<Body>, next: Next) -> Result<Response, StatusCode> {
  let method = request.method().clone();
  let uri = request.uri().clone();

  let then = Instant::now();
  let response = next.run(request).await;

  tracing::info!(
    method = %method,
    path = uri.path(),
    status = response.status().as_u16(),
    latency = then.elapsed().as_millis() as u64,
    size = response.size_hint().exact().unwrap_or(0),
    "{} {}",
    method,
    uri,
  );

  Ok(response)
}
