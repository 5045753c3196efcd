use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
pub struct SearchParams {
  #[serde(default, alias = "search")]
  pub q: String,
}
