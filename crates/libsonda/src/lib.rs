mod aggregator;
mod config;
mod error;
mod fetch;
mod mapper;
mod model;
mod paths;
mod provider;
mod sonda;
mod transforms;
mod wikidata;

pub mod prelude {
  pub use crate::config::{Config, SortKey};
  pub use crate::error::SondaError;
  pub use crate::fetch::{Fetcher, HttpFetcher, TestFetcher, is_error_document, user_agent};
  pub use crate::mapper::map_attributes;
  pub use crate::model::{AttributeMap, Document, Hit};
  pub use crate::sonda::Sonda;
}

pub use crate::prelude::*;
