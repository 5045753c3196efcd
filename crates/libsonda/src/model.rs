use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// The universal currency between the source client, the path evaluator and
/// the field mapper: an arbitrary nested mapping/array/scalar tree. No fixed
/// schema; paths into it are defined per provider.
pub type Document = serde_json::Value;

/// Output of attribute resolution. Every configured mapping key is present,
/// with `Document::Null` standing for "no meaningful value was found" so that
/// consumers can distinguish "clear this attribute" from "leave it unchanged".
pub type AttributeMap = HashMap<String, Document>;

/// One typeahead result. The `id` is always `<provider prefix>:<remote id>`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Hit {
  pub id: String,
  pub text: String,
}

impl Hit {
  pub fn new(id: impl Into<String>, text: impl Into<String>) -> Hit {
    Hit { id: id.into(), text: text.into() }
  }
}
