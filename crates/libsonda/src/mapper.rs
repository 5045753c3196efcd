//! Mapping of extraction expressions to canonical attribute identifiers.

use std::collections::HashMap;

use crate::{
  model::{AttributeMap, Document},
  paths,
};

/// Substitute `{key}` placeholders from `context`. Returns `None` when a
/// placeholder has no binding or braces are unbalanced, so callers can fall
/// back to the unrendered expression.
pub(crate) fn render(template: &str, context: &HashMap<String, String>) -> Option<String> {
  let mut rendered = String::with_capacity(template.len());
  let mut rest = template;

  while let Some(open) = rest.find('{') {
    rendered.push_str(&rest[..open]);

    let after = &rest[open + 1..];
    let close = after.find('}')?;

    rendered.push_str(context.get(&after[..close])?);

    rest = &after[close + 1..];
  }

  if rest.contains('}') {
    return None;
  }

  rendered.push_str(rest);

  Some(rendered)
}

/// Evaluate a mapping of `path expression -> attribute identifier` over a
/// document.
///
/// Each raw key is an ordered `||` fallback chain. Candidates may carry
/// `{lang}`-style placeholders resolved from `context` (an expression is used
/// unchanged when substitution fails). Unless a candidate ends in `[]`, a list
/// result is collapsed to its first meaningful element. The first candidate
/// producing a meaningful value wins.
///
/// Every attribute identifier appears in the output: `Document::Null` marks
/// the explicit absence downstream clearing logic acts on.
pub fn map_attributes(mapping: &HashMap<String, String>, doc: &Document, context: &HashMap<String, String>) -> AttributeMap {
  let mut mapped = AttributeMap::new();

  for (raw_key, attribute) in mapping {
    let mut value = Document::Null;

    for candidate in raw_key.split("||").map(str::trim).filter(|candidate| !candidate.is_empty()) {
      let expr = render(candidate, context).unwrap_or_else(|| candidate.to_string());

      let Some(evaluated) = paths::eval(&expr, doc) else {
        continue;
      };

      let evaluated = match candidate.ends_with("[]") {
        true => evaluated,
        false => match paths::first_meaningful(evaluated) {
          Some(collapsed) => collapsed,
          None => continue,
        },
      };

      if paths::is_meaningful(&evaluated) {
        value = evaluated;
        break;
      }
    }

    mapped.insert(attribute.clone(), value);
  }

  tracing::debug!(attributes = mapped.len(), "mapped document to attributes");

  mapped
}
