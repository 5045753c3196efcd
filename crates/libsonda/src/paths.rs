//! Declarative extraction paths over nested documents.
//!
//! This is the narrow expression language the recipes need, nothing more:
//! dotted field access (`attributes.long_name`), numeric indexing
//! (`titles[0].title`) and list projection (`records[].name`, applying the
//! remaining path to every element). `@` selects the whole document. A path
//! that cannot be evaluated yields absence, never an error.

use crate::model::Document;

#[derive(Debug, Eq, PartialEq)]
enum Segment<'p> {
  Field(&'p str),
  Index(usize),
  Project,
}

/// Evaluate `expr` against `doc`. `None` means the path did not resolve,
/// which callers treat the same as an explicitly absent value.
pub fn eval(expr: &str, doc: &Document) -> Option<Document> {
  let segments = parse(expr)?;

  eval_segments(doc, &segments)
}

fn parse(expr: &str) -> Option<Vec<Segment<'_>>> {
  let expr = expr.trim();

  if expr.is_empty() {
    return None;
  }
  if expr == "@" {
    return Some(Vec::new());
  }

  let mut segments = Vec::new();

  for part in expr.split('.') {
    let mut rest = part;

    while !rest.is_empty() {
      match rest.find('[') {
        None => {
          segments.push(Segment::Field(rest));
          rest = "";
        }

        Some(open) => {
          if open > 0 {
            segments.push(Segment::Field(&rest[..open]));
          }

          let close = open + rest[open..].find(']')?;
          let inner = &rest[open + 1..close];

          if inner.is_empty() {
            segments.push(Segment::Project);
          } else {
            segments.push(Segment::Index(inner.parse().ok()?));
          }

          rest = &rest[close + 1..];
        }
      }
    }
  }

  Some(segments)
}

fn eval_segments(value: &Document, segments: &[Segment<'_>]) -> Option<Document> {
  let Some((head, rest)) = segments.split_first() else {
    return Some(value.clone());
  };

  match head {
    Segment::Field(name) => eval_segments(value.as_object()?.get(*name)?, rest),
    Segment::Index(index) => eval_segments(value.as_array()?.get(*index)?, rest),

    Segment::Project => {
      let mut projected = Vec::new();

      for item in value.as_array()? {
        match eval_segments(item, rest) {
          Some(Document::Array(values)) => projected.extend(values),
          Some(Document::Null) | None => {}
          Some(value) => projected.push(value),
        }
      }

      Some(Document::Array(projected))
    }
  }
}

/// A value is meaningful unless it is null, an empty string, an empty list or
/// an empty object. Plain falsy scalars (zero, `false`) pass through.
pub(crate) fn is_meaningful(value: &Document) -> bool {
  match value {
    Document::Null => false,
    Document::String(text) => !text.is_empty(),
    Document::Array(items) => !items.is_empty(),
    Document::Object(fields) => !fields.is_empty(),
    _ => true,
  }
}

/// Collapse a list to its first meaningful element; scalars pass through.
pub(crate) fn first_meaningful(value: Document) -> Option<Document> {
  match value {
    Document::Array(items) => items.into_iter().find(is_meaningful),
    value => Some(value),
  }
}

/// Render a scalar as a trimmed string, for remote ids and labels. Compound
/// values and blank strings yield `None`.
pub(crate) fn scalar_to_string(value: &Document) -> Option<String> {
  let text = match value {
    Document::String(text) => text.trim().to_string(),
    Document::Number(number) => number.to_string(),
    Document::Bool(flag) => flag.to_string(),
    _ => return None,
  };

  if text.is_empty() { None } else { Some(text) }
}
