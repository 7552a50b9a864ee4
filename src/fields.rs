//! The caller's field contract.
//!
//! A [`FieldSpec`] is the ordered set of field names the caller wants
//! extracted from the recognized text. It is validated once at request entry,
//! and every later stage (prompt, response schema, normalization) is derived
//! from it, so the response key set always matches the request.

use serde::Serialize;
use serde_json::Value;

use crate::error::PipelineError;

/// A JSON object. With `preserve_order` enabled, iteration follows insertion
/// order, which we rely on to keep extraction results in request order.
pub type JsonObject = serde_json::Map<String, Value>;

/// The extraction result: one string value per requested field, in the order
/// the caller requested them. Unresolved fields map to `""`.
pub type ExtractionResult = JsonObject;

/// Fields extracted when the caller doesn't ask for anything specific.
pub const DEFAULT_FIELDS: &[&str] = &["nome", "sobrenome", "data_nascimento"];

/// An ordered set of unique, non-empty field names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FieldSpec(Vec<String>);

impl FieldSpec {
    /// Build a spec from a list of names, deduplicating while preserving the
    /// caller's order. Fails if the list is empty or contains an empty name.
    pub fn new(names: impl IntoIterator<Item = String>) -> Result<Self, PipelineError> {
        let mut unique = Vec::new();
        for name in names {
            if name.trim().is_empty() {
                return Err(PipelineError::validation(
                    "field names must be non-empty strings",
                ));
            }
            if !unique.contains(&name) {
                unique.push(name);
            }
        }
        if unique.is_empty() {
            return Err(PipelineError::validation(
                "field list must contain at least one name",
            ));
        }
        Ok(FieldSpec(unique))
    }

    /// Parse the `campos` form field: a JSON-encoded array of strings.
    pub fn parse_json(raw: &str) -> Result<Self, PipelineError> {
        let value: Value = serde_json::from_str(raw).map_err(|err| {
            PipelineError::validation(format!("`campos` is not valid JSON: {err}"))
        })?;
        let items = value.as_array().ok_or_else(|| {
            PipelineError::validation("`campos` must be a JSON array of strings")
        })?;
        let names = items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_owned).ok_or_else(|| {
                    PipelineError::validation("`campos` must contain only strings")
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(names)
    }

    /// The field names, in request order.
    pub fn names(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// An extraction result with every field mapped to the empty string. Used
    /// both as the prompt's shape skeleton and as the degradation fallback.
    pub fn empty_result(&self) -> ExtractionResult {
        self.0
            .iter()
            .map(|name| (name.clone(), Value::String(String::new())))
            .collect()
    }
}

impl Default for FieldSpec {
    fn default() -> Self {
        FieldSpec(DEFAULT_FIELDS.iter().map(|s| s.to_string()).collect())
    }
}
