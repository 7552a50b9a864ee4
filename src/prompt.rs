//! The field-contract prompt builder.
//!
//! Both the instruction text and the response schema are derived mechanically
//! from the caller's [`FieldSpec`], so the example shape shown to the model
//! is always consistent with what the normalizer later validates against.

use handlebars::Handlebars;
use serde_json::{Value, json};

use crate::fields::FieldSpec;

/// The built-in extraction instruction. Rendered with the field list and a
/// JSON skeleton mapping every requested field to an empty string.
const EXTRACTION_INSTRUCTION: &str = "\
Você é um assistente especializado em extrair dados estruturados de textos.
Analise o texto fornecido e extraia as seguintes informações:
{{#each campos}}
- {{{this}}}
{{/each}}

Se algum dado não estiver presente no texto, retorne string vazia para esse campo.

IMPORTANTE: Retorne APENAS um objeto JSON válido no formato:
{{{esqueleto}}}

Não inclua explicações, apenas o JSON.
";

/// Build the system-level instruction for a field list.
///
/// Pure and infallible: the spec is validated non-empty upstream, and
/// rendering a built-in template with programmatic bindings cannot fail.
pub fn build_instruction(fields: &FieldSpec) -> String {
    let skeleton = Value::Object(fields.empty_result()).to_string();
    Handlebars::new()
        .render_template(
            EXTRACTION_INSTRUCTION,
            &json!({
                "campos": fields.names(),
                "esqueleto": skeleton,
            }),
        )
        .expect("built-in extraction instruction should render")
}

/// Build the user-level message wrapping the recognized text.
pub fn user_message(text: &str) -> String {
    format!("Extraia os dados deste texto:\n\n{text}")
}

/// A strict JSON Schema for the response shape: a flat object with one
/// required string property per requested field and nothing else. Passed to
/// the model as a `response_format` so well-behaved providers enforce the
/// contract before the normalizer ever sees the reply.
pub fn response_schema(fields: &FieldSpec) -> Value {
    let mut properties = serde_json::Map::new();
    for name in fields.names() {
        properties.insert(name.clone(), json!({ "type": "string" }));
    }
    json!({
        "title": "DadosExtraidos",
        "type": "object",
        "properties": properties,
        // OpenAI requires `additionalProperties: false` and all properties
        // listed as required.
        "additionalProperties": false,
        "required": fields.names(),
    })
}
