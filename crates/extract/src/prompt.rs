use crate::schema::{FieldMapping, ShapeTag};

/// System and user instructions for one extraction call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPair {
    pub system: String,
    pub user: String,
}

pub const SYSTEM_PROMPT: &str = r#"You are a medical data analyst. Extract structured data from health insurance documents according to the provided schema.
Return JSON matching the requested structure exactly: never return a single object when an array is requested, and never return an array when an object is requested.
Output only the JSON, with no markdown and no explanations."#;

/// Build the instruction pair for one document. Pure: the same inputs always
/// yield byte-identical output.
pub fn build_extraction_prompt(
    fields: &FieldMapping,
    shape: ShapeTag,
    document_text: &str,
) -> PromptPair {
    let schema_str = format!("{:#}", serde_json::Value::Object(fields.clone()));

    let shape_rule = match shape {
        ShapeTag::Object => "Return a single JSON object with these fields.",
        ShapeTag::Array => {
            "Return a JSON array where each element is an object with these fields, one element per record found."
        }
    };

    let user = format!(
        r#"SCHEMA:
{}

DOCUMENT TEXT:
{}

INSTRUCTIONS:
- Extract all available data according to the schema. Return as JSON {}.
- {}
- Only include fields whose values appear in the document. Do not invent data to complete the schema.

JSON OUTPUT:"#,
        schema_str,
        document_text,
        shape.as_str(),
        shape_rule
    );

    PromptPair {
        system: SYSTEM_PROMPT.to_string(),
        user,
    }
}
