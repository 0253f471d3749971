//! Tool-schema generation.
//!
//! Schemas declaring `properties.requests` as an array of objects get a
//! consistent `id` field injected into the items when the skill omitted
//! one, so the LLM sees the same request contract across every skill.

use serde_json::{Value, json};
use tracing::debug;

/// Inject the standard `id` field into `requests[]` items when missing.
/// Returns the schema unchanged when it has no object-typed `requests`
/// array or already declares `id`.
pub fn inject_request_id_field(mut schema: Value, skill_id: &str) -> Value {
    let Some(requests) = schema
        .get_mut("properties")
        .and_then(|p| p.get_mut("requests"))
    else {
        return schema;
    };
    if requests.get("type").and_then(Value::as_str) != Some("array") {
        return schema;
    }
    let Some(items) = requests.get_mut("items") else {
        return schema;
    };
    if items.get("type").and_then(Value::as_str) != Some("object") {
        return schema;
    }

    let properties = items
        .as_object_mut()
        .and_then(|o| o.entry("properties").or_insert_with(|| json!({})).as_object_mut());
    let Some(properties) = properties else {
        return schema;
    };
    if properties.contains_key("id") {
        debug!(skill_id, "schema already declares an id field, keeping it");
        return schema;
    }

    properties.insert(
        "id".to_string(),
        json!({
            "type": ["string", "integer"],
            "description": "Unique identifier for this request (number or UUID string). \
                Must be unique within a single skill call. Optional for single requests \
                (defaults to 1); required for multiple requests so responses can be \
                matched to requests.",
        }),
    );
    debug!(skill_id, "injected id field into requests items");
    schema
}

/// Build the tool definition exposed to the LLM for one skill, named
/// `"{app_id}-{skill_id}"` to match the preselection identifiers.
pub fn tool_definition(
    app_id: &str,
    skill_id: &str,
    description: Option<&str>,
    schema: Value,
) -> Value {
    json!({
        "name": format!("{app_id}-{skill_id}"),
        "description": description.unwrap_or(""),
        "parameters": inject_request_id_field(schema, skill_id),
    })
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn requests_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "requests": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": { "url": { "type": "string" } }
                    }
                }
            }
        })
    }

    #[test]
    fn injects_id_into_object_request_items() {
        let out = inject_request_id_field(requests_schema(), "transcript");
        let id = &out["properties"]["requests"]["items"]["properties"]["id"];
        assert_eq!(id["type"], json!(["string", "integer"]));
    }

    #[test]
    fn keeps_existing_id_definition() {
        let mut schema = requests_schema();
        schema["properties"]["requests"]["items"]["properties"]["id"] =
            json!({ "type": "integer" });
        let out = inject_request_id_field(schema, "transcript");
        assert_eq!(
            out["properties"]["requests"]["items"]["properties"]["id"]["type"],
            "integer"
        );
    }

    #[test]
    fn leaves_non_array_requests_alone() {
        let schema = json!({
            "type": "object",
            "properties": { "requests": { "type": "string" } }
        });
        let out = inject_request_id_field(schema.clone(), "s");
        assert_eq!(out, schema);
    }

    #[test]
    fn leaves_schema_without_requests_alone() {
        let schema = json!({ "type": "object", "properties": { "query": {} } });
        let out = inject_request_id_field(schema.clone(), "s");
        assert_eq!(out, schema);
    }

    #[test]
    fn tool_definition_uses_app_skill_name() {
        let def = tool_definition("videos", "transcript", Some("desc"), requests_schema());
        assert_eq!(def["name"], "videos-transcript");
        assert_eq!(def["description"], "desc");
    }
}
