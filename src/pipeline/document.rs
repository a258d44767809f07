//! Transforms of the `{"steps": [...]}` payload passed between stages.
//!
//! Each function takes the payload by reference and returns a new value, so
//! a stage never sees fields added or removed by a later one.

use crate::docs::DocumentationResolver;
use crate::error::{Error, Result};
use serde_json::{Map, Value};

const TAG: &str = "tag";
const TAGS: &str = "tags";
const DOCUMENTATION: &str = "documentation";
const STEPS: &str = "steps";

fn steps(document: &Value) -> Result<&Vec<Value>> {
    document
        .get(STEPS)
        .and_then(Value::as_array)
        .ok_or_else(|| Error::Parse("payload has no \"steps\" array".to_string()))
}

fn step_object(step: &Value, index: usize) -> Result<&Map<String, Value>> {
    step.as_object()
        .ok_or_else(|| Error::Parse(format!("step {index} is not an object")))
}

/// Pure: Lower-cased tags of a step, from both `tag` and `tags`, in order of
/// first appearance. Blank and non-string tags are ignored.
pub fn collect_tags(step: &Value) -> Vec<String> {
    let single = step.get(TAG).and_then(Value::as_str);
    let multiple = step
        .get(TAGS)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str);

    let mut tags: Vec<String> = Vec::new();
    for tag in single.into_iter().chain(multiple) {
        let tag = tag.trim().to_lowercase();
        if !tag.is_empty() && !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    tags
}

/// Replace every step's tags with a `documentation` array holding the text of
/// each tag that resolved. Unresolved tags are simply left out.
pub async fn resolve_documentation(
    document: &Value,
    resolver: &DocumentationResolver,
) -> Result<Value> {
    let mut resolved_steps = Vec::new();

    for (index, step) in steps(document)?.iter().enumerate() {
        let tags = collect_tags(step);
        let mut resolved = step_object(step, index)?.clone();
        resolved.remove(TAG);
        resolved.remove(TAGS);

        let docs = resolver.resolve_all(tags.iter().map(String::as_str)).await;
        tracing::debug!(
            "Step {}: {} of {} tags resolved",
            index,
            docs.len(),
            tags.len()
        );
        resolved.insert(
            DOCUMENTATION.to_string(),
            Value::Array(docs.into_iter().map(Value::String).collect()),
        );
        resolved_steps.push(Value::Object(resolved));
    }

    Ok(with_steps(document, resolved_steps))
}

/// Pure: Drop the `documentation` field from every step
pub fn strip_documentation(document: &Value) -> Result<Value> {
    let stripped = steps(document)?
        .iter()
        .enumerate()
        .map(|(index, step)| {
            let mut step = step_object(step, index)?.clone();
            step.remove(DOCUMENTATION);
            Ok(Value::Object(step))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(with_steps(document, stripped))
}

fn with_steps(document: &Value, steps: Vec<Value>) -> Value {
    let mut updated = document.clone();
    if let Some(object) = updated.as_object_mut() {
        object.insert(STEPS.to_string(), Value::Array(steps));
    }
    updated
}
