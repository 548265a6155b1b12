//! Decoding of Drupal `views/ajax` responses.
//!
//! The endpoint answers with a JSON array of AJAX commands. The rendered
//! listing is the `data` of the first `insert` command; an answer without
//! one means the view has nothing more to show.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct AjaxCommand {
    #[serde(default)]
    command: String,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

/// Extract the HTML fragment of the first `insert` command.
///
/// Returns `Ok(None)` when no insert command carries string data, and an
/// error when the body is not a JSON command array at all.
pub fn extract_insert_html(body: &str) -> Result<Option<String>, serde_json::Error> {
    let commands: Vec<AjaxCommand> = serde_json::from_str(body)?;
    Ok(commands
        .into_iter()
        .filter(|c| c.command == "insert")
        .find_map(|c| match c.data {
            Some(serde_json::Value::String(html)) => Some(html),
            _ => None,
        }))
}
