//! Cleanup of model replies before they are parsed.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static JSON_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)```json").unwrap());
static ASK_USER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)ask_user:[ \t]*(.+)").unwrap());

/// Pure: Remove markdown code fences and surrounding whitespace
pub fn strip_fences(text: &str) -> String {
    JSON_FENCE.replace_all(text, "").replace("```", "").trim().to_string()
}

/// Pure: Strip fences, skip any prose before the first `{` or `[`, and
/// return the remainder if it parses as JSON.
pub fn extract_json(text: &str) -> Option<String> {
    let cleaned = strip_fences(text);
    let start = cleaned.find(|c: char| c == '{' || c == '[')?;
    let candidate = cleaned[start..].trim();
    serde_json::from_str::<Value>(candidate).ok()?;
    Some(candidate.to_string())
}

/// Pure: The question of the first `ask_user:` request in the text
pub fn find_ask_user(text: &str) -> Option<String> {
    ASK_USER
        .captures(text)
        .and_then(|captures| captures.get(1))
        .map(|question| question.as_str().trim().to_string())
        .filter(|question| !question.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_fences() {
        assert_eq!(strip_fences("```JSON\n{\"a\":1}\n```\n"), "{\"a\":1}");
        assert_eq!(strip_fences("```\n[1]\n```"), "[1]");
        assert_eq!(strip_fences("  plain  "), "plain");
    }

    #[test]
    fn test_extract_json_skips_prose() {
        let reply = "Here are the steps:\n```json\n{\"steps\":[{\"step\":\"list\"}]}\n```";
        assert_eq!(
            extract_json(reply).as_deref(),
            Some("{\"steps\":[{\"step\":\"list\"}]}")
        );
        assert_eq!(extract_json("[1, 2]").as_deref(), Some("[1, 2]"));
    }

    #[test]
    fn test_extract_json_rejects_invalid() {
        assert_eq!(extract_json("no json here"), None);
        assert_eq!(extract_json("{\"steps\": [}"), None);
        assert_eq!(extract_json("{\"a\":1} trailing words"), None);
        assert_eq!(extract_json(""), None);
    }

    #[test]
    fn test_find_ask_user() {
        assert_eq!(
            find_ask_user("Some text\nASK_USER:  Which directory?  \n{}").as_deref(),
            Some("Which directory?")
        );
        assert_eq!(find_ask_user("{\"steps\":[]}"), None);
        assert_eq!(find_ask_user("ask_user:   "), None);
    }

    #[test]
    fn test_ask_user_question_stays_on_its_line() {
        assert_eq!(find_ask_user("ask_user:\n{\"steps\":[]}"), None);
        assert_eq!(find_ask_user("ASK_USER:\t\n\nWhich file?"), None);
        assert_eq!(
            find_ask_user("ask_user:\t Which file? \r\n{}").as_deref(),
            Some("Which file?")
        );
    }
}
