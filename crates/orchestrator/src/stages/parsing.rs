//! Extraction of structured content from free-form model responses.

use std::sync::OnceLock;

use regex::Regex;
use serde::de::DeserializeOwned;

/// Pull the JSON body out of a response that may wrap it in prose or a
/// fenced code block.
pub fn extract_json(content: &str) -> &str {
    static FENCED: OnceLock<Option<Regex>> = OnceLock::new();
    let fenced = FENCED.get_or_init(|| Regex::new(r"(?s)```(?:json)?\s*\n(.*?)\n?```").ok());

    if let Some(caps) = fenced.as_ref().and_then(|re| re.captures(content)) {
        if let Some(body) = caps.get(1) {
            let body = body.as_str().trim();
            if body.starts_with('{') || body.starts_with('[') {
                return body;
            }
        }
    }

    let start = content.find(['{', '[']);
    let end = content.rfind(['}', ']']);
    match (start, end) {
        (Some(start), Some(end)) if end > start => &content[start..=end],
        _ => content.trim(),
    }
}

/// Decode the JSON embedded in a model response.
pub fn parse_json<T: DeserializeOwned>(content: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(extract_json(content))
}

/// Pull a complete HTML document out of a response. Returns `None` when the
/// response holds no `<html>` element.
pub fn extract_html(content: &str) -> Option<&str> {
    static FENCED: OnceLock<Option<Regex>> = OnceLock::new();
    static DOCUMENT: OnceLock<Option<Regex>> = OnceLock::new();

    let fenced = FENCED.get_or_init(|| Regex::new(r"(?s)```html\s*\n(.*?)```").ok());
    let document = DOCUMENT
        .get_or_init(|| Regex::new(r"(?is)(<!doctype\s+html[^>]*>\s*)?<html[\s>].*</html>").ok());

    let body = fenced
        .as_ref()
        .and_then(|re| re.captures(content))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(content);

    document
        .as_ref()
        .and_then(|re| re.find(body))
        .map(|m| m.as_str().trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_from_markdown() {
        let content = "Here you go:\n```json\n{\"findings\": []}\n```\nLet me know.";
        assert_eq!(extract_json(content), "{\"findings\": []}");
    }

    #[test]
    fn test_extract_json_raw() {
        let content = "Response: {\"title\": \"Solar\", \"slides\": []} done";
        let json = extract_json(content);
        assert!(json.starts_with('{'));
        assert!(json.ends_with('}'));
    }

    #[test]
    fn test_parse_json_typed() {
        #[derive(serde::Deserialize)]
        struct Outline {
            title: String,
        }
        let outline: Outline = parse_json("```\n{\"title\": \"Grid storage\"}\n```").unwrap();
        assert_eq!(outline.title, "Grid storage");
        assert!(parse_json::<Outline>("no json here").is_err());
    }

    #[test]
    fn test_extract_html_fenced() {
        let content = "Layout below.\n```html\n<!DOCTYPE html>\n<html><body>Hi</body></html>\n```";
        let html = extract_html(content).unwrap();
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.ends_with("</html>"));
    }

    #[test]
    fn test_extract_html_bare() {
        let content = "<html lang=\"en\"><body><img src=\"images/cover.png\"></body></html>";
        assert_eq!(extract_html(content), Some(content));
        assert!(extract_html("Sorry, I cannot help with that.").is_none());
    }
}
