use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ParseError;

lazy_static! {
    static ref INTER_TAG_WHITESPACE_RE: Regex = Regex::new(r">\s+<").unwrap();
    static ref TAG_TOKEN_RE: Regex = Regex::new(r"<[^>]*>").unwrap();
    static ref TAG_NAME_RE: Regex = Regex::new(r"^<\s*(/?)\s*([a-zA-Z][a-zA-Z0-9]*)").unwrap();
    static ref ATTR_RE: Regex =
        Regex::new(r#"([a-zA-Z][a-zA-Z0-9:_-]*)\s*=\s*("[^"]*"|'[^']*'|[^\s>]+)"#).unwrap();
    static ref SCRIPT_CLOSE_RE: Regex = Regex::new(r"(?i)</\s*script[^>]*>").unwrap();
    static ref STYLE_CLOSE_RE: Regex = Regex::new(r"(?i)</\s*style[^>]*>").unwrap();
}

/// How a model reply should be interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    #[default]
    Text,
    Json,
    Html,
}

/// A model reply converted into its declared format.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedResponse {
    Text(String),
    Json(Value),
    Html(String),
}

impl ParsedResponse {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParsedResponse::Text(text) | ParsedResponse::Html(text) => Some(text),
            ParsedResponse::Json(_) => None,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ParsedResponse::Json(value) => Some(value),
            _ => None,
        }
    }
}

/// Allow-list configuration for HTML replies. The defaults cover common
/// formatting tags; callers with stricter needs supply their own lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sanitizer {
    pub allowed_tags: Vec<String>,
    pub allowed_attributes: Vec<String>,
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self {
            allowed_tags: [
                "a", "abbr", "acronym", "address", "b", "big", "blockquote", "br", "cite", "code",
                "dd", "del", "dfn", "div", "dl", "dt", "em", "h1", "h2", "h3", "h4", "h5", "h6",
                "hr", "i", "img", "ins", "kbd", "li", "ol", "p", "pre", "samp", "small", "span",
                "strong", "sub", "sup", "table", "tbody", "td", "th", "thead", "tr", "tt", "ul",
                "var",
            ]
            .iter()
            .map(|t| t.to_string())
            .collect(),
            allowed_attributes: [
                "abbr", "alt", "cite", "class", "datetime", "height", "href", "lang", "name",
                "src", "title", "width",
            ]
            .iter()
            .map(|a| a.to_string())
            .collect(),
        }
    }
}

impl Sanitizer {
    pub fn new(allowed_tags: Vec<String>, allowed_attributes: Vec<String>) -> Self {
        Self {
            allowed_tags,
            allowed_attributes,
        }
    }

    fn allows_tag(&self, name: &str) -> bool {
        self.allowed_tags.iter().any(|t| t == name)
    }

    fn allows_attribute(&self, name: &str) -> bool {
        self.allowed_attributes.iter().any(|a| a == name)
    }

    /// Remove whitespace-only text nodes, drop tags outside the allow-list
    /// (script and style lose their content as well), and filter attributes.
    /// Output is canonical, so sanitizing already-sanitized markup is a
    /// no-op.
    pub fn clean_fragment(&self, html: &str) -> String {
        let compact = INTER_TAG_WHITESPACE_RE
            .replace_all(html.trim(), "><")
            .into_owned();
        let mut out = String::new();
        let mut cursor = 0;

        while let Some(token_match) = TAG_TOKEN_RE.find_at(&compact, cursor) {
            out.push_str(&compact[cursor..token_match.start()]);
            let token = token_match.as_str();
            cursor = token_match.end();

            // Comments and doctype declarations have no tag name; drop them.
            let Some(caps) = TAG_NAME_RE.captures(token) else {
                continue;
            };
            let closing = &caps[1] == "/";
            let name = caps[2].to_lowercase();

            if name == "script" || name == "style" {
                if !closing {
                    let close_re = if name == "script" {
                        &*SCRIPT_CLOSE_RE
                    } else {
                        &*STYLE_CLOSE_RE
                    };
                    cursor = match close_re.find_at(&compact, cursor) {
                        Some(close) => close.end(),
                        None => compact.len(),
                    };
                }
                continue;
            }

            if !self.allows_tag(&name) {
                continue;
            }

            if closing {
                out.push_str("</");
                out.push_str(&name);
                out.push('>');
                continue;
            }

            out.push('<');
            out.push_str(&name);
            for attr in ATTR_RE.captures_iter(token) {
                let attr_name = attr[1].to_lowercase();
                if !self.allows_attribute(&attr_name) {
                    continue;
                }
                let value = attr[2].trim_matches(|c| c == '"' || c == '\'').to_string();
                out.push(' ');
                out.push_str(&attr_name);
                out.push_str("=\"");
                out.push_str(&value.replace('"', "&quot;"));
                out.push('"');
            }
            if token.trim_end_matches('>').trim_end().ends_with('/') {
                out.push_str(" />");
            } else {
                out.push('>');
            }
        }

        out.push_str(&compact[cursor..]);
        out.trim().to_string()
    }
}

/// Convert a raw model reply into its declared format. Code-fence wrappers
/// the model may have added around JSON and HTML payloads are stripped
/// before interpretation.
pub fn parse(
    raw: &str,
    format: ResponseFormat,
    sanitizer: Option<&Sanitizer>,
) -> Result<ParsedResponse, ParseError> {
    match format {
        ResponseFormat::Text => Ok(ParsedResponse::Text(raw.trim().to_string())),
        ResponseFormat::Json => {
            let json = raw.replace("```json", "").replace("```", "");
            serde_json::from_str(json.trim())
                .map(ParsedResponse::Json)
                .map_err(|e| ParseError::InvalidJson(e.to_string()))
        }
        ResponseFormat::Html => {
            let html = raw.trim().replace("```html", "");
            let html = html.trim().trim_end_matches("```");
            let default = Sanitizer::default();
            let sanitizer = sanitizer.unwrap_or(&default);
            Ok(ParsedResponse::Html(sanitizer.clean_fragment(html)))
        }
    }
}

/// Extract the trimmed content of the first `<tag>...</tag>` region using a
/// non-greedy match that spans newlines. Returns None when the tag is
/// absent.
pub fn extract_tag(text: &str, tag: &str) -> Option<String> {
    let re = Regex::new(&format!(r"(?s)<{0}>(.*?)</{0}>", tag)).ok()?;
    re.captures(text).map(|caps| caps[1].trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_text_trims() {
        let parsed = parse("  hello there \n", ResponseFormat::Text, None).unwrap();
        assert_eq!(parsed, ParsedResponse::Text("hello there".to_string()));
    }

    #[test]
    fn test_parse_json_strips_code_fences() {
        let raw = "```json\n{\"joke\":\"x\",\"answer\":\"R\"}\n```";
        let parsed = parse(raw, ResponseFormat::Json, None).unwrap();
        assert_eq!(
            parsed.as_json().unwrap(),
            &json!({"joke": "x", "answer": "R"})
        );
    }

    #[test]
    fn test_parse_json_without_fences() {
        let parsed = parse("{\"ok\": true}", ResponseFormat::Json, None).unwrap();
        assert_eq!(parsed.as_json().unwrap(), &json!({"ok": true}));
    }

    #[test]
    fn test_parse_json_malformed() {
        let result = parse("{not json", ResponseFormat::Json, None);
        assert!(matches!(result, Err(ParseError::InvalidJson(_))));
    }

    #[test]
    fn test_parse_html_removes_script_and_contents() {
        let raw = "<div><script>alert(\"x\")</script><p>hello</p></div>";
        let parsed = parse(raw, ResponseFormat::Html, None).unwrap();
        assert_eq!(parsed.as_str().unwrap(), "<div><p>hello</p></div>");
    }

    #[test]
    fn test_parse_html_unwraps_disallowed_tags() {
        let raw = "<p><blink>hi</blink> there</p>";
        let parsed = parse(raw, ResponseFormat::Html, None).unwrap();
        assert_eq!(parsed.as_str().unwrap(), "<p>hi there</p>");
    }

    #[test]
    fn test_parse_html_strips_fences_and_empty_text_nodes() {
        let raw = "```html\n<ul>\n  <li>one</li>\n  <li>two</li>\n</ul>\n```";
        let parsed = parse(raw, ResponseFormat::Html, None).unwrap();
        assert_eq!(parsed.as_str().unwrap(), "<ul><li>one</li><li>two</li></ul>");
    }

    #[test]
    fn test_sanitize_filters_attributes() {
        let sanitizer = Sanitizer::default();
        let cleaned = sanitizer.clean_fragment("<a href=\"/x\" onclick=\"evil()\">link</a>");
        assert_eq!(cleaned, "<a href=\"/x\">link</a>");
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        let sanitizer = Sanitizer::default();
        let raw = "<div> <script>bad()</script> <p class='a' onclick=x>hi <br/> there</p> </div>";
        let once = sanitizer.clean_fragment(raw);
        let twice = sanitizer.clean_fragment(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_sanitize_custom_allow_list() {
        let sanitizer = Sanitizer::new(vec!["p".to_string()], vec![]);
        let cleaned = sanitizer.clean_fragment("<div><p>keep</p></div>");
        assert_eq!(cleaned, "<p>keep</p>");
    }

    #[test]
    fn test_extract_tag_non_greedy() {
        let text = "<message>first</message><message>second</message>";
        assert_eq!(extract_tag(text, "message"), Some("first".to_string()));
    }

    #[test]
    fn test_extract_tag_spans_newlines_and_trims() {
        let text = "prefix <thought>\n  step one\n</thought> suffix";
        assert_eq!(extract_tag(text, "thought"), Some("step one".to_string()));
    }

    #[test]
    fn test_extract_tag_missing() {
        assert_eq!(extract_tag("no tags here", "answer"), None);
    }
}
