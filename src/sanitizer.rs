//! Output sanitizer
//!
//! Everything the API returns passes through here exactly once, right before
//! it leaves the orchestrator. Cached answers are stored raw.

use crate::models::{SearchResponse, Source};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

lazy_static! {
    static ref SCRIPT_BLOCK: Regex =
        Regex::new(r"(?is)<script[^>]*>.*?</script>").expect("script block regex");
    static ref EVENT_HANDLER: Regex = Regex::new(r"(?i)\bon\w+\s*=").expect("event handler regex");
    static ref JAVASCRIPT_SCHEME: Regex = Regex::new(r"(?i)javascript:").expect("javascript scheme regex");
}

/// Drop script blocks and inline event handlers, then escape `& < > " '`.
pub fn sanitize_text(text: &str) -> String {
    let without_scripts = SCRIPT_BLOCK.replace_all(text, "");
    let without_handlers = EVENT_HANDLER.replace_all(&without_scripts, "");
    html_escape::encode_quoted_attribute(&without_handlers).into_owned()
}

/// Strip `javascript:` and force an http(s) scheme. Empty input stays empty.
pub fn sanitize_url(url: &str) -> String {
    let url = JAVASCRIPT_SCHEME.replace_all(url.trim(), "");
    if url.is_empty() {
        return String::new();
    }
    if url.starts_with("http://") || url.starts_with("https://") {
        url.into_owned()
    } else {
        format!("https://{}", url)
    }
}

/// Sanitize every string inside a JSON value; keys and non-strings are kept.
pub fn sanitize_value(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(sanitize_text(&s)),
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize_value).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, sanitize_value(v)))
                .collect(),
        ),
        other => other,
    }
}

pub fn sanitize_sources(sources: Vec<Source>) -> Vec<Source> {
    sources
        .into_iter()
        .map(|source| Source {
            title: source.title.map(|t| sanitize_text(&t)),
            url: source.url.map(|u| sanitize_text(&sanitize_url(&u))),
        })
        .collect()
}

/// Sanitize answer, sources and data. The session id is internal and kept as is.
pub fn sanitize_response(response: SearchResponse) -> SearchResponse {
    SearchResponse {
        answer: sanitize_text(&response.answer),
        sources: sanitize_sources(response.sources),
        data: response
            .data
            .into_iter()
            .map(|(key, value)| (key, sanitize_value(value)))
            .collect(),
        session_id: response.session_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FetchResults;
    use serde_json::json;

    #[test]
    fn test_script_blocks_removed() {
        let text = "Before<script type=\"text/javascript\">alert('x')\n</script>After";
        assert_eq!(sanitize_text(text), "BeforeAfter");
    }

    #[test]
    fn test_event_handlers_removed_and_escaped() {
        let text = "<img src=x onerror=alert(1)>";
        assert_eq!(sanitize_text(text), "&lt;img src=x alert(1)&gt;");
    }

    #[test]
    fn test_markdown_survives() {
        let text = "## TSLA\n- Price: $110.00 (up 10.00%)\n- P/E & growth";
        assert_eq!(
            sanitize_text(text),
            "## TSLA\n- Price: $110.00 (up 10.00%)\n- P/E &amp; growth"
        );
        assert_eq!(sanitize_text("Tesla's \"Q3\""), "Tesla&#x27;s &quot;Q3&quot;");
    }

    #[test]
    fn test_urls() {
        assert_eq!(sanitize_url(""), "");
        assert_eq!(sanitize_url("example.com/a"), "https://example.com/a");
        assert_eq!(sanitize_url("http://example.com"), "http://example.com");
        assert_eq!(sanitize_url("JavaScript:alert(1)"), "https://alert(1)");
        assert_eq!(sanitize_url("javascript:"), "");
    }

    #[test]
    fn test_response_sanitized_except_session_id() {
        let mut data = FetchResults::new();
        data.insert(
            "TSLA_news".to_string(),
            json!({ "results": [{ "title": "<b>Tesla</b>", "count": 3 }] }),
        );
        let response = SearchResponse {
            answer: "<script>x</script>TSLA up".to_string(),
            sources: vec![Source {
                title: Some("A <i>story</i>".to_string()),
                url: Some("news.example.com/a?x=1&y=2".to_string()),
            }],
            data,
            session_id: "<session>".to_string(),
        };

        let clean = sanitize_response(response);
        assert_eq!(clean.answer, "TSLA up");
        assert_eq!(clean.sources[0].title.as_deref(), Some("A &lt;i&gt;story&lt;/i&gt;"));
        assert_eq!(
            clean.sources[0].url.as_deref(),
            Some("https://news.example.com/a?x=1&amp;y=2")
        );
        assert_eq!(clean.data["TSLA_news"]["results"][0]["title"], "&lt;b&gt;Tesla&lt;/b&gt;");
        assert_eq!(clean.data["TSLA_news"]["results"][0]["count"], 3);
        assert_eq!(clean.session_id, "<session>");
    }
}
