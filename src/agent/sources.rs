//! Source attribution for answers

use crate::models::{is_error_marker, FetchResults, Source, DEEP_RESEARCH_KEY, SONAR_KEY};
use serde_json::Value;
use std::collections::HashSet;

/// News articles cited per ticker.
const NEWS_SOURCES_PER_TICKER: usize = 3;

/// Collect the sources behind an answer: search documents and citations
/// first, then the top news articles of each ticker. A url appears at most
/// once per answer; entries without a url are kept as they are. Raw values;
/// the sanitizer runs later on the whole response.
pub fn extract_sources(results: &FetchResults) -> Vec<Source> {
    let mut sources = SourceList::default();

    for key in [SONAR_KEY, DEEP_RESEARCH_KEY] {
        if let Some(payload) = results.get(key).filter(|v| !is_error_marker(v)) {
            search_sources(payload, &mut sources);
        }
    }

    for (_, payload) in results.iter().filter(|(key, _)| key.ends_with("_news")) {
        let Some(items) = payload.get("results").and_then(Value::as_array) else {
            continue;
        };
        for item in items.iter().take(NEWS_SOURCES_PER_TICKER) {
            sources.push(
                str_field(item, "title").unwrap_or("News Article"),
                str_field(item, "article_url").unwrap_or_default(),
            );
        }
    }

    sources.items
}

#[derive(Default)]
struct SourceList {
    items: Vec<Source>,
    seen: HashSet<String>,
}

impl SourceList {
    fn push(&mut self, title: &str, url: &str) {
        if !url.is_empty() && !self.seen.insert(url.to_string()) {
            return;
        }
        self.items.push(Source {
            title: Some(title.to_string()),
            url: Some(url.to_string()),
        });
    }
}

/// Documents attached to the first choice, then top-level citations.
fn search_sources(payload: &Value, sources: &mut SourceList) {
    let documents = payload
        .pointer("/choices/0/message/context/documents")
        .and_then(Value::as_array);
    for doc in documents.into_iter().flatten() {
        let url = str_field(doc, "url").unwrap_or_default();
        let title = str_field(doc, "title")
            .filter(|t| !t.is_empty())
            .or(Some(url).filter(|u| !u.is_empty()))
            .unwrap_or("Unknown Source");
        sources.push(title, url);
    }

    let citations = payload.get("citations").and_then(Value::as_array);
    for citation in citations.into_iter().flatten().filter_map(Value::as_str) {
        sources.push(citation, citation);
    }
}

fn str_field<'a>(value: &'a Value, field: &str) -> Option<&'a str> {
    value.get(field).and_then(Value::as_str)
}
