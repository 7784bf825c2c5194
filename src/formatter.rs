//! Context formatter
//!
//! Renders `FetchResults` into the text block handed to the synthesis model.
//! Two budgets: `Simplified` keeps the payload small for the long-output
//! reasoning model, `Comprehensive` passes everything through.

use crate::models::{is_error_marker, FetchResults, DEEP_RESEARCH_KEY, SONAR_KEY};
use crate::providers::perplexity::{response_citations, response_content};
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Write;

const NA: &str = "N/A";
const SIMPLIFIED_SEARCH_CHARS: usize = 1000;
const SIMPLIFIED_NEWS_ITEMS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetMode {
    Simplified,
    Comprehensive,
}

/// Per-ticker data kinds, in the order they are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum DataKind {
    Price,
    News,
    Financials,
    InsiderTrades,
    SecFilings,
}

impl DataKind {
    const ALL: [(DataKind, &'static str); 5] = [
        (DataKind::InsiderTrades, "_insider_trades"),
        (DataKind::SecFilings, "_sec_filings"),
        (DataKind::Financials, "_financials"),
        (DataKind::Price, "_price"),
        (DataKind::News, "_news"),
    ];

    fn label(self) -> &'static str {
        match self {
            DataKind::Price => "price",
            DataKind::News => "news",
            DataKind::Financials => "financial statements",
            DataKind::InsiderTrades => "insider trades",
            DataKind::SecFilings => "SEC filings",
        }
    }
}

fn split_key(key: &str) -> Option<(&str, DataKind)> {
    DataKind::ALL.iter().find_map(|(kind, suffix)| {
        key.strip_suffix(suffix)
            .filter(|ticker| !ticker.is_empty())
            .map(|ticker| (ticker, *kind))
    })
}

/// Successful payloads grouped by kind, then ticker.
struct Sorted<'a> {
    search: Vec<(&'a str, &'a Value)>,
    by_kind: BTreeMap<DataKind, Vec<(&'a str, &'a Value)>>,
    unavailable: Vec<(&'a str, &'a str)>,
}

impl<'a> Sorted<'a> {
    fn new(results: &'a FetchResults) -> Self {
        let mut sorted = Sorted {
            search: Vec::new(),
            by_kind: BTreeMap::new(),
            unavailable: Vec::new(),
        };

        for (key, value) in results {
            if is_error_marker(value) {
                let reason = value.get("error").and_then(Value::as_str).unwrap_or("unknown error");
                sorted.unavailable.push((key.as_str(), reason));
                continue;
            }

            if key == SONAR_KEY || key == DEEP_RESEARCH_KEY {
                sorted.search.push((key.as_str(), value));
            } else if let Some((ticker, kind)) = split_key(key) {
                sorted.by_kind.entry(kind).or_default().push((ticker, value));
            }
        }

        // Sonar before deep research.
        sorted.search.sort_by_key(|(key, _)| *key != SONAR_KEY);
        sorted
    }

    fn kind(&self, kind: DataKind) -> &[(&'a str, &'a Value)] {
        self.by_kind.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Formats fetch results as of the current date.
pub struct ContextFormatter;

impl ContextFormatter {
    pub fn format(results: &FetchResults, budget: BudgetMode) -> String {
        format_context(results, budget, Utc::now().date_naive())
    }
}

pub fn format_context(results: &FetchResults, budget: BudgetMode, as_of: NaiveDate) -> String {
    let title = match budget {
        BudgetMode::Simplified => "FINANCIAL DATA SUMMARY",
        BudgetMode::Comprehensive => "COMPREHENSIVE FINANCIAL DATA",
    };
    let mut out = format!("## {}\n\nData as of {}\n\n", title, as_of.format("%B %-d, %Y"));

    if results.is_empty() {
        out.push_str("No external data was retrieved for this query.\n");
        return out;
    }

    let sorted = Sorted::new(results);
    match budget {
        BudgetMode::Simplified => write_simplified(&mut out, &sorted),
        BudgetMode::Comprehensive => write_comprehensive(&mut out, &sorted),
    }

    if !sorted.unavailable.is_empty() {
        out.push_str("## Unavailable data\n");
        for (key, reason) in &sorted.unavailable {
            let _ = writeln!(out, "- {}: {}", key, reason);
        }
        out.push('\n');
    }

    out
}

// =============================
// Simplified
// =============================

fn write_simplified(out: &mut String, sorted: &Sorted<'_>) {
    for (key, value) in &sorted.search {
        if let Some(content) = response_content(value) {
            let _ = writeln!(out, "## {} Analysis", search_label(key));
            out.push_str(&truncate_chars(content, SIMPLIFIED_SEARCH_CHARS));
            out.push_str("\n\n");
        }
    }

    let prices = sorted.kind(DataKind::Price);
    if !prices.is_empty() {
        out.push_str("## Stock Price Data\n");
        for (ticker, value) in prices {
            let bar = first_result(value);
            let _ = writeln!(
                out,
                "### {}: Close {}, Open {}, High {}, Low {}, Volume {}\n",
                ticker,
                money(field(bar, "c")),
                money(field(bar, "o")),
                money(field(bar, "h")),
                money(field(bar, "l")),
                grouped(field(bar, "v")),
            );
        }
    }

    let news = sorted.kind(DataKind::News);
    if !news.is_empty() {
        out.push_str("## Recent News\n");
        for (ticker, value) in news {
            let _ = writeln!(out, "### {} News", ticker);
            for item in items(value, "results").iter().take(SIMPLIFIED_NEWS_ITEMS) {
                let _ = writeln!(out, "- {}", text(field(Some(item), "title")));
            }
            out.push('\n');
        }
    }

    let mut other: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for kind in [DataKind::Financials, DataKind::InsiderTrades, DataKind::SecFilings] {
        for (ticker, _) in sorted.kind(kind) {
            other.entry(*ticker).or_default().push(kind.label());
        }
    }
    if !other.is_empty() {
        out.push_str("## Other Retrieved Data\n");
        for (ticker, kinds) in other {
            let _ = writeln!(out, "- {}: {}", ticker, kinds.join(", "));
        }
        out.push('\n');
    }
}

// =============================
// Comprehensive
// =============================

fn write_comprehensive(out: &mut String, sorted: &Sorted<'_>) {
    let prices = sorted.kind(DataKind::Price);
    let (crypto, equity): (Vec<_>, Vec<_>) = prices.iter().partition(|(_, value)| {
        value
            .get("is_cryptocurrency")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    });

    if !crypto.is_empty() {
        out.push_str("## Cryptocurrency Price Data from Polygon.io\n");
        for (ticker, value) in &crypto {
            let name = value.get("crypto_ticker").and_then(Value::as_str).unwrap_or(*ticker);
            let _ = writeln!(out, "### {} Current Price", name);
            match first_result(value) {
                Some(bar) => {
                    let bar = Some(bar);
                    let _ = writeln!(out, "- Current Price: {}", money(field(bar, "c")));
                    let _ = writeln!(out, "- 24h Open: {}", money(field(bar, "o")));
                    let _ = writeln!(out, "- 24h High: {}", money(field(bar, "h")));
                    let _ = writeln!(out, "- 24h Low: {}", money(field(bar, "l")));
                    let _ = writeln!(out, "- 24h Volume: {} units", grouped(field(bar, "v")));
                    let _ = writeln!(out, "- Number of Trades: {}", grouped(field(bar, "n")));
                    if let Some(line) = change_from(bar) {
                        let _ = writeln!(out, "- 24h Change: {}", line);
                    }
                }
                None => {
                    let _ = writeln!(out, "- Name: {}", text(value.get("name")));
                    let _ = writeln!(out, "- Last Updated: {}", text(value.get("last_updated")));
                    out.push_str("- Price: N/A (reference data only)\n");
                }
            }
            out.push_str("- Data Source: Polygon.io\n\n");
        }
        out.push_str(
            "IMPORTANT: When responding to cryptocurrency price queries, ALWAYS include the Polygon.io \
             price data above as one of the primary sources in your response.\n\n",
        );
    }

    for (key, value) in &sorted.search {
        if let Some(content) = response_content(value) {
            let _ = writeln!(out, "## Complete {} Results", search_label(key));
            out.push_str(content);
            out.push_str("\n\n");

            let citations = response_citations(value);
            if !citations.is_empty() {
                out.push_str("### Sources:\n");
                for (i, citation) in citations.iter().enumerate() {
                    let _ = writeln!(out, "[{}] {}", i + 1, citation);
                }
                out.push('\n');
            }
        }
    }

    if !equity.is_empty() {
        out.push_str("## Stock Price Data from Polygon.io\n");
        for (ticker, value) in &equity {
            let bar = first_result(value);
            let _ = writeln!(out, "### {} Stock Price", ticker);
            let _ = writeln!(out, "- Close Price: {}", money(field(bar, "c")));
            let _ = writeln!(out, "- Open Price: {}", money(field(bar, "o")));
            let _ = writeln!(out, "- High: {}", money(field(bar, "h")));
            let _ = writeln!(out, "- Low: {}", money(field(bar, "l")));
            let _ = writeln!(out, "- Volume: {} shares", grouped(field(bar, "v")));
            let _ = writeln!(out, "- Number of Trades: {}", grouped(field(bar, "n")));
            let _ = writeln!(out, "- As of: {}", timestamp(field(bar, "t")));
            if let Some(line) = change_from(bar) {
                let _ = writeln!(out, "- Price Change: {}", line);
            }
            out.push('\n');
        }
    }

    let news = sorted.kind(DataKind::News);
    if !news.is_empty() {
        out.push_str("## Recent News\n");
        for (ticker, value) in news {
            let _ = writeln!(out, "### {} Recent News", ticker);
            for item in items(value, "results") {
                let item = Some(item);
                let _ = writeln!(out, "#### {}", text(field(item, "title")));
                let _ = writeln!(out, "- Published: {}", text(field(item, "published_utc")));
                let _ = writeln!(out, "- Summary: {}", text(field(item, "description")));
                let _ = writeln!(out, "- URL: {}", text(field(item, "article_url")));
                out.push('\n');
            }
        }
    }

    let financials = sorted.kind(DataKind::Financials);
    if !financials.is_empty() {
        out.push_str("## Financial Statements\n");
        for (ticker, value) in financials {
            let body = value
                .get("financials")
                .or_else(|| value.get("results"))
                .unwrap_or(*value);
            let pretty = serde_json::to_string_pretty(body).unwrap_or_else(|_| body.to_string());
            let _ = writeln!(out, "### {} Financial Data\n{}\n", ticker, pretty);
        }
    }

    let insider = sorted.kind(DataKind::InsiderTrades);
    if !insider.is_empty() {
        out.push_str("## Insider Trading Activity\n");
        for (ticker, value) in insider {
            let _ = writeln!(out, "### {} Insider Trades", ticker);
            let trades = if value.get("insider_trades").is_some() {
                items(value, "insider_trades")
            } else {
                items(value, "results")
            };
            for trade in trades {
                let t = Some(trade);
                let _ = writeln!(out, "- Name: {}", text(field(t, "name")));
                let _ = writeln!(out, "- Title: {}", text(field(t, "title")));
                let _ = writeln!(out, "- Shares: {}", grouped(either(t, "transaction_shares", "shares")));
                let _ = writeln!(out, "- Value: {}", money(either(t, "transaction_value", "value")));
                let _ = writeln!(out, "- Date: {}\n", text(either(t, "transaction_date", "date")));
            }
        }
    }

    let filings = sorted.kind(DataKind::SecFilings);
    if !filings.is_empty() {
        out.push_str("## SEC Filings\n");
        for (ticker, value) in filings {
            let _ = writeln!(out, "### {} SEC Filings", ticker);
            for filing in items(value, "filings") {
                let f = Some(filing);
                let _ = writeln!(out, "- Form: {}", text(either(f, "form", "filing_type")));
                let _ = writeln!(out, "- Filed Date: {}", text(either(f, "filed_date", "report_date")));
                let _ = writeln!(out, "- Description: {}\n", text(either(f, "description", "url")));
            }
        }
    }
}

// =============================
// Field helpers
// =============================

fn search_label(key: &str) -> &'static str {
    if key == SONAR_KEY {
        "Perplexity Sonar"
    } else {
        "Perplexity Deep Research"
    }
}

fn first_result(value: &Value) -> Option<&Value> {
    value.get("results")?.as_array()?.first()
}

fn items<'a>(value: &'a Value, key: &str) -> &'a [Value] {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn field<'a>(value: Option<&'a Value>, key: &str) -> Option<&'a Value> {
    value?.get(key).filter(|v| !v.is_null())
}

fn either<'a>(value: Option<&'a Value>, primary: &str, secondary: &str) -> Option<&'a Value> {
    field(value, primary).or_else(|| field(value, secondary))
}

fn text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::String(_)) | None | Some(Value::Null) => NA.to_string(),
        Some(other) => other.to_string(),
    }
}

fn money(value: Option<&Value>) -> String {
    match value.and_then(Value::as_f64) {
        Some(n) => format!("${:.2}", n),
        None => text(value),
    }
}

fn grouped(value: Option<&Value>) -> String {
    match value.and_then(Value::as_f64) {
        Some(n) => group_thousands(n.round() as i64),
        None => text(value),
    }
}

fn timestamp(value: Option<&Value>) -> String {
    value
        .and_then(Value::as_i64)
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|dt| dt.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| text(value))
}

fn change_from(bar: Option<&Value>) -> Option<String> {
    let close = field(bar, "c")?.as_f64()?;
    let open = field(bar, "o")?.as_f64()?;
    Some(price_change_line(open, close))
}

/// `up|down|flat $X.XX (Y.YY%)`; an open of zero reports 0%.
pub fn price_change_line(open: f64, close: f64) -> String {
    let change = close - open;
    let percent = if open != 0.0 { change / open * 100.0 } else { 0.0 };
    let direction = if change > 0.0 {
        "up"
    } else if change < 0.0 {
        "down"
    } else {
        "flat"
    };
    format!("{} ${:.2} ({:.2}%)", direction, change.abs(), percent.abs())
}

pub fn group_thousands(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if n < 0 {
        format!("-{}", grouped)
    } else {
        grouped
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let cut: String = s.chars().take(max).collect();
        format!("{}...", cut)
    } else {
        s.to_string()
    }
}
