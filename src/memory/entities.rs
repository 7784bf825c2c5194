//! Ticker and company entities mentioned in a conversation

use crate::models::Message;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeSet;

/// Company name → primary ticker.
const COMPANY_TICKERS: &[(&str, &str)] = &[
    ("Apple", "AAPL"),
    ("Microsoft", "MSFT"),
    ("Google", "GOOGL"),
    ("Alphabet", "GOOGL"),
    ("Amazon", "AMZN"),
    ("Meta", "META"),
    ("Facebook", "META"),
    ("Tesla", "TSLA"),
    ("Nvidia", "NVDA"),
    ("AMD", "AMD"),
    ("Intel", "INTC"),
    ("IBM", "IBM"),
];

const KNOWN_TICKERS: &[&str] = &[
    "AAPL", "MSFT", "GOOGL", "AMZN", "META", "TSLA", "NVDA", "AMD", "INTC", "IBM",
];

lazy_static! {
    static ref TICKER_WORD: Regex = Regex::new(&format!(r"\b(?:{})\b", KNOWN_TICKERS.join("|")))
        .expect("ticker regex");
    static ref COMPANY_WORD: Regex = Regex::new(&format!(
        r"(?i)\b(?:{})\b",
        COMPANY_TICKERS
            .iter()
            .map(|(company, _)| *company)
            .collect::<Vec<_>>()
            .join("|")
    ))
    .expect("company regex");
    // $TSLA, TSLA:NASDAQ, BRK.B (share class; not dotted abbreviations like U.S.)
    static ref SYMBOL_PATTERN: Regex = Regex::new(
        r"\$([A-Z]{1,5})\b|\b([A-Z]{1,5}):[A-Z]+\b|\b([A-Z]{2,5})\.[A-Z]\b(?:$|[^.]|\.(?:\s|$))"
    )
    .expect("symbol regex");
}

pub struct EntityExtractor;

impl EntityExtractor {
    /// Every ticker and company referenced anywhere in `messages`, expanded
    /// through the company ↔ ticker table.
    pub fn extract(messages: &[Message]) -> BTreeSet<String> {
        let mut entities = BTreeSet::new();
        for message in messages {
            entities.extend(Self::extract_text(&message.content));
        }
        entities
    }

    pub fn extract_text(text: &str) -> BTreeSet<String> {
        let mut entities = BTreeSet::new();

        for found in TICKER_WORD.find_iter(text) {
            add_ticker(&mut entities, found.as_str());
        }

        for found in COMPANY_WORD.find_iter(text) {
            if let Some((company, ticker)) = lookup_company(found.as_str()) {
                entities.insert(company.to_string());
                entities.insert(ticker.to_string());
            }
        }

        for caps in SYMBOL_PATTERN.captures_iter(text) {
            if let Some(symbol) = symbol_capture(&caps) {
                add_ticker(&mut entities, symbol.as_str());
            }
        }

        entities
    }

    /// Last ticker mentioned in the newest message that mentions one.
    pub fn most_recent_ticker(messages: &[Message]) -> Option<String> {
        messages.iter().rev().find_map(|message| {
            ticker_mentions(&message.content)
                .into_iter()
                .max_by_key(|(position, _)| *position)
                .map(|(_, ticker)| ticker)
        })
    }
}

fn symbol_capture<'t>(caps: &regex::Captures<'t>) -> Option<regex::Match<'t>> {
    caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3))
}

/// Tickers in `text` with the byte offset of each mention.
fn ticker_mentions(text: &str) -> Vec<(usize, String)> {
    let mut mentions: Vec<(usize, String)> = TICKER_WORD
        .find_iter(text)
        .map(|found| (found.start(), found.as_str().to_string()))
        .collect();

    for found in COMPANY_WORD.find_iter(text) {
        if let Some((_, ticker)) = lookup_company(found.as_str()) {
            mentions.push((found.start(), ticker.to_string()));
        }
    }

    for caps in SYMBOL_PATTERN.captures_iter(text) {
        if let Some(symbol) = symbol_capture(&caps) {
            mentions.push((symbol.start(), symbol.as_str().to_string()));
        }
    }

    mentions
}

fn add_ticker(entities: &mut BTreeSet<String>, ticker: &str) {
    entities.insert(ticker.to_string());
    if let Some((company, _)) = COMPANY_TICKERS.iter().find(|(_, t)| *t == ticker) {
        entities.insert(company.to_string());
    }
}

fn lookup_company(word: &str) -> Option<(&'static str, &'static str)> {
    COMPANY_TICKERS
        .iter()
        .find(|(company, _)| company.eq_ignore_ascii_case(word))
        .copied()
}
