//! Lightweight entity extraction for tickers and request intents.

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::LazyLock;

static TICKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$?\b[A-Z]{1,5}\b").expect("ticker pattern is valid"));

/// Uppercase words that are almost never tickers in a chat prompt.
const NOT_TICKERS: &[&str] = &[
    "A", "I", "AI", "AND", "OR", "THE", "FOR", "TO", "OF", "IN", "ON", "IS", "IT", "ME", "MY", "VS", "CEO",
    "CFO", "IPO", "EPS", "PE", "USD", "US", "OK", "FAQ", "API",
];

pub const INTENT_COMPARISON: &str = "comparison_requested";
pub const INTENT_DEEP_ANALYSIS: &str = "deep_analysis";

/// What a piece of text mentions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extracted {
    /// Sorted, de-duplicated ticker symbols (without `$`).
    pub tickers: Vec<String>,
    pub intents: Vec<String>,
}

/// Pull ticker symbols and intents out of free text.
///
/// A `$` prefix marks a ticker explicitly and bypasses the stop-word list.
pub fn extract_entities(text: &str) -> Extracted {
    let mut tickers = BTreeSet::new();
    for m in TICKER.find_iter(text) {
        let token = m.as_str();
        let (explicit, symbol) = match token.strip_prefix('$') {
            Some(rest) => (true, rest),
            None => (false, token),
        };
        if explicit || !NOT_TICKERS.contains(&symbol) {
            tickers.insert(symbol.to_string());
        }
    }

    let lower = text.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_alphanumeric() && c != '-')
        .filter(|w| !w.is_empty())
        .collect();

    let mut intents = Vec::new();
    if lower.contains("compare")
        || lower.contains("versus")
        || lower.contains("side-by-side")
        || words.iter().any(|w| *w == "vs")
    {
        intents.push(INTENT_COMPARISON.to_string());
    }
    if lower.contains("deep dive") || lower.contains("detailed") || lower.contains("fundamental") {
        intents.push(INTENT_DEEP_ANALYSIS.to_string());
    }

    Extracted {
        tickers: tickers.into_iter().collect(),
        intents,
    }
}
