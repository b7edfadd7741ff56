//! Cache key layout shared by the writer, the bridge and the reader.

use crate::record::normalize_symbol;

/// Namespace for full per-symbol records.
pub const BREAKDOWN_NAMESPACE: &str = "breakdown";

/// Namespace for lightweight latest-score records.
pub const SCORE_NAMESPACE: &str = "score";

/// Key holding the set of symbols with a live record.
pub const SYMBOL_INDEX_KEY: &str = "symbols:index";

pub fn breakdown_key(symbol: &str) -> String {
    format!("{}:{}", BREAKDOWN_NAMESPACE, normalize_symbol(symbol))
}

pub fn score_key(symbol: &str) -> String {
    format!("{}:{}", SCORE_NAMESPACE, normalize_symbol(symbol))
}
