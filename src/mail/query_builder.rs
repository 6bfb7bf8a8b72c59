//! Query Builder: produces the provider-side filter string for an initial
//! or incremental sync, plus the fingerprint used to detect filter drift
//! across restarts.

use chrono::{DateTime, Months, Utc};
use sha2::{Digest, Sha256};

use super::error::SyncError;

/// Subject-line keywords that mark a message as plausibly subscription-related.
pub const SUBJECT_KEYWORDS: &[&str] = &[
    "subscription",
    "billing",
    "invoice",
    "receipt",
    "payment received",
    "payment confirmation",
    "payment successful",
    "renew",
    "renewal",
    "auto-pay",
    "autopay",
    "membership",
    "premium",
    "plan upgraded",
    "plan downgraded",
    "recurring charge",
    "monthly charge",
    "annual charge",
    "yearly charge",
    "charged",
    "statement",
    "payment method",
    "card ending",
    "trial ending",
    "trial ends",
    "cancel subscription",
];

/// Sender-address fragments that mark a message as billing-related.
pub const SENDER_PATTERNS: &[&str] = &[
    "billing",
    "subscriptions",
    "payments",
    "invoices",
    "receipts",
    "finance",
    "accounts-payable",
    "membership",
];

fn quote_if_multi_word(term: &str) -> String {
    if term.contains(' ') {
        format!("\"{}\"", term)
    } else {
        term.to_string()
    }
}

/// Build the filter string and its fingerprint for an initial (lookback)
/// or incremental (since-`last_sync`) sync.
pub fn build_query(
    months_back: i64,
    last_sync: Option<DateTime<Utc>>,
    is_initial: bool,
) -> Result<(String, String), SyncError> {
    let date_clause = if is_initial {
        let cutoff = Utc::now()
            .checked_sub_months(Months::new(months_back.max(0) as u32))
            .unwrap_or_else(Utc::now);
        format!("after:{}", cutoff.format("%Y/%m/%d"))
    } else {
        let since = last_sync.ok_or(SyncError::MissingLastSync)?;
        format!("after:{}", since.format("%Y/%m/%d"))
    };

    let subject_clauses = SUBJECT_KEYWORDS
        .iter()
        .map(|kw| format!("subject:{}", quote_if_multi_word(kw)));
    let sender_clauses = SENDER_PATTERNS
        .iter()
        .map(|pattern| format!("from:{}", quote_if_multi_word(pattern)));
    let content_disjunction = subject_clauses
        .chain(sender_clauses)
        .collect::<Vec<_>>()
        .join(" OR ");

    let filter = format!("({}) {} -in:spam -in:trash", content_disjunction, date_clause);
    let fingerprint = fingerprint(&filter);
    Ok((filter, fingerprint))
}

/// First 16 hex characters of SHA-256 over the filter string.
pub fn fingerprint(filter: &str) -> String {
    let digest = Sha256::digest(filter.as_bytes());
    let hex = hex_encode(&digest);
    hex[..16].to_string()
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        write!(out, "{:02x}", byte).expect("writing to a String cannot fail");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_sixteen_hex_chars() {
        let fp = fingerprint("some filter string");
        assert_eq!(fp.len(), 16);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn fingerprint_is_stable_for_the_same_input() {
        assert_eq!(fingerprint("abc"), fingerprint("abc"));
        assert_ne!(fingerprint("abc"), fingerprint("abd"));
    }

    #[test]
    fn incremental_without_last_sync_is_a_programming_error() {
        let result = build_query(12, None, false);
        assert!(matches!(result, Err(SyncError::MissingLastSync)));
    }

    #[test]
    fn initial_query_contains_exclusions_and_lookback() {
        let (filter, fp) = build_query(12, None, true).unwrap();
        assert!(filter.contains("-in:spam -in:trash"));
        assert!(filter.contains("after:"));
        assert_eq!(fp.len(), 16);
    }

    #[test]
    fn multi_word_terms_are_quoted() {
        let (filter, _) = build_query(12, None, true).unwrap();
        assert!(filter.contains("\"payment received\""));
    }

    #[test]
    fn changing_keyword_policy_changes_the_fingerprint() {
        let (_, fp_a) = build_query(12, None, true).unwrap();
        let altered_filter = "a completely different filter body -in:spam -in:trash";
        let fp_b = fingerprint(altered_filter);
        assert_ne!(fp_a, fp_b);
    }
}
