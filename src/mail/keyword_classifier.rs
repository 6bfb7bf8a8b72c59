//! Keyword Classifier: a pure, deterministic first-stage scorer over a Mail
//! Row's subject/body/sender text. Reuses the `OnceLock<Regex>` lazy-compile
//! idiom used elsewhere in this codebase for cached, precompiled patterns.
//!
//! The subject-keyword list comes straight from the Query Builder's
//! glossary policy; sender patterns are used there for query filtering
//! only and are not a separate scoring term here. "Billing keyword" and
//! "service pattern"/"amount pattern" are a second, narrower tier not
//! enumerated anywhere else in this codebase's requirements, so the
//! lists below are this component's own documented policy (see
//! DESIGN.md).

use std::sync::OnceLock;

use regex::Regex;
use rust_decimal::Decimal;
use std::str::FromStr;

use super::query_builder::SUBJECT_KEYWORDS;
use super::types::{BillingCycle, ClassificationResult, MailRow};

/// Generic billing jargon, distinct from the marketing-flavoured subject
/// keywords above: the kind of phrase that shows up in the body of a
/// receipt regardless of which service sent it.
const BILLING_KEYWORDS: &[&str] = &[
    "invoice number",
    "order confirmation",
    "amount due",
    "total due",
    "payment method",
    "next billing date",
    "billing cycle",
    "subtotal",
];

/// `(regex, service_name)` pairs for well-known recurring-billing services.
/// First match wins.
const SERVICE_PATTERNS: &[(&str, &str)] = &[
    (r"(?i)netflix", "Netflix"),
    (r"(?i)spotify", "Spotify"),
    (r"(?i)hulu", "Hulu"),
    (r"(?i)disney\+?", "Disney+"),
    (r"(?i)amazon prime", "Amazon Prime"),
    (r"(?i)apple (music|tv|one|icloud)", "Apple"),
    (r"(?i)youtube premium", "YouTube Premium"),
    (r"(?i)adobe", "Adobe"),
    (r"(?i)microsoft 365|office 365", "Microsoft 365"),
    (r"(?i)dropbox", "Dropbox"),
    (r"(?i)github", "GitHub"),
    (r"(?i)slack", "Slack"),
    (r"(?i)zoom", "Zoom"),
    (r"(?i)notion", "Notion"),
    (r"(?i)linkedin premium", "LinkedIn Premium"),
    (r"(?i)hbo max|max\.com", "HBO Max"),
];

static AMOUNT_REGEX: OnceLock<Regex> = OnceLock::new();

fn amount_regex() -> &'static Regex {
    AMOUNT_REGEX.get_or_init(|| {
        Regex::new(r"\$\s?(\d{1,6}(?:,\d{3})*(?:\.\d{2})?)").expect("invalid amount regex")
    })
}

static SERVICE_REGEXES: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();

fn service_regexes() -> &'static [(Regex, &'static str)] {
    SERVICE_REGEXES.get_or_init(|| {
        SERVICE_PATTERNS
            .iter()
            .map(|(pattern, name)| (Regex::new(pattern).expect("invalid service regex"), *name))
            .collect()
    })
}

fn count_hits(haystack: &str, needles: &[&str]) -> u32 {
    let haystack = haystack.to_lowercase();
    needles.iter().filter(|needle| haystack.contains(*needle)).count() as u32
}

fn infer_billing_cycle(haystack: &str) -> BillingCycle {
    let haystack = haystack.to_lowercase();
    if ["annual", "yearly", "per year"].iter().any(|kw| haystack.contains(kw)) {
        BillingCycle::Yearly
    } else if ["weekly", "per week"].iter().any(|kw| haystack.contains(kw)) {
        BillingCycle::Weekly
    } else {
        BillingCycle::Monthly
    }
}

/// Scores a Mail Row without ever calling out to the network. The
/// combined text searched is `subject ∪ body ∪ sender`, per §4.5.
pub fn classify(row: &MailRow) -> ClassificationResult {
    let body = row.body_text.as_deref().unwrap_or_default();
    let combined = format!("{} {} {}", row.subject, body, row.sender_email);

    let mut confidence = 0.0f32;
    confidence += 0.15 * count_hits(&combined, SUBJECT_KEYWORDS) as f32;
    confidence += 0.10 * count_hits(&combined, BILLING_KEYWORDS) as f32;

    let mut service_name = None;
    for (regex, name) in service_regexes() {
        if regex.is_match(&combined) {
            service_name = Some(name.to_string());
            confidence += 0.30;
            break;
        }
    }

    let mut amount = None;
    if let Some(captures) = amount_regex().captures(&combined) {
        let raw = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
        if let Ok(parsed) = Decimal::from_str(&raw.replace(',', "")) {
            amount = Some(parsed);
            confidence += 0.20;
        }
    }

    let confidence = confidence.min(1.0);

    ClassificationResult {
        is_subscription: confidence > 0.4,
        confidence,
        service_name,
        amount,
        currency: Some("USD".to_string()),
        billing_cycle: Some(infer_billing_cycle(&combined)),
        next_billing_date: None,
        reasoning: "keyword scorer".to_string(),
        provider: super::types::AiProvider::Keywords,
        cost: Decimal::ZERO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn row(subject: &str, body: &str, sender: &str) -> MailRow {
        MailRow {
            id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            remote_message_id: "m1".to_string(),
            subject: subject.to_string(),
            sender_email: sender.to_string(),
            body_text: Some(body.to_string()),
            body_html: None,
            received_at: Utc::now(),
            processed_at: None,
            is_subscription: None,
            subscription_confidence: None,
            extracted_data: None,
            ai_provider: None,
            ai_reasoning: None,
            analysis_attempts: 0,
        }
    }

    #[test]
    fn a_bare_newsletter_scores_low() {
        let row = row("Weekly newsletter", "Here's what's new this week.", "news@example.com");
        let result = classify(&row);
        assert!(!result.is_subscription);
    }

    #[test]
    fn a_netflix_receipt_is_detected_with_service_and_amount() {
        let row = row(
            "Your Netflix payment receipt",
            "Thanks for being a member. Your card ending 1234 was charged $15.49 this month.",
            "billing@netflix.com",
        );
        let result = classify(&row);
        assert!(result.is_subscription);
        assert_eq!(result.service_name.as_deref(), Some("Netflix"));
        assert_eq!(result.amount, Some(Decimal::from_str("15.49").unwrap()));
        assert_eq!(result.billing_cycle, Some(BillingCycle::Monthly));
    }

    #[test]
    fn yearly_language_is_picked_up() {
        let row = row(
            "Annual subscription renewal",
            "Your annual charge of $99.00 for premium membership has been processed.",
            "billing@example.com",
        );
        let result = classify(&row);
        assert_eq!(result.billing_cycle, Some(BillingCycle::Yearly));
    }

    #[test]
    fn confidence_never_exceeds_one() {
        let row = row(
            "Subscription billing invoice receipt payment received payment confirmation",
            "Netflix invoice number amount due total due payment method next billing date billing cycle subtotal $9.99",
            "billing@netflix.com",
        );
        let result = classify(&row);
        assert!(result.confidence <= 1.0);
    }
}
