//! Mail Fetcher: lists remote message IDs under a filter and fetches a
//! single message's full payload, normalising headers and bodies before
//! persistence. Mirrors a typical `reqwest`-based API client's
//! request/timeout/error-shape handling; MIME-part decoding applies the
//! same header- and address-extraction conventions an RFC 5322 parser
//! would, adapted to a JSON part tree instead of raw message bytes.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use uuid::Uuid;

use super::config::PipelineConfig;
use super::error::FetcherError;
use super::token_broker::TokenBroker;

#[derive(Clone)]
pub struct MailFetcher {
    http: Client,
    token_broker: TokenBroker,
    api_base_url: String,
}

/// A page of remote message IDs, plus the token to continue from.
pub struct MessagePage {
    pub message_ids: Vec<String>,
    pub next_page_token: String,
}

/// A remote message after header/body normalisation, ready to upsert.
pub struct NormalisedMessage {
    pub remote_message_id: String,
    pub subject: String,
    pub sender_email: String,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub received_at: DateTime<Utc>,
}

#[derive(Deserialize, Default)]
struct ListMessagesResponse {
    #[serde(default)]
    messages: Vec<MessageIdEntry>,
    #[serde(default)]
    next_page_token: String,
}

#[derive(Deserialize)]
struct MessageIdEntry {
    id: String,
}

#[derive(Deserialize)]
struct MessagePayload {
    id: String,
    internal_date: String,
    payload: MimePart,
}

#[derive(Deserialize, Default)]
struct MimePart {
    #[serde(default)]
    headers: Vec<MimeHeader>,
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    body: PartBody,
    #[serde(default)]
    parts: Vec<MimePart>,
}

#[derive(Deserialize, Default)]
struct PartBody {
    #[serde(default)]
    data: Option<String>,
}

#[derive(Deserialize)]
struct MimeHeader {
    name: String,
    value: String,
}

impl MailFetcher {
    pub fn new(http: Client, token_broker: TokenBroker, config: &PipelineConfig) -> Self {
        Self {
            http,
            token_broker,
            api_base_url: config.mailbox_api_base_url.clone(),
        }
    }

    /// Lists up to `page_size` message IDs matching `filter`, continuing
    /// from `page_token` if given.
    pub async fn list_page(
        &self,
        account_id: Uuid,
        filter: &str,
        page_token: Option<&str>,
        page_size: u32,
    ) -> Result<MessagePage, FetcherError> {
        let bearer = self.token_broker.access_token(account_id).await?;
        let mut request = self
            .http
            .get(format!("{}/messages", self.api_base_url))
            .bearer_auth(bearer)
            .query(&[("q", filter), ("maxResults", &page_size.to_string())]);
        if let Some(token) = page_token {
            if !token.is_empty() {
                request = request.query(&[("pageToken", token)]);
            }
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(FetcherError::ApiError { status, body });
        }

        let parsed: ListMessagesResponse = response.json().await?;
        Ok(MessagePage {
            message_ids: parsed.messages.into_iter().map(|m| m.id).collect(),
            next_page_token: parsed.next_page_token,
        })
    }

    /// Fetches a single message's full payload and normalises it.
    pub async fn fetch_message(
        &self,
        account_id: Uuid,
        message_id: &str,
    ) -> Result<NormalisedMessage, FetcherError> {
        let bearer = self.token_broker.access_token(account_id).await?;
        let response = self
            .http
            .get(format!("{}/messages/{}", self.api_base_url, message_id))
            .bearer_auth(bearer)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(FetcherError::ApiError { status, body });
        }

        let parsed: MessagePayload = response.json().await?;
        normalise(parsed)
    }
}

fn header_value<'a>(headers: &'a [MimeHeader], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

/// The bracketed address inside `<...>` if present, else the whole value.
fn extract_sender_address(from_value: &str) -> String {
    if let (Some(start), Some(end)) = (from_value.find('<'), from_value.find('>')) {
        if start < end {
            return from_value[start + 1..end].trim().to_string();
        }
    }
    from_value.trim().to_string()
}

/// URL-safe-base64 decode; a malformed blob yields an empty body rather
/// than failing the whole message.
fn decode_body(data: &str) -> String {
    URL_SAFE_NO_PAD
        .decode(data.trim_end_matches('='))
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_default()
}

/// Recursively walks the MIME part tree, keeping the first plain-text and
/// first HTML leaf encountered.
fn walk_parts(part: &MimePart, text_out: &mut Option<String>, html_out: &mut Option<String>) {
    if !part.parts.is_empty() {
        for child in &part.parts {
            walk_parts(child, text_out, html_out);
        }
        return;
    }

    let Some(data) = &part.body.data else {
        return;
    };

    if part.mime_type.eq_ignore_ascii_case("text/plain") && text_out.is_none() {
        *text_out = Some(decode_body(data));
    } else if part.mime_type.eq_ignore_ascii_case("text/html") && html_out.is_none() {
        *html_out = Some(decode_body(data));
    }
}

fn normalise(payload: MessagePayload) -> Result<NormalisedMessage, FetcherError> {
    let headers = &payload.payload.headers;
    let subject = header_value(headers, "Subject").unwrap_or_default().to_string();
    let from_value = header_value(headers, "From").unwrap_or_default();
    let sender_email = extract_sender_address(from_value).to_lowercase();

    let mut body_text = None;
    let mut body_html = None;
    walk_parts(&payload.payload, &mut body_text, &mut body_html);

    let millis: i64 = payload.internal_date.parse().map_err(|_| {
        FetcherError::UnexpectedShape(format!("non-numeric internalDate `{}`", payload.internal_date))
    })?;
    let received_at = Utc.timestamp_millis_opt(millis).single().ok_or_else(|| {
        FetcherError::UnexpectedShape(format!("out-of-range internalDate `{}`", millis))
    })?;

    Ok(NormalisedMessage {
        remote_message_id: payload.id,
        subject,
        sender_email,
        body_text,
        body_html,
        received_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sender_address_prefers_the_bracketed_form() {
        assert_eq!(
            extract_sender_address("Billing Team <billing@example.com>"),
            "billing@example.com"
        );
        assert_eq!(extract_sender_address("billing@example.com"), "billing@example.com");
    }

    #[test]
    fn malformed_body_data_decodes_to_empty_string() {
        assert_eq!(decode_body("not valid base64!!"), "");
    }

    #[test]
    fn body_walk_prefers_plain_text_over_html_across_siblings() {
        let part = MimePart {
            headers: vec![],
            mime_type: String::new(),
            body: PartBody::default(),
            parts: vec![
                MimePart {
                    headers: vec![],
                    mime_type: "text/html".to_string(),
                    body: PartBody {
                        data: Some(URL_SAFE_NO_PAD.encode("<p>hi</p>")),
                    },
                    parts: vec![],
                },
                MimePart {
                    headers: vec![],
                    mime_type: "text/plain".to_string(),
                    body: PartBody {
                        data: Some(URL_SAFE_NO_PAD.encode("hi")),
                    },
                    parts: vec![],
                },
            ],
        };
        let mut text = None;
        let mut html = None;
        walk_parts(&part, &mut text, &mut html);
        assert_eq!(text.as_deref(), Some("hi"));
        assert_eq!(html.as_deref(), Some("<p>hi</p>"));
    }

    #[test]
    fn headers_are_read_case_insensitively() {
        let headers = vec![MimeHeader {
            name: "SUBJECT".to_string(),
            value: "Your receipt".to_string(),
        }];
        assert_eq!(header_value(&headers, "subject"), Some("Your receipt"));
    }
}
