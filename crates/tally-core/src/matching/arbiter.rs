use crate::catalog::schema::CatalogEntry;
use crate::error::TierError;
use crate::model::ExtractedItem;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// The arbiter's pick from a shortlist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbiterVerdict {
    /// None when no shortlisted entry is the same product.
    pub entry_id: Option<String>,
    pub confidence: f64,
}

/// Last-resort judge that picks the matching entry from a shortlist.
pub trait MatchArbiter: Send + Sync {
    fn choose(
        &self,
        item: &ExtractedItem,
        shortlist: &[Arc<CatalogEntry>],
        timeout: Duration,
    ) -> Result<ArbiterVerdict, TierError>;

    fn backend_name(&self) -> &str;
}

const SYSTEM_PROMPT: &str = r#"You match purchase line items to catalog products.
You receive one line item and a shortlist of catalog candidates as JSON.
Pick the candidate that is the same product (same model, color, yield and pack).
Return ONLY a JSON object:
{ "entry_id": "candidate id or null", "confidence": number between 0 and 1 }
Use null when no candidate is the same product. No markdown fences, no commentary."#;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Serialize)]
struct ShortlistCandidate<'a> {
    id: &'a str,
    sku: &'a str,
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    brand: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    color: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_yield: Option<u32>,
    pack_quantity: u32,
}

/// Arbiter backed by an OpenAI-compatible `/chat/completions` endpoint.
pub struct HttpArbiter {
    client: reqwest::blocking::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl HttpArbiter {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, api_key: Option<String>) -> Self {
        let base_url = base_url.into();
        let model = model.into();
        info!(url = %base_url, model = %model, "using HTTP match arbiter");
        HttpArbiter {
            client: reqwest::blocking::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            api_key,
        }
    }

    fn user_message(item: &ExtractedItem, shortlist: &[Arc<CatalogEntry>]) -> String {
        let candidates: Vec<ShortlistCandidate<'_>> = shortlist
            .iter()
            .map(|e| ShortlistCandidate {
                id: &e.id,
                sku: &e.sku,
                name: &e.name,
                brand: e.brand.as_deref(),
                color: e.color.as_deref(),
                page_yield: e.page_yield,
                pack_quantity: e.pack_quantity,
            })
            .collect();
        let line = serde_json::json!({
            "description": item.description,
            "identifiers": item.identifiers.iter().map(|i| i.value.as_str()).collect::<Vec<_>>(),
            "unit_of_measure": item.unit_of_measure.as_ref().map(|u| u.to_string()),
            "pack_quantity": item.pack_quantity,
        });
        format!(
            "Line item:\n{}\n\nCandidates:\n{}",
            line,
            serde_json::to_string(&candidates).unwrap_or_default()
        )
    }
}

impl MatchArbiter for HttpArbiter {
    fn choose(
        &self,
        item: &ExtractedItem,
        shortlist: &[Arc<CatalogEntry>],
        timeout: Duration,
    ) -> Result<ArbiterVerdict, TierError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: Self::user_message(item, shortlist),
                },
            ],
            temperature: 0.0,
        };

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .timeout(timeout)
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().map_err(|e| {
            if e.is_timeout() {
                TierError::Timeout(timeout)
            } else {
                TierError::Unavailable(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(TierError::Unavailable(format!("arbiter returned {status}: {body}")));
        }

        let chat: ChatResponse = response
            .json()
            .map_err(|e| TierError::InvalidResponse(e.to_string()))?;
        let content = chat
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .ok_or_else(|| TierError::InvalidResponse("empty response".into()))?;

        parse_verdict(content)
    }

    fn backend_name(&self) -> &str {
        "http"
    }
}

/// Parse the arbiter's reply, tolerating markdown fences and text around
/// the JSON object.
pub fn parse_verdict(content: &str) -> Result<ArbiterVerdict, TierError> {
    let trimmed = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    let json = extract_json_object(trimmed)?;
    let verdict: ArbiterVerdict = serde_json::from_str(json)
        .map_err(|e| TierError::InvalidResponse(format!("{e}: {json}")))?;
    if !(0.0..=1.0).contains(&verdict.confidence) {
        return Err(TierError::InvalidResponse(format!(
            "confidence {} outside [0, 1]",
            verdict.confidence
        )));
    }
    Ok(verdict)
}

fn extract_json_object(s: &str) -> Result<&str, TierError> {
    let start = s
        .find('{')
        .ok_or_else(|| TierError::InvalidResponse("no '{' in response".into()))?;
    let end = s
        .rfind('}')
        .ok_or_else(|| TierError::InvalidResponse("no '}' in response".into()))?;
    if end <= start {
        return Err(TierError::InvalidResponse("malformed JSON in response".into()));
    }
    Ok(&s[start..=end])
}
