use anyhow::anyhow;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hyper::header::{AUTHORIZATION, CONTENT_TYPE};
use log::{debug, error};
use mime::APPLICATION_JSON;
use receipt_league_core::{Amount, Confidence};
use reqwest_middleware::{
    reqwest::{StatusCode, Url},
    ClientWithMiddleware,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fs;
use thiserror::Error;
use time::{macros::format_description, Date};

use crate::config::OcrSettings;

const EXTRACTION_PROMPT: &str = r#"Analyze this receipt image and extract the following information:
1. Total amount (the final total paid, not subtotal)
2. Store name
3. Date (if visible)
4. Currency (default to USD if not visible)
5. The text printed on the receipt

Return ONLY a JSON object in this exact format:
{
  "total": 25.50,
  "storeName": "Store Name",
  "date": "2024-01-15",
  "currency": "USD",
  "confidence": "high",
  "text": "all readable text on the receipt"
}

If you cannot clearly read the total, set confidence to "low" or "none".
Make sure the total is a number without currency symbols."#;

/// What the vision model read off a receipt photo
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptReading {
    pub amount: Amount,
    pub store_name: String,
    pub date: Date,
    pub currency: String,
    pub confidence: Confidence,
    pub text: Option<String>,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("problem sending request to vision api: {0}")]
    Send(#[from] reqwest_middleware::reqwest::Error),
    #[error("problem sending request to vision api: {0}")]
    SendRetry(#[from] reqwest_middleware::Error),
    #[error("problem requesting vision api: {0}")]
    Request(String),
    #[error("vision api temporarily unavailable: {0}")]
    Transient(String),
    #[error("could not parse receipt data: {0}")]
    Parse(String),
}

impl Error {
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_))
    }
}

#[async_trait::async_trait]
pub trait ReceiptReader: Send + Sync {
    /// Read the total and store details off a receipt photo
    async fn extract(&self, image: &[u8], content_type: &str) -> Result<ReceiptReading, Error>;
}

#[derive(Clone)]
pub struct VisionClient {
    base_url: Url,
    client: ClientWithMiddleware,
    api_key: SecretString,
    model: String,
    max_tokens: u32,
}

impl VisionClient {
    pub fn new(client: ClientWithMiddleware, settings: &OcrSettings) -> Result<Self, anyhow::Error> {
        let base_url = Url::parse(&settings.base_url)
            .map_err(|e| anyhow!("invalid vision api url {}: {}", settings.base_url, e))?;
        let api_key = read_api_key(&settings.api_key_file)?;

        Ok(Self {
            base_url,
            client,
            api_key,
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
        })
    }
}

pub fn read_api_key(file_path: &str) -> Result<SecretString, anyhow::Error> {
    let raw = fs::read_to_string(file_path)
        .map_err(|e| anyhow!("Failed to read api key file {}: {}", file_path, e))?;
    let key = raw.trim();
    if key.is_empty() {
        return Err(anyhow!("api key file {} is empty", file_path));
    }
    Ok(SecretString::from(key.to_string()))
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[async_trait::async_trait]
impl ReceiptReader for VisionClient {
    async fn extract(&self, image: &[u8], content_type: &str) -> Result<ReceiptReading, Error> {
        let url = self
            .base_url
            .join("chat/completions")
            .map_err(|e| Error::Request(e.to_string()))?;

        let data_url = format!("data:{};base64,{}", content_type, BASE64.encode(image));
        let body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": EXTRACTION_PROMPT },
                    { "type": "image_url", "image_url": { "url": data_url } }
                ]
            }]
        });

        let response = self
            .client
            .post(url)
            .header(
                AUTHORIZATION,
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .header(CONTENT_TYPE, APPLICATION_JSON.to_string())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!("error sending to vision api: {}", e);
                Error::SendRetry(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(
                if status == StatusCode::SERVICE_UNAVAILABLE
                    || status == StatusCode::BAD_GATEWAY
                    || status == StatusCode::GATEWAY_TIMEOUT
                    || status == StatusCode::TOO_MANY_REQUESTS
                {
                    Error::Transient(format!("status {}: {:?}", status, body))
                } else {
                    Error::Request(format!(
                        "error response from vision api with status {}: {:?}",
                        status, body
                    ))
                },
            );
        }

        let completion: ChatCompletion = response.json().await?;
        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| Error::Parse("vision api returned no content".to_string()))?;
        debug!("vision api reply: {}", content);

        parse_reading(&content, time::OffsetDateTime::now_utc().date())
    }
}

/// Pull the receipt fields out of a model reply, which may wrap the JSON in prose
pub fn parse_reading(content: &str, today: Date) -> Result<ReceiptReading, Error> {
    let json = match (content.find('{'), content.rfind('}')) {
        (Some(start), Some(end)) if start < end => &content[start..=end],
        _ => return Err(Error::Parse("no JSON object in reply".to_string())),
    };
    let data: Value =
        serde_json::from_str(json).map_err(|e| Error::Parse(format!("invalid JSON: {}", e)))?;

    let total = data
        .get("total")
        .and_then(Value::as_f64)
        .filter(|total| *total > 0.0)
        .ok_or_else(|| Error::Parse("could not extract total amount from receipt".to_string()))?;
    let amount = Amount::from_dollars(total).map_err(|e| Error::Parse(e.to_string()))?;

    let text_field = |key: &str| {
        data.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    };

    let confidence = match text_field("confidence") {
        Some(raw) => raw.parse().unwrap_or(Confidence::Low),
        None => Confidence::Medium,
    };
    let date = text_field("date")
        .and_then(|raw| Date::parse(raw, format_description!("[year]-[month]-[day]")).ok())
        .unwrap_or(today);

    Ok(ReceiptReading {
        amount,
        store_name: text_field("storeName").unwrap_or("Unknown Store").to_string(),
        date,
        currency: text_field("currency").unwrap_or("USD").to_uppercase(),
        confidence,
        text: text_field("text").map(String::from),
    })
}
