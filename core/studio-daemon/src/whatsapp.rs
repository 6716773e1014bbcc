//! WhatsApp Cloud API transport.
//!
//! One blocking HTTPS POST per message with a bounded timeout, so a hung
//! call cannot stall the trigger run behind it.

use reqwest::blocking::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

use studio_core::config::TransportConfig;
use studio_core::Transport;

pub struct WhatsAppTransport {
    client: Option<Client>,
    endpoint: String,
    access_token: Option<String>,
}

impl WhatsAppTransport {
    /// `access_token` is read by the caller from the env var named in config.
    pub fn new(config: &TransportConfig, access_token: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|err| warn!(error = %err, "Failed to build HTTP client"))
            .ok();
        let endpoint = format!(
            "{}/{}/messages",
            config.graph_url.trim_end_matches('/'),
            config.phone_number_id
        );
        if config.phone_number_id.is_empty() || access_token.is_none() {
            warn!("WhatsApp credentials incomplete; every send will fail");
        }
        Self {
            client,
            endpoint,
            access_token: access_token.filter(|token| !token.trim().is_empty()),
        }
    }

    fn post(&self, payload: &Value) -> Result<(), String> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| "HTTP client unavailable".to_string())?;
        let token = self
            .access_token
            .as_deref()
            .ok_or_else(|| "missing access token".to_string())?;

        let response = client
            .post(&self.endpoint)
            .bearer_auth(token)
            .json(payload)
            .send()
            .map_err(|err| format!("request failed: {}", err))?;

        let status = response.status();
        if status.is_success() {
            debug!(status = status.as_u16(), "WhatsApp API accepted message");
            return Ok(());
        }
        let body = response.text().unwrap_or_default();
        Err(format!("WhatsApp API error {}: {}", status.as_u16(), body))
    }
}

impl Transport for WhatsAppTransport {
    fn send_text(&self, phone: &str, body: &str) -> Result<(), String> {
        self.post(&text_payload(phone, body))
    }

    fn send_template(
        &self,
        phone: &str,
        template: &str,
        language_code: &str,
        params: &[String],
    ) -> Result<(), String> {
        self.post(&template_payload(phone, template, language_code, params))
    }
}

pub fn text_payload(phone: &str, body: &str) -> Value {
    json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": phone,
        "type": "text",
        "text": { "preview_url": false, "body": body },
    })
}

pub fn template_payload(
    phone: &str,
    template: &str,
    language_code: &str,
    params: &[String],
) -> Value {
    let parameters: Vec<Value> = params
        .iter()
        .map(|param| json!({ "type": "text", "text": param }))
        .collect();
    json!({
        "messaging_product": "whatsapp",
        "to": phone,
        "type": "template",
        "template": {
            "name": template,
            "language": { "code": language_code },
            "components": [
                { "type": "body", "parameters": parameters }
            ],
        },
    })
}
