//! Outbound messaging seam.
//!
//! The engine only needs "send this body" and "send this template"; the
//! concrete client (WhatsApp Cloud API) lives in the daemon.

use std::collections::HashSet;
use std::sync::Mutex;

pub trait Transport: Send + Sync {
    fn send_text(&self, phone: &str, body: &str) -> Result<(), String>;

    fn send_template(
        &self,
        phone: &str,
        template: &str,
        language_code: &str,
        params: &[String],
    ) -> Result<(), String>;
}

/// What a [`RecordingTransport`] saw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentMessage {
    Text {
        phone: String,
        body: String,
    },
    Template {
        phone: String,
        template: String,
        language_code: String,
        params: Vec<String>,
    },
}

impl SentMessage {
    pub fn phone(&self) -> &str {
        match self {
            SentMessage::Text { phone, .. } | SentMessage::Template { phone, .. } => phone,
        }
    }

    pub fn template(&self) -> Option<&str> {
        match self {
            SentMessage::Template { template, .. } => Some(template),
            SentMessage::Text { .. } => None,
        }
    }
}

/// In-memory transport that records every accepted message. Phones marked
/// as failing reject sends without recording them.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<SentMessage>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_for(&self, phone: &str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(phone.to_string());
        }
    }

    pub fn recover(&self, phone: &str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.remove(phone);
        }
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }

    pub fn sent_to(&self, phone: &str) -> Vec<SentMessage> {
        self.sent()
            .into_iter()
            .filter(|message| message.phone() == phone)
            .collect()
    }

    fn deliver(&self, message: SentMessage) -> Result<(), String> {
        let failing = self
            .failing
            .lock()
            .map_err(|_| "transport lock poisoned".to_string())?;
        if failing.contains(message.phone()) {
            return Err(format!("recipient {} rejected the message", message.phone()));
        }
        drop(failing);
        self.sent
            .lock()
            .map_err(|_| "transport lock poisoned".to_string())?
            .push(message);
        Ok(())
    }
}

impl Transport for RecordingTransport {
    fn send_text(&self, phone: &str, body: &str) -> Result<(), String> {
        self.deliver(SentMessage::Text {
            phone: phone.to_string(),
            body: body.to_string(),
        })
    }

    fn send_template(
        &self,
        phone: &str,
        template: &str,
        language_code: &str,
        params: &[String],
    ) -> Result<(), String> {
        self.deliver(SentMessage::Template {
            phone: phone.to_string(),
            template: template.to_string(),
            language_code: language_code.to_string(),
            params: params.to_vec(),
        })
    }
}
