// Outbound mail: template rendering and the HTTP mail relay client

use crate::core::errors::NotificationError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// A fully rendered message ready for delivery
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutgoingEmail {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), NotificationError>;
}

pub trait TemplateRenderer: Send + Sync {
    /// Render the named template; `UnknownTemplate` when it does not exist
    fn render(&self, name: &str, data: &Value) -> Result<String, NotificationError>;
}

/// Named HTML templates with `{{ key }}` placeholders
///
/// Keys may be dotted paths into nested objects (`{{ user.name }}`).
/// Substituted values are HTML-escaped; missing keys render as empty text.
#[derive(Debug, Default, Clone)]
pub struct TemplateRegistry {
    templates: HashMap<String, String>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `*.html` file in `dir`; the file stem is the template name
    pub fn load_dir(dir: &Path) -> Result<Self, NotificationError> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| NotificationError::TemplateLoad(format!("{}: {}", dir.display(), e)))?;

        let mut registry = Self::new();
        for entry in entries {
            let path = entry
                .map_err(|e| NotificationError::TemplateLoad(e.to_string()))?
                .path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("html") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            let body = std::fs::read_to_string(&path)
                .map_err(|e| NotificationError::TemplateLoad(format!("{}: {}", path.display(), e)))?;
            registry.templates.insert(name.to_string(), body);
        }

        info!(dir = %dir.display(), count = registry.templates.len(), "Email templates loaded");
        Ok(registry)
    }

    pub fn with_template(mut self, name: impl Into<String>, body: impl Into<String>) -> Self {
        self.templates.insert(name.into(), body.into());
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

impl TemplateRenderer for TemplateRegistry {
    fn render(&self, name: &str, data: &Value) -> Result<String, NotificationError> {
        let template = self
            .templates
            .get(name)
            .ok_or_else(|| NotificationError::UnknownTemplate(name.to_string()))?;
        Ok(substitute(template, data))
    }
}

fn substitute(template: &str, data: &Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let key = after[..end].trim();
                if let Some(value) = lookup(data, key) {
                    out.push_str(&escape_html(&value));
                }
                rest = &after[end + 2..];
            }
            None => {
                // Unterminated placeholder is kept verbatim
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn lookup(data: &Value, key: &str) -> Option<String> {
    let mut current = data;
    for part in key.split('.') {
        current = current.get(part)?;
    }
    match current {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Delivers mail by POSTing JSON to a mail relay
pub struct HttpMailer {
    http_client: Client,
    relay_url: String,
}

impl HttpMailer {
    pub fn new(relay_url: &str, timeout: Duration) -> Result<Self, NotificationError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(2))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| NotificationError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            relay_url: relay_url.to_string(),
        })
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), NotificationError> {
        let response = self
            .http_client
            .post(&self.relay_url)
            .json(email)
            .send()
            .await
            .map_err(|e| NotificationError::Send(format!("relay unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotificationError::Send(format!("relay responded with {}", status)));
        }

        debug!(recipients = email.to.len(), subject = %email.subject, "Email handed to relay");
        Ok(())
    }
}

/// Writes outgoing mail to the log instead of delivering it. Used when no
/// relay is configured.
#[derive(Debug, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), NotificationError> {
        info!(
            from = %email.from,
            to = ?email.to,
            subject = %email.subject,
            body_len = email.html.len(),
            "Email not delivered (no relay configured)"
        );
        Ok(())
    }
}
