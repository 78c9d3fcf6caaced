use async_trait::async_trait;
use serde::Serialize;

use crate::traits::{DownloadEmail, Mailer, UpstreamError};

pub const DEFAULT_API_BASE: &str = "https://api.resend.com";

const SERVICE: &str = "resend";

/// Subject and HTML body of the download email.
pub fn render_download_email(email: &DownloadEmail) -> (String, String) {
    let title = escape_html(&email.beat_title);
    let url = escape_html(&email.download_url);
    let expires = email.expires_at.format("%a, %d %b %Y %H:%M:%S GMT");

    let subject = format!("Your beat is ready: {}", email.beat_title);
    let html = format!(
        r#"<div style="font-family:Arial,sans-serif;line-height:1.5;color:#111;">
  <h2>Thank you for your order</h2>
  <p>Your purchase for <strong>{title}</strong> is confirmed.</p>
  <p>
    Download your archive here:<br />
    <a href="{url}">{url}</a>
  </p>
  <p>This link expires on {expires}.</p>
</div>"#
    );

    (subject, html)
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[derive(Serialize)]
struct SendEmail<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    html: &'a str,
}

/// Transactional email through the Resend HTTP API.
pub struct ResendMailer {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    from: String,
}

impl ResendMailer {
    pub fn new(api_key: impl Into<String>, from: impl Into<String>) -> Self {
        Self::with_api_base(api_key, from, DEFAULT_API_BASE)
    }

    pub fn with_api_base(
        api_key: impl Into<String>,
        from: impl Into<String>,
        api_base: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            from: from.into(),
        }
    }
}

impl std::fmt::Debug for ResendMailer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResendMailer")
            .field("api_base", &self.api_base)
            .field("from", &self.from)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Mailer for ResendMailer {
    async fn send_download_email(&self, email: DownloadEmail) -> Result<(), UpstreamError> {
        let (subject, html) = render_download_email(&email);
        let payload = SendEmail {
            from: &self.from,
            to: [&email.to],
            subject: &subject,
            html: &html,
        };

        let response = self
            .http
            .post(format!("{}/emails", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| UpstreamError::Transport {
                service: SERVICE,
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Status {
                service: SERVICE,
                status: status.as_u16(),
                body,
            });
        }

        tracing::info!(beat = %email.beat_title, "Download email sent");
        Ok(())
    }
}

/// Writes the download link to the log instead of sending mail. Used when no
/// email provider is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_download_email(&self, email: DownloadEmail) -> Result<(), UpstreamError> {
        tracing::warn!(
            to = %email.to,
            beat = %email.beat_title,
            download_url = %email.download_url,
            expires_at = %email.expires_at,
            "Email delivery not configured; download link logged instead"
        );
        Ok(())
    }
}
