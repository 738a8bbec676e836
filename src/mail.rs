//! Outgoing transactional mail.
//!
//! Messages go to a SendGrid-compatible JSON API via `reqwest`. When no API
//! key is configured the mailer logs the message and reports it as skipped,
//! which keeps local development and tests free of network calls. Handlers
//! send in the background; a failed mail never fails the request.

use std::sync::Arc;

use serde_json::json;

use crate::config::MailConfig;
use crate::metrics::Metrics;

pub struct Mailer {
    cfg: MailConfig,
    client: reqwest::Client,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub to_email: String,
    pub to_name: String,
    pub subject: String,
    pub html_body: String,
}

impl Mailer {
    pub fn new(cfg: MailConfig) -> Self {
        Self { cfg, client: reqwest::Client::new() }
    }

    pub fn is_enabled(&self) -> bool {
        !self.cfg.api_key.is_empty()
    }

    pub async fn send(&self, msg: Message) -> anyhow::Result<bool> {
        if !self.is_enabled() {
            tracing::info!("Mail disabled, skipping: '{}' to {}", msg.subject, msg.to_email);
            return Ok(false);
        }

        let payload = json!({
            "personalizations": [{
                "to": [{ "email": msg.to_email, "name": msg.to_name }]
            }],
            "from": { "email": self.cfg.from_email, "name": self.cfg.from_name },
            "subject": msg.subject,
            "content": [{ "type": "text/html", "value": msg.html_body }]
        });

        let resp = self
            .client
            .post(&self.cfg.api_url)
            .bearer_auth(&self.cfg.api_key)
            .json(&payload)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("mail provider returned {}: {}", status, body);
        }
        Ok(true)
    }

    pub fn verification_message(&self, to_email: &str, to_name: &str, token: &str) -> Message {
        let link = format!("{}/verify-email?token={}", self.cfg.frontend_url, token);
        Message {
            to_email: to_email.to_string(),
            to_name: to_name.to_string(),
            subject: "Verify your email | تأكيد البريد الإلكتروني".to_string(),
            html_body: format!(
                "<p>Hello {name},</p>\
                 <p>Please confirm your email address by clicking the link below. \
                 The link is valid for 24 hours.</p>\
                 <p dir=\"rtl\">يرجى تأكيد بريدك الإلكتروني عبر الرابط أدناه. الرابط صالح لمدة 24 ساعة.</p>\
                 <p><a href=\"{link}\">{link}</a></p>",
                name = to_name,
                link = link
            ),
        }
    }

    pub fn password_reset_message(&self, to_email: &str, to_name: &str, token: &str) -> Message {
        let link = format!("{}/reset-password?token={}", self.cfg.frontend_url, token);
        Message {
            to_email: to_email.to_string(),
            to_name: to_name.to_string(),
            subject: "Reset your password | إعادة تعيين كلمة المرور".to_string(),
            html_body: format!(
                "<p>Hello {name},</p>\
                 <p>A password reset was requested for your account. If this was you, \
                 use the link below within 24 hours. Otherwise you can ignore this mail.</p>\
                 <p dir=\"rtl\">تم طلب إعادة تعيين كلمة المرور لحسابك. استخدم الرابط أدناه خلال 24 ساعة.</p>\
                 <p><a href=\"{link}\">{link}</a></p>",
                name = to_name,
                link = link
            ),
        }
    }

    pub fn order_confirmation_message(
        &self,
        to_email: &str,
        to_name: &str,
        order_number: &str,
        pharmacy_name: &str,
        total: f64,
    ) -> Message {
        Message {
            to_email: to_email.to_string(),
            to_name: to_name.to_string(),
            subject: format!("Order {} confirmed | تم تأكيد الطلب", order_number),
            html_body: format!(
                "<p>Hello {name},</p>\
                 <p>Your order <strong>{number}</strong> from {pharmacy} has been received. \
                 Total due on delivery: {total:.2}.</p>\
                 <p dir=\"rtl\">تم استلام طلبك <strong>{number}</strong> من {pharmacy}. \
                 المبلغ المستحق عند التسليم: {total:.2}.</p>",
                name = to_name,
                number = order_number,
                pharmacy = pharmacy_name,
                total = total
            ),
        }
    }
}

/// Sends a message off the request path and tracks the outcome in metrics.
pub fn send_in_background(mailer: Arc<Mailer>, metrics: Metrics, msg: Message) {
    tokio::spawn(async move {
        match mailer.send(msg).await {
            Ok(true) => metrics.inc_emails_sent(),
            Ok(false) => {}
            Err(e) => {
                metrics.inc_emails_failed();
                tracing::error!("Failed to send mail: {}", e);
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_mailer() -> Mailer {
        Mailer::new(MailConfig {
            api_key: String::new(),
            api_url: "https://api.sendgrid.com/v3/mail/send".to_string(),
            from_email: "noreply@medmarkt.example".to_string(),
            from_name: "MedMarkt".to_string(),
            frontend_url: "http://localhost:3000".to_string(),
        })
    }

    #[tokio::test]
    async fn test_disabled_mailer_skips_send() {
        let mailer = test_mailer();
        assert!(!mailer.is_enabled());
        let msg = mailer.verification_message("user@example.com", "User", "tok123");
        assert!(!mailer.send(msg).await.unwrap());
    }

    #[test]
    fn test_templates_contain_links() {
        let mailer = test_mailer();
        let v = mailer.verification_message("u@e.com", "U", "abc");
        assert!(v.html_body.contains("http://localhost:3000/verify-email?token=abc"));
        let r = mailer.password_reset_message("u@e.com", "U", "xyz");
        assert!(r.html_body.contains("reset-password?token=xyz"));
        let o = mailer.order_confirmation_message("u@e.com", "U", "ORD-20250101-ABC123", "Al Shifa", 99.5);
        assert!(o.subject.contains("ORD-20250101-ABC123"));
        assert!(o.html_body.contains("99.50"));
    }
}
