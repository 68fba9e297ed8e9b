//! Transactional email delivery via the Resend HTTP API.
//!
//! The service is optional: with no `RESEND_API_KEY` configured it stays
//! disabled and every send becomes a logged no-op, which keeps local
//! development free of external calls. Callers treat delivery failures as
//! non-fatal and only log them.

use serde_json::json;
use time::macros::format_description;
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};

const RESEND_API_URL: &str = "https://api.resend.com/emails";

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub api_key: Option<String>,
    pub from_address: String,
    pub api_url: String,
}

impl EmailConfig {
    pub fn from_env() -> Self {
        Self {
            api_key: std::env::var("RESEND_API_KEY")
                .ok()
                .filter(|key| !key.is_empty()),
            from_address: std::env::var("EMAIL_FROM")
                .unwrap_or_else(|_| "Quadra <cobranca@quadra.app>".to_string()),
            api_url: RESEND_API_URL.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct EmailService {
    config: EmailConfig,
    http: reqwest::Client,
}

impl EmailService {
    pub fn new(config: EmailConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    pub fn from_env() -> Self {
        let config = EmailConfig::from_env();
        if config.api_key.is_none() {
            tracing::warn!("RESEND_API_KEY not set - email delivery disabled");
        }
        Self::new(config)
    }

    pub fn is_enabled(&self) -> bool {
        self.config.api_key.is_some()
    }

    /// Boleto issued: point the subscriber at the voucher before it
    /// expires.
    pub async fn send_boleto_issued(
        &self,
        to: &str,
        name: &str,
        amount_cents: i64,
        due_date: OffsetDateTime,
        voucher_url: Option<&str>,
    ) -> BillingResult<()> {
        let amount = format_brl(amount_cents);
        let due = format_date(due_date);
        let subject = format!("Seu boleto Quadra de {amount} vence em {due}");
        let link = match voucher_url {
            Some(url) => format!("<p><a href=\"{url}\">Visualizar boleto</a></p>"),
            None => String::new(),
        };
        let html = format!(
            "<p>Olá {name},</p>\
             <p>O boleto da sua assinatura Quadra no valor de {amount} está \
             disponível. Vencimento: {due}.</p>\
             {link}\
             <p>Após o pagamento, a compensação pode levar até 2 dias úteis.</p>"
        );
        self.send(to, &subject, &html).await
    }

    /// Payment cleared on the processor side.
    pub async fn send_payment_confirmed(
        &self,
        to: &str,
        name: &str,
        amount_cents: i64,
    ) -> BillingResult<()> {
        let amount = format_brl(amount_cents);
        let subject = "Pagamento confirmado".to_string();
        let html = format!(
            "<p>Olá {name},</p>\
             <p>Recebemos o pagamento de {amount} da sua assinatura Quadra. \
             Obrigado!</p>"
        );
        self.send(to, &subject, &html).await
    }

    /// Payment did not clear; `reason` distinguishes expiry from
    /// cancellation.
    pub async fn send_payment_failed(
        &self,
        to: &str,
        name: &str,
        amount_cents: i64,
        reason: &str,
    ) -> BillingResult<()> {
        let amount = format_brl(amount_cents);
        let subject = "Não foi possível concluir seu pagamento".to_string();
        let html = format!(
            "<p>Olá {name},</p>\
             <p>O pagamento de {amount} da sua assinatura Quadra não foi \
             concluído: {reason}.</p>\
             <p>Um novo boleto será emitido no próximo ciclo de cobrança.</p>"
        );
        self.send(to, &subject, &html).await
    }

    async fn send(&self, to: &str, subject: &str, html: &str) -> BillingResult<()> {
        let Some(api_key) = &self.config.api_key else {
            tracing::debug!(to = %to, subject = %subject, "Email disabled, skipping send");
            return Ok(());
        };

        let body = json!({
            "from": self.config.from_address,
            "to": [to],
            "subject": subject,
            "html": html,
        });

        let response = self
            .http
            .post(&self.config.api_url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| BillingError::Email(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(BillingError::Email(format!(
                "Resend returned {status}: {text}"
            )));
        }

        tracing::debug!(to = %to, subject = %subject, "Email sent");
        Ok(())
    }
}

/// Format integer centavos as "R$ 1234,56".
pub(crate) fn format_brl(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.abs();
    format!("{sign}R$ {},{:02}", abs / 100, abs % 100)
}

/// Brazilian day/month/year date format.
pub(crate) fn format_date(date: OffsetDateTime) -> String {
    let format = format_description!("[day]/[month]/[year]");
    date.format(&format).unwrap_or_else(|_| date.to_string())
}
