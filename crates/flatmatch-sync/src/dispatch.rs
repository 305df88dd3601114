use askama::Template;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flatmatch_core::MatchResult;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::SmtpConfig;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid address `{address}`: {reason}")]
    Address { address: String, reason: String },
    #[error("could not build message: {0}")]
    Message(String),
    #[error("smtp delivery failed: {0}")]
    Smtp(String),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("rendering digest: {0}")]
    Render(#[from] askama::Error),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Outbound mail. One call is one delivery attempt; implementations do not
/// retry or queue.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, recipient: &str, subject: &str, html_body: &str) -> Result<(), TransportError>;
}

/// STARTTLS submission through an authenticated relay.
pub struct SmtpTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from_address: String,
}

impl SmtpTransport {
    pub fn new(
        host: &str,
        port: u16,
        username: &str,
        password: &str,
        from_address: &str,
    ) -> Result<Self, TransportError> {
        let creds = Credentials::new(username.to_string(), password.to_string());
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
            .map_err(|e| TransportError::Smtp(e.to_string()))?
            .port(port)
            .credentials(creds)
            .build();
        Ok(Self {
            mailer,
            from_address: from_address.to_string(),
        })
    }

    /// `None` when credentials are not configured.
    pub fn from_config(config: &SmtpConfig) -> Result<Option<Self>, TransportError> {
        let (Some(username), Some(password), Some(from)) =
            (config.username.as_deref(), config.password.as_deref(), config.sender())
        else {
            return Ok(None);
        };
        Self::new(&config.server, config.port, username, password, from).map(Some)
    }
}

#[async_trait]
impl MailTransport for SmtpTransport {
    async fn send(&self, recipient: &str, subject: &str, html_body: &str) -> Result<(), TransportError> {
        let from = self.from_address.parse().map_err(|e: lettre::address::AddressError| {
            TransportError::Address {
                address: self.from_address.clone(),
                reason: e.to_string(),
            }
        })?;
        let to = recipient.parse().map_err(|e: lettre::address::AddressError| TransportError::Address {
            address: recipient.to_string(),
            reason: e.to_string(),
        })?;
        let email = Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html_body.to_string())
            .map_err(|e| TransportError::Message(e.to_string()))?;

        self.mailer
            .send(email)
            .await
            .map_err(|e| TransportError::Smtp(e.to_string()))?;
        Ok(())
    }
}

/// Logs digests instead of sending them. Used when SMTP is not configured.
#[derive(Debug, Default)]
pub struct LogTransport;

#[async_trait]
impl MailTransport for LogTransport {
    async fn send(&self, recipient: &str, subject: &str, html_body: &str) -> Result<(), TransportError> {
        info!(recipient, subject, bytes = html_body.len(), "smtp not configured; digest logged only");
        Ok(())
    }
}

struct DigestRow {
    title: String,
    score: String,
    price: String,
    location: String,
    rooms: String,
    size: String,
    features: Vec<String>,
    source: String,
    link: String,
}

#[derive(Template)]
#[template(path = "digest.html")]
struct DigestTemplate {
    rows: Vec<DigestRow>,
}

const UNKNOWN: &str = "–";

/// 1500.0 becomes "CHF 1,500.00".
pub fn format_chf(amount: f64) -> String {
    let fixed = format!("{:.2}", amount.abs());
    let (whole, cents) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));
    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, c) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    let sign = if amount < 0.0 { "-" } else { "" };
    format!("CHF {sign}{grouped}.{cents}")
}

fn format_optional(value: Option<f64>, suffix: &str) -> String {
    match value {
        Some(v) if v.fract() == 0.0 => format!("{v:.0}{suffix}"),
        Some(v) => format!("{v}{suffix}"),
        None => UNKNOWN.to_string(),
    }
}

pub fn digest_subject(now: DateTime<Utc>) -> String {
    format!("New Matching Apartments Found - {}", now.format("%Y-%m-%d"))
}

pub fn render_digest(matches: &[MatchResult]) -> Result<String, askama::Error> {
    let rows = matches
        .iter()
        .map(|m| {
            let l = &m.listing;
            DigestRow {
                title: l.title.clone(),
                score: format!("{:.2}", m.match_score),
                price: format_chf(l.price),
                location: l.location.clone(),
                rooms: format_optional(l.rooms, ""),
                size: format_optional(l.size, " m²"),
                features: l.features.iter().map(|f| f.to_string()).collect(),
                source: l.source.clone(),
                link: l.link.clone(),
            }
        })
        .collect();
    DigestTemplate { rows }.render()
}

/// Turns a batch of matches into one digest message per recipient.
pub struct NotificationDispatcher {
    transport: Box<dyn MailTransport>,
}

impl NotificationDispatcher {
    pub fn new(transport: Box<dyn MailTransport>) -> Self {
        Self { transport }
    }

    /// Sends one digest. An empty batch succeeds without touching the transport.
    pub async fn send(&self, email: &str, matches: &[MatchResult], now: DateTime<Utc>) -> Result<(), DispatchError> {
        if matches.is_empty() {
            debug!(recipient = email, "no matches; nothing to send");
            return Ok(());
        }
        let body = render_digest(matches)?;
        self.transport.send(email, &digest_subject(now), &body).await?;
        info!(recipient = email, matches = matches.len(), "digest sent");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;
    use flatmatch_core::{Criterion, Feature, Listing};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) struct SentMail {
        pub recipient: String,
        pub subject: String,
        pub body: String,
    }

    /// Records every send; can be switched to fail for selected recipients.
    #[derive(Default, Clone)]
    pub(crate) struct RecordingTransport {
        pub sent: Arc<Mutex<Vec<SentMail>>>,
        pub fail_for: Arc<Mutex<Vec<String>>>,
        pub fail_all: Arc<AtomicBool>,
    }

    impl RecordingTransport {
        pub fn sent(&self) -> Vec<SentMail> {
            self.sent.lock().unwrap().clone()
        }

        pub fn fail_recipient(&self, recipient: &str) {
            self.fail_for.lock().unwrap().push(recipient.to_string());
        }
    }

    #[async_trait]
    impl MailTransport for RecordingTransport {
        async fn send(&self, recipient: &str, subject: &str, html_body: &str) -> Result<(), TransportError> {
            let refused = self.fail_all.load(Ordering::SeqCst)
                || self.fail_for.lock().unwrap().iter().any(|r| r == recipient);
            if refused {
                return Err(TransportError::Smtp("connection refused".into()));
            }
            self.sent.lock().unwrap().push(SentMail {
                recipient: recipient.to_string(),
                subject: subject.to_string(),
                body: html_body.to_string(),
            });
            Ok(())
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).single().unwrap()
    }

    fn sample_match() -> MatchResult {
        MatchResult {
            listing: Listing {
                source: "Flatfox".into(),
                external_id: "ff-1".into(),
                title: "Duplex <rénové> & lumineux".into(),
                price: 1500.0,
                location: "Geneva Old Town".into(),
                rooms: Some(3.5),
                size: None,
                features: [Feature::Balcony, Feature::Parking].into_iter().collect(),
                link: "https://flatfox.ch/fr/flat/1/".into(),
                created_at: now(),
                updated_at: now(),
            },
            match_score: 65.0,
            matching_criteria: vec![Criterion::PriceRange, Criterion::Location, Criterion::Features],
            missing_criteria: vec![],
        }
    }

    #[test]
    fn chf_amounts_group_thousands() {
        assert_eq!(format_chf(1500.0), "CHF 1,500.00");
        assert_eq!(format_chf(980.5), "CHF 980.50");
        assert_eq!(format_chf(1234567.891), "CHF 1,234,567.89");
        assert_eq!(format_chf(0.0), "CHF 0.00");
    }

    #[test]
    fn digest_lists_every_field_and_escapes_html() {
        let body = render_digest(&[sample_match()]).unwrap();
        assert!(body.contains("Match Score: 65.00%"));
        assert!(body.contains("CHF 1,500.00"));
        assert!(body.contains("Geneva Old Town"));
        assert!(body.contains("3.5 rooms | –"));
        assert!(body.contains(r#"<span class="feature">balcony</span>"#));
        assert!(body.contains("Source: Flatfox"));
        assert!(body.contains("View Details"));
        assert!(body.contains("flatfox.ch"));
        assert!(body.contains("&lt;rénové&gt;"));
        assert!(!body.contains("<rénové>"));
    }

    #[test]
    fn subject_carries_the_date() {
        assert_eq!(digest_subject(now()), "New Matching Apartments Found - 2026-03-02");
    }

    #[tokio::test]
    async fn empty_batch_never_reaches_the_transport() {
        let transport = RecordingTransport::default();
        transport.fail_all.store(true, Ordering::SeqCst);
        let dispatcher = NotificationDispatcher::new(Box::new(transport.clone()));

        dispatcher.send("anna@example.ch", &[], now()).await.unwrap();
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn one_message_per_batch() {
        let transport = RecordingTransport::default();
        let dispatcher = NotificationDispatcher::new(Box::new(transport.clone()));

        dispatcher
            .send("anna@example.ch", &[sample_match(), sample_match()], now())
            .await
            .unwrap();
        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipient, "anna@example.ch");
        assert_eq!(sent[0].subject, "New Matching Apartments Found - 2026-03-02");
        assert_eq!(sent[0].body.matches("class=\"listing\"").count(), 2);
    }

    #[tokio::test]
    async fn transport_failure_surfaces_as_dispatch_error() {
        let transport = RecordingTransport::default();
        transport.fail_recipient("anna@example.ch");
        let dispatcher = NotificationDispatcher::new(Box::new(transport.clone()));

        let err = dispatcher
            .send("anna@example.ch", &[sample_match()], now())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Transport(TransportError::Smtp(_))));
    }

    #[test]
    fn smtp_transport_requires_credentials() {
        let mut smtp = crate::config::PipelineConfig::default().smtp;
        assert!(SmtpTransport::from_config(&smtp).unwrap().is_none());
        smtp.username = Some("alerts@example.ch".into());
        smtp.password = Some("secret".into());
        assert!(SmtpTransport::from_config(&smtp).unwrap().is_some());
    }
}
