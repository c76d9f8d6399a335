//! Templated circulation emails

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lettre::{
    message::{header::ContentType, Mailbox, Message, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    SmtpTransport, Transport,
};
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::{
    config::EmailConfig,
    error::{AppError, AppResult},
};

/// Email templates sent by the circulation desk and the accrual engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailTemplate {
    BookLent,
    BookReturned,
    DueSoonReminder,
    OverdueNotice,
    BookLost,
    FineIssued,
}

/// Values substituted into a template
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmailData {
    pub recipient_name: String,
    pub book_title: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub fine_amount: Option<Decimal>,
    pub days_overdue: Option<i64>,
}

impl EmailTemplate {
    /// Render `(subject, plain text body)`
    pub fn render(&self, data: &EmailData) -> (String, String) {
        let title = data.book_title.as_deref().unwrap_or("your book");
        let due = data
            .due_date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "-".to_string());
        let fine = data.fine_amount.unwrap_or(Decimal::ZERO);

        match self {
            EmailTemplate::BookLent => (
                format!("Borrowed: {}", title),
                format!(
                    "Hello {},\n\nYou borrowed \"{}\". Please return it by {}.\n",
                    data.recipient_name, title, due
                ),
            ),
            EmailTemplate::BookReturned => {
                let mut body = format!(
                    "Hello {},\n\nWe received \"{}\". Thank you.\n",
                    data.recipient_name, title
                );
                if fine > Decimal::ZERO {
                    body.push_str(&format!(
                        "\nThe book was {} day(s) late. A fine of {} was recorded on your account.\n",
                        data.days_overdue.unwrap_or(0),
                        fine
                    ));
                }
                (format!("Returned: {}", title), body)
            }
            EmailTemplate::DueSoonReminder => (
                format!("Reminder: {} is due soon", title),
                format!(
                    "Hello {},\n\n\"{}\" is due on {}. Please return or extend it in time.\n",
                    data.recipient_name, title, due
                ),
            ),
            EmailTemplate::OverdueNotice => (
                format!("Overdue: {}", title),
                format!(
                    "Hello {},\n\n\"{}\" was due on {} and is {} day(s) overdue.\nYour fine so far is {}.\n",
                    data.recipient_name,
                    title,
                    due,
                    data.days_overdue.unwrap_or(0),
                    fine
                ),
            ),
            EmailTemplate::BookLost => (
                format!("Marked as lost: {}", title),
                format!(
                    "Hello {},\n\n\"{}\" was marked as lost. A replacement fee of {} was charged.\n",
                    data.recipient_name, title, fine
                ),
            ),
            EmailTemplate::FineIssued => (
                "A fine was added to your account".to_string(),
                format!(
                    "Hello {},\n\nA fine of {} was recorded for \"{}\".\n",
                    data.recipient_name, fine, title
                ),
            ),
        }
    }
}

/// Outbound email channel
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_templated_email(
        &self,
        to: &str,
        template: EmailTemplate,
        data: &EmailData,
    ) -> AppResult<()>;
}

/// SMTP mailer
#[derive(Clone)]
pub struct EmailService {
    config: EmailConfig,
}

impl EmailService {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    fn build_message(&self, to: &str, subject: &str, body: &str) -> AppResult<Message> {
        let from_name = self
            .config
            .smtp_from_name
            .as_deref()
            .unwrap_or("Library");
        let from_mailbox = Mailbox::from_str(&format!("{} <{}>", from_name, self.config.smtp_from))
            .map_err(|e| AppError::Dependency(format!("Invalid from address: {}", e)))?;

        let to_mailbox = Mailbox::from_str(to)
            .map_err(|e| AppError::Dependency(format!("Invalid to address: {}", e)))?;

        Message::builder()
            .from(from_mailbox)
            .to(to_mailbox)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(body.to_string()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(format!(
                                r#"<html><body><pre>{}</pre></body></html>"#,
                                body.replace('\n', "<br>")
                            )),
                    ),
            )
            .map_err(|e| AppError::Dependency(format!("Failed to build email: {}", e)))
    }

    fn transport(&self) -> AppResult<SmtpTransport> {
        let builder = if self.config.smtp_use_tls {
            SmtpTransport::starttls_relay(&self.config.smtp_host)
                .map_err(|e| AppError::Dependency(format!("Failed to create SMTP transport: {}", e)))?
        } else {
            SmtpTransport::builder_dangerous(&self.config.smtp_host)
        }
        .port(self.config.smtp_port);

        let builder = if let (Some(username), Some(password)) =
            (&self.config.smtp_username, &self.config.smtp_password)
        {
            builder.credentials(Credentials::new(username.clone(), password.clone()))
        } else {
            builder
        };

        Ok(builder.build())
    }
}

#[async_trait]
impl Mailer for EmailService {
    async fn send_templated_email(
        &self,
        to: &str,
        template: EmailTemplate,
        data: &EmailData,
    ) -> AppResult<()> {
        let (subject, body) = template.render(data);
        let email = self.build_message(to, &subject, &body)?;
        let mailer = self.transport()?;

        // SmtpTransport blocks on network I/O
        tokio::task::spawn_blocking(move || mailer.send(&email))
            .await
            .map_err(|e| AppError::Dependency(format!("Email task failed: {}", e)))?
            .map_err(|e| AppError::Dependency(format!("Failed to send email: {}", e)))?;

        Ok(())
    }
}

/// Mailer used when SMTP is disabled: the rendered subject is only logged
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send_templated_email(
        &self,
        to: &str,
        template: EmailTemplate,
        data: &EmailData,
    ) -> AppResult<()> {
        let (subject, _) = template.render(data);
        tracing::debug!(to, ?template, subject = %subject, "Email delivery disabled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn data() -> EmailData {
        EmailData {
            recipient_name: "Ada".to_string(),
            book_title: Some("Dune".to_string()),
            due_date: Some(Utc::now()),
            fine_amount: Some(dec!(15)),
            days_overdue: Some(3),
        }
    }

    #[test]
    fn overdue_notice_mentions_days_and_fine() {
        let (subject, body) = EmailTemplate::OverdueNotice.render(&data());
        assert_eq!(subject, "Overdue: Dune");
        assert!(body.contains("3 day(s) overdue"));
        assert!(body.contains("15"));
    }

    #[test]
    fn return_without_fine_has_no_fine_line() {
        let mut d = data();
        d.fine_amount = Some(Decimal::ZERO);
        let (_, body) = EmailTemplate::BookReturned.render(&d);
        assert!(!body.contains("fine"));

        let (_, body) = EmailTemplate::BookReturned.render(&data());
        assert!(body.contains("A fine of 15"));
    }

    #[tokio::test]
    async fn log_mailer_always_succeeds() {
        assert!(LogMailer
            .send_templated_email("ada@example.org", EmailTemplate::BookLent, &data())
            .await
            .is_ok());
    }
}
