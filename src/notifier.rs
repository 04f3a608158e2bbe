//! Mailing exported tables to the distribution list.
//!
//! `Notifier` composes one message per recipient and hands it to a `Mailer`.
//! `SmtpMailer` is the production transport: an authenticated submission
//! session upgraded with STARTTLS.

use std::fs;
use std::path::{Path, PathBuf};

use lettre::message::header::{ContentDisposition, ContentTransferEncoding, ContentType};
use lettre::message::{Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use serde::Serialize;

use crate::config::{MailConfig, SmtpSettings};
use crate::error::DeliveryError;

/// Submits a finished message.
pub trait Mailer: Send {
    fn send(&self, message: &Message) -> Result<(), DeliveryError>;
}

/// SMTP submission with STARTTLS and login.
pub struct SmtpMailer {
    transport: SmtpTransport,
}

impl SmtpMailer {
    pub fn new(settings: &SmtpSettings) -> Result<Self, DeliveryError> {
        let transport = SmtpTransport::starttls_relay(&settings.host)
            .map_err(|e| DeliveryError::Transport {
                reason: format!("cannot configure relay {}: {}", settings.host, e),
            })?
            .port(settings.port)
            .credentials(Credentials::new(
                settings.username.clone(),
                settings.password.clone(),
            ))
            .build();

        Ok(Self { transport })
    }
}

impl Mailer for SmtpMailer {
    fn send(&self, message: &Message) -> Result<(), DeliveryError> {
        self.transport
            .send(message)
            .map(|_| ())
            .map_err(|e| DeliveryError::Transport {
                reason: e.to_string(),
            })
    }
}

/// A recipient that did not get the table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecipientFailure {
    pub recipient: String,
    pub error: String,
}

/// Per-recipient outcome of sending one table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub attachment: PathBuf,
    pub delivered: Vec<String>,
    pub failed: Vec<RecipientFailure>,
}

impl DeliveryReport {
    /// True when at least one recipient was attempted and none succeeded
    pub fn all_failed(&self) -> bool {
        self.delivered.is_empty() && !self.failed.is_empty()
    }
}

/// Sends exported tables as attachments, one message per recipient.
pub struct Notifier {
    mailer: Box<dyn Mailer>,
    sender: Mailbox,
    mail: MailConfig,
}

impl Notifier {
    pub fn new(
        mailer: Box<dyn Mailer>,
        sender: &str,
        mail: MailConfig,
    ) -> Result<Self, DeliveryError> {
        let sender = parse_mailbox(sender)?;
        Ok(Self {
            mailer,
            sender,
            mail,
        })
    }

    /// Build the message for one recipient.
    pub fn compose(
        &self,
        recipient: Mailbox,
        file_name: &str,
        content: Vec<u8>,
    ) -> Result<Message, DeliveryError> {
        let content_type =
            ContentType::parse("application/octet-stream").map_err(|e| DeliveryError::Message {
                reason: e.to_string(),
            })?;

        // Always base64, whatever the table's content looks like
        let attachment = SinglePart::builder()
            .header(ContentDisposition::attachment(file_name))
            .header(content_type)
            .header(ContentTransferEncoding::Base64)
            .body(content);

        Message::builder()
            .from(self.sender.clone())
            .to(recipient)
            .subject(self.mail.subject.clone())
            .multipart(
                MultiPart::mixed()
                    .singlepart(SinglePart::plain(self.mail.body.clone()))
                    .singlepart(attachment),
            )
            .map_err(|e| DeliveryError::Message {
                reason: e.to_string(),
            })
    }

    /// Send `table` to every recipient.
    ///
    /// A failure for one recipient is recorded in the report and the next
    /// recipient is still attempted. Only problems shared by every message
    /// (unreadable attachment) fail the whole call.
    pub fn send(&self, table: &Path, recipients: &[String]) -> Result<DeliveryReport, DeliveryError> {
        let content = fs::read(table).map_err(|e| DeliveryError::Attachment {
            path: table.to_path_buf(),
            source: e,
        })?;
        let file_name = table
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("table.csv")
            .to_string();

        let mut report = DeliveryReport {
            attachment: table.to_path_buf(),
            ..Default::default()
        };

        for recipient in recipients {
            let result = parse_mailbox(recipient)
                .and_then(|mailbox| self.compose(mailbox, &file_name, content.clone()))
                .and_then(|message| self.mailer.send(&message));

            match result {
                Ok(()) => {
                    tracing::info!("CSV file {} sent to {}", file_name, recipient);
                    report.delivered.push(recipient.clone());
                }
                Err(err) => {
                    tracing::warn!("Failed to send {} to {}: {}", file_name, recipient, err);
                    report.failed.push(RecipientFailure {
                        recipient: recipient.clone(),
                        error: err.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, DeliveryError> {
    address
        .trim()
        .parse::<Mailbox>()
        .map_err(|e| DeliveryError::Address {
            address: address.to_string(),
            reason: e.to_string(),
        })
}
