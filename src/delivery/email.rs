use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use minijinja::{AutoEscape, Environment, context};
use tracing::{debug, info};

use super::{BackendKind, Delivery, DeliveryBackend, images_or_error};
use crate::config::{EmailConfig, Language, SmtpEncryption};
use crate::error::{DeliveryError, ErrorClass};
use crate::i18n::Translate;

const TEXT_TEMPLATE: &str = "email.txt.j2";
const HTML_TEMPLATE: &str = "email.html.j2";

/// Longest address accepted at the kiosk keyboard.
const MAX_ADDRESS_LEN: usize = 254;
const MAX_LOCAL_LEN: usize = 64;

/// Syntactic check run before any network I/O: `local@domain.tld`, printable
/// ASCII only, sane lengths. Returns the trimmed address.
pub fn validate_recipient(raw: &str) -> Result<String, DeliveryError> {
    let address = raw.trim();
    let invalid = || DeliveryError::new(ErrorClass::InvalidRecipient, format!("invalid address {address:?}"));

    if address.len() < 6 || address.len() > MAX_ADDRESS_LEN {
        return Err(invalid());
    }
    if !address.chars().all(|c| c.is_ascii_graphic()) {
        return Err(invalid());
    }
    let Some((local, domain)) = address.split_once('@') else {
        return Err(invalid());
    };
    if local.is_empty() || local.len() > MAX_LOCAL_LEN || domain.contains('@') {
        return Err(invalid());
    }
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 {
        return Err(invalid());
    }
    let labels_ok = labels.iter().all(|label| {
        !label.is_empty()
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    });
    let tld_ok = labels
        .last()
        .is_some_and(|tld| tld.len() >= 2 && tld.chars().all(|c| c.is_ascii_alphabetic()));
    if !labels_ok || !tld_ok {
        return Err(invalid());
    }
    Ok(address.to_string())
}

pub struct EmailBackend {
    config: EmailConfig,
    kiosk_name: String,
    language: Language,
    translator: Arc<dyn Translate>,
}

impl EmailBackend {
    pub fn new(
        config: EmailConfig,
        kiosk_name: String,
        language: Language,
        translator: Arc<dyn Translate>,
    ) -> Self {
        Self {
            config,
            kiosk_name,
            language,
            translator,
        }
    }

    fn text_or(&self, configured: &str, key: &str) -> String {
        match configured.trim() {
            "" => self
                .translator
                .translate_with(key, &[("name", self.kiosk_name.as_str())]),
            value => value.to_string(),
        }
    }

    pub fn subject(&self) -> String {
        self.text_or(&self.config.subject, "email_subject")
    }

    /// Render the plain-text and HTML bodies.
    pub fn render_bodies(&self) -> Result<(String, String), DeliveryError> {
        let env = templates().map_err(template_error)?;
        let ctx = context! {
            language => self.language.code(),
            headline => self.text_or(&self.config.headline, "email_headline"),
            body_text => self.text_or(&self.config.body, "email_body"),
            footer_text => self.text_or(&self.config.footer, "email_footer"),
        };
        let text = env
            .get_template(TEXT_TEMPLATE)
            .and_then(|t| t.render(&ctx))
            .map_err(template_error)?;
        let html = env
            .get_template(HTML_TEMPLATE)
            .and_then(|t| t.render(&ctx))
            .map_err(template_error)?;
        Ok((text, html))
    }

    /// Build the full message: text/HTML alternative plus one JPEG attachment
    /// per image.
    pub fn compose(
        &self,
        recipient: &str,
        attachments: Vec<(String, Vec<u8>)>,
    ) -> Result<Message, DeliveryError> {
        let sender: Address = self.config.sender_email.trim().parse().map_err(|err| {
            DeliveryError::new(ErrorClass::Configuration, format!("invalid sender address: {err}"))
        })?;
        let to: Mailbox = recipient.parse().map_err(|err| {
            DeliveryError::new(ErrorClass::InvalidRecipient, format!("{recipient}: {err}"))
        })?;
        let (text, html) = self.render_bodies()?;

        let jpeg = ContentType::parse("image/jpeg").map_err(|err| {
            DeliveryError::new(ErrorClass::Configuration, format!("content type: {err}"))
        })?;
        let mut body = MultiPart::mixed().multipart(MultiPart::alternative_plain_html(text, html));
        for (name, bytes) in attachments {
            body = body.singlepart(Attachment::new(name).body(bytes, jpeg.clone()));
        }

        Message::builder()
            .from(Mailbox::new(Some(self.kiosk_name.clone()), sender))
            .to(to)
            .subject(self.subject())
            .multipart(body)
            .map_err(|err| DeliveryError::new(ErrorClass::Configuration, err.to_string()))
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, DeliveryError> {
        let host = self.config.smtp_server.trim();
        let builder = match self.config.encryption {
            SmtpEncryption::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(host),
            SmtpEncryption::Starttls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host),
        }
        .map_err(|err| DeliveryError::new(ErrorClass::Configuration, err.to_string()))?;

        let mut builder = builder
            .port(self.config.smtp_port)
            .timeout(Some(self.config.timeout));
        if !self.config.smtp_user.is_empty() {
            builder = builder.credentials(Credentials::new(
                self.config.smtp_user.clone(),
                self.config.smtp_password.expose().to_string(),
            ));
        }
        Ok(builder.build())
    }
}

#[async_trait]
impl DeliveryBackend for EmailBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Email
    }

    async fn send(
        &self,
        session_dir: &Path,
        recipient: Option<&str>,
    ) -> Result<Delivery, DeliveryError> {
        let recipient = validate_recipient(recipient.unwrap_or_default())?;
        let images = images_or_error(session_dir)?;

        let mut attachments = Vec::with_capacity(images.len());
        for path in images {
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|err| DeliveryError::io(&format!("failed to read {}", path.display()), &err))?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "photo.jpg".to_string());
            attachments.push((name, bytes));
        }
        let count = attachments.len();
        let message = self.compose(&recipient, attachments)?;

        debug!(server = %self.config.smtp_server, port = self.config.smtp_port, "connecting to smtp relay");
        self.transport()?
            .send(message)
            .await
            .map_err(classify_smtp_error)?;
        info!(session = %session_dir.display(), attachments = count, "email sent");
        Ok(Delivery::Sent)
    }
}

fn templates() -> Result<Environment<'static>, minijinja::Error> {
    let mut env = Environment::new();
    env.set_auto_escape_callback(|name| {
        if name.ends_with(".html.j2") {
            AutoEscape::Html
        } else {
            AutoEscape::None
        }
    });
    env.add_template(TEXT_TEMPLATE, include_str!("../../templates/email.txt.j2"))?;
    env.add_template(HTML_TEMPLATE, include_str!("../../templates/email.html.j2"))?;
    Ok(env)
}

fn template_error(err: minijinja::Error) -> DeliveryError {
    DeliveryError::new(ErrorClass::Configuration, format!("email template: {err}"))
}

fn classify_smtp_error(err: lettre::transport::smtp::Error) -> DeliveryError {
    let status = err.status().map(|code| code.to_string());
    let class = if err.is_timeout() {
        ErrorClass::Timeout
    } else if matches!(status.as_deref(), Some("530" | "534" | "535")) {
        ErrorClass::Authentication
    } else if err.is_permanent() || err.is_transient() {
        ErrorClass::Rejected
    } else {
        ErrorClass::Connection
    };
    DeliveryError::new(class, err.to_string())
}
