//! Transactional email.
//!
//! Uses SMTP via lettre with Askama HTML and plain-text templates. Without an
//! SMTP configuration the message is not sent and the activation link is
//! logged instead, which is what local development wants.

use askama::Template;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{MultiPart, SinglePart, header::ContentType},
    transport::smtp::{Error as SmtpError, authentication::Credentials},
};
use secrecy::ExposeSecret;
use thiserror::Error;

use crate::config::SmtpConfig;

const ACTIVATION_SUBJECT: &str = "Activate your FreshMart account";

#[derive(Template)]
#[template(path = "email/activate.html")]
struct ActivationEmailHtml<'a> {
    username: &'a str,
    link: &'a str,
}

#[derive(Template)]
#[template(path = "email/activate.txt")]
struct ActivationEmailText<'a> {
    username: &'a str,
    link: &'a str,
}

/// Errors that can occur when sending email.
#[derive(Debug, Error)]
pub enum EmailError {
    #[error("SMTP error: {0}")]
    Smtp(#[from] SmtpError),

    #[error("failed to build message: {0}")]
    MessageBuild(#[from] lettre::error::Error),

    #[error("invalid email address: {0}")]
    InvalidAddress(String),

    #[error("template error: {0}")]
    Template(#[from] askama::Error),
}

#[derive(Clone)]
struct SmtpSender {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from_address: String,
}

/// Sends account emails, or logs them when SMTP is not configured.
#[derive(Clone)]
pub struct EmailService {
    smtp: Option<SmtpSender>,
    base_url: String,
}

impl EmailService {
    /// # Errors
    ///
    /// Returns an error if the SMTP relay can't be set up.
    pub fn new(smtp: Option<&SmtpConfig>, base_url: &str) -> Result<Self, EmailError> {
        let smtp = smtp
            .map(|config| -> Result<SmtpSender, EmailError> {
                let credentials = Credentials::new(
                    config.username.clone(),
                    config.password.expose_secret().to_string(),
                );
                let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)?
                    .port(config.port)
                    .credentials(credentials)
                    .build();
                Ok(SmtpSender {
                    mailer,
                    from_address: config.from.clone(),
                })
            })
            .transpose()?;

        if smtp.is_none() {
            tracing::warn!("SMTP not configured, activation links will only be logged");
        }

        Ok(Self {
            smtp,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Absolute URL of the activation endpoint for `token`.
    #[must_use]
    pub fn activation_link(&self, token: &str) -> String {
        format!("{}/user/active/{token}", self.base_url)
    }

    /// Send the account activation email.
    ///
    /// # Errors
    ///
    /// Returns error if email fails to send or template fails to render.
    pub async fn send_activation(
        &self,
        to: &str,
        username: &str,
        token: &str,
    ) -> Result<(), EmailError> {
        let link = self.activation_link(token);

        let Some(smtp) = &self.smtp else {
            tracing::info!(to, username, link = %link, "Activation email (not sent)");
            return Ok(());
        };

        let html = ActivationEmailHtml {
            username,
            link: &link,
        }
        .render()?;
        let text = ActivationEmailText {
            username,
            link: &link,
        }
        .render()?;

        smtp.send_multipart(to, ACTIVATION_SUBJECT, &text, &html)
            .await?;
        tracing::info!(to, "Activation email sent");
        Ok(())
    }
}

impl SmtpSender {
    async fn send_multipart(
        &self,
        to: &str,
        subject: &str,
        text_body: &str,
        html_body: &str,
    ) -> Result<(), EmailError> {
        let email = Message::builder()
            .from(
                self.from_address
                    .parse()
                    .map_err(|_| EmailError::InvalidAddress(self.from_address.clone()))?,
            )
            .to(to
                .parse()
                .map_err(|_| EmailError::InvalidAddress(to.to_string()))?)
            .subject(subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(text_body.to_string()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html_body.to_string()),
                    ),
            )?;

        self.mailer.send(email).await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_activation_link_trims_trailing_slash() {
        let email = EmailService::new(None, "https://shop.example.com/").unwrap();
        assert_eq!(
            email.activation_link("abc.def"),
            "https://shop.example.com/user/active/abc.def"
        );
    }

    #[test]
    fn test_templates_render_link() {
        let link = "https://shop.example.com/user/active/tok";
        let html = ActivationEmailHtml {
            username: "alice",
            link,
        }
        .render()
        .unwrap();
        let text = ActivationEmailText {
            username: "alice",
            link,
        }
        .render()
        .unwrap();

        assert!(html.contains("alice"));
        assert!(html.contains(link));
        assert!(text.contains(link));
    }

    #[tokio::test]
    async fn test_send_without_smtp_is_ok() {
        let email = EmailService::new(None, "http://localhost:3000").unwrap();
        email
            .send_activation("alice@example.com", "alice", "tok")
            .await
            .unwrap();
    }
}
