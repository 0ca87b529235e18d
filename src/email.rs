use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{error, info};

use crate::config::SmtpConfig;
use crate::error::ApiError;

/// SMTP mailer, built once at startup. All sends are best-effort from the
/// caller's point of view unless the flow cannot proceed without the mail
/// (magic-link login).
#[derive(Clone)]
pub struct Mailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl Mailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, ApiError> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| ApiError::Internal(format!("smtp transport: {e}")))?
            .port(config.port)
            .credentials(Credentials::new(
                config.username.clone(),
                config.password.clone(),
            ))
            .build();

        Ok(Self {
            transport,
            from: config.from.clone(),
        })
    }

    async fn send_html(&self, to: &str, subject: &str, html: String) -> Result<(), ApiError> {
        let message = Message::builder()
            .from(self.from.parse().map_err(|e| {
                ApiError::Internal(format!("invalid from address: {e}"))
            })?)
            .to(to
                .parse()
                .map_err(|_| ApiError::bad_request("Invalid recipient address"))?)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html)
            .map_err(|e| ApiError::Internal(format!("failed to build email: {e}")))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| ApiError::Internal(format!("failed to send email: {e}")))?;
        Ok(())
    }

    /// Welcome mail after a captured payment. Returns whether the send
    /// succeeded; the webhook records the outcome instead of failing on it.
    pub async fn send_welcome(&self, to: &str, name: &str) -> bool {
        match self
            .send_html(to, "Welcome to ClassMent!", welcome_template(name))
            .await
        {
            Ok(()) => {
                info!(recipient = to, "welcome email sent");
                true
            }
            Err(e) => {
                error!(recipient = to, error = %e, "welcome email failed");
                false
            }
        }
    }

    pub async fn send_magic_link(&self, to: &str, link: &str) -> Result<(), ApiError> {
        self.send_html(to, "Your ClassMent sign-in link", magic_link_template(link))
            .await
    }
}

fn welcome_template(name: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<body style="font-family: Arial, sans-serif; color: #333;">
  <div style="max-width: 600px; margin: 20px auto; padding: 20px;">
    <h1 style="color: #0066FF;">Welcome to ClassMent {name}!</h1>
    <p>Thank you for joining ClassMent, your gateway to a successful career journey.</p>
    <p>Our comprehensive approach includes:</p>
    <ul>
      <li>Personalized career assessments</li>
      <li>Expert guidance from industry professionals</li>
      <li>Access to our innovative Explorer Graph tool</li>
      <li>Opportunities for real-world experience through externships</li>
    </ul>
    <p>Watch out for an email with your test details coming soon!</p>
  </div>
</body>
</html>"#
    )
}

fn magic_link_template(link: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<body style="font-family: Arial, sans-serif; color: #333;">
  <div style="max-width: 600px; margin: 20px auto; padding: 20px;">
    <h1 style="color: #0066FF;">Sign in to ClassMent</h1>
    <p>Click the link below to sign in. It expires in 15 minutes and can be used once.</p>
    <p><a href="{link}">{link}</a></p>
    <p>If you did not request this, you can ignore this email.</p>
  </div>
</body>
</html>"#
    )
}
