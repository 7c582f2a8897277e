// src/services/email.rs
//! Transactional email dispatch
//!
//! The auth core hands finished emails to a [`Mailer`]; delivery retries and
//! queuing are the mail infrastructure's problem, not ours. Send failures
//! are logged and swallowed so auth flows never fail on email trouble.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sesv2::Client as SesClient;
use std::env;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::common::safe_email_log;

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("email sending not configured")]
    NotConfigured,

    #[error("SES operation failed: {0}")]
    SESError(String),
}

/// A rendered email ready to hand to the mail collaborator
#[derive(Debug, Clone)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub template: String,
    pub html: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: OutgoingEmail) -> Result<(), EmailError>;
}

/// SES-backed mailer
pub struct SesMailer {
    client: SesClient,
    from_email: String,
}

impl SesMailer {
    /// Build from environment. Returns None when AWS_SES_FROM_EMAIL is
    /// unset, in which case the caller should fall back to [`NullMailer`].
    pub async fn from_env() -> Option<Self> {
        let from_email = env::var("AWS_SES_FROM_EMAIL").ok().filter(|v| !v.is_empty())?;

        let aws_config = aws_config::defaults(BehaviorVersion::latest()).load().await;
        Some(Self {
            client: SesClient::new(&aws_config),
            from_email,
        })
    }
}

#[async_trait]
impl Mailer for SesMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<(), EmailError> {
        use aws_sdk_sesv2::types::{Body as SesBody, Content, Destination, EmailContent, Message};

        let destination = Destination::builder().to_addresses(&email.to).build();

        let subject_content = Content::builder()
            .data(&email.subject)
            .charset("UTF-8")
            .build()
            .map_err(|e| EmailError::SESError(format!("Failed to build subject: {}", e)))?;

        let body_content = Content::builder()
            .data(&email.html)
            .charset("UTF-8")
            .build()
            .map_err(|e| EmailError::SESError(format!("Failed to build body: {}", e)))?;

        let ses_body = SesBody::builder().html(body_content).build();

        let message = Message::builder()
            .subject(subject_content)
            .body(ses_body)
            .build();

        let email_content = EmailContent::builder().simple(message).build();

        let result = self
            .client
            .send_email()
            .from_email_address(&self.from_email)
            .destination(destination)
            .content(email_content)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, to = %safe_email_log(&email.to), "Failed to send email via SES");
                EmailError::SESError(format!("Send failed: {}", e))
            })?;

        info!(
            to = %safe_email_log(&email.to),
            template = %email.template,
            message_id = ?result.message_id(),
            "Email sent successfully via SES"
        );

        Ok(())
    }
}

/// Mailer used when SES is unconfigured: logs instead of sending
pub struct NullMailer;

#[async_trait]
impl Mailer for NullMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<(), EmailError> {
        warn!(
            to = %safe_email_log(&email.to),
            template = %email.template,
            subject = %email.subject,
            "Email sending not configured, dropping email"
        );
        Err(EmailError::NotConfigured)
    }
}

/// Recording mailer for tests
#[cfg(test)]
pub struct MemoryMailer {
    pub sent: std::sync::Mutex<Vec<OutgoingEmail>>,
}

#[cfg(test)]
impl MemoryMailer {
    pub fn new() -> Self {
        Self {
            sent: std::sync::Mutex::new(Vec::new()),
        }
    }
}

#[cfg(test)]
#[async_trait]
impl Mailer for MemoryMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<(), EmailError> {
        self.sent.lock().unwrap().push(email);
        Ok(())
    }
}

// ---- Template rendering ----

/// Render the `verify-email` template
pub fn render_verify_email(name: &str, verification_url: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <style>
        body {{ font-family: Arial, sans-serif; line-height: 1.6; color: #333; }}
        .container {{ max-width: 600px; margin: 0 auto; padding: 20px; }}
        .header {{ background-color: #4F46E5; color: white; padding: 20px; text-align: center; }}
        .content {{ padding: 20px; background-color: #f9f9f9; }}
        .footer {{ padding: 20px; text-align: center; font-size: 12px; color: #666; }}
        .button {{ display: inline-block; padding: 12px 24px; background-color: #4F46E5; color: white; text-decoration: none; border-radius: 5px; margin: 10px 0; }}
    </style>
</head>
<body>
    <div class="container">
        <div class="header">
            <h1>Verify your email</h1>
        </div>
        <div class="content">
            <p>Hi {},</p>

            <p>Welcome! Please confirm your email address to activate your account.</p>

            <p><a class="button" href="{}">Verify email</a></p>

            <p>This link expires in 24 hours. If you didn't create an account, you can safely ignore this email.</p>
        </div>
        <div class="footer">
            <p>This is an automated message. Please do not reply directly to this email.</p>
        </div>
    </div>
</body>
</html>"#,
        name, verification_url
    )
}

/// Render the `reset-password` template
pub fn render_reset_password(name: &str, reset_url: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <style>
        body {{ font-family: Arial, sans-serif; line-height: 1.6; color: #333; }}
        .container {{ max-width: 600px; margin: 0 auto; padding: 20px; }}
        .header {{ background-color: #6B7280; color: white; padding: 20px; text-align: center; }}
        .content {{ padding: 20px; background-color: #f9f9f9; }}
        .footer {{ padding: 20px; text-align: center; font-size: 12px; color: #666; }}
        .button {{ display: inline-block; padding: 12px 24px; background-color: #6B7280; color: white; text-decoration: none; border-radius: 5px; margin: 10px 0; }}
    </style>
</head>
<body>
    <div class="container">
        <div class="header">
            <h1>Reset your password</h1>
        </div>
        <div class="content">
            <p>Hi {},</p>

            <p>We received a request to reset your password. Click the button below to choose a new one.</p>

            <p><a class="button" href="{}">Reset password</a></p>

            <p>This link expires in 1 hour. If you didn't request a reset, you can safely ignore this email and your password will stay unchanged.</p>
        </div>
        <div class="footer">
            <p>This is an automated message. Please do not reply directly to this email.</p>
        </div>
    </div>
</body>
</html>"#,
        name, reset_url
    )
}
