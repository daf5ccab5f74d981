use async_trait::async_trait;
use lettre::{
    message::header::ContentType, transport::smtp::authentication::Credentials, AsyncSmtpTransport,
    AsyncTransport, Message, Tokio1Executor,
};
use serde_json::json;
use std::env;
use std::time::Duration;
use tokio::sync::Mutex;

const DEFAULT_FROM_EMAIL: &str = "hello@sctcoding.club";
const DEFAULT_FROM_NAME: &str = "SCT Coding Club";
const BREVO_API_URL: &str = "https://api.brevo.com";

#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    #[error("Failed to build email message: {0}")]
    MessageBuild(String),
    #[error("Failed to send email: {0}")]
    SendFailed(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Everything needed to render a password reset message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordResetEmail {
    pub to_email: String,
    pub name: String,
    pub reset_token: String,
    pub expires_in_minutes: i64,
    /// The account has never had a password, so the copy talks about
    /// finishing setup instead of resetting.
    pub first_time_setup: bool,
}

#[async_trait]
pub trait EmailService: Send + Sync {
    async fn send_welcome_email(&self, to_email: &str, name: &str) -> Result<(), EmailError>;
    async fn send_password_reset_email(&self, email: PasswordResetEmail) -> Result<(), EmailError>;
}

struct RenderedEmail {
    subject: String,
    html: String,
}

/// Escapes text for interpolation into the HTML templates.
fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn render_welcome(name: &str, frontend_url: &str) -> RenderedEmail {
    let html = format!(
        r#"
<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
</head>
<body style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto; padding: 20px;">
    <h1 style="color: #333;">Welcome, {}!</h1>
    <p>Your SCT Coding Club account is ready. You can sign in any time from the club portal.</p>
    <p style="text-align: center; margin: 30px 0;">
        <a href="{}" style="background-color: #4CAF50; color: white; padding: 12px 24px; text-decoration: none; border-radius: 4px; display: inline-block;">Open the portal</a>
    </p>
</body>
</html>
"#,
        escape_html(name),
        escape_html(frontend_url)
    );

    RenderedEmail {
        subject: "🎉 Welcome to SCT Coding Club!".to_string(),
        html,
    }
}

fn reset_url(frontend_url: &str, token: &str) -> String {
    format!(
        "{}/reset-password?token={}",
        frontend_url,
        urlencoding::encode(token)
    )
}

fn render_password_reset(email: &PasswordResetEmail, frontend_url: &str) -> RenderedEmail {
    let url = escape_html(&reset_url(frontend_url, &email.reset_token));
    let (subject, heading, intro, button) = if email.first_time_setup {
        (
            "🔐 Complete Your Account Setup - SCT Coding Club",
            "Complete your account setup",
            "Your account was created without a password. Choose one to finish setting it up.",
            "Set Password",
        )
    } else {
        (
            "🔐 Password Reset Request - SCT Coding Club",
            "Reset your password",
            "We received a request to reset the password for your account.",
            "Reset Password",
        )
    };

    let html = format!(
        r#"
<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
</head>
<body style="font-family: Arial, sans-serif; max-width: 600px; margin: 0 auto; padding: 20px;">
    <h1 style="color: #333;">{}</h1>
    <p>Hi {},</p>
    <p>{}</p>
    <p style="text-align: center; margin: 30px 0;">
        <a href="{}" style="background-color: #2196F3; color: white; padding: 12px 24px; text-decoration: none; border-radius: 4px; display: inline-block;">{}</a>
    </p>
    <p style="color: #666; font-size: 14px;">Or copy and paste this link into your browser:</p>
    <p style="color: #666; font-size: 14px; word-break: break-all;">{}</p>
    <p style="color: #999; font-size: 12px; margin-top: 40px;">This link will expire in {} minutes. If you didn't request this, you can safely ignore this email.</p>
</body>
</html>
"#,
        heading,
        escape_html(&email.name),
        intro,
        url,
        button,
        url,
        email.expires_in_minutes
    );

    RenderedEmail {
        subject: subject.to_string(),
        html,
    }
}

/// A message captured by [`MockEmailService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentEmail {
    Welcome {
        to: String,
        name: String,
    },
    PasswordReset {
        to: String,
        reset_token: String,
        first_time_setup: bool,
    },
}

/// Logs messages instead of sending them and keeps an outbox for inspection.
pub struct MockEmailService {
    frontend_url: String,
    outbox: Mutex<Vec<SentEmail>>,
}

impl MockEmailService {
    pub fn new(frontend_url: &str) -> Self {
        Self {
            frontend_url: frontend_url.to_string(),
            outbox: Mutex::new(Vec::new()),
        }
    }

    pub async fn sent(&self) -> Vec<SentEmail> {
        self.outbox.lock().await.clone()
    }
}

#[async_trait]
impl EmailService for MockEmailService {
    async fn send_welcome_email(&self, to_email: &str, name: &str) -> Result<(), EmailError> {
        let rendered = render_welcome(name, &self.frontend_url);
        tracing::info!("📧 [MOCK EMAIL] Welcome email to: {}", to_email);
        tracing::info!("   Subject: {}", rendered.subject);
        tracing::info!("   ---");

        self.outbox.lock().await.push(SentEmail::Welcome {
            to: to_email.to_string(),
            name: name.to_string(),
        });
        Ok(())
    }

    async fn send_password_reset_email(&self, email: PasswordResetEmail) -> Result<(), EmailError> {
        let rendered = render_password_reset(&email, &self.frontend_url);
        tracing::info!("📧 [MOCK EMAIL] Password reset email to: {}", email.to_email);
        tracing::info!("   Subject: {}", rendered.subject);
        tracing::info!(
            "   Reset link: {}",
            reset_url(&self.frontend_url, &email.reset_token)
        );
        tracing::info!("   ---");

        self.outbox.lock().await.push(SentEmail::PasswordReset {
            to: email.to_email,
            reset_token: email.reset_token,
            first_time_setup: email.first_time_setup,
        });
        Ok(())
    }
}

pub struct SmtpEmailService {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from_email: String,
    from_name: String,
    frontend_url: String,
}

impl SmtpEmailService {
    pub fn new(frontend_url: &str) -> Result<Self, EmailError> {
        let smtp_host = env::var("SMTP_HOST")
            .map_err(|_| EmailError::ConfigError("SMTP_HOST not set".to_string()))?;
        let smtp_port = env::var("SMTP_PORT")
            .unwrap_or_else(|_| "587".to_string())
            .parse::<u16>()
            .map_err(|_| EmailError::ConfigError("Invalid SMTP_PORT".to_string()))?;
        let smtp_username = env::var("SMTP_USERNAME")
            .map_err(|_| EmailError::ConfigError("SMTP_USERNAME not set".to_string()))?;
        let smtp_password = env::var("SMTP_PASSWORD")
            .map_err(|_| EmailError::ConfigError("SMTP_PASSWORD not set".to_string()))?;
        let from_email = env::var("EMAIL_FROM").unwrap_or_else(|_| DEFAULT_FROM_EMAIL.to_string());
        let from_name =
            env::var("EMAIL_FROM_NAME").unwrap_or_else(|_| DEFAULT_FROM_NAME.to_string());

        let encryption = env::var("SMTP_ENCRYPTION").unwrap_or_else(|_| "starttls".to_string());
        let credentials = Credentials::new(smtp_username, smtp_password);

        let mailer = match encryption.to_lowercase().as_str() {
            "tls" => AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp_host)
                .map_err(|e| EmailError::ConfigError(format!("SMTP relay error: {}", e)))?
                .port(smtp_port)
                .credentials(credentials)
                .build(),
            "starttls" => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp_host)
                .map_err(|e| EmailError::ConfigError(format!("SMTP starttls error: {}", e)))?
                .port(smtp_port)
                .credentials(credentials)
                .build(),
            "none" => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&smtp_host)
                .port(smtp_port)
                .credentials(credentials)
                .build(),
            _ => {
                return Err(EmailError::ConfigError(format!(
                    "Invalid SMTP_ENCRYPTION value: {}. Use 'tls', 'starttls', or 'none'",
                    encryption
                )))
            }
        };

        Ok(Self {
            mailer,
            from_email,
            from_name,
            frontend_url: frontend_url.to_string(),
        })
    }

    async fn deliver(&self, to_email: &str, rendered: RenderedEmail) -> Result<(), EmailError> {
        let email = Message::builder()
            .from(
                format!("{} <{}>", self.from_name, self.from_email)
                    .parse()
                    .map_err(|e| {
                        EmailError::MessageBuild(format!("Invalid from address: {}", e))
                    })?,
            )
            .to(to_email
                .parse()
                .map_err(|e| EmailError::MessageBuild(format!("Invalid to address: {}", e)))?)
            .subject(rendered.subject)
            .header(ContentType::TEXT_HTML)
            .body(rendered.html)
            .map_err(|e| EmailError::MessageBuild(e.to_string()))?;

        self.mailer
            .send(email)
            .await
            .map_err(|e| EmailError::SendFailed(e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl EmailService for SmtpEmailService {
    async fn send_welcome_email(&self, to_email: &str, name: &str) -> Result<(), EmailError> {
        self.deliver(to_email, render_welcome(name, &self.frontend_url))
            .await
    }

    async fn send_password_reset_email(&self, email: PasswordResetEmail) -> Result<(), EmailError> {
        let rendered = render_password_reset(&email, &self.frontend_url);
        self.deliver(&email.to_email, rendered).await
    }
}

/// Sends through Brevo's transactional email API.
pub struct BrevoEmailService {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    from_email: String,
    from_name: String,
    frontend_url: String,
}

impl BrevoEmailService {
    pub fn new(api_key: &str, frontend_url: &str) -> Result<Self, EmailError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| EmailError::ConfigError(e.to_string()))?;

        Ok(Self {
            client,
            api_url: BREVO_API_URL.to_string(),
            api_key: api_key.to_string(),
            from_email: env::var("EMAIL_FROM").unwrap_or_else(|_| DEFAULT_FROM_EMAIL.to_string()),
            from_name: env::var("EMAIL_FROM_NAME")
                .unwrap_or_else(|_| DEFAULT_FROM_NAME.to_string()),
            frontend_url: frontend_url.to_string(),
        })
    }

    pub fn with_api_url(mut self, api_url: &str) -> Self {
        self.api_url = api_url.trim_end_matches('/').to_string();
        self
    }

    async fn deliver(
        &self,
        to_email: &str,
        to_name: &str,
        rendered: RenderedEmail,
    ) -> Result<(), EmailError> {
        let body = json!({
            "sender": { "name": self.from_name, "email": self.from_email },
            "to": [{ "email": to_email, "name": to_name }],
            "subject": rendered.subject,
            "htmlContent": rendered.html,
        });

        let response = self
            .client
            .post(format!("{}/v3/smtp/email", self.api_url))
            .header("accept", "application/json")
            .header("api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| EmailError::SendFailed(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(EmailError::SendFailed(format!("{}: {}", status, text)));
        }

        Ok(())
    }
}

#[async_trait]
impl EmailService for BrevoEmailService {
    async fn send_welcome_email(&self, to_email: &str, name: &str) -> Result<(), EmailError> {
        self.deliver(to_email, name, render_welcome(name, &self.frontend_url))
            .await
    }

    async fn send_password_reset_email(&self, email: PasswordResetEmail) -> Result<(), EmailError> {
        let rendered = render_password_reset(&email, &self.frontend_url);
        self.deliver(&email.to_email, &email.name, rendered).await
    }
}

pub fn create_email_service(frontend_url: &str) -> Box<dyn EmailService> {
    if let Ok(api_key) = env::var("BREVO_API_KEY") {
        match BrevoEmailService::new(&api_key, frontend_url) {
            Ok(service) => {
                tracing::info!("Using Brevo email service");
                return Box::new(service);
            }
            Err(e) => tracing::warn!("Failed to initialize Brevo email service: {}", e),
        }
    }

    if env::var("SMTP_HOST").is_ok() {
        match SmtpEmailService::new(frontend_url) {
            Ok(service) => {
                tracing::info!("Using SMTP email service");
                return Box::new(service);
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to initialize SMTP email service: {}. Falling back to mock service",
                    e
                );
            }
        }
    } else {
        tracing::info!(
            "Email delivery not configured. Using mock email service (emails will be logged to console)"
        );
    }

    Box::new(MockEmailService::new(frontend_url))
}
