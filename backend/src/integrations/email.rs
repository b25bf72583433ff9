use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use minijinja::{context, Environment};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

const HTML_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
  <head><meta charset="utf-8"><title>{{ subject }}</title></head>
  <body>
{%- for line in lines %}
    <p>{{ line }}</p>
{%- endfor %}
  </body>
</html>
"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
    pub text: String,
}

#[derive(Debug, Clone)]
pub enum EmailError {
    Render(String),
    InvalidAddress(String),
    Transport(String),
    NotConfigured,
}

impl std::fmt::Display for EmailError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmailError::Render(msg) => write!(f, "Email template error: {}", msg),
            EmailError::InvalidAddress(msg) => write!(f, "Invalid email address: {}", msg),
            EmailError::Transport(msg) => write!(f, "Email send failed: {}", msg),
            EmailError::NotConfigured => write!(f, "Email transport not configured"),
        }
    }
}

impl std::error::Error for EmailError {}

/// Turns subject/body templates into a deliverable message
pub trait EmailRenderer: Send + Sync {
    fn render(
        &self,
        subject: &str,
        body: &str,
        context: &Value,
    ) -> Result<RenderedEmail, EmailError>;
}

#[async_trait]
pub trait EmailTransport: Send + Sync {
    /// `to` may hold several comma-separated addresses
    async fn send(&self, to: &str, subject: &str, html: &str, text: &str) -> Result<(), EmailError>;
}

/// Renders subject and body as minijinja templates over the action context.
/// The HTML form is the rendered text, auto-escaped, one paragraph per line.
pub struct TemplateEmailRenderer {
    env: Environment<'static>,
}

impl TemplateEmailRenderer {
    pub fn new() -> Self {
        Self {
            env: Environment::new(),
        }
    }
}

impl Default for TemplateEmailRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl EmailRenderer for TemplateEmailRenderer {
    fn render(
        &self,
        subject: &str,
        body: &str,
        context: &Value,
    ) -> Result<RenderedEmail, EmailError> {
        let render_err = |e: minijinja::Error| EmailError::Render(e.to_string());

        let subject = self.env.render_str(subject, context).map_err(render_err)?;
        let text = self.env.render_str(body, context).map_err(render_err)?;
        let lines: Vec<&str> = text.lines().collect();
        let html = self
            .env
            .template_from_named_str("email.html", HTML_TEMPLATE)
            .and_then(|t| t.render(context! { subject => &subject, lines => lines }))
            .map_err(render_err)?;

        Ok(RenderedEmail { subject, html, text })
    }
}

/// SMTP relay settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
}

pub struct SmtpEmailTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpEmailTransport {
    pub fn new(config: &SmtpConfig, timeout: Duration) -> Result<Self, EmailError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| EmailError::Transport(e.to_string()))?
            .port(config.port)
            .timeout(Some(timeout));

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        let from = config
            .from
            .parse::<Mailbox>()
            .map_err(|e| EmailError::InvalidAddress(format!("{}: {}", config.from, e)))?;

        Ok(Self {
            mailer: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl EmailTransport for SmtpEmailTransport {
    async fn send(
        &self,
        to: &str,
        subject: &str,
        html: &str,
        text: &str,
    ) -> Result<(), EmailError> {
        let mut builder = Message::builder().from(self.from.clone()).subject(subject);
        for address in to.split(',').map(str::trim).filter(|a| !a.is_empty()) {
            let mailbox = address
                .parse::<Mailbox>()
                .map_err(|e| EmailError::InvalidAddress(format!("{}: {}", address, e)))?;
            builder = builder.to(mailbox);
        }

        let message = builder
            .multipart(MultiPart::alternative_plain_html(text.to_string(), html.to_string()))
            .map_err(|e| EmailError::InvalidAddress(e.to_string()))?;

        self.mailer
            .send(message)
            .await
            .map(|_| ())
            .map_err(|e| EmailError::Transport(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_substitutes_context() {
        let renderer = TemplateEmailRenderer::new();
        let ctx = json!({"automationName": "Freezer alarm", "triggerData": {"temp": -2}});
        let email = renderer
            .render(
                "{{ automationName }} fired",
                "Temperature is {{ triggerData.temp }}\nCheck the freezer",
                &ctx,
            )
            .unwrap();
        assert_eq!(email.subject, "Freezer alarm fired");
        assert_eq!(email.text, "Temperature is -2\nCheck the freezer");
        assert!(email.html.contains("<p>Temperature is -2</p>"));
        assert!(email.html.contains("<p>Check the freezer</p>"));
    }

    #[test]
    fn test_html_form_is_escaped() {
        let renderer = TemplateEmailRenderer::new();
        let email = renderer
            .render("Alert", "{{ note }}", &json!({"note": "<b>hot</b> & humid"}))
            .unwrap();
        assert_eq!(email.text, "<b>hot</b> & humid");
        assert!(email.html.contains("&lt;b&gt;hot"));
        assert!(email.html.contains("&amp; humid"));
        assert!(!email.html.contains("<b>"));
    }

    #[test]
    fn test_layout_compiles_with_html_escaping() {
        let env = Environment::new();
        let layout = env.template_from_named_str("email.html", HTML_TEMPLATE).unwrap();
        let html = layout
            .render(context! { subject => "a < b", lines => vec!["x & y"] })
            .unwrap();
        assert!(html.contains("a &lt; b"));
        assert!(html.contains("x &amp; y"));
    }

    #[test]
    fn test_bad_template_is_a_render_error() {
        let renderer = TemplateEmailRenderer::new();
        let result = renderer.render("{% if %}", "body", &json!({}));
        assert!(matches!(result, Err(EmailError::Render(_))));
    }

    #[test]
    fn test_smtp_transport_rejects_bad_sender() {
        let config = SmtpConfig {
            host: "smtp.example.com".to_string(),
            port: 587,
            username: None,
            password: None,
            from: "not an address".to_string(),
        };
        assert!(matches!(
            SmtpEmailTransport::new(&config, Duration::from_secs(5)),
            Err(EmailError::InvalidAddress(_))
        ));
    }
}
