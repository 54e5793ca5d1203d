//! Email rendering and SMTP delivery.

use futures_util::future::BoxFuture;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use pipeline_core::ports::{EmailMessage, EmailTransport};
use pipeline_core::{Notification, NotificationKind, PortError, PortResult, UserContact};

use crate::config::SmtpConfig;
use crate::error::EmailError;

/// Content of a transactional email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailTemplate {
    pub title: String,
    pub body: String,
    /// Call-to-action `(label, url)`.
    pub action: Option<(String, String)>,
    /// Key facts rendered as a bullet list.
    pub facts: Vec<(String, String)>,
}

impl EmailTemplate {
    /// Template for an emailable notification.
    pub fn for_notification(notification: &Notification) -> Self {
        let mut template = Self {
            title: notification.title.clone(),
            body: notification.message.clone(),
            action: None,
            facts: Vec::new(),
        };

        if let Some(project) = notification.data_str("project_name") {
            template.facts.push(("Project".into(), project.into()));
        }

        match notification.kind {
            NotificationKind::BudgetGenerated => {
                if let Some(budget_id) = notification.data_str("budget_id") {
                    template.facts.push(("Budget".into(), budget_id.into()));
                }
                if let Some(link) = notification.data_str("link") {
                    template.action = Some(("View budget".into(), link.into()));
                }
            }
            NotificationKind::BudgetFailed => {
                if let Some(briefing_id) = notification.data_str("briefing_id") {
                    template.facts.push(("Briefing".into(), briefing_id.into()));
                }
                if let Some(error) = notification.data_str("error") {
                    template.facts.push(("Reason".into(), error.into()));
                }
            }
            NotificationKind::BudgetProcessing | NotificationKind::Generic => {}
        }

        template
    }

    /// Render the HTML body, greeting `recipient`.
    pub fn render_html(&self, recipient: &str) -> String {
        let mut html = String::with_capacity(512);
        html.push_str("<!DOCTYPE html><html><body style=\"font-family:sans-serif\">");
        html.push_str(&format!("<h2>{}</h2>", escape_html(&self.title)));
        html.push_str(&format!("<p>Hello {},</p>", escape_html(recipient)));
        html.push_str(&format!("<p>{}</p>", escape_html(&self.body)));

        if !self.facts.is_empty() {
            html.push_str("<ul>");
            for (label, value) in &self.facts {
                html.push_str(&format!(
                    "<li><strong>{}:</strong> {}</li>",
                    escape_html(label),
                    escape_html(value)
                ));
            }
            html.push_str("</ul>");
        }

        if let Some((label, url)) = &self.action {
            html.push_str(&format!(
                "<p><a href=\"{}\">{}</a></p>",
                escape_html(url),
                escape_html(label)
            ));
        }

        html.push_str("</body></html>");
        html
    }
}

/// Build the email for a notification addressed to `user`.
///
/// `None` when the user has no address.
pub fn render_email(notification: &Notification, user: &UserContact) -> Option<EmailMessage> {
    let to = user.email.as_ref()?.clone();
    let template = EmailTemplate::for_notification(notification);
    Some(EmailMessage {
        to,
        subject: template.title.clone(),
        html: template.render_html(&user.name),
    })
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// SMTP implementation of [`EmailTransport`].
#[derive(Clone)]
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig) -> Result<Self, EmailError> {
        let builder = if config.secure {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        };

        let builder = match (&config.username, &config.password) {
            (Some(user), Some(pass)) => builder.credentials(Credentials::new(user.clone(), pass.clone())),
            _ => builder,
        };

        tracing::info!(host = %config.host, port = config.port, secure = config.secure, "SMTP transport configured");

        Ok(Self {
            transport: builder.port(config.port).build(),
            from: config.from.parse()?,
        })
    }

    async fn deliver(&self, email: EmailMessage) -> Result<(), EmailError> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(email.to.parse()?)
            .subject(email.subject)
            .header(ContentType::TEXT_HTML)
            .body(email.html)?;

        self.transport.send(message).await?;
        Ok(())
    }
}

impl EmailTransport for SmtpMailer {
    fn send(&self, email: EmailMessage) -> BoxFuture<'_, PortResult<()>> {
        Box::pin(async move {
            let to = email.to.clone();
            self.deliver(email).await.map_err(|e| {
                tracing::debug!(to = %to, error = %e, "SMTP delivery failed");
                PortError::failed(e.to_string())
            })
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_methods)]

    use pipeline_core::NewNotification;

    use super::*;

    fn user(email: Option<&str>) -> UserContact {
        UserContact {
            id: "u-1".into(),
            name: "Ana <admin>".into(),
            email: email.map(String::from),
        }
    }

    #[test]
    fn generated_budget_email_links_to_the_budget() {
        let notification = NewNotification::budget_generated(
            "u-1",
            "b-1",
            "budget-7",
            "Casa & Jardim",
            "/budgets/budget-7".into(),
        )
        .into_notification();

        let email = render_email(&notification, &user(Some("ana@example.com"))).unwrap();
        assert_eq!(email.to, "ana@example.com");
        assert_eq!(email.subject, "Budget generated");
        assert!(email.html.contains("<a href=\"/budgets/budget-7\">View budget</a>"));
        assert!(email.html.contains("Casa &amp; Jardim"));
        assert!(email.html.contains("Hello Ana &lt;admin&gt;"));
        assert!(email.html.contains("<li><strong>Budget:</strong> budget-7</li>"));
    }

    #[test]
    fn failed_budget_email_lists_the_reason() {
        let notification =
            NewNotification::budget_failed("u-1", "b-2", "briefing b-2 not found").into_notification();
        let template = EmailTemplate::for_notification(&notification);

        assert!(template.action.is_none());
        assert_eq!(
            template.facts,
            vec![
                ("Briefing".to_string(), "b-2".to_string()),
                ("Reason".to_string(), "briefing b-2 not found".to_string()),
            ]
        );
    }

    #[test]
    fn no_address_no_email() {
        let notification = NewNotification::budget_failed("u-1", "b-2", "boom").into_notification();
        assert!(render_email(&notification, &user(None)).is_none());
    }

    #[tokio::test]
    async fn mailer_builds_from_config() {
        let config = SmtpConfig {
            host: "localhost".into(),
            port: 2525,
            secure: false,
            username: None,
            password: None,
            from: "Budgets <budgets@example.com>".into(),
        };
        assert!(SmtpMailer::new(&config).is_ok());

        let bad_from = SmtpConfig {
            from: "not an address".into(),
            ..config
        };
        assert!(matches!(SmtpMailer::new(&bad_from), Err(EmailError::Address(_))));
    }
}
