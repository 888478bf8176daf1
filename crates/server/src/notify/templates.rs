//! Message templates. Every interpolated value is HTML-escaped.

use taskflow_api::Priority;

use super::OutboundMessage;

const STYLE: &str = "body { font-family: Arial, sans-serif; line-height: 1.6; color: #333; } \
.container { max-width: 600px; margin: 0 auto; padding: 20px; } \
.content { padding: 20px; background: #f9f9f9; } \
.button { display: inline-block; color: white; padding: 12px 30px; text-decoration: none; border-radius: 5px; margin: 20px 0; } \
.footer { text-align: center; padding: 20px; color: #666; font-size: 12px; }";

pub fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

fn page(title: &str, header_color: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{title}</title>\n\
<style>{STYLE} .header {{ background: {header_color}; color: white; padding: 20px; text-align: center; }}</style>\n\
</head>\n<body>\n<div class=\"container\">\n{body}\n</div>\n</body>\n</html>\n",
        title = escape_html(title),
    )
}

/// `YYYY-MM-DD` part of a stored timestamp.
fn day_of(ts: &str) -> &str {
    ts.get(..10).unwrap_or(ts)
}

/// Data for a task reminder addressed to one stakeholder.
pub struct ReminderContext<'a> {
    pub recipient_name: &'a str,
    pub sender_name: &'a str,
    pub task_title: &'a str,
    pub task_description: Option<&'a str>,
    pub due_date: Option<&'a str>,
    pub priority: Priority,
    pub message: &'a str,
}

pub fn task_reminder(ctx: &ReminderContext<'_>) -> OutboundMessage {
    let priority_color = match ctx.priority {
        Priority::Urgent | Priority::High => "#E74C3C",
        Priority::Medium => "#F39C12",
        Priority::Low => "#27AE60",
    };
    let mut details = format!("<h3>{}</h3>\n", escape_html(ctx.task_title));
    if let Some(description) = ctx.task_description.filter(|d| !d.is_empty()) {
        details.push_str(&format!(
            "<p><strong>Description:</strong> {}</p>\n",
            escape_html(description)
        ));
    }
    if let Some(due) = ctx.due_date {
        details.push_str(&format!(
            "<p><strong>Due Date:</strong> {}</p>\n",
            escape_html(day_of(due))
        ));
    }
    details.push_str(&format!(
        "<p><strong>Priority:</strong> {}</p>",
        ctx.priority.as_str()
    ));

    let body = format!(
        "<div class=\"header\"><h1>Task Reminder</h1></div>\n\
<div class=\"content\">\n<p>Hello {recipient},</p>\n<p>{message}</p>\n\
<div style=\"background: white; padding: 15px; border-radius: 5px; margin: 15px 0; border-left: 4px solid {priority_color};\">\n{details}\n</div>\n\
<p>Please take the necessary action to complete this task on time.</p>\n\
<p>Best regards,<br>{sender}</p>\n</div>\n\
<div class=\"footer\"><p>This email was sent by TaskFlow Pro on behalf of {sender}</p></div>",
        recipient = escape_html(ctx.recipient_name),
        message = escape_html(ctx.message),
        sender = escape_html(ctx.sender_name),
    );

    let mut text = format!("Reminder: {}\nTask: {}", ctx.message, ctx.task_title);
    if let Some(due) = ctx.due_date {
        text.push_str(&format!("\nDue: {}", day_of(due)));
    }
    text.push_str(&format!("\n- {} via TaskFlow Pro", ctx.sender_name));

    OutboundMessage {
        subject: format!("Reminder: {}", ctx.task_title),
        html: page("Task Reminder", "#2C3E50", &body),
        text,
    }
}

pub fn verification(name: &str, verification_url: &str) -> OutboundMessage {
    let url = escape_html(verification_url);
    let body = format!(
        "<div class=\"header\"><h1>Verify Your Account</h1></div>\n\
<div class=\"content\">\n<p>Hello {name},</p>\n\
<p>Thank you for signing up for TaskFlow Pro! Please verify your account by clicking the button below:</p>\n\
<div style=\"text-align: center;\"><a href=\"{url}\" class=\"button\" style=\"background: #16A085;\">Verify Account</a></div>\n\
<p>If the button doesn't work, you can copy and paste this link into your browser:</p>\n<p>{url}</p>\n\
<p>This verification link will expire in 24 hours.</p>\n</div>",
        name = escape_html(name),
    );
    OutboundMessage {
        subject: "Verify your TaskFlow Pro account".into(),
        html: page("Verify Your Account", "#16A085", &body),
        text: format!("Verify your TaskFlow Pro account: {verification_url}"),
    }
}

pub fn password_reset(reset_url: &str) -> OutboundMessage {
    let url = escape_html(reset_url);
    let body = format!(
        "<div class=\"header\"><h1>Reset Your Password</h1></div>\n\
<div class=\"content\">\n<p>Hello,</p>\n\
<p>You requested to reset your password for TaskFlow Pro. Click the button below to reset it:</p>\n\
<div style=\"text-align: center;\"><a href=\"{url}\" class=\"button\" style=\"background: #E67E22;\">Reset Password</a></div>\n\
<p>If you didn't request this password reset, please ignore this email.</p>\n\
<p>This reset link will expire in 24 hours.</p>\n</div>"
    );
    OutboundMessage {
        subject: "Reset your TaskFlow Pro password".into(),
        html: page("Reset Your Password", "#E67E22", &body),
        text: format!("Reset your TaskFlow Pro password: {reset_url}"),
    }
}

/// Generic notification.
pub fn notification(message: &str) -> OutboundMessage {
    let body = format!(
        "<h2>TaskFlow Pro Notification</h2>\n<p>{}</p>",
        escape_html(message)
    );
    OutboundMessage {
        subject: "TaskFlow Pro Notification".into(),
        html: page("TaskFlow Pro Notification", "#2C3E50", &body),
        text: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_markup() {
        assert_eq!(
            escape_html(r#"<b>"Tom" & 'Jerry'</b>"#),
            "&lt;b&gt;&quot;Tom&quot; &amp; &#39;Jerry&#39;&lt;/b&gt;"
        );
    }

    #[test]
    fn task_reminder_escapes_user_content() {
        let msg = task_reminder(&ReminderContext {
            recipient_name: "Bob <script>",
            sender_name: "Ada",
            task_title: "Ship <v2>",
            task_description: Some("a & b"),
            due_date: Some("2025-03-10T17:00:00Z"),
            priority: Priority::High,
            message: "Task is due soon",
        });
        assert_eq!(msg.subject, "Reminder: Ship <v2>");
        assert!(msg.html.contains("Hello Bob &lt;script&gt;"));
        assert!(msg.html.contains("<h3>Ship &lt;v2&gt;</h3>"));
        assert!(msg.html.contains("a &amp; b"));
        assert!(msg.html.contains("2025-03-10"));
        assert!(!msg.html.contains("<script>"));
        assert!(msg.text.contains("Due: 2025-03-10"));
    }

    #[test]
    fn reminder_without_description_omits_the_line() {
        let msg = task_reminder(&ReminderContext {
            recipient_name: "Bob",
            sender_name: "Ada",
            task_title: "Call",
            task_description: None,
            due_date: None,
            priority: Priority::Low,
            message: "ping",
        });
        assert!(!msg.html.contains("Description:"));
        assert!(!msg.html.contains("Due Date:"));
        assert!(!msg.text.contains("Due:"));
    }

    #[test]
    fn links_are_embedded_escaped() {
        let msg = verification("Ada", "https://app.example.com/verify?token=a&b");
        assert!(msg.html.contains("href=\"https://app.example.com/verify?token=a&amp;b\""));
        let msg = password_reset("https://app.example.com/reset?token=t");
        assert!(msg.html.contains("https://app.example.com/reset?token=t"));
    }
}
