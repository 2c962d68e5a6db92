use crate::gmail::EmailMessage;

/// Substitute `{placeholder}` tokens with fields from the message.
///
/// Supported placeholders: `{subject}`, `{sender}`, `{date}`, `{id}`,
/// `{body}`. Unknown tokens pass through untouched so a typo in the config
/// shows up in the note instead of erroring the whole cycle.
pub fn render(template: &str, email: &EmailMessage) -> String {
    template
        .replace("{subject}", &email.subject)
        .replace("{sender}", &email.sender)
        .replace("{date}", &email.date)
        .replace("{id}", &email.id)
        .replace("{body}", &email.body)
}
