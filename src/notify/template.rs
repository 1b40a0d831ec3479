use std::sync::LazyLock;

use regex::Regex;

use super::Notification;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*\.?(\w+)\s*\}\}").expect("placeholder regex is valid")
});

/// Fill `{{project}}`, `{{user}}` and `{{env}}` in a message template.
/// Names are case-insensitive and may carry a leading dot (`{{.Project}}`).
/// Unknown placeholders are left untouched.
pub fn render(template: &str, notification: &Notification) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &regex::Captures<'_>| {
            match caps[1].to_ascii_lowercase().as_str() {
                "project" => notification.project.clone(),
                "user" => notification.user.clone(),
                "env" => notification.env.clone().unwrap_or_default(),
                _ => caps[0].to_string(),
            }
        })
        .into_owned()
}
