//! Message template rendering.
//!
//! Templates contain `{field_name}` placeholders resolved against a
//! recipient's fields. A placeholder with no matching field renders as the
//! empty string; rendering never fails, so a bad template degrades a
//! message instead of aborting a campaign.

use smsflow_core::Recipient;

/// Render `template` for one recipient. Pure and deterministic: identical
/// inputs always yield the identical body.
pub fn render(template: &str, recipient: &Recipient) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after_open = &rest[open + 1..];
        match after_open.find('}') {
            Some(close) => {
                let key = &after_open[..close];
                out.push_str(recipient.field(key).unwrap_or(""));
                rest = &after_open[close + 1..];
            }
            None => {
                // Unterminated brace: emit the tail verbatim.
                out.push_str(&rest[open..]);
                return out;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_known_fields() {
        let r = Recipient::new("+15550001111").with_field("name", "Ana");
        assert_eq!(render("Hi {name}!", &r), "Hi Ana!");
    }

    #[test]
    fn missing_field_renders_empty() {
        let r = Recipient::new("+15550001111");
        assert_eq!(render("Hi {name}!", &r), "Hi !");
    }

    #[test]
    fn phone_number_is_addressable() {
        let r = Recipient::new("+15550001111");
        assert_eq!(render("Sent to {phone_number}", &r), "Sent to +15550001111");
    }

    #[test]
    fn multiple_and_repeated_placeholders() {
        let r = Recipient::new("+15550001111")
            .with_field("name", "Ana")
            .with_field("code", "X9");
        assert_eq!(
            render("{name}, your code {code} ({name})", &r),
            "Ana, your code X9 (Ana)"
        );
    }

    #[test]
    fn unterminated_brace_is_verbatim() {
        let r = Recipient::new("+15550001111").with_field("name", "Ana");
        assert_eq!(render("Hi {name", &r), "Hi {name");
        assert_eq!(render("Hi {name}, bye {", &r), "Hi Ana, bye {");
    }

    #[test]
    fn no_placeholders_is_identity() {
        let r = Recipient::new("+15550001111");
        assert_eq!(render("plain text", &r), "plain text");
        assert_eq!(render("", &r), "");
    }

    #[test]
    fn rendering_is_deterministic() {
        let r = Recipient::new("+15550001111").with_field("name", "Ana");
        let t = "Hi {name}, {missing}!";
        assert_eq!(render(t, &r), render(t, &r));
    }
}
