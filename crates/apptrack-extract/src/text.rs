use apptrack_storage::MailMessage;
use scraper::{Html, Node};

static_regex!(re_space_runs, r"\s{2,}");

/// Plain body when it has content, otherwise the sanitized HTML body.
pub fn message_text(message: &MailMessage) -> String {
    match message.plain_body.as_deref() {
        Some(plain) if !plain.trim().is_empty() => plain.to_string(),
        _ => message
            .html_body
            .as_deref()
            .map(sanitize_html)
            .unwrap_or_default(),
    }
}

/// Visible text of an HTML document with `<style>` and `<script>` content dropped.
pub fn sanitize_html(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut chunks: Vec<&str> = Vec::new();
    for node in document.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            matches!(ancestor.value(), Node::Element(el) if matches!(el.name(), "style" | "script"))
        });
        if !hidden {
            chunks.push(text);
        }
    }
    let joined = chunks.join(" ").replace('\u{a0}', " ");
    re_space_runs().replace_all(&joined, " ").trim().to_string()
}
