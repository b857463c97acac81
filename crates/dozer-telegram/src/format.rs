//! Rendering of command output into Telegram HTML.
//!
//! Commands write a small markdown dialect: fenced code blocks, `inline code`
//! and `**bold**`. Everything else is escaped verbatim.

use dozer_core::gateway::types::Page;

/// Escape HTML special characters for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Code spans pulled out of the text before escaping, restored afterwards.
struct Stash {
    tag: &'static str,
    spans: Vec<String>,
}

impl Stash {
    fn new(tag: &'static str) -> Self {
        Self {
            tag,
            spans: Vec::new(),
        }
    }

    fn placeholder(&self, idx: usize) -> String {
        format!("\0{}{idx}\0", self.tag)
    }

    /// Replace every `fence ... fence` span with a placeholder.
    ///
    /// An unclosed fence leaves the rest of the input untouched.
    fn extract(&mut self, input: &str, fence: &str, skip_language: bool) -> String {
        let mut out = String::with_capacity(input.len());
        let mut i = 0usize;
        while let Some(rel) = input[i..].find(fence) {
            let start = i + rel;
            out.push_str(&input[i..start]);

            let mut body = start + fence.len();
            if skip_language {
                body += input[body..]
                    .bytes()
                    .take_while(|b| b.is_ascii_alphanumeric() || *b == b'_')
                    .count();
                if input[body..].starts_with('\n') {
                    body += 1;
                }
            }

            let Some(end_rel) = input[body..].find(fence) else {
                out.push_str(&input[start..]);
                return out;
            };
            let end = body + end_rel;
            out.push_str(&self.placeholder(self.spans.len()));
            self.spans.push(input[body..end].to_string());
            i = end + fence.len();
        }
        out.push_str(&input[i..]);
        out
    }

    fn restore(&self, mut text: String, open: &str, close: &str) -> String {
        for (idx, span) in self.spans.iter().enumerate() {
            let html = format!("{open}{}{close}", escape_html(span));
            text = text.replace(&self.placeholder(idx), &html);
        }
        text
    }
}

/// Convert the command markdown dialect to Telegram HTML.
pub fn markdown_to_html(input: &str) -> String {
    let mut blocks = Stash::new("BLOCK");
    let mut inline = Stash::new("CODE");
    let text = blocks.extract(input, "```", true);
    let text = inline.extract(&text, "`", false);

    let text = escape_html(&text)
        .split('\n')
        .map(|line| replace_delimited(line, "**", "<b>", "</b>"))
        .collect::<Vec<_>>()
        .join("\n");

    let text = inline.restore(text, "<code>", "</code>");
    blocks.restore(text, "<pre>", "</pre>")
}

fn replace_delimited(text: &str, delim: &str, open: &str, close: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut i = 0usize;
    while let Some(rel) = text[i..].find(delim) {
        let start = i + rel;
        out.push_str(&text[i..start]);
        let content_start = start + delim.len();
        let Some(end_rel) = text[content_start..].find(delim) else {
            out.push_str(&text[start..]);
            return out;
        };
        let end = content_start + end_rel;
        out.push_str(open);
        out.push_str(&text[content_start..end]);
        out.push_str(close);
        i = end + delim.len();
    }
    out.push_str(&text[i..]);
    out
}

/// Render a page as a Telegram message: bold title, description, one block
/// per field and an italic footer.
pub fn render_page(page: &Page) -> String {
    let mut parts = Vec::new();
    if !page.title.is_empty() {
        parts.push(format!("<b>{}</b>", escape_html(&page.title)));
    }
    if !page.description.is_empty() {
        parts.push(markdown_to_html(&page.description));
    }
    for field in &page.fields {
        parts.push(format!(
            "<b>{}</b>\n{}",
            markdown_to_html(&field.name),
            markdown_to_html(&field.value)
        ));
    }
    if let Some(footer) = &page.footer {
        parts.push(format!("<i>{}</i>", escape_html(footer)));
    }
    parts.join("\n\n")
}
