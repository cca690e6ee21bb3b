//! Note export rendering: plain text, Markdown, and JSON snapshot.
//!
//! The same conversion rules are used by the server's export endpoint and by
//! the client-side fallback when the server is unreachable, so both produce
//! identical output for the same record.
//!
//! The Markdown renderer is a structural HTML-to-Markdown conversion covering
//! headings, bold/italic/underline/strikethrough, links, images, inline code,
//! fenced code blocks, block quotes, and ordered/unordered lists. Runs of
//! three or more consecutive blank lines collapse to exactly one blank line.

use serde::{Deserialize, Serialize};

use crate::error::{ScribeError, ScribeResult};
use crate::models::NoteWithTags;

/// Export output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Text,
    Markdown,
    Json,
}

impl ExportFormat {
    pub fn parse(value: &str) -> ScribeResult<Self> {
        match value {
            "text" => Ok(ExportFormat::Text),
            "markdown" => Ok(ExportFormat::Markdown),
            "json" => Ok(ExportFormat::Json),
            other => Err(ScribeError::validation(
                "format",
                format!("unknown export format '{}'", other),
            )),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Text => "text",
            ExportFormat::Markdown => "markdown",
            ExportFormat::Json => "json",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Text => "txt",
            ExportFormat::Markdown => "md",
            ExportFormat::Json => "json",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Text => "text/plain; charset=utf-8",
            ExportFormat::Markdown => "text/markdown; charset=utf-8",
            ExportFormat::Json => "application/json",
        }
    }
}

/// Render a note in the requested format.
pub fn render(view: &NoteWithTags, format: ExportFormat) -> ScribeResult<String> {
    match format {
        ExportFormat::Text => {
            let body = html_to_text(&view.note.content);
            if body.is_empty() {
                Ok(view.note.title.clone())
            } else {
                Ok(format!("{}\n\n{}", view.note.title, body))
            }
        }
        ExportFormat::Markdown => {
            let body = html_to_markdown(&view.note.content);
            let combined = if body.is_empty() {
                format!("# {}", view.note.title)
            } else {
                format!("# {}\n\n{}", view.note.title, body)
            };
            Ok(collapse_blank_lines(&combined))
        }
        ExportFormat::Json => Ok(serde_json::to_string_pretty(view)?),
    }
}

/// Build the attachment filename for a note title: unsafe characters become
/// dashes, runs collapse, and a blank result falls back to "note".
pub fn attachment_filename(title: &str, format: ExportFormat) -> String {
    let stem: String = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect();
    let stem: String = stem
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    let stem = if stem.is_empty() { "note".to_string() } else { stem };
    format!("{}.{}", stem, format.extension())
}

/// Collapse runs of three or more consecutive blank lines to exactly one
/// blank line, and trim outer whitespace.
fn collapse_blank_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut newlines = 0usize;
    for c in text.chars() {
        if c == '\n' {
            newlines += 1;
        } else {
            if newlines > 0 {
                // 4+ newlines means 3+ blank lines; emit a single blank line
                let replacement = if newlines >= 4 { "\n\n".to_string() } else { "\n".repeat(newlines) };
                out.push_str(&replacement);
                newlines = 0;
            }
            out.push(c);
        }
    }
    out.trim().to_string()
}

// Minimal HTML document model

#[derive(Debug)]
enum Node {
    Text(String),
    Element {
        name: String,
        attrs: Vec<(String, String)>,
        children: Vec<Node>,
    },
}

fn is_void_tag(name: &str) -> bool {
    matches!(name, "br" | "img" | "hr" | "input" | "meta")
}

fn attr<'a>(attrs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    attrs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

/// An element still being parsed: name, attributes, children so far.
type OpenElement = (String, Vec<(String, String)>, Vec<Node>);

fn push_node(stack: &mut [OpenElement], top: &mut Vec<Node>, node: Node) {
    match stack.last_mut() {
        Some((_, _, children)) => children.push(node),
        None => top.push(node),
    }
}

/// Tolerant HTML parser: builds a node tree, auto-closing void tags and
/// anything left open at end of input. Unknown tags still nest normally.
fn parse_html(input: &str) -> Vec<Node> {
    let mut stack: Vec<OpenElement> = Vec::new();
    let mut top: Vec<Node> = Vec::new();
    let mut i = 0;

    while i < input.len() {
        if !input[i..].starts_with('<') {
            // Text run up to the next tag
            let end = input[i..].find('<').map(|p| i + p).unwrap_or(input.len());
            push_node(
                &mut stack,
                &mut top,
                Node::Text(decode_entities(&input[i..end])),
            );
            i = end;
            continue;
        }

        let rest = &input[i..];
        let close_rel = match rest.find('>') {
            Some(p) => p,
            None => break, // truncated tag, drop the remainder
        };
        let inner = &rest[1..close_rel];
        i += close_rel + 1;

        if inner.starts_with('!') || inner.starts_with('?') {
            continue; // comment or doctype
        }

        if let Some(name) = inner.strip_prefix('/') {
            let name = name.trim().to_lowercase();
            // Close the nearest matching open element; ignore stray closers
            if let Some(pos) = stack.iter().rposition(|(n, _, _)| *n == name) {
                while stack.len() > pos {
                    let Some((n, attrs, children)) = stack.pop() else { break };
                    push_node(
                        &mut stack,
                        &mut top,
                        Node::Element { name: n, attrs, children },
                    );
                }
            }
            continue;
        }

        let self_closing = inner.ends_with('/');
        let inner = inner.trim_end_matches('/');
        let mut parts = inner.splitn(2, char::is_whitespace);
        let name = parts.next().unwrap_or("").trim().to_lowercase();
        if name.is_empty() {
            continue;
        }
        let attrs = parts.next().map(parse_attrs).unwrap_or_default();

        if self_closing || is_void_tag(&name) {
            push_node(
                &mut stack,
                &mut top,
                Node::Element { name, attrs, children: Vec::new() },
            );
        } else {
            stack.push((name, attrs, Vec::new()));
        }
    }

    // Close anything left open
    while let Some((n, attrs, children)) = stack.pop() {
        let node = Node::Element { name: n, attrs, children };
        match stack.last_mut() {
            Some((_, _, parent)) => parent.push(node),
            None => top.push(node),
        }
    }

    top
}

fn parse_attrs(input: &str) -> Vec<(String, String)> {
    let mut attrs = Vec::new();
    let mut rest = input.trim();

    while !rest.is_empty() {
        let eq = match rest.find('=') {
            Some(p) => p,
            None => break,
        };
        let key = rest[..eq].trim().to_lowercase();
        rest = rest[eq + 1..].trim_start();

        let value = if let Some(stripped) = rest.strip_prefix('"') {
            let end = stripped.find('"').unwrap_or(stripped.len());
            let v = &stripped[..end];
            rest = stripped.get(end + 1..).unwrap_or("");
            v.to_string()
        } else if let Some(stripped) = rest.strip_prefix('\'') {
            let end = stripped.find('\'').unwrap_or(stripped.len());
            let v = &stripped[..end];
            rest = stripped.get(end + 1..).unwrap_or("");
            v.to_string()
        } else {
            let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
            let v = &rest[..end];
            rest = &rest[end..];
            v.to_string()
        };

        if !key.is_empty() {
            attrs.push((key, decode_entities(&value)));
        }
        rest = rest.trim_start();
    }

    attrs
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

// Markdown rendering

struct MarkdownRenderer {
    out: String,
}

impl MarkdownRenderer {
    fn render(nodes: &[Node]) -> String {
        let mut r = Self { out: String::new() };
        r.blocks(nodes, 0);
        r.out.trim().to_string()
    }

    fn blocks(&mut self, nodes: &[Node], list_depth: usize) {
        for node in nodes {
            match node {
                Node::Text(text) => {
                    let text = normalize_space(text);
                    if !text.trim().is_empty() {
                        self.out.push_str(text.trim());
                        self.block_sep();
                    }
                }
                Node::Element { name, children, .. } => {
                    self.block_element(name, children, list_depth)
                }
            }
        }
    }

    fn block_element(&mut self, name: &str, children: &[Node], list_depth: usize) {
        match name {
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                let level = name[1..].parse::<usize>().unwrap_or(1);
                self.out.push_str(&"#".repeat(level));
                self.out.push(' ');
                self.out.push_str(inline(children).trim());
                self.block_sep();
            }
            "p" | "div" => {
                let text = inline(children);
                if !text.trim().is_empty() {
                    self.out.push_str(text.trim());
                }
                self.block_sep();
            }
            "pre" => {
                let code = raw_text(children);
                self.out.push_str("```\n");
                self.out.push_str(code.trim_matches('\n'));
                self.out.push_str("\n```");
                self.block_sep();
            }
            "blockquote" => {
                let body = MarkdownRenderer::render(children);
                for line in body.lines() {
                    if line.is_empty() {
                        self.out.push_str(">\n");
                    } else {
                        self.out.push_str("> ");
                        self.out.push_str(line);
                        self.out.push('\n');
                    }
                }
                self.out.push('\n');
            }
            "ul" => {
                self.list(children, list_depth, None);
                if list_depth == 0 {
                    self.out.push('\n');
                }
            }
            "ol" => {
                self.list(children, list_depth, Some(1));
                if list_depth == 0 {
                    self.out.push('\n');
                }
            }
            "br" => self.out.push('\n'),
            _ => {
                // Unknown block-ish wrapper: render its contents in place
                let text = inline(children);
                if !text.trim().is_empty() {
                    self.out.push_str(text.trim());
                    self.block_sep();
                }
            }
        }
    }

    fn list(&mut self, items: &[Node], depth: usize, mut counter: Option<usize>) {
        for item in items {
            let Node::Element { name, children, .. } = item else { continue };
            if name != "li" {
                continue;
            }

            let indent = "  ".repeat(depth);
            let marker = match counter {
                Some(n) => {
                    counter = Some(n + 1);
                    format!("{}. ", n)
                }
                None => "- ".to_string(),
            };

            // Inline content first, nested lists after
            let (nested, inline_children): (Vec<&Node>, Vec<&Node>) =
                children.iter().partition(|c| {
                    matches!(c, Node::Element { name, .. } if name == "ul" || name == "ol")
                });

            let text = inline_refs(&inline_children);
            self.out.push_str(&indent);
            self.out.push_str(&marker);
            self.out.push_str(text.trim());
            self.out.push('\n');

            for sub in nested {
                if let Node::Element { name, children, .. } = sub {
                    let sub_counter = if name == "ol" { Some(1) } else { None };
                    self.list(children, depth + 1, sub_counter);
                }
            }
        }
    }

    fn block_sep(&mut self) {
        self.out.push_str("\n\n");
    }
}

/// Render inline content: marks, links, images, inline code.
fn inline(nodes: &[Node]) -> String {
    let refs: Vec<&Node> = nodes.iter().collect();
    inline_refs(&refs)
}

fn inline_refs(nodes: &[&Node]) -> String {
    let mut out = String::new();
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(&normalize_space(text)),
            Node::Element { name, attrs, children } => match name.as_str() {
                "strong" | "b" => {
                    out.push_str("**");
                    out.push_str(inline(children).trim());
                    out.push_str("**");
                }
                "em" | "i" => {
                    out.push('*');
                    out.push_str(inline(children).trim());
                    out.push('*');
                }
                "u" => {
                    out.push('_');
                    out.push_str(inline(children).trim());
                    out.push('_');
                }
                "s" | "del" | "strike" => {
                    out.push_str("~~");
                    out.push_str(inline(children).trim());
                    out.push_str("~~");
                }
                "code" => {
                    out.push('`');
                    out.push_str(&raw_text(children));
                    out.push('`');
                }
                "a" => {
                    let href = attr(attrs, "href").unwrap_or("");
                    out.push('[');
                    out.push_str(inline(children).trim());
                    out.push_str("](");
                    out.push_str(href);
                    out.push(')');
                }
                "img" => {
                    let src = attr(attrs, "src").unwrap_or("");
                    let alt = attr(attrs, "alt").unwrap_or("");
                    out.push_str("![");
                    out.push_str(alt);
                    out.push_str("](");
                    out.push_str(src);
                    out.push(')');
                }
                "br" => out.push('\n'),
                _ => out.push_str(&inline(children)),
            },
        }
    }
    out
}

/// Text content with no marks and no whitespace normalization (for code).
fn raw_text(nodes: &[Node]) -> String {
    let mut out = String::new();
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Element { children, .. } => out.push_str(&raw_text(children)),
        }
    }
    out
}

fn normalize_space(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_space = false;
    for c in text.chars() {
        if c.is_whitespace() {
            if !last_space {
                out.push(' ');
            }
            last_space = true;
        } else {
            out.push(c);
            last_space = false;
        }
    }
    out
}

/// Structural HTML to Markdown conversion.
pub fn html_to_markdown(html: &str) -> String {
    let nodes = parse_html(html);
    MarkdownRenderer::render(&nodes)
}

/// Strip markup entirely, keeping block boundaries as newlines.
pub fn html_to_text(html: &str) -> String {
    let nodes = parse_html(html);
    let mut blocks = Vec::new();
    collect_text_blocks(&nodes, &mut blocks);
    blocks.join("\n").trim().to_string()
}

fn collect_text_blocks(nodes: &[Node], blocks: &mut Vec<String>) {
    for node in nodes {
        match node {
            Node::Text(text) => {
                let text = normalize_space(text);
                if !text.trim().is_empty() {
                    blocks.push(text.trim().to_string());
                }
            }
            Node::Element { name, children, .. } => match name.as_str() {
                "p" | "div" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "li" | "blockquote"
                | "pre" => {
                    let mut inner = Vec::new();
                    collect_text_blocks(children, &mut inner);
                    if !inner.is_empty() {
                        blocks.push(inner.join(" "));
                    }
                }
                _ => collect_text_blocks(children, blocks),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Note, NoteDraft, NoteWithTags};

    fn view(title: &str, content: &str) -> NoteWithTags {
        NoteWithTags::new(
            Note::from_draft(
                1,
                &NoteDraft {
                    title: Some(title.to_string()),
                    content: Some(content.to_string()),
                    ..Default::default()
                },
            ),
            vec![],
        )
    }

    #[test]
    fn test_markdown_scenario_paragraph_with_title_heading() {
        let rendered = render(&view("Trip", "<p>Pack bags</p>"), ExportFormat::Markdown).unwrap();
        assert_eq!(rendered, "# Trip\n\nPack bags");
    }

    #[test]
    fn test_markdown_headings() {
        assert_eq!(html_to_markdown("<h2>Agenda</h2>"), "## Agenda");
        assert_eq!(html_to_markdown("<h6>Fine print</h6>"), "###### Fine print");
    }

    #[test]
    fn test_markdown_inline_marks() {
        assert_eq!(
            html_to_markdown("<p><strong>bold</strong> and <em>italic</em></p>"),
            "**bold** and *italic*"
        );
        assert_eq!(
            html_to_markdown("<p><u>under</u> <s>gone</s></p>"),
            "_under_ ~~gone~~"
        );
    }

    #[test]
    fn test_markdown_links_and_images() {
        assert_eq!(
            html_to_markdown(r#"<p><a href="https://example.com">site</a></p>"#),
            "[site](https://example.com)"
        );
        assert_eq!(
            html_to_markdown(r#"<p><img src="cat.png" alt="a cat"/></p>"#),
            "![a cat](cat.png)"
        );
    }

    #[test]
    fn test_markdown_code() {
        assert_eq!(html_to_markdown("<p>run <code>ls -la</code></p>"), "run `ls -la`");
        assert_eq!(
            html_to_markdown("<pre><code>let x = 1;\nlet y = 2;</code></pre>"),
            "```\nlet x = 1;\nlet y = 2;\n```"
        );
    }

    #[test]
    fn test_markdown_blockquote() {
        assert_eq!(
            html_to_markdown("<blockquote><p>quoted</p></blockquote>"),
            "> quoted"
        );
    }

    #[test]
    fn test_markdown_lists() {
        assert_eq!(
            html_to_markdown("<ul><li>one</li><li>two</li></ul>"),
            "- one\n- two"
        );
        assert_eq!(
            html_to_markdown("<ol><li>first</li><li>second</li></ol>"),
            "1. first\n2. second"
        );
    }

    #[test]
    fn test_markdown_nested_list() {
        let html = "<ul><li>outer<ul><li>inner</li></ul></li></ul>";
        assert_eq!(html_to_markdown(html), "- outer\n  - inner");
    }

    #[test]
    fn test_markdown_entity_decoding() {
        assert_eq!(html_to_markdown("<p>a &amp; b &lt;c&gt;</p>"), "a & b <c>");
    }

    #[test]
    fn test_collapse_three_plus_blank_lines() {
        let text = "a\n\n\n\n\nb";
        assert_eq!(collapse_blank_lines(text), "a\n\nb");
        // two newlines (one blank line) is left alone
        assert_eq!(collapse_blank_lines("a\n\nb"), "a\n\nb");
    }

    #[test]
    fn test_text_export_strips_markup() {
        let rendered = render(
            &view("Trip", "<p>Pack <strong>bags</strong></p><p>Check passport</p>"),
            ExportFormat::Text,
        )
        .unwrap();
        assert_eq!(rendered, "Trip\n\nPack bags\nCheck passport");
    }

    #[test]
    fn test_json_export_is_full_snapshot() {
        let rendered = render(&view("Trip", "<p>x</p>"), ExportFormat::Json).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&rendered).unwrap();
        assert_eq!(parsed["title"], "Trip");
        assert_eq!(parsed["content"], "<p>x</p>");
        assert!(parsed["tags"].is_array());
    }

    #[test]
    fn test_attachment_filename_sanitized() {
        assert_eq!(
            attachment_filename("Trip Plans!", ExportFormat::Markdown),
            "trip-plans.md"
        );
        assert_eq!(attachment_filename("  //  ", ExportFormat::Text), "note.txt");
        assert_eq!(
            attachment_filename("Meeting: 2024/05", ExportFormat::Json),
            "meeting-2024-05.json"
        );
    }

    #[test]
    fn test_unclosed_tags_do_not_crash() {
        assert_eq!(html_to_markdown("<p>open <strong>bold"), "open **bold**");
    }

    #[test]
    fn test_format_parse() {
        assert_eq!(ExportFormat::parse("markdown").unwrap(), ExportFormat::Markdown);
        assert!(ExportFormat::parse("docx").is_err());
    }
}
