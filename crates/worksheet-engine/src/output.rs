//! Accumulated cell output.
//!
//! Output is an ordered list of `(tag, text)` segments. Appending a fragment
//! whose tag matches the last segment extends that segment instead of adding
//! a new one, so a stream of `Stdout` chunks collapses into a single block.
//!
//! Text is stored raw; HTML escaping happens only when rendering.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub tag: String,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    segments: Vec<Segment>,
}

impl Output {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment, merging into the last segment when the tag matches.
    pub fn append(&mut self, tag: &str, text: &str) {
        match self.segments.last_mut() {
            Some(last) if last.tag == tag => last.text.push_str(text),
            _ => self.segments.push(Segment {
                tag: tag.to_string(),
                text: text.to_string(),
            }),
        }
    }

    pub fn clear(&mut self) {
        self.segments.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// All segment text concatenated, ignoring tags.
    pub fn plain_text(&self) -> String {
        self.segments.iter().map(|s| s.text.as_str()).collect()
    }

    /// Render as `<span class="TAG">escaped text</span>` per segment.
    pub fn to_html(&self) -> String {
        let mut html = String::new();
        for segment in &self.segments {
            html.push_str("<span class=\"");
            html.push_str(&escape_html(&segment.tag));
            html.push_str("\">");
            html.push_str(&escape_html(&segment.text));
            html.push_str("</span>");
        }
        html
    }

    /// Parse output previously rendered by [`Output::to_html`].
    ///
    /// Anything outside a recognised span is kept as untagged `Stdout` so a
    /// hand-edited snapshot never loses text.
    pub fn from_html(html: &str) -> Self {
        const OPEN: &str = "<span class=\"";
        const CLOSE: &str = "</span>";

        let mut output = Output::new();
        let mut rest = html;
        while !rest.is_empty() {
            let Some(start) = rest.find(OPEN) else {
                output.append("Stdout", &unescape_html(rest));
                break;
            };
            if start > 0 {
                output.append("Stdout", &unescape_html(&rest[..start]));
            }
            let after_open = &rest[start + OPEN.len()..];
            let Some(tag_end) = after_open.find("\">") else {
                output.append("Stdout", &unescape_html(&rest[start..]));
                break;
            };
            let tag = unescape_html(&after_open[..tag_end]);
            let body = &after_open[tag_end + 2..];
            let (text, remainder) = match body.find(CLOSE) {
                Some(end) => (&body[..end], &body[end + CLOSE.len()..]),
                None => (body, ""),
            };
            // Push as a separate segment even when the tag repeats, so the
            // rendered form is reproduced exactly.
            output.segments.push(Segment {
                tag,
                text: unescape_html(text),
            });
            rest = remainder;
        }
        output
    }
}

/// Escape `&`, `<` and `>` for inclusion in HTML.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn unescape_html(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&amp;", "&")
}
