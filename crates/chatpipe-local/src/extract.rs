use chatpipe_core::FetchResponse;

/// Characters of page text kept per research result.
pub const MAX_PAGE_TEXT_CHARS: usize = 2_000;

// Elements whose text is never rendered.
const HIDDEN_ELEMENTS: &[&str] = &["script", "style", "noscript", "template"];

pub fn norm_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

/// Visible text of an HTML document: script/style contents dropped, tags removed,
/// whitespace collapsed to single spaces.
pub fn visible_text(html: &str) -> String {
    let doc = html_scraper::Html::parse_document(html);
    let mut out = String::new();
    for node in doc.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| HIDDEN_ELEMENTS.contains(&e.name()))
        });
        if hidden {
            continue;
        }
        // Tags separate words even when the markup has no whitespace between them.
        out.push(' ');
        out.push_str(text);
    }
    norm_ws(&out)
}

fn is_html(content_type: Option<&str>, body: &str) -> bool {
    match content_type {
        Some(ct) => {
            let ct = ct.to_ascii_lowercase();
            ct.contains("html") || ct.contains("xml")
        }
        None => body.trim_start().starts_with('<'),
    }
}

/// Bounded readable text for a fetched page.
pub fn page_text(resp: &FetchResponse, max_chars: usize) -> String {
    let body = resp.text_lossy();
    let text = if is_html(resp.content_type.as_deref(), &body) {
        visible_text(&body)
    } else {
        norm_ws(&body)
    };
    truncate_chars(&text, max_chars)
}
