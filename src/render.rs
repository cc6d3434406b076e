use crate::logging::panic_reason;
use crate::prefs::UserPreferences;
use pulldown_cmark::{CowStr, Event, Options, Parser, Tag, TagEnd, html};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use tracing::error;

pub mod preview;

pub const RENDER_ERROR_HTML: &str = "<p class=\"render-error\">Error rendering markdown</p>";

pub fn markdown_options() -> Options {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);
    options.insert(Options::ENABLE_FOOTNOTES);
    options.insert(Options::ENABLE_HEADING_ATTRIBUTES);
    options
}

/// Markdown to an HTML fragment. Raw HTML passes through, single newlines
/// become `<br />`, and headings get slug ids.
pub fn to_html(text: &str) -> String {
    guarded("html", || render_fragment(text)).unwrap_or_else(|| RENDER_ERROR_HTML.to_string())
}

/// Runs a renderer, turning a panic into `None` so the editor keeps going.
pub(crate) fn guarded<T>(what: &'static str, render: impl FnOnce() -> T) -> Option<T> {
    match panic::catch_unwind(AssertUnwindSafe(render)) {
        Ok(out) => Some(out),
        Err(payload) => {
            error!(target: "render", what, reason = panic_reason(&*payload), "renderer_panicked");
            None
        }
    }
}

fn render_fragment(text: &str) -> String {
    let mut events: Vec<Event<'_>> = Parser::new_ext(text, markdown_options()).collect();
    assign_heading_ids(&mut events);

    let events = events.into_iter().map(|event| match event {
        Event::SoftBreak => Event::HardBreak,
        other => other,
    });
    let mut out = String::with_capacity(text.len() * 3 / 2);
    html::push_html(&mut out, events);
    out
}

fn assign_heading_ids(events: &mut [Event<'_>]) {
    let mut seen: HashMap<String, usize> = HashMap::new();
    for idx in 0..events.len() {
        let Event::Start(Tag::Heading { id: None, .. }) = &events[idx] else {
            continue;
        };
        let mut title = String::new();
        for event in &events[idx + 1..] {
            match event {
                Event::End(TagEnd::Heading(_)) => break,
                Event::Text(t) | Event::Code(t) => title.push_str(t),
                _ => {}
            }
        }
        let slug = unique_slug(&slugify(&title), &mut seen);
        if let Event::Start(Tag::Heading { id, .. }) = &mut events[idx] {
            *id = Some(CowStr::from(slug));
        }
    }
}

/// Lowercase, alphanumerics kept, whitespace and hyphens collapsed to `-`.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for ch in title.trim().chars() {
        if ch.is_alphanumeric() || ch == '_' {
            slug.extend(ch.to_lowercase());
        } else if (ch.is_whitespace() || ch == '-') && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "section".to_string()
    } else {
        slug.to_string()
    }
}

fn unique_slug(slug: &str, seen: &mut HashMap<String, usize>) -> String {
    let count = seen.entry(slug.to_string()).or_insert(0);
    let out = if *count == 0 {
        slug.to_string()
    } else {
        format!("{slug}-{count}")
    };
    *count += 1;
    out
}

/// A complete HTML page styled with the preferred font and accent color.
pub fn standalone_html(text: &str, prefs: &UserPreferences) -> String {
    let body = to_html(text);
    let title = document_title(text);
    let accent = &prefs.accent;
    let font = prefs.font.css_stack();
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{title}</title>
<style>
body {{ font-family: {font}; max-width: 860px; margin: 2rem auto; padding: 0 1rem; line-height: 1.6; color: #1f2328; }}
a {{ color: {accent}; }}
h1, h2 {{ border-bottom: 1px solid #d0d7de; padding-bottom: .3em; }}
h1, h2, h3 {{ color: {accent}; }}
code, pre {{ font-family: "JetBrains Mono", Menlo, Consolas, monospace; background: #f6f8fa; border-radius: 6px; }}
code {{ padding: .2em .4em; }}
pre {{ padding: 1rem; overflow: auto; }}
pre code {{ padding: 0; }}
blockquote {{ margin: 0; padding: 0 1em; color: #59636e; border-left: .25em solid {accent}; }}
table {{ border-collapse: collapse; }}
th, td {{ border: 1px solid #d0d7de; padding: 6px 13px; }}
img {{ max-width: 100%; }}
.render-error {{ color: #d1242f; }}
</style>
</head>
<body>
{body}</body>
</html>
"#
    )
}

fn document_title(text: &str) -> String {
    let heading = text
        .lines()
        .find_map(|line| line.strip_prefix("# "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or("README");
    escape_html(heading)
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_renders_nothing() {
        assert_eq!(to_html(""), "");
    }

    #[test]
    fn soft_breaks_become_br() {
        let html = to_html("line one\nline two");
        assert_eq!(html, "<p>line one<br />\nline two</p>\n");
    }

    #[test]
    fn raw_html_passes_through() {
        let html = to_html("<div align=\"center\">\n<img src=\"logo.png\">\n</div>\n");
        assert!(html.contains("<div align=\"center\">"));
        assert!(html.contains("<img src=\"logo.png\">"));

        let inline = to_html("press <kbd>Ctrl</kbd>");
        assert!(inline.contains("<kbd>Ctrl</kbd>"));
    }

    #[test]
    fn headings_get_unique_ids() {
        let html = to_html("# Getting Started\n\n## Install\n\n## Install\n");
        assert!(html.contains("<h1 id=\"getting-started\">Getting Started</h1>"));
        assert!(html.contains("<h2 id=\"install\">Install</h2>"));
        assert!(html.contains("<h2 id=\"install-1\">Install</h2>"));
    }

    #[test]
    fn explicit_heading_id_is_kept() {
        let html = to_html("# Title {#custom}\n");
        assert!(html.contains("id=\"custom\""));
    }

    #[test]
    fn gfm_extensions_are_enabled() {
        let html = to_html("| a | b |\n|---|---|\n| 1 | 2 |\n\n~~old~~\n\n- [x] done\n");
        assert!(html.contains("<table>"));
        assert!(html.contains("<del>old</del>"));
        assert!(html.contains("type=\"checkbox\""));
    }

    #[test]
    fn rendering_is_deterministic() {
        let text = "# Hi\n\nSome *text*\nwith `code`.\n";
        assert_eq!(to_html(text), to_html(text));
    }

    #[test]
    fn slugs() {
        assert_eq!(slugify("Hello, World!"), "hello-world");
        assert_eq!(slugify("  API -- Reference "), "api-reference");
        assert_eq!(slugify("🚀"), "section");
    }

    #[test]
    fn guarded_renderer_reports_panics() {
        let out: Option<String> = guarded("test", || panic!("boom"));
        assert!(out.is_none());
        assert_eq!(guarded("test", || 7), Some(7));
    }

    #[test]
    fn standalone_page_uses_preferences() {
        let prefs = UserPreferences {
            accent: "#ec4899".to_string(),
            ..UserPreferences::default()
        };
        let page = standalone_html("# My <App>\n\nBody", &prefs);
        assert!(page.starts_with("<!DOCTYPE html>"));
        assert!(page.contains("<title>My &lt;App&gt;</title>"));
        assert!(page.contains("color: #ec4899"));
        assert!(page.contains(prefs.font.css_stack()));
        assert!(page.contains("<p>Body</p>"));
    }
}
