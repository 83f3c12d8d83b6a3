//! Minimal markup helpers: escaping, fragment containers and the page shell

use std::fmt::Write as _;

use crate::config::RouterConfig;
use crate::fragment::{FragmentConfig, FragmentId};

/// Escape text for use in element content and quoted attribute values
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Container element for a mounted fragment.
///
/// The client loads it on page load, on a manual trigger named after the
/// id, and on a stream event named after the id.
pub fn container(config: &FragmentConfig, id: &FragmentId) -> String {
    let id = escape(id.as_str());
    let mut class = escape(config.loader_class());
    if let Some(extra) = config.class() {
        class.push(' ');
        class.push_str(&escape(extra));
    }

    format!(
        r##"<div class="{class}" id="{id}" hx-post="{url}?id={id}" hx-include="#{id}" hx-trigger="load, {id}, sse:{id}">{preload}</div>"##,
        url = escape(config.url()),
        preload = config.preload().unwrap_or_default(),
    )
}

#[derive(Debug, Clone)]
pub struct PageOptions {
    pub lang: String,
    pub title: Option<String>,
    /// Raw markup appended to `<head>`
    pub head: Option<String>,
}

impl Default for PageOptions {
    fn default() -> Self {
        Self {
            lang: "en".to_string(),
            title: None,
            head: None,
        }
    }
}

impl PageOptions {
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn head(mut self, markup: impl Into<String>) -> Self {
        self.head = Some(markup.into());
        self
    }

    pub fn lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = lang.into();
        self
    }
}

/// Full document: htmx and its SSE extension, body subscribed to the
/// session stream.
pub fn page_shell(config: &RouterConfig, options: &PageOptions, body: &str) -> String {
    let mut head = String::new();
    head.push_str(r#"<meta charset="utf-8">"#);
    if let Some(title) = &options.title {
        let _ = write!(head, "<title>{}</title>", escape(title));
    }
    let _ = write!(
        head,
        r#"<script src="{}"></script><script src="{}"></script>"#,
        escape(&config.htmx_cdn),
        escape(&config.htmx_sse)
    );
    if let Some(extra) = &options.head {
        head.push_str(extra);
    }

    format!(
        r#"<!DOCTYPE html><html lang="{lang}"><head>{head}</head><body hx-ext="sse" sse-connect="{sse}">{body}</body></html>"#,
        lang = escape(&options.lang),
        sse = escape(&config.sse_path()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape() {
        assert_eq!(
            escape(r#"<a href="x">Tom & 'Jerry'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;Tom &amp; &#39;Jerry&#39;&lt;/a&gt;"
        );
        assert_eq!(escape("plain"), "plain");
    }

    #[test]
    fn test_container_wiring() {
        let config = FragmentConfig::builder("Clock")
            .class("card")
            .preload("loading…")
            .build(&RouterConfig::default(), None)
            .unwrap();
        let html = container(&config, &FragmentId::new("clock-1"));

        assert_eq!(
            html,
            concat!(
                r#"<div class="__componentLoader__ card" id="clock-1" "#,
                r##"hx-post="/__renderable__/Clock?id=clock-1" hx-include="#clock-1" "##,
                r#"hx-trigger="load, clock-1, sse:clock-1">loading…</div>"#
            )
        );
    }

    #[test]
    fn test_page_shell() {
        let html = page_shell(
            &RouterConfig::default(),
            &PageOptions::default().title("Live <demo>"),
            "<main></main>",
        );
        assert!(html.starts_with("<!DOCTYPE html><html lang=\"en\">"));
        assert!(html.contains("<title>Live &lt;demo&gt;</title>"));
        assert!(html.contains(r#"<script src="https://unpkg.com/htmx.org"></script>"#));
        assert!(html.contains(r#"<body hx-ext="sse" sse-connect="/__renderable__/sse"><main></main></body>"#));
    }
}
