//! Page assembly. Everything interpolated here is HTML-escaped except the transcript,
//! which callers build with `conversation::push_transcript_line` (already escaped).

use std::fmt::Write as _;

use super::http::Response;
use crate::util::{html_escape, html_escape_into, TextBuf};

/// Ceiling for one rendered page.
pub const MAX_RENDER: usize = 4 * 1024 * 1024;

pub const CSP: &str = "default-src 'none'; form-action 'self'; style-src 'self' 'unsafe-inline'";

pub const CSS: &str = concat!(
    "body{max-width:52rem;margin:2rem auto;font:16px/1.35 system-ui,Arial,Helvetica,sans-serif}",
    "h1{font-weight:600;font-size:1.25rem;margin:0 0 1rem}",
    "form{margin:0 0 1rem}",
    "textarea{width:100%;min-height:9rem}",
    "pre{white-space:pre-wrap;background:#f7f7f7;padding:1rem;border-radius:.25rem}",
    "label{display:block;margin:.5rem 0 .25rem;color:#333}",
    "input[type=text],input[type=number]{width:100%;}",
    ".row{display:flex;gap:1rem}",
    ".col{flex:1}",
    ".warn{color:#a00}",
    ".footer{margin-top:1rem;color:#777;font-size:.9rem}",
);

#[derive(Debug, Clone)]
pub struct PageView<'a> {
    pub title: &'a str,
    pub model: &'a str,
    pub temperature: f64,
    /// Pre-escaped `role: text` paragraphs.
    pub transcript_html: &'a str,
    /// Raw history blob; escaped on output.
    pub history: &'a str,
    /// Unescaped banner text.
    pub error: Option<&'a str>,
}

pub fn render_page(view: &PageView<'_>) -> String {
    let mut b = TextBuf::with_limit(MAX_RENDER);
    let title = html_escape(view.title);
    let _ = write!(
        b,
        "<!doctype html><html lang=en><meta charset=utf-8>\
         <title>{title}</title><style>{CSS}</style><h1>{title}</h1>"
    );

    if let Some(err) = view.error.filter(|e| !e.is_empty()) {
        b.push_str("<p class=warn>");
        html_escape_into(&mut b, err);
        b.push_str("</p>");
    }

    b.push_str("<form method=POST action=/chat>");
    b.push_str("<label for=prompt>Prompt</label>");
    b.push_str("<textarea name=prompt id=prompt required></textarea>");

    b.push_str("<div class=row><div class=col>");
    b.push_str("<label for=model>Model</label>");
    b.push_str("<input type=text id=model name=model value=\"");
    html_escape_into(&mut b, view.model);
    b.push_str("\"></div>");

    b.push_str("<div class=col>");
    b.push_str("<label for=temp>Temperature</label>");
    let _ = write!(
        b,
        "<input type=number id=temp name=temp step=0.1 min=0 max=2 value=\"{:.2}\">",
        view.temperature
    );
    b.push_str("</div></div>");

    // The textarea drops one leading newline on parse; the extra one keeps the blob intact.
    b.push_str("<textarea name=history style=\"display:none\">\n");
    html_escape_into(&mut b, view.history);
    b.push_str("</textarea>");

    b.push_str("<p><button type=submit>Send</button></p></form>");

    b.push_str("<h2>Transcript</h2><pre>");
    b.push_str(view.transcript_html);
    b.push_str(
        "</pre><p class=footer>This UI uses no JavaScript. Responses render on full-page reload.</p></html>",
    );

    if b.truncated() {
        tracing::warn!(limit = MAX_RENDER, "rendered page exceeded ceiling and was cut");
    }
    b.take_string()
}

/// 200 page with the security headers every HTML response carries.
pub fn html_response(page: String) -> Response {
    Response::new(200, "OK")
        .header("Content-Type", "text/html; charset=utf-8")
        .header("Content-Security-Policy", CSP)
        .header("X-Frame-Options", "DENY")
        .header("Referrer-Policy", "no-referrer")
        .header("Cache-Control", "no-store")
        .body(page.into_bytes())
}
