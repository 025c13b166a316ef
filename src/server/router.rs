//! Route table and the chat handler.

use std::sync::Arc;

use super::form::FormData;
use super::http::{HttpRequest, Method, Response};
use super::render::{html_response, render_page, PageView};
use crate::backend::{clamp_temperature, CompletionRequest, Gateway, Strategy, Transport};
use crate::config::ServerConfig;
use crate::conversation::{push_transcript_line, ChatTurn, Conversation, Role, MAX_HISTORY_BYTES, MAX_TURNS};
use crate::errors::display_for_completion_error;
use crate::util::TextBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Index,
    Health,
    Chat,
}

/// Classify method + exact path into a known route.
pub fn classify_route(method: &Method, path: &str) -> Option<Route> {
    match (method, path) {
        (Method::Get, "/") => Some(Route::Index),
        (Method::Get, "/health") => Some(Route::Health),
        (Method::Post, "/chat") => Some(Route::Chat),
        _ => None,
    }
}

/// Shared, read-only state for all connection threads.
pub struct App<T: Transport = Strategy> {
    config: Arc<ServerConfig>,
    gateway: Gateway<T>,
}

impl<T: Transport> App<T> {
    pub fn new(config: Arc<ServerConfig>, gateway: Gateway<T>) -> Self {
        Self { config, gateway }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn gateway(&self) -> &Gateway<T> {
        &self.gateway
    }

    pub fn handle(&self, req: &HttpRequest) -> Response {
        match classify_route(&req.method, &req.path) {
            Some(Route::Index) => self.index(),
            Some(Route::Health) => Response::text(200, "OK", "ok\n".to_string()),
            Some(Route::Chat) => self.chat(&req.body),
            None => Response::not_found(),
        }
    }

    fn index(&self) -> Response {
        html_response(render_page(&PageView {
            title: &self.config.app_title,
            model: &self.config.model,
            temperature: self.config.temperature,
            transcript_html: "",
            history: "",
            error: None,
        }))
    }

    fn chat(&self, body: &[u8]) -> Response {
        let form = FormData::parse_bytes(body);
        let prompt = normalize_newlines(form.get("prompt").unwrap_or_default());
        let model = form
            .get("model")
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(&self.config.model)
            .to_string();
        let temperature = form
            .get("temp")
            .and_then(|t| t.trim().parse::<f64>().ok())
            .filter(|t| t.is_finite())
            .map(clamp_temperature)
            .unwrap_or(self.config.temperature);
        let history_raw = form.get("history").unwrap_or_default();
        let mut conv = Conversation::decode(&normalize_newlines(history_raw), MAX_TURNS);

        if prompt.trim().is_empty() {
            // Nothing to send: show the state we were given and hand the field back as-is.
            return html_response(render_page(&PageView {
                title: &self.config.app_title,
                model: &model,
                temperature,
                transcript_html: &conv.transcript_html(),
                history: history_raw,
                error: None,
            }));
        }

        conv.push(ChatTurn::user(prompt));
        let req = self.build_request(&conv, &model, temperature);

        let mut banner: Option<String> = None;
        let mut answered = false;
        match self.gateway.complete(&req) {
            Ok(text) if !text.is_empty() => {
                conv.push(ChatTurn::assistant(text));
                answered = true;
            }
            Ok(_) => {}
            Err(e) => banner = Some(display_for_completion_error(&e)),
        }

        conv.cap_oldest(MAX_TURNS);
        let mut transcript = TextBuf::new();
        transcript.push_str(&conv.transcript_html());
        if !answered {
            push_transcript_line(&mut transcript, Role::Assistant, "(no content)");
        }
        let history = conv.encode_bounded(MAX_HISTORY_BYTES);

        html_response(render_page(&PageView {
            title: &self.config.app_title,
            model: &model,
            temperature,
            transcript_html: &transcript.take_string(),
            history: &history,
            error: banner.as_deref(),
        }))
    }

    fn build_request(&self, conv: &Conversation, model: &str, temperature: f64) -> CompletionRequest {
        let mut req =
            CompletionRequest::new(model, temperature).with_max_tokens(self.config.max_tokens);
        if let Some(sys) = &self.config.system_prompt {
            req.push(ChatTurn::system(sys.as_str()));
        }
        for turn in conv.turns() {
            req.push(turn.clone());
        }
        req
    }
}

/// Browsers submit textarea content with CRLF line breaks.
fn normalize_newlines(s: &str) -> String {
    s.replace("\r\n", "\n")
}
