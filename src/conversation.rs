/*!
Chat turns and the stateless history codec.

The whole conversation travels in a hidden form field as one opaque blob: records joined
by `"\n\n===\n\n"`, each record `"U: "` or `"A: "` followed by the raw turn text. The
browser never parses it, it only echoes it back on the next post.

Capping always drops the oldest turns: at most `MAX_TURNS` user+assistant pairs survive a
decode. The encoder measures the blob as the browser will post it back and sheds old
turns while it is over `MAX_HISTORY_BYTES`; if the newest exchange alone is still too big,
its text is cut from the end, assistant first.
*/

use crate::util::{form_encoded_len, TextBuf};

/// Last N user+assistant pairs kept.
pub const MAX_TURNS: usize = 12;
/// Ceiling for the history field in its form-encoded size. Half the request body cap, so
/// the prompt and the other fields still fit next to it.
pub const MAX_HISTORY_BYTES: usize = crate::server::MAX_REQ_BODY / 2;

pub const RECORD_SEPARATOR: &str = "\n\n===\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    fn record_prefix(&self) -> Option<&'static str> {
        match self {
            Role::User => Some("U: "),
            Role::Assistant => Some("A: "),
            Role::System => None,
        }
    }

    fn from_record(record: &str) -> Option<(Role, &str)> {
        if let Some(rest) = record.strip_prefix("U: ") {
            Some((Role::User, rest))
        } else {
            record.strip_prefix("A: ").map(|rest| (Role::Assistant, rest))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}

/// Chronological list of user/assistant turns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conversation {
    turns: Vec<ChatTurn>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_turns(turns: Vec<ChatTurn>) -> Self {
        Self { turns }
    }

    pub fn turns(&self) -> &[ChatTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn push(&mut self, turn: ChatTurn) {
        self.turns.push(turn);
    }

    /// Drop turns from the front until at most `max_pairs` pairs (2 * max_pairs turns) remain.
    pub fn cap_oldest(&mut self, max_pairs: usize) {
        let max_entries = max_pairs.saturating_mul(2);
        if self.turns.len() > max_entries {
            let excess = self.turns.len() - max_entries;
            self.turns.drain(..excess);
        }
    }

    /// Parse a history blob. Records that do not start with `U: `/`A: ` end the parse; the
    /// rest of the blob is ignored. The result is capped to `max_pairs`, oldest first.
    pub fn decode(blob: &str, max_pairs: usize) -> Conversation {
        let mut turns = Vec::new();
        if !blob.is_empty() {
            for record in blob.split(RECORD_SEPARATOR) {
                match Role::from_record(record) {
                    Some((role, content)) => turns.push(ChatTurn::new(role, content)),
                    None => break,
                }
            }
        }
        let mut conv = Conversation { turns };
        conv.cap_oldest(max_pairs);
        conv
    }

    /// Serialize all user/assistant turns; system turns are not part of the blob.
    pub fn encode(&self) -> String {
        encode_turns(&self.turns)
    }

    /// Serialize so that the form-encoded blob fits in `max_encoded` bytes.
    ///
    /// Oldest turns go first. When only the newest exchange is left and it is still too
    /// big, the assistant text and then the user text are cut from the end.
    pub fn encode_bounded(&self, max_encoded: usize) -> String {
        let mut start = 0usize;
        loop {
            let blob = encode_turns(&self.turns[start..]);
            if form_encoded_len(&blob) <= max_encoded {
                return blob;
            }
            if self.turns.len() - start <= 2 {
                break;
            }
            start += 1;
        }

        let mut tail: Vec<ChatTurn> = self.turns[start..].to_vec();
        let empty: Vec<ChatTurn> = tail.iter().map(|t| ChatTurn::new(t.role, "")).collect();
        let mut room = max_encoded.saturating_sub(form_encoded_len(&encode_turns(&empty)));
        // Budget the user text first so the cut lands on the assistant reply.
        let mut order: Vec<usize> = (0..tail.len()).collect();
        order.sort_by_key(|&i| tail[i].role == Role::Assistant);
        for i in order {
            let kept = truncate_encoded(&tail[i].content, room);
            room -= form_encoded_len(kept);
            let kept_len = kept.len();
            tail[i].content.truncate(kept_len);
        }
        encode_turns(&tail)
    }

    /// Human-readable transcript: `role: content` paragraphs, HTML-escaped for a `<pre>`.
    pub fn transcript_html(&self) -> String {
        let mut out = TextBuf::new();
        for t in &self.turns {
            push_transcript_line(&mut out, t.role, &t.content);
        }
        out.take_string()
    }
}

pub fn push_transcript_line(out: &mut TextBuf, role: Role, content: &str) {
    out.push_str(role.as_str());
    out.push_str(": ");
    crate::util::html_escape_into(out, content);
    out.push_str("\n\n");
}

/// Longest prefix of `s` whose form-encoded size fits in `budget`.
fn truncate_encoded(s: &str, budget: usize) -> &str {
    let mut used = 0usize;
    for (idx, ch) in s.char_indices() {
        let mut tmp = [0u8; 4];
        used += form_encoded_len(ch.encode_utf8(&mut tmp));
        if used > budget {
            return &s[..idx];
        }
    }
    s
}

fn encode_turns(turns: &[ChatTurn]) -> String {
    let mut out = TextBuf::new();
    let mut first = true;
    for t in turns {
        let Some(prefix) = t.role.record_prefix() else {
            continue;
        };
        if !first {
            out.push_str(RECORD_SEPARATOR);
        }
        first = false;
        out.push_str(prefix);
        out.push_str(&t.content);
    }
    out.take_string()
}
