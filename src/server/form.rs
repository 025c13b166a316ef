/*
application/x-www-form-urlencoded body decoding:
- pairs split on '&', key/value on the first '='
- '+' → space, %XX → byte; invalid sequences preserved literally
- first occurrence of a repeated key wins on lookup
*/

use crate::util::url_decode;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormData {
    pairs: Vec<(String, String)>,
}

impl FormData {
    pub fn parse(body: &str) -> FormData {
        let mut pairs = Vec::new();
        for pair in body.split('&') {
            if pair.is_empty() {
                continue;
            }
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            pairs.push((url_decode(k), url_decode(v)));
        }
        FormData { pairs }
    }

    pub fn parse_bytes(body: &[u8]) -> FormData {
        Self::parse(&String::from_utf8_lossy(body))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}
