//! Classifies a single framed line of child stdout as telemetry, a command
//! response, or malformed.
//!
//! Frames are trimmed of trailing whitespace only — leading whitespace is
//! significant for nothing the engine emits, so trimming it would just hide
//! a malformed frame instead of flagging it.

use serde_json::Value;

/// Prefix the engine writes ahead of telemetry JSON on its own stdout line.
const METRIC_PREFIX: &str = "METRIC:";

/// Outcome of classifying one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    /// A `METRIC:{...}` line whose suffix parsed as a JSON object.
    Telemetry(Value),
    /// A bare JSON-object line, forwarded to the client as a command response.
    Response(Value),
    /// Non-empty but neither of the above: not valid JSON, or valid JSON
    /// whose root isn't an object.
    Malformed,
}

/// Classify a raw frame. Returns `None` for a frame that is empty after
/// trailing-whitespace trimming — an ignored no-op line, not an error.
pub fn classify(raw: &[u8]) -> Option<Classified> {
    let trimmed = trim_trailing(raw);
    if trimmed.is_empty() {
        return None;
    }

    let text = std::str::from_utf8(trimmed).ok();

    if let Some(text) = text {
        if let Some(payload) = text.strip_prefix(METRIC_PREFIX) {
            return Some(match parse_object(payload) {
                Some(v) => Classified::Telemetry(v),
                None => Classified::Malformed,
            });
        }
        return Some(match parse_object(text) {
            Some(v) => Classified::Response(v),
            None => Classified::Malformed,
        });
    }

    Some(Classified::Malformed)
}

fn parse_object(text: &str) -> Option<Value> {
    let value: Value = serde_json::from_str(text.trim()).ok()?;
    if value.is_object() {
        Some(value)
    } else {
        None
    }
}

fn trim_trailing(raw: &[u8]) -> &[u8] {
    let mut end = raw.len();
    while end > 0 && raw[end - 1].is_ascii_whitespace() {
        end -= 1;
    }
    &raw[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_frame_is_ignored() {
        assert_eq!(classify(b""), None);
        assert_eq!(classify(b"   \r"), None);
    }

    #[test]
    fn metric_prefixed_object_is_telemetry() {
        let got = classify(b"METRIC:{\"fps\":60}");
        assert_eq!(got, Some(Classified::Telemetry(json!({"fps": 60}))));
    }

    #[test]
    fn metric_prefix_with_invalid_json_is_malformed() {
        let got = classify(b"METRIC:not json");
        assert_eq!(got, Some(Classified::Malformed));
    }

    #[test]
    fn metric_prefix_with_non_object_json_is_malformed() {
        let got = classify(b"METRIC:[1,2,3]");
        assert_eq!(got, Some(Classified::Malformed));
    }

    #[test]
    fn bare_json_object_is_a_response() {
        let got = classify(b"{\"id\":1,\"status\":\"ok\"}");
        assert_eq!(
            got,
            Some(Classified::Response(json!({"id": 1, "status": "ok"})))
        );
    }

    #[test]
    fn bare_non_object_json_is_malformed() {
        assert_eq!(classify(b"42"), Some(Classified::Malformed));
        assert_eq!(classify(b"\"a string\""), Some(Classified::Malformed));
    }

    #[test]
    fn plain_text_is_malformed() {
        assert_eq!(classify(b"Initializing engine..."), Some(Classified::Malformed));
    }

    #[test]
    fn trailing_whitespace_is_trimmed_before_parsing() {
        let got = classify(b"{\"ok\":true}\r\n  ");
        assert_eq!(got, Some(Classified::Response(json!({"ok": true}))));
    }
}
