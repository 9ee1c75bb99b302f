//! Server-sent-events framing for the streaming endpoint.
//!
//! Every payload becomes one event: a `data: ` line per payload line followed
//! by a blank line. Trailing line breaks are dropped so a process line
//! `"step 1\n"` travels as `data: step 1\n\n`.

pub const DATA_PREFIX: &str = "data: ";
pub const CONTENT_TYPE: &str = "text/event-stream";

/// A bare `\r` is a line break as in event-stream parsing; `\r\n` is one break.
pub fn encode_frame(payload: &str) -> String {
    let body = payload.trim_end_matches(['\r', '\n']).replace("\r\n", "\n");
    let mut frame = String::with_capacity(body.len() + DATA_PREFIX.len() + 2);
    for line in body.split(['\r', '\n']) {
        frame.push_str(DATA_PREFIX);
        frame.push_str(line);
        frame.push('\n');
    }
    frame.push('\n');
    frame
}

pub fn encode_bytes(payload: &[u8]) -> String {
    encode_frame(&String::from_utf8_lossy(payload))
}

/// Splits a complete event stream back into payloads. Lines that are not
/// `data:` fields (comments, `event:`) are ignored.
pub fn decode_frames(stream: &str) -> Vec<String> {
    let mut frames = Vec::new();
    let mut current: Option<String> = None;
    for line in stream.split('\n') {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            if let Some(frame) = current.take() {
                frames.push(frame);
            }
            continue;
        }
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        let data = data.strip_prefix(' ').unwrap_or(data);
        match current.as_mut() {
            Some(frame) => {
                frame.push('\n');
                frame.push_str(data);
            }
            None => current = Some(data.to_string()),
        }
    }
    if let Some(frame) = current {
        frames.push(frame);
    }
    frames
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_line_drops_trailing_newline() {
        assert_eq!(encode_frame("step 1\n"), "data: step 1\n\n");
        assert_eq!(encode_frame("step 1\r\n"), "data: step 1\n\n");
    }

    #[test]
    fn multi_line_payload_uses_one_data_field_per_line() {
        let frame = encode_frame("a\nb\r\nc");
        assert_eq!(frame, "data: a\ndata: b\ndata: c\n\n");
        assert_eq!(decode_frames(&frame), vec!["a\nb\nc".to_string()]);
    }

    #[test]
    fn carriage_returns_split_progress_output() {
        let frame = encode_frame("10%\r20%\r30%\n");
        assert_eq!(frame, "data: 10%\ndata: 20%\ndata: 30%\n\n");
        assert_eq!(decode_frames(&frame), vec!["10%\n20%\n30%".to_string()]);
        assert!(!encode_bytes(b"a\rb\r\nc").contains('\r'));
    }

    #[test]
    fn empty_payload_still_frames() {
        assert_eq!(encode_frame(""), "data: \n\n");
        assert_eq!(decode_frames("data: \n\n"), vec![String::new()]);
    }

    #[test]
    fn decode_skips_comments_and_keeps_order() {
        let stream = format!(
            ": keep-alive\n\n{}{}",
            encode_frame("[DEEPMD] start"),
            encode_bytes(b"hello\n")
        );
        assert_eq!(
            decode_frames(&stream),
            vec!["[DEEPMD] start".to_string(), "hello".to_string()]
        );
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let frame = encode_bytes(&[b'o', b'k', 0xff, b'\n']);
        assert!(frame.starts_with("data: ok"));
        assert!(frame.ends_with("\n\n"));
    }
}
