//! Incremental parser for `multipart/x-mixed-replace` MJPEG streams.
//!
//! The body of such a response is an endless sequence of parts:
//!
//! ```text
//! --frame\r\n
//! Content-Type: image/jpeg\r\n
//! Content-Length: 12345\r\n
//! \r\n
//! <jpeg bytes>\r\n
//! --frame\r\n
//! ...
//! ```
//!
//! Bytes are pushed in as they arrive from the network and complete parts
//! are pulled out with [`MjpegParser::next_part`]. `Content-Length` is used
//! when present; otherwise a part ends at the next delimiter. A delimiter
//! only counts at the start of a line, so boundary text inside JPEG data is
//! left alone.

use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;

/// Boundary used when the server does not name one
pub const DEFAULT_BOUNDARY: &str = "frame";

const MAX_HEADER_BYTES: usize = 16 * 1024;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MjpegError {
    #[error("Part exceeds {limit} bytes")]
    PartTooLarge { limit: usize },

    #[error("Part headers exceed {limit} bytes")]
    HeadersTooLarge { limit: usize },

    #[error("Invalid Content-Length: {value}")]
    InvalidContentLength { value: String },
}

/// One complete part of the multipart stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MjpegPart {
    pub content_type: Option<String>,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ParseState {
    /// Looking for the next delimiter line
    Delimiter,
    Headers,
    Body {
        content_type: Option<String>,
        length: Option<usize>,
    },
    /// The closing delimiter was seen
    Closed,
}

#[derive(Debug)]
pub struct MjpegParser {
    delimiter: Vec<u8>,
    buffer: BytesMut,
    max_part_bytes: usize,
    state: ParseState,
    /// The buffer starts at the beginning of a line
    line_start: bool,
}

impl MjpegParser {
    pub fn new(boundary: &str, max_part_bytes: usize) -> Self {
        // Servers disagree on whether the dashes belong to the boundary
        let delimiter = if boundary.starts_with("--") {
            boundary.as_bytes().to_vec()
        } else {
            format!("--{boundary}").into_bytes()
        };
        Self {
            delimiter,
            buffer: BytesMut::new(),
            max_part_bytes,
            state: ParseState::Delimiter,
            line_start: true,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        if self.state != ParseState::Closed {
            self.buffer.extend_from_slice(chunk);
        }
    }

    /// Whether the closing delimiter has been read
    pub fn is_closed(&self) -> bool {
        self.state == ParseState::Closed
    }

    /// Next complete part, or `None` when more input is needed.
    pub fn next_part(&mut self) -> Result<Option<MjpegPart>, MjpegError> {
        loop {
            match &self.state {
                ParseState::Closed => return Ok(None),
                ParseState::Delimiter => {
                    if !self.consume_delimiter() {
                        return Ok(None);
                    }
                }
                ParseState::Headers => {
                    if !self.consume_headers()? {
                        return Ok(None);
                    }
                }
                ParseState::Body {
                    content_type,
                    length,
                } => {
                    let content_type = content_type.clone();
                    let length = *length;
                    let data = match length {
                        Some(length) => self.take_sized_body(length),
                        None => self.take_delimited_body()?,
                    };
                    return match data {
                        Some(data) => {
                            self.state = ParseState::Delimiter;
                            self.line_start = false;
                            Ok(Some(MjpegPart { content_type, data }))
                        }
                        None => Ok(None),
                    };
                }
            }
        }
    }

    /// Skip to and past the next delimiter line. Returns false when more
    /// input is needed.
    fn consume_delimiter(&mut self) -> bool {
        let Some(start) = self.find_delimiter_line() else {
            // Keep a tail in case the newline and delimiter straddle two chunks
            let keep = self.delimiter.len();
            if self.buffer.len() > keep {
                let discard = self.buffer.len() - keep;
                self.line_start = self.buffer[discard - 1] == b'\n';
                self.buffer.advance(discard);
            }
            return false;
        };

        let after = start + self.delimiter.len();
        let Some(newline) = find(&self.buffer[after..], b"\n") else {
            if self.buffer[after..].starts_with(b"--") {
                self.close();
            }
            return false;
        };

        let line = &self.buffer[after..after + newline];
        if line.starts_with(b"--") {
            self.close();
            return false;
        }
        self.buffer.advance(after + newline + 1);
        self.state = ParseState::Headers;
        true
    }

    fn consume_headers(&mut self) -> Result<bool, MjpegError> {
        let Some((headers_end, consumed)) = find_headers_end(&self.buffer) else {
            if self.buffer.len() > MAX_HEADER_BYTES {
                return Err(MjpegError::HeadersTooLarge {
                    limit: MAX_HEADER_BYTES,
                });
            }
            return Ok(false);
        };

        let mut content_type = None;
        let mut length = None;
        let raw = String::from_utf8_lossy(&self.buffer[..headers_end]).into_owned();
        for line in raw.lines() {
            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            if name.trim().eq_ignore_ascii_case("content-type") {
                content_type = Some(value.to_string());
            } else if name.trim().eq_ignore_ascii_case("content-length") {
                let parsed: usize =
                    value
                        .parse()
                        .map_err(|_| MjpegError::InvalidContentLength {
                            value: value.to_string(),
                        })?;
                if parsed > self.max_part_bytes {
                    return Err(MjpegError::PartTooLarge {
                        limit: self.max_part_bytes,
                    });
                }
                length = Some(parsed);
            }
        }

        self.buffer.advance(consumed);
        self.state = ParseState::Body {
            content_type,
            length,
        };
        Ok(true)
    }

    fn take_sized_body(&mut self, length: usize) -> Option<Bytes> {
        if self.buffer.len() < length {
            return None;
        }
        Some(self.buffer.split_to(length).freeze())
    }

    /// Offset of the first delimiter that begins a line
    fn find_delimiter_line(&self) -> Option<usize> {
        if self.line_start && self.buffer.starts_with(&self.delimiter) {
            return Some(0);
        }
        find_after_newline(&self.buffer, &self.delimiter).map(|newline| newline + 1)
    }

    fn take_delimited_body(&mut self) -> Result<Option<Bytes>, MjpegError> {
        let Some(newline) = find_after_newline(&self.buffer, &self.delimiter) else {
            if self.buffer.len() > self.max_part_bytes {
                return Err(MjpegError::PartTooLarge {
                    limit: self.max_part_bytes,
                });
            }
            return Ok(None);
        };

        // The line break before the delimiter belongs to the delimiter
        let mut end = newline;
        if self.buffer[..end].ends_with(b"\r") {
            end -= 1;
        }
        let data = self.buffer.split_to(end).freeze();
        Ok(Some(data))
    }

    fn close(&mut self) {
        self.state = ParseState::Closed;
        self.buffer.clear();
    }
}

/// Extract the boundary from a `multipart/*` content type. Returns `None`
/// for any other media type.
pub fn boundary_from_content_type(content_type: &str) -> Option<String> {
    let mut params = content_type.split(';');
    let media_type = params.next()?.trim();
    if !media_type.to_ascii_lowercase().starts_with("multipart/") {
        return None;
    }

    let boundary = params
        .filter_map(|param| param.split_once('='))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
        .filter(|value| !value.is_empty());

    Some(boundary.unwrap_or_else(|| DEFAULT_BOUNDARY.to_string()))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Position of a `\n` immediately followed by `needle`
fn find_after_newline(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() <= needle.len() {
        return None;
    }
    haystack
        .windows(needle.len() + 1)
        .position(|window| window[0] == b'\n' && &window[1..] == needle)
}

/// Returns (end of header text, bytes to consume including the blank line)
fn find_headers_end(buffer: &[u8]) -> Option<(usize, usize)> {
    if buffer.starts_with(b"\r\n") {
        return Some((0, 2));
    }
    if buffer.starts_with(b"\n") {
        return Some((0, 1));
    }
    if let Some(position) = find(buffer, b"\r\n\r\n") {
        return Some((position, position + 4));
    }
    find(buffer, b"\n\n").map(|position| (position, position + 2))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(body: &[u8], with_length: bool) -> Vec<u8> {
        let mut out = b"--frame\r\nContent-Type: image/jpeg\r\n".to_vec();
        if with_length {
            out.extend_from_slice(format!("Content-Length: {}\r\n", body.len()).as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(body);
        out.extend_from_slice(b"\r\n");
        out
    }

    fn drain(parser: &mut MjpegParser) -> Vec<Bytes> {
        let mut parts = Vec::new();
        while let Some(part) = parser.next_part().unwrap() {
            parts.push(part.data);
        }
        parts
    }

    #[test]
    fn test_parses_sized_parts() {
        let mut parser = MjpegParser::new("frame", 1024);
        let mut stream = part(b"\xff\xd8first\xff\xd9", true);
        stream.extend(part(b"\xff\xd8second\xff\xd9", true));
        parser.push(&stream);

        let parts = drain(&mut parser);
        assert_eq!(parts.len(), 2);
        assert_eq!(&parts[0][..], b"\xff\xd8first\xff\xd9");
        assert_eq!(&parts[1][..], b"\xff\xd8second\xff\xd9");
    }

    #[test]
    fn test_unsized_part_ends_at_next_delimiter() {
        let mut parser = MjpegParser::new("frame", 1024);
        parser.push(&part(b"one", false));
        // Nothing until the following delimiter proves the part is complete
        assert!(parser.next_part().unwrap().is_none());

        parser.push(&part(b"two", false));
        let first = parser.next_part().unwrap().unwrap();
        assert_eq!(&first.data[..], b"one");
        assert_eq!(first.content_type.as_deref(), Some("image/jpeg"));
    }

    #[test]
    fn test_boundary_text_inside_unsized_body_is_data() {
        let body = b"\xff\xd8abc--framexyz\xff\xd9";
        let mut parser = MjpegParser::new("frame", 1024);
        parser.push(&part(body, false));
        parser.push(b"--frame\r\n");

        let first = parser.next_part().unwrap().unwrap();
        assert_eq!(&first.data[..], body);
        assert_eq!(first.content_type.as_deref(), Some("image/jpeg"));

        // Parser stays aligned for the following part
        parser.push(b"Content-Length: 2\r\n\r\nok\r\n");
        assert_eq!(&parser.next_part().unwrap().unwrap().data[..], b"ok");
    }

    #[test]
    fn test_boundary_text_mid_line_in_preamble_is_skipped() {
        let mut parser = MjpegParser::new("frame", 1024);
        let mut stream = b"not a --frame\r\n".to_vec();
        stream.extend(part(b"real", true));
        parser.push(&stream);
        assert_eq!(drain(&mut parser), vec![Bytes::from_static(b"real")]);
    }

    #[test]
    fn test_unsized_body_delivered_byte_by_byte() {
        let body = b"x--frame--y";
        let stream = [part(body, false), part(b"next", true)].concat();
        let mut parser = MjpegParser::new("frame", 1024);

        let mut parts = Vec::new();
        for byte in stream {
            parser.push(&[byte]);
            parts.extend(drain(&mut parser));
        }
        assert_eq!(
            parts,
            vec![Bytes::from_static(b"x--frame--y"), Bytes::from_static(b"next")]
        );
    }

    #[test]
    fn test_handles_byte_by_byte_delivery() {
        let mut parser = MjpegParser::new("frame", 1024);
        let stream = [part(b"abc", true), part(b"defg", true)].concat();

        let mut parts = Vec::new();
        for byte in stream {
            parser.push(&[byte]);
            parts.extend(drain(&mut parser));
        }
        assert_eq!(parts, vec![Bytes::from_static(b"abc"), Bytes::from_static(b"defg")]);
    }

    #[test]
    fn test_skips_preamble_garbage() {
        let mut parser = MjpegParser::new("frame", 1024);
        let mut stream = b"junk before the first boundary\r\n".to_vec();
        stream.extend(part(b"payload", true));
        parser.push(&stream);
        assert_eq!(drain(&mut parser), vec![Bytes::from_static(b"payload")]);
    }

    #[test]
    fn test_closing_delimiter_ends_stream() {
        let mut parser = MjpegParser::new("frame", 1024);
        let mut stream = part(b"last", true);
        stream.extend_from_slice(b"--frame--\r\n");
        parser.push(&stream);

        assert_eq!(drain(&mut parser).len(), 1);
        assert!(parser.is_closed());
    }

    #[test]
    fn test_rejects_oversized_declared_length() {
        let mut parser = MjpegParser::new("frame", 4);
        parser.push(&part(b"too long", true));
        assert_eq!(
            parser.next_part().unwrap_err(),
            MjpegError::PartTooLarge { limit: 4 }
        );
    }

    #[test]
    fn test_rejects_unbounded_unsized_part() {
        let mut parser = MjpegParser::new("frame", 8);
        parser.push(b"--frame\r\n\r\n");
        parser.push(&[0u8; 32]);
        assert!(matches!(
            parser.next_part(),
            Err(MjpegError::PartTooLarge { .. })
        ));
    }

    #[test]
    fn test_rejects_bad_content_length() {
        let mut parser = MjpegParser::new("frame", 1024);
        parser.push(b"--frame\r\nContent-Length: lots\r\n\r\n");
        assert!(matches!(
            parser.next_part(),
            Err(MjpegError::InvalidContentLength { .. })
        ));
    }

    #[test]
    fn test_boundary_with_leading_dashes() {
        let mut parser = MjpegParser::new("--myboundary", 1024);
        parser.push(b"--myboundary\r\nContent-Length: 2\r\n\r\nok\r\n");
        assert_eq!(&parser.next_part().unwrap().unwrap().data[..], b"ok");
    }

    #[test]
    fn test_boundary_from_content_type() {
        assert_eq!(
            boundary_from_content_type("multipart/x-mixed-replace; boundary=frame").as_deref(),
            Some("frame")
        );
        assert_eq!(
            boundary_from_content_type("multipart/x-mixed-replace;boundary=\"cam\"").as_deref(),
            Some("cam")
        );
        assert_eq!(
            boundary_from_content_type("multipart/x-mixed-replace").as_deref(),
            Some(DEFAULT_BOUNDARY)
        );
        assert_eq!(boundary_from_content_type("image/jpeg"), None);
    }
}
