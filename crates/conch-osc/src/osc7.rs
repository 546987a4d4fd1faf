//! Streaming OSC7 parser.
//!
//! The parser is a byte-at-a-time state machine, so a sequence may be split
//! at any offset across `feed` calls. Only sequences introduced by `ESC ]`
//! are considered; the same bytes in ordinary output are ignored.
//!
//! Recognised form: `ESC ] 7 ; file://[user@]host[:port]/path TERM`, where
//! `TERM` is `BEL` or `ESC \`.

use thiserror::Error;

const ESC: u8 = 0x1b;
const BEL: u8 = 0x07;
const CAN: u8 = 0x18;
const SUB: u8 = 0x1a;

/// Longest path accepted from a shell, measured after percent-decoding.
pub const MAX_PATH_LEN: usize = 4096;

/// Payload bytes kept for one sequence. Percent-encoding can triple a path.
const MAX_PAYLOAD_LEN: usize = 3 * MAX_PATH_LEN + 64;

/// Why an OSC7 sequence was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("OSC7 sequence carries no URI")]
    MissingUri,
    #[error("OSC7 URI is not a file:// URI")]
    NotFileUri,
    #[error("OSC7 URI has no path component")]
    MissingPath,
    #[error("OSC7 payload is not valid UTF-8")]
    InvalidUtf8,
    #[error("OSC7 payload exceeds {0} bytes")]
    TooLong(usize),
    #[error("OSC7 sequence interrupted before its terminator")]
    Unterminated,
}

/// Outcome of the buffer segment an event describes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Osc7Status {
    /// A complete, valid sequence.
    Success,
    /// An OSC7 sequence is still open at the end of the fed bytes.
    Partial,
    /// A sequence identified as OSC7 was malformed and discarded.
    Failed(ParseError),
}

/// One parsed (or rejected) OSC7 announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Osc7Event {
    /// Reported host, empty when the URI has no authority (`file:///path`).
    pub hostname: String,
    /// Percent-decoded absolute path without trailing slashes.
    pub path: String,
    pub status: Osc7Status,
}

impl Osc7Event {
    fn success(hostname: String, path: String) -> Self {
        Self {
            hostname,
            path,
            status: Osc7Status::Success,
        }
    }

    fn partial() -> Self {
        Self {
            hostname: String::new(),
            path: String::new(),
            status: Osc7Status::Partial,
        }
    }

    fn failed(err: ParseError) -> Self {
        Self {
            hostname: String::new(),
            path: String::new(),
            status: Osc7Status::Failed(err),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Osc7Status::Success
    }
}

/// Result of a single [`Osc7Parser::feed`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Feed {
    /// Events in stream order. Ends with a `Partial` event when an OSC7
    /// sequence is still open.
    pub events: Vec<Osc7Event>,
    /// Raw bytes of the open OSC7 sequence buffered for the next call.
    pub remainder: Vec<u8>,
}

impl Feed {
    /// Events for sequences that reached a terminator or were aborted.
    pub fn completed(&self) -> impl Iterator<Item = &Osc7Event> {
        self.events
            .iter()
            .filter(|e| e.status != Osc7Status::Partial)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Ground,
    /// `ESC` seen in ground state.
    Escape,
    /// Inside an OSC payload, after `ESC ]`.
    Payload,
    /// `ESC` seen inside a payload; only `\` completes the terminator.
    PayloadEscape,
}

/// Streaming extractor of OSC7 sequences from terminal output.
#[derive(Debug)]
pub struct Osc7Parser {
    state: State,
    payload: Vec<u8>,
    /// Cleared as soon as the payload cannot be an OSC7 sequence.
    candidate: bool,
    overflow: bool,
    pending: Vec<u8>,
}

impl Osc7Parser {
    pub fn new() -> Self {
        Self {
            state: State::Ground,
            payload: Vec::new(),
            candidate: false,
            overflow: false,
            pending: Vec::new(),
        }
    }

    /// Feed a chunk of PTY output.
    ///
    /// Never fails: malformed sequences surface as `Failed` events and other
    /// OSC commands are skipped without an event.
    pub fn feed(&mut self, bytes: &[u8]) -> Feed {
        let mut events = Vec::new();
        for &byte in bytes {
            self.advance(byte, &mut events);
        }
        if self.is_open_osc7() {
            events.push(Osc7Event::partial());
        }
        Feed {
            events,
            remainder: self.pending.clone(),
        }
    }

    /// Drop any buffered partial sequence.
    pub fn clear(&mut self) {
        self.state = State::Ground;
        self.payload.clear();
        self.candidate = false;
        self.overflow = false;
        self.pending.clear();
    }

    fn advance(&mut self, byte: u8, events: &mut Vec<Osc7Event>) {
        match self.state {
            State::Ground => {
                if byte == ESC {
                    self.begin_escape();
                }
            }
            State::Escape => self.after_escape(byte),
            State::Payload => match byte {
                BEL => self.dispatch(events),
                ESC => {
                    self.keep(byte);
                    self.state = State::PayloadEscape;
                }
                CAN | SUB => self.abort(events),
                _ => self.push_payload(byte),
            },
            State::PayloadEscape => {
                if byte == b'\\' {
                    self.dispatch(events);
                } else {
                    // The ESC opened something else; it still counts as an escape.
                    self.abort(events);
                    self.after_escape(byte);
                }
            }
        }
    }

    fn begin_escape(&mut self) {
        self.state = State::Escape;
        self.pending.clear();
        self.pending.push(ESC);
    }

    fn after_escape(&mut self, byte: u8) {
        match byte {
            b']' => {
                self.state = State::Payload;
                self.payload.clear();
                self.candidate = true;
                self.overflow = false;
                self.pending.clear();
                self.pending.extend_from_slice(&[ESC, b']']);
            }
            ESC => self.begin_escape(),
            _ => self.clear(),
        }
    }

    fn keep(&mut self, byte: u8) {
        if self.candidate && !self.overflow {
            self.pending.push(byte);
        }
    }

    fn push_payload(&mut self, byte: u8) {
        if !self.candidate || self.overflow {
            return;
        }
        let expected = match self.payload.len() {
            0 => Some(b'7'),
            1 => Some(b';'),
            _ => None,
        };
        if expected.is_some_and(|e| e != byte) {
            // Another OSC command; skip it up to its terminator.
            self.candidate = false;
            self.pending.clear();
            return;
        }
        if self.payload.len() >= MAX_PAYLOAD_LEN {
            self.overflow = true;
            self.pending.clear();
            return;
        }
        self.keep(byte);
        self.payload.push(byte);
    }

    /// An OSC7 identifier and separator have been seen and no terminator yet.
    fn is_open_osc7(&self) -> bool {
        matches!(self.state, State::Payload | State::PayloadEscape) && self.is_identified()
    }

    fn is_identified(&self) -> bool {
        self.candidate && (self.overflow || self.payload.len() >= 2)
    }

    fn dispatch(&mut self, events: &mut Vec<Osc7Event>) {
        if self.candidate && !self.payload.is_empty() {
            let event = if self.overflow {
                Osc7Event::failed(ParseError::TooLong(MAX_PAYLOAD_LEN))
            } else {
                match self.payload.strip_prefix(b"7;") {
                    Some(uri) => match parse_file_uri(uri) {
                        Ok((hostname, path)) => Osc7Event::success(hostname, path),
                        Err(err) => Osc7Event::failed(err),
                    },
                    None => Osc7Event::failed(ParseError::MissingUri),
                }
            };
            events.push(event);
        }
        self.clear();
    }

    fn abort(&mut self, events: &mut Vec<Osc7Event>) {
        if self.is_identified() {
            events.push(Osc7Event::failed(ParseError::Unterminated));
        }
        self.clear();
    }
}

impl Default for Osc7Parser {
    fn default() -> Self {
        Self::new()
    }
}

/// Split a `file://` URI into `(hostname, path)`.
fn parse_file_uri(uri: &[u8]) -> Result<(String, String), ParseError> {
    if uri.is_empty() {
        return Err(ParseError::MissingUri);
    }
    let text = std::str::from_utf8(uri).map_err(|_| ParseError::InvalidUtf8)?;
    let rest = strip_file_scheme(text).ok_or(ParseError::NotFileUri)?;

    let slash = rest.find('/').ok_or(ParseError::MissingPath)?;
    let (authority, path) = rest.split_at(slash);
    let path = match path.find(['?', '#']) {
        Some(idx) => &path[..idx],
        None => path,
    };

    let hostname = host_of(authority);
    let decoded = percent_decode(path);
    let path = normalize_path(&decoded)?;
    Ok((hostname, path))
}

fn strip_file_scheme(text: &str) -> Option<&str> {
    let scheme = text.get(..7)?;
    scheme
        .eq_ignore_ascii_case("file://")
        .then(|| &text[7..])
}

/// Host part of a URI authority, without user info or port.
fn host_of(authority: &str) -> String {
    let host = authority
        .rsplit_once('@')
        .map_or(authority, |(_, host)| host);
    let host = match host.strip_prefix('[') {
        Some(bracketed) => bracketed.split(']').next().unwrap_or(bracketed),
        None => host.split(':').next().unwrap_or(host),
    };
    percent_decode(host)
}

fn percent_decode(text: &str) -> String {
    String::from_utf8_lossy(&urlencoding::decode_binary(text.as_bytes())).into_owned()
}

fn normalize_path(path: &str) -> Result<String, ParseError> {
    if path.len() > MAX_PATH_LEN {
        return Err(ParseError::TooLong(MAX_PATH_LEN));
    }
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        Ok("/".to_string())
    } else {
        Ok(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed(feed: &Feed) -> Vec<Osc7Event> {
        feed.completed().cloned().collect()
    }

    fn parse_all(bytes: &[u8]) -> Vec<Osc7Event> {
        completed(&Osc7Parser::new().feed(bytes))
    }

    #[test]
    fn test_bel_terminated_sequence() {
        let events = parse_all(b"\x1b]7;file://box/home/user/src\x07");
        assert_eq!(events.len(), 1);
        assert!(events[0].is_success());
        assert_eq!(events[0].hostname, "box");
        assert_eq!(events[0].path, "/home/user/src");
    }

    #[test]
    fn test_st_terminated_sequence() {
        let events = parse_all(b"\x1b]7;file:///tmp/project\x1b\\");
        assert_eq!(events.len(), 1);
        assert!(events[0].is_success());
        assert_eq!(events[0].hostname, "");
        assert_eq!(events[0].path, "/tmp/project");
    }

    #[test]
    fn test_sequence_inside_ordinary_output() {
        let events = parse_all(b"$ ls\r\nfoo bar\r\n\x1b]7;file://box/srv\x07\x1b[32m$ \x1b[0m");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].path, "/srv");
    }

    #[test]
    fn test_percent_decoding() {
        let events = parse_all(b"\x1b]7;file://box/home/user/My%20Docs/caf%C3%A9\x07");
        assert_eq!(events[0].path, "/home/user/My Docs/café");
    }

    #[test]
    fn test_user_and_port_stripped_from_host() {
        let events = parse_all(b"\x1b]7;file://alice@build.example.org:2222/var/log\x07");
        assert_eq!(events[0].hostname, "build.example.org");
        assert_eq!(events[0].path, "/var/log");

        let events = parse_all(b"\x1b]7;file://[::1]:22/opt\x07");
        assert_eq!(events[0].hostname, "::1");
    }

    #[test]
    fn test_trailing_slashes_normalized() {
        assert_eq!(parse_all(b"\x1b]7;file://h/usr/lib/\x07")[0].path, "/usr/lib");
        assert_eq!(parse_all(b"\x1b]7;file://h/\x07")[0].path, "/");
        assert_eq!(parse_all(b"\x1b]7;file://h///\x07")[0].path, "/");
    }

    #[test]
    fn test_query_and_fragment_dropped() {
        let events = parse_all(b"\x1b]7;file://h/srv/www?x=1#top\x07");
        assert_eq!(events[0].path, "/srv/www");
    }

    #[test]
    fn test_scheme_is_case_insensitive() {
        let events = parse_all(b"\x1b]7;FILE://h/etc\x07");
        assert!(events[0].is_success());
        assert_eq!(events[0].path, "/etc");
    }

    #[test]
    fn test_plain_text_pattern_is_not_a_sequence() {
        // No escape introducer: the same bytes as ordinary output.
        assert!(parse_all(b"]7;file://box/etc\x07").is_empty());
        assert!(parse_all(b"echo '7;file:///tmp'\x07").is_empty());
    }

    #[test]
    fn test_other_osc_commands_ignored() {
        assert!(parse_all(b"\x1b]0;window title\x07").is_empty());
        assert!(parse_all(b"\x1b]70;file:///tmp\x07").is_empty());
        assert!(parse_all(b"\x1b]133;A\x1b\\").is_empty());
    }

    #[test]
    fn test_non_file_uri_fails() {
        let events = parse_all(b"\x1b]7;http://box/tmp\x07");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, Osc7Status::Failed(ParseError::NotFileUri));
    }

    #[test]
    fn test_missing_uri_and_path_fail() {
        assert_eq!(
            parse_all(b"\x1b]7;\x07")[0].status,
            Osc7Status::Failed(ParseError::MissingUri)
        );
        assert_eq!(
            parse_all(b"\x1b]7\x07")[0].status,
            Osc7Status::Failed(ParseError::MissingUri)
        );
        assert_eq!(
            parse_all(b"\x1b]7;file://hostonly\x07")[0].status,
            Osc7Status::Failed(ParseError::MissingPath)
        );
    }

    #[test]
    fn test_invalid_utf8_fails() {
        let events = parse_all(b"\x1b]7;file://h/\xff\xfe\x07");
        assert_eq!(events[0].status, Osc7Status::Failed(ParseError::InvalidUtf8));
    }

    #[test]
    fn test_interrupted_sequence_fails_then_recovers() {
        let mut parser = Osc7Parser::new();
        let feed = parser.feed(b"\x1b]7;file:///a\x1b[0m\x1b]7;file:///b\x07");
        let events = completed(&feed);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].status, Osc7Status::Failed(ParseError::Unterminated));
        assert!(events[1].is_success());
        assert_eq!(events[1].path, "/b");
    }

    #[test]
    fn test_escape_inside_payload_can_start_new_sequence() {
        let events = parse_all(b"\x1b]7;file:///a\x1b]7;file:///c\x07");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].status, Osc7Status::Failed(ParseError::Unterminated));
        assert_eq!(events[1].path, "/c");
    }

    #[test]
    fn test_cancel_aborts_sequence() {
        let events = parse_all(b"\x1b]7;file:///a\x18\x1b]7;file:///d\x07");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].status, Osc7Status::Failed(ParseError::Unterminated));
        assert_eq!(events[1].path, "/d");
    }

    #[test]
    fn test_overlong_payload_fails() {
        let mut bytes = b"\x1b]7;file://h/".to_vec();
        bytes.extend(std::iter::repeat(b'a').take(MAX_PAYLOAD_LEN + 10));
        bytes.push(BEL);
        let mut parser = Osc7Parser::new();
        let feed = parser.feed(&bytes);
        let events = completed(&feed);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0].status, Osc7Status::Failed(ParseError::TooLong(_))));
        assert!(feed.remainder.is_empty());
    }

    #[test]
    fn test_decoded_path_too_long_fails() {
        let mut bytes = b"\x1b]7;file://h/".to_vec();
        bytes.extend(std::iter::repeat(b'a').take(MAX_PATH_LEN + 1));
        bytes.push(BEL);
        let events = parse_all(&bytes);
        assert_eq!(
            events[0].status,
            Osc7Status::Failed(ParseError::TooLong(MAX_PATH_LEN))
        );
    }

    #[test]
    fn test_partial_sequence_is_buffered() {
        let mut parser = Osc7Parser::new();
        let first = parser.feed(b"prompt$ \x1b]7;file://box/ho");
        assert_eq!(first.events.len(), 1);
        assert_eq!(first.events[0].status, Osc7Status::Partial);
        assert_eq!(first.remainder, b"\x1b]7;file://box/ho".to_vec());

        let second = parser.feed(b"me/user\x07more output");
        assert!(second.remainder.is_empty());
        let events = completed(&second);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].path, "/home/user");
    }

    #[test]
    fn test_split_inside_string_terminator() {
        let mut parser = Osc7Parser::new();
        let first = parser.feed(b"\x1b]7;file:///srv\x1b");
        assert_eq!(first.remainder, b"\x1b]7;file:///srv\x1b".to_vec());
        let second = parser.feed(b"\\");
        assert_eq!(completed(&second)[0].path, "/srv");
    }

    #[test]
    fn test_skipped_osc_leaves_no_remainder() {
        let mut parser = Osc7Parser::new();
        let feed = parser.feed(b"\x1b]52;c;aGVsbG8=");
        assert!(feed.remainder.is_empty());
        assert!(feed.events.is_empty());
    }

    #[test]
    fn test_clear_drops_partial_state() {
        let mut parser = Osc7Parser::new();
        parser.feed(b"\x1b]7;file:///half");
        parser.clear();
        assert!(parse_continuation(&mut parser, b"way\x07").is_empty());
    }

    fn parse_continuation(parser: &mut Osc7Parser, bytes: &[u8]) -> Vec<Osc7Event> {
        completed(&parser.feed(bytes))
    }

    #[test]
    fn test_every_split_offset_matches_whole_feed() {
        let corpus: &[&[u8]] = &[
            b"\x1b]7;file:///tmp/project\x07",
            b"\x1b]7;file://box.lan/home/u/My%20Docs\x1b\\",
            b"out\x1b]0;title\x07\x1b]7;file://h/a\x07\x1b[1mbold\x1b]7;file://h/b\x1b\\tail",
            b"\x1b]7;http://nope/x\x07\x1b]7;file:///ok\x07",
            b"\x1b]7;file:///cut\x1b[0m\x1b\x1b]7;file:///after\x07",
            b"\x1b\x1b]7;file://[fe80::1]:22/srv/%E2%9C%93/\x07",
        ];

        for sample in corpus {
            let whole = parse_all(sample);
            for offset in 0..=sample.len() {
                let mut parser = Osc7Parser::new();
                let mut split = completed(&parser.feed(&sample[..offset]));
                split.extend(completed(&parser.feed(&sample[offset..])));
                assert_eq!(
                    split, whole,
                    "split at {offset} of {:?} changed the events",
                    String::from_utf8_lossy(sample)
                );
            }
        }
    }
}
