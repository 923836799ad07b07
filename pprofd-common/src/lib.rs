//! # Symbol Table Wire Protocol
//!
//! Shared between the `/symbol` endpoint (server side) and the profile
//! pipeline's symbolization client. The protocol is the plain-text one spoken
//! by `pprof` tooling:
//!
//! ```text
//! request:   0x4a8f10+0x4a9020+12345          (GET query string or POST body)
//! response:  num_symbols: 1
//!            0x4a8f10 my_crate::worker::run
//!            0x4a9020 my_crate::worker::spin
//! ```
//!
//! ## Key Items
//!
//! - [`parse_program_counter`] - Token → counter, with base prefixes
//! - [`TokenSplitter`] - Incremental `+` tokenizer for streamed request bodies
//! - [`encode_symbol_request`] / [`format_symbol_line`] - Writers
//! - [`parse_symbol_response`] - Client-side response decoder

use thiserror::Error;

/// Prefix of the header line that opens every symbol response
///
/// Callers only distinguish zero (no symbol information) from non-zero.
pub const NUM_SYMBOLS_PREFIX: &str = "num_symbols:";

/// Prefix of an inline error line reporting a failed request body read
pub const READ_ERROR_PREFIX: &str = "reading request:";

/// Token separator in symbol requests
pub const TOKEN_SEPARATOR: u8 = b'+';

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("symbol response is missing the num_symbols header")]
    MissingHeader,

    #[error("invalid num_symbols header: {0}")]
    InvalidHeader(String),

    #[error("malformed symbol line: {0}")]
    MalformedLine(String),
}

/// Parse a program counter token
///
/// Accepts the same forms as an unsigned integer literal with an optional base
/// prefix: `0x`/`0X` (hex), `0o`/`0O` (octal), `0b`/`0B` (binary), a bare
/// leading `0` (octal), otherwise decimal. Surrounding ASCII whitespace is
/// ignored. Returns `None` for anything that does not parse.
#[must_use]
pub fn parse_program_counter(token: &[u8]) -> Option<u64> {
    let text = std::str::from_utf8(token).ok()?.trim();

    let (digits, radix) = if let Some(rest) = strip_prefix_ignore_case(text, "0x") {
        (rest, 16)
    } else if let Some(rest) = strip_prefix_ignore_case(text, "0o") {
        (rest, 8)
    } else if let Some(rest) = strip_prefix_ignore_case(text, "0b") {
        (rest, 2)
    } else if text.len() > 1 && text.starts_with('0') {
        (&text[1..], 8)
    } else {
        (text, 10)
    };

    // from_str_radix tolerates a leading sign, the protocol does not
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return None;
    }

    u64::from_str_radix(digits, radix).ok()
}

fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    if text.len() >= prefix.len() && text[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&text[prefix.len()..])
    } else {
        None
    }
}

/// Incremental tokenizer for `+`-delimited request bodies
///
/// Bodies arrive in arbitrary chunks, so a token may straddle two chunks. The
/// splitter buffers the unterminated tail until the next separator or
/// [`TokenSplitter::finish`].
#[derive(Debug, Default)]
pub struct TokenSplitter {
    pending: Vec<u8>,
}

impl TokenSplitter {
    /// Create an empty splitter
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, invoking `on_token` for every token it completes
    pub fn push<F: FnMut(&[u8])>(&mut self, chunk: &[u8], mut on_token: F) {
        let mut rest = chunk;

        while let Some(pos) = rest.iter().position(|&b| b == TOKEN_SEPARATOR) {
            if self.pending.is_empty() {
                on_token(&rest[..pos]);
            } else {
                self.pending.extend_from_slice(&rest[..pos]);
                on_token(&self.pending);
                self.pending.clear();
            }
            rest = &rest[pos + 1..];
        }

        self.pending.extend_from_slice(rest);
    }

    /// Flush the final token (the last one is not followed by a separator)
    pub fn finish<F: FnMut(&[u8])>(self, mut on_token: F) {
        if !self.pending.is_empty() {
            on_token(&self.pending);
        }
    }
}

/// Encode program counters as a symbol request body
#[must_use]
pub fn encode_symbol_request(pcs: &[u64]) -> String {
    pcs.iter().map(|pc| format!("{pc:#x}")).collect::<Vec<_>>().join("+")
}

/// Format one resolved symbol line (`0x<hex> <name>\n`)
#[must_use]
pub fn format_symbol_line(pc: u64, name: &str) -> String {
    format!("{pc:#x} {name}\n")
}

/// Format the response header line
#[must_use]
pub fn format_num_symbols(available: bool) -> String {
    format!("{NUM_SYMBOLS_PREFIX} {}\n", u8::from(available))
}

/// Decoded symbol response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolResponse {
    /// Value of the `num_symbols` header
    pub num_symbols: u64,
    /// Resolved (address, function name) pairs, in response order
    pub symbols: Vec<(u64, String)>,
    /// Inline `reading request:` errors reported by the server
    pub errors: Vec<String>,
}

impl SymbolResponse {
    /// Whether the server has any symbol information at all
    #[must_use]
    pub fn has_symbols(&self) -> bool {
        self.num_symbols > 0
    }
}

/// Decode a symbol response body
///
/// # Errors
/// Returns an error if the `num_symbols` header is missing or malformed, or if
/// a symbol line does not start with a parsable address.
pub fn parse_symbol_response(text: &str) -> Result<SymbolResponse, ProtocolError> {
    let mut lines = text.lines().filter(|line| !line.trim().is_empty());

    let header = lines.next().ok_or(ProtocolError::MissingHeader)?;
    let count = header.strip_prefix(NUM_SYMBOLS_PREFIX).ok_or(ProtocolError::MissingHeader)?;
    let num_symbols =
        count.trim().parse::<u64>().map_err(|_| ProtocolError::InvalidHeader(header.to_string()))?;

    let mut response = SymbolResponse { num_symbols, ..SymbolResponse::default() };

    for line in lines {
        if let Some(error) = line.strip_prefix(READ_ERROR_PREFIX) {
            response.errors.push(error.trim().to_string());
            continue;
        }

        let (addr, name) =
            line.split_once(' ').ok_or_else(|| ProtocolError::MalformedLine(line.to_string()))?;
        let pc = parse_program_counter(addr.as_bytes())
            .ok_or_else(|| ProtocolError::MalformedLine(line.to_string()))?;

        response.symbols.push((pc, name.trim().to_string()));
    }

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_program_counter_bases() {
        assert_eq!(parse_program_counter(b"12345"), Some(12345));
        assert_eq!(parse_program_counter(b"0x4a8f10"), Some(0x004a_8f10));
        assert_eq!(parse_program_counter(b"0X4A8F10"), Some(0x004a_8f10));
        assert_eq!(parse_program_counter(b"0o17"), Some(0o17));
        assert_eq!(parse_program_counter(b"017"), Some(0o17));
        assert_eq!(parse_program_counter(b"0b101"), Some(5));
        assert_eq!(parse_program_counter(b"0"), Some(0));
    }

    #[test]
    fn test_parse_program_counter_rejects_garbage() {
        assert_eq!(parse_program_counter(b"badtoken"), None);
        assert_eq!(parse_program_counter(b""), None);
        assert_eq!(parse_program_counter(b"0x"), None);
        assert_eq!(parse_program_counter(b"-5"), None);
        assert_eq!(parse_program_counter(b"089"), None);
        assert_eq!(parse_program_counter(b"18446744073709551616"), None);
    }

    #[test]
    fn test_splitter_handles_tokens_across_chunks() {
        let mut tokens = Vec::new();
        let mut splitter = TokenSplitter::new();

        splitter.push(b"0x10+0x2", |t| tokens.push(t.to_vec()));
        splitter.push(b"0+30", |t| tokens.push(t.to_vec()));
        splitter.finish(|t| tokens.push(t.to_vec()));

        assert_eq!(tokens, vec![b"0x10".to_vec(), b"0x20".to_vec(), b"30".to_vec()]);
    }

    #[test]
    fn test_splitter_trailing_separator() {
        let mut tokens = Vec::new();
        let mut splitter = TokenSplitter::new();

        splitter.push(b"1+2+", |t| tokens.push(t.to_vec()));
        splitter.finish(|t| tokens.push(t.to_vec()));

        assert_eq!(tokens, vec![b"1".to_vec(), b"2".to_vec()]);
    }

    #[test]
    fn test_encode_request() {
        assert_eq!(encode_symbol_request(&[0x10, 0x2f]), "0x10+0x2f");
        assert_eq!(encode_symbol_request(&[]), "");
    }

    #[test]
    fn test_parse_response() {
        let body = "num_symbols: 1\n0x10 main\n0x2f my_crate::worker::spin\n";
        let response = parse_symbol_response(body).unwrap();

        assert!(response.has_symbols());
        assert_eq!(
            response.symbols,
            vec![(0x10, "main".to_string()), (0x2f, "my_crate::worker::spin".to_string())]
        );
        assert!(response.errors.is_empty());
    }

    #[test]
    fn test_parse_response_with_read_error() {
        let body = "num_symbols: 1\n0x10 main\nreading request: connection reset\n";
        let response = parse_symbol_response(body).unwrap();

        assert_eq!(response.symbols.len(), 1);
        assert_eq!(response.errors, vec!["connection reset".to_string()]);
    }

    #[test]
    fn test_parse_response_requires_header() {
        assert_eq!(parse_symbol_response(""), Err(ProtocolError::MissingHeader));
        assert_eq!(parse_symbol_response("0x10 main\n"), Err(ProtocolError::MissingHeader));
        assert!(matches!(
            parse_symbol_response("num_symbols: many\n"),
            Err(ProtocolError::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_header_roundtrip() {
        let header = format_num_symbols(true);
        assert_eq!(header, "num_symbols: 1\n");
        assert!(!parse_symbol_response(&format_num_symbols(false)).unwrap().has_symbols());
    }
}
