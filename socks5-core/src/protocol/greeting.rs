use super::{ParseOutcome, ParseResult, VERSION};
use crate::error::ProtocolError;

pub const NO_AUTHENTICATION_REQUIRED: u8 = 0x00;
pub const NO_ACCEPTABLE_METHODS: u8 = 0xFF;

/// A parsed `VER | NMETHODS | METHODS` greeting.
#[derive(Debug, Eq, PartialEq, Clone)]
pub struct GreetingMessage {
    pub methods: Vec<u8>,
}

/// Parses a greeting from the front of `buf`. `max_methods` is the configured cap on
/// `NMETHODS`, configurable rather than a hardcoded constant.
pub fn parse_greeting(buf: &[u8], max_methods: u8) -> ParseResult<GreetingMessage> {
    if buf.len() < 2 {
        return Ok(ParseOutcome::Incomplete);
    }
    let version = buf[0];
    if version != VERSION {
        return Err(ProtocolError::UnsupportedVersion(version));
    }
    let nmethods = buf[1];
    if nmethods == 0 {
        return Err(ProtocolError::NoMethodsOffered);
    }
    if nmethods as usize > max_methods as usize {
        return Err(ProtocolError::TooManyMethods { offered: nmethods as usize, max: max_methods as usize });
    }
    let total = 2 + nmethods as usize;
    if buf.len() < total {
        return Ok(ParseOutcome::Incomplete);
    }
    let methods = buf[2..total].to_vec();
    Ok(ParseOutcome::Complete(GreetingMessage { methods }, total))
}

/// Picks the first mutually acceptable method in the order the client offered them. Only
/// "no authentication required" is ever honored (see the crate's Non-goals).
pub fn choose_method(methods: &[u8]) -> Option<u8> {
    methods.iter().copied().find(|&m| m == NO_AUTHENTICATION_REQUIRED)
}

/// Encodes the 2-byte method-selection reply: `VER | METHOD`.
pub fn encode_method_choice(method: u8) -> [u8; 2] {
    [VERSION, method]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_happy_greeting() {
        let buf = [0x05, 0x01, 0x00];
        let outcome = parse_greeting(&buf, 8).unwrap();
        assert_eq!(outcome, ParseOutcome::Complete(GreetingMessage { methods: vec![0x00] }, 3));
    }

    #[test]
    fn requests_more_bytes_on_truncated_header() {
        let buf = [0x05];
        assert_eq!(parse_greeting(&buf, 8).unwrap(), ParseOutcome::Incomplete);
    }

    #[test]
    fn requests_more_bytes_when_methods_not_fully_arrived() {
        let buf = [0x05, 0x02, 0x00];
        assert_eq!(parse_greeting(&buf, 8).unwrap(), ParseOutcome::Incomplete);
    }

    #[test]
    fn rejects_wrong_version() {
        let buf = [0x04, 0x01, 0x00];
        assert_eq!(parse_greeting(&buf, 8), Err(ProtocolError::UnsupportedVersion(0x04)));
    }

    #[test]
    fn rejects_zero_methods() {
        let buf = [0x05, 0x00];
        assert_eq!(parse_greeting(&buf, 8), Err(ProtocolError::NoMethodsOffered));
    }

    #[test]
    fn rejects_methods_past_configured_cap() {
        let mut buf = vec![0x05, 0x09];
        buf.extend_from_slice(&[0u8; 9]);
        assert_eq!(parse_greeting(&buf, 8), Err(ProtocolError::TooManyMethods { offered: 9, max: 8 }));
    }

    #[test]
    fn accepts_methods_exactly_at_cap() {
        let mut buf = vec![0x05, 0x08];
        buf.extend_from_slice(&[0x02u8; 8]);
        let outcome = parse_greeting(&buf, 8).unwrap();
        assert_eq!(outcome, ParseOutcome::Complete(GreetingMessage { methods: vec![0x02; 8] }, 10));
    }

    #[test]
    fn choose_method_prefers_no_auth_when_present() {
        assert_eq!(choose_method(&[0x01, 0x00, 0x02]), Some(0x00));
    }

    #[test]
    fn choose_method_none_when_absent() {
        assert_eq!(choose_method(&[0x01, 0x02]), None);
    }

    #[test]
    fn method_choice_round_trips() {
        let encoded = encode_method_choice(0x00);
        let parsed = parse_greeting(&[VERSION, 1, encoded[1]], 8).unwrap();
        assert_eq!(parsed, ParseOutcome::Complete(GreetingMessage { methods: vec![0x00] }, 3));
    }

    #[test]
    fn incremental_prefixes_never_flip_from_ok_to_error() {
        let buf = [0x05, 0x03, 0x00, 0x01, 0x02];
        let mut saw_complete = false;
        for k in 0..=buf.len() {
            let outcome = parse_greeting(&buf[..k], 8);
            if saw_complete {
                panic!("parser made progress after already returning Complete");
            }
            if let Ok(ParseOutcome::Complete(..)) = outcome {
                saw_complete = true;
            }
        }
        assert!(saw_complete);
    }
}
