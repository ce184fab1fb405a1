//! Line-level SDP session decoding (RFC 8866 Section 5)
//!
//! Only the `<type>=<value>` framing is checked. Values stay raw bytes; the
//! correlator interprets the attribute lines it cares about.

use std::fmt;

use serde::Serialize;

use crate::error::SdpError;

/// Type letter of attribute lines
pub const ATTRIBUTE: char = 'a';

/// One `<type>=<value>` line
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Line {
    pub kind: char,
    #[serde(serialize_with = "serialize_lossy")]
    pub value: Vec<u8>,
}

impl Line {
    pub fn new(kind: char, value: impl Into<Vec<u8>>) -> Self {
        Self { kind, value: value.into() }
    }

    pub fn is_attribute(&self) -> bool {
        self.kind == ATTRIBUTE
    }

    /// Attribute value starts with `prefix` (byte comparison)
    pub fn has_prefix(&self, prefix: &[u8]) -> bool {
        self.value.starts_with(prefix)
    }

    pub fn value_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.value)
    }
}

impl fmt::Display for Line {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.kind, self.value_lossy())
    }
}

fn serialize_lossy<S: serde::Serializer>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(value))
}

/// Decoded session: every line in wire order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Session {
    lines: Vec<Line>,
}

impl Session {
    pub fn new(lines: Vec<Line>) -> Self {
        Self { lines }
    }

    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Line> {
        self.lines.iter()
    }

    /// Attribute lines only
    pub fn attributes(&self) -> impl Iterator<Item = &Line> {
        self.lines.iter().filter(|l| l.is_attribute())
    }
}

impl<'a> IntoIterator for &'a Session {
    type Item = &'a Line;
    type IntoIter = std::slice::Iter<'a, Line>;

    fn into_iter(self) -> Self::IntoIter {
        self.lines.iter()
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            write!(f, "{}\r\n", line)?;
        }
        Ok(())
    }
}

/// Split `data` into lines (CRLF or bare LF) and check each one's framing
///
/// Blank lines are skipped. A body with no lines at all is [`SdpError::Empty`].
pub fn decode_session(data: &[u8]) -> Result<Session, SdpError> {
    let mut lines = Vec::new();

    for (index, raw) in data.split(|&b| b == b'\n').enumerate() {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        if raw.is_empty() {
            continue;
        }

        match raw {
            [kind, b'=', value @ ..] if kind.is_ascii_alphabetic() => {
                lines.push(Line::new(*kind as char, value));
            }
            _ => {
                return Err(SdpError::MalformedLine {
                    line: index + 1,
                    content: String::from_utf8_lossy(raw).into_owned(),
                })
            }
        }
    }

    if lines.is_empty() {
        return Err(SdpError::Empty);
    }
    Ok(Session::new(lines))
}

#[cfg(test)]
mod tests {
    use super::*;

    const OFFER: &str = "v=0\r\n\
        o=- 4611731400430051336 2 IN IP4 127.0.0.1\r\n\
        s=-\r\n\
        t=0 0\r\n\
        m=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n\
        c=IN IP4 0.0.0.0\r\n\
        a=candidate:842163049 1 udp 1677729535 203.0.113.5 4000 typ srflx raddr 10.0.0.7 rport 54321\r\n\
        a=ice-ufrag:EsAw\r\n";

    #[test]
    fn test_decode_offer() {
        let session = decode_session(OFFER.as_bytes()).unwrap();

        assert_eq!(session.len(), 8);
        assert_eq!(session.lines()[0], Line::new('v', "0"));
        assert_eq!(session.lines()[5].kind, 'c');

        let attributes: Vec<_> = session.attributes().collect();
        assert_eq!(attributes.len(), 2);
        assert!(attributes[0].has_prefix(b"candidate"));
        assert!(!attributes[1].has_prefix(b"candidate"));

        assert_eq!(session.to_string(), OFFER);
    }

    #[test]
    fn test_bare_newlines_and_blank_lines() {
        let session = decode_session(b"v=0\n\na=sendrecv\n").unwrap();
        assert_eq!(session.len(), 2);
        assert!(session.lines()[1].is_attribute());

        let session = decode_session(b"a=").unwrap();
        assert_eq!(session.lines()[0].value, Vec::<u8>::new());
    }

    #[test]
    fn test_malformed() {
        assert_eq!(decode_session(b"").unwrap_err(), SdpError::Empty);
        assert_eq!(decode_session(b"\r\n\r\n").unwrap_err(), SdpError::Empty);
        assert_eq!(
            decode_session(b"v=0\r\nnot a line\r\n").unwrap_err(),
            SdpError::MalformedLine {
                line: 2,
                content: "not a line".to_string()
            }
        );
        assert!(decode_session(b"1=0").is_err());
    }
}
