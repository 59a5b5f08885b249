use std::fmt;

use crate::error::{ParseErrorKind, Result, RtspError};
use crate::session::transport::TransportHeader;

/// A parsed RTSP request (RFC 2326 §6).
///
/// RTSP requests follow HTTP/1.1 syntax:
///
/// ```text
/// Method SP Request-URI SP RTSP-Version CRLF
/// *(Header: Value CRLF)
/// CRLF
/// [body]
/// ```
///
/// Header lookup is case-insensitive per RFC 2326 §4.2. The body is
/// whatever follows the blank line; the connection reader has already
/// trimmed it to `Content-Length` bytes.
#[derive(Debug)]
pub struct RtspRequest {
    /// RTSP method (OPTIONS, DESCRIBE, SETUP, PLAY, etc.).
    pub method: String,
    /// Request-URI (e.g. `rtsp://host:port/stream/track1`).
    pub uri: String,
    /// Protocol version (expected: `RTSP/1.0`).
    pub version: String,
    /// Headers as ordered (name, value) pairs. Names are stored as-received;
    /// lookups via [`get_header`](Self::get_header) are case-insensitive.
    pub headers: Vec<(String, String)>,
    /// Message body, if any (e.g. GET_PARAMETER parameter names).
    pub body: Option<String>,
}

impl RtspRequest {
    /// Parse an RTSP request from its text representation.
    ///
    /// Expects a complete request: request line, headers, trailing blank
    /// line and optional body. Returns [`RtspError::Parse`] on malformed input.
    pub fn parse(raw: &str) -> Result<Self> {
        let (head, body) = match raw.find("\r\n\r\n") {
            Some(pos) => (&raw[..pos], &raw[pos + 4..]),
            None => match raw.find("\n\n") {
                Some(pos) => (&raw[..pos], &raw[pos + 2..]),
                None => (raw, ""),
            },
        };

        let mut lines = head.lines();

        let request_line = lines
            .next()
            .filter(|line| !line.trim().is_empty())
            .ok_or(ParseErrorKind::EmptyRequest)?;

        let parts: Vec<&str> = request_line.split_whitespace().collect();

        if parts.len() != 3 {
            return Err(ParseErrorKind::InvalidRequestLine.into());
        }

        let method = parts[0].to_string();
        let uri = parts[1].to_string();
        let version = parts[2].to_string();

        if !version.starts_with("RTSP/") {
            return Err(ParseErrorKind::InvalidRequestLine.into());
        }
        if version != "RTSP/1.0" {
            tracing::warn!(version, "client sent non-RTSP/1.0 version");
        }

        let mut headers = Vec::new();

        for line in lines {
            if line.is_empty() {
                break;
            }

            let colon_pos = line.find(':').ok_or(ParseErrorKind::InvalidHeader)?;

            let name = line[..colon_pos].trim().to_string();
            let value = line[colon_pos + 1..].trim().to_string();

            headers.push((name, value));
        }

        Ok(RtspRequest {
            method,
            uri,
            version,
            headers,
            body: (!body.is_empty()).then(|| body.to_string()),
        })
    }

    /// Look up a header value by name (case-insensitive, per RFC 2326 §4.2).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Returns the CSeq header value, which numbers and orders RTSP
    /// request/response pairs (RFC 2326 §12.17).
    ///
    /// Every RTSP request must include a CSeq, and the response must echo it.
    pub fn cseq(&self) -> Option<&str> {
        self.get_header("CSeq")
    }

    /// Declared body length, `0` when absent.
    pub fn content_length(&self) -> Result<usize> {
        match self.get_header("Content-Length") {
            Some(value) => value
                .parse()
                .map_err(|_| RtspError::from(ParseErrorKind::InvalidContentLength)),
            None => Ok(0),
        }
    }
}

/// RTSP methods understood by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtspMethod {
    Options,
    Describe,
    Setup,
    Play,
    Pause,
    Teardown,
    GetParameter,
    /// Anything else; answered with `501 Not Implemented`.
    Unknown(String),
}

impl RtspMethod {
    pub fn parse(method: &str) -> Self {
        match method {
            "OPTIONS" => Self::Options,
            "DESCRIBE" => Self::Describe,
            "SETUP" => Self::Setup,
            "PLAY" => Self::Play,
            "PAUSE" => Self::Pause,
            "TEARDOWN" => Self::Teardown,
            "GET_PARAMETER" => Self::GetParameter,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Options => "OPTIONS",
            Self::Describe => "DESCRIBE",
            Self::Setup => "SETUP",
            Self::Play => "PLAY",
            Self::Pause => "PAUSE",
            Self::Teardown => "TEARDOWN",
            Self::GetParameter => "GET_PARAMETER",
            Self::Unknown(other) => other,
        }
    }
}

impl fmt::Display for RtspMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Request-URI split into `proto://host_port` and `suffix`.
///
/// `rtsp://10.0.0.5:554/stream1/track1` becomes proto `rtsp`, host_port
/// `10.0.0.5:554`, suffix `/stream1/track1`. A URI without a scheme
/// (`*`, or a bare path) is kept whole as the suffix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RtspUrl {
    pub proto: String,
    pub host_port: String,
    pub suffix: String,
}

impl RtspUrl {
    pub fn parse(uri: &str) -> Self {
        match uri.split_once("://") {
            Some((proto, rest)) => {
                let (host_port, suffix) = match rest.find('/') {
                    Some(pos) => (&rest[..pos], &rest[pos..]),
                    None => (rest, ""),
                };
                Self {
                    proto: proto.to_ascii_lowercase(),
                    host_port: host_port.to_string(),
                    suffix: suffix.to_string(),
                }
            }
            None => Self {
                suffix: uri.to_string(),
                ..Self::default()
            },
        }
    }

    /// Host part of `host_port`, without the port or IPv6 brackets.
    pub fn host(&self) -> &str {
        let host_port = self.host_port.as_str();
        if let Some(rest) = host_port.strip_prefix('[') {
            return rest.split(']').next().unwrap_or(rest);
        }
        host_port.split(':').next().unwrap_or(host_port)
    }

    /// URL without the suffix, e.g. `rtsp://10.0.0.5:554`.
    pub fn base(&self) -> String {
        format!("{}://{}", self.proto, self.host_port)
    }
}

/// The fields of a request the session state machine acts on.
#[derive(Debug, Clone)]
pub struct RtspCommand {
    pub method: RtspMethod,
    pub cseq: Option<u32>,
    pub uri: String,
    pub url: RtspUrl,
    /// Raw `Transport` header; parsed on demand by [`transport`](Self::transport).
    pub transport: Option<String>,
    pub authorization: Option<String>,
    /// Session ID from the `Session` header, without `;timeout=`.
    pub session: Option<String>,
}

impl RtspCommand {
    pub fn from_request(request: &RtspRequest) -> Self {
        RtspCommand {
            method: RtspMethod::parse(&request.method),
            cseq: request.cseq().and_then(|c| c.trim().parse().ok()),
            uri: request.uri.clone(),
            url: RtspUrl::parse(&request.uri),
            transport: request.get_header("Transport").map(str::to_string),
            authorization: request.get_header("Authorization").map(str::to_string),
            session: request
                .get_header("Session")
                .map(|s| s.split(';').next().unwrap_or(s).trim().to_string()),
        }
    }

    /// Parse the `Transport` header, `None` when the request has none.
    pub fn transport(&self) -> Option<Result<TransportHeader>> {
        self.transport.as_deref().map(TransportHeader::parse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_options_request() {
        let raw = "OPTIONS rtsp://localhost:8554/test RTSP/1.0\r\nCSeq: 1\r\n\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.method, "OPTIONS");
        assert_eq!(req.uri, "rtsp://localhost:8554/test");
        assert_eq!(req.version, "RTSP/1.0");
        assert_eq!(req.cseq(), Some("1"));
        assert!(req.body.is_none());
    }

    #[test]
    fn parse_setup_with_transport() {
        let raw = "SETUP rtsp://localhost:8554/test/track1 RTSP/1.0\r\n\
                   CSeq: 3\r\n\
                   Transport: RTP/AVP;unicast;client_port=8000-8001\r\n\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.method, "SETUP");
        assert_eq!(req.cseq(), Some("3"));
        assert_eq!(
            req.get_header("Transport"),
            Some("RTP/AVP;unicast;client_port=8000-8001")
        );
    }

    #[test]
    fn parse_body() {
        let raw = "GET_PARAMETER rtsp://localhost/test RTSP/1.0\r\n\
                   CSeq: 9\r\n\
                   Content-Length: 8\r\n\r\n\
                   position";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.content_length().unwrap(), 8);
        assert_eq!(req.body.as_deref(), Some("position"));
    }

    #[test]
    fn bad_content_length() {
        let raw = "OPTIONS * RTSP/1.0\r\nContent-Length: lots\r\n\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert!(req.content_length().is_err());
    }

    #[test]
    fn parse_empty_request() {
        assert!(matches!(
            RtspRequest::parse(""),
            Err(RtspError::Parse {
                kind: ParseErrorKind::EmptyRequest
            })
        ));
    }

    #[test]
    fn parse_invalid_request_line() {
        assert!(RtspRequest::parse("JUST_A_METHOD\r\n\r\n").is_err());
        assert!(RtspRequest::parse("GET / HTTP/1.1\r\n\r\n").is_err());
    }

    #[test]
    fn parse_invalid_header() {
        let raw = "OPTIONS * RTSP/1.0\r\nno colon here\r\n\r\n";
        assert!(matches!(
            RtspRequest::parse(raw),
            Err(RtspError::Parse {
                kind: ParseErrorKind::InvalidHeader
            })
        ));
    }

    #[test]
    fn header_lookup_case_insensitive() {
        let raw = "OPTIONS rtsp://localhost RTSP/1.0\r\ncseq: 42\r\n\r\n";
        let req = RtspRequest::parse(raw).unwrap();
        assert_eq!(req.get_header("CSeq"), Some("42"));
        assert_eq!(req.get_header("cseq"), Some("42"));
        assert_eq!(req.get_header("CSEQ"), Some("42"));
    }

    #[test]
    fn url_parts() {
        let url = RtspUrl::parse("rtsp://10.0.0.5:554/stream1/track1");
        assert_eq!(url.proto, "rtsp");
        assert_eq!(url.host_port, "10.0.0.5:554");
        assert_eq!(url.suffix, "/stream1/track1");
        assert_eq!(url.host(), "10.0.0.5");
        assert_eq!(url.base(), "rtsp://10.0.0.5:554");

        let url = RtspUrl::parse("rtsps://[::1]:322");
        assert_eq!(url.proto, "rtsps");
        assert_eq!(url.host(), "::1");
        assert_eq!(url.suffix, "");

        let url = RtspUrl::parse("*");
        assert_eq!(url.suffix, "*");
        assert!(url.host_port.is_empty());
    }

    #[test]
    fn command_from_request() {
        let raw = "PLAY rtsp://cam/live RTSP/1.0\r\n\
                   CSeq: 5\r\n\
                   Session: ABCD1234;timeout=60\r\n\
                   Authorization: Basic YWxpY2U6c2VjcmV0\r\n\r\n";
        let cmd = RtspCommand::from_request(&RtspRequest::parse(raw).unwrap());
        assert_eq!(cmd.method, RtspMethod::Play);
        assert_eq!(cmd.cseq, Some(5));
        assert_eq!(cmd.url.suffix, "/live");
        assert_eq!(cmd.session.as_deref(), Some("ABCD1234"));
        assert_eq!(cmd.authorization.as_deref(), Some("Basic YWxpY2U6c2VjcmV0"));
        assert!(cmd.transport().is_none());
    }

    #[test]
    fn unknown_method() {
        assert_eq!(
            RtspMethod::parse("RECORD"),
            RtspMethod::Unknown("RECORD".to_string())
        );
        assert_eq!(RtspMethod::parse("GET_PARAMETER").as_str(), "GET_PARAMETER");
    }
}
