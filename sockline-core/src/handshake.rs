//! WebSocket handshake implementation
//!
//! Server side of the RFC 6455 opening handshake: read the client's HTTP
//! upgrade request, derive the accept token from `Sec-WebSocket-Key`, and
//! answer with `101 Switching Protocols`.

use crate::error::{Error, ProtocolError, Result};
use crate::protocol::constants::*;
use crate::protocol::http_header::*;
use crate::protocol::http_status::*;
use crate::protocol::http_value;
use base64::{engine::general_purpose, Engine as _};
use sha1::{Digest, Sha1};

#[cfg(feature = "tokio-runtime")]
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// WebSocket handshake request information
#[derive(Debug, Clone)]
pub struct HandshakeRequest {
    /// HTTP method (should be GET)
    pub method: String,
    /// Requested resource path
    pub path: String,
    /// HTTP headers in the order they were received
    pub headers: Vec<(String, String)>,
}

impl HandshakeRequest {
    /// Look up a header value, ignoring the name's case
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// The client's `Sec-WebSocket-Key`
    pub fn key(&self) -> Option<&str> {
        self.header(SEC_WEBSOCKET_KEY)
    }

    /// Subprotocol token carried by the request path, without the leading `/`
    pub fn path_token(&self) -> Option<&str> {
        let token = self.path.strip_prefix('/').unwrap_or(&self.path);
        if token.is_empty() {
            None
        } else {
            Some(token)
        }
    }

    /// First subprotocol the client offered in `Sec-WebSocket-Protocol`
    pub fn offered_protocol(&self) -> Option<&str> {
        self.header(SEC_WEBSOCKET_PROTOCOL)?
            .split(',')
            .map(str::trim)
            .find(|p| !p.is_empty())
    }
}

/// WebSocket handshake response information
#[derive(Debug, Clone)]
pub struct HandshakeResponse {
    /// HTTP status code
    pub status: u16,
    /// HTTP status message
    pub status_message: String,
    /// HTTP headers, written in order
    pub headers: Vec<(String, String)>,
}

impl HandshakeResponse {
    /// Look up a header value, ignoring the name's case
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// WebSocket handshake configuration
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Echo the request path as the subprotocol when the client offers none
    pub echo_path_as_protocol: bool,
    /// Additional headers appended to the 101 response
    pub extra_headers: Vec<(String, String)>,
    /// Upper bound on the request line plus headers
    pub max_header_size: usize,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            echo_path_as_protocol: true,
            extra_headers: Vec::new(),
            max_header_size: MAX_HEADER_SIZE,
        }
    }
}

/// Outcome of a successful server handshake
#[derive(Debug, Clone)]
pub struct Handshake {
    /// The parsed client request
    pub request: HandshakeRequest,
    /// Subprotocol echoed back to the client, if any
    pub protocol: Option<String>,
}

/// Compute WebSocket accept key from client key
pub fn compute_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WEBSOCKET_MAGIC.as_bytes());
    general_purpose::STANDARD.encode(hasher.finalize())
}

/// Parse a complete client upgrade request (request line through blank line)
pub fn parse_client_handshake(request: &[u8]) -> Result<HandshakeRequest> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);

    match req.parse(request) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => {
            return Err(ProtocolError::InvalidFormat("incomplete request".to_string()).into())
        }
        Err(e) => return Err(ProtocolError::InvalidFormat(e.to_string()).into()),
    }

    let method = req.method.unwrap_or_default().to_string();
    if method != "GET" {
        return Err(ProtocolError::InvalidMethod(method).into());
    }

    let path = req.path.unwrap_or("/").to_string();
    let headers = req
        .headers
        .iter()
        .map(|h| {
            (
                h.name.to_string(),
                String::from_utf8_lossy(h.value).trim().to_string(),
            )
        })
        .collect();

    Ok(HandshakeRequest {
        method,
        path,
        headers,
    })
}

/// Pick the subprotocol to echo back for `request`
pub fn negotiate_protocol(request: &HandshakeRequest, config: &HandshakeConfig) -> Option<String> {
    if let Some(offered) = request.offered_protocol() {
        return Some(offered.to_string());
    }
    if config.echo_path_as_protocol {
        return request.path_token().map(str::to_string);
    }
    None
}

/// Create a server handshake response
pub fn create_server_handshake(
    request: &HandshakeRequest,
    config: &HandshakeConfig,
) -> Result<HandshakeResponse> {
    let key = request
        .key()
        .filter(|key| !key.is_empty())
        .ok_or_else(|| ProtocolError::MissingHeader(SEC_WEBSOCKET_KEY.to_string()))?;

    let mut headers = vec![
        (UPGRADE.to_string(), http_value::WEBSOCKET.to_string()),
        (CONNECTION.to_string(), http_value::UPGRADE.to_string()),
        (SEC_WEBSOCKET_ACCEPT.to_string(), compute_accept_key(key)),
    ];

    if let Some(protocol) = negotiate_protocol(request, config) {
        headers.push((SEC_WEBSOCKET_PROTOCOL.to_string(), protocol));
    }

    headers.extend(config.extra_headers.iter().cloned());

    Ok(HandshakeResponse {
        status: SWITCHING_PROTOCOLS,
        status_message: "Switching Protocols".to_string(),
        headers,
    })
}

/// Response written when an upgrade request is rejected
pub fn bad_request_response() -> HandshakeResponse {
    HandshakeResponse {
        status: BAD_REQUEST,
        status_message: "Bad Request".to_string(),
        headers: vec![
            ("Content-Length".to_string(), "0".to_string()),
            (CONNECTION.to_string(), "close".to_string()),
        ],
    }
}

/// Convert handshake response to HTTP string
pub fn response_to_string(response: &HandshakeResponse) -> String {
    let mut out = format!("HTTP/1.1 {} {}\r\n", response.status, response.status_message);
    for (key, value) in &response.headers {
        out.push_str(key);
        out.push_str(": ");
        out.push_str(value);
        out.push_str("\r\n");
    }
    out.push_str("\r\n");
    out
}

/// Read request lines up to and including the blank terminator line.
///
/// Never consumes past the terminator, so frame bytes the client pipelines
/// behind the request stay in `reader`'s buffer.
#[cfg(feature = "tokio-runtime")]
pub async fn read_request<R>(reader: &mut R, max_size: usize) -> Result<Vec<u8>>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let mut request = Vec::with_capacity(512);
    loop {
        let remaining = max_size.saturating_sub(request.len());
        if remaining == 0 {
            return Err(ProtocolError::RequestTooLarge { max: max_size }.into());
        }

        let start = request.len();
        let n = (&mut *reader)
            .take(remaining as u64)
            .read_until(b'\n', &mut request)
            .await?;
        if n == 0 {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed during handshake",
            )));
        }

        let line = &request[start..];
        if line == b"\r\n" || line == b"\n" {
            return Ok(request);
        }
    }
}

/// Run the server handshake on `stream`: read the request, write the 101.
///
/// Nothing is written when the request is rejected; the caller decides
/// whether to answer with [`bad_request_response`].
#[cfg(feature = "tokio-runtime")]
pub async fn negotiate<S>(stream: &mut S, config: &HandshakeConfig) -> Result<Handshake>
where
    S: AsyncBufRead + AsyncWrite + Unpin + ?Sized,
{
    let raw = read_request(stream, config.max_header_size).await?;
    let request = parse_client_handshake(&raw)?;
    let response = create_server_handshake(&request, config)?;

    stream
        .write_all(response_to_string(&response).as_bytes())
        .await?;
    stream.flush().await?;

    Ok(Handshake {
        protocol: response.header(SEC_WEBSOCKET_PROTOCOL).map(str::to_string),
        request,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";
    const SAMPLE_ACCEPT: &str = "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=";

    fn request(path: &str, extra: &str) -> String {
        format!(
            "GET {} HTTP/1.1\r\nHost: example.com\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nsec-websocket-key: {}\r\nSec-WebSocket-Version: 13\r\n{}\r\n",
            path, SAMPLE_KEY, extra
        )
    }

    #[test]
    fn test_accept_key_calculation() {
        assert_eq!(compute_accept_key(SAMPLE_KEY), SAMPLE_ACCEPT);
    }

    #[test]
    fn test_client_handshake_parsing() {
        let req = parse_client_handshake(request("/chat", "").as_bytes()).unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/chat");
        assert_eq!(req.key(), Some(SAMPLE_KEY));
        assert_eq!(req.header("UPGRADE"), Some("websocket"));
        assert_eq!(req.path_token(), Some("chat"));
    }

    #[test]
    fn test_rejects_non_get() {
        let raw = b"POST / HTTP/1.1\r\nSec-WebSocket-Key: abc\r\n\r\n";
        let err = parse_client_handshake(raw).unwrap_err();
        assert!(matches!(err, Error::Protocol(ProtocolError::InvalidMethod(m)) if m == "POST"));
    }

    #[test]
    fn test_response_format() {
        let req = parse_client_handshake(request("/chat", "").as_bytes()).unwrap();
        let response = create_server_handshake(&req, &HandshakeConfig::default()).unwrap();
        assert_eq!(
            response_to_string(&response),
            format!(
                "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {}\r\nSec-WebSocket-Protocol: chat\r\n\r\n",
                SAMPLE_ACCEPT
            )
        );
    }

    #[test]
    fn test_root_path_has_no_protocol() {
        let req = parse_client_handshake(request("/", "").as_bytes()).unwrap();
        let response = create_server_handshake(&req, &HandshakeConfig::default()).unwrap();
        assert_eq!(response.header(SEC_WEBSOCKET_PROTOCOL), None);
    }

    #[test]
    fn test_offered_protocol_wins_over_path() {
        let req = parse_client_handshake(
            request("/room", "Sec-WebSocket-Protocol: chat.v2, chat.v1\r\n").as_bytes(),
        )
        .unwrap();
        let config = HandshakeConfig {
            echo_path_as_protocol: false,
            ..Default::default()
        };
        assert_eq!(negotiate_protocol(&req, &config).as_deref(), Some("chat.v2"));

        let plain = parse_client_handshake(request("/room", "").as_bytes()).unwrap();
        assert_eq!(negotiate_protocol(&plain, &config), None);
    }

    #[test]
    fn test_missing_key() {
        let raw = b"GET /chat HTTP/1.1\r\nUpgrade: websocket\r\n\r\n";
        let req = parse_client_handshake(raw).unwrap();
        let err = create_server_handshake(&req, &HandshakeConfig::default()).unwrap_err();
        assert!(matches!(err, Error::Protocol(ProtocolError::MissingHeader(_))));
    }

    #[test]
    fn test_extra_headers_appended() {
        let req = parse_client_handshake(request("/", "").as_bytes()).unwrap();
        let config = HandshakeConfig {
            extra_headers: vec![("Server".to_string(), "sockline".to_string())],
            ..Default::default()
        };
        let response = create_server_handshake(&req, &config).unwrap();
        assert_eq!(response.headers.last().map(|(k, _)| k.as_str()), Some("Server"));
    }

    #[test]
    fn test_bad_request_response() {
        assert_eq!(
            response_to_string(&bad_request_response()),
            "HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
        );
    }

    #[tokio::test]
    async fn test_negotiate_over_stream() {
        let raw = request("/echo", "");
        let expected = format!(
            "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {}\r\nSec-WebSocket-Protocol: echo\r\n\r\n",
            SAMPLE_ACCEPT
        );

        let mock = tokio_test::io::Builder::new()
            .read(&raw.as_bytes()[..20])
            .read(&raw.as_bytes()[20..])
            .write(expected.as_bytes())
            .build();
        let mut stream = tokio::io::BufReader::new(mock);

        let handshake = negotiate(&mut stream, &HandshakeConfig::default())
            .await
            .unwrap();
        assert_eq!(handshake.protocol.as_deref(), Some("echo"));
        assert_eq!(handshake.request.path, "/echo");
    }

    #[tokio::test]
    async fn test_read_request_leaves_trailing_bytes() {
        use tokio::io::AsyncReadExt;

        let mut raw = request("/", "").into_bytes();
        raw.extend_from_slice(&[0x81, 0x80]);
        let mut stream = tokio::io::BufReader::new(&raw[..]);

        let head = read_request(&mut stream, MAX_HEADER_SIZE).await.unwrap();
        assert!(head.ends_with(b"\r\n\r\n"));

        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, vec![0x81, 0x80]);
    }

    #[tokio::test]
    async fn test_read_request_size_cap() {
        let raw = format!("GET / HTTP/1.1\r\nX-Pad: {}\r\n\r\n", "a".repeat(200));
        let mut stream = tokio::io::BufReader::new(raw.as_bytes());
        let err = read_request(&mut stream, 64).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Protocol(ProtocolError::RequestTooLarge { max: 64 })
        ));
    }

    #[tokio::test]
    async fn test_read_request_eof() {
        let mut stream = tokio::io::BufReader::new(&b"GET / HTTP/1.1\r\n"[..]);
        let err = read_request(&mut stream, MAX_HEADER_SIZE).await.unwrap_err();
        assert!(err.is_transport());
    }
}
