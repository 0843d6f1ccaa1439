//! Just enough HTTP/1.1 for the two evaluate endpoints: one request per
//! connection, `Content-Length` bodies, `Connection: close` responses.

use serde::Serialize;
use std::collections::HashMap;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const MAX_HEAD_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Other,
}

#[derive(Debug)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl Request {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

/// Why a request could not be read.
#[derive(Debug)]
pub enum ReadError {
    /// Peer closed before sending a request line.
    Closed,
    Malformed(String),
    /// `declared` is the announced body length, zero when the head
    /// itself overflowed.
    TooLarge { limit: usize, declared: usize },
    Io(std::io::Error),
}

impl From<std::io::Error> for ReadError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error)
    }
}

pub async fn read_request<R>(reader: &mut R, max_body_bytes: usize) -> Result<Request, ReadError>
where
    R: AsyncBufRead + Unpin,
{
    let mut head_bytes = 0;
    let mut line = String::new();

    let read = read_head_line(reader, &mut line, head_bytes).await?;
    if read == 0 {
        return Err(ReadError::Closed);
    }
    head_bytes += read;

    let mut parts = line.split_whitespace();
    let (method, target) = match (parts.next(), parts.next(), parts.next()) {
        (Some(method), Some(target), Some(version)) if version.starts_with("HTTP/1.") => {
            (method, target)
        }
        _ => return Err(ReadError::Malformed(format!("bad request line: {}", line.trim_end()))),
    };
    let method = match method {
        "GET" => Method::Get,
        "POST" => Method::Post,
        _ => Method::Other,
    };
    let path = target.split('?').next().unwrap_or(target).to_string();

    let mut headers = HashMap::new();
    loop {
        line.clear();
        let read = read_head_line(reader, &mut line, head_bytes).await?;
        if read == 0 {
            return Err(ReadError::Malformed("connection closed inside headers".to_string()));
        }
        head_bytes += read;

        let header = line.trim_end_matches(['\r', '\n']);
        if header.is_empty() {
            break;
        }
        let (name, value) = header
            .split_once(':')
            .ok_or_else(|| ReadError::Malformed(format!("bad header: {header}")))?;
        headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
    }

    let length = match headers.get("content-length") {
        Some(raw) => raw
            .parse::<usize>()
            .map_err(|_| ReadError::Malformed(format!("bad content-length: {raw}")))?,
        None => 0,
    };
    if length > max_body_bytes {
        return Err(ReadError::TooLarge {
            limit: max_body_bytes,
            declared: length,
        });
    }

    let mut body = vec![0; length];
    reader.read_exact(&mut body).await?;

    Ok(Request {
        method,
        path,
        headers,
        body,
    })
}

/// Read one head line without consuming more than what is left of the head
/// budget.
async fn read_head_line<R>(reader: &mut R, line: &mut String, used: usize) -> Result<usize, ReadError>
where
    R: AsyncBufRead + Unpin,
{
    let too_large = ReadError::TooLarge {
        limit: MAX_HEAD_BYTES,
        declared: 0,
    };
    let remaining = MAX_HEAD_BYTES.saturating_sub(used);
    if remaining == 0 {
        return Err(too_large);
    }

    let read = (&mut *reader)
        .take(remaining as u64)
        .read_line(line)
        .await
        .map_err(|error| match error.kind() {
            std::io::ErrorKind::InvalidData => {
                ReadError::Malformed("request head is not valid UTF-8".to_string())
            }
            _ => ReadError::Io(error),
        })?;

    if read == remaining && !line.ends_with('\n') {
        return Err(too_large);
    }
    Ok(read)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub body: Vec<u8>,
}

impl Response {
    pub fn json<T: Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self { status, body },
            Err(error) => Self {
                status: 500,
                body: serde_json::json!({"error": error.to_string(), "kind": "serialization"})
                    .to_string()
                    .into_bytes(),
            },
        }
    }

    pub async fn write_to<W>(&self, writer: &mut W) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let head = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            self.status,
            reason(self.status),
            self.body.len()
        );
        writer.write_all(head.as_bytes()).await?;
        writer.write_all(&self.body).await?;
        writer.flush().await
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        409 => "Conflict",
        413 => "Payload Too Large",
        _ => "Internal Server Error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    async fn parse(raw: &str, limit: usize) -> Result<Request, ReadError> {
        let mut reader = BufReader::new(raw.as_bytes());
        read_request(&mut reader, limit).await
    }

    #[tokio::test]
    async fn parses_post_with_body() {
        let request = parse(
            "POST /apis/optimizations/evaluates/prepares?x=1 HTTP/1.1\r\nHost: a\r\nContent-Length: 2\r\n\r\n{}",
            1024,
        )
        .await
        .unwrap();
        assert_eq!(request.method, Method::Post);
        assert_eq!(request.path, "/apis/optimizations/evaluates/prepares");
        assert_eq!(request.header("HOST"), Some("a"));
        assert_eq!(request.body, b"{}");
    }

    #[tokio::test]
    async fn rejects_oversized_body() {
        let result = parse("POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\n0123456789", 4).await;
        assert!(matches!(result, Err(ReadError::TooLarge { limit: 4, declared: 10 })));
    }

    #[tokio::test]
    async fn unterminated_head_stops_at_limit() {
        let raw = format!("GET /{}", "a".repeat(4 * MAX_HEAD_BYTES));
        let mut reader = BufReader::new(raw.as_bytes());
        let result = read_request(&mut reader, 16).await;

        assert!(matches!(result, Err(ReadError::TooLarge { declared: 0, .. })));
        // The rest of the line is left unread.
        assert!(reader.get_ref().len() >= 2 * MAX_HEAD_BYTES);
    }

    #[tokio::test]
    async fn oversized_headers_rejected() {
        let raw = format!("GET / HTTP/1.1\r\nX-Pad: {}\r\n\r\n", "b".repeat(MAX_HEAD_BYTES));
        assert!(matches!(
            parse(&raw, 16).await,
            Err(ReadError::TooLarge { declared: 0, .. })
        ));
    }

    #[tokio::test]
    async fn non_utf8_head_is_malformed() {
        let mut raw = b"GET /".to_vec();
        raw.extend_from_slice(&[0xff, 0xfe]);
        raw.extend_from_slice(b" HTTP/1.1\r\n\r\n");
        let mut reader = BufReader::new(raw.as_slice());
        assert!(matches!(
            read_request(&mut reader, 16).await,
            Err(ReadError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn rejects_garbage() {
        assert!(matches!(parse("hello\r\n\r\n", 16).await, Err(ReadError::Malformed(_))));
        assert!(matches!(parse("", 16).await, Err(ReadError::Closed)));
    }

    #[tokio::test]
    async fn writes_close_delimited_response() {
        let mut out = Vec::new();
        Response::json(200, &serde_json::json!({}))
            .write_to(&mut out)
            .await
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Length: 2\r\n"));
        assert!(text.contains("Connection: close\r\n"));
        assert!(text.ends_with("\r\n\r\n{}"));
    }
}
