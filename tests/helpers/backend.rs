//! Minimal HTTP backend on a local socket, scripted per request

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Ollama `/api/generate` answer carrying a readable receipt.
pub const OLLAMA_RECEIPT: &str =
    r#"{"response": "{\"merchant\": \"Corner Market\", \"total\": 12.75}"}"#;

/// Workers AI answer carrying a readable receipt.
pub const WORKERS_AI_RECEIPT: &str =
    r#"{"result": {"description": "{\"merchant\": \"Corner Market\", \"total\": 12.75}"}}"#;

/// What the backend does with one request.
#[derive(Debug, Clone, Copy)]
pub enum Reply {
    /// Read the request, then abort the connection with a TCP reset.
    Reset,
    /// Respond with this status and a short text body.
    Status(u16),
    /// Respond 200 with this JSON body.
    Json(&'static str),
    /// Read the request and never answer.
    Stall,
}

/// Backend following a reply script; the last reply repeats once the script runs out.
pub struct StubBackend {
    pub url: String,
    requests: Arc<AtomicUsize>,
    acceptor: JoinHandle<()>,
}

impl StubBackend {
    pub async fn start(script: impl IntoIterator<Item = Reply>) -> Self {
        let script: Arc<Vec<Reply>> = Arc::new(script.into_iter().collect());
        assert!(!script.is_empty(), "reply script must not be empty");

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let requests = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&requests);
        let acceptor = tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let script = Arc::clone(&script);
                let counter = Arc::clone(&counter);
                tokio::spawn(async move {
                    if !read_request(&mut stream).await.unwrap_or(false) {
                        return;
                    }
                    let n = counter.fetch_add(1, Ordering::SeqCst);
                    let reply = script.get(n).or(script.last()).copied().unwrap();
                    reply.send(stream).await;
                });
            }
        });

        Self {
            url,
            requests,
            acceptor,
        }
    }

    /// Requests fully received so far.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl Drop for StubBackend {
    fn drop(&mut self) {
        self.acceptor.abort();
    }
}

impl Reply {
    async fn send(self, mut stream: TcpStream) {
        match self {
            Reply::Reset => {
                // Zero linger turns the close into an RST.
                #[allow(deprecated)]
                let _ = stream.set_linger(Some(Duration::ZERO));
                drop(stream);
            }
            Reply::Status(code) => {
                let reason = StatusCode::from_u16(code)
                    .ok()
                    .and_then(|status| status.canonical_reason())
                    .unwrap_or("Unknown");
                write_response(&mut stream, code, reason, "text/plain", reason).await;
            }
            Reply::Json(body) => {
                write_response(&mut stream, 200, "OK", "application/json", body).await;
            }
            Reply::Stall => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                drop(stream);
            }
        }
    }
}

async fn write_response(stream: &mut TcpStream, code: u16, reason: &str, content_type: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {code} {reason}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

/// Read one request, headers and `Content-Length` body. `false` if the peer left early.
async fn read_request(stream: &mut TcpStream) -> std::io::Result<bool> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    let (header_end, body_len) = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(false);
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
            let body_len = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|value| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            break (end + 4, body_len);
        }
    };

    while buf.len() < header_end + body_len {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(false);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    Ok(true)
}
