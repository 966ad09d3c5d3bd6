//! Single-connection HTTP server for driving the streaming reader tasks over
//! a real socket.

use std::time::Duration;

use quill_core::error::ProviderError;
use quill_core::provider::{ChunkReceiver, StreamChunk};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// What the server sends back.
pub struct CannedResponse {
    status: &'static str,
    content_type: &'static str,
    parts: Vec<String>,
    hold_open: bool,
}

impl CannedResponse {
    /// A chunked `text/event-stream` body, one HTTP chunk per part.
    pub fn sse(parts: &[&str]) -> Self {
        Self {
            status: "200 OK",
            content_type: "text/event-stream",
            parts: parts.iter().map(|p| p.to_string()).collect(),
            hold_open: false,
        }
    }

    pub fn error(status: &'static str, body: &str) -> Self {
        Self {
            status,
            content_type: "application/json",
            parts: vec![body.to_string()],
            hold_open: false,
        }
    }

    /// Send the parts, then keep the body open until the client goes away.
    pub fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }
}

/// What the server saw.
#[derive(Debug)]
pub struct ServedRequest {
    /// Request line and headers
    pub head: String,
    pub body: String,
    /// The client closed the connection before the body ended
    pub client_closed: bool,
}

/// Client that never routes loopback traffic through an environment proxy.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

/// Bind an ephemeral port and answer exactly one request.
pub async fn serve(response: CannedResponse) -> (String, JoinHandle<ServedRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let (head, body) = read_request(&mut socket).await;
        let client_closed = write_response(&mut socket, response).await;
        ServedRequest {
            head,
            body,
            client_closed,
        }
    });

    (base_url, handle)
}

async fn read_request(socket: &mut TcpStream) -> (String, String) {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 4096];

    let header_end = loop {
        let n = socket.read(&mut tmp).await.unwrap();
        assert!(n > 0, "client closed before sending headers");
        buf.extend_from_slice(&tmp[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let content_length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = socket.read(&mut tmp).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&tmp[..n]);
    }

    let body = String::from_utf8_lossy(&buf[header_end..]).into_owned();
    (head, body)
}

/// Returns whether the client hung up before the body ended.
async fn write_response(socket: &mut TcpStream, response: CannedResponse) -> bool {
    if !response.status.starts_with('2') {
        let body = response.parts.concat();
        let raw = format!(
            "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            response.status,
            response.content_type,
            body.len(),
            body
        );
        socket.write_all(raw.as_bytes()).await.unwrap();
        let _ = socket.shutdown().await;
        return false;
    }

    let head = format!(
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nTransfer-Encoding: chunked\r\n\r\n",
        response.status, response.content_type
    );
    socket.write_all(head.as_bytes()).await.unwrap();

    // The client may hang up early (after `[DONE]`, or on cancel), so write
    // failures past this point end the response instead of failing the test.
    for part in &response.parts {
        let chunk = format!("{:x}\r\n{part}\r\n", part.len());
        if socket.write_all(chunk.as_bytes()).await.is_err() || socket.flush().await.is_err() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    if response.hold_open {
        let mut tmp = [0u8; 256];
        return loop {
            match socket.read(&mut tmp).await {
                Ok(0) | Err(_) => break true,
                Ok(_) => {}
            }
        };
    }

    let _ = socket.write_all(b"0\r\n\r\n").await;
    let _ = socket.shutdown().await;
    false
}

/// Drain a receiver until the reader task drops its sender.
pub async fn drain(mut rx: ChunkReceiver) -> Vec<Result<StreamChunk, ProviderError>> {
    let mut items = Vec::new();
    while let Some(item) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("reader task did not finish")
    {
        items.push(item);
    }
    items
}

/// Concatenated text of every successful chunk.
pub fn text_of(items: &[Result<StreamChunk, ProviderError>]) -> String {
    items
        .iter()
        .filter_map(|item| item.as_ref().ok())
        .filter_map(|chunk| chunk.content.as_deref())
        .collect()
}
