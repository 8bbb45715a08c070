//! Transport layer for MCP communication.
//!
//! Three concrete channels carry the same newline-delimited / frame-per-message
//! JSON-RPC traffic: a stdio pipe to a spawned server script, a WebSocket, or
//! an SSE stream paired with an HTTP POST backchannel. Exactly one transport is
//! constructed per process, selected by [`ConnectionMode`].

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// How long to wait for the SSE endpoint event before giving up on the
/// handshake.
const SSE_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection target, resolved from the CLI before startup.
#[derive(Debug, Clone)]
pub enum ConnectionMode {
    /// Spawn a local server script and talk over its stdio pipes.
    LocalScript(PathBuf),
    /// Connect to a remote server over WebSocket.
    WebSocket(String),
    /// Connect to a remote server over SSE with an HTTP POST backchannel.
    Sse(String),
}

impl ConnectionMode {
    /// Resolve a remote mode from its string form. Anything other than a
    /// WebSocket or SSE spelling is rejected.
    pub fn remote(mode: &str, url: &str) -> Result<Self> {
        match mode.to_lowercase().as_str() {
            "ws" | "wss" | "websocket" => Ok(Self::WebSocket(url.to_string())),
            "sse" => Ok(Self::Sse(url.to_string())),
            other => Err(Error::InvalidConnectionMode(other.to_string())),
        }
    }
}

/// One bidirectional MCP channel: send a JSON frame, receive the next JSON
/// frame, close down.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, frame: &Value) -> Result<()>;
    async fn recv(&mut self) -> Result<Value>;
    async fn close(&mut self) -> Result<()>;
}

/// Construct the transport for a connection mode. Failures here are fatal to
/// startup; no reconnection is attempted later.
pub async fn connect(mode: &ConnectionMode) -> Result<Box<dyn Transport>> {
    match mode {
        ConnectionMode::LocalScript(path) => Ok(Box::new(StdioTransport::spawn(path)?)),
        ConnectionMode::WebSocket(url) => Ok(Box::new(WsTransport::connect(url).await?)),
        ConnectionMode::Sse(url) => Ok(Box::new(SseTransport::connect(url).await?)),
    }
}

/// Map a server script extension to its interpreter.
pub fn interpreter_for(path: &Path) -> Result<&'static str> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("js") | Some("mjs") => Ok("node"),
        Some("py") => Ok("python3"),
        _ => Err(Error::UnsupportedScriptType(path.display().to_string())),
    }
}

fn parse_frame(line: &str) -> Option<Value> {
    match serde_json::from_str(line) {
        Ok(frame) => Some(frame),
        Err(e) => {
            warn!(error = %e, line, "dropping unparseable frame");
            None
        }
    }
}

/// Stdio transport: spawns the server script as a subprocess and exchanges
/// newline-delimited JSON over its pipes. Stderr is inherited so server
/// diagnostics stay visible in the terminal.
pub struct StdioTransport {
    child: Child,
    stdin: ChildStdin,
    rx: Receiver<Value>,
}

impl StdioTransport {
    pub fn spawn(script: &Path) -> Result<Self> {
        let interpreter = interpreter_for(script)?;

        let mut child = Command::new(interpreter)
            .arg(script)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::ConnectionFailed(format!("failed to spawn {}: {e}", script.display()))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::ConnectionFailed("child stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::ConnectionFailed("child stdout unavailable".to_string()))?;

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(Self::reader_loop(stdout, tx));

        debug!(script = %script.display(), interpreter, "spawned local MCP server");
        Ok(Self { child, stdin, rx })
    }

    /// Forward newline-delimited JSON from the child's stdout into the channel.
    async fn reader_loop(stdout: ChildStdout, tx: Sender<Value>) {
        let mut lines = BufReader::new(stdout).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if !line.trim().is_empty() => {
                    if let Some(frame) = parse_frame(&line) {
                        if tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                }
                Ok(Some(_)) => {}
                Ok(None) | Err(_) => break,
            }
        }
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&mut self, frame: &Value) -> Result<()> {
        let mut line = serde_json::to_vec(frame)?;
        line.push(b'\n');
        self.stdin.write_all(&line).await?;
        self.stdin.flush().await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Value> {
        self.rx
            .recv()
            .await
            .ok_or_else(|| Error::ConnectionFailed("server process closed the pipe".to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        let _ = self.child.kill().await;
        Ok(())
    }
}

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// WebSocket transport: one JSON-RPC frame per text message.
pub struct WsTransport {
    sink: WsSink,
    rx: Receiver<Value>,
}

impl WsTransport {
    pub async fn connect(url: &str) -> Result<Self> {
        let (stream, _) = connect_async(url)
            .await
            .map_err(|e| Error::ConnectionFailed(format!("websocket connect to {url}: {e}")))?;
        let (sink, mut read) = stream.split();

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            while let Some(message) = read.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        if let Some(frame) = parse_frame(&text) {
                            if tx.send(frame).await.is_err() {
                                break;
                            }
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "websocket read error");
                        break;
                    }
                }
            }
        });

        debug!(url, "websocket transport connected");
        Ok(Self { sink, rx })
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, frame: &Value) -> Result<()> {
        let text = serde_json::to_string(frame)?;
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(|e| Error::ConnectionFailed(format!("websocket send: {e}")))
    }

    async fn recv(&mut self) -> Result<Value> {
        self.rx
            .recv()
            .await
            .ok_or_else(|| Error::ConnectionFailed("websocket closed".to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        let _ = self.sink.send(Message::Close(None)).await;
        let _ = self.sink.close().await;
        Ok(())
    }
}

/// SSE transport: server-to-client messages arrive as SSE `message` events,
/// client-to-server frames are POSTed to the endpoint announced by the first
/// `endpoint` event on the stream.
pub struct SseTransport {
    http: reqwest::Client,
    post_url: reqwest::Url,
    rx: Receiver<Value>,
    reader: tokio::task::JoinHandle<()>,
}

impl SseTransport {
    pub async fn connect(url: &str) -> Result<Self> {
        let base = reqwest::Url::parse(url)
            .map_err(|e| Error::ConnectionFailed(format!("invalid SSE url {url}: {e}")))?;
        let http = reqwest::Client::new();

        let response = http
            .get(base.clone())
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| Error::ConnectionFailed(format!("SSE connect to {url}: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::ConnectionFailed(format!(
                "SSE connect to {url}: HTTP {}",
                response.status()
            )));
        }

        let mut events = Box::pin(response.bytes_stream().eventsource());

        // The server announces its POST endpoint before any protocol traffic.
        let endpoint = tokio::time::timeout(SSE_HANDSHAKE_TIMEOUT, async {
            while let Some(event) = events.next().await {
                match event {
                    Ok(event) if event.event == "endpoint" => return Some(event.data),
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "SSE stream error during handshake");
                        return None;
                    }
                }
            }
            None
        })
        .await
        .ok()
        .flatten()
        .ok_or_else(|| {
            Error::ConnectionFailed(format!("SSE server at {url} sent no endpoint event"))
        })?;

        let post_url = base
            .join(endpoint.trim())
            .map_err(|e| Error::ConnectionFailed(format!("bad SSE endpoint {endpoint}: {e}")))?;

        let (tx, rx) = mpsc::channel(64);
        let reader = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                match event {
                    Ok(event) if event.event == "message" => {
                        if let Some(frame) = parse_frame(&event.data) {
                            if tx.send(frame).await.is_err() {
                                break;
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "SSE stream error");
                        break;
                    }
                }
            }
        });

        debug!(url, post_url = %post_url, "SSE transport connected");
        Ok(Self {
            http,
            post_url,
            rx,
            reader,
        })
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn send(&mut self, frame: &Value) -> Result<()> {
        let response = self
            .http
            .post(self.post_url.clone())
            .json(frame)
            .send()
            .await
            .map_err(|e| Error::ConnectionFailed(format!("SSE post: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::ConnectionFailed(format!(
                "SSE post rejected: HTTP {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn recv(&mut self) -> Result<Value> {
        self.rx
            .recv()
            .await
            .ok_or_else(|| Error::ConnectionFailed("SSE stream closed".to_string()))
    }

    async fn close(&mut self) -> Result<()> {
        // Aborting the reader drops the GET response stream, which is the only
        // thing keeping the SSE connection open.
        self.reader.abort();
        self.rx.close();
        Ok(())
    }
}
