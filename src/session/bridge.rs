//! Newline-delimited JSON protocol spoken with the simulator's bridge plugin
//!
//! Every request carries a numeric `id` and an `op`:
//!
//! ```text
//! -> {"id":1,"op":"load_scene","hand":"ManoHand","object":"glass"}
//! <- {"id":1,"ok":true,"result":{"hand_dofs":45,"approach_distance":0.25}}
//! -> {"id":2,"op":"apply","pose":[...7],"dofs":[...],"speed":1.0}
//! <- {"id":2,"ok":false,"error":"hand collides with object"}
//! ```
//!
//! The plugin announces itself with `{"event":"ready"}` once the simulator has
//! started. Other events may be interleaved with replies and are logged.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Child;
use tracing::{debug, warn};

use super::{Outcome, SceneInfo, Session};
use crate::config::{REQUEST_TIMEOUT, SHUTDOWN_GRACE};
use crate::error::SessionError;
use crate::formats::Pose;

/// Requests understood by the bridge plugin
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    LoadScene {
        hand: String,
        object: String,
    },
    Apply {
        pose: Pose,
        dofs: Vec<f64>,
        speed: f64,
    },
    Reset,
    Shutdown,
}

#[derive(Serialize)]
struct Envelope<'a> {
    id: u64,
    #[serde(flatten)]
    request: &'a Request,
}

/// Messages sent by the bridge plugin
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Reply {
        id: u64,
        ok: bool,
        #[serde(default)]
        result: serde_json::Value,
        #[serde(default)]
        error: Option<String>,
    },
    Event {
        event: String,
        #[serde(default)]
        message: Option<String>,
    },
}

/// Request/response framing over a byte stream pair
pub struct BridgeChannel<R, W> {
    reader: R,
    writer: W,
    next_id: u64,
    request_timeout: Duration,
    line: String,
}

impl<R, W> BridgeChannel<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            next_id: 1,
            request_timeout: REQUEST_TIMEOUT,
            line: String::new(),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Wait for the plugin's ready event
    pub async fn wait_ready(&mut self, timeout: Duration) -> Result<(), SessionError> {
        match tokio::time::timeout(timeout, self.read_until_ready()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(SessionError::Lost(msg))) | Ok(Err(SessionError::Protocol(msg))) => {
                Err(SessionError::Launch(msg))
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(SessionError::Launch(format!(
                "simulator not ready after {} seconds",
                timeout.as_secs()
            ))),
        }
    }

    /// Send a request and wait for its reply.
    ///
    /// The outer error is a transport failure; the inner one is an error
    /// reported by the plugin for this request.
    pub async fn request(
        &mut self,
        request: &Request,
    ) -> Result<Result<serde_json::Value, String>, SessionError> {
        let id = self.next_id;
        self.next_id += 1;

        let mut payload = serde_json::to_string(&Envelope { id, request })
            .map_err(|e| SessionError::Protocol(format!("cannot encode request: {}", e)))?;
        payload.push('\n');

        let timeout = self.request_timeout;
        match tokio::time::timeout(timeout, self.exchange(id, &payload)).await {
            Ok(result) => result,
            Err(_) => Err(SessionError::Lost(format!(
                "no reply to request {} within {} seconds",
                id,
                timeout.as_secs()
            ))),
        }
    }

    async fn read_until_ready(&mut self) -> Result<(), SessionError> {
        loop {
            match self.read_message().await? {
                Some(Message::Event { event, .. }) if event == "ready" => return Ok(()),
                Some(other) => debug!("Ignoring message before ready: {:?}", other),
                None => {
                    return Err(SessionError::Launch(
                        "simulator exited before becoming ready".to_string(),
                    ));
                }
            }
        }
    }

    async fn exchange(
        &mut self,
        id: u64,
        payload: &str,
    ) -> Result<Result<serde_json::Value, String>, SessionError> {
        self.writer
            .write_all(payload.as_bytes())
            .await
            .map_err(|e| SessionError::Lost(format!("write failed: {}", e)))?;
        self.writer
            .flush()
            .await
            .map_err(|e| SessionError::Lost(format!("flush failed: {}", e)))?;
        self.read_reply(id).await
    }

    async fn read_reply(
        &mut self,
        expected_id: u64,
    ) -> Result<Result<serde_json::Value, String>, SessionError> {
        loop {
            match self.read_message().await? {
                None => {
                    return Err(SessionError::Lost(
                        "simulator closed the connection".to_string(),
                    ));
                }
                Some(Message::Event { event, message }) => {
                    debug!("Simulator event {}: {}", event, message.unwrap_or_default());
                }
                Some(Message::Reply {
                    id,
                    ok,
                    result,
                    error,
                }) => {
                    if id != expected_id {
                        return Err(SessionError::Protocol(format!(
                            "expected reply {}, got {}",
                            expected_id, id
                        )));
                    }
                    return Ok(if ok {
                        Ok(result)
                    } else {
                        Err(error.unwrap_or_else(|| "unspecified error".to_string()))
                    });
                }
            }
        }
    }

    /// Read the next non-empty message; `None` at end of stream
    async fn read_message(&mut self) -> Result<Option<Message>, SessionError> {
        loop {
            self.line.clear();
            let n = self
                .reader
                .read_line(&mut self.line)
                .await
                .map_err(|e| SessionError::Lost(format!("read failed: {}", e)))?;
            if n == 0 {
                return Ok(None);
            }

            let trimmed = self.line.trim();
            if trimmed.is_empty() {
                continue;
            }

            return serde_json::from_str(trimmed)
                .map(Some)
                .map_err(|e| SessionError::Protocol(format!("undecodable message '{}': {}", trimmed, e)));
        }
    }
}

/// A [`Session`] backed by a bridge channel, optionally owning the simulator
/// process at the other end.
pub struct BridgeSession<R, W> {
    id: String,
    channel: BridgeChannel<R, W>,
    child: Option<Child>,
    closed: bool,
}

impl<R, W> BridgeSession<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(id: impl Into<String>, channel: BridgeChannel<R, W>, child: Option<Child>) -> Self {
        Self {
            id: id.into(),
            channel,
            child,
            closed: false,
        }
    }

    async fn call(&mut self, request: Request) -> Result<Result<serde_json::Value, String>, SessionError> {
        if self.closed {
            return Err(SessionError::Lost("session already closed".to_string()));
        }

        match self.channel.request(&request).await {
            Err(SessionError::Lost(msg)) => {
                self.closed = true;
                Err(SessionError::Lost(self.describe_exit(msg)))
            }
            other => other,
        }
    }

    /// Append the child's exit status to a loss message when it has exited
    fn describe_exit(&mut self, msg: String) -> String {
        match self.child.as_mut().map(|c| c.try_wait()) {
            Some(Ok(Some(status))) => format!("{} (simulator exited with {})", msg, status),
            _ => msg,
        }
    }
}

#[async_trait]
impl<R, W> Session for BridgeSession<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    fn id(&self) -> &str {
        &self.id
    }

    async fn load_scene(&mut self, hand_id: &str, object_id: &str) -> Result<SceneInfo, SessionError> {
        let reply = self
            .call(Request::LoadScene {
                hand: hand_id.to_string(),
                object: object_id.to_string(),
            })
            .await?;

        let value = reply.map_err(|e| {
            SessionError::Evaluation(format!("cannot load {} with {}: {}", object_id, hand_id, e))
        })?;

        serde_json::from_value(value)
            .map_err(|e| SessionError::Protocol(format!("bad scene description: {}", e)))
    }

    async fn apply(&mut self, pose: &Pose, dofs: &[f64], speed_ratio: f64) -> Result<Outcome, SessionError> {
        let reply = self
            .call(Request::Apply {
                pose: *pose,
                dofs: dofs.to_vec(),
                speed: speed_ratio,
            })
            .await?;

        let value = reply.map_err(SessionError::Evaluation)?;
        serde_json::from_value(value)
            .map_err(|e| SessionError::Protocol(format!("bad grasp outcome: {}", e)))
    }

    async fn reset(&mut self) -> Result<(), SessionError> {
        self.call(Request::Reset)
            .await?
            .map(|_| ())
            .map_err(SessionError::Evaluation)
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        if !self.closed {
            self.closed = true;
            if let Err(e) = self.channel.request(&Request::Shutdown).await {
                debug!("Session {}: shutdown request failed: {}", self.id, e);
            }
        }

        if let Some(mut child) = self.child.take() {
            match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
                Ok(Ok(status)) => debug!("Session {}: simulator exited with {}", self.id, status),
                Ok(Err(e)) => warn!("Session {}: failed to wait for simulator: {}", self.id, e),
                Err(_) => {
                    warn!("Session {}: simulator did not exit, killing it", self.id);
                    child
                        .kill()
                        .await
                        .map_err(|e| SessionError::Lost(format!("failed to kill simulator: {}", e)))?;
                }
            }
        }

        Ok(())
    }
}
