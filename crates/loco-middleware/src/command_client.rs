//! WebSocket command client.
//!
//! [`CommandClient`] connects to a command server (a rosbridge endpoint or a
//! teleop bridge speaking the same JSON), subscribes to `/cmd_vel` and keeps
//! the newest Twist it has seen in a `tokio::sync::watch` slot.  All network
//! I/O happens on a dedicated thread running a single-threaded tokio
//! runtime, so [`CommandSource::latest_command`] is a non-blocking read.
//!
//! The connection is re-established after a fixed delay whenever it drops.
//! On disconnect the slot is reset to a zero command so the robot does not
//! keep walking on a command nobody is sending any more.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use loco_types::{Command, LocoError};
use serde_json::Value;
use tokio::sync::watch;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::source::CommandSource;

/// Delay between reconnection attempts.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

const CMD_VEL_TOPIC: &str = "/cmd_vel";

/// Build the rosbridge subscribe request sent after every (re)connect.
pub fn build_subscribe_frame() -> String {
    serde_json::json!({
        "op": "subscribe",
        "topic": CMD_VEL_TOPIC,
        "type": "geometry_msgs/Twist",
    })
    .to_string()
}

/// Extract a [`Command`] from a text frame.
///
/// Two shapes are accepted:
///
/// * a rosbridge publish: `{"op":"publish","topic":"/cmd_vel","msg":{...}}`
/// * a bare Twist: `{"linear":{"x":..,"y":..},"angular":{"z":..}}`
///
/// `linear.x` is forward velocity, `linear.y` lateral velocity and
/// `angular.z` yaw rate; missing components read as zero.  Anything else
/// (other topics, malformed JSON, a frame with neither `linear` nor
/// `angular`) yields `None`.
pub fn parse_command_frame(text: &str) -> Option<Command> {
    let json: Value = serde_json::from_str(text).ok()?;

    let twist = match json.get("op").and_then(Value::as_str) {
        Some("publish") => {
            if json.get("topic").and_then(Value::as_str) != Some(CMD_VEL_TOPIC) {
                return None;
            }
            json.get("msg")?
        }
        Some(_) => return None,
        None => &json,
    };

    let linear = twist.get("linear");
    let angular = twist.get("angular");
    if linear.is_none() && angular.is_none() {
        return None;
    }

    let component = |v: Option<&Value>, axis: &str| -> f32 {
        v.and_then(|v| v.get(axis))
            .and_then(Value::as_f64)
            .unwrap_or(0.0) as f32
    };

    Some(Command::new(
        component(linear, "x"),
        component(linear, "y"),
        component(angular, "z"),
    ))
}

// ─────────────────────────────────────────────────────────────────────────────
// CommandClient
// ─────────────────────────────────────────────────────────────────────────────

/// Background WebSocket subscriber exposing the latest velocity command.
pub struct CommandClient {
    url: String,
    latest: watch::Receiver<Option<Command>>,
    stop: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl CommandClient {
    /// Start the client thread for `url` with the default reconnect delay.
    ///
    /// Returns immediately; the first connection attempt happens on the
    /// background thread.
    pub fn connect(url: impl Into<String>) -> Result<Self, LocoError> {
        Self::connect_with_delay(url, DEFAULT_RECONNECT_DELAY)
    }

    /// Like [`CommandClient::connect`] with an explicit reconnect delay.
    pub fn connect_with_delay(
        url: impl Into<String>,
        reconnect_delay: Duration,
    ) -> Result<Self, LocoError> {
        let url = url.into();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| LocoError::Config(format!("command client runtime: {e}")))?;

        let (latest_tx, latest_rx) = watch::channel(None);
        let (stop_tx, stop_rx) = watch::channel(false);

        let thread_url = url.clone();
        let handle = thread::Builder::new()
            .name("command-client".to_string())
            .spawn(move || {
                runtime.block_on(run_client(thread_url, latest_tx, stop_rx, reconnect_delay));
            })
            .map_err(|e| LocoError::Config(format!("command client thread: {e}")))?;

        info!(url = %url, "command client started");
        Ok(Self {
            url,
            latest: latest_rx,
            stop: stop_tx,
            handle: Some(handle),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// The newest command received so far, whether or not it was already
    /// returned by [`CommandSource::latest_command`].
    pub fn current(&self) -> Option<Command> {
        *self.latest.borrow()
    }

    /// Stop the background thread and wait for it to exit.
    pub fn shutdown(&mut self) {
        let _ = self.stop.send(true);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("command client thread panicked");
            }
        }
    }
}

impl CommandSource for CommandClient {
    fn latest_command(&mut self) -> Option<Command> {
        match self.latest.has_changed() {
            Ok(true) => *self.latest.borrow_and_update(),
            _ => None,
        }
    }
}

impl Drop for CommandClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_client(
    url: String,
    latest: watch::Sender<Option<Command>>,
    mut stop: watch::Receiver<bool>,
    reconnect_delay: Duration,
) {
    loop {
        if *stop.borrow() {
            break;
        }

        match connect_async(url.as_str()).await {
            Ok((ws_stream, _)) => {
                info!(url = %url, "command server connected");
                let (mut ws_tx, mut ws_rx) = ws_stream.split();

                if let Err(e) = ws_tx.send(Message::Text(build_subscribe_frame().into())).await {
                    warn!(error = %e, "command subscribe failed");
                } else {
                    loop {
                        tokio::select! {
                            _ = stop.changed() => return,
                            msg = ws_rx.next() => match msg {
                                Some(Ok(Message::Text(text))) => {
                                    if let Some(cmd) = parse_command_frame(text.as_str()) {
                                        debug!(
                                            forward = cmd.forward,
                                            lateral = cmd.lateral,
                                            yaw_rate = cmd.yaw_rate,
                                            "command received"
                                        );
                                        latest.send_replace(Some(cmd));
                                    }
                                }
                                Some(Ok(Message::Close(_))) | None => break,
                                Some(Err(e)) => {
                                    warn!(error = %e, "command stream error");
                                    break;
                                }
                                _ => {}
                            }
                        }
                    }
                }

                warn!(url = %url, "command server disconnected, zeroing command");
                latest.send_replace(Some(Command::zero()));
            }
            Err(e) => {
                warn!(url = %url, error = %e, "command server connect failed");
            }
        }

        tokio::select! {
            _ = stop.changed() => break,
            _ = tokio::time::sleep(reconnect_delay) => {}
        }
    }
    debug!("command client stopped");
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    #[test]
    fn parses_rosbridge_publish() {
        let frame = r#"{"op":"publish","topic":"/cmd_vel","msg":{"linear":{"x":0.5,"y":-0.1,"z":0},"angular":{"x":0,"y":0,"z":0.3}}}"#;
        let cmd = parse_command_frame(frame).unwrap();
        assert!((cmd.forward - 0.5).abs() < f32::EPSILON);
        assert!((cmd.lateral + 0.1).abs() < f32::EPSILON);
        assert!((cmd.yaw_rate - 0.3).abs() < f32::EPSILON);
    }

    #[test]
    fn parses_bare_twist_with_missing_components() {
        let cmd = parse_command_frame(r#"{"linear":{"x":0.2}}"#).unwrap();
        assert_eq!(cmd, Command::new(0.2, 0.0, 0.0));
    }

    #[test]
    fn ignores_other_topics_and_garbage() {
        assert!(parse_command_frame(r#"{"op":"publish","topic":"/odom","msg":{"linear":{"x":1}}}"#).is_none());
        assert!(parse_command_frame(r#"{"op":"subscribe","topic":"/cmd_vel"}"#).is_none());
        assert!(parse_command_frame(r#"{"status":"ok"}"#).is_none());
        assert!(parse_command_frame("not json").is_none());
    }

    #[test]
    fn subscribe_frame_targets_cmd_vel() {
        let json: Value = serde_json::from_str(&build_subscribe_frame()).unwrap();
        assert_eq!(json["op"], "subscribe");
        assert_eq!(json["topic"], "/cmd_vel");
    }

    #[test]
    fn unreachable_server_yields_no_command() {
        let mut client =
            CommandClient::connect_with_delay("ws://127.0.0.1:1", Duration::from_millis(20)).unwrap();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(client.latest_command(), None);
        client.shutdown();
    }

    #[tokio::test]
    async fn receives_latest_command_from_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();

            let subscribe = ws.next().await.unwrap().unwrap();
            assert!(subscribe.to_text().unwrap().contains("/cmd_vel"));

            for x in [0.1, 0.4] {
                let frame = format!(
                    r#"{{"op":"publish","topic":"/cmd_vel","msg":{{"linear":{{"x":{x},"y":0}},"angular":{{"z":0}}}}}}"#
                );
                ws.send(Message::Text(frame.into())).await.unwrap();
            }
            // Hold the connection open until the client goes away.
            while let Some(Ok(_)) = ws.next().await {}
        });

        let mut client = CommandClient::connect(format!("ws://{addr}")).unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        let mut seen = None;
        while tokio::time::Instant::now() < deadline {
            if let Some(cmd) = client.current() {
                if (cmd.forward - 0.4).abs() < 1e-6 {
                    seen = Some(cmd);
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(seen, Some(Command::new(0.4, 0.0, 0.0)));
        assert_eq!(client.latest_command(), Some(Command::new(0.4, 0.0, 0.0)));
        // Already consumed.
        assert_eq!(client.latest_command(), None);

        client.shutdown();
        server.abort();
    }
}
