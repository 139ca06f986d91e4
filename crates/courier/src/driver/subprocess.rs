//! Driver adapter that runs an external driver program.
//!
//! Commands are written to the child's stdin and outputs read from its stdout,
//! one JSON object per line. Replies are matched to requests by `request_id`;
//! everything else is forwarded as a lifecycle event.

use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, info, warn};

use super::{ChatId, Driver, DriverCommand, DriverError, DriverEvent, DriverOutput, DriverReply};
use crate::config::DriverConfig;

/// Environment variable carrying the persisted-session namespace.
pub const SESSION_ID_ENV: &str = "COURIER_SESSION_ID";

const EXIT_REASON: &str = "driver process exited";

type PendingReplies = Arc<DashMap<u64, oneshot::Sender<Result<(), DriverError>>>>;

/// A running driver process.
struct DriverProcess {
    child: Child,
    stdin: ChildStdin,
    /// Requests awaiting a reply from this process.
    pending: PendingReplies,
    /// Set once stdout closed.
    closed: Arc<AtomicBool>,
}

pub struct SubprocessDriver {
    command: String,
    args: Vec<String>,
    session_id: String,
    events: mpsc::Sender<DriverEvent>,
    next_request_id: AtomicU64,
    process: Mutex<Option<DriverProcess>>,
}

impl SubprocessDriver {
    /// Create the adapter. The program is not started until `initialize`.
    pub fn new(
        config: &DriverConfig,
        session_id: impl Into<String>,
        events: mpsc::Sender<DriverEvent>,
    ) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
            session_id: session_id.into(),
            events,
            next_request_id: AtomicU64::new(1),
            process: Mutex::new(None),
        }
    }

    fn next_request_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    fn spawn_process(&self) -> Result<DriverProcess, DriverError> {
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .env(SESSION_ID_ENV, &self.session_id)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| DriverError::Protocol("driver stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DriverError::Protocol("driver stdout not captured".to_string()))?;

        let pending: PendingReplies = Arc::new(DashMap::new());
        let closed = Arc::new(AtomicBool::new(false));
        tokio::spawn(read_outputs(
            stdout,
            pending.clone(),
            closed.clone(),
            self.events.clone(),
        ));
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_stderr(stderr));
        }

        info!(command = %self.command, pid = ?child.id(), "Driver process started");

        Ok(DriverProcess {
            child,
            stdin,
            pending,
            closed,
        })
    }

    /// Write `command` and wait for its reply.
    ///
    /// With `start` set, a missing or exited process is (re)started first.
    async fn request(&self, command: DriverCommand, start: bool) -> Result<(), DriverError> {
        let request_id = command.request_id();
        let mut line = serde_json::to_string(&command)
            .map_err(|e| DriverError::Protocol(e.to_string()))?;
        line.push('\n');

        let reply_rx = {
            let mut guard = self.process.lock().await;

            let exited = match guard.as_mut() {
                Some(process) => {
                    process.closed.load(Ordering::Acquire) || process.child.try_wait()?.is_some()
                }
                None => true,
            };
            if exited {
                *guard = None;
                if !start {
                    return Err(DriverError::NotRunning);
                }
                *guard = Some(self.spawn_process()?);
            }

            let Some(process) = guard.as_mut() else {
                return Err(DriverError::NotRunning);
            };

            let (reply_tx, reply_rx) = oneshot::channel();
            process.pending.insert(request_id, reply_tx);
            // The reader clears `pending` after setting `closed`; an insert that
            // raced past the clear would never be answered.
            if process.closed.load(Ordering::Acquire) {
                process.pending.remove(&request_id);
                return Err(DriverError::Exited);
            }

            let written = async {
                process.stdin.write_all(line.as_bytes()).await?;
                process.stdin.flush().await
            }
            .await;
            if let Err(e) = written {
                process.pending.remove(&request_id);
                return Err(DriverError::Io(e));
            }
            reply_rx
        };

        reply_rx.await.unwrap_or(Err(DriverError::Exited))
    }
}

#[async_trait]
impl Driver for SubprocessDriver {
    async fn initialize(&self) -> Result<(), DriverError> {
        let command = DriverCommand::Initialize {
            request_id: self.next_request_id(),
            session_id: self.session_id.clone(),
        };
        self.request(command, true).await
    }

    async fn send_message(&self, chat_id: &ChatId, body: &str) -> Result<(), DriverError> {
        let command = DriverCommand::SendMessage {
            request_id: self.next_request_id(),
            chat_id: chat_id.to_string(),
            body: body.to_string(),
        };
        self.request(command, false).await
    }

    async fn logout(&self) -> Result<(), DriverError> {
        let command = DriverCommand::Logout {
            request_id: self.next_request_id(),
        };
        self.request(command, false).await
    }
}

// ============================================================================
// Output pumps
// ============================================================================

async fn read_outputs(
    stdout: ChildStdout,
    pending: PendingReplies,
    closed: Arc<AtomicBool>,
    events: mpsc::Sender<DriverEvent>,
) {
    let mut lines = BufReader::new(stdout).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => dispatch_line(&line, &pending, &events).await,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Failed to read driver output");
                break;
            }
        }
    }

    closed.store(true, Ordering::Release);
    // Dropping the senders fails every outstanding request with `Exited`.
    pending.clear();
    warn!("Driver process output closed");
    let _ = events
        .send(DriverEvent::Disconnected {
            reason: EXIT_REASON.to_string(),
        })
        .await;
}

async fn dispatch_line(line: &str, pending: &PendingReplies, events: &mpsc::Sender<DriverEvent>) {
    let line = line.trim();
    if line.is_empty() {
        return;
    }

    let output: DriverOutput = match serde_json::from_str(line) {
        Ok(output) => output,
        Err(e) => {
            warn!(error = %e, line = %line, "Skipping unparseable driver output");
            return;
        }
    };

    match output.into_event() {
        Ok(event) => {
            debug!(event = event.kind(), "Driver event");
            if events.send(event).await.is_err() {
                debug!("Session event loop gone, dropping driver event");
            }
        }
        Err(reply) => complete_request(pending, reply),
    }
}

fn complete_request(pending: &PendingReplies, reply: DriverReply) {
    let Some((_, reply_tx)) = pending.remove(&reply.request_id) else {
        debug!(request_id = reply.request_id, "Reply for unknown request");
        return;
    };

    let result = if reply.ok {
        Ok(())
    } else {
        Err(DriverError::Rejected(
            reply.error.unwrap_or_else(|| "unspecified error".to_string()),
        ))
    };
    // The waiter may have given up already.
    let _ = reply_tx.send(result);
}

async fn forward_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(target: "courier::driver::stderr", "{}", line);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Minimal driver: issues a pairing code on initialize, rejects sends,
    /// exits after logout.
    const SCRIPT: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed 's/.*"request_id":\([0-9]*\).*/\1/')
  case "$line" in
    *'"type":"initialize"'*)
      printf '%s\n' '{"type":"pairing_code","code":"CODE1"}'
      printf 'not json\n'
      printf '{"type":"reply","request_id":%s,"ok":true}\n' "$id"
      ;;
    *'"type":"send_message"'*)
      printf '{"type":"reply","request_id":%s,"ok":false,"error":"recipient not found"}\n' "$id"
      ;;
    *'"type":"logout"'*)
      printf '{"type":"reply","request_id":%s,"ok":true}\n' "$id"
      exit 0
      ;;
  esac
done
"#;

    fn script_driver(events: mpsc::Sender<DriverEvent>) -> SubprocessDriver {
        let config = DriverConfig {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), SCRIPT.to_string()],
        };
        SubprocessDriver::new(&config, "test_session", events)
    }

    async fn next_event(rx: &mut mpsc::Receiver<DriverEvent>) -> DriverEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for driver event")
            .expect("event channel closed")
    }

    #[tokio::test]
    async fn send_before_initialize_is_not_running() {
        let (tx, _rx) = mpsc::channel(8);
        let driver = script_driver(tx);
        let err = driver
            .send_message(&ChatId::user("521234567890"), "hi")
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::NotRunning));
    }

    #[tokio::test]
    async fn full_session_over_stdio() {
        let (tx, mut rx) = mpsc::channel(8);
        let driver = script_driver(tx);

        driver.initialize().await.unwrap();
        assert_eq!(
            next_event(&mut rx).await,
            DriverEvent::PairingCode {
                code: "CODE1".to_string()
            }
        );

        let err = driver
            .send_message(&ChatId::user("521234567890"), "hi")
            .await
            .unwrap_err();
        match err {
            DriverError::Rejected(message) => assert_eq!(message, "recipient not found"),
            other => panic!("unexpected error: {other}"),
        }

        driver.logout().await.unwrap();
        assert_eq!(
            next_event(&mut rx).await,
            DriverEvent::Disconnected {
                reason: EXIT_REASON.to_string()
            }
        );
    }

    #[tokio::test]
    async fn initialize_restarts_exited_process() {
        let (tx, mut rx) = mpsc::channel(8);
        let driver = script_driver(tx);

        driver.initialize().await.unwrap();
        driver.logout().await.unwrap();
        // pairing code, then exit
        next_event(&mut rx).await;
        next_event(&mut rx).await;

        driver.initialize().await.unwrap();
        assert_eq!(
            next_event(&mut rx).await,
            DriverEvent::PairingCode {
                code: "CODE1".to_string()
            }
        );
    }

    #[tokio::test]
    async fn missing_program_fails_initialize() {
        let (tx, _rx) = mpsc::channel(8);
        let config = DriverConfig {
            command: "/nonexistent/courier-driver".to_string(),
            args: Vec::new(),
        };
        let driver = SubprocessDriver::new(&config, "test_session", tx);
        let err = driver.initialize().await.unwrap_err();
        assert!(matches!(err, DriverError::Io(_)));
    }
}
