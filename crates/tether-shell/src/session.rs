//! A shell's connection to the host.

use std::io::Write;
use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::runtime::Handle;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use tether::protocol::{
    Frame, FrameReader, FrameWriter, Sentinel, check_frame_size, split_resource_list,
};
use tether::{BridgeConfig, ConnectionError, Evaluator, ProtocolError, ResourceLoader};

/// Whether a command is waiting for its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    /// Ready for the next command.
    Idle,
    /// A command was sent and no reply has arrived yet.
    Busy,
    /// The host closed the connection.
    Closed,
}

/// Outcome of replaying the host's resources into the shadow evaluator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Resources loaded.
    pub loaded: usize,
    /// Resources skipped by an exclusion.
    pub skipped: usize,
    /// Resources whose load failed.
    pub failed: usize,
}

type SharedWriter = Arc<Mutex<FrameWriter<OwnedWriteHalf>>>;

/// Sends interrupts from outside the prompt loop.
#[derive(Debug, Clone)]
pub struct InterruptHandle {
    writer: SharedWriter,
}

impl InterruptHandle {
    /// Ask the host to cancel whatever it is evaluating. No reply is expected.
    pub async fn interrupt(&self) {
        if let Err(e) = self
            .writer
            .lock()
            .await
            .send_sentinel(Sentinel::Interrupt)
            .await
        {
            tracing::debug!("Failed to send interrupt: {}", e);
        }
    }
}

/// One connection to the host.
///
/// Replies are consumed by a receiver task started with
/// [`start_receiver`](Self::start_receiver); the prompt side learns about
/// them only through the [`LockState`] channel.
pub struct Session {
    config: BridgeConfig,
    runtime: Handle,
    writer: SharedWriter,
    reader: Option<FrameReader<OwnedReadHalf>>,
    state: watch::Sender<LockState>,
    pending: String,
    receiver: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &*self.state.borrow())
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Connect to a host at `addr` (`host:port`).
    pub async fn connect(addr: &str, config: BridgeConfig) -> Result<Self, ConnectionError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| ConnectionError {
                addr: addr.to_string(),
                source,
            })?;
        tracing::info!("Connected to {}", addr);

        let (read_half, write_half) = stream.into_split();
        let (state, _) = watch::channel(LockState::Idle);
        Ok(Self {
            reader: Some(FrameReader::new(read_half, config.client_recv_capacity)),
            writer: Arc::new(Mutex::new(FrameWriter::new(write_half))),
            runtime: Handle::current(),
            config,
            state,
            pending: String::new(),
            receiver: None,
        })
    }

    /// Settings this session was created with.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Current lock state.
    pub fn lock_state(&self) -> LockState {
        *self.state.borrow()
    }

    /// Whether the host has gone away.
    pub fn is_closed(&self) -> bool {
        self.lock_state() == LockState::Closed
    }

    /// Input buffered from earlier incomplete lines.
    pub fn pending(&self) -> &str {
        &self.pending
    }

    /// Drop any buffered incomplete input.
    pub fn clear_pending(&mut self) {
        self.pending.clear();
    }

    /// Handle for sending interrupts from another task.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle {
            writer: Arc::clone(&self.writer),
        }
    }

    /// Ask the host for its loaded resources and load each through `loader`,
    /// skipping identities that contain any of `exclusions`.
    ///
    /// Must run before [`start_receiver`](Self::start_receiver): the reply
    /// is read directly. Per-resource failures are counted, not returned.
    pub async fn load_startup_resources(
        &mut self,
        loader: &mut dyn ResourceLoader,
        exclusions: &[String],
    ) -> Result<LoadReport, ProtocolError> {
        let reader = self.reader.as_mut().ok_or(ProtocolError::Closed)?;
        self.writer
            .lock()
            .await
            .send_sentinel(Sentinel::Asm)
            .await?;

        let identities = match reader.read_frame().await? {
            None => return Err(ProtocolError::Closed),
            Some(Frame::Text(body)) => split_resource_list(&body),
            Some(Frame::Sentinel(_)) => Vec::new(),
        };

        let mut report = LoadReport::default();
        for identity in &identities {
            if exclusions.iter().any(|ex| identity.contains(ex.as_str())) {
                tracing::debug!("Skipping excluded resource {}", identity);
                report.skipped += 1;
                continue;
            }
            match loader.load(identity) {
                Ok(()) => report.loaded += 1,
                Err(e) => {
                    tracing::debug!("Failed to load {}: {}", identity, e);
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }

    /// Start printing replies to `sink`.
    ///
    /// Each received frame other than the no-value sentinel is written
    /// verbatim plus a newline. After every receive the receiver waits for the
    /// configured delay, then releases the lock. Does nothing if already
    /// started.
    pub fn start_receiver<W>(&mut self, mut sink: W)
    where
        W: Write + Send + 'static,
    {
        let Some(mut reader) = self.reader.take() else {
            return;
        };
        let state = self.state.clone();
        let delay = self.config.receive_delay;

        self.receiver = Some(self.runtime.spawn(async move {
            loop {
                let frame = match reader.read_raw().await {
                    Ok(Some(bytes)) => bytes.to_vec(),
                    Ok(None) => {
                        tracing::info!("Host closed the connection");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("Receive failed: {}", e);
                        break;
                    }
                };

                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }

                if frame != Sentinel::NoValue.as_bytes() {
                    let written = sink
                        .write_all(&frame)
                        .and_then(|()| sink.write_all(b"\n"))
                        .and_then(|()| sink.flush());
                    if let Err(e) = written {
                        tracing::warn!("Failed to write reply: {}", e);
                    }
                }
                state.send_replace(LockState::Idle);
            }
            state.send_replace(LockState::Closed);
        }));
    }

    /// Send one input line.
    ///
    /// The line is appended to any buffered incomplete input, sent as one
    /// frame, and checked against `shadow` for completeness. Returns `true`
    /// when the statement is still open and the next prompt should be a
    /// continuation prompt.
    pub async fn submit(
        &mut self,
        line: &str,
        shadow: &dyn Evaluator,
    ) -> Result<bool, ProtocolError> {
        let text = if self.pending.is_empty() {
            line.to_string()
        } else {
            format!("{}\n{}", self.pending, line)
        };
        check_frame_size(text.as_bytes(), self.config.host_recv_capacity)?;

        let locked = self.state.send_if_modified(|s| {
            if *s == LockState::Closed {
                return false;
            }
            *s = LockState::Busy;
            true
        });
        if !locked {
            return Err(ProtocolError::Closed);
        }

        if let Err(e) = self.writer.lock().await.send_text(&text).await {
            self.state.send_if_modified(|s| {
                if *s == LockState::Busy {
                    *s = LockState::Idle;
                    true
                } else {
                    false
                }
            });
            return Err(e);
        }

        match shadow.continuation(&text) {
            Ok(Some(rest)) => {
                self.pending = rest;
                Ok(true)
            }
            Ok(None) => {
                self.pending.clear();
                Ok(false)
            }
            Err(e) => {
                tracing::debug!("Shadow evaluator rejected input: {}", e);
                self.pending.clear();
                Ok(false)
            }
        }
    }

    /// Wait until the in-flight command's reply has been handled or the
    /// connection closed.
    pub async fn wait_idle(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|s| *s != LockState::Busy).await;
    }

    /// Ask the host to cancel the running evaluation. Fire and forget.
    pub async fn interrupt(&self) {
        self.interrupt_handle().interrupt().await;
    }

    /// Close the connection and stop the receiver.
    pub async fn close(mut self) {
        if let Err(e) = self.writer.lock().await.shutdown().await {
            tracing::debug!("Shutdown failed: {}", e);
        }
        if let Some(receiver) = self.receiver.take() {
            receiver.abort();
        }
    }
}
