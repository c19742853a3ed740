//! Per-connection tasks.

use std::net::SocketAddr;
use std::sync::{Arc, PoisonError};

use tokio::net::TcpStream;
use tokio::sync::mpsc;

use tether::eval::{DiagnosticSink, EvalError, Evaluation, Evaluator};
use tether::protocol::{Frame, FrameReader, FrameWriter, Sentinel, join_resource_list};
use tether::{CycleMode, order_resources};

use crate::server::Shared;

/// The connection a command came from.
///
/// Passed to the evaluator as its diagnostic sink, so anything it prints
/// while running a command is written back to the issuing shell.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    id: u64,
    peer: SocketAddr,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
}

impl ConnectionContext {
    /// Host-assigned connection number.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remote address.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    fn send(&self, frame: Vec<u8>) {
        if self.outbound.send(frame).is_err() {
            tracing::debug!(
                conn = self.id,
                peer = %self.peer,
                "Dropping frame for closed connection"
            );
        }
    }
}

impl DiagnosticSink for ConnectionContext {
    fn emit(&self, message: &str) {
        self.send(message.as_bytes().to_vec());
    }
}

/// Serve one shell until it disconnects.
///
/// The reader handles control sentinels inline and queues commands for the
/// evaluation worker, so an interrupt is seen while a command is running.
pub(crate) async fn serve(stream: TcpStream, peer: SocketAddr, id: u64, shared: Arc<Shared>) {
    let (read_half, write_half) = stream.into_split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let (command_tx, mut command_rx) = mpsc::unbounded_channel::<String>();

    let ctx = ConnectionContext {
        id,
        peer,
        outbound: outbound_tx,
    };

    let writer = tokio::spawn(async move {
        let mut writer = FrameWriter::new(write_half);
        while let Some(frame) = outbound_rx.recv().await {
            if let Err(e) = writer.send(&frame).await {
                tracing::debug!(conn = id, "Write failed: {}", e);
                break;
            }
        }
    });

    let worker = tokio::spawn({
        let ctx = ctx.clone();
        let shared = Arc::clone(&shared);
        async move {
            while let Some(command) = command_rx.recv().await {
                let reply = evaluate(&shared, &ctx, command).await;
                ctx.send(reply);
            }
        }
    });

    let mut reader = FrameReader::new(read_half, shared.config.recv_capacity);
    loop {
        let frame = match reader.read_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                tracing::info!(conn = id, %peer, "Shell disconnected");
                break;
            }
            Err(e) => {
                tracing::warn!(conn = id, %peer, "Read failed: {}", e);
                break;
            }
        };

        match frame {
            Frame::Sentinel(Sentinel::Asm) => ctx.send(resource_list(&shared).into_bytes()),
            Frame::Sentinel(Sentinel::Interrupt) => {
                tracing::debug!(conn = id, "Interrupt requested");
                shared.evaluator.interrupt();
            }
            Frame::Sentinel(Sentinel::NoValue) => {
                tracing::debug!(conn = id, "Ignoring stray no-value sentinel");
            }
            Frame::Text(command) => {
                if command_tx.send(command).is_err() {
                    break;
                }
            }
        }
    }

    // Let queued commands finish; the writer ends once every sender is gone.
    drop(command_tx);
    drop(ctx);
    let _ = worker.await;
    let _ = writer.await;
}

/// Resource identities in load order, `;`-joined.
///
/// An empty list goes out as the no-value sentinel: a zero-length write
/// never reaches the shell.
fn resource_list(shared: &Shared) -> String {
    let handles = shared.catalog.loaded_resources();
    let ordered = match order_resources(&handles, CycleMode::Lenient) {
        Ok(ordered) => ordered,
        Err(e) => {
            tracing::warn!("Resource ordering failed: {}", e);
            handles
        }
    };
    if ordered.is_empty() {
        return String::from_utf8_lossy(Sentinel::NoValue.as_bytes()).into_owned();
    }
    let identities: Vec<&str> = ordered.iter().map(|h| h.identity.as_str()).collect();
    join_resource_list(&identities)
}

async fn evaluate(shared: &Arc<Shared>, ctx: &ConnectionContext, command: String) -> Vec<u8> {
    let shared = Arc::clone(shared);
    let sink = ctx.clone();
    let (conn, peer) = (ctx.id(), ctx.peer());

    // Rendering happens under the lock too: a large sequence takes as long
    // to format as to build, and an interrupt must reach it.
    let reply = tokio::task::spawn_blocking(move || {
        let _guard = shared
            .eval_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        tracing::debug!(conn, %peer, command = %command, "Evaluating");
        let result = shared.evaluator.evaluate(&command, &sink);
        render_reply(&*shared.evaluator, result)
    })
    .await;

    match reply {
        Ok(reply) => reply,
        Err(e) => {
            tracing::error!(conn, %peer, "Evaluation task failed: {}", e);
            EvalError::Runtime("evaluation task failed".to_string())
                .render()
                .into_bytes()
        }
    }
}

/// Reply bytes for an evaluation outcome.
pub(crate) fn render_reply(
    evaluator: &dyn Evaluator,
    result: Result<Evaluation, EvalError>,
) -> Vec<u8> {
    let rendered = result.and_then(|evaluation| match evaluation.value {
        Some(value) => evaluator.render(&value),
        None => Ok(String::new()),
    });
    let text = match rendered {
        Ok(text) => text,
        Err(e) => e.render(),
    };
    if text.is_empty() {
        return Sentinel::NoValue.as_bytes().to_vec();
    }
    text.into_bytes()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use tether::{ScriptEvaluator, Value};

    use super::*;

    fn reply(result: Result<Evaluation, EvalError>) -> Vec<u8> {
        render_reply(&ScriptEvaluator::new(), result)
    }

    #[test]
    fn test_render_reply() {
        assert_eq!(reply(Ok(Evaluation::with_value(Value::Int(4)))), b"4".to_vec());
        assert_eq!(
            reply(Ok(Evaluation::no_value())),
            Sentinel::NoValue.as_bytes().to_vec()
        );
        assert_eq!(
            reply(Ok(Evaluation::incomplete("[1,"))),
            Sentinel::NoValue.as_bytes().to_vec()
        );
        assert_eq!(
            reply(Err(EvalError::Undefined("y".into()))),
            b"NameError: the name `y` does not exist in the current context".to_vec()
        );
    }

    #[test]
    fn test_empty_rendering_is_no_value() {
        assert_eq!(
            reply(Ok(Evaluation::with_value(Value::Opaque(String::new())))),
            Sentinel::NoValue.as_bytes().to_vec()
        );
    }

    #[test]
    fn test_interrupted_rendering_is_an_error_reply() {
        let evaluator = ScriptEvaluator::new();
        let value = evaluator
            .evaluate("range(0, 1000000000);", &tether::NullSink)
            .unwrap();
        evaluator.interrupt();
        assert_eq!(
            render_reply(&evaluator, Ok(value)),
            b"InterruptedError: evaluation was interrupted".to_vec()
        );
    }

    #[tokio::test]
    async fn test_context_routes_diagnostics() {
        let (outbound, mut rx) = mpsc::unbounded_channel();
        let ctx = ConnectionContext {
            id: 3,
            peer: SocketAddr::from(([127, 0, 0, 1], 4000)),
            outbound,
        };
        assert_eq!(ctx.id(), 3);
        assert_eq!(ctx.peer().port(), 4000);

        ctx.emit("hello");
        assert_eq!(rx.recv().await.unwrap(), b"hello".to_vec());
    }
}
