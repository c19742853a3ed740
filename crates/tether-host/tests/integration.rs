//! Integration tests driving the host over real TCP connections.

#![allow(clippy::unwrap_used)] // unwrap is acceptable in tests

use std::net::SocketAddr;
use std::sync::{Arc, Once};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::time::timeout;

use tether::protocol::{
    CLIENT_RECV_CAPACITY, FrameReader, FrameWriter, HOST_RECV_CAPACITY, Sentinel,
};
use tether::{HostConfig, ResourceHandle, ScriptEvaluator, StaticCatalog};
use tether_host::{ServerBridge, ServerHandle};

static INIT_TRACING: Once = Once::new();

fn init_tracing() {
    INIT_TRACING.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("tether_host=debug,tether=debug")
            .with_test_writer()
            .init();
    });
}

const NO_VALUE: &str = "\u{6}_NONO_\u{6}";
const WAIT: Duration = Duration::from_secs(5);

async fn start_host(catalog: StaticCatalog) -> ServerHandle {
    init_tracing();
    let config = HostConfig {
        addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        ..Default::default()
    };
    ServerBridge::bind(config, Arc::new(ScriptEvaluator::new()), Arc::new(catalog))
        .await
        .unwrap()
        .spawn()
        .unwrap()
}

struct TestShell {
    reader: FrameReader<OwnedReadHalf>,
    writer: FrameWriter<OwnedWriteHalf>,
}

impl TestShell {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read_half, write_half) = stream.into_split();
        Self {
            reader: FrameReader::new(read_half, CLIENT_RECV_CAPACITY),
            writer: FrameWriter::new(write_half),
        }
    }

    async fn send(&mut self, text: &str) {
        self.writer.send_text(text).await.unwrap();
    }

    /// Read frames until the accumulated text satisfies `done`.
    ///
    /// Frames written back to back may arrive in one receive, so assertions
    /// work on the concatenation.
    async fn read_until(&mut self, done: impl Fn(&str) -> bool) -> String {
        let mut text = String::new();
        let finished = timeout(WAIT, async {
            while !done(&text) {
                let bytes = self.reader.read_raw().await.unwrap().unwrap();
                text.push_str(&String::from_utf8_lossy(bytes));
            }
        })
        .await;
        assert!(finished.is_ok(), "timed out waiting for reply, got {text:?}");
        text
    }

    async fn ask(&mut self, command: &str) -> String {
        self.send(command).await;
        self.read_until(|text| !text.is_empty()).await
    }
}

#[tokio::test]
async fn test_value_reply() {
    let host = start_host(StaticCatalog::default()).await;
    let mut shell = TestShell::connect(host.local_addr()).await;

    assert_eq!(shell.ask("2+2;").await, "4");
    assert_eq!(shell.ask("[1, [2, 3]];").await, "{ 1, { 2, 3 } }");
    assert_eq!(shell.ask("{\"k\": \"v\"};").await, "{{ \"k\", \"v\" }}");

    host.shutdown().await;
}

#[tokio::test]
async fn test_no_value_reply_and_state_persists() {
    let host = start_host(StaticCatalog::default()).await;
    let mut shell = TestShell::connect(host.local_addr()).await;

    assert_eq!(shell.ask("x = 40;").await, NO_VALUE);
    assert_eq!(shell.ask("x + 2;").await, "42");

    // State lives in the host evaluator, not the connection.
    let mut other = TestShell::connect(host.local_addr()).await;
    assert_eq!(other.ask("x;").await, "40");

    host.shutdown().await;
}

#[tokio::test]
async fn test_error_reply() {
    let host = start_host(StaticCatalog::default()).await;
    let mut shell = TestShell::connect(host.local_addr()).await;

    assert_eq!(
        shell.ask("missing;").await,
        "NameError: the name `missing` does not exist in the current context"
    );
    assert!(shell.ask("1 / 0;").await.starts_with("RuntimeError: "));
    assert!(shell.ask("1 2").await.starts_with("SyntaxError: "));

    host.shutdown().await;
}

#[tokio::test]
async fn test_resource_list_in_dependency_order() {
    let catalog = StaticCatalog::new(vec![
        ResourceHandle::new("libB", ["libA"]),
        ResourceHandle::new("libA", Vec::<String>::new()),
    ]);
    let host = start_host(catalog).await;
    let mut shell = TestShell::connect(host.local_addr()).await;

    shell.writer.send_sentinel(Sentinel::Asm).await.unwrap();
    assert_eq!(shell.read_until(|t| !t.is_empty()).await, "libA;libB");

    host.shutdown().await;
}

#[tokio::test]
async fn test_empty_resource_list() {
    let host = start_host(StaticCatalog::default()).await;
    let mut shell = TestShell::connect(host.local_addr()).await;

    shell.writer.send_sentinel(Sentinel::Asm).await.unwrap();
    assert_eq!(shell.read_until(|t| !t.is_empty()).await, NO_VALUE);

    host.shutdown().await;
}

#[tokio::test]
async fn test_interrupt_cancels_running_command() {
    let host = start_host(StaticCatalog::default()).await;
    let mut shell = TestShell::connect(host.local_addr()).await;

    shell.send("sleep(30000);").await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    shell.writer.send_sentinel(Sentinel::Interrupt).await.unwrap();

    assert_eq!(
        shell.read_until(|t| !t.is_empty()).await,
        "InterruptedError: evaluation was interrupted"
    );

    // The connection keeps working.
    assert_eq!(shell.ask("1;").await, "1");

    host.shutdown().await;
}

#[tokio::test]
async fn test_interrupt_cancels_long_rendering() {
    let host = start_host(StaticCatalog::default()).await;
    let mut shell = TestShell::connect(host.local_addr()).await;

    // Building the range is instant; formatting twenty million items is not.
    shell.send("range(0, 20000000);").await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    shell.writer.send_sentinel(Sentinel::Interrupt).await.unwrap();

    assert_eq!(
        shell.read_until(|t| !t.is_empty()).await,
        "InterruptedError: evaluation was interrupted"
    );
    assert_eq!(shell.ask("1;").await, "1");

    host.shutdown().await;
}

#[tokio::test]
async fn test_deeply_nested_command_is_rejected() {
    let host = start_host(StaticCatalog::default()).await;
    let mut shell = TestShell::connect(host.local_addr()).await;

    let command = format!("{}1{};", "(".repeat(2040), ")".repeat(2040));
    assert!(command.len() < HOST_RECV_CAPACITY);

    let reply = shell.ask(&command).await;
    assert!(reply.starts_with("SyntaxError: "), "reply: {reply}");
    assert!(reply.contains("nesting too deep"), "reply: {reply}");

    // The host is still up for this and other connections.
    assert_eq!(shell.ask("1;").await, "1");
    let mut other = TestShell::connect(host.local_addr()).await;
    assert_eq!(other.ask("2;").await, "2");

    host.shutdown().await;
}

#[tokio::test]
async fn test_diagnostics_go_to_issuing_connection() {
    let host = start_host(StaticCatalog::default()).await;
    let mut talker = TestShell::connect(host.local_addr()).await;
    let mut bystander = TestShell::connect(host.local_addr()).await;

    talker.send("print(\"hello\");").await;
    let text = talker.read_until(|t| t.ends_with(NO_VALUE)).await;
    assert_eq!(text, format!("hello{NO_VALUE}"));

    // The bystander's next receive is its own reply, not the printed text.
    assert_eq!(bystander.ask("7;").await, "7");

    host.shutdown().await;
}

#[tokio::test]
async fn test_oversized_command_is_read_as_two_frames() {
    let host = start_host(StaticCatalog::default()).await;
    let mut shell = TestShell::connect(host.local_addr()).await;

    // The host reads 4096 bytes per receive, so the trailing `8;` lands in a
    // second frame and is evaluated as its own command.
    let mut payload = " ".repeat(4094);
    payload.push_str("7;8;");
    shell.send(&payload).await;

    assert_eq!(shell.read_until(|t| t.len() >= 2).await, "78");

    host.shutdown().await;
}

#[tokio::test]
async fn test_disconnect_does_not_stop_host() {
    let host = start_host(StaticCatalog::default()).await;

    let shell = TestShell::connect(host.local_addr()).await;
    drop(shell);

    let mut shell = TestShell::connect(host.local_addr()).await;
    assert_eq!(shell.ask("true;").await, "true");

    host.shutdown().await;
}
