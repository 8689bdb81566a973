//! End-to-end [`ServerHarness`] tests against a minimal in-process server.
//!
//! The fake controller stands in for a real implementation's process
//! controller: `run` starts an in-process listener instead of spawning a
//! binary, which keeps these tests hermetic while exercising the same
//! startup-poll, registration, synchronization, and teardown paths.

use std::collections::HashSet;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use irc_conformance::{
    require_sasl_mechanism, HarnessError, Message, RunConfig, ServerController, ServerHarness,
};

/// Serve one connection of a deliberately tiny IRC server: registration,
/// PING/PONG, a CAP LS block with a 302 continuation, and the conformant
/// drop-on-oversized-line behavior.
async fn serve(sock: TcpStream) {
    let (reader, mut writer) = sock.into_split();
    let mut reader = BufReader::new(reader);
    let mut nick = String::from("*");
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        if line.len() > 512 {
            // Conformant servers kill the connection on over-length input.
            return;
        }
        let Ok(msg) = Message::parse(&line) else {
            continue;
        };
        let reply = match msg.command.as_str() {
            "NICK" => {
                nick = msg.params.first().cloned().unwrap_or_default();
                continue;
            }
            "USER" => format!(
                "NOTICE * :*** Looking up your hostname\r\n:fake.server 001 {nick} :Welcome"
            ),
            "PING" => format!("PONG {}", msg.params.first().map(String::as_str).unwrap_or("")),
            "CAP" => {
                // Advertise over two lines to exercise 302 continuations.
                format!(
                    "CAP {nick} LS * :sasl=PLAIN account-tag\r\nCAP {nick} LS :message-tags"
                )
            }
            _ => continue,
        };
        if writer
            .write_all(format!("{reply}\r\n").as_bytes())
            .await
            .is_err()
        {
            return;
        }
    }
}

struct FakeController {
    mechanisms: HashSet<String>,
    accept_loop: Option<JoinHandle<()>>,
}

impl FakeController {
    fn new() -> Self {
        Self {
            mechanisms: ["PLAIN".to_string()].into_iter().collect(),
            accept_loop: None,
        }
    }
}

impl ServerController for FakeController {
    fn run(&mut self, hostname: &str, port: u16, _config: &RunConfig) -> anyhow::Result<()> {
        let addr = format!("{hostname}:{port}");
        self.accept_loop = Some(tokio::spawn(async move {
            let listener = TcpListener::bind(addr).await.unwrap();
            loop {
                let (sock, _) = listener.accept().await.unwrap();
                tokio::spawn(serve(sock));
            }
        }));
        Ok(())
    }

    fn kill(&mut self) {
        if let Some(handle) = self.accept_loop.take() {
            handle.abort();
        }
    }

    fn supported_sasl_mechanisms(&self) -> &HashSet<String> {
        &self.mechanisms
    }
}

async fn started_harness() -> ServerHarness {
    let mut harness = ServerHarness::new(Box::new(FakeController::new())).unwrap();
    harness.start(&RunConfig::default()).await.unwrap();
    harness
}

#[tokio::test]
async fn connect_client_registers_and_settles() {
    let mut harness = started_harness().await;
    let name = harness.connect_client("alice", Some("alice")).await.unwrap();
    assert_eq!(name, "alice");

    // The welcome burst is fully drained: a synchronize sees no traffic.
    let pending = harness.get_messages("alice").await.unwrap();
    assert!(pending.is_empty(), "unexpected traffic: {pending:?}");
    harness.stop();
}

#[tokio::test]
async fn unnamed_clients_get_sequential_slots() {
    let mut harness = started_harness().await;
    assert_eq!(harness.add_client(None).await.unwrap(), "1");
    assert_eq!(harness.add_client(None).await.unwrap(), "2");
    harness.stop();
}

#[tokio::test]
async fn registration_messages_skip_notices() {
    let mut harness = started_harness().await;
    harness.add_client(Some("c")).await.unwrap();
    harness.send_line("c", "NICK carol").await.unwrap();
    harness.send_line("c", "USER u * * :Carol").await.unwrap();
    let msg = harness.get_registration_message("c").await.unwrap();
    assert_eq!(msg.command, "001");
    harness.stop();
}

#[tokio::test]
async fn cap_ls_block_follows_continuations() {
    let mut harness = started_harness().await;
    harness.add_client(Some("caps")).await.unwrap();
    harness.send_line("caps", "CAP LS 302").await.unwrap();
    let caps = harness.get_cap_ls("caps").await.unwrap();
    assert_eq!(caps.len(), 3);
    assert_eq!(caps.get("sasl").unwrap().as_deref(), Some("PLAIN"));
    assert_eq!(caps.get("account-tag").unwrap(), &None);
    assert_eq!(caps.get("message-tags").unwrap(), &None);
    harness.stop();
}

#[tokio::test]
async fn oversized_line_disconnects_the_client() {
    let mut harness = started_harness().await;
    harness.connect_client("mallory", Some("mallory")).await.unwrap();
    harness
        .send_line("mallory", &format!("PRIVMSG #test {}", "a".repeat(16384)))
        .await
        .unwrap();
    harness.assert_disconnected("mallory").await.unwrap();
    harness.stop();
}

#[tokio::test]
async fn assert_disconnected_fails_while_server_answers() {
    let mut harness = started_harness().await;
    harness.connect_client("alive", Some("alive")).await.unwrap();
    let err = harness.assert_disconnected("alive").await.unwrap_err();
    assert!(matches!(err, HarnessError::Assertion(_)));

    // The failed assertion must not eat the client: the slot is still
    // there and the connection still works.
    harness.send_line("alive", "PING still-here").await.unwrap();
    let msg = harness
        .get_message("alive")
        .await
        .unwrap();
    assert_eq!(msg.command, "PONG");
    assert_eq!(msg.params, vec!["still-here"]);
    harness.stop();
}

#[tokio::test]
async fn optional_mechanisms_are_queried_from_the_controller() {
    let harness = started_harness().await;
    assert!(require_sasl_mechanism(harness.controller(), "PLAIN").is_ok());
    assert!(matches!(
        require_sasl_mechanism(harness.controller(), "EXTERNAL"),
        Err(HarnessError::FeatureNotSupported(_))
    ));
}
