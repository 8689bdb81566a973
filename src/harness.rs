//! Test-facing composition: spawn a peer, drive clients, assert behavior.
//!
//! [`ServerHarness`] tests a server implementation: it picks a free port,
//! hands it to the injected controller, and drives any number of simulated
//! clients against it from one test task. [`ClientHarness`] tests a client
//! implementation: it plays the server, accepting the client's connection
//! and negotiating capabilities with it.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use tokio::net::{TcpListener, TcpStream};

use crate::cap::{cap_list_to_map, classify_cap_ls, CapNegotiation, ProtocolVersion};
use crate::controller::{RunConfig, ServerController};
use crate::error::{HarnessError, Result};
use crate::matching::{assert_message, MessageSpec};
use crate::message::Message;
use crate::session::Session;

/// How long to poll for the spawned server's listener before giving up.
const STARTUP_POLL_INTERVAL: Duration = Duration::from_millis(25);
const STARTUP_POLL_ATTEMPTS: u32 = 400;

/// Drives a server implementation under test.
pub struct ServerHarness {
    controller: Box<dyn ServerController>,
    hostname: String,
    port: u16,
    show_io: bool,
    clients: HashMap<String, Session>,
    next_client: u32,
}

impl ServerHarness {
    /// Pick a free port for the server and wrap the injected controller.
    /// Nothing is spawned until [`start`](Self::start).
    pub fn new(controller: Box<dyn ServerController>) -> anyhow::Result<Self> {
        let (hostname, port) = find_hostname_and_port()?;
        Ok(Self {
            controller,
            hostname,
            port,
            show_io: false,
            clients: HashMap::new(),
            next_client: 0,
        })
    }

    pub fn show_io(&mut self, show_io: bool) {
        self.show_io = show_io;
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn controller(&self) -> &dyn ServerController {
        self.controller.as_ref()
    }

    /// Spawn the server and wait until it accepts connections.
    pub async fn start(&mut self, config: &RunConfig) -> anyhow::Result<()> {
        self.controller.run(&self.hostname, self.port, config)?;
        for _ in 0..STARTUP_POLL_ATTEMPTS {
            if TcpStream::connect((self.hostname.as_str(), self.port))
                .await
                .is_ok()
            {
                return Ok(());
            }
            tokio::time::sleep(STARTUP_POLL_INTERVAL).await;
        }
        anyhow::bail!(
            "server under test never listened on {}:{}",
            self.hostname,
            self.port
        )
    }

    /// Kill the server and drop all client connections, without QUIT.
    pub fn stop(&mut self) {
        self.clients.clear();
        self.controller.kill();
    }

    /// Connect a raw client socket. With no `name`, the lowest unused
    /// integer is assigned, mirroring how tests number their clients.
    pub async fn add_client(&mut self, name: Option<&str>) -> Result<String> {
        let name = match name {
            Some(name) => name.to_string(),
            None => {
                self.next_client += 1;
                self.next_client.to_string()
            }
        };
        let session = Session::connect(
            (self.hostname.as_str(), self.port),
            &name,
            self.show_io,
        )
        .await?;
        self.clients.insert(name.clone(), session);
        Ok(name)
    }

    /// Drop a client's connection without sending QUIT.
    pub fn remove_client(&mut self, name: &str) {
        self.clients.remove(name);
    }

    fn client_mut(&mut self, name: &str) -> &mut Session {
        self.clients
            .get_mut(name)
            .unwrap_or_else(|| panic!("no such client: {name}"))
    }

    pub async fn send_line(&mut self, client: &str, line: &str) -> Result<()> {
        self.client_mut(client).send_line(line).await
    }

    pub async fn get_line(&mut self, client: &str) -> Result<String> {
        self.client_mut(client).get_line().await
    }

    pub async fn get_message(&mut self, client: &str) -> Result<Message> {
        self.client_mut(client).get_message().await
    }

    pub async fn get_messages(&mut self, client: &str) -> Result<Vec<Message>> {
        self.client_mut(client).get_messages().await
    }

    /// Next message that is not a NOTICE — servers are allowed to chat
    /// freely during registration, and tests must not trip over it.
    pub async fn get_registration_message(&mut self, client: &str) -> Result<Message> {
        self.client_mut(client)
            .get_message_filtered(|m| Ok(m.command != "NOTICE"))
            .await
    }

    /// Read a whole `CAP LS` block, following 302 multi-line continuations
    /// (`CAP <nick> LS * :...`), into a capability name → value map.
    pub async fn get_cap_ls(&mut self, client: &str) -> Result<HashMap<String, Option<String>>> {
        let mut caps: Vec<String> = Vec::new();
        loop {
            let m = self.get_registration_message(client).await?;
            assert_message(&m, &MessageSpec::command("CAP").with_subcommand("LS"))?;
            if m.params[2] == "*" {
                let more = m.params.get(3).ok_or_else(|| {
                    HarnessError::protocol(format!("CAP LS continuation without payload: {m}"))
                })?;
                caps.extend(more.split_whitespace().map(str::to_string));
            } else {
                caps.extend(m.params[2].split_whitespace().map(str::to_string));
                return Ok(cap_list_to_map(&caps));
            }
        }
    }

    /// Register a client the boring way (NICK/USER, wait for 001), then
    /// PING/PONG to drain the rest of the welcome burst so the next read
    /// sees only what the test itself provokes.
    pub async fn connect_client(&mut self, nick: &str, name: Option<&str>) -> Result<String> {
        let name = self.add_client(name).await?;
        self.send_line(&name, &format!("NICK {nick}")).await?;
        self.send_line(&name, "USER username * * :Realname").await?;
        loop {
            if self.get_message(&name).await?.command == "001" {
                break;
            }
        }
        self.send_line(&name, "PING welcome").await?;
        loop {
            if self.get_message(&name).await?.command == "PONG" {
                break;
            }
        }
        Ok(name)
    }

    /// Assert the server dropped this client. The client slot is released
    /// only when the assertion passes; on failure the session stays usable
    /// so the test can inspect what the still-alive peer is doing.
    pub async fn assert_disconnected(&mut self, client: &str) -> Result<()> {
        self.client_mut(client).assert_disconnected().await?;
        self.clients.remove(client);
        Ok(())
    }
}

/// Drives a client implementation under test, playing the server side.
pub struct ClientHarness {
    listener: TcpListener,
    session: Option<Session>,
    show_io: bool,
    /// Outcome of `read_cap_ls`: the CAP version, or `None` when the client
    /// skipped negotiation with an immediate `CAP END`.
    pub protocol_version: Option<ProtocolVersion>,
    negotiation: Option<CapNegotiation>,
}

impl ClientHarness {
    /// Listen on an ephemeral port for the client under test.
    pub async fn bind(show_io: bool) -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind client-test listener")?;
        Ok(Self {
            listener,
            session: None,
            show_io,
            protocol_version: None,
            negotiation: None,
        })
    }

    /// Address the controller should point the client at.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept the client's connection. Blocking; run the controller first.
    pub async fn accept_client(&mut self) -> Result<()> {
        let (stream, _addr) = self.listener.accept().await?;
        self.session = Some(Session::from_stream(stream, "client", self.show_io));
        Ok(())
    }

    /// The accepted client's session. Panics before [`accept_client`](Self::accept_client).
    pub fn session_mut(&mut self) -> &mut Session {
        self.session
            .as_mut()
            .expect("no client accepted yet")
    }

    /// Accept the client and classify its opening `CAP` message.
    pub async fn read_cap_ls(&mut self) -> Result<Option<ProtocolVersion>> {
        self.accept_client().await?;
        let msg = self.session_mut().get_message().await?;
        let version = classify_cap_ls(&msg)?;
        self.protocol_version = version;
        Ok(version)
    }

    /// Full negotiation against an advertised capability set, without
    /// consuming the end of it: the first non-REQ message (commonly
    /// `CAP END`) is returned so the caller can continue the exchange.
    /// Returns `None` when the client skipped negotiation entirely.
    pub async fn negotiate_capabilities(
        &mut self,
        caps: &[&str],
        cap_ls: bool,
    ) -> Result<Option<Message>> {
        let mut negotiation = CapNegotiation::new(caps);
        if cap_ls {
            if self.read_cap_ls().await?.is_none() {
                return Ok(None);
            }
            negotiation.advertise(self.session_mut()).await?;
        }
        let session = self
            .session
            .as_mut()
            .expect("no client accepted yet");
        let msg = negotiation.negotiate(session).await?;
        self.negotiation = Some(negotiation);
        Ok(Some(msg))
    }

    /// Nick observed during negotiation, if the client sent one.
    pub fn nick(&self) -> Option<&str> {
        self.negotiation.as_ref()?.nick.as_deref()
    }

    /// USER params observed during negotiation, if the client sent them.
    pub fn user(&self) -> Option<&[String]> {
        self.negotiation.as_ref()?.user.as_deref()
    }

    /// Capability names the client successfully requested.
    pub fn acked_capabilities(&self) -> impl Iterator<Item = &str> {
        self.negotiation
            .iter()
            .flat_map(|n| n.acked.iter().map(String::as_str))
    }
}

/// Bind port 0 to learn a free port, then release it for the server to take.
fn find_hostname_and_port() -> anyhow::Result<(String, u16)> {
    let listener =
        std::net::TcpListener::bind(("127.0.0.1", 0)).context("failed to probe for a free port")?;
    let addr = listener.local_addr()?;
    Ok((addr.ip().to_string(), addr.port()))
}
