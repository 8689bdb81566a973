//! Smoke check against an already-running IRC server.
//!
//! Registers, verifies PING/PONG, and (optionally) verifies that the server
//! drops a client sending an oversized line. Useful for a quick conformance
//! sanity pass without the full scenario runner.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use irc_conformance::{MessageSpec, Session};

#[derive(Parser, Debug)]
#[command(name = "irc-conformance", version, about)]
struct Args {
    /// Server address (host:port).
    #[arg(long, default_value = "127.0.0.1:6667")]
    server: String,

    /// Nickname to register with.
    #[arg(long, default_value = "smoketest")]
    nick: String,

    /// Echo all protocol IO.
    #[arg(long)]
    show_io: bool,

    /// Also verify that an oversized line gets the connection dropped.
    /// Destructive: the probe connection dies by design.
    #[arg(long)]
    readq: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("irc_conformance=debug".parse()?),
        )
        .init();

    let args = Args::parse();

    let mut session = Session::connect(args.server.as_str(), "smoke", args.show_io).await?;
    session.send_line(&format!("NICK {}", args.nick)).await?;
    session
        .send_line("USER username * * :Conformance Smoke Check")
        .await?;
    loop {
        let msg = session.get_message().await?;
        if msg.command == "001" {
            break;
        }
    }
    tracing::info!("registration: ok (001 received)");

    session.send_line("PING smoke").await?;
    let pong = session
        .get_message_filtered(|m| Ok(m.command == "PONG"))
        .await?;
    irc_conformance::assert_message(
        &pong,
        &MessageSpec::command("PONG").with_context("keepalive check"),
    )?;
    tracing::info!("ping/pong: ok");

    if args.readq {
        let payload = "a".repeat(16384);
        session
            .send_line(&format!("PRIVMSG {} {payload}", args.nick))
            .await?;
        session.assert_disconnected().await?;
        tracing::info!("oversized line: ok (server dropped the connection)");
    }

    Ok(())
}
