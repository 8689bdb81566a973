//! Conformance test harness for IRC implementations.
//!
//! Spawns real server or client binaries, drives them over TCP with
//! hand-crafted protocol lines, and asserts that their observable behavior
//! matches RFC1459/RFC2812/IRCv3. Scenario catalogs live elsewhere; this
//! crate is the exchange engine they are built on: wire parsing, the
//! line-buffered session with deterministic message filtering, CAP
//! negotiation, and structured assertions.

pub mod cap;
pub mod controller;
pub mod error;
pub mod harness;
pub mod matching;
pub mod message;
pub mod session;

pub use cap::{cap_list_to_map, CapNegotiation, ProtocolVersion};
pub use controller::{require_sasl_mechanism, RunConfig, ServerController};
pub use error::{HarnessError, Result};
pub use harness::{ClientHarness, ServerHarness};
pub use matching::{assert_message, MessageSpec};
pub use message::{Message, ParseError};
pub use session::Session;
