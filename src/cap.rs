//! IRCv3 capability negotiation, driven from the server side of the wire.
//!
//! The harness plays the server role against a client under test: it reads
//! the client's `CAP LS`, advertises a fixed capability set, then answers
//! `CAP REQ` batches with `ACK`/`NAK` until the client moves on. A malformed
//! shape anywhere is a [`HarnessError::Protocol`] — the peer's inability to
//! negotiate correctly is exactly what is under test, so nothing is retried.

use std::collections::{HashMap, HashSet};

use crate::error::{HarnessError, Result};
use crate::message::Message;
use crate::session::Session;

/// CAP protocol version announced by the client's first message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    /// `CAP LS` — IRCv3.1.
    V301,
    /// `CAP LS 302` — IRCv3.2 multi-line negotiation.
    V302,
}

/// Split `name=value` capability tokens into a name → optional value map.
pub fn cap_list_to_map<I, S>(caps: I) -> HashMap<String, Option<String>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    caps.into_iter()
        .map(|cap| match cap.as_ref().split_once('=') {
            Some((name, value)) => (name.to_string(), Some(value.to_string())),
            None => (cap.as_ref().to_string(), None),
        })
        .collect()
}

/// Classify the client's opening message.
///
/// It must be `CAP LS`, `CAP LS 302`, or `CAP END` (the client skipped
/// negotiation entirely, yielding `None`). Anything else is a violation.
pub fn classify_cap_ls(msg: &Message) -> Result<Option<ProtocolVersion>> {
    if msg.command != "CAP" {
        return Err(HarnessError::protocol(format!(
            "first message is not CAP LS: {msg}"
        )));
    }
    let params: Vec<&str> = msg.params.iter().map(String::as_str).collect();
    match params.as_slice() {
        ["LS"] => Ok(Some(ProtocolVersion::V301)),
        ["LS", "302"] => Ok(Some(ProtocolVersion::V302)),
        ["END"] => Ok(None),
        _ => Err(HarnessError::protocol(format!(
            "unknown CAP params: {:?}",
            msg.params
        ))),
    }
}

/// State for one negotiation session. Created per test, discarded after.
#[derive(Debug, Default)]
pub struct CapNegotiation {
    advertised: Vec<String>,
    advertised_names: HashSet<String>,
    /// Capability names the client successfully requested.
    pub acked: HashSet<String>,
    /// Nickname observed from an interleaved `NICK`, if any.
    pub nick: Option<String>,
    /// Params of an interleaved `USER`, if any.
    pub user: Option<Vec<String>>,
}

impl CapNegotiation {
    /// `caps` is the test-controlled advertisement, `name` or `name=value`.
    pub fn new(caps: &[&str]) -> Self {
        Self {
            advertised: caps.iter().map(|s| s.to_string()).collect(),
            advertised_names: cap_list_to_map(caps).into_keys().collect(),
            ..Default::default()
        }
    }

    fn nick_or_star(&self) -> &str {
        self.nick.as_deref().unwrap_or("*")
    }

    /// Advertise the capability set in reply to the client's `CAP LS`.
    pub async fn advertise(&self, session: &mut Session) -> Result<()> {
        session
            .send_line(&format!("CAP * LS :{}", self.advertised.join(" ")))
            .await
    }

    /// Predicate for the negotiation loop: consume NICK/USER transparently
    /// (registration may interleave with negotiation), recording what we saw
    /// and enforcing their arity; keep everything else.
    fn registration_filter(&mut self, msg: &Message) -> Result<bool> {
        match msg.command.as_str() {
            "NICK" => {
                if msg.params.len() != 1 {
                    return Err(HarnessError::protocol(format!(
                        "NICK with {} params: {msg}",
                        msg.params.len()
                    )));
                }
                self.nick = Some(msg.params[0].clone());
                Ok(false)
            }
            "USER" => {
                if msg.params.len() != 4 {
                    return Err(HarnessError::protocol(format!(
                        "USER with {} params: {msg}",
                        msg.params.len()
                    )));
                }
                self.user = Some(msg.params.clone());
                Ok(false)
            }
            _ => Ok(true),
        }
    }

    /// Run the REQ/ACK/NAK loop until the client sends something that is not
    /// a `CAP REQ`, and return that message unconsumed.
    ///
    /// Note that `CAP END` takes that same exit: it is handed back to the
    /// caller as a plain CAP message rather than swallowed here, so callers
    /// that care about an explicit END must recognize it themselves.
    pub async fn negotiate(&mut self, session: &mut Session) -> Result<Message> {
        loop {
            let msg = session
                .get_message_filtered(|m| self.registration_filter(m))
                .await?;
            if msg.command != "CAP" {
                return Ok(msg);
            }
            if msg.params.is_empty() {
                return Err(HarnessError::protocol(format!("CAP with no params: {msg}")));
            }
            if msg.params[0] != "REQ" {
                return Ok(msg);
            }
            if msg.params.len() != 2 {
                return Err(HarnessError::protocol(format!(
                    "CAP REQ with {} params: {msg}",
                    msg.params.len()
                )));
            }
            let names = &msg.params[1];
            let requested: HashSet<&str> = names.split_whitespace().collect();
            let known = requested
                .iter()
                .all(|name| self.advertised_names.contains(*name));
            if known {
                let reply = format!("CAP {} ACK :{names}", self.nick_or_star());
                session.send_line(&reply).await?;
                self.acked
                    .extend(requested.into_iter().map(|s| s.to_string()));
            } else {
                // NAK echoes at most 100 chars of the request, per spec.
                let truncated: String = names.chars().take(100).collect();
                let reply = format!("CAP {} NAK :{truncated}", self.nick_or_star());
                session.send_line(&reply).await?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cap_list_splits_values() {
        let map = cap_list_to_map(["sasl=PLAIN,EXTERNAL", "message-tags"]);
        assert_eq!(map.get("sasl").unwrap().as_deref(), Some("PLAIN,EXTERNAL"));
        assert_eq!(map.get("message-tags").unwrap(), &None);
    }

    #[test]
    fn classify_versions() {
        let v301 = Message::new("CAP", vec!["LS"]);
        let v302 = Message::new("CAP", vec!["LS", "302"]);
        let end = Message::new("CAP", vec!["END"]);
        assert_eq!(classify_cap_ls(&v301).unwrap(), Some(ProtocolVersion::V301));
        assert_eq!(classify_cap_ls(&v302).unwrap(), Some(ProtocolVersion::V302));
        assert_eq!(classify_cap_ls(&end).unwrap(), None);
    }

    #[test]
    fn classify_rejects_other_shapes() {
        let nick = Message::new("NICK", vec!["alice"]);
        assert!(matches!(
            classify_cap_ls(&nick),
            Err(HarnessError::Protocol(_))
        ));
        let weird = Message::new("CAP", vec!["LS", "999"]);
        assert!(matches!(
            classify_cap_ls(&weird),
            Err(HarnessError::Protocol(_))
        ));
    }

    #[test]
    fn filter_records_nick_and_user() {
        let mut neg = CapNegotiation::new(&["sasl"]);
        let nick = Message::new("NICK", vec!["alice"]);
        assert!(!neg.registration_filter(&nick).unwrap());
        assert_eq!(neg.nick.as_deref(), Some("alice"));

        let user = Message::new("USER", vec!["u", "0", "*", "Real Name"]);
        assert!(!neg.registration_filter(&user).unwrap());
        assert_eq!(neg.user.as_ref().unwrap().len(), 4);

        let cap = Message::new("CAP", vec!["END"]);
        assert!(neg.registration_filter(&cap).unwrap());
    }

    #[test]
    fn filter_rejects_bad_arity() {
        let mut neg = CapNegotiation::new(&[]);
        let nick = Message::new("NICK", vec!["alice", "extra"]);
        assert!(matches!(
            neg.registration_filter(&nick),
            Err(HarnessError::Protocol(_))
        ));
        let user = Message::new("USER", vec!["u", "0", "*"]);
        assert!(matches!(
            neg.registration_filter(&user),
            Err(HarnessError::Protocol(_))
        ));
    }
}
