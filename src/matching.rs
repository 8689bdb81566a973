//! Structured message comparison.
//!
//! IRC replies are positional; a single wrong field is easy to misdiagnose
//! from a raw string diff. [`assert_message`] compares only the fields a test
//! cares about and names every diverging field in the failure, so multi-part
//! replies like `CAP ... LS ...` report subcommand and subparams mismatches
//! together instead of short-circuiting on the first.

use std::collections::HashMap;

use crate::error::{AssertionFailure, HarnessError, Mismatch, Result};
use crate::message::Message;

/// The fields a test expects of a message. Unset fields are not compared.
///
/// `target`, `subcommand` and `subparams` enable subcommand mode, which reads
/// `params[0]` as the target, `params[1]` as the subcommand and `params[2..]`
/// as the subparams (the `CAP`/`AUTHENTICATE` reply shape).
#[derive(Debug, Clone, Default)]
pub struct MessageSpec {
    pub command: Option<String>,
    pub params: Option<Vec<String>>,
    pub prefix: Option<String>,
    pub tags: Option<HashMap<String, String>>,
    pub target: Option<String>,
    pub subcommand: Option<String>,
    pub subparams: Option<Vec<String>>,
    /// Caller-supplied context included in the failure message.
    pub context: Option<String>,
}

impl MessageSpec {
    pub fn command(command: &str) -> Self {
        Self {
            command: Some(command.to_string()),
            ..Default::default()
        }
    }

    pub fn with_params(mut self, params: &[&str]) -> Self {
        self.params = Some(params.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = Some(prefix.to_string());
        self
    }

    pub fn with_target(mut self, target: &str) -> Self {
        self.target = Some(target.to_string());
        self
    }

    pub fn with_subcommand(mut self, subcommand: &str) -> Self {
        self.subcommand = Some(subcommand.to_string());
        self
    }

    pub fn with_subparams(mut self, subparams: &[&str]) -> Self {
        self.subparams = Some(subparams.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn with_context(mut self, context: &str) -> Self {
        self.context = Some(context.to_string());
        self
    }
}

/// Compare `msg` against `spec`, collecting every mismatch.
pub fn assert_message(msg: &Message, spec: &MessageSpec) -> Result<()> {
    let mut mismatches = Vec::new();

    if let Some(ref command) = spec.command {
        if msg.command != *command {
            mismatches.push(mismatch("command", &msg.command, command));
        }
    }
    if let Some(ref params) = spec.params {
        if msg.params != *params {
            mismatches.push(mismatch("params", &format!("{:?}", msg.params), &format!("{params:?}")));
        }
    }
    if let Some(ref prefix) = spec.prefix {
        if msg.prefix.as_deref() != Some(prefix.as_str()) {
            mismatches.push(mismatch(
                "prefix",
                &format!("{:?}", msg.prefix),
                prefix,
            ));
        }
    }
    if let Some(ref tags) = spec.tags {
        if msg.tags != *tags {
            mismatches.push(mismatch("tags", &format!("{:?}", msg.tags), &format!("{tags:?}")));
        }
    }

    if spec.target.is_some() || spec.subcommand.is_some() || spec.subparams.is_some() {
        if msg.params.len() <= 2 {
            mismatches.push(mismatch(
                "params",
                &format!("{:?}", msg.params),
                "at least 3 params (target, subcommand, subparams)",
            ));
        } else {
            if let Some(ref target) = spec.target {
                if msg.params[0] != *target {
                    mismatches.push(mismatch("target", &msg.params[0], target));
                }
            }
            // Subcommand and subparams are checked independently so a reply
            // that gets both wrong reports both.
            if let Some(ref subcommand) = spec.subcommand {
                if msg.params[1] != *subcommand {
                    mismatches.push(mismatch("subcommand", &msg.params[1], subcommand));
                }
            }
            if let Some(ref subparams) = spec.subparams {
                let actual = &msg.params[2..];
                if actual != subparams.as_slice() {
                    mismatches.push(mismatch(
                        "subparams",
                        &format!("{actual:?}"),
                        &format!("{subparams:?}"),
                    ));
                }
            }
        }
    }

    if mismatches.is_empty() {
        Ok(())
    } else {
        Err(HarnessError::Assertion(AssertionFailure {
            mismatches,
            context: spec.context.clone(),
        }))
    }
}

fn mismatch(field: &'static str, actual: &str, expected: &str) -> Mismatch {
    Mismatch {
        field,
        actual: actual.to_string(),
        expected: expected.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(result: Result<()>) -> AssertionFailure {
        match result {
            Err(HarnessError::Assertion(failure)) => failure,
            other => panic!("expected assertion failure, got {other:?}"),
        }
    }

    #[test]
    fn matching_fields_pass() {
        let msg = Message::parse(":server 001 alice :Welcome").unwrap();
        assert_message(
            &msg,
            &MessageSpec::command("001")
                .with_params(&["alice", "Welcome"])
                .with_prefix("server"),
        )
        .unwrap();
    }

    #[test]
    fn unset_fields_are_not_compared() {
        let msg = Message::parse(":server 001 alice :Welcome").unwrap();
        assert_message(&msg, &MessageSpec::command("001")).unwrap();
    }

    #[test]
    fn mismatch_names_the_field() {
        let msg = Message::parse("PONG foo").unwrap();
        let failure = failure(assert_message(&msg, &MessageSpec::command("PING")));
        assert_eq!(failure.mismatches.len(), 1);
        assert_eq!(failure.mismatches[0].field, "command");
        assert_eq!(failure.mismatches[0].actual, "PONG");
        assert_eq!(failure.mismatches[0].expected, "PING");
    }

    #[test]
    fn subcommand_mode_checks_shape() {
        let msg = Message::parse("CAP END").unwrap();
        let failure = failure(assert_message(
            &msg,
            &MessageSpec::command("CAP").with_subcommand("LS"),
        ));
        assert_eq!(failure.mismatches[0].field, "params");
    }

    #[test]
    fn subcommand_and_subparams_reported_together() {
        let msg = Message::parse("CAP * NAK :sasl").unwrap();
        let failure = failure(assert_message(
            &msg,
            &MessageSpec::command("CAP")
                .with_subcommand("ACK")
                .with_subparams(&["multi-prefix"]),
        ));
        let fields: Vec<_> = failure.mismatches.iter().map(|m| m.field).collect();
        assert_eq!(fields, vec!["subcommand", "subparams"]);
    }

    #[test]
    fn subcommand_mode_passes_on_cap_ls() {
        let msg = Message::parse("CAP * LS :sasl message-tags").unwrap();
        assert_message(
            &msg,
            &MessageSpec::command("CAP")
                .with_target("*")
                .with_subcommand("LS")
                .with_subparams(&["sasl message-tags"]),
        )
        .unwrap();
    }

    #[test]
    fn context_is_carried_into_the_failure() {
        let msg = Message::parse("PONG foo").unwrap();
        let failure = failure(assert_message(
            &msg,
            &MessageSpec::command("PING").with_context("keepalive check"),
        ));
        assert_eq!(failure.context.as_deref(), Some("keepalive check"));
        assert!(failure.to_string().contains("keepalive check"));
    }
}
