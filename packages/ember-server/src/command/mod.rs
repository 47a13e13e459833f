//! Command registry and handler context.

pub mod builtin;

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use bytes::Bytes;
use ember_core::{Error, RespValue};

use crate::aof::PersistenceController;
use crate::config::ServerConfig;
use crate::connection::{ConnectionId, ConnectionRegistry, Protocol};
use crate::keyspace::Keyspace;

/// Everything a handler needs: the keyspace, the connection registry, and
/// the bound connection fields the dispatcher resolved in step 2.
pub struct HandlerContext {
    pub keyspace: Arc<Keyspace>,
    pub connections: Arc<ConnectionRegistry>,
    pub conn: Option<ConnectionId>,
    pub database: u64,
    pub protocol: Protocol,
    pub embedded: bool,
    pub config: Arc<ServerConfig>,
    pub persistence: Option<Arc<PersistenceController>>,
    /// Snapshot of the registry's command count, for `COMMAND COUNT`.
    pub command_count: usize,
    /// Shared with the dispatcher's write barrier: `SAVE`/`BGSAVE` flip this
    /// around the preamble rewrite so concurrent writes spin until it clears.
    pub state_copy: Arc<AtomicBool>,
    /// `true` when a `Cluster` is configured, for `HELLO`'s `mode` field.
    pub clustered: bool,
    /// This node's believed leadership, for `HELLO`'s `role` field. Always
    /// `true` (acts as `master`) when standalone.
    pub is_leader: bool,
}

/// Handlers are synchronous: every built-in command is a fast in-memory
/// operation. The connection read-loop and the AOF writer are the only
/// async boundaries.
pub type Handler = fn(&HandlerContext, &[Bytes]) -> Result<RespValue, Error>;

/// Whether a (sub)command mutates the keyspace. Write commands go through
/// the dispatcher's write barrier and get enqueued to the AOF.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Read,
    Write,
}

pub struct SubcommandSpec {
    pub name: String,
    pub handler: Handler,
    pub kind: CommandKind,
    /// Whether this (sub)command must go through cluster consensus when
    /// clustered, rather than always being answered by the local handler.
    pub synced: bool,
}

impl SubcommandSpec {
    #[must_use]
    pub fn new(name: &str, handler: Handler, kind: CommandKind) -> Self {
        Self {
            name: name.to_string(),
            handler,
            kind,
            synced: kind == CommandKind::Write,
        }
    }
}

pub struct CommandSpec {
    pub name: String,
    /// Empty for a top-level command with no subcommands; in that case
    /// `handler`/`kind`/`synced` are used directly.
    pub subcommands: Vec<SubcommandSpec>,
    pub handler: Handler,
    pub kind: CommandKind,
    /// Whether this command must go through cluster consensus when
    /// clustered, rather than always being answered by the local handler.
    /// A command with subcommands is dispatched by its resolved
    /// `SubcommandSpec::synced` instead of this field.
    pub synced: bool,
    pub category: String,
}

/// A no-op placeholder handler, installed for commands that declare
/// subcommands: the top-level handler/extractor are unused once
/// subcommands exist and dispatch must resolve one.
fn unreachable_top_level(_ctx: &HandlerContext, _args: &[Bytes]) -> Result<RespValue, Error> {
    Err(Error::not_supported("command requires a subcommand"))
}

impl CommandSpec {
    #[must_use]
    pub fn simple(name: &str, kind: CommandKind, category: &str, handler: Handler) -> Self {
        Self {
            name: name.to_string(),
            subcommands: Vec::new(),
            handler,
            kind,
            synced: kind == CommandKind::Write,
            category: category.to_lowercase(),
        }
    }

    #[must_use]
    pub fn with_subcommands(name: &str, category: &str, subcommands: Vec<SubcommandSpec>) -> Self {
        Self {
            name: name.to_string(),
            subcommands,
            handler: unreachable_top_level,
            kind: CommandKind::Read,
            synced: false,
            category: category.to_lowercase(),
        }
    }

    #[must_use]
    pub fn find_subcommand(&self, name: &str) -> Option<&SubcommandSpec> {
        self.subcommands.iter().find(|s| s.name.eq_ignore_ascii_case(name))
    }
}

/// Insertion-ordered command registry with case-insensitive name lookup.
/// Lookup is by a lower-cased key into a side index; iteration order (for
/// `COMMAND` introspection) follows insertion via `order`.
#[derive(Default)]
pub struct CommandRegistry {
    commands: HashMap<String, CommandSpec>,
    order: Vec<String>,
}

impl CommandRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects duplicate top-level names with `kind=AlreadyExists`.
    pub fn add(&mut self, spec: CommandSpec) -> Result<(), Error> {
        let key = spec.name.to_lowercase();
        if self.commands.contains_key(&key) {
            return Err(Error::already_exists(format!("command {} already registered", spec.name)));
        }
        self.order.push(key.clone());
        self.commands.insert(key, spec);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&CommandSpec> {
        self.commands.get(&name.to_lowercase())
    }

    /// `remove(name)`: deletes the whole command by case-insensitive match.
    pub fn remove(&mut self, name: &str) -> bool {
        let key = name.to_lowercase();
        if self.commands.remove(&key).is_some() {
            self.order.retain(|k| k != &key);
            true
        } else {
            false
        }
    }

    /// `remove(name, sub)`: deletes only the subcommand.
    pub fn remove_subcommand(&mut self, name: &str, sub: &str) -> bool {
        let Some(spec) = self.commands.get_mut(&name.to_lowercase()) else {
            return false;
        };
        let before = spec.subcommands.len();
        spec.subcommands.retain(|s| !s.name.eq_ignore_ascii_case(sub));
        spec.subcommands.len() != before
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_ctx: &HandlerContext, _args: &[Bytes]) -> Result<RespValue, Error> {
        Ok(RespValue::ok())
    }

    #[test]
    fn add_rejects_duplicate_names_case_insensitively() {
        let mut registry = CommandRegistry::new();
        registry
            .add(CommandSpec::simple("PING", CommandKind::Read, "connection", noop))
            .unwrap();
        let err = registry
            .add(CommandSpec::simple("ping", CommandKind::Read, "connection", noop))
            .unwrap_err();
        assert_eq!(err.kind, ember_core::ErrorKind::AlreadyExists);
    }

    #[test]
    fn get_is_case_insensitive() {
        let mut registry = CommandRegistry::new();
        registry
            .add(CommandSpec::simple("PING", CommandKind::Read, "connection", noop))
            .unwrap();
        assert!(registry.get("ping").is_some());
        assert!(registry.get("PiNg").is_some());
    }

    #[test]
    fn remove_subcommand_leaves_others_intact() {
        let mut registry = CommandRegistry::new();
        registry
            .add(CommandSpec::with_subcommands(
                "CLIENT",
                "connection",
                vec![
                    SubcommandSpec::new("SETNAME", noop, CommandKind::Write),
                    SubcommandSpec::new("GETNAME", noop, CommandKind::Read),
                ],
            ))
            .unwrap();

        assert!(registry.remove_subcommand("CLIENT", "setname"));
        let spec = registry.get("client").unwrap();
        assert!(spec.find_subcommand("SETNAME").is_none());
        assert!(spec.find_subcommand("GETNAME").is_some());
    }

    #[test]
    fn names_preserve_insertion_order() {
        let mut registry = CommandRegistry::new();
        registry
            .add(CommandSpec::simple("ECHO", CommandKind::Read, "connection", noop))
            .unwrap();
        registry
            .add(CommandSpec::simple("PING", CommandKind::Read, "connection", noop))
            .unwrap();
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["echo", "ping"]);
    }
}
