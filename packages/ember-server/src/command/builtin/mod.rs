//! Built-in command handlers, grouped the way the wire protocol's own
//! command reference groups them: connection/session, string values,
//! generic key operations, server-wide administration.

mod connection;
mod keys;
mod server;
mod strings;

use ember_core::Error;

use super::CommandRegistry;

/// Registers every built-in command. Fails only if a caller has already
/// registered one of these names, which should never happen on a fresh
/// registry.
pub fn register_all(registry: &mut CommandRegistry) -> Result<(), Error> {
    for spec in connection::specs()
        .into_iter()
        .chain(strings::specs())
        .chain(keys::specs())
        .chain(server::specs())
    {
        registry.add(spec)?;
    }
    Ok(())
}
