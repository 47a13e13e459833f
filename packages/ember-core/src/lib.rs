//! emberdb core -- wire protocol codec, value model, clock, and error taxonomy
//! shared between the standalone server and the embedded facade.
//!
//! - **clock** ([`clock`]): injectable wall-clock source for TTL and eviction.
//! - **error** ([`error`]): the `Error`/`ErrorKind` taxonomy surfaced by the core.
//! - **resp** ([`resp`]): the RESP2/RESP3 wire codec.
//! - **value** ([`value`]): `Value` and `KeyData`, the per-key data model.

pub mod clock;
pub mod error;
pub mod resp;
pub mod value;

pub use clock::{ClockSource, SystemClock, TestClock};
pub use error::{Error, ErrorKind};
pub use resp::{encode_command, Command, RespCodec, RespValue};
pub use value::{KeyData, Value};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {}
}
