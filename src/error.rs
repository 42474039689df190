//! Unified error type.

use std::net::AddrParseError;

/// The error type returned by strata's fallible operations.
///
/// Application-level outcomes (404, 500, etc.) are written to the
/// [`ResponseWriter`](crate::ResponseWriter), not returned as `Error`s. This
/// type surfaces infrastructure failures: binding to a port, accepting a
/// connection, reading configuration.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid socket address `{addr}`: {source}")]
    InvalidAddress {
        addr: String,
        #[source]
        source: AddrParseError,
    },

    #[error("config: {0}")]
    Config(#[from] toml::de::Error),
}
