use thiserror::Error;

use crate::CURRENT_API_LEVEL;

/// Wire-level failures of the remote API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request never produced a usable response.
    #[error("could not reach the remote")]
    Transport(#[source] reqwest_middleware::Error),

    /// The remote answered with a non-success HTTP status.
    #[error("remote returned http status {0}")]
    Status(reqwest::StatusCode),

    /// The response body did not parse as the expected JSON shape.
    #[error("malformed response from the remote")]
    Malformed(#[source] reqwest::Error),

    /// The response carried an `error` field.
    #[error("remote error: {0}")]
    Remote(String),

    /// The response did not state its API level.
    #[error("API version is missing in the response")]
    MissingApiLevel,

    /// The server speaks a newer protocol than this client.
    #[error(
        "server API level is {server}, client supports {CURRENT_API_LEVEL}; \
         please upgrade the client"
    )]
    ClientTooOld {
        /// The API level announced by the server.
        server: i64,
    },

    /// The server speaks an older protocol than this client still supports.
    #[error(
        "server API level is {server}, client requires at least {}; \
         please wait for the server upgrade",
        CURRENT_API_LEVEL - 1
    )]
    ServerTooOld {
        /// The API level announced by the server.
        server: i64,
    },

    /// The server did not resolve every requested package.
    #[error("some packages ({}) are unresolved: {}", .0.len(), .0.join(", "))]
    Unresolved(Vec<String>),
}
