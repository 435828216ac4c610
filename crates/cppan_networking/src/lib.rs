#![deny(missing_docs)]

//! The HTTP side of cppan: the `find_dependencies` API client, archive URL
//! providers and the fire-and-forget usage telemetry.
//!
//! Nothing in this crate interprets resolution results beyond the wire
//! format; turning the id-keyed response into a closed dependency set is the
//! resolver's job.

mod api;
mod error;
mod remote;

use retry_policies::policies::ExponentialBackoff;

pub use api::{ApiClient, CURRENT_API_LEVEL};
pub use error::ApiError;
pub use remote::{Remote, SourceProvider, ARCHIVE_FILE_NAME};

/// Constructs the default middleware client used for every remote call:
/// rustls transport with a small exponential-backoff retry policy.
pub fn default_client() -> reqwest_middleware::ClientWithMiddleware {
    let client = reqwest::Client::builder()
        .connect_timeout(std::time::Duration::from_secs(5))
        .build()
        .expect("client configuration is static");
    reqwest_middleware::ClientBuilder::new(client)
        .with(reqwest_retry::RetryTransientMiddleware::new_with_policy(
            ExponentialBackoff::builder().build_with_max_retries(3),
        ))
        .build()
}
