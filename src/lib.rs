//! # Instantly - an agent-friendly API client
//!
//! The crate has two halves. The request executor ([`Client`]) turns one
//! logical request into one or more HTTP attempts under a [`RequestPolicy`]:
//! bearer auth, separate retry budgets for 429 and 5xx responses, jittered
//! exponential backoff, `Retry-After` handling, rate-limit metadata and a
//! network-free dry-run mode. The output pipeline ([`filter`], [`envelope`],
//! [`output`]) wraps decoded responses and projects them with a jq-style
//! expression before printing.
//!
//! ## Quick Start
//!
//! ```no_run
//! use instantly::{Client, RequestPolicy};
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), instantly::Error> {
//!     let policy = RequestPolicy::builder()
//!         .token(std::env::var("INSTANTLY_API_KEY").unwrap_or_default())
//!         .max_429_retries(3)
//!         .max_5xx_retries(2)
//!         .retry_delay(Duration::from_millis(500))
//!         .build();
//!     let client = Client::new(&policy)?;
//!     let cancel = CancellationToken::new();
//!
//!     let response = client.get_json("/campaigns", None, &cancel).await?;
//!     let names = instantly::filter::apply(response.data, "[.items[].name]")?;
//!     println!("{names}");
//!     println!("took {:?} over {} attempts", response.latency, response.attempts);
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! Every failure is an [`Error`] variant. API errors keep the status, the
//! best human message found in the body, and the raw body:
//!
//! ```no_run
//! use instantly::{Client, Error, RequestPolicy};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Error> {
//! # let client = Client::new(&RequestPolicy::builder().token("k").build())?;
//! match client.get_json("/leads/123", None, &CancellationToken::new()).await {
//!     Ok(response) => println!("{}", response.data),
//!     Err(Error::Api(err)) => eprintln!("http {}: {}", err.status, err.message),
//!     Err(Error::DeserializationFailed { raw_response, serde_error, status }) => {
//!         eprintln!("bad body (status {status}): {serde_error}\n{raw_response}");
//!     }
//!     Err(e) => eprintln!("{e}"),
//! }
//! # Ok(())
//! # }
//! ```

pub mod classify;
pub mod cli;
mod client;
pub mod envelope;
mod error;
pub mod filter;
pub mod metadata;
pub mod output;
pub mod policy;
pub mod rate_limit;
mod response;
pub mod retry;

pub use client::{Client, ClientBuilder};
pub use error::{ApiError, Error, Result};
pub use metadata::{Request, ResponseMeta};
pub use policy::{RequestPolicy, RequestPolicyBuilder};
pub use rate_limit::RateLimitInfo;
pub use response::Response;
pub use retry::{JitterSource, Scheduler};
