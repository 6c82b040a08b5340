//! # berth
//!
//! A self-host adapter: run a library-style web engine as a standalone
//! server process, no external web server required.
//!
//! ## The contract
//!
//! berth does not process requests and does not route them. The engine —
//! any async function from [`Request`] to [`Response`] — does engine things.
//! berth does adapter things, and only those:
//!
//! - **Listening** — binds one OS listener per configured base URI, with
//!   `localhost` optionally rewritten to a wildcard bind token. HTTP parsing
//!   and framing are hyper's job, not ours.
//! - **Admission** — a counting semaphore bounds how fast accepts are
//!   issued. Each accepted connection runs on its own task.
//! - **Matching** — every request URL is matched against the ordered base
//!   URIs (first match wins) and split into base path + app-local path.
//! - **Translation** — transport request in, abstract [`Request`] out;
//!   abstract [`Response`] in, transport response out, with the
//!   transport-owned framing headers kept firmly out of the engine's hands.
//! - **Recovery** — a bind denied for lack of a namespace reservation either
//!   fails with the exact elevated commands to run, or creates the
//!   reservations through an injected privileged runner and retries once.
//!
//! Per-request failures — routing, translation, engine — never crash the
//! accept loop or other connections: they are funneled to the single
//! [`on_unhandled_error`](HostConfig::on_unhandled_error) callback and fail
//! only their own connection.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use berth::{Host, HostConfig, Request, Response};
//! use url::Url;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), berth::Error> {
//!     let engine = |req: Request| async move {
//!         let body = format!("hello from {}", req.url().path);
//!         Ok::<_, berth::Error>(Response::text(body))
//!     };
//!
//!     let base = Url::parse("http://localhost:3000/app/").unwrap();
//!     let mut host = Host::new(vec![base], HostConfig::default(), engine)?;
//!
//!     host.start().await?;
//!     tokio::signal::ctrl_c().await.ok();
//!     host.stop().await;
//!     Ok(())
//! }
//! ```

mod config;
mod engine;
mod error;
mod headers;
mod host;
mod matcher;
mod prefix;
mod request;
mod reservation;
mod response;
mod root;

pub use config::{ErrorCallback, HostConfig, ReservationPolicy, RunPrivileged};
pub use engine::{Engine, EngineFuture};
pub use error::{BoxError, Error, ReservationAdvice};
pub use headers::is_transport_owned;
pub use host::Host;
pub use request::{Request, RequestUrl};
pub use response::{BodySink, Response};
pub use root::root_path;
