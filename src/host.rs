//! Listener lifecycle and connection admission.
//!
//! [`Host`] owns the OS listeners derived from the configured base URIs and
//! runs the accept loops that feed the engine. The lifecycle is
//! `Stopped → Starting → Running → Stopped`:
//!
//! 1. [`Host::start`] binds a fresh listener set. A denied bind takes the
//!    namespace-reservation path (§ below); anything else is fatal.
//! 2. Each bound listener gets an accept loop. Admission is a counting
//!    semaphore shared across the loops, initialized with `max_connections`
//!    permits: a permit is held while an accept is pending and released as
//!    soon as it resolves, before the connection is processed. The semaphore
//!    therefore bounds the rate at which accepts are issued — *not* the
//!    number of requests in flight end to end. That is the historically
//!    observed behavior of this adapter and it is preserved as-is; see
//!    DESIGN.md for the ambiguity.
//! 3. [`Host::stop`] signals the loops and drops the listeners, aborting any
//!    pending accept. Connections already dispatched are not cancelled and
//!    run to completion on their own tasks.
//!
//! # The reservation path
//!
//! Binding an HTTP prefix can be denied for lack of an OS namespace
//! reservation. When that happens and `reservations.auto_create` is off,
//! `start` fails with [`Error::ReservationRequired`], whose message spells
//! the exact elevated commands to run. With auto-create on, the injected
//! privileged runner is invoked once per prefix and the bind is retried
//! exactly once — on a second denial the host gives up.
//!
//! `start` and `stop` take `&mut self`: the borrow checker serializes them.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{error, info};
use url::Url;

use crate::config::HostConfig;
use crate::engine::Engine;
use crate::error::{Error, ReservationAdvice};
use crate::prefix::{self, Prefix};
use crate::request;
use crate::reservation;
use crate::response::OutboundBody;

/// Hosts an abstract engine behind OS-level HTTP listeners.
///
/// Dropping the host releases the engine; dropping it while running also
/// shuts the accept loops down (their shutdown channel closes), though
/// [`Host::stop`] is the orderly way out.
pub struct Host {
    shared: Arc<Shared>,
    running: Option<Running>,
}

/// Everything the accept loops and connection tasks share.
struct Shared {
    base_uris: Vec<Url>,
    config: HostConfig,
    engine: Box<dyn Engine>,
}

struct Running {
    shutdown: watch::Sender<bool>,
    accept_loops: Vec<JoinHandle<()>>,
}

/// One successfully bound listener, tagged with the scheme of the prefix
/// that produced it.
struct Bound {
    listener: TcpListener,
    scheme: Arc<str>,
}

enum BindFailure {
    /// The OS denied the bind; a namespace reservation may fix it.
    AccessDenied,
    Fatal(io::Error),
}

impl Host {
    /// Creates a host for the given base URIs.
    ///
    /// The base-URI list is ordered: requests match the earliest base they
    /// fall under. The list must be non-empty and `max_connections` at
    /// least 1.
    pub fn new(
        base_uris: Vec<Url>,
        config: HostConfig,
        engine: impl Engine,
    ) -> Result<Self, Error> {
        if base_uris.is_empty() {
            return Err(invalid_config("at least one base URI is required"));
        }
        if config.max_connections < 1 {
            return Err(invalid_config("max_connections must be at least 1"));
        }
        for base in &base_uris {
            if base.port_or_known_default().is_none() {
                return Err(invalid_config(&format!("base URI {base} has no usable port")));
            }
        }

        Ok(Self {
            shared: Arc::new(Shared { base_uris, config, engine: Box::new(engine) }),
            running: None,
        })
    }

    /// Binds the listeners and spawns the accept loops.
    ///
    /// Returns once the host is accepting. A no-op if already running.
    pub async fn start(&mut self) -> Result<(), Error> {
        if self.running.is_some() {
            return Ok(());
        }

        let prefixes = prefix::prefixes(&self.shared.base_uris, &self.shared.config);
        let bound =
            bind_or_reserve(&self.shared.config, &prefixes, || bind_all(&prefixes)).await?;

        let (shutdown, _) = watch::channel(false);
        let semaphore = Arc::new(Semaphore::new(self.shared.config.max_connections));

        let mut accept_loops = Vec::with_capacity(bound.len());
        for entry in bound {
            if let Ok(addr) = entry.listener.local_addr() {
                info!(addr = %addr, scheme = %entry.scheme, "host listening");
            }
            accept_loops.push(tokio::spawn(accept_loop(
                entry.listener,
                entry.scheme,
                Arc::clone(&self.shared),
                Arc::clone(&semaphore),
                shutdown.subscribe(),
            )));
        }

        self.running = Some(Running { shutdown, accept_loops });
        Ok(())
    }

    /// Stops accepting and closes the listeners.
    ///
    /// Any pending accept aborts immediately. Connections already dispatched
    /// are left to finish naturally. A no-op if not running.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        let _ = running.shutdown.send(true);
        for handle in running.accept_loops {
            let _ = handle.await;
        }

        info!("host stopped");
    }

}

fn invalid_config(message: &str) -> Error {
    Error::Bind(io::Error::new(io::ErrorKind::InvalidInput, message.to_owned()))
}

/// Binds the listener set, taking the reservation recovery path on a denied
/// bind: advice when `auto_create` is off, otherwise one privileged command
/// per prefix and exactly one retry. Each `bind` call produces a fresh
/// listener set, so a failed attempt leaves nothing half-bound.
///
/// The binder is a parameter so the recovery flow can be exercised against
/// denials that a test cannot provoke from a real port.
async fn bind_or_reserve<F, Fut>(
    config: &HostConfig,
    prefixes: &[Prefix],
    mut bind: F,
) -> Result<Vec<Bound>, Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<Vec<Bound>, BindFailure>>,
{
    match bind().await {
        Ok(bound) => return Ok(bound),
        Err(BindFailure::Fatal(e)) => return Err(Error::Bind(e)),
        Err(BindFailure::AccessDenied) => {}
    }

    let policy = &config.reservations;
    let user = policy.resolved_user();

    if !policy.auto_create {
        return Err(Error::ReservationRequired(ReservationAdvice {
            prefixes: prefixes.iter().map(|p| p.text.clone()).collect(),
            user,
        }));
    }

    for prefix in prefixes {
        let args = reservation::add_urlacl_args(&prefix.text, &user);
        if !(policy.run_privileged)(reservation::COMMAND, &args) {
            return Err(Error::ReservationFailed);
        }
    }

    // One retry; a second denial is final.
    match bind().await {
        Ok(bound) => Ok(bound),
        Err(BindFailure::AccessDenied) => Err(Error::Bind(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "bind denied again after reservation creation",
        ))),
        Err(BindFailure::Fatal(e)) => Err(Error::Bind(e)),
    }
}

/// Binds one listener per unique socket address, in prefix order. On any
/// failure the listeners bound so far are dropped: every attempt starts from
/// a fresh set.
async fn bind_all(prefixes: &[Prefix]) -> Result<Vec<Bound>, BindFailure> {
    let mut bound: Vec<Bound> = Vec::new();
    let mut seen: Vec<(String, u16)> = Vec::new();

    for prefix in prefixes {
        let key = (prefix.bind_host().to_owned(), prefix.port);
        if seen.contains(&key) {
            continue;
        }

        match TcpListener::bind((prefix.bind_host(), prefix.port)).await {
            Ok(listener) => {
                seen.push(key);
                bound.push(Bound { listener, scheme: Arc::from(prefix.scheme.as_str()) });
            }
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                return Err(BindFailure::AccessDenied);
            }
            Err(e) => return Err(BindFailure::Fatal(e)),
        }
    }

    Ok(bound)
}

/// The admission-controlled accept loop for one listener.
async fn accept_loop(
    listener: TcpListener,
    scheme: Arc<str>,
    shared: Arc<Shared>,
    semaphore: Arc<Semaphore>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        // One permit per pending accept, shared across all listeners.
        let permit = tokio::select! {
            biased;

            _ = shutdown.changed() => break,
            permit = semaphore.acquire() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let accepted = tokio::select! {
            biased;

            _ = shutdown.changed() => break,
            accepted = listener.accept() => accepted,
        };

        // Released before the connection is processed: only the issuing of
        // accepts is throttled, not the number of in-flight requests.
        drop(permit);

        match accepted {
            Ok((stream, remote_addr)) => {
                let shared = Arc::clone(&shared);
                let scheme = Arc::clone(&scheme);
                tokio::spawn(serve_connection(stream, remote_addr, scheme, shared));
            }
            Err(e) => {
                error!("accept error: {e}");
                (shared.config.on_unhandled_error)(&Error::Io(e));
            }
        }
    }
}

/// Serves every request on one accepted connection.
async fn serve_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    scheme: Arc<str>,
    shared: Arc<Shared>,
) {
    // TokioIo adapts tokio's AsyncRead/AsyncWrite to the hyper IO traits.
    let io = TokioIo::new(stream);

    // Called once per request on the connection, not once per connection.
    let svc = service_fn(move |req| {
        let shared = Arc::clone(&shared);
        let scheme = Arc::clone(&scheme);
        async move { dispatch(shared, scheme, remote_addr, req).await }
    });

    // `auto::Builder` handles both HTTP/1.1 and HTTP/2, whatever the client
    // speaks.
    if let Err(e) = ConnBuilder::new(TokioExecutor::new())
        .serve_connection(io, svc)
        .await
    {
        error!(peer = %remote_addr, "connection error: {e}");
    }
}

/// One request through the pipeline: translate in, engine, translate out.
///
/// Every failure is reported to the unhandled-error callback and then
/// returned, which aborts this request's connection and nothing else. The
/// transport response is left in whatever state translation reached; no
/// fallback response is synthesized.
async fn dispatch(
    shared: Arc<Shared>,
    scheme: Arc<str>,
    remote_addr: SocketAddr,
    req: hyper::Request<hyper::body::Incoming>,
) -> Result<http::Response<OutboundBody>, Error> {
    let result = async {
        // Plain TCP never presents a client certificate; a TLS-terminating
        // wrapper would thread one through here.
        let request = request::translate(
            req,
            &shared.base_uris,
            &shared.config,
            &scheme,
            Some(remote_addr),
            None,
        )?;

        let response = shared.engine.handle(request).await.map_err(Error::Engine)?;
        response.into_transport(&shared.config).await
    }
    .await;

    if let Err(e) = &result {
        (shared.config.on_unhandled_error)(e);
    }

    result
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;
    use crate::config::ReservationPolicy;
    use crate::request::Request;
    use crate::response::Response;

    fn engine() -> impl Engine {
        |_req: Request| async { Ok::<_, Error>(Response::text("ok")) }
    }

    #[test]
    fn rejects_an_empty_base_uri_list() {
        assert!(Host::new(Vec::new(), HostConfig::default(), engine()).is_err());
    }

    #[test]
    fn rejects_zero_max_connections() {
        let config = HostConfig { max_connections: 0, ..HostConfig::default() };
        let bases = vec![Url::parse("http://localhost:8080/").unwrap()];
        assert!(Host::new(bases, config, engine()).is_err());
    }

    fn one_prefix(config: &HostConfig) -> Vec<Prefix> {
        let base = Url::parse("http://localhost:8080/app/").unwrap();
        prefix::prefixes(std::slice::from_ref(&base), config)
    }

    async fn denied() -> Result<Vec<Bound>, BindFailure> {
        Err(BindFailure::AccessDenied)
    }

    #[tokio::test]
    async fn denied_bind_without_auto_create_returns_reservation_advice() {
        let config = HostConfig::default();
        let prefixes = one_prefix(&config);

        let result = bind_or_reserve(&config, &prefixes, denied).await;
        let Err(Error::ReservationRequired(advice)) = result else {
            panic!("expected reservation advice");
        };
        assert_eq!(advice.prefixes, vec!["http://+:8080/app/".to_owned()]);
        assert_eq!(advice.user, "Everyone");
    }

    #[tokio::test]
    async fn auto_create_reserves_each_prefix_then_retries_the_bind() {
        let commands: Arc<Mutex<Vec<(String, Vec<String>)>>> = Arc::default();
        let recorded = Arc::clone(&commands);
        let config = HostConfig {
            reservations: ReservationPolicy {
                auto_create: true,
                run_privileged: Arc::new(move |cmd: &str, args: &[String]| {
                    recorded.lock().unwrap().push((cmd.to_owned(), args.to_vec()));
                    true
                }),
                ..ReservationPolicy::default()
            },
            ..HostConfig::default()
        };
        let prefixes = prefix::prefixes(
            &[
                Url::parse("http://localhost:8080/app/").unwrap(),
                Url::parse("http://localhost:8081/api/").unwrap(),
            ],
            &config,
        );

        let attempts = AtomicUsize::new(0);
        let bind = || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    Err(BindFailure::AccessDenied)
                } else {
                    Ok(Vec::new())
                }
            }
        };

        let bound = bind_or_reserve(&config, &prefixes, bind).await.unwrap();
        assert!(bound.is_empty());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);

        let commands = commands.lock().unwrap();
        assert_eq!(commands.len(), 2);
        assert!(commands.iter().all(|(cmd, _)| cmd == "netsh"));
        assert!(commands[0].1.contains(&"url=http://+:8080/app/".to_owned()));
        assert!(commands[1].1.contains(&"url=http://+:8081/api/".to_owned()));
    }

    #[tokio::test]
    async fn refused_privileged_command_fails_the_reservation() {
        // The default runner refuses everything.
        let config = HostConfig {
            reservations: ReservationPolicy { auto_create: true, ..ReservationPolicy::default() },
            ..HostConfig::default()
        };
        let prefixes = one_prefix(&config);

        let result = bind_or_reserve(&config, &prefixes, denied).await;
        assert!(matches!(result, Err(Error::ReservationFailed)));
    }

    #[tokio::test]
    async fn second_denial_after_reservation_is_final() {
        let config = HostConfig {
            reservations: ReservationPolicy {
                auto_create: true,
                run_privileged: Arc::new(|_: &str, _: &[String]| true),
                ..ReservationPolicy::default()
            },
            ..HostConfig::default()
        };
        let prefixes = one_prefix(&config);

        let result = bind_or_reserve(&config, &prefixes, denied).await;
        let Err(Error::Bind(e)) = result else {
            panic!("expected a bind error");
        };
        assert_eq!(e.kind(), io::ErrorKind::PermissionDenied);
    }
}
