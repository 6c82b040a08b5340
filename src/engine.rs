//! The engine seam.
//!
//! The host does not process requests — it adapts the transport to an
//! abstract engine and back. The engine is opaque: an async function from
//! [`Request`] to [`Response`]. Application routing, handlers, middleware —
//! all of that lives on the other side of this trait.
//!
//! # How async engines are stored
//!
//! The host holds its engine as a trait object, so the concrete type (a
//! closure, a router struct, a test stub) is erased behind one interface.
//! An `async fn`'s future type is unnameable, which is why [`Engine::handle`]
//! returns a heap-allocated, pinned future: the blanket impl below boxes the
//! concrete future once per request, and the only runtime cost on top of the
//! engine's own work is that allocation plus one virtual call.

use std::future::Future;
use std::pin::Pin;

use crate::error::BoxError;
use crate::request::Request;
use crate::response::Response;

/// A heap-allocated, type-erased future, as returned by [`Engine::handle`].
pub type EngineFuture = Pin<Box<dyn Future<Output = Result<Response, BoxError>> + Send + 'static>>;

/// An abstract request-processing engine.
///
/// Automatically implemented for any `async fn` (or closure) with the
/// signature:
///
/// ```text
/// async fn engine(req: Request) -> Result<Response, E>   // E: Into<BoxError>
/// ```
///
/// Implement it by hand when the engine carries state that a closure capture
/// would make awkward.
pub trait Engine: Send + Sync + 'static {
    /// Processes one abstract request into one abstract response.
    ///
    /// An `Err` is surfaced through the host's unhandled-error callback as an
    /// engine failure; it fails that request only.
    fn handle(&self, request: Request) -> EngineFuture;
}

impl<F, Fut, E> Engine for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, E>> + Send + 'static,
    E: Into<BoxError> + 'static,
{
    fn handle(&self, request: Request) -> EngineFuture {
        // Call the function first so the returned future owns the request,
        // then box once to fit the trait signature.
        let fut = self(request);
        Box::pin(async move { fut.await.map_err(Into::into) })
    }
}
