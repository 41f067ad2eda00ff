//! The public façade: a raw tunneled-stream entry point, and a [`tower_service::Service<Uri>`]
//! adapter a host HTTP client can dial its requests through.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use http::Uri;
use pin_project_lite::pin_project;
use tower_service::Service;

use crate::chain::Chain;
use crate::deadline::Deadline;
use crate::error::Error;
use crate::resolve::Resolve;
use crate::stream::BoxedStream;
use crate::url::{Endpoint, ProxyDescriptor};

/// Dials `destination` through `chain`, returning the established tunnel.
///
/// This is the raw entry point: the caller owns the returned stream and may perform a TLS
/// upgrade over it itself. `deadline` bounds the TCP connect and every handshake phase across
/// every hop.
pub async fn connect<R: Resolve>(
    hops: Vec<ProxyDescriptor>,
    destination: &Endpoint,
    deadline: &Deadline,
    resolver: R,
) -> Result<BoxedStream, Error> {
    Chain::new(resolver, hops).connect(destination, deadline).await
}

/// A [`tower_service::Service<Uri>`] that dials a fresh proxy tunnel per request.
///
/// Wraps a [`Chain`] of one or more hops. Each `call` parses the request [`Uri`]'s host and port
/// into a destination [`Endpoint`] and runs a brand-new dial through every hop — there is no
/// connection reuse across calls; a host HTTP client's own keep-alive pool, if any, is what
/// would reuse a [`ProxyConnector`]-established stream, and that reuse is opaque to this type.
///
/// Pair this with [`crate::resolve::NullResolver`] in the host client's own resolver slot so the
/// client never performs its own DNS for destinations — this connector resolves (or forwards
/// verbatim, under rdns) the destination itself, inside the handshake.
pub struct ProxyConnector<R> {
    chain: Arc<Chain<R>>,
    deadline: Deadline,
}

impl<R: Resolve> ProxyConnector<R> {
    /// Builds a connector for a single proxy hop.
    pub fn new(descriptor: ProxyDescriptor, resolver: R) -> Self {
        Self::chained(vec![descriptor], resolver)
    }

    /// Builds a connector for an ordered chain of proxy hops.
    pub fn chained(hops: Vec<ProxyDescriptor>, resolver: R) -> Self {
        Self {
            chain: Arc::new(Chain::new(resolver, hops)),
            deadline: Deadline::none(),
        }
    }

    /// Bounds every dial this connector performs by `deadline`.
    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }
}

impl<R> Clone for ProxyConnector<R> {
    fn clone(&self) -> Self {
        Self {
            chain: Arc::clone(&self.chain),
            deadline: self.deadline,
        }
    }
}

impl<R> fmt::Debug for ProxyConnector<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyConnector")
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

impl<R: Resolve + Send + Sync + 'static> Service<Uri> for ProxyConnector<R> {
    type Response = BoxedStream;
    type Error = Error;
    type Future = Connecting;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, uri: Uri) -> Self::Future {
        let chain = Arc::clone(&self.chain);
        let deadline = self.deadline;

        Connecting {
            fut: Box::pin(async move {
                let destination = endpoint_from_uri(&uri)?;
                chain.connect(&destination, &deadline).await
            }),
        }
    }
}

fn endpoint_from_uri(uri: &Uri) -> Result<Endpoint, Error> {
    let host = uri
        .host()
        .ok_or_else(|| Error::InvalidUrl(format!("request URI {uri} has no host")))?;
    let port = uri.port_u16().unwrap_or_else(|| match uri.scheme_str() {
        Some("https") | Some("wss") => 443,
        _ => 80,
    });
    Ok(Endpoint::new(host.to_ascii_lowercase(), port))
}

type BoxConnecting = Pin<Box<dyn Future<Output = Result<BoxedStream, Error>> + Send>>;

pin_project! {
    /// The [`Future`] returned by [`ProxyConnector::call`].
    #[must_use = "futures do nothing unless polled"]
    pub struct Connecting {
        #[pin]
        fut: BoxConnecting,
    }
}

impl Future for Connecting {
    type Output = Result<BoxedStream, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.project().fut.poll(cx)
    }
}

impl fmt::Debug for Connecting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connecting").finish_non_exhaustive()
    }
}
