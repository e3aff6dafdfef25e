use std::{
    fmt,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use tokio::sync::oneshot;

use crate::{cached_image::CachedImage, error::CacheError};

/// Receives the outcome of one request.
pub(crate) type Responder =
    Box<dyn FnOnce(Result<CachedImage, CacheError>) + Send + 'static>;

enum State {
    Ready(Option<Result<CachedImage, CacheError>>),
    Pending(oneshot::Receiver<Result<CachedImage, CacheError>>),
}

/// An in-flight cache request.
///
/// Awaiting it yields the image or the classified failure. Dropping it does
/// not cancel the work behind it.
#[must_use = "a Fetch does nothing useful unless awaited or inspected"]
pub struct Fetch {
    state: State,
    handled_synchronously: bool,
}

impl Fetch {
    pub(crate) fn hit(image: CachedImage) -> Self {
        Self {
            state: State::Ready(Some(Ok(image))),
            handled_synchronously: true,
        }
    }

    pub(crate) fn failed(error: CacheError) -> Self {
        Self {
            state: State::Ready(Some(Err(error))),
            handled_synchronously: false,
        }
    }

    /// A pending fetch plus the responder that completes it.
    pub(crate) fn channel() -> (Self, Responder) {
        let (tx, rx) = oneshot::channel();
        let respond: Responder = Box::new(move |result| {
            let _ = tx.send(result);
        });
        (
            Self {
                state: State::Pending(rx),
                handled_synchronously: false,
            },
            respond,
        )
    }

    /// True when the memory tier answered on the caller's stack.
    pub fn handled_synchronously(&self) -> bool {
        self.handled_synchronously
    }
}

impl Future for Fetch {
    type Output = Result<CachedImage, CacheError>;

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Self::Output> {
        let interrupted = || Err(CacheError::DeliveryInterrupted);
        match &mut self.state {
            State::Ready(slot) => {
                Poll::Ready(slot.take().unwrap_or_else(interrupted))
            }
            State::Pending(rx) => Pin::new(rx)
                .poll(cx)
                .map(|received| received.unwrap_or_else(|_| interrupted())),
        }
    }
}

impl fmt::Debug for Fetch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            State::Ready(Some(Ok(_))) => "ready(ok)",
            State::Ready(Some(Err(_))) => "ready(err)",
            State::Ready(None) => "taken",
            State::Pending(_) => "pending",
        };
        f.debug_struct("Fetch")
            .field("state", &state)
            .field("handled_synchronously", &self.handled_synchronously)
            .finish()
    }
}
