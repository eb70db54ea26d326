//! The process logic of the transport layer.
//!
//! ## Layering
//!
//! The packet logic is contained in `wire` and the processing part in this module. The
//! [`addr`] module holds the registry of bound endpoints that every transport protocol shares,
//! [`tcp`] the connection state and send engine of the stream protocol, and [`udp`] the datagram
//! construction. Everything below the transport layer is reached through the traits of
//! [`network`].
//!
//! ## Completions
//!
//! An operation which can't finish immediately takes a [`Completion`] and returns
//! [`Outcome::Pending`]. The completion is then invoked exactly once, from whichever context
//! finishes the work. An operation that does finish immediately returns [`Outcome::Ready`] and
//! never invokes the completion it was given.
//!
//! [`addr`]: addr/index.html
//! [`tcp`]: tcp/index.html
//! [`udp`]: udp/index.html
//! [`network`]: network/index.html
//! [`Completion`]: struct.Completion.html
//! [`Outcome::Pending`]: enum.Outcome.html
//! [`Outcome::Ready`]: enum.Outcome.html
use core::fmt;

pub mod addr;
pub mod network;
pub mod tcp;
pub mod udp;

/// The result type of the transport layer.
pub type Result<T> = core::result::Result<T, Error>;

/// Every status a transport operation can finish with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Error {
    /// The local address and port are already bound and reuse was not requested.
    AddressInUse,

    /// The ephemeral port range has no unused port left.
    NoFreeAddress,

    /// The address is not owned by this host or is not usable for the operation.
    InvalidAddress,

    /// An argument was malformed or out of range.
    InvalidParameter,

    /// The operation is not valid in the current state of the connection or endpoint.
    InvalidState,

    /// A handle did not refer to a live object.
    InvalidHandle,

    /// Not enough resources to perform the operation.
    ///
    /// In contrast to protocol errors this implies the operation would have been legal with more
    /// resources. Retrying later may succeed.
    Exhausted,

    /// The endpoint was closed or its address disappeared before the request was serviced.
    AddressDeleted,

    /// The request was dropped without being serviced.
    Cancelled,

    /// The connection was aborted locally.
    Aborted,

    /// The peer stopped acknowledging data and the retransmit limit was reached.
    TimedOut,

    /// No route towards the destination address.
    Unreachable,

    /// A packet exceeded the path MTU.
    PacketTooBig,

    /// A packet was dropped because its hop limit expired in transit.
    HopLimitExceeded,

    /// The destination does not speak the protocol.
    ProtocolUnreachable,
}

impl Error {
    /// Whether a network layer status is transient.
    ///
    /// Soft errors are cached on the connection and only reported if they persist. All other
    /// network layer errors abort the connection immediately.
    pub fn is_soft(self) -> bool {
        match self {
            Error::Unreachable
            | Error::PacketTooBig
            | Error::HopLimitExceeded
            | Error::Exhausted => true,
            _ => false,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::AddressInUse => write!(f, "address in use"),
            Error::NoFreeAddress => write!(f, "no free address"),
            Error::InvalidAddress => write!(f, "invalid address"),
            Error::InvalidParameter => write!(f, "invalid parameter"),
            Error::InvalidState => write!(f, "invalid state"),
            Error::InvalidHandle => write!(f, "invalid handle"),
            Error::Exhausted => write!(f, "resources exhausted"),
            Error::AddressDeleted => write!(f, "address deleted"),
            Error::Cancelled => write!(f, "cancelled"),
            Error::Aborted => write!(f, "connection aborted"),
            Error::TimedOut => write!(f, "connection timed out"),
            Error::Unreachable => write!(f, "destination unreachable"),
            Error::PacketTooBig => write!(f, "packet too big"),
            Error::HopLimitExceeded => write!(f, "hop limit exceeded"),
            Error::ProtocolUnreachable => write!(f, "protocol unreachable"),
        }
    }
}

impl std::error::Error for Error {}

/// Can convert from a wire error.
///
/// This indicates some layer tried to operate on a header but failed.
impl From<crate::wire::Error> for Error {
    fn from(_: crate::wire::Error) -> Self {
        Error::InvalidParameter
    }
}

/// The immediate result of an operation that may finish later.
#[derive(Debug, PartialEq, Eq)]
#[must_use = "a pending outcome completes through its completion"]
pub enum Outcome<T> {
    /// Finished synchronously, the completion was not and will not be invoked.
    Ready(Result<T>),
    /// The completion will be invoked exactly once.
    Pending,
}

impl<T> Outcome<T> {
    /// Check if the result is delivered through the completion.
    pub fn is_pending(&self) -> bool {
        match self {
            Outcome::Pending => true,
            Outcome::Ready(_) => false,
        }
    }

    /// The synchronous result, if any.
    pub fn ready(self) -> Option<Result<T>> {
        match self {
            Outcome::Ready(result) => Some(result),
            Outcome::Pending => None,
        }
    }

    /// Deliver a synchronous result through the completion instead.
    ///
    /// Useful for callers that want a uniform asynchronous path.
    pub fn complete_into(self, completion: Completion<T>) {
        match self {
            Outcome::Ready(result) => completion.complete(result),
            Outcome::Pending => completion.dismiss(),
        }
    }
}

impl<T> From<Result<T>> for Outcome<T> {
    fn from(result: Result<T>) -> Self {
        Outcome::Ready(result)
    }
}

/// A handler invoked exactly once with the result of an operation.
///
/// Completing consumes the handler. A completion which is dropped while still armed delivers
/// `Error::Cancelled` instead, so a request can't be lost silently.
pub struct Completion<T> {
    callback: Option<Box<dyn FnOnce(Result<T>) + Send>>,
}

impl<T> Completion<T> {
    /// Wrap a callback.
    pub fn new<F>(callback: F) -> Self
        where F: FnOnce(Result<T>) + Send + 'static,
    {
        Completion { callback: Some(Box::new(callback)) }
    }

    /// A completion that ignores its result.
    pub fn ignore() -> Self {
        Completion { callback: None }
    }

    /// Invoke the handler with a result.
    pub fn complete(mut self, result: Result<T>) {
        if let Some(callback) = self.callback.take() {
            callback(result)
        }
    }

    /// Disarm the handler without invoking it.
    ///
    /// Used when the result was returned synchronously instead.
    pub fn dismiss(mut self) {
        self.callback = None;
    }

    /// Adapt the result type of the handler.
    pub fn map<U, F>(self, map: F) -> Completion<U>
        where
            T: 'static,
            U: 'static,
            F: FnOnce(Result<U>) -> Result<T> + Send + 'static,
    {
        Completion::new(move |result| self.complete(map(result)))
    }
}

impl<T> Drop for Completion<T> {
    fn drop(&mut self) {
        if let Some(callback) = self.callback.take() {
            net_debug!("completion dropped while armed, cancelling");
            callback(Err(Error::Cancelled))
        }
    }
}

impl<T> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Completion")
            .field("armed", &self.callback.is_some())
            .finish()
    }
}
