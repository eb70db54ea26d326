//! The transport core of a user-space network stack.
//!
//! ## Table of contents
//!
//! 1. [Design](#design-and-relevant-core-concepts)
//! 2. [The wire module](wire/index.html)
//! 3. [The endpoint table](layer/addr/index.html)
//! 4. [The stream layer](layer/tcp/index.html)
//! 5. [The stack instance and its dispatch boundary](stack/index.html)
//!
//! ## Design and relevant core concepts
//!
//! This crate sits between some session dispatch code (sockets, a driver interface, whatever
//! forwards user requests) and a network layer that routes and emits IP packets. It owns two
//! things: the registry of locally bound endpoints that every transport protocol consults, and the
//! connection state of the reliable byte-stream protocol including its send engine.
//!
//! Unlike the single threaded layers of `ethox`, everything here may be called concurrently from
//! any number of threads. There is no event loop. State is guarded by small, non-reentrant locks
//! which are always taken in the same order:
//!
//! > endpoint table → endpoint → send request pool
//!
//! Connection locks are independent of that chain; nothing ever holds an endpoint lock while
//! taking a connection lock.
//!
//! Handing a packet to the network layer never blocks and never reports its result by return
//! value. Each hand-off carries a [`Completion`] which is invoked exactly once, even on immediate
//! failure. The same contract extends to the dispatch boundary: every request either completes
//! synchronously with [`Outcome::Ready`] or returns [`Outcome::Pending`] and later invokes its
//! completion exactly once. Dropping a completion that was never invoked reports
//! [`Error::Cancelled`] to its owner, so requests can't get lost silently.
//!
//! There is no internal clock. Operations arming or checking timers take an explicit
//! [`Instant`], which keeps tests deterministic and lets the caller decide on a time source.
//!
//! [`Completion`]: layer/struct.Completion.html
//! [`Outcome::Ready`]: layer/enum.Outcome.html
//! [`Outcome::Pending`]: layer/enum.Outcome.html
//! [`Error::Cancelled`]: layer/enum.Error.html
//! [`Instant`]: time/struct.Instant.html
#![warn(missing_docs)]
#![warn(unreachable_pub)]

#[macro_use] mod macros;
pub mod layer;
pub mod managed;
pub mod stack;
pub mod time;
pub mod wire;

#[cfg(test)]
mod testing;

pub use crate::layer::{Completion, Error, Outcome, Result};
pub use crate::stack::{Config, Stack};
