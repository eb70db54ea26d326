//! The registry of locally bound endpoints.
//!
//! Every transport protocol binds its local (address, scope, port) identities here. An
//! [`Endpoint`] stays allocated as long as anyone holds its `Arc`, but it is only reachable through
//! the [`Table`] while it is valid. Closing it, or removal of its address, invalidates it exactly
//! once and completes everything that was still waiting on it.
//!
//! Requests that need exclusive use of an endpoint while another operation holds it are queued
//! on it in order. Whoever releases the last use services the queue.
//!
//! [`Endpoint`]: struct.Endpoint.html
//! [`Table`]: struct.Table.html
mod endpoint;
mod options;
mod table;


pub use self::endpoint::{
    Binding,
    ConnectHandler,
    Datagram,
    DatagramHandler,
    DisconnectHandler,
    Endpoint,
    EndpointId,
    ErrorHandler,
    EventHandlers,
    Flags,
    Open,
    ReceiveHandler};

pub(crate) use self::endpoint::{DatagramSend, PendingRequest, Released, Work};

pub use self::options::{
    Coverage,
    EndpointOption,
    Membership,
    Options};

pub use self::table::{
    Cursor,
    EndpointInfo,
    Table};
