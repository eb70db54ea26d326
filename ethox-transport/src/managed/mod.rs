//! Handle-indexed containers.
//!
//! Structures handed across the dispatch boundary (connections, send requests) are referred to by
//! a [`Key`] instead of a reference. A key stays unique even when its slot is reused, so a stale
//! handle is detected instead of silently aliasing a newer entry.
//!
//! [`Key`]: struct.Key.html
mod slotmap;

pub use self::slotmap::{Key, SlotMap};
