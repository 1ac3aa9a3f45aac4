//! CRDT-based tab synchronization.
//!
//! The tab board (open tabs, active tab, groups) is shared across devices
//! as a yrs document. [`doc::TabBoard`] holds the CRDT itself;
//! [`sync::TabSync`] adds durable queueing and replay so changes made
//! offline reach peers after reconnect.

pub mod doc;
pub mod sync;

pub use doc::{BoardView, GroupView, TabBoard, TabView};
pub use sync::TabSync;
