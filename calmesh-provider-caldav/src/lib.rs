//! CalDAV backend for calmesh.
//!
//! [`CaldavClient`] speaks the protocol (PROPFIND, REPORT, PUT, DELETE,
//! MKCALENDAR); [`CaldavRemote`] adapts it to `CalendarRemote`.

pub mod client;
pub mod remote;
mod xml;

pub use client::{CaldavClient, CaldavCredentials, event_url};
pub use remote::CaldavRemote;
