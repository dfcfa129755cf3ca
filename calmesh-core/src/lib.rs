//! Core types for calmesh.
//!
//! This crate provides everything that does not speak a provider's wire protocol:
//! - `CalendarEvent` and the ICS codec
//! - the `CalendarRemote` trait implemented by provider crates
//! - collaborator traits for persistence and the job queue, with in-memory versions
//! - the event reconciler

pub mod constants;
pub mod date_range;
pub mod error;
pub mod event;
pub mod ics;
pub mod remote;
pub mod store;
pub mod sync;

pub use date_range::DateRange;
pub use error::{CalMeshError, CalMeshResult};
pub use event::{CalendarEvent, EventTime};
pub use remote::{CalendarInfo, CalendarRemote, EventRef, WrittenEvent};
