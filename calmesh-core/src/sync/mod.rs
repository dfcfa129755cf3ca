//! Event reconciliation between a source and a target calendar.

mod action;
mod mapping_set;
mod reconcile;


pub use action::{ActionKind, Direction, DirectionCounts, ReconcileReport, SyncAction};
pub use mapping_set::{MappingSet, Side};
pub use reconcile::{Reconciler, SyncWindows};
