//! Two-way event reconciliation for one calendar mapping.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::date_range::DateRange;
use crate::error::{CalMeshError, CalMeshResult};
use crate::event::CalendarEvent;
use crate::remote::{CalendarRemote, EventRef};
use crate::store::{CalendarMapping, EventMapping, MappingStore};
use crate::sync::action::{ActionKind, Direction, ReconcileReport, SyncAction};
use crate::sync::mapping_set::{MappingSet, Side};

/// The windows each side's events were fetched with.
#[derive(Debug, Clone)]
pub struct SyncWindows {
    pub source: DateRange,
    pub target: DateRange,
}

/// Event ids written (or deliberately skipped) earlier in the current run.
#[derive(Debug, Default)]
struct Touched {
    source: HashSet<String>,
    target: HashSet<String>,
}

impl Touched {
    fn contains(&self, side: Side, event_id: &str) -> bool {
        match side {
            Side::Source => self.source.contains(event_id),
            Side::Target => self.target.contains(event_id),
        }
    }

    fn mark(&mut self, mapping: &EventMapping) {
        self.source.insert(mapping.source_event_id.clone());
        self.target.insert(mapping.target_event_id.clone());
    }
}

/// Version markers of this calendar's rows as they were before the run.
///
/// Healing during the first direction must not hide changes from the second,
/// so staleness in both directions is judged against this snapshot.
#[derive(Debug)]
struct StoredMarkers(HashMap<String, (Option<String>, Option<String>)>);

impl StoredMarkers {
    fn snapshot(rows: &[EventMapping]) -> Self {
        StoredMarkers(
            rows.iter()
                .map(|row| {
                    let markers = (row.source_version.clone(), row.target_version.clone());
                    (row.source_event_id.clone(), markers)
                })
                .collect(),
        )
    }

    /// Falls back to the row itself for rows created during the run.
    fn version(&self, side: Side, row: &EventMapping) -> Option<String> {
        match self.0.get(&row.source_event_id) {
            Some((source, _)) if side == Side::Source => source.clone(),
            Some((_, target)) => target.clone(),
            None => side.version(row).map(str::to_string),
        }
    }
}

/// One direction of a run: changes flow from side A to side B.
struct Pass<'p> {
    direction: Direction,
    a_side: Side,
    a_remote: &'p dyn CalendarRemote,
    b_remote: &'p dyn CalendarRemote,
    a_calendar: &'p str,
    b_calendar: &'p str,
    a_events: &'p [CalendarEvent],
    b_events: &'p [CalendarEvent],
    a_window: &'p DateRange,
    b_window: &'p DateRange,
}

impl Pass<'_> {
    fn b_side(&self) -> Side {
        self.a_side.other()
    }

    fn action(&self, kind: ActionKind, title: &str) -> SyncAction {
        SyncAction::new(self.direction, kind, title, self.b_remote.name())
    }
}

/// Reconciles the events of one [`CalendarMapping`].
///
/// Each enabled direction runs in turn, source → target first. Within a
/// direction every A-side event is either left alone, linked to a matching
/// B-side event, created on B, used to update B, or (when cancelled) used to
/// delete its B counterpart. Write failures are recorded as failed actions
/// and never stop the remaining events.
pub struct Reconciler<'a> {
    mapping: &'a CalendarMapping,
    source: &'a dyn CalendarRemote,
    target: &'a dyn CalendarRemote,
    store: &'a dyn MappingStore,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        mapping: &'a CalendarMapping,
        source: &'a dyn CalendarRemote,
        target: &'a dyn CalendarRemote,
        store: &'a dyn MappingStore,
    ) -> Self {
        Reconciler {
            mapping,
            source,
            target,
            store,
        }
    }

    /// Reconcile freshly fetched events of both calendars.
    ///
    /// Fails only when the mapping has no resolved calendar ids.
    pub async fn run(
        &self,
        source_events: &[CalendarEvent],
        target_events: &[CalendarEvent],
        windows: &SyncWindows,
        mappings: &mut MappingSet,
    ) -> CalMeshResult<ReconcileReport> {
        let source_calendar = self.mapping.source_calendar_id.as_deref().ok_or_else(|| {
            CalMeshError::CalendarNotFound(format!("{} (source side unresolved)", self.mapping.display_name))
        })?;
        let target_calendar = self.mapping.target_calendar_id.as_deref().ok_or_else(|| {
            CalMeshError::CalendarNotFound(format!("{} (target side unresolved)", self.mapping.display_name))
        })?;

        let mut report = ReconcileReport::default();
        let mut touched = Touched::default();
        let stored = StoredMarkers::snapshot(&mappings.for_calendar(&self.mapping.id));

        if self.mapping.direction.source_to_target() {
            let pass = Pass {
                direction: Direction::SourceToTarget,
                a_side: Side::Source,
                a_remote: self.source,
                b_remote: self.target,
                a_calendar: source_calendar,
                b_calendar: target_calendar,
                a_events: source_events,
                b_events: target_events,
                a_window: &windows.source,
                b_window: &windows.target,
            };
            self.run_pass(&pass, &stored, mappings, &mut touched, &mut report).await;
        }

        if self.mapping.direction.target_to_source() {
            let pass = Pass {
                direction: Direction::TargetToSource,
                a_side: Side::Target,
                a_remote: self.target,
                b_remote: self.source,
                a_calendar: target_calendar,
                b_calendar: source_calendar,
                a_events: target_events,
                b_events: source_events,
                a_window: &windows.target,
                b_window: &windows.source,
            };
            self.run_pass(&pass, &stored, mappings, &mut touched, &mut report).await;
        }

        debug!(
            calendar = %self.mapping.display_name,
            source_to_target = %report.source_to_target,
            target_to_source = %report.target_to_source,
            "reconciled"
        );
        Ok(report)
    }

    async fn run_pass(
        &self,
        pass: &Pass<'_>,
        stored: &StoredMarkers,
        mappings: &mut MappingSet,
        touched: &mut Touched,
        report: &mut ReconcileReport,
    ) {
        let b_by_id: HashMap<&str, &CalendarEvent> =
            pass.b_events.iter().map(|e| (e.id.as_str(), e)).collect();

        let mut a_events: Vec<&CalendarEvent> = pass.a_events.iter().collect();
        a_events.sort_by_key(|e| e.start.to_utc());

        for a in a_events {
            if touched.contains(pass.a_side, &a.id) {
                continue;
            }

            match mappings.find(pass.a_side, &a.id).cloned() {
                Some(row) if row.calendar_mapping_id != self.mapping.id => {
                    debug!(event = %a.id, "event is mapped under another calendar mapping, skipping");
                }
                Some(row) => {
                    let b = b_by_id.get(pass.b_side().event_id(&row)).copied();
                    self.sync_mapped(pass, stored, a, b, row, mappings, touched, report)
                        .await;
                }
                None => {
                    self.sync_unmapped(pass, a, mappings, touched, report)
                        .await
                }
            }
        }

        if pass.a_remote.reports_deletions_by_absence() {
            self.propagate_absences(pass, &b_by_id, mappings, touched, report)
                .await;
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn sync_mapped(
        &self,
        pass: &Pass<'_>,
        stored: &StoredMarkers,
        a: &CalendarEvent,
        b: Option<&CalendarEvent>,
        row: EventMapping,
        mappings: &mut MappingSet,
        touched: &mut Touched,
        report: &mut ReconcileReport,
    ) {
        let b_side = pass.b_side();

        let stored_a = stored.version(pass.a_side, &row);
        let stored_b = stored.version(b_side, &row);

        let row = self.heal_markers(pass, a, b, row, mappings).await;

        if a.cancelled {
            let title = b.map_or(a.title.as_str(), |b| b.title.as_str());
            self.remove_counterpart(pass, &row, title, mappings, touched, report)
                .await;
            return;
        }

        let Some(b) = b.filter(|b| !b.cancelled) else {
            return;
        };

        if !is_stale(stored_a.as_deref(), a, row.last_synced_at) {
            return;
        }

        if is_stale(stored_b.as_deref(), b, row.last_synced_at) {
            warn!(
                calendar = %self.mapping.display_name,
                event = %a.title,
                "changed on both sides since last sync, skipping"
            );
            touched.mark(&row);
            report.record(pass.action(ActionKind::Conflict, &a.title));
            return;
        }

        let href = b_side.href(&row).or(b.href.as_deref());
        let outgoing = a.with_identity(&b.id, href);
        let action = pass.action(ActionKind::Update, &a.title);

        match pass
            .b_remote
            .update_event(pass.b_calendar, &EventRef::new(&b.id, href), &outgoing)
            .await
        {
            Ok(written) => {
                let mut updated = row.clone();
                *pass.a_side.version_mut(&mut updated) = a.version.clone();
                *b_side.version_mut(&mut updated) = written.version;
                if written.href.is_some() {
                    *b_side.href_mut(&mut updated) = written.href;
                }
                updated.last_synced_at = Utc::now();
                self.persist(updated, action, mappings, touched, report)
                    .await;
            }
            Err(e) => {
                warn!(calendar = %self.mapping.display_name, event = %a.title, "update failed: {e}");
                touched.mark(&row);
                report.record(action.failed(e));
            }
        }
    }

    async fn sync_unmapped(
        &self,
        pass: &Pass<'_>,
        a: &CalendarEvent,
        mappings: &mut MappingSet,
        touched: &mut Touched,
        report: &mut ReconcileReport,
    ) {
        if a.cancelled {
            return;
        }

        // Beyond B's window a counterpart could exist without being fetched
        let start = a.start.to_utc();
        if pass.b_window.to.is_some_and(|to| start > to) {
            return;
        }

        let b_side = pass.b_side();
        let duplicate = pass.b_events.iter().find(|b| {
            !b.cancelled
                && !touched.contains(b_side, &b.id)
                && mappings.find(b_side, &b.id).is_none()
                && a.is_soft_duplicate_of(b)
        });

        if let Some(b) = duplicate {
            let row = self.new_row(pass, a, &b.id, b.version.clone(), b.href.clone());
            let action = pass.action(ActionKind::Link, &a.title);
            self.persist(row, action, mappings, touched, report).await;
            return;
        }

        let action = pass.action(ActionKind::Create, &a.title);
        match pass.b_remote.create_event(pass.b_calendar, a).await {
            Ok(written) => {
                let row = self.new_row(pass, a, &written.id, written.version, written.href);
                self.persist(row, action, mappings, touched, report).await;
            }
            Err(e) => {
                warn!(calendar = %self.mapping.display_name, event = %a.title, "create failed: {e}");
                report.record(action.failed(e));
            }
        }
    }

    /// Delete B counterparts of mapped A events that vanished from A's listing.
    async fn propagate_absences(
        &self,
        pass: &Pass<'_>,
        b_by_id: &HashMap<&str, &CalendarEvent>,
        mappings: &mut MappingSet,
        touched: &mut Touched,
        report: &mut ReconcileReport,
    ) {
        let b_side = pass.b_side();
        let present: HashSet<&str> = pass.a_events.iter().map(|e| e.id.as_str()).collect();

        for row in mappings.for_calendar(&self.mapping.id) {
            let a_id = pass.a_side.event_id(&row);
            if present.contains(a_id) || touched.contains(pass.a_side, a_id) {
                continue;
            }
            let Some(b) = b_by_id.get(b_side.event_id(&row)).copied() else {
                continue;
            };
            if touched.contains(b_side, &b.id) {
                continue;
            }

            if b.cancelled {
                // Deleted on both sides
                self.drop_mapping(&row, mappings, touched).await;
                continue;
            }
            if !pass.a_window.contains(b.start.to_utc()) {
                continue;
            }

            debug!(calendar = %self.mapping.display_name, event = %b.title, "missing from {}", pass.a_remote.name());
            self.remove_counterpart(pass, &row, &b.title, mappings, touched, report)
                .await;
        }
    }

    /// Delete the B side of `row` and drop the mapping.
    async fn remove_counterpart(
        &self,
        pass: &Pass<'_>,
        row: &EventMapping,
        title: &str,
        mappings: &mut MappingSet,
        touched: &mut Touched,
        report: &mut ReconcileReport,
    ) {
        let b_side = pass.b_side();
        let target = EventRef::new(b_side.event_id(row), b_side.href(row));
        let action = pass.action(ActionKind::Delete, title);

        match pass.b_remote.delete_event(pass.b_calendar, &target).await {
            Ok(()) => {
                self.drop_mapping(row, mappings, touched).await;
                info!(calendar = %self.mapping.display_name, "{action}");
                report.record(action);
            }
            Err(e) if e.is_gone() => {
                debug!(calendar = %self.mapping.display_name, event = %title, "counterpart already gone");
                self.drop_mapping(row, mappings, touched).await;
            }
            Err(e) => {
                warn!(calendar = %self.mapping.display_name, event = %title, "delete failed: {e}");
                touched.mark(row);
                report.record(action.failed(e));
            }
        }
    }

    async fn drop_mapping(&self, row: &EventMapping, mappings: &mut MappingSet, touched: &mut Touched) {
        touched.mark(row);
        if let Err(e) = mappings.remove(&row.source_event_id, self.store).await {
            warn!(event = %row.source_event_id, "failed to drop event mapping: {e}");
        }
    }

    /// Backfill version markers and hrefs the row is missing. No remote writes.
    async fn heal_markers(
        &self,
        pass: &Pass<'_>,
        a: &CalendarEvent,
        b: Option<&CalendarEvent>,
        mut row: EventMapping,
        mappings: &mut MappingSet,
    ) -> EventMapping {
        let b_side = pass.b_side();
        let mut healed = backfill(pass.a_side.version_mut(&mut row), &a.version);
        healed |= backfill(pass.a_side.href_mut(&mut row), &a.href);
        if let Some(b) = b {
            healed |= backfill(b_side.version_mut(&mut row), &b.version);
            healed |= backfill(b_side.href_mut(&mut row), &b.href);
        }

        if healed {
            debug!(event = %a.id, "backfilled version markers");
            if let Err(e) = mappings.upsert(row.clone(), self.store).await {
                warn!(event = %a.id, "failed to store backfilled markers: {e}");
            }
        }
        row
    }

    async fn persist(
        &self,
        row: EventMapping,
        action: SyncAction,
        mappings: &mut MappingSet,
        touched: &mut Touched,
        report: &mut ReconcileReport,
    ) {
        touched.mark(&row);
        match mappings.upsert(row, self.store).await {
            Ok(()) => {
                info!(calendar = %self.mapping.display_name, "{action}");
                report.record(action);
            }
            Err(e) => {
                warn!(calendar = %self.mapping.display_name, "{action}, but the mapping was not saved: {e}");
                report.record(action.failed(format!("mapping not saved: {e}")));
            }
        }
    }

    fn new_row(
        &self,
        pass: &Pass<'_>,
        a: &CalendarEvent,
        b_id: &str,
        b_version: Option<String>,
        b_href: Option<String>,
    ) -> EventMapping {
        let a_parts = (a.id.clone(), a.version.clone(), a.href.clone());
        let b_parts = (b_id.to_string(), b_version, b_href);
        let (source, target) = match pass.a_side {
            Side::Source => (a_parts, b_parts),
            Side::Target => (b_parts, a_parts),
        };

        EventMapping {
            user_id: self.mapping.user_id.clone(),
            calendar_mapping_id: self.mapping.id.clone(),
            source_event_id: source.0,
            target_event_id: target.0,
            source_version: source.1,
            target_version: target.1,
            source_href: source.2,
            target_href: target.2,
            last_synced_at: Utc::now(),
        }
    }
}

fn backfill(slot: &mut Option<String>, fetched: &Option<String>) -> bool {
    if slot.is_none() && fetched.is_some() {
        *slot = fetched.clone();
        return true;
    }
    false
}

/// Whether `fetched` changed since the mapping was last written.
///
/// A recorded marker is compared with the fetched version. Without a marker
/// (or without a fetched version) the modification time decides.
fn is_stale(stored: Option<&str>, fetched: &CalendarEvent, last_synced_at: DateTime<Utc>) -> bool {
    match (stored, fetched.version.as_deref()) {
        (Some(stored), Some(current)) => stored != current,
        _ => fetched
            .last_modified
            .is_some_and(|modified| modified > last_synced_at),
    }
}
