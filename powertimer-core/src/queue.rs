//! Ordered collection of pending and processed power timers.
//!
//! The queue is the only owner of its entries. An entry sits in exactly one
//! of two lists:
//! - `pending`: still has a transition ahead, sorted by `(begin, end)`
//! - `processed`: finished one-shot entries and disabled ones, kept for
//!   history under a [`RetentionPolicy`]
//!
//! Entries are moved between the lists, never copied.

use std::path::PathBuf;

use log::{debug, info, warn};

use crate::codec::TimerRecord;
use crate::entry::TimerEntry;
use crate::error::{FormatError, QueueError, RecordError, Result, StoreError};
use crate::host::{PromptTicket, TimerHost};
use crate::sanity::{self, SanityReport};
use crate::store::{StoreLoad, TimerStore};
use crate::types::*;

/// Upper bound of activations handled by one [`TimerQueue::process_due`] call.
const MAX_ACTIVATIONS_PER_PASS: usize = 64;

/// How much finished history is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Drop finished entries that ended more than this many days ago.
    pub keep_days: Option<u32>,
    /// Keep at most this many finished entries, oldest dropped first.
    pub max_processed: Option<usize>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            keep_days: Some(7),
            max_processed: None,
        }
    }
}

/// Result of [`TimerQueue::record`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordOutcome {
    pub id: TimerId,
    /// Overlap found before insertion. The entry is inserted regardless.
    pub conflicts: Option<SanityReport>,
}

/// Result of [`TimerQueue::load`].
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: usize,
    pub rejected: Vec<(usize, RecordError)>,
    /// Set when the whole file was unusable.
    pub corrupt: Option<FormatError>,
    pub quarantined_to: Option<PathBuf>,
    /// First overlap found while loading; later ones are not reported.
    pub overlap: Option<SanityReport>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty() && self.corrupt.is_none() && self.overlap.is_none()
    }
}

fn sort_key(entry: &TimerEntry) -> (i64, i64, TimerId) {
    (entry.begin(), entry.end(), entry.id())
}

/// Tell the host that prompts of an entry leaving the queue are void.
fn close_prompts<H: TimerHost>(host: &mut H, entry: &mut TimerEntry) {
    for kind in entry.take_prompts() {
        host.prompt_closed(&PromptTicket { timer: entry.id(), kind });
    }
}

fn insort(list: &mut Vec<TimerEntry>, entry: TimerEntry) {
    let key = sort_key(&entry);
    let pos = list.partition_point(|e| sort_key(e) <= key);
    list.insert(pos, entry);
}

/// Power timer queue.
pub struct TimerQueue<H: TimerHost> {
    host: H,
    store: Option<TimerStore>,
    retention: RetentionPolicy,
    save_logs: bool,
    pending: Vec<TimerEntry>,
    processed: Vec<TimerEntry>,
    next_id: u64,
}

impl<H: TimerHost> TimerQueue<H> {
    /// Create an empty queue that is not backed by a file.
    pub fn new(host: H) -> Self {
        Self {
            host,
            store: None,
            retention: RetentionPolicy::default(),
            save_logs: true,
            pending: Vec::new(),
            processed: Vec::new(),
            next_id: 1,
        }
    }

    pub fn with_store(mut self, store: TimerStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    /// Whether audit trails are written to the timer file.
    pub fn with_save_logs(mut self, save_logs: bool) -> Self {
        self.save_logs = save_logs;
        self
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn store(&self) -> Option<&TimerStore> {
        self.store.as_ref()
    }

    pub fn pending(&self) -> &[TimerEntry] {
        &self.pending
    }

    pub fn processed(&self) -> &[TimerEntry] {
        &self.processed
    }

    /// Pending entries first, then processed ones.
    pub fn entries(&self) -> impl Iterator<Item = &TimerEntry> {
        self.pending.iter().chain(self.processed.iter())
    }

    pub fn get(&self, id: TimerId) -> Option<&TimerEntry> {
        self.entries().find(|e| e.id() == id)
    }

    pub fn contains(&self, id: TimerId) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.pending.len() + self.processed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn assign_id(&mut self, entry: &mut TimerEntry) {
        if !entry.id().is_assigned() {
            entry.set_id(TimerId(self.next_id));
            self.next_id += 1;
        }
    }

    /// Take an entry out of whichever list holds it.
    fn take(&mut self, id: TimerId) -> Option<TimerEntry> {
        if let Some(pos) = self.pending.iter().position(|e| e.id() == id) {
            return Some(self.pending.remove(pos));
        }
        self.processed
            .iter()
            .position(|e| e.id() == id)
            .map(|pos| self.processed.remove(pos))
    }

    fn get_mut(&mut self, id: TimerId) -> Option<&mut TimerEntry> {
        self.pending
            .iter_mut()
            .chain(self.processed.iter_mut())
            .find(|e| e.id() == id)
    }

    /// Insert an entry without saving.
    ///
    /// Repeating entries are moved to their next occurrence first. Entries
    /// that can no longer run, and disabled waiting ones, go straight to
    /// the processed list.
    pub fn add_entry(&mut self, mut entry: TimerEntry) -> TimerId {
        self.assign_id(&mut entry);
        let now = self.host.now();
        entry.process_repeated(now);
        entry.time_changed(now);

        let id = entry.id();
        let finished = entry.should_skip(now)
            || entry.state().is_terminal()
            || (entry.state() == TimerState::Waiting && entry.is_disabled());
        if finished {
            insort(&mut self.processed, entry);
        } else {
            insort(&mut self.pending, entry);
        }
        id
    }

    /// Add an entry and save.
    ///
    /// Unless `ignore_conflicts` is set, the entry is checked against the
    /// pending list first; overlaps are reported, not refused. The entry
    /// stays queued even when saving fails.
    pub fn record(&mut self, mut entry: TimerEntry, ignore_conflicts: bool) -> Result<RecordOutcome> {
        self.assign_id(&mut entry);
        let conflicts = if ignore_conflicts {
            None
        } else {
            let report = sanity::check(&entry.span(), &self.pending);
            (!report.is_ok()).then_some(report)
        };
        if let Some(report) = &conflicts {
            warn!("[PowerTimer] {} overlaps {:?}", entry, &report.ids()[1..]);
        }

        info!("[PowerTimer] Record {}", entry);
        let id = self.add_entry(entry);
        self.save()?;
        Ok(RecordOutcome { id, conflicts })
    }

    /// Run one activation of a pending entry and file it accordingly.
    pub fn do_activate(&mut self, id: TimerId) -> Result<()> {
        let pos = self
            .pending
            .iter()
            .position(|e| e.id() == id)
            .ok_or(QueueError::TimerNotFound(id))?;
        let mut entry = self.pending.remove(pos);
        let now = self.host.now();

        if entry.should_skip(now) {
            // Already over before it prepared: skip the stages.
            entry.log(now, 11, "window elapsed, skipped");
            entry.set_state(TimerState::Ended);
        } else {
            let outcome = entry.activate(&mut self.host);
            if let Some(prompt) = outcome.prompt {
                entry.note_prompt(prompt.ticket.kind);
                self.host.prompt_user(prompt);
            }
            if outcome.accepted {
                entry.advance();
            }
        }

        if entry.state() < TimerState::Ended {
            insort(&mut self.pending, entry);
            return Ok(());
        }

        if entry.repeated() != 0 {
            entry.reset_state();
            let id = self.add_entry(entry);
            debug!("[PowerTimer] {} rescheduled", id);
        } else {
            self.cleanup_processed();
            insort(&mut self.processed, entry);
        }
        self.save()?;
        Ok(())
    }

    /// Activate every pending entry that is due, earliest first.
    ///
    /// An entry whose activation left its state unchanged (deferred or
    /// backed off) is not activated again before the next pass. Returns the
    /// number of activations performed.
    pub fn process_due(&mut self) -> Result<usize> {
        let mut count = 0;
        let mut held = Vec::new();
        while count < MAX_ACTIVATIONS_PER_PASS {
            let now = self.host.now();
            let due = self
                .pending
                .iter()
                .filter(|e| e.next_activation() <= now && !held.contains(&e.id()))
                .min_by_key(|e| (e.next_activation(), sort_key(e)))
                .map(|e| (e.id(), e.state()));
            let Some((id, before)) = due else {
                break;
            };
            self.do_activate(id)?;
            count += 1;
            if self.pending.iter().any(|e| e.id() == id && e.state() == before) {
                held.push(id);
            }
        }
        Ok(count)
    }

    /// Earliest time any pending entry needs attention.
    pub fn next_activation(&self) -> Option<i64> {
        self.pending.iter().map(TimerEntry::next_activation).min()
    }

    /// Re-file an entry after its times were changed from outside.
    ///
    /// Finished entries come back as waiting; auto-sleep entries past
    /// waiting lose their key listener and start over.
    pub fn time_changed(&mut self, id: TimerId) -> Result<()> {
        let mut entry = self.take(id).ok_or(QueueError::TimerNotFound(id))?;
        let now = self.host.now();
        entry.time_changed(now);

        if entry.state().is_terminal() {
            entry.reset_state();
        } else if entry.timer_type().is_auto_sleep() && entry.state() > TimerState::Waiting {
            entry.disarm_key_listener();
            entry.set_state(TimerState::Waiting);
        }
        self.add_entry(entry);
        Ok(())
    }

    /// Mutate an entry, re-file it and save.
    pub fn update_entry<F>(&mut self, id: TimerId, f: F) -> Result<()>
    where
        F: FnOnce(&mut TimerEntry),
    {
        let entry = self.get_mut(id).ok_or(QueueError::TimerNotFound(id))?;
        f(entry);
        self.time_changed(id)?;
        self.save()?;
        Ok(())
    }

    /// Stop and delete an entry.
    ///
    /// Recurrence is switched off before the abort so the entry is never
    /// re-enqueued. A waiting entry leaves the queue and is returned; a
    /// running one stays pending until the next pass ends it.
    pub fn remove_entry(&mut self, id: TimerId) -> Result<Option<TimerEntry>> {
        let now = self.host.now();
        let entry = self.get_mut(id).ok_or(QueueError::TimerNotFound(id))?;
        info!("[PowerTimer] Remove {}", entry);

        entry.set_repeated(0);
        entry.set_autoincrease(false);
        entry.abort(now);
        let ended = entry.state() == TimerState::Ended;
        let dont_save = entry.dont_save();

        if !ended {
            self.time_changed(id)?;
            if let Some(entry) = self.get_mut(id) {
                entry.disable();
            }
        }

        if !dont_save {
            self.reapply_autoincrease()?;
        }

        let mut removed = self
            .processed
            .iter()
            .position(|e| e.id() == id)
            .map(|pos| self.processed.remove(pos));
        if let Some(entry) = removed.as_mut() {
            close_prompts(&mut self.host, entry);
        }
        self.save()?;
        Ok(removed)
    }

    /// Let auto-increasing entries grow into freed space.
    fn reapply_autoincrease(&mut self) -> Result<()> {
        let now = self.host.now();
        let mut changed = Vec::new();
        for idx in 0..self.pending.len() {
            let mut entry = self.pending.remove(idx);
            if entry.set_autoincrease_end(&self.pending, None, now) {
                changed.push(entry.id());
            }
            self.pending.insert(idx, entry);
        }
        for id in changed {
            self.time_changed(id)?;
        }
        Ok(())
    }

    /// Forward a key press to every armed auto-sleep entry.
    ///
    /// Returns the number of entries postponed.
    pub fn key_pressed(&mut self) -> usize {
        let now = self.host.now();
        let mut postponed = 0;
        for entry in self.pending.iter_mut() {
            if entry.key_pressed(now) {
                postponed += 1;
            }
        }
        if postponed > 0 {
            self.pending.sort_by_key(sort_key);
        }
        postponed
    }

    /// Deliver the user's answer to an earlier prompt.
    ///
    /// Does nothing when the entry is gone, was cancelled, or has no such
    /// prompt outstanding. Returns whether a power action was performed.
    pub fn answer_prompt(&mut self, ticket: PromptTicket, answer: bool) -> bool {
        let now = self.host.now();
        let host = &mut self.host;
        let entry = self
            .pending
            .iter_mut()
            .chain(self.processed.iter_mut())
            .find(|e| e.id() == ticket.timer);

        let Some(entry) = entry else {
            debug!("[PowerTimer] Answer for removed timer {} ignored", ticket.timer);
            host.prompt_closed(&ticket);
            return false;
        };
        if !entry.take_prompt(ticket.kind) {
            debug!("[PowerTimer] No {:?} prompt outstanding for {}", ticket.kind, entry);
            return false;
        }
        host.prompt_closed(&ticket);
        if entry.is_cancelled() {
            debug!("[PowerTimer] {} was cancelled, answer ignored", entry);
            return false;
        }

        let action = ticket.kind.action();
        entry.log(now, 8, format!("prompt for {} answered {}", action, if answer { "yes" } else { "no" }));
        if !answer {
            return false;
        }
        match host.perform_power_action(action) {
            Ok(()) => true,
            Err(e) => {
                warn!("[PowerTimer] {}: {}", entry, e);
                entry.log(now, 9, e.to_string());
                false
            }
        }
    }

    /// Begin of the first pending entry that has not started yet.
    pub fn next_zap_time(&self) -> Option<i64> {
        let now = self.host.now();
        self.pending.iter().map(TimerEntry::begin).find(|b| *b >= now)
    }

    /// Next time the power manager needs the box awake.
    ///
    /// While a timeshift recording runs this is never later than five
    /// minutes from now.
    pub fn next_power_manager_time(&self) -> Option<i64> {
        let now = self.host.now();
        let next = self
            .pending
            .iter()
            .map(TimerEntry::next_activation)
            .find(|t| *t >= now);

        if !self.host.is_timeshift_recording() {
            return next;
        }
        let fake = now + TIMESHIFT_WAKE_WINDOW;
        match next {
            Some(t) if t < fake => Some(t),
            _ => Some(fake),
        }
    }

    /// Whether the box should go back to standby after a timer wake-up:
    /// some entry sharing the earliest begin is a wakeup-to-standby timer.
    pub fn is_next_after_event_action_auto(&self) -> bool {
        let Some(first) = self.pending.first() else {
            return false;
        };
        self.pending
            .iter()
            .take_while(|e| e.begin() == first.begin())
            .any(|e| e.timer_type() == TimerType::WakeupToStandby)
    }

    /// Apply the retention policy to finished entries.
    ///
    /// Disabled entries that never ran are not history and are kept.
    pub fn cleanup_processed(&mut self) {
        let now = self.host.now();
        let mut dropped = Vec::new();

        if let Some(days) = self.retention.keep_days {
            let limit = now - i64::from(days) * 86_400;
            let (keep, old): (Vec<_>, Vec<_>) = std::mem::take(&mut self.processed)
                .into_iter()
                .partition(|e| !e.state().is_terminal() || e.repeated() != 0 || e.end() >= limit);
            self.processed = keep;
            dropped.extend(old);
        }
        if let Some(max) = self.retention.max_processed {
            let mut history = self.processed.iter().filter(|e| e.state().is_terminal()).count();
            let mut idx = 0;
            while history > max && idx < self.processed.len() {
                if self.processed[idx].state().is_terminal() {
                    dropped.push(self.processed.remove(idx));
                    history -= 1;
                } else {
                    idx += 1;
                }
            }
        }

        if !dropped.is_empty() {
            debug!("[PowerTimer] Dropped {} old timer(s) from history", dropped.len());
        }
        for entry in dropped.iter_mut() {
            close_prompts(&mut self.host, entry);
        }
    }

    /// Write all savable entries to the timer file, if one is attached.
    pub fn save(&self) -> std::result::Result<(), StoreError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let records: Vec<TimerRecord> = self
            .entries()
            .filter(|e| !e.dont_save())
            .map(|e| TimerRecord::from_entry(e, self.save_logs))
            .collect();
        store.save(&records)
    }

    /// Load the attached timer file into the queue.
    ///
    /// A corrupt file is quarantined and the queue stays empty. Rejected
    /// records and the first overlap are listed in the report.
    pub fn load(&mut self) -> Result<LoadReport> {
        let mut report = LoadReport::default();
        let Some(store) = self.store.clone() else {
            return Ok(report);
        };

        match store.load()? {
            StoreLoad::Missing => {}
            StoreLoad::Quarantined { error, moved_to } => {
                report.corrupt = Some(error);
                report.quarantined_to = moved_to;
            }
            StoreLoad::Loaded(decoded) => {
                for (index, e) in &decoded.rejected {
                    warn!("[PowerTimer] Timer record {} rejected: {}", index, e);
                }
                report.rejected = decoded.rejected;

                for record in decoded.records {
                    let mut entry = record.into_entry();
                    self.assign_id(&mut entry);
                    if report.overlap.is_none() {
                        let check = sanity::check(&entry.span(), &self.pending);
                        if !check.is_ok() {
                            report.overlap = Some(check);
                        }
                    }
                    self.add_entry(entry);
                    report.loaded += 1;
                }
            }
        }

        info!(
            "[PowerTimer] Loaded {} timer(s) from {:?} ({} pending)",
            report.loaded,
            store.path(),
            self.pending.len()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::PromptKind;
    use crate::mock::MockHost;
    use std::collections::HashSet;

    const T: i64 = 1_700_000_000;

    fn queue_at(now: i64) -> TimerQueue<MockHost> {
        TimerQueue::new(MockHost::at(now))
    }

    fn assert_single_membership(queue: &TimerQueue<MockHost>) {
        let mut seen = HashSet::new();
        for entry in queue.entries() {
            assert!(seen.insert(entry.id()), "{} listed twice", entry.id());
            assert!(entry.end() >= entry.begin());
        }
    }

    fn run_until(queue: &mut TimerQueue<MockHost>, t: i64) {
        queue.host_mut().now = t;
        queue.process_due().unwrap();
    }

    #[test]
    fn test_add_entry_sorted() {
        let mut queue = queue_at(T);
        let late = queue.add_entry(TimerEntry::new(T + 500, T + 600, TimerType::Standby));
        let early = queue.add_entry(TimerEntry::new(T + 100, T + 900, TimerType::Wakeup));
        let same_begin = queue.add_entry(TimerEntry::new(T + 100, T + 200, TimerType::Reboot));

        let order: Vec<_> = queue.pending().iter().map(TimerEntry::id).collect();
        assert_eq!(order, vec![same_begin, early, late]);
        assert_eq!(queue.next_activation(), Some(T + 100 - PREPARE_TIME));
        assert_single_membership(&queue);
    }

    #[test]
    fn test_disabled_and_elapsed_go_to_processed() {
        let mut queue = queue_at(T);
        queue.add_entry(TimerEntry::new(T + 100, T + 200, TimerType::Standby).with_disabled(true));
        queue.add_entry(TimerEntry::new(T - 200, T - 100, TimerType::Standby));
        assert!(queue.pending().is_empty());
        assert_eq!(queue.processed().len(), 2);
        assert_eq!(queue.next_activation(), None);
    }

    #[test]
    fn test_wakeup_lifecycle() {
        let mut queue = queue_at(T - 100);
        queue.host_mut().in_standby = true;
        let id = queue.add_entry(TimerEntry::new(T, T + 60, TimerType::Wakeup));

        run_until(&mut queue, T - PREPARE_TIME);
        assert_eq!(queue.get(id).unwrap().state(), TimerState::Prepared);

        run_until(&mut queue, T);
        assert_eq!(queue.get(id).unwrap().state(), TimerState::Running);
        assert_eq!(queue.host().actions, vec![PowerAction::Wake]);

        run_until(&mut queue, T + 60);
        assert!(queue.pending().is_empty());
        assert_eq!(queue.processed()[0].state(), TimerState::Ended);
        assert_single_membership(&queue);
    }

    #[test]
    fn test_process_due_runs_all_due_stages() {
        let mut queue = queue_at(T + 1000);
        let id = queue.add_entry(TimerEntry::new(T, T + 2000, TimerType::WakeupToStandby));
        assert_eq!(queue.process_due().unwrap(), 2);
        assert_eq!(queue.get(id).unwrap().state(), TimerState::Running);
    }

    #[test]
    fn test_deep_standby_deferred_by_recording() {
        let mut queue = queue_at(T - PREPARE_TIME);
        let id = queue.add_entry(TimerEntry::new(T, T + 60, TimerType::DeepStandby));
        queue.add_entry(TimerEntry::new(T + 200, T + 260, TimerType::Standby));
        queue.process_due().unwrap();

        queue.host_mut().recording = true;
        queue.host_mut().next_recording = Some(T + 100);
        run_until(&mut queue, T);

        let entry = queue.get(id).unwrap();
        assert_eq!(entry.state(), TimerState::Prepared);
        assert_eq!(entry.begin(), T + 300);
        // Re-sorted behind the standby timer.
        assert_eq!(queue.pending().last().unwrap().id(), id);
        assert_eq!(queue.next_activation(), Some(T + 200 - PREPARE_TIME));
    }

    #[test]
    fn test_skipped_entry_ends() {
        let mut queue = queue_at(T);
        let id = queue.add_entry(TimerEntry::new(T + 10, T + 20, TimerType::DeepStandby));
        queue.host_mut().now = T + 30;
        queue.do_activate(id).unwrap();
        let entry = queue.get(id).unwrap();
        assert_eq!(entry.state(), TimerState::Ended);
        assert!(queue.host().prompts.is_empty());
        assert_eq!(queue.processed().len(), 1);
    }

    #[test]
    fn test_repeated_entry_rescheduled() {
        let mut queue = queue_at(T - 100);
        let id = queue.add_entry(TimerEntry::new(T, T + 60, TimerType::WakeupToStandby).with_repeated(weekdays::ALL));

        run_until(&mut queue, T - PREPARE_TIME);
        run_until(&mut queue, T);
        run_until(&mut queue, T + 60);

        let entry = queue.get(id).unwrap();
        assert_eq!(entry.state(), TimerState::Waiting);
        assert!(entry.begin() > T + 60);
        assert_eq!(entry.end() - entry.begin(), 60);
        assert!(queue.processed().is_empty());
        assert_single_membership(&queue);
    }

    #[test]
    fn test_remove_recurring_entry() {
        let mut queue = queue_at(T);
        let id = queue.add_entry(TimerEntry::new(T + 100, T + 200, TimerType::Standby).with_repeated(weekdays::ALL));
        let removed = queue.remove_entry(id).unwrap().unwrap();
        assert_eq!(removed.repeated(), 0);
        assert!(removed.is_cancelled());
        assert!(!queue.contains(id));

        queue.host_mut().now = T + 7 * 86_400;
        assert_eq!(queue.process_due().unwrap(), 0);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_remove_running_entry_finishes_quietly() {
        let mut queue = queue_at(T - PREPARE_TIME);
        let id = queue.add_entry(TimerEntry::new(T, T + 600, TimerType::Wakeup).with_after_event(AfterEvent::DeepStandby));
        queue.host_mut().in_standby = true;
        run_until(&mut queue, T - PREPARE_TIME);
        run_until(&mut queue, T);
        assert_eq!(queue.get(id).unwrap().state(), TimerState::Running);

        queue.host_mut().now = T + 10;
        assert!(queue.remove_entry(id).unwrap().is_none());
        let entry = queue.get(id).unwrap();
        assert_eq!(entry.end(), T + 10);
        assert!(entry.is_disabled());

        queue.process_due().unwrap();
        assert_eq!(queue.get(id).unwrap().state(), TimerState::Ended);
        assert_eq!(queue.host().actions, vec![PowerAction::Wake]);
    }

    #[test]
    fn test_remove_unknown_entry() {
        let mut queue = queue_at(T);
        assert!(matches!(queue.remove_entry(TimerId(42)), Err(QueueError::TimerNotFound(_))));
    }

    #[test]
    fn test_record_reports_overlap_but_inserts() {
        let mut queue = queue_at(T);
        let first = queue.record(TimerEntry::new(T + 100, T + 300, TimerType::Standby), false).unwrap();
        assert!(first.conflicts.is_none());

        let second = queue.record(TimerEntry::new(T + 200, T + 400, TimerType::Reboot), false).unwrap();
        let report = second.conflicts.unwrap();
        assert_eq!(report.ids(), vec![second.id, first.id]);
        assert_eq!(queue.pending().len(), 2);

        let third = queue.record(TimerEntry::new(T + 250, T + 260, TimerType::Reboot), true).unwrap();
        assert!(third.conflicts.is_none());
    }

    #[test]
    fn test_prompt_answer_performs_action() {
        let mut queue = queue_at(T);
        let id = queue.add_entry(TimerEntry::new(T, T + 60, TimerType::DeepStandby));
        run_until(&mut queue, T);

        let prompt = queue.host().prompts.last().cloned().unwrap();
        assert_eq!(prompt.ticket, PromptTicket { timer: id, kind: PromptKind::DeepStandby });
        assert_eq!(queue.get(id).unwrap().outstanding_prompts(), &[PromptKind::DeepStandby]);

        assert!(queue.answer_prompt(prompt.ticket, true));
        assert_eq!(queue.host().actions, vec![PowerAction::DeepStandby]);
        assert_eq!(queue.host().closed, vec![prompt.ticket]);
        // A second answer for the same prompt is stale.
        assert!(!queue.answer_prompt(prompt.ticket, true));
    }

    #[test]
    fn test_prompt_answer_after_removal_is_noop() {
        let mut queue = queue_at(T - PREPARE_TIME);
        let id = queue.add_entry(TimerEntry::new(T, T + 60, TimerType::Standby));
        run_until(&mut queue, T - PREPARE_TIME);
        run_until(&mut queue, T);
        let ticket = queue.host().prompts[0].ticket;

        queue.remove_entry(id).unwrap();
        assert!(!queue.answer_prompt(ticket, true));
        assert!(queue.host().actions.is_empty());

        let no = PromptTicket { timer: TimerId(99), kind: PromptKind::Reboot };
        assert!(!queue.answer_prompt(no, true));
    }

    #[test]
    fn test_removed_entry_closes_open_prompt() {
        let mut queue = queue_at(T);
        let id = queue.add_entry(TimerEntry::new(T, T + 60, TimerType::DeepStandby));
        run_until(&mut queue, T);
        let ticket = queue.host().prompts[0].ticket;

        queue.remove_entry(id).unwrap();
        queue.process_due().unwrap();
        assert!(!queue.contains(id) || queue.get(id).unwrap().state().is_terminal());
        assert!(!queue.answer_prompt(ticket, true));
        assert!(queue.host().closed.contains(&ticket));
        assert!(queue.host().actions.is_empty());
    }

    #[test]
    fn test_answer_for_unknown_timer_closes_prompt() {
        let mut queue = queue_at(T);
        let ticket = PromptTicket { timer: TimerId(42), kind: PromptKind::Reboot };
        assert!(!queue.answer_prompt(ticket, true));
        assert_eq!(queue.host().closed, vec![ticket]);
    }

    #[test]
    fn test_retention_closes_prompts_of_dropped_entries() {
        let mut queue = queue_at(T);
        let id = queue.add_entry(TimerEntry::new(T, T + 60, TimerType::DeepStandby));
        run_until(&mut queue, T);
        run_until(&mut queue, T + 60);
        let ticket = queue.host().prompts[0].ticket;
        assert_eq!(queue.get(id).unwrap().state(), TimerState::Ended);
        assert_eq!(queue.get(id).unwrap().outstanding_prompts(), &[PromptKind::DeepStandby]);

        queue.retention = RetentionPolicy {
            keep_days: None,
            max_processed: Some(0),
        };
        queue.cleanup_processed();
        assert!(!queue.contains(id));
        assert_eq!(queue.host().closed, vec![ticket]);
    }

    #[test]
    fn test_deferred_entry_activated_once_per_pass() {
        let mut queue = queue_at(T + 40);
        let mut entry = TimerEntry::new(T + 40, T + 40, TimerType::AutoDeepStandby);
        entry.set_state(TimerState::Prepared);
        let id = queue.add_entry(entry);
        queue.host_mut().shutdown_prompt_open = true;
        let logged = queue.get(id).unwrap().log_entries().len();

        assert_eq!(queue.process_due().unwrap(), 1);
        assert_eq!(queue.get(id).unwrap().state(), TimerState::Prepared);
        assert_eq!(queue.get(id).unwrap().log_entries().len(), logged + 1);

        // Still due on the next pass, and again only once.
        assert_eq!(queue.process_due().unwrap(), 1);
    }

    #[test]
    fn test_zero_delay_auto_sleep_prompts_once_per_pass() {
        let mut queue = queue_at(T);
        let mut entry =
            TimerEntry::new(T, T, TimerType::AutoStandby).with_auto_sleep(0, AutoSleepRepeat::Repeated);
        entry.set_state(TimerState::Prepared);
        queue.add_entry(entry);

        assert_eq!(queue.process_due().unwrap(), 1);
        assert_eq!(queue.host().prompts.len(), 1);
    }

    #[test]
    fn test_load_rejects_out_of_range_time() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pm_timers.json");
        std::fs::write(
            &path,
            r#"{"timers":[
                {"timertype":"wakeup","begin":-9223372036854775808,"end":0},
                {"timertype":"standby","begin":1700000300,"end":1700000400}
            ]}"#,
        )
        .unwrap();

        let mut queue = queue_at(T).with_store(TimerStore::new(&path));
        let report = queue.load().unwrap();
        assert_eq!(report.loaded, 1);
        assert!(matches!(report.rejected[0], (0, RecordError::InvalidValue { field: "begin", .. })));
    }

    #[test]
    fn test_prompt_answer_no() {
        let mut queue = queue_at(T - PREPARE_TIME);
        queue.add_entry(TimerEntry::new(T, T + 60, TimerType::Reboot));
        run_until(&mut queue, T - PREPARE_TIME);
        run_until(&mut queue, T);
        let ticket = queue.host().prompts[0].ticket;
        assert!(!queue.answer_prompt(ticket, false));
        assert!(queue.host().actions.is_empty());
        assert_eq!(queue.host().closed.len(), 1);
    }

    #[test]
    fn test_key_press_postpones_and_resorts() {
        let mut queue = queue_at(T);
        let auto = queue.add_entry(
            TimerEntry::new(T + 20, T + 20, TimerType::AutoStandby).with_auto_sleep(10, AutoSleepRepeat::Once),
        );
        let other = queue.add_entry(TimerEntry::new(T + 700, T + 800, TimerType::Standby));
        run_until(&mut queue, T);
        assert_eq!(queue.get(auto).unwrap().begin(), T + 600);

        queue.host_mut().now = T + 300;
        assert_eq!(queue.key_pressed(), 1);
        assert_eq!(queue.get(auto).unwrap().begin(), T + 900);
        let order: Vec<_> = queue.pending().iter().map(TimerEntry::id).collect();
        assert_eq!(order, vec![other, auto]);
    }

    #[test]
    fn test_time_changed_restarts_auto_sleep() {
        let mut queue = queue_at(T);
        let id = queue.add_entry(TimerEntry::new(T + 20, T + 20, TimerType::AutoDeepStandby));
        run_until(&mut queue, T);
        assert!(queue.get(id).unwrap().key_listener_armed());

        queue.update_entry(id, |e| e.set_begin(T + 5000)).unwrap();
        let entry = queue.get(id).unwrap();
        assert_eq!(entry.state(), TimerState::Waiting);
        assert!(!entry.key_listener_armed());
        assert_eq!(entry.start_prepare(), T + 5000 - PREPARE_TIME);
    }

    #[test]
    fn test_time_changed_revives_finished_entry() {
        let mut queue = queue_at(T);
        let id = queue.add_entry(TimerEntry::new(T - 100, T - 50, TimerType::Standby));
        assert_eq!(queue.processed().len(), 1);
        queue.update_entry(id, |e| e.set_window(T + 100, T + 200)).unwrap();
        assert_eq!(queue.pending().len(), 1);
        assert_eq!(queue.get(id).unwrap().state(), TimerState::Waiting);
        assert_single_membership(&queue);
    }

    #[test]
    fn test_remove_lets_autoincrease_grow() {
        let mut queue = queue_at(T);
        let grow = queue.add_entry(TimerEntry::new(T + 10, T + 100, TimerType::Wakeup).with_autoincrease(true));
        let blocker = queue.add_entry(TimerEntry::new(T + 1000, T + 2000, TimerType::Standby));
        let late = queue.add_entry(TimerEntry::new(T + 50_000, T + 60_000, TimerType::Standby));

        queue.remove_entry(blocker).unwrap();
        assert_eq!(queue.get(grow).unwrap().end(), T + 50_000 - AUTOINCREASE_MARGIN);
        assert_eq!(queue.get(late).unwrap().end(), T + 60_000);
    }

    #[test]
    fn test_queue_queries() {
        let mut queue = queue_at(T);
        assert_eq!(queue.next_zap_time(), None);
        assert!(!queue.is_next_after_event_action_auto());

        queue.add_entry(TimerEntry::new(T + 100, T + 200, TimerType::Standby));
        queue.add_entry(TimerEntry::new(T + 100, T + 300, TimerType::WakeupToStandby));
        queue.add_entry(TimerEntry::new(T + 900, T + 950, TimerType::WakeupToStandby));
        assert!(queue.is_next_after_event_action_auto());
        assert_eq!(queue.next_zap_time(), Some(T + 100));
        assert_eq!(queue.next_power_manager_time(), Some(T + 100 - PREPARE_TIME));

        queue.host_mut().timeshift = true;
        assert_eq!(queue.next_power_manager_time(), Some(T + 100 - PREPARE_TIME));
        queue.host_mut().now = T - 1000;
        assert_eq!(queue.next_power_manager_time(), Some(T - 1000 + TIMESHIFT_WAKE_WINDOW));
    }

    #[test]
    fn test_after_event_auto_only_for_earliest() {
        let mut queue = queue_at(T);
        queue.add_entry(TimerEntry::new(T + 100, T + 200, TimerType::Standby));
        queue.add_entry(TimerEntry::new(T + 900, T + 950, TimerType::WakeupToStandby));
        assert!(!queue.is_next_after_event_action_auto());
    }

    #[test]
    fn test_retention_policy() {
        let day = 86_400;
        let mut queue = queue_at(T).with_retention(RetentionPolicy {
            keep_days: Some(2),
            max_processed: Some(1),
        });
        for offset in [10, 5, 1, 0] {
            let id = queue.add_entry(TimerEntry::new(T - offset * day - 60, T - offset * day - 30, TimerType::Standby));
            assert!(queue.processed().iter().any(|e| e.id() == id));
        }
        // Finished history is what do_activate produces; mark them ended.
        for entry in queue.processed.iter_mut() {
            entry.set_state(TimerState::Ended);
        }
        queue.add_entry(TimerEntry::new(T + 100, T + 200, TimerType::Standby).with_disabled(true));

        queue.cleanup_processed();
        let ends: Vec<_> = queue.processed().iter().filter(|e| e.state().is_terminal()).map(|e| e.end()).collect();
        assert_eq!(ends, vec![T - 30]);
        assert!(queue.processed().iter().any(|e| e.is_disabled()));
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pm_timers.json");

        let mut queue = queue_at(T).with_store(TimerStore::new(&path));
        queue.record(TimerEntry::new(T + 100, T + 200, TimerType::Reboot).with_after_event(AfterEvent::Auto), true).unwrap();
        queue
            .record(
                TimerEntry::new(T + 500, T + 900, TimerType::AutoDeepStandby)
                    .with_auto_sleep(30, AutoSleepRepeat::Repeated)
                    .with_disabled(true),
                true,
            )
            .unwrap();
        queue
            .record(
                TimerEntry::new(T - 500, T - 400, TimerType::Wakeup)
                    .with_log_entries(vec![LogEntry::new(T - 900, 5, "activating state 1")]),
                true,
            )
            .unwrap();
        queue.add_entry(TimerEntry::new(T + 50, T + 60, TimerType::Standby).with_dont_save(true));
        queue.save().unwrap();

        let tuple = |e: &TimerEntry| (e.timer_type(), e.begin(), e.end(), e.repeated(), e.after_event(), e.is_disabled());
        let expected: HashSet<_> = queue.entries().filter(|e| !e.dont_save()).map(tuple).collect();

        let mut reloaded = queue_at(T).with_store(TimerStore::new(&path));
        let report = reloaded.load().unwrap();
        assert!(report.is_clean());
        assert_eq!(report.loaded, 3);
        let actual: HashSet<_> = reloaded.entries().map(tuple).collect();
        assert_eq!(actual, expected);

        for saved in queue.entries().filter(|e| !e.dont_save()) {
            let copy = reloaded.entries().find(|e| tuple(e) == tuple(saved)).unwrap();
            assert_eq!(copy.log_entries(), saved.log_entries());
        }
        assert_single_membership(&reloaded);
    }

    #[test]
    fn test_load_rejects_bogus_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pm_timers.json");
        std::fs::write(
            &path,
            r#"{"timers":[
                {"timertype":"bogus","begin":1700000100,"end":1700000200},
                {"timertype":"standby","begin":1700000300,"end":1700000400}
            ]}"#,
        )
        .unwrap();

        let mut queue = queue_at(T).with_store(TimerStore::new(&path));
        let report = queue.load().unwrap();
        assert_eq!(report.loaded, 1);
        assert_eq!(report.rejected, vec![(0, RecordError::UnknownTimerType("bogus".into()))]);
        assert_eq!(queue.pending()[0].timer_type(), TimerType::Standby);
    }

    #[test]
    fn test_load_reports_overlap_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pm_timers.json");
        let mut queue = queue_at(T).with_store(TimerStore::new(&path));
        for _ in 0..3 {
            queue.add_entry(TimerEntry::new(T + 100, T + 200, TimerType::Standby));
        }
        queue.save().unwrap();

        let mut reloaded = queue_at(T).with_store(TimerStore::new(&path));
        let report = reloaded.load().unwrap();
        assert_eq!(report.loaded, 3);
        assert_eq!(report.overlap.unwrap().simultaneous.len(), 2);
    }

    #[test]
    fn test_load_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pm_timers.json");
        std::fs::write(&path, "garbage").unwrap();

        let mut queue = queue_at(T).with_store(TimerStore::new(&path));
        let report = queue.load().unwrap();
        assert!(report.corrupt.is_some());
        assert!(report.quarantined_to.unwrap().exists());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_logs_not_saved_when_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pm_timers.json");
        let mut queue = queue_at(T).with_store(TimerStore::new(&path)).with_save_logs(false);
        queue
            .record(
                TimerEntry::new(T + 100, T + 200, TimerType::Standby).with_log_entries(vec![LogEntry::new(T, 1, "x")]),
                true,
            )
            .unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(!text.contains("\"log\""));
    }
}
