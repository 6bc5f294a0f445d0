use std::collections::HashSet;
use std::sync::Arc;

use chrono::NaiveDate;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::ledger::{TimeLedger, format_hms};
use crate::scheduler::Scheduler;
use crate::settings::{Paths, Settings};
use crate::storage::{SaveReport, Session, load_session, save_session};
use crate::store::{NewTask, Task, TaskHandle, TaskStore};

pub type SharedTracker = Arc<Mutex<Tracker>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickUpdate {
    pub handle: TaskHandle,
    pub display: String,
}

#[derive(Debug)]
pub struct Tracker {
    paths: Paths,
    settings: Settings,
    store: TaskStore,
    ledger: TimeLedger,
    day_files: HashSet<u64>,
    today: NaiveDate,
}

impl Tracker {
    pub fn open(paths: Paths, settings: Settings, today: NaiveDate) -> Self {
        let Session {
            store,
            ledger,
            day_files,
        } = load_session(&paths, today);
        Self {
            paths,
            settings,
            store,
            ledger,
            day_files,
            today,
        }
    }

    pub fn into_shared(self) -> SharedTracker {
        Arc::new(Mutex::new(self))
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    pub fn today(&self) -> NaiveDate {
        self.today
    }

    pub fn task(&self, handle: TaskHandle) -> Option<&Task> {
        self.store.get(handle)
    }

    pub fn seconds_of(&self, handle: TaskHandle) -> f64 {
        self.ledger.seconds_of(handle)
    }

    pub fn display_of(&self, handle: TaskHandle) -> String {
        format_hms(self.ledger.seconds_of(handle))
    }

    pub fn total_display(&self) -> String {
        format_hms(self.ledger.total())
    }

    pub fn create_task(&mut self, title: &str, category: &str) -> Option<TaskHandle> {
        let title = single_line(title);
        if title.is_empty() {
            debug!("ignoring task with a blank title");
            return None;
        }

        let handle = self.store.create_task(NewTask {
            title,
            category: single_line(category),
            created: self.today,
            hidden: false,
        });
        self.ledger.reset(handle);
        if let Some(task) = self.store.get(handle) {
            info!(id = task.id, title = %task.title, "created task");
        }
        Some(handle)
    }

    pub fn set_selection(&mut self, selection: &[TaskHandle]) {
        self.store.deactivate_all();
        for handle in selection {
            if !self.store.set_active(*handle, true) {
                warn!(%handle, "selection refers to a task that no longer exists");
            }
        }
    }

    pub fn delete_selected(&mut self, selection: &[TaskHandle]) {
        for handle in selection {
            match self.store.delete_task(*handle) {
                Some(task) => {
                    self.ledger.remove(*handle);
                    info!(id = task.id, title = %task.title, "deleted task");
                }
                None => warn!(%handle, "delete refers to a task that no longer exists"),
            }
        }
    }

    pub fn hide_selected(&mut self, selection: &[TaskHandle]) {
        debug!(count = selection.len(), "hide requested, nothing to do");
    }

    pub fn adjust_selected(&mut self, selection: &[TaskHandle], delta_seconds: f64) {
        for handle in selection {
            self.ledger.adjust(*handle, delta_seconds);
        }
    }

    pub fn stop_all(&mut self) {
        self.store.deactivate_all();
    }

    pub fn save(&mut self) -> SaveReport {
        save_session(
            &self.paths,
            &self.store,
            &self.ledger,
            self.today,
            self.settings.save_threshold_seconds,
            &mut self.day_files,
        )
    }

    pub fn tick(&mut self, today: NaiveDate) -> Vec<TickUpdate> {
        if today != self.today {
            info!(from = %self.today, to = %today, "day changed, closing out totals");
            self.save();
            self.ledger.reset_all();
            self.day_files.clear();
            self.today = today;
        }

        let active = self.store.active_handles();
        self.ledger.accrue(&active, self.settings.tick_seconds);
        active
            .into_iter()
            .filter(|handle| self.ledger.contains(*handle))
            .map(|handle| TickUpdate {
                handle,
                display: self.display_of(handle),
            })
            .collect()
    }
}

/// Stops the ticker, then saves. The tracker is not locked while joining, so
/// a tick already waiting on the lock finishes and its time is saved too.
pub fn exit(tracker: &SharedTracker, scheduler: Scheduler) -> SaveReport {
    scheduler.cancel();
    scheduler.join();
    let report = tracker.lock().save();
    info!(?report, "exited");
    report
}

fn single_line(text: &str) -> String {
    text.split(['\r', '\n'])
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::mpsc;
    use std::time::Duration;

    use chrono::NaiveDate;
    use tempfile::tempdir;

    use crate::scheduler::Scheduler;
    use crate::settings::{Paths, Settings};

    use super::{Tracker, exit};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 4, d).unwrap()
    }

    fn open(root: &std::path::Path) -> Tracker {
        Tracker::open(Paths::new(root), Settings::default(), day(10))
    }

    #[test]
    fn shares_ticks_between_selected_tasks() {
        let dir = tempdir().unwrap();
        let mut tracker = open(dir.path());
        let a = tracker.create_task("A", "").unwrap();
        let b = tracker.create_task("B", "").unwrap();

        tracker.set_selection(&[a, b]);
        for _ in 0..10 {
            tracker.tick(day(10));
        }
        assert_eq!(tracker.seconds_of(a), 5.0);
        assert_eq!(tracker.seconds_of(b), 5.0);

        tracker.set_selection(&[b]);
        let mut updates = Vec::new();
        for _ in 0..10 {
            updates = tracker.tick(day(10));
        }
        assert_eq!(tracker.seconds_of(a), 5.0);
        assert_eq!(tracker.seconds_of(b), 15.0);
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].handle, b);
        assert_eq!(updates[0].display, "0:0:15");
    }

    #[test]
    fn stop_all_halts_accrual() {
        let dir = tempdir().unwrap();
        let mut tracker = open(dir.path());
        let a = tracker.create_task("A", "").unwrap();
        tracker.set_selection(&[a]);
        tracker.tick(day(10));
        tracker.stop_all();

        assert!(tracker.tick(day(10)).is_empty());
        assert_eq!(tracker.seconds_of(a), 1.0);
        assert!(!tracker.task(a).unwrap().active);
    }

    #[test]
    fn adjusts_by_the_hour_and_clamps() {
        let dir = tempdir().unwrap();
        let mut tracker = open(dir.path());
        let a = tracker.create_task("A", "").unwrap();

        tracker.adjust_selected(&[a], 3600.0);
        assert_eq!(tracker.display_of(a), "1:0:0");
        tracker.adjust_selected(&[a], -1800.0);
        assert_eq!(tracker.seconds_of(a), 1800.0);
        tracker.adjust_selected(&[a], -3600.0);
        assert_eq!(tracker.seconds_of(a), 0.0);
    }

    #[test]
    fn deleting_leaves_stale_selection_harmless() {
        let dir = tempdir().unwrap();
        let mut tracker = open(dir.path());
        let a = tracker.create_task("A", "").unwrap();
        let b = tracker.create_task("B", "").unwrap();
        tracker.set_selection(&[a, b]);
        tracker.delete_selected(&[a]);

        tracker.set_selection(&[a, b]);
        let updates = tracker.tick(day(10));
        assert_eq!(updates.len(), 1);
        assert_eq!(tracker.seconds_of(b), 1.0);
        assert!(tracker.task(a).is_none());

        tracker.adjust_selected(&[a], 3600.0);
        tracker.delete_selected(&[a]);
        assert_eq!(tracker.store().len(), 1);
    }

    #[test]
    fn hide_is_a_safe_no_op() {
        let dir = tempdir().unwrap();
        let mut tracker = open(dir.path());
        let a = tracker.create_task("A", "").unwrap();
        tracker.hide_selected(&[a]);
        assert!(!tracker.task(a).unwrap().hidden);
    }

    #[test]
    fn blank_titles_are_ignored_and_titles_are_flattened() {
        let dir = tempdir().unwrap();
        let mut tracker = open(dir.path());
        assert!(tracker.create_task("   ", "").is_none());

        let handle = tracker.create_task("  two\nlines ", " misc ").unwrap();
        let task = tracker.task(handle).unwrap();
        assert_eq!(task.title, "two lines");
        assert_eq!(task.category, "misc");
        assert_eq!(task.created, day(10));
    }

    #[test]
    fn reload_preserves_tasks_and_keeps_ids_growing() {
        let dir = tempdir().unwrap();
        let mut tracker = open(dir.path());
        let x = tracker.create_task("X", "").unwrap();
        let first_id = tracker.task(x).unwrap().id;
        tracker.set_selection(&[x]);
        tracker.tick(day(10));
        tracker.tick(day(10));
        tracker.save();

        let mut reopened = open(dir.path());
        let handle = reopened.store().handle_for_id(first_id).unwrap();
        let task = reopened.task(handle).unwrap();
        assert_eq!(task.title, "X");
        assert_eq!(task.category, "");
        assert_eq!(task.created, day(10));
        assert!(!task.hidden);
        assert!(!task.active);
        assert_eq!(reopened.seconds_of(handle), 2.0);

        let next = reopened.create_task("Y", "").unwrap();
        assert!(reopened.task(next).unwrap().id > first_id);
    }

    #[test]
    fn ids_stay_unique_when_config_is_lost() {
        let dir = tempdir().unwrap();
        let mut tracker = open(dir.path());
        tracker.create_task("A", "");
        let b = tracker.create_task("B", "").unwrap();
        let b_id = tracker.task(b).unwrap().id;
        tracker.save();
        fs::remove_file(tracker.paths().config_file()).unwrap();

        let mut reopened = open(dir.path());
        let c = reopened.create_task("C", "").unwrap();
        assert_eq!(reopened.task(c).unwrap().id, b_id + 1);
    }

    #[test]
    fn threshold_decides_whether_a_day_file_exists() {
        let dir = tempdir().unwrap();
        let mut tracker = open(dir.path());
        let brief = tracker.create_task("Brief", "").unwrap();
        let long = tracker.create_task("Long", "").unwrap();
        tracker.adjust_selected(&[brief], 0.4);
        tracker.adjust_selected(&[long], 0.9);
        tracker.save();

        let brief_id = tracker.task(brief).unwrap().id;
        let long_id = tracker.task(long).unwrap().id;
        assert!(!tracker.paths().day_file(brief_id, day(10)).exists());
        assert!(tracker.paths().day_file(long_id, day(10)).exists());
    }

    #[test]
    fn midnight_rollover_closes_out_the_day() {
        let dir = tempdir().unwrap();
        let mut tracker = open(dir.path());
        let a = tracker.create_task("A", "").unwrap();
        let id = tracker.task(a).unwrap().id;
        tracker.adjust_selected(&[a], 30.0);
        tracker.set_selection(&[a]);

        tracker.tick(day(11));
        assert_eq!(tracker.today(), day(11));
        assert_eq!(tracker.seconds_of(a), 1.0);
        assert_eq!(
            fs::read_to_string(tracker.paths().day_file(id, day(10))).unwrap(),
            "30.0"
        );
    }

    #[test]
    fn exit_saves_and_stops_the_ticker() {
        let dir = tempdir().unwrap();
        let tracker = open(dir.path()).into_shared();
        let handle = tracker.lock().create_task("Ticking", "").unwrap();
        tracker.lock().set_selection(&[handle]);

        let (tx, rx) = mpsc::channel();
        let scheduler = Scheduler::start(Duration::from_millis(2), {
            let tracker = tracker.clone();
            move || {
                let updates = tracker.lock().tick(day(10));
                let _ = tx.send(updates);
            }
        })
        .unwrap();

        let updates = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(updates[0].handle, handle);

        let report = exit(&tracker, scheduler);
        assert!(report.tasks_saved);
        assert!(tracker.lock().paths().tasks_file().exists());
    }

    #[test]
    fn exit_saves_the_last_tick() {
        let dir = tempdir().unwrap();
        let tracker = open(dir.path()).into_shared();
        let handle = tracker.lock().create_task("Busy", "").unwrap();
        let id = tracker.lock().task(handle).unwrap().id;
        tracker.lock().set_selection(&[handle]);

        let (tx, rx) = mpsc::channel();
        let scheduler = Scheduler::start(Duration::from_millis(1), {
            let tracker = tracker.clone();
            move || {
                tracker.lock().tick(day(10));
                let _ = tx.send(());
            }
        })
        .unwrap();
        for _ in 0..3 {
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }

        exit(&tracker, scheduler);
        let tracker = tracker.lock();
        let on_disk = fs::read_to_string(tracker.paths().day_file(id, day(10))).unwrap();
        assert_eq!(on_disk.parse::<f64>().unwrap(), tracker.seconds_of(handle));
    }

    #[test]
    fn unreadable_day_file_is_kept_across_saves() {
        let dir = tempdir().unwrap();
        let paths = Paths::new(dir.path());
        fs::create_dir_all(paths.task_dir(1)).unwrap();
        fs::write(paths.tasks_file(), "TITLE:^:Kept\nIDNUM:^:1\nCREATED:^:2026-04-01\n").unwrap();
        fs::write(paths.day_file(1, day(10)), "7200.5 \0junk").unwrap();

        let mut tracker = open(dir.path());
        let report = tracker.save();
        assert_eq!(report.failures, 0);
        assert_eq!(
            fs::read_to_string(paths.day_file(1, day(10))).unwrap(),
            "7200.5 \0junk"
        );
    }

    #[test]
    fn adjusting_to_zero_removes_this_session_day_file() {
        let dir = tempdir().unwrap();
        let mut tracker = open(dir.path());
        let a = tracker.create_task("A", "").unwrap();
        let id = tracker.task(a).unwrap().id;
        tracker.adjust_selected(&[a], 3600.0);
        tracker.save();
        assert!(tracker.paths().day_file(id, day(10)).exists());

        tracker.adjust_selected(&[a], -3600.0);
        tracker.save();
        assert!(!tracker.paths().day_file(id, day(10)).exists());
    }
}
