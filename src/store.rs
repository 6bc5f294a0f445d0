use std::fmt::{Display, Formatter};

use chrono::NaiveDate;
use thiserror::Error;

/// Largest id the store accepts from disk. Keeps the high-water mark far
/// enough below `u64::MAX` that allocating further ids cannot overflow.
pub const MAX_TASK_ID: u64 = u32::MAX as u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskHandle(u64);

impl TaskHandle {
    #[cfg(test)]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl Display for TaskHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: u64,
    pub title: String,
    pub category: String,
    pub created: NaiveDate,
    pub active: bool,
    pub hidden: bool,
}

#[derive(Debug, Clone)]
pub struct NewTask {
    pub title: String,
    pub category: String,
    pub created: NaiveDate,
    pub hidden: bool,
}

impl NewTask {
    pub fn titled(title: impl Into<String>, created: NaiveDate) -> Self {
        Self {
            title: title.into(),
            category: String::new(),
            created,
            hidden: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRecord {
    pub id: u64,
    pub title: String,
    pub category: String,
    pub created: NaiveDate,
    pub hidden: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Config {
    pub largest_available_id: u64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("task id {0} is already loaded")]
    DuplicateId(u64),
    #[error("task id {0} is above the largest allowed id {max}", max = MAX_TASK_ID)]
    IdOutOfRange(u64),
}

#[derive(Debug, Clone, Default)]
pub struct TaskStore {
    config: Config,
    tasks: Vec<(TaskHandle, Task)>,
    next_handle: u64,
}

impl TaskStore {
    pub fn new(config: Config) -> Self {
        let config = Config {
            largest_available_id: config.largest_available_id.min(MAX_TASK_ID),
        };
        Self {
            config,
            tasks: Vec::new(),
            next_handle: 0,
        }
    }

    pub fn config(&self) -> Config {
        self.config
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn create_task(&mut self, new_task: NewTask) -> TaskHandle {
        // The mark starts at or below MAX_TASK_ID, so u64 has room for every
        // id a session can allocate.
        let id = self.config.largest_available_id.saturating_add(1);
        self.config.largest_available_id = id;
        self.insert(Task {
            id,
            title: new_task.title,
            category: new_task.category,
            created: new_task.created,
            active: false,
            hidden: new_task.hidden,
        })
    }

    pub fn load_task(&mut self, record: TaskRecord) -> Result<TaskHandle, StoreError> {
        if record.id > MAX_TASK_ID {
            return Err(StoreError::IdOutOfRange(record.id));
        }
        if self.handle_for_id(record.id).is_some() {
            return Err(StoreError::DuplicateId(record.id));
        }

        self.config.largest_available_id = self.config.largest_available_id.max(record.id);
        Ok(self.insert(Task {
            id: record.id,
            title: record.title,
            category: record.category,
            created: record.created,
            active: false,
            hidden: record.hidden,
        }))
    }

    pub fn delete_task(&mut self, handle: TaskHandle) -> Option<Task> {
        let index = self.tasks.iter().position(|(candidate, _)| *candidate == handle)?;
        Some(self.tasks.remove(index).1)
    }

    pub fn get(&self, handle: TaskHandle) -> Option<&Task> {
        self.tasks
            .iter()
            .find(|(candidate, _)| *candidate == handle)
            .map(|(_, task)| task)
    }

    pub fn handle_for_id(&self, id: u64) -> Option<TaskHandle> {
        self.tasks
            .iter()
            .find(|(_, task)| task.id == id)
            .map(|(handle, _)| *handle)
    }

    pub fn iter(&self) -> impl Iterator<Item = (TaskHandle, &Task)> {
        self.tasks.iter().map(|(handle, task)| (*handle, task))
    }

    pub fn set_hidden(&mut self, handle: TaskHandle, hidden: bool) -> bool {
        self.update(handle, |task| task.hidden = hidden)
    }

    pub fn set_active(&mut self, handle: TaskHandle, active: bool) -> bool {
        self.update(handle, |task| task.active = active)
    }

    pub fn deactivate_all(&mut self) {
        for (_, task) in &mut self.tasks {
            task.active = false;
        }
    }

    pub fn active_handles(&self) -> Vec<TaskHandle> {
        self.iter()
            .filter(|(_, task)| task.active)
            .map(|(handle, _)| handle)
            .collect()
    }

    fn insert(&mut self, task: Task) -> TaskHandle {
        self.next_handle += 1;
        let handle = TaskHandle(self.next_handle);
        self.tasks.push((handle, task));
        handle
    }

    fn update(&mut self, handle: TaskHandle, apply: impl FnOnce(&mut Task)) -> bool {
        match self.tasks.iter_mut().find(|(candidate, _)| *candidate == handle) {
            Some((_, task)) => {
                apply(task);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{Config, MAX_TASK_ID, NewTask, StoreError, TaskRecord, TaskStore};

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 14).unwrap()
    }

    fn record(id: u64, title: &str) -> TaskRecord {
        TaskRecord {
            id,
            title: title.to_string(),
            category: String::new(),
            created: day(),
            hidden: false,
        }
    }

    #[test]
    fn allocates_ids_above_the_high_water_mark() {
        let mut store = TaskStore::new(Config {
            largest_available_id: 7,
        });
        let first = store.create_task(NewTask::titled("Write report", day()));
        let second = store.create_task(NewTask::titled("Review", day()));

        assert_eq!(store.get(first).unwrap().id, 8);
        assert_eq!(store.get(second).unwrap().id, 9);
        assert_eq!(store.config().largest_available_id, 9);
    }

    #[test]
    fn loading_raises_a_stale_mark() {
        let mut store = TaskStore::new(Config::default());
        store.load_task(record(12, "Old task")).unwrap();
        store.load_task(record(4, "Older task")).unwrap();
        assert_eq!(store.config().largest_available_id, 12);

        let fresh = store.create_task(NewTask::titled("New", day()));
        assert_eq!(store.get(fresh).unwrap().id, 13);
    }

    #[test]
    fn loading_keeps_a_higher_mark() {
        let mut store = TaskStore::new(Config {
            largest_available_id: 40,
        });
        store.load_task(record(3, "Task")).unwrap();
        assert_eq!(store.config().largest_available_id, 40);
    }

    #[test]
    fn oversized_ids_never_reach_the_mark() {
        let mut store = TaskStore::new(Config {
            largest_available_id: u64::MAX,
        });
        assert_eq!(store.config().largest_available_id, MAX_TASK_ID);
        assert_eq!(
            store.load_task(record(u64::MAX, "Huge")),
            Err(StoreError::IdOutOfRange(u64::MAX))
        );

        let fresh = store.create_task(NewTask::titled("After huge", day()));
        assert_eq!(store.get(fresh).unwrap().id, MAX_TASK_ID + 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn rejects_duplicate_ids() {
        let mut store = TaskStore::new(Config::default());
        store.load_task(record(2, "First")).unwrap();
        assert_eq!(
            store.load_task(record(2, "Second")),
            Err(StoreError::DuplicateId(2))
        );
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn deleted_ids_are_never_reused() {
        let mut store = TaskStore::new(Config::default());
        let first = store.create_task(NewTask::titled("A", day()));
        let removed = store.delete_task(first).unwrap();
        assert_eq!(removed.id, 1);
        assert!(store.get(first).is_none());
        assert!(store.delete_task(first).is_none());

        let second = store.create_task(NewTask::titled("B", day()));
        assert_eq!(store.get(second).unwrap().id, 2);
    }

    #[test]
    fn tracks_flags_and_insertion_order() {
        let mut store = TaskStore::new(Config::default());
        let a = store.create_task(NewTask::titled("A", day()));
        let b = store.create_task(NewTask::titled("B", day()));
        let c = store.create_task(NewTask::titled("C", day()));

        assert!(store.set_active(a, true));
        assert!(store.set_active(c, true));
        assert!(store.set_hidden(b, true));
        assert_eq!(store.active_handles(), vec![a, c]);
        assert!(store.get(b).unwrap().hidden);

        store.deactivate_all();
        assert!(store.active_handles().is_empty());

        let titles = store.iter().map(|(_, task)| task.title.as_str()).collect::<Vec<_>>();
        assert_eq!(titles, ["A", "B", "C"]);
        assert_eq!(store.handle_for_id(2), Some(b));
    }

    #[test]
    fn loaded_tasks_start_inactive() {
        let mut store = TaskStore::new(Config::default());
        let handle = store.load_task(record(5, "Loaded")).unwrap();
        assert!(!store.get(handle).unwrap().active);
    }
}
