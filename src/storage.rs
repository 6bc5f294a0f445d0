use std::collections::HashSet;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::ledger::TimeLedger;
use crate::settings::Paths;
use crate::store::{Config, MAX_TASK_ID, TaskRecord, TaskStore};

const CONFIG_KEY: &str = "LargestAvailableIdNumber";
const FIELD_SEPARATOR: &str = ":^:";
const HIDDEN: &str = "Hidden";
const NOT_HIDDEN: &str = "NotHidden";
const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{path} does not hold a valid seconds value: {value:?}")]
    InvalidSeconds { path: PathBuf, value: String },
}

impl StorageError {
    fn io(path: &Path) -> impl FnOnce(std::io::Error) -> Self + '_ {
        move |source| StorageError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("record starting on line {line} has an empty title")]
    MissingTitle { line: usize },
    #[error("record {title:?} on line {line} has no IDNUM")]
    MissingId { line: usize, title: String },
    #[error("record {title:?} on line {line} has an invalid IDNUM {value:?}")]
    InvalidId {
        line: usize,
        title: String,
        value: String,
    },
}

// ---------------------------------------------------------------------------
// Config file

pub fn parse_config(raw: &str) -> Config {
    let mut config = Config::default();
    for (index, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((name, value)) = line.split_once(':') else {
            warn!(line = index + 1, "skipping malformed config line");
            continue;
        };
        if name.trim() != CONFIG_KEY {
            debug!(line = index + 1, name, "ignoring unknown config key");
            continue;
        }
        match value.trim().parse::<u64>() {
            Ok(id) if id <= MAX_TASK_ID => config.largest_available_id = id,
            Ok(id) => warn!(line = index + 1, id, "skipping out-of-range {CONFIG_KEY}"),
            Err(err) => warn!(line = index + 1, %err, "skipping unparsable {CONFIG_KEY}"),
        }
    }
    config
}

pub fn encode_config(config: &Config) -> String {
    format!("{CONFIG_KEY}:{}\n", config.largest_available_id)
}

pub fn read_config(path: &Path) -> Result<Config, StorageError> {
    match fs::read_to_string(path) {
        Ok(raw) => Ok(parse_config(&raw)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(Config::default()),
        Err(err) => Err(StorageError::io(path)(err)),
    }
}

pub fn write_config(path: &Path, config: &Config) -> Result<(), StorageError> {
    write_atomic(path, encode_config(config).as_bytes())
}

// ---------------------------------------------------------------------------
// Task file

#[derive(Debug, Default)]
struct PendingRecord {
    line: usize,
    title: String,
    id: Option<String>,
    category: String,
    created: Option<String>,
    hidden: Option<String>,
}

impl PendingRecord {
    fn starting(line: usize, title: &str) -> Self {
        Self {
            line,
            title: title.to_string(),
            ..Self::default()
        }
    }

    fn finish(self, today: NaiveDate) -> Result<TaskRecord, RecordError> {
        if self.title.is_empty() {
            return Err(RecordError::MissingTitle { line: self.line });
        }

        let id = match self.id {
            None => {
                return Err(RecordError::MissingId {
                    line: self.line,
                    title: self.title,
                });
            }
            Some(value) => {
                let parsed = value.trim().parse::<u64>();
                match parsed {
                    Ok(id) if (1..=MAX_TASK_ID).contains(&id) => id,
                    _ => {
                        return Err(RecordError::InvalidId {
                            line: self.line,
                            title: self.title,
                            value,
                        });
                    }
                }
            }
        };

        let created = match self.created.as_deref().map(str::trim) {
            Some(raw) => NaiveDate::parse_from_str(raw, DATE_FORMAT).unwrap_or_else(|err| {
                warn!(id, raw, %err, "unreadable CREATED date, using today");
                today
            }),
            None => {
                warn!(id, "record has no CREATED date, using today");
                today
            }
        };

        let hidden = match self.hidden.as_deref() {
            None => false,
            Some(raw) => parse_hidden(raw).unwrap_or_else(|| {
                warn!(id, raw, "unreadable HIDDEN flag, treating as visible");
                false
            }),
        };

        Ok(TaskRecord {
            id,
            title: self.title,
            category: self.category,
            created,
            hidden,
        })
    }
}

enum ParseState {
    AwaitingTitle,
    Accumulating(PendingRecord),
}

#[derive(Debug, Default)]
pub struct ParsedTasks {
    pub records: Vec<TaskRecord>,
    pub rejected: Vec<RecordError>,
}

impl ParsedTasks {
    fn flush(&mut self, state: ParseState, today: NaiveDate) {
        if let ParseState::Accumulating(pending) = state {
            match pending.finish(today) {
                Ok(record) => self.records.push(record),
                Err(err) => {
                    warn!(%err, "dropping task record");
                    self.rejected.push(err);
                }
            }
        }
    }
}

/// Scans the task file. A record is only complete once the next `TITLE`
/// line or the end of input is reached.
pub fn parse_tasks(raw: &str, today: NaiveDate) -> ParsedTasks {
    let mut parsed = ParsedTasks::default();
    let mut state = ParseState::AwaitingTitle;

    for (index, line) in raw.lines().enumerate() {
        let line_no = index + 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((name, value)) = line.split_once(FIELD_SEPARATOR) else {
            warn!(line = line_no, "skipping task line without a field separator");
            continue;
        };
        let name = name.trim().to_ascii_uppercase();

        if name == "TITLE" {
            let finished = std::mem::replace(
                &mut state,
                ParseState::Accumulating(PendingRecord::starting(line_no, value)),
            );
            parsed.flush(finished, today);
            continue;
        }

        let ParseState::Accumulating(pending) = &mut state else {
            warn!(line = line_no, field = %name, "field appears before any TITLE");
            continue;
        };

        match name.as_str() {
            "IDNUM" => pending.id = Some(value.to_string()),
            "CATEGORY" => pending.category = value.to_string(),
            "CREATED" => pending.created = Some(value.to_string()),
            "HIDDEN" => pending.hidden = Some(value.to_string()),
            other => debug!(line = line_no, field = other, "ignoring unknown task field"),
        }
    }

    parsed.flush(state, today);
    parsed
}

pub fn encode_tasks(store: &TaskStore) -> String {
    let mut out = String::new();
    for (_, task) in store.iter() {
        out.push('\n');
        push_field(&mut out, "TITLE", &task.title);
        push_field(&mut out, "IDNUM", &task.id.to_string());
        push_field(&mut out, "CATEGORY", &task.category);
        push_field(&mut out, "HIDDEN", if task.hidden { HIDDEN } else { NOT_HIDDEN });
        push_field(&mut out, "CREATED", &task.created.format(DATE_FORMAT).to_string());
    }
    out
}

fn push_field(out: &mut String, name: &str, value: &str) {
    out.push_str(name);
    out.push_str(FIELD_SEPARATOR);
    out.push_str(value);
    out.push('\n');
}

fn parse_hidden(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "hidden" | "true" | "yes" | "1" => Some(true),
        "nothidden" | "false" | "no" | "0" | "" => Some(false),
        _ => None,
    }
}

pub fn read_tasks(path: &Path, today: NaiveDate) -> Result<ParsedTasks, StorageError> {
    match fs::read_to_string(path) {
        Ok(raw) => Ok(parse_tasks(&raw, today)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(ParsedTasks::default()),
        Err(err) => Err(StorageError::io(path)(err)),
    }
}

pub fn write_tasks(path: &Path, store: &TaskStore) -> Result<(), StorageError> {
    write_atomic(path, encode_tasks(store).as_bytes())
}

// ---------------------------------------------------------------------------
// Daily ledger files

pub fn read_day_seconds(paths: &Paths, id: u64, day: NaiveDate) -> Result<Option<f64>, StorageError> {
    let path = paths.day_file(id, day);
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(StorageError::io(&path)(err)),
    };

    let value = raw.lines().next().unwrap_or_default().trim();
    match value.parse::<f64>() {
        Ok(seconds) if seconds.is_finite() && seconds >= 0.0 => Ok(Some(seconds)),
        _ => Err(StorageError::InvalidSeconds {
            path,
            value: value.to_string(),
        }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayWrite {
    Written,
    BelowThreshold,
    Removed,
}

/// Writes the seconds when they reach `threshold`. Below it nothing is
/// created. An existing file is only removed when `owned` is set, meaning this
/// session read or wrote it; a file that failed to parse is left untouched.
pub fn write_day_seconds(
    paths: &Paths,
    id: u64,
    day: NaiveDate,
    seconds: f64,
    threshold: f64,
    owned: bool,
) -> Result<DayWrite, StorageError> {
    let path = paths.day_file(id, day);
    if seconds < threshold {
        if !owned {
            return Ok(DayWrite::BelowThreshold);
        }
        return match fs::remove_file(&path) {
            Ok(()) => {
                debug!(id, "removed day file that fell below the save threshold");
                Ok(DayWrite::Removed)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(DayWrite::BelowThreshold),
            Err(err) => Err(StorageError::io(&path)(err)),
        };
    }

    write_atomic(&path, format!("{seconds:?}").as_bytes())?;
    Ok(DayWrite::Written)
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(StorageError::io(parent))?;
        }
    }

    let mut staging = path.as_os_str().to_owned();
    staging.push(".tmp");
    let staging = PathBuf::from(staging);

    let mut file = fs::File::create(&staging).map_err(StorageError::io(&staging))?;
    file.write_all(contents).map_err(StorageError::io(&staging))?;
    file.sync_all().map_err(StorageError::io(&staging))?;
    drop(file);
    fs::rename(&staging, path).map_err(StorageError::io(path))
}

// ---------------------------------------------------------------------------
// Whole-session load and save

#[derive(Debug, Default)]
pub struct Session {
    pub store: TaskStore,
    pub ledger: TimeLedger,
    // Ids whose day file for today was read or written by this session.
    pub day_files: HashSet<u64>,
}

pub fn load_session(paths: &Paths, today: NaiveDate) -> Session {
    let config = read_config(&paths.config_file()).unwrap_or_else(|err| {
        warn!(%err, "could not read config, starting ids from 0");
        Config::default()
    });

    let parsed = read_tasks(&paths.tasks_file(), today).unwrap_or_else(|err| {
        warn!(%err, "could not read task file, starting with no tasks");
        ParsedTasks::default()
    });

    let mut store = TaskStore::new(config);
    let mut ledger = TimeLedger::new();
    let mut day_files = HashSet::new();
    for record in parsed.records {
        let id = record.id;
        let handle = match store.load_task(record) {
            Ok(handle) => handle,
            Err(err) => {
                warn!(%err, "skipping task record");
                continue;
            }
        };

        ledger.reset(handle);
        match read_day_seconds(paths, id, today) {
            Ok(Some(seconds)) => {
                ledger.set(handle, seconds);
                day_files.insert(id);
            }
            Ok(None) => {}
            Err(err) => warn!(%err, id, "ignoring today's time for task, leaving its file alone"),
        }
    }

    info!(
        tasks = store.len(),
        rejected = parsed.rejected.len(),
        largest_id = store.config().largest_available_id,
        "loaded tasks"
    );
    Session {
        store,
        ledger,
        day_files,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveReport {
    pub config_saved: bool,
    pub tasks_saved: bool,
    pub day_files_written: usize,
    pub failures: usize,
}

pub fn save_session(
    paths: &Paths,
    store: &TaskStore,
    ledger: &TimeLedger,
    day: NaiveDate,
    threshold: f64,
    day_files: &mut HashSet<u64>,
) -> SaveReport {
    let mut report = SaveReport::default();

    match write_config(&paths.config_file(), &store.config()) {
        Ok(()) => report.config_saved = true,
        Err(err) => {
            warn!(%err, "config save skipped");
            report.failures += 1;
        }
    }

    match write_tasks(&paths.tasks_file(), store) {
        Ok(()) => report.tasks_saved = true,
        Err(err) => {
            warn!(%err, "task file save skipped");
            report.failures += 1;
        }
    }

    for (handle, task) in store.iter() {
        let seconds = ledger.seconds_of(handle);
        let owned = day_files.contains(&task.id);
        match write_day_seconds(paths, task.id, day, seconds, threshold, owned) {
            Ok(DayWrite::Written) => {
                day_files.insert(task.id);
                report.day_files_written += 1;
            }
            Ok(DayWrite::Removed) => {
                day_files.remove(&task.id);
            }
            Ok(DayWrite::BelowThreshold) => {}
            Err(err) => {
                warn!(%err, id = task.id, "day time save skipped");
                report.failures += 1;
            }
        }
    }

    debug!(?report, "saved session");
    report
}
