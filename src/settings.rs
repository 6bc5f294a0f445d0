use std::env;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::Deserialize;
use thiserror::Error;

const ROOT_ENV: &str = "TASKWATCH_ROOT";
const SETTINGS_FILE: &str = "taskwatch.toml";
const USER_DIR: &str = "user";
const CONFIG_FILE: &str = "myconfig.txt";
const TASKS_FILE: &str = "filename.txt";
const LOG_FILE: &str = "taskwatch.log";

#[derive(Debug, Error)]
pub enum SettingsError {
	#[error("failed to read {path}: {source}")]
	Io {
		path: PathBuf,
		source: std::io::Error,
	},
	#[error("failed to parse {path}: {source}")]
	Toml {
		path: PathBuf,
		source: toml::de::Error,
	},
	#[error("{key} must be a positive number of seconds, got {value}")]
	NotPositive { key: &'static str, value: f64 },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
	pub tick_seconds: f64,
	pub save_threshold_seconds: f64,
	pub adjust_step_seconds: f64,
	pub log_filter: Option<String>,
}

impl Default for Settings {
	fn default() -> Self {
		Self {
			tick_seconds: 1.0,
			save_threshold_seconds: 0.9,
			adjust_step_seconds: 3600.0,
			log_filter: None,
		}
	}
}

impl Settings {
	pub fn load(root: &Path) -> Result<Self, SettingsError> {
		let path = root.join(SETTINGS_FILE);
		let raw = match fs::read_to_string(&path) {
			Ok(raw) => raw,
			Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Self::default()),
			Err(source) => return Err(SettingsError::Io { path, source }),
		};

		let settings: Self = toml::from_str(&raw).map_err(|source| SettingsError::Toml { path, source })?;
		settings.validate()?;
		Ok(settings)
	}

	fn validate(&self) -> Result<(), SettingsError> {
		for (key, value) in [
			("tick_seconds", self.tick_seconds),
			("adjust_step_seconds", self.adjust_step_seconds),
		] {
			if !(value.is_finite() && value > 0.0) {
				return Err(SettingsError::NotPositive { key, value });
			}
		}
		Ok(())
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
	root: PathBuf,
}

impl Paths {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self { root: root.into() }
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	pub fn user_dir(&self) -> PathBuf {
		self.root.join(USER_DIR)
	}

	pub fn config_file(&self) -> PathBuf {
		self.user_dir().join(CONFIG_FILE)
	}

	pub fn tasks_file(&self) -> PathBuf {
		self.user_dir().join(TASKS_FILE)
	}

	pub fn log_file(&self) -> PathBuf {
		self.user_dir().join(LOG_FILE)
	}

	pub fn task_dir(&self, id: u64) -> PathBuf {
		self.user_dir().join(id.to_string())
	}

	pub fn day_file(&self, id: u64, day: NaiveDate) -> PathBuf {
		self.task_dir(id).join(format!("{}_sec.txt", day.format("%Y-%m-%d")))
	}
}

pub fn resolve_root(cli_root: Option<PathBuf>) -> Result<PathBuf, std::io::Error> {
	if let Some(path) = cli_root {
		return absolutize(path);
	}

	if let Some(path) = env::var_os(ROOT_ENV) {
		let path = PathBuf::from(path);
		if !path.as_os_str().is_empty() {
			return absolutize(path);
		}
	}

	env::current_dir()
}

fn absolutize(path: PathBuf) -> Result<PathBuf, std::io::Error> {
	if path.is_absolute() {
		Ok(path)
	} else {
		Ok(env::current_dir()?.join(path))
	}
}
