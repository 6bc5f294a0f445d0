use std::error::Error;
use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use taskwatch::ledger::format_hms;
use taskwatch::settings::{Paths, Settings, resolve_root};
use taskwatch::storage::{Session, load_session};
use taskwatch::tracker::Tracker;
use taskwatch::ui::run_dashboard;

const LOG_ENV: &str = "TASKWATCH_LOG";

#[derive(Debug, Parser)]
#[command(name = "taskwatch", about = "Keep track of how much time goes into each task per day")]
struct Cli {
	/// Directory holding the `user/` data folder (defaults to TASKWATCH_ROOT or the current directory)
	#[arg(long)]
	root: Option<PathBuf>,
	#[command(subcommand)]
	command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
	Dashboard,
	Add {
		#[arg(long)]
		title: String,
		#[arg(long)]
		category: Option<String>,
	},
	List,
	Report {
		#[arg(long)]
		day: Option<String>,
	},
}

#[derive(Debug, Serialize)]
struct DayReport {
	day: NaiveDate,
	total_seconds: f64,
	total: String,
	tasks: Vec<TaskReport>,
}

#[derive(Debug, Serialize)]
struct TaskReport {
	id: u64,
	title: String,
	category: String,
	seconds: f64,
	time: String,
}

fn main() {
	if let Err(err) = run() {
		eprintln!("error: {err}");
		std::process::exit(1);
	}
}

fn run() -> Result<(), Box<dyn Error>> {
	let cli = Cli::parse();
	let command = cli.command.unwrap_or(Command::Dashboard);

	let root = resolve_root(cli.root)?;
	let paths = Paths::new(root);
	let settings = Settings::load(paths.root());
	init_logging(
		&paths,
		settings.as_ref().ok().and_then(|settings| settings.log_filter.as_deref()),
		matches!(command, Command::Dashboard),
	);
	let settings = settings.unwrap_or_else(|err| {
		warn!(%err, "using default settings");
		Settings::default()
	});

	let today = Local::now().date_naive();
	match command {
		Command::Dashboard => {
			let tracker = Tracker::open(paths, settings, today);
			run_dashboard(tracker.into_shared())?;
		}
		Command::Add { title, category } => {
			let mut tracker = Tracker::open(paths, settings, today);
			let handle = tracker
				.create_task(&title, category.as_deref().unwrap_or_default())
				.ok_or("task title must not be blank")?;
			let report = tracker.save();
			if !report.tasks_saved || !report.config_saved {
				return Err("failed to save tasks, see the log for details".into());
			}
			if let Some(task) = tracker.task(handle) {
				println!("created task {}", task.id);
			}
		}
		Command::List => {
			print_tasks(&Tracker::open(paths, settings, today));
		}
		Command::Report { day } => {
			print_report(&paths, parse_day(day.as_deref(), today)?)?;
		}
	}

	Ok(())
}

fn init_logging(paths: &Paths, configured: Option<&str>, to_file: bool) {
	let default_filter = configured.unwrap_or(if to_file { "taskwatch=info" } else { "taskwatch=warn" });
	let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_filter));

	if to_file {
		// The dashboard owns the terminal, so logs go to a file instead.
		let file = fs::create_dir_all(paths.user_dir()).and_then(|()| {
			OpenOptions::new()
				.create(true)
				.append(true)
				.open(paths.log_file())
		});
		match file {
			Ok(file) => {
				let _ = tracing_subscriber::fmt()
					.with_env_filter(filter)
					.with_ansi(false)
					.with_writer(Mutex::new(file))
					.try_init();
			}
			Err(err) => eprintln!("warning: logging disabled, cannot open log file: {err}"),
		}
		return;
	}

	let _ = tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.try_init();
}

fn parse_day(input: Option<&str>, today: NaiveDate) -> Result<NaiveDate, Box<dyn Error>> {
	if let Some(raw) = input {
		Ok(NaiveDate::parse_from_str(raw, "%Y-%m-%d")?)
	} else {
		Ok(today)
	}
}

fn print_tasks(tracker: &Tracker) {
	if tracker.store().is_empty() {
		println!("no tasks yet");
		return;
	}

	for (handle, task) in tracker.store().iter() {
		let category = if task.category.is_empty() {
			"Uncategorized"
		} else {
			task.category.as_str()
		};
		println!(
			"{} | {} | {} | {} | {}",
			task.id,
			category,
			task.created.format("%Y-%m-%d"),
			tracker.display_of(handle),
			task.title
		);
	}
}

fn print_report(paths: &Paths, day: NaiveDate) -> Result<(), Box<dyn Error>> {
	let Session { store, ledger, .. } = load_session(paths, day);
	let tasks = store
		.iter()
		.map(|(handle, task)| {
			let seconds = ledger.seconds_of(handle);
			TaskReport {
				id: task.id,
				title: task.title.clone(),
				category: task.category.clone(),
				seconds,
				time: format_hms(seconds),
			}
		})
		.collect::<Vec<_>>();

	let report = DayReport {
		day,
		total_seconds: ledger.total(),
		total: format_hms(ledger.total()),
		tasks,
	};
	println!("{}", serde_json::to_string_pretty(&report)?);
	Ok(())
}
