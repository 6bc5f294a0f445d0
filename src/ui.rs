use std::collections::HashMap;
use std::error::Error;
use std::io;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver};
use std::time::Duration as StdDuration;

use chrono::Local;
use crossterm::event::{self, Event as CEvent, KeyCode, KeyEventKind};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{execute, ExecutableCommand};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph};
use ratatui::{Frame, Terminal};
use tracing::debug;

use crate::scheduler::Scheduler;
use crate::store::TaskHandle;
use crate::tracker::{exit, SharedTracker, TickUpdate, Tracker};

const FOCUSED_PANEL_BORDER_COLOR: Color = Color::Yellow;
const HIGHLIGHT_BACKGROUND_COLOR: Color = Color::Rgb(42, 45, 52);
const ACTIVE_COLOR: Color = Color::Green;

type Backend = CrosstermBackend<io::Stdout>;

pub fn run_dashboard(tracker: SharedTracker) -> Result<(), Box<dyn Error>> {
	let (updates_tx, updates_rx) = mpsc::channel::<Vec<TickUpdate>>();
	let period = StdDuration::from_secs_f64(tracker.lock().settings().tick_seconds);
	let scheduler = Scheduler::start(period, {
		let tracker = Arc::clone(&tracker);
		move || {
			let today = Local::now().date_naive();
			let updates = tracker.lock().tick(today);
			// The dashboard may already be gone during shutdown.
			let _ = updates_tx.send(updates);
		}
	})?;

	let result = with_terminal(|terminal| run_event_loop(terminal, &tracker, &updates_rx));
	let report = exit(&tracker, scheduler);
	if report.failures > 0 {
		eprintln!(
			"warning: {} save step(s) failed, see {}",
			report.failures,
			tracker.lock().paths().log_file().display()
		);
	}

	result
}

fn with_terminal(
	body: impl FnOnce(&mut Terminal<Backend>) -> Result<(), Box<dyn Error>>,
) -> Result<(), Box<dyn Error>> {
	enable_raw_mode()?;
	let mut stdout = io::stdout();
	stdout.execute(EnterAlternateScreen)?;
	let backend = CrosstermBackend::new(stdout);
	let mut terminal = Terminal::new(backend)?;

	let result = body(&mut terminal);

	disable_raw_mode()?;
	execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
	terminal.show_cursor()?;

	result
}

fn run_event_loop(
	terminal: &mut Terminal<Backend>,
	tracker: &SharedTracker,
	updates: &Receiver<Vec<TickUpdate>>,
) -> Result<(), Box<dyn Error>> {
	let mut app = App::default();

	loop {
		for batch in updates.try_iter() {
			app.apply_updates(batch);
		}

		let view = build_view(&app, &tracker.lock());
		app.clamp_cursor(&view);
		if app.shown_day != view.today {
			// Cached cells belong to the previous day after a rollover.
			app.today_cells.clear();
			app.shown_day = view.today.clone();
		}
		terminal.draw(|frame| draw_dashboard(frame, &app, &view))?;

		if event::poll(StdDuration::from_millis(250))? {
			if let CEvent::Key(key) = event::read()? {
				if key.kind != KeyEventKind::Press {
					continue;
				}

				let mut tracker = tracker.lock();
				let should_quit = match &app.mode {
					InputMode::Prompt(_) => handle_prompt_key(&mut app, key.code, &mut tracker),
					InputMode::Normal => handle_normal_key(&mut app, key.code, &mut tracker, &view),
				};

				if should_quit {
					break;
				}
			}
		}
	}

	Ok(())
}

fn draw_dashboard(frame: &mut Frame, app: &App, view: &ViewModel) {
	let layout = Layout::default()
		.direction(Direction::Vertical)
		.constraints([Constraint::Min(6), Constraint::Length(3), Constraint::Length(4)])
		.split(frame.area());

	render_task_panel(frame, layout[0], app, view);
	render_total_panel(frame, layout[1], view);
	render_footer(frame, layout[2], app);
}

fn render_task_panel(frame: &mut Frame, area: Rect, app: &App, view: &ViewModel) {
	let items = if view.rows.is_empty() {
		vec![ListItem::new("No tasks yet, press n to create one")]
	} else {
		view.rows.iter().map(|row| ListItem::new(render_task_row(row))).collect()
	};

	let title = format!(
		"Tasks for {} | {:<4} {:<24} {:<12} {:<9} {:<9} {:<10} {}",
		view.today, "Id", "Task Name", "Category", "Active", "Hidden", "Created", "Today"
	);
	let list = List::new(items)
		.block(
			Block::default()
				.borders(Borders::ALL)
				.border_style(Style::default().fg(FOCUSED_PANEL_BORDER_COLOR))
				.title(title),
		)
		.highlight_style(Style::default().bg(HIGHLIGHT_BACKGROUND_COLOR).add_modifier(Modifier::BOLD))
		.highlight_symbol("> ");

	let mut state = ListState::default();
	if !view.rows.is_empty() {
		state.select(Some(app.cursor));
	}
	frame.render_stateful_widget(list, area, &mut state);
}

fn render_task_row(row: &TaskRow) -> Line<'static> {
	let marker = if row.selected { "[x]" } else { "[ ]" };
	let style = if row.active {
		Style::default().fg(ACTIVE_COLOR)
	} else {
		Style::default()
	};

	Line::from(vec![
		Span::raw(format!("{marker} ")),
		Span::styled(
			format!(
				"{:<4} {:<24} {:<12} {:<9} {:<9} {:<10} ",
				row.id,
				truncate(&row.title, 24),
				truncate(&row.category, 12),
				if row.active { "Active" } else { "NotActive" },
				if row.hidden { "Hidden" } else { "NotHidden" },
				row.created,
			),
			style,
		),
		Span::styled(row.today.clone(), style.add_modifier(Modifier::BOLD)),
	])
}

fn render_total_panel(frame: &mut Frame, area: Rect, view: &ViewModel) {
	let line = Line::from(vec![
		Span::raw("Total: "),
		Span::styled(view.total.clone(), Style::default().add_modifier(Modifier::BOLD)),
		Span::raw(format!("   active: {}", view.active_count)),
	]);
	let panel = Paragraph::new(line).block(Block::default().borders(Borders::ALL).title("Today"));
	frame.render_widget(panel, area);
}

fn render_footer(frame: &mut Frame, area: Rect, app: &App) {
	let footer_lines = match &app.mode {
		InputMode::Normal => vec![
			Line::from("arrows/jk move | space select/deselect | n new task | w save | q quit"),
			Line::from("s stop all | d delete selected | h hide selected | + add 1hr | - subtract 1hr"),
			Line::from(app.status.clone()),
		],
		InputMode::Prompt(prompt) => vec![
			Line::from(prompt.title.clone()),
			Line::from(format!("> {}", prompt.input)),
			Line::from("Enter submit | Esc cancel"),
		],
	};

	let footer = Paragraph::new(footer_lines).block(Block::default().borders(Borders::ALL).title("Shortcuts"));
	frame.render_widget(footer, area);
}

fn handle_normal_key(app: &mut App, code: KeyCode, tracker: &mut Tracker, view: &ViewModel) -> bool {
	let step = tracker.settings().adjust_step_seconds;
	match code {
		KeyCode::Char('q') | KeyCode::Esc => true,
		KeyCode::Up | KeyCode::Char('k') => {
			app.cursor = app.cursor.saturating_sub(1);
			false
		}
		KeyCode::Down | KeyCode::Char('j') => {
			if app.cursor + 1 < view.rows.len() {
				app.cursor += 1;
			}
			false
		}
		KeyCode::Char(' ') => {
			if let Some(row) = view.rows.get(app.cursor) {
				app.toggle_selection(row.handle);
				tracker.set_selection(&app.selection);
				app.status = format!("{} task(s) running", app.selection.len());
			}
			false
		}
		KeyCode::Char('n') => {
			app.mode = InputMode::Prompt(PromptState::new("New task title"));
			false
		}
		KeyCode::Char('s') => {
			app.selection.clear();
			tracker.stop_all();
			app.status = "Stopped all timers".to_string();
			false
		}
		KeyCode::Char('d') => {
			if app.require_selection() {
				tracker.delete_selected(&app.selection);
				for handle in &app.selection {
					app.today_cells.remove(handle);
				}
				app.status = format!("Deleted {} task(s)", app.selection.len());
				app.selection.clear();
			}
			false
		}
		KeyCode::Char('h') => {
			if app.require_selection() {
				tracker.hide_selected(&app.selection);
				app.status = "Hiding tasks is not available yet".to_string();
			}
			false
		}
		KeyCode::Char('+') => {
			adjust(app, tracker, step);
			false
		}
		KeyCode::Char('-') => {
			adjust(app, tracker, -step);
			false
		}
		KeyCode::Char('w') => {
			let report = tracker.save();
			app.status = if report.failures == 0 {
				format!("Saved {} task(s)", tracker.store().len())
			} else {
				format!("Save finished with {} failure(s), see the log", report.failures)
			};
			false
		}
		_ => false,
	}
}

fn adjust(app: &mut App, tracker: &mut Tracker, delta: f64) {
	if !app.require_selection() {
		return;
	}

	tracker.adjust_selected(&app.selection, delta);
	for handle in &app.selection {
		app.today_cells.insert(*handle, tracker.display_of(*handle));
	}
	app.status = format!("Adjusted {} task(s) by {}s", app.selection.len(), delta);
}

fn handle_prompt_key(app: &mut App, code: KeyCode, tracker: &mut Tracker) -> bool {
	let InputMode::Prompt(prompt) = &mut app.mode else {
		return false;
	};

	match code {
		KeyCode::Esc => {
			app.mode = InputMode::Normal;
			app.status = "Cancelled".to_string();
		}
		KeyCode::Backspace => {
			prompt.input.pop();
		}
		KeyCode::Char(c) => prompt.input.push(c),
		KeyCode::Enter => {
			let title = std::mem::take(&mut prompt.input);
			app.mode = InputMode::Normal;
			match tracker.create_task(&title, "") {
				Some(handle) => {
					// A new task becomes the only running one.
					app.selection = vec![handle];
					tracker.set_selection(&app.selection);
					app.cursor = tracker.store().len().saturating_sub(1);
					app.status = "Task created".to_string();
				}
				None => app.status = "Task title must not be blank".to_string(),
			}
		}
		_ => {}
	}

	false
}

fn build_view(app: &App, tracker: &Tracker) -> ViewModel {
	let rows = tracker
		.store()
		.iter()
		.map(|(handle, task)| TaskRow {
			handle,
			id: task.id,
			title: task.title.clone(),
			category: task.category.clone(),
			created: task.created.format("%Y-%m-%d").to_string(),
			active: task.active,
			hidden: task.hidden,
			selected: app.selection.contains(&handle),
			today: app
				.today_cells
				.get(&handle)
				.cloned()
				.unwrap_or_else(|| tracker.display_of(handle)),
		})
		.collect::<Vec<_>>();

	ViewModel {
		today: tracker.today().format("%Y-%m-%d").to_string(),
		total: tracker.total_display(),
		active_count: rows.iter().filter(|row| row.active).count(),
		rows,
	}
}

fn truncate(text: &str, width: usize) -> String {
	if text.chars().count() <= width {
		return text.to_string();
	}
	let mut out = text.chars().take(width.saturating_sub(1)).collect::<String>();
	out.push('~');
	out
}

#[derive(Debug, Clone)]
struct PromptState {
	title: String,
	input: String,
}

impl PromptState {
	fn new(title: impl Into<String>) -> Self {
		Self {
			title: title.into(),
			input: String::new(),
		}
	}
}

#[derive(Debug, Clone)]
enum InputMode {
	Normal,
	Prompt(PromptState),
}

#[derive(Debug, Clone)]
struct App {
	cursor: usize,
	selection: Vec<TaskHandle>,
	today_cells: HashMap<TaskHandle, String>,
	shown_day: String,
	mode: InputMode,
	status: String,
}

impl Default for App {
	fn default() -> Self {
		Self {
			cursor: 0,
			selection: Vec::new(),
			today_cells: HashMap::new(),
			shown_day: String::new(),
			mode: InputMode::Normal,
			status: "Ready".to_string(),
		}
	}
}

impl App {
	fn clamp_cursor(&mut self, view: &ViewModel) {
		self.cursor = self.cursor.min(view.rows.len().saturating_sub(1));
		self.selection
			.retain(|handle| view.rows.iter().any(|row| row.handle == *handle));
	}

	fn apply_updates(&mut self, batch: Vec<TickUpdate>) {
		for update in batch {
			self.today_cells.insert(update.handle, update.display);
		}
	}

	fn toggle_selection(&mut self, handle: TaskHandle) {
		if let Some(index) = self.selection.iter().position(|selected| *selected == handle) {
			self.selection.remove(index);
		} else {
			self.selection.push(handle);
		}
	}

	fn require_selection(&mut self) -> bool {
		if self.selection.is_empty() {
			debug!("command needs a selection");
			self.status = "Select one or more tasks first".to_string();
			false
		} else {
			true
		}
	}
}

#[derive(Debug, Clone)]
struct ViewModel {
	today: String,
	total: String,
	active_count: usize,
	rows: Vec<TaskRow>,
}

#[derive(Debug, Clone)]
struct TaskRow {
	handle: TaskHandle,
	id: u64,
	title: String,
	category: String,
	created: String,
	active: bool,
	hidden: bool,
	selected: bool,
	today: String,
}
