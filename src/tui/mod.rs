mod ui;

use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::debug;

use petri_viewer::config::Config;
use petri_viewer::error::StoreError;
use petri_viewer::gateway::{RunDetails, RunSummary, TestResult, TestStatus};
use petri_viewer::logging;
use petri_viewer::logs::LogEntry;
use petri_viewer::notify::ListenerId;
use petri_viewer::store::{DataStore, Progress, ProgressFn, TestStats};

const MAX_LOG_LINES: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Panel {
    Runs,
    Tests,
    Stats,
}

/// Results of background work, delivered back to the UI loop
enum UiEvent {
    Runs(Result<Arc<Vec<RunSummary>>, StoreError>),
    Details {
        run_id: String,
        result: Result<Arc<RunDetails>, StoreError>,
    },
    Log {
        run_id: String,
        test: String,
        result: Result<Vec<LogEntry>, StoreError>,
    },
    Progress(Progress),
    LoadAllDone(Result<usize, StoreError>),
}

/// A test log opened from the Tests panel
pub struct LogView {
    pub run_id: String,
    pub test: String,
    pub entries: Vec<LogEntry>,
    pub scroll: usize,
}

pub struct App {
    pub config: Config,
    pub store: DataStore,
    pub runs: Arc<Vec<RunSummary>>,
    /// Tests of the run shown in the Tests panel, failures first
    pub tests: Vec<TestResult>,
    pub shown_run: Option<String>,
    pub stats: Vec<(String, TestStats)>,
    pub selected_run: usize,
    pub selected_test: usize,
    pub selected_stat: usize,
    pub active_panel: Panel,
    pub log_view: Option<LogView>,
    pub progress: Option<Progress>,
    pub last_refresh: Instant,
    pub status_message: Option<(String, Instant)>,
    /// Spawned requests whose result has not come back yet, stale or not
    pending_requests: usize,
    pub should_quit: bool,
    pub show_logs: bool,
    pub log_messages: VecDeque<String>,
    pub log_receiver: Option<Receiver<String>>,
    pub log_scroll: usize,
    /// Latest run requested for the Tests panel; older answers are dropped
    requested_run: Option<String>,
    requested_log: Option<(String, String)>,
    dirty: Arc<AtomicBool>,
    listener: ListenerId,
    events_tx: UnboundedSender<UiEvent>,
    events_rx: UnboundedReceiver<UiEvent>,
}

impl App {
    pub fn new(config: Config, store: DataStore) -> Self {
        let dirty = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&dirty);
        let listener = store.add_listener(move || flag.store(true, Ordering::Release));
        let (events_tx, events_rx) = unbounded_channel();

        Self {
            config,
            store,
            runs: Arc::new(Vec::new()),
            tests: Vec::new(),
            shown_run: None,
            stats: Vec::new(),
            selected_run: 0,
            selected_test: 0,
            selected_stat: 0,
            active_panel: Panel::Runs,
            log_view: None,
            progress: None,
            last_refresh: Instant::now(),
            status_message: None,
            pending_requests: 0,
            should_quit: false,
            show_logs: false,
            log_messages: VecDeque::new(),
            log_receiver: None,
            log_scroll: 0,
            requested_run: None,
            requested_log: None,
            dirty,
            listener,
            events_tx,
            events_rx,
        }
    }

    /// Drain any pending log messages from the receiver
    fn drain_logs(&mut self) {
        if let Some(ref receiver) = self.log_receiver {
            while let Ok(msg) = receiver.try_recv() {
                self.log_messages.push_back(msg);
                // Keep only the last MAX_LOG_LINES (O(1) with VecDeque)
                if self.log_messages.len() > MAX_LOG_LINES {
                    self.log_messages.pop_front();
                }
            }
        }
    }

    pub fn is_loading(&self) -> bool {
        self.pending_requests > 0
    }

    fn set_status(&mut self, msg: String) {
        self.status_message = Some((msg, Instant::now()));
    }

    fn selected_run_id(&self) -> Option<String> {
        self.runs.get(self.selected_run).map(|r| r.id.clone())
    }

    /// Load the run list; `refresh` replaces an already loaded one.
    fn load_runs(&mut self, refresh: bool) {
        self.pending_requests += 1;
        self.last_refresh = Instant::now();
        let store = self.store.clone();
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = if refresh {
                store.refresh_runs().await
            } else {
                store.get_all_runs().await
            };
            let _ = tx.send(UiEvent::Runs(result));
        });
    }

    /// Show the selected run's tests, fetching them with high priority if
    /// they are not cached yet.
    fn open_selected_run(&mut self) {
        let Some(run_id) = self.selected_run_id() else {
            return;
        };
        self.requested_run = Some(run_id.clone());
        self.active_panel = Panel::Tests;

        if let Some(details) = self.store.get_cached_run_details(&run_id) {
            self.show_details(&details);
            return;
        }

        self.pending_requests += 1;
        self.set_status(format!("Loading run {run_id}..."));
        let store = self.store.clone();
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = store.get_run_details(&run_id).await;
            let _ = tx.send(UiEvent::Details { run_id, result });
        });
    }

    fn settle_request(&mut self) {
        self.pending_requests = self.pending_requests.saturating_sub(1);
    }

    fn show_details(&mut self, details: &RunDetails) {
        let mut tests = details.tests.clone();
        tests.sort_by(|a, b| {
            (a.status != TestStatus::Failed, &a.name).cmp(&(b.status != TestStatus::Failed, &b.name))
        });
        if self.shown_run.as_deref() != Some(details.id.as_str()) {
            self.selected_test = 0;
        }
        self.tests = tests;
        self.shown_run = Some(details.id.clone());
    }

    fn open_selected_log(&mut self) {
        let (Some(run_id), Some(test)) = (
            self.shown_run.clone(),
            self.tests.get(self.selected_test).map(|t| t.name.clone()),
        ) else {
            return;
        };
        self.requested_log = Some((run_id.clone(), test.clone()));
        self.pending_requests += 1;
        self.set_status(format!("Loading log for {test}..."));

        let store = self.store.clone();
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = store.fetch_test_log(&run_id, &test).await;
            let _ = tx.send(UiEvent::Log {
                run_id,
                test,
                result,
            });
        });
    }

    /// Fetch every run in the background so the Stats panel covers them all.
    fn load_all(&mut self) {
        if self.progress.is_some() {
            self.set_status("Already loading all runs".to_string());
            return;
        }
        self.progress = Some(Progress {
            completed: 0,
            total: 0,
        });
        let store = self.store.clone();
        let tx = self.events_tx.clone();
        let progress_tx = self.events_tx.clone();
        let on_progress: ProgressFn = Arc::new(move |p| {
            let _ = progress_tx.send(UiEvent::Progress(p));
        });
        tokio::spawn(async move {
            let result = store
                .fetch_and_cache_run_details(&[], Some(on_progress), true)
                .await
                .map(|fetched| fetched.len());
            let _ = tx.send(UiEvent::LoadAllDone(result));
        });
    }

    fn handle_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            match event {
                UiEvent::Runs(result) => {
                    self.settle_request();
                    match result {
                        Ok(runs) => self.set_runs(runs),
                        Err(e) => self.set_status(format!("Error loading runs: {e}")),
                    }
                }
                UiEvent::Details { run_id, result } => {
                    self.settle_request();
                    if self.requested_run.as_deref() != Some(run_id.as_str()) {
                        debug!(%run_id, "Ignoring result for a run that is no longer selected");
                        continue;
                    }
                    match result {
                        Ok(details) => {
                            self.show_details(&details);
                            self.status_message = None;
                        }
                        Err(e) => self.set_status(format!("Error loading run {run_id}: {e}")),
                    }
                }
                UiEvent::Log {
                    run_id,
                    test,
                    result,
                } => {
                    self.settle_request();
                    if self.requested_log.as_ref() != Some(&(run_id.clone(), test.clone())) {
                        continue;
                    }
                    self.requested_log = None;
                    match result {
                        Ok(entries) => {
                            self.status_message = None;
                            self.log_view = Some(LogView {
                                run_id,
                                test,
                                entries,
                                scroll: 0,
                            });
                        }
                        Err(e) => self.set_status(format!("Error loading log: {e}")),
                    }
                }
                UiEvent::Progress(p) => self.progress = Some(p),
                UiEvent::LoadAllDone(result) => {
                    self.progress = None;
                    match result {
                        Ok(count) => self.set_status(format!("Loaded {count} runs")),
                        Err(e) => self.set_status(format!("Load all failed: {e}")),
                    }
                }
            }
        }
    }

    fn set_runs(&mut self, runs: Arc<Vec<RunSummary>>) {
        // Keep the cursor on the same run across refreshes
        let selected = self.selected_run_id();
        self.runs = runs;
        self.selected_run = selected
            .and_then(|id| self.runs.iter().position(|r| r.id == id))
            .unwrap_or(0);
    }

    /// Re-read everything derived from the cache after a change notification.
    fn sync_from_store(&mut self) {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(runs) = self.store.cached_runs() {
            if !Arc::ptr_eq(&runs, &self.runs) {
                self.set_runs(runs);
            }
        }

        let mut stats: Vec<(String, TestStats)> =
            self.store.get_test_stats_from_cache().into_iter().collect();
        stats.sort_by(|a, b| b.1.failed.cmp(&a.1.failed));
        self.stats = stats;
        self.selected_stat = self.selected_stat.min(self.stats.len().saturating_sub(1));

        // A cleared cache empties the Tests panel
        if let Some(run_id) = self.shown_run.clone() {
            match self.store.get_cached_run_details(&run_id) {
                Some(details) => self.show_details(&details),
                None => {
                    self.tests.clear();
                    self.shown_run = None;
                }
            }
        }
    }

    fn move_selection(&mut self, down: bool) {
        if let Some(view) = &mut self.log_view {
            view.scroll = if down {
                (view.scroll + 1).min(view.entries.len().saturating_sub(1))
            } else {
                view.scroll.saturating_sub(1)
            };
            return;
        }
        let (selected, len) = match self.active_panel {
            Panel::Runs => (&mut self.selected_run, self.runs.len()),
            Panel::Tests => (&mut self.selected_test, self.tests.len()),
            Panel::Stats => (&mut self.selected_stat, self.stats.len()),
        };
        if down {
            if *selected + 1 < len {
                *selected += 1;
            }
        } else if *selected > 0 {
            *selected -= 1;
        }
    }

    fn handle_key(&mut self, code: KeyCode, modifiers: KeyModifiers) {
        // Clear expired status messages
        if let Some((_, time)) = &self.status_message {
            if time.elapsed() > Duration::from_secs(5) {
                self.status_message = None;
            }
        }

        match code {
            KeyCode::Esc if self.log_view.is_some() => self.log_view = None,
            KeyCode::Char('q') | KeyCode::Esc => self.should_quit = true,
            KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => {
                self.should_quit = true;
            }
            KeyCode::Tab => {
                self.log_view = None;
                self.active_panel = match self.active_panel {
                    Panel::Runs => Panel::Tests,
                    Panel::Tests => Panel::Stats,
                    Panel::Stats => Panel::Runs,
                };
            }
            KeyCode::Up | KeyCode::Char('k') => self.move_selection(false),
            KeyCode::Down | KeyCode::Char('j') => self.move_selection(true),
            KeyCode::Enter => match self.active_panel {
                Panel::Runs => self.open_selected_run(),
                Panel::Tests if self.log_view.is_none() => self.open_selected_log(),
                _ => {}
            },
            KeyCode::Char('r') => {
                self.load_runs(true);
                self.set_status("Refreshing...".to_string());
            }
            KeyCode::Char('a') => self.load_all(),
            KeyCode::Char('C') => {
                self.store.clear_cache();
                self.set_status("Cache cleared".to_string());
            }
            KeyCode::Char('X') => {
                let dropped = self.store.reset();
                self.progress = None;
                self.set_status(format!("Cancelled {dropped} queued tasks"));
            }
            KeyCode::Char('v') => {
                // Toggle verbose log panel
                self.show_logs = !self.show_logs;
                if self.show_logs {
                    self.set_status("Logs panel shown".to_string());
                } else {
                    self.set_status("Logs panel hidden".to_string());
                }
            }
            KeyCode::Char('c') => {
                // Clear logs
                if self.show_logs {
                    self.log_messages.clear();
                    self.log_scroll = 0;
                    self.set_status("Logs cleared".to_string());
                }
            }
            KeyCode::PageUp => {
                if let Some(view) = &mut self.log_view {
                    view.scroll = view.scroll.saturating_sub(10);
                } else if self.show_logs && self.log_scroll > 0 {
                    self.log_scroll = self.log_scroll.saturating_sub(5);
                }
            }
            KeyCode::PageDown => {
                if let Some(view) = &mut self.log_view {
                    view.scroll = (view.scroll + 10).min(view.entries.len().saturating_sub(1));
                } else if self.show_logs {
                    let max_scroll = self.log_messages.len().saturating_sub(1);
                    self.log_scroll = (self.log_scroll + 5).min(max_scroll);
                }
            }
            _ => {}
        }
    }
}

impl Drop for App {
    fn drop(&mut self) {
        self.store.remove_listener(self.listener);
    }
}

pub async fn run_dashboard(config: Config, store: DataStore, verbose: bool) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(config, store);

    // Log lines go to the panel while the alternate screen is up (bounded to prevent memory leaks)
    let (sender, receiver) = mpsc::sync_channel(MAX_LOG_LINES);
    logging::set_log_sender(Some(sender));
    app.log_receiver = Some(receiver);
    app.show_logs = verbose;

    app.load_runs(false);
    let result = run_app(&mut terminal, &mut app).await;

    logging::set_log_sender(None);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
) -> Result<()> {
    loop {
        // Periodic replacement of the run list
        if !app.is_loading() && app.last_refresh.elapsed() >= app.config.refresh_interval() {
            app.load_runs(true);
        }

        app.handle_events();
        app.sync_from_store();
        app.drain_logs();

        terminal.draw(|f| ui::draw(f, app))?;

        // Poll for events with a short timeout so background results show up
        if event::poll(Duration::from_millis(250))? {
            if let Event::Key(key) = event::read()? {
                app.handle_key(key.code, key.modifiers);
            }
        }

        if app.should_quit {
            return Ok(());
        }
        tokio::task::yield_now().await;
    }
}
