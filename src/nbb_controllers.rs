// Session and refresh scheduling for the Next Bus Board.
//
// Two independent cadences per tracked stop: a network task re-fetches the
// snapshot on a long interval, a presentation task re-renders the aged
// snapshot on a short one. Switching stops tears both down and starts over.
use crate::nbb_models::{self, ApiClient, ArrivalsSnapshot, SnapshotStore, StopSummary};
use crate::nbb_views::NbbViews;
use anyhow::Context;
use log::{debug, info, warn};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

const MAX_SEARCH_RESULTS: usize = 6;

#[derive(Debug, Clone)]
pub struct BoardConfig {
    pub base_url: String,
    pub initial_stop: u32,
    pub api_refresh: Duration,
    pub ui_refresh: Duration,
    pub stops_limit: usize,
    pub show_direction: bool,
}

// ============================================================================
// Session
// ============================================================================

/// Owns the API client, the single-slot snapshot store and the two timer
/// tasks for the currently tracked stop. Created once at startup, torn down
/// on quit.
pub struct Session {
    client: Arc<ApiClient>,
    store: Arc<Mutex<SnapshotStore>>,
    api_refresh: Duration,
    ui_refresh: Duration,
    show_direction: bool,
    net_task: Option<JoinHandle<()>>,
    ui_task: Option<JoinHandle<()>>,
}

impl Session {
    pub fn new(client: Arc<ApiClient>, config: &BoardConfig) -> Self {
        Session {
            client,
            store: Arc::new(Mutex::new(SnapshotStore::new(config.initial_stop))),
            api_refresh: config.api_refresh,
            ui_refresh: config.ui_refresh,
            show_direction: config.show_direction,
            net_task: None,
            ui_task: None,
        }
    }

    pub fn active_stop(&self) -> u32 {
        self.store.lock().unwrap().active_stop()
    }

    /// Track a (possibly new) stop: cancel both pending cadences, drop the
    /// old stop's snapshot and re-arm. The fresh network task fetches
    /// immediately.
    pub fn select_stop(&mut self, stop_id: u32) {
        self.shutdown();
        self.store.lock().unwrap().switch_to(stop_id);
        info!("tracking stop {}", stop_id);
        self.arm(stop_id);
    }

    /// Re-run the fetch cycle for the tracked stop right away. The cached
    /// snapshot stays in place, so a failed fetch still leaves the board
    /// with data to age on the next presentation tick.
    pub fn force_refresh(&mut self) {
        let stop_id = self.active_stop();
        self.shutdown();
        self.arm(stop_id);
    }

    fn arm(&mut self, stop_id: u32) {
        let client = self.client.clone();
        let store = self.store.clone();
        let interval = self.api_refresh;
        let show_direction = self.show_direction;
        self.net_task = Some(tokio::spawn(async move {
            loop {
                refresh_once(&client, &store, stop_id, show_direction).await;
                // re-armed after every completion, success or failure, so
                // one bad fetch can never stall the board
                tokio::time::sleep(interval).await;
            }
        }));

        let store = self.store.clone();
        let interval = self.ui_refresh;
        let show_direction = self.show_direction;
        self.ui_task = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let store = store.lock().unwrap();
                if let Some(snapshot) = store.snapshot() {
                    let view = snapshot.aged(Instant::now());
                    NbbViews::render_board(
                        &snapshot.stop,
                        &view,
                        snapshot.fetched_at_local,
                        show_direction,
                    );
                }
            }
        }));
    }

    pub fn shutdown(&mut self) {
        if let Some(task) = self.net_task.take() {
            task.abort();
        }
        if let Some(task) = self.ui_task.take() {
            task.abort();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// One refresh cycle: stop detail and arrivals fetched concurrently and
/// joined. Either failing fails the cycle as a whole; the stored snapshot
/// is then left untouched and only the rendered board degrades.
async fn refresh_once(
    client: &ApiClient,
    store: &Mutex<SnapshotStore>,
    stop_id: u32,
    show_direction: bool,
) {
    match futures::try_join!(client.fetch_stop(stop_id), client.fetch_arrivals(stop_id)) {
        Ok((stop, arrivals)) => {
            let snapshot = ArrivalsSnapshot::new(stop, arrivals.lines);
            let mut store = store.lock().unwrap();
            if !store.replace(stop_id, snapshot) {
                debug!(
                    "dropping late arrivals for stop {} (now tracking {})",
                    stop_id,
                    store.active_stop()
                );
                return;
            }
            if let Some(snapshot) = store.snapshot() {
                let view = snapshot.aged(Instant::now());
                NbbViews::render_board(
                    &snapshot.stop,
                    &view,
                    snapshot.fetched_at_local,
                    show_direction,
                );
            }
        }
        Err(e) => {
            warn!("refresh failed for stop {}: {}", stop_id, e);
            let store = store.lock().unwrap();
            if store.active_stop() == stop_id {
                NbbViews::render_unavailable(stop_id);
            }
        }
    }
}

// ============================================================================
// Interactive loop
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Quit,
    Refresh,
    Pick(usize),
    Search(String),
    Noop,
}

pub fn parse_command(input: &str) -> Command {
    let input = input.trim();
    if input.is_empty() {
        return Command::Noop;
    }
    match input {
        "q" | "quit" | "exit" => Command::Quit,
        "r" | "refresh" => Command::Refresh,
        _ => {
            if input.chars().all(|c| c.is_ascii_digit()) {
                Command::Pick(input.parse().unwrap_or(0))
            } else {
                Command::Search(input.to_string())
            }
        }
    }
}

pub async fn run(config: BoardConfig) -> anyhow::Result<()> {
    let client = Arc::new(ApiClient::new(&config.base_url).context("invalid API base URL")?);
    NbbViews::show_welcome(config.initial_stop);

    // The full catalog backs the search box; fetched once, never refreshed.
    // Losing it is not fatal, the board still tracks the initial stop.
    let catalog = match client.fetch_stops(config.stops_limit).await {
        Ok(mut stops) => {
            stops.sort_by(|a, b| a.name.cmp(&b.name));
            info!("loaded {} stops", stops.len());
            stops
        }
        Err(e) => {
            warn!("could not load the stop catalog: {}", e);
            println!("Stop search unavailable (catalog failed to load).");
            Vec::new()
        }
    };

    let mut session = Session::new(client, &config);
    session.select_stop(config.initial_stop);

    let mut last_results: Vec<StopSummary> = Vec::new();
    loop {
        let Some(input) = read_stdin_line().await? else {
            break; // EOF
        };
        match parse_command(&input) {
            Command::Quit => break,
            Command::Refresh => session.force_refresh(),
            Command::Pick(n) if n >= 1 && n <= last_results.len() => {
                let stop = last_results[n - 1].clone();
                println!("Switching to {} (ID: {})", stop.name, stop.id);
                session.select_stop(stop.id);
            }
            // a number outside the last result list is treated as an
            // id search, the way the search box matches ids
            Command::Pick(_) | Command::Search(_) => {
                let query = input.trim();
                let matches = nbb_models::search_stops(&catalog, query, MAX_SEARCH_RESULTS);
                NbbViews::show_search_results(&matches);
                last_results = matches.into_iter().cloned().collect();
            }
            Command::Noop => {
                let store = session.store.lock().unwrap();
                if let Some(snapshot) = store.snapshot() {
                    let view = snapshot.aged(Instant::now());
                    NbbViews::render_board(
                        &snapshot.stop,
                        &view,
                        snapshot.fetched_at_local,
                        config.show_direction,
                    );
                }
            }
        }
    }

    session.shutdown();
    NbbViews::goodbye();
    Ok(())
}

/// Read one stdin line without blocking the runtime. `None` on EOF.
async fn read_stdin_line() -> anyhow::Result<Option<String>> {
    let line = tokio::task::spawn_blocking(|| {
        let mut input = String::new();
        match io::stdin().read_line(&mut input) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(input)),
            Err(e) => Err(e),
        }
    })
    .await
    .context("stdin reader task failed")??;
    Ok(line)
}

// ============================================================================
// Tests
// ============================================================================
