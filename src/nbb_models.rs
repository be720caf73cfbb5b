// API models, HTTP client and snapshot handling for the Next Bus Board.
//
// Upstream API (JSON, read-only):
// - GET {base}/api/stops?limit=N            -> stop catalog
// - GET {base}/api/stops/{id}               -> stop detail
// - GET {base}/api/stops/{id}/arrivals      -> per-line arrivals with ETAs

use chrono::{DateTime, Local};
use log::debug;
use serde::Deserialize;
use std::time::{Duration, Instant};

// ============================================================================
// Data Structures
// ============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StopSummary {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
    #[serde(default)]
    pub lines: Vec<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StopSearchResponse {
    pub total: usize,
    pub stops: Vec<StopSummary>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ArrivalBus {
    pub bus_id: u32,
    /// Minutes until arrival as reported at fetch time. `None` means the
    /// upstream has no estimate; rendered as "no data", never as zero.
    pub eta_minutes: Option<i64>,
    pub distance_meters: Option<i64>,
    // carried from the upstream payload but not shown on the board yet
    #[allow(dead_code)]
    pub status: Option<i32>,
    #[allow(dead_code)]
    pub last_stop_id: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LineArrivals {
    pub line_id: u32,
    pub line_name: Option<String>,
    pub color_hex: Option<String>,
    /// Direction flag: true when the stop serves the outbound run. Uniform
    /// across all lines of one snapshot.
    #[serde(default)]
    pub is_ida: bool,
    pub buses: Vec<ArrivalBus>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArrivalsResponse {
    pub stop_id: u32,
    pub lines: Vec<LineArrivals>,
}

/// The most recent successful arrivals fetch for the tracked stop.
/// Single slot, replaced wholesale on every refresh, never merged.
#[derive(Debug, Clone)]
pub struct ArrivalsSnapshot {
    pub stop: StopSummary,
    pub lines: Vec<LineArrivals>,
    /// Monotonic fetch instant; elapsed time can never go negative.
    pub fetched_at: Instant,
    /// Wall-clock fetch time, for the status line only.
    pub fetched_at_local: DateTime<Local>,
}

/// Time-adjusted view of a snapshot. Derived on demand from
/// `(snapshot, now)` and never written back, so repeated aging passes
/// cannot compound rounding error.
#[derive(Debug, Clone, PartialEq)]
pub struct AgedView {
    pub lines: Vec<LineArrivals>,
}

impl ArrivalsSnapshot {
    pub fn new(stop: StopSummary, lines: Vec<LineArrivals>) -> Self {
        ArrivalsSnapshot {
            stop,
            lines,
            fetched_at: Instant::now(),
            fetched_at_local: Local::now(),
        }
    }

    /// Age the snapshot to `now`: every known ETA drops by the number of
    /// whole minutes elapsed since the fetch, floored at zero. Unknown ETAs
    /// and all other fields pass through unchanged. Pure; safe to call any
    /// number of times against the same snapshot.
    pub fn aged(&self, now: Instant) -> AgedView {
        let elapsed_minutes =
            (now.saturating_duration_since(self.fetched_at).as_secs() / 60) as i64;
        let lines = self
            .lines
            .iter()
            .map(|line| LineArrivals {
                buses: line
                    .buses
                    .iter()
                    .map(|bus| ArrivalBus {
                        eta_minutes: bus.eta_minutes.map(|eta| (eta - elapsed_minutes).max(0)),
                        ..bus.clone()
                    })
                    .collect(),
                ..line.clone()
            })
            .collect();
        AgedView { lines }
    }
}

// ============================================================================
// Snapshot Store
// ============================================================================

/// Single-slot store keyed by the currently tracked stop. Responses carry
/// the stop id that was active when the request went out; a late response
/// for a stop the user has already left is discarded instead of
/// overwriting the new stop's data.
#[derive(Debug)]
pub struct SnapshotStore {
    active_stop: u32,
    snapshot: Option<ArrivalsSnapshot>,
}

impl SnapshotStore {
    pub fn new(stop_id: u32) -> Self {
        SnapshotStore {
            active_stop: stop_id,
            snapshot: None,
        }
    }

    pub fn active_stop(&self) -> u32 {
        self.active_stop
    }

    pub fn snapshot(&self) -> Option<&ArrivalsSnapshot> {
        self.snapshot.as_ref()
    }

    /// Change the tracked stop and drop any snapshot belonging to the
    /// previous one.
    pub fn switch_to(&mut self, stop_id: u32) {
        self.active_stop = stop_id;
        self.snapshot = None;
    }

    /// Install a freshly fetched snapshot. Returns false (and discards the
    /// snapshot) when `stop_id` no longer matches the tracked stop.
    pub fn replace(&mut self, stop_id: u32, snapshot: ArrivalsSnapshot) -> bool {
        if stop_id != self.active_stop {
            return false;
        }
        self.snapshot = Some(snapshot);
        true
    }
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug)]
pub enum NbbError {
    /// Request could not be sent or completed.
    Network(String),
    /// Non-2xx response. The status is carried for logging but never
    /// branched on.
    Http(u16),
    /// Response body was not valid JSON of the expected shape.
    Decode(String),
}

impl std::fmt::Display for NbbError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NbbError::Network(e) => write!(f, "Network error: {}", e),
            NbbError::Http(status) => write!(f, "API returned HTTP {}", status),
            NbbError::Decode(e) => write!(f, "Decode error: {}", e),
        }
    }
}

impl std::error::Error for NbbError {}

pub type Result<T> = std::result::Result<T, NbbError>;

// ============================================================================
// API Client
// ============================================================================

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    const REQUEST_TIMEOUT_SECS: u64 = 15;

    pub fn new(base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(Self::REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| NbbError::Network(format!("Failed to create HTTP client: {}", e)))?;
        Ok(ApiClient {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| NbbError::Network(format!("GET {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(NbbError::Http(response.status().as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| NbbError::Network(format!("Failed to read response body: {}", e)))?;

        serde_json::from_str(&body)
            .map_err(|e| NbbError::Decode(format!("Invalid JSON from {}: {}", url, e)))
    }

    /// Fetch the stop catalog, done once at startup.
    pub async fn fetch_stops(&self, limit: usize) -> Result<Vec<StopSummary>> {
        let response: StopSearchResponse =
            self.get_json(&format!("/api/stops?limit={}", limit)).await?;
        debug!(
            "catalog reports {} stops, {} fetched",
            response.total,
            response.stops.len()
        );
        Ok(response.stops)
    }

    pub async fn fetch_stop(&self, stop_id: u32) -> Result<StopSummary> {
        self.get_json(&format!("/api/stops/{}", stop_id)).await
    }

    pub async fn fetch_arrivals(&self, stop_id: u32) -> Result<ArrivalsResponse> {
        self.get_json(&format!("/api/stops/{}/arrivals", stop_id))
            .await
    }
}

// ============================================================================
// Stop Search
// ============================================================================

/// Lowercase a stop name and strip the Spanish diacritics the catalog uses,
/// so "Juan Flórez" matches "florez".
pub fn normalize_name(text: &str) -> String {
    text.chars()
        .flat_map(|c| c.to_lowercase())
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'ó' | 'ò' | 'ô' | 'ö' => 'o',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'ñ' => 'n',
            'ç' => 'c',
            other => other,
        })
        .collect()
}

/// Filter the catalog by a free-text query: case/diacritic-insensitive
/// substring on the name, or a digit substring of the stop id. An empty
/// query returns the head of the catalog.
pub fn search_stops<'a>(
    stops: &'a [StopSummary],
    query: &str,
    max_results: usize,
) -> Vec<&'a StopSummary> {
    let query = query.trim();
    if query.is_empty() {
        return stops.iter().take(max_results).collect();
    }
    let normalized = normalize_name(query);
    stops
        .iter()
        .filter(|stop| {
            normalize_name(&stop.name).contains(&normalized)
                || stop.id.to_string().contains(query)
        })
        .take(max_results)
        .collect()
}

pub fn parse_hex_color(hex_color: &str) -> (u8, u8, u8) {
    let hex = hex_color.trim_start_matches('#');
    // length is in bytes, so non-hex input must be rejected before slicing
    if hex.len() != 6 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return (128, 128, 128);
    }
    let r = u8::from_str_radix(&hex[0..2], 16).unwrap_or(128);
    let g = u8::from_str_radix(&hex[2..4], 16).unwrap_or(128);
    let b = u8::from_str_radix(&hex[4..6], 16).unwrap_or(128);
    (r, g, b)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn bus(bus_id: u32, eta: Option<i64>) -> ArrivalBus {
        ArrivalBus {
            bus_id,
            eta_minutes: eta,
            distance_meters: None,
            status: None,
            last_stop_id: None,
        }
    }

    fn line(line_id: u32, is_ida: bool, buses: Vec<ArrivalBus>) -> LineArrivals {
        LineArrivals {
            line_id,
            line_name: Some(format!("Line {}", line_id)),
            color_hex: None,
            is_ida,
            buses,
        }
    }

    fn stop(id: u32, name: &str) -> StopSummary {
        StopSummary {
            id,
            name: name.to_string(),
            latitude: 0.0,
            longitude: 0.0,
            lines: Vec::new(),
        }
    }

    fn snapshot(lines: Vec<LineArrivals>) -> ArrivalsSnapshot {
        ArrivalsSnapshot::new(stop(42, "Plaza de Pontevedra"), lines)
    }

    #[test]
    fn aging_subtracts_whole_elapsed_minutes() {
        let snap = snapshot(vec![line(1, false, vec![bus(7, Some(10))])]);
        // 65s elapsed -> 1 whole minute; 130s -> 2 whole minutes.
        let at_65 = snap.aged(snap.fetched_at + Duration::from_secs(65));
        assert_eq!(at_65.lines[0].buses[0].eta_minutes, Some(9));
        let at_130 = snap.aged(snap.fetched_at + Duration::from_secs(130));
        assert_eq!(at_130.lines[0].buses[0].eta_minutes, Some(8));
    }

    #[test]
    fn aging_floors_at_zero() {
        let snap = snapshot(vec![line(1, false, vec![bus(7, Some(2))])]);
        let view = snap.aged(snap.fetched_at + Duration::from_secs(600));
        assert_eq!(view.lines[0].buses[0].eta_minutes, Some(0));
    }

    #[test]
    fn aging_under_a_minute_changes_nothing() {
        let snap = snapshot(vec![line(1, false, vec![bus(7, Some(10))])]);
        let view = snap.aged(snap.fetched_at + Duration::from_secs(59));
        assert_eq!(view.lines[0].buses[0].eta_minutes, Some(10));
    }

    #[test]
    fn aging_passes_unknown_etas_through() {
        let snap = snapshot(vec![line(1, true, vec![bus(7, None), bus(8, Some(5))])]);
        let view = snap.aged(snap.fetched_at + Duration::from_secs(180));
        assert_eq!(view.lines[0].buses[0].eta_minutes, None);
        assert_eq!(view.lines[0].buses[1].eta_minutes, Some(2));
    }

    #[test]
    fn aging_preserves_line_and_bus_fields() {
        let mut b = bus(7, Some(4));
        b.distance_meters = Some(850);
        b.status = Some(1);
        b.last_stop_id = Some(519);
        let mut l = line(11, true, vec![b]);
        l.color_hex = Some("#f54029".to_string());
        let snap = snapshot(vec![l.clone()]);

        let view = snap.aged(snap.fetched_at + Duration::from_secs(61));
        let aged_line = &view.lines[0];
        assert!(aged_line.is_ida);
        assert_eq!(aged_line.color_hex.as_deref(), Some("#f54029"));
        assert_eq!(aged_line.line_name, l.line_name);
        let aged_bus = &aged_line.buses[0];
        assert_eq!(aged_bus.eta_minutes, Some(3));
        assert_eq!(aged_bus.distance_meters, Some(850));
        assert_eq!(aged_bus.status, Some(1));
        assert_eq!(aged_bus.last_stop_id, Some(519));
    }

    #[test]
    fn aging_is_idempotent_and_never_mutates_the_snapshot() {
        let snap = snapshot(vec![line(1, false, vec![bus(7, Some(10)), bus(8, None)])]);
        let t = snap.fetched_at + Duration::from_secs(300);
        let first = snap.aged(t);
        let second = snap.aged(t);
        let third = snap.aged(t);
        assert_eq!(first, second);
        assert_eq!(second, third);
        // the stored ETAs are untouched
        assert_eq!(snap.lines[0].buses[0].eta_minutes, Some(10));
    }

    #[test]
    fn store_discards_responses_for_a_stale_stop() {
        let mut store = SnapshotStore::new(42);
        store.switch_to(7);
        // the response tagged with the old stop arrives late
        assert!(!store.replace(42, snapshot(vec![])));
        assert!(store.snapshot().is_none());
        // the freshly tracked stop installs fine
        assert!(store.replace(7, snapshot(vec![])));
        assert!(store.snapshot().is_some());
    }

    #[test]
    fn store_switch_clears_the_slot() {
        let mut store = SnapshotStore::new(42);
        assert!(store.replace(42, snapshot(vec![])));
        store.switch_to(43);
        assert_eq!(store.active_stop(), 43);
        assert!(store.snapshot().is_none());
    }

    #[test]
    fn decode_absent_eta_is_none_not_zero() {
        let body = r##"{
            "stop_id": 42,
            "lines": [
                {"line_id": 1, "line_name": "1A", "color_hex": "#1c6bb4", "is_ida": true,
                 "buses": [{"bus_id": 301, "eta_minutes": 3, "distance_meters": 620},
                           {"bus_id": 302}]},
                {"line_id": 5, "buses": []}
            ]
        }"##;
        let arrivals: ArrivalsResponse = serde_json::from_str(body).unwrap();
        assert_eq!(arrivals.stop_id, 42);
        assert_eq!(arrivals.lines[0].buses[0].eta_minutes, Some(3));
        assert_eq!(arrivals.lines[0].buses[1].eta_minutes, None);
        assert!(arrivals.lines[0].is_ida);
        // missing optional metadata decodes as defaults
        assert_eq!(arrivals.lines[1].line_name, None);
        assert!(!arrivals.lines[1].is_ida);
    }

    #[test]
    fn decode_stop_without_lines_gets_an_empty_list() {
        let stop: StopSummary =
            serde_json::from_str(r#"{"id": 9, "name": "Os Castros"}"#).unwrap();
        assert!(stop.lines.is_empty());
    }

    #[test]
    fn search_is_case_and_diacritic_insensitive() {
        let stops = vec![stop(1, "Alameda"), stop(2, "Bravo")];
        let hits = search_stops(&stops, "bra", 6);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 2);

        let stops = vec![stop(3, "Juan Flórez"), stop(4, "Cuatro Caminos")];
        assert_eq!(search_stops(&stops, "florez", 6)[0].id, 3);
        assert_eq!(search_stops(&stops, "FLÓREZ", 6)[0].id, 3);
    }

    #[test]
    fn search_matches_id_digits_and_caps_results() {
        let stops: Vec<StopSummary> =
            (1..=20).map(|i| stop(i, &format!("Parada {}", i))).collect();
        let by_id = search_stops(&stops, "17", 6);
        assert!(by_id.iter().any(|s| s.id == 17));
        assert_eq!(search_stops(&stops, "parada", 6).len(), 6);
        assert_eq!(search_stops(&stops, "", 6).len(), 6);
    }

    #[test]
    fn client_joins_base_url_and_path() {
        let client = ApiClient::new("http://localhost:8000/").unwrap();
        assert_eq!(
            client.url("/api/stops/42/arrivals"),
            "http://localhost:8000/api/stops/42/arrivals"
        );
        let prefixed = ApiClient::new("https://example.org/bus").unwrap();
        assert_eq!(prefixed.url("/api/stops?limit=400"),
            "https://example.org/bus/api/stops?limit=400"
        );
    }

    #[test]
    fn hex_colors_parse_with_and_without_hash() {
        assert_eq!(parse_hex_color("#1c6bb4"), (0x1c, 0x6b, 0xb4));
        assert_eq!(parse_hex_color("f54029"), (0xf5, 0x40, 0x29));
        assert_eq!(parse_hex_color("bogus"), (128, 128, 128));
    }

    #[test]
    fn hex_colors_reject_non_hex_bytes_without_panicking() {
        // six bytes but not six hex digits, including a multibyte char
        assert_eq!(parse_hex_color("aéabc"), (128, 128, 128));
        assert_eq!(parse_hex_color("#aéabc"), (128, 128, 128));
        assert_eq!(parse_hex_color("zzzzzz"), (128, 128, 128));
    }
}
