// Terminal views for the Next Bus Board.
use crate::nbb_models::{self, AgedView, ArrivalBus, LineArrivals, StopSummary};
use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::io::{self, Write};

/// At most this many "next arrival" cards per render pass.
pub const NEXT_CARDS_MAX: usize = 4;

/// A bus picked as its line's next arrival, with enough context to render
/// the card and to keep the bus out of that line's detail panel.
#[derive(Debug, Clone, PartialEq)]
pub struct NextCard<'a> {
    pub line: &'a LineArrivals,
    pub bus: &'a ArrivalBus,
}

/// Pick the next arrival per line: the first bus with a known ETA (the API
/// orders buses soonest-first), sorted ascending by adjusted ETA and capped
/// at `NEXT_CARDS_MAX`. Lines with no known ETA contribute no card.
pub fn next_arrivals(lines: &[LineArrivals]) -> Vec<NextCard<'_>> {
    let mut upcoming: Vec<NextCard> = lines
        .iter()
        .filter_map(|line| {
            line.buses
                .iter()
                .find(|bus| bus.eta_minutes.is_some())
                .map(|bus| NextCard { line, bus })
        })
        .collect();
    upcoming.sort_by_key(|card| card.bus.eta_minutes.unwrap_or(i64::MAX));
    upcoming.truncate(NEXT_CARDS_MAX);
    upcoming
}

/// line_id -> bus_id of the bus already shown as that line's next card.
/// The detail panels skip these so a bus never appears twice in one pass.
pub fn shown_map(cards: &[NextCard<'_>]) -> HashMap<u32, u32> {
    cards
        .iter()
        .map(|card| (card.line.line_id, card.bus.bus_id))
        .collect()
}

pub fn format_eta(eta_minutes: Option<i64>) -> String {
    match eta_minutes {
        None => "no data".to_string(),
        Some(m) if m <= 0 => "arriving".to_string(),
        Some(1) => "1 min".to_string(),
        Some(m) => format!("{} min", m),
    }
}

/// Wall-clock arrival time for a known ETA, e.g. "14:37".
pub fn format_absolute(eta_minutes: Option<i64>) -> Option<String> {
    let minutes = eta_minutes?;
    let arrival = Local::now() + chrono::Duration::minutes(minutes.max(0));
    Some(arrival.format("%H:%M").to_string())
}

pub struct NbbViews;

impl NbbViews {
    /// Render the whole board from an aged view: header, next-arrival
    /// cards, then one panel per line.
    pub fn render_board(
        stop: &StopSummary,
        view: &AgedView,
        fetched_at: DateTime<Local>,
        show_direction: bool,
    ) {
        Self::clear_screen();
        println!("{}", "═".repeat(62));
        println!("  NEXT BUS BOARD — {} (stop {})", stop.name, stop.id);
        if show_direction {
            if let Some(first) = view.lines.first() {
                let direction = if first.is_ida {
                    "→ outbound"
                } else {
                    "← inbound"
                };
                println!("  Direction: {}", direction);
            }
        }
        println!("{}", "═".repeat(62));

        let cards = next_arrivals(&view.lines);
        let shown = shown_map(&cards);

        println!("\nNEXT ARRIVALS");
        println!("{}", "─".repeat(62));
        if cards.is_empty() {
            println!("  No upcoming arrivals.");
        } else {
            for card in &cards {
                println!(
                    "  {}  {}{}",
                    Self::line_badge(card.line),
                    format_eta(card.bus.eta_minutes),
                    format_absolute(card.bus.eta_minutes)
                        .map(|abs| format!("  ({})", abs))
                        .unwrap_or_default(),
                );
            }
        }

        println!("\nALL LINES");
        println!("{}", "─".repeat(62));
        if view.lines.is_empty() {
            println!("  No data for the configured lines.");
        } else {
            for line in &view.lines {
                Self::render_line_panel(line, &shown);
            }
        }

        println!("\n{}", "─".repeat(62));
        println!(
            "  Data: {} | Rendered: {}",
            fetched_at.format("%H:%M"),
            Local::now().format("%H:%M")
        );
        Self::prompt_hint();
    }

    fn render_line_panel(line: &LineArrivals, shown: &HashMap<u32, u32>) {
        println!("  {}", Self::line_badge(line));
        let mut displayed = false;
        for bus in &line.buses {
            if shown.get(&line.line_id) == Some(&bus.bus_id) {
                continue;
            }
            let absolute = format_absolute(bus.eta_minutes)
                .map(|abs| format!(" ({})", abs))
                .unwrap_or_default();
            let distance = bus
                .distance_meters
                .map(|d| format!(" — {} m away", d))
                .unwrap_or_default();
            println!(
                "      • {}{}{}",
                format_eta(bus.eta_minutes),
                absolute,
                distance
            );
            displayed = true;
        }
        if !displayed {
            println!("      • no buses on the way");
        }
    }

    /// All three fetch errors collapse into the same board state: empty
    /// panels plus a retry notice. The cached snapshot stays untouched for
    /// the next presentation tick.
    pub fn render_unavailable(stop_id: u32) {
        Self::clear_screen();
        println!("{}", "═".repeat(62));
        println!("  NEXT BUS BOARD — stop {}", stop_id);
        println!("{}", "═".repeat(62));
        println!("\nNEXT ARRIVALS");
        println!("{}", "─".repeat(62));
        println!("  Could not reach the arrivals service.");
        println!("\nALL LINES");
        println!("{}", "─".repeat(62));
        println!("  No data available right now.");
        println!("\n{}", "─".repeat(62));
        println!("  Could not refresh. Retrying on the next cycle.");
        Self::prompt_hint();
    }

    pub fn show_search_results(results: &[&StopSummary]) {
        if results.is_empty() {
            println!("\nNo stops match that search.");
            return;
        }
        println!("\nMatching stops:");
        println!("{}", "─".repeat(62));
        for (i, stop) in results.iter().enumerate() {
            print!("  {}. {} (ID: {})", i + 1, stop.name, stop.id);
            if !stop.lines.is_empty() {
                print!("  — {} line(s)", stop.lines.len());
            }
            if stop.latitude != 0.0 || stop.longitude != 0.0 {
                print!("  ({:.5}, {:.5})", stop.latitude, stop.longitude);
            }
            println!();
        }
        println!("{}", "─".repeat(62));
        println!("Type the number to switch the board to that stop.");
    }

    pub fn show_welcome(stop_id: u32) {
        println!("{}", "═".repeat(62));
        println!("  NEXT BUS BOARD");
        println!("  Tracking stop {} — first fetch on the way...", stop_id);
        println!("{}", "═".repeat(62));
    }

    pub fn goodbye() {
        println!("\nBoard stopped.");
    }

    fn prompt_hint() {
        println!("  Search a stop by name, 'r' to refresh, 'q' to quit.");
        print!("> ");
        let _ = io::stdout().flush();
    }

    /// Line name on its color as an ANSI badge, gray when the API sent no
    /// color.
    fn line_badge(line: &LineArrivals) -> String {
        let name = line
            .line_name
            .clone()
            .unwrap_or_else(|| format!("Line {}", line.line_id));
        let (r, g, b) = line
            .color_hex
            .as_deref()
            .map(nbb_models::parse_hex_color)
            .unwrap_or((128, 128, 128));
        let luminance = (0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32) / 255.0;
        let text_color = if luminance > 0.5 { "30" } else { "97" };
        format!("\x1b[48;2;{};{};{}m\x1b[{}m {} \x1b[0m", r, g, b, text_color, name)
    }

    fn clear_screen() {
        print!("\x1B[2J\x1B[1;1H");
        let _ = io::stdout().flush();
    }
}

// ============================================================================
// Tests
// ============================================================================
