//! Table output formatting for CLI commands
//!
//! Renders services and routes with comfy-table. Colors are dropped when
//! `NO_COLOR` is set or the terminal is dumb.

use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};
use std::env;

use crate::domain::models::{HealthStatus, RouteEntry, ServiceState};
use crate::services::ServiceRecord;

/// Table formatter for `lokl status`
pub struct StatusFormatter {
    use_colors: bool,
    max_width: Option<usize>,
}

impl StatusFormatter {
    pub fn new() -> Self {
        Self {
            use_colors: supports_color(),
            max_width: None,
        }
    }

    pub fn with_config(use_colors: bool, max_width: Option<usize>) -> Self {
        Self {
            use_colors,
            max_width,
        }
    }

    /// Format services as a table, in the order given.
    pub fn format_services(&self, services: &[ServiceRecord]) -> String {
        let mut table = self.create_base_table();

        table.set_header(vec![
            Cell::new("Service").add_attribute(Attribute::Bold),
            Cell::new("State").add_attribute(Attribute::Bold),
            Cell::new("Health").add_attribute(Attribute::Bold),
            Cell::new("PID").add_attribute(Attribute::Bold),
            Cell::new("Port").add_attribute(Attribute::Bold),
            Cell::new("Restarts").add_attribute(Attribute::Bold),
            Cell::new("Uptime").add_attribute(Attribute::Bold),
            Cell::new("Last Error").add_attribute(Attribute::Bold),
        ]);

        for record in services {
            let state_cell = if self.use_colors {
                Cell::new(record.state.to_string()).fg(state_color(record.state))
            } else {
                Cell::new(format!("{} {}", state_icon(record.state), record.state))
            };

            let health_cell = if self.use_colors {
                Cell::new(record.health.to_string()).fg(health_color(record.health))
            } else {
                Cell::new(record.health.to_string())
            };

            let uptime = match (record.state, record.started_at) {
                (ServiceState::Running, Some(started)) => format_uptime(started),
                _ => "-".to_string(),
            };

            let last_error = record
                .last_error
                .as_deref()
                .map(|e| truncate_text(e, 40))
                .or_else(|| record.last_exit.map(|exit| exit.to_string()))
                .unwrap_or_else(|| "-".to_string());

            table.add_row(vec![
                Cell::new(&record.name),
                state_cell,
                health_cell,
                Cell::new(record.pid.map_or_else(|| "-".to_string(), |p| p.to_string())),
                Cell::new(record.port.map_or_else(|| "-".to_string(), |p| p.to_string())),
                Cell::new(record.restart_count),
                Cell::new(uptime),
                Cell::new(last_error),
            ]);
        }

        table.to_string()
    }

    /// Format active routes as a table.
    pub fn format_routes(&self, routes: &[RouteEntry]) -> String {
        let mut table = self.create_base_table();

        table.set_header(vec![
            Cell::new("Hostname").add_attribute(Attribute::Bold),
            Cell::new("Service").add_attribute(Attribute::Bold),
            Cell::new("Backend").add_attribute(Attribute::Bold),
            Cell::new("TLS").add_attribute(Attribute::Bold),
        ]);

        for route in routes {
            let host_cell = if self.use_colors {
                Cell::new(&route.hostname).fg(Color::Cyan)
            } else {
                Cell::new(&route.hostname)
            };

            table.add_row(vec![
                host_cell,
                Cell::new(&route.service),
                Cell::new(route.backend.to_string()),
                Cell::new(route.tls.to_string()),
            ]);
        }

        table.to_string()
    }

    fn create_base_table(&self) -> Table {
        let mut table = Table::new();

        table
            .load_preset(presets::UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic);

        if let Some(width) = self.max_width {
            table.set_width(u16::try_from(width).unwrap_or(u16::MAX));
        }

        table
    }
}

impl Default for StatusFormatter {
    fn default() -> Self {
        Self::new()
    }
}

/// Check if color output is supported
pub fn supports_color() -> bool {
    if env::var("NO_COLOR").is_ok() {
        return false;
    }

    if let Ok(term) = env::var("TERM") {
        if term == "dumb" {
            return false;
        }
    }

    true
}

fn state_color(state: ServiceState) -> Color {
    match state {
        ServiceState::Running => Color::Green,
        ServiceState::Starting | ServiceState::Pending => Color::Yellow,
        ServiceState::Stopping => Color::Cyan,
        ServiceState::Stopped => Color::DarkGrey,
        ServiceState::Crashed => Color::Red,
    }
}

fn state_icon(state: ServiceState) -> &'static str {
    match state {
        ServiceState::Running => "●",
        ServiceState::Starting | ServiceState::Pending => "◐",
        ServiceState::Stopping => "◑",
        ServiceState::Stopped => "○",
        ServiceState::Crashed => "✗",
    }
}

fn health_color(health: HealthStatus) -> Color {
    match health {
        HealthStatus::Healthy => Color::Green,
        HealthStatus::Unhealthy => Color::Red,
        HealthStatus::Unknown => Color::DarkGrey,
    }
}

pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        text.to_string()
    } else {
        let kept: String = text.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

/// Compact uptime such as "42s", "5m", "3h 12m".
fn format_uptime(started: chrono::DateTime<chrono::Utc>) -> String {
    let elapsed = chrono::Utc::now().signed_duration_since(started);
    let secs = elapsed.num_seconds().max(0);

    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86_400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / 86_400, (secs % 86_400) / 3600)
    }
}
