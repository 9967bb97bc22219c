//! Implementation of the `lokl logs` command.

use anyhow::Result;
use console::style;

use super::GlobalArgs;
use crate::application::{LogLine, LogStream};
use crate::cli::output::table::supports_color;
use crate::infrastructure::control::{ControlRequest, ControlResponse};

pub async fn execute(
    service: String,
    follow: bool,
    lines: Option<usize>,
    globals: &GlobalArgs,
) -> Result<()> {
    let _logger = globals.client_logger()?;
    let request = ControlRequest::Logs {
        name: service.clone(),
        lines,
        follow,
    };

    let json_mode = globals.json;
    let colors = supports_color();
    let print = |response: &ControlResponse| {
        if let ControlResponse::LogLine(line) = response {
            if json_mode {
                println!("{}", serde_json::to_string(line).unwrap_or_default());
            } else {
                println!("{}", format_line(&service, line, colors));
            }
        }
        true
    };

    // Runs until the orchestrator sends `end` or goes away
    globals.control_client().stream(&request, print).await?;
    Ok(())
}

fn format_line(service: &str, line: &LogLine, colors: bool) -> String {
    let time = line.timestamp.format("%H:%M:%S%.3f");
    if !colors {
        let marker = match line.stream {
            LogStream::Stdout => "|",
            LogStream::Stderr => "!",
        };
        return format!("{time} {service} {marker} {}", line.line);
    }

    match line.stream {
        LogStream::Stdout => format!(
            "{} {} {} {}",
            style(time).dim(),
            style(service).cyan(),
            style("|").dim(),
            line.line
        ),
        LogStream::Stderr => format!(
            "{} {} {} {}",
            style(time).dim(),
            style(service).cyan(),
            style("!").red(),
            style(&line.line).red()
        ),
    }
}
