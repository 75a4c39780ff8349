//! Output formatting for bindings and kill results.

use chrono::{Local, TimeZone};
use porthog_core::{OutputFormat, PartialResult, PortBinding, TerminateResult};

/// Concrete format after resolving `auto`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Table,
    Plain,
    Json,
}

impl Format {
    /// Flags win over the configured default; `auto` picks by terminal.
    pub fn resolve(json: bool, plain: bool, configured: OutputFormat) -> Self {
        if json {
            return Format::Json;
        }
        if plain {
            return Format::Plain;
        }
        match configured {
            OutputFormat::Table => Format::Table,
            OutputFormat::Plain => Format::Plain,
            OutputFormat::Json => Format::Json,
            OutputFormat::Auto if atty::is(atty::Stream::Stdout) => Format::Table,
            OutputFormat::Auto => Format::Plain,
        }
    }
}

pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", head)
    }
}

fn started(create_time_ms: i64) -> String {
    if create_time_ms <= 0 {
        return "-".to_string();
    }
    match Local.timestamp_millis_opt(create_time_ms).single() {
        Some(t) => t.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => "-".to_string(),
    }
}

fn pid_cell(binding: &PortBinding) -> String {
    if binding.has_owner() {
        binding.pid.to_string()
    } else {
        "-".to_string()
    }
}

fn process_cells(binding: &PortBinding) -> (String, String, String) {
    match &binding.process {
        Some(p) if p.permission_denied => {
            ("(denied)".to_string(), "-".to_string(), "-".to_string())
        }
        Some(p) => (
            p.name.clone(),
            if p.username.is_empty() { "-".to_string() } else { p.username.clone() },
            started(p.create_time_ms),
        ),
        None => ("-".to_string(), "-".to_string(), "-".to_string()),
    }
}

fn cmdline_cell(binding: &PortBinding) -> &str {
    binding
        .process
        .as_ref()
        .and_then(|p| p.cmdline.as_deref())
        .unwrap_or("-")
}

/// Print a listing in the given format. Warnings go to stderr.
pub fn print_bindings(
    result: &PartialResult<Vec<PortBinding>>,
    format: Format,
    show_cmdline: bool,
) -> anyhow::Result<()> {
    match format {
        Format::Json => {
            println!("{}", serde_json::to_string_pretty(result)?);
            return Ok(());
        }
        Format::Plain => {
            for b in &result.data {
                let (name, user, start) = process_cells(b);
                let mut line = format!(
                    "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
                    b.protocol,
                    b.local_addr(),
                    b.remote_addr().unwrap_or_else(|| "-".to_string()),
                    b.state,
                    pid_cell(b),
                    name,
                    user,
                    start
                );
                if show_cmdline {
                    line.push('\t');
                    line.push_str(cmdline_cell(b));
                }
                println!("{}", line);
            }
        }
        Format::Table => {
            if result.data.is_empty() {
                println!("No matching sockets found.");
            } else {
                println!(
                    "{:<5} {:<28} {:<28} {:<12} {:<8} {:<20} {:<12} {:<19}{}",
                    "PROTO",
                    "LOCAL",
                    "REMOTE",
                    "STATE",
                    "PID",
                    "PROCESS",
                    "USER",
                    "STARTED",
                    if show_cmdline { " COMMAND" } else { "" }
                );
                println!("{}", "-".repeat(if show_cmdline { 150 } else { 136 }));
                for b in &result.data {
                    let (name, user, start) = process_cells(b);
                    let command = if show_cmdline {
                        format!(" {}", truncate(cmdline_cell(b), 40))
                    } else {
                        String::new()
                    };
                    println!(
                        "{:<5} {:<28} {:<28} {:<12} {:<8} {:<20} {:<12} {:<19}{}",
                        b.protocol.to_string(),
                        truncate(&b.local_addr(), 28),
                        truncate(&b.remote_addr().unwrap_or_else(|| "-".to_string()), 28),
                        b.state.to_string(),
                        pid_cell(b),
                        truncate(&name, 20),
                        truncate(&user, 12),
                        start,
                        command
                    );
                }
                println!("\nTotal: {} sockets", result.data.len());
            }
        }
    }

    if result.denied_count > 0 {
        eprintln!(
            "warning: {} process(es) could not be inspected; run with elevated privileges for a complete view",
            result.denied_count
        );
    }
    for warning in &result.warnings {
        eprintln!("warning: {}", warning);
    }
    Ok(())
}

/// Print the outcome of a kill request.
pub fn print_terminate(result: &TerminateResult, format: Format) -> anyhow::Result<()> {
    if format == Format::Json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    let name = result.process_name().unwrap_or("unknown");
    let verb = if result.dry_run {
        "Would kill"
    } else if result.killed {
        "Killed"
    } else {
        "Did not kill"
    };
    println!(
        "{} {} (PID {}) on {} port {}",
        verb, name, result.pid, result.protocol, result.port
    );
    if let Some(reason) = &result.blocked_by {
        println!("Blocked: {}", reason);
    }
    Ok(())
}
