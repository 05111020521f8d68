use crate::types::{Availability, Confidence, InstanceCandidate};
use colored::*;

/// Coloured terminal output. Decorations go to stderr so that stdout only
/// carries candidate records.
pub struct DisplayManager {
    use_colors: bool,
    quiet_mode: bool,
}

/// Per-confidence tally printed at the end of a scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub hosts: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub none: usize,
    pub sql_connected: usize,
}

impl ScanSummary {
    pub fn record(&mut self, candidate: &InstanceCandidate) {
        match candidate.confidence {
            Confidence::High => self.high += 1,
            Confidence::Medium => self.medium += 1,
            Confidence::Low => self.low += 1,
            Confidence::None => self.none += 1,
        }
        if candidate.sql_connected {
            self.sql_connected += 1;
        }
    }

    pub fn total(&self) -> usize {
        self.high + self.medium + self.low + self.none
    }
}

impl DisplayManager {
    pub fn new() -> Self {
        Self::with_quiet(false)
    }

    pub fn with_quiet(quiet: bool) -> Self {
        let use_colors = std::env::var("NO_COLOR").is_err()
            && std::env::var("TERM").map_or(true, |term| term != "dumb");

        Self {
            use_colors,
            quiet_mode: quiet,
        }
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet_mode
    }

    pub fn print_banner(&self, title: &str, subtitle: Option<&str>) {
        if self.quiet_mode {
            return;
        }

        let width = title.chars().count().max(subtitle.map_or(0, |s| s.chars().count()));
        if self.use_colors {
            eprintln!();
            eprintln!("  {}", "┌─".bright_cyan().to_string() + &"─".repeat(width + 2) + "─┐");
            eprintln!(
                "  {} {} {}",
                "│".bright_cyan(),
                format!("{:^width$}", title, width = width).bright_white().bold(),
                "│".bright_cyan()
            );
            if let Some(sub) = subtitle {
                eprintln!(
                    "  {} {} {}",
                    "│".bright_cyan(),
                    format!("{:^width$}", sub, width = width).bright_black(),
                    "│".bright_cyan()
                );
            }
            eprintln!("  {}", "└─".bright_cyan().to_string() + &"─".repeat(width + 2) + "─┘");
            eprintln!();
        } else {
            let border = "=".repeat(width + 4);
            eprintln!("\n{}", border);
            eprintln!("  {}  ", title);
            if let Some(sub) = subtitle {
                eprintln!("  {}  ", sub);
            }
            eprintln!("{}\n", border);
        }
    }

    pub fn print_section_header(&self, title: &str) {
        if self.quiet_mode {
            return;
        }

        if self.use_colors {
            eprintln!("{}", title.bright_cyan().bold());
            eprintln!("{}", "─".repeat(title.chars().count()).bright_cyan());
        } else {
            eprintln!("{}", title);
            eprintln!("{}", "=".repeat(title.len()));
        }
    }

    pub fn print_success(&self, message: &str) {
        if self.quiet_mode {
            return;
        }

        if self.use_colors {
            eprintln!("  {} {}", "✓".bright_green().bold(), message.green());
        } else {
            eprintln!("[✓] {}", message);
        }
    }

    pub fn print_warning(&self, message: &str) {
        if self.quiet_mode {
            return;
        }

        if self.use_colors {
            eprintln!("  {} {}", "!".bright_yellow().bold(), message.yellow());
        } else {
            eprintln!("[!] {}", message);
        }
    }

    /// Errors print even in quiet mode.
    pub fn print_error(&self, message: &str) {
        if self.use_colors {
            eprintln!("  {} {}", "✗".bright_red().bold(), message.red().bold());
        } else {
            eprintln!("[✗] {}", message);
        }
    }

    pub fn print_info(&self, message: &str) {
        if self.quiet_mode {
            return;
        }

        if self.use_colors {
            eprintln!("  {} {}", "i".bright_blue().bold(), message.blue());
        } else {
            eprintln!("[i] {}", message);
        }
    }

    /// Column titles for [`DisplayManager::print_candidate`].
    pub fn print_table_header(&self) {
        let header = format!(
            "{:<8} {:<40} {:<16} {:>5}  {:<11} {:<9} {}",
            "CONF", "INSTANCE", "MACHINE", "PORT", "AVAILABLE", "CHECKS", "SPNS"
        );
        if self.use_colors {
            println!("{}", header.bright_white().bold());
        } else {
            println!("{}", header);
        }
    }

    /// One table row per candidate, always on stdout.
    pub fn print_candidate(&self, candidate: &InstanceCandidate) {
        let port = candidate.port.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string());
        let checks = format!(
            "{}{}{}",
            if candidate.ping { "P" } else { "-" },
            if candidate.tcp_connected { "T" } else { "-" },
            if candidate.sql_connected { "S" } else { "-" },
        );
        let spns = candidate.spns.len().to_string();
        let instance = candidate.sql_instance().truncate_with_ellipsis(40);
        let machine = candidate.machine_name.truncate_with_ellipsis(16);
        let confidence = format!("{:<8}", candidate.confidence.to_string());
        let availability = format!("{:<11}", candidate.availability.to_string());

        if self.use_colors {
            println!(
                "{} {:<40} {:<16} {:>5}  {} {:<9} {}",
                confidence.color(confidence_color(candidate.confidence)).bold(),
                instance.bright_white(),
                machine.cyan(),
                port.yellow(),
                availability.color(availability_color(candidate.availability)),
                checks.bright_black(),
                spns.bright_black()
            );
        } else {
            println!(
                "{} {:<40} {:<16} {:>5}  {} {:<9} {}",
                confidence, instance, machine, port, availability, checks, spns
            );
        }
    }

    pub fn print_summary(&self, summary: &ScanSummary, elapsed: &str) {
        if self.quiet_mode {
            return;
        }

        eprintln!();
        self.print_section_header("SCAN SUMMARY");
        let rows = [
            ("Hosts scanned", summary.hosts.to_string()),
            ("Candidates", summary.total().to_string()),
            ("SQL connected", summary.sql_connected.to_string()),
            ("Elapsed", elapsed.to_string()),
        ];
        for (label, value) in rows {
            if self.use_colors {
                eprintln!("  {:<14} {}", label.bright_white().bold(), value.cyan().bold());
            } else {
                eprintln!("  {:<14} {}", label, value);
            }
        }

        if summary.total() == 0 {
            self.print_warning("No SQL Server instances found");
            return;
        }

        let levels = [
            (Confidence::High, summary.high),
            (Confidence::Medium, summary.medium),
            (Confidence::Low, summary.low),
            (Confidence::None, summary.none),
        ];
        for (level, count) in levels.iter().filter(|(_, count)| *count > 0) {
            let name = format!("{:<8}", level.to_string());
            if self.use_colors {
                eprintln!("    {} {:>5}", name.color(confidence_color(*level)).bold(), count);
            } else {
                eprintln!("    {} {:>5}", name, count);
            }
        }
        eprintln!();
    }
}

impl Default for DisplayManager {
    fn default() -> Self {
        Self::new()
    }
}

fn confidence_color(confidence: Confidence) -> Color {
    match confidence {
        Confidence::High => Color::BrightGreen,
        Confidence::Medium => Color::Yellow,
        Confidence::Low => Color::Red,
        Confidence::None => Color::BrightBlack,
    }
}

fn availability_color(availability: Availability) -> Color {
    match availability {
        Availability::Available => Color::Green,
        Availability::Unavailable => Color::Red,
        Availability::Unknown => Color::BrightBlack,
    }
}

trait StringExt {
    fn truncate_with_ellipsis(&self, max_len: usize) -> String;
}

impl StringExt for str {
    fn truncate_with_ellipsis(&self, max_len: usize) -> String {
        if self.chars().count() <= max_len {
            self.to_string()
        } else {
            let kept: String = self.chars().take(max_len.saturating_sub(3)).collect();
            format!("{}...", kept)
        }
    }
}
