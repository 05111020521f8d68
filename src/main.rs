use clap::Parser;
use env_logger::Env;
use futures::StreamExt;
use sqlscout::{
    cli::Cli,
    config::Config,
    discovery::InstanceFinder,
    display::{DisplayManager, ScanSummary},
    reporting::{OutputFormat, ReportWriter},
    utils::{progress, time::format_duration},
    Result,
};
use std::io::{self, Stdout};
use std::process;
use std::time::Instant;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };

    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_secs()
        .init();

    let display = DisplayManager::with_quiet(cli.quiet);
    display.print_banner("SQLSCOUT - SQL Server Discovery", Some("Authorized Testing Only"));

    let mut config = match &cli.config {
        Some(path) => match Config::load_from_file(&path.to_string_lossy()) {
            Ok(config) => {
                display.print_success(&format!("Loaded configuration from {}", path.display()));
                config
            }
            Err(e) => {
                display.print_error(&format!("Failed to load configuration: {}", e));
                process::exit(1);
            }
        },
        None => Config::default(),
    };
    cli.apply_to(&mut config);

    if let Some(path) = &cli.save_config {
        match config.save_to_file(&path.to_string_lossy()) {
            Ok(()) => {
                display.print_success(&format!("Configuration written to {}", path.display()));
                return;
            }
            Err(e) => {
                display.print_error(&format!("Failed to save configuration: {}", e));
                process::exit(1);
            }
        }
    }

    let request = cli.to_request(&config);
    let finder = match InstanceFinder::new(config, request) {
        Ok(finder) => finder,
        Err(e) => {
            display.print_error(&e.to_string());
            process::exit(1);
        }
    };

    let start_time = Instant::now();
    match run(&finder, &display, cli.format, cli.quiet).await {
        Ok(summary) => {
            display.print_summary(&summary, &format_duration(start_time.elapsed()));
        }
        Err(e) => {
            display.print_error(&format!("Scan failed: {}", e));
            process::exit(1);
        }
    }
}

/// Scan host by host, printing every candidate as soon as its host is done.
async fn run(
    finder: &InstanceFinder,
    display: &DisplayManager,
    format: OutputFormat,
    quiet: bool,
) -> Result<ScanSummary> {
    let mut writer: Option<ReportWriter<Stdout>> = ReportWriter::for_format(format, io::stdout());
    let mut summary = ScanSummary::default();
    let mut header_printed = false;

    let spinner = progress::create_spinner("Enumerating targets", quiet);
    let mut targets = finder.targets();

    while let Some(host) = targets.next().await {
        spinner.set_message(format!("Scanning {}", host));
        let candidates = finder.scan_host(&host).await;
        summary.hosts += 1;

        for candidate in &candidates {
            summary.record(candidate);
            match writer.as_mut() {
                Some(writer) => spinner.suspend(|| writer.write(candidate))?,
                None => spinner.suspend(|| {
                    if !header_printed {
                        display.print_table_header();
                        header_printed = true;
                    }
                    display.print_candidate(candidate);
                }),
            }
        }
    }

    spinner.finish_and_clear();
    Ok(summary)
}
