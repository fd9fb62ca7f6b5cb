use anyhow::{Context, Result};
use clap::Parser;
use console::style;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use uniflash_core::boot_support::HttpFetcher;
use uniflash_core::config::FlashSettings;
use uniflash_core::logging::{self, LogConfig};
use uniflash_core::{
    preflight, ChannelObserver, FlashContext, FlashPipeline, Severity, StatusMessage, StatusSink,
};
use uniflash_hal::LinuxHal;

mod cli;

use cli::{Cli, Command, FlashArgs};

const EXIT_FAILURE: i32 = 1;

fn main() {
    let cli = Cli::parse();
    if cli.no_color {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }
    logging::init(&LogConfig {
        verbose: cli.verbose,
        log_file: cli.log_file.clone(),
    });

    let code = match run(&cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{} {:#}", style("error:").red().bold(), err);
            EXIT_FAILURE
        }
    };
    std::process::exit(code);
}

fn run(cli: &Cli) -> Result<i32> {
    match &cli.command {
        Command::Preflight => {
            check_environment()?;
            println!("{} all required tools are present", style("ok:").green().bold());
            Ok(0)
        }
        Command::Flash(args) => flash(cli, args),
    }
}

fn check_environment() -> Result<()> {
    let report = preflight::run().context("Preflight failed")?;
    for tool in &report.missing_optional {
        println!(
            "{} optional tool {} not found",
            style("warning:").yellow().bold(),
            tool
        );
    }
    Ok(())
}

fn flash(cli: &Cli, args: &FlashArgs) -> Result<i32> {
    if args.skip_preflight {
        log::warn!("Skipping preflight checks");
    } else {
        check_environment()?;
    }
    let settings = FlashSettings::load(cli.config.as_deref())?;
    let request = args.to_request();

    let sink = Arc::new(StatusSink::new());
    let (tx, rx) = mpsc::sync_channel(256);
    sink.attach(Arc::new(ChannelObserver::new(tx)));

    let cancel = sink.cancel_token();
    ctrlc::set_handler(move || {
        cancel.cancel();
        log::info!("Cancellation requested (Ctrl+C).");
    })
    .context("Failed to install the Ctrl+C handler")?;

    let fetcher = HttpFetcher::new(settings.fetch_timeout());
    let pipeline = FlashPipeline::new(FlashContext {
        hal: Arc::new(LinuxHal::new()),
        fetcher: Arc::new(fetcher),
        sink,
        settings,
    });

    println!(
        "{} everything on {} will be erased",
        style("WARNING:").red().bold(),
        style(&request.target).cyan()
    );
    let handle = pipeline
        .spawn(request)
        .context("Failed to start the flash session")?;

    while !handle.is_finished() {
        match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(message) => print_message(&message),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    let report = handle.join();
    drain(&rx);

    if report.is_success() {
        let copied = report.copied.map(|c| c.files).unwrap_or_default();
        println!(
            "{} {} files written as {}{}",
            style("Success:").green().bold(),
            copied,
            report.resolved_filesystem,
            if report.escalated {
                " (switched from FAT32)"
            } else {
                ""
            }
        );
    }
    Ok(report.exit_code())
}

fn drain(rx: &Receiver<StatusMessage>) {
    while let Ok(message) = rx.try_recv() {
        print_message(&message);
    }
}

fn print_message(message: &StatusMessage) {
    match message.severity {
        Severity::Info => println!("{}", message.text),
        Severity::Warning => println!("{} {}", style("warning:").yellow().bold(), message.text),
        Severity::Fatal => eprintln!("{} {}", style("error:").red().bold(), message.text),
    }
}
