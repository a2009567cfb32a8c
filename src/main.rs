use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, bail};
use clap::Parser;
use console::style;
use dialoguer::{Confirm, Select, theme::ColorfulTheme};
use indicatif::{ProgressBar, ProgressStyle};

use orpheus::cli::{Cli, Commands};
use orpheus::device::{
    FileMedium, MediumReader, discover_optical_drives, drive_selection_options, format_drive_table,
    human_bytes,
};
use orpheus::logging::init_logging;
use orpheus::progress::{PositionUpdate, ProgressSink};
use orpheus::sector::SECTOR_SIZE;
use orpheus::session::{
    FatalResolution, Prompt, SessionConfig, SessionError, SessionSummary, Verdict,
};

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.debug);
    print_banner();

    match cli.command {
        Commands::Read {
            device,
            image,
            first_sector,
            last_sector,
            passes,
            sector_skip,
            ignore_fatal,
            truncate,
            eject,
            spinup,
            sums,
            write_sums,
            report,
            yes,
        } => {
            let cfg = SessionConfig {
                scan_only: false,
                image: Some(image),
                first_sector,
                last_sector,
                passes,
                sector_skip,
                ignore_fatal,
                allow_truncate: truncate || yes,
                eject,
                spinup_secs: spinup,
                reference: sums,
                write_sums,
                speed_warning: true,
            };
            run_session_cmd(device, cfg, report, yes)
        }
        Commands::Scan {
            device,
            first_sector,
            last_sector,
            sums,
            spinup,
            report,
            yes,
        } => {
            let cfg = SessionConfig {
                scan_only: true,
                first_sector,
                last_sector,
                spinup_secs: spinup,
                reference: sums,
                ..SessionConfig::default()
            };
            run_session_cmd(device, cfg, report, yes)
        }
        Commands::Info { device } => run_info(device),
    }
}

fn run_session_cmd(
    device: Option<PathBuf>,
    cfg: SessionConfig,
    report: Option<PathBuf>,
    yes: bool,
) -> Result<()> {
    let path = match device {
        Some(path) => path,
        None => select_device(yes)?,
    };

    let mut medium =
        FileMedium::open(&path).with_context(|| format!("failed to open {}", path.display()))?;
    let info = medium.info().clone();
    println!(
        "{} ({}, {} sectors)",
        style(&info.description).bold(),
        human_bytes(info.sectors * SECTOR_SIZE as u64),
        info.sectors
    );

    let cancel = install_interrupt()?;
    let bar = ProgressBar::new(1000);
    bar.set_style(ProgressStyle::with_template("[{bar:40.cyan/blue}] {msg}")?.progress_chars("=> "));
    let sink = BarSink { bar: bar.clone() };
    let prompt = TtyPrompt {
        assume_defaults: yes,
        scan: cfg.scan_only,
    };

    let outcome = orpheus::run(&mut medium, &cfg, &prompt, &sink, &cancel);
    bar.finish_and_clear();

    match outcome {
        Ok(summary) => {
            print_summary(&summary);
            if let Some(path) = report.as_deref() {
                write_report(path, &summary)?;
            }
            if summary.verdict == Verdict::Incomplete {
                process::exit(1);
            }
            Ok(())
        }
        Err(SessionError::Aborted {
            sectors_read,
            unreadable,
        }) => {
            println!(
                "\n[!] {}",
                style(format!(
                    "aborted: {} sectors read, {} unreadable",
                    sectors_read, unreadable
                ))
                .yellow()
            );
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn select_device(assume_defaults: bool) -> Result<PathBuf> {
    let drives = discover_optical_drives();
    if drives.is_empty() {
        bail!("no optical drives found, pass a device path with --device");
    }
    println!("\n{}", format_drive_table(&drives));

    if assume_defaults || drives.len() == 1 {
        return Ok(drives[0].path.clone());
    }

    let options = drive_selection_options(&drives);
    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select a drive")
        .items(&options)
        .default(0)
        .interact()
        .context("failed to select a drive")?;
    Ok(drives[selection].path.clone())
}

fn install_interrupt() -> Result<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&flag);
    ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::SeqCst);
    })
    .context("failed to install the interrupt handler")?;
    Ok(flag)
}

fn print_summary(summary: &SessionSummary) {
    println!();
    for line in summary.describe() {
        match summary.verdict {
            Verdict::AllRead => println!("[ok] {}", style(line).green()),
            Verdict::TruncatedTao => println!("[!] {}", style(line).yellow()),
            Verdict::Incomplete => println!("[!] {}", style(line).red()),
        }
    }
    println!(
        "{} sectors read in {:.1}s over {} pass(es)",
        summary.sectors_read, summary.elapsed_secs, summary.passes
    );
}

fn write_report(path: &Path, summary: &SessionSummary) -> Result<()> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("failed to create report {}", path.display()))?;
    serde_json::to_writer_pretty(file, summary).context("failed to write the session report")?;
    Ok(())
}

fn run_info(device: Option<PathBuf>) -> Result<()> {
    match device {
        Some(path) => {
            let medium = FileMedium::open(&path)
                .with_context(|| format!("failed to open {}", path.display()))?;
            let info = medium.info();
            println!("{}", style(&info.description).bold());
            println!("Kind:     {}", info.kind);
            println!("Sectors:  {}", info.sectors);
            println!(
                "Size:     {}",
                human_bytes(info.sectors * SECTOR_SIZE as u64)
            );
            println!("Cluster:  {} sectors per read", info.cluster);
            Ok(())
        }
        None => {
            let drives = discover_optical_drives();
            if drives.is_empty() {
                println!("No optical drives found.");
            } else {
                println!("{}", format_drive_table(&drives));
            }
            Ok(())
        }
    }
}

struct TtyPrompt {
    assume_defaults: bool,
    scan: bool,
}

impl Prompt for TtyPrompt {
    fn confirm_restart_fresh(&self, detail: &str) -> bool {
        if self.assume_defaults {
            return false;
        }
        Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(format!("{}; restart with a fresh image?", detail))
            .default(false)
            .interact()
            .unwrap_or(false)
    }

    fn resolve_fatal(&self, sector: u64, detail: &str) -> FatalResolution {
        if self.assume_defaults {
            return FatalResolution::Abort;
        }
        let choice = Select::with_theme(&ColorfulTheme::default())
            .with_prompt(format!("device failure at sector {}: {}", sector, detail))
            .items(&["abort", "ignore once", "ignore for this session"])
            .default(0)
            .interact();
        match choice {
            Ok(1) => FatalResolution::IgnoreOnce,
            Ok(2) => FatalResolution::IgnoreAlways,
            _ => FatalResolution::Abort,
        }
    }

    fn confirm_truncate(&self, sectors: u64) -> bool {
        if self.assume_defaults {
            return true;
        }
        let question = if self.scan {
            format!(
                "{} trailing sectors look like a TAO gap, count them as expected?",
                sectors
            )
        } else {
            format!(
                "{} trailing sectors look like a TAO gap, truncate the image?",
                sectors
            )
        };
        Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(question)
            .default(true)
            .interact()
            .unwrap_or(false)
    }
}

struct BarSink {
    bar: ProgressBar,
}

impl ProgressSink for BarSink {
    fn position(&self, update: PositionUpdate) {
        self.bar.set_position(update.permil as u64);
        let mut msg = format!(
            "{:.1}% at {:.1}x",
            update.permil as f64 / 10.0,
            update.speed
        );
        if update.unreadable > 0 {
            msg.push_str(&format!(", {} unreadable", update.unreadable));
        }
        if update.checksum_errors > 0 {
            msg.push_str(&format!(", {} checksum errors", update.checksum_errors));
        }
        self.bar.set_message(msg);
    }

    fn announce(&self, message: &str) {
        self.bar.println(message);
    }
}

fn print_banner() {
    println!(
        "{} {}",
        style("orpheus").cyan().bold(),
        env!("CARGO_PKG_VERSION")
    );
}
