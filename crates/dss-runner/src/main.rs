//! `dss-sim`: run the DSS acoustic release emulator.

use clap::{Parser, Subcommand};
use dss_emulator::{CancelFlag, Clock, ControllerEvent, Progress};
use dss_runner::{
    init_logging, log_filter, read_firmware, run_demo, serve_device, upload_file, ConfigOverrides,
    DemoObserver, RunnerError, RunnerResult, SimConfig,
};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "dss-sim", version, about = "DSS acoustic release emulator")]
struct Cli {
    /// YAML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `dss_emulator=trace`.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Device RNG seed.
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// Simulation speed multiplier.
    #[arg(long, global = true)]
    speed: Option<f64>,

    /// Simulate operation failures at this rate.
    #[arg(long, global = true)]
    failure_rate: Option<f64>,

    /// Directory for uploaded firmware images.
    #[arg(long, global = true)]
    firmware_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Walk a release session over an in-memory link.
    Demo {
        /// Firmware image to upload once the release has fired.
        #[arg(long)]
        firmware: Option<PathBuf>,

        /// Print events as JSON lines.
        #[arg(long)]
        json: bool,
    },
    /// Serve the device role over TCP.
    Device {
        /// Address to listen on.
        #[arg(long, default_value = "127.0.0.1:4100")]
        listen: String,
    },
    /// Connect to a device and upload a firmware image.
    Upload {
        /// Device address.
        #[arg(long, default_value = "127.0.0.1:4100")]
        connect: String,

        /// Firmware image, one frame line per text line.
        #[arg(long)]
        file: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> RunnerResult<()> {
    let mut config = match &cli.config {
        Some(path) => SimConfig::load(path)?,
        None => SimConfig::default(),
    };
    config.apply(&ConfigOverrides {
        seed: cli.seed,
        speed: cli.speed,
        failure_rate: cli.failure_rate,
        firmware_dir: cli.firmware_dir.clone(),
    });
    config.validate()?;
    init_logging(log_filter(
        cli.log_level.as_deref(),
        config.log_level.as_deref(),
    )?)?;

    let cancel = CancelFlag::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            eprintln!("\nInterrupted, stopping...");
            cancel.cancel();
        })
        .map_err(|err| RunnerError::Config(format!("cannot install Ctrl-C handler: {}", err)))?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async move {
        install_metrics(&config)?;
        let clock: Arc<dyn Clock> = Arc::new(config.clock()?);
        match cli.command {
            Command::Demo { firmware, json } => {
                let firmware = firmware.as_deref().map(read_firmware).transpose()?;
                let mut printer = Printer { json };
                let summary = run_demo(&config, firmware, &cancel, &mut printer).await?;
                println!("controller: {}", summary.controller);
                println!("{}", summary.device);
                if let Some(report) = summary.transfer {
                    println!(
                        "firmware: {} lines sent, {} skipped, {} retries",
                        report.lines_sent, report.lines_skipped, report.retries
                    );
                }
                Ok(())
            }
            Command::Device { listen } => {
                let listener = TcpListener::bind(&listen).await?;
                serve_device(listener, &config, clock, &cancel).await
            }
            Command::Upload { connect, file } => {
                let report = upload_file(&connect, &file, &config, clock, &cancel, print_progress)
                    .await;
                eprintln!();
                let report = report?;
                println!(
                    "uploaded {} lines ({} attempts, {} retries)",
                    report.lines_sent, report.attempts, report.retries
                );
                Ok(())
            }
        }
    })
}

#[cfg(feature = "prometheus")]
fn install_metrics(config: &SimConfig) -> RunnerResult<()> {
    if let Some(addr) = config.metrics_addr {
        dss_metrics::install_prometheus_exporter(addr)
            .map_err(|err| RunnerError::Config(format!("metrics exporter: {}", err)))?;
        info!("serving metrics on http://{}/metrics", addr);
    } else {
        dss_metrics::describe_metrics();
    }
    Ok(())
}

#[cfg(not(feature = "prometheus"))]
fn install_metrics(config: &SimConfig) -> RunnerResult<()> {
    if let Some(addr) = config.metrics_addr {
        info!(
            "metrics_addr {} ignored: built without the prometheus feature",
            addr
        );
    }
    dss_metrics::describe_metrics();
    Ok(())
}

struct Printer {
    json: bool,
}

impl DemoObserver for Printer {
    fn event(&mut self, event: &ControllerEvent) {
        if self.json {
            match serde_json::to_string(event) {
                Ok(line) => println!("{}", line),
                Err(err) => eprintln!("cannot encode event: {}", err),
            }
        } else {
            println!("{:?}", event);
        }
    }

    fn progress(&mut self, progress: Progress) {
        print_progress(progress);
    }
}

fn print_progress(progress: Progress) {
    eprint!(
        "\rfirmware {:>3}% ({}/{})",
        progress.percent, progress.completed, progress.total
    );
    let _ = std::io::stderr().flush();
}
