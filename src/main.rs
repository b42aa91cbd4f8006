use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use otg_glue::config::{GlueConfig, PortRole};
use otg_glue::controller::{Collaborators, Controller, ControllerHandle};
use otg_glue::events::EventBus;
use otg_glue::mmio::{DevMemPlatform, DEV_MEM_PATH};
use otg_glue::service::OtgService;
use otg_glue::uio::{IrqSource, UioIrq};
use otg_glue::usbcore::{CompletionSink, CoreEvents, Direction, PhyPower, PortMode, UsbCore};

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// Port role as given on the command line
#[derive(Debug, Clone, Copy, ValueEnum)]
enum RoleArg {
    Host,
    Peripheral,
    Otg,
}

impl From<RoleArg> for PortRole {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Host => PortRole::HostOnly,
            RoleArg::Peripheral => PortRole::PeripheralOnly,
            RoleArg::Otg => PortRole::DualRole,
        }
    }
}

/// otg-glued command line arguments
#[derive(Parser, Debug)]
#[command(name = "otg-glued")]
#[command(version, about = "TI816x/AM35x USB OTG glue daemon", long_about = None)]
struct CliArgs {
    /// Port role
    #[arg(short = 'r', long, value_enum, default_value = "otg")]
    role: RoleArg,

    /// Controller instance inside the USB subsystem (0 or 1)
    #[arg(short = 'c', long, default_value_t = 0)]
    controller: u8,

    /// OTG poll interval in milliseconds
    #[arg(long, value_name = "MS")]
    poll_interval: Option<u64>,

    /// B-device connect timeout in milliseconds (0 waits forever)
    #[arg(long, value_name = "MS")]
    a_wait_bcon: Option<u64>,

    /// Run without the CPPI 4.1 DMA engine (PIO only)
    #[arg(long)]
    no_dma: bool,

    /// UIO device delivering the controller interrupt
    #[arg(short = 'u', long, value_name = "DEVICE")]
    uio: Option<PathBuf>,

    /// Memory device the register windows are mapped from
    #[arg(short = 'm', long, value_name = "FILE", default_value = DEV_MEM_PATH)]
    mem: PathBuf,

    /// Print the effective configuration as JSON and exit
    #[arg(long)]
    print_config: bool,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    let config = build_config(&args);
    if args.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    init_logging(args.log_level, args.verbose);
    tracing::info!("Starting otg-glued v{}", env!("CARGO_PKG_VERSION"));

    config.validate()?;
    let platform = DevMemPlatform::open(&args.mem)?;

    let collaborators = Collaborators {
        core: Box::new(LoggingCore),
        sink: Box::new(LoggingSink),
        phy: Box::new(LoggingPhy),
    };
    let mut controller = Controller::attach(config, &platform, collaborators)?;

    let events = Arc::new(EventBus::new());
    controller.set_event_bus(events.clone());
    let mut event_rx = events.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = event_rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => tracing::info!("{}", json),
                Err(e) => tracing::warn!("Failed to serialize {}: {}", event.event_name(), e),
            }
        }
    });

    let irq: Option<Box<dyn IrqSource>> = match &args.uio {
        Some(path) => Some(Box::new(UioIrq::open(path)?)),
        None => {
            tracing::warn!("No UIO device given, interrupts will not be serviced");
            None
        }
    };

    let handle = ControllerHandle::new(controller);
    let service = OtgService::start(handle.clone(), irq);
    tracing::info!("Status: {}", serde_json::to_string(&handle.status())?);

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    service.shutdown().await;
    tracing::info!("otg-glued stopped");
    Ok(())
}

/// Defaults plus command line overrides
fn build_config(args: &CliArgs) -> GlueConfig {
    let mut config = GlueConfig {
        role: args.role.into(),
        ..Default::default()
    };
    config.controller.index = args.controller;
    if let Some(ms) = args.poll_interval {
        config.poll_interval_ms = ms;
    }
    if let Some(ms) = args.a_wait_bcon {
        config.a_wait_bcon_ms = ms;
    }
    if args.no_dma {
        config.dma = None;
    }
    config
}

/// Initialize logging with tracing
fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "otg_glue=error,otg_glued=error",
        LogLevel::Warn => "otg_glue=warn,otg_glued=warn",
        LogLevel::Info => "otg_glue=info,otg_glued=info",
        LogLevel::Verbose => "otg_glue=debug,otg_glued=info",
        LogLevel::Debug => "otg_glue=debug,otg_glued=debug",
        LogLevel::Trace => "otg_glue=trace,otg_glued=trace",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}

/// No USB protocol stack in this daemon; report what it would see
struct LoggingCore;

impl UsbCore for LoggingCore {
    fn interrupt(&mut self, events: &CoreEvents) -> bool {
        tracing::debug!(
            "usb core: tx {:04x} rx {:04x} usb {:03x}",
            events.tx,
            events.rx,
            events.usb
        );
        true
    }

    fn port_mode_changed(&mut self, mode: PortMode) {
        tracing::info!("usb core: port now {:?}", mode);
    }
}

struct LoggingSink;

impl CompletionSink for LoggingSink {
    fn transfer_completed(&mut self, endpoint: u8, direction: Direction) {
        tracing::debug!("dma: ep{} {:?} complete", endpoint, direction);
    }
}

struct LoggingPhy;

impl PhyPower for LoggingPhy {
    fn power_up(&mut self) {
        tracing::info!("phy: power up");
    }

    fn power_down(&mut self) {
        tracing::info!("phy: power down");
    }
}
