use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::Level;

use easyto_hotplug::backoff::ThreadSleeper;
use easyto_hotplug::constants::{
    ENV_TZ, ENV_TZ_DEFAULT, FILE_CONFIG, HOTPLUG_DESCRIPTION, HOTPLUG_NAME,
};
use easyto_hotplug::error::Result;
use easyto_hotplug::hotplug::{Status, handle_event, load_settings};
use easyto_hotplug::logger::{init_logger, level_for, set_log_level};
use easyto_hotplug::reporting::{ReportEventStack, ReportResult};
use easyto_hotplug::source::{self, Source};
use easyto_hotplug::uevent::{Action, DeviceEvent, Subsystem};

#[derive(Parser)]
#[command(name = HOTPLUG_NAME)]
#[command(about = HOTPLUG_DESCRIPTION, long_about = None)]
#[command(version)]
struct Cli {
    /// Sysfs path of the device, as in udev's DEVPATH.
    #[arg(short, long)]
    devpath: String,

    /// Device identifier, used when no hardware address can be read.
    #[arg(short, long = "id")]
    id: String,

    #[arg(short, long)]
    subsystem: Subsystem,

    #[arg(short, long = "udevaction")]
    udevaction: Action,

    #[arg(long)]
    debug: bool,

    #[arg(short, long, default_value = FILE_CONFIG)]
    config: PathBuf,
}

fn run(cli: &Cli) -> Result<Status> {
    let settings = load_settings(cli.subsystem, &cli.config)?;
    if settings.debug {
        set_log_level(Level::Debug);
    }
    let event = DeviceEvent {
        device_path: cli.devpath.clone(),
        device_id: cli.id.clone(),
        subsystem: cli.subsystem,
        action: cli.udevaction,
    };

    let mut events = ReportEventStack::new(
        HOTPLUG_NAME,
        &format!("{} {} {}", event.subsystem, event.action, event.device_path),
        settings.events_file.clone(),
    );
    events.start();
    let result = handle_event(
        &event,
        &settings,
        |s| source::fetch(s).map(|ds| Box::new(ds) as Box<dyn Source>),
        &mut ThreadSleeper,
    );
    match &result {
        Ok(Status::Unsupported) => events.set_result(
            ReportResult::Warn,
            &format!("no handler for subsystem {}", event.subsystem),
        ),
        Ok(Status::Skipped) => events.set_result(ReportResult::Success, "skipped by policy"),
        Ok(Status::Reconciled { .. }) => (),
        Err(e) => events.set_result(ReportResult::Fail, &e.to_string()),
    }
    events.finish();
    result
}

fn main() -> ExitCode {
    if env::var_os(ENV_TZ).is_none() {
        // SAFETY: no other threads have been started yet.
        unsafe { env::set_var(ENV_TZ, ENV_TZ_DEFAULT) };
    }

    let cli = Cli::parse();
    if let Err(e) = init_logger(level_for(cli.debug)) {
        // Use eprintln! here since the logger did not initialize.
        eprintln!("{}: unable to initialize logger: {}", HOTPLUG_NAME, e);
    }

    match run(&cli) {
        Ok(status) => ExitCode::from(status.exit_code()),
        Err(e) => {
            eprintln!("{}: {}", HOTPLUG_NAME, e);
            ExitCode::from(e.exit_code())
        }
    }
}
