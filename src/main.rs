mod alert;
mod cache;
mod cli;
mod display;
mod fetch;
mod lock;
mod runner;
mod schedule;
mod settings_file;
mod state;
mod sync;
mod util;
mod verify;
mod watch;

use anyhow::Context;
use cache::AlertCache;
use chrono::Local;
use cli::{Cli, Command, LogLevel, PrefsAction, ScheduleAction};
use fetch::{Fetcher, Transport, UreqTransport};
use lock::{InstanceLock, LockError};
use rand::Rng;
use runner::{CommandRunner, ProcessRunner};
use schedule::{CronScheduler, Scheduler};
use state::{APP_NAME, Channel, FileStateStore, Preferences, StateStore};
use std::fmt as stdfmt;
use std::io::{IsTerminal, stderr};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use sync::{SyncOutcome, Synchronizer};
use tracing::{Event, Level, Subscriber, debug, error, info};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt as tracing_fmt;
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::fmt::format::{FormatEvent, FormatFields, Writer};
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;
use verify::GpgvVerifier;
use watch::{SleepTicker, run_watch};

const LSB_RELEASE: &str = "/etc/lsb-release";
const SYNC_LOCK: &str = "sync.lock";
const WATCH_LOCK: &str = "watch.lock";

struct AlertExitCode;

impl AlertExitCode {
    /// Exit code used when `show` has no verified alert to print.
    fn no_alert() -> ExitCode {
        ExitCode::from(1)
    }

    /// Exit code used when another process holds the instance lock.
    fn already_running() -> ExitCode {
        ExitCode::from(2)
    }

    /// Exit code used for other errors (I/O errors, invalid settings, etc.).
    fn any_error() -> ExitCode {
        ExitCode::from(255)
    }
}

/// Locations of everything the process reads or writes.
struct Paths {
    system_config: PathBuf,
    user_config: PathBuf,
    cache_dir: PathBuf,
    lsb_release: PathBuf,
}

impl Paths {
    fn resolve(cli: &Cli) -> anyhow::Result<Self> {
        let user_config = match &cli.user_config {
            Some(path) => path.clone(),
            None => FileStateStore::default_user_path()
                .context("Cannot determine the user configuration directory")?,
        };
        let cache_dir = match &cli.cache_dir {
            Some(path) => path.clone(),
            None => dirs::cache_dir()
                .map(|dir| dir.join(APP_NAME))
                .context("Cannot determine the user cache directory")?,
        };

        Ok(Paths {
            system_config: cli
                .system_config
                .clone()
                .unwrap_or_else(FileStateStore::default_system_path),
            user_config,
            cache_dir,
            lsb_release: PathBuf::from(LSB_RELEASE),
        })
    }

    fn store(&self) -> FileStateStore {
        FileStateStore::new(self.system_config.clone(), self.user_config.clone())
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    init_tracing(cli.verbose, cli.log_level);

    let result = Paths::resolve(&cli).and_then(|paths| run(cli.command, &paths));

    match result {
        Ok(exit_code) => exit_code,
        Err(err) => {
            error!("{err:#}");
            if let Some(LockError::AlreadyRunning(_)) = err.downcast_ref::<LockError>() {
                AlertExitCode::already_running()
            } else {
                AlertExitCode::any_error()
            }
        }
    }
}

fn run(command: Command, paths: &Paths) -> anyhow::Result<ExitCode> {
    match command {
        Command::Check {
            channels,
            notify,
            jitter,
        } => handle_check(paths, channels, notify, jitter),
        Command::Watch { notify } => handle_watch(paths, notify),
        Command::Show { channel } => handle_show(paths, channel),
        Command::Schedule { action } => handle_schedule(paths, action),
        Command::Prefs { action } => handle_prefs(paths, action),
    }
}

/// Run one cycle per channel and print every new alert.
fn check_channels<T: Transport>(
    synchronizer: &Synchronizer<'_, T>,
    channels: &[Channel],
    notifier: Option<&dyn CommandRunner>,
) -> usize {
    let mut shown = 0;
    for channel in channels {
        if let SyncOutcome::NewAlert(alert) = synchronizer.check(channel) {
            debug!("Showing alert for channel {}", alert.channel);
            if shown > 0 {
                println!();
            }
            print!("{}", display::render_alert(&alert));
            if let Some(runner) = notifier {
                display::notify_desktop(runner, &alert);
            }
            shown += 1;
        }
    }
    shown
}

fn handle_check(
    paths: &Paths,
    channels: Vec<String>,
    notify: bool,
    jitter: Option<u64>,
) -> anyhow::Result<ExitCode> {
    let cache = AlertCache::open(&paths.cache_dir)?;

    if let Some(max) = jitter
        && max > 0
    {
        let delay = rand::thread_rng().gen_range(0..=max);
        info!("Waiting {}s before checking", delay);
        std::thread::sleep(Duration::from_secs(delay));
    }

    let lock = InstanceLock::acquire(&cache.dir().join(SYNC_LOCK))?;
    debug!("Holding {}", lock.path().display());

    let store = paths.store();
    let preferences = store.preferences()?;
    let verification = store.verification()?;
    let runner = ProcessRunner::default();
    let verifier = GpgvVerifier::new(&runner, verification.gpgv, verification.keyring);
    let fetcher = Fetcher::new(UreqTransport::default());

    let channels: Vec<Channel> = if channels.is_empty() {
        preferences.resolved_channels(&paths.lsb_release)
    } else {
        channels.into_iter().map(Channel::new).collect()
    };
    info!("Checking {} channel(s)", channels.len());

    let synchronizer = Synchronizer::new(
        &store,
        &fetcher,
        &verifier,
        &cache,
        &preferences.server,
    );
    let notifier: Option<&dyn CommandRunner> = if notify { Some(&runner) } else { None };
    let shown = check_channels(&synchronizer, &channels, notifier);

    info!("{} new alert(s)", shown);
    Ok(ExitCode::SUCCESS)
}

fn handle_watch(paths: &Paths, notify: bool) -> anyhow::Result<ExitCode> {
    let cache = AlertCache::open(&paths.cache_dir)?;
    let _watch_lock = InstanceLock::acquire(&cache.dir().join(WATCH_LOCK))?;

    let store = paths.store();
    let verification = store.verification()?;
    let runner = ProcessRunner::default();
    let verifier = GpgvVerifier::new(&runner, verification.gpgv, verification.keyring);
    let fetcher = Fetcher::new(UreqTransport::default());
    let notifier: Option<&dyn CommandRunner> = if notify { Some(&runner) } else { None };

    info!("Watching for alerts");
    run_watch(&mut SleepTicker, None, || {
        let _lock = InstanceLock::acquire(&cache.dir().join(SYNC_LOCK))?;
        let preferences = store.preferences()?;
        let synchronizer = Synchronizer::new(
            &store,
            &fetcher,
            &verifier,
            &cache,
            &preferences.server,
        );
        check_channels(
            &synchronizer,
            &preferences.resolved_channels(&paths.lsb_release),
            notifier,
        );
        Ok(preferences.interval.period())
    });

    Ok(ExitCode::SUCCESS)
}

fn handle_show(paths: &Paths, channel: Option<String>) -> anyhow::Result<ExitCode> {
    let cache = AlertCache::open(&paths.cache_dir)?;
    let _lock = InstanceLock::acquire(&cache.dir().join(SYNC_LOCK))?;

    let store = paths.store();
    let preferences = store.preferences()?;
    let verification = store.verification()?;
    let runner = ProcessRunner::default();
    let verifier = GpgvVerifier::new(&runner, verification.gpgv, verification.keyring);
    let fetcher = Fetcher::new(UreqTransport::default());

    let channels = match channel {
        Some(id) => vec![Channel::new(id)],
        None => preferences.resolved_channels(&paths.lsb_release),
    };

    let synchronizer = Synchronizer::new(
        &store,
        &fetcher,
        &verifier,
        &cache,
        &preferences.server,
    );
    let mut shown = 0;
    for channel in &channels {
        match synchronizer.show_last(channel)? {
            Some(alert) => {
                if shown > 0 {
                    println!();
                }
                print!("{}", display::render_alert_details(&alert, &Local));
                shown += 1;
            }
            None => info!("No verified alert available for channel {}", channel),
        }
    }

    if shown == 0 {
        return Ok(AlertExitCode::no_alert());
    }
    Ok(ExitCode::SUCCESS)
}

fn scheduler(runner: &dyn CommandRunner) -> anyhow::Result<CronScheduler<'_>> {
    let program = std::env::current_exe().context("Cannot locate the alertwatch binary")?;
    let anacron_dir = dirs::data_local_dir()
        .map(|dir| dir.join(APP_NAME).join("anacron"))
        .context("Cannot determine the user data directory")?;
    Ok(CronScheduler::new(runner, program, anacron_dir))
}

fn handle_schedule(paths: &Paths, action: ScheduleAction) -> anyhow::Result<ExitCode> {
    let store = paths.store();
    let current = store.preferences()?;
    let runner = ProcessRunner::default();
    let scheduler = scheduler(&runner)?;

    let updated = match action {
        ScheduleAction::Install { interval } => {
            let interval = interval.unwrap_or(current.interval);
            scheduler.install(interval)?;
            Preferences {
                interval,
                auto_startup: true,
                ..current.clone()
            }
        }
        ScheduleAction::Remove => {
            scheduler.uninstall()?;
            Preferences {
                auto_startup: false,
                ..current.clone()
            }
        }
    };

    if updated != current {
        store.set_preferences(&updated)?;
    }
    Ok(ExitCode::SUCCESS)
}

fn handle_prefs(paths: &Paths, action: PrefsAction) -> anyhow::Result<ExitCode> {
    let store = paths.store();
    let current = store.preferences()?;

    match action {
        PrefsAction::Show => {
            print!("{}", render_preferences(&current, &paths.lsb_release));
        }
        PrefsAction::Set {
            server,
            interval,
            autostart,
        } => {
            let updated = Preferences {
                server: server.unwrap_or_else(|| current.server.clone()),
                interval: interval.unwrap_or(current.interval),
                auto_startup: autostart.unwrap_or(current.auto_startup),
                channels: current.channels.clone(),
            };

            if current.auto_startup != updated.auto_startup
                || (updated.auto_startup && current.interval != updated.interval)
            {
                let runner = ProcessRunner::default();
                schedule::apply_preferences(&scheduler(&runner)?, &current, &updated)?;
            }

            store.set_preferences(&updated)?;
            info!("Preferences saved to {}", store.user_path().display());
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn render_preferences(preferences: &Preferences, lsb_release: &Path) -> String {
    let channels: Vec<String> = preferences
        .resolved_channels(lsb_release)
        .iter()
        .map(Channel::to_string)
        .collect();

    format!(
        "Server: {}\nUpdateInterval: {}\nAutoStartup: {}\nChannels: {}\n",
        if preferences.server.is_empty() {
            "(not set)"
        } else {
            preferences.server.as_str()
        },
        preferences.interval,
        preferences.auto_startup,
        channels.join(", ")
    )
}

fn init_tracing(verbose: u8, log_level: Option<LogLevel>) {
    let stderr_is_terminal = stderr().is_terminal();
    let formatter = EmojiFormatter { stderr_is_terminal };

    // An explicit flag wins over RUST_LOG, RUST_LOG wins over the default.
    let explicit = match (log_level, verbose) {
        (Some(level), _) => Some(level.as_filter()),
        (None, 0) => None,
        (None, 1) => Some("info"),
        (None, _) => Some("debug"),
    };

    let filter = match explicit {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };

    let fmt_layer = tracing_fmt::layer()
        .event_format(formatter)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}

struct EmojiFormatter {
    stderr_is_terminal: bool,
}

impl<S, N> FormatEvent<S, N> for EmojiFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> stdfmt::Result {
        if self.stderr_is_terminal {
            match *event.metadata().level() {
                Level::DEBUG => write!(writer, "🔍 ")?,
                Level::INFO => write!(writer, "ℹ️ ")?,
                Level::WARN => write!(writer, "⚠️  ")?,
                Level::ERROR => write!(writer, "❌️ ")?,
                _ => {}
            }
        } else {
            match *event.metadata().level() {
                Level::DEBUG => writer.write_str("DEBUG: ")?,
                Level::INFO => writer.write_str("INFO: ")?,
                Level::WARN => writer.write_str("WARN: ")?,
                Level::ERROR => writer.write_str("ERROR: ")?,
                _ => {}
            }
        }

        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
