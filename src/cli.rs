mod help_text;

use crate::state::CheckInterval;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Fetch, verify and show signed alert bulletins
#[derive(Parser, Debug)]
#[command(name = "alertwatch", version, about, long_about = help_text::ROOT_LONG_ABOUT)]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true, conflicts_with = "log_level")]
    pub verbose: u8,

    /// Set the log level explicitly
    #[arg(long, value_enum, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevel>,

    /// System-wide settings file
    #[arg(long, value_name = "PATH", global = true)]
    pub system_config: Option<PathBuf>,

    /// Per-user settings file
    #[arg(long, value_name = "PATH", global = true)]
    pub user_config: Option<PathBuf>,

    /// Directory holding downloaded alerts and lock files
    #[arg(long, value_name = "DIR", global = true)]
    pub cache_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one check and exit
    #[command(long_about = help_text::CHECK_LONG_ABOUT)]
    Check {
        /// Channel to check (repeatable); defaults to the configured channels
        #[arg(long = "channel", value_name = "ID")]
        channels: Vec<String>,

        /// Also pop new alerts up on the desktop
        #[arg(long)]
        notify: bool,

        /// Sleep a random 0..SECS seconds before checking
        #[arg(long, value_name = "SECS")]
        jitter: Option<u64>,
    },

    /// Check periodically until interrupted
    #[command(long_about = help_text::WATCH_LONG_ABOUT)]
    Watch {
        /// Also pop new alerts up on the desktop
        #[arg(long)]
        notify: bool,
    },

    /// Show the last downloaded alert
    #[command(long_about = help_text::SHOW_LONG_ABOUT)]
    Show {
        /// Channel to show; defaults to every configured channel
        #[arg(long, value_name = "ID")]
        channel: Option<String>,
    },

    /// Install or remove unattended checks
    #[command(long_about = help_text::SCHEDULE_LONG_ABOUT)]
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },

    /// Show or change preferences
    #[command(long_about = help_text::PREFS_LONG_ABOUT)]
    Prefs {
        #[command(subcommand)]
        action: PrefsAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ScheduleAction {
    /// Install the schedule, replacing any previous one
    Install {
        /// Hourly, Daily or Weekly; defaults to the configured interval
        #[arg(long, value_name = "INTERVAL")]
        interval: Option<CheckInterval>,
    },
    /// Remove the schedule
    Remove,
}

#[derive(Subcommand, Debug)]
pub enum PrefsAction {
    /// Print the effective preferences
    Show,
    /// Change preferences
    Set {
        /// Base URL of the alert server
        #[arg(long, value_name = "URL")]
        server: Option<String>,

        /// Hourly, Daily or Weekly
        #[arg(long, value_name = "INTERVAL")]
        interval: Option<CheckInterval>,

        /// Check automatically in the background
        #[arg(long, value_name = "BOOL", action = ArgAction::Set)]
        autostart: Option<bool>,
    },
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}
