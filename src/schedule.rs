//! Unattended checks through the user's crontab.
//!
//! Every line this module writes carries [`JOB_MARKER`]; lines without it
//! are never touched. Hourly checks are a plain cron line. Daily and weekly
//! checks go through a per-user anacrontab, driven by an hourly cron line,
//! so a check missed while the machine was off runs at the next
//! opportunity.

use crate::runner::{CommandRunner, CommandSpec, RunError};
use crate::state::{CheckInterval, Preferences};
use crate::util::atomic_write::{AtomicWriteError, write_atomically};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cell::RefCell;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const JOB_MARKER: &str = "# alertwatch-job";

/// Upper bound of the runtime jitter passed to hourly checks.
pub const HOURLY_JITTER_SECS: u64 = 1800;

/// Upper bound of anacron's start delay, in minutes.
const MAX_ANACRON_DELAY_MINUTES: u32 = 30;

const DEFAULT_CRONTAB: &str = "crontab";
/// What `crontab -l` reports for a user without a crontab.
const NO_CRONTAB: &str = "no crontab for";
const DEFAULT_ANACRON: &str = "/usr/sbin/anacron";

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error(transparent)]
    Run(#[from] RunError),
    #[error("crontab rejected the new job list (exit code {exit_code}): {output}")]
    Crontab { exit_code: i32, output: String },
    #[error("Cannot list the current crontab (exit code {exit_code}): {output}")]
    ListCrontab { exit_code: i32, output: String },
    #[error("Cannot write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Anacrontab(#[from] AtomicWriteError),
}

pub trait Scheduler {
    /// Replace any job installed by us with one for `interval`.
    fn install(&self, interval: CheckInterval) -> Result<(), ScheduleError>;

    /// Remove every job installed by us.
    fn uninstall(&self) -> Result<(), ScheduleError>;
}

pub struct CronScheduler<'a> {
    runner: &'a dyn CommandRunner,
    crontab: PathBuf,
    anacron: PathBuf,
    /// Binary invoked by the installed jobs.
    program: PathBuf,
    /// Holds the anacrontab and anacron's timestamp spool.
    anacron_dir: PathBuf,
    rng: RefCell<StdRng>,
}

impl<'a> CronScheduler<'a> {
    pub fn new(runner: &'a dyn CommandRunner, program: PathBuf, anacron_dir: PathBuf) -> Self {
        CronScheduler {
            runner,
            crontab: PathBuf::from(DEFAULT_CRONTAB),
            anacron: PathBuf::from(DEFAULT_ANACRON),
            program,
            anacron_dir,
            rng: RefCell::new(StdRng::from_entropy()),
        }
    }

    /// Use a fixed random source.
    #[cfg(test)]
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = RefCell::new(rng);
        self
    }

    pub fn anacrontab_path(&self) -> PathBuf {
        self.anacron_dir.join("anacrontab")
    }

    fn spool_dir(&self) -> PathBuf {
        self.anacron_dir.join("spool")
    }

    fn read_crontab(&self) -> Result<Vec<String>, ScheduleError> {
        let output = self
            .runner
            .run(&CommandSpec::new(&self.crontab).arg("-l"))?;
        if !output.success() {
            // Only a missing table counts as empty.
            let message = output.text();
            if message.contains(NO_CRONTAB) {
                debug!("No existing crontab");
                return Ok(Vec::new());
            }
            return Err(ScheduleError::ListCrontab {
                exit_code: output.exit_code,
                output: message.trim().to_string(),
            });
        }
        // Warnings on stderr are not part of the table.
        Ok(output.stdout_text().lines().map(str::to_string).collect())
    }

    fn write_crontab(&self, lines: &[String]) -> Result<(), ScheduleError> {
        let mut content = lines.join("\n");
        if !content.is_empty() {
            content.push('\n');
        }

        let output = self
            .runner
            .run(&CommandSpec::new(&self.crontab).arg("-").stdin(content))?;
        if !output.success() {
            return Err(ScheduleError::Crontab {
                exit_code: output.exit_code,
                output: output.text().trim().to_string(),
            });
        }
        Ok(())
    }

    /// Current crontab without our lines, and whether any were removed.
    fn foreign_lines(&self) -> Result<(Vec<String>, bool), ScheduleError> {
        let lines = self.read_crontab()?;
        let before = lines.len();
        let kept: Vec<String> = lines
            .into_iter()
            .filter(|line| !line.contains(JOB_MARKER))
            .collect();
        let removed = kept.len() != before;
        Ok((kept, removed))
    }

    fn random_minute(&self) -> u32 {
        self.rng.borrow_mut().gen_range(0..60)
    }

    fn check_command(&self, jitter: Option<u64>) -> String {
        let mut command = format!("{} check --notify", shell_quote(&self.program));
        if let Some(secs) = jitter {
            command.push_str(&format!(" --jitter {secs}"));
        }
        command
    }

    fn hourly_line(&self) -> String {
        format!(
            "{} * * * * {} {}",
            self.random_minute(),
            self.check_command(Some(HOURLY_JITTER_SECS)),
            JOB_MARKER
        )
    }

    fn write_anacrontab(&self, interval: CheckInterval) -> Result<String, ScheduleError> {
        let (period, job_id) = match interval {
            CheckInterval::Weekly => (7, "alertwatch.weekly"),
            _ => (1, "alertwatch.daily"),
        };
        let delay = self
            .rng
            .borrow_mut()
            .gen_range(0..=MAX_ANACRON_DELAY_MINUTES);

        let spool = self.spool_dir();
        std::fs::create_dir_all(&spool).map_err(|source| ScheduleError::Io {
            path: spool.clone(),
            source,
        })?;

        let table = self.anacrontab_path();
        let content = format!(
            "SHELL=/bin/sh\nPATH=/usr/local/bin:/usr/bin:/bin\n\n{period} {delay} {job_id} {}\n",
            self.check_command(None)
        );
        write_atomically(&table, content.as_bytes())?;
        debug!("Wrote {} ({})", table.display(), job_id);

        Ok(format!(
            "{} * * * * {} -s -t {} -S {} {}",
            self.random_minute(),
            shell_quote(&self.anacron),
            shell_quote(&table),
            shell_quote(&spool),
            JOB_MARKER
        ))
    }

    fn remove_anacrontab(&self) -> Result<(), ScheduleError> {
        let table = self.anacrontab_path();
        match std::fs::remove_file(&table) {
            Ok(()) => {
                debug!("Removed {}", table.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(ScheduleError::Io {
                path: table,
                source,
            }),
        }
    }
}

impl Scheduler for CronScheduler<'_> {
    fn install(&self, interval: CheckInterval) -> Result<(), ScheduleError> {
        let (mut lines, _) = self.foreign_lines()?;

        let job = match interval {
            CheckInterval::Hourly => {
                self.remove_anacrontab()?;
                self.hourly_line()
            }
            CheckInterval::Daily | CheckInterval::Weekly => self.write_anacrontab(interval)?,
        };
        lines.push(job);

        self.write_crontab(&lines)?;
        info!("Installed {} check schedule", interval);
        Ok(())
    }

    fn uninstall(&self) -> Result<(), ScheduleError> {
        let (lines, removed) = self.foreign_lines()?;
        if removed {
            self.write_crontab(&lines)?;
        }
        self.remove_anacrontab()?;
        info!("Removed check schedule");
        Ok(())
    }
}

/// Bring the installed schedule in line with a preference change.
///
/// Enabling autostart installs the schedule and disabling it removes it.
/// While autostart stays on, a changed interval replaces the job.
pub fn apply_preferences(
    scheduler: &dyn Scheduler,
    old: &Preferences,
    new: &Preferences,
) -> Result<(), ScheduleError> {
    match (old.auto_startup, new.auto_startup) {
        (false, true) => scheduler.install(new.interval),
        (true, false) => scheduler.uninstall(),
        (true, true) if old.interval != new.interval => scheduler.install(new.interval),
        _ => Ok(()),
    }
}

fn shell_quote(path: &Path) -> String {
    let text = path.display().to_string();
    if !text.is_empty()
        && text
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-+".contains(c))
    {
        text
    } else {
        format!("'{}'", text.replace('\'', r"'\''"))
    }
}
