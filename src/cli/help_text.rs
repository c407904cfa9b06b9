pub(super) const ROOT_LONG_ABOUT: &str = "\
Fetch, verify and show signed alert bulletins

alertwatch checks a server for a short signed text bulletin and shows it once
per published version. A bulletin is only shown after its detached signature
has been checked against a locally trusted keyring.

CORE CONCEPTS:

  Channels:
    Each channel is an independently published bulletin, served as
    <server>/alert<ID> with its signature at <server>/alert<ID>.sig.
    When no channel is configured, the installed release (DISTRIB_RELEASE
    in /etc/lsb-release) is used as the channel ID.

  Versions:
    The Last-Modified header of the signature file is the only version
    signal. A version is shown at most once; a version whose signature
    does not verify is discarded and retried from scratch next time.

  Limits:
    Files larger than 4000 bytes are never downloaded, and every network
    request gives up after 5 seconds.

COMMANDS:

  check
    Run one check and exit. New verified alerts are printed on stdout.
    Network and verification failures are logged, never fatal.

  watch
    Keep running and check once per configured interval.

  show
    Re-verify and print the last downloaded alert with its release time
    and signer.

  schedule
    Install or remove unattended checks in the user's crontab.

  prefs
    Show or change the server, check interval and autostart preference.

CONFIGURATION:

  System settings:  /etc/alertwatch.conf
  User settings:    $XDG_CONFIG_HOME/alertwatch/settings.toml
  Cache:            $XDG_CACHE_HOME/alertwatch

  User values override system values key by key. The signature checker
  ([verification] Gpgv and Keyring) is only read from the system file.

EXIT STATUS:

  0    success, including \"no new alert\"
  1    show: no verified alert available
  2    another alertwatch process is already running
  255  any other error

EXAMPLES:

  # Check once, pop up new alerts on the desktop
  $ alertwatch check --notify

  # Check every hour in the background
  $ alertwatch prefs set --interval hourly --autostart true

  # Read the last alert again
  $ alertwatch show
";

pub(super) const CHECK_LONG_ABOUT: &str = "\
Run one check and exit

For each channel, the signature file is requested first. If its Last-Modified
time matches the one recorded for the channel, nothing else happens.
Otherwise the signature is stored, the new time is recorded, and the bulletin
itself is downloaded and verified. A verified bulletin is printed on stdout
(and passed to notify-send with --notify). A bulletin that fails verification
is deleted together with its signature and the recorded time is cleared.

Failures of a single check are logged as warnings and the command still exits
with status 0.

  --jitter SECS
    Sleep a random 0..SECS seconds first. Installed schedules use this to
    spread requests from many machines over time.
";

pub(super) const WATCH_LONG_ABOUT: &str = "\
Check periodically until interrupted

Runs a check immediately, then once per configured update interval. The
preferences are re-read before every round, so interval and server changes
take effect without a restart. Only one watch process may run at a time.
";

pub(super) const SHOW_LONG_ABOUT: &str = "\
Show the last downloaded alert

Without --channel, the last alert of every configured channel is shown in
turn. Each cached bulletin is verified again before it is printed; one that
no longer verifies is deleted and its recorded time is cleared. The command
exits with status 1 when no channel has a verified alert to show.
";

pub(super) const SCHEDULE_LONG_ABOUT: &str = "\
Install or remove unattended checks

Hourly checks are a single crontab line at a random minute, with up to 30
minutes of extra runtime jitter. Daily and weekly checks are driven by a
per-user anacrontab, so a check missed while the machine was off runs at
the next opportunity. Installing always replaces any previous alertwatch
job; other crontab entries are never touched.
";

pub(super) const PREFS_LONG_ABOUT: &str = "\
Show or change preferences

Changes are written to the user settings file. Only values that differ
from the system settings are stored, so unchanged values keep following
system-wide updates.

Enabling --autostart installs the schedule for the current interval and
disabling it removes the schedule. Changing --interval while autostart is
enabled replaces the installed schedule.
";
