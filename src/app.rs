//! Command loop standing in for the menu bar / preferences UI.
//!
//! Each line on stdin is one command. Commands that change preferences save
//! them and then re-apply them to the controller, which is the same path a
//! preferences window would take.

use anyhow::{anyhow, bail, Context, Result};
use ka_master::{ConfigError, Controller, PlaybackMode, Settings, SettingsStore};
use std::io::{self, BufRead, Write};
use std::str::FromStr;
use tracing::{debug, error};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Start,
    Stop,
    Status,
    Reload,
    Mode(PlaybackMode),
    /// Raw minutes; checked against the allowed set when applied.
    Interval(u32),
    Reset,
    Pulse,
    Help,
    Quit,
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let name = words.next().ok_or_else(|| anyhow!("empty command"))?;
        let arg = words.next();

        let command = match (name.to_ascii_lowercase().as_str(), arg) {
            ("start", None) => Command::Start,
            ("stop", None) => Command::Stop,
            ("status", None) => Command::Status,
            ("reload", None) => Command::Reload,
            ("reset", None) => Command::Reset,
            ("pulse", None) => Command::Pulse,
            ("help", None) | ("?", None) => Command::Help,
            ("quit", None) | ("exit", None) => Command::Quit,
            ("mode", Some(mode)) => Command::Mode(mode.parse()?),
            ("interval", Some(minutes)) => Command::Interval(
                minutes
                    .parse()
                    .map_err(|_| ConfigError::InvalidNumber(minutes.to_string()))?,
            ),
            ("mode", None) | ("interval", None) => bail!("'{}' needs a value", name),
            _ => bail!("unknown command '{}' (try 'help')", line.trim()),
        };
        if words.next().is_some() {
            bail!("too many arguments for '{}'", name);
        }
        Ok(command)
    }
}

const HELP: &str = "\
commands:
  start                 start with the saved settings
  stop                  stop all output
  status                show mode, interval and engine state
  reload                re-read the settings file and apply it
  mode <continuous|interval>
  interval <5|10|15|20|25|30>
  reset                 restore default settings
  pulse                 emit one interval pulse now
  quit";

pub struct KeepaliveApp {
    controller: Controller,
    store: SettingsStore,
}

impl KeepaliveApp {
    pub fn new(controller: Controller, store: SettingsStore) -> Self {
        Self { controller, store }
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    /// Read commands until `quit` or end of input.
    pub fn run(&mut self, input: impl BufRead, mut out: impl Write) -> io::Result<()> {
        for line in input.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let command = match line.parse::<Command>() {
                Ok(command) => command,
                Err(err) => {
                    writeln!(out, "error: {:#}", err)?;
                    continue;
                }
            };
            debug!(?command, "command received");
            if command == Command::Quit {
                break;
            }
            match self.execute(command) {
                Ok(reply) => writeln!(out, "{}", reply)?,
                Err(err) => {
                    error!("{:#}", err);
                    writeln!(out, "error: {:#}", err)?;
                }
            }
        }
        self.controller.stop();
        Ok(())
    }

    pub fn execute(&mut self, command: Command) -> Result<String> {
        match command {
            Command::Start => {
                self.controller.start()?;
                Ok(self.status())
            }
            Command::Stop => {
                self.controller.stop();
                Ok(self.status())
            }
            Command::Status => Ok(self.status()),
            Command::Reload => {
                let settings = self
                    .store
                    .load()
                    .with_context(|| format!("reading {}", self.store.path().display()))?;
                self.preferences_changed(settings)
            }
            Command::Mode(mode) => {
                let settings = Settings {
                    mode,
                    ..*self.controller.settings()
                };
                self.save_and_apply(settings)
            }
            Command::Interval(minutes) => {
                let settings = self.controller.settings().with_interval_minutes(minutes)?;
                self.save_and_apply(settings)
            }
            Command::Reset => {
                let settings = self.store.reset()?;
                self.preferences_changed(settings)
            }
            Command::Pulse => Ok(format!("{:?}", self.controller.trigger_pulse())),
            Command::Help => Ok(HELP.to_string()),
            Command::Quit => Ok(String::new()),
        }
    }

    fn save_and_apply(&mut self, settings: Settings) -> Result<String> {
        self.store
            .save(&settings)
            .with_context(|| format!("writing {}", self.store.path().display()))?;
        self.preferences_changed(settings)
    }

    fn preferences_changed(&mut self, settings: Settings) -> Result<String> {
        self.controller.apply_settings(&settings)?;
        Ok(self.status())
    }

    pub fn status(&self) -> String {
        let settings = self.controller.settings();
        let pulses = self.controller.pulse_stats();
        format!(
            "mode: {} | interval: {} | engine: {} | scheduler: {} | pulses: {} (skipped {}, failed {})",
            settings.mode,
            settings.interval_minutes,
            self.controller.engine_state(),
            self.controller.scheduling_state(),
            pulses.pulses,
            pulses.skipped,
            pulses.failed,
        )
    }
}
