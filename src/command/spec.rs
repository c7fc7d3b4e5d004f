//! # Command specification.
//!
//! Defines [`CommandSpec`], the configuration bundle describing one command
//! to supervise: its unique name, the published link for its client
//! terminal, an optional output log, the inter-byte write delay, the shell
//! command line, and per-command overrides (stop string, restart opt-out).
//!
//! A spec can be created:
//! - **Explicitly** with [`CommandSpec::new`] plus `with_*` builders
//! - **From text** with [`CommandSpec::parse`], using the
//!   `name,link,log,delay,cmdline` form consumed by the CLI
//!
//! In the text form, an empty link defaults to the name, an empty log means
//! no log, and an empty delay inherits the global default. The command line
//! is everything after the fourth comma, unsplit, so command lines containing
//! commas (e.g. `socat` addresses) survive intact.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::SpecError;

/// Specification for a supervised command.
#[derive(Clone, Debug)]
pub struct CommandSpec {
    name: String,
    link: Option<PathBuf>,
    log: Option<PathBuf>,
    delay: Option<Duration>,
    command_line: String,
    stop_string: Option<String>,
    restart: bool,
}

impl CommandSpec {
    /// Creates a specification with just a name and a command line.
    ///
    /// The published link defaults to the name, no log is written, the
    /// write delay inherits the global default, and restart is enabled.
    pub fn new(name: impl Into<String>, command_line: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            link: None,
            log: None,
            delay: None,
            command_line: command_line.into(),
            stop_string: None,
            restart: true,
        }
    }

    /// Parses the `name,link,log,delay,cmdline` form.
    ///
    /// # Example
    /// ```
    /// use ptyherd::CommandSpec;
    /// use std::time::Duration;
    ///
    /// let spec = CommandSpec::parse("a,,out.log,0.5,while :; do echo hi; done").unwrap();
    /// assert_eq!(spec.name(), "a");
    /// assert_eq!(spec.link_or_name().to_str(), Some("a"));
    /// assert_eq!(spec.delay(), Some(Duration::from_millis(500)));
    /// ```
    pub fn parse(text: &str) -> Result<Self, SpecError> {
        let mut fields = text.splitn(5, ',');

        let name = fields.next().unwrap_or_default();
        if name.is_empty() {
            return Err(SpecError::EmptyName);
        }
        let link = fields
            .next()
            .ok_or(SpecError::MissingField { field: "link" })?;
        let log = fields
            .next()
            .ok_or(SpecError::MissingField { field: "log" })?;
        let delay = fields
            .next()
            .ok_or(SpecError::MissingField { field: "delay" })?;
        let command_line = fields
            .next()
            .ok_or(SpecError::MissingField { field: "cmdline" })?;
        if command_line.is_empty() {
            return Err(SpecError::EmptyCommandLine);
        }

        let delay = if delay.is_empty() {
            None
        } else {
            let secs: f64 = delay.parse().map_err(|_| SpecError::BadDelay {
                value: delay.to_string(),
            })?;
            Some(
                Duration::try_from_secs_f64(secs).map_err(|_| SpecError::BadDelay {
                    value: delay.to_string(),
                })?,
            )
        };

        Ok(Self {
            name: name.to_string(),
            link: (!link.is_empty()).then(|| PathBuf::from(link)),
            log: (!log.is_empty()).then(|| PathBuf::from(log)),
            delay,
            command_line: command_line.to_string(),
            stop_string: None,
            restart: true,
        })
    }

    /// Returns the command name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the shell command line.
    pub fn command_line(&self) -> &str {
        &self.command_line
    }

    /// Returns the published link, defaulting to the command name.
    pub fn link_or_name(&self) -> PathBuf {
        self.link
            .clone()
            .unwrap_or_else(|| PathBuf::from(&self.name))
    }

    /// Returns the log path, if any.
    pub fn log(&self) -> Option<&PathBuf> {
        self.log.as_ref()
    }

    /// Returns the inter-byte write delay, if set.
    pub fn delay(&self) -> Option<Duration> {
        self.delay
    }

    /// Returns the per-command stop string, if set.
    pub fn stop_string(&self) -> Option<&str> {
        self.stop_string.as_deref()
    }

    /// Returns whether this command restarts on exit.
    pub fn restart(&self) -> bool {
        self.restart
    }

    /// Returns a new spec with the published link replaced.
    pub fn with_link(mut self, link: impl Into<PathBuf>) -> Self {
        self.link = Some(link.into());
        self
    }

    /// Returns a new spec with an output log path.
    pub fn with_log(mut self, log: impl Into<PathBuf>) -> Self {
        self.log = Some(log.into());
        self
    }

    /// Returns a new spec with the inter-byte write delay set.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Returns a new spec with a per-command stop string.
    pub fn with_stop_string(mut self, stop: impl Into<String>) -> Self {
        self.stop_string = Some(stop.into());
        self
    }

    /// Returns a new spec with restart-on-exit enabled or disabled.
    pub fn with_restart(mut self, restart: bool) -> Self {
        self.restart = restart;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_spec() {
        let spec = CommandSpec::parse("web,webtty,web.log,0.25,python -m http.server").unwrap();
        assert_eq!(spec.name(), "web");
        assert_eq!(spec.link_or_name(), PathBuf::from("webtty"));
        assert_eq!(spec.log(), Some(&PathBuf::from("web.log")));
        assert_eq!(spec.delay(), Some(Duration::from_millis(250)));
        assert_eq!(spec.command_line(), "python -m http.server");
    }

    #[test]
    fn test_parse_empty_fields_use_defaults() {
        let spec = CommandSpec::parse("a,,,,cat").unwrap();
        assert_eq!(spec.name(), "a");
        assert_eq!(spec.link_or_name(), PathBuf::from("a"));
        assert_eq!(spec.log(), None);
        assert_eq!(spec.delay(), None);
        assert_eq!(spec.command_line(), "cat");
    }

    #[test]
    fn test_parse_command_line_keeps_embedded_commas() {
        let spec = CommandSpec::parse("s,,,,socat TCP:host:1234,retry=5 -").unwrap();
        assert_eq!(spec.command_line(), "socat TCP:host:1234,retry=5 -");
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert_eq!(
            CommandSpec::parse(",,,,cat").unwrap_err(),
            SpecError::EmptyName
        );
        assert_eq!(
            CommandSpec::parse("a,,,,").unwrap_err(),
            SpecError::EmptyCommandLine
        );
        assert_eq!(
            CommandSpec::parse("a,b").unwrap_err(),
            SpecError::MissingField { field: "log" }
        );
        assert!(matches!(
            CommandSpec::parse("a,,,zzz,cat"),
            Err(SpecError::BadDelay { .. })
        ));
        assert!(matches!(
            CommandSpec::parse("a,,,-1,cat"),
            Err(SpecError::BadDelay { .. })
        ));
    }
}
