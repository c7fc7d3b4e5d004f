//! # Registry: the name-keyed collection of live commands.
//!
//! The registry owns every [`Command`] via shared single-threaded handles
//! (`Rc<RefCell<_>>` — all mutation happens on the dispatcher thread) and
//! answers the queries the control surfaces need: sorted names, long
//! listings, and the *slowest* command whose write delay paces reads from
//! the broadcast terminal.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;

use crate::command::Command;
use crate::error::SetupError;

/// Shared handle to a command; cloned into dispatcher bindings.
pub(crate) type CommandRef = Rc<RefCell<Command>>;

/// One row of the long listing exposed to status surfaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandListing {
    /// Unique command name.
    pub name: String,
    /// Published client terminal path, if any.
    pub link: Option<PathBuf>,
    /// Pid of the running process, if any.
    pub pid: Option<i32>,
    /// The shell command line.
    pub command_line: String,
    /// Times the command has been restarted.
    pub restarts: u32,
    /// Exit status of the most recent termination, if any.
    pub last_exit: Option<i32>,
}

/// Name-keyed collection of live commands.
#[derive(Default)]
pub(crate) struct Registry {
    commands: HashMap<String, CommandRef>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Inserts a command under its unique name.
    pub(crate) fn insert(&mut self, command: Command) -> Result<CommandRef, SetupError> {
        let name = command.name.clone();
        if self.commands.contains_key(&name) {
            return Err(SetupError::DuplicateName { name });
        }
        let handle: CommandRef = Rc::new(RefCell::new(command));
        self.commands.insert(name, Rc::clone(&handle));
        Ok(handle)
    }

    /// Removes and returns the command with the given name.
    pub(crate) fn remove(&mut self, name: &str) -> Option<CommandRef> {
        self.commands.remove(name)
    }

    pub(crate) fn get(&self, name: &str) -> Option<CommandRef> {
        self.commands.get(name).map(Rc::clone)
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Snapshot of all command handles (stable while handlers iterate and
    /// mutate the registry).
    pub(crate) fn handles(&self) -> Vec<CommandRef> {
        self.commands.values().map(Rc::clone).collect()
    }

    /// Returns sorted command names.
    pub(crate) fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.commands.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Long listing for the status surface, sorted by name.
    pub(crate) fn listings(&self) -> Vec<CommandListing> {
        let mut rows: Vec<CommandListing> = self
            .commands
            .values()
            .map(|handle| {
                let cmd = handle.borrow();
                CommandListing {
                    name: cmd.name.clone(),
                    link: cmd.client.link().map(Into::into),
                    pid: cmd.pid(),
                    command_line: cmd.command_line.clone(),
                    restarts: cmd.restarts,
                    last_exit: cmd.exit_status,
                }
            })
            .collect();
        rows.sort_unstable_by(|a, b| a.name.cmp(&b.name));
        rows
    }

    /// The command with the largest write delay; its last-write timestamp
    /// paces reads from the broadcast terminal.
    pub(crate) fn slowest(&self) -> Option<CommandRef> {
        self.commands
            .values()
            .max_by_key(|handle| handle.borrow().delay)
            .map(Rc::clone)
    }
}
