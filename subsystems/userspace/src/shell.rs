//! # lkuser Shell
//!
//! Operator commands for loading and running user programs from the kernel
//! console.
//!
//! ```text
//! lkuser load <path>        bind an image from a file
//! lkuser load -b <device>   bind an image from a raw block device
//! lkuser run [&]            start it, waiting for the exit code unless `&`
//! lkuser test               mount the test filesystem, load and run
//! ```
//!
//! `load` keeps one pending process between commands; `run` consumes it.

use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt::{self, Write};
use core::sync::atomic::Ordering;
use spin::Mutex;

use helix_execution::Process;
use helix_hal::console::ConsoleWriter;

use crate::loader::{self, ImageSource};
use crate::userland::Userland;
use crate::STATS;

/// ANSI color codes
pub mod colors {
    /// Reset attributes
    pub const RESET: &str = "\x1b[0m";
    /// Red foreground
    pub const RED: &str = "\x1b[31m";
    /// Green foreground
    pub const GREEN: &str = "\x1b[32m";
    /// Bold
    pub const BOLD: &str = "\x1b[1m";
}

/// Command result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    /// Success with optional output
    Success(Option<String>),
    /// Error with message
    Error(String),
    /// Continue (no output)
    Continue,
}

impl CommandResult {
    /// Create success result
    pub fn ok() -> Self {
        CommandResult::Success(None)
    }

    /// Create success with output
    pub fn output(msg: impl Into<String>) -> Self {
        CommandResult::Success(Some(msg.into()))
    }

    /// Create error result
    pub fn error(msg: impl Into<String>) -> Self {
        CommandResult::Error(msg.into())
    }

    /// Did the command fail
    pub fn is_error(&self) -> bool {
        matches!(self, CommandResult::Error(_))
    }
}

/// Shell command trait
pub trait ShellCommand: Send + Sync {
    /// Command name
    fn name(&self) -> &str;

    /// Short description
    fn description(&self) -> &str;

    /// Detailed help
    fn help(&self) -> &str {
        self.description()
    }

    /// Execute the command
    fn execute(&self, args: &[&str], shell: &Shell) -> CommandResult;
}

/// Built-in help command
struct HelpCommand;

impl ShellCommand for HelpCommand {
    fn name(&self) -> &str { "help" }
    fn description(&self) -> &str { "Display help information" }
    fn help(&self) -> &str {
        "Usage: help [command]\n\n\
         Display help for all commands or a specific command."
    }

    fn execute(&self, args: &[&str], shell: &Shell) -> CommandResult {
        let mut output = String::new();

        if let Some(cmd_name) = args.first() {
            let Some(cmd) = shell.find_command(cmd_name) else {
                return CommandResult::error(format!("Unknown command: {}", cmd_name));
            };
            writeln!(output, "{}{}{}  - {}", colors::BOLD, cmd.name(), colors::RESET, cmd.description()).ok();
            writeln!(output, "\n{}", cmd.help()).ok();
        } else {
            for cmd in shell.commands.lock().iter() {
                writeln!(output, "  {}{:12}{}  {}", colors::GREEN, cmd.name(), colors::RESET, cmd.description()).ok();
            }
        }

        CommandResult::output(output)
    }
}

/// Stats command
struct StatsCommand;

impl ShellCommand for StatsCommand {
    fn name(&self) -> &str { "stats" }
    fn description(&self) -> &str { "Display userspace statistics" }

    fn execute(&self, _args: &[&str], shell: &Shell) -> CommandResult {
        let mut output = String::new();
        writeln!(output, "  Programs Loaded:   {}", STATS.programs_loaded.load(Ordering::Relaxed)).ok();
        writeln!(output, "  Processes Spawned: {}", STATS.processes_spawned.load(Ordering::Relaxed)).ok();
        writeln!(output, "  Processes Reaped:  {}", shell.userland.runtime().reaped()).ok();
        writeln!(output, "  Live Processes:    {}", shell.userland.runtime().registry().count()).ok();
        writeln!(output, "  Syscalls Made:     {}", STATS.syscalls_made.load(Ordering::Relaxed)).ok();
        writeln!(output, "  Commands Executed: {}", STATS.commands_executed.load(Ordering::Relaxed)).ok();
        writeln!(output, "  Syscall Counts:    {:?}", shell.userland.syscalls()).ok();

        CommandResult::output(output)
    }
}

const LKUSER_USAGE: &str = "Usage: lkuser load <path to binary>\n       \
                            lkuser load -b <block device>\n       \
                            lkuser run [&]\n       \
                            lkuser test";

/// `lkuser` command
struct LkuserCommand;

impl LkuserCommand {
    fn load(&self, args: &[&str], shell: &Shell) -> CommandResult {
        let source = match args {
            ["-b", device] => ImageSource::Device(device),
            [path] => ImageSource::Path(path),
            _ => return CommandResult::error(format!("not enough arguments\n{}", LKUSER_USAGE)),
        };

        let process = {
            let mut pending = shell.pending.lock();
            match &*pending {
                Some(process) => process.clone(),
                None => match shell.userland.create_process("lkuser") {
                    Ok(process) => pending.insert(process).clone(),
                    Err(err) => return CommandResult::error(format!("creating process failed: {}", err)),
                },
            }
        };

        match loader::load(&shell.userland, &process, source) {
            Ok(entry) => CommandResult::output(format!("loaded, entry at {:#x}", entry)),
            Err(err) => CommandResult::error(format!("load returns {}", err)),
        }
    }

    fn run(&self, args: &[&str], shell: &Shell) -> CommandResult {
        let Some(process) = shell.pending.lock().take() else {
            return CommandResult::error("no loaded binary");
        };
        let wait = args.first() != Some(&"&");

        match loader::start_binary(&process, wait) {
            Ok(Some(code)) => CommandResult::output(format!("process {} exited with {}", process.id(), code)),
            Ok(None) => CommandResult::output(format!("process {} running", process.id())),
            Err(err) => {
                loader::discard(&process, err);
                CommandResult::error(format!("start returns {}", err))
            }
        }
    }

    fn test(&self, shell: &Shell) -> CommandResult {
        let config = shell.userland.config();
        if let Err(err) = shell
            .userland
            .fs()
            .mount(&config.test_mount_point, &config.test_fs_type, &config.boot_device)
        {
            return CommandResult::error(format!("fs mount returns {}", err));
        }

        let load = shell.execute_line(&format!("lkuser load {}", config.test_binary));
        if load.is_error() {
            return load;
        }
        shell.execute_line("lkuser run")
    }
}

impl ShellCommand for LkuserCommand {
    fn name(&self) -> &str { "lkuser" }
    fn description(&self) -> &str { "user space routines" }
    fn help(&self) -> &str { LKUSER_USAGE }

    fn execute(&self, args: &[&str], shell: &Shell) -> CommandResult {
        match args {
            [] => CommandResult::error(format!("not enough arguments\n{}", LKUSER_USAGE)),
            ["load", rest @ ..] => self.load(rest, shell),
            ["run", rest @ ..] => self.run(rest, shell),
            ["test", ..] => self.test(shell),
            _ => CommandResult::error(format!("unrecognized subcommand\n{}", LKUSER_USAGE)),
        }
    }
}

/// The lkuser shell
pub struct Shell {
    userland: Arc<Userland>,
    /// Registered commands
    commands: Mutex<Vec<Arc<dyn ShellCommand>>>,
    /// Process bound by `lkuser load`, waiting for `lkuser run`
    pending: Mutex<Option<Arc<Process>>>,
}

impl Shell {
    /// Create a shell with the built-in commands
    pub fn new(userland: Arc<Userland>) -> Self {
        let shell = Self {
            userland,
            commands: Mutex::new(Vec::new()),
            pending: Mutex::new(None),
        };

        shell.register(Arc::new(HelpCommand));
        shell.register(Arc::new(StatsCommand));
        shell.register(Arc::new(LkuserCommand));
        shell
    }

    /// Add a command
    pub fn register(&self, command: Arc<dyn ShellCommand>) {
        self.commands.lock().push(command);
    }

    /// Find a command by name
    pub fn find_command(&self, name: &str) -> Option<Arc<dyn ShellCommand>> {
        self.commands.lock().iter().find(|cmd| cmd.name() == name).cloned()
    }

    /// The process waiting for `lkuser run`, if any
    pub fn pending_process(&self) -> Option<Arc<Process>> {
        self.pending.lock().clone()
    }

    /// Execute a command line
    pub fn execute_line(&self, line: &str) -> CommandResult {
        let line = line.trim();

        if line.is_empty() || line.starts_with('#') {
            return CommandResult::Continue;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        let (cmd_name, args) = match parts.split_first() {
            Some((name, args)) => (*name, args),
            None => return CommandResult::Continue,
        };

        // commands may run further lines, so the table lock is not held
        let Some(cmd) = self.find_command(cmd_name) else {
            return CommandResult::error(format!("Unknown command: {}. Type 'help' for available commands.", cmd_name));
        };

        STATS.command_executed();
        cmd.execute(args, self)
    }

    /// Execute a command line and print the result on the console
    pub fn run_line(&self, line: &str) -> fmt::Result {
        let result = self.execute_line(line);
        let mut out = ConsoleWriter(self.userland.console().as_ref());
        match result {
            CommandResult::Success(Some(msg)) => writeln!(out, "{}", msg),
            CommandResult::Error(msg) => writeln!(out, "{}error:{} {}", colors::RED, colors::RESET, msg),
            CommandResult::Success(None) | CommandResult::Continue => Ok(()),
        }
    }
}

impl fmt::Debug for Shell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shell")
            .field("commands", &self.commands.lock().len())
            .field("pending", &self.pending.lock().as_ref().map(|p| p.id()))
            .finish()
    }
}
