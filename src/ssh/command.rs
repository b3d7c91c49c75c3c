//! Remote file commands
//!
//! The pool runs exactly one command per lease: `ls -p <path>` to list a
//! directory or `cat <path>` to read a file.

use std::fmt;

use serde::{Deserialize, Serialize};

/// What to run on the application container
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCommand {
    ListDirectory(String),
    ReadFile(String),
}

impl RemoteCommand {
    /// Shell command line sent over the exec channel
    pub fn command_line(&self) -> String {
        match self {
            RemoteCommand::ListDirectory(path) => format!("ls -p {}", shell_escape(path)),
            RemoteCommand::ReadFile(path) => format!("cat {}", shell_escape(path)),
        }
    }

    pub fn path(&self) -> &str {
        match self {
            RemoteCommand::ListDirectory(path) | RemoteCommand::ReadFile(path) => path,
        }
    }
}

impl fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

/// One line of `ls -p` output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub name: String,
    pub is_dir: bool,
}

/// Parse `ls -p` output. Directories carry a trailing `/`.
pub fn parse_listing(output: &str) -> Vec<RemoteEntry> {
    output
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.trim().is_empty())
        .map(|line| match line.strip_suffix('/') {
            Some(name) => RemoteEntry {
                name: name.to_string(),
                is_dir: true,
            },
            None => RemoteEntry {
                name: line.to_string(),
                is_dir: false,
            },
        })
        .collect()
}

fn shell_escape(s: &str) -> String {
    // Wrap in single quotes and escape single quotes
    format!("'{}'", s.replace('\'', "'\\''"))
}
