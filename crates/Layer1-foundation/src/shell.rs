//! Shell descriptions - which interpreter runs a task's command
//!
//! A task records a concrete [`Shell`] (program + leading arguments). The
//! command string is appended as the final argument, so `sh -c <command>` or
//! `cmd /C <command>`.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// ============================================================================
// Shell Type
// ============================================================================

/// Known shell interpreters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShellType {
    /// POSIX sh
    Sh,
    Bash,
    Zsh,
    Fish,
    /// Windows command interpreter
    Cmd,
    /// Windows PowerShell
    PowerShell,
    /// PowerShell Core
    Pwsh,
}

impl ShellType {
    /// Default shell for the current OS
    pub fn default_for_os() -> Self {
        #[cfg(target_os = "windows")]
        {
            Self::Cmd
        }
        #[cfg(not(target_os = "windows"))]
        {
            Self::Sh
        }
    }

    /// Executable name
    pub fn executable(&self) -> &'static str {
        match self {
            ShellType::Sh => "sh",
            ShellType::Bash => "bash",
            ShellType::Zsh => "zsh",
            ShellType::Fish => "fish",
            ShellType::Cmd => "cmd",
            ShellType::PowerShell => "powershell.exe",
            ShellType::Pwsh => "pwsh",
        }
    }

    /// Arguments placed before the command string
    pub fn exec_args(&self) -> &'static [&'static str] {
        match self {
            ShellType::Sh | ShellType::Bash | ShellType::Zsh | ShellType::Fish => &["-c"],
            ShellType::Cmd => &["/C"],
            ShellType::PowerShell | ShellType::Pwsh => &["-NoProfile", "-NonInteractive", "-Command"],
        }
    }

    /// Parse a shell name. Unknown names yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "sh" => Some(Self::Sh),
            "bash" => Some(Self::Bash),
            "zsh" => Some(Self::Zsh),
            "fish" => Some(Self::Fish),
            "cmd" | "cmd.exe" => Some(Self::Cmd),
            "powershell" | "powershell.exe" => Some(Self::PowerShell),
            "pwsh" => Some(Self::Pwsh),
            _ => None,
        }
    }
}

impl Default for ShellType {
    fn default() -> Self {
        Self::default_for_os()
    }
}

impl std::fmt::Display for ShellType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShellType::Sh => write!(f, "sh"),
            ShellType::Bash => write!(f, "bash"),
            ShellType::Zsh => write!(f, "zsh"),
            ShellType::Fish => write!(f, "fish"),
            ShellType::Cmd => write!(f, "cmd"),
            ShellType::PowerShell => write!(f, "powershell"),
            ShellType::Pwsh => write!(f, "pwsh"),
        }
    }
}

// ============================================================================
// Shell
// ============================================================================

/// Concrete interpreter invocation recorded on a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shell {
    /// Program to execute
    pub program: String,

    /// Arguments placed before the command string
    #[serde(default)]
    pub args: Vec<String>,
}

impl Shell {
    pub fn of(shell_type: ShellType) -> Self {
        Self {
            program: shell_type.executable().to_string(),
            args: shell_type.exec_args().iter().map(|a| a.to_string()).collect(),
        }
    }

    /// Arbitrary interpreter, e.g. an absolute path to a specific bash build
    pub fn custom(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn platform_default() -> Self {
        Self::of(ShellType::default_for_os())
    }

    /// Full argv for running `command` through this shell
    pub fn argv(&self, command: &str) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.args.len() + 2);
        argv.push(self.program.clone());
        argv.extend(self.args.iter().cloned());
        argv.push(command.to_string());
        argv
    }
}

impl Default for Shell {
    fn default() -> Self {
        Self::platform_default()
    }
}

impl From<ShellType> for Shell {
    fn from(shell_type: ShellType) -> Self {
        Self::of(shell_type)
    }
}

impl FromStr for Shell {
    type Err = Error;

    /// Known names map to their [`ShellType`]; anything else is treated as a
    /// POSIX-style program taking `-c`.
    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim();
        if name.is_empty() {
            return Err(Error::InvalidInput("shell name is empty".to_string()));
        }
        Ok(match ShellType::parse(name) {
            Some(shell_type) => Self::of(shell_type),
            None => Self::custom(name, vec!["-c".to_string()]),
        })
    }
}

impl std::fmt::Display for Shell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_shells() {
        assert_eq!(ShellType::parse("bash"), Some(ShellType::Bash));
        assert_eq!(ShellType::parse("CMD.exe"), Some(ShellType::Cmd));
        assert_eq!(ShellType::parse("pwsh"), Some(ShellType::Pwsh));
        assert_eq!(ShellType::parse("tcsh"), None);
    }

    #[test]
    fn test_argv() {
        let shell = Shell::of(ShellType::Sh);
        assert_eq!(shell.argv("echo hi"), vec!["sh", "-c", "echo hi"]);

        let cmd = Shell::of(ShellType::Cmd);
        assert_eq!(cmd.argv("dir"), vec!["cmd", "/C", "dir"]);
    }

    #[test]
    fn test_from_str_custom() {
        let shell: Shell = "/opt/bin/mysh".parse().unwrap();
        assert_eq!(shell.program, "/opt/bin/mysh");
        assert_eq!(shell.args, vec!["-c"]);

        let bash: Shell = "bash".parse().unwrap();
        assert_eq!(bash, Shell::of(ShellType::Bash));

        assert!("  ".parse::<Shell>().is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(Shell::of(ShellType::Bash).to_string(), "bash -c");
    }

    #[test]
    fn test_serde_roundtrip() {
        let shell = Shell::of(ShellType::Zsh);
        let json = serde_json::to_string(&shell).unwrap();
        let parsed: Shell = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, shell);
    }
}
