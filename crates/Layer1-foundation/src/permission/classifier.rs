//! Destructive command classification
//!
//! Heuristic detection of commands capable of irreversible data loss:
//! - recursive deletes (`rm -rf`, `rd /s`, `Remove-Item -Recurse`)
//! - forced resets / checkouts (`git reset --hard`, `git checkout -f`, `git clean -f`)
//! - disk format / partition tools (`mkfs`, `format C:`, `dd of=/dev/...`)
//! - mass process kills (`killall`, `pkill`, `kill -9 -1`)
//! - history rewrites (`git push --force`, `git rebase`, `git filter-branch`)
//!
//! Classification is a pure function of the command text. False positives are
//! acceptable; false negatives are a known risk. The classifier is a trait so
//! embedders can replace or extend the pattern set.

use crate::{Error, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::warn;

/// Category of a destructive match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DestructiveCategory {
    RecursiveDelete,
    ForcedReset,
    DiskFormat,
    MassKill,
    HistoryRewrite,
    /// User-supplied pattern
    Custom,
}

impl DestructiveCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            DestructiveCategory::RecursiveDelete => "recursive delete",
            DestructiveCategory::ForcedReset => "forced reset",
            DestructiveCategory::DiskFormat => "disk format",
            DestructiveCategory::MassKill => "mass process kill",
            DestructiveCategory::HistoryRewrite => "history rewrite",
            DestructiveCategory::Custom => "custom rule",
        }
    }
}

impl std::fmt::Display for DestructiveCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a command was classified as destructive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestructiveMatch {
    pub category: DestructiveCategory,
    /// Pattern source that matched
    pub pattern: String,
    pub description: String,
}

impl DestructiveMatch {
    pub fn reason(&self) -> String {
        format!("{} ({})", self.description, self.category)
    }
}

/// Pluggable destructive-command predicate
pub trait CommandClassifier: Send + Sync {
    /// `Some` if the command is considered destructive
    fn classify(&self, command: &str) -> Option<DestructiveMatch>;

    fn is_destructive(&self, command: &str) -> bool {
        self.classify(command).is_some()
    }
}

impl<F> CommandClassifier for F
where
    F: Fn(&str) -> Option<DestructiveMatch> + Send + Sync,
{
    fn classify(&self, command: &str) -> Option<DestructiveMatch> {
        self(command)
    }
}

// ============================================================
// Pattern classifier
// ============================================================

#[derive(Debug, Clone)]
struct Rule {
    category: DestructiveCategory,
    regex: Regex,
    description: String,
}

/// (category, regex, description)
const DEFAULT_RULES: &[(DestructiveCategory, &str, &str)] = &[
    // Recursive delete
    (
        DestructiveCategory::RecursiveDelete,
        r"(?i)\brm\s+(?:-\S+\s+)*(?:-[a-z]*r[a-z]*|--recursive)(?:\s|$)",
        "Recursive file deletion",
    ),
    (
        DestructiveCategory::RecursiveDelete,
        r"(?i)\b(?:rd|rmdir)\s+(?:\S+\s+)*/s\b",
        "Recursive directory removal",
    ),
    (
        DestructiveCategory::RecursiveDelete,
        r"(?i)\bdel\s+(?:\S+\s+)*/s\b",
        "Recursive file deletion",
    ),
    (
        DestructiveCategory::RecursiveDelete,
        r"(?i)\bRemove-Item\b.*\s-Recurse\b",
        "Recursive file deletion",
    ),
    (
        DestructiveCategory::RecursiveDelete,
        r"\bfind\b.*\s-delete\b",
        "Bulk deletion through find",
    ),
    // Forced reset / checkout
    (
        DestructiveCategory::ForcedReset,
        r"\bgit\s+reset\s+(?:\S+\s+)*--hard\b",
        "Hard reset discards working tree changes",
    ),
    (
        DestructiveCategory::ForcedReset,
        r"\bgit\s+checkout\s+(?:\S+\s+)*(?:-f|--force)(?:\s|$)",
        "Forced checkout discards working tree changes",
    ),
    (
        DestructiveCategory::ForcedReset,
        r"\bgit\s+checkout\s+(?:\S+\s+)*--\s+\.",
        "Checkout discards working tree changes",
    ),
    (
        DestructiveCategory::ForcedReset,
        r"\bgit\s+switch\s+(?:\S+\s+)*(?:-f|--force|--discard-changes)(?:\s|$)",
        "Forced switch discards working tree changes",
    ),
    (
        DestructiveCategory::ForcedReset,
        r"\bgit\s+clean\s+(?:\S+\s+)*-[a-zA-Z]*f",
        "Forced clean deletes untracked files",
    ),
    // Disk format / partition
    (
        DestructiveCategory::DiskFormat,
        r"\bmkfs(?:\.\w+)?\b",
        "Filesystem format",
    ),
    (
        DestructiveCategory::DiskFormat,
        r"(?i)\bformat(?:\.com)?\s+[a-z]:",
        "Volume format",
    ),
    (
        DestructiveCategory::DiskFormat,
        r"(?i)\b(?:diskpart|fdisk|sfdisk|parted|wipefs)\b",
        "Partition table tool",
    ),
    (
        DestructiveCategory::DiskFormat,
        r"\bdd\s+.*\bof=/dev/",
        "Raw device overwrite",
    ),
    (
        DestructiveCategory::DiskFormat,
        r">\s*/dev/(?:sd|hd|nvme|disk|mmcblk)",
        "Raw device overwrite",
    ),
    // Mass process kill
    (
        DestructiveCategory::MassKill,
        r"\b(?:killall|pkill)\b",
        "Kills processes by name",
    ),
    (
        DestructiveCategory::MassKill,
        r"\bkill\s+(?:-\S+\s+)*-1(?:\s|$)",
        "Kills every process the user owns",
    ),
    (
        DestructiveCategory::MassKill,
        r"(?i)\btaskkill\b.*\s/(?:im|f)\b",
        "Forced process kill",
    ),
    (
        DestructiveCategory::MassKill,
        r"(?i)\bStop-Process\b.*\s-Name\b",
        "Kills processes by name",
    ),
    // History rewrite
    (
        DestructiveCategory::HistoryRewrite,
        r"\bgit\s+push\s+(?:\S+\s+)*(?:-f|--force|--force-with-lease)(?:[\s=]|$)",
        "Force push rewrites remote history",
    ),
    (
        DestructiveCategory::HistoryRewrite,
        r"\bgit\s+push\s+(?:\S+\s+)*\+\S",
        "Force push through +refspec",
    ),
    (
        DestructiveCategory::HistoryRewrite,
        r"\bgit\s+(?:rebase|filter-branch|filter-repo)\b",
        "Rewrites commit history",
    ),
    (
        DestructiveCategory::HistoryRewrite,
        r"\bgit\s+commit\s+(?:\S+\s+)*--amend\b",
        "Amends an existing commit",
    ),
    (
        DestructiveCategory::HistoryRewrite,
        r"\bgit\s+reflog\s+expire\b",
        "Expires reflog entries",
    ),
    (
        DestructiveCategory::HistoryRewrite,
        r"\bgit\s+branch\s+(?:\S+\s+)*-D(?:\s|$)",
        "Force deletes a branch",
    ),
    (
        DestructiveCategory::HistoryRewrite,
        r"\bhistory\s+-c\b",
        "Clears shell history",
    ),
];

fn default_rules() -> &'static [Rule] {
    static RULES: OnceLock<Vec<Rule>> = OnceLock::new();
    RULES.get_or_init(|| {
        DEFAULT_RULES
            .iter()
            .filter_map(|(category, pattern, description)| match Regex::new(pattern) {
                Ok(regex) => Some(Rule {
                    category: *category,
                    regex,
                    description: description.to_string(),
                }),
                Err(e) => {
                    warn!("Skipping invalid destructive pattern '{}': {}", pattern, e);
                    None
                }
            })
            .collect()
    })
}

/// Regex-based classifier with the built-in pattern set
#[derive(Debug, Clone)]
pub struct PatternClassifier {
    rules: Vec<Rule>,
}

impl Default for PatternClassifier {
    fn default() -> Self {
        Self {
            rules: default_rules().to_vec(),
        }
    }
}

impl PatternClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// No built-in rules, only what is added afterwards
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Built-in rules plus extra `Custom` regexes (e.g. from config)
    pub fn with_extra_patterns<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut classifier = Self::new();
        for pattern in patterns {
            classifier.add_pattern(
                DestructiveCategory::Custom,
                pattern.as_ref(),
                "Matches a configured destructive pattern",
            )?;
        }
        Ok(classifier)
    }

    /// Add a rule. Fails with `Error::Config` for an invalid regex.
    pub fn add_pattern(
        &mut self,
        category: DestructiveCategory,
        pattern: &str,
        description: impl Into<String>,
    ) -> Result<()> {
        let regex = Regex::new(pattern)
            .map_err(|e| Error::Config(format!("Invalid destructive pattern '{}': {}", pattern, e)))?;
        self.rules.push(Rule {
            category,
            regex,
            description: description.into(),
        });
        Ok(())
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

impl CommandClassifier for PatternClassifier {
    fn classify(&self, command: &str) -> Option<DestructiveMatch> {
        let command = command.trim();
        if command.is_empty() {
            return None;
        }
        self.rules
            .iter()
            .find(|rule| rule.regex.is_match(command))
            .map(|rule| DestructiveMatch {
                category: rule.category,
                pattern: rule.regex.as_str().to_string(),
                description: rule.description.clone(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category(command: &str) -> Option<DestructiveCategory> {
        PatternClassifier::new().classify(command).map(|m| m.category)
    }

    #[test]
    fn test_recursive_delete() {
        assert_eq!(category("rm -rf build"), Some(DestructiveCategory::RecursiveDelete));
        assert_eq!(category("rm -fr /tmp/x"), Some(DestructiveCategory::RecursiveDelete));
        assert_eq!(category("rm -f -r dir"), Some(DestructiveCategory::RecursiveDelete));
        assert_eq!(category("rm -R dir"), Some(DestructiveCategory::RecursiveDelete));
        assert_eq!(
            category("rm --recursive dir"),
            Some(DestructiveCategory::RecursiveDelete)
        );
        assert_eq!(
            category("cd out && rm -rf *"),
            Some(DestructiveCategory::RecursiveDelete)
        );
        assert_eq!(category("rd /s /q C:\\tmp"), Some(DestructiveCategory::RecursiveDelete));
        assert_eq!(
            category("Remove-Item .\\dist -Recurse -Force"),
            Some(DestructiveCategory::RecursiveDelete)
        );
    }

    #[test]
    fn test_forced_reset() {
        assert_eq!(category("git reset --hard HEAD~1"), Some(DestructiveCategory::ForcedReset));
        assert_eq!(category("git checkout -f main"), Some(DestructiveCategory::ForcedReset));
        assert_eq!(category("git checkout -- ."), Some(DestructiveCategory::ForcedReset));
        assert_eq!(category("git clean -fdx"), Some(DestructiveCategory::ForcedReset));
    }

    #[test]
    fn test_format_and_kill() {
        assert_eq!(category("mkfs.ext4 /dev/sdb1"), Some(DestructiveCategory::DiskFormat));
        assert_eq!(category("format D: /q"), Some(DestructiveCategory::DiskFormat));
        assert_eq!(
            category("dd if=/dev/zero of=/dev/sda bs=1M"),
            Some(DestructiveCategory::DiskFormat)
        );
        assert_eq!(category("killall node"), Some(DestructiveCategory::MassKill));
        assert_eq!(category("kill -9 -1"), Some(DestructiveCategory::MassKill));
        assert_eq!(category("taskkill /F /IM node.exe"), Some(DestructiveCategory::MassKill));
    }

    #[test]
    fn test_history_rewrite() {
        assert_eq!(
            category("git push --force origin main"),
            Some(DestructiveCategory::HistoryRewrite)
        );
        assert_eq!(category("git push -f"), Some(DestructiveCategory::HistoryRewrite));
        assert_eq!(
            category("git push origin +main"),
            Some(DestructiveCategory::HistoryRewrite)
        );
        assert_eq!(category("git rebase -i HEAD~3"), Some(DestructiveCategory::HistoryRewrite));
        assert_eq!(
            category("git commit --amend --no-edit"),
            Some(DestructiveCategory::HistoryRewrite)
        );
    }

    #[test]
    fn test_safe_commands() {
        for command in [
            "ls -la",
            "echo hello",
            "rm file.txt",
            "git status",
            "git push origin main",
            "git push --follow-tags",
            "git checkout feature",
            "cargo build --release",
            "npm run format",
            "kill 1234",
            "",
        ] {
            assert_eq!(category(command), None, "{} should not be destructive", command);
        }
    }

    #[test]
    fn test_extra_patterns() {
        let classifier = PatternClassifier::with_extra_patterns(["\\bterraform\\s+destroy\\b"]).unwrap();
        let m = classifier.classify("terraform destroy -auto-approve").unwrap();
        assert_eq!(m.category, DestructiveCategory::Custom);

        assert!(PatternClassifier::with_extra_patterns(["(unclosed"]).is_err());
    }

    #[test]
    fn test_closure_classifier() {
        let classifier = |command: &str| {
            command.contains("drop table").then(|| DestructiveMatch {
                category: DestructiveCategory::Custom,
                pattern: "drop table".to_string(),
                description: "Drops a table".to_string(),
            })
        };
        assert!(classifier.is_destructive("psql -c 'drop table users'"));
        assert!(!classifier.is_destructive("psql -c 'select 1'"));
    }
}
