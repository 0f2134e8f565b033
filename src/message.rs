//! Commit message handling and the conventional-commit grammar.
//!
//! A header has the shape `<type>[(<scope>)][!]: <description>`. The type is
//! drawn from the closed [`CommitType`] set; everything else in the message is
//! free-form apart from the blank-line separation of body and footers.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result, anyhow};
use serde::Serialize;

/// Marker line below which git places the diff in `commit --verbose`.
const SCISSORS_MARKER: &str = ">8";

pub const DEFAULT_MAX_HEADER_LENGTH: usize = 100;

#[derive(Debug, Clone)]
pub struct CommitMessage {
    path: PathBuf,
    raw: String,
}

impl CommitMessage {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read commit message file: {}", path.display()))?;
        Ok(Self::new(path, raw))
    }

    pub fn new(path: impl Into<PathBuf>, raw: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            raw: raw.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Message text as git will record it: comment lines and the verbose diff
    /// below the scissors line removed, surrounding blank lines trimmed.
    pub fn content(&self) -> String {
        let mut lines = Vec::new();
        for line in self.raw.lines() {
            if line.starts_with('#') {
                if line.contains(SCISSORS_MARKER) && line.contains("------") {
                    break;
                }
                continue;
            }
            lines.push(line.trim_end());
        }
        lines.join("\n").trim().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitType {
    Build,
    Chore,
    Ci,
    Docs,
    Feat,
    Fix,
    Perf,
    Refactor,
    Revert,
    Style,
    Test,
}

impl CommitType {
    pub const ALL: [CommitType; 11] = [
        CommitType::Build,
        CommitType::Chore,
        CommitType::Ci,
        CommitType::Docs,
        CommitType::Feat,
        CommitType::Fix,
        CommitType::Perf,
        CommitType::Refactor,
        CommitType::Revert,
        CommitType::Style,
        CommitType::Test,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CommitType::Build => "build",
            CommitType::Chore => "chore",
            CommitType::Ci => "ci",
            CommitType::Docs => "docs",
            CommitType::Feat => "feat",
            CommitType::Fix => "fix",
            CommitType::Perf => "perf",
            CommitType::Refactor => "refactor",
            CommitType::Revert => "revert",
            CommitType::Style => "style",
            CommitType::Test => "test",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            CommitType::Build => "Changes to the build system or dependencies",
            CommitType::Chore => "Maintenance that touches neither source nor tests",
            CommitType::Ci => "Changes to CI configuration and scripts",
            CommitType::Docs => "Documentation only changes",
            CommitType::Feat => "A new feature",
            CommitType::Fix => "A bug fix",
            CommitType::Perf => "A change that improves performance",
            CommitType::Refactor => "A change that neither fixes a bug nor adds a feature",
            CommitType::Revert => "Reverts a previous commit",
            CommitType::Style => "Formatting and whitespace, no change in meaning",
            CommitType::Test => "Adding or correcting tests",
        }
    }

    fn allowed_list() -> String {
        CommitType::ALL
            .iter()
            .map(CommitType::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for CommitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CommitType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        CommitType::ALL
            .into_iter()
            .find(|candidate| candidate.as_str() == value)
            .ok_or_else(|| anyhow!("Unknown commit type '{value}'"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConventionalHeader {
    pub commit_type: CommitType,
    pub scope: Option<String>,
    pub breaking: bool,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LintIssue {
    pub severity: Severity,
    pub rule: &'static str,
    pub message: String,
}

impl LintIssue {
    fn error(rule: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            rule,
            message: message.into(),
        }
    }

    fn warning(rule: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            rule,
            message: message.into(),
        }
    }
}

impl fmt::Display for LintIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let marker = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{marker}: {} [{}]", self.message, self.rule)
    }
}

#[derive(Debug, Clone)]
pub struct LintRules {
    pub max_header_length: usize,
    pub ignore_generated: bool,
}

impl Default for LintRules {
    fn default() -> Self {
        Self {
            max_header_length: DEFAULT_MAX_HEADER_LENGTH,
            ignore_generated: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LintReport {
    pub header: Option<ConventionalHeader>,
    pub issues: Vec<LintIssue>,
    pub ignored: bool,
}

impl LintReport {
    pub fn is_ok(&self) -> bool {
        !self
            .issues
            .iter()
            .any(|issue| issue.severity == Severity::Error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &LintIssue> {
        self.issues
            .iter()
            .filter(|issue| issue.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &LintIssue> {
        self.issues
            .iter()
            .filter(|issue| issue.severity == Severity::Warning)
    }
}

/// Messages git writes on its own (merges, reverts, autosquash markers).
pub fn is_generated(message: &str) -> bool {
    const PREFIXES: [&str; 6] = [
        "Merge ",
        "Revert \"",
        "fixup! ",
        "squash! ",
        "amend! ",
        "Automatic merge",
    ];
    PREFIXES.iter().any(|prefix| message.starts_with(prefix))
}

pub fn parse_header(header: &str) -> Result<ConventionalHeader, LintIssue> {
    let Some((prefix, rest)) = header.split_once(':') else {
        return Err(LintIssue::error(
            "header-format",
            "header must look like `<type>(<scope>): <description>`",
        ));
    };

    let (prefix, breaking) = match prefix.strip_suffix('!') {
        Some(stripped) => (stripped, true),
        None => (prefix, false),
    };

    let (type_token, scope) = match prefix.find('(') {
        Some(open) => {
            let Some(inner) = prefix[open + 1..].strip_suffix(')') else {
                return Err(LintIssue::error(
                    "scope-format",
                    "scope must be enclosed in parentheses directly before the colon",
                ));
            };
            if inner.contains(['(', ')']) {
                return Err(LintIssue::error(
                    "scope-format",
                    "scope may not contain nested parentheses",
                ));
            }
            if inner.trim().is_empty() {
                return Err(LintIssue::error("scope-empty", "scope may not be empty"));
            }
            (&prefix[..open], Some(inner.to_string()))
        }
        None => (prefix, None),
    };

    if type_token.is_empty() {
        return Err(LintIssue::error("type-empty", "type may not be empty"));
    }
    if type_token.contains(char::is_whitespace) {
        return Err(LintIssue::error(
            "header-format",
            format!("type '{type_token}' may not contain whitespace"),
        ));
    }

    let commit_type = match type_token.parse::<CommitType>() {
        Ok(commit_type) => commit_type,
        Err(_) if type_token.to_lowercase().parse::<CommitType>().is_ok() => {
            return Err(LintIssue::error(
                "type-case",
                format!("type '{type_token}' must be lower-case"),
            ));
        }
        Err(_) => {
            return Err(LintIssue::error(
                "type-enum",
                format!(
                    "type '{type_token}' must be one of [{}]",
                    CommitType::allowed_list()
                ),
            ));
        }
    };

    if rest.trim().is_empty() {
        return Err(LintIssue::error("subject-empty", "description may not be empty"));
    }
    let description = match rest.strip_prefix(' ') {
        Some(description) if !description.starts_with(char::is_whitespace) => description,
        _ => {
            return Err(LintIssue::error(
                "header-format",
                "exactly one space must follow the colon",
            ));
        }
    };

    Ok(ConventionalHeader {
        commit_type,
        scope,
        breaking,
        description: description.trim_end().to_string(),
    })
}

pub fn lint(message: &str, rules: &LintRules) -> LintReport {
    let mut report = LintReport::default();
    let message = message.trim();

    if message.is_empty() {
        report
            .issues
            .push(LintIssue::error("message-empty", "commit message is empty"));
        return report;
    }

    if rules.ignore_generated && is_generated(message) {
        report.ignored = true;
        return report;
    }

    let mut lines = message.lines();
    let header = lines.next().unwrap_or_default().trim_end();
    let header_length = header.chars().count();
    if header_length > rules.max_header_length {
        report.issues.push(LintIssue::error(
            "header-max-length",
            format!(
                "header is {header_length} characters, the limit is {}",
                rules.max_header_length
            ),
        ));
    }

    match parse_header(header) {
        Ok(parsed) => {
            check_description(&parsed.description, &mut report.issues);
            report.header = Some(parsed);
        }
        Err(issue) => report.issues.push(issue),
    }

    let remainder: Vec<&str> = lines.collect();
    if let Some(first) = remainder.first()
        && !first.trim().is_empty()
    {
        report.issues.push(LintIssue::warning(
            "body-leading-blank",
            "body must be separated from the header by a blank line",
        ));
    }

    if let Some(idx) = remainder
        .iter()
        .enumerate()
        .skip(1)
        .find_map(|(idx, line)| is_footer_line(line).then_some(idx))
        && !remainder[idx - 1].trim().is_empty()
    {
        report.issues.push(LintIssue::warning(
            "footer-leading-blank",
            "footer must be separated from the body by a blank line",
        ));
    }

    report
}

fn check_description(description: &str, issues: &mut Vec<LintIssue>) {
    if is_sentence_case(description)
        || is_upper_case(description)
        || is_start_case(description)
        || is_pascal_case(description)
    {
        issues.push(LintIssue::error(
            "subject-case",
            "description must not be sentence-case, start-case, pascal-case or upper-case",
        ));
    }
    if description.ends_with('.') {
        issues.push(LintIssue::error(
            "subject-full-stop",
            "description may not end with a full stop",
        ));
    }
}

fn is_footer_line(line: &str) -> bool {
    if line.starts_with("BREAKING CHANGE: ") || line.starts_with("BREAKING-CHANGE: ") {
        return true;
    }
    let token_end = line
        .find(|c: char| !(c.is_alphanumeric() || c == '-'))
        .unwrap_or(line.len());
    if token_end == 0 {
        return false;
    }
    let rest = &line[token_end..];
    rest.starts_with(": ") || rest.starts_with(" #")
}

fn is_sentence_case(text: &str) -> bool {
    let mut letters = text.chars().filter(|c| c.is_alphabetic());
    match letters.next() {
        Some(first) if first.is_uppercase() => letters.all(|c| c.is_lowercase()),
        _ => false,
    }
}

fn is_upper_case(text: &str) -> bool {
    let letters: Vec<char> = text.chars().filter(|c| c.is_alphabetic()).collect();
    letters.len() > 1 && letters.iter().all(|c| c.is_uppercase())
}

fn is_start_case(text: &str) -> bool {
    let words: Vec<&str> = text.split_whitespace().collect();
    words.len() > 1
        && words.iter().all(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) if first.is_alphabetic() => {
                    first.is_uppercase() && chars.all(|c| !c.is_uppercase())
                }
                _ => false,
            }
        })
}

fn is_pascal_case(text: &str) -> bool {
    if text.contains(|c: char| c.is_whitespace() || c == '_' || c == '-') {
        return false;
    }
    let mut chars = text.chars();
    match chars.next() {
        Some(first) if first.is_uppercase() => {
            let rest: Vec<char> = chars.collect();
            rest.iter().any(|c| c.is_uppercase()) && rest.iter().any(|c| c.is_lowercase())
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> LintRules {
        LintRules::default()
    }

    #[test]
    fn accepts_plain_feature_header() {
        let report = lint("feat: add new feature", &rules());
        assert!(report.is_ok(), "{:?}", report.issues);
        let header = report.header.expect("parsed header");
        assert_eq!(header.commit_type, CommitType::Feat);
        assert_eq!(header.scope, None);
        assert!(!header.breaking);
        assert_eq!(header.description, "add new feature");
    }

    #[test]
    fn rejects_message_without_type() {
        let report = lint("invalid message", &rules());
        assert!(!report.is_ok());
        assert_eq!(report.errors().next().map(|i| i.rule), Some("header-format"));
    }

    #[test]
    fn every_commit_type_round_trips_through_the_grammar() {
        for commit_type in CommitType::ALL {
            let header = format!("{commit_type}: touch something");
            let parsed = parse_header(&header).expect("valid header");
            assert_eq!(parsed.commit_type, commit_type);
            assert!(!commit_type.description().is_empty());
        }
    }

    #[test]
    fn parses_scope_and_breaking_marker() {
        let parsed = parse_header("fix(parser)!: handle empty input").unwrap();
        assert_eq!(parsed.commit_type, CommitType::Fix);
        assert_eq!(parsed.scope.as_deref(), Some("parser"));
        assert!(parsed.breaking);
    }

    #[test]
    fn rejects_unknown_and_upper_case_types() {
        assert_eq!(parse_header("feature: x").unwrap_err().rule, "type-enum");
        assert_eq!(parse_header("Feat: x").unwrap_err().rule, "type-case");
    }

    #[test]
    fn rejects_malformed_scopes() {
        assert_eq!(parse_header("feat(): x").unwrap_err().rule, "scope-empty");
        assert_eq!(parse_header("feat(api: x").unwrap_err().rule, "scope-format");
        assert_eq!(parse_header("feat((api)): x").unwrap_err().rule, "scope-format");
    }

    #[test]
    fn rejects_bad_separator_and_empty_description() {
        assert_eq!(parse_header("feat:add").unwrap_err().rule, "header-format");
        assert_eq!(parse_header("feat:  add").unwrap_err().rule, "header-format");
        assert_eq!(parse_header("feat:").unwrap_err().rule, "subject-empty");
        assert_eq!(parse_header(": add").unwrap_err().rule, "type-empty");
    }

    #[test]
    fn description_case_and_full_stop() {
        let rules = rules();
        assert!(!lint("feat: Add new feature", &rules).is_ok());
        assert!(!lint("feat: ADD NEW FEATURE", &rules).is_ok());
        assert!(!lint("feat: Add New Feature", &rules).is_ok());
        assert!(!lint("feat: AddFeature", &rules).is_ok());
        assert!(!lint("feat: add new feature.", &rules).is_ok());
        assert!(lint("feat: API keys are rotated", &rules).is_ok());
    }

    #[test]
    fn header_length_limit() {
        let long = format!("chore: {}", "a".repeat(120));
        let report = lint(&long, &rules());
        assert!(report.errors().any(|i| i.rule == "header-max-length"));

        let relaxed = LintRules {
            max_header_length: 200,
            ..LintRules::default()
        };
        assert!(lint(&long, &relaxed).is_ok());
    }

    #[test]
    fn body_and_footer_spacing_are_warnings() {
        let report = lint(
            "fix: handle timeouts\nretry once before giving up\nRefs: #42",
            &rules(),
        );
        assert!(report.is_ok());
        let rules: Vec<_> = report.warnings().map(|i| i.rule).collect();
        assert!(rules.contains(&"body-leading-blank"));
        assert!(rules.contains(&"footer-leading-blank"));

        let clean = lint(
            "fix: handle timeouts\n\nretry once before giving up\n\nRefs: #42",
            &LintRules::default(),
        );
        assert_eq!(clean.warnings().count(), 0);
    }

    #[test]
    fn generated_messages_are_ignored() {
        let report = lint("Merge branch 'main' into topic", &rules());
        assert!(report.ignored);
        assert!(report.is_ok());

        let strict = LintRules {
            ignore_generated: false,
            ..LintRules::default()
        };
        assert!(!lint("Merge branch 'main' into topic", &strict).is_ok());
    }

    #[test]
    fn empty_message_fails() {
        let report = lint("   \n", &rules());
        assert_eq!(report.errors().next().map(|i| i.rule), Some("message-empty"));
    }

    #[test]
    fn content_strips_comments_and_verbose_diff() {
        let raw = "feat: add parser\n\n# Please enter the commit message\n# ------------------------ >8 ------------------------\ndiff --git a/x b/x\n";
        let message = CommitMessage::new("COMMIT_EDITMSG", raw);
        assert_eq!(message.content(), "feat: add parser");
    }
}
