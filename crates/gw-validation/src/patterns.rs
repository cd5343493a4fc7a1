//! Ranked dangerous-pattern table (§4.1 step 4).

use regex::Regex;

/// Category of a matched dangerous pattern, surfaced in the rejection
/// message's "rule class" so a caller can tell file-I/O injection apart
/// from a tautology attempt without echoing the offending value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternCategory {
    FileIo,
    CommandExecution,
    Timing,
    Introspection,
    CommentInjection,
    Tautology,
    UnionInjection,
    AuthBypass,
}

impl PatternCategory {
    pub fn label(self) -> &'static str {
        match self {
            Self::FileIo => "file_io",
            Self::CommandExecution => "command_execution",
            Self::Timing => "timing",
            Self::Introspection => "introspection",
            Self::CommentInjection => "comment_injection",
            Self::Tautology => "tautology",
            Self::UnionInjection => "union_injection",
            Self::AuthBypass => "auth_bypass",
        }
    }
}

/// One ranked rule: a compiled pattern, its risk score (0-100), and category.
pub struct PatternRule {
    pub regex: Regex,
    pub risk: u8,
    pub category: PatternCategory,
}

/// Risk threshold that MODERATE-level validation uses to pick the "top-N
/// critical patterns" the spec calls out — anything at or above this score.
pub const MODERATE_RISK_THRESHOLD: u8 = 50;

/// Build the ranked pattern table. Rebuilt once per [`crate::Validator`]
/// rather than globally cached — regex compilation is cheap relative to one
/// validator living for the life of the process.
pub fn build_rules() -> Vec<PatternRule> {
    let rule = |pattern: &str, risk: u8, category: PatternCategory| PatternRule {
        regex: Regex::new(pattern).expect("pattern table regex must compile"),
        risk,
        category,
    };

    vec![
        rule(r"(?i)LOAD_FILE\s*\(", 90, PatternCategory::FileIo),
        rule(r"(?i)INTO\s+OUTFILE", 90, PatternCategory::FileIo),
        rule(r"(?i)INTO\s+DUMPFILE", 90, PatternCategory::FileIo),
        rule(r"(?i)xp_cmdshell", 95, PatternCategory::CommandExecution),
        rule(r"(?i)SYSTEM\s*\(", 85, PatternCategory::CommandExecution),
        rule(r"(?i)BENCHMARK\s*\(", 70, PatternCategory::Timing),
        rule(r"(?i)SLEEP\s*\(", 70, PatternCategory::Timing),
        rule(r"@@\w+", 40, PatternCategory::Introspection),
        rule(r"--", 20, PatternCategory::CommentInjection),
        rule(r"/\*", 20, PatternCategory::CommentInjection),
        rule(r"\*/", 20, PatternCategory::CommentInjection),
        rule(r#"(?i)'\s*OR\s*'1'\s*=\s*'1"#, 95, PatternCategory::Tautology),
        rule(r#"(?i)"\s*OR\s*"1"\s*=\s*"1"#, 95, PatternCategory::Tautology),
        rule(r"(?i)UNION(\s+ALL)?\s+SELECT", 85, PatternCategory::UnionInjection),
        rule(r#"(?i)'\s*(--|#|/\*)"#, 75, PatternCategory::AuthBypass),
    ]
}
