//! Changesets, their statements and checksums.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// Prefix marking checksums computed by this engine.
///
/// Sums recorded by other tools carry a different prefix and are refreshed
/// instead of compared.
pub const CHECKSUM_PREFIX: &str = "r1:";

/// Identity of a changeset in the history table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ChangeSetKey {
    pub id: String,
    pub author: String,
    pub file: String,
}

/// Per-changeset attributes from the `--changeset` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSetOptions {
    pub run_on_change: bool,
    pub run_always: bool,
    pub fail_on_error: bool,
    pub run_in_transaction: bool,
    pub split_statements: bool,
    pub strip_comments: bool,
    pub end_delimiter: Option<String>,
    pub context: Option<String>,
    pub labels: Option<String>,
}

impl Default for ChangeSetOptions {
    fn default() -> Self {
        Self {
            run_on_change: false,
            run_always: false,
            fail_on_error: true,
            run_in_transaction: true,
            split_statements: true,
            strip_comments: false,
            end_delimiter: None,
            context: None,
            labels: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    pub id: String,
    pub author: String,
    /// Logical path of the changelog file that declared it.
    pub file: String,
    /// Line of the `--changeset` header.
    pub line: usize,
    pub options: ChangeSetOptions,
    pub comment: Option<String>,
    pub valid_checksums: Vec<String>,
    pub body: String,
    pub checksum: String,
}

impl ChangeSet {
    pub fn key(&self) -> ChangeSetKey {
        ChangeSetKey {
            id: self.id.clone(),
            author: self.author.clone(),
            file: self.file.clone(),
        }
    }

    pub fn statements(&self) -> Vec<String> {
        split_statements(&self.body, &self.options)
    }

    /// Whether a recorded checksum is acceptable despite differing from ours.
    pub fn accepts_checksum(&self, stored: &str) -> bool {
        self.valid_checksums
            .iter()
            .any(|sum| sum.eq_ignore_ascii_case("any") || sum == stored)
    }

    /// Short description for the DESCRIPTION column.
    pub fn description(&self) -> &'static str {
        "sql"
    }
}

/// Checksum of a changeset body, insensitive to indentation and blank lines.
pub fn checksum(body: &str) -> String {
    let normalized = body
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    let digest = format!("{:x}", Sha256::digest(normalized.as_bytes()));
    format!("{CHECKSUM_PREFIX}{}", &digest[..32])
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Code,
    Quoted(char),
    LineComment,
    BlockComment,
}

/// Split a changeset body into executable statements.
///
/// Delimiters inside quotes and comments are ignored. Fragments that hold
/// only whitespace or comments are dropped.
pub fn split_statements(sql: &str, options: &ChangeSetOptions) -> Vec<String> {
    let delimiter = options.end_delimiter.as_deref().unwrap_or(";");
    let keep_comments = !options.strip_comments;

    let mut statements = Vec::new();
    let mut current = String::new();
    let mut has_code = false;
    let mut state = ScanState::Code;
    let mut chars = sql.char_indices().peekable();

    let mut finish = |current: &mut String, has_code: &mut bool| {
        let statement = current.trim();
        if *has_code && !statement.is_empty() {
            statements.push(statement.to_string());
        }
        current.clear();
        *has_code = false;
    };

    while let Some((index, ch)) = chars.next() {
        match state {
            ScanState::Code => {
                if options.split_statements && !delimiter.is_empty() && sql[index..].starts_with(delimiter) {
                    for _ in 1..delimiter.chars().count() {
                        chars.next();
                    }
                    finish(&mut current, &mut has_code);
                    continue;
                }

                let next = chars.peek().map(|(_, c)| *c);
                match (ch, next) {
                    ('-', Some('-')) => {
                        chars.next();
                        state = ScanState::LineComment;
                        if keep_comments {
                            current.push_str("--");
                        }
                    }
                    ('/', Some('*')) => {
                        chars.next();
                        state = ScanState::BlockComment;
                        if keep_comments {
                            current.push_str("/*");
                        }
                    }
                    ('\'' | '"' | '`', _) => {
                        state = ScanState::Quoted(ch);
                        current.push(ch);
                        has_code = true;
                    }
                    _ => {
                        current.push(ch);
                        if !ch.is_whitespace() {
                            has_code = true;
                        }
                    }
                }
            }
            ScanState::Quoted(quote) => {
                current.push(ch);
                if ch == '\\' {
                    if let Some((_, escaped)) = chars.next() {
                        current.push(escaped);
                    }
                } else if ch == quote {
                    state = ScanState::Code;
                }
            }
            ScanState::LineComment => {
                if ch == '\n' {
                    state = ScanState::Code;
                    current.push('\n');
                } else if keep_comments {
                    current.push(ch);
                }
            }
            ScanState::BlockComment => {
                if ch == '*' && chars.peek().map(|(_, c)| *c) == Some('/') {
                    chars.next();
                    state = ScanState::Code;
                    if keep_comments {
                        current.push_str("*/");
                    } else {
                        current.push(' ');
                    }
                } else if keep_comments {
                    current.push(ch);
                }
            }
        }
    }

    finish(&mut current, &mut has_code);
    statements
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(sql: &str) -> Vec<String> {
        split_statements(sql, &ChangeSetOptions::default())
    }

    #[test]
    fn test_split_on_semicolons() {
        let statements = split("CREATE TABLE a (id INT);\nINSERT INTO a VALUES (1);\n");
        assert_eq!(statements, vec!["CREATE TABLE a (id INT)", "INSERT INTO a VALUES (1)"]);
    }

    #[test]
    fn test_split_keeps_last_statement_without_delimiter() {
        assert_eq!(split("SELECT 1;\nSELECT 2"), vec!["SELECT 1", "SELECT 2"]);
    }

    #[test]
    fn test_split_ignores_delimiters_in_quotes() {
        let statements = split("INSERT INTO t VALUES ('a;b', \"c;d\", `e;f`);INSERT INTO t VALUES ('it''s;')");
        assert_eq!(
            statements,
            vec![
                "INSERT INTO t VALUES ('a;b', \"c;d\", `e;f`)",
                "INSERT INTO t VALUES ('it''s;')",
            ]
        );
    }

    #[test]
    fn test_split_handles_backslash_escapes() {
        let statements = split(r"INSERT INTO t VALUES ('a\';b');SELECT 1");
        assert_eq!(statements, vec![r"INSERT INTO t VALUES ('a\';b')", "SELECT 1"]);
    }

    #[test]
    fn test_split_ignores_delimiters_in_comments() {
        let statements = split("-- note; not a split\nSELECT 1; /* also; not */ SELECT 2;");
        assert_eq!(statements, vec!["-- note; not a split\nSELECT 1", "/* also; not */ SELECT 2"]);
    }

    #[test]
    fn test_split_drops_comment_only_fragments() {
        let statements = split("SELECT 1;\n-- trailing comment\n");
        assert_eq!(statements, vec!["SELECT 1"]);
    }

    #[test]
    fn test_split_strips_comments_when_requested() {
        let options = ChangeSetOptions {
            strip_comments: true,
            ..Default::default()
        };
        let statements = split_statements("-- header\nSELECT /* inline */ 1;", &options);
        assert_eq!(statements, vec!["SELECT   1"]);
    }

    #[test]
    fn test_split_with_custom_end_delimiter() {
        let options = ChangeSetOptions {
            end_delimiter: Some("//".to_string()),
            ..Default::default()
        };
        let body = "CREATE PROCEDURE p() BEGIN SELECT 1; SELECT 2; END//\nCALL p()//";
        let statements = split_statements(body, &options);
        assert_eq!(statements, vec!["CREATE PROCEDURE p() BEGIN SELECT 1; SELECT 2; END", "CALL p()"]);
    }

    #[test]
    fn test_split_disabled_keeps_body_whole() {
        let options = ChangeSetOptions {
            split_statements: false,
            ..Default::default()
        };
        let statements = split_statements("SELECT 1; SELECT 2;", &options);
        assert_eq!(statements, vec!["SELECT 1; SELECT 2;"]);
    }

    #[test]
    fn test_checksum_ignores_indentation_and_blank_lines() {
        let a = checksum("CREATE TABLE a (\n  id INT\n);\n");
        let b = checksum("\nCREATE TABLE a (\n\tid INT\n);\n\n");
        assert_eq!(a, b);
        assert!(a.starts_with(CHECKSUM_PREFIX));
        assert_eq!(a.len(), CHECKSUM_PREFIX.len() + 32);
    }

    #[test]
    fn test_checksum_changes_with_content() {
        assert_ne!(checksum("SELECT 1;"), checksum("SELECT 2;"));
    }

    #[test]
    fn test_checksum_fits_history_column() {
        assert!(checksum("SELECT 1;").len() <= 35);
    }

    #[test]
    fn test_accepts_checksum() {
        let mut changeset = ChangeSet {
            id: "1".into(),
            author: "dev".into(),
            file: "changes.sql".into(),
            line: 2,
            options: ChangeSetOptions::default(),
            comment: None,
            valid_checksums: vec!["8:abc".into()],
            body: "SELECT 1;".into(),
            checksum: checksum("SELECT 1;"),
        };
        assert!(changeset.accepts_checksum("8:abc"));
        assert!(!changeset.accepts_checksum("8:def"));

        changeset.valid_checksums = vec!["ANY".into()];
        assert!(changeset.accepts_checksum("8:def"));
    }
}
