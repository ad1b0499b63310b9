//! Formatted-SQL changelog parsing.
//!
//! ```sql
//! --liquibase formatted sql
//!
//! --changeset alice:1 runOnChange:true
//! --comment: create the person table
//! CREATE TABLE person (id INT PRIMARY KEY);
//! --rollback DROP TABLE person;
//!
//! --include file:more_changes.sql relativeToChangelogFile:true
//! ```

use std::collections::HashSet;

use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;

use super::changeset::{ChangeSet, ChangeSetKey, ChangeSetOptions, checksum};
use super::resources::CompositeAccessor;
use crate::errors::ChangelogError;

static HEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^--\s*liquibase\s+formatted\s+sql\b").expect("header pattern"));
static CHANGESET_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^--\s*changeset\b").expect("changeset prefix pattern"));
static CHANGESET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)^--\s*changeset\s+("[^"]+"|[^\s:"]+):("[^"]+"|\S+)(.*)$"#).expect("changeset pattern"));
static ATTRIBUTE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\w+):(\S+)").expect("attribute pattern"));
static COMMENT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^--\s*comment:\s*(.*)$").expect("comment pattern"));
static VALID_CHECKSUM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^--\s*validCheckSum:\s*(\S+)").expect("validCheckSum pattern"));
static ROLLBACK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^--\s*rollback\b").expect("rollback pattern"));
static PRECONDITION: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^--\s*precondition").expect("precondition pattern"));
static INCLUDE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^--\s*include\s+file:(\S+)(.*)$").expect("include pattern"));

/// One top-level item of a changelog file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangelogEntry {
    ChangeSet(ChangeSet),
    Include {
        path: String,
        relative_to_changelog: bool,
        line: usize,
    },
}

struct PendingChangeSet {
    id: String,
    author: String,
    line: usize,
    options: ChangeSetOptions,
    comment: Option<String>,
    valid_checksums: Vec<String>,
    body: Vec<String>,
}

impl PendingChangeSet {
    fn finish(self, file: &str) -> ChangeSet {
        let body = self.body.join("\n");
        ChangeSet {
            checksum: checksum(&body),
            id: self.id,
            author: self.author,
            file: file.to_string(),
            line: self.line,
            options: self.options,
            comment: self.comment,
            valid_checksums: self.valid_checksums,
            body,
        }
    }
}

/// Parse one formatted-SQL file without following includes.
pub fn parse_formatted_sql(file: &str, content: &str) -> Result<Vec<ChangelogEntry>, ChangelogError> {
    let mut lines = content.lines().enumerate().map(|(index, line)| (index + 1, line));

    match lines.by_ref().find(|(_, line)| !line.trim().is_empty()) {
        Some((_, line)) if HEADER.is_match(line.trim()) => {}
        Some((number, _)) => {
            return Err(ChangelogError::parse(
                file,
                number,
                "expected '--liquibase formatted sql' as the first line",
            ));
        }
        None => return Ok(Vec::new()),
    }

    let mut entries = Vec::new();
    let mut current: Option<PendingChangeSet> = None;

    for (number, line) in lines {
        let trimmed = line.trim();

        if CHANGESET_PREFIX.is_match(trimmed) {
            let captures = CHANGESET
                .captures(trimmed)
                .ok_or_else(|| ChangelogError::parse(file, number, "changeset must be written as 'author:id'"))?;
            if let Some(done) = current.take() {
                entries.push(ChangelogEntry::ChangeSet(done.finish(file)));
            }
            current = Some(PendingChangeSet {
                author: unquote(&captures[1]),
                id: unquote(&captures[2]),
                line: number,
                options: parse_options(file, number, &captures[3])?,
                comment: None,
                valid_checksums: Vec::new(),
                body: Vec::new(),
            });
            continue;
        }

        if let Some(captures) = INCLUDE.captures(trimmed) {
            if let Some(done) = current.take() {
                entries.push(ChangelogEntry::ChangeSet(done.finish(file)));
            }
            entries.push(ChangelogEntry::Include {
                path: captures[1].to_string(),
                relative_to_changelog: parse_include_options(file, number, &captures[2])?,
                line: number,
            });
            continue;
        }

        if let Some(captures) = COMMENT.captures(trimmed) {
            let changeset = current
                .as_mut()
                .ok_or_else(|| ChangelogError::parse(file, number, "comment outside of a changeset"))?;
            changeset.comment = Some(captures[1].trim().to_string());
            continue;
        }

        if let Some(captures) = VALID_CHECKSUM.captures(trimmed) {
            let changeset = current
                .as_mut()
                .ok_or_else(|| ChangelogError::parse(file, number, "validCheckSum outside of a changeset"))?;
            changeset.valid_checksums.push(captures[1].to_string());
            continue;
        }

        if ROLLBACK.is_match(trimmed) {
            continue;
        }

        if PRECONDITION.is_match(trimmed) {
            warn!("{file}:{number}: preconditions are not supported and are ignored");
            continue;
        }

        match current.as_mut() {
            Some(changeset) => changeset.body.push(line.to_string()),
            None if trimmed.is_empty() || trimmed.starts_with("--") => {}
            None => return Err(ChangelogError::parse(file, number, "SQL found before the first changeset")),
        }
    }

    if let Some(done) = current.take() {
        entries.push(ChangelogEntry::ChangeSet(done.finish(file)));
    }
    Ok(entries)
}

/// `"Jane Doe"` names the author `Jane Doe`.
fn unquote(value: &str) -> String {
    value.trim_matches('"').to_string()
}

fn parse_options(file: &str, line: usize, attributes: &str) -> Result<ChangeSetOptions, ChangelogError> {
    let mut options = ChangeSetOptions::default();

    for captures in ATTRIBUTE.captures_iter(attributes) {
        let name = &captures[1];
        let value = &captures[2];
        match name {
            "runOnChange" => options.run_on_change = parse_bool(file, line, name, value)?,
            "runAlways" => options.run_always = parse_bool(file, line, name, value)?,
            "failOnError" => options.fail_on_error = parse_bool(file, line, name, value)?,
            "runInTransaction" => options.run_in_transaction = parse_bool(file, line, name, value)?,
            "splitStatements" => options.split_statements = parse_bool(file, line, name, value)?,
            "stripComments" => options.strip_comments = parse_bool(file, line, name, value)?,
            "endDelimiter" => options.end_delimiter = Some(value.to_string()),
            "context" | "contextFilter" => options.context = Some(value.to_string()),
            "labels" => options.labels = Some(value.to_string()),
            other => debug!("{file}:{line}: ignoring changeset attribute '{other}'"),
        }
    }

    Ok(options)
}

fn parse_include_options(file: &str, line: usize, attributes: &str) -> Result<bool, ChangelogError> {
    let mut relative = false;
    for captures in ATTRIBUTE.captures_iter(attributes) {
        if &captures[1] == "relativeToChangelogFile" {
            relative = parse_bool(file, line, &captures[1], &captures[2])?;
        }
    }
    Ok(relative)
}

fn parse_bool(file: &str, line: usize, name: &str, value: &str) -> Result<bool, ChangelogError> {
    match value.to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(ChangelogError::parse(
            file,
            line,
            format!("attribute '{name}' expects true or false, got '{value}'"),
        )),
    }
}

/// Loads a changelog and everything it includes, in execution order.
pub struct ChangelogLoader<'a> {
    accessor: &'a CompositeAccessor,
}

impl<'a> ChangelogLoader<'a> {
    pub fn new(accessor: &'a CompositeAccessor) -> Self {
        Self { accessor }
    }

    pub fn load(&self, path: &str) -> Result<Vec<ChangeSet>, ChangelogError> {
        let mut changesets = Vec::new();
        let mut seen = HashSet::new();
        let mut chain = Vec::new();
        self.load_into(path, &mut chain, &mut seen, &mut changesets)?;
        Ok(changesets)
    }

    fn load_into(
        &self,
        path: &str,
        chain: &mut Vec<String>,
        seen: &mut HashSet<ChangeSetKey>,
        changesets: &mut Vec<ChangeSet>,
    ) -> Result<(), ChangelogError> {
        let resource = self.accessor.require(path)?;
        if chain.contains(&resource.logical_path) {
            return Err(ChangelogError::IncludeCycle {
                file: resource.logical_path,
            });
        }
        debug!("parsing changelog {} from {}", resource.logical_path, resource.location.display());

        chain.push(resource.logical_path.clone());
        for entry in parse_formatted_sql(&resource.logical_path, &resource.content)? {
            match entry {
                ChangelogEntry::ChangeSet(changeset) => {
                    if !seen.insert(changeset.key()) {
                        return Err(ChangelogError::DuplicateChangeSet {
                            id: changeset.id,
                            author: changeset.author,
                            file: changeset.file,
                        });
                    }
                    changesets.push(changeset);
                }
                ChangelogEntry::Include {
                    path: include,
                    relative_to_changelog,
                    ..
                } => {
                    let target = if relative_to_changelog {
                        sibling_path(&resource.logical_path, &include)
                    } else {
                        include
                    };
                    self.load_into(&target, chain, seen, changesets)?;
                }
            }
        }
        chain.pop();

        Ok(())
    }
}

fn sibling_path(parent: &str, child: &str) -> String {
    match parent.rfind('/') {
        Some(index) => format!("{}/{child}", &parent[..index]),
        None => child.to_string(),
    }
}
