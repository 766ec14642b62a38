//! Migration statements and SQL splitting

use std::fmt;
use std::path::Path;

use crate::error::{Error, Result};

const PREVIEW_CHARS: usize = 60;

/// One SQL statement; identity is its position in the migration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    sql: String,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into().trim().to_string(),
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Single-line head of the statement for progress output
    pub fn preview(&self) -> String {
        let collapsed = self.sql.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.chars().count() <= PREVIEW_CHARS {
            collapsed
        } else {
            let head: String = collapsed.chars().take(PREVIEW_CHARS).collect();
            format!("{}...", head)
        }
    }

    /// Policy this statement drops or creates, if any
    pub fn policy_action(&self) -> Option<PolicyAction> {
        PolicyAction::parse(&self.sql)
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

/// A named, ordered list of statements
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub name: String,
    statements: Vec<Statement>,
}

impl Migration {
    pub fn new<I, S>(name: &str, statements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.to_string(),
            statements: statements
                .into_iter()
                .map(Statement::new)
                .filter(|s| !s.sql().is_empty())
                .collect(),
        }
    }

    /// Split a SQL script into a migration
    pub fn from_sql(name: &str, sql: &str) -> Result<Self> {
        Ok(Self::new(name, split_statements(sql)?))
    }

    /// Read and split a `.sql` file; the migration is named after the file stem
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let sql = std::fs::read_to_string(path)?;
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("migration");
        Self::from_sql(name, &sql)
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// The whole migration as one pasteable script
    pub fn full_sql(&self) -> String {
        self.statements
            .iter()
            .map(Statement::sql)
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// `CREATE POLICY` statements not preceded by a matching
    /// `DROP POLICY IF EXISTS`. Those fail when the migration is re-run.
    pub fn check_idempotent(&self) -> Vec<IdempotencyWarning> {
        let mut dropped: Vec<(String, String)> = Vec::new();
        let mut warnings = Vec::new();

        for (idx, statement) in self.statements.iter().enumerate() {
            match statement.policy_action() {
                Some(PolicyAction::DropIfExists { name, table }) => dropped.push((name, table)),
                Some(PolicyAction::Create { name, table }) => {
                    if !dropped.iter().any(|(n, t)| *n == name && *t == table) {
                        warnings.push(IdempotencyWarning {
                            position: idx + 1,
                            policy: name,
                            table,
                        });
                    }
                }
                None => {}
            }
        }

        warnings
    }
}

/// A `CREATE POLICY` that would fail on a second run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyWarning {
    /// 1-based statement position
    pub position: usize,
    pub policy: String,
    pub table: String,
}

impl fmt::Display for IdempotencyWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "statement {} creates policy \"{}\" on {} without a preceding DROP POLICY IF EXISTS",
            self.position, self.policy, self.table
        )
    }
}

/// Policy-level effect of a statement. Tables are schema-qualified,
/// defaulting to `public`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyAction {
    Create { name: String, table: String },
    DropIfExists { name: String, table: String },
}

impl PolicyAction {
    fn parse(sql: &str) -> Option<Self> {
        let words = leading_identifiers(sql, 7);
        let keyword = |i: usize, kw: &str| words.get(i).map_or(false, |w| w.is_keyword(kw));

        if keyword(0, "create") && keyword(1, "policy") && keyword(3, "on") {
            return Some(PolicyAction::Create {
                name: words.get(2)?.name(),
                table: words.get(4)?.qualified_table(),
            });
        }
        if keyword(0, "drop")
            && keyword(1, "policy")
            && keyword(2, "if")
            && keyword(3, "exists")
            && keyword(5, "on")
        {
            return Some(PolicyAction::DropIfExists {
                name: words.get(4)?.name(),
                table: words.get(6)?.qualified_table(),
            });
        }
        None
    }
}

#[derive(Debug)]
struct Ident {
    parts: Vec<String>,
    quoted: bool,
}

impl Ident {
    fn is_keyword(&self, kw: &str) -> bool {
        !self.quoted && self.parts.len() == 1 && self.parts[0] == kw
    }

    fn name(&self) -> String {
        self.parts.join(".")
    }

    fn qualified_table(&self) -> String {
        if self.parts.len() == 1 {
            format!("public.{}", self.parts[0])
        } else {
            self.name()
        }
    }
}

/// Reads up to `limit` (possibly dotted, possibly quoted) identifiers from
/// the head of a statement, stopping at the first `(` or `;`. Bare parts
/// are lowercased the way Postgres folds them.
fn leading_identifiers(sql: &str, limit: usize) -> Vec<Ident> {
    let chars: Vec<char> = strip_comments(sql).chars().collect();
    let mut out = Vec::new();
    let mut i = 0;

    while i < chars.len() && out.len() < limit {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == '(' || c == ';' {
            break;
        }

        let mut parts = Vec::new();
        let mut quoted = false;
        loop {
            if i < chars.len() && chars[i] == '"' {
                quoted = true;
                let mut part = String::new();
                i += 1;
                while i < chars.len() {
                    if chars[i] == '"' {
                        if chars.get(i + 1) == Some(&'"') {
                            part.push('"');
                            i += 2;
                            continue;
                        }
                        i += 1;
                        break;
                    }
                    part.push(chars[i]);
                    i += 1;
                }
                parts.push(part);
            } else {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$') {
                    i += 1;
                }
                if i == start {
                    break;
                }
                parts.push(chars[start..i].iter().collect::<String>().to_lowercase());
            }
            if chars.get(i) == Some(&'.') {
                i += 1;
            } else {
                break;
            }
        }

        if parts.is_empty() {
            i += 1;
        } else {
            out.push(Ident { parts, quoted });
        }
    }

    out
}

/// Comments removed with the same scanner used for splitting; text that
/// does not scan cleanly is returned unchanged.
fn strip_comments(sql: &str) -> String {
    match split_statements(sql) {
        Ok(parts) => parts.join("\n"),
        Err(_) => sql.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Scan {
    Normal,
    SingleQuote,
    DoubleQuote,
    Dollar(String),
    LineComment,
    BlockComment(usize),
}

/// Split a script on top-level `;`.
///
/// Quoted strings, quoted identifiers and dollar-quoted bodies are kept
/// intact. Top-level comments are dropped, so comment-only chunks vanish.
/// Each returned statement ends with `;`.
pub fn split_statements(sql: &str) -> Result<Vec<String>> {
    let chars: Vec<char> = sql.chars().collect();
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut state = Scan::Normal;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        match &state {
            Scan::Normal => match c {
                '\'' => {
                    current.push(c);
                    state = Scan::SingleQuote;
                }
                '"' => {
                    current.push(c);
                    state = Scan::DoubleQuote;
                }
                '-' if next == Some('-') => {
                    state = Scan::LineComment;
                    i += 1;
                }
                '/' if next == Some('*') => {
                    state = Scan::BlockComment(1);
                    i += 1;
                }
                '$' => match dollar_tag(&chars, i) {
                    Some(tag) => {
                        current.push_str(&tag);
                        i += tag.chars().count() - 1;
                        state = Scan::Dollar(tag);
                    }
                    None => current.push(c),
                },
                ';' => finish(&mut current, &mut statements),
                _ => current.push(c),
            },
            Scan::SingleQuote | Scan::DoubleQuote => {
                let quote = if state == Scan::SingleQuote { '\'' } else { '"' };
                current.push(c);
                if c == quote {
                    if next == Some(quote) {
                        current.push(quote);
                        i += 1;
                    } else {
                        state = Scan::Normal;
                    }
                }
            }
            Scan::Dollar(tag) => {
                let tag_len = tag.chars().count();
                if c == '$' && chars[i..].iter().take(tag_len).copied().eq(tag.chars()) {
                    current.push_str(tag);
                    i += tag_len - 1;
                    state = Scan::Normal;
                } else {
                    current.push(c);
                }
            }
            Scan::LineComment => {
                if c == '\n' {
                    current.push('\n');
                    state = Scan::Normal;
                }
            }
            Scan::BlockComment(depth) => {
                let depth = *depth;
                if c == '/' && next == Some('*') {
                    state = Scan::BlockComment(depth + 1);
                    i += 1;
                } else if c == '*' && next == Some('/') {
                    i += 1;
                    if depth == 1 {
                        current.push(' ');
                        state = Scan::Normal;
                    } else {
                        state = Scan::BlockComment(depth - 1);
                    }
                }
            }
        }
        i += 1;
    }

    match state {
        Scan::Normal | Scan::LineComment => {
            finish(&mut current, &mut statements);
            Ok(statements)
        }
        Scan::SingleQuote => Err(Error::sql("unterminated string literal")),
        Scan::DoubleQuote => Err(Error::sql("unterminated quoted identifier")),
        Scan::Dollar(tag) => Err(Error::sql(format!("unterminated dollar-quoted body {}", tag))),
        Scan::BlockComment(_) => Err(Error::sql("unterminated block comment")),
    }
}

fn finish(current: &mut String, statements: &mut Vec<String>) {
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        statements.push(format!("{};", trimmed));
    }
    current.clear();
}

/// `$$` or `$tag$` starting at `start`, unless the `$` continues an identifier.
fn dollar_tag(chars: &[char], start: usize) -> Option<String> {
    if start > 0 {
        let prev = chars[start - 1];
        if prev.is_alphanumeric() || prev == '_' {
            return None;
        }
    }
    let mut end = start + 1;
    while end < chars.len() && (chars[end].is_alphanumeric() || chars[end] == '_') {
        end += 1;
    }
    if chars.get(end) != Some(&'$') {
        return None;
    }
    let tag: String = chars[start..=end].iter().collect();
    if tag.chars().nth(1).map_or(false, |c| c.is_ascii_digit()) {
        return None;
    }
    Some(tag)
}
