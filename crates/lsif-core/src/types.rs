use crate::{LsifError, Result};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Characters escaped in stored file names: everything but `A-Z a-z 0-9 - _ . ! ~ * ' ( )`.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Zero-based line/character position inside a document.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    pub fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    pub fn new(start_line: u32, start_character: u32, end_line: u32, end_character: u32) -> Self {
        Self {
            start: Position::new(start_line, start_character),
            end: Position::new(end_line, end_character),
        }
    }

    /// Inclusive on both ends.
    pub fn contains(&self, position: Position) -> bool {
        self.start <= position && position <= self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub uri: String,
    pub range: Range,
}

impl Location {
    pub fn new(uri: impl Into<String>, range: Range) -> Self {
        Self {
            uri: uri.into(),
            range,
        }
    }

    /// Location inside another repository, addressed as `git://<repo>?<commit>#<path>`.
    pub fn remote(repository: &str, commit: &str, path: &str, range: Range) -> Self {
        Self::new(format!("git://{}?{}#{}", repository, commit, path), range)
    }
}

/// Hover content as stored in the dump. The contents are passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hover {
    pub contents: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<Range>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonikerKind {
    Import,
    #[default]
    Local,
    Export,
}

impl MonikerKind {
    /// Rank used when choosing which moniker to resolve first: import, local, export.
    pub fn preference(self) -> usize {
        match self {
            MonikerKind::Import => 0,
            MonikerKind::Local => 1,
            MonikerKind::Export => 2,
        }
    }
}

impl fmt::Display for MonikerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MonikerKind::Import => "import",
            MonikerKind::Local => "local",
            MonikerKind::Export => "export",
        };
        f.write_str(name)
    }
}

/// Query methods served by the `/request` endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryMethod {
    Hover,
    Definitions,
    References,
}

impl QueryMethod {
    pub const ALL: [QueryMethod; 3] = [
        QueryMethod::Hover,
        QueryMethod::Definitions,
        QueryMethod::References,
    ];

    pub fn parse(method: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.name() == method)
    }

    pub fn name(self) -> &'static str {
        match self {
            QueryMethod::Hover => "hover",
            QueryMethod::Definitions => "definitions",
            QueryMethod::References => "references",
        }
    }
}

/// A validated repository@commit pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepositoryCommit {
    pub repository: String,
    pub commit: String,
}

impl RepositoryCommit {
    pub fn new(repository: impl Into<String>, commit: impl Into<String>) -> Result<Self> {
        let repository = repository.into();
        let commit = commit.into();
        validate_repository(&repository)?;
        validate_commit(&commit)?;
        Ok(Self { repository, commit })
    }

    /// Filesystem-safe base name shared by every encoding of this dump.
    pub fn hash_key(&self) -> String {
        format!(
            "{}@{}",
            utf8_percent_encode(&self.repository, COMPONENT),
            self.commit
        )
    }
}

impl fmt::Display for RepositoryCommit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.repository, self.commit)
    }
}

pub fn validate_repository(repository: &str) -> Result<()> {
    if repository.is_empty() {
        return Err(LsifError::Validation(
            "Must specify the repository (usually of the form github.com/user/repo)".to_string(),
        ));
    }
    Ok(())
}

pub fn validate_commit(commit: &str) -> Result<()> {
    let valid = commit.len() == 40
        && commit
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    if !valid {
        return Err(LsifError::Validation(format!(
            "Must specify the commit as a 40 character hash {}",
            commit
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMMIT: &str = "0123456789abcdef0123456789abcdef01234567";

    #[test]
    fn positions_order_by_line_then_character() {
        assert!(Position::new(1, 9) < Position::new(2, 0));
        assert!(Position::new(2, 1) < Position::new(2, 3));
        assert!(Range::new(1, 2, 1, 5).contains(Position::new(1, 5)));
        assert!(!Range::new(1, 2, 1, 5).contains(Position::new(1, 6)));
    }

    #[test]
    fn commit_must_be_forty_lowercase_hex_characters() {
        assert!(validate_commit(COMMIT).is_ok());
        assert!(validate_commit(&COMMIT.to_uppercase()).is_err());
        assert!(validate_commit("abc").is_err());
        assert!(validate_commit(&format!("{}g", &COMMIT[..39])).is_err());
    }

    #[test]
    fn hash_key_encodes_the_repository() {
        let key = RepositoryCommit::new("github.com/foo/bar", COMMIT).unwrap();
        assert_eq!(key.hash_key(), format!("github.com%2Ffoo%2Fbar@{}", COMMIT));
        assert!(RepositoryCommit::new("", COMMIT).is_err());
    }

    #[test]
    fn hash_key_keeps_unreserved_marks_and_escapes_spaces() {
        let key = RepositoryCommit::new("my repo/~user(1)!*'", COMMIT).unwrap();
        assert_eq!(key.hash_key(), format!("my%20repo%2F~user(1)!*'@{}", COMMIT));
        let key = RepositoryCommit::new("a+b&c=d", COMMIT).unwrap();
        assert_eq!(key.hash_key(), format!("a%2Bb%26c%3Dd@{}", COMMIT));
    }

    #[test]
    fn remote_locations_use_git_uris() {
        let loc = Location::remote("github.com/foo/bar", COMMIT, "src/a.ts", Range::default());
        assert_eq!(loc.uri, format!("git://github.com/foo/bar?{}#src/a.ts", COMMIT));
    }

    #[test]
    fn moniker_kinds_rank_import_first() {
        assert!(MonikerKind::Import.preference() < MonikerKind::Local.preference());
        assert!(MonikerKind::Local.preference() < MonikerKind::Export.preference());
        let kind: MonikerKind = serde_json::from_str("\"import\"").unwrap();
        assert_eq!(kind, MonikerKind::Import);
        assert_eq!(MonikerKind::default(), MonikerKind::Local);
    }
}
