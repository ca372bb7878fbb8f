//! Issue tracker and code hosting interface.

pub mod error;
pub mod github;

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::snapshot::SourceSnapshot;

pub use error::{TrackerError, TrackerResult};
pub use github::GithubTracker;

/// A secret used to authenticate against the tracker. Never printed.
#[derive(Clone)]
pub struct TrackerCredential(String);

impl TrackerCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for TrackerCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TrackerCredential(***)")
    }
}

/// An `owner/name` repository identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

fn repo_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"^(?:(?:https?://)?(?:www\.)?github\.com/)?([A-Za-z0-9][A-Za-z0-9-]*)/([A-Za-z0-9._-]+?)(?:\.git)?/?$",
        )
        .expect("repository pattern is valid")
    })
}

impl RepoRef {
    /// Parse `owner/name` or a repository URL. A `.git` suffix is accepted.
    pub fn parse(input: &str) -> TrackerResult<Self> {
        let trimmed = input.trim();
        let caps = repo_pattern()
            .captures(trimmed)
            .ok_or_else(|| TrackerError::InvalidRepository(input.to_string()))?;
        let name = caps[2].to_string();
        if name == "." || name == ".." {
            return Err(TrackerError::InvalidRepository(input.to_string()));
        }
        Ok(Self {
            owner: caps[1].to_string(),
            name,
        })
    }

    /// Canonical web URL for the repository.
    pub fn url(&self) -> String {
        format!("https://github.com/{}/{}", self.owner, self.name)
    }
}

impl FromStr for RepoRef {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// An issue as fetched from the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub url: String,
}

/// A proposed change: the full source tree to commit on a new branch.
#[derive(Debug, Clone)]
pub struct ChangeRequest {
    pub title: String,
    pub body: String,
    /// Branch the change is committed to. Created by the tracker.
    pub head_branch: String,
    /// Branch the change targets.
    pub base_branch: String,
    pub snapshot: SourceSnapshot,
}

/// A change request accepted by the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedChangeRequest {
    pub number: u64,
    pub url: String,
}

/// Issue tracker and code hosting backend.
#[async_trait]
pub trait Tracker: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    async fn fetch_issue(&self, repo: &RepoRef, number: u64) -> TrackerResult<Issue>;

    async fn create_change_request(
        &self,
        repo: &RepoRef,
        request: ChangeRequest,
    ) -> TrackerResult<SubmittedChangeRequest>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_short_and_url_forms() {
        let expected = RepoRef {
            owner: "org".into(),
            name: "app".into(),
        };
        for input in [
            "org/app",
            "https://github.com/org/app",
            "https://github.com/org/app.git",
            "github.com/org/app/",
            " org/app ",
        ] {
            assert_eq!(RepoRef::parse(input).unwrap(), expected, "{input}");
        }
    }

    #[test]
    fn keeps_dots_inside_names() {
        let repo = RepoRef::parse("dagger/hello-dagger.js").unwrap();
        assert_eq!(repo.name, "hello-dagger.js");
        assert_eq!(repo.to_string(), "dagger/hello-dagger.js");
    }

    #[test]
    fn rejects_malformed_ids() {
        for input in ["", "org", "org/app/extra", "https://gitlab.com/org/app", "org/.."] {
            assert!(
                matches!(RepoRef::parse(input), Err(TrackerError::InvalidRepository(_))),
                "{input}"
            );
        }
    }

    #[test]
    fn credential_is_redacted() {
        let cred = TrackerCredential::new("ghp_secret");
        assert_eq!(format!("{cred:?}"), "TrackerCredential(***)");
        assert_eq!(cred.expose(), "ghp_secret");
    }
}
