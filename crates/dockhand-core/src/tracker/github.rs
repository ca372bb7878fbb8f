//! GitHub REST client for issues and pull requests.
//!
//! Change requests are submitted through the Git Data API: every file of the
//! snapshot is uploaded as a blob, a tree is built from them, committed on top
//! of the base branch, pushed to a fresh head branch and opened as a pull
//! request. The commit replaces the whole tree, so files absent from the
//! snapshot are deleted on the head branch.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures::{stream, FutureExt, StreamExt, TryStreamExt};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use super::error::{TrackerError, TrackerResult};
use super::{ChangeRequest, Issue, RepoRef, SubmittedChangeRequest, Tracker, TrackerCredential};

/// Public GitHub API endpoint.
pub const DEFAULT_API_BASE: &str = "https://api.github.com";

const BLOB_UPLOAD_CONCURRENCY: usize = 8;

/// GitHub-backed tracker.
#[derive(Debug, Clone)]
pub struct GithubTracker {
    http: Client,
    credential: TrackerCredential,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct IssueResponse {
    number: u64,
    title: String,
    body: Option<String>,
    html_url: String,
}

#[derive(Debug, Deserialize)]
struct RefResponse {
    object: ShaObject,
}

#[derive(Debug, Deserialize)]
struct ShaObject {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct PullResponse {
    number: u64,
    html_url: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    message: String,
}

impl GithubTracker {
    /// Create a client against the public GitHub API.
    pub fn new(credential: TrackerCredential) -> TrackerResult<Self> {
        Self::with_api_base(credential, DEFAULT_API_BASE)
    }

    /// Create a client against a custom API base (GitHub Enterprise, mocks).
    pub fn with_api_base(
        credential: TrackerCredential,
        api_base: impl Into<String>,
    ) -> TrackerResult<Self> {
        let http = Client::builder()
            .user_agent(concat!("dockhand/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            credential,
            api_base: api_base.into().trim_end_matches('/').to_string(),
        })
    }

    fn repo_url(&self, repo: &RepoRef, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.api_base, repo.owner, repo.name, path
        )
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .bearer_auth(self.credential.expose())
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    async fn get<T: DeserializeOwned>(&self, url: &str) -> TrackerResult<T> {
        let response = self.authorized(self.http.get(url)).send().await?;
        decode(url, response).await
    }

    async fn post<T: DeserializeOwned>(&self, url: &str, body: serde_json::Value) -> TrackerResult<T> {
        let response = self.authorized(self.http.post(url)).json(&body).send().await?;
        decode(url, response).await
    }

    async fn upload_blob(&self, repo: &RepoRef, path: &str, contents: &[u8]) -> TrackerResult<serde_json::Value> {
        let blob: ShaObject = self
            .post(
                &self.repo_url(repo, "git/blobs"),
                json!({ "content": BASE64.encode(contents), "encoding": "base64" }),
            )
            .await?;
        Ok(json!({ "path": path, "mode": "100644", "type": "blob", "sha": blob.sha }))
    }
}

async fn decode<T: DeserializeOwned>(url: &str, response: Response) -> TrackerResult<T> {
    let status = response.status();
    if status.is_success() {
        return response
            .json::<T>()
            .await
            .map_err(|e| TrackerError::Decode(format!("{url}: {e}")));
    }
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorResponse>(&text)
        .map(|e| e.message)
        .unwrap_or(text);
    Err(match status {
        StatusCode::NOT_FOUND => TrackerError::NotFound(format!("{url}: {message}")),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => TrackerError::Unauthorized(message),
        _ => TrackerError::Api {
            status: status.as_u16(),
            message,
        },
    })
}

#[async_trait]
impl Tracker for GithubTracker {
    fn name(&self) -> &str {
        "github"
    }

    async fn fetch_issue(&self, repo: &RepoRef, number: u64) -> TrackerResult<Issue> {
        let issue: IssueResponse = self
            .get(&self.repo_url(repo, &format!("issues/{number}")))
            .await?;
        debug!(repo = %repo, number, "fetched issue");
        Ok(Issue {
            number: issue.number,
            title: issue.title,
            body: issue.body.unwrap_or_default(),
            url: issue.html_url,
        })
    }

    async fn create_change_request(
        &self,
        repo: &RepoRef,
        request: ChangeRequest,
    ) -> TrackerResult<SubmittedChangeRequest> {
        let base: RefResponse = self
            .get(&self.repo_url(repo, &format!("git/ref/heads/{}", request.base_branch)))
            .await?;

        let uploads: Vec<_> = request
            .snapshot
            .files()
            .map(|(path, contents)| self.upload_blob(repo, path, contents).boxed())
            .collect();
        let entries: Vec<serde_json::Value> = stream::iter(uploads)
            .buffer_unordered(BLOB_UPLOAD_CONCURRENCY)
            .try_collect()
            .await?;

        let tree: ShaObject = self
            .post(&self.repo_url(repo, "git/trees"), json!({ "tree": entries }))
            .await?;

        let commit: ShaObject = self
            .post(
                &self.repo_url(repo, "git/commits"),
                json!({
                    "message": request.title,
                    "tree": tree.sha,
                    "parents": [base.object.sha],
                }),
            )
            .await?;

        let _: serde_json::Value = self
            .post(
                &self.repo_url(repo, "git/refs"),
                json!({
                    "ref": format!("refs/heads/{}", request.head_branch),
                    "sha": commit.sha,
                }),
            )
            .await?;

        let pull: PullResponse = self
            .post(
                &self.repo_url(repo, "pulls"),
                json!({
                    "title": request.title,
                    "body": request.body,
                    "head": request.head_branch,
                    "base": request.base_branch,
                }),
            )
            .await?;

        info!(repo = %repo, number = pull.number, url = %pull.html_url, "opened pull request");
        Ok(SubmittedChangeRequest {
            number: pull.number,
            url: pull.html_url,
        })
    }
}
