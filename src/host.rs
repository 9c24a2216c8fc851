//! Code host integration: pull requests, issues and branch pushes.
//!
//! [`GhCli`] shells out to `git` and the GitHub CLI in a repository
//! directory. The run-loop only needs the pull request half of
//! [`CodeHost`]; the issue operations round out the contract.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::LazyLock;
use tokio::process::Command;
use tracing::{debug, warn};

static PR_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/pull/(\d+)").expect("pull url regex is valid"));

static ISSUE_NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/issues/(\d+)").expect("issue url regex is valid"));

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrRequest {
    pub title: String,
    pub body: String,
    pub base: Option<String>,
    pub draft: bool,
    pub labels: Vec<String>,
}

impl PrRequest {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PullRequest {
    pub number: u64,
    pub url: String,
    pub branch: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
    /// `open` or `closed`
    pub state: String,
}

#[async_trait]
pub trait CodeHost: Send + Sync {
    async fn create_pr(&self, request: &PrRequest) -> Result<PullRequest>;

    /// Open pull request for the current branch, if any.
    async fn existing_pr(&self) -> Result<Option<PullRequest>>;

    /// Push the current branch and set its upstream.
    async fn push_branch(&self) -> bool;

    async fn default_branch(&self) -> Result<String>;

    async fn create_issue(&self, title: &str, body: &str, labels: &[String]) -> Result<Issue>;

    async fn close_issue(&self, number: u64) -> Result<()>;

    async fn list_issues(&self, labels: &[String]) -> Result<Vec<Issue>>;

    async fn get_issue(&self, number: u64) -> Result<Option<Issue>>;
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GhPr {
    number: u64,
    url: String,
    #[serde(default)]
    head_ref_name: String,
}

#[derive(Deserialize)]
struct GhLabel {
    name: String,
}

#[derive(Deserialize)]
struct GhIssue {
    number: u64,
    title: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    labels: Vec<GhLabel>,
    #[serde(default)]
    state: String,
}

impl From<GhIssue> for Issue {
    fn from(issue: GhIssue) -> Self {
        Issue {
            number: issue.number,
            title: issue.title,
            body: issue.body,
            labels: issue.labels.into_iter().map(|l| l.name).collect(),
            state: issue.state.to_lowercase(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GhRepo {
    default_branch_ref: GhBranchRef,
}

#[derive(Deserialize)]
struct GhBranchRef {
    name: String,
}

const ISSUE_FIELDS: &str = "number,title,body,labels,state";

/// GitHub via the `gh` CLI.
pub struct GhCli {
    dir: PathBuf,
    gh_cmd: String,
    git_cmd: String,
}

impl GhCli {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            gh_cmd: "gh".to_string(),
            git_cmd: "git".to_string(),
        }
    }

    pub fn with_gh_cmd(mut self, cmd: impl Into<String>) -> Self {
        self.gh_cmd = cmd.into();
        self
    }

    pub fn with_git_cmd(mut self, cmd: impl Into<String>) -> Self {
        self.git_cmd = cmd.into();
        self
    }

    async fn run(&self, program: &str, args: &[&str]) -> Result<String> {
        debug!(program, args = ?args, dir = %self.dir.display(), "running");
        let output = Command::new(program)
            .args(args)
            .current_dir(&self.dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .with_context(|| format!("Failed to run {} {}", program, args.first().unwrap_or(&"")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("{} {} failed: {}", program, args.join(" "), stderr.trim());
        }
        let stdout = String::from_utf8(output.stdout)
            .with_context(|| format!("Invalid UTF-8 in {} output", program))?;
        Ok(stdout.trim().to_string())
    }

    async fn gh(&self, args: &[&str]) -> Result<String> {
        self.run(&self.gh_cmd, args).await
    }

    async fn current_branch(&self) -> Result<String> {
        self.run(&self.git_cmd, &["rev-parse", "--abbrev-ref", "HEAD"])
            .await
    }
}

fn number_from_url(re: &Regex, url: &str) -> Option<u64> {
    re.captures(url).and_then(|caps| caps[1].parse().ok())
}

#[async_trait]
impl CodeHost for GhCli {
    async fn create_pr(&self, request: &PrRequest) -> Result<PullRequest> {
        let mut args = vec![
            "pr",
            "create",
            "--title",
            &request.title,
            "--body",
            &request.body,
        ];
        if let Some(ref base) = request.base {
            args.extend(["--base", base]);
        }
        if request.draft {
            args.push("--draft");
        }
        for label in &request.labels {
            args.extend(["--label", label]);
        }

        let output = self.gh(&args).await?;
        let url = output
            .lines()
            .rev()
            .find(|l| l.contains("/pull/"))
            .unwrap_or(&output)
            .trim()
            .to_string();
        let number = number_from_url(&PR_NUMBER, &url)
            .with_context(|| format!("Could not find a pull request number in '{}'", url))?;
        let branch = self.current_branch().await.unwrap_or_default();

        Ok(PullRequest {
            number,
            url,
            branch,
        })
    }

    async fn existing_pr(&self) -> Result<Option<PullRequest>> {
        // `gh pr view` exits non-zero when the branch has no pull request
        let Ok(json) = self.gh(&["pr", "view", "--json", "number,url,headRefName"]).await else {
            return Ok(None);
        };
        let pr: GhPr = serde_json::from_str(&json).context("Failed to parse gh pr view output")?;
        Ok(Some(PullRequest {
            number: pr.number,
            url: pr.url,
            branch: pr.head_ref_name,
        }))
    }

    async fn push_branch(&self) -> bool {
        match self
            .run(&self.git_cmd, &["push", "-u", "origin", "HEAD"])
            .await
        {
            Ok(_) => true,
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "push failed");
                false
            }
        }
    }

    async fn default_branch(&self) -> Result<String> {
        let json = self.gh(&["repo", "view", "--json", "defaultBranchRef"]).await?;
        let repo: GhRepo = serde_json::from_str(&json).context("Failed to parse gh repo view output")?;
        Ok(repo.default_branch_ref.name)
    }

    async fn create_issue(&self, title: &str, body: &str, labels: &[String]) -> Result<Issue> {
        let mut args = vec!["issue", "create", "--title", title, "--body", body];
        for label in labels {
            args.extend(["--label", label.as_str()]);
        }
        let url = self.gh(&args).await?;
        let number = number_from_url(&ISSUE_NUMBER, &url)
            .with_context(|| format!("Could not find an issue number in '{}'", url))?;
        Ok(Issue {
            number,
            title: title.to_string(),
            body: body.to_string(),
            labels: labels.to_vec(),
            state: "open".to_string(),
        })
    }

    async fn close_issue(&self, number: u64) -> Result<()> {
        self.gh(&["issue", "close", &number.to_string()]).await?;
        Ok(())
    }

    async fn list_issues(&self, labels: &[String]) -> Result<Vec<Issue>> {
        let mut args = vec!["issue", "list", "--json", ISSUE_FIELDS];
        for label in labels {
            args.extend(["--label", label.as_str()]);
        }
        let json = self.gh(&args).await?;
        let issues: Vec<GhIssue> =
            serde_json::from_str(&json).context("Failed to parse gh issue list output")?;
        Ok(issues.into_iter().map(Issue::from).collect())
    }

    async fn get_issue(&self, number: u64) -> Result<Option<Issue>> {
        let number = number.to_string();
        let Ok(json) = self
            .gh(&["issue", "view", &number, "--json", ISSUE_FIELDS])
            .await
        else {
            return Ok(None);
        };
        let issue: GhIssue = serde_json::from_str(&json).context("Failed to parse gh issue view output")?;
        Ok(Some(issue.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_from_url() {
        assert_eq!(
            number_from_url(&PR_NUMBER, "https://github.com/acme/shop/pull/42"),
            Some(42)
        );
        assert_eq!(
            number_from_url(&ISSUE_NUMBER, "https://github.com/acme/shop/issues/7"),
            Some(7)
        );
        assert_eq!(number_from_url(&PR_NUMBER, "no url here"), None);
    }

    #[test]
    fn test_gh_issue_conversion() {
        let json = r#"[{"number":3,"title":"Flaky login test","body":"","labels":[{"name":"bug"}],"state":"OPEN"}]"#;
        let issues: Vec<GhIssue> = serde_json::from_str(json).unwrap();
        let issue: Issue = issues.into_iter().next().unwrap().into();
        assert_eq!(issue.labels, vec!["bug"]);
        assert_eq!(issue.state, "open");
    }

    #[cfg(unix)]
    mod cli {
        use super::super::*;
        use std::os::unix::fs::PermissionsExt;
        use tempfile::TempDir;

        /// Script that records its arguments and prints `stdout`.
        fn fake_tool(dir: &TempDir, name: &str, stdout: &str, exit: i32) -> String {
            let path = dir.path().join(name);
            let log = dir.path().join(format!("{}.args", name));
            std::fs::write(
                &path,
                format!(
                    "#!/bin/sh\necho \"$@\" >> '{}'\ncat <<'EOF'\n{}\nEOF\nexit {}\n",
                    log.display(),
                    stdout,
                    exit
                ),
            )
            .unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path.to_string_lossy().to_string()
        }

        fn recorded_args(dir: &TempDir, name: &str) -> String {
            std::fs::read_to_string(dir.path().join(format!("{}.args", name))).unwrap_or_default()
        }

        #[tokio::test]
        async fn test_create_pr_parses_number() {
            let dir = TempDir::new().unwrap();
            let gh = fake_tool(&dir, "gh", "https://github.com/acme/shop/pull/17", 0);
            let git = fake_tool(&dir, "git", "claw/auth", 0);
            let host = GhCli::new(dir.path()).with_gh_cmd(gh).with_git_cmd(git);

            let mut request = PrRequest::new("Story 1: login", "body");
            request.draft = true;
            request.labels = vec!["claw".to_string()];
            let pr = host.create_pr(&request).await.unwrap();

            assert_eq!(pr.number, 17);
            assert_eq!(pr.branch, "claw/auth");
            let args = recorded_args(&dir, "gh");
            assert!(args.contains("pr create --title Story 1: login --body body --draft --label claw"));
        }

        #[tokio::test]
        async fn test_existing_pr_none_on_failure() {
            let dir = TempDir::new().unwrap();
            let gh = fake_tool(&dir, "gh", "no pull requests found", 1);
            let host = GhCli::new(dir.path()).with_gh_cmd(gh);
            assert!(host.existing_pr().await.unwrap().is_none());
        }

        #[tokio::test]
        async fn test_existing_pr_parses_json() {
            let dir = TempDir::new().unwrap();
            let gh = fake_tool(
                &dir,
                "gh",
                r#"{"number":5,"url":"https://github.com/acme/shop/pull/5","headRefName":"feature/auth"}"#,
                0,
            );
            let host = GhCli::new(dir.path()).with_gh_cmd(gh);
            let pr = host.existing_pr().await.unwrap().unwrap();
            assert_eq!(pr.number, 5);
            assert_eq!(pr.branch, "feature/auth");
        }

        #[tokio::test]
        async fn test_push_branch_reports_failure() {
            let dir = TempDir::new().unwrap();
            let ok = GhCli::new(dir.path()).with_git_cmd(fake_tool(&dir, "git", "", 0));
            assert!(ok.push_branch().await);
            assert!(recorded_args(&dir, "git").contains("push -u origin HEAD"));

            let failing = GhCli::new(dir.path()).with_git_cmd(fake_tool(&dir, "git-bad", "", 1));
            assert!(!failing.push_branch().await);
        }

        #[tokio::test]
        async fn test_default_branch() {
            let dir = TempDir::new().unwrap();
            let gh = fake_tool(&dir, "gh", r#"{"defaultBranchRef":{"name":"main"}}"#, 0);
            let host = GhCli::new(dir.path()).with_gh_cmd(gh);
            assert_eq!(host.default_branch().await.unwrap(), "main");
        }

        #[tokio::test]
        async fn test_issue_operations() {
            let dir = TempDir::new().unwrap();
            let gh = fake_tool(&dir, "gh", "https://github.com/acme/shop/issues/9", 0);
            let host = GhCli::new(dir.path()).with_gh_cmd(gh);

            let issue = host
                .create_issue("Blocked: story 2", "details", &["blocked".to_string()])
                .await
                .unwrap();
            assert_eq!(issue.number, 9);
            host.close_issue(9).await.unwrap();
            let args = recorded_args(&dir, "gh");
            assert!(args.contains("issue create --title Blocked: story 2 --body details --label blocked"));
            assert!(args.contains("issue close 9"));
        }

        #[tokio::test]
        async fn test_get_issue_missing_is_none() {
            let dir = TempDir::new().unwrap();
            let gh = fake_tool(&dir, "gh", "not found", 1);
            let host = GhCli::new(dir.path()).with_gh_cmd(gh);
            assert!(host.get_issue(404).await.unwrap().is_none());
        }
    }
}
