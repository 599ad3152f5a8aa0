//! Test-only helpers: session builders, scripted collaborators, a local HTTP
//! responder and a throwaway git remote.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread::JoinHandle;

use chrono::{DateTime, TimeZone, Utc};

use crate::core::types::{ProjectBrief, SessionState, SessionStatus};
use crate::io::console::Prompter;
use crate::io::github::{
    CommitInfo, GithubError, IssueOutcome, IssueTracker, NewIssue, RepoHost, RepoRef,
};
use crate::io::llm::{Completion, CompletionError, CompletionRequest};

/// Fixed instant used by deterministic tests.
pub fn at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, minute, 0)
        .single()
        .expect("valid timestamp")
}

pub fn brief() -> ProjectBrief {
    ProjectBrief {
        project: "Todo".to_string(),
        tech: "Rust".to_string(),
        features: "lists, reminders".to_string(),
        platform: "cli".to_string(),
    }
}

/// An in-progress session at phase 0 with the given phase labels.
pub fn session_with_phases(phases: &[&str]) -> SessionState {
    let mut state = SessionState::default();
    state.configure(brief());
    state.phases = phases.iter().map(|p| (*p).to_string()).collect();
    state.current_phase = 0;
    state.status = SessionStatus::InProgress;
    state.repo_url = "https://github.com/acme/todo".to_string();
    state
}

/// Completion that replays scripted replies in order and records requests.
#[derive(Debug, Default)]
pub struct ScriptedCompletion {
    replies: RefCell<VecDeque<Result<String, CompletionError>>>,
    requests: RefCell<Vec<CompletionRequest>>,
}

impl ScriptedCompletion {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_results(replies.into_iter().map(|r| Ok(r.into())))
    }

    pub fn with_results(
        replies: impl IntoIterator<Item = Result<String, CompletionError>>,
    ) -> Self {
        Self {
            replies: RefCell::new(replies.into_iter().collect()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.borrow().clone()
    }

    pub fn remaining(&self) -> usize {
        self.replies.borrow().len()
    }
}

impl Completion for ScriptedCompletion {
    fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        self.requests.borrow_mut().push(request.clone());
        self.replies
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(CompletionError::Transport("no scripted reply".to_string())))
    }
}

/// Prompter fed from a fixed list of answers; `None` once they run out.
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    answers: VecDeque<String>,
    questions: Vec<String>,
    output: Vec<String>,
}

impl ScriptedPrompter {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn questions(&self) -> &[String] {
        &self.questions
    }

    pub fn output_lines(&self) -> &[String] {
        &self.output
    }

    /// All printed lines joined with newlines.
    pub fn transcript(&self) -> String {
        self.output.join("\n")
    }

    fn next_answer(&mut self, question: &str) -> Option<String> {
        self.questions.push(question.to_string());
        self.answers.pop_front().map(|a| a.trim().to_string())
    }
}

impl Prompter for ScriptedPrompter {
    fn ask(&mut self, question: &str) -> anyhow::Result<Option<String>> {
        Ok(self.next_answer(question))
    }

    fn ask_secret(&mut self, question: &str) -> anyhow::Result<Option<String>> {
        Ok(self.next_answer(question))
    }

    fn say(&mut self, line: &str) {
        self.output.push(line.to_string());
    }
}

/// Repo host replaying configured commits; the last one repeats.
#[derive(Debug)]
pub struct FakeRepoHost {
    commits: RefCell<VecDeque<Result<CommitInfo, GithubError>>>,
    pub diff: Result<String, GithubError>,
    calls: RefCell<Vec<String>>,
}

impl FakeRepoHost {
    pub fn with_commit(sha: &str, message: &str) -> Self {
        Self::with_commits(&[(sha, message)])
    }

    /// Successive `latest_commit` calls return these in order.
    pub fn with_commits(commits: &[(&str, &str)]) -> Self {
        Self {
            commits: RefCell::new(
                commits
                    .iter()
                    .map(|(sha, message)| {
                        Ok(CommitInfo {
                            sha: (*sha).to_string(),
                            message: (*message).to_string(),
                        })
                    })
                    .collect(),
            ),
            diff: Ok("diff --git a/src/lib.rs b/src/lib.rs\n+pub fn api() {}\n".to_string()),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn failing(err: GithubError) -> Self {
        Self {
            commits: RefCell::new(VecDeque::from([Err(err.clone())])),
            diff: Err(err),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

impl RepoHost for FakeRepoHost {
    fn latest_commit(&self, repo: &RepoRef) -> Result<CommitInfo, GithubError> {
        self.calls.borrow_mut().push(format!("latest_commit {repo}"));
        let mut commits = self.commits.borrow_mut();
        if commits.len() > 1 {
            return commits.pop_front().unwrap_or(Err(GithubError::NoCommits));
        }
        commits.front().cloned().unwrap_or(Err(GithubError::NoCommits))
    }

    fn commit_diff(&self, repo: &RepoRef, sha: &str) -> Result<String, GithubError> {
        self.calls.borrow_mut().push(format!("commit_diff {repo} {sha}"));
        self.diff.clone()
    }
}

/// Issue tracker that records what it was asked to create.
#[derive(Debug, Default)]
pub struct FakeIssueTracker {
    pub milestone_error: Option<GithubError>,
    milestones: RefCell<Vec<String>>,
    issues: RefCell<Vec<NewIssue>>,
}

impl FakeIssueTracker {
    pub fn milestones(&self) -> Vec<String> {
        self.milestones.borrow().clone()
    }

    pub fn issues(&self) -> Vec<NewIssue> {
        self.issues.borrow().clone()
    }
}

impl IssueTracker for FakeIssueTracker {
    fn create_milestone(
        &self,
        _repo: &RepoRef,
        title: &str,
        _description: &str,
    ) -> Result<u64, GithubError> {
        if let Some(err) = &self.milestone_error {
            return Err(err.clone());
        }
        let mut milestones = self.milestones.borrow_mut();
        milestones.push(title.to_string());
        Ok(milestones.len() as u64)
    }

    fn create_issue(&self, _repo: &RepoRef, issue: &NewIssue) -> IssueOutcome {
        let mut issues = self.issues.borrow_mut();
        issues.push(issue.clone());
        IssueOutcome {
            created: true,
            message: format!("Issue created: {}", issue.title),
            number: Some(issues.len() as u64),
        }
    }
}

/// One-request-per-connection HTTP responder on 127.0.0.1.
///
/// Serves the scripted `(status, body)` pairs in order, then stops.
/// [`MockHttpServer::finish`] returns the raw requests it received.
pub struct MockHttpServer {
    addr: String,
    handle: JoinHandle<Vec<String>>,
}

impl MockHttpServer {
    pub fn start(responses: Vec<(u16, String)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
        let addr = listener.local_addr().expect("local addr").to_string();
        let handle = std::thread::spawn(move || {
            let mut requests = Vec::new();
            for (status, body) in responses {
                let (mut stream, _) = listener.accept().expect("accept");
                requests.push(read_request(&mut stream));
                let response = format!(
                    "HTTP/1.1 {status} {}\r\nContent-Type: application/json\r\n\
                     Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    reason_phrase(status),
                    body.len(),
                );
                stream.write_all(response.as_bytes()).expect("write response");
                stream.flush().expect("flush response");
            }
            requests
        });
        Self {
            addr: format!("http://{addr}"),
            handle,
        }
    }

    pub fn base_url(&self) -> String {
        self.addr.clone()
    }

    pub fn finish(self) -> Vec<String> {
        self.handle.join().expect("mock server thread")
    }
}

fn read_request(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut chunk).expect("read request");
        if n == 0 {
            break buf.len();
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find_header_end(&buf) {
            break pos;
        }
    };
    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    let body_start = (header_end + 4).min(buf.len());
    while buf.len() - body_start < content_length {
        let n = stream.read(&mut chunk).expect("read body");
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    String::from_utf8_lossy(&buf).to_string()
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        403 => "Forbidden",
        404 => "Not Found",
        422 => "Unprocessable Entity",
        500 => "Internal Server Error",
        _ => "Status",
    }
}

/// A bare repository with one seeded commit on `main`, usable as a clone
/// source through its filesystem path.
pub struct TestRemote {
    _dir: tempfile::TempDir,
    bare: PathBuf,
}

impl TestRemote {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let bare = dir.path().join("remote.git");
        let seed = dir.path().join("seed");
        std::fs::create_dir_all(&seed).expect("mkdir seed");

        git(dir.path(), &["init", "-q", "--bare", "remote.git"]);
        git(&seed, &["init", "-q", "-b", "main"]);
        git(&seed, &["config", "user.name", "Seed"]);
        git(&seed, &["config", "user.email", "seed@example.com"]);
        std::fs::write(seed.join("README.md"), "# todo\n").expect("write readme");
        git(&seed, &["add", "-A"]);
        git(&seed, &["commit", "-q", "-m", "initial"]);
        let bare_str = bare.to_string_lossy().to_string();
        git(&seed, &["push", "-q", &bare_str, "main"]);
        git(&bare, &["symbolic-ref", "HEAD", "refs/heads/main"]);

        Self { _dir: dir, bare }
    }

    pub fn path(&self) -> &Path {
        &self.bare
    }

    pub fn url(&self) -> String {
        self.bare.to_string_lossy().to_string()
    }

    /// `file://` URL of the bare repository.
    pub fn file_url(&self) -> String {
        format!("file://{}", self.url())
    }

    /// Whether `branch` exists in the bare repository.
    pub fn has_branch(&self, branch: &str) -> bool {
        Command::new("git")
            .args(["rev-parse", "--verify", "--quiet", &format!("refs/heads/{branch}")])
            .current_dir(&self.bare)
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

impl Default for TestRemote {
    fn default() -> Self {
        Self::new()
    }
}

/// Run git in `dir`, panicking on failure.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .expect("spawn git");
    assert!(
        output.status.success(),
        "git {} failed: {}",
        args.join(" "),
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}
