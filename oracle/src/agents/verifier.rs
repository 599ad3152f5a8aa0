//! Phase verification against the latest pushed commit.
//!
//! A commit matches when its message contains `phase-{n}`. An optional
//! semantic judge reviews the commit diff and may veto a match; a judge that
//! fails to answer never blocks progress.

use tracing::{debug, info, instrument, warn};

use crate::core::types::VerifyOutcome;
use crate::io::github::{RepoHost, parse_repo_url};
use crate::io::llm::{Completion, CompletionRequest};
use crate::io::prompt::Prompts;
use crate::io::repo_context::truncate_utf8;

const JUDGE_TEMPERATURE: f32 = 0.1;
const JUDGE_MAX_TOKENS: u32 = 100;
const DIFF_UNAVAILABLE: &str = "(diff unavailable)";

pub struct Verifier<'a> {
    host: &'a dyn RepoHost,
    judge: Option<&'a dyn Completion>,
    diff_limit_bytes: usize,
}

impl<'a> Verifier<'a> {
    pub fn new(host: &'a dyn RepoHost, diff_limit_bytes: usize) -> Self {
        Self {
            host,
            judge: None,
            diff_limit_bytes,
        }
    }

    /// Enable semantic review of matched commits.
    pub fn with_judge(mut self, judge: &'a dyn Completion) -> Self {
        self.judge = Some(judge);
        self
    }

    /// Check the latest commit of `repo_url` for 1-based `phase_number`.
    #[instrument(skip_all, fields(phase = phase_number))]
    pub fn verify(&self, repo_url: &str, phase_number: usize) -> VerifyOutcome {
        let repo = match parse_repo_url(repo_url) {
            Ok(repo) => repo,
            Err(err) => return VerifyOutcome::rejected(err.to_string()),
        };
        let commit = match self.host.latest_commit(&repo) {
            Ok(commit) => commit,
            Err(err) => {
                warn!(error = %err, "could not read latest commit");
                return VerifyOutcome::rejected(err.to_string());
            }
        };

        let expected = format!("phase-{phase_number}");
        if !commit.message.to_lowercase().contains(&expected) {
            debug!(sha = %commit.sha, "latest commit does not name the phase");
            return VerifyOutcome {
                matched: false,
                message: format!(
                    "Latest commit was: '{}' (expected '{expected}')",
                    commit.message.trim()
                ),
                commit_sha: Some(commit.sha),
            };
        }

        let Some(judge) = self.judge else {
            info!(sha = %commit.sha, "phase verified");
            return VerifyOutcome {
                matched: true,
                message: format!("Matched commit: '{}'", commit.message.trim()),
                commit_sha: Some(commit.sha),
            };
        };

        let diff = match self.host.commit_diff(&repo, &commit.sha) {
            Ok(diff) => truncate_utf8(&diff, self.diff_limit_bytes).to_string(),
            Err(err) => {
                debug!(error = %err, "diff unavailable for judge");
                DIFF_UNAVAILABLE.to_string()
            }
        };
        let (matched, message) = match self.ask_judge(judge, phase_number, &commit.message, &diff) {
            Ok(opinion) if opinion.to_uppercase().starts_with("NO") => {
                info!(sha = %commit.sha, "judge rejected matched commit");
                (false, format!("Matched commit but the review rejected it: {opinion}"))
            }
            Ok(opinion) => (true, format!("Matched commit and the review agreed: {opinion}")),
            Err(err) => {
                warn!(error = %err, "semantic review failed, accepting textual match");
                (
                    true,
                    format!(
                        "Matched commit: '{}' (review skipped: {err})",
                        commit.message.trim()
                    ),
                )
            }
        };
        VerifyOutcome {
            matched,
            message,
            commit_sha: Some(commit.sha),
        }
    }

    fn ask_judge(
        &self,
        judge: &dyn Completion,
        phase_number: usize,
        commit_message: &str,
        diff: &str,
    ) -> anyhow::Result<String> {
        let prompt = Prompts::new().judge(phase_number, commit_message, diff)?;
        let reply = judge.complete(&CompletionRequest::new(
            prompt,
            JUDGE_TEMPERATURE,
            JUDGE_MAX_TOKENS,
        ))?;
        Ok(reply.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::github::GithubError;
    use crate::io::llm::CompletionError;
    use crate::test_support::{FakeRepoHost, ScriptedCompletion};

    const REPO: &str = "https://github.com/acme/todo";

    #[test]
    fn unrelated_commit_is_rejected() {
        let host = FakeRepoHost::with_commit("abc", "fix bug");
        let outcome = Verifier::new(&host, 5000).verify(REPO, 2);
        assert!(!outcome.matched);
        assert!(outcome.message.contains("expected 'phase-2'"));
        assert_eq!(host.calls(), ["latest_commit acme/todo"]);
    }

    #[test]
    fn match_is_case_insensitive() {
        let host = FakeRepoHost::with_commit("abc", "PHASE-2: Build API complete");
        let outcome = Verifier::new(&host, 5000).verify(REPO, 2);
        assert!(outcome.matched);
        assert_eq!(outcome.commit_sha.as_deref(), Some("abc"));
    }

    #[test]
    fn judge_can_veto_a_match() {
        let host = FakeRepoHost::with_commit("abc", "phase-2: api complete");
        let judge = ScriptedCompletion::new(["NO. The diff only touches the README."]);
        let outcome = Verifier::new(&host, 5000).with_judge(&judge).verify(REPO, 2);
        assert!(!outcome.matched);
        assert!(outcome.message.contains("README"));
        assert!(judge.requests()[0].prompt.contains("+pub fn api() {}"));
    }

    #[test]
    fn judge_approval_and_failure_both_accept() {
        let host = FakeRepoHost::with_commit("abc", "phase-2: api complete");
        let judge = ScriptedCompletion::new(["YES, handlers were added."]);
        assert!(Verifier::new(&host, 5000).with_judge(&judge).verify(REPO, 2).matched);

        let broken = ScriptedCompletion::with_results([Err(CompletionError::Empty)]);
        let outcome = Verifier::new(&host, 5000).with_judge(&broken).verify(REPO, 2);
        assert!(outcome.matched);
        assert!(outcome.message.contains("review skipped"));
    }

    #[test]
    fn diff_is_truncated_for_the_judge() {
        let mut host = FakeRepoHost::with_commit("abc", "phase-1: setup complete");
        host.diff = Ok("x".repeat(100));
        let judge = ScriptedCompletion::new(["YES"]);
        Verifier::new(&host, 10).with_judge(&judge).verify(REPO, 1);
        let prompt = &judge.requests()[0].prompt;
        assert!(prompt.contains(&"x".repeat(10)));
        assert!(!prompt.contains(&"x".repeat(11)));
    }

    #[test]
    fn host_errors_are_reported_as_rejections() {
        let host = FakeRepoHost::failing(GithubError::Status {
            status: 404,
            body: String::new(),
        });
        let outcome = Verifier::new(&host, 5000).verify(REPO, 1);
        assert!(!outcome.matched);
        assert!(outcome.message.contains("404"));

        let outcome = Verifier::new(&host, 5000).verify("not a url", 1);
        assert!(!outcome.matched);
        assert!(outcome.message.contains("not a repository URL"));
    }
}
