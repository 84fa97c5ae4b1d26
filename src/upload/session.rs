//! Upload session controller
//!
//! Drives one user selection end to end: validate, ask what to do about
//! rejected files, normalize, transfer (batched or sequential) and report.
//!
//! Session state is owned by the controller and only changes through
//! [`UploadSession`] transition methods. Observers read snapshots through a
//! `watch` channel; decisions that need a human go through a
//! [`DecisionPolicy`] the caller supplies.

use super::batch::{BatchObserver, BatchOptions, BatchScheduler};
use super::normalize::{normalize, NormalizeOptions};
use super::validate::{FileValidator, RejectReason};
use super::{NormalizedAsset, Transfer, UploadCandidate, UploadError, UploadResult};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// A candidate refused by validation
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub name: String,
    pub reason: RejectReason,
}

/// Answer to "some files were rejected, upload the rest?"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartialValidationDecision {
    Proceed,
    Abort,
}

/// Answer to "a file failed, keep going with the remaining ones?"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinueAfterFailureDecision {
    Continue,
    Abort,
}

/// Resolves the session's decision points
#[async_trait::async_trait]
pub trait DecisionPolicy: Send + Sync {
    async fn on_partial_validation(&self, rejected: &[Rejection], accepted: usize) -> PartialValidationDecision;

    async fn on_transfer_failure(&self, failed: &UploadResult, remaining: usize) -> ContinueAfterFailureDecision;
}

/// Never stops: uploads every accepted file regardless of failures
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysProceed;

#[async_trait::async_trait]
impl DecisionPolicy for AlwaysProceed {
    async fn on_partial_validation(&self, _rejected: &[Rejection], _accepted: usize) -> PartialValidationDecision {
        PartialValidationDecision::Proceed
    }

    async fn on_transfer_failure(&self, _failed: &UploadResult, _remaining: usize) -> ContinueAfterFailureDecision {
        ContinueAfterFailureDecision::Continue
    }
}

/// How accepted files are transferred
#[derive(Debug, Clone)]
pub enum Strategy {
    /// Concurrent within a chunk, chunks in sequence
    Batched(BatchOptions),
    /// One file normalized and sent before the next starts
    Sequential,
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::Batched(BatchOptions::default())
    }
}

/// Session settings
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub strategy: Strategy,
    /// `None` sends original bytes
    pub normalize: Option<NormalizeOptions>,
    pub max_file_size: u64,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            normalize: Some(NormalizeOptions::default()),
            max_file_size: super::validate::MAX_FILE_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Idle,
    Validating,
    Normalizing,
    Transferring,
    Finished,
}

/// Point-in-time view of a session, published to observers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub total_files: usize,
    pub completed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Accepted files that were never sent
    pub skipped: usize,
    pub current_index: Option<usize>,
    pub current_name: Option<String>,
    pub in_flight: Vec<String>,
}

impl SessionSnapshot {
    /// Completed share of the accepted files, 0..=100
    pub fn percentage(&self) -> u8 {
        if self.total_files == 0 {
            return 0;
        }
        ((self.completed * 100) / self.total_files) as u8
    }
}

/// Aggregate state of one session
#[derive(Debug)]
pub struct UploadSession {
    total_files: usize,
    completed: Vec<UploadResult>,
    /// Keyed by index: names are not unique
    in_flight: BTreeMap<usize, String>,
    progress: watch::Sender<SessionSnapshot>,
}

impl UploadSession {
    fn new() -> Self {
        let (progress, _) = watch::channel(SessionSnapshot::default());
        Self {
            total_files: 0,
            completed: Vec::new(),
            in_flight: BTreeMap::new(),
            progress,
        }
    }

    pub fn total_files(&self) -> usize {
        self.total_files
    }

    pub fn completed(&self) -> &[UploadResult] {
        &self.completed
    }

    pub fn in_flight(&self) -> impl Iterator<Item = &str> {
        self.in_flight.values().map(String::as_str)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.progress.borrow().clone()
    }

    fn reset(&mut self) {
        self.total_files = 0;
        self.completed.clear();
        self.in_flight.clear();
        self.progress.send_replace(SessionSnapshot::default());
    }

    fn enter(&mut self, phase: SessionPhase) {
        self.progress.send_modify(|s| s.phase = phase);
    }

    fn begin(&mut self, total_files: usize) {
        self.reset();
        self.total_files = total_files;
        self.progress.send_modify(|s| s.total_files = total_files);
    }

    fn start_file(&mut self, index: usize, name: &str) {
        self.in_flight.insert(index, name.to_string());
        let in_flight: Vec<String> = self.in_flight.values().cloned().collect();
        self.progress.send_modify(|s| {
            s.current_index = Some(index);
            s.current_name = Some(name.to_string());
            s.in_flight = in_flight;
        });
    }

    fn settle(&mut self, result: UploadResult) {
        self.in_flight.remove(&result.index);
        let in_flight: Vec<String> = self.in_flight.values().cloned().collect();
        let (success, skipped) = (result.is_success(), result.is_skipped());
        self.completed.push(result);
        let completed = self.completed.len();
        self.progress.send_modify(|s| {
            s.completed = completed;
            if success {
                s.succeeded += 1;
            } else if skipped {
                s.skipped += 1;
            } else {
                s.failed += 1;
            }
            s.in_flight = in_flight;
        });
    }

    fn finish(&mut self) {
        self.completed.sort_by_key(|r| r.index);
        self.progress.send_modify(|s| {
            s.phase = SessionPhase::Finished;
            s.current_index = None;
            s.current_name = None;
            s.in_flight.clear();
        });
    }
}

/// Why a session stopped early
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// Declined to upload the accepted subset after some files were rejected
    PartialValidation,
    /// Chose to stop after a transfer failure
    AfterFailure,
    /// The session's cancellation token fired
    Cancelled,
}

/// Terminal state of a session
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    FullSuccess { uploaded: usize },
    PartialSuccess { succeeded: usize, failed: usize },
    FullFailure { failed: usize },
    AllRejected { rejected: usize },
    Aborted {
        reason: AbortReason,
        succeeded: usize,
        failed: usize,
        skipped: usize,
    },
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::FullSuccess { uploaded } => {
                write!(f, "All {} photo(s) uploaded successfully", uploaded)
            }
            Outcome::PartialSuccess { succeeded, failed } => write!(
                f,
                "{} of {} photo(s) uploaded; {} failed",
                succeeded,
                succeeded + failed,
                failed
            ),
            Outcome::FullFailure { failed } => {
                write!(f, "Upload failed for all {} photo(s)", failed)
            }
            Outcome::AllRejected { rejected } => write!(
                f,
                "None of the {} selected file(s) can be uploaded",
                rejected
            ),
            Outcome::Aborted {
                reason,
                succeeded,
                failed,
                skipped,
            } => {
                let why = match reason {
                    AbortReason::PartialValidation => "after some files were rejected",
                    AbortReason::AfterFailure => "after a failed upload",
                    AbortReason::Cancelled => "by cancellation",
                };
                write!(
                    f,
                    "Upload stopped {}: {} uploaded, {} failed, {} not sent",
                    why, succeeded, failed, skipped
                )
            }
        }
    }
}

/// Everything a caller needs once a session ends
#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    pub outcome: Outcome,
    /// One entry per accepted file, ordered by index
    pub results: Vec<UploadResult>,
    pub rejected: Vec<Rejection>,
}

impl SessionReport {
    /// Human-readable summary, including rejected files
    pub fn summary(&self) -> String {
        let mut summary = self.outcome.to_string();
        if !self.rejected.is_empty() && !matches!(self.outcome, Outcome::AllRejected { .. }) {
            summary.push_str(&format!(" ({} file(s) rejected)", self.rejected.len()));
        }
        summary
    }

    pub fn urls(&self) -> Vec<&str> {
        self.results.iter().filter_map(UploadResult::remote_url).collect()
    }
}

/// Feeds scheduler events into the session and consults the policy after
/// chunks that contained failures
struct SessionObserver<'a> {
    session: &'a mut UploadSession,
    policy: &'a dyn DecisionPolicy,
    cancel: &'a CancellationToken,
    aborted: &'a mut Option<AbortReason>,
}

#[async_trait::async_trait]
impl BatchObserver for SessionObserver<'_> {
    fn transfer_started(&mut self, index: usize, name: &str) {
        self.session.start_file(index, name);
    }

    fn transfer_settled(&mut self, result: &UploadResult) {
        self.session.settle(result.clone());
    }

    async fn chunk_settled(&mut self, results: &[UploadResult], remaining: usize) {
        if remaining == 0 || self.cancel.is_cancelled() {
            return;
        }
        if let Some(failed) = results.iter().find(|r| !r.is_success()) {
            if self.policy.on_transfer_failure(failed, remaining).await == ContinueAfterFailureDecision::Abort {
                tracing::info!(remaining, "Stopping after failed chunk");
                *self.aborted = Some(AbortReason::AfterFailure);
                self.cancel.cancel();
            }
        }
    }
}

/// Drives upload sessions
pub struct SessionController<P: DecisionPolicy> {
    transfer: Arc<dyn Transfer>,
    policy: P,
    options: SessionOptions,
    validator: FileValidator,
    session: UploadSession,
    cancel: CancellationToken,
}

impl<P: DecisionPolicy> SessionController<P> {
    pub fn new(transfer: Arc<dyn Transfer>, policy: P, options: SessionOptions) -> Self {
        let validator = FileValidator::new(options.max_file_size);
        Self {
            transfer,
            policy,
            options,
            validator,
            session: UploadSession::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Progress snapshots for UI feedback
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.session.progress.subscribe()
    }

    /// Cancels the current or next session: work that has not started yet
    /// is abandoned. A fresh token is installed once that session ends, so
    /// grab a new handle for every session.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn session(&self) -> &UploadSession {
        &self.session
    }

    /// Drop all session state, including a pending cancellation
    pub fn reset(&mut self) {
        self.session.reset();
        self.cancel = CancellationToken::new();
    }

    /// Run one session over the user's selection
    #[tracing::instrument(name = "upload.session", skip_all, fields(files = raw_files.len()))]
    pub async fn run_session(&mut self, raw_files: Vec<UploadCandidate>) -> SessionReport {
        let report = self.drive(raw_files).await;
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }
        report
    }

    async fn drive(&mut self, raw_files: Vec<UploadCandidate>) -> SessionReport {
        self.session.reset();
        self.session.enter(SessionPhase::Validating);

        let mut accepted = Vec::new();
        let mut rejected = Vec::new();
        for candidate in raw_files {
            let verdict = self.validator.validate(candidate);
            match verdict.reason {
                None => accepted.push(verdict.candidate),
                Some(reason) => {
                    tracing::info!(file = %verdict.candidate.name, reason = %reason, "File rejected");
                    rejected.push(Rejection {
                        name: verdict.candidate.name,
                        reason,
                    });
                }
            }
        }

        if accepted.is_empty() {
            self.session.finish();
            return SessionReport {
                outcome: Outcome::AllRejected {
                    rejected: rejected.len(),
                },
                results: Vec::new(),
                rejected,
            };
        }

        if !rejected.is_empty()
            && self.policy.on_partial_validation(&rejected, accepted.len()).await
                == PartialValidationDecision::Abort
        {
            tracing::info!(rejected = rejected.len(), "Session aborted after validation");
            self.session.begin(accepted.len());
            for (index, candidate) in accepted.iter().enumerate() {
                self.session
                    .settle(UploadResult::new(index, &candidate.name, Err(UploadError::Skipped)));
            }
            self.session.finish();
            let results = self.session.completed.clone();
            return SessionReport {
                outcome: summarize(&results, Some(AbortReason::PartialValidation)),
                results,
                rejected,
            };
        }

        self.session.begin(accepted.len());
        let cancel = self.cancel.child_token();
        let mut aborted = None;

        match self.options.strategy.clone() {
            Strategy::Batched(batch) => {
                self.session.enter(SessionPhase::Normalizing);
                let concurrency = batch.batch_size.max(1);
                let assets = self.prepare_all(&accepted, concurrency).await;

                self.session.enter(SessionPhase::Transferring);
                let scheduler = BatchScheduler::new(Arc::clone(&self.transfer), batch);
                let mut observer = SessionObserver {
                    session: &mut self.session,
                    policy: &self.policy,
                    cancel: &cancel,
                    aborted: &mut aborted,
                };
                scheduler.run_batches(&assets, &cancel, &mut observer).await;
            }
            Strategy::Sequential => {
                self.session.enter(SessionPhase::Transferring);
                aborted = self.run_sequential(&accepted, &cancel).await;
            }
        }

        if aborted.is_none() && self.cancel.is_cancelled() {
            aborted = Some(AbortReason::Cancelled);
        }

        self.session.finish();
        let results = self.session.completed.clone();
        let outcome = summarize(&results, aborted);
        tracing::info!(outcome = %outcome, "Session finished");

        SessionReport {
            outcome,
            results,
            rejected,
        }
    }

    async fn prepare(&self, candidate: &UploadCandidate) -> NormalizedAsset {
        match &self.options.normalize {
            Some(options) => normalize(candidate, options).await,
            None => NormalizedAsset::passthrough(candidate),
        }
    }

    async fn prepare_all(&self, accepted: &[UploadCandidate], concurrency: usize) -> Vec<NormalizedAsset> {
        stream::iter(accepted)
            .map(|candidate| self.prepare(candidate))
            .buffered(concurrency)
            .collect()
            .await
    }

    async fn run_sequential(&mut self, accepted: &[UploadCandidate], cancel: &CancellationToken) -> Option<AbortReason> {
        let mut aborted = None;

        for (index, candidate) in accepted.iter().enumerate() {
            if cancel.is_cancelled() {
                let result = UploadResult::new(index, &candidate.name, Err(UploadError::Skipped));
                self.session.settle(result);
                continue;
            }

            self.session.start_file(index, &candidate.name);
            let asset = self.prepare(candidate).await;
            let outcome = self.transfer.send(&asset).await;
            let result = UploadResult::new(index, &candidate.name, outcome);
            let failed = !result.is_success();
            self.session.settle(result.clone());

            let remaining = accepted.len() - index - 1;
            if failed
                && remaining > 0
                && self.policy.on_transfer_failure(&result, remaining).await
                    == ContinueAfterFailureDecision::Abort
            {
                tracing::info!(remaining, "Stopping after failed file");
                aborted = Some(AbortReason::AfterFailure);
                cancel.cancel();
            }
        }

        aborted
    }
}

fn summarize(results: &[UploadResult], aborted: Option<AbortReason>) -> Outcome {
    let succeeded = results.iter().filter(|r| r.is_success()).count();
    let skipped = results.iter().filter(|r| r.is_skipped()).count();
    let failed = results.len() - succeeded - skipped;

    if let Some(reason) = aborted {
        return Outcome::Aborted {
            reason,
            succeeded,
            failed,
            skipped,
        };
    }

    match (succeeded, failed) {
        (s, 0) => Outcome::FullSuccess { uploaded: s },
        (0, f) => Outcome::FullFailure { failed: f },
        (s, f) => Outcome::PartialSuccess {
            succeeded: s,
            failed: f,
        },
    }
}
