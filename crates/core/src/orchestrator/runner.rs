//! Conversion orchestrator.
//!
//! Drives one job through validation, slot acquisition, staging, backend
//! invocation and publish, then cleans up unconditionally. The job scope is
//! cleaned before the concurrency slot is released, so a freed slot never
//! coexists with the previous job's scratch files.

use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn, Instrument};

use super::types::{ArtifactResult, ConversionResult, JobObserver, JobReport, JobState};
use crate::admission::ConcurrencyLimiter;
use crate::backend::{
    BackendError, BackendInvoker, BackendOutcome, CancelFlag, Invocation, StagedInput,
};
use crate::config::{Config, TimeoutsConfig};
use crate::failure::Failure;
use crate::job::{ConversionRequest, InputRef, JobDescriptor, JobKind, JobValidator, RequestId};
use crate::metrics;
use crate::store::{CleanupReport, JobScope, TempStore};

/// Slack on top of a kind's budget before the orchestrator abandons an
/// invocation. Process backends enforce the budget themselves.
const DEFAULT_GRACE: Duration = Duration::from_millis(500);

pub struct Orchestrator {
    validator: JobValidator,
    limiter: Arc<ConcurrencyLimiter>,
    store: TempStore,
    invoker: Arc<BackendInvoker>,
    timeouts: TimeoutsConfig,
    grace: Duration,
    observer: Option<Arc<dyn JobObserver>>,
}

impl Orchestrator {
    pub fn new(config: &Config, store: TempStore, invoker: Arc<BackendInvoker>) -> Self {
        Self {
            validator: JobValidator::new(config.limits.clone()),
            limiter: Arc::new(ConcurrencyLimiter::from_limits(&config.limits)),
            store,
            invoker,
            timeouts: config.timeouts.clone(),
            grace: DEFAULT_GRACE,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn JobObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    pub fn store(&self) -> &TempStore {
        &self.store
    }

    pub fn invoker(&self) -> &BackendInvoker {
        &self.invoker
    }

    /// Runs a request to completion. Never panics on job failure; the
    /// outcome is in the report.
    pub async fn run(&self, request: ConversionRequest) -> JobReport {
        let request_id = RequestId::new();
        let kind = request.kind;
        let span = tracing::info_span!("job", request_id = %request_id, kind = %kind);

        async {
            let started_at = Utc::now();
            let started = Instant::now();
            self.transition(&request_id, kind, JobState::Admitted);

            let (outcome, cleanup) = self.drive(&request_id, request).await;
            let duration = started.elapsed();

            let report = JobReport {
                request_id: request_id.clone(),
                kind,
                started_at,
                duration,
                outcome,
                cleanup,
            };
            metrics::JOBS_TOTAL
                .with_label_values(&[kind.as_str(), report.result_label()])
                .inc();
            metrics::JOB_DURATION
                .with_label_values(&[kind.as_str()])
                .observe(duration.as_secs_f64());

            match &report.outcome {
                Ok(_) => info!(?duration, "Job succeeded"),
                Err(failure) => info!(
                    ?duration,
                    kind = failure.kind.as_str(),
                    message = %failure.message,
                    cause = failure.cause.as_deref().unwrap_or(""),
                    "Job failed"
                ),
            }
            report
        }
        .instrument(span)
        .await
    }

    async fn drive(
        &self,
        request_id: &RequestId,
        request: ConversionRequest,
    ) -> (Result<ConversionResult, Failure>, CleanupReport) {
        let kind = request.kind;

        self.transition(request_id, kind, JobState::Validating);
        let descriptor = match self.validator.validate(request_id.clone(), request) {
            Ok(descriptor) => descriptor,
            Err(failure) => return self.fail_early(request_id, kind, failure),
        };

        let permit = match self.limiter.acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                metrics::ADMISSION_REJECTIONS
                    .with_label_values(&[e.reason()])
                    .inc();
                return self.fail_early(request_id, kind, e.into());
            }
        };
        self.transition(request_id, kind, JobState::SlotAcquired);

        let mut scope = self.store.open_scope(request_id);
        self.transition(request_id, kind, JobState::Running);
        let outcome = self.execute(&descriptor, &mut scope).await;
        self.transition(
            request_id,
            kind,
            if outcome.is_ok() {
                JobState::Succeeded
            } else {
                JobState::Failed
            },
        );

        let cleanup = scope.cleanup().await;
        metrics::ARTIFACTS_DISCARDED.inc_by(cleanup.discarded as u64);
        drop(permit);
        self.transition(request_id, kind, JobState::Cleaned);

        (outcome, cleanup)
    }

    /// Failure before any resource was allocated.
    fn fail_early(
        &self,
        request_id: &RequestId,
        kind: JobKind,
        failure: Failure,
    ) -> (Result<ConversionResult, Failure>, CleanupReport) {
        self.transition(request_id, kind, JobState::Failed);
        self.transition(request_id, kind, JobState::Cleaned);
        (Err(failure), CleanupReport::default())
    }

    async fn execute(
        &self,
        descriptor: &JobDescriptor,
        scope: &mut JobScope,
    ) -> Result<ConversionResult, Failure> {
        let kind = descriptor.kind();
        let inputs = stage_inputs(descriptor, scope).await?;

        let output_id = scope.allocate(descriptor.params().output_suffix())?;
        let work_dir = if kind.produces_artifact() {
            scope.prepare().await?
        } else {
            scope.dir().to_path_buf()
        };
        let output = scope.artifact(output_id)?;
        let budget = self.timeouts.budget_for(kind);
        let invocation = Invocation {
            request_id: descriptor.request_id().clone(),
            params: descriptor.params().clone(),
            inputs,
            work_dir,
            output: output.path().to_path_buf(),
            output_prefix: output.prefix().to_string(),
            budget,
            cancel: CancelFlag::new(),
        };

        let outcome = match tokio::time::timeout(
            budget + self.grace,
            self.invoker.invoke(kind, &invocation),
        )
        .await
        {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => return Err(backend_failure(kind, e)),
            Err(_) => {
                invocation.cancel.cancel();
                warn!(?budget, "Backend exceeded its budget, abandoned");
                // Blocking workers stop at their next safe point; the slot and
                // the job directory stay held until they have.
                invocation.cancel.settled().await;
                return Err(backend_failure(
                    kind,
                    BackendError::Timeout {
                        tool: kind.to_string(),
                        budget,
                    },
                ));
            }
        };

        match outcome {
            BackendOutcome::Inline(payload) => Ok(ConversionResult::Inline { payload }),
            BackendOutcome::File(file) => {
                if file.path != invocation.output {
                    scope.adopt(output_id, &file.path)?;
                }
                scope.mark_written(output_id).await?;
                let public = scope.publish(output_id).await?;
                metrics::ARTIFACTS_PUBLISHED.inc();

                Ok(ConversionResult::Artifact(ArtifactResult {
                    url: public.url,
                    file_name: file.download_name,
                    size_bytes: public.size_bytes,
                    content_type: file.content_type,
                    sha256: public.sha256,
                }))
            }
        }
    }

    fn transition(&self, request_id: &RequestId, kind: JobKind, state: JobState) {
        debug!(state = state.as_str(), "Job state");
        if let Some(observer) = &self.observer {
            observer.on_transition(request_id, kind, state);
        }
    }
}

/// Writes every buffer input into the job scope.
async fn stage_inputs(
    descriptor: &JobDescriptor,
    scope: &mut JobScope,
) -> Result<Vec<StagedInput>, Failure> {
    let mut staged = Vec::new();
    for input in descriptor.inputs() {
        let InputRef::Buffer { name, data } = input else {
            continue;
        };
        let suffix = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin");
        let id = scope.allocate(suffix)?;
        scope.write(id, data).await?;
        staged.push(StagedInput {
            path: scope.path(id)?.to_path_buf(),
            name: name.clone(),
        });
    }
    Ok(staged)
}

fn backend_failure(kind: JobKind, error: BackendError) -> Failure {
    let failure: Failure = error.into();
    metrics::BACKEND_FAILURES
        .with_label_values(&[kind.as_str(), failure.kind.as_str()])
        .inc();
    failure
}
