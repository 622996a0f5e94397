//! Batch verification.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use container_env::ContainerRuntime;
use debrepro_core::metadata::MetadataFetcher;
use debrepro_core::obs::{
    emit_batch_finished, emit_package_finished, emit_package_started, emit_stage_failed,
    PackageSpan,
};
use debrepro_core::snapshot::SnapshotResolver;
use debrepro_core::{
    classify, BatchSummary, BuildOutcome, BuildTiming, PackageTarget, PageSource, ReproConfig,
    ResultSet, Stage, StageFailure,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::executor::BuildExecutor;
use crate::provision::EnvironmentProvisioner;
use crate::stage::EnvironmentSettings;
use crate::transcript::Transcript;

/// Drives every package of a batch through fetch, resolve, provision,
/// build and classify.
pub struct VerificationPipeline {
    fetcher: MetadataFetcher,
    resolver: SnapshotResolver,
    provisioner: EnvironmentProvisioner,
    executor: BuildExecutor,
    log_dir: Option<PathBuf>,
}

impl VerificationPipeline {
    pub fn new(
        fetcher: MetadataFetcher,
        resolver: SnapshotResolver,
        provisioner: EnvironmentProvisioner,
        executor: BuildExecutor,
    ) -> Self {
        Self {
            fetcher,
            resolver,
            provisioner,
            executor,
            log_dir: None,
        }
    }

    /// Wire every component from `config`.
    pub fn from_config(
        pages: Arc<dyn PageSource>,
        runtime: Arc<dyn ContainerRuntime>,
        config: &ReproConfig,
    ) -> Self {
        let settings = EnvironmentSettings {
            base_image: config.base_image.clone(),
            snapshot_base: config.snapshot_base.clone(),
            archive: config.archive.clone(),
            dist: config.dist.clone(),
            toolchain: config.toolchain.clone(),
            command_timeout_secs: config.command_timeout_secs,
        };
        Self::new(
            MetadataFetcher::from_config(pages.clone(), config),
            SnapshotResolver::from_config(pages, config),
            EnvironmentProvisioner::new(runtime.clone(), settings, config.cgroup_root.clone()),
            BuildExecutor::new(runtime, config.build_timeout_secs, config.artifact_dir()),
        )
        .with_log_dir(config.log_dir())
    }

    /// Write a transcript per package into `dir`.
    pub fn with_log_dir(mut self, dir: PathBuf) -> Self {
        self.log_dir = Some(dir);
        self
    }

    /// Process `packages` in order, appending one outcome per package to `results`.
    ///
    /// Stops before the next package once `cancel` fires; outcomes gathered
    /// so far are kept.
    pub async fn run(
        &self,
        packages: &[String],
        mut results: ResultSet,
        cancel: &CancellationToken,
    ) -> ResultSet {
        let start = Instant::now();
        let total = packages.len();
        let mut processed = 0;

        for (i, package) in packages.iter().enumerate() {
            if cancel.is_cancelled() {
                warn!(remaining = total - i, "Run cancelled, skipping remaining packages");
                break;
            }
            let outcome = self.process(package, i + 1, total).await;
            results.push(outcome);
            processed += 1;
        }

        let summary = BatchSummary::from_results(&results);
        emit_batch_finished(
            &summary,
            total - processed,
            start.elapsed().as_millis() as u64,
        );
        results
    }

    /// Verify a single package. Never fails: every error becomes a `Fail` outcome.
    pub async fn process(&self, package: &str, index: usize, total: usize) -> BuildOutcome {
        let _span = PackageSpan::enter(package, index, total);
        emit_package_started(package, index, total);

        let mut transcript = Transcript::new(package);
        let outcome = self.verify(package, &mut transcript).await;
        if let Some(failure) = &outcome.failure {
            transcript.note(format!("failed at {failure}"));
        }
        transcript.note(format!("outcome {}", outcome.classification));

        if let Some(dir) = &self.log_dir {
            if let Err(e) = transcript.write_to(dir) {
                warn!(package = %package, error = %e, "Failed to write transcript");
            }
        }
        emit_package_finished(&outcome);
        outcome
    }

    async fn verify(&self, package: &str, transcript: &mut Transcript) -> BuildOutcome {
        let fail = |target: Option<Arc<PackageTarget>>,
                    stage: Stage,
                    error: &dyn std::fmt::Display,
                    timing: BuildTiming| {
            emit_stage_failed(package, stage, error);
            BuildOutcome::failed(
                package,
                target,
                StageFailure::new(stage, error.to_string()),
                timing,
            )
        };

        let target = match self.fetcher.fetch(package).await {
            Ok(target) => Arc::new(target),
            Err(e) => return fail(None, Stage::Fetch, &e, BuildTiming::ZERO),
        };
        if target.expected_hash.is_none() {
            return fail(
                Some(target),
                Stage::Fetch,
                &"no reference checksum",
                BuildTiming::ZERO,
            );
        }

        let snapshots = match self.resolver.resolve(target.build_time).await {
            Ok(snapshots) => snapshots,
            Err(e) => return fail(Some(target), Stage::Resolve, &e, BuildTiming::ZERO),
        };
        info!(
            package = %package,
            snapshots = ?snapshots.snapshots().iter().map(|s| s.id.as_str()).collect::<Vec<_>>(),
            "Snapshots resolved"
        );

        let handle = match self
            .provisioner
            .provision(package, &snapshots, &target.dependencies, transcript)
            .await
        {
            Ok(handle) => handle,
            Err(e) => return fail(Some(target), Stage::Provision, &e, BuildTiming::ZERO),
        };

        let built = self.executor.build(&handle, &target, transcript).await;
        self.provisioner.teardown(package, &handle.name).await;

        let built = match built {
            Ok(built) => built,
            Err(e) => {
                let timing = e.timing();
                return fail(Some(target), Stage::Build, &e, timing);
            }
        };

        let verdict = classify(Some(&built.host_path), target.expected_hash.as_ref());
        BuildOutcome::classified(
            target,
            verdict.computed_hash,
            built.timing,
            verdict.classification,
        )
    }
}
