//! Stage pipeline - ordered, fail-fast execution of configuration stages
//!
//! A stage is an ordered list of rules plus an optional readiness gate and
//! an optional post-apply hook that fires only when the stage changed
//! something. Forward execution is fail-fast: the first failed stage halts
//! the pipeline and later stages never run. Uninstall walks the same
//! stages in reverse, tolerating already-clean state. Dry-run executes
//! queries only; every side effect goes through the rule engine or the
//! backup registry, so dry-run safety holds by construction.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::context::RunContext;
use crate::error::{GatewayError, Result};
use crate::poller::{Clock, Poller, SystemClock};
use crate::rules::Rule;

/// Condition a stage waits on after applying its rules.
pub struct ReadinessGate {
    pub what: String,
    pub timeout: Duration,
    pub interval: Duration,
    pub predicate: Box<dyn Fn() -> bool + Send + Sync>,
}

/// Hook run after a stage applied at least one rule.
pub type PostApplyHook = Box<dyn Fn() -> Result<()> + Send + Sync>;

/// An ordered, named unit of idempotent configuration work.
pub struct Stage {
    name: String,
    rules: Vec<Box<dyn Rule>>,
    readiness: Option<ReadinessGate>,
    post_apply: Option<PostApplyHook>,
}

impl Stage {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            rules: Vec::new(),
            readiness: None,
            post_apply: None,
        }
    }

    pub fn rule(mut self, rule: impl Rule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn boxed_rule(mut self, rule: Box<dyn Rule>) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn readiness(mut self, gate: ReadinessGate) -> Self {
        self.readiness = Some(gate);
        self
    }

    pub fn post_apply(mut self, hook: PostApplyHook) -> Self {
        self.post_apply = Some(hook);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    /// Readiness wait expired; the stage retracted its own rules and the
    /// run continued.
    Degraded,
    /// Never entered Running because an earlier stage failed or the run
    /// was aborted.
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    Completed,
    Halted,
}

/// Outcome of one stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageReport {
    pub name: String,
    pub status: StageStatus,
    pub rules_total: usize,
    /// Rules whose apply action ran (or would run, in dry-run)
    pub rules_applied: usize,
    /// Rules already satisfied and skipped
    pub rules_satisfied: usize,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl StageReport {
    fn skipped(name: &str, rules_total: usize) -> Self {
        Self {
            name: name.to_string(),
            status: StageStatus::Skipped,
            rules_total,
            rules_applied: 0,
            rules_satisfied: 0,
            error: None,
            duration_ms: 0,
        }
    }
}

/// Outcome of a whole pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    pub status: PipelineStatus,
    pub stages: Vec<StageReport>,
    pub duration_ms: u64,
}

impl PipelineReport {
    pub fn succeeded(&self) -> bool {
        self.status == PipelineStatus::Completed
            && self.stages.iter().all(|s| s.status != StageStatus::Failed)
    }

    pub fn first_failure(&self) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.status == StageStatus::Failed)
    }
}

/// Ordered list of stages executed forward for install and in reverse for
/// uninstall.
pub struct Pipeline {
    stages: Vec<Stage>,
    clock: Arc<dyn Clock>,
}

impl Pipeline {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self {
            stages,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Forward execution. The first failed stage halts the pipeline;
    /// stages after it are reported as skipped.
    pub fn execute(&self, ctx: &mut RunContext) -> PipelineReport {
        let start = Instant::now();
        let mut reports = Vec::with_capacity(self.stages.len());
        let mut halted = false;

        for stage in &self.stages {
            if halted {
                reports.push(StageReport::skipped(&stage.name, stage.rules.len()));
                continue;
            }
            if ctx.aborted() {
                warn!(stage = %stage.name, "run aborted at stage boundary");
                halted = true;
                reports.push(StageReport::skipped(&stage.name, stage.rules.len()));
                continue;
            }

            let report = self.run_stage(stage, ctx);
            if report.status == StageStatus::Failed {
                error!(stage = %stage.name, error = ?report.error, "stage failed, halting pipeline");
                halted = true;
            }
            reports.push(report);
        }

        PipelineReport {
            status: if halted {
                PipelineStatus::Halted
            } else {
                PipelineStatus::Completed
            },
            stages: reports,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn run_stage(&self, stage: &Stage, ctx: &mut RunContext) -> StageReport {
        let start = Instant::now();
        let dry_run = ctx.mode.is_dry_run();
        info!(stage = %stage.name, rules = stage.rules.len(), dry_run, "stage running");

        let mut applied: Vec<usize> = Vec::new();
        let mut satisfied = 0usize;
        let mut status = StageStatus::Succeeded;
        let mut stage_error: Option<String> = None;

        'rules: for (index, rule) in stage.rules.iter().enumerate() {
            match rule.query() {
                Ok(true) => {
                    debug!(target = %rule.target(), "already satisfied");
                    satisfied += 1;
                }
                Ok(false) => {
                    if dry_run {
                        info!(target = %rule.target(), "dry-run: would apply");
                        applied.push(index);
                        continue;
                    }
                    // Protect every file this rule may touch before the
                    // first write; an unprotected mutation is worse than a
                    // halted stage.
                    for path in rule.managed_paths() {
                        if let Err(e) = ctx.backups.snapshot(&path) {
                            status = StageStatus::Failed;
                            stage_error = Some(e.to_string());
                            break 'rules;
                        }
                    }
                    if let Err(e) = rule.apply() {
                        status = StageStatus::Failed;
                        stage_error = Some(e.to_string());
                        break 'rules;
                    }
                    info!(target = %rule.target(), "applied");
                    applied.push(index);
                }
                Err(e) => {
                    status = StageStatus::Failed;
                    stage_error = Some(e.to_string());
                    break 'rules;
                }
            }
        }

        if status == StageStatus::Succeeded && !dry_run && !applied.is_empty() {
            if let Some(hook) = &stage.post_apply {
                if let Err(e) = hook() {
                    status = StageStatus::Failed;
                    stage_error = Some(e.to_string());
                }
            }
        }

        if status == StageStatus::Succeeded {
            if let Some(gate) = &stage.readiness {
                if dry_run {
                    debug!(what = %gate.what, "dry-run: skipping readiness wait");
                } else {
                    let poller = Poller::new(gate.timeout, gate.interval)
                        .with_clock(Box::new(self.clock.clone()));
                    match poller.wait_until(&gate.what, || (gate.predicate)()) {
                        Ok(()) => {}
                        Err(err @ GatewayError::Timeout { .. }) => {
                            // Degrade rather than leave dependents of an
                            // unready resource half-configured.
                            warn!(stage = %stage.name, %err, "degrading stage after readiness timeout");
                            for index in applied.iter().rev() {
                                if let Err(e) = stage.rules[*index].unapply() {
                                    warn!(target = %stage.rules[*index].target(), error = %e,
                                        "retract failed during degrade");
                                }
                            }
                            status = StageStatus::Degraded;
                            stage_error = Some(err.to_string());
                        }
                        Err(e) => {
                            status = StageStatus::Failed;
                            stage_error = Some(e.to_string());
                        }
                    }
                }
            }
        }

        StageReport {
            name: stage.name.clone(),
            status,
            rules_total: stage.rules.len(),
            rules_applied: applied.len(),
            rules_satisfied: satisfied,
            error: stage_error,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// Reverse execution: inverse actions in reverse order, restoring
    /// managed files from the backup registry. Already-clean state is
    /// success, not failure.
    pub fn uninstall(&self, ctx: &mut RunContext) -> PipelineReport {
        let start = Instant::now();
        let dry_run = ctx.mode.is_dry_run();
        let mut reports = Vec::with_capacity(self.stages.len());
        let mut halted = false;

        for stage in self.stages.iter().rev() {
            if halted {
                reports.push(StageReport::skipped(&stage.name, stage.rules.len()));
                continue;
            }
            if ctx.aborted() {
                warn!(stage = %stage.name, "run aborted at stage boundary");
                halted = true;
                reports.push(StageReport::skipped(&stage.name, stage.rules.len()));
                continue;
            }

            let stage_start = Instant::now();
            info!(stage = %stage.name, dry_run, "uninstalling stage");
            let mut removed = 0usize;

            for rule in stage.rules.iter().rev() {
                if dry_run {
                    match rule.query() {
                        Ok(true) => info!(target = %rule.target(), "dry-run: would remove"),
                        Ok(false) => debug!(target = %rule.target(), "dry-run: already clean"),
                        Err(e) => warn!(target = %rule.target(), error = %e, "dry-run: query failed"),
                    }
                    continue;
                }
                if let Err(e) = rule.unapply() {
                    warn!(target = %rule.target(), error = %e, "unapply failed, continuing");
                }
                for path in rule.managed_paths() {
                    match ctx.backups.restore(&path) {
                        Ok(true) => {}
                        Ok(false) => debug!(path = %path.display(), "no backup recorded"),
                        Err(e) => {
                            warn!(path = %path.display(), error = %e, "restore failed, continuing")
                        }
                    }
                }
                removed += 1;
            }

            reports.push(StageReport {
                name: stage.name.clone(),
                status: StageStatus::Succeeded,
                rules_total: stage.rules.len(),
                rules_applied: removed,
                rules_satisfied: 0,
                error: None,
                duration_ms: stage_start.elapsed().as_millis() as u64,
            });
        }

        PipelineReport {
            status: PipelineStatus::Completed,
            stages: reports,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RunMode;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Rule over an in-memory flag, counting every engine call.
    struct FlagRule {
        name: String,
        set: Arc<AtomicBool>,
        queries: Arc<AtomicUsize>,
        applies: Arc<AtomicUsize>,
        unapplies: Arc<AtomicUsize>,
        fail_apply: bool,
        managed: Vec<PathBuf>,
        unapply_order: Option<Arc<Mutex<Vec<String>>>>,
    }

    impl FlagRule {
        fn new(name: &str) -> Self {
            Self {
                name: name.to_string(),
                set: Arc::new(AtomicBool::new(false)),
                queries: Arc::new(AtomicUsize::new(0)),
                applies: Arc::new(AtomicUsize::new(0)),
                unapplies: Arc::new(AtomicUsize::new(0)),
                fail_apply: false,
                managed: Vec::new(),
                unapply_order: None,
            }
        }

        fn failing(mut self) -> Self {
            self.fail_apply = true;
            self
        }

        fn managing(mut self, path: PathBuf) -> Self {
            self.managed.push(path);
            self
        }

        fn recording(mut self, order: Arc<Mutex<Vec<String>>>) -> Self {
            self.unapply_order = Some(order);
            self
        }

        fn counters(&self) -> (Arc<AtomicUsize>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
            (
                self.queries.clone(),
                self.applies.clone(),
                self.unapplies.clone(),
            )
        }
    }

    impl Rule for FlagRule {
        fn target(&self) -> String {
            self.name.clone()
        }

        fn query(&self) -> crate::error::Result<bool> {
            self.queries.fetch_add(1, Ordering::SeqCst);
            Ok(self.set.load(Ordering::SeqCst))
        }

        fn apply(&self) -> crate::error::Result<()> {
            self.applies.fetch_add(1, Ordering::SeqCst);
            if self.fail_apply {
                return Err(GatewayError::RuleApply {
                    target: self.name.clone(),
                    cause: "injected failure".to_string(),
                });
            }
            self.set.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn unapply(&self) -> crate::error::Result<()> {
            self.unapplies.fetch_add(1, Ordering::SeqCst);
            if let Some(order) = &self.unapply_order {
                order.lock().unwrap().push(self.name.clone());
            }
            self.set.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn managed_paths(&self) -> Vec<PathBuf> {
            self.managed.clone()
        }
    }

    fn ctx(mode: RunMode, backup_dir: &std::path::Path) -> RunContext {
        RunContext::new(mode, backup_dir, Arc::new(AtomicBool::new(false)))
    }

    #[test]
    fn test_second_run_applies_nothing() {
        let dir = tempdir().unwrap();
        let rule = FlagRule::new("flag");
        let (_, applies, _) = rule.counters();
        let flag = rule.set.clone();
        let pipeline = Pipeline::new(vec![Stage::new("only").rule(rule)]);

        let mut first = ctx(RunMode::Apply, dir.path());
        assert!(pipeline.execute(&mut first).succeeded());
        assert!(flag.load(Ordering::SeqCst));
        assert_eq!(applies.load(Ordering::SeqCst), 1);

        let mut second = ctx(RunMode::Apply, dir.path());
        let report = pipeline.execute(&mut second);
        assert!(report.succeeded());
        // idempotence: the second run only queried
        assert_eq!(applies.load(Ordering::SeqCst), 1);
        assert_eq!(report.stages[0].rules_satisfied, 1);
    }

    #[test]
    fn test_fail_fast_skips_later_stages() {
        let dir = tempdir().unwrap();
        let s1 = FlagRule::new("one");
        let s2 = FlagRule::new("two").failing();
        let s3 = FlagRule::new("three");
        let s4 = FlagRule::new("four");
        let (q3, a3, _) = s3.counters();
        let (q4, a4, _) = s4.counters();

        let pipeline = Pipeline::new(vec![
            Stage::new("first").rule(s1),
            Stage::new("second").rule(s2),
            Stage::new("third").rule(s3),
            Stage::new("fourth").rule(s4),
        ]);

        let mut context = ctx(RunMode::Apply, dir.path());
        let report = pipeline.execute(&mut context);

        assert_eq!(report.status, PipelineStatus::Halted);
        assert!(!report.succeeded());
        assert_eq!(report.stages[0].status, StageStatus::Succeeded);
        assert_eq!(report.stages[1].status, StageStatus::Failed);
        assert_eq!(report.stages[2].status, StageStatus::Skipped);
        assert_eq!(report.stages[3].status, StageStatus::Skipped);
        assert_eq!(q3.load(Ordering::SeqCst) + a3.load(Ordering::SeqCst), 0);
        assert_eq!(q4.load(Ordering::SeqCst) + a4.load(Ordering::SeqCst), 0);
        assert!(report.first_failure().unwrap().error.as_deref().unwrap().contains("injected"));
    }

    #[test]
    fn test_dry_run_takes_no_backups_and_applies_nothing() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("etc-file");
        std::fs::write(&target, "content\n").unwrap();

        let rule = FlagRule::new("flag").managing(target);
        let (_, applies, _) = rule.counters();
        let flag = rule.set.clone();
        let pipeline = Pipeline::new(vec![Stage::new("only").rule(rule)]);

        let backup_dir = dir.path().join("backups");
        let mut context = ctx(RunMode::DryRun, &backup_dir);
        let report = pipeline.execute(&mut context);

        assert!(report.succeeded());
        assert_eq!(report.stages[0].rules_applied, 1); // intended, not done
        assert_eq!(applies.load(Ordering::SeqCst), 0);
        assert!(!flag.load(Ordering::SeqCst));
        assert!(!backup_dir.exists());
    }

    #[test]
    fn test_degrade_on_readiness_timeout_retracts_rules() {
        use crate::poller::Clock;
        use std::time::Instant as StdInstant;

        struct JumpClock {
            now: Mutex<StdInstant>,
        }
        impl Clock for JumpClock {
            fn now(&self) -> StdInstant {
                *self.now.lock().unwrap()
            }
            fn sleep(&self, d: Duration) {
                *self.now.lock().unwrap() += d;
            }
        }

        let dir = tempdir().unwrap();
        let gated = FlagRule::new("gated");
        let (_, applies, unapplies) = gated.counters();
        let later = FlagRule::new("later");
        let (q_later, _, _) = later.counters();

        let pipeline = Pipeline::new(vec![
            Stage::new("hotspot").rule(gated).readiness(ReadinessGate {
                what: "address on wlan0".to_string(),
                timeout: Duration::from_secs(2),
                interval: Duration::from_millis(500),
                predicate: Box::new(|| false),
            }),
            Stage::new("redirect").rule(later),
        ])
        .with_clock(Arc::new(JumpClock {
            now: Mutex::new(StdInstant::now()),
        }));

        let mut context = ctx(RunMode::Apply, dir.path());
        let report = pipeline.execute(&mut context);

        // the gated stage applied, timed out, then retracted its own rule
        assert_eq!(applies.load(Ordering::SeqCst), 1);
        assert_eq!(unapplies.load(Ordering::SeqCst), 1);
        assert_eq!(report.stages[0].status, StageStatus::Degraded);
        // a degraded stage does not halt the run
        assert_eq!(report.status, PipelineStatus::Completed);
        assert_eq!(report.stages[1].status, StageStatus::Succeeded);
        assert!(q_later.load(Ordering::SeqCst) > 0);
    }

    #[test]
    fn test_abort_skips_everything_and_halts() {
        let dir = tempdir().unwrap();
        let rule = FlagRule::new("flag");
        let (queries, applies, _) = rule.counters();
        let pipeline = Pipeline::new(vec![Stage::new("only").rule(rule)]);

        let abort = Arc::new(AtomicBool::new(true));
        let mut context = RunContext::new(RunMode::Apply, dir.path(), abort);
        let report = pipeline.execute(&mut context);

        assert_eq!(report.status, PipelineStatus::Halted);
        assert_eq!(report.stages[0].status, StageStatus::Skipped);
        assert_eq!(queries.load(Ordering::SeqCst) + applies.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_uninstall_honors_abort_flag() {
        let dir = tempdir().unwrap();
        let rule = FlagRule::new("flag");
        rule.set.store(true, Ordering::SeqCst);
        let (queries, _, unapplies) = rule.counters();
        let pipeline = Pipeline::new(vec![Stage::new("only").rule(rule)]);

        let abort = Arc::new(AtomicBool::new(true));
        let mut context = RunContext::new(RunMode::Uninstall, dir.path(), abort);
        let report = pipeline.uninstall(&mut context);

        assert_eq!(report.status, PipelineStatus::Halted);
        assert_eq!(report.stages[0].status, StageStatus::Skipped);
        assert_eq!(queries.load(Ordering::SeqCst) + unapplies.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_backup_failure_halts_stage_before_apply() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("etc-file");
        std::fs::write(&target, "content\n").unwrap();
        // a plain file where the backup directory should be makes every
        // snapshot fail
        let backup_dir = dir.path().join("backups");
        std::fs::write(&backup_dir, "").unwrap();

        let rule = FlagRule::new("guarded").managing(target.clone());
        let (_, applies, _) = rule.counters();
        let flag = rule.set.clone();
        let pipeline = Pipeline::new(vec![Stage::new("only").rule(rule)]);

        let mut context = ctx(RunMode::Apply, &backup_dir);
        let report = pipeline.execute(&mut context);

        assert_eq!(report.status, PipelineStatus::Halted);
        assert_eq!(report.stages[0].status, StageStatus::Failed);
        // the rule was never applied once its file could not be protected
        assert_eq!(applies.load(Ordering::SeqCst), 0);
        assert!(!flag.load(Ordering::SeqCst));
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "content\n");
    }

    #[test]
    fn test_uninstall_runs_in_reverse_order() {
        let dir = tempdir().unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));
        let a = FlagRule::new("a").recording(order.clone());
        let b = FlagRule::new("b").recording(order.clone());
        let c = FlagRule::new("c").recording(order.clone());

        let pipeline = Pipeline::new(vec![
            Stage::new("first").rule(a).rule(b),
            Stage::new("second").rule(c),
        ]);

        let mut context = ctx(RunMode::Uninstall, dir.path());
        let report = pipeline.uninstall(&mut context);

        assert!(report.succeeded());
        assert_eq!(*order.lock().unwrap(), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_post_apply_hook_fires_only_on_change() {
        let dir = tempdir().unwrap();
        let rule = FlagRule::new("flag");
        let hook_calls = Arc::new(AtomicUsize::new(0));
        let hook_counter = hook_calls.clone();
        let pipeline = Pipeline::new(vec![Stage::new("relay").rule(rule).post_apply(
            Box::new(move || {
                hook_counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        )]);

        let mut first = ctx(RunMode::Apply, dir.path());
        pipeline.execute(&mut first);
        assert_eq!(hook_calls.load(Ordering::SeqCst), 1);

        // second run changes nothing, so no restart-style hook
        let mut second = ctx(RunMode::Apply, dir.path());
        pipeline.execute(&mut second);
        assert_eq!(hook_calls.load(Ordering::SeqCst), 1);
    }
}
