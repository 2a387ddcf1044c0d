//! Long-lived scheduling loop.
//!
//! One attempt runs at process start (subject to the [`RunGate`]); after that
//! the [`Trigger`] fires once per interval and an attempt runs when the day
//! matches the configured weekday and the gate allows it.
pub mod run_gate;

use async_trait::async_trait;
use chrono::{Datelike, Local, NaiveDate, Weekday};
use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::backup::{RunReport, RunResult};
use crate::errors::BackupError;
pub use run_gate::RunGate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptKind {
    /// The attempt made right after the process starts.
    Startup,
    Scheduled,
}

/// One gated run of the backup pipeline.
#[async_trait]
pub trait BackupJob: Send + Sync {
    async fn run_attempt(&self, kind: AttemptKind) -> Result<RunReport, BackupError>;
}

pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

/// Calendar date in the process-local timezone.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

#[async_trait]
pub trait Trigger: Send {
    /// Resolves when the next evaluation is due.
    async fn fired(&mut self);
}

/// Fires once per `period` of monotonic time, first one `period` after creation.
pub struct IntervalTrigger {
    interval: Interval,
}

impl IntervalTrigger {
    pub fn new(period: Duration) -> Self {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }
}

#[async_trait]
impl Trigger for IntervalTrigger {
    async fn fired(&mut self) {
        self.interval.tick().await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    RunAttempt(AttemptKind),
    Waiting,
}

#[derive(Debug)]
pub enum AttemptOutcome {
    /// The gate denied the attempt; nothing ran.
    Gated,
    Finished(RunReport),
    /// The databases could not be listed; no stage ran.
    Aborted(BackupError),
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        match self {
            AttemptOutcome::Gated => true,
            AttemptOutcome::Finished(report) => report.result == RunResult::AllSucceeded,
            AttemptOutcome::Aborted(_) => false,
        }
    }
}

pub struct Scheduler<J, C, T> {
    job: J,
    gate: RunGate,
    clock: C,
    trigger: T,
    weekday: Weekday,
    shutdown: CancellationToken,
    state: SchedulerState,
    last_outcome: Option<AttemptOutcome>,
}

impl<J: BackupJob, C: Clock, T: Trigger> Scheduler<J, C, T> {
    pub fn new(
        job: J,
        gate: RunGate,
        clock: C,
        trigger: T,
        weekday: Weekday,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            job,
            gate,
            clock,
            trigger,
            weekday,
            shutdown,
            state: SchedulerState::Idle,
            last_outcome: None,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Runs until shutdown is requested. An attempt in flight is finished first.
    pub async fn run(&mut self) {
        while self.advance().await {
            debug!("Scheduler state: {:?}", self.state());
        }
        info!("Scheduler stopped");
    }

    /// Performs only the startup attempt.
    pub async fn run_once(&mut self) -> Option<AttemptOutcome> {
        self.state = SchedulerState::Idle;
        self.last_outcome = None;
        if self.advance().await && matches!(self.state, SchedulerState::RunAttempt(_)) {
            self.advance().await;
        }
        self.last_outcome.take()
    }

    /// Moves the state machine one transition. `false` means stop.
    async fn advance(&mut self) -> bool {
        let next = match self.state {
            SchedulerState::Idle => {
                if self.shutdown.is_cancelled() {
                    return false;
                }
                if self.gate.attempt_is_authorized(self.clock.today()) {
                    SchedulerState::RunAttempt(AttemptKind::Startup)
                } else {
                    info!(
                        "Backup already done today. Waiting until the next {}.",
                        self.weekday
                    );
                    self.last_outcome = Some(AttemptOutcome::Gated);
                    SchedulerState::Waiting
                }
            }
            SchedulerState::RunAttempt(kind) => {
                let outcome = match self.job.run_attempt(kind).await {
                    Ok(report) => {
                        info!("Backup attempt finished: {}", report.result);
                        AttemptOutcome::Finished(report)
                    }
                    Err(e) => {
                        error!("❌ Backup attempt aborted: {}", e);
                        AttemptOutcome::Aborted(e)
                    }
                };
                self.last_outcome = Some(outcome);
                SchedulerState::Waiting
            }
            SchedulerState::Waiting => {
                tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => {
                        info!("Shutdown requested while waiting");
                        return false;
                    }
                    _ = self.trigger.fired() => {}
                }
                let today = self.clock.today();
                if today.weekday() != self.weekday {
                    debug!("{} is a {}; next backup on {}", today, today.weekday(), self.weekday);
                    SchedulerState::Waiting
                } else if self.gate.attempt_is_authorized(today) {
                    SchedulerState::RunAttempt(AttemptKind::Scheduled)
                } else {
                    SchedulerState::Waiting
                }
            }
        };
        self.state = next;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    #[derive(Clone)]
    struct SharedClock(Arc<Mutex<NaiveDate>>);

    impl Clock for SharedClock {
        fn today(&self) -> NaiveDate {
            *self.0.lock().unwrap()
        }
    }

    /// Each firing moves the clock to the next scripted date; when the script
    /// runs out it requests shutdown and never fires again.
    struct ScriptedTrigger {
        clock: SharedClock,
        dates: VecDeque<NaiveDate>,
        shutdown: CancellationToken,
    }

    #[async_trait]
    impl Trigger for ScriptedTrigger {
        async fn fired(&mut self) {
            match self.dates.pop_front() {
                Some(next) => *self.clock.0.lock().unwrap() = next,
                None => {
                    self.shutdown.cancel();
                    std::future::pending::<()>().await;
                }
            }
        }
    }

    struct RecordingJob {
        attempts: Mutex<Vec<(AttemptKind, NaiveDate)>>,
        clock: SharedClock,
        fail: bool,
    }

    #[async_trait]
    impl BackupJob for Arc<RecordingJob> {
        async fn run_attempt(&self, kind: AttemptKind) -> Result<RunReport, BackupError> {
            let today = self.clock.today();
            self.attempts.lock().unwrap().push((kind, today));
            if self.fail {
                return Err(BackupError::Connection("Connection refused".to_string()));
            }
            Ok(RunReport::new(RunResult::AllSucceeded))
        }
    }

    struct Fixture {
        job: Arc<RecordingJob>,
        gate: RunGate,
        scheduler: Scheduler<Arc<RecordingJob>, SharedClock, ScriptedTrigger>,
        _dir: tempfile::TempDir,
    }

    fn fixture(start: NaiveDate, ticks: &[NaiveDate], fail: bool) -> anyhow::Result<Fixture> {
        let dir = tempfile::tempdir()?;
        let gate = RunGate::new(dir.path().join("backup_log.txt"));
        let clock = SharedClock(Arc::new(Mutex::new(start)));
        let shutdown = CancellationToken::new();
        let job = Arc::new(RecordingJob {
            attempts: Mutex::new(Vec::new()),
            clock: clock.clone(),
            fail,
        });
        let trigger = ScriptedTrigger {
            clock: clock.clone(),
            dates: ticks.iter().copied().collect(),
            shutdown: shutdown.clone(),
        };
        let scheduler = Scheduler::new(
            job.clone(),
            gate.clone(),
            clock,
            trigger,
            Weekday::Sun,
            shutdown,
        );
        Ok(Fixture {
            job,
            gate,
            scheduler,
            _dir: dir,
        })
    }

    #[tokio::test]
    async fn test_same_day_trigger_is_gated() -> anyhow::Result<()> {
        let sunday = date(2026, 10, 18);
        let mut f = fixture(sunday, &[sunday, sunday], false)?;

        f.scheduler.run().await;

        assert_eq!(*f.job.attempts.lock().unwrap(), vec![(AttemptKind::Startup, sunday)]);
        assert_eq!(f.gate.last_attempt()?, Some(sunday));
        Ok(())
    }

    #[tokio::test]
    async fn test_runs_weekly_on_sundays_only() -> anyhow::Result<()> {
        let ticks: Vec<NaiveDate> = (15..=26).map(|d| date(2026, 10, d)).collect();
        let mut f = fixture(date(2026, 10, 14), &ticks, false)?;

        f.scheduler.run().await;

        assert_eq!(
            *f.job.attempts.lock().unwrap(),
            vec![
                (AttemptKind::Startup, date(2026, 10, 14)),
                (AttemptKind::Scheduled, date(2026, 10, 18)),
                (AttemptKind::Scheduled, date(2026, 10, 25)),
            ]
        );
        assert_eq!(f.gate.last_attempt()?, Some(date(2026, 10, 25)));
        Ok(())
    }

    #[tokio::test]
    async fn test_non_matching_days_leave_marker_alone() -> anyhow::Result<()> {
        let monday = date(2026, 10, 19);
        let mut f = fixture(monday, &[date(2026, 10, 20), date(2026, 10, 21)], false)?;

        f.scheduler.run().await;

        assert_eq!(f.job.attempts.lock().unwrap().len(), 1);
        assert_eq!(f.gate.last_attempt()?, Some(monday));
        Ok(())
    }

    #[tokio::test]
    async fn test_startup_is_gated_by_existing_marker() -> anyhow::Result<()> {
        let sunday = date(2026, 10, 18);
        let mut f = fixture(sunday, &[], false)?;
        std::fs::write(f.gate.path(), "2026-10-18")?;

        let outcome = f.scheduler.run_once().await;

        assert!(matches!(outcome, Some(AttemptOutcome::Gated)));
        assert!(f.job.attempts.lock().unwrap().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_run_once_reports_finished_attempt() -> anyhow::Result<()> {
        let mut f = fixture(date(2026, 10, 14), &[], false)?;

        let outcome = f.scheduler.run_once().await;

        match outcome {
            Some(AttemptOutcome::Finished(report)) => {
                assert_eq!(report.result, RunResult::AllSucceeded)
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(f.scheduler.state(), SchedulerState::Waiting);
        Ok(())
    }

    #[tokio::test]
    async fn test_run_once_carries_the_abort_reason() -> anyhow::Result<()> {
        let mut f = fixture(date(2026, 10, 14), &[], true)?;

        let outcome = f.scheduler.run_once().await;

        match &outcome {
            Some(AttemptOutcome::Aborted(BackupError::Connection(reason))) => {
                assert_eq!(reason, "Connection refused")
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(!outcome.as_ref().is_none_or(AttemptOutcome::is_success));
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_attempt_still_blocks_same_day_and_loop_continues() -> anyhow::Result<()> {
        let sunday = date(2026, 10, 18);
        let mut f = fixture(sunday, &[sunday, date(2026, 10, 25)], true)?;

        f.scheduler.run().await;

        assert_eq!(
            *f.job.attempts.lock().unwrap(),
            vec![
                (AttemptKind::Startup, sunday),
                (AttemptKind::Scheduled, date(2026, 10, 25)),
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_shutdown_before_start_runs_nothing() -> anyhow::Result<()> {
        let mut f = fixture(date(2026, 10, 18), &[], false)?;
        f.scheduler.shutdown.cancel();

        f.scheduler.run().await;

        assert!(f.job.attempts.lock().unwrap().is_empty());
        assert_eq!(f.gate.last_attempt()?, None);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_trigger_waits_one_period() {
        let period = Duration::from_secs(24 * 60 * 60);
        let mut trigger = IntervalTrigger::new(period);
        let started = Instant::now();

        trigger.fired().await;
        assert!(started.elapsed() >= period);

        trigger.fired().await;
        assert!(started.elapsed() >= period * 2);
    }
}
