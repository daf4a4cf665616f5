//! Task-per-job scheduler with cooperative shutdown

use crate::error::CycleError;
use crate::scheduler::cycles::{run_with_deadline, Cycle, CycleOutcome};
use crate::scheduler::triggers::{Schedule, ScheduleTrigger};
use chrono::Utc;
use log::{debug, error, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;

/// Drives cycles on fixed intervals and wall-clock schedules
///
/// Each interval job and each schedule trigger runs in its own task, so a
/// slow cycle never delays another job. Every run is bounded by the cycle
/// deadline. On shutdown the scheduler stops starting new runs, waits for
/// in-flight ones, then calls [`Cycle::finish`] once per cycle.
pub struct Scheduler {
    cycle_deadline: Duration,
    cycles: Vec<Arc<dyn Cycle>>,
    interval_jobs: Vec<(Arc<dyn Cycle>, Duration)>,
    scheduled_jobs: Vec<(Arc<dyn Cycle>, Schedule)>,
}

impl Scheduler {
    /// Create a scheduler with no jobs
    ///
    /// # Arguments
    ///
    /// * `cycle_deadline` - Upper bound on a single cycle run
    pub fn new(cycle_deadline: Duration) -> Self {
        Self {
            cycle_deadline,
            cycles: Vec::new(),
            interval_jobs: Vec::new(),
            scheduled_jobs: Vec::new(),
        }
    }

    /// Run `cycle` every `interval`, starting immediately
    pub fn every(mut self, cycle: Arc<dyn Cycle>, interval: Duration) -> Self {
        self.register(&cycle);
        self.interval_jobs.push((cycle, interval));
        self
    }

    /// Also run `cycle` at each firing of `schedule`
    pub fn on_schedule(mut self, cycle: Arc<dyn Cycle>, schedule: Schedule) -> Self {
        self.register(&cycle);
        self.scheduled_jobs.push((cycle, schedule));
        self
    }

    /// Get the number of registered jobs
    pub fn job_count(&self) -> usize {
        self.interval_jobs.len()
            + self
                .scheduled_jobs
                .iter()
                .map(|(_, schedule)| schedule.trigger_count())
                .sum::<usize>()
    }

    fn register(&mut self, cycle: &Arc<dyn Cycle>) {
        if !self.cycles.iter().any(|c| c.name() == cycle.name()) {
            self.cycles.push(Arc::clone(cycle));
        }
    }

    /// Run every registered cycle once, in registration order, then finish them
    pub async fn run_once(&self) -> Vec<(String, Result<CycleOutcome, CycleError>)> {
        let mut results = Vec::with_capacity(self.cycles.len());
        for cycle in &self.cycles {
            let result = run_with_deadline(cycle.as_ref(), self.cycle_deadline).await;
            log_result(cycle.as_ref(), "once", &result);
            results.push((cycle.name().to_string(), result));
        }
        self.finish().await;
        results
    }

    /// Run all jobs until `shutdown` turns `true` or its sender is dropped
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        let Self {
            cycle_deadline,
            cycles,
            interval_jobs,
            scheduled_jobs,
        } = self;
        let mut tasks = JoinSet::new();

        for (cycle, interval) in interval_jobs {
            info!("Scheduling {} cycle every {:?}", cycle.name(), interval);
            tasks.spawn(interval_loop(cycle, interval, cycle_deadline, shutdown.clone()));
        }

        for (cycle, schedule) in scheduled_jobs {
            if let Some((at, trigger)) = schedule.next_fire(Utc::now()) {
                info!("Next scheduled {} run at {} ({})", cycle.name(), at, trigger);
            }
            for trigger in schedule.into_triggers() {
                info!("Scheduling {} cycle at {}", cycle.name(), trigger.name());
                tasks.spawn(trigger_loop(
                    Arc::clone(&cycle),
                    trigger,
                    cycle_deadline,
                    shutdown.clone(),
                ));
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Scheduler task failed: {}", e);
            }
        }

        info!("All scheduled jobs stopped");
        for cycle in &cycles {
            cycle.finish().await;
        }
    }

    async fn finish(&self) {
        for cycle in &self.cycles {
            cycle.finish().await;
        }
    }
}

/// Resolves once shutdown is requested or the sender is gone
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

async fn interval_loop(
    cycle: Arc<dyn Cycle>,
    interval: Duration,
    deadline: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => break,
            _ = ticker.tick() => {
                let result = run_with_deadline(cycle.as_ref(), deadline).await;
                log_result(cycle.as_ref(), "interval", &result);
            }
        }
    }

    debug!("{} interval loop stopped", cycle.name());
}

async fn trigger_loop(
    cycle: Arc<dyn Cycle>,
    trigger: Box<dyn ScheduleTrigger>,
    deadline: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let now = Utc::now();
        let Some(next) = trigger.next_fire(now) else {
            debug!("Trigger {} has no further firings", trigger.name());
            break;
        };
        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
        debug!("{} cycle next fires at {} ({})", cycle.name(), next, trigger.name());

        tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => break,
            _ = tokio::time::sleep(wait) => {
                let result = run_with_deadline(cycle.as_ref(), deadline).await;
                log_result(cycle.as_ref(), &trigger.name(), &result);
            }
        }
    }
}

fn log_result(cycle: &dyn Cycle, source: &str, result: &Result<CycleOutcome, CycleError>) {
    match result {
        Ok(CycleOutcome::Completed) => debug!("{} cycle ({}) completed", cycle.name(), source),
        Ok(CycleOutcome::Skipped { reason }) => {
            info!("{} cycle ({}) skipped: {}", cycle.name(), source, reason)
        }
        Err(e) => error!("{} cycle ({}) failed: {}", cycle.name(), source, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::triggers::DailyAt;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingCycle {
        name: &'static str,
        runs: AtomicUsize,
        finishes: AtomicUsize,
        delay: Duration,
    }

    impl CountingCycle {
        fn new(name: &'static str) -> Arc<Self> {
            Self::slow(name, Duration::ZERO)
        }

        fn slow(name: &'static str, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                name,
                runs: AtomicUsize::new(0),
                finishes: AtomicUsize::new(0),
                delay,
            })
        }

        fn runs(&self) -> usize {
            self.runs.load(Ordering::SeqCst)
        }

        fn finishes(&self) -> usize {
            self.finishes.load(Ordering::SeqCst)
        }
    }

    impl Cycle for CountingCycle {
        fn name(&self) -> &str {
            self.name
        }

        fn run<'a>(
            &'a self,
        ) -> Pin<Box<dyn Future<Output = Result<CycleOutcome, CycleError>> + Send + 'a>> {
            Box::pin(async move {
                tokio::time::sleep(self.delay).await;
                self.runs.fetch_add(1, Ordering::SeqCst);
                Ok(CycleOutcome::Completed)
            })
        }

        fn finish<'a>(&'a self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
            Box::pin(async move {
                self.finishes.fetch_add(1, Ordering::SeqCst);
            })
        }
    }

    #[tokio::test]
    async fn test_run_once_runs_each_cycle_once() {
        let monitoring = CountingCycle::new("monitoring");
        let drift = CountingCycle::new("drift");
        let scheduler = Scheduler::new(Duration::from_secs(1))
            .every(monitoring.clone(), Duration::from_secs(6))
            .on_schedule(monitoring.clone(), Schedule::daily_and_weekend(&[9], 12))
            .every(drift.clone(), Duration::from_secs(3600));

        let results = scheduler.run_once().await;

        let names: Vec<&str> = results.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["monitoring", "drift"]);
        assert!(results.iter().all(|(_, r)| matches!(r, Ok(CycleOutcome::Completed))));
        assert_eq!(monitoring.runs(), 1);
        assert_eq!(drift.runs(), 1);
        assert_eq!(monitoring.finishes(), 1);
    }

    #[tokio::test]
    async fn test_run_once_reports_deadline() {
        let slow = CountingCycle::slow("slow", Duration::from_millis(200));
        let scheduler =
            Scheduler::new(Duration::from_millis(20)).every(slow.clone(), Duration::from_secs(1));

        let results = scheduler.run_once().await;
        assert!(matches!(results[0].1, Err(CycleError::DeadlineExceeded(_))));
        assert_eq!(slow.runs(), 0);
    }

    #[tokio::test]
    async fn test_interval_runs_until_shutdown() {
        let cycle = CountingCycle::new("monitoring");
        let scheduler =
            Scheduler::new(Duration::from_secs(1)).every(cycle.clone(), Duration::from_millis(20));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(scheduler.run(rx));
        tokio::time::sleep(Duration::from_millis(110)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        // First tick is immediate
        assert!(cycle.runs() >= 2, "runs: {}", cycle.runs());
        assert_eq!(cycle.finishes(), 1);

        let stopped_at = cycle.runs();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(cycle.runs(), stopped_at);
    }

    #[tokio::test]
    async fn test_shutdown_before_start_runs_nothing() {
        let cycle = CountingCycle::new("monitoring");
        let scheduler = Scheduler::new(Duration::from_secs(1))
            .every(cycle.clone(), Duration::from_millis(10))
            .on_schedule(cycle.clone(), Schedule::daily_and_weekend(&[0, 12], 12));
        let (_tx, rx) = watch::channel(true);

        scheduler.run(rx).await;
        assert_eq!(cycle.runs(), 0);
        assert_eq!(cycle.finishes(), 1);
    }

    #[tokio::test]
    async fn test_in_flight_cycle_completes_on_shutdown() {
        let cycle = CountingCycle::slow("monitoring", Duration::from_millis(100));
        let scheduler =
            Scheduler::new(Duration::from_secs(1)).every(cycle.clone(), Duration::from_secs(60));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(scheduler.run(rx));
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(cycle.runs(), 1);
    }

    #[tokio::test]
    async fn test_dropped_sender_stops_scheduler() {
        let cycle = CountingCycle::new("monitoring");
        let mut schedule = Schedule::new();
        schedule.add_trigger(Box::new(DailyAt::new(3, 0).unwrap()));
        let scheduler = Scheduler::new(Duration::from_secs(1)).on_schedule(cycle.clone(), schedule);
        assert_eq!(scheduler.job_count(), 1);

        let (tx, rx) = watch::channel(false);
        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), scheduler.run(rx))
            .await
            .unwrap();
        assert_eq!(cycle.finishes(), 1);
    }
}
