//! Virtual-user scheduler
//!
//! Runs N independent virtual users as tokio tasks and keeps N in line with the
//! load profile:
//! - `ramping_vus`: every tick, spawn or retire users to match the interpolated target
//! - `per_vu_iterations`: a fixed pool, each user stops after its iteration budget
//!
//! Stopping is cooperative. A user observes its stop signal between iterations
//! and during think time, never in the middle of a request, so in-flight
//! requests complete or time out and are recorded like any other.

use crate::client::{TargetClient, TargetResponse};
use crate::error::{RequestError, Result};
use crate::metrics::{MetricsCollector, RunSummary, SampleRecord};
use crate::profiles::{target_concurrency, total_duration, LoadModel, Stage};
use crate::request::{RequestSpec, Workload};
use futures::future::join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Idle pause between a user's iterations, drawn uniformly from `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThinkTime {
    pub min: Duration,
    pub max: Duration,
}

impl ThinkTime {
    pub fn fixed(pause: Duration) -> Self {
        Self {
            min: pause,
            max: pause,
        }
    }

    pub fn none() -> Self {
        Self::fixed(Duration::ZERO)
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        if self.max <= self.min {
            return self.min;
        }
        let min = self.min.as_micros() as u64;
        let max = self.max.as_micros() as u64;
        Duration::from_micros(rng.gen_range(min..=max))
    }
}

/// Scheduler timing knobs.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    /// How often concurrency is re-converged to the target.
    pub tick: Duration,
    /// How often progress is logged.
    pub progress_interval: Duration,
    pub think_time: ThinkTime,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            progress_interval: Duration::from_secs(10),
            think_time: ThinkTime::fixed(Duration::from_millis(100)),
        }
    }
}

/// Lifecycle of a virtual user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VuState {
    Idle = 0,
    Running = 1,
    Stopped = 2,
}

impl VuState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Running,
            _ => Self::Stopped,
        }
    }
}

/// Scheduler-side handle to one virtual-user task.
struct VirtualUserHandle {
    id: u64,
    stop: watch::Sender<bool>,
    state: Arc<AtomicU8>,
    task: JoinHandle<u64>,
}

impl VirtualUserHandle {
    fn state(&self) -> VuState {
        VuState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Ask the user to stop after its current iteration.
    fn signal_stop(&self) {
        // Receiver lives inside the task; an error only means it already exited.
        let _ = self.stop.send(true);
    }

    fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Everything a virtual user needs, shared by all of them.
struct VuContext {
    workload: Arc<Workload>,
    client: Arc<dyn TargetClient>,
    collector: Arc<MetricsCollector>,
    /// Completed iterations across every user, retired ones included.
    iterations: AtomicU64,
    think_time: ThinkTime,
}

impl VuContext {
    /// One iteration: pick, issue, judge, record.
    async fn iterate(&self, rng: &mut StdRng) {
        let spec = self.workload.next_request(rng);
        let result = self
            .client
            .execute(&spec)
            .await
            .and_then(|response| judge(&spec, response));

        if let Err(err) = &result {
            debug!(scenario = %spec.scenario, url = %spec.url, error = %err, "request failed");
        }

        let sample = SampleRecord::from_result(spec.scenario, &result, self.collector.elapsed_ms());
        self.collector.record(sample);
    }
}

/// Treat a status outside the expected set as a failed request.
pub fn judge(
    spec: &RequestSpec,
    response: TargetResponse,
) -> std::result::Result<TargetResponse, RequestError> {
    if spec.is_success(response.status) {
        Ok(response)
    } else {
        Err(RequestError::UnexpectedStatus {
            status: response.status,
            cache_hit: response.cache_hit,
            elapsed: response.elapsed,
        })
    }
}

async fn run_virtual_user(
    ctx: Arc<VuContext>,
    id: u64,
    mut stop: watch::Receiver<bool>,
    state: Arc<AtomicU8>,
    max_iterations: Option<u64>,
) -> u64 {
    state.store(VuState::Running as u8, Ordering::Release);
    let mut rng = StdRng::from_entropy();
    let mut iterations = 0u64;

    loop {
        if *stop.borrow() {
            break;
        }
        if max_iterations.is_some_and(|max| iterations >= max) {
            break;
        }

        ctx.iterate(&mut rng).await;
        iterations += 1;
        ctx.iterations.fetch_add(1, Ordering::Relaxed);

        let pause = ctx.think_time.sample(&mut rng);
        if pause.is_zero() {
            tokio::task::yield_now().await;
            continue;
        }
        tokio::select! {
            _ = tokio::time::sleep(pause) => {}
            changed = stop.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    state.store(VuState::Stopped as u8, Ordering::Release);
    debug!(vu = id, iterations, "virtual user stopped");
    iterations
}

/// Outcome of a completed run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub summary: RunSummary,
    /// Highest number of simultaneously active users.
    pub peak_vus: usize,
    /// Users spawned over the whole run.
    pub vus_spawned: u64,
    /// Iterations completed across all users.
    pub iterations: u64,
    pub elapsed: Duration,
}

/// Drives virtual users according to a [`LoadModel`].
pub struct VirtualUserScheduler {
    workload: Arc<Workload>,
    client: Arc<dyn TargetClient>,
    model: LoadModel,
    settings: SchedulerSettings,
    next_id: u64,
    peak_vus: usize,
}

impl VirtualUserScheduler {
    pub fn new(
        workload: Workload,
        client: Arc<dyn TargetClient>,
        model: LoadModel,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            workload: Arc::new(workload),
            client,
            model,
            settings,
            next_id: 0,
            peak_vus: 0,
        }
    }

    /// Fresh per-run state; the collector clock starts here.
    fn context(&self) -> Arc<VuContext> {
        Arc::new(VuContext {
            workload: Arc::clone(&self.workload),
            client: Arc::clone(&self.client),
            collector: Arc::new(MetricsCollector::new()),
            iterations: AtomicU64::new(0),
            think_time: self.settings.think_time,
        })
    }

    /// Run to completion and summarize.
    pub async fn run(mut self) -> Result<RunReport> {
        let ctx = self.context();
        let started = ctx.collector.started();
        info!(
            profile = %self.model.description(),
            duration_secs = self.model.duration().as_secs_f64(),
            "starting load run"
        );

        let handles = match self.model.clone() {
            LoadModel::RampingVus { start_vus, stages } => {
                self.drive_ramping(&ctx, start_vus, &stages, started).await
            }
            LoadModel::PerVuIterations {
                vus,
                iterations,
                max_duration,
            } => {
                self.drive_iterations(&ctx, vus, iterations, max_duration, started)
                    .await
            }
        };

        for handle in &handles {
            handle.signal_stop();
        }
        info!(vus = handles.len(), "waiting for in-flight iterations to finish");

        for joined in join_all(handles.into_iter().map(|h| h.task)).await {
            joined?;
        }

        let elapsed = started.elapsed();
        let summary = ctx.collector.summarize_over(elapsed);
        let iterations = ctx.iterations.load(Ordering::Relaxed);
        info!(
            requests = summary.total_requests(),
            iterations,
            elapsed_secs = elapsed.as_secs_f64(),
            "load run complete"
        );

        Ok(RunReport {
            summary,
            peak_vus: self.peak_vus,
            vus_spawned: self.next_id,
            iterations,
            elapsed,
        })
    }

    /// Tick loop for ramping profiles. Returns every handle ever spawned.
    async fn drive_ramping(
        &mut self,
        ctx: &Arc<VuContext>,
        start_vus: usize,
        stages: &[Stage],
        started: Instant,
    ) -> Vec<VirtualUserHandle> {
        let end = total_duration(stages);
        let mut active: Vec<VirtualUserHandle> = Vec::new();
        let mut retired: Vec<VirtualUserHandle> = Vec::new();

        let mut ticker = interval(self.settings.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_progress = Duration::ZERO;

        loop {
            ticker.tick().await;
            let elapsed = started.elapsed();
            if elapsed >= end {
                break;
            }

            let target = target_concurrency(stages, start_vus, elapsed);
            self.converge(ctx, &mut active, &mut retired, target);

            if elapsed.saturating_sub(last_progress) >= self.settings.progress_interval {
                last_progress = elapsed;
                log_progress(ctx, elapsed, active.len(), target);
            }
        }

        active.extend(retired);
        active
    }

    /// Spawn or retire users until `active.len() == target`.
    fn converge(
        &mut self,
        ctx: &Arc<VuContext>,
        active: &mut Vec<VirtualUserHandle>,
        retired: &mut Vec<VirtualUserHandle>,
        target: usize,
    ) {
        while active.len() < target {
            let handle = self.spawn_vu(ctx, None);
            active.push(handle);
        }

        if active.len() > target {
            // Most recently spawned users retire first.
            for handle in active.drain(target..) {
                handle.signal_stop();
                retired.push(handle);
            }
        }

        // Counts live in the shared context, so stopped users can be let go.
        retired.retain(|h| h.state() != VuState::Stopped);
        self.peak_vus = self.peak_vus.max(active.len());
    }

    /// Fixed pool of users, each with an iteration budget, bounded by `max_duration`.
    async fn drive_iterations(
        &mut self,
        ctx: &Arc<VuContext>,
        vus: usize,
        iterations: u64,
        max_duration: Duration,
        started: Instant,
    ) -> Vec<VirtualUserHandle> {
        let handles: Vec<VirtualUserHandle> =
            (0..vus).map(|_| self.spawn_vu(ctx, Some(iterations))).collect();
        self.peak_vus = vus;

        let deadline = started + max_duration;
        let mut ticker = interval(self.settings.tick.min(self.settings.progress_interval));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_progress = Duration::ZERO;

        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    warn!(
                        max_duration_secs = max_duration.as_secs_f64(),
                        "max duration reached before all iterations completed"
                    );
                    break;
                }
                _ = ticker.tick() => {
                    if handles.iter().all(|h| h.is_finished()) {
                        break;
                    }
                    let elapsed = started.elapsed();
                    if elapsed.saturating_sub(last_progress) >= self.settings.progress_interval {
                        last_progress = elapsed;
                        let running = handles
                            .iter()
                            .filter(|h| h.state() != VuState::Stopped)
                            .count();
                        log_progress(ctx, elapsed, running, vus);
                    }
                }
            }
        }

        handles
    }

    fn spawn_vu(&mut self, ctx: &Arc<VuContext>, max_iterations: Option<u64>) -> VirtualUserHandle {
        let id = self.next_id;
        self.next_id += 1;

        let (stop_tx, stop_rx) = watch::channel(false);
        let state = Arc::new(AtomicU8::new(VuState::Idle as u8));
        let task = tokio::spawn(run_virtual_user(
            Arc::clone(ctx),
            id,
            stop_rx,
            Arc::clone(&state),
            max_iterations,
        ));

        VirtualUserHandle {
            id,
            stop: stop_tx,
            state,
            task,
        }
    }

}

fn log_progress(ctx: &VuContext, elapsed: Duration, active: usize, target: usize) {
    let progress = ctx.collector.progress();
    info!(
        elapsed_secs = elapsed.as_secs(),
        active_vus = active,
        target_vus = target,
        requests = progress.total,
        iterations = ctx.iterations.load(Ordering::Relaxed),
        error_rate = progress.error_rate(),
        "progress"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeyPools;
    use crate::mixer::{RequestMixer, ScenarioWeights};
    use crate::request::{Method, TargetSettings};
    use async_trait::async_trait;

    /// Answers instantly with the expected status for the method.
    struct InstantTarget {
        calls: AtomicU64,
    }

    #[async_trait]
    impl TargetClient for InstantTarget {
        async fn execute(
            &self,
            request: &RequestSpec,
        ) -> std::result::Result<TargetResponse, RequestError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            let status = match request.method {
                Method::Get => 302,
                Method::Post => 201,
            };
            Ok(TargetResponse {
                status,
                cache_hit: Some(true),
                elapsed: Duration::from_millis(1),
            })
        }
    }

    fn workload() -> Workload {
        Workload::new(
            RequestMixer::new(0.8, ScenarioWeights::tiered(0.3, 0.5, 0.2).unwrap()).unwrap(),
            KeyPools::new(10, 100, 1_000).unwrap(),
            TargetSettings {
                base_url: "http://target.test".to_string(),
                shorten_path: "/api/shorten".to_string(),
                url_prefix: "https://example.com/page".to_string(),
                redirect_timeout: Duration::from_secs(5),
                shorten_timeout: Duration::from_secs(10),
            },
        )
        .unwrap()
    }

    fn context(think_time: ThinkTime) -> Arc<VuContext> {
        Arc::new(VuContext {
            workload: Arc::new(workload()),
            client: Arc::new(InstantTarget {
                calls: AtomicU64::new(0),
            }),
            collector: Arc::new(MetricsCollector::new()),
            iterations: AtomicU64::new(0),
            think_time,
        })
    }

    #[test]
    fn test_think_time_sampling() {
        let mut rng = StdRng::seed_from_u64(9);
        let fixed = ThinkTime::fixed(Duration::from_millis(100));
        assert_eq!(fixed.sample(&mut rng), Duration::from_millis(100));

        let ranged = ThinkTime {
            min: Duration::from_millis(50),
            max: Duration::from_millis(150),
        };
        for _ in 0..1_000 {
            let pause = ranged.sample(&mut rng);
            assert!(pause >= ranged.min && pause <= ranged.max);
        }
    }

    #[test]
    fn test_judge_status() {
        let spec = workload().shorten();
        let response = |status| TargetResponse {
            status,
            cache_hit: None,
            elapsed: Duration::from_millis(1),
        };
        assert!(judge(&spec, response(201)).is_ok());
        assert!(matches!(
            judge(&spec, response(302)),
            Err(RequestError::UnexpectedStatus { status: 302, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_vu_state_machine_and_iteration_budget() {
        let ctx = context(ThinkTime::fixed(Duration::from_millis(10)));
        let (_stop_tx, stop_rx) = watch::channel(false);
        let state = Arc::new(AtomicU8::new(VuState::Idle as u8));
        assert_eq!(VuState::from_u8(state.load(Ordering::Acquire)), VuState::Idle);

        let iterations =
            run_virtual_user(Arc::clone(&ctx), 0, stop_rx, Arc::clone(&state), Some(25)).await;

        assert_eq!(iterations, 25);
        assert_eq!(VuState::from_u8(state.load(Ordering::Acquire)), VuState::Stopped);
        assert_eq!(ctx.collector.progress().total, 25);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_signal_interrupts_think_time() {
        let ctx = context(ThinkTime::fixed(Duration::from_secs(3600)));
        let (stop_tx, stop_rx) = watch::channel(false);
        let state = Arc::new(AtomicU8::new(VuState::Idle as u8));
        let task = tokio::spawn(run_virtual_user(
            Arc::clone(&ctx),
            0,
            stop_rx,
            Arc::clone(&state),
            None,
        ));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(VuState::from_u8(state.load(Ordering::Acquire)), VuState::Running);
        stop_tx.send(true).unwrap();

        let iterations = task.await.unwrap();
        assert_eq!(iterations, 1);
        assert_eq!(VuState::from_u8(state.load(Ordering::Acquire)), VuState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_converge_spawns_and_retires() {
        let mut scheduler = VirtualUserScheduler::new(
            workload(),
            Arc::new(InstantTarget {
                calls: AtomicU64::new(0),
            }),
            LoadModel::ramping(0, vec![Stage::new(Duration::from_secs(1), 1)]).unwrap(),
            SchedulerSettings {
                think_time: ThinkTime::fixed(Duration::from_millis(100)),
                ..Default::default()
            },
        );
        let ctx = scheduler.context();
        let mut active = Vec::new();
        let mut retired = Vec::new();

        scheduler.converge(&ctx, &mut active, &mut retired, 5);
        assert_eq!(active.len(), 5);
        assert_eq!(scheduler.peak_vus, 5);

        // Let every user complete a few iterations before shrinking.
        tokio::time::sleep(Duration::from_millis(250)).await;
        scheduler.converge(&ctx, &mut active, &mut retired, 2);
        assert_eq!(active.len(), 2);
        assert_eq!(retired.len(), 3);
        assert_eq!(active.iter().map(|h| h.id).collect::<Vec<_>>(), vec![0, 1]);

        // Stopped retirees are released on the next tick.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(retired.iter().all(|h| h.state() == VuState::Stopped));
        scheduler.converge(&ctx, &mut active, &mut retired, 2);
        assert!(retired.is_empty());

        for handle in &active {
            handle.signal_stop();
        }
        for handle in active {
            handle.task.await.unwrap();
        }

        // Work done by released users is still counted.
        let total = ctx.collector.progress().total;
        assert_eq!(ctx.iterations.load(Ordering::Relaxed), total);
        assert!(total >= 5 * 3);
        assert_eq!(scheduler.next_id, 5);
    }
}
