//! 软件时钟同步器
//!
//! 在没有硬件触发的情况下，把持续采样的测量通道与独立触发的激光通道对齐到
//! 同一个时间零点 t0。每个会话两个线程：
//!
//! - 测量线程：阻塞式设备 I/O（施加偏置、采样）
//! - 编排线程（调用方线程）：按时间表开关激光，短切片睡眠
//!
//! # 协议
//!
//! - **Protocol A**（两阶段）：测量线程施加偏置后发出就绪信号，编排线程收到
//!   信号才设定 t0 并发给测量线程，两边的时间戳共享同一零点。
//! - **Protocol B**（退化）：测量线程一次性启动，编排线程固定等待
//!   `init_time_s` 后估计 t0。结束后运行对齐诊断，只告警不改结果。
//!
//! # 清理保证
//!
//! 无论在哪一步失败：测量线程一定被 join，激光关闭，电通道 `output_off()`
//! 恰好调用一次，然后原样返回最初的错误。

use crate::calibration::AlignmentCheck;
use crate::error::SyncError;
use crate::firing::{FiringStop, at_offset, fit_schedule, run_schedule};
use crate::session::{SyncProtocol, SyncRequest, SyncSession, SyncState};
use crossbeam_channel::{Receiver, RecvTimeoutError, bounded};
use memtest_driver::{
    RouterSettings, SystemRouter, TestError, normalize_params, normalize_result,
};
use memtest_instrument::timing::sleep_until;
use memtest_instrument::{
    Acquisition, AdapterError, CancelToken, CapabilityRegistry, Clock, InstrumentAdapter,
    LaserDriver, MonotonicClock,
};
use memtest_protocol::{
    FireInterval, FiringSchedule, Operation, ParamBag, ProtocolError, TestResult,
    duration_from_seconds,
};
use memtest_tools::{RouterSection, SchedulerSection, SyncSection};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, ScopedJoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Protocol B 初始化等待的上限（s）
pub const MAX_INIT_TIME_S: f64 = 5.0;

/// 等待就绪信号时检查取消的间隔
const READY_POLL: Duration = Duration::from_millis(10);

/// Synchronizer Builder（链式构造）
///
/// # Example
///
/// ```no_run
/// use memtest_client::{SyncProtocol, SynchronizerBuilder};
/// use memtest_tools::MemtestConfig;
///
/// let config = MemtestConfig::default();
/// let sync = SynchronizerBuilder::new()
///     .sync_config(&config.sync)
///     .scheduler_config(&config.scheduler)
///     .protocol(SyncProtocol::Auto)
///     .build();
/// ```
pub struct SynchronizerBuilder {
    settings: SyncSection,
    min_segment_s: f64,
    router: RouterSettings,
    clock: Option<Arc<dyn Clock>>,
    protocol: SyncProtocol,
    registry: CapabilityRegistry,
}

impl SynchronizerBuilder {
    pub fn new() -> Self {
        Self {
            settings: SyncSection::default(),
            min_segment_s: SchedulerSection::default().min_segment_s,
            router: RouterSettings::default(),
            clock: None,
            protocol: SyncProtocol::Auto,
            registry: CapabilityRegistry::standard(),
        }
    }

    /// `[sync]` 段
    pub fn sync_config(mut self, section: &SyncSection) -> Self {
        self.settings = section.clone();
        self
    }

    /// `[scheduler]` 段
    pub fn scheduler_config(mut self, section: &SchedulerSection) -> Self {
        self.min_segment_s = section.min_segment_s;
        self
    }

    /// `[router]` 段（结果规范化使用）
    pub fn router_config(mut self, section: &RouterSection) -> Self {
        self.router = RouterSettings::from(section);
        self
    }

    /// 注入时钟（默认 [`MonotonicClock`]）
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// 采集方式能力表（默认标准表）
    ///
    /// 经 [`Synchronizer::run_with_router`] 运行时改用路由器自己的注册表。
    pub fn registry(mut self, registry: CapabilityRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// 协议选择
    pub fn protocol(mut self, protocol: SyncProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    /// 就绪超时
    pub fn readiness_timeout(mut self, timeout: Duration) -> Self {
        self.settings.readiness_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Protocol B 初始化等待（s）
    pub fn init_time(mut self, init_time_s: f64) -> Self {
        self.settings.init_time_s = init_time_s;
        self
    }

    pub fn build(self) -> Synchronizer {
        Synchronizer {
            clock: self.clock.unwrap_or_else(|| Arc::new(MonotonicClock::new())),
            settings: self.settings,
            min_segment_s: self.min_segment_s,
            router: self.router,
            protocol: self.protocol,
            registry: self.registry,
            electrical_busy: AtomicBool::new(false),
            laser_busy: AtomicBool::new(false),
            state: Mutex::new(SyncState::Idle),
        }
    }
}

impl Default for SynchronizerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// 软件时钟同步器
///
/// 每对（电通道适配器, 激光）使用一个实例；同一实例上的第二个并发会话
/// 立即返回 [`SyncError::Busy`]，不排队。
pub struct Synchronizer {
    clock: Arc<dyn Clock>,
    settings: SyncSection,
    min_segment_s: f64,
    router: RouterSettings,
    protocol: SyncProtocol,
    registry: CapabilityRegistry,
    electrical_busy: AtomicBool,
    laser_busy: AtomicBool,
    state: Mutex<SyncState>,
}

/// 会话期间持有的单飞标志，drop 时释放
struct SessionGuard<'a> {
    electrical: &'a AtomicBool,
    laser: &'a AtomicBool,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.laser.store(false, Ordering::Release);
        self.electrical.store(false, Ordering::Release);
    }
}

fn claim(flag: &AtomicBool, resource: &'static str) -> Result<(), SyncError> {
    flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .map(|_| ())
        .map_err(|_| SyncError::Busy(resource))
}

/// 会话计划（校验通过后、触碰设备之前确定）
struct Plan {
    protocol: SyncProtocol,
    params: ParamBag,
    schedule: FiringSchedule,
    slice: Duration,
    duration_s: f64,
}

/// 测量阶段的产出
struct Measured {
    t0: Instant,
    result: TestResult,
    fired: Vec<FireInterval>,
}

enum Readiness {
    Signalled,
    TimedOut,
    WorkerExited,
    Cancelled,
}

type Worker<'scope> = ScopedJoinHandle<'scope, Result<TestResult, AdapterError>>;

impl Synchronizer {
    /// 当前（或上一个会话结束时的）状态
    pub fn state(&self) -> SyncState {
        *self.state.lock()
    }

    /// 是否有会话正在运行
    pub fn is_busy(&self) -> bool {
        self.electrical_busy.load(Ordering::Acquire) || self.laser_busy.load(Ordering::Acquire)
    }

    /// 同步器使用的时钟
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    fn set_state(&self, next: SyncState) {
        let mut state = self.state.lock();
        debug!("sync state {:?} -> {:?}", *state, next);
        *state = next;
    }

    fn acquire(&self) -> Result<SessionGuard<'_>, SyncError> {
        claim(&self.electrical_busy, "electrical channel")?;
        if let Err(e) = claim(&self.laser_busy, "laser") {
            self.electrical_busy.store(false, Ordering::Release);
            return Err(e);
        }
        Ok(SessionGuard {
            electrical: &self.electrical_busy,
            laser: &self.laser_busy,
        })
    }

    /// 租用路由器当前的适配器并运行一个同步会话
    ///
    /// 采集方式按路由器的能力注册表检查。
    pub fn run_with_router(
        &self,
        router: &SystemRouter,
        laser: &mut dyn LaserDriver,
        request: &SyncRequest,
        cancel: &CancelToken,
    ) -> Result<SyncSession, SyncError> {
        let mut adapter = router.lease()?;
        self.run_session(&mut *adapter, laser, request, cancel, router.registry())
    }

    /// 运行一个同步会话：测量 `duration_s`，同时按时间表触发激光
    pub fn run_laser_and_read(
        &self,
        adapter: &mut dyn InstrumentAdapter,
        laser: &mut dyn LaserDriver,
        request: &SyncRequest,
        cancel: &CancelToken,
    ) -> Result<SyncSession, SyncError> {
        self.run_session(adapter, laser, request, cancel, &self.registry)
    }

    fn run_session(
        &self,
        adapter: &mut dyn InstrumentAdapter,
        laser: &mut dyn LaserDriver,
        request: &SyncRequest,
        cancel: &CancelToken,
        registry: &CapabilityRegistry,
    ) -> Result<SyncSession, SyncError> {
        let _guard = self.acquire()?;
        self.set_state(SyncState::Idle);

        // 校验失败时尚未触碰任何设备
        let plan = self.prepare(&*adapter, request, registry).inspect_err(|_| {
            self.set_state(SyncState::Failed);
        })?;
        info!(
            "Synchronized session on {}: {} protocol, {} laser intervals, {} s",
            adapter.system_name(),
            plan.protocol,
            plan.schedule.len(),
            plan.duration_s
        );

        let outcome = match plan.protocol {
            SyncProtocol::TwoPhase => self.run_two_phase(&mut *adapter, &mut *laser, &plan, cancel),
            _ => self.run_fallback(&mut *adapter, &mut *laser, &plan, cancel),
        }
        .and_then(|mut measured| {
            measured.result = normalize_result(Operation::TimedRead, measured.result, &self.router)?;
            Ok(measured)
        });

        self.release(adapter, laser);

        let measured = match outcome {
            Ok(measured) => measured,
            Err(e) => {
                self.set_state(SyncState::Failed);
                warn!("Synchronized session failed: {}", e);
                return Err(e);
            },
        };

        // 运行时截断后只保留实际执行的部分
        let schedule = if measured.fired.len() < plan.schedule.len() {
            plan.schedule.prefix(measured.fired.len())
        } else {
            plan.schedule
        };

        let alignment = (plan.protocol == SyncProtocol::Fallback).then(|| {
            AlignmentCheck {
                relative_threshold: self.settings.relative_threshold,
                baseline_samples: self.settings.baseline_samples,
                tolerance_factor: self.settings.alignment_tolerance_factor,
            }
            .run(
                &measured.result.timestamps,
                &measured.result.resistances,
                &schedule,
                request.sample_interval_s,
            )
        });

        self.set_state(SyncState::Done);
        info!(
            "Synchronized session done: {} samples, {} laser intervals",
            measured.result.len(),
            measured.fired.len()
        );
        Ok(SyncSession {
            t0: measured.t0,
            duration_s: plan.duration_s,
            sample_interval_s: request.sample_interval_s,
            protocol: plan.protocol,
            result: measured.result,
            schedule,
            fired: measured.fired,
            alignment,
        })
    }

    fn prepare(
        &self,
        adapter: &dyn InstrumentAdapter,
        request: &SyncRequest,
        registry: &CapabilityRegistry,
    ) -> Result<Plan, SyncError> {
        let backend = adapter.backend();
        let two_phase = adapter.supports_two_phase()
            && registry
                .acquisition(backend, Acquisition::TwoPhase)
                .is_supported();
        let protocol = match self.protocol {
            SyncProtocol::Auto if two_phase => SyncProtocol::TwoPhase,
            SyncProtocol::Auto => SyncProtocol::Fallback,
            SyncProtocol::TwoPhase if !adapter.supports_two_phase() => {
                return Err(SyncError::Unsupported(backend));
            },
            forced => forced,
        };
        let acquisition = match protocol {
            SyncProtocol::TwoPhase => Acquisition::TwoPhase,
            _ => Acquisition::FreeRunning,
        };
        registry
            .check_acquisition(backend, acquisition)
            .map_err(|reason| TestError::Capability {
                backend,
                operation: Operation::TimedRead,
                reason: format!("{acquisition}: {reason}"),
            })?;

        let interval = request.sample_interval_s;
        if !interval.is_finite() || interval <= 0.0 || interval > request.duration_s {
            return Err(ProtocolError::InvalidParameter {
                name: "sample_interval".to_string(),
                reason: format!(
                    "{interval} s must be positive and no longer than the {} s measurement",
                    request.duration_s
                ),
            }
            .into());
        }
        let params = normalize_params(
            &request.timed_read_request(),
            backend,
            &adapter.hardware_limits(),
        )?;

        let schedule = request.pattern.build(self.min_segment_s)?;
        let schedule = fit_schedule(&schedule, request.duration_s)?;

        Ok(Plan {
            protocol,
            params,
            schedule,
            slice: duration_from_seconds("sample_interval", interval / 4.0)?,
            duration_s: request.duration_s,
        })
    }

    fn readiness_timeout(&self) -> Duration {
        Duration::from_millis(self.settings.readiness_timeout_ms)
    }

    fn init_time(&self) -> Duration {
        let init = self.settings.init_time_s;
        let clamped = if init.is_finite() {
            init.clamp(0.0, MAX_INIT_TIME_S)
        } else {
            0.0
        };
        if clamped != init {
            warn!("init_time_s = {} clamped to {} s", init, clamped);
        }
        Duration::from_secs_f64(clamped)
    }

    /// Protocol A
    fn run_two_phase(
        &self,
        adapter: &mut dyn InstrumentAdapter,
        laser: &mut dyn LaserDriver,
        plan: &Plan,
        cancel: &CancelToken,
    ) -> Result<Measured, SyncError> {
        let clock: &dyn Clock = &*self.clock;
        let abort = cancel.child();
        let (ready_tx, ready_rx) = bounded::<()>(1);
        let (start_tx, start_rx) = bounded::<Instant>(1);
        let params = &plan.params;
        let ready_deadline = clock.now().checked_add(self.readiness_timeout());

        thread::scope(|s| {
            let worker_abort = abort.clone();
            let worker = s.spawn(move || {
                raise_worker_priority();
                let outcome = (|| -> Result<TestResult, AdapterError> {
                    adapter.arm_timed_read(params)?;
                    ready_tx.send(()).map_err(|_| AdapterError::Aborted)?;
                    // 只有收到 t0 之后才开始采样
                    let t0 = start_rx.recv().map_err(|_| AdapterError::Aborted)?;
                    adapter.collect_timed_read(params, t0, clock, &worker_abort)
                })();
                if outcome.is_err() {
                    worker_abort.cancel();
                }
                outcome
            });
            self.set_state(SyncState::Armed);

            match wait_ready(clock, &ready_rx, ready_deadline, cancel) {
                Readiness::Signalled => {},
                Readiness::TimedOut => {
                    abort.cancel();
                    drop(start_tx);
                    let _ = join_worker(worker);
                    return Err(SyncError::ReadinessTimeout(self.readiness_timeout()));
                },
                Readiness::WorkerExited | Readiness::Cancelled => {
                    abort.cancel();
                    drop(start_tx);
                    return Err(early_exit(join_worker(worker)));
                },
            }

            let t0 = clock.now();
            if start_tx.send(t0).is_err() {
                return Err(early_exit(join_worker(worker)));
            }
            self.set_state(SyncState::Running);

            let (fired, firing) = self.fire_and_collect(laser, plan, t0, &abort);
            let result = resolve(firing, join_worker(worker), cancel)?;
            Ok(Measured { t0, result, fired })
        })
    }

    /// Protocol B
    fn run_fallback(
        &self,
        adapter: &mut dyn InstrumentAdapter,
        laser: &mut dyn LaserDriver,
        plan: &Plan,
        cancel: &CancelToken,
    ) -> Result<Measured, SyncError> {
        let clock: &dyn Clock = &*self.clock;
        let abort = cancel.child();
        let params = &plan.params;
        let init = self.init_time();

        thread::scope(|s| {
            let worker_abort = abort.clone();
            let worker = s.spawn(move || {
                raise_worker_priority();
                let outcome = adapter.free_running_read(params, clock, &worker_abort);
                if outcome.is_err() {
                    worker_abort.cancel();
                }
                outcome
            });
            self.set_state(SyncState::Armed);

            // t0 只是估计值：假定 init 之后设备已开始采样
            let settled = sleep_until(clock, clock.now() + init, plan.slice, &abort);
            let t0 = clock.now();
            if !settled {
                abort.cancel();
                return Err(early_exit(join_worker(worker)));
            }
            self.set_state(SyncState::Running);

            let (fired, firing) = self.fire_and_collect(laser, plan, t0, &abort);
            let result = resolve(firing, join_worker(worker), cancel)?;
            Ok(Measured { t0, result, fired })
        })
    }

    /// 执行时间表，然后等待测量窗口结束
    ///
    /// 失败时触发 `abort`，让测量线程尽快退出。
    fn fire_and_collect(
        &self,
        laser: &mut dyn LaserDriver,
        plan: &Plan,
        t0: Instant,
        abort: &CancelToken,
    ) -> (Vec<FireInterval>, Result<(), FiringStop>) {
        let clock: &dyn Clock = &*self.clock;
        let mut fired = Vec::with_capacity(plan.schedule.len());
        let firing = run_schedule(
            clock,
            laser,
            &plan.schedule,
            t0,
            plan.duration_s,
            plan.slice,
            abort,
            &mut fired,
        );

        let firing = match firing {
            Ok(()) => {
                self.set_state(SyncState::Collecting);
                if sleep_until(clock, at_offset(t0, plan.duration_s), plan.slice, abort) {
                    Ok(())
                } else {
                    Err(FiringStop::Interrupted)
                }
            },
            Err(stop) => {
                abort.cancel();
                if let FiringStop::Laser(e) = &stop {
                    error!("Laser failed after {} intervals: {}", fired.len(), e);
                }
                Err(stop)
            },
        };
        (fired, firing)
    }

    /// 清理：关闭激光，关闭电通道输出（各一次）
    fn release(&self, adapter: &mut dyn InstrumentAdapter, laser: &mut dyn LaserDriver) {
        if let Err(e) = laser.off() {
            error!("Failed to turn laser off: {}", e);
        }
        if let Err(e) = adapter.output_off() {
            error!("Failed to switch {} output off: {}", adapter.system_name(), e);
        }
    }
}

/// 等待就绪信号；期间每 `READY_POLL` 检查一次取消
///
/// 截止时间按注入的时钟判断（`None` 表示永不超时），轮询间隔是真实时间。
fn wait_ready(
    clock: &dyn Clock,
    ready_rx: &Receiver<()>,
    deadline: Option<Instant>,
    cancel: &CancelToken,
) -> Readiness {
    loop {
        if cancel.is_cancelled() {
            return Readiness::Cancelled;
        }
        let mut poll = READY_POLL;
        if let Some(deadline) = deadline {
            let now = clock.now();
            if now >= deadline {
                return Readiness::TimedOut;
            }
            poll = poll.min(deadline - now);
        }
        match ready_rx.recv_timeout(poll) {
            Ok(()) => return Readiness::Signalled,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => return Readiness::WorkerExited,
        }
    }
}

fn join_worker(worker: Worker<'_>) -> Result<TestResult, SyncError> {
    match worker.join() {
        Ok(outcome) => outcome.map_err(SyncError::Measurement),
        Err(_) => {
            error!("Measurement worker panicked");
            Err(SyncError::WorkerPanicked)
        },
    }
}

/// 合并两个线程的结果，返回最初的错误
///
/// 激光错误优先（此时测量线程是被中止的）；其次是测量线程自身的错误；
/// 中止导致的 `Aborted` 归为取消。
fn resolve(
    firing: Result<(), FiringStop>,
    measured: Result<TestResult, SyncError>,
    cancel: &CancelToken,
) -> Result<TestResult, SyncError> {
    match firing {
        Err(FiringStop::Laser(e)) => Err(SyncError::Laser(e)),
        Err(FiringStop::Interrupted) => Err(early_exit(measured)),
        Ok(()) if cancel.is_cancelled() => Err(early_exit(measured)),
        Ok(()) => measured,
    }
}

/// 会话未正常走完时的错误：测量线程自身的错误优先，否则视为取消
fn early_exit(measured: Result<TestResult, SyncError>) -> SyncError {
    match measured {
        Err(SyncError::Measurement(AdapterError::Aborted)) | Ok(_) => SyncError::Cancelled,
        Err(e) => e,
    }
}

fn raise_worker_priority() {
    #[cfg(feature = "realtime")]
    {
        use thread_priority::*;

        match set_current_thread_priority(ThreadPriority::Max) {
            Ok(_) => debug!("Measurement worker priority set to MAX (realtime)"),
            Err(e) => warn!(
                "Failed to set measurement worker priority: {}. \
                On Linux, you may need to run with CAP_SYS_NICE or use rtkit.",
                e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memtest_driver::ErrorKind;
    use memtest_instrument::mock::MockLaser;
    use memtest_instrument::{
        Backend, Capability, ConnectOptions, DeviceError, DeviceErrorKind, RegistryBuilder,
        SimulatedClock,
    };
    use memtest_protocol::{HardwareLimits, PatternSpec, TimeUnit};
    use std::sync::atomic::AtomicUsize;

    /// 两阶段桩：`arm` 先把模拟时钟推进 `ready_after`，再（可选）真实阻塞后就绪
    struct StagedAdapter {
        clock: Arc<SimulatedClock>,
        ready_after: Duration,
        ready_at: Option<Instant>,
        block_arm: Option<Duration>,
        fail_arm: bool,
        two_phase: bool,
        output_off: Arc<AtomicUsize>,
    }

    impl StagedAdapter {
        fn new(clock: Arc<SimulatedClock>) -> Self {
            Self {
                clock,
                ready_after: Duration::ZERO,
                ready_at: None,
                block_arm: None,
                fail_arm: false,
                two_phase: true,
                output_off: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn output_off_calls(&self) -> usize {
            self.output_off.load(Ordering::SeqCst)
        }
    }

    impl InstrumentAdapter for StagedAdapter {
        fn system_name(&self) -> &str {
            "staged stub"
        }

        fn backend(&self) -> Backend {
            Backend::Tsp2450
        }

        fn hardware_limits(&self) -> HardwareLimits {
            Backend::Tsp2450.default_limits()
        }

        fn connect(&mut self, _: &str, _: &ConnectOptions) -> Result<bool, AdapterError> {
            Ok(true)
        }

        fn disconnect(&mut self) -> Result<(), AdapterError> {
            Ok(())
        }

        fn is_connected(&self) -> bool {
            true
        }

        fn idn(&mut self) -> Result<String, AdapterError> {
            Ok("stub".to_string())
        }

        fn output_off(&mut self) -> Result<(), AdapterError> {
            self.output_off.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn supports_two_phase(&self) -> bool {
            self.two_phase
        }

        fn arm_timed_read(&mut self, _params: &ParamBag) -> Result<(), AdapterError> {
            self.clock.advance(self.ready_after);
            if let Some(block) = self.block_arm {
                std::thread::sleep(block);
            }
            if self.fail_arm {
                return Err(DeviceError::new(DeviceErrorKind::Interlock, "interlock open").into());
            }
            self.ready_at = Some(self.clock.now());
            Ok(())
        }

        /// 直接生成采样，不推进共享的模拟时钟（只有编排线程推进时间）
        fn collect_timed_read(
            &mut self,
            params: &ParamBag,
            _t0: Instant,
            _clock: &dyn Clock,
            cancel: &CancelToken,
        ) -> Result<TestResult, AdapterError> {
            let duration = params.time_in("duration", TimeUnit::Seconds)?;
            let interval = params.time_in("sample_interval", TimeUnit::Seconds)?;
            let mut result = TestResult::new();
            let mut k = 0;
            while (k as f64) * interval < duration {
                if cancel.is_cancelled() {
                    return Err(AdapterError::Aborted);
                }
                result.push_sample(k as f64 * interval, 0.2, 2e-4);
                k += 1;
            }
            Ok(result)
        }
    }

    fn request() -> SyncRequest {
        let pattern = PatternSpec::new("1011", 0.1, 0.1)
            .with_repeats(2)
            .with_start_delay(0.25);
        SyncRequest::new(pattern, 2.0, 0.05)
    }

    fn synchronizer(clock: Arc<SimulatedClock>) -> Synchronizer {
        SynchronizerBuilder::new().clock(clock).build()
    }

    #[test]
    fn test_two_phase_fires_only_after_readiness() {
        let clock = Arc::new(SimulatedClock::new());
        let mut adapter = StagedAdapter::new(clock.clone());
        adapter.ready_after = Duration::from_secs(3);
        let mut laser = MockLaser::new();
        let sync = synchronizer(clock.clone());

        let session = sync
            .run_laser_and_read(&mut adapter, &mut laser, &request(), &CancelToken::new())
            .unwrap();

        assert_eq!(session.protocol, SyncProtocol::TwoPhase);
        let ready_at = adapter.ready_at.unwrap();
        assert!(session.t0 >= ready_at);
        assert!(session.t0.duration_since(clock.origin()) >= Duration::from_secs(3));

        // 第二轮的第二个区间（2.25 s 起）放不下，被截断
        assert_eq!(session.schedule.len(), 4);
        assert!(session.schedule.iter().all(|i| i.end_s <= 2.0));
        assert_eq!(session.fired.len(), 4);
        assert!(session.fired[0].start_s >= 0.25 - 1e-9);
        for (fired, planned) in session.fired.iter().zip(session.schedule.iter()) {
            assert!(fired.start_s >= planned.start_s - 1e-9);
        }

        assert!(!session.result.is_empty());
        assert!(session.result.timestamps.iter().all(|t| *t >= 0.0));
        assert!(session.alignment.is_none());
        assert_eq!(adapter.output_off_calls(), 1);
        assert!(!laser.is_emitting());
        assert_eq!(sync.state(), SyncState::Done);
        assert!(!sync.is_busy());
    }

    #[test]
    fn test_readiness_timeout_joins_worker() {
        let clock = Arc::new(SimulatedClock::new());
        let mut adapter = StagedAdapter::new(clock.clone());
        // 设备在模拟时间里花了 1 s 仍未就绪
        adapter.ready_after = Duration::from_secs(1);
        adapter.block_arm = Some(Duration::from_millis(300));
        let mut laser = MockLaser::new();
        let log = laser.log();
        let sync = SynchronizerBuilder::new()
            .clock(clock)
            .readiness_timeout(Duration::from_millis(50))
            .build();

        let started = Instant::now();
        let err = sync
            .run_laser_and_read(&mut adapter, &mut laser, &request(), &CancelToken::new())
            .unwrap_err();

        assert!(matches!(err, SyncError::ReadinessTimeout(_)));
        assert_eq!(err.kind(), ErrorKind::Timing);
        // 返回之前测量线程已结束
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert!(adapter.ready_at.is_some());
        assert_eq!(adapter.output_off_calls(), 1);
        // 激光从未打开，只有清理时的一次关闭
        let log = log.lock();
        assert_eq!(log.len(), 1);
        assert!(!log[0].enable);
        assert_eq!(sync.state(), SyncState::Failed);
    }

    #[test]
    fn test_unbounded_readiness_timeout() {
        let clock = Arc::new(SimulatedClock::new());
        let mut adapter = StagedAdapter::new(clock.clone());
        adapter.ready_after = Duration::from_secs(3600);
        let mut laser = MockLaser::new();
        let sync = SynchronizerBuilder::new()
            .clock(clock)
            .readiness_timeout(Duration::MAX)
            .build();

        let session = sync
            .run_laser_and_read(&mut adapter, &mut laser, &request(), &CancelToken::new())
            .unwrap();
        assert_eq!(session.protocol, SyncProtocol::TwoPhase);
        assert_eq!(session.fired.len(), 4);
    }

    #[test]
    fn test_arm_failure_is_returned_unchanged() {
        let clock = Arc::new(SimulatedClock::new());
        let mut adapter = StagedAdapter::new(clock.clone());
        adapter.fail_arm = true;
        let mut laser = MockLaser::new();
        let sync = synchronizer(clock);

        let err = sync
            .run_laser_and_read(&mut adapter, &mut laser, &request(), &CancelToken::new())
            .unwrap_err();

        match &err {
            SyncError::Measurement(AdapterError::Device(e)) => {
                assert_eq!(e.kind, DeviceErrorKind::Interlock)
            },
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.kind(), ErrorKind::Hardware);
        assert_eq!(adapter.output_off_calls(), 1);
    }

    #[test]
    fn test_cancel_before_readiness() {
        let clock = Arc::new(SimulatedClock::new());
        let mut adapter = StagedAdapter::new(clock.clone());
        let mut laser = MockLaser::new();
        let sync = synchronizer(clock);
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = sync
            .run_laser_and_read(&mut adapter, &mut laser, &request(), &cancel)
            .unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(adapter.output_off_calls(), 1);
    }

    #[test]
    fn test_validation_errors_touch_no_device() {
        let clock = Arc::new(SimulatedClock::new());
        let mut laser = MockLaser::new();

        // 时间表第一个区间就超出时长
        let mut adapter = StagedAdapter::new(clock.clone());
        let short = SyncRequest::new(PatternSpec::new("1", 0.5, 0.5).with_start_delay(1.0), 1.2, 0.05);
        let err = synchronizer(clock.clone())
            .run_laser_and_read(&mut adapter, &mut laser, &short, &CancelToken::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timing);
        assert_eq!(adapter.output_off_calls(), 0);

        // 强制两阶段，但适配器不支持
        let mut adapter = StagedAdapter::new(clock.clone());
        adapter.two_phase = false;
        let sync = SynchronizerBuilder::new()
            .clock(clock.clone())
            .protocol(SyncProtocol::TwoPhase)
            .build();
        let err = sync
            .run_laser_and_read(&mut adapter, &mut laser, &request(), &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, SyncError::Unsupported(Backend::Tsp2450)));
        assert_eq!(adapter.output_off_calls(), 0);

        // 非法采样间隔：零、超过测量时长、无法表示为 Duration
        for interval in [0.0, 1.5, 1e25] {
            let mut adapter = StagedAdapter::new(clock.clone());
            let bad = SyncRequest::new(PatternSpec::new("1", 0.1, 0.1), 1.0, interval);
            let err = synchronizer(clock.clone())
                .run_laser_and_read(&mut adapter, &mut laser, &bad, &CancelToken::new())
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Parameter, "{interval}");
            assert_eq!(adapter.output_off_calls(), 0);
        }
        assert!(laser.log().lock().is_empty());
    }

    #[test]
    fn test_registry_gates_acquisition() {
        let clock = Arc::new(SimulatedClock::new());
        let disabled = || Capability::Unsupported("trigger model disabled".to_string());

        // 两种采集方式都关闭：拒绝，不触碰设备
        let registry = RegistryBuilder::from_standard()
            .acquisition(Backend::Tsp2450, Acquisition::TwoPhase, disabled())
            .acquisition(Backend::Tsp2450, Acquisition::FreeRunning, disabled())
            .build();
        let mut adapter = StagedAdapter::new(clock.clone());
        let mut laser = MockLaser::new();
        let err = SynchronizerBuilder::new()
            .clock(clock.clone())
            .registry(registry)
            .build()
            .run_laser_and_read(&mut adapter, &mut laser, &request(), &CancelToken::new())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Capability);
        assert!(err.to_string().contains("trigger model disabled"));
        assert!(adapter.ready_at.is_none());
        assert_eq!(adapter.output_off_calls(), 0);
        assert!(laser.log().lock().is_empty());

        // 只关闭两阶段：Auto 退回 Protocol B
        let registry = RegistryBuilder::from_standard()
            .acquisition(Backend::Tsp2450, Acquisition::TwoPhase, disabled())
            .build();
        let mut adapter = StagedAdapter::new(clock.clone());
        let session = SynchronizerBuilder::new()
            .clock(clock)
            .registry(registry)
            .init_time(0.0)
            .build()
            .run_laser_and_read(&mut adapter, &mut laser, &request(), &CancelToken::new())
            .unwrap();
        assert_eq!(session.protocol, SyncProtocol::Fallback);
        assert!(session.alignment.is_some());
        assert_eq!(adapter.output_off_calls(), 1);
    }

    #[test]
    fn test_second_session_is_rejected_while_busy() {
        let clock = Arc::new(SimulatedClock::new());
        let sync = synchronizer(clock.clone());

        std::thread::scope(|s| {
            let first = s.spawn(|| {
                let mut adapter = StagedAdapter::new(clock.clone());
                adapter.block_arm = Some(Duration::from_millis(200));
                let mut laser = MockLaser::new();
                sync.run_laser_and_read(&mut adapter, &mut laser, &request(), &CancelToken::new())
            });

            while !sync.is_busy() {
                std::thread::sleep(Duration::from_millis(1));
            }
            let mut adapter = StagedAdapter::new(clock.clone());
            let mut laser = MockLaser::new();
            let err = sync
                .run_laser_and_read(&mut adapter, &mut laser, &request(), &CancelToken::new())
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Busy);
            assert_eq!(adapter.output_off_calls(), 0);

            assert!(first.join().unwrap().is_ok());
        });
        assert!(!sync.is_busy());
    }

    #[test]
    fn test_init_time_is_clamped() {
        let sync = SynchronizerBuilder::new().init_time(12.0).build();
        assert_eq!(sync.init_time(), Duration::from_secs(5));
        let sync = SynchronizerBuilder::new().init_time(-1.0).build();
        assert_eq!(sync.init_time(), Duration::ZERO);
        let sync = SynchronizerBuilder::new().init_time(f64::NAN).build();
        assert_eq!(sync.init_time(), Duration::ZERO);
    }
}
