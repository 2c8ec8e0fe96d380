//! 后端 B：KXCI 脚本化 PMU/SMU 主机适配器
//!
//! 旧版 KXCI 用户库函数以微秒接收 `pulse_width`/`on_duration`/`off_duration`。
//! 没有两阶段启动：测量脚本上传后由仪器自行开始，开始时刻不可观测，
//! 同步器对其只能使用 Protocol B。
//!
//! 脉宽扫描已实现但在注册表中仍标记为不支持（分阶段上线）；
//! 保持测试与连续定时读取依赖 SMU 长时间保持，本适配器不实现。

use crate::adapter::{ConnectOptions, InstrumentAdapter};
use crate::device::SourceMeter;
use crate::ops::{self, OpParams};
use crate::sequence::{AdapterCore, Sequencer};
use crate::timing::{CancelToken, Clock, MonotonicClock};
use crate::{AdapterError, Backend};
use memtest_protocol::{HardwareLimits, Operation, ParamBag, TestResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// 脚本上传到仪器开始采样之间的默认延迟
pub const DEFAULT_SCRIPT_LATENCY: Duration = Duration::from_millis(20);

/// Keithley 4200A 类 KXCI 适配器
pub struct Kxci4200Adapter<D> {
    core: AdapterCore<D>,
    script_latency: Duration,
}

impl<D: SourceMeter> Kxci4200Adapter<D> {
    pub fn new(device: D) -> Self {
        Self::with_clock(device, Arc::new(MonotonicClock::new()))
    }

    pub fn with_clock(device: D, clock: Arc<dyn Clock>) -> Self {
        Self {
            core: AdapterCore::new(device, Backend::Kxci4200, clock),
            script_latency: DEFAULT_SCRIPT_LATENCY,
        }
    }

    pub fn with_limits(mut self, limits: HardwareLimits) -> Self {
        self.core.limits = limits;
        self
    }

    /// 设置脚本启动延迟
    pub fn with_script_latency(mut self, latency: Duration) -> Self {
        self.script_latency = latency;
        self
    }

    pub fn device(&self) -> &D {
        &self.core.device
    }

    fn run<F>(&mut self, operation: Operation, params: &ParamBag, body: F) -> Result<TestResult, AdapterError>
    where
        F: FnOnce(&mut Sequencer<'_, D>, &OpParams<'_>) -> Result<(), AdapterError>,
    {
        let p = OpParams::new(params, self.core.backend, self.core.limits);
        self.core.run(operation, |seq| body(seq, &p))
    }
}

impl<D: SourceMeter> InstrumentAdapter for Kxci4200Adapter<D> {
    fn system_name(&self) -> &str {
        Backend::Kxci4200.system_name()
    }

    fn backend(&self) -> Backend {
        Backend::Kxci4200
    }

    fn hardware_limits(&self) -> HardwareLimits {
        self.core.limits
    }

    fn connect(&mut self, address: &str, options: &ConnectOptions) -> Result<bool, AdapterError> {
        self.core.connect(address, options)
    }

    fn disconnect(&mut self) -> Result<(), AdapterError> {
        self.core.disconnect()
    }

    fn is_connected(&self) -> bool {
        self.core.is_connected()
    }

    fn idn(&mut self) -> Result<String, AdapterError> {
        self.core.idn()
    }

    fn output_off(&mut self) -> Result<(), AdapterError> {
        self.core.output_off()
    }

    fn pulse_read_repeat(&mut self, params: &ParamBag) -> Result<TestResult, AdapterError> {
        self.run(Operation::PulseReadRepeat, params, ops::pulse_read_repeat)
    }

    fn multi_pulse_then_read(&mut self, params: &ParamBag) -> Result<TestResult, AdapterError> {
        self.run(Operation::MultiPulseThenRead, params, ops::multi_pulse_then_read)
    }

    fn potentiation_depression_cycle(
        &mut self,
        params: &ParamBag,
    ) -> Result<TestResult, AdapterError> {
        self.run(
            Operation::PotentiationDepressionCycle,
            params,
            ops::potentiation_depression_cycle,
        )
    }

    fn width_sweep_with_reads(&mut self, params: &ParamBag) -> Result<TestResult, AdapterError> {
        self.run(Operation::WidthSweepWithReads, params, ops::width_sweep_with_reads)
    }

    fn voltage_amplitude_sweep(&mut self, params: &ParamBag) -> Result<TestResult, AdapterError> {
        self.run(Operation::VoltageAmplitudeSweep, params, ops::voltage_amplitude_sweep)
    }

    fn endurance_test(&mut self, params: &ParamBag) -> Result<TestResult, AdapterError> {
        self.run(Operation::EnduranceTest, params, ops::endurance_test)
    }

    fn pulse_train(&mut self, params: &ParamBag) -> Result<TestResult, AdapterError> {
        self.run(Operation::PulseTrain, params, ops::pulse_train)
    }

    fn free_running_read(
        &mut self,
        params: &ParamBag,
        clock: &dyn Clock,
        cancel: &CancelToken,
    ) -> Result<TestResult, AdapterError> {
        self.core.ensure_connected()?;
        let p = OpParams::new(params, self.core.backend, self.core.limits);
        ops::arm_timed_read(&mut self.core.device, &p)?;

        clock.sleep(self.script_latency);
        debug!(
            "KXCI script started after {:.1} ms",
            self.script_latency.as_secs_f64() * 1e3
        );
        let start = clock.now();
        let mut seq = Sequencer::with_origin(
            &mut self.core.device,
            clock,
            start,
            self.core.limits.max_points,
        );
        ops::collect_timed_read(&mut seq, &p, cancel)?;
        Ok(seq.finish())
    }
}
