//! 后端 A：TSP 脚本化 SMU 适配器
//!
//! 支持全部操作，并支持两阶段定时读取（偏置就绪后再开始采样），
//! 因此同步器可对其使用 Protocol A。

use crate::adapter::{ConnectOptions, InstrumentAdapter};
use crate::device::SourceMeter;
use crate::ops::{self, OpParams};
use crate::sequence::{AdapterCore, Sequencer};
use crate::timing::{CancelToken, Clock, MonotonicClock};
use crate::{AdapterError, Backend};
use memtest_protocol::{HardwareLimits, Operation, ParamBag, TestResult};
use std::sync::Arc;
use std::time::Instant;

/// Keithley 2450 类 SMU 适配器
pub struct Tsp2450Adapter<D> {
    core: AdapterCore<D>,
}

impl<D: SourceMeter> Tsp2450Adapter<D> {
    /// 使用真实单调时钟
    pub fn new(device: D) -> Self {
        Self::with_clock(device, Arc::new(MonotonicClock::new()))
    }

    /// 注入时钟（测试使用 `SimulatedClock`）
    pub fn with_clock(device: D, clock: Arc<dyn Clock>) -> Self {
        Self {
            core: AdapterCore::new(device, Backend::Tsp2450, clock),
        }
    }

    /// 覆盖默认硬件限制
    pub fn with_limits(mut self, limits: HardwareLimits) -> Self {
        self.core.limits = limits;
        self
    }

    /// 底层设备
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

impl<D: SourceMeter> InstrumentAdapter for Tsp2450Adapter<D> {
    fn system_name(&self) -> &str {
        Backend::Tsp2450.system_name()
    }

    fn backend(&self) -> Backend {
        Backend::Tsp2450
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

    fn retention_test(&mut self, params: &ParamBag) -> Result<TestResult, AdapterError> {
        self.run(Operation::RetentionTest, params, ops::retention_test)
    }

    fn pulse_train(&mut self, params: &ParamBag) -> Result<TestResult, AdapterError> {
        self.run(Operation::PulseTrain, params, ops::pulse_train)
    }

    fn timed_read(&mut self, params: &ParamBag) -> Result<TestResult, AdapterError> {
        let cancel = CancelToken::new();
        self.run(Operation::TimedRead, params, |seq, p| {
            ops::arm_timed_read(seq.device(), p)?;
            seq.restart_clock();
            ops::collect_timed_read(seq, p, &cancel)
        })
    }

    fn supports_two_phase(&self) -> bool {
        true
    }

    fn arm_timed_read(&mut self, params: &ParamBag) -> Result<(), AdapterError> {
        self.core.ensure_connected()?;
        let p = OpParams::new(params, self.core.backend, self.core.limits);
        ops::arm_timed_read(&mut self.core.device, &p)
    }

    fn collect_timed_read(
        &mut self,
        params: &ParamBag,
        t0: Instant,
        clock: &dyn Clock,
        cancel: &CancelToken,
    ) -> Result<TestResult, AdapterError> {
        self.core.ensure_connected()?;
        let p = OpParams::new(params, self.core.backend, self.core.limits);
        let mut seq =
            Sequencer::with_origin(&mut self.core.device, clock, t0, self.core.limits.max_points);
        ops::collect_timed_read(&mut seq, &p, cancel)?;
        Ok(seq.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockSourceMeter;
    use crate::timing::SimulatedClock;
    use memtest_protocol::{Series, TimeUnit};
    use std::time::Duration;

    fn connected(device: MockSourceMeter) -> Tsp2450Adapter<MockSourceMeter> {
        let mut adapter = Tsp2450Adapter::with_clock(device, Arc::new(SimulatedClock::new()));
        assert!(adapter
            .connect("USB0::0x05E6::0x2450::04096331::INSTR", &ConnectOptions::default())
            .unwrap());
        adapter
    }

    #[test]
    fn test_unrepresentable_times_are_parameter_errors() {
        let mut adapter = connected(MockSourceMeter::new());
        let long_delay = ParamBag::new()
            .with("pulse_voltage", 1.0)
            .with_time("pulse_width", 1e-3, TimeUnit::Seconds)
            .with_time("delay_between", 1e25, TimeUnit::Seconds)
            .with("num_cycles", 2i64);
        let err = adapter.pulse_read_repeat(&long_delay).unwrap_err();
        assert!(matches!(err, AdapterError::Parameter(_)));

        let long_interval = ParamBag::new()
            .with_time("duration", 1.0, TimeUnit::Seconds)
            .with_time("sample_interval", 1e25, TimeUnit::Seconds);
        let err = adapter.timed_read(&long_interval).unwrap_err();
        assert!(matches!(err, AdapterError::Parameter(_)));
    }

    #[test]
    fn test_operations_require_connection() {
        let mut adapter = Tsp2450Adapter::new(MockSourceMeter::new());
        let err = adapter.endurance_test(&ParamBag::new()).unwrap_err();
        assert!(matches!(err, AdapterError::NotConnected));
    }

    #[test]
    fn test_connect_failure_is_connection_error() {
        let mut adapter = Tsp2450Adapter::new(MockSourceMeter::new().fail_on_open());
        let err = adapter
            .connect("GPIB0::24::INSTR", &ConnectOptions::default())
            .unwrap_err();
        assert!(matches!(err, AdapterError::Connection { .. }));
        assert!(!adapter.is_connected());
    }

    #[test]
    fn test_pulse_read_repeat_shape_and_safe_state() {
        let device = MockSourceMeter::new();
        let counters = device.counters();
        let mut adapter = connected(device);
        let offs_after_connect = counters.output_off();

        let params = ParamBag::new()
            .with("pulse_voltage", 1.5)
            .with_time("pulse_width", 1e-3, TimeUnit::Seconds)
            .with("num_cycles", 5i64);
        let result = adapter.pulse_read_repeat(&params).unwrap();

        assert_eq!(result.len(), 6);
        assert!(result.check_lengths().is_ok());
        assert_eq!(counters.pulses(), 5);
        assert_eq!(counters.output_off(), offs_after_connect + 1);
        let phases = result.extra("phase").and_then(Series::as_texts).unwrap();
        assert_eq!(phases[0], "initial");
        assert!(phases[1..].iter().all(|p| p == "read"));
        // SET 脉冲逐步降低电阻
        assert!(result.resistances[5] < result.resistances[0]);
    }

    #[test]
    fn test_failed_operation_still_switches_output_off() {
        let device = MockSourceMeter::new().fail_read_after(2);
        let counters = device.counters();
        let mut adapter = connected(device);
        let before = counters.output_off();

        let params = ParamBag::new()
            .with("set_voltage", 1.2)
            .with("reset_voltage", -1.2)
            .with_time("pulse_width", 1e-3, TimeUnit::Seconds)
            .with("num_cycles", 10i64);
        let err = adapter.endurance_test(&params).unwrap_err();
        assert!(matches!(err, AdapterError::Device(_)));
        assert_eq!(counters.output_off(), before + 1);
    }

    #[test]
    fn test_pulse_train_follows_schedule() {
        let mut adapter = connected(MockSourceMeter::new());
        let params = ParamBag::new()
            .with("pattern", "1011")
            .with("pulse_voltage", 1.0)
            .with_time("on_duration", 0.1, TimeUnit::Seconds)
            .with_time("off_duration", 0.1, TimeUnit::Seconds);
        let result = adapter.pulse_train(&params).unwrap();
        assert_eq!(result.len(), 3);
        let indices = result.extra("pulse_index").and_then(Series::as_floats).unwrap();
        assert_eq!(indices, &[0.0, 1.0, 2.0]);
        // "1011" 的有效时隙从 0.0/0.4/0.6 s 开始
        assert!(result.timestamps[1] >= 0.4 - 1e-9);
        assert!(result.timestamps[2] >= 0.6 - 1e-9);
    }

    #[test]
    fn test_two_phase_timed_read_shares_t0() {
        let clock = Arc::new(SimulatedClock::new());
        let device = MockSourceMeter::new();
        let counters = device.counters();
        let mut adapter = Tsp2450Adapter::with_clock(device, clock.clone());
        adapter
            .connect("GPIB0::24::INSTR", &ConnectOptions::default().with_reset(false))
            .unwrap();

        let params = ParamBag::new()
            .with_time("duration", 1.0, TimeUnit::Seconds)
            .with_time("sample_interval", 0.1, TimeUnit::Seconds);
        adapter.arm_timed_read(&params).unwrap();
        let t0 = clock.now() + Duration::from_millis(50);
        let result = adapter
            .collect_timed_read(&params, t0, clock.as_ref(), &CancelToken::new())
            .unwrap();

        assert_eq!(result.len(), 10);
        for (k, t) in result.timestamps.iter().enumerate() {
            assert!((t - 0.1 * k as f64).abs() < 1e-9, "sample {k} at {t}");
        }
        // 两阶段入口不负责安全状态
        assert_eq!(counters.output_off(), 0);
    }

    #[test]
    fn test_collect_timed_read_honours_cancel() {
        let mut adapter = connected(MockSourceMeter::new());
        let params = ParamBag::new().with_time("duration", 10.0, TimeUnit::Seconds);
        adapter.arm_timed_read(&params).unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let clock = SimulatedClock::new();
        let err = adapter
            .collect_timed_read(&params, clock.now(), &clock, &cancel)
            .unwrap_err();
        assert!(matches!(err, AdapterError::Aborted));
    }
}
