//! 仪器适配器 trait
//!
//! 每个后端实现一个 [`InstrumentAdapter`]。操作方法的默认实现返回
//! [`AdapterError::NotImplemented`]，即"适配器缺少该方法"；是否允许调用由
//! 能力注册表决定，两者相互独立。

use crate::timing::{CancelToken, Clock};
use crate::{AdapterError, Backend};
use memtest_protocol::{HardwareLimits, Operation, ParamBag, TestResult};
use std::time::{Duration, Instant};

/// 连接选项
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectOptions {
    /// 单次总线往返超时
    pub timeout: Duration,
    /// 连接后立即关闭输出（复位到安全状态）
    pub reset_on_connect: bool,
}

impl ConnectOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_reset(mut self, reset_on_connect: bool) -> Self {
        self.reset_on_connect = reset_on_connect;
        self
    }
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            reset_on_connect: true,
        }
    }
}

/// 仪器适配器
///
/// 所有方法都是同步阻塞调用。一个适配器同一时刻只服务一个会话
/// （由路由层或同步器的单飞标志保证）。
pub trait InstrumentAdapter: Send {
    /// 人类可读的系统名
    fn system_name(&self) -> &str;

    /// 后端
    fn backend(&self) -> Backend;

    /// 硬件限制（构造时确定，之后不变）
    fn hardware_limits(&self) -> HardwareLimits;

    /// 连接到设备
    fn connect(&mut self, address: &str, options: &ConnectOptions) -> Result<bool, AdapterError>;

    /// 断开连接
    fn disconnect(&mut self) -> Result<(), AdapterError>;

    /// 是否已连接
    fn is_connected(&self) -> bool;

    /// 设备标识
    fn idn(&mut self) -> Result<String, AdapterError>;

    /// 关闭输出（安全状态）
    fn output_off(&mut self) -> Result<(), AdapterError>;

    fn pulse_read_repeat(&mut self, _params: &ParamBag) -> Result<TestResult, AdapterError> {
        Err(AdapterError::NotImplemented(Operation::PulseReadRepeat))
    }

    fn multi_pulse_then_read(&mut self, _params: &ParamBag) -> Result<TestResult, AdapterError> {
        Err(AdapterError::NotImplemented(Operation::MultiPulseThenRead))
    }

    fn potentiation_depression_cycle(
        &mut self,
        _params: &ParamBag,
    ) -> Result<TestResult, AdapterError> {
        Err(AdapterError::NotImplemented(
            Operation::PotentiationDepressionCycle,
        ))
    }

    fn width_sweep_with_reads(&mut self, _params: &ParamBag) -> Result<TestResult, AdapterError> {
        Err(AdapterError::NotImplemented(Operation::WidthSweepWithReads))
    }

    fn voltage_amplitude_sweep(&mut self, _params: &ParamBag) -> Result<TestResult, AdapterError> {
        Err(AdapterError::NotImplemented(Operation::VoltageAmplitudeSweep))
    }

    fn endurance_test(&mut self, _params: &ParamBag) -> Result<TestResult, AdapterError> {
        Err(AdapterError::NotImplemented(Operation::EnduranceTest))
    }

    fn retention_test(&mut self, _params: &ParamBag) -> Result<TestResult, AdapterError> {
        Err(AdapterError::NotImplemented(Operation::RetentionTest))
    }

    fn pulse_train(&mut self, _params: &ParamBag) -> Result<TestResult, AdapterError> {
        Err(AdapterError::NotImplemented(Operation::PulseTrain))
    }

    /// 单次完整的定时读取（路由层入口，结束后关闭输出）
    fn timed_read(&mut self, _params: &ParamBag) -> Result<TestResult, AdapterError> {
        Err(AdapterError::NotImplemented(Operation::TimedRead))
    }

    /// 按操作名分派
    fn execute(
        &mut self,
        operation: Operation,
        params: &ParamBag,
    ) -> Result<TestResult, AdapterError> {
        match operation {
            Operation::PulseReadRepeat => self.pulse_read_repeat(params),
            Operation::MultiPulseThenRead => self.multi_pulse_then_read(params),
            Operation::PotentiationDepressionCycle => self.potentiation_depression_cycle(params),
            Operation::WidthSweepWithReads => self.width_sweep_with_reads(params),
            Operation::VoltageAmplitudeSweep => self.voltage_amplitude_sweep(params),
            Operation::EnduranceTest => self.endurance_test(params),
            Operation::RetentionTest => self.retention_test(params),
            Operation::PulseTrain => self.pulse_train(params),
            Operation::TimedRead => self.timed_read(params),
        }
    }

    /// 是否支持两阶段启动（先就绪、后开始采样）
    fn supports_two_phase(&self) -> bool {
        false
    }

    /// 两阶段第一步：施加偏置，返回即表示已就绪
    fn arm_timed_read(&mut self, _params: &ParamBag) -> Result<(), AdapterError> {
        Err(AdapterError::NotImplemented(Operation::TimedRead))
    }

    /// 两阶段第二步：以 `t0` 为零点采样，直到 `duration` 或取消
    ///
    /// 不关闭输出；安全状态由调用方负责。
    fn collect_timed_read(
        &mut self,
        _params: &ParamBag,
        _t0: Instant,
        _clock: &dyn Clock,
        _cancel: &CancelToken,
    ) -> Result<TestResult, AdapterError> {
        Err(AdapterError::NotImplemented(Operation::TimedRead))
    }

    /// 单阶段测量：开始时刻对调用方不可观测，时间戳以设备自身起点为零
    ///
    /// 不关闭输出。
    fn free_running_read(
        &mut self,
        params: &ParamBag,
        clock: &dyn Clock,
        cancel: &CancelToken,
    ) -> Result<TestResult, AdapterError> {
        if !self.supports_two_phase() {
            return Err(AdapterError::NotImplemented(Operation::TimedRead));
        }
        self.arm_timed_read(params)?;
        let start = clock.now();
        self.collect_timed_read(params, start, clock, cancel)
    }
}
