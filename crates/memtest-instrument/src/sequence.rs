//! 适配器公共部分：连接状态与脉冲/读取序列器

use crate::adapter::ConnectOptions;
use crate::device::SourceMeter;
use crate::timing::{CancelToken, Clock, sleep_until};
use crate::{AdapterError, Backend};
use memtest_protocol::{
    HardwareLimits, Operation, ProtocolError, TestResult, duration_from_seconds,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// 两个后端共用的连接状态
pub(crate) struct AdapterCore<D> {
    pub(crate) device: D,
    pub(crate) backend: Backend,
    pub(crate) limits: HardwareLimits,
    pub(crate) clock: Arc<dyn Clock>,
    address: Option<String>,
}

impl<D: SourceMeter> AdapterCore<D> {
    pub(crate) fn new(device: D, backend: Backend, clock: Arc<dyn Clock>) -> Self {
        Self {
            device,
            backend,
            limits: backend.default_limits(),
            clock,
            address: None,
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.address.is_some()
    }

    pub(crate) fn connect(
        &mut self,
        address: &str,
        options: &ConnectOptions,
    ) -> Result<bool, AdapterError> {
        if self.address.as_deref() == Some(address) {
            debug!("Already connected to {}", address);
            return Ok(true);
        }
        if self.is_connected() {
            self.disconnect()?;
        }

        let connection_error = |e: crate::DeviceError| AdapterError::Connection {
            address: address.to_string(),
            reason: e.to_string(),
        };
        self.device
            .open(address, options.timeout)
            .map_err(connection_error)?;
        let idn = self.device.idn().map_err(connection_error)?;
        if options.reset_on_connect {
            self.device.output_off().map_err(connection_error)?;
        }

        info!(
            "Connected to {} at {} ({})",
            self.backend.system_name(),
            address,
            idn.trim()
        );
        self.address = Some(address.to_string());
        Ok(true)
    }

    pub(crate) fn disconnect(&mut self) -> Result<(), AdapterError> {
        if let Some(address) = self.address.take() {
            if let Err(e) = self.device.output_off() {
                warn!("Failed to switch output off before disconnect: {}", e);
            }
            self.device.close()?;
            info!("Disconnected from {}", address);
        }
        Ok(())
    }

    pub(crate) fn ensure_connected(&self) -> Result<(), AdapterError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(AdapterError::NotConnected)
        }
    }

    pub(crate) fn idn(&mut self) -> Result<String, AdapterError> {
        self.ensure_connected()?;
        Ok(self.device.idn()?)
    }

    pub(crate) fn output_off(&mut self) -> Result<(), AdapterError> {
        self.ensure_connected()?;
        Ok(self.device.output_off()?)
    }

    /// 运行一个完整的操作序列，结束后（无论成败）关闭输出
    ///
    /// 序列本身的错误优先于关闭输出的错误。
    pub(crate) fn run<F>(&mut self, operation: Operation, body: F) -> Result<TestResult, AdapterError>
    where
        F: FnOnce(&mut Sequencer<'_, D>) -> Result<(), AdapterError>,
    {
        self.ensure_connected()?;
        debug!("{}: running {}", self.backend, operation);

        let mut seq = Sequencer::new(&mut self.device, &*self.clock, self.limits.max_points);
        let outcome = body(&mut seq);
        let result = seq.finish();
        let off = self.device.output_off();

        match outcome {
            Ok(()) => {
                off?;
                debug!("{}: {} finished with {} points", self.backend, operation, result.len());
                Ok(result)
            },
            Err(e) => {
                if let Err(off_err) = off {
                    warn!("Output off after failed {} also failed: {}", operation, off_err);
                }
                Err(e)
            },
        }
    }
}

/// 序列器：在一个共同零点上记录脉冲与读取
pub(crate) struct Sequencer<'a, D: ?Sized> {
    device: &'a mut D,
    clock: &'a dyn Clock,
    origin: Instant,
    max_points: usize,
    result: TestResult,
}

impl<'a, D: SourceMeter + ?Sized> Sequencer<'a, D> {
    pub(crate) fn new(device: &'a mut D, clock: &'a dyn Clock, max_points: usize) -> Self {
        let origin = clock.now();
        Self::with_origin(device, clock, origin, max_points)
    }

    /// 以外部给定的零点记录时间戳
    pub(crate) fn with_origin(
        device: &'a mut D,
        clock: &'a dyn Clock,
        origin: Instant,
        max_points: usize,
    ) -> Self {
        Self {
            device,
            clock,
            origin,
            max_points,
            result: TestResult::new(),
        }
    }

    pub(crate) fn device(&mut self) -> &mut D {
        self.device
    }

    /// 把零点重置为当前时刻
    pub(crate) fn restart_clock(&mut self) {
        self.origin = self.clock.now();
    }

    /// 自零点起经过的时间（s）
    pub(crate) fn elapsed_s(&self) -> f64 {
        self.clock.elapsed_since(self.origin).as_secs_f64()
    }

    /// 预检采样点数
    pub(crate) fn reserve(&self, points: usize) -> Result<(), AdapterError> {
        if self.result.len() + points > self.max_points {
            Err(AdapterError::PointLimit(self.max_points))
        } else {
            Ok(())
        }
    }

    /// 输出单个脉冲（基线 0 V）
    pub(crate) fn pulse(&mut self, amplitude: f64, width_s: f64, clim: f64) -> Result<(), AdapterError> {
        self.device.pulse(amplitude, width_s, 0.0, clim)?;
        Ok(())
    }

    /// 施加读取偏置并读取一次
    pub(crate) fn read(&mut self, read_voltage: f64, clim: f64) -> Result<(), AdapterError> {
        self.reserve(1)?;
        self.device.apply_bias(read_voltage, clim)?;
        self.sample()
    }

    /// 在当前偏置下读取一次
    pub(crate) fn sample(&mut self) -> Result<(), AdapterError> {
        self.reserve(1)?;
        let reading = self.device.read_once()?;
        let t = self.elapsed_s();
        self.result.push_sample(t, reading.voltage, reading.current);
        Ok(())
    }

    pub(crate) fn tag(&mut self, key: &str, value: &str) {
        self.result.push_text(key, value);
    }

    pub(crate) fn tag_value(&mut self, key: &str, value: f64) {
        self.result.push_float(key, value);
    }

    /// 睡眠指定秒数
    pub(crate) fn wait(&self, seconds: f64) -> Result<(), AdapterError> {
        if seconds > 0.0 {
            self.clock.sleep(duration_from_seconds("delay", seconds)?);
        }
        Ok(())
    }

    /// 睡眠到零点后 `offset_s` 秒（已过则立即返回）
    pub(crate) fn wait_until(&self, offset_s: f64) -> Result<(), AdapterError> {
        let remaining = offset_s - self.elapsed_s();
        self.wait(remaining)
    }

    /// 可取消地睡眠到零点后 `offset_s` 秒；`Ok(false)` 表示被取消
    pub(crate) fn wait_until_cancellable(
        &self,
        offset_s: f64,
        slice: Duration,
        cancel: &CancelToken,
    ) -> Result<bool, AdapterError> {
        let offset = duration_from_seconds("offset", offset_s.max(0.0))?;
        let deadline = self.origin.checked_add(offset).ok_or_else(|| {
            ProtocolError::InvalidParameter {
                name: "offset".to_string(),
                reason: format!("{offset_s} s is past the end of the clock"),
            }
        })?;
        Ok(sleep_until(self.clock, deadline, slice, cancel))
    }

    pub(crate) fn finish(self) -> TestResult {
        self.result
    }
}
