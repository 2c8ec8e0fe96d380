//! Mock 设备（无硬件）
//!
//! [`MockSourceMeter`] 带一个简单的双极性阻变模型和调用计数器，
//! [`MockLaser`] 记录每次开关。两者共享一个光照标志：激光打开时
//! 读到的电阻按 `photo_factor` 降低，用于验证同步对齐。

use crate::device::{DeviceError, DeviceErrorKind, LaserDriver, Reading, SourceMeter};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// 调用计数
#[derive(Debug, Default)]
pub struct MockCounters {
    open: AtomicUsize,
    apply_bias: AtomicUsize,
    reads: AtomicUsize,
    pulses: AtomicUsize,
    output_off: AtomicUsize,
}

impl MockCounters {
    pub fn opens(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    pub fn apply_bias(&self) -> usize {
        self.apply_bias.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn pulses(&self) -> usize {
        self.pulses.load(Ordering::SeqCst)
    }

    pub fn output_off(&self) -> usize {
        self.output_off.load(Ordering::SeqCst)
    }

    /// 全部调用次数之和
    pub fn total(&self) -> usize {
        self.opens() + self.apply_bias() + self.reads() + self.pulses() + self.output_off()
    }
}

/// Mock 源表
pub struct MockSourceMeter {
    counters: Arc<MockCounters>,
    illumination: Arc<AtomicBool>,
    resistance: f64,
    r_on: f64,
    r_off: f64,
    set_threshold: f64,
    photo_factor: f64,
    bias: Option<f64>,
    noise: Option<(f64, StdRng)>,
    read_latency: Duration,
    bias_latency: Duration,
    fail_open: bool,
    fail_bias: bool,
    fail_read_after: Option<usize>,
}

impl MockSourceMeter {
    pub fn new() -> Self {
        Self {
            counters: Arc::new(MockCounters::default()),
            illumination: Arc::new(AtomicBool::new(false)),
            resistance: 1e4,
            r_on: 1e3,
            r_off: 1e5,
            set_threshold: 0.8,
            photo_factor: 0.5,
            bias: None,
            noise: None,
            read_latency: Duration::ZERO,
            bias_latency: Duration::ZERO,
            fail_open: false,
            fail_bias: false,
            fail_read_after: None,
        }
    }

    /// 初始电阻（Ω）
    pub fn with_resistance(mut self, ohms: f64) -> Self {
        self.resistance = ohms.clamp(self.r_on, self.r_off);
        self
    }

    /// 与激光共享光照标志
    pub fn with_illumination(mut self, flag: Arc<AtomicBool>) -> Self {
        self.illumination = flag;
        self
    }

    /// 光照时电阻的缩放系数
    pub fn with_photo_factor(mut self, factor: f64) -> Self {
        self.photo_factor = factor;
        self
    }

    /// 相对噪声（固定种子，可复现）
    pub fn with_noise(mut self, relative: f64, seed: u64) -> Self {
        self.noise = Some((relative, StdRng::seed_from_u64(seed)));
        self
    }

    /// 每次读取的真实延迟
    pub fn with_read_latency(mut self, latency: Duration) -> Self {
        self.read_latency = latency;
        self
    }

    /// 施加偏置的真实延迟
    pub fn with_bias_latency(mut self, latency: Duration) -> Self {
        self.bias_latency = latency;
        self
    }

    pub fn fail_on_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub fn fail_on_bias(mut self) -> Self {
        self.fail_bias = true;
        self
    }

    /// 前 `n` 次读取成功，之后全部失败
    pub fn fail_read_after(mut self, n: usize) -> Self {
        self.fail_read_after = Some(n);
        self
    }

    pub fn counters(&self) -> Arc<MockCounters> {
        self.counters.clone()
    }

    /// 当前（无光照）电阻
    pub fn resistance(&self) -> f64 {
        self.resistance
    }

    fn effective_resistance(&self) -> f64 {
        if self.illumination.load(Ordering::SeqCst) {
            self.resistance * self.photo_factor
        } else {
            self.resistance
        }
    }
}

impl Default for MockSourceMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceMeter for MockSourceMeter {
    fn open(&mut self, address: &str, _timeout: Duration) -> Result<(), DeviceError> {
        self.counters.open.fetch_add(1, Ordering::SeqCst);
        if self.fail_open {
            return Err(DeviceError::new(
                DeviceErrorKind::NotFound,
                format!("no instrument at {address}"),
            ));
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        self.bias = None;
        Ok(())
    }

    fn idn(&mut self) -> Result<String, DeviceError> {
        Ok("MOCK,SourceMeter,0000001,1.0.0".to_string())
    }

    fn apply_bias(&mut self, voltage: f64, _current_limit: f64) -> Result<(), DeviceError> {
        self.counters.apply_bias.fetch_add(1, Ordering::SeqCst);
        if !self.bias_latency.is_zero() {
            std::thread::sleep(self.bias_latency);
        }
        if self.fail_bias {
            return Err(DeviceError::new(DeviceErrorKind::Interlock, "interlock open"));
        }
        self.bias = Some(voltage);
        Ok(())
    }

    fn read_once(&mut self) -> Result<Reading, DeviceError> {
        let n = self.counters.reads.fetch_add(1, Ordering::SeqCst);
        if !self.read_latency.is_zero() {
            std::thread::sleep(self.read_latency);
        }
        if let Some(limit) = self.fail_read_after
            && n >= limit
        {
            return Err(DeviceError::new(DeviceErrorKind::Timeout, "read timed out"));
        }
        let voltage = self.bias.unwrap_or(0.0);
        let mut current = voltage / self.effective_resistance();
        if let Some((relative, rng)) = self.noise.as_mut() {
            current *= 1.0 + rng.gen_range(-*relative..=*relative);
        }
        Ok(Reading { voltage, current })
    }

    fn pulse(
        &mut self,
        amplitude: f64,
        _width_s: f64,
        base_voltage: f64,
        _current_limit: f64,
    ) -> Result<(), DeviceError> {
        self.counters.pulses.fetch_add(1, Ordering::SeqCst);
        if amplitude >= self.set_threshold {
            self.resistance = (self.resistance * 0.8).max(self.r_on);
        } else if amplitude <= -self.set_threshold {
            self.resistance = (self.resistance * 1.25).min(self.r_off);
        }
        self.bias = Some(base_voltage);
        Ok(())
    }

    fn output_off(&mut self) -> Result<(), DeviceError> {
        self.counters.output_off.fetch_add(1, Ordering::SeqCst);
        self.bias = None;
        Ok(())
    }
}

/// 激光开关记录
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FireEvent {
    pub enable: bool,
    pub at: Instant,
}

/// Mock 激光
pub struct MockLaser {
    emitting: Arc<AtomicBool>,
    log: Arc<Mutex<Vec<FireEvent>>>,
    fire_count: Arc<AtomicUsize>,
    fail_on_fire: Option<usize>,
}

impl MockLaser {
    pub fn new() -> Self {
        Self {
            emitting: Arc::new(AtomicBool::new(false)),
            log: Arc::new(Mutex::new(Vec::new())),
            fire_count: Arc::new(AtomicUsize::new(0)),
            fail_on_fire: None,
        }
    }

    /// 第 `n` 次（从 1 计）打开时失败
    pub fn fail_on_fire(mut self, n: usize) -> Self {
        self.fail_on_fire = Some(n);
        self
    }

    /// 光照标志，交给 [`MockSourceMeter::with_illumination`]
    pub fn illumination(&self) -> Arc<AtomicBool> {
        self.emitting.clone()
    }

    /// 开关记录
    pub fn log(&self) -> Arc<Mutex<Vec<FireEvent>>> {
        self.log.clone()
    }

    pub fn is_emitting(&self) -> bool {
        self.emitting.load(Ordering::SeqCst)
    }
}

impl Default for MockLaser {
    fn default() -> Self {
        Self::new()
    }
}

impl LaserDriver for MockLaser {
    fn fire(&mut self, enable: bool) -> Result<(), DeviceError> {
        if enable {
            let n = self.fire_count.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_on_fire == Some(n) {
                return Err(DeviceError::new(DeviceErrorKind::Io, "laser driver not responding"));
            }
        }
        self.emitting.store(enable, Ordering::SeqCst);
        self.log.lock().push(FireEvent {
            enable,
            at: Instant::now(),
        });
        Ok(())
    }
}
