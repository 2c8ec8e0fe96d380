//! 由设备原语组合而成的测试操作
//!
//! 时间参数按后端约定单位读取后统一换算为秒；不做隐式单位猜测。

use crate::device::SourceMeter;
use crate::sequence::Sequencer;
use crate::timing::CancelToken;
use crate::{AdapterError, Backend};
use memtest_protocol::{
    HardwareLimits, LimitCheck, ParamBag, PatternSpec, ProtocolError, duration_from_seconds,
    parse_time,
};
use tracing::{debug, warn};

const DEFAULT_READ_VOLTAGE: f64 = 0.2;
const DEFAULT_CLIM: f64 = 1e-3;

/// 带后端上下文的参数视图
pub(crate) struct OpParams<'p> {
    pub(crate) bag: &'p ParamBag,
    pub(crate) backend: Backend,
    pub(crate) limits: HardwareLimits,
}

impl<'p> OpParams<'p> {
    pub(crate) fn new(bag: &'p ParamBag, backend: Backend, limits: HardwareLimits) -> Self {
        Self {
            bag,
            backend,
            limits,
        }
    }

    /// 读取时间参数并换算为秒
    fn seconds(&self, name: &str) -> Result<f64, ProtocolError> {
        let unit = self.backend.canonical_unit(name);
        Ok(unit.to_seconds(self.bag.time_in(name, unit)?))
    }

    fn seconds_or(&self, name: &str, default_s: f64) -> Result<f64, ProtocolError> {
        if self.bag.contains(name) {
            self.seconds(name)
        } else {
            Ok(default_s)
        }
    }

    fn read_voltage(&self) -> Result<f64, ProtocolError> {
        self.bag.float_or("read_voltage", DEFAULT_READ_VOLTAGE)
    }

    fn clim(&self) -> Result<f64, ProtocolError> {
        self.bag.float_or("clim", DEFAULT_CLIM)
    }
}

fn invalid(name: &str, reason: impl Into<String>) -> ProtocolError {
    ProtocolError::InvalidParameter {
        name: name.to_string(),
        reason: reason.into(),
    }
}

fn record<D: SourceMeter + ?Sized>(
    seq: &mut Sequencer<'_, D>,
    read_voltage: f64,
    clim: f64,
    phase: &str,
    cycle: usize,
) -> Result<(), AdapterError> {
    seq.read(read_voltage, clim)?;
    seq.tag("phase", phase);
    seq.tag_value("cycle_number", cycle as f64);
    Ok(())
}

pub(crate) fn pulse_read_repeat<D: SourceMeter + ?Sized>(
    seq: &mut Sequencer<'_, D>,
    p: &OpParams<'_>,
) -> Result<(), AdapterError> {
    let pulse_voltage = p.bag.float("pulse_voltage")?;
    let width = p.seconds("pulse_width")?;
    let delay = p.seconds_or("delay_between", 10e-3)?;
    let cycles = p.bag.count_or("num_cycles", 10)?;
    let (read_voltage, clim) = (p.read_voltage()?, p.clim()?);
    seq.reserve(cycles + 1)?;

    record(seq, read_voltage, clim, "initial", 0)?;
    for cycle in 1..=cycles {
        seq.pulse(pulse_voltage, width, clim)?;
        seq.wait(delay)?;
        record(seq, read_voltage, clim, "read", cycle)?;
    }
    Ok(())
}

pub(crate) fn multi_pulse_then_read<D: SourceMeter + ?Sized>(
    seq: &mut Sequencer<'_, D>,
    p: &OpParams<'_>,
) -> Result<(), AdapterError> {
    let pulse_voltage = p.bag.float("pulse_voltage")?;
    let width = p.seconds("pulse_width")?;
    let num_pulses = p.bag.count_or("num_pulses", 10)?;
    let delay = p.seconds_or("delay_between_pulses", 1e-3)?;
    let num_reads = p.bag.count_or("num_reads", 1)?;
    let (read_voltage, clim) = (p.read_voltage()?, p.clim()?);
    if num_reads == 0 {
        return Err(invalid("num_reads", "must be at least 1").into());
    }
    seq.reserve(num_reads + 1)?;

    seq.read(read_voltage, clim)?;
    seq.tag("phase", "initial");
    seq.tag_value("pulse_count", 0.0);
    for i in 0..num_pulses {
        seq.pulse(pulse_voltage, width, clim)?;
        if i + 1 < num_pulses {
            seq.wait(delay)?;
        }
    }
    for _ in 0..num_reads {
        seq.read(read_voltage, clim)?;
        seq.tag("phase", "read");
        seq.tag_value("pulse_count", num_pulses as f64);
    }
    Ok(())
}

pub(crate) fn potentiation_depression_cycle<D: SourceMeter + ?Sized>(
    seq: &mut Sequencer<'_, D>,
    p: &OpParams<'_>,
) -> Result<(), AdapterError> {
    let set_voltage = p.bag.float("set_voltage")?;
    let reset_voltage = p.bag.float("reset_voltage")?;
    let width = p.seconds("pulse_width")?;
    let steps = p.bag.count_or("steps", 10)?;
    let cycles = p.bag.count_or("num_cycles", 1)?;
    let (read_voltage, clim) = (p.read_voltage()?, p.clim()?);
    seq.reserve(2 * steps * cycles)?;

    for cycle in 1..=cycles {
        for (label, amplitude) in [("potentiation", set_voltage), ("depression", reset_voltage)] {
            for _ in 0..steps {
                seq.pulse(amplitude, width, clim)?;
                record(seq, read_voltage, clim, "read", cycle)?;
                seq.tag("operation", label);
            }
        }
    }
    Ok(())
}

/// 解析脉宽列表，例如 `"1us, 10us, 100us"`
fn parse_width_list(text: &str) -> Result<Vec<f64>, ProtocolError> {
    let widths = text
        .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|s| parse_time(s).map(|(value, unit)| unit.to_seconds(value)))
        .collect::<Result<Vec<_>, _>>()?;
    if widths.is_empty() {
        return Err(invalid("pulse_widths", "empty width list"));
    }
    Ok(widths)
}

pub(crate) fn width_sweep_with_reads<D: SourceMeter + ?Sized>(
    seq: &mut Sequencer<'_, D>,
    p: &OpParams<'_>,
) -> Result<(), AdapterError> {
    let pulse_voltage = p.bag.float("pulse_voltage")?;
    let per_width = p.bag.count_or("num_pulses_per_width", 1)?;
    let (read_voltage, clim) = (p.read_voltage()?, p.clim()?);

    let mut widths = parse_width_list(p.bag.string("pulse_widths")?)?;
    for width in widths.iter_mut() {
        match p.limits.check_pulse_width(*width) {
            LimitCheck::Within => {},
            LimitCheck::Clamped(clamped) => {
                warn!("pulse width {:e} s raised to hardware minimum {:e} s", width, clamped);
                *width = clamped;
            },
            LimitCheck::Rejected => {
                return Err(invalid("pulse_widths", format!("width {width:e} s is out of range")).into());
            },
        }
    }
    seq.reserve(widths.len() * per_width + 1)?;

    seq.read(read_voltage, clim)?;
    seq.tag("phase", "initial");
    seq.tag_value("pulse_widths", f64::NAN);
    for width in widths {
        for _ in 0..per_width {
            seq.pulse(pulse_voltage, width, clim)?;
            seq.read(read_voltage, clim)?;
            seq.tag("phase", "read");
            seq.tag_value("pulse_widths", width);
        }
    }
    Ok(())
}

pub(crate) fn voltage_amplitude_sweep<D: SourceMeter + ?Sized>(
    seq: &mut Sequencer<'_, D>,
    p: &OpParams<'_>,
) -> Result<(), AdapterError> {
    let start = p.bag.float("start_voltage")?;
    let stop = p.bag.float("stop_voltage")?;
    let step = p.bag.float("step_voltage")?.abs();
    let width = p.seconds("pulse_width")?;
    let pulses_per_step = p.bag.count_or("pulses_per_step", 1)?;
    let (read_voltage, clim) = (p.read_voltage()?, p.clim()?);
    if !step.is_finite() || step == 0.0 {
        return Err(invalid("step_voltage", "must be non-zero and finite").into());
    }

    let direction = if stop >= start { 1.0 } else { -1.0 };
    let steps = ((stop - start).abs() / step + 1e-9).floor() as usize + 1;
    seq.reserve(steps)?;

    for k in 0..steps {
        let amplitude = start + direction * step * k as f64;
        if p.limits.check_voltage(amplitude) == LimitCheck::Rejected {
            return Err(invalid("stop_voltage", format!("{amplitude} V is out of range")).into());
        }
        for _ in 0..pulses_per_step {
            seq.pulse(amplitude, width, clim)?;
        }
        seq.read(read_voltage, clim)?;
        seq.tag("phase", "read");
        seq.tag_value("pulse_voltage", amplitude);
    }
    Ok(())
}

pub(crate) fn endurance_test<D: SourceMeter + ?Sized>(
    seq: &mut Sequencer<'_, D>,
    p: &OpParams<'_>,
) -> Result<(), AdapterError> {
    let set_voltage = p.bag.float("set_voltage")?;
    let reset_voltage = p.bag.float("reset_voltage")?;
    let width = p.seconds("pulse_width")?;
    let cycles = p.bag.count_or("num_cycles", 100)?;
    let (read_voltage, clim) = (p.read_voltage()?, p.clim()?);
    seq.reserve(2 * cycles)?;

    for cycle in 1..=cycles {
        seq.pulse(set_voltage, width, clim)?;
        record(seq, read_voltage, clim, "set", cycle)?;
        seq.pulse(reset_voltage, width, clim)?;
        record(seq, read_voltage, clim, "reset", cycle)?;
    }
    Ok(())
}

pub(crate) fn retention_test<D: SourceMeter + ?Sized>(
    seq: &mut Sequencer<'_, D>,
    p: &OpParams<'_>,
) -> Result<(), AdapterError> {
    let pulse_voltage = p.bag.float("pulse_voltage")?;
    let width = p.seconds("pulse_width")?;
    let num_reads = p.bag.count_or("num_reads", 10)?;
    let interval = p.seconds_or("read_interval", 1.0)?;
    let (read_voltage, clim) = (p.read_voltage()?, p.clim()?);
    seq.reserve(num_reads + 1)?;

    record(seq, read_voltage, clim, "initial", 0)?;
    seq.pulse(pulse_voltage, width, clim)?;
    let pulse_end = seq.elapsed_s();
    for k in 1..=num_reads {
        seq.wait_until(pulse_end + interval * k as f64)?;
        record(seq, read_voltage, clim, "retention", k)?;
    }
    Ok(())
}

pub(crate) fn pulse_train<D: SourceMeter + ?Sized>(
    seq: &mut Sequencer<'_, D>,
    p: &OpParams<'_>,
) -> Result<(), AdapterError> {
    let pulse_voltage = p.bag.float("pulse_voltage")?;
    let spec = PatternSpec::new(
        p.bag.string("pattern")?,
        p.seconds("on_duration")?,
        p.seconds("off_duration")?,
    )
    .with_repeats(p.bag.count_or("repeat_count", 1)?)
    .with_gap(p.seconds_or("inter_repeat_gap", 0.0)?);
    let (read_voltage, clim) = (p.read_voltage()?, p.clim()?);

    let schedule = spec.build(p.limits.min_pulse_width)?;
    seq.reserve(schedule.len())?;

    let origin = seq.elapsed_s();
    for (index, interval) in schedule.iter().enumerate() {
        let late = seq.elapsed_s() - (origin + interval.start_s);
        if late > 0.0 {
            debug!("pulse {} starts {:.3} ms late", index, late * 1e3);
        }
        seq.wait_until(origin + interval.start_s)?;
        seq.pulse(pulse_voltage, interval.duration_s(), clim)?;
        seq.read(read_voltage, clim)?;
        seq.tag("phase", "read");
        seq.tag_value("pulse_index", index as f64);
    }
    Ok(())
}

/// 定时读取的第一阶段：施加读取偏置
pub(crate) fn arm_timed_read<D: SourceMeter + ?Sized>(
    device: &mut D,
    p: &OpParams<'_>,
) -> Result<(), AdapterError> {
    device.apply_bias(p.read_voltage()?, p.clim()?)?;
    Ok(())
}

/// 定时读取的第二阶段：在 `[0, duration)` 内按固定间隔采样
///
/// 采样落后于计划时跳过已错过的采样点，而不是连续补采。
pub(crate) fn collect_timed_read<D: SourceMeter + ?Sized>(
    seq: &mut Sequencer<'_, D>,
    p: &OpParams<'_>,
    cancel: &CancelToken,
) -> Result<(), AdapterError> {
    let duration = p.seconds("duration")?;
    let interval = p.seconds_or("sample_interval", 10e-3)?;
    if !interval.is_finite() || interval <= 0.0 {
        return Err(invalid("sample_interval", "must be positive").into());
    }
    if !duration.is_finite() || duration <= 0.0 {
        return Err(invalid("duration", "must be positive").into());
    }
    seq.reserve((duration / interval).ceil() as usize)?;

    let slice = duration_from_seconds("sample_interval", interval / 4.0)?;
    let mut k = 0usize;
    loop {
        let target = interval * k as f64;
        if target >= duration {
            break;
        }
        if !seq.wait_until_cancellable(target, slice, cancel)? {
            debug!("timed read cancelled after {} samples", k);
            return Err(AdapterError::Aborted);
        }
        seq.sample()?;
        let behind = (seq.elapsed_s() / interval).floor() as usize;
        if behind > k {
            debug!("timed read skipped {} samples", behind - k);
        }
        k = k.max(behind) + 1;
    }
    Ok(())
}
