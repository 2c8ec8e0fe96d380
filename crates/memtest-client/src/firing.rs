//! 激光时间表执行循环
//!
//! 在编排线程上运行。每个事件之前按切片睡眠，切片不超过
//! `min(sample_interval / 4, 距下一事件的剩余时间)`，每次醒来重新读取单调时钟，
//! 因此短睡眠的误差不会累积。
//!
//! 每个区间开启前按实测时刻重新检查：`now + on` 超出测量窗口的区间及其后的
//! 区间不再执行，时间表在运行时被截断。

use crate::error::SyncError;
use memtest_instrument::{CancelToken, Clock, DeviceError, LaserDriver, timing::sleep_until};
use memtest_protocol::{FireInterval, FiringSchedule};
use std::time::{Duration, Instant};
use tracing::{trace, warn};

/// 时间表执行中止的原因
#[derive(Debug)]
pub(crate) enum FiringStop {
    /// 取消令牌被触发（用户取消或测量线程失败）
    Interrupted,
    /// 激光驱动报错
    Laser(DeviceError),
}

/// 按测量时长截断时间表
///
/// 结束时刻超过 `duration_s` 的区间及其后的区间被丢弃；连第一个区间都放不下时
/// 返回 [`SyncError::ScheduleOverrun`]。
pub fn fit_schedule(schedule: &FiringSchedule, duration_s: f64) -> Result<FiringSchedule, SyncError> {
    let fitted = schedule.truncated(duration_s);
    if fitted.is_empty()
        && let Some(first) = schedule.iter().next()
    {
        return Err(SyncError::ScheduleOverrun {
            first_end_s: first.end_s,
            duration_s,
        });
    }
    if fitted.len() < schedule.len() {
        warn!(
            "Firing schedule truncated to {} of {} intervals to fit {} s",
            fitted.len(),
            schedule.len(),
            duration_s
        );
    }
    Ok(fitted)
}

/// 相对 `t0` 的偏移转为时刻
pub(crate) fn at_offset(t0: Instant, offset_s: f64) -> Instant {
    t0 + Duration::from_secs_f64(offset_s.max(0.0))
}

/// 执行时间表，返回实测的开关时刻（相对 t0）
///
/// `fired` 比 `schedule` 短而返回 `Ok` 表示运行时截断。
/// 出错或中止时不负责关闭激光，由调用方的清理步骤完成。
#[allow(clippy::too_many_arguments)]
pub(crate) fn run_schedule(
    clock: &dyn Clock,
    laser: &mut dyn LaserDriver,
    schedule: &FiringSchedule,
    t0: Instant,
    duration_s: f64,
    slice: Duration,
    cancel: &CancelToken,
    fired: &mut Vec<FireInterval>,
) -> Result<(), FiringStop> {
    for (index, planned) in schedule.iter().enumerate() {
        if !sleep_until(clock, at_offset(t0, planned.start_s), slice, cancel) {
            return Err(FiringStop::Interrupted);
        }
        let now_s = clock.elapsed_since(t0).as_secs_f64();
        if now_s + planned.duration_s() > duration_s {
            warn!(
                "Laser interval {} planned at {:.4} s cannot start at {:.4} s within the {} s window; \
                firing stopped after {} of {} intervals",
                index,
                planned.start_s,
                now_s,
                duration_s,
                fired.len(),
                schedule.len()
            );
            return Ok(());
        }
        laser.fire(true).map_err(FiringStop::Laser)?;
        let start_s = clock.elapsed_since(t0).as_secs_f64();

        // 正在发光时也响应取消，立即进入清理
        let completed = sleep_until(clock, at_offset(t0, planned.end_s), slice, cancel);
        laser.fire(false).map_err(FiringStop::Laser)?;
        let end_s = clock.elapsed_since(t0).as_secs_f64();
        fired.push(FireInterval { start_s, end_s });
        trace!(
            "interval {}: planned [{:.6}, {:.6}] fired [{:.6}, {:.6}]",
            index, planned.start_s, planned.end_s, start_s, end_s
        );

        if !completed {
            return Err(FiringStop::Interrupted);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use memtest_instrument::mock::MockLaser;
    use memtest_instrument::{DeviceError, SimulatedClock};
    use memtest_protocol::PatternSpec;
    use std::sync::Arc;

    /// 每次开关都让共享的模拟时钟前进 `latency`
    struct SlowLaser {
        clock: Arc<SimulatedClock>,
        latency: Duration,
        emitting: bool,
        calls: usize,
    }

    impl LaserDriver for SlowLaser {
        fn fire(&mut self, enable: bool) -> Result<(), DeviceError> {
            self.clock.advance(self.latency);
            self.emitting = enable;
            self.calls += 1;
            Ok(())
        }

        fn off(&mut self) -> Result<(), DeviceError> {
            self.emitting = false;
            Ok(())
        }
    }

    fn scenario() -> FiringSchedule {
        PatternSpec::new("1011", 0.1, 0.1)
            .with_repeats(2)
            .build(0.0)
            .unwrap()
    }

    #[test]
    fn test_fit_schedule_truncates_and_rejects() {
        let schedule = scenario();
        assert_eq!(fit_schedule(&schedule, 10.0).unwrap().len(), 6);
        assert_eq!(fit_schedule(&schedule, 1.7).unwrap().len(), 4);
        let err = fit_schedule(&schedule, 0.05).unwrap_err();
        assert!(matches!(err, SyncError::ScheduleOverrun { .. }));
    }

    #[test]
    fn test_run_schedule_on_simulated_clock() {
        let clock = SimulatedClock::new();
        let mut laser = MockLaser::new();
        let log = laser.log();
        let schedule = scenario();
        let t0 = clock.now();
        let mut fired = Vec::new();

        run_schedule(
            &clock,
            &mut laser,
            &schedule,
            t0,
            10.0,
            Duration::from_millis(5),
            &CancelToken::new(),
            &mut fired,
        )
        .unwrap();

        assert_eq!(fired.len(), 6);
        for (actual, planned) in fired.iter().zip(schedule.iter()) {
            assert!(actual.start_s >= planned.start_s - 1e-9);
            assert!(actual.start_s - planned.start_s < 1e-6);
            assert!(actual.end_s >= planned.end_s - 1e-9);
        }
        let log = log.lock();
        assert_eq!(log.len(), 12);
        assert!(log.iter().step_by(2).all(|e| e.enable));
        assert!(!laser.is_emitting());
    }

    #[test]
    fn test_cancel_stops_before_next_event() {
        let clock = SimulatedClock::new();
        let mut laser = MockLaser::new();
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut fired = Vec::new();
        let stop = run_schedule(
            &clock,
            &mut laser,
            &scenario(),
            clock.now(),
            10.0,
            Duration::from_millis(5),
            &cancel,
            &mut fired,
        )
        .unwrap_err();
        assert!(matches!(stop, FiringStop::Interrupted));
        assert!(fired.is_empty());
    }

    #[test]
    fn test_laser_failure_reported() {
        let clock = SimulatedClock::new();
        let mut laser = MockLaser::new().fail_on_fire(2);
        let mut fired = Vec::new();
        let stop = run_schedule(
            &clock,
            &mut laser,
            &scenario(),
            clock.now(),
            10.0,
            Duration::from_millis(5),
            &CancelToken::new(),
            &mut fired,
        )
        .unwrap_err();
        assert!(matches!(stop, FiringStop::Laser(_)));
        assert_eq!(fired.len(), 1);
    }

    #[test]
    fn test_slow_laser_is_cut_off_at_window_end() {
        let clock = Arc::new(SimulatedClock::new());
        let mut laser = SlowLaser {
            clock: clock.clone(),
            latency: Duration::from_millis(150),
            emitting: false,
            calls: 0,
        };
        let schedule = PatternSpec::new("1111", 0.02, 0.02).build(0.0).unwrap();
        let duration_s = 0.2;
        let schedule = fit_schedule(&schedule, duration_s).unwrap();
        assert_eq!(schedule.len(), 4);
        let mut fired = Vec::new();

        run_schedule(
            &*clock,
            &mut laser,
            &schedule,
            clock.now(),
            duration_s,
            Duration::from_millis(5),
            &CancelToken::new(),
            &mut fired,
        )
        .unwrap();

        // 第一个区间关断时已到 0.3 s，第二个区间放不下
        assert_eq!(fired.len(), 1);
        assert_eq!(laser.calls, 2);
        assert!(!laser.emitting);
        assert!(fired.iter().all(|i| i.start_s < duration_s));
    }
}
