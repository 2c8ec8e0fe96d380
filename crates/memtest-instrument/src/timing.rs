//! 时钟与取消
//!
//! 所有耗时计算都经由 [`Clock`] 使用单调时间（`Instant`），从不使用墙钟。
//! 测试中注入 [`SimulatedClock`]，使时序断言与宿主机调度无关。

use spin_sleep::SpinSleeper;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// 单调时钟
pub trait Clock: Send + Sync {
    /// 当前时刻
    fn now(&self) -> Instant;

    /// 阻塞睡眠
    fn sleep(&self, duration: Duration);

    /// 自 `origin` 起经过的时间（`origin` 在未来时为 0）
    fn elapsed_since(&self, origin: Instant) -> Duration {
        self.now().saturating_duration_since(origin)
    }
}

/// 真实单调时钟
///
/// 使用 `spin_sleep` 做混合睡眠（系统睡眠 + 短自旋），在亚毫秒级切片上
/// 比 `std::thread::sleep` 的唤醒抖动小得多。
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    sleeper: SpinSleeper,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            sleeper: SpinSleeper::default(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            self.sleeper.sleep(duration);
        }
    }
}

/// 模拟时钟：`sleep` 只推进内部偏移，不真正等待
///
/// 多线程共享时（`Arc<SimulatedClock>`），任一线程的 `sleep` 都会推进全局时间。
#[derive(Debug)]
pub struct SimulatedClock {
    origin: Instant,
    offset_ns: AtomicU64,
}

impl SimulatedClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset_ns: AtomicU64::new(0),
        }
    }

    /// 模拟时间零点
    pub fn origin(&self) -> Instant {
        self.origin
    }

    /// 手动推进时间
    pub fn advance(&self, duration: Duration) {
        let ns = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.offset_ns.fetch_add(ns, Ordering::SeqCst);
    }

    /// 自零点起的模拟时间
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.offset_ns.load(Ordering::SeqCst))
    }
}

impl Default for SimulatedClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SimulatedClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
        std::thread::yield_now();
    }
}

/// 协作式取消令牌
///
/// `child()` 派生的令牌在自身或任一祖先被取消时都视为已取消；
/// 取消子令牌不影响父令牌。
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    ancestors: Vec<Arc<AtomicBool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// 派生子令牌
    pub fn child(&self) -> CancelToken {
        let mut ancestors = self.ancestors.clone();
        ancestors.push(self.flag.clone());
        CancelToken {
            flag: Arc::new(AtomicBool::new(false)),
            ancestors,
        }
    }

    /// 请求取消
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// 是否已取消
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
            || self.ancestors.iter().any(|a| a.load(Ordering::Acquire))
    }
}

/// 睡眠到 `deadline`，按 `slice` 切片并在每次醒来时检查取消
///
/// 返回 `false` 表示等待期间被取消。
pub fn sleep_until(
    clock: &dyn Clock,
    deadline: Instant,
    slice: Duration,
    cancel: &CancelToken,
) -> bool {
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        let now = clock.now();
        if now >= deadline {
            return true;
        }
        let remaining = deadline - now;
        let step = if slice.is_zero() {
            remaining
        } else {
            remaining.min(slice)
        };
        clock.sleep(step);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulated_clock_advances_on_sleep() {
        let clock = SimulatedClock::new();
        let start = clock.now();
        clock.sleep(Duration::from_millis(250));
        clock.advance(Duration::from_millis(750));
        assert_eq!(clock.elapsed_since(start), Duration::from_secs(1));
        assert_eq!(clock.elapsed(), Duration::from_secs(1));
    }

    #[test]
    fn test_elapsed_since_future_origin_is_zero() {
        let clock = SimulatedClock::new();
        let future = clock.now() + Duration::from_secs(3);
        assert_eq!(clock.elapsed_since(future), Duration::ZERO);
    }

    #[test]
    fn test_monotonic_clock_sleeps() {
        let clock = MonotonicClock::new();
        let start = clock.now();
        clock.sleep(Duration::from_millis(2));
        assert!(clock.elapsed_since(start) >= Duration::from_millis(2));
    }

    #[test]
    fn test_cancel_token_hierarchy() {
        let root = CancelToken::new();
        let child = root.child();
        let grandchild = child.child();

        grandchild.cancel();
        assert!(grandchild.is_cancelled());
        assert!(!child.is_cancelled());
        assert!(!root.is_cancelled());

        let other = child.child();
        root.cancel();
        assert!(child.is_cancelled());
        assert!(other.is_cancelled());
    }

    #[test]
    fn test_sleep_until_slices_and_cancels() {
        let clock = SimulatedClock::new();
        let token = CancelToken::new();
        let deadline = clock.now() + Duration::from_millis(10);
        assert!(sleep_until(
            &clock,
            deadline,
            Duration::from_millis(3),
            &token
        ));
        assert!(clock.now() >= deadline);

        token.cancel();
        let deadline = clock.now() + Duration::from_secs(1);
        assert!(!sleep_until(&clock, deadline, Duration::ZERO, &token));
    }
}
