//! 路由层集成测试
//!
//! 使用 Mock 设备走完整链路：探测 → 能力检查 → 参数规范化 → 执行 → 结果规范化。

use memtest_sdk::driver::AdapterFactory;
use memtest_sdk::instrument::mock::{MockCounters, MockSourceMeter};
use memtest_sdk::instrument::{Kxci4200Adapter, Tsp2450Adapter};
use memtest_sdk::prelude::*;
use memtest_sdk::protocol::Series;
use proptest::prelude::*;
use std::sync::{Arc, Mutex};

const TSP_ADDRESS: &str = "USB0::0x05E6::0x2450::04096331::INSTR";
const KXCI_ADDRESS: &str = "192.168.0.10:8888";

/// 记录每个新建 Mock 设备计数器的工厂
fn counted_factory() -> (impl AdapterFactory, Arc<Mutex<Vec<Arc<MockCounters>>>>) {
    let created = Arc::new(Mutex::new(Vec::new()));
    let sink = created.clone();
    let factory = move |backend: Backend| -> Result<Box<dyn InstrumentAdapter>, String> {
        let device = MockSourceMeter::new();
        sink.lock().unwrap().push(device.counters());
        let adapter: Box<dyn InstrumentAdapter> = match backend {
            Backend::Tsp2450 => Box::new(Tsp2450Adapter::new(device)),
            Backend::Kxci4200 => Box::new(Kxci4200Adapter::new(device)),
        };
        Ok(adapter)
    };
    (factory, created)
}

fn pulse_read_repeat() -> TestRequest {
    TestRequest::new(
        Operation::PulseReadRepeat,
        ParamBag::new()
            .with("pulse_voltage", 1.0)
            .with_time("pulse_width", 100.0, TimeUnit::Microseconds)
            .with("read_voltage", 0.2)
            .with_time("delay_between", 1.0, TimeUnit::Milliseconds)
            .with("num_cycles", 5_i64)
            .with("clim", 1e-3),
    )
}

#[test]
fn test_unsupported_operation_makes_no_device_call() {
    let (factory, created) = counted_factory();
    let router = SystemRouterBuilder::new().factory(factory).build();
    assert_eq!(
        router.connect(KXCI_ADDRESS, BackendOverride::Auto).unwrap(),
        Backend::Kxci4200
    );
    let counters = created.lock().unwrap()[0].clone();
    let before = counters.total();

    let request = TestRequest::new(
        Operation::WidthSweepWithReads,
        ParamBag::new()
            .with("pulse_voltage", 1.0)
            .with("pulse_widths", "1us,2us,5us")
            .with("read_voltage", 0.2),
    );
    let err = router.run_test(&request).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Capability);
    assert!(err.to_string().contains("staged"), "{err}");
    assert_eq!(counters.total(), before);
}

#[test]
fn test_pulse_read_repeat_on_both_backends() {
    for (address, backend) in [
        (TSP_ADDRESS, Backend::Tsp2450),
        (KXCI_ADDRESS, Backend::Kxci4200),
    ] {
        let (factory, created) = counted_factory();
        let router = SystemRouterBuilder::new().factory(factory).build();
        assert_eq!(router.connect(address, BackendOverride::Auto).unwrap(), backend);

        let result = router.run_test(&pulse_read_repeat()).unwrap();
        assert_eq!(result.len(), 6, "{backend}");
        assert!(result.check_lengths().is_ok());
        assert!(result.voltages.iter().all(|v| (*v - 0.2).abs() < 1e-12));
        assert!(result.resistances.iter().all(|r| *r > 0.0 && r.is_finite()));
        // 每个周期一次脉冲
        let counters = created.lock().unwrap()[0].clone();
        assert_eq!(counters.pulses(), 5);

        let map = result.into_map();
        assert!(matches!(map.get("phase"), Some(Series::Text(p)) if p.len() == 6));
    }
}

#[test]
fn test_override_skips_detection() {
    let (factory, _) = counted_factory();
    let router = SystemRouterBuilder::new().factory(factory).build();
    let backend = router
        .connect("lab-bench-7", BackendOverride::Force(Backend::Kxci4200))
        .unwrap();
    assert_eq!(backend, Backend::Kxci4200);
    assert_eq!(router.backend(), Some(Backend::Kxci4200));

    let (factory, _) = counted_factory();
    let router = SystemRouterBuilder::new().factory(factory).build();
    let err = router.connect("lab-bench-7", BackendOverride::Auto).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Parameter);
    assert!(!router.is_connected());
}

#[test]
fn test_out_of_range_voltage_rejected_before_hardware() {
    let (factory, created) = counted_factory();
    let router = SystemRouterBuilder::new().factory(factory).build();
    router.connect(KXCI_ADDRESS, BackendOverride::Auto).unwrap();
    let counters = created.lock().unwrap()[0].clone();
    let before = counters.total();

    let request = TestRequest::new(
        Operation::PulseReadRepeat,
        ParamBag::new()
            .with("pulse_voltage", 120.0)
            .with_time("pulse_width", 1.0, TimeUnit::Microseconds),
    );
    let err = router.run_test(&request).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Parameter);
    assert_eq!(counters.total(), before);
}

#[test]
fn test_requests_without_connection_fail() {
    let router = SystemRouterBuilder::new().build();
    let err = router.run_test(&pulse_read_repeat()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connection);
}

#[test]
fn test_firing_schedule_scenario() {
    let schedule = PatternSpec::new("1011", 0.1, 0.1)
        .with_repeats(2)
        .build(20e-9)
        .unwrap();
    let expected = [0.0, 0.4, 0.6, 1.6, 2.0, 2.2];
    let starts = schedule.starts();
    assert_eq!(starts.len(), expected.len());
    for (actual, expected) in starts.iter().zip(expected) {
        assert!((actual - expected).abs() < 1e-9, "{actual} != {expected}");
    }
}

fn unit() -> impl Strategy<Value = TimeUnit> {
    prop::sample::select(TimeUnit::ALL.to_vec())
}

proptest! {
    #[test]
    fn prop_unit_round_trip(value in 1e-3f64..1e6, from in unit(), to in unit()) {
        let back = TimeUnit::convert(TimeUnit::convert(value, from, to), to, from);
        prop_assert!((back - value).abs() <= value * 1e-12);
        prop_assert_eq!(TimeUnit::convert(value, from, from), value);
    }
}
