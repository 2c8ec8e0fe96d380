//! 系统路由器
//!
//! 持有至多一个已连接的适配器。每次 `run_test` 依次执行：
//!
//! 1. 能力检查（失败时不触碰适配器）
//! 2. 参数规范化（单位换算、限值钳位/拒绝）
//! 3. 适配器执行
//! 4. 结果规范化（等长校验、电阻重算）
//!
//! 同一时刻只允许一个测试占用适配器；并发调用立即返回 [`TestError::Busy`]。

use crate::builder::{AdapterFactory, RouterSettings};
use crate::detect::{BackendOverride, resolve_backend};
use crate::error::TestError;
use crate::normalize::{normalize_params, normalize_result};
use memtest_instrument::{AdapterError, Backend, CapabilityRegistry, InstrumentAdapter};
use memtest_protocol::{HardwareLimits, Operation, TestRequest, TestResult};
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::{debug, info, warn};

type Slot = Option<Box<dyn InstrumentAdapter>>;

/// 独占租用的适配器
///
/// 持有期间其他 `run_test`/`lease` 调用返回 `Busy`；drop 时释放。
pub type AdapterLease<'a> = MappedMutexGuard<'a, dyn InstrumentAdapter>;

/// 系统路由器
pub struct SystemRouter {
    registry: CapabilityRegistry,
    factory: Box<dyn AdapterFactory>,
    settings: RouterSettings,
    slot: Mutex<Slot>,
}

impl SystemRouter {
    pub(crate) fn new(
        registry: CapabilityRegistry,
        factory: Box<dyn AdapterFactory>,
        settings: RouterSettings,
    ) -> Self {
        Self {
            registry,
            factory,
            settings,
            slot: Mutex::new(None),
        }
    }

    fn try_slot(&self) -> Result<MutexGuard<'_, Slot>, TestError> {
        self.slot.try_lock().ok_or(TestError::Busy)
    }

    /// 连接到 `address` 指定的系统
    ///
    /// 已有连接时先断开。返回实际使用的后端。
    pub fn connect(&self, address: &str, selection: BackendOverride) -> Result<Backend, TestError> {
        let backend = resolve_backend(address, selection)?;
        let mut slot = self.try_slot()?;

        if let Some(mut previous) = slot.take()
            && let Err(e) = previous.disconnect()
        {
            warn!("Failed to disconnect previous system: {}", e);
        }

        let mut adapter = self
            .factory
            .create(backend)
            .map_err(|reason| TestError::Factory { backend, reason })?;

        match adapter.connect(address, &self.settings.connect_options) {
            Ok(true) => {},
            Ok(false) => {
                return Err(TestError::Connection {
                    address: address.to_string(),
                    source: AdapterError::NotConnected,
                });
            },
            Err(source) => {
                return Err(TestError::Connection {
                    address: address.to_string(),
                    source,
                });
            },
        }

        info!("Connected to {} at '{}'", adapter.system_name(), address);
        *slot = Some(adapter);
        Ok(backend)
    }

    /// 断开当前连接（未连接时为空操作）
    pub fn disconnect(&self) -> Result<(), TestError> {
        let mut slot = self.try_slot()?;
        if let Some(mut adapter) = slot.take() {
            let name = adapter.system_name().to_string();
            adapter.disconnect().map_err(|source| TestError::Connection {
                address: name.clone(),
                source,
            })?;
            info!("Disconnected from {}", name);
        }
        Ok(())
    }

    /// 当前后端（未连接或正忙时为 `None`）
    pub fn backend(&self) -> Option<Backend> {
        self.slot.try_lock()?.as_ref().map(|a| a.backend())
    }

    /// 是否已连接
    pub fn is_connected(&self) -> bool {
        self.slot
            .try_lock()
            .is_some_and(|slot| slot.as_ref().is_some_and(|a| a.is_connected()))
    }

    /// 当前后端的硬件限制
    pub fn hardware_limits(&self) -> Result<HardwareLimits, TestError> {
        let slot = self.try_slot()?;
        slot.as_ref()
            .map(|a| a.hardware_limits())
            .ok_or(TestError::NotConnected)
    }

    /// 能力注册表
    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// 路由层运行设置
    pub fn settings(&self) -> &RouterSettings {
        &self.settings
    }

    /// 当前后端支持的操作
    pub fn supported_operations(&self) -> Result<Vec<Operation>, TestError> {
        let slot = self.try_slot()?;
        let adapter = slot.as_ref().ok_or(TestError::NotConnected)?;
        Ok(self.registry.supported_operations(adapter.backend()))
    }

    /// 独占租用当前适配器（同步器使用）
    pub fn lease(&self) -> Result<AdapterLease<'_>, TestError> {
        let slot = self.try_slot()?;
        MutexGuard::try_map(slot, |slot| slot.as_deref_mut()).map_err(|_| TestError::NotConnected)
    }

    /// 执行一次测试
    pub fn run_test(&self, request: &TestRequest) -> Result<TestResult, TestError> {
        let operation = request.operation;
        let mut slot = self.try_slot()?;
        let adapter = slot.as_deref_mut().ok_or(TestError::NotConnected)?;
        let backend = adapter.backend();

        self.registry
            .check(backend, operation)
            .map_err(|reason| TestError::Capability {
                backend,
                operation,
                reason,
            })?;

        let params = normalize_params(request, backend, &adapter.hardware_limits())?;
        debug!("{} on {} with {}", operation, backend, params);

        let result = match adapter.execute(operation, &params) {
            Ok(result) => result,
            Err(AdapterError::NotImplemented(_)) => {
                return Err(TestError::MissingOperation { backend, operation });
            },
            Err(AdapterError::Parameter(e)) => return Err(TestError::Parameter(e)),
            Err(source) => {
                return Err(TestError::Hardware {
                    operation,
                    params,
                    source,
                });
            },
        };

        let result = normalize_result(operation, result, &self.settings)?;
        info!("{} on {} finished: {} samples", operation, backend, result.len());
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::SystemRouterBuilder;
    use crate::error::ErrorKind;
    use memtest_instrument::mock::MockSourceMeter;
    use memtest_instrument::{
        Capability, ConnectOptions, DeviceError, DeviceErrorKind, Kxci4200Adapter,
        Tsp2450Adapter,
    };
    use memtest_protocol::{ParamBag, TimeUnit};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 只记录调用次数的适配器
    struct CountingAdapter {
        backend: Backend,
        calls: Arc<AtomicUsize>,
        connected: bool,
        outcome: fn(&ParamBag) -> Result<TestResult, AdapterError>,
    }

    fn ok_two_samples(_: &ParamBag) -> Result<TestResult, AdapterError> {
        let mut result = TestResult::new();
        result.push_sample(0.0, 0.2, 2e-4);
        result.push_sample(0.1, 0.2, 0.0);
        Ok(result)
    }

    impl CountingAdapter {
        fn new(backend: Backend, calls: Arc<AtomicUsize>) -> Self {
            Self {
                backend,
                calls,
                connected: false,
                outcome: ok_two_samples,
            }
        }

        fn hit(&self) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl InstrumentAdapter for CountingAdapter {
        fn system_name(&self) -> &str {
            self.backend.system_name()
        }

        fn backend(&self) -> Backend {
            self.backend
        }

        fn hardware_limits(&self) -> HardwareLimits {
            self.hit();
            self.backend.default_limits()
        }

        fn connect(&mut self, _: &str, _: &ConnectOptions) -> Result<bool, AdapterError> {
            self.connected = true;
            Ok(true)
        }

        fn disconnect(&mut self) -> Result<(), AdapterError> {
            self.connected = false;
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        fn idn(&mut self) -> Result<String, AdapterError> {
            self.hit();
            Ok("stub".to_string())
        }

        fn output_off(&mut self) -> Result<(), AdapterError> {
            self.hit();
            Ok(())
        }

        fn execute(&mut self, _: Operation, params: &ParamBag) -> Result<TestResult, AdapterError> {
            self.hit();
            (self.outcome)(params)
        }
    }

    fn router_with(
        outcome: fn(&ParamBag) -> Result<TestResult, AdapterError>,
        registry: CapabilityRegistry,
    ) -> (SystemRouter, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let factory_calls = calls.clone();
        let router = SystemRouterBuilder::new()
            .registry(registry)
            .factory(move |backend: Backend| -> Result<Box<dyn InstrumentAdapter>, String> {
                let mut adapter = CountingAdapter::new(backend, factory_calls.clone());
                adapter.outcome = outcome;
                Ok(Box::new(adapter))
            })
            .build();
        (router, calls)
    }

    fn pulse_request() -> TestRequest {
        TestRequest::new(
            Operation::PulseReadRepeat,
            ParamBag::new()
                .with("pulse_voltage", 1.0)
                .with_time("pulse_width", 100.0, TimeUnit::Microseconds),
        )
    }

    #[test]
    fn test_run_without_connection() {
        let (router, _) = router_with(ok_two_samples, CapabilityRegistry::standard());
        let err = router.run_test(&pulse_request()).unwrap_err();
        assert!(matches!(err, TestError::NotConnected));
        assert!(!router.is_connected());
        assert!(router.backend().is_none());
    }

    #[test]
    fn test_capability_gate_makes_no_adapter_calls() {
        let (router, calls) = router_with(ok_two_samples, CapabilityRegistry::standard());
        router
            .connect("192.168.0.10:1225", BackendOverride::Auto)
            .unwrap();
        assert_eq!(router.backend(), Some(Backend::Kxci4200));
        let before = calls.load(Ordering::SeqCst);

        let request = TestRequest::new(Operation::RetentionTest, ParamBag::new());
        let err = router.run_test(&request).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Capability);
        assert!(err.to_string().contains("retention_test"));
        assert_eq!(calls.load(Ordering::SeqCst), before);
    }

    #[test]
    fn test_successful_run_normalizes_result() {
        let (router, _) = router_with(ok_two_samples, CapabilityRegistry::standard());
        router
            .connect("GPIB0::24::INSTR", BackendOverride::Auto)
            .unwrap();
        let result = router.run_test(&pulse_request()).unwrap();
        assert_eq!(result.len(), 2);
        assert!((result.resistances[0] - 1000.0).abs() < 1e-9);
        assert_eq!(result.resistances[1], 1e12);
    }

    #[test]
    fn test_missing_operation_is_configuration_error() {
        fn not_implemented(_: &ParamBag) -> Result<TestResult, AdapterError> {
            Err(AdapterError::NotImplemented(Operation::PulseReadRepeat))
        }
        let (router, _) = router_with(not_implemented, CapabilityRegistry::standard());
        router
            .connect("keithley2450", BackendOverride::Auto)
            .unwrap();
        let err = router.run_test(&pulse_request()).unwrap_err();
        assert!(matches!(err, TestError::MissingOperation { .. }));
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_device_failure_wraps_operation_and_params() {
        fn interlock(_: &ParamBag) -> Result<TestResult, AdapterError> {
            Err(DeviceError::new(DeviceErrorKind::Interlock, "interlock open").into())
        }
        let (router, _) = router_with(interlock, CapabilityRegistry::standard());
        router
            .connect("192.168.0.10:1225", BackendOverride::Auto)
            .unwrap();
        let err = router.run_test(&pulse_request()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Hardware);
        let message = err.to_string();
        assert!(message.contains("pulse_read_repeat"));
        // 报告的是规范化后的参数
        assert!(message.contains("pulse_width=100us"));
        assert!(message.contains("interlock open"));
    }

    #[test]
    fn test_malformed_result_rejected() {
        fn ragged(_: &ParamBag) -> Result<TestResult, AdapterError> {
            let mut result = TestResult::new();
            result.timestamps = vec![0.0, 1.0];
            result.voltages = vec![0.2];
            result.currents = vec![1e-4, 1e-4];
            Ok(result)
        }
        let (router, _) = router_with(ragged, CapabilityRegistry::standard());
        router.connect("usb0", BackendOverride::Auto).unwrap();
        let err = router.run_test(&pulse_request()).unwrap_err();
        assert!(matches!(err, TestError::ResultShape { .. }));
    }

    #[test]
    fn test_registry_can_disable_operation() {
        let registry = CapabilityRegistry::builder()
            .supported(Backend::Tsp2450, Operation::TimedRead)
            .build();
        let (router, _) = router_with(ok_two_samples, registry);
        router.connect("tsp", BackendOverride::Auto).unwrap();
        assert_eq!(
            router.supported_operations().unwrap(),
            vec![Operation::TimedRead]
        );
        assert_eq!(
            router.registry().capability(Backend::Tsp2450, Operation::PulseTrain),
            Capability::Unsupported("not registered".to_string())
        );
        let err = router.run_test(&pulse_request()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Capability);
    }

    #[test]
    fn test_factory_failure() {
        let router = SystemRouterBuilder::new().build();
        let err = router
            .connect("bench", Backend::Tsp2450.into())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(!router.is_connected());
    }

    #[test]
    fn test_connection_failure_reported() {
        let router = SystemRouterBuilder::new()
            .factory(|_: Backend| -> Result<Box<dyn InstrumentAdapter>, String> {
                Ok(Box::new(Tsp2450Adapter::new(
                    MockSourceMeter::new().fail_on_open(),
                )))
            })
            .build();
        let err = router
            .connect("GPIB0::24::INSTR", BackendOverride::Auto)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert!(err.to_string().contains("GPIB0::24::INSTR"));
    }

    #[test]
    fn test_lease_blocks_concurrent_runs() {
        let (router, _) = router_with(ok_two_samples, CapabilityRegistry::standard());
        router.connect("tsp", BackendOverride::Auto).unwrap();

        let lease = router.lease().unwrap();
        assert_eq!(lease.backend(), Backend::Tsp2450);
        let err = router.run_test(&pulse_request()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Busy);
        assert!(matches!(router.lease(), Err(TestError::Busy)));
        drop(lease);

        assert!(router.run_test(&pulse_request()).is_ok());
    }

    #[test]
    fn test_kxci_end_to_end_with_mock() {
        let router = SystemRouterBuilder::new()
            .factory(|_: Backend| -> Result<Box<dyn InstrumentAdapter>, String> {
                Ok(Box::new(Kxci4200Adapter::new(
                    MockSourceMeter::new()
                        .with_read_latency(std::time::Duration::ZERO)
                        .with_bias_latency(std::time::Duration::ZERO),
                )))
            })
            .build();
        router
            .connect("192.168.0.10:1225", BackendOverride::Auto)
            .unwrap();

        // 调用方以毫秒给出，路由层换算为该后端约定的微秒
        let request = TestRequest::new(
            Operation::PulseReadRepeat,
            ParamBag::new()
                .with("pulse_voltage", 1.0)
                .with_time("pulse_width", 0.1, TimeUnit::Milliseconds)
                .with_time("delay_between", 0.0, TimeUnit::Seconds)
                .with("num_cycles", 3i64),
        );
        let result = router.run_test(&request).unwrap();
        assert_eq!(result.len(), 4);
        assert!(result.resistances.iter().all(|r| r.is_finite() && *r > 0.0));

        router.disconnect().unwrap();
        assert!(!router.is_connected());
    }
}
