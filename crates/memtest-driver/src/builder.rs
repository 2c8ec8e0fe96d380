//! Builder 模式实现
//!
//! 提供链式构造 [`SystemRouter`] 的便捷方式。

use crate::router::SystemRouter;
use memtest_instrument::{Backend, CapabilityRegistry, ConnectOptions, InstrumentAdapter};
use memtest_protocol::{DEFAULT_RESISTANCE_SENTINEL, DEFAULT_ZERO_CURRENT_EPSILON};
use memtest_tools::RouterSection;
use std::time::Duration;

/// 适配器工厂
///
/// 按后端创建一个尚未连接的适配器；失败时返回原因。
pub trait AdapterFactory: Send + Sync {
    fn create(&self, backend: Backend) -> Result<Box<dyn InstrumentAdapter>, String>;
}

impl<F> AdapterFactory for F
where
    F: Fn(Backend) -> Result<Box<dyn InstrumentAdapter>, String> + Send + Sync,
{
    fn create(&self, backend: Backend) -> Result<Box<dyn InstrumentAdapter>, String> {
        self(backend)
    }
}

/// 未配置工厂时使用：任何后端都无法创建
struct NoFactory;

impl AdapterFactory for NoFactory {
    fn create(&self, backend: Backend) -> Result<Box<dyn InstrumentAdapter>, String> {
        Err(format!("no adapter factory configured for {backend}"))
    }
}

/// 路由层运行设置
#[derive(Debug, Clone, PartialEq)]
pub struct RouterSettings {
    /// `|I|` 低于该值时电阻取哨兵值
    pub zero_current_epsilon_a: f64,
    /// 电阻哨兵值
    pub resistance_sentinel_ohm: f64,
    /// 连接选项
    pub connect_options: ConnectOptions,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            zero_current_epsilon_a: DEFAULT_ZERO_CURRENT_EPSILON,
            resistance_sentinel_ohm: DEFAULT_RESISTANCE_SENTINEL,
            connect_options: ConnectOptions::default(),
        }
    }
}

impl From<&RouterSection> for RouterSettings {
    fn from(section: &RouterSection) -> Self {
        Self {
            zero_current_epsilon_a: section.zero_current_epsilon_a,
            resistance_sentinel_ohm: section.resistance_sentinel_ohm,
            connect_options: ConnectOptions::default(),
        }
    }
}

/// SystemRouter Builder（链式构造）
///
/// # Example
///
/// ```no_run
/// use memtest_driver::{BackendOverride, SystemRouterBuilder};
/// use memtest_instrument::{Backend, InstrumentAdapter};
///
/// let router = SystemRouterBuilder::new()
///     .factory(|backend: Backend| -> Result<Box<dyn InstrumentAdapter>, String> {
///         Err(format!("{backend} driver not installed"))
///     })
///     .build();
/// assert!(router.connect("192.168.0.10:1225", BackendOverride::Auto).is_err());
/// ```
pub struct SystemRouterBuilder {
    registry: Option<CapabilityRegistry>,
    factory: Option<Box<dyn AdapterFactory>>,
    settings: RouterSettings,
}

impl SystemRouterBuilder {
    /// 创建新的 Builder
    pub fn new() -> Self {
        Self {
            registry: None,
            factory: None,
            settings: RouterSettings::default(),
        }
    }

    /// 设置能力注册表（默认 [`CapabilityRegistry::standard`]）
    pub fn registry(mut self, registry: CapabilityRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// 设置适配器工厂
    pub fn factory(mut self, factory: impl AdapterFactory + 'static) -> Self {
        self.factory = Some(Box::new(factory));
        self
    }

    /// 从配置文件的 `[router]` 段读取设置
    pub fn router_config(mut self, section: &RouterSection) -> Self {
        let connect_options = self.settings.connect_options.clone();
        self.settings = RouterSettings::from(section);
        self.settings.connect_options = connect_options;
        self
    }

    /// 设置连接超时
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.settings.connect_options.timeout = timeout;
        self
    }

    /// 连接后是否复位输出
    pub fn reset_on_connect(mut self, reset: bool) -> Self {
        self.settings.connect_options.reset_on_connect = reset;
        self
    }

    /// 构建路由器
    pub fn build(self) -> SystemRouter {
        SystemRouter::new(
            self.registry.unwrap_or_else(CapabilityRegistry::standard),
            self.factory.unwrap_or_else(|| Box::new(NoFactory)),
            self.settings,
        )
    }
}

impl Default for SystemRouterBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Mock 适配器工厂：每次创建一个全新的 [`memtest_instrument::mock::MockSourceMeter`]
#[cfg(feature = "mock")]
pub fn mock_factory() -> impl AdapterFactory {
    use memtest_instrument::mock::MockSourceMeter;
    use memtest_instrument::{Kxci4200Adapter, Tsp2450Adapter};

    |backend: Backend| -> Result<Box<dyn InstrumentAdapter>, String> {
        let adapter: Box<dyn InstrumentAdapter> = match backend {
            Backend::Tsp2450 => Box::new(Tsp2450Adapter::new(MockSourceMeter::new())),
            Backend::Kxci4200 => Box::new(Kxci4200Adapter::new(MockSourceMeter::new())),
        };
        Ok(adapter)
    }
}
