//! 能力注册表
//!
//! 静态表 `(Backend, Operation) → Capability`，构建一次后只读。
//! 路由层在任何适配器调用之前查询此表。
//!
//! 同步会话的测量通道另有一张表 `(Backend, Acquisition) → Capability`：
//! 两阶段启动与自由运行采集是两种不同的硬件能力。

use crate::Backend;
use memtest_protocol::{Operation, TimeUnit};
use std::collections::BTreeMap;

/// 单个能力条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capability {
    /// 支持
    Supported,
    /// 不支持（附原因）
    Unsupported(String),
}

impl Capability {
    pub fn is_supported(&self) -> bool {
        matches!(self, Capability::Supported)
    }
}

/// 同步会话的采集方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Acquisition {
    /// 先就绪、后按 t0 采样（Protocol A）
    TwoPhase,
    /// 启动后由设备自行采样，开始时刻不可观测（Protocol B）
    FreeRunning,
}

impl Acquisition {
    pub const ALL: [Acquisition; 2] = [Acquisition::TwoPhase, Acquisition::FreeRunning];
}

impl std::fmt::Display for Acquisition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Acquisition::TwoPhase => "two-phase acquisition",
            Acquisition::FreeRunning => "free-running acquisition",
        })
    }
}

/// 能力注册表
#[derive(Debug, Clone, Default)]
pub struct CapabilityRegistry {
    entries: BTreeMap<(Backend, Operation), Capability>,
    acquisitions: BTreeMap<(Backend, Acquisition), Capability>,
}

impl CapabilityRegistry {
    /// 标准注册表
    pub fn standard() -> Self {
        let mut builder = RegistryBuilder::new();
        for op in Operation::ALL {
            builder = builder.supported(Backend::Tsp2450, op);
        }
        for op in Operation::ALL {
            builder = match op {
                Operation::WidthSweepWithReads => builder.unsupported(
                    Backend::Kxci4200,
                    op,
                    "width sweep requires segment-table upload, staged",
                ),
                Operation::RetentionTest => builder.unsupported(
                    Backend::Kxci4200,
                    op,
                    "retention requires long SMU hold, not available on PMU channel",
                ),
                Operation::TimedRead => builder.unsupported(
                    Backend::Kxci4200,
                    op,
                    "continuous timed read needs SMU channel (backend A)",
                ),
                _ => builder.supported(Backend::Kxci4200, op),
            };
        }
        builder
            .acquisition(Backend::Tsp2450, Acquisition::TwoPhase, Capability::Supported)
            .acquisition(Backend::Tsp2450, Acquisition::FreeRunning, Capability::Supported)
            .acquisition(
                Backend::Kxci4200,
                Acquisition::TwoPhase,
                Capability::Unsupported("KXCI scripts start on upload, no readiness signal".to_string()),
            )
            .acquisition(Backend::Kxci4200, Acquisition::FreeRunning, Capability::Supported)
            .build()
    }

    /// 从空表开始构建
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// 查询能力（未登记的组合视为不支持）
    pub fn capability(&self, backend: Backend, operation: Operation) -> Capability {
        self.entries
            .get(&(backend, operation))
            .cloned()
            .unwrap_or_else(|| Capability::Unsupported("not registered".to_string()))
    }

    /// 能力检查，不支持时返回原因
    pub fn check(&self, backend: Backend, operation: Operation) -> Result<(), String> {
        match self.capability(backend, operation) {
            Capability::Supported => Ok(()),
            Capability::Unsupported(reason) => Err(reason),
        }
    }

    pub fn is_supported(&self, backend: Backend, operation: Operation) -> bool {
        self.capability(backend, operation).is_supported()
    }

    /// 后端支持的全部操作（按 `Operation` 顺序）
    pub fn supported_operations(&self, backend: Backend) -> Vec<Operation> {
        Operation::ALL
            .into_iter()
            .filter(|op| self.is_supported(backend, *op))
            .collect()
    }

    /// 同步会话采集方式的能力（未登记视为不支持）
    pub fn acquisition(&self, backend: Backend, acquisition: Acquisition) -> Capability {
        self.acquisitions
            .get(&(backend, acquisition))
            .cloned()
            .unwrap_or_else(|| Capability::Unsupported("not registered".to_string()))
    }

    pub fn check_acquisition(&self, backend: Backend, acquisition: Acquisition) -> Result<(), String> {
        match self.acquisition(backend, acquisition) {
            Capability::Supported => Ok(()),
            Capability::Unsupported(reason) => Err(reason),
        }
    }

    /// 后端对某个时间参数的约定单位
    pub fn canonical_unit(&self, backend: Backend, param: &str) -> TimeUnit {
        backend.canonical_unit(param)
    }

    /// 遍历全部条目
    pub fn entries(&self) -> impl Iterator<Item = (Backend, Operation, &Capability)> {
        self.entries.iter().map(|((b, o), c)| (*b, *o, c))
    }
}

/// 注册表构建器
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    entries: BTreeMap<(Backend, Operation), Capability>,
    acquisitions: BTreeMap<(Backend, Acquisition), Capability>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从标准表开始，用于覆盖个别条目
    pub fn from_standard() -> Self {
        let standard = CapabilityRegistry::standard();
        Self {
            entries: standard.entries,
            acquisitions: standard.acquisitions,
        }
    }

    pub fn supported(mut self, backend: Backend, operation: Operation) -> Self {
        self.entries
            .insert((backend, operation), Capability::Supported);
        self
    }

    pub fn unsupported(
        mut self,
        backend: Backend,
        operation: Operation,
        reason: impl Into<String>,
    ) -> Self {
        self.entries
            .insert((backend, operation), Capability::Unsupported(reason.into()));
        self
    }

    /// 登记同步会话的采集方式
    pub fn acquisition(mut self, backend: Backend, acquisition: Acquisition, capability: Capability) -> Self {
        self.acquisitions.insert((backend, acquisition), capability);
        self
    }

    pub fn build(self) -> CapabilityRegistry {
        CapabilityRegistry {
            entries: self.entries,
            acquisitions: self.acquisitions,
        }
    }
}
