//! capabilities 命令

use super::print_json;
use anyhow::Result;
use clap::Args;
use memtest_sdk::instrument::{Acquisition, Capability, CapabilityRegistry};
use memtest_sdk::{Backend, Operation};
use serde_json::{Value, json};

#[derive(Args, Debug)]
pub struct CapabilitiesCommand {
    /// 只列出一个后端（`keithley2450` / `keithley4200a`）
    #[arg(short, long)]
    pub backend: Option<Backend>,
}

impl CapabilitiesCommand {
    pub fn execute(&self) -> Result<()> {
        let registry = CapabilityRegistry::standard();
        let backends: Vec<Backend> = match self.backend {
            Some(backend) => vec![backend],
            None => Backend::ALL.to_vec(),
        };

        let table: Vec<Value> = backends
            .into_iter()
            .map(|backend| {
                let operations: Vec<Value> = Operation::ALL
                    .into_iter()
                    .map(|op| entry("operation", op.as_str(), registry.capability(backend, op)))
                    .collect();
                let acquisitions: Vec<Value> = Acquisition::ALL
                    .into_iter()
                    .map(|acq| {
                        entry("acquisition", &acq.to_string(), registry.acquisition(backend, acq))
                    })
                    .collect();
                json!({
                    "backend": backend.as_str(),
                    "system": backend.system_name(),
                    "operations": operations,
                    "acquisitions": acquisitions,
                })
            })
            .collect();
        print_json(&table)
    }
}

fn entry(key: &str, name: &str, capability: Capability) -> Value {
    match capability {
        Capability::Supported => json!({ key: name, "supported": true }),
        Capability::Unsupported(reason) => json!({
            key: name,
            "supported": false,
            "reason": reason,
        }),
    }
}
