//! KubeVirt actuator resource types
//!
//! Typed models of the foreign resources the machine actuator reads and
//! writes: the tenant `Machine`, the infrastructure `VirtualMachine` and
//! `VirtualMachineInstance`, and the provider spec/status payloads.

pub mod kubevirt;
pub mod machine;
pub mod provider;

pub use kubevirt::*;
pub use machine::*;
pub use provider::*;
