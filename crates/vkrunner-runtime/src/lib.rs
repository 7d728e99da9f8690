//! Vulkan compute execution engine for ahead-of-time compiled SPIR-V
//! kernels.
//!
//! A host program builds a schedule of kernel launches and buffer
//! transfers; the engine materialises the Vulkan objects each launch
//! needs (device buffers, descriptor sets, compute pipeline), records the
//! whole schedule into one primary command buffer, submits it to a single
//! compute queue, and copies results back into caller-owned host buffers.
//!
//! The C surface used by compiler-generated host code lives in the
//! companion `vkrunner-ffi` crate.

mod action;
mod buffer;
mod command;
mod device;
mod error;
mod instance;
mod pipeline;
mod runtime;

pub use action::{Action, BarrierDep, LaunchKernelAction, MemoryTransferAction, NumWorkGroups};
pub use buffer::{HostBuffer, ResourceData, ResourceStorageClassMap, StorageClass};
pub use device::{best_compute_queue_family, find_memory_type_index};
pub use error::{Result, RuntimeError};
pub use instance::InstanceConfig;
pub use runtime::VulkanRuntime;
