//! Error types for the Vulkan execution engine.

use ash::vk;
use thiserror::Error;

use crate::buffer::StorageClass;

/// Errors surfaced by the execution engine.
///
/// Every Vulkan entry point that returns a result code is wrapped so a
/// non-success code carries the name of the failing call.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// A Vulkan API call returned a non-success code.
    #[error("{call} failed: {result}")]
    Api { call: &'static str, result: vk::Result },

    /// The Vulkan loader could not be opened.
    #[error("failed to load Vulkan loader: {0}")]
    Loader(String),

    /// `vkEnumeratePhysicalDevices` reported zero devices.
    #[error("no Vulkan physical device found")]
    NoPhysicalDevice,

    /// No queue family supports compute.
    #[error("cannot find a queue family with compute support")]
    NoComputeQueue,

    /// No host-visible, host-coherent memory type can hold the staged data.
    #[error("no host-visible coherent memory type can hold {required} bytes")]
    NoSuitableMemoryType { required: vk::DeviceSize },

    /// An operation that needs a launch under construction found none.
    #[error("no kernel launch is under construction")]
    NoCurrentAction,

    /// A launch was finalised without any bound resource.
    #[error("a kernel launch needs at least one resource")]
    NoResources,

    /// A launch was finalised without a SPIR-V binary.
    #[error("SPIR-V binary must be present with a non-zero size")]
    MissingShader,

    /// A launch was finalised without an entry-point name.
    #[error("kernel entry point name is not set")]
    MissingEntryPoint,

    /// A bound host buffer reported a size of zero bytes.
    #[error("expected buffer size greater than zero for resource ({set}, {binding})")]
    ZeroSizedBuffer { set: u32, binding: u32 },

    /// A bound resource has no storage class registered for it.
    #[error("no storage class registered for resource ({set}, {binding})")]
    MissingStorageClass { set: u32, binding: u32 },

    /// The registered storage class cannot back a descriptor binding.
    #[error("storage class {class:?} cannot back a descriptor binding")]
    UnsupportedStorageClass { class: StorageClass },

    /// No layout bindings were recorded for a materialised descriptor set.
    #[error("no layout bindings recorded for descriptor set {set}")]
    MissingLayoutBindings { set: u32 },

    /// Descriptor sets and their bookkeeping records went out of step.
    #[error("every descriptor set needs matching set information: {sets} sets, {infos} records")]
    DescriptorSetInfoMismatch { sets: usize, infos: usize },

    /// A transfer named a kernel index with no corresponding launch.
    #[error("kernel index {index} does not name a scheduled launch")]
    InvalidKernelIndex { index: u64 },

    /// A transfer or barrier named a binding with no device buffer.
    #[error("no device buffer at binding {binding} of descriptor set {set}")]
    MissingBinding { set: u32, binding: u32 },

    /// A transfer was requested between buffers of different sizes.
    #[error("transfer between buffers of different sizes: {src} vs {dst}")]
    TransferSizeMismatch { src: u32, dst: u32 },
}

/// Convenience result type for the execution engine.
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Tags a raw Vulkan result with the name of the call that produced it.
pub(crate) trait VkResultExt<T> {
    fn called(self, call: &'static str) -> Result<T>;
}

impl<T> VkResultExt<T> for ash::prelude::VkResult<T> {
    fn called(self, call: &'static str) -> Result<T> {
        self.map_err(|result| RuntimeError::Api { call, result })
    }
}
