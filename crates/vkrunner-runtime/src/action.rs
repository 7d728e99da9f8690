//! Schedule actions: kernel launches and buffer-to-buffer transfers.

use std::ffi::CString;

use ash::vk;
use indexmap::IndexMap;

use crate::buffer::{DeviceBuffer, ResourceData, ResourceStorageClassMap};
use crate::error::{Result, RuntimeError};

/// Workgroup counts for one dispatch.
#[derive(Debug, Clone, Copy, Default)]
pub struct NumWorkGroups {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

/// Descriptor bookkeeping for one materialised set: which set it is, how
/// many bindings it holds, and the descriptor type they share.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DescriptorSetInfo {
    pub set_index: u32,
    pub descriptor_count: u32,
    pub descriptor_type: vk::DescriptorType,
}

/// Back-reference to a device buffer of another launch, resolved to a
/// buffer memory barrier when the schedule is recorded.
#[derive(Debug, Clone, Copy)]
pub struct BarrierDep {
    /// Position of the producing launch among the schedule's launches.
    pub kernel_index: u64,
    /// Binding in descriptor set 0 of the producing launch.
    pub binding: u32,
}

/// A compute dispatch, either under construction or scheduled.
///
/// The SPIR-V blob and the bound host buffers are borrowed from the
/// caller; everything under "materialised" is created by the pipeline
/// assembly pass and owned until runtime teardown.
pub struct LaunchKernelAction {
    pub(crate) binary: *const u8,
    pub(crate) binary_size: u32,
    pub(crate) entry_point: Option<CString>,
    pub(crate) work_groups: NumWorkGroups,
    pub(crate) resource_data: ResourceData,
    pub(crate) resource_storage_classes: ResourceStorageClassMap,
    pub(crate) deps: Vec<BarrierDep>,

    // Materialised state.
    pub(crate) device_buffers: IndexMap<u32, Vec<DeviceBuffer>>,
    pub(crate) layout_bindings: IndexMap<u32, Vec<vk::DescriptorSetLayoutBinding<'static>>>,
    pub(crate) descriptor_set_layouts: Vec<vk::DescriptorSetLayout>,
    pub(crate) pipeline_layout: vk::PipelineLayout,
    pub(crate) pipeline: vk::Pipeline,
    pub(crate) descriptor_pool: vk::DescriptorPool,
    pub(crate) descriptor_sets: Vec<vk::DescriptorSet>,
    pub(crate) descriptor_set_info: Vec<DescriptorSetInfo>,
    pub(crate) shader_module: vk::ShaderModule,
}

impl LaunchKernelAction {
    pub(crate) fn new() -> Self {
        Self {
            binary: std::ptr::null(),
            binary_size: 0,
            entry_point: None,
            work_groups: NumWorkGroups::default(),
            resource_data: ResourceData::default(),
            resource_storage_classes: ResourceStorageClassMap::default(),
            deps: Vec::new(),
            device_buffers: IndexMap::new(),
            layout_bindings: IndexMap::new(),
            descriptor_set_layouts: Vec::new(),
            pipeline_layout: vk::PipelineLayout::null(),
            pipeline: vk::Pipeline::null(),
            descriptor_pool: vk::DescriptorPool::null(),
            descriptor_sets: Vec::new(),
            descriptor_set_info: Vec::new(),
            shader_module: vk::ShaderModule::null(),
        }
    }

    /// Device buffer bound at `binding` of descriptor set 0, if that
    /// binding has been materialised.
    pub(crate) fn set0_buffer(&self, binding: u64) -> Option<&DeviceBuffer> {
        self.device_buffers
            .get(&0)?
            .iter()
            .find(|buffer| u64::from(buffer.binding) == binding)
    }
}

/// One copy between device buffers, recorded as `vkCmdCopyBuffer`.
pub struct MemoryTransferAction {
    pub(crate) src: vk::Buffer,
    pub(crate) dst: vk::Buffer,
    pub(crate) regions: Vec<vk::BufferCopy>,
}

/// Unit of scheduled work. The recorder pattern-matches over the variants
/// in schedule order.
pub enum Action {
    LaunchKernel(Box<LaunchKernelAction>),
    MemoryTransfer(MemoryTransferAction),
}

/// The `index`-th launch of the schedule, counting launch actions only.
pub(crate) fn find_kernel(schedule: &[Action], index: u64) -> Option<&LaunchKernelAction> {
    schedule
        .iter()
        .filter_map(|action| match action {
            Action::LaunchKernel(kernel) => Some(kernel.as_ref()),
            Action::MemoryTransfer(_) => None,
        })
        .nth(index as usize)
}

/// Number of launch actions in the schedule.
pub(crate) fn kernel_count(schedule: &[Action]) -> u64 {
    schedule.iter().filter(|action| matches!(action, Action::LaunchKernel(_))).count() as u64
}

/// Resolve the endpoints of a cross-kernel transfer.
///
/// An index equal to the number of scheduled launches names `current`.
/// Both lookups use descriptor set 0, and the two buffer sizes must be
/// equal.
pub(crate) fn resolve_transfer(
    schedule: &[Action],
    current: Option<&LaunchKernelAction>,
    src_index: u64,
    src_binding: u64,
    dst_index: u64,
    dst_binding: u64,
) -> Result<(vk::Buffer, vk::Buffer, u32)> {
    fn lookup<'a>(
        schedule: &'a [Action],
        current: Option<&'a LaunchKernelAction>,
        launches: u64,
        index: u64,
    ) -> Result<&'a LaunchKernelAction> {
        if index == launches {
            current.ok_or(RuntimeError::InvalidKernelIndex { index })
        } else {
            find_kernel(schedule, index).ok_or(RuntimeError::InvalidKernelIndex { index })
        }
    }

    let launches = kernel_count(schedule);
    let src_kernel = lookup(schedule, current, launches, src_index)?;
    let dst_kernel = lookup(schedule, current, launches, dst_index)?;

    let src = src_kernel
        .set0_buffer(src_binding)
        .ok_or(RuntimeError::MissingBinding { set: 0, binding: src_binding as u32 })?;
    let dst = dst_kernel
        .set0_buffer(dst_binding)
        .ok_or(RuntimeError::MissingBinding { set: 0, binding: dst_binding as u32 })?;

    if src.size != dst.size {
        return Err(RuntimeError::TransferSizeMismatch { src: src.size, dst: dst.size });
    }

    Ok((src.buffer, dst.buffer, dst.size))
}
