//! The execution engine: schedule construction, pipeline assembly,
//! submission, and teardown.

use std::ffi::CStr;

use ash::vk;
use tracing::{error, info};

use crate::action::{
    self, Action, BarrierDep, LaunchKernelAction, MemoryTransferAction, NumWorkGroups,
};
use crate::buffer::{self, HostBuffer, ResourceData, ResourceStorageClassMap, StorageClass};
use crate::command;
use crate::device;
use crate::error::{Result, RuntimeError, VkResultExt};
use crate::instance::{self, InstanceConfig};
use crate::pipeline;

/// Owns the Vulkan objects shared by every action and the schedule built
/// on top of them. One runtime drives one compute queue on one device.
///
/// Teardown happens on drop: the device is waited idle, then every object
/// is released in reverse creation order.
pub struct VulkanRuntime {
    #[allow(dead_code)]
    entry: ash::Entry,
    instance: ash::Instance,
    #[allow(dead_code)]
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
    queue_family_index: u32,
    queue: vk::Queue,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    memory_size: vk::DeviceSize,
    command_pool: vk::CommandPool,
    command_buffers: Vec<vk::CommandBuffer>,
    schedule: Vec<Action>,
    current_action: Option<Box<LaunchKernelAction>>,
}

impl VulkanRuntime {
    /// Bring up the loader, instance, device, compute queue and command
    /// pool.
    pub fn new() -> Result<Self> {
        let (entry, instance) = instance::create_instance(&InstanceConfig::default())?;

        let selected = device::select_physical_device(&instance).and_then(|(physical, family)| {
            let memory_properties =
                unsafe { instance.get_physical_device_memory_properties(physical) };
            // Fail fast on hosts with no mappable memory; the index is
            // recomputed against the accumulated size at allocation time.
            device::find_memory_type_index(&memory_properties, 0)
                .ok_or(RuntimeError::NoSuitableMemoryType { required: 0 })?;
            Ok((physical, family, memory_properties))
        });
        let (physical_device, queue_family_index, memory_properties) = match selected {
            Ok(parts) => parts,
            Err(err) => {
                unsafe { instance.destroy_instance(None) };
                return Err(err);
            }
        };

        let (device, queue) =
            match device::create_logical_device(&instance, physical_device, queue_family_index) {
                Ok(parts) => parts,
                Err(err) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(err);
                }
            };

        let command_pool = match command::create_command_pool(&device, queue_family_index) {
            Ok(pool) => pool,
            Err(err) => {
                unsafe {
                    device.destroy_device(None);
                    instance.destroy_instance(None);
                }
                return Err(err);
            }
        };

        info!("Vulkan runtime initialised");
        Ok(Self {
            entry,
            instance,
            physical_device,
            device,
            queue_family_index,
            queue,
            memory_properties,
            memory_size: 0,
            command_pool,
            command_buffers: Vec::new(),
            schedule: Vec::new(),
            current_action: None,
        })
    }

    /// Start building a new kernel launch.
    ///
    /// A launch already under construction that was never scheduled is
    /// dropped, releasing anything it had materialised.
    pub fn create_launch_kernel_action(&mut self) {
        if let Some(mut dropped) = self.current_action.take() {
            release_action(&self.device, &mut dropped);
        }
        self.current_action = Some(Box::new(LaunchKernelAction::new()));
    }

    /// Set the dispatch's workgroup counts.
    pub fn set_num_work_groups(&mut self, work_groups: NumWorkGroups) {
        let Some(action) = self.current_action.as_mut() else {
            error!("set_num_work_groups: no kernel launch under construction");
            return;
        };
        action.work_groups = work_groups;
    }

    /// Record the SPIR-V blob the launch will run.
    ///
    /// # Safety
    /// `binary` must point to `size` readable bytes, 4-byte aligned, that
    /// stay valid until the launch has been materialised.
    pub unsafe fn set_shader_module(&mut self, binary: *const u8, size: u32) {
        let Some(action) = self.current_action.as_mut() else {
            error!("set_shader_module: no kernel launch under construction");
            return;
        };
        action.binary = binary;
        action.binary_size = size;
    }

    /// Record the shader entry-point name. The name is copied.
    pub fn set_entry_point(&mut self, entry_point: &CStr) {
        let Some(action) = self.current_action.as_mut() else {
            error!("set_entry_point: no kernel launch under construction");
            return;
        };
        action.entry_point = Some(entry_point.to_owned());
    }

    /// Replace the launch's whole resource map. Storage classes are left
    /// untouched and must be supplied separately.
    pub fn set_resource_data(&mut self, resources: ResourceData) {
        let Some(action) = self.current_action.as_mut() else {
            error!("set_resource_data: no kernel launch under construction");
            return;
        };
        action.resource_data = resources;
    }

    /// Bind one host buffer at `(set, binding)`, defaulting its storage
    /// class to `StorageBuffer`.
    pub fn set_resource_data_binding(&mut self, set: u32, binding: u32, host: HostBuffer) {
        let Some(action) = self.current_action.as_mut() else {
            error!("set_resource_data_binding: no kernel launch under construction");
            return;
        };
        action.resource_data.entry(set).or_default().insert(binding, host);
        action
            .resource_storage_classes
            .entry(set)
            .or_default()
            .insert(binding, StorageClass::StorageBuffer);
    }

    /// Replace the launch's storage-class map.
    pub fn set_resource_storage_class_map(&mut self, classes: ResourceStorageClassMap) {
        let Some(action) = self.current_action.as_mut() else {
            error!("set_resource_storage_class_map: no kernel launch under construction");
            return;
        };
        action.resource_storage_classes = classes;
    }

    /// Order this launch after a write by an earlier launch: a buffer
    /// memory barrier on the producer's buffer is emitted before the
    /// dispatch.
    pub fn add_launch_dependency(&mut self, dep: BarrierDep) {
        let Some(action) = self.current_action.as_mut() else {
            error!("add_launch_dependency: no kernel launch under construction");
            return;
        };
        action.deps.push(dep);
    }

    /// Materialise the launch under construction: validate its resources,
    /// create and stage the device buffers, and assemble the compute
    /// pipeline with written descriptor sets.
    ///
    /// On failure the action stays current and partially materialised;
    /// the runtime should be torn down rather than reused.
    pub fn set_launch_kernel_action(&mut self) -> Result<()> {
        let Some(mut action) = self.current_action.take() else {
            return Err(RuntimeError::NoCurrentAction);
        };
        let result = self.materialise(&mut action);
        self.current_action = Some(action);
        result
    }

    fn materialise(&mut self, action: &mut LaunchKernelAction) -> Result<()> {
        let required = check_resource_data(action)?;
        self.memory_size += required;
        self.create_memory_buffers(action)?;
        pipeline::assemble(&self.device, action)
    }

    fn create_memory_buffers(&self, action: &mut LaunchKernelAction) -> Result<()> {
        let memory_type_index =
            device::find_memory_type_index(&self.memory_properties, self.memory_size)
                .ok_or(RuntimeError::NoSuitableMemoryType { required: self.memory_size })?;

        let LaunchKernelAction { resource_data, resource_storage_classes, device_buffers, .. } =
            action;

        for (&set_index, bindings) in resource_data.iter() {
            // Buffers land in the action as they are created, so teardown
            // sees everything even when a later binding fails.
            let buffers = device_buffers.entry(set_index).or_default();
            for (&binding, &host) in bindings.iter() {
                let class = resource_storage_classes
                    .get(&set_index)
                    .and_then(|classes| classes.get(&binding))
                    .copied()
                    .ok_or(RuntimeError::MissingStorageClass { set: set_index, binding })?;
                buffers.push(buffer::create_device_buffer(
                    &self.device,
                    memory_type_index,
                    self.queue_family_index,
                    binding,
                    class,
                    host,
                )?);
            }
        }
        Ok(())
    }

    /// Move the launch under construction onto the schedule.
    pub fn add_launch_action_to_schedule(&mut self) -> Result<()> {
        let Some(action) = self.current_action.take() else {
            return Err(RuntimeError::NoCurrentAction);
        };
        self.schedule.push(Action::LaunchKernel(action));
        Ok(())
    }

    /// Append a copy of `size` bytes between two device buffers.
    pub fn create_memory_transfer_action(
        &mut self,
        src: vk::Buffer,
        dst: vk::Buffer,
        size: vk::DeviceSize,
    ) {
        let region = vk::BufferCopy { src_offset: 0, dst_offset: 0, size };
        self.schedule.push(Action::MemoryTransfer(MemoryTransferAction {
            src,
            dst,
            regions: vec![region],
        }));
    }

    /// Append a copy between the set-0 buffers of two launches, naming the
    /// launches by their position among the schedule's launches. An index
    /// one past the last scheduled launch names the launch under
    /// construction.
    pub fn create_memory_transfer_action_between_kernels(
        &mut self,
        src_index: u64,
        src_binding: u64,
        dst_index: u64,
        dst_binding: u64,
    ) -> Result<()> {
        let (src, dst, size) = action::resolve_transfer(
            &self.schedule,
            self.current_action.as_deref(),
            src_index,
            src_binding,
            dst_index,
            dst_binding,
        )?;
        self.create_memory_transfer_action(src, dst, vk::DeviceSize::from(size));
        Ok(())
    }

    /// Record the schedule into a primary command buffer, submit it, wait
    /// for the queue to drain, and copy device results back into the
    /// bound host buffers.
    pub fn submit_command_buffers(&mut self) -> Result<()> {
        let command_buffer =
            command::record_schedule(&self.device, self.command_pool, &self.schedule)?;
        self.command_buffers.push(command_buffer);
        command::submit_and_wait(&self.device, self.queue, &self.command_buffers)?;
        self.update_host_memory_buffers()
    }

    fn update_host_memory_buffers(&self) -> Result<()> {
        for scheduled in &self.schedule {
            let Action::LaunchKernel(kernel) = scheduled else { continue };
            for (set_index, bindings) in &kernel.resource_data {
                let Some(device_buffers) = kernel.device_buffers.get(set_index) else { continue };
                for device_buffer in device_buffers {
                    let Some(host) = bindings.get(&device_buffer.binding) else { continue };
                    let payload = unsafe {
                        self.device.map_memory(
                            device_buffer.memory,
                            0,
                            vk::DeviceSize::from(host.size()),
                            vk::MemoryMapFlags::empty(),
                        )
                    }
                    .called("vkMapMemory")?;
                    unsafe {
                        std::ptr::copy_nonoverlapping(
                            payload.cast::<u8>(),
                            host.ptr(),
                            host.size() as usize,
                        );
                        self.device.unmap_memory(device_buffer.memory);
                    }
                }
            }
        }
        Ok(())
    }

    /// Total bytes of host data staged across every launch built so far.
    pub fn staged_memory_size(&self) -> vk::DeviceSize {
        self.memory_size
    }

    /// Number of actions on the schedule.
    pub fn scheduled_actions(&self) -> usize {
        self.schedule.len()
    }

    fn destroy(&mut self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.called("vkDeviceWaitIdle")?;

        unsafe {
            if !self.command_buffers.is_empty() {
                self.device.free_command_buffers(self.command_pool, &self.command_buffers);
            }
            self.device.destroy_command_pool(self.command_pool, None);
        }
        self.command_buffers.clear();

        for scheduled in &mut self.schedule {
            if let Action::LaunchKernel(kernel) = scheduled {
                release_action(&self.device, kernel);
            }
        }
        self.schedule.clear();
        if let Some(mut kernel) = self.current_action.take() {
            release_action(&self.device, &mut kernel);
        }

        unsafe {
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
        Ok(())
    }
}

impl Drop for VulkanRuntime {
    fn drop(&mut self) {
        if let Err(err) = self.destroy() {
            error!("Vulkan runtime teardown failed: {err}");
        }
    }
}

/// Validate a launch's declarative state and return the bytes it will
/// stage: at least one resource, a non-empty SPIR-V blob, no zero-sized
/// buffers.
fn check_resource_data(action: &LaunchKernelAction) -> Result<vk::DeviceSize> {
    if action.resource_data.is_empty() {
        return Err(RuntimeError::NoResources);
    }
    if action.binary.is_null() || action.binary_size == 0 {
        return Err(RuntimeError::MissingShader);
    }
    buffer::count_memory_size(&action.resource_data)
}

/// Release every Vulkan object a launch action owns. Null handles are
/// skipped by the driver, so partially materialised actions are fine.
fn release_action(device: &ash::Device, action: &mut LaunchKernelAction) {
    unsafe {
        device.destroy_descriptor_pool(action.descriptor_pool, None);
        device.destroy_pipeline(action.pipeline, None);
        device.destroy_pipeline_layout(action.pipeline_layout, None);
        for &layout in &action.descriptor_set_layouts {
            device.destroy_descriptor_set_layout(layout, None);
        }
        device.destroy_shader_module(action.shader_module, None);
        for buffers in action.device_buffers.values() {
            for buffer in buffers {
                device.destroy_buffer(buffer.buffer, None);
                device.free_memory(buffer.memory, None);
            }
        }
    }
    action.descriptor_sets.clear();
    action.descriptor_set_layouts.clear();
    action.device_buffers.clear();
}
