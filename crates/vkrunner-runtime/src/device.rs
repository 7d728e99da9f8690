//! Physical device, compute queue family, and memory type selection.

use std::ffi::CStr;

use ash::vk;
use tracing::{debug, info};

use crate::error::{Result, RuntimeError, VkResultExt};

/// Pick the queue family every operation will run on.
///
/// Families are walked in order with transfer and sparse-binding bits
/// masked out: the first compute family without graphics wins, then the
/// first family with compute at all.
pub fn best_compute_queue_family(families: &[vk::QueueFamilyProperties]) -> Option<u32> {
    let masked =
        |flags: vk::QueueFlags| flags & !(vk::QueueFlags::TRANSFER | vk::QueueFlags::SPARSE_BINDING);

    families
        .iter()
        .position(|family| {
            let flags = masked(family.queue_flags);
            flags.contains(vk::QueueFlags::COMPUTE) && !flags.intersects(vk::QueueFlags::GRAPHICS)
        })
        .or_else(|| {
            families
                .iter()
                .position(|family| masked(family.queue_flags).contains(vk::QueueFlags::COMPUTE))
        })
        .map(|index| index as u32)
}

/// First memory type that is host-visible, host-coherent, and whose heap
/// can hold `required` bytes.
pub fn find_memory_type_index(
    properties: &vk::PhysicalDeviceMemoryProperties,
    required: vk::DeviceSize,
) -> Option<u32> {
    let needed = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
    properties.memory_types[..properties.memory_type_count as usize]
        .iter()
        .enumerate()
        .find(|(_, memory_type)| {
            memory_type.property_flags.contains(needed)
                && properties.memory_heaps[memory_type.heap_index as usize].size >= required
        })
        .map(|(index, _)| index as u32)
}

/// Enumerate physical devices, take the first one, and resolve its compute
/// queue family.
pub(crate) fn select_physical_device(
    instance: &ash::Instance,
) -> Result<(vk::PhysicalDevice, u32)> {
    let devices = unsafe { instance.enumerate_physical_devices() }
        .called("vkEnumeratePhysicalDevices")?;
    let Some(&physical_device) = devices.first() else {
        return Err(RuntimeError::NoPhysicalDevice);
    };

    let families =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
    let queue_family =
        best_compute_queue_family(&families).ok_or(RuntimeError::NoComputeQueue)?;

    let properties = unsafe { instance.get_physical_device_properties(physical_device) };
    let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }.to_string_lossy();
    info!("selected Vulkan device: {name} (compute queue family {queue_family})");

    Ok((physical_device, queue_family))
}

/// Create the logical device with a single queue of priority 1.0 on the
/// chosen family, and fetch that queue.
pub(crate) fn create_logical_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_family: u32,
) -> Result<(ash::Device, vk::Queue)> {
    let priorities = [1.0_f32];
    let queue_infos = [vk::DeviceQueueCreateInfo::default()
        .queue_family_index(queue_family)
        .queue_priorities(&priorities)];
    let create_info = vk::DeviceCreateInfo::default().queue_create_infos(&queue_infos);

    let device = unsafe { instance.create_device(physical_device, &create_info, None) }
        .called("vkCreateDevice")?;
    let queue = unsafe { device.get_device_queue(queue_family, 0) };
    debug!("logical device created with one compute queue");

    Ok((device, queue))
}
