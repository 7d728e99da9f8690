//! Host buffer descriptions and their device-memory counterparts.

use ash::vk;
use indexmap::IndexMap;
use tracing::debug;

use crate::error::{Result, RuntimeError, VkResultExt};

/// Caller-owned host memory bound to one descriptor binding.
#[derive(Debug, Clone, Copy)]
pub struct HostBuffer {
    ptr: *mut u8,
    size: u32,
}

impl HostBuffer {
    /// Describe a caller-owned region of host memory.
    ///
    /// # Safety
    /// `ptr` must point to `size` readable and writable bytes that stay
    /// valid until the submission that reads results back has returned.
    pub unsafe fn new(ptr: *mut u8, size: u32) -> Self {
        Self { ptr, size }
    }

    pub fn ptr(&self) -> *mut u8 {
        self.ptr
    }

    pub fn size(&self) -> u32 {
        self.size
    }
}

/// Host resources keyed by descriptor set, then binding.
///
/// Insertion order is preserved and defines the positional order used when
/// descriptors are written.
pub type ResourceData = IndexMap<u32, IndexMap<u32, HostBuffer>>;

/// Storage classes in the same shape as [`ResourceData`]. Every binding in
/// the resource data must have a matching entry here.
pub type ResourceStorageClassMap = IndexMap<u32, IndexMap<u32, StorageClass>>;

/// SPIR-V storage class declared for a resource by the compiler.
///
/// Only `StorageBuffer` and `Uniform` can back a descriptor binding; the
/// other classes never reach the runtime from a well-formed kernel but are
/// representable so that the mismatch fails cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageClass {
    StorageBuffer,
    Uniform,
    Workgroup,
    PushConstant,
    Private,
    Function,
}

impl StorageClass {
    /// Descriptor type used for buffers of this class.
    pub fn descriptor_type(self) -> Result<vk::DescriptorType> {
        match self {
            StorageClass::StorageBuffer => Ok(vk::DescriptorType::STORAGE_BUFFER),
            StorageClass::Uniform => Ok(vk::DescriptorType::UNIFORM_BUFFER),
            class => Err(RuntimeError::UnsupportedStorageClass { class }),
        }
    }

    /// Buffer usage flag for buffers of this class.
    pub fn buffer_usage(self) -> Result<vk::BufferUsageFlags> {
        match self {
            StorageClass::StorageBuffer => Ok(vk::BufferUsageFlags::STORAGE_BUFFER),
            StorageClass::Uniform => Ok(vk::BufferUsageFlags::UNIFORM_BUFFER),
            class => Err(RuntimeError::UnsupportedStorageClass { class }),
        }
    }
}

/// Device-side materialisation of one host buffer.
#[derive(Debug)]
pub struct DeviceBuffer {
    pub(crate) binding: u32,
    pub(crate) memory: vk::DeviceMemory,
    pub(crate) buffer: vk::Buffer,
    pub(crate) buffer_info: vk::DescriptorBufferInfo,
    pub(crate) size: u32,
    pub(crate) descriptor_type: vk::DescriptorType,
}

/// Sum every host buffer size in `resources`. Zero-sized buffers are
/// rejected before anything touches the device.
pub(crate) fn count_memory_size(resources: &ResourceData) -> Result<vk::DeviceSize> {
    let mut total: vk::DeviceSize = 0;
    for (&set, bindings) in resources {
        for (&binding, host) in bindings {
            if host.size() == 0 {
                return Err(RuntimeError::ZeroSizedBuffer { set, binding });
            }
            total += vk::DeviceSize::from(host.size());
        }
    }
    Ok(total)
}

/// Allocate device memory for one binding, stage the host bytes into it,
/// and wrap it in a buffer bound at offset 0.
pub(crate) fn create_device_buffer(
    device: &ash::Device,
    memory_type_index: u32,
    queue_family: u32,
    binding: u32,
    class: StorageClass,
    host: HostBuffer,
) -> Result<DeviceBuffer> {
    let descriptor_type = class.descriptor_type()?;
    let usage = class.buffer_usage()?;
    let size = vk::DeviceSize::from(host.size());

    let allocate_info = vk::MemoryAllocateInfo::default()
        .allocation_size(size)
        .memory_type_index(memory_type_index);
    let memory =
        unsafe { device.allocate_memory(&allocate_info, None) }.called("vkAllocateMemory")?;

    let payload = unsafe { device.map_memory(memory, 0, size, vk::MemoryMapFlags::empty()) }
        .called("vkMapMemory")?;
    unsafe {
        std::ptr::copy_nonoverlapping(host.ptr(), payload.cast::<u8>(), host.size() as usize);
        device.unmap_memory(memory);
    }

    let queue_families = [queue_family];
    let buffer_info = vk::BufferCreateInfo::default()
        .size(size)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .queue_family_indices(&queue_families);
    let buffer = unsafe { device.create_buffer(&buffer_info, None) }.called("vkCreateBuffer")?;
    unsafe { device.bind_buffer_memory(buffer, memory, 0) }.called("vkBindBufferMemory")?;

    let descriptor_info = vk::DescriptorBufferInfo::default()
        .buffer(buffer)
        .offset(0)
        .range(vk::WHOLE_SIZE);

    debug!("device buffer created for binding {binding} ({size} bytes, {descriptor_type:?})");

    Ok(DeviceBuffer {
        binding,
        memory,
        buffer,
        buffer_info: descriptor_info,
        size: host.size(),
        descriptor_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(bytes: &mut [u8]) -> HostBuffer {
        unsafe { HostBuffer::new(bytes.as_mut_ptr(), bytes.len() as u32) }
    }

    #[test]
    fn storage_buffer_maps_to_storage_descriptor_and_usage() {
        let class = StorageClass::StorageBuffer;
        assert_eq!(class.descriptor_type().unwrap(), vk::DescriptorType::STORAGE_BUFFER);
        assert_eq!(class.buffer_usage().unwrap(), vk::BufferUsageFlags::STORAGE_BUFFER);
    }

    #[test]
    fn uniform_maps_to_uniform_descriptor_and_usage() {
        let class = StorageClass::Uniform;
        assert_eq!(class.descriptor_type().unwrap(), vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(class.buffer_usage().unwrap(), vk::BufferUsageFlags::UNIFORM_BUFFER);
    }

    #[test]
    fn non_buffer_classes_are_rejected() {
        for class in [
            StorageClass::Workgroup,
            StorageClass::PushConstant,
            StorageClass::Private,
            StorageClass::Function,
        ] {
            assert!(matches!(
                class.descriptor_type(),
                Err(RuntimeError::UnsupportedStorageClass { .. })
            ));
            assert!(matches!(
                class.buffer_usage(),
                Err(RuntimeError::UnsupportedStorageClass { .. })
            ));
        }
    }

    #[test]
    fn memory_size_sums_across_sets_and_bindings() {
        let mut a = [0u8; 16];
        let mut b = [0u8; 32];
        let mut c = [0u8; 8];

        let mut resources = ResourceData::default();
        resources.entry(0).or_default().insert(0, host(&mut a));
        resources.entry(0).or_default().insert(1, host(&mut b));
        resources.entry(1).or_default().insert(0, host(&mut c));

        assert_eq!(count_memory_size(&resources).unwrap(), 56);
    }

    #[test]
    fn zero_sized_buffer_is_rejected() {
        let mut resources = ResourceData::default();
        resources
            .entry(0)
            .or_default()
            .insert(3, unsafe { HostBuffer::new(std::ptr::null_mut(), 0) });

        assert!(matches!(
            count_memory_size(&resources),
            Err(RuntimeError::ZeroSizedBuffer { set: 0, binding: 3 })
        ));
    }
}
