//! Pipeline assembly: from materialised buffers to written descriptor sets.

use std::slice;

use ash::vk;
use tracing::debug;

use crate::action::{DescriptorSetInfo, LaunchKernelAction};
use crate::buffer::DeviceBuffer;
use crate::error::{Result, RuntimeError, VkResultExt};

/// Turn a launch action's device buffers and SPIR-V blob into a
/// dispatchable compute pipeline with allocated, written descriptor sets.
///
/// Runs after the device buffers exist; every step must succeed before
/// the next one starts.
pub(crate) fn assemble(device: &ash::Device, action: &mut LaunchKernelAction) -> Result<()> {
    create_shader_module(device, action)?;
    init_layout_bindings(action);
    create_descriptor_set_layouts(device, action)?;
    create_pipeline_layout(device, action)?;
    create_compute_pipeline(device, action)?;
    create_descriptor_pool(device, action)?;
    allocate_descriptor_sets(device, action)?;
    write_descriptor_sets(device, action)?;
    debug!("pipeline assembled over {} descriptor set(s)", action.descriptor_sets.len());
    Ok(())
}

fn create_shader_module(device: &ash::Device, action: &mut LaunchKernelAction) -> Result<()> {
    // codeSize is the exact byte size of the blob; the byte pointer is
    // reinterpreted as SPIR-V words.
    let create_info = vk::ShaderModuleCreateInfo {
        code_size: action.binary_size as usize,
        p_code: action.binary.cast::<u32>(),
        ..Default::default()
    };
    action.shader_module =
        unsafe { device.create_shader_module(&create_info, None) }.called("vkCreateShaderModule")?;
    Ok(())
}

/// Layout bindings for one set's buffers: one descriptor per binding,
/// visible to the compute stage, typed after the buffer.
pub(crate) fn layout_bindings_for(
    buffers: &[DeviceBuffer],
) -> Vec<vk::DescriptorSetLayoutBinding<'static>> {
    buffers
        .iter()
        .map(|buffer| {
            vk::DescriptorSetLayoutBinding::default()
                .binding(buffer.binding)
                .descriptor_type(buffer.descriptor_type)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::COMPUTE)
        })
        .collect()
}

fn init_layout_bindings(action: &mut LaunchKernelAction) {
    let LaunchKernelAction { device_buffers, layout_bindings, .. } = action;
    *layout_bindings = device_buffers
        .iter()
        .map(|(&set_index, buffers)| (set_index, layout_bindings_for(buffers)))
        .collect();
}

fn create_descriptor_set_layouts(
    device: &ash::Device,
    action: &mut LaunchKernelAction,
) -> Result<()> {
    let LaunchKernelAction {
        device_buffers,
        layout_bindings,
        descriptor_set_layouts,
        descriptor_set_info,
        ..
    } = action;

    for (&set_index, buffers) in device_buffers.iter() {
        // Every binding in a set shares one descriptor type; the first
        // buffer's type stands for the whole set.
        let Some(first) = buffers.first() else { continue };
        let Some(bindings) = layout_bindings.get(&set_index) else {
            return Err(RuntimeError::MissingLayoutBindings { set: set_index });
        };

        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);
        let layout = unsafe { device.create_descriptor_set_layout(&create_info, None) }
            .called("vkCreateDescriptorSetLayout")?;

        descriptor_set_layouts.push(layout);
        descriptor_set_info.push(DescriptorSetInfo {
            set_index,
            descriptor_count: buffers.len() as u32,
            descriptor_type: first.descriptor_type,
        });
    }
    Ok(())
}

fn create_pipeline_layout(device: &ash::Device, action: &mut LaunchKernelAction) -> Result<()> {
    // All descriptor set layouts, no push constants.
    let create_info =
        vk::PipelineLayoutCreateInfo::default().set_layouts(&action.descriptor_set_layouts);
    let layout = unsafe { device.create_pipeline_layout(&create_info, None) }
        .called("vkCreatePipelineLayout")?;
    action.pipeline_layout = layout;
    Ok(())
}

fn create_compute_pipeline(device: &ash::Device, action: &mut LaunchKernelAction) -> Result<()> {
    let Some(entry_point) = action.entry_point.as_deref() else {
        return Err(RuntimeError::MissingEntryPoint);
    };

    let stage = vk::PipelineShaderStageCreateInfo::default()
        .stage(vk::ShaderStageFlags::COMPUTE)
        .module(action.shader_module)
        .name(entry_point);
    let create_info =
        vk::ComputePipelineCreateInfo::default().stage(stage).layout(action.pipeline_layout);

    let pipelines = unsafe {
        device.create_compute_pipelines(
            vk::PipelineCache::null(),
            slice::from_ref(&create_info),
            None,
        )
    }
    .map_err(|(_, result)| RuntimeError::Api { call: "vkCreateComputePipelines", result })?;
    action.pipeline = pipelines[0];
    Ok(())
}

fn create_descriptor_pool(device: &ash::Device, action: &mut LaunchKernelAction) -> Result<()> {
    let pool_sizes: Vec<vk::DescriptorPoolSize> = action
        .descriptor_set_info
        .iter()
        .map(|info| {
            vk::DescriptorPoolSize::default()
                .ty(info.descriptor_type)
                .descriptor_count(info.descriptor_count)
        })
        .collect();

    let create_info = vk::DescriptorPoolCreateInfo::default()
        .max_sets(pool_sizes.len() as u32)
        .pool_sizes(&pool_sizes);
    let pool = unsafe { device.create_descriptor_pool(&create_info, None) }
        .called("vkCreateDescriptorPool")?;
    action.descriptor_pool = pool;
    Ok(())
}

fn allocate_descriptor_sets(device: &ash::Device, action: &mut LaunchKernelAction) -> Result<()> {
    let allocate_info = vk::DescriptorSetAllocateInfo::default()
        .descriptor_pool(action.descriptor_pool)
        .set_layouts(&action.descriptor_set_layouts);
    let sets = unsafe { device.allocate_descriptor_sets(&allocate_info) }
        .called("vkAllocateDescriptorSets")?;
    action.descriptor_sets = sets;
    Ok(())
}

fn write_descriptor_sets(device: &ash::Device, action: &LaunchKernelAction) -> Result<()> {
    if action.descriptor_sets.len() != action.descriptor_set_info.len() {
        return Err(RuntimeError::DescriptorSetInfoMismatch {
            sets: action.descriptor_sets.len(),
            infos: action.descriptor_set_info.len(),
        });
    }

    for (info, &descriptor_set) in action.descriptor_set_info.iter().zip(&action.descriptor_sets) {
        let Some(buffers) = action.device_buffers.get(&info.set_index) else { continue };
        for buffer in buffers {
            let write = vk::WriteDescriptorSet::default()
                .dst_set(descriptor_set)
                .dst_binding(buffer.binding)
                .dst_array_element(0)
                .descriptor_type(buffer.descriptor_type)
                .buffer_info(slice::from_ref(&buffer.buffer_info));
            unsafe { device.update_descriptor_sets(slice::from_ref(&write), &[]) };
        }
    }
    Ok(())
}
