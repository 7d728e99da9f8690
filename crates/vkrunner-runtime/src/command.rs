//! Command buffer recording and queue submission.

use std::slice;

use ash::vk;
use tracing::debug;

use crate::action::{Action, BarrierDep, find_kernel};
use crate::error::{Result, RuntimeError, VkResultExt};

pub(crate) fn create_command_pool(
    device: &ash::Device,
    queue_family: u32,
) -> Result<vk::CommandPool> {
    let create_info = vk::CommandPoolCreateInfo::default().queue_family_index(queue_family);
    let pool =
        unsafe { device.create_command_pool(&create_info, None) }.called("vkCreateCommandPool")?;
    debug!("command pool created for queue family {queue_family}");
    Ok(pool)
}

/// Record the whole schedule into one freshly allocated primary command
/// buffer: barrier, bind and dispatch for launches, copies for transfers,
/// in schedule order.
pub(crate) fn record_schedule(
    device: &ash::Device,
    command_pool: vk::CommandPool,
    schedule: &[Action],
) -> Result<vk::CommandBuffer> {
    let allocate_info = vk::CommandBufferAllocateInfo::default()
        .command_pool(command_pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(1);
    let command_buffer = unsafe { device.allocate_command_buffers(&allocate_info) }
        .called("vkAllocateCommandBuffers")?[0];

    let begin_info =
        vk::CommandBufferBeginInfo::default().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
    unsafe { device.begin_command_buffer(command_buffer, &begin_info) }
        .called("vkBeginCommandBuffer")?;

    for action in schedule {
        match action {
            Action::LaunchKernel(kernel) => {
                let barriers = resolve_barriers(schedule, &kernel.deps)?;
                unsafe {
                    if !barriers.is_empty() {
                        device.cmd_pipeline_barrier(
                            command_buffer,
                            vk::PipelineStageFlags::COMPUTE_SHADER,
                            vk::PipelineStageFlags::COMPUTE_SHADER,
                            vk::DependencyFlags::empty(),
                            &[],
                            &barriers,
                            &[],
                        );
                    }
                    device.cmd_bind_pipeline(
                        command_buffer,
                        vk::PipelineBindPoint::COMPUTE,
                        kernel.pipeline,
                    );
                    device.cmd_bind_descriptor_sets(
                        command_buffer,
                        vk::PipelineBindPoint::COMPUTE,
                        kernel.pipeline_layout,
                        0,
                        &kernel.descriptor_sets,
                        &[],
                    );
                    device.cmd_dispatch(
                        command_buffer,
                        kernel.work_groups.x,
                        kernel.work_groups.y,
                        kernel.work_groups.z,
                    );
                }
            }
            Action::MemoryTransfer(transfer) => unsafe {
                device.cmd_copy_buffer(command_buffer, transfer.src, transfer.dst, &transfer.regions);
            },
        }
    }

    unsafe { device.end_command_buffer(command_buffer) }.called("vkEndCommandBuffer")?;
    debug!("schedule recorded: {} action(s)", schedule.len());
    Ok(command_buffer)
}

/// Resolve a launch's dependencies into compute-to-compute buffer barriers
/// on the producing launches' buffers.
fn resolve_barriers(
    schedule: &[Action],
    deps: &[BarrierDep],
) -> Result<Vec<vk::BufferMemoryBarrier<'static>>> {
    deps.iter()
        .map(|dep| {
            let kernel = find_kernel(schedule, dep.kernel_index)
                .ok_or(RuntimeError::InvalidKernelIndex { index: dep.kernel_index })?;
            let buffer = kernel
                .set0_buffer(u64::from(dep.binding))
                .ok_or(RuntimeError::MissingBinding { set: 0, binding: dep.binding })?;
            Ok(vk::BufferMemoryBarrier::default()
                .src_access_mask(vk::AccessFlags::SHADER_WRITE)
                .dst_access_mask(vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .buffer(buffer.buffer)
                .offset(0)
                .size(vk::WHOLE_SIZE))
        })
        .collect()
}

/// Submit every recorded command buffer in one batch, no semaphores, and
/// block until the queue drains.
pub(crate) fn submit_and_wait(
    device: &ash::Device,
    queue: vk::Queue,
    command_buffers: &[vk::CommandBuffer],
) -> Result<()> {
    let submit_info = vk::SubmitInfo::default().command_buffers(command_buffers);
    unsafe { device.queue_submit(queue, slice::from_ref(&submit_info), vk::Fence::null()) }
        .called("vkQueueSubmit")?;
    unsafe { device.queue_wait_idle(queue) }.called("vkQueueWaitIdle")?;
    Ok(())
}
