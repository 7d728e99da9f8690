//! C ABI for driving the Vulkan execution engine from compiler-generated
//! host code.
//!
//! The compiler rewrites each high-level `vulkanLaunch(gridX, gridY,
//! gridZ, memref…)` call carrying `spirv_blob` and `spirv_entry_point`
//! attributes into the sequence:
//!
//! 1. [`createLaunchKernelAction`] with the blob (emitted as a private
//!    byte-array global), its length, the NUL-terminated entry-point name
//!    and the grid sizes;
//! 2. one [`bindMemRef1DFloat`] / [`bindMemRef2DFloat`] call per memref
//!    operand in argument order, on descriptor set 0 starting at
//!    binding 0;
//! 3. [`setLaunchKernelAction`].
//!
//! The lowering declares whichever of these external symbols the module
//! does not already carry. Cross-kernel copies and the final
//! [`submitCommandBuffers`] are emitted by the surrounding host program.
//!
//! Every entry point takes the opaque manager pointer returned by
//! [`initVulkan`] and serialises on its mutex. Failures never cross the C
//! boundary: they are logged and the call returns normally.

// Exported symbol names follow the compiler's calling convention.
#![allow(non_snake_case)]

mod memref;

use std::ffi::{CStr, c_char};
use std::sync::Mutex;

use tracing::error;
use vkrunner_runtime::{HostBuffer, NumWorkGroups, VulkanRuntime};

pub use memref::{MemRef1DFloat, MemRef2DFloat};

/// One runtime behind one mutex. Every exported function holds the lock
/// for the full duration of the underlying runtime call.
pub struct VulkanRuntimeManager {
    runtime: Mutex<VulkanRuntime>,
}

impl VulkanRuntimeManager {
    fn new() -> Option<Self> {
        match VulkanRuntime::new() {
            Ok(runtime) => Some(Self { runtime: Mutex::new(runtime) }),
            Err(err) => {
                error!("initVulkan: {err}");
                None
            }
        }
    }

    fn with_runtime(&self, f: impl FnOnce(&mut VulkanRuntime)) {
        match self.runtime.lock() {
            Ok(mut runtime) => f(&mut runtime),
            Err(_) => error!("Vulkan runtime mutex poisoned"),
        }
    }
}

/// Create a manager wrapping one initialised Vulkan runtime.
///
/// Returns null when the runtime cannot be brought up (no loader, no
/// physical device, no compute queue, no mappable memory). The pointer is
/// owned by the caller and must be released with [`deinitVulkan`].
#[unsafe(no_mangle)]
pub extern "C" fn initVulkan() -> *mut VulkanRuntimeManager {
    match VulkanRuntimeManager::new() {
        Some(manager) => Box::into_raw(Box::new(manager)),
        None => std::ptr::null_mut(),
    }
}

/// Destroy a manager created by [`initVulkan`], waiting for the device to
/// go idle and releasing every Vulkan object the runtime owns.
///
/// # Safety
/// `manager` must be null or a pointer previously returned by
/// [`initVulkan`] that has not been freed yet.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn deinitVulkan(manager: *mut VulkanRuntimeManager) {
    if !manager.is_null() {
        drop(unsafe { Box::from_raw(manager) });
    }
}

/// Begin a kernel launch: fresh action, SPIR-V blob, entry point and
/// workgroup counts in one locked call.
///
/// # Safety
/// - `manager` must be null (ignored) or a live [`initVulkan`] pointer
/// - `shader` must point to `size` readable bytes of SPIR-V, 4-byte
///   aligned, valid until [`setLaunchKernelAction`] returns
/// - `entry_point` must be a NUL-terminated string
#[unsafe(no_mangle)]
pub unsafe extern "C" fn createLaunchKernelAction(
    manager: *mut VulkanRuntimeManager,
    shader: *const u8,
    size: u32,
    entry_point: *const c_char,
    x: u32,
    y: u32,
    z: u32,
) {
    let Some(manager) = (unsafe { manager.as_ref() }) else {
        error!("createLaunchKernelAction: null manager");
        return;
    };
    if shader.is_null() || entry_point.is_null() {
        error!("createLaunchKernelAction: null shader or entry point");
        return;
    }
    let entry_point = unsafe { CStr::from_ptr(entry_point) };

    manager.with_runtime(|runtime| {
        runtime.create_launch_kernel_action();
        unsafe { runtime.set_shader_module(shader, size) };
        runtime.set_entry_point(entry_point);
        runtime.set_num_work_groups(NumWorkGroups { x, y, z });
    });
}

/// Append a copy between the set-0 buffers of two launches, naming each
/// launch by its position among the schedule's launches. An index one
/// past the last scheduled launch names the launch under construction.
///
/// # Safety
/// `manager` must be null (ignored) or a live [`initVulkan`] pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn createMemoryTransferAction(
    manager: *mut VulkanRuntimeManager,
    src_index: u64,
    src_binding: u64,
    dst_index: u64,
    dst_binding: u64,
) {
    let Some(manager) = (unsafe { manager.as_ref() }) else {
        error!("createMemoryTransferAction: null manager");
        return;
    };
    manager.with_runtime(|runtime| {
        if let Err(err) = runtime.create_memory_transfer_action_between_kernels(
            src_index,
            src_binding,
            dst_index,
            dst_binding,
        ) {
            error!("createMemoryTransferAction: {err}");
        }
    });
}

/// Materialise the launch under construction and move it onto the
/// schedule.
///
/// On failure the action stays current, partially materialised, and the
/// manager should be treated as poisoned: tear it down with
/// [`deinitVulkan`] rather than submitting.
///
/// # Safety
/// `manager` must be null (ignored) or a live [`initVulkan`] pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn setLaunchKernelAction(manager: *mut VulkanRuntimeManager) {
    let Some(manager) = (unsafe { manager.as_ref() }) else {
        error!("setLaunchKernelAction: null manager");
        return;
    };
    manager.with_runtime(|runtime| {
        if let Err(err) = runtime.set_launch_kernel_action() {
            error!("setLaunchKernelAction: {err}");
            return;
        }
        if let Err(err) = runtime.add_launch_action_to_schedule() {
            error!("setLaunchKernelAction: {err}");
        }
    });
}

/// Alias of [`setLaunchKernelAction`], kept for lowerings that reference
/// the older symbol name.
///
/// # Safety
/// Same contract as [`setLaunchKernelAction`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn runOnVulkan(manager: *mut VulkanRuntimeManager) {
    unsafe { setLaunchKernelAction(manager) }
}

/// Record the schedule, submit it to the compute queue, wait for the
/// queue to drain, and copy results back into the bound host buffers.
///
/// # Safety
/// `manager` must be null (ignored) or a live [`initVulkan`] pointer;
/// every host buffer bound since the last submit must still be live.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn submitCommandBuffers(manager: *mut VulkanRuntimeManager) {
    let Some(manager) = (unsafe { manager.as_ref() }) else {
        error!("submitCommandBuffers: null manager");
        return;
    };
    manager.with_runtime(|runtime| {
        if let Err(err) = runtime.submit_command_buffers() {
            error!("submitCommandBuffers: {err}");
        }
    });
}

/// Bind a 1-D `f32` memref at `(set, binding)` of the launch under
/// construction, with storage class `StorageBuffer`.
///
/// # Safety
/// - `manager` must be null (ignored) or a live [`initVulkan`] pointer
/// - `memref` must be null (ignored) or point to a valid descriptor whose
///   `allocated` buffer stays live and writable until
///   [`submitCommandBuffers`] returns
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bindMemRef1DFloat(
    manager: *mut VulkanRuntimeManager,
    set: u32,
    binding: u32,
    memref: *const MemRef1DFloat,
) {
    let Some(manager) = (unsafe { manager.as_ref() }) else {
        error!("bindMemRef1DFloat: null manager");
        return;
    };
    let Some(memref) = (unsafe { memref.as_ref() }) else {
        error!("bindMemRef1DFloat: null memref");
        return;
    };
    let host = unsafe { HostBuffer::new(memref.allocated.cast::<u8>(), memref.size_bytes()) };
    manager.with_runtime(|runtime| runtime.set_resource_data_binding(set, binding, host));
}

/// Bind a 2-D `f32` memref at `(set, binding)` of the launch under
/// construction, with storage class `StorageBuffer`.
///
/// # Safety
/// Same contract as [`bindMemRef1DFloat`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bindMemRef2DFloat(
    manager: *mut VulkanRuntimeManager,
    set: u32,
    binding: u32,
    memref: *const MemRef2DFloat,
) {
    let Some(manager) = (unsafe { manager.as_ref() }) else {
        error!("bindMemRef2DFloat: null manager");
        return;
    };
    let Some(memref) = (unsafe { memref.as_ref() }) else {
        error!("bindMemRef2DFloat: null memref");
        return;
    };
    let host = unsafe { HostBuffer::new(memref.allocated.cast::<u8>(), memref.size_bytes()) };
    manager.with_runtime(|runtime| runtime.set_resource_data_binding(set, binding, host));
}
