//! ABI-level tests: null-pointer hygiene for every exported symbol, and
//! the compiler lowering call sequence end to end on a real device.

use std::ptr;

use vkrunner_ffi::{
    MemRef1DFloat, MemRef2DFloat, VulkanRuntimeManager, bindMemRef1DFloat, bindMemRef2DFloat,
    createLaunchKernelAction, createMemoryTransferAction, deinitVulkan, initVulkan, runOnVulkan,
    setLaunchKernelAction, submitCommandBuffers,
};

const NULL_MANAGER: *mut VulkanRuntimeManager = ptr::null_mut();

#[test]
fn every_entry_point_ignores_a_null_manager() {
    unsafe {
        deinitVulkan(NULL_MANAGER);
        createLaunchKernelAction(NULL_MANAGER, ptr::null(), 0, ptr::null(), 1, 1, 1);
        createMemoryTransferAction(NULL_MANAGER, 0, 0, 1, 0);
        setLaunchKernelAction(NULL_MANAGER);
        runOnVulkan(NULL_MANAGER);
        submitCommandBuffers(NULL_MANAGER);
        bindMemRef1DFloat(NULL_MANAGER, 0, 0, ptr::null());
        bindMemRef2DFloat(NULL_MANAGER, 0, 0, ptr::null());
    }
}

/// Hand-assembled SPIR-V 1.0 compute kernel, local size (1, 1, 1), entry
/// point `main`: doubles each element of the runtime float array at
/// descriptor set 0, binding 0.
#[rustfmt::skip]
const DOUBLE_KERNEL: [u32; 136] = [
    0x0723_0203, 0x0001_0000, 0x0000_0000, 23, 0,
    0x0002_0011, 1,
    0x0003_000E, 0, 1,
    0x0006_000F, 5, 1, 0x6E69_616D, 0x0000_0000, 2,
    0x0006_0010, 1, 17, 1, 1, 1,
    0x0004_0047, 2, 11, 28,
    0x0004_0047, 9, 6, 4,
    0x0005_0048, 10, 0, 35, 0,
    0x0003_0047, 10, 3,
    0x0004_0047, 12, 34, 0,
    0x0004_0047, 12, 33, 0,
    0x0002_0013, 3,
    0x0003_0021, 4, 3,
    0x0003_0016, 5, 32,
    0x0004_0015, 6, 32, 0,
    0x0004_0017, 7, 6, 3,
    0x0004_0020, 8, 1, 7,
    0x0004_003B, 8, 2, 1,
    0x0003_001D, 9, 5,
    0x0003_001E, 10, 9,
    0x0004_0020, 11, 2, 10,
    0x0004_003B, 11, 12, 2,
    0x0004_002B, 6, 13, 0,
    0x0004_002B, 5, 14, 0x4000_0000,
    0x0004_0020, 15, 2, 5,
    0x0004_0020, 16, 1, 6,
    0x0005_0036, 3, 1, 0, 4,
    0x0002_00F8, 17,
    0x0005_0041, 16, 18, 2, 13,
    0x0004_003D, 6, 19, 18,
    0x0006_0041, 15, 20, 12, 13, 19,
    0x0004_003D, 5, 21, 20,
    0x0005_0085, 5, 22, 21, 14,
    0x0003_003E, 20, 22,
    0x0001_00FD,
    0x0001_0038,
];

#[test]
#[ignore = "requires a Vulkan device"]
fn lowering_call_sequence_runs_a_kernel() {
    let mut data: Vec<f32> = (0..16).map(|v| v as f32).collect();
    let memref = MemRef1DFloat {
        allocated: data.as_mut_ptr(),
        aligned: data.as_mut_ptr(),
        offset: 0,
        sizes: [data.len() as i64],
        strides: [1],
    };

    let manager = initVulkan();
    assert!(!manager.is_null(), "no Vulkan device available");

    // The exact sequence the compiler emits for one vulkanLaunch call.
    unsafe {
        createLaunchKernelAction(
            manager,
            DOUBLE_KERNEL.as_ptr().cast(),
            std::mem::size_of_val(&DOUBLE_KERNEL) as u32,
            c"main".as_ptr(),
            16,
            1,
            1,
        );
        bindMemRef1DFloat(manager, 0, 0, &memref);
        setLaunchKernelAction(manager);
        submitCommandBuffers(manager);
        deinitVulkan(manager);
    }

    let expected: Vec<f32> = (0..16).map(|v| (v * 2) as f32).collect();
    assert_eq!(data, expected);
}

#[test]
#[ignore = "requires a Vulkan device"]
fn two_dimensional_memref_binds_by_total_size() {
    let mut data: Vec<f32> = (0..12).map(|v| v as f32).collect();
    let memref = MemRef2DFloat {
        allocated: data.as_mut_ptr(),
        aligned: data.as_mut_ptr(),
        offset: 0,
        sizes: [3, 4],
        strides: [4, 1],
    };

    let manager = initVulkan();
    assert!(!manager.is_null(), "no Vulkan device available");

    unsafe {
        createLaunchKernelAction(
            manager,
            DOUBLE_KERNEL.as_ptr().cast(),
            std::mem::size_of_val(&DOUBLE_KERNEL) as u32,
            c"main".as_ptr(),
            12,
            1,
            1,
        );
        bindMemRef2DFloat(manager, 0, 0, &memref);
        setLaunchKernelAction(manager);
        submitCommandBuffers(manager);
        deinitVulkan(manager);
    }

    let expected: Vec<f32> = (0..12).map(|v| (v * 2) as f32).collect();
    assert_eq!(data, expected);
}
