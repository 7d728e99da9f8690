//! End-to-end tests against a real Vulkan device.
//!
//! All tests here are ignored by default; run them on a machine with a
//! Vulkan-capable GPU via `cargo test -- --ignored`.

use vkrunner_runtime::{
    BarrierDep, HostBuffer, NumWorkGroups, ResourceData, RuntimeError, VulkanRuntime,
};

/// Hand-assembled SPIR-V 1.0 compute kernel, local size (1, 1, 1).
///
/// Entry point `main` doubles each element of the runtime float array at
/// descriptor set 0, binding 0, indexed by the global invocation id:
/// `data[gid.x] *= 2.0`.
#[rustfmt::skip]
const DOUBLE_KERNEL: [u32; 136] = [
    // Header: magic, version 1.0, generator, bound, schema.
    0x0723_0203, 0x0001_0000, 0x0000_0000, 23, 0,
    // OpCapability Shader
    0x0002_0011, 1,
    // OpMemoryModel Logical GLSL450
    0x0003_000E, 0, 1,
    // OpEntryPoint GLCompute %1 "main" %2
    0x0006_000F, 5, 1, 0x6E69_616D, 0x0000_0000, 2,
    // OpExecutionMode %1 LocalSize 1 1 1
    0x0006_0010, 1, 17, 1, 1, 1,
    // OpDecorate %2 BuiltIn GlobalInvocationId
    0x0004_0047, 2, 11, 28,
    // OpDecorate %9 ArrayStride 4
    0x0004_0047, 9, 6, 4,
    // OpMemberDecorate %10 0 Offset 0
    0x0005_0048, 10, 0, 35, 0,
    // OpDecorate %10 BufferBlock
    0x0003_0047, 10, 3,
    // OpDecorate %12 DescriptorSet 0
    0x0004_0047, 12, 34, 0,
    // OpDecorate %12 Binding 0
    0x0004_0047, 12, 33, 0,
    // %3 = OpTypeVoid
    0x0002_0013, 3,
    // %4 = OpTypeFunction %3
    0x0003_0021, 4, 3,
    // %5 = OpTypeFloat 32
    0x0003_0016, 5, 32,
    // %6 = OpTypeInt 32 0
    0x0004_0015, 6, 32, 0,
    // %7 = OpTypeVector %6 3
    0x0004_0017, 7, 6, 3,
    // %8 = OpTypePointer Input %7
    0x0004_0020, 8, 1, 7,
    // %2 = OpVariable %8 Input
    0x0004_003B, 8, 2, 1,
    // %9 = OpTypeRuntimeArray %5
    0x0003_001D, 9, 5,
    // %10 = OpTypeStruct %9
    0x0003_001E, 10, 9,
    // %11 = OpTypePointer Uniform %10
    0x0004_0020, 11, 2, 10,
    // %12 = OpVariable %11 Uniform
    0x0004_003B, 11, 12, 2,
    // %13 = OpConstant %6 0
    0x0004_002B, 6, 13, 0,
    // %14 = OpConstant %5 2.0
    0x0004_002B, 5, 14, 0x4000_0000,
    // %15 = OpTypePointer Uniform %5
    0x0004_0020, 15, 2, 5,
    // %16 = OpTypePointer Input %6
    0x0004_0020, 16, 1, 6,
    // %1 = OpFunction %3 None %4
    0x0005_0036, 3, 1, 0, 4,
    // %17 = OpLabel
    0x0002_00F8, 17,
    // %18 = OpAccessChain %16 %2 %13
    0x0005_0041, 16, 18, 2, 13,
    // %19 = OpLoad %6 %18
    0x0004_003D, 6, 19, 18,
    // %20 = OpAccessChain %15 %12 %13 %19
    0x0006_0041, 15, 20, 12, 13, 19,
    // %21 = OpLoad %5 %20
    0x0004_003D, 5, 21, 20,
    // %22 = OpFMul %5 %21 %14
    0x0005_0085, 5, 22, 21, 14,
    // OpStore %20 %22
    0x0003_003E, 20, 22,
    // OpReturn
    0x0001_00FD,
    // OpFunctionEnd
    0x0001_0038,
];

fn kernel_bytes() -> (*const u8, u32) {
    (DOUBLE_KERNEL.as_ptr().cast(), std::mem::size_of_val(&DOUBLE_KERNEL) as u32)
}

fn bind_floats(runtime: &mut VulkanRuntime, set: u32, binding: u32, data: &mut [f32]) {
    let host = unsafe {
        HostBuffer::new(data.as_mut_ptr().cast(), std::mem::size_of_val(data) as u32)
    };
    runtime.set_resource_data_binding(set, binding, host);
}

fn build_double_launch(runtime: &mut VulkanRuntime, data: &mut [f32]) {
    let (blob, blob_len) = kernel_bytes();
    runtime.create_launch_kernel_action();
    unsafe { runtime.set_shader_module(blob, blob_len) };
    runtime.set_entry_point(c"main");
    runtime.set_num_work_groups(NumWorkGroups { x: data.len() as u32, y: 1, z: 1 });
    bind_floats(runtime, 0, 0, data);
}

#[test]
#[ignore = "requires a Vulkan device"]
fn runtime_bootstraps_and_tears_down() {
    let mut runtime = VulkanRuntime::new().expect("runtime init");
    assert_eq!(runtime.scheduled_actions(), 0);

    // Replacing an unscheduled launch must not disturb the schedule.
    runtime.create_launch_kernel_action();
    runtime.create_launch_kernel_action();
    assert_eq!(runtime.scheduled_actions(), 0);
}

#[test]
#[ignore = "requires a Vulkan device"]
fn double_kernel_roundtrip() {
    let mut data: Vec<f32> = (0..16).map(|v| v as f32).collect();

    let mut runtime = VulkanRuntime::new().expect("runtime init");
    build_double_launch(&mut runtime, &mut data);
    runtime.set_launch_kernel_action().expect("launch assembly");
    runtime.add_launch_action_to_schedule().expect("schedule");

    assert_eq!(runtime.staged_memory_size(), 64);
    assert_eq!(runtime.scheduled_actions(), 1);

    runtime.submit_command_buffers().expect("submit");

    let expected: Vec<f32> = (0..16).map(|v| (v * 2) as f32).collect();
    assert_eq!(data, expected);
}

#[test]
#[ignore = "requires a Vulkan device"]
fn cross_kernel_copy_propagates_results() {
    let mut a: Vec<f32> = (0..4).map(|v| v as f32).collect();
    let mut b: Vec<f32> = vec![10.0; 4];

    let mut runtime = VulkanRuntime::new().expect("runtime init");

    build_double_launch(&mut runtime, &mut a);
    runtime.set_launch_kernel_action().expect("first launch assembly");
    runtime.add_launch_action_to_schedule().expect("schedule");

    build_double_launch(&mut runtime, &mut b);
    // Order the second dispatch after the first one's writes.
    runtime.add_launch_dependency(BarrierDep { kernel_index: 0, binding: 0 });
    runtime.set_launch_kernel_action().expect("second launch assembly");
    runtime.add_launch_action_to_schedule().expect("schedule");

    // Copy the first kernel's output over the second kernel's buffer; the
    // copy runs after both dispatches in schedule order.
    runtime
        .create_memory_transfer_action_between_kernels(0, 0, 1, 0)
        .expect("transfer resolution");

    assert_eq!(runtime.scheduled_actions(), 3);
    runtime.submit_command_buffers().expect("submit");

    assert_eq!(a, vec![0.0, 2.0, 4.0, 6.0]);
    // B was doubled on-device, then overwritten by the copy of A's result.
    assert_eq!(b, vec![0.0, 2.0, 4.0, 6.0]);
}

#[test]
#[ignore = "requires a Vulkan device"]
fn teardown_survives_a_failed_assembly() {
    let mut first = [1.0_f32; 4];
    let mut second = [2.0_f32; 4];

    let mut runtime = VulkanRuntime::new().expect("runtime init");
    let (blob, blob_len) = kernel_bytes();

    runtime.create_launch_kernel_action();
    unsafe { runtime.set_shader_module(blob, blob_len) };
    runtime.set_entry_point(c"main");

    // Build the resource map directly so binding 1 has no storage class:
    // materialisation creates binding 0's buffer, then fails.
    let mut resources = ResourceData::default();
    resources.entry(0).or_default().insert(0, unsafe {
        HostBuffer::new(first.as_mut_ptr().cast(), std::mem::size_of_val(&first) as u32)
    });
    resources.entry(0).or_default().insert(1, unsafe {
        HostBuffer::new(second.as_mut_ptr().cast(), std::mem::size_of_val(&second) as u32)
    });
    runtime.set_resource_data(resources);

    let mut classes = vkrunner_runtime::ResourceStorageClassMap::default();
    classes.entry(0).or_default().insert(0, vkrunner_runtime::StorageClass::StorageBuffer);
    runtime.set_resource_storage_class_map(classes);

    let err = runtime.set_launch_kernel_action().unwrap_err();
    assert!(matches!(err, RuntimeError::MissingStorageClass { set: 0, binding: 1 }));

    // Dropping the runtime must release the partially materialised launch
    // along with the bootstrap objects.
    drop(runtime);
}
