//! Backend tests for flipblur-compute.

use flipblur_compute::backend::{CpuPrimitives, DevicePrimitives};
use flipblur_compute::kernels::{box_blur, flip_horizontal};
use flipblur_compute::{
    create_pipeline, describe_backends, select_best_backend, Backend, GridPartition, KernelWindow,
    Raster, RunConfig,
};

fn ramp(w: u32, h: u32) -> Raster {
    Raster::from_fn(w, h, |x, y| (x * 3 + y * 5) as u8).unwrap()
}

#[test]
fn test_cpu_backend_available() {
    assert!(Backend::Cpu.is_available());
}

#[test]
fn test_auto_backend() {
    let config = RunConfig::builder().width(64).height(32).build().unwrap();
    let pipeline = create_pipeline(config).unwrap();
    println!("Auto-selected backend: {}", pipeline.name());
    assert_eq!(pipeline.backend(), select_best_backend());
    assert_eq!(pipeline.name().to_ascii_lowercase(), pipeline.backend().name());
}

#[test]
fn test_describe_backends() {
    let desc = describe_backends();
    println!("{}", desc);
    assert_eq!(desc.lines().count(), 3);
    assert!(desc.contains("[+] cpu"));
}

#[test]
fn test_partition_covers_every_pixel_once() {
    for &(w, h) in &[(1, 1), (15, 17), (16, 16), (100, 3), (1024, 768)] {
        let p = GridPartition::new(w, h);
        let mut hits = vec![0u8; (w * h) as usize];
        for (x, y) in p.in_bounds_tasks() {
            hits[(y * w + x) as usize] += 1;
        }
        assert!(hits.iter().all(|&n| n == 1), "{w}x{h}");
        assert_eq!(p.task_count(), (w * h) as u64 + p.overhang_tasks());
    }
}

#[test]
fn test_cpu_kernels_on_ragged_grid() {
    let gpu = CpuPrimitives::new();
    let window = KernelWindow::new(7).unwrap();
    let src = ramp(45, 31);
    let partition = GridPartition::new(45, 31);
    assert!(partition.overhang_tasks() > 0);

    let input = gpu.upload(&src).unwrap();
    let mut flipped = gpu.allocate(45, 31).unwrap();
    let mut blurred = gpu.allocate(45, 31).unwrap();
    gpu.exec_flip(&input, &mut flipped, &partition).unwrap();
    gpu.exec_blur(&flipped, &mut blurred, window, &partition).unwrap();

    let expected = flip_horizontal(&src);
    assert_eq!(gpu.download(&flipped).unwrap(), expected);
    assert_eq!(gpu.download(&blurred).unwrap(), box_blur(&expected, window));
}

#[cfg(feature = "wgpu")]
#[test]
fn test_wgpu_matches_cpu() {
    use flipblur_compute::backend::WgpuPrimitives;

    if !WgpuPrimitives::is_available() {
        println!("wgpu not available, skipping");
        return;
    }
    let gpu = WgpuPrimitives::new().unwrap();
    let window = KernelWindow::new(5).unwrap();
    let src = ramp(50, 19);
    let partition = GridPartition::new(50, 19);

    let input = gpu.upload(&src).unwrap();
    let mut flipped = gpu.allocate(50, 19).unwrap();
    let mut blurred = gpu.allocate(50, 19).unwrap();
    gpu.exec_flip(&input, &mut flipped, &partition).unwrap();
    gpu.exec_blur(&flipped, &mut blurred, window, &partition).unwrap();

    let expected = flip_horizontal(&src);
    assert_eq!(gpu.download(&flipped).unwrap(), expected);
    assert_eq!(gpu.download(&blurred).unwrap(), box_blur(&expected, window));
}

#[cfg(feature = "cuda")]
#[test]
fn test_cuda_matches_cpu() {
    use flipblur_compute::backend::CudaPrimitives;

    if !CudaPrimitives::is_available() {
        println!("CUDA not available, skipping");
        return;
    }
    let gpu = CudaPrimitives::new().unwrap();
    let window = KernelWindow::new(5).unwrap();
    let src = ramp(50, 19);
    let partition = GridPartition::new(50, 19);

    let input = gpu.upload(&src).unwrap();
    let mut flipped = gpu.allocate(50, 19).unwrap();
    let mut blurred = gpu.allocate(50, 19).unwrap();
    gpu.exec_flip(&input, &mut flipped, &partition).unwrap();
    gpu.exec_blur(&flipped, &mut blurred, window, &partition).unwrap();

    let expected = flip_horizontal(&src);
    assert_eq!(gpu.download(&flipped).unwrap(), expected);
    assert_eq!(gpu.download(&blurred).unwrap(), box_blur(&expected, window));
}
