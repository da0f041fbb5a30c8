//! Load, draw and unload every scene against the headless backend.

use frameloop_core::RendererConfig;
use frameloop_renderer::{LoadStage, Renderer, RendererError, TickOutcome};
use frameloop_rhi::backend::{Extent2D, PresentResult};
use frameloop_rhi::headless::{BackendEvent, FailPoint, HeadlessBackend};
use frameloop_scene::SceneKind;

fn config(frames_in_flight: usize) -> RendererConfig {
    RendererConfig {
        width: 640,
        height: 360,
        frames_in_flight,
        ..Default::default()
    }
}

fn failure_stage(point: FailPoint) -> LoadStage {
    match point {
        FailPoint::CreateSwapchain => LoadStage::Swapchain,
        FailPoint::CreateDepthTarget => LoadStage::DepthTarget,
        FailPoint::CreatePipeline => LoadStage::Pipeline,
        FailPoint::UploadStaticBuffer => LoadStage::MeshUpload,
        FailPoint::CreateUniformBuffer | FailPoint::AllocateCommandSlots => LoadStage::FrameSlots,
        FailPoint::CreateDescriptorSets => LoadStage::DescriptorSets,
        FailPoint::AcquireImage => unreachable!("not a load step"),
    }
}

#[test]
fn test_every_scene_runs_and_unloads_cleanly() {
    for kind in SceneKind::ALL {
        for frames_in_flight in 1..=3 {
            let mut gpu = HeadlessBackend::new().with_retire_after(1);
            let mut renderer = Renderer::load(&mut gpu, kind.desc(), &config(frames_in_flight))
                .unwrap_or_else(|e| panic!("{} failed to load: {}", kind, e));

            for _ in 0..10 {
                let outcome = renderer.draw(&mut gpu, 1.0 / 60.0).unwrap();
                assert!(matches!(outcome, TickOutcome::Presented(_)), "{}", kind);
            }
            let frames = renderer.frame_loop().unwrap();
            assert_eq!(frames.frame_index(), 10 % frames_in_flight);
            assert!(gpu.max_in_flight() <= frames_in_flight);

            renderer.unload(&mut gpu);
            assert_eq!(gpu.live_objects(), 0, "{} leaked objects", kind);
            assert_eq!(renderer.state().ticks(), 10);
        }
    }
}

#[test]
fn test_unload_is_idempotent() {
    let mut gpu = HeadlessBackend::new();
    let mut renderer = Renderer::load(&mut gpu, SceneKind::RedCube.desc(), &config(2)).unwrap();
    renderer.draw(&mut gpu, 0.016).unwrap();
    renderer.unload(&mut gpu);
    renderer.unload(&mut gpu);
    assert_eq!(gpu.live_objects(), 0);
}

#[test]
fn test_load_failure_at_each_stage_leaves_nothing_alive() {
    let points = [
        FailPoint::CreateSwapchain,
        FailPoint::CreateDepthTarget,
        FailPoint::CreatePipeline,
        FailPoint::UploadStaticBuffer,
        FailPoint::AllocateCommandSlots,
        FailPoint::CreateUniformBuffer,
        FailPoint::CreateDescriptorSets,
    ];
    for point in points {
        let mut gpu = HeadlessBackend::new();
        gpu.fail_at(point);
        let result = Renderer::load(&mut gpu, SceneKind::RedCube35.desc(), &config(2));
        match result {
            Err(RendererError::Load { stage, .. }) => assert_eq!(stage, failure_stage(point)),
            Err(e) => panic!("{:?}: unexpected error {}", point, e),
            Ok(_) => panic!("{:?}: load succeeded", point),
        }
        assert_eq!(gpu.live_objects(), 0, "{:?} leaked objects", point);

        // The same backend can load once the failure is gone.
        gpu.clear_failures();
        let mut renderer =
            Renderer::load(&mut gpu, SceneKind::RedCube35.desc(), &config(2)).unwrap();
        renderer.draw(&mut gpu, 0.0).unwrap();
        renderer.unload(&mut gpu);
        assert_eq!(gpu.live_objects(), 0);
    }
}

#[test]
fn test_scene_without_depth_skips_depth_stage() {
    let mut gpu = HeadlessBackend::new();
    gpu.fail_at(FailPoint::CreateDepthTarget);
    let mut renderer = Renderer::load(&mut gpu, SceneKind::Hades3.desc(), &config(2)).unwrap();
    renderer.unload(&mut gpu);
}

#[test]
fn test_only_first_submission_waits_on_upload() {
    let mut gpu = HeadlessBackend::new();
    let mut renderer = Renderer::load(&mut gpu, SceneKind::SimpleCube.desc(), &config(2)).unwrap();
    let upload = gpu
        .events()
        .iter()
        .find_map(|e| match e {
            BackendEvent::UploadFlush { semaphore, buffers } => {
                assert_eq!(*buffers, 1);
                Some(*semaphore)
            }
            _ => None,
        })
        .unwrap();

    for _ in 0..4 {
        renderer.draw(&mut gpu, 0.016).unwrap();
    }
    let waits: Vec<bool> = gpu
        .events()
        .iter()
        .filter_map(|e| match e {
            BackendEvent::Submit {
                wait_semaphores, ..
            } => Some(wait_semaphores.contains(&upload)),
            _ => None,
        })
        .collect();
    assert_eq!(waits, vec![true, false, false, false]);
    renderer.unload(&mut gpu);
}

#[test]
fn test_resize_before_first_draw_keeps_upload_wait() {
    let mut gpu = HeadlessBackend::new();
    let mut renderer = Renderer::load(&mut gpu, SceneKind::RedCube35.desc(), &config(2)).unwrap();
    let upload = gpu
        .events()
        .iter()
        .find_map(|e| match e {
            BackendEvent::UploadFlush { semaphore, .. } => Some(*semaphore),
            _ => None,
        })
        .unwrap();

    renderer.resize(&mut gpu, 1280, 720).unwrap();
    let outcome = renderer.draw(&mut gpu, 0.016).unwrap();
    assert!(matches!(outcome, TickOutcome::Presented(_)));

    let first_submit_waits = gpu
        .events()
        .iter()
        .find_map(|e| match e {
            BackendEvent::Submit {
                wait_semaphores, ..
            } => Some(wait_semaphores.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(first_submit_waits.len(), 2);
    assert_eq!(first_submit_waits[0], upload);

    renderer.unload(&mut gpu);
    assert_eq!(gpu.live_objects(), 0);
}

#[test]
fn test_suboptimal_present_requests_resize() {
    let mut gpu = HeadlessBackend::new();
    let mut renderer = Renderer::load(&mut gpu, SceneKind::SimpleCube.desc(), &config(2)).unwrap();
    gpu.report_present_results([PresentResult::Suboptimal]);

    let outcome = renderer.draw(&mut gpu, 0.016).unwrap();
    assert!(matches!(outcome, TickOutcome::Suboptimal(_)));
    assert!(outcome.needs_resize());
    assert_eq!(renderer.frame_loop().map(|f| f.frame_index()), Some(1));

    renderer.resize(&mut gpu, 800, 450).unwrap();
    let outcome = renderer.draw(&mut gpu, 0.016).unwrap();
    assert_eq!(outcome.report().map(|r| r.slot), Some(1));
    assert!(!outcome.needs_resize());

    renderer.unload(&mut gpu);
    assert_eq!(gpu.live_objects(), 0);
}

#[test]
fn test_resize_after_out_of_date_surface() {
    let mut gpu = HeadlessBackend::new();
    let mut renderer = Renderer::load(&mut gpu, SceneKind::RedCube.desc(), &config(2)).unwrap();
    renderer.draw(&mut gpu, 0.016).unwrap();

    gpu.report_out_of_date(1);
    let outcome = renderer.draw(&mut gpu, 0.016).unwrap();
    assert!(outcome.needs_resize());
    renderer.resize(&mut gpu, 1024, 768).unwrap();
    assert_eq!(renderer.extent(), Extent2D::new(1024, 768));

    let outcome = renderer.draw(&mut gpu, 0.016).unwrap();
    assert_eq!(outcome.report().map(|r| r.slot), Some(1));
    renderer.unload(&mut gpu);
    assert_eq!(gpu.live_objects(), 0);
}

#[test]
fn test_acquire_failure_is_an_error() {
    let mut gpu = HeadlessBackend::new();
    let mut renderer = Renderer::load(&mut gpu, SceneKind::Hades3.desc(), &config(2)).unwrap();
    gpu.fail_at(FailPoint::AcquireImage);
    assert!(matches!(
        renderer.draw(&mut gpu, 0.016),
        Err(RendererError::Rhi(_))
    ));
    gpu.clear_failures();
    renderer.unload(&mut gpu);
    assert_eq!(gpu.live_objects(), 0);
}
