// src/scene/pipeline/tests.rs

use super::*;
use crate::gpu::mock::{DrawCall, MockGpu};
use crate::gpu::DmaBufAttributes;
use crate::platform::{DRM_FORMAT_ARGB8888, DRM_FORMAT_MOD_LINEAR};
use crate::scene::transform::{Rectangle, ValueRanges};
use anyhow::Result;
use std::thread;
use std::time::Duration;
use test_log::test;

fn setup() -> (Arc<MockGpu>, Arc<RenderPipeline>) {
    let gpu = Arc::new(MockGpu::new());
    let device: Arc<dyn GpuDevice> = gpu.clone();
    let pipeline = Arc::new(RenderPipeline::new(device, ViewportStrategy::Compensated));
    (gpu, pipeline)
}

fn import(gpu: &MockGpu, width: u32, height: u32) -> Result<ImageId> {
    gpu.create_image(&DmaBufAttributes {
        width,
        height,
        format: DRM_FORMAT_ARGB8888,
        fd: 3,
        offset: 0,
        pitch: width * 4,
        modifier: DRM_FORMAT_MOD_LINEAR,
    })
}

fn layer(zorder: u32) -> Result<Transform> {
    let geometry = Rectangle {
        x: 0,
        y: 0,
        width: 640,
        height: 360,
    };
    Ok(Transform::derive(
        geometry,
        zorder,
        255,
        1920,
        1080,
        &ValueRanges::default(),
    )?)
}

#[test]
fn it_should_create_the_texture_once_and_reuse_it() -> Result<()> {
    let (gpu, pipeline) = setup();
    let image = import(&gpu, 640, 360)?;

    pipeline.render_imported_image(image, 640, 360, layer(0)?, 0)?;
    let texture = pipeline.scene().texture_for(image);
    pipeline.render_imported_image(image, 640, 360, layer(4)?, 4)?;

    assert_eq!(pipeline.scene().texture_for(image), texture);
    assert_eq!(gpu.live_textures(), 1);
    assert_eq!(pipeline.scene().len(), 1);

    let externals: Vec<_> = gpu
        .draws()
        .into_iter()
        .filter(|d| matches!(d, DrawCall::External { .. }))
        .collect();
    assert_eq!(externals.len(), 2);
    // Stage 1 is an identity copy; placement happens in stage 2.
    for draw in externals {
        if let DrawCall::External { viewport, .. } = draw {
            assert_eq!(viewport, Viewport::full(640, 360));
        }
    }
    Ok(())
}

#[test]
fn it_should_draw_layers_back_to_front() -> Result<()> {
    let (gpu, pipeline) = setup();
    for z in [3u32, 1, 2] {
        let image = import(&gpu, 640, 360)?;
        pipeline.render_imported_image(image, 640, 360, layer(z)?, z)?;
    }

    let drawn = pipeline.render_scene(1920, 1080)?;
    assert_eq!(drawn, 3);

    let ranges = ValueRanges::default();
    let expected: Vec<f32> = [3u32, 2, 1]
        .iter()
        .map(|&z| crate::scene::transform::depth_for(z, &ranges))
        .collect();
    assert_eq!(gpu.last_scene_depths(), expected);
    assert_eq!(gpu.swaps(), 1);
    assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
    Ok(())
}

#[test]
fn it_should_present_an_empty_scene() -> Result<()> {
    let (gpu, pipeline) = setup();
    assert_eq!(pipeline.render_scene(1920, 1080)?, 0);
    assert_eq!(gpu.swaps(), 1);
    assert_eq!(
        gpu.draws(),
        vec![
            DrawCall::BeginScene {
                width: 1920,
                height: 1080
            },
            DrawCall::EndScene
        ]
    );
    Ok(())
}

#[test]
fn it_should_destroy_the_texture_on_evict() -> Result<()> {
    let (gpu, pipeline) = setup();
    let image = import(&gpu, 64, 64)?;
    pipeline.render_imported_image(image, 64, 64, layer(0)?, 0)?;

    assert!(pipeline.evict(image)?);
    assert!(!pipeline.evict(image)?);
    assert_eq!(gpu.live_textures(), 0);
    assert!(pipeline.scene().is_empty());
    assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
    Ok(())
}

#[test]
fn it_should_release_a_new_texture_when_stage_one_fails() -> Result<()> {
    let (gpu, pipeline) = setup();
    let never_imported = ImageId(999);

    assert!(pipeline
        .render_imported_image(never_imported, 64, 64, layer(0)?, 0)
        .is_err());
    assert_eq!(gpu.live_textures(), 0);
    assert!(pipeline.scene().is_empty());
    Ok(())
}

#[test]
fn it_should_not_swap_when_a_layer_fails() -> Result<()> {
    let (gpu, pipeline) = setup();
    let image = import(&gpu, 64, 64)?;
    pipeline.render_imported_image(image, 64, 64, layer(0)?, 0)?;

    let texture = pipeline.scene().texture_for(image).expect("staged");
    {
        let _ctx = pipeline.acquire_context()?;
        gpu.destroy_texture(texture)?;
    }

    assert!(pipeline.render_scene(1920, 1080).is_err());
    assert_eq!(gpu.swaps(), 0);
    Ok(())
}

#[test]
fn it_should_wait_for_the_pass_before_evicting() -> Result<()> {
    let (gpu, pipeline) = setup();
    let first = import(&gpu, 64, 64)?;
    let second = import(&gpu, 64, 64)?;
    pipeline.render_imported_image(first, 64, 64, layer(1)?, 1)?;
    pipeline.render_imported_image(second, 64, 64, layer(2)?, 2)?;

    gpu.set_layer_delay(Some(Duration::from_millis(40)));
    gpu.clear_draws();
    let renderer = {
        let pipeline = Arc::clone(&pipeline);
        thread::spawn(move || pipeline.render_scene(1920, 1080))
    };
    while !gpu
        .draws()
        .iter()
        .any(|d| matches!(d, DrawCall::BeginScene { .. }))
    {
        thread::sleep(Duration::from_millis(1));
    }
    assert!(pipeline.evict(first)?);

    assert_eq!(renderer.join().expect("render thread panicked")?, 2);
    gpu.set_layer_delay(None);

    assert!(gpu.violations().is_empty(), "{:?}", gpu.violations());
    assert_eq!(gpu.live_textures(), 1);

    gpu.clear_draws();
    assert_eq!(pipeline.render_scene(1920, 1080)?, 1);
    Ok(())
}

#[test]
fn it_should_destroy_every_texture_on_clear() -> Result<()> {
    let (gpu, pipeline) = setup();
    for z in 0..3 {
        let image = import(&gpu, 32, 32)?;
        pipeline.render_imported_image(image, 32, 32, layer(z)?, z)?;
    }
    assert_eq!(gpu.live_textures(), 3);

    pipeline.clear()?;
    assert_eq!(gpu.live_textures(), 0);
    assert!(pipeline.scene().is_empty());
    Ok(())
}

#[test]
fn it_should_warn_about_a_viewport_anomaly_once_per_layer() -> Result<()> {
    let (gpu, pipeline) = setup();
    gpu.set_max_viewport_dims((2000, 2000));
    let full_screen = Transform::derive(
        Rectangle {
            x: 0,
            y: 0,
            width: 1920,
            height: 1080,
        },
        0,
        255,
        1920,
        1080,
        &ValueRanges::default(),
    )?;
    let image = import(&gpu, 1920, 1080)?;
    pipeline.render_imported_image(image, 1920, 1080, full_screen, 0)?;

    // A compensated full-screen viewport is 3840 wide.
    pipeline.render_scene(1920, 1080)?;
    assert_eq!(pipeline.anomalous_layers(), vec![image]);
    pipeline.render_scene(1920, 1080)?;
    assert_eq!(
        pipeline.note_anomaly(image, Some("viewport exceeds device maximum")),
        None
    );

    // Once the anomaly clears, a later one is new again.
    assert_eq!(pipeline.note_anomaly(image, None), None);
    assert_eq!(
        pipeline.note_anomaly(image, Some("viewport exceeds device maximum")),
        Some("viewport exceeds device maximum")
    );

    gpu.set_max_viewport_dims((8192, 8192));
    pipeline.render_scene(1920, 1080)?;
    assert!(pipeline.anomalous_layers().is_empty());

    gpu.set_max_viewport_dims((2000, 2000));
    pipeline.render_scene(1920, 1080)?;
    assert!(pipeline.evict(image)?);
    assert!(pipeline.anomalous_layers().is_empty());
    Ok(())
}
