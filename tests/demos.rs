mod common;

use wgpu_by_example::demos::{
    self, compute_render, dot_product, heat_transfer, histogram, julia, parallel_sum, raytracing,
    render, ripple, shared_bitmap, timestamp_query, Animation, Artifact, Session,
};
use wgpu_by_example::GpuError;

#[test]
fn parallel_sum_agrees_across_partitions() {
    let Some(context) = common::gpu("parallel_sum_agrees_across_partitions") else {
        return;
    };
    let (a, b) = parallel_sum::inputs(parallel_sum::N);
    let expected = parallel_sum::host_sum(&a, &b);
    for partition in [
        parallel_sum::Partition::Workgroups,
        parallel_sum::Partition::Invocations,
        parallel_sum::Partition::Both,
    ] {
        let c = parallel_sum::gpu_sum(&context, &a, &b, partition).unwrap();
        assert_eq!(c, expected, "{partition:?}");
    }
}

#[test]
fn dot_product_matches_host_reference() {
    let Some(context) = common::gpu("dot_product_matches_host_reference") else {
        return;
    };
    let (a, b) = dot_product::inputs(dot_product::N);
    let partials = dot_product::gpu_partials(&context, &a, &b).unwrap();
    assert_eq!(partials.len(), 32);
    let gpu = dot_product::sum_partials(&partials);
    let cpu = dot_product::host_reference(dot_product::N);
    assert!(((gpu - cpu) / cpu).abs() < 1e-3, "gpu {gpu} cpu {cpu}");
}

#[test]
fn histogram_gpu_matches_cpu() {
    let Some(context) = common::gpu("histogram_gpu_matches_cpu") else {
        return;
    };
    let corpus = demos::SAMPLE_CORPUS;
    let gpu = histogram::histogram_gpu(&context, corpus).unwrap();
    let cpu = histogram::histogram_cpu(corpus);
    assert_eq!(gpu[1..], cpu[1..]);
    let nul = corpus.iter().filter(|&&b| b == 0).count() as u64;
    assert_eq!(histogram::reported_total(&gpu), corpus.len() as u64 - nul);
    assert_eq!(histogram::report(&gpu), histogram::report(&cpu));

    assert_eq!(histogram::histogram_gpu(&context, b"").unwrap(), [0; 256]);
}

#[test]
fn histogram_covers_inputs_longer_than_one_grid_pass() {
    let Some(context) = common::gpu("histogram_covers_inputs_longer_than_one_grid_pass") else {
        return;
    };
    // 32 groups of 256 invocations read 32 KiB per pass.
    let bytes: Vec<u8> = (0..100_001u32).map(|i| (i % 251) as u8).collect();
    let gpu = histogram::histogram_gpu(&context, &bytes).unwrap();
    assert_eq!(gpu[1..], histogram::histogram_cpu(&bytes)[1..]);
}

#[test]
fn julia_gpu_matches_cpu_on_every_pixel() {
    let Some(context) = common::gpu("julia_gpu_matches_cpu_on_every_pixel") else {
        return;
    };
    let gpu = julia::escape_values_gpu(&context, julia::DIM).unwrap();
    let cpu = julia::escape_values_cpu(julia::DIM);
    assert_eq!(gpu.len(), cpu.len());
    let differing = gpu.iter().zip(&cpu).filter(|(g, c)| g != c).count();
    assert_eq!(differing, 0, "{differing} of {} pixels differ", cpu.len());

    let dim = 200;
    let image = julia::render_gpu(&context, dim).unwrap();
    let expected = julia::render_cpu(dim).unwrap();
    assert_eq!(common::mismatch_fraction(&image.pixels, &expected.pixels, 1), 0.0);
}

#[test]
fn heat_transfer_keeps_a_uniform_field() {
    let Some(context) = common::gpu("heat_transfer_keeps_a_uniform_field") else {
        return;
    };
    let dim = 32;
    let cells = (dim * dim) as usize;
    let mut heat = heat_transfer::HeatTransfer::with_fields(
        context,
        dim,
        heat_transfer::SPEED,
        &vec![0.0; cells],
        &vec![0.5; cells],
        1,
    )
    .unwrap();
    heat.advance(1).unwrap();
    assert_eq!(heat.read_field().unwrap(), vec![0.5; cells]);

    let frame = heat.next_frame().unwrap();
    assert_eq!(frame.pixel(7, 9), [128, 128, 128, 255]);
}

#[test]
fn heat_transfer_step_matches_host() {
    let Some(context) = common::gpu("heat_transfer_step_matches_host") else {
        return;
    };
    let dim = 40;
    let cells = (dim * dim) as usize;
    let mut source = vec![0.0f32; cells];
    source[5 + 5 * dim as usize] = 1.0;
    source[30 + 12 * dim as usize] = 0.25;
    let initial: Vec<f32> = (0..cells).map(|i| (i % 7) as f32 / 8.0).collect();

    let mut heat =
        heat_transfer::HeatTransfer::with_fields(context, dim, 0.25, &source, &initial, 1).unwrap();
    heat.advance(2).unwrap();
    let gpu = heat.read_field().unwrap();

    let once = heat_transfer::step(&initial, &source, dim, 0.25);
    let cpu = heat_transfer::step(&once, &source, dim, 0.25);
    for (g, c) in gpu.iter().zip(&cpu) {
        assert!((g - c).abs() < 1e-6, "gpu {g} cpu {c}");
    }
}

#[test]
fn heat_transfer_starts_from_a_cold_field() {
    let Some(context) = common::gpu("heat_transfer_starts_from_a_cold_field") else {
        return;
    };
    // At 128x128 only the warm point at (100, 100) survives.
    let dim = 128;
    let cells = (dim * dim) as usize;
    let mut heat = heat_transfer::HeatTransfer::with_dim(context, dim, 1).unwrap();
    let frame = heat.next_frame().unwrap();

    let expected = heat_transfer::step(
        &vec![0.0; cells],
        &heat_transfer::source_field(dim),
        dim,
        heat_transfer::SPEED,
    );
    let gpu = heat.read_field().unwrap();
    for (g, c) in gpu.iter().zip(&expected) {
        assert!((g - c).abs() < 1e-6, "gpu {g} cpu {c}");
    }
    assert_eq!(frame.pixel(0, 0), [0, 0, 0, 255]);
    assert_eq!(frame.pixel(100, 101), [32, 32, 32, 255]);
}

#[test]
fn heat_transfer_rejects_mismatched_fields() {
    let Some(context) = common::gpu("heat_transfer_rejects_mismatched_fields") else {
        return;
    };
    let result = heat_transfer::HeatTransfer::with_fields(context, 8, 0.25, &[0.0; 64], &[0.0; 10], 1);
    assert!(matches!(result, Err(GpuError::InvalidInput(_))));
}

#[test]
fn ripple_frames_advance_the_clock() {
    let Some(context) = common::gpu("ripple_frames_advance_the_clock") else {
        return;
    };
    let dim = 64;
    let mut ripple = ripple::Ripple::new(context, dim).unwrap();
    let first = ripple.next_frame().unwrap();
    assert_eq!(ripple.tick(), 1);
    let second = ripple.next_frame().unwrap();
    assert_eq!(ripple.tick(), 2);
    assert_ne!(first, second);

    let expected = ripple::render_cpu(dim, 2).unwrap();
    assert!(common::mismatch_fraction(&second.pixels, &expected.pixels, 1) < 0.01);
}

#[test]
fn shared_bitmap_mirrors_tiles() {
    let Some(context) = common::gpu("shared_bitmap_mirrors_tiles") else {
        return;
    };
    let gpu = shared_bitmap::render_gpu(&context, 64).unwrap();
    let cpu = shared_bitmap::render_cpu(64).unwrap();
    assert!(common::mismatch_fraction(&gpu.pixels, &cpu.pixels, 1) < 0.01);
}

#[test]
fn raytracing_matches_host() {
    let Some(context) = common::gpu("raytracing_matches_host") else {
        return;
    };
    let dim = 128;
    let spheres: Vec<raytracing::Sphere> = raytracing::random_spheres(raytracing::SPHERES, 3)
        .into_iter()
        .map(|mut s| {
            // Shrink the scene into the small viewport.
            s.x /= 8.0;
            s.y /= 8.0;
            s.radius /= 4.0;
            s
        })
        .collect();
    let (gpu, stamps) = raytracing::render_gpu(&context, &spheres, dim, None).unwrap();
    assert!(stamps.is_none());
    let cpu = raytracing::render_cpu(&spheres, dim).unwrap();
    assert!(common::mismatch_fraction(&gpu.pixels, &cpu.pixels, 1) < 0.01);
}

#[test]
fn raytracing_demo_degrades_without_timestamps() {
    if common::gpu("raytracing_demo_degrades_without_timestamps").is_none() {
        return;
    }
    let mut session = Session::new();
    match demos::run("raytracing", &mut session).unwrap() {
        Artifact::Captioned { caption, image } => {
            assert!(
                caption.starts_with("Render time: ")
                    || caption == "\"timestamp-query\" feature unavailable",
                "{caption}"
            );
            assert_eq!((image.width, image.height), (raytracing::DIM, raytracing::DIM));
        }
        other => panic!("unexpected artifact {other:?}"),
    }
}

#[test]
fn timestamp_query_reports_or_fails_cleanly() {
    let Some(context) = common::gpu("timestamp_query_reports_or_fails_cleanly") else {
        return;
    };
    match timestamp_query::time_spin(&context) {
        Ok(stamps) => assert!(stamps.end >= stamps.start),
        Err(GpuError::FeatureUnavailable(feature)) => assert_eq!(feature, "timestamp-query"),
        Err(other) => panic!("unexpected error {other}"),
    }
}

#[test]
fn compute_render_writes_a_gradient() {
    let Some(context) = common::gpu("compute_render_writes_a_gradient") else {
        return;
    };
    let (w, h) = (100, 60);
    let image = compute_render::render_gpu(&context, w, h).unwrap();
    for (x, y) in [(0, 0), (50, 30), (99, 59), (13, 41)] {
        let got = image.pixel(x, y);
        let want = compute_render::gradient_pixel(x, y, w, h);
        for (g, e) in got.iter().zip(want) {
            assert!(g.abs_diff(e) <= 1, "pixel ({x}, {y}): {got:?} vs {want:?}");
        }
    }
}

#[test]
fn render_draws_a_red_triangle() {
    let Some(context) = common::gpu("render_draws_a_red_triangle") else {
        return;
    };
    let image = render::render_gpu(&context, render::WIDTH, render::HEIGHT).unwrap();
    assert_eq!(image.pixel(500, 500), [255, 0, 0, 255]);
    let [r, g, b, a] = image.pixel(5, 5);
    let grey = render::background()[0];
    assert_eq!(a, 255);
    for channel in [r, g, b] {
        assert!(channel.abs_diff(grey) <= 1, "background {channel}");
    }
}

#[test]
fn every_demo_runs() {
    if common::gpu("every_demo_runs").is_none() {
        return;
    }
    for demo in demos::registry() {
        let mut session = Session::new();
        match demos::run(demo.name, &mut session) {
            Ok(Artifact::Animation(mut animation)) => {
                animation.next_frame().unwrap();
            }
            Ok(_) => {}
            Err(GpuError::FeatureUnavailable(_)) => {}
            Err(err) => panic!("{} failed: {err}", demo.name),
        }
    }
}
