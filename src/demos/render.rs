//! The smallest render pipeline: one red triangle on a grey background,
//! drawn offscreen and read back.

use std::borrow::Cow;

use log::debug;

use crate::bitmap::{unorm8, Bitmap};
use crate::compute::CommandRecorder;
use crate::demos::{Artifact, Session};
use crate::error::{GpuError, Result};
use crate::texture::GpuTexture;
use crate::GpuContext;

pub const WIDTH: u32 = 1000;
pub const HEIGHT: u32 = 1000;
pub const CLEAR: f64 = 0.3;
const FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Triangle corners in normalized device coordinates.
pub const TRIANGLE: [[f32; 2]; 3] = [[0.0, 0.5], [-0.5, -0.5], [0.5, -0.5]];

const SHADER: &str = r#"
@vertex
fn vs(@builtin(vertex_index) i: u32) -> @builtin(position) vec4<f32> {
    var pos = array<vec2<f32>, 3>(
        vec2<f32>(0.0, 0.5),
        vec2<f32>(-0.5, -0.5),
        vec2<f32>(0.5, -0.5),
    );
    return vec4<f32>(pos[i], 0.0, 1.0);
}

@fragment
fn fs() -> @location(0) vec4<f32> {
    return vec4<f32>(1.0, 0.0, 0.0, 1.0);
}
"#;

pub fn background() -> [u8; 4] {
    let grey = unorm8(CLEAR as f32);
    [grey, grey, grey, 255]
}

/// Whether the centre of pixel `(x, y)` lies strictly inside the triangle.
pub fn covers(x: u32, y: u32, width: u32, height: u32) -> bool {
    let px = 2.0 * (x as f32 + 0.5) / width as f32 - 1.0;
    let py = 1.0 - 2.0 * (y as f32 + 0.5) / height as f32;
    let edge = |[ax, ay]: [f32; 2], [bx, by]: [f32; 2]| (bx - ax) * (py - ay) - (by - ay) * (px - ax);
    let [a, b, c] = TRIANGLE;
    let sides = [edge(a, b), edge(b, c), edge(c, a)];
    sides.iter().all(|&s| s > 0.0) || sides.iter().all(|&s| s < 0.0)
}

fn pipeline(context: &GpuContext) -> Result<wgpu::RenderPipeline> {
    let device = &context.device;
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some("triangle"),
        source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(SHADER)),
    });
    let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("triangle"),
        layout: None,
        vertex: wgpu::VertexState {
            module: &module,
            entry_point: Some("vs"),
            compilation_options: Default::default(),
            buffers: &[],
        },
        fragment: Some(wgpu::FragmentState {
            module: &module,
            entry_point: Some("fs"),
            compilation_options: Default::default(),
            targets: &[Some(FORMAT.into())],
        }),
        primitive: wgpu::PrimitiveState::default(),
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    });
    if let Some(error) = pollster::block_on(device.pop_error_scope()) {
        return Err(GpuError::CompileError(error.to_string()));
    }
    Ok(pipeline)
}

pub fn render_gpu(context: &GpuContext, width: u32, height: u32) -> Result<Bitmap> {
    let pipeline = pipeline(context)?;
    let target = GpuTexture::new(
        context,
        "render_target",
        width,
        height,
        FORMAT,
        wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
    )?;

    let mut recorder = CommandRecorder::new(context, "render");
    {
        let mut pass = recorder.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("triangle"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &target.view,
                depth_slice: None,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color {
                        r: CLEAR,
                        g: CLEAR,
                        b: CLEAR,
                        a: 1.0,
                    }),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&pipeline);
        pass.draw(0..3, 0..1);
    }
    let readback = target.record_readback(context, &mut recorder)?;
    let token = recorder.submit()?;
    debug!("triangle drawn into {width}x{height} target");

    Bitmap::new(width, height, readback.read_blocking(context, &token)?)
}

pub fn run(session: &mut Session) -> Result<Artifact> {
    render_gpu(session.gpu()?, WIDTH, HEIGHT).map(Artifact::Image)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coverage_follows_the_triangle() {
        assert!(covers(500, 500, WIDTH, HEIGHT));
        assert!(covers(500, 300, WIDTH, HEIGHT));
        assert!(!covers(0, 0, WIDTH, HEIGHT));
        assert!(!covers(500, 200, WIDTH, HEIGHT));
        assert!(!covers(200, 700, WIDTH, HEIGHT));
    }

    #[test]
    fn background_is_linear_grey() {
        assert_eq!(background(), [77, 77, 77, 255]);
    }
}
