//! A compute shader drawing straight into a storage texture.

use crate::bitmap::{unorm8, Bitmap};
use crate::compute::{Binding, CommandRecorder, Grid, Kernel};
use crate::demos::{Artifact, Session};
use crate::error::Result;
use crate::texture::GpuTexture;
use crate::GpuContext;

pub const WIDTH: u32 = 1000;
pub const HEIGHT: u32 = 1000;
const TILE: u32 = 8;

const SHADER: &str = r#"
@group(0) @binding(0) var texture: texture_storage_2d<rgba8unorm, write>;

@compute @workgroup_size(8, 8)
fn draw(@builtin(global_invocation_id) id: vec3<u32>) {
    let size = textureDimensions(texture);
    if (id.x >= size.x || id.y >= size.y) {
        return;
    }
    let color = vec2<f32>(id.xy) / vec2<f32>(size);
    textureStore(texture, id.xy, vec4<f32>(color, 0.0, 1.0));
}
"#;

/// Expected RGBA of pixel `(x, y)` in a `width` x `height` gradient.
pub fn gradient_pixel(x: u32, y: u32, width: u32, height: u32) -> [u8; 4] {
    [
        unorm8(x as f32 / width as f32),
        unorm8(y as f32 / height as f32),
        0,
        255,
    ]
}

pub fn render_gpu(context: &GpuContext, width: u32, height: u32) -> Result<Bitmap> {
    let kernel = Kernel::build(context, SHADER, "draw", &[])?;
    let target = GpuTexture::new(
        context,
        "compute_render_target",
        width,
        height,
        wgpu::TextureFormat::Rgba8Unorm,
        wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::COPY_SRC,
    )?;
    let bind_group = kernel.bind_group(context, &[(0, Binding::from(&target.view))])?;

    let mut recorder = CommandRecorder::new(context, "compute_render");
    recorder.compute_pass(
        &kernel,
        Some(&bind_group),
        Grid::planar(width.div_ceil(TILE), height.div_ceil(TILE)),
    )?;
    let readback = target.record_readback(context, &mut recorder)?;
    let token = recorder.submit()?;

    Bitmap::new(width, height, readback.read_blocking(context, &token)?)
}

pub fn run(session: &mut Session) -> Result<Artifact> {
    render_gpu(session.gpu()?, WIDTH, HEIGHT).map(Artifact::Image)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gradient_runs_from_black_to_yellow() {
        assert_eq!(gradient_pixel(0, 0, WIDTH, HEIGHT), [0, 0, 0, 255]);
        assert_eq!(gradient_pixel(500, 250, WIDTH, HEIGHT), [128, 64, 0, 255]);
        assert_eq!(gradient_pixel(999, 999, WIDTH, HEIGHT), [255, 255, 0, 255]);
    }
}
