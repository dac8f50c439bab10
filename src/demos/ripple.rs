//! Concentric cosine ripples, one dispatch per frame.

use crate::bitmap::{pack4x8unorm, Bitmap};
use crate::buffer::{GpuBuffer, Usage};
use crate::compute::{Binding, CommandRecorder, Grid, Kernel};
use crate::demos::{Animation, Artifact, Session};
use crate::error::Result;
use crate::GpuContext;

pub const DIM: u32 = 1024;
const TILE: u32 = 16;

const SHADER: &str = r#"
override dim: u32 = 1024u;

@group(0) @binding(0) var<uniform> ticks: u32;
@group(0) @binding(1) var<storage, read_write> data: array<u32>;

@compute @workgroup_size(16, 16)
fn ripple(@builtin(global_invocation_id) id: vec3<u32>) {
    if (id.x >= dim || id.y >= dim) {
        return;
    }
    let fx = f32(id.x) - f32(dim) / 2.0;
    let fy = f32(id.y) - f32(dim) / 2.0;
    let d = sqrt(fx * fx + fy * fy);

    let grey = cos(d / 10.0 - f32(ticks) / 7.0);

    data[id.x + id.y * dim] = pack4x8unorm(vec4<f32>(grey, grey, grey, 1.0));
}
"#;

/// Brightness of pixel `(x, y)` at frame `ticks`, before clamping.
pub fn grey(x: u32, y: u32, dim: u32, ticks: u32) -> f32 {
    let fx = x as f32 - dim as f32 / 2.0;
    let fy = y as f32 - dim as f32 / 2.0;
    let d = (fx * fx + fy * fy).sqrt();
    (d / 10.0 - ticks as f32 / 7.0).cos()
}

pub fn render_cpu(dim: u32, ticks: u32) -> Result<Bitmap> {
    let packed: Vec<u32> = (0..dim)
        .flat_map(|y| (0..dim).map(move |x| grey(x, y, dim, ticks)))
        .map(|g| pack4x8unorm([g, g, g, 1.0]))
        .collect();
    Bitmap::from_packed(dim, dim, &packed)
}

/// Device state for the animation.  The tick counter advances before every
/// dispatch, so the first frame is tick 1.
pub struct Ripple {
    context: GpuContext,
    kernel: Kernel,
    bind_group: wgpu::BindGroup,
    ticks: GpuBuffer<u32>,
    image: GpuBuffer<u32>,
    staging: GpuBuffer<u32>,
    dim: u32,
    tick: u32,
}

impl Ripple {
    pub fn new(context: GpuContext, dim: u32) -> Result<Self> {
        let kernel = Kernel::build(&context, SHADER, "ripple", &[("dim", dim as f64)])?;
        let pixels = dim as usize * dim as usize;
        let ticks = GpuBuffer::allocate(&context, 1, Usage::Uniform, Some(&[0u32][..]))?;
        let image = GpuBuffer::<u32>::new_output(&context, pixels)?;
        let staging = GpuBuffer::<u32>::new_download(&context, pixels)?;
        let bind_group = kernel.bind_group(
            &context,
            &[(0, Binding::from(&ticks)), (1, Binding::from(&image))],
        )?;
        Ok(Self {
            context,
            kernel,
            bind_group,
            ticks,
            image,
            staging,
            dim,
            tick: 0,
        })
    }

    pub fn tick(&self) -> u32 {
        self.tick
    }
}

impl Animation for Ripple {
    fn name(&self) -> &str {
        "ripple"
    }

    fn next_frame(&mut self) -> Result<Bitmap> {
        self.tick = self.tick.wrapping_add(1);
        self.ticks.write(&self.context, &[self.tick])?;

        let mut recorder = CommandRecorder::new(&self.context, "ripple_frame");
        recorder.compute_pass(
            &self.kernel,
            Some(&self.bind_group),
            Grid::tiled(self.dim, self.dim, TILE),
        )?;
        recorder.copy_buffer(
            &self.image.buffer,
            0,
            &self.staging.buffer,
            0,
            self.image.byte_len(),
        )?;
        let token = recorder.submit()?;

        let packed = self.staging.read_to_vec(&self.context, &token)?;
        Bitmap::from_packed(self.dim, self.dim, &packed)
    }
}

pub fn run(session: &mut Session) -> Result<Artifact> {
    let ripple = Ripple::new(session.take_gpu()?, DIM)?;
    Ok(Artifact::Animation(Box::new(ripple)))
}
