//! A 16x16 tile staged in workgroup memory and read back mirrored.
//!
//! Every invocation writes its own value into the shared tile, waits on the
//! barrier, then reads the element at the opposite corner of the tile.  The
//! read only sees a finished value because of the barrier.

use std::f32::consts::PI;

use crate::bitmap::{pack4x8unorm, Bitmap};
use crate::compute::{Grid, RoundTrip};
use crate::demos::{Artifact, Session};
use crate::error::Result;
use crate::GpuContext;

pub const DIM: u32 = 1024;
pub const TILE: u32 = 16;
const PERIOD: f32 = 128.0;

const SHADER: &str = r#"
override dim: u32 = 1024u;

@group(0) @binding(0) var<storage, read_write> data: array<u32>;

var<workgroup> memory: array<array<f32, 16>, 16>;

@compute @workgroup_size(16, 16)
fn draw(
    @builtin(global_invocation_id) id: vec3<u32>,
    @builtin(local_invocation_id) iid: vec3<u32>,
) {
    const pi = 3.1415926535897932f;
    const period = 128f;

    memory[iid.x][iid.y] = (sin(f32(id.x) * 2f * pi / period) + 1f)
        * (sin(f32(id.y) * 2f * pi / period) + 1f) / 4f;
    workgroupBarrier();

    if (id.x < dim && id.y < dim) {
        data[id.x + id.y * dim] = pack4x8unorm(vec4<f32>(0f, memory[15u - iid.x][15u - iid.y], 0f, 1f));
    }
}
"#;

/// Intensity at global position `(x, y)`, in [0, 1].
pub fn intensity(x: u32, y: u32) -> f32 {
    let wave = |v: u32| (v as f32 * 2.0 * PI / PERIOD).sin() + 1.0;
    wave(x) * wave(y) / 4.0
}

/// Green channel of pixel `(x, y)`: the intensity at the mirrored position
/// inside the same tile.
pub fn mirrored(x: u32, y: u32) -> f32 {
    let (lx, ly) = (x % TILE, y % TILE);
    intensity(x - lx + (TILE - 1 - lx), y - ly + (TILE - 1 - ly))
}

pub fn render_cpu(dim: u32) -> Result<Bitmap> {
    let packed: Vec<u32> = (0..dim)
        .flat_map(|y| (0..dim).map(move |x| pack4x8unorm([0.0, mirrored(x, y), 0.0, 1.0])))
        .collect();
    Bitmap::from_packed(dim, dim, &packed)
}

/// `dim` must be a multiple of the tile size so every tile is complete.
pub fn render_gpu(context: &GpuContext, dim: u32) -> Result<Bitmap> {
    let packed: Vec<u32> = RoundTrip::new(SHADER, "draw")
        .constant("dim", dim as f64)
        .output(0, dim as usize * dim as usize * std::mem::size_of::<u32>())
        .grid(Grid::tiled(dim, dim, TILE))
        .run_typed(context)?;
    Bitmap::from_packed(dim, dim, &packed)
}

pub fn run(session: &mut Session) -> Result<Artifact> {
    render_gpu(session.gpu()?, DIM).map(Artifact::Image)
}
