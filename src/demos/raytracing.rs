//! Orthographic ray casting against a handful of random spheres.
//!
//! Rays travel along z, one per pixel.  Each sphere that a ray hits reports
//! the depth of its front surface; the deepest hit wins and is shaded by
//! how directly the ray meets the surface.  Ties keep the earlier sphere.

use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::bitmap::{pack4x8unorm, Bitmap};
use crate::buffer::{GpuBuffer, Usage};
use crate::compute::{Binding, CommandRecorder, Grid, Kernel};
use crate::demos::{Artifact, Session};
use crate::error::{GpuError, Result};
use crate::timing::{GpuTimer, Timestamps};
use crate::GpuContext;

pub const DIM: u32 = 1024;
pub const SPHERES: usize = 20;
pub const SEED: u64 = 1;
const TILE: u32 = 16;
const INF: f32 = 2e10;

const SHADER: &str = r#"
override dim: u32 = 1024u;
const inf = 2e10f;

struct Sphere {
    r: f32,
    g: f32,
    b: f32,
    radius: f32,
    x: f32,
    y: f32,
    z: f32,
}

@group(0) @binding(0) var<storage, read> spheres: array<Sphere>;
@group(0) @binding(1) var<storage, read_write> data: array<u32>;

fn hit(sphere: Sphere, o: vec2<f32>, n: ptr<function, f32>) -> f32 {
    let dx = o.x - sphere.x;
    let dy = o.y - sphere.y;
    let r2 = sphere.radius * sphere.radius;

    if (dx * dx + dy * dy < r2) {
        let dz = sqrt(r2 - dx * dx - dy * dy);
        *n = dz / sqrt(r2);
        return dz + sphere.z;
    }
    return -inf;
}

@compute @workgroup_size(16, 16)
fn raytrace(@builtin(global_invocation_id) id: vec3<u32>) {
    if (id.x >= dim || id.y >= dim) {
        return;
    }
    let o = vec2<f32>(f32(id.x) - f32(dim / 2u), f32(id.y) - f32(dim / 2u));
    var color = vec3<f32>(0.0, 0.0, 0.0);

    var maxz = -inf;
    for (var i = 0u; i < arrayLength(&spheres); i++) {
        var n = 0.0;
        let t = hit(spheres[i], o, &n);
        if (t > maxz) {
            color = vec3<f32>(spheres[i].r, spheres[i].g, spheres[i].b) * n;
            maxz = t;
        }
    }

    data[id.x + id.y * dim] = pack4x8unorm(vec4<f32>(color, 1.0));
}
"#;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Sphere {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub radius: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Sphere {
    /// Depth of the front surface under `(ox, oy)` and the shading factor,
    /// or `None` when the ray misses.
    pub fn hit(&self, ox: f32, oy: f32) -> Option<(f32, f32)> {
        let dx = ox - self.x;
        let dy = oy - self.y;
        let r2 = self.radius * self.radius;
        if dx * dx + dy * dy < r2 {
            let dz = (r2 - dx * dx - dy * dy).sqrt();
            Some((dz + self.z, dz / r2.sqrt()))
        } else {
            None
        }
    }
}

/// `count` spheres with colour channels in [0, 1), radius in [20, 120) and
/// centre in [-500, 500) on every axis.
pub fn random_spheres(count: usize, seed: u64) -> Vec<Sphere> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|_| Sphere {
            r: rng.gen(),
            g: rng.gen(),
            b: rng.gen(),
            radius: 100.0 * rng.gen::<f32>() + 20.0,
            x: 1000.0 * rng.gen::<f32>() - 500.0,
            y: 1000.0 * rng.gen::<f32>() - 500.0,
            z: 1000.0 * rng.gen::<f32>() - 500.0,
        })
        .collect()
}

/// Colour of pixel `(x, y)`.
pub fn trace(spheres: &[Sphere], x: u32, y: u32, dim: u32) -> [f32; 3] {
    let ox = x as f32 - (dim / 2) as f32;
    let oy = y as f32 - (dim / 2) as f32;
    let mut color = [0.0; 3];
    let mut maxz = -INF;
    for sphere in spheres {
        let (t, n) = sphere.hit(ox, oy).unwrap_or((-INF, 0.0));
        if t > maxz {
            color = [sphere.r * n, sphere.g * n, sphere.b * n];
            maxz = t;
        }
    }
    color
}

pub fn render_cpu(spheres: &[Sphere], dim: u32) -> Result<Bitmap> {
    let packed: Vec<u32> = (0..dim)
        .flat_map(|y| (0..dim).map(move |x| (x, y)))
        .map(|(x, y)| {
            let [r, g, b] = trace(spheres, x, y, dim);
            pack4x8unorm([r, g, b, 1.0])
        })
        .collect();
    Bitmap::from_packed(dim, dim, &packed)
}

/// Render on the device.  With `timer`, the pass is bracketed by
/// timestamp writes and the measurement comes back alongside the image.
pub fn render_gpu(
    context: &GpuContext,
    spheres: &[Sphere],
    dim: u32,
    timer: Option<&GpuTimer>,
) -> Result<(Bitmap, Option<Timestamps>)> {
    if spheres.is_empty() {
        return Err(GpuError::InvalidInput("scene has no spheres".into()));
    }
    let kernel = Kernel::build(context, SHADER, "raytrace", &[("dim", dim as f64)])?;
    let scene = GpuBuffer::from_slice(context, spheres, Usage::Input)?;
    let pixels = dim as usize * dim as usize;
    let image = GpuBuffer::<u32>::new_output(context, pixels)?;
    let staging = GpuBuffer::<u32>::new_download(context, pixels)?;
    let bind_group = kernel.bind_group(
        context,
        &[(0, Binding::from(&scene)), (1, Binding::from(&image))],
    )?;

    let mut recorder = CommandRecorder::new(context, "raytrace");
    recorder.compute_pass_timed(
        &kernel,
        Some(&bind_group),
        Grid::tiled(dim, dim, TILE),
        timer.map(GpuTimer::pass_writes),
    )?;
    if let Some(timer) = timer {
        timer.record_resolve(&mut recorder)?;
    }
    recorder.copy_buffer(&image.buffer, 0, &staging.buffer, 0, image.byte_len())?;
    let token = recorder.submit()?;

    let packed = staging.read_to_vec(context, &token)?;
    let stamps = timer
        .map(|timer| timer.read_blocking(context, &token))
        .transpose()?;
    Ok((Bitmap::from_packed(dim, dim, &packed)?, stamps))
}

pub fn run(session: &mut Session) -> Result<Artifact> {
    let context = session.gpu()?;
    let timer = match GpuTimer::new(context) {
        Ok(timer) => Some(timer),
        Err(GpuError::FeatureUnavailable(feature)) => {
            warn!("{feature} unavailable, rendering without timing");
            None
        }
        Err(error) => return Err(error),
    };

    let spheres = random_spheres(SPHERES, SEED);
    let (image, stamps) = render_gpu(context, &spheres, DIM, timer.as_ref())?;
    let caption = match stamps {
        Some(stamps) => {
            info!("raytrace pass took {} ticks", stamps.ticks());
            format!("Render time: {} ticks ({:?})", stamps.ticks(), stamps.elapsed())
        }
        None => "\"timestamp-query\" feature unavailable".to_owned(),
    };
    Ok(Artifact::Captioned { caption, image })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sphere(radius: f32, z: f32, r: f32) -> Sphere {
        Sphere {
            r,
            g: 0.0,
            b: 0.0,
            radius,
            x: 0.0,
            y: 0.0,
            z,
        }
    }

    #[test]
    fn layout_matches_the_wgsl_struct() {
        assert_eq!(std::mem::size_of::<Sphere>(), 7 * 4);
    }

    #[test]
    fn scenes_are_reproducible_and_in_range() {
        let a = random_spheres(SPHERES, SEED);
        assert_eq!(a, random_spheres(SPHERES, SEED));
        assert_ne!(a, random_spheres(SPHERES, SEED + 1));
        for s in &a {
            assert!((0.0..1.0).contains(&s.r));
            assert!((20.0..120.0).contains(&s.radius));
            assert!((-500.0..500.0).contains(&s.z));
        }
    }

    #[test]
    fn centre_of_a_sphere_is_fully_lit() {
        let spheres = [sphere(50.0, 0.0, 1.0)];
        assert_eq!(trace(&spheres, 32, 32, 64), [1.0, 0.0, 0.0]);
        assert_eq!(trace(&spheres, 0, 0, 200), [0.0, 0.0, 0.0]);
    }

    #[test]
    fn nearest_hit_wins() {
        let spheres = [sphere(50.0, 0.0, 0.25), sphere(50.0, 10.0, 0.75)];
        assert_eq!(trace(&spheres, 32, 32, 64)[0], 0.75);
    }

    #[test]
    fn ties_keep_the_earlier_sphere() {
        let spheres = [sphere(50.0, 5.0, 0.25), sphere(50.0, 5.0, 0.75)];
        assert_eq!(trace(&spheres, 32, 32, 64)[0], 0.25);
    }
}
