//! Julia set by escape time, on the host and in a kernel.
//!
//! Both versions iterate `z = z^2 + c` in Q11.20 fixed point (`i32` with
//! 20 fractional bits) and report `i / 200` for the iteration that escaped
//! or 1 for points that never do.  Integer multiplies and shifts round the
//! same way everywhere, so the host and the device agree on every pixel no
//! matter how a driver treats float arithmetic.  The start coordinates of
//! each row and column are computed once on the host and uploaded.

use crate::bitmap::{pack4x8unorm, Bitmap};
use crate::compute::{Grid, RoundTrip};
use crate::demos::{Artifact, Session};
use crate::error::Result;
use crate::GpuContext;

pub const DIM: u32 = 1000;
pub const MAX_ITERATIONS: u32 = 200;
const SCALE: f64 = 1.5;
const TILE: u32 = 16;

pub const FRACTION_BITS: u32 = 20;
const ONE: i64 = 1 << FRACTION_BITS;
/// `(-0.8, 0.156)`, rounded to the nearest fixed-point value.
const C: (i32, i32) = (-838_861, 163_578);
/// 32.0: any component beyond this has a squared magnitude over 1000.
const BOUND: i32 = 32 << FRACTION_BITS;
/// Squared magnitude beyond which a point has escaped, 1000.0.
const ESCAPE: u32 = 1000 << FRACTION_BITS;

const SHADER: &str = r#"
override dim: u32 = 1000u;
override cx: i32 = -838861;
override cy: i32 = 163578;

const FRACTION_BITS: u32 = 20u;
const BOUND: i32 = 33554432;
const ESCAPE: u32 = 1048576000u;
const MAX_STEPS: u32 = 200u;

@group(0) @binding(0) var<storage, read> axis: array<i32>;
@group(0) @binding(1) var<storage, read_write> pixels: array<u32>;
@group(0) @binding(2) var<storage, read_write> steps: array<u32>;

// (a * b) >> FRACTION_BITS, truncated toward zero.  The 64-bit product of
// the magnitudes is assembled from 16-bit halves.
fn fixed_mul(a: i32, b: i32) -> i32 {
    let ua = u32(abs(a));
    let ub = u32(abs(b));
    let a0 = ua & 0xffffu;
    let a1 = ua >> 16u;
    let b0 = ub & 0xffffu;
    let b1 = ub >> 16u;

    let p00 = a0 * b0;
    let p01 = a0 * b1;
    let p10 = a1 * b0;
    let mid = (p00 >> 16u) + (p01 & 0xffffu) + (p10 & 0xffffu);
    let lo = (p00 & 0xffffu) | (mid << 16u);
    let hi = a1 * b1 + (p01 >> 16u) + (p10 >> 16u) + (mid >> 16u);

    let magnitude = i32((hi << (32u - FRACTION_BITS)) | (lo >> FRACTION_BITS));
    return select(magnitude, -magnitude, (a < 0) != (b < 0));
}

fn escaped(real: i32, imag: i32) -> bool {
    if (abs(real) > BOUND || abs(imag) > BOUND) {
        return true;
    }
    return u32(fixed_mul(real, real)) + u32(fixed_mul(imag, imag)) > ESCAPE;
}

fn julia(x: u32, y: u32) -> u32 {
    var re = axis[x];
    var im = axis[y];

    for (var i = 0u; i < MAX_STEPS; i++) {
        let real = fixed_mul(re, re) - fixed_mul(im, im) + cx;
        let imag = 2 * fixed_mul(re, im) + cy;
        if (escaped(real, imag)) {
            return i;
        }
        re = real;
        im = imag;
    }
    return MAX_STEPS;
}

@compute @workgroup_size(16, 16)
fn image(@builtin(global_invocation_id) id: vec3<u32>) {
    if (id.x >= dim || id.y >= dim) {
        return;
    }
    let value = f32(julia(id.x, id.y)) / f32(MAX_STEPS);
    pixels[id.x + id.y * dim] = pack4x8unorm(vec4<f32>(value, 0.0, 0.0, 1.0));
}

@compute @workgroup_size(16, 16)
fn escape_steps(@builtin(global_invocation_id) id: vec3<u32>) {
    if (id.x >= dim || id.y >= dim) {
        return;
    }
    steps[id.x + id.y * dim] = julia(id.x, id.y);
}
"#;

/// `(a * b) >> FRACTION_BITS`, truncated toward zero.
fn fixed_mul(a: i32, b: i32) -> i32 {
    ((a as i64 * b as i64) / ONE) as i32
}

fn escaped(real: i32, imag: i32) -> bool {
    real.abs() > BOUND
        || imag.abs() > BOUND
        || fixed_mul(real, real) as u32 + fixed_mul(imag, imag) as u32 > ESCAPE
}

/// Fixed-point start coordinate of row or column `i`, running from 1.5 at
/// the first pixel toward -1.5 at the last.
pub fn coordinate(i: u32, dim: u32) -> i32 {
    let d_half = dim as f64 / 2.0;
    (SCALE * (d_half - i as f64) / d_half * ONE as f64).round() as i32
}

pub fn axis(dim: u32) -> Vec<i32> {
    (0..dim).map(|i| coordinate(i, dim)).collect()
}

/// Iteration at which the orbit starting at `(re, im)` escapes, or
/// [`MAX_ITERATIONS`] if it never does.
pub fn escape_steps(re: i32, im: i32) -> u32 {
    let (mut re, mut im) = (re, im);
    for i in 0..MAX_ITERATIONS {
        let real = fixed_mul(re, re) - fixed_mul(im, im) + C.0;
        let imag = 2 * fixed_mul(re, im) + C.1;
        if escaped(real, imag) {
            return i;
        }
        re = real;
        im = imag;
    }
    MAX_ITERATIONS
}

fn to_value(steps: u32) -> f32 {
    steps as f32 / MAX_ITERATIONS as f32
}

/// Escape value of pixel `(x, y)` in a `dim` x `dim` image.
pub fn escape_value(x: u32, y: u32, dim: u32) -> f32 {
    to_value(escape_steps(coordinate(x, dim), coordinate(y, dim)))
}

pub fn escape_values_cpu(dim: u32) -> Vec<f32> {
    let axis = axis(dim);
    axis.iter()
        .flat_map(|&im| axis.iter().map(move |&re| to_value(escape_steps(re, im))))
        .collect()
}

fn to_pixel(value: f32) -> u32 {
    pack4x8unorm([value, 0.0, 0.0, 1.0])
}

pub fn render_cpu(dim: u32) -> Result<Bitmap> {
    let packed: Vec<u32> = escape_values_cpu(dim).into_iter().map(to_pixel).collect();
    Bitmap::from_packed(dim, dim, &packed)
}

fn pixel_count(dim: u32) -> usize {
    dim as usize * dim as usize
}

fn round_trip(entry_point: &str, dim: u32) -> RoundTrip<'_> {
    RoundTrip::new(SHADER, entry_point)
        .constant("dim", dim as f64)
        .constant("cx", C.0 as f64)
        .constant("cy", C.1 as f64)
        .input(0, &axis(dim))
        .grid(Grid::tiled(dim, dim, TILE))
}

pub fn escape_values_gpu(context: &GpuContext, dim: u32) -> Result<Vec<f32>> {
    let steps: Vec<u32> = round_trip("escape_steps", dim)
        .output(2, pixel_count(dim) * std::mem::size_of::<u32>())
        .run_typed(context)?;
    Ok(steps.into_iter().map(to_value).collect())
}

pub fn render_gpu(context: &GpuContext, dim: u32) -> Result<Bitmap> {
    let packed: Vec<u32> = round_trip("image", dim)
        .output(1, pixel_count(dim) * std::mem::size_of::<u32>())
        .run_typed(context)?;
    Bitmap::from_packed(dim, dim, &packed)
}

pub fn run_cpu(_session: &mut Session) -> Result<Artifact> {
    render_cpu(DIM).map(Artifact::Image)
}

pub fn run_gpu(session: &mut Session) -> Result<Artifact> {
    render_gpu(session.gpu()?, DIM).map(Artifact::Image)
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    /// The kernel's `fixed_mul`, step for step in wrapping `u32` arithmetic.
    fn fixed_mul_by_halves(a: i32, b: i32) -> i32 {
        let (ua, ub) = (a.unsigned_abs(), b.unsigned_abs());
        let (a0, a1) = (ua & 0xffff, ua >> 16);
        let (b0, b1) = (ub & 0xffff, ub >> 16);
        let p00 = a0.wrapping_mul(b0);
        let p01 = a0.wrapping_mul(b1);
        let p10 = a1.wrapping_mul(b0);
        let mid = (p00 >> 16) + (p01 & 0xffff) + (p10 & 0xffff);
        let lo = (p00 & 0xffff) | (mid << 16);
        let hi = a1.wrapping_mul(b1) + (p01 >> 16) + (p10 >> 16) + (mid >> 16);
        let magnitude = ((hi << (32 - FRACTION_BITS)) | (lo >> FRACTION_BITS)) as i32;
        if (a < 0) != (b < 0) {
            magnitude.wrapping_neg()
        } else {
            magnitude
        }
    }

    #[test]
    fn kernel_multiply_matches_wide_multiply() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..100_000 {
            let a = rng.gen_range(-BOUND..=BOUND);
            let b = rng.gen_range(-BOUND..=BOUND);
            assert_eq!(fixed_mul_by_halves(a, b), fixed_mul(a, b), "{a} * {b}");
        }
        for (a, b) in [(BOUND, BOUND), (-BOUND, BOUND), (0, -7), (-1, 1), (3, -(1 << 20))] {
            assert_eq!(fixed_mul_by_halves(a, b), fixed_mul(a, b), "{a} * {b}");
        }
    }

    #[test]
    fn multiply_truncates_toward_zero() {
        let half = 1 << (FRACTION_BITS - 1);
        assert_eq!(fixed_mul(3, half), 1);
        assert_eq!(fixed_mul(-3, half), -1);
        assert_eq!(fixed_mul(3 << FRACTION_BITS, 5 << FRACTION_BITS), 15 << FRACTION_BITS);
    }

    #[test]
    fn coordinates_span_the_scale() {
        assert_eq!(coordinate(0, DIM), 3 << (FRACTION_BITS - 1));
        assert_eq!(coordinate(DIM / 2, DIM), 0);
        assert_eq!(coordinate(DIM, DIM), -(3 << (FRACTION_BITS - 1)));
        assert_eq!(axis(7).len(), 7);
    }

    #[test]
    fn corner_escapes_on_the_third_step() {
        // (1.5, 1.5) -> (-0.8, 4.656) -> (-21.84, -7.29) -> out.
        assert_eq!(escape_value(0, 0, DIM), 2.0 / 200.0);
    }

    #[test]
    fn values_are_fractions_of_the_iteration_budget() {
        for value in escape_values_cpu(40) {
            assert!((0.0..=1.0).contains(&value));
            let steps = value * MAX_ITERATIONS as f32;
            assert_eq!(steps, steps.round());
        }
    }

    #[test]
    fn the_set_has_interior_and_exterior_points() {
        let values = escape_values_cpu(100);
        assert!(values.iter().any(|&v| v == 1.0));
        assert!(values.iter().any(|&v| v < 0.05));
    }

    #[test]
    fn cpu_image_is_red_on_opaque_black() {
        let bitmap = render_cpu(50).unwrap();
        let [r, g, b, a] = bitmap.pixel(25, 25);
        assert_eq!((g, b, a), (0, 0, 255));
        assert_eq!(r, crate::bitmap::unorm8(escape_value(25, 25, 50)));
    }
}
