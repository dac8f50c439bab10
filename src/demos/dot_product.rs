//! Dot product with a shared-memory tree reduction.
//!
//! Each workgroup accumulates a grid-stride slice of `a[i] * b[i]` per
//! invocation, reduces the 256 partials in workgroup memory by halving the
//! active width with a barrier between steps, and writes one value.  The
//! host adds the per-group results.

use crate::compute::{Grid, RoundTrip};
use crate::demos::{Artifact, Session};
use crate::error::Result;
use crate::GpuContext;

pub const N: usize = 33 * 1024;
pub const WORKGROUP_SIZE: usize = 256;
pub const MAX_WORKGROUPS: usize = 32;

const SHADER: &str = r#"
const WSIZE: u32 = 256u;

var<workgroup> cache: array<f32, WSIZE>;

@group(0) @binding(0) var<storage, read> a: array<f32>;
@group(0) @binding(1) var<storage, read> b: array<f32>;
@group(0) @binding(2) var<storage, read_write> c: array<f32>;

@compute @workgroup_size(WSIZE)
fn dot(
    @builtin(local_invocation_id) iid: vec3<u32>,
    @builtin(workgroup_id) wid: vec3<u32>,
    @builtin(num_workgroups) groups: vec3<u32>,
) {
    let n = arrayLength(&a);
    let cache_id = iid.x;

    var id = iid.x + wid.x * WSIZE;
    var temp = 0.0;
    while (id < n) {
        temp += a[id] * b[id];
        id += WSIZE * groups.x;
    }

    cache[cache_id] = temp;
    workgroupBarrier();

    var i = WSIZE / 2u;
    while (i != 0u) {
        if (cache_id < i) {
            cache[cache_id] += cache[cache_id + i];
        }
        workgroupBarrier();
        i /= 2u;
    }

    if (cache_id == 0u) {
        c[wid.x] = cache[0];
    }
}
"#;

/// Number of workgroups for `n` elements.
pub fn workgroups_for(n: usize) -> usize {
    MAX_WORKGROUPS.min(n.div_ceil(WORKGROUP_SIZE))
}

/// `a[i] = i`, `b[i] = 2i`.
pub fn inputs(n: usize) -> (Vec<f32>, Vec<f32>) {
    let a = (0..n).map(|i| i as f32).collect();
    let b = (0..n).map(|i| (2 * i) as f32).collect();
    (a, b)
}

/// Straight sum of `2i^2` in `f64`.
pub fn host_reference(n: usize) -> f64 {
    (0..n).map(|i| 2.0 * (i as f64) * (i as f64)).sum()
}

/// Host model of the kernel's partition and tree reduction, one partial
/// per workgroup.
pub fn grouped_partials(a: &[f32], b: &[f32], groups: usize, width: usize) -> Vec<f32> {
    let n = a.len().min(b.len());
    (0..groups)
        .map(|group| {
            let mut cache: Vec<f32> = (0..width)
                .map(|lane| {
                    (group * width + lane..n)
                        .step_by(width * groups)
                        .map(|id| a[id] * b[id])
                        .sum::<f32>()
                })
                .collect();
            let mut active = width / 2;
            while active != 0 {
                for lane in 0..active {
                    cache[lane] += cache[lane + active];
                }
                active /= 2;
            }
            cache[0]
        })
        .collect()
}

pub fn gpu_partials(context: &GpuContext, a: &[f32], b: &[f32]) -> Result<Vec<f32>> {
    let groups = workgroups_for(a.len());
    RoundTrip::new(SHADER, "dot")
        .input(0, a)
        .input(1, b)
        .output(2, groups * std::mem::size_of::<f32>())
        .grid(Grid::linear(groups as u32))
        .run_typed(context)
}

pub fn sum_partials(partials: &[f32]) -> f64 {
    partials.iter().map(|&p| p as f64).sum()
}

/// Scientific notation with six fractional digits.
fn scientific(value: f64) -> String {
    format!("{value:.6e}")
}

pub fn run(session: &mut Session) -> Result<Artifact> {
    let (a, b) = inputs(N);
    let gpu = sum_partials(&gpu_partials(session.gpu()?, &a, &b)?);
    let cpu = host_reference(N);
    Ok(Artifact::Text(format!(
        "GPU: {} CPU: {}",
        scientific(gpu),
        scientific(cpu)
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shader_workgroup_size_matches_host_constant() {
        assert!(SHADER.contains(&format!("const WSIZE: u32 = {WORKGROUP_SIZE}u;")));
    }

    #[test]
    fn workgroup_count_is_capped() {
        assert_eq!(workgroups_for(N), 32);
        assert_eq!(workgroups_for(1000), 4);
        assert_eq!(workgroups_for(1), 1);
    }

    #[test]
    fn grouped_reduction_matches_closed_form() {
        let (a, b) = inputs(N);
        let partials = grouped_partials(&a, &b, workgroups_for(N), WORKGROUP_SIZE);
        assert_eq!(partials.len(), 32);

        let grouped = sum_partials(&partials);
        let exact = host_reference(N);
        // 2 * sum(i^2) for i < n is (n - 1) n (2n - 1) / 3.
        let n = N as f64;
        assert_eq!(exact, (n - 1.0) * n * (2.0 * n - 1.0) / 3.0);
        assert!(((grouped - exact) / exact).abs() < 1e-3);
    }

    #[test]
    fn grouped_reduction_handles_ragged_tail() {
        let a = vec![1.0f32; 1000];
        let b = vec![3.0f32; 1000];
        let partials = grouped_partials(&a, &b, workgroups_for(1000), WORKGROUP_SIZE);
        assert_eq!(sum_partials(&partials), 3000.0);
    }

    #[test]
    fn report_format_is_scientific() {
        assert_eq!(scientific(2.5e13), "2.500000e13");
    }
}
