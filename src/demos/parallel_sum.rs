//! Element-wise vector sum, partitioned three ways.
//!
//! The same `c[i] = a[i] + b[i]` is spread across workgroups of one
//! invocation each, across the invocations of a single workgroup, or
//! across both with a bounds guard.  All three must agree.

use crate::compute::{Grid, RoundTrip};
use crate::demos::{Artifact, Session};
use crate::error::Result;
use crate::GpuContext;

pub const N: usize = 10;

/// How the elements are spread over the dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Partition {
    /// `N` workgroups with one invocation each.
    Workgroups,
    /// One workgroup with `N` invocations.
    Invocations,
    /// Workgroups of [`BOTH_WORKGROUP_SIZE`] invocations covering `N`.
    Both,
}

pub const BOTH_WORKGROUP_SIZE: u32 = 4;

const WORKGROUPS_SHADER: &str = r#"
@group(0) @binding(0) var<storage, read> a: array<i32>;
@group(0) @binding(1) var<storage, read> b: array<i32>;
@group(0) @binding(2) var<storage, read_write> c: array<i32>;

@compute @workgroup_size(1)
fn add(@builtin(workgroup_id) id: vec3<u32>) {
    let i = id.x;
    c[i] = a[i] + b[i];
}
"#;

const BOTH_SHADER: &str = r#"
@group(0) @binding(0) var<storage, read> a: array<i32>;
@group(0) @binding(1) var<storage, read> b: array<i32>;
@group(0) @binding(2) var<storage, read_write> c: array<i32>;

@compute @workgroup_size(4)
fn add(@builtin(global_invocation_id) id: vec3<u32>) {
    let i = id.x;
    if (i >= arrayLength(&c)) {
        return;
    }
    c[i] = a[i] + b[i];
}
"#;

/// The single-workgroup kernel needs its workgroup size baked in.
fn invocations_shader(n: usize) -> String {
    format!(
        r#"
@group(0) @binding(0) var<storage, read> a: array<i32>;
@group(0) @binding(1) var<storage, read> b: array<i32>;
@group(0) @binding(2) var<storage, read_write> c: array<i32>;

@compute @workgroup_size({n})
fn add(@builtin(local_invocation_id) id: vec3<u32>) {{
    let i = id.x;
    c[i] = a[i] + b[i];
}}
"#
    )
}

/// `a[i] = -i`, `b[i] = i * i`.
pub fn inputs(n: usize) -> (Vec<i32>, Vec<i32>) {
    let a = (0..n as i32).map(|i| -i).collect();
    let b = (0..n as i32).map(|i| i * i).collect();
    (a, b)
}

pub fn host_sum(a: &[i32], b: &[i32]) -> Vec<i32> {
    a.iter().zip(b).map(|(x, y)| x + y).collect()
}

pub fn gpu_sum(context: &GpuContext, a: &[i32], b: &[i32], partition: Partition) -> Result<Vec<i32>> {
    let n = a.len().min(b.len());
    let invocations;
    let (source, grid) = match partition {
        Partition::Workgroups => (WORKGROUPS_SHADER, Grid::linear(n as u32)),
        Partition::Invocations => {
            invocations = invocations_shader(n);
            (invocations.as_str(), Grid::linear(1))
        }
        Partition::Both => (
            BOTH_SHADER,
            Grid::covering(
                n as u32,
                BOTH_WORKGROUP_SIZE,
                context.limits().max_compute_workgroups_per_dimension,
            ),
        ),
    };
    RoundTrip::new(source, "add")
        .input(0, &a[..n])
        .input(1, &b[..n])
        .output(2, n * std::mem::size_of::<i32>())
        .grid(grid)
        .run_typed(context)
}

fn report(a: &[i32], b: &[i32], c: &[i32]) -> String {
    a.iter()
        .zip(b)
        .zip(c)
        .map(|((x, y), z)| format!("{x} + {y} = {z}\n"))
        .collect()
}

fn run_with(session: &mut Session, partition: Partition) -> Result<Artifact> {
    let (a, b) = inputs(N);
    let c = gpu_sum(session.gpu()?, &a, &b, partition)?;
    Ok(Artifact::Text(report(&a, &b, &c)))
}

pub fn run_workgroups(session: &mut Session) -> Result<Artifact> {
    run_with(session, Partition::Workgroups)
}

pub fn run_invocations(session: &mut Session) -> Result<Artifact> {
    run_with(session, Partition::Invocations)
}

pub fn run_both(session: &mut Session) -> Result<Artifact> {
    run_with(session, Partition::Both)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_sum_is_square_minus_index() {
        let (a, b) = inputs(N);
        let c = host_sum(&a, &b);
        for (i, value) in c.iter().enumerate() {
            let i = i as i32;
            assert_eq!(*value, i * i - i);
        }
    }

    #[test]
    fn invocations_shader_bakes_in_the_size() {
        assert!(invocations_shader(10).contains("@workgroup_size(10)"));
        assert!(BOTH_SHADER.contains(&format!("@workgroup_size({BOTH_WORKGROUP_SIZE})")));
    }

    #[test]
    fn report_lists_every_element() {
        let text = report(&[0, -1], &[0, 1], &[0, 0]);
        assert_eq!(text, "0 + 0 = 0\n-1 + 1 = 0\n");
    }
}
