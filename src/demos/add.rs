//! The smallest possible round trip: add two numbers in place.

use crate::compute::{Grid, RoundTrip};
use crate::demos::{Artifact, Session};
use crate::error::{GpuError, Result};
use crate::GpuContext;

const SHADER: &str = r#"
@group(0) @binding(0) var<storage, read_write> data: array<u32, 3>;

@compute @workgroup_size(1)
fn add() {
    data[2] = data[0] + data[1];
}
"#;

const SIZEOF_U32: u64 = std::mem::size_of::<u32>() as u64;

/// `a + b` (wrapping) computed by a single invocation.  Only the third
/// element is copied back.
pub fn add_on_gpu(context: &GpuContext, a: u32, b: u32) -> Result<u32> {
    let sum: Vec<u32> = RoundTrip::new(SHADER, "add")
        .input_output(0, &[a, b, 0])
        .read(0, 2 * SIZEOF_U32..3 * SIZEOF_U32)
        .grid(Grid::linear(1))
        .run_typed(context)?;
    sum.first()
        .copied()
        .ok_or_else(|| GpuError::MapError("empty readback".into()))
}

pub fn run(session: &mut Session) -> Result<Artifact> {
    let (a, b) = (2, 7);
    let sum = add_on_gpu(session.gpu()?, a, b)?;
    Ok(Artifact::Text(format!("{a} + {b} = {sum}")))
}
