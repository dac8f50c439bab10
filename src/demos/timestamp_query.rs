//! Timing a deliberately busy kernel with timestamp queries.

use crate::compute::{CommandRecorder, Grid, Kernel};
use crate::demos::{Artifact, Session};
use crate::error::Result;
use crate::timing::{GpuTimer, Timestamps};
use crate::GpuContext;

pub const WORKGROUPS: u32 = 1000;

const SHADER: &str = r#"
@compute @workgroup_size(64)
fn spin() {
    var total = 0;
    for (var i = 0; i < 10000; i++) {
        total += i;
    }
}
"#;

/// Dispatch the spin kernel and return the timestamps around its pass.
/// Fails with `FeatureUnavailable` when the device has no timestamp
/// queries.
pub fn time_spin(context: &GpuContext) -> Result<Timestamps> {
    let timer = GpuTimer::new(context)?;
    let kernel = Kernel::build(context, SHADER, "spin", &[])?;

    let mut recorder = CommandRecorder::new(context, "timestamp_query");
    recorder.compute_pass_timed(
        &kernel,
        None,
        Grid::linear(WORKGROUPS),
        Some(timer.pass_writes()),
    )?;
    timer.record_resolve(&mut recorder)?;
    let token = recorder.submit()?;

    timer.read_blocking(context, &token)
}

pub fn report(stamps: &Timestamps) -> String {
    format!(
        "Start: {}; End: {}; Elapsed: {} ({:?})",
        stamps.start,
        stamps.end,
        stamps.ticks(),
        stamps.elapsed()
    )
}

pub fn run(session: &mut Session) -> Result<Artifact> {
    let stamps = time_spin(session.gpu()?)?;
    Ok(Artifact::Text(report(&stamps)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_lists_raw_and_elapsed_ticks() {
        let stamps = Timestamps {
            start: 100,
            end: 350,
            period: 2.0,
        };
        assert_eq!(report(&stamps), "Start: 100; End: 350; Elapsed: 250 (500ns)");
    }
}
