//! GPU timestamp queries around compute passes.
//!
//! Only available when the device was created with
//! [`wgpu::Features::TIMESTAMP_QUERY`]; [`GpuTimer::new`] reports
//! [`GpuError::FeatureUnavailable`] otherwise so callers can degrade.

use std::time::Duration;

use crate::buffer::read_mapped;
use crate::compute::{CommandRecorder, SubmissionToken};
use crate::error::{GpuError, Result};
use crate::GpuContext;

const QUERY_COUNT: u32 = 2;
const QUERY_BYTES: u64 = QUERY_COUNT as u64 * std::mem::size_of::<u64>() as u64;

/// Raw begin/end timestamps of one pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timestamps {
    pub start: u64,
    pub end: u64,
    /// Nanoseconds per tick, from the queue.
    pub period: f32,
}

impl Timestamps {
    pub fn ticks(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos((self.ticks() as f64 * self.period as f64) as u64)
    }
}

pub struct GpuTimer {
    query_set: wgpu::QuerySet,
    resolve_buffer: wgpu::Buffer,
    read_buffer: wgpu::Buffer,
}

impl GpuTimer {
    pub fn new(context: &GpuContext) -> Result<Self> {
        if !context.has_feature(wgpu::Features::TIMESTAMP_QUERY) {
            return Err(GpuError::FeatureUnavailable("timestamp-query"));
        }
        let device = &context.device;
        let query_set = device.create_query_set(&wgpu::QuerySetDescriptor {
            label: Some("pass_timestamps"),
            ty: wgpu::QueryType::Timestamp,
            count: QUERY_COUNT,
        });
        let resolve_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("timestamp_resolve"),
            size: QUERY_BYTES,
            usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let read_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("timestamp_read"),
            size: QUERY_BYTES,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Ok(Self {
            query_set,
            resolve_buffer,
            read_buffer,
        })
    }

    /// Timestamp writes for the pass being measured.
    pub fn pass_writes(&self) -> wgpu::ComputePassTimestampWrites<'_> {
        wgpu::ComputePassTimestampWrites {
            query_set: &self.query_set,
            beginning_of_pass_write_index: Some(0),
            end_of_pass_write_index: Some(1),
        }
    }

    /// Resolve the queries into the readable buffer.  Record after the
    /// measured pass, in the same submission.
    pub fn record_resolve(&self, recorder: &mut CommandRecorder<'_>) -> Result<()> {
        recorder
            .encoder
            .resolve_query_set(&self.query_set, 0..QUERY_COUNT, &self.resolve_buffer, 0);
        recorder.copy_buffer(&self.resolve_buffer, 0, &self.read_buffer, 0, QUERY_BYTES)
    }

    pub async fn read(&self, context: &GpuContext, token: &SubmissionToken) -> Result<Timestamps> {
        let bytes = read_mapped(context, &self.read_buffer, 0..QUERY_BYTES, token).await?;
        let values: Vec<u64> = bytemuck::pod_collect_to_vec(&bytes);
        Ok(Timestamps {
            start: values[0],
            end: values[1],
            period: context.queue.get_timestamp_period(),
        })
    }

    pub fn read_blocking(&self, context: &GpuContext, token: &SubmissionToken) -> Result<Timestamps> {
        pollster::block_on(self.read(context, token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_scales_ticks_by_period() {
        let stamps = Timestamps {
            start: 1_000,
            end: 3_000,
            period: 1.5,
        };
        assert_eq!(stamps.ticks(), 2_000);
        assert_eq!(stamps.elapsed(), Duration::from_nanos(3_000));
    }

    #[test]
    fn reversed_stamps_do_not_underflow() {
        let stamps = Timestamps {
            start: 10,
            end: 5,
            period: 1.0,
        };
        assert_eq!(stamps.ticks(), 0);
    }

    #[test]
    fn stamps_compare_by_value() {
        let stamps = Timestamps {
            start: 7,
            end: 9,
            period: 0.5,
        };
        let copy = stamps;
        assert_eq!(copy, stamps);
        assert_ne!(Timestamps { period: 1.0, ..stamps }, stamps);
    }
}
