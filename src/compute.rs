//! Kernels, dispatch and the compute round trip.
//!
//! The pieces here cover everything between a WGSL string and the bytes
//! that come back from the device:
//!
//! * [`Kernel`] compiles source into a compute pipeline.  Validation errors
//!   raised by the backend are captured with an error scope and surface as
//!   [`GpuError::CompileError`]; nothing is checked locally.
//! * [`Binding`] and [`Kernel::bind_group`] attach buffers and texture views
//!   to binding slots of group 0.
//! * [`CommandRecorder`] records compute passes and copies into a single
//!   submission and hands back a [`SubmissionToken`].  Bind groups and
//!   submissions are validated under an error scope too, so a mismatched
//!   binding is a [`GpuError::InvalidInput`] rather than a panic.
//! * [`RoundTrip`] chains all of the above for the common case of one
//!   dispatch followed by one readback.

use std::borrow::Cow;
use std::ops::Range;

use bytemuck::Pod;
use log::debug;
use wgpu::{BufferAddress, ShaderModuleDescriptor, ShaderSource};

use crate::buffer::{GpuBuffer, Usage};
use crate::error::{GpuError, Result};
use crate::GpuContext;

/// Proof that a batch of commands was handed to the queue.  Readbacks take
/// the token of the submission that produced their data.
#[derive(Debug, Clone)]
pub struct SubmissionToken {
    pub(crate) index: wgpu::SubmissionIndex,
}

/// Workgroup counts along x, y and z.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grid {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl Grid {
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    pub const fn linear(x: u32) -> Self {
        Self::new(x, 1, 1)
    }

    pub const fn planar(x: u32, y: u32) -> Self {
        Self::new(x, y, 1)
    }

    /// Enough workgroups of `workgroup_size` invocations to cover
    /// `invocations`, folded into a second dimension when the first would
    /// exceed `limit`.  Kernels must guard against the overshoot.
    pub fn covering(invocations: u32, workgroup_size: u32, limit: u32) -> Self {
        let total_groups = invocations.div_ceil(workgroup_size);
        let (x, y) = split_workgroups(total_groups, limit);
        Self::planar(x, y)
    }

    /// Workgroups covering a `width` x `height` image with square tiles of
    /// `tile` invocations per side.
    pub fn tiled(width: u32, height: u32, tile: u32) -> Self {
        Self::planar(width.div_ceil(tile), height.div_ceil(tile))
    }

    pub fn workgroups(&self) -> u64 {
        self.x as u64 * self.y as u64 * self.z as u64
    }

    fn validate(&self, limits: &wgpu::Limits) -> Result<()> {
        let limit = limits.max_compute_workgroups_per_dimension;
        if self.x == 0 || self.y == 0 || self.z == 0 {
            return Err(GpuError::InvalidInput(format!("empty dispatch grid {self:?}")));
        }
        if self.x > limit || self.y > limit || self.z > limit {
            return Err(GpuError::InvalidInput(format!(
                "dispatch grid {self:?} exceeds {limit} workgroups per dimension"
            )));
        }
        Ok(())
    }
}

/// Calculate an (x, y) workgroup grid that covers `total_groups`
/// workgroups without exceeding the per-dimension limit.
fn split_workgroups(total_groups: u32, limit: u32) -> (u32, u32) {
    if total_groups <= limit {
        (total_groups, 1)
    } else {
        (limit, total_groups.div_ceil(limit))
    }
}

/// A resource bound to one slot of bind group 0.
#[derive(Debug, Clone, Copy)]
pub enum Binding<'a> {
    Buffer(&'a wgpu::Buffer),
    Texture(&'a wgpu::TextureView),
}

impl<'a, T: Pod> From<&'a GpuBuffer<T>> for Binding<'a> {
    fn from(buffer: &'a GpuBuffer<T>) -> Self {
        Binding::Buffer(&buffer.buffer)
    }
}

impl<'a> From<&'a wgpu::TextureView> for Binding<'a> {
    fn from(view: &'a wgpu::TextureView) -> Self {
        Binding::Texture(view)
    }
}

/// A compiled compute pipeline for one entry point.
pub struct Kernel {
    pub pipeline: wgpu::ComputePipeline,
    layout: Option<wgpu::BindGroupLayout>,
    entry_point: String,
}

/// Builder for [`Kernel`], used when a kernel needs pipeline-overridable
/// constants or an explicit binding layout.
pub struct KernelBuilder<'a> {
    source: &'a str,
    entry_point: &'a str,
    constants: Vec<(&'a str, f64)>,
    layout: Option<&'a [wgpu::BindGroupLayoutEntry]>,
}

impl<'a> KernelBuilder<'a> {
    /// Set a WGSL `override` value.
    pub fn constant(mut self, name: &'a str, value: f64) -> Self {
        self.constants.push((name, value));
        self
    }

    /// Use an explicit layout for group 0 instead of deriving it from the
    /// shader.  Needed for bindings whose derived type would be wrong, such
    /// as non-filterable float textures.
    pub fn layout(mut self, entries: &'a [wgpu::BindGroupLayoutEntry]) -> Self {
        self.layout = Some(entries);
        self
    }

    pub fn build(self, context: &GpuContext) -> Result<Kernel> {
        pollster::block_on(self.build_async(context))
    }

    pub async fn build_async(self, context: &GpuContext) -> Result<Kernel> {
        let device = &context.device;
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let module = device.create_shader_module(ShaderModuleDescriptor {
            label: Some(self.entry_point),
            source: ShaderSource::Wgsl(Cow::Borrowed(self.source)),
        });
        let explicit_layout = self.layout.map(|entries| {
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("kernel_bind_group_layout"),
                entries,
            })
        });
        let pipeline_layout = explicit_layout.as_ref().map(|layout| {
            device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("kernel_pipeline_layout"),
                bind_group_layouts: &[layout],
                push_constant_ranges: &[],
            })
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(self.entry_point),
            layout: pipeline_layout.as_ref(),
            module: &module,
            entry_point: Some(self.entry_point),
            compilation_options: wgpu::PipelineCompilationOptions {
                constants: &self.constants,
                ..Default::default()
            },
            cache: None,
        });

        if let Some(error) = device.pop_error_scope().await {
            return Err(GpuError::CompileError(error.to_string()));
        }
        debug!(
            "compiled kernel `{}` with {} constants",
            self.entry_point,
            self.constants.len()
        );

        Ok(Kernel {
            pipeline,
            layout: explicit_layout,
            entry_point: self.entry_point.to_owned(),
        })
    }
}

impl Kernel {
    pub fn builder<'a>(source: &'a str, entry_point: &'a str) -> KernelBuilder<'a> {
        KernelBuilder {
            source,
            entry_point,
            constants: Vec::new(),
            layout: None,
        }
    }

    /// Compile `source` for `entry_point` with the given overridable
    /// constants and a layout derived from the shader.
    pub fn build(
        context: &GpuContext,
        source: &str,
        entry_point: &str,
        constants: &[(&str, f64)],
    ) -> Result<Kernel> {
        constants
            .iter()
            .fold(Kernel::builder(source, entry_point), |builder, &(name, value)| {
                builder.constant(name, value)
            })
            .build(context)
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    /// Attach resources to the kernel's group 0.  A binding that does not
    /// match the kernel's layout is reported as [`GpuError::InvalidInput`].
    pub fn bind_group(
        &self,
        context: &GpuContext,
        bindings: &[(u32, Binding<'_>)],
    ) -> Result<wgpu::BindGroup> {
        let derived;
        let layout = match &self.layout {
            Some(layout) => layout,
            None => {
                derived = self.pipeline.get_bind_group_layout(0);
                &derived
            }
        };
        let entries: Vec<wgpu::BindGroupEntry<'_>> = bindings
            .iter()
            .map(|(slot, binding)| wgpu::BindGroupEntry {
                binding: *slot,
                resource: match binding {
                    Binding::Buffer(buffer) => buffer.as_entire_binding(),
                    Binding::Texture(view) => wgpu::BindingResource::TextureView(view),
                },
            })
            .collect();
        validated(context, "bind group", || {
            context.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("kernel_bind_group"),
                layout,
                entries: &entries,
            })
        })
    }
}

/// Run `f` inside a validation error scope.  Whatever the backend rejects
/// comes back as [`GpuError::InvalidInput`] instead of reaching the
/// device's uncaptured error handler.
pub(crate) fn validated<R>(context: &GpuContext, what: &str, f: impl FnOnce() -> R) -> Result<R> {
    context.device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = f();
    match pollster::block_on(context.device.pop_error_scope()) {
        Some(error) => Err(GpuError::InvalidInput(format!("{what} rejected: {error}"))),
        None => Ok(value),
    }
}

/// Records passes and copies into one command buffer.
pub struct CommandRecorder<'c> {
    context: &'c GpuContext,
    pub encoder: wgpu::CommandEncoder,
}

impl<'c> CommandRecorder<'c> {
    pub fn new(context: &'c GpuContext, label: &str) -> Self {
        let encoder = context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
        Self { context, encoder }
    }

    /// Record one compute pass over `grid`.
    pub fn compute_pass(
        &mut self,
        kernel: &Kernel,
        bind_group: Option<&wgpu::BindGroup>,
        grid: Grid,
    ) -> Result<()> {
        self.compute_pass_timed(kernel, bind_group, grid, None)
    }

    /// Like [`Self::compute_pass`], with timestamps written at the start and
    /// end of the pass.
    pub fn compute_pass_timed(
        &mut self,
        kernel: &Kernel,
        bind_group: Option<&wgpu::BindGroup>,
        grid: Grid,
        timestamp_writes: Option<wgpu::ComputePassTimestampWrites<'_>>,
    ) -> Result<()> {
        grid.validate(&self.context.device.limits())?;
        debug!(
            "dispatch `{}` over {}x{}x{} workgroups",
            kernel.entry_point, grid.x, grid.y, grid.z
        );
        let mut cpass = self.encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(kernel.entry_point()),
            timestamp_writes,
        });
        cpass.set_pipeline(&kernel.pipeline);
        if let Some(bind_group) = bind_group {
            cpass.set_bind_group(0, bind_group, &[]);
        }
        cpass.dispatch_workgroups(grid.x, grid.y, grid.z);
        Ok(())
    }

    /// Copy `size` bytes between buffers.  Offsets and size must be
    /// multiples of four.
    pub fn copy_buffer(
        &mut self,
        source: &wgpu::Buffer,
        source_offset: BufferAddress,
        destination: &wgpu::Buffer,
        destination_offset: BufferAddress,
        size: BufferAddress,
    ) -> Result<()> {
        for (what, value) in [
            ("copy source offset", source_offset),
            ("copy destination offset", destination_offset),
            ("copy size", size),
        ] {
            if value % wgpu::COPY_BUFFER_ALIGNMENT != 0 {
                return Err(GpuError::misaligned(what, value, wgpu::COPY_BUFFER_ALIGNMENT));
            }
        }
        self.encoder
            .copy_buffer_to_buffer(source, source_offset, destination, destination_offset, size);
        Ok(())
    }

    /// Finish the command buffer and queue it.  Encoding errors are
    /// reported here, when the backend validates the finished buffer.
    pub fn submit(self) -> Result<SubmissionToken> {
        let Self { context, encoder } = self;
        let index = validated(context, "submission", || {
            context.queue.submit([encoder.finish()])
        })?;
        Ok(SubmissionToken { index })
    }
}

/// Encode and submit a single compute pass.
pub fn dispatch(
    context: &GpuContext,
    kernel: &Kernel,
    bind_group: Option<&wgpu::BindGroup>,
    grid: Grid,
) -> Result<SubmissionToken> {
    let mut recorder = CommandRecorder::new(context, "dispatch");
    recorder.compute_pass(kernel, bind_group, grid)?;
    recorder.submit()
}

/// Where a [`RoundTrip`] currently is.  `Resolved` and `Failed` are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundTripState {
    Uninitialized,
    DeviceAcquired,
    PipelineReady,
    BuffersBound,
    Submitted,
    Resolved,
    Failed,
}

struct Slot {
    binding: u32,
    usage: Usage,
    len: usize,
    contents: Option<Vec<u8>>,
}

/// One dispatch plus one readback, assembled step by step.
///
/// ```no_run
/// use wgpu_by_example::{GpuContext, Grid, RoundTrip};
///
/// const SHADER: &str = r#"
/// @group(0) @binding(0) var<storage, read> a: array<i32>;
/// @group(0) @binding(1) var<storage, read_write> c: array<i32>;
/// @compute @workgroup_size(1)
/// fn negate(@builtin(workgroup_id) id: vec3<u32>) { c[id.x] = -a[id.x]; }
/// "#;
///
/// let context = GpuContext::new_blocking()?;
/// let out: Vec<i32> = RoundTrip::new(SHADER, "negate")
///     .input(0, &[1i32, 2, 3])
///     .output(1, 3 * 4)
///     .grid(Grid::linear(3))
///     .run_typed(&context)?;
/// assert_eq!(out, [-1, -2, -3]);
/// # Ok::<(), wgpu_by_example::GpuError>(())
/// ```
pub struct RoundTrip<'a> {
    source: &'a str,
    entry_point: &'a str,
    constants: Vec<(&'a str, f64)>,
    slots: Vec<Slot>,
    read: Option<(u32, Option<Range<BufferAddress>>)>,
    grid: Grid,
    state: RoundTripState,
}

impl<'a> RoundTrip<'a> {
    pub fn new(source: &'a str, entry_point: &'a str) -> Self {
        Self {
            source,
            entry_point,
            constants: Vec::new(),
            slots: Vec::new(),
            read: None,
            grid: Grid::linear(1),
            state: RoundTripState::Uninitialized,
        }
    }

    pub fn constant(mut self, name: &'a str, value: f64) -> Self {
        self.constants.push((name, value));
        self
    }

    /// Read-only storage buffer at `binding`.
    pub fn input<T: Pod>(self, binding: u32, data: &[T]) -> Self {
        self.slot(binding, Usage::Input, data)
    }

    /// Storage buffer the kernel both reads and writes.
    pub fn input_output<T: Pod>(self, binding: u32, data: &[T]) -> Self {
        self.slot(binding, Usage::InputOutput, data)
    }

    pub fn uniform<T: Pod>(self, binding: u32, value: &T) -> Self {
        self.slot(binding, Usage::Uniform, std::slice::from_ref(value))
    }

    /// Zeroed, kernel-writable buffer of `size_bytes` at `binding`.  The
    /// first output declared is read back unless [`Self::read`] says
    /// otherwise.
    pub fn output(mut self, binding: u32, size_bytes: usize) -> Self {
        self.slots.push(Slot {
            binding,
            usage: Usage::Output,
            len: size_bytes,
            contents: None,
        });
        if self.read.is_none() {
            self.read = Some((binding, None));
        }
        self
    }

    /// Read back `range` (bytes) of the buffer at `binding` instead of the
    /// whole first output.
    pub fn read(mut self, binding: u32, range: Range<BufferAddress>) -> Self {
        self.read = Some((binding, Some(range)));
        self
    }

    pub fn grid(mut self, grid: Grid) -> Self {
        self.grid = grid;
        self
    }

    pub fn state(&self) -> RoundTripState {
        self.state
    }

    fn slot<T: Pod>(mut self, binding: u32, usage: Usage, data: &[T]) -> Self {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        self.slots.push(Slot {
            binding,
            usage,
            len: bytes.len(),
            contents: Some(bytes.to_vec()),
        });
        self
    }

    fn advance(&mut self, next: RoundTripState) {
        debug!("round trip `{}`: {:?} -> {next:?}", self.entry_point, self.state);
        self.state = next;
    }

    /// Run the round trip on `context` and return the bytes read back.
    pub async fn run(&mut self, context: &GpuContext) -> Result<Vec<u8>> {
        match self.execute(context).await {
            Ok(bytes) => {
                self.advance(RoundTripState::Resolved);
                Ok(bytes)
            }
            Err(error) => {
                self.advance(RoundTripState::Failed);
                Err(error)
            }
        }
    }

    pub fn run_blocking(&mut self, context: &GpuContext) -> Result<Vec<u8>> {
        pollster::block_on(self.run(context))
    }

    /// Blocking run that reinterprets the bytes as `T`.
    pub fn run_typed<T: Pod>(mut self, context: &GpuContext) -> Result<Vec<T>> {
        let bytes = self.run_blocking(context)?;
        Ok(bytemuck::pod_collect_to_vec(&bytes))
    }

    async fn execute(&mut self, context: &GpuContext) -> Result<Vec<u8>> {
        if self.state != RoundTripState::Uninitialized {
            return Err(GpuError::InvalidInput(format!(
                "round trip already ran (state {:?})",
                self.state
            )));
        }
        self.advance(RoundTripState::DeviceAcquired);

        let mut kernel = Kernel::builder(self.source, self.entry_point);
        for &(name, value) in &self.constants {
            kernel = kernel.constant(name, value);
        }
        let kernel = kernel.build_async(context).await?;
        self.advance(RoundTripState::PipelineReady);

        let (read_binding, read_range) = self
            .read
            .clone()
            .ok_or_else(|| GpuError::InvalidInput("round trip has nothing to read back".into()))?;
        let buffers = self
            .slots
            .iter()
            .map(|slot| {
                GpuBuffer::<u8>::allocate(context, slot.len, slot.usage, slot.contents.as_deref())
                    .map(|buffer| (slot.binding, buffer))
            })
            .collect::<Result<Vec<_>>>()?;
        let source = buffers
            .iter()
            .find(|(binding, _)| *binding == read_binding)
            .map(|(_, buffer)| buffer)
            .ok_or_else(|| {
                GpuError::InvalidInput(format!("no buffer bound at binding {read_binding}"))
            })?;
        if !source.buffer.usage().contains(wgpu::BufferUsages::COPY_SRC) {
            return Err(GpuError::MapError(format!(
                "binding {read_binding} cannot be copied out for readback"
            )));
        }
        let range = read_range.unwrap_or(0..source.byte_len());
        let range_len = range.end.saturating_sub(range.start);
        if range_len == 0 || range.end > source.buffer.size() {
            return Err(GpuError::InvalidInput(format!(
                "readback range {range:?} outside binding {read_binding}"
            )));
        }
        let staging = GpuBuffer::<u8>::new_download(context, range_len as usize)?;

        let bindings: Vec<(u32, Binding<'_>)> = buffers
            .iter()
            .map(|(binding, buffer)| (*binding, Binding::from(buffer)))
            .collect();
        let bind_group = kernel.bind_group(context, &bindings)?;
        self.advance(RoundTripState::BuffersBound);

        let mut recorder = CommandRecorder::new(context, "round_trip");
        recorder.compute_pass(&kernel, Some(&bind_group), self.grid)?;
        recorder.copy_buffer(&source.buffer, range.start, &staging.buffer, 0, range_len)?;
        let token = recorder.submit()?;
        self.advance(RoundTripState::Submitted);

        staging.read_range(context, 0..range_len, &token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_workgroups_folds_into_second_dimension() {
        assert_eq!(split_workgroups(10, 65535), (10, 1));
        assert_eq!(split_workgroups(65535, 65535), (65535, 1));
        assert_eq!(split_workgroups(65536, 65535), (65535, 2));
        assert_eq!(split_workgroups(200_000, 65535), (65535, 4));
    }

    #[test]
    fn covering_grid_rounds_up() {
        assert_eq!(Grid::covering(1000, 64, 65535), Grid::linear(16));
        assert_eq!(Grid::covering(1024, 64, 65535), Grid::linear(16));
        assert_eq!(Grid::tiled(1000, 1000, 16), Grid::planar(63, 63));
    }

    #[test]
    fn grid_validation_rejects_empty_and_oversized() {
        let limits = wgpu::Limits::downlevel_defaults();
        assert!(Grid::planar(1024, 1024).validate(&limits).is_ok());
        assert!(matches!(
            Grid::new(0, 1, 1).validate(&limits),
            Err(GpuError::InvalidInput(_))
        ));
        assert!(matches!(
            Grid::linear(limits.max_compute_workgroups_per_dimension + 1).validate(&limits),
            Err(GpuError::InvalidInput(_))
        ));
    }

    #[test]
    fn first_output_is_read_back_by_default() {
        let trip = RoundTrip::new("", "main")
            .input(0, &[1u32, 2])
            .output(1, 8)
            .output(2, 8);
        assert_eq!(trip.read, Some((1, None)));
        assert_eq!(trip.state(), RoundTripState::Uninitialized);
        assert_eq!(trip.slots.len(), 3);
        assert_eq!(trip.slots[0].len, 8);
    }

    #[test]
    fn explicit_read_overrides_default() {
        let trip = RoundTrip::new("", "main")
            .input_output(0, &[2u32, 7, 0])
            .read(0, 8..12);
        assert_eq!(trip.read, Some((0, Some(8..12))));
    }
}
