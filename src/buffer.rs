//! Typed GPU buffers and host readback.
//!
//! [`GpuBuffer`] wraps a [`wgpu::Buffer`] together with its element count
//! and a [`Usage`] classification.  Data goes up through the queue (no
//! `MAP_WRITE` needed) and comes back through an asynchronous map of a
//! buffer created with [`Usage::Readback`].  The round trip never pads:
//! byte lengths handed to the backend must already be a multiple of
//! [`wgpu::COPY_BUFFER_ALIGNMENT`]; [`pad_to_word`] does that for callers.

use std::marker::PhantomData;
use std::ops::Range;

use bytemuck::{cast_slice, Pod};
use futures_intrusive::channel::shared::oneshot_channel;
use log::debug;
use wgpu::{Buffer, BufferAddress, BufferDescriptor, BufferUsages};

use crate::compute::SubmissionToken;
use crate::error::{GpuError, Result};
use crate::GpuContext;

/// What a buffer is for.  Each class maps onto a fixed set of wgpu usage
/// flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Usage {
    /// Read by kernels, written by the host.
    Input,
    /// Written by kernels, copied out for readback.
    Output,
    /// Written by the host, read and written by kernels, copied out.
    InputOutput,
    /// Host-mappable staging buffer that receives copies.
    Readback,
    /// Small constant block, rewritten by the host between dispatches.
    Uniform,
}

impl Usage {
    pub fn flags(self) -> BufferUsages {
        match self {
            Usage::Input => BufferUsages::STORAGE | BufferUsages::COPY_DST,
            Usage::Output => BufferUsages::STORAGE | BufferUsages::COPY_SRC,
            Usage::InputOutput => {
                BufferUsages::STORAGE | BufferUsages::COPY_SRC | BufferUsages::COPY_DST
            }
            Usage::Readback => BufferUsages::MAP_READ | BufferUsages::COPY_DST,
            Usage::Uniform => BufferUsages::UNIFORM | BufferUsages::COPY_DST,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Usage::Input => "gpu_buffer_input",
            Usage::Output => "gpu_buffer_output",
            Usage::InputOutput => "gpu_buffer_inout",
            Usage::Readback => "gpu_buffer_readback",
            Usage::Uniform => "gpu_buffer_uniform",
        }
    }
}

/// Zero-pad `bytes` on the right to the next multiple of four so it can be
/// viewed as an array of 32-bit words.
pub fn pad_to_word(bytes: &[u8]) -> Vec<u8> {
    let align = wgpu::COPY_BUFFER_ALIGNMENT as usize;
    let padded_len = bytes.len().div_ceil(align) * align;
    let mut padded = Vec::with_capacity(padded_len);
    padded.extend_from_slice(bytes);
    padded.resize(padded_len, 0);
    padded
}

/// A typed GPU buffer.
///
/// `len` counts elements of `T`; the size in bytes is
/// `len * size_of::<T>()`.  The host data is not retained.
pub struct GpuBuffer<T: Pod> {
    pub buffer: Buffer,
    pub len: usize,
    pub usage: Usage,
    _marker: PhantomData<T>,
}

impl<T: Pod> GpuBuffer<T> {
    /// Allocate a buffer of `len` elements, optionally seeded with
    /// `initial`.
    ///
    /// `initial` may be shorter than `len` (the tail stays zeroed) but not
    /// longer, and its byte length must be a multiple of four.
    pub fn allocate(
        context: &GpuContext,
        len: usize,
        usage: Usage,
        initial: Option<&[T]>,
    ) -> Result<Self> {
        if len == 0 {
            return Err(GpuError::InvalidInput("buffer length must be non-zero".into()));
        }
        let size = len
            .checked_mul(std::mem::size_of::<T>())
            .map(|bytes| bytes as BufferAddress)
            .filter(|&bytes| bytes <= context.device.limits().max_buffer_size)
            .ok_or_else(|| {
                GpuError::InvalidInput(format!(
                    "{len} elements of {} bytes exceed the device's buffer size limit",
                    std::mem::size_of::<T>()
                ))
            })?;
        if let Some(data) = initial {
            if data.len() > len {
                return Err(GpuError::InvalidInput(format!(
                    "initial contents hold {} elements but the buffer holds {len}",
                    data.len()
                )));
            }
            let bytes = cast_slice::<T, u8>(data).len() as u64;
            if bytes % wgpu::COPY_BUFFER_ALIGNMENT != 0 {
                return Err(GpuError::misaligned(
                    "initial contents byte length",
                    bytes,
                    wgpu::COPY_BUFFER_ALIGNMENT,
                ));
            }
        }
        // Mapped and copied ranges must cover whole words, so round the
        // allocation itself up.
        let padded_size = size.div_ceil(wgpu::COPY_BUFFER_ALIGNMENT) * wgpu::COPY_BUFFER_ALIGNMENT;

        let buffer = context.device.create_buffer(&BufferDescriptor {
            label: Some(usage.label()),
            size: padded_size,
            usage: usage.flags(),
            mapped_at_creation: false,
        });
        if let Some(data) = initial.filter(|data| !data.is_empty()) {
            context.queue.write_buffer(&buffer, 0, cast_slice(data));
        }
        debug!("allocated {} ({padded_size} bytes)", usage.label());

        Ok(Self {
            buffer,
            len,
            usage,
            _marker: PhantomData,
        })
    }

    /// Storage buffer filled from `data`.
    pub fn from_slice(context: &GpuContext, data: &[T], usage: Usage) -> Result<Self> {
        Self::allocate(context, data.len(), usage, Some(data))
    }

    /// Kernel-writable buffer of `len` zeroed elements.
    pub fn new_output(context: &GpuContext, len: usize) -> Result<Self> {
        Self::allocate(context, len, Usage::Output, None)
    }

    /// Map-readable staging buffer sized for `len` elements.  It cannot be
    /// bound to a shader.
    pub fn new_download(context: &GpuContext, len: usize) -> Result<Self> {
        Self::allocate(context, len, Usage::Readback, None)
    }

    pub fn byte_len(&self) -> BufferAddress {
        Self::byte_len_of(self.len)
    }

    fn byte_len_of(len: usize) -> BufferAddress {
        (len * std::mem::size_of::<T>()) as BufferAddress
    }

    /// Overwrite the start of the buffer from the host.
    pub fn write(&self, context: &GpuContext, data: &[T]) -> Result<()> {
        if data.len() > self.len {
            return Err(GpuError::InvalidInput(format!(
                "write of {} elements into a buffer of {}",
                data.len(),
                self.len
            )));
        }
        let bytes: &[u8] = cast_slice(data);
        if bytes.len() as u64 % wgpu::COPY_BUFFER_ALIGNMENT != 0 {
            return Err(GpuError::misaligned(
                "write byte length",
                bytes.len() as u64,
                wgpu::COPY_BUFFER_ALIGNMENT,
            ));
        }
        context.queue.write_buffer(&self.buffer, 0, bytes);
        Ok(())
    }

    /// Map `range` (in bytes) for reading once the submission behind
    /// `token` has resolved, and return a copy of the bytes.
    ///
    /// Fails with [`GpuError::MapError`] if the buffer was not created with
    /// [`Usage::Readback`].  The buffer is unmapped before this returns,
    /// whether or not the copy succeeds.
    pub async fn read_range(
        &self,
        context: &GpuContext,
        range: Range<BufferAddress>,
        token: &SubmissionToken,
    ) -> Result<Vec<u8>> {
        read_mapped(context, &self.buffer, range, token).await
    }

    pub fn read_range_blocking(
        &self,
        context: &GpuContext,
        range: Range<BufferAddress>,
        token: &SubmissionToken,
    ) -> Result<Vec<u8>> {
        pollster::block_on(self.read_range(context, range, token))
    }

    /// Read the whole buffer back as typed elements.
    pub fn read_to_vec(&self, context: &GpuContext, token: &SubmissionToken) -> Result<Vec<T>> {
        let bytes = self.read_range_blocking(context, 0..self.byte_len(), token)?;
        Ok(bytemuck::pod_collect_to_vec(&bytes))
    }
}

/// Unmaps the buffer when dropped so every exit path after a successful
/// map releases it.
struct UnmapOnDrop<'a>(&'a Buffer);

impl Drop for UnmapOnDrop<'_> {
    fn drop(&mut self) {
        self.0.unmap();
    }
}

/// Map-read `range` of a raw buffer.  Shared by typed buffers, texture
/// readback and timestamp resolution.
pub(crate) async fn read_mapped(
    context: &GpuContext,
    buffer: &Buffer,
    range: Range<BufferAddress>,
    token: &SubmissionToken,
) -> Result<Vec<u8>> {
    if !buffer.usage().contains(BufferUsages::MAP_READ) {
        return Err(GpuError::MapError(format!(
            "buffer usage {:?} does not include MAP_READ",
            buffer.usage()
        )));
    }
    check_map_range(&range, buffer.size())?;

    let slice = buffer.slice(range.clone());
    let (sender, receiver) = oneshot_channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });

    // The map callback fires from inside poll once the submission that
    // last touched the buffer has finished.
    context
        .device
        .poll(wgpu::PollType::WaitForSubmissionIndex(token.index.clone()))?;
    context.device.poll(wgpu::PollType::Wait)?;

    receiver
        .receive()
        .await
        .ok_or_else(|| GpuError::MapError("map callback dropped".into()))?
        .map_err(|e| GpuError::MapError(e.to_string()))?;

    let _unmap = UnmapOnDrop(buffer);
    let view = slice.get_mapped_range();
    let bytes = view.to_vec();
    drop(view);
    debug!("read back {} bytes", bytes.len());
    Ok(bytes)
}

fn check_map_range(range: &Range<BufferAddress>, size: BufferAddress) -> Result<()> {
    if range.start >= range.end || range.end > size {
        return Err(GpuError::InvalidInput(format!(
            "readback range {range:?} outside buffer of {size} bytes"
        )));
    }
    if range.start % wgpu::MAP_ALIGNMENT != 0 {
        return Err(GpuError::misaligned(
            "readback offset",
            range.start,
            wgpu::MAP_ALIGNMENT,
        ));
    }
    let len = range.end - range.start;
    if len % wgpu::COPY_BUFFER_ALIGNMENT != 0 {
        return Err(GpuError::misaligned(
            "readback length",
            len,
            wgpu::COPY_BUFFER_ALIGNMENT,
        ));
    }
    Ok(())
}
