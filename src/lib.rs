//! GPU programming demos in the style of *CUDA by Example*, built on a
//! small [wgpu](https://github.com/gfx-rs/wgpu) compute layer.
//!
//! Every demo follows the same round trip: acquire a device, compile a
//! kernel, allocate buffers or textures, dispatch, read the results back
//! and hand them to the caller.  The layer under the demos makes that
//! sequence a handful of calls:
//!
//! * [`GpuContext`] owns the adapter, device and queue.
//! * [`GpuBuffer`] and [`GpuTexture`] allocate device memory and read it
//!   back through an asynchronous map.
//! * [`Kernel`], [`CommandRecorder`] and [`RoundTrip`] compile, bind,
//!   dispatch and resolve.
//! * [`GpuTimer`] measures passes when the device supports timestamp
//!   queries.
//!
//! The blocking wrappers wait for the device before returning.  For async
//! use, the `*_async` and `run` variants return futures and the
//! `wgpu::Device` and `wgpu::Queue` are public on the context.
//!
//! The [`demos`] module holds the demos themselves and a registry that the
//! `wgpu-by-example` binary dispatches on.

pub mod bitmap;
pub mod buffer;
pub mod compute;
pub mod context;
pub mod demos;
pub mod error;
pub mod texture;
pub mod timing;

pub use bitmap::Bitmap;
pub use buffer::{pad_to_word, GpuBuffer, Usage};
pub use compute::{
    dispatch, Binding, CommandRecorder, Grid, Kernel, KernelBuilder, RoundTrip, RoundTripState,
    SubmissionToken,
};
pub use context::{ContextOptions, GpuContext};
pub use error::{GpuError, Result};
pub use texture::{GpuTexture, RowLayout};
pub use timing::{GpuTimer, Timestamps};
