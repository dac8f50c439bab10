//! 2-D textures and texture readback.
//!
//! Texture-to-buffer copies need every row to start on a
//! [`wgpu::COPY_BYTES_PER_ROW_ALIGNMENT`] boundary.  [`RowLayout`] computes
//! the padded pitch and strips the padding again on the host.

use bytemuck::Pod;
use wgpu::{Extent3d, TextureFormat, TextureUsages};

use crate::buffer::GpuBuffer;
use crate::compute::{CommandRecorder, SubmissionToken};
use crate::error::{GpuError, Result};
use crate::GpuContext;

/// Row pitch of an image copied out of a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowLayout {
    pub unpadded_bytes_per_row: u32,
    pub padded_bytes_per_row: u32,
    pub rows: u32,
}

impl RowLayout {
    pub fn new(width: u32, bytes_per_pixel: u32, rows: u32) -> Self {
        let unpadded_bytes_per_row = width * bytes_per_pixel;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        Self {
            unpadded_bytes_per_row,
            padded_bytes_per_row: unpadded_bytes_per_row.div_ceil(align) * align,
            rows,
        }
    }

    pub fn padded_size(&self) -> u64 {
        self.padded_bytes_per_row as u64 * self.rows as u64
    }

    /// Drop the per-row padding from a copied image.
    pub fn unpad(&self, padded: &[u8]) -> Vec<u8> {
        let unpadded = self.unpadded_bytes_per_row as usize;
        padded
            .chunks(self.padded_bytes_per_row as usize)
            .take(self.rows as usize)
            .flat_map(|row| &row[..unpadded])
            .copied()
            .collect()
    }
}

/// A 2-D texture with a default view.
pub struct GpuTexture {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
}

impl GpuTexture {
    pub fn new(
        context: &GpuContext,
        label: &str,
        width: u32,
        height: u32,
        format: TextureFormat,
        usage: TextureUsages,
    ) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(GpuError::InvalidInput(format!(
                "texture `{label}` has empty extent {width}x{height}"
            )));
        }
        let texture = context.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(Self {
            texture,
            view,
            width,
            height,
            format,
        })
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        self.format
            .block_copy_size(Some(wgpu::TextureAspect::All))
            .unwrap_or(4)
    }

    fn extent(&self) -> Extent3d {
        Extent3d {
            width: self.width,
            height: self.height,
            depth_or_array_layers: 1,
        }
    }

    /// Upload a full image.  `texels` must hold exactly one value per
    /// pixel channel block, row-major with no padding.
    pub fn write_texels<T: Pod>(&self, context: &GpuContext, texels: &[T]) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(texels);
        let bytes_per_row = self.width * self.bytes_per_pixel();
        let expected = bytes_per_row as usize * self.height as usize;
        if bytes.len() != expected {
            return Err(GpuError::InvalidInput(format!(
                "texture upload of {} bytes, expected {expected}",
                bytes.len()
            )));
        }
        context.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytes,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(self.height),
            },
            self.extent(),
        );
        Ok(())
    }

    /// Record a copy of the whole texture into a fresh staging buffer.  The
    /// texture needs [`TextureUsages::COPY_SRC`].
    pub fn record_readback(
        &self,
        context: &GpuContext,
        recorder: &mut CommandRecorder<'_>,
    ) -> Result<TextureReadback> {
        if !self.texture.usage().contains(TextureUsages::COPY_SRC) {
            return Err(GpuError::MapError(
                "texture was not created with COPY_SRC".into(),
            ));
        }
        let layout = RowLayout::new(self.width, self.bytes_per_pixel(), self.height);
        let staging = GpuBuffer::<u8>::new_download(context, layout.padded_size() as usize)?;
        recorder.encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging.buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(layout.padded_bytes_per_row),
                    rows_per_image: Some(self.height),
                },
            },
            self.extent(),
        );
        Ok(TextureReadback { staging, layout })
    }
}

/// A pending texture copy.  Resolve it with the token of the submission
/// that carried the copy.
pub struct TextureReadback {
    staging: GpuBuffer<u8>,
    layout: RowLayout,
}

impl TextureReadback {
    /// Tightly packed rows.
    pub async fn read(&self, context: &GpuContext, token: &SubmissionToken) -> Result<Vec<u8>> {
        let padded = self
            .staging
            .read_range(context, 0..self.layout.padded_size(), token)
            .await?;
        Ok(self.layout.unpad(&padded))
    }

    pub fn read_blocking(&self, context: &GpuContext, token: &SubmissionToken) -> Result<Vec<u8>> {
        pollster::block_on(self.read(context, token))
    }
}
