//! Heat diffusion on a pair of ping-pong textures.
//!
//! Every step runs two passes: `copy` stamps the constant heat sources into
//! the front texture wherever the source is non-zero, then `transfer`
//! applies the five-point stencil from the front texture into the back one
//! and writes the packed greyscale image.  The textures then swap roles.
//! Neighbour reads clamp to the grid edge, so a uniform field with no
//! sources is a fixed point.

use log::debug;

use crate::bitmap::Bitmap;
use crate::buffer::GpuBuffer;
use crate::compute::{Binding, CommandRecorder, Grid, Kernel};
use crate::demos::{Animation, Artifact, Session};
use crate::error::{GpuError, Result};
use crate::texture::GpuTexture;
use crate::GpuContext;

pub const DIM: u32 = 1024;
pub const MAX_TEMP: f32 = 1.0;
pub const MIN_TEMP: f32 = 0.0001;
pub const SPEED: f32 = 0.25;
pub const STEPS_PER_FRAME: u32 = 90;
const TILE: u32 = 16;

const SHADER: &str = r#"
override speed: f32 = 0.25;
override dim: u32 = 1024u;

@group(0) @binding(0) var tex_in: texture_2d<f32>;
@group(0) @binding(1) var tex_out: texture_storage_2d<r32float, write>;
@group(0) @binding(2) var<storage, read_write> data: array<u32>;

@compute @workgroup_size(16, 16)
fn copy(@builtin(global_invocation_id) id: vec3<u32>) {
    if (id.x >= dim || id.y >= dim) {
        return;
    }
    let c = textureLoad(tex_in, id.xy, 0);
    if (c.x != 0.0) {
        textureStore(tex_out, id.xy, c);
    }
}

fn at(p: vec2<i32>) -> f32 {
    let edge = vec2<i32>(i32(dim) - 1);
    return textureLoad(tex_in, clamp(p, vec2<i32>(0), edge), 0).x;
}

@compute @workgroup_size(16, 16)
fn transfer(@builtin(global_invocation_id) id: vec3<u32>) {
    if (id.x >= dim || id.y >= dim) {
        return;
    }
    let p = vec2<i32>(id.xy);
    let t = at(p + vec2<i32>(0, -1));
    let l = at(p + vec2<i32>(-1, 0));
    let c = at(p);
    let r = at(p + vec2<i32>(1, 0));
    let b = at(p + vec2<i32>(0, 1));

    let value = c + speed * (t + b + r + l - 4.0 * c);
    textureStore(tex_out, id.xy, vec4<f32>(value, 0.0, 0.0, 0.0));

    data[id.x + id.y * dim] = pack4x8unorm(vec4<f32>(value, value, value, 1.0));
}
"#;

// r32float is not filterable, which a derived layout would assume.
const SAMPLED: wgpu::BindingType = wgpu::BindingType::Texture {
    sample_type: wgpu::TextureSampleType::Float { filterable: false },
    view_dimension: wgpu::TextureViewDimension::D2,
    multisampled: false,
};

const STORAGE_OUT: wgpu::BindingType = wgpu::BindingType::StorageTexture {
    access: wgpu::StorageTextureAccess::WriteOnly,
    format: wgpu::TextureFormat::R32Float,
    view_dimension: wgpu::TextureViewDimension::D2,
};

const IMAGE: wgpu::BindingType = wgpu::BindingType::Buffer {
    ty: wgpu::BufferBindingType::Storage { read_only: false },
    has_dynamic_offset: false,
    min_binding_size: None,
};

const fn entry(binding: u32, ty: wgpu::BindingType) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty,
        count: None,
    }
}

const COPY_LAYOUT: &[wgpu::BindGroupLayoutEntry] = &[entry(0, SAMPLED), entry(1, STORAGE_OUT)];
const TRANSFER_LAYOUT: &[wgpu::BindGroupLayoutEntry] =
    &[entry(0, SAMPLED), entry(1, STORAGE_OUT), entry(2, IMAGE)];

/// Constant heat sources: a hot rectangle, one warm point and a few cold
/// points and a cold block.  Coordinates outside a smaller grid are
/// dropped.
pub fn source_field(dim: u32) -> Vec<f32> {
    let dim = dim as usize;
    let mut field = vec![0.0f32; dim * dim];
    let mut set = |x: usize, y: usize, value: f32| {
        if x < dim && y < dim {
            field[x + y * dim] = value;
        }
    };
    for y in 310..601 {
        for x in 301..600 {
            set(x, y, MAX_TEMP);
        }
    }
    set(100, 100, (MAX_TEMP + MIN_TEMP) / 2.0);
    set(100, 700, MIN_TEMP);
    set(300, 300, MIN_TEMP);
    set(700, 200, MIN_TEMP);
    for y in 800..900 {
        for x in 400..500 {
            set(x, y, MIN_TEMP);
        }
    }
    field
}

/// One host-side step: stamp the sources, then diffuse.
pub fn step(field: &[f32], source: &[f32], dim: u32, speed: f32) -> Vec<f32> {
    let dim = dim as usize;
    let stamped: Vec<f32> = field
        .iter()
        .zip(source)
        .map(|(&f, &s)| if s != 0.0 { s } else { f })
        .collect();
    let at = |x: isize, y: isize| {
        let x = x.clamp(0, dim as isize - 1) as usize;
        let y = y.clamp(0, dim as isize - 1) as usize;
        stamped[x + y * dim]
    };
    (0..dim * dim)
        .map(|i| {
            let (x, y) = ((i % dim) as isize, (i / dim) as isize);
            let (t, l, c, r, b) = (at(x, y - 1), at(x - 1, y), at(x, y), at(x + 1, y), at(x, y + 1));
            c + speed * (t + b + r + l - 4.0 * c)
        })
        .collect()
}

pub struct HeatTransfer {
    context: GpuContext,
    copy: Kernel,
    transfer: Kernel,
    // Kept alive for the bind groups that reference them.
    _source: GpuTexture,
    fields: [GpuTexture; 2],
    image: GpuBuffer<u32>,
    staging: GpuBuffer<u32>,
    copy_groups: [wgpu::BindGroup; 2],
    transfer_groups: [wgpu::BindGroup; 2],
    front: usize,
    dim: u32,
    steps_per_frame: u32,
}

impl HeatTransfer {
    pub fn new(context: GpuContext) -> Result<Self> {
        Self::with_dim(context, DIM, STEPS_PER_FRAME)
    }

    /// The standard scene on a `dim` x `dim` grid.  The field starts cold
    /// and the sources heat it from the first step on.
    pub fn with_dim(context: GpuContext, dim: u32, steps_per_frame: u32) -> Result<Self> {
        let cells = dim as usize * dim as usize;
        Self::with_fields(
            context,
            dim,
            SPEED,
            &source_field(dim),
            &vec![0.0; cells],
            steps_per_frame,
        )
    }

    /// Simulation over a `dim` x `dim` grid starting from `initial`, with
    /// `source` stamped in before every step.
    pub fn with_fields(
        context: GpuContext,
        dim: u32,
        speed: f32,
        source: &[f32],
        initial: &[f32],
        steps_per_frame: u32,
    ) -> Result<Self> {
        let cells = dim as usize * dim as usize;
        if source.len() != cells || initial.len() != cells {
            return Err(GpuError::InvalidInput(format!(
                "heat fields must hold {cells} cells, got {} and {}",
                source.len(),
                initial.len()
            )));
        }

        let copy = Kernel::builder(SHADER, "copy")
            .constant("speed", speed as f64)
            .constant("dim", dim as f64)
            .layout(COPY_LAYOUT)
            .build(&context)?;
        let transfer = Kernel::builder(SHADER, "transfer")
            .constant("speed", speed as f64)
            .constant("dim", dim as f64)
            .layout(TRANSFER_LAYOUT)
            .build(&context)?;

        use wgpu::TextureUsages as T;
        let format = wgpu::TextureFormat::R32Float;
        let source_texture = GpuTexture::new(
            &context,
            "heat_source",
            dim,
            dim,
            format,
            T::TEXTURE_BINDING | T::COPY_DST,
        )?;
        let field_usage = T::STORAGE_BINDING | T::TEXTURE_BINDING | T::COPY_DST | T::COPY_SRC;
        let fields = [
            GpuTexture::new(&context, "heat_field_0", dim, dim, format, field_usage)?,
            GpuTexture::new(&context, "heat_field_1", dim, dim, format, field_usage)?,
        ];
        source_texture.write_texels(&context, source)?;
        fields[0].write_texels(&context, initial)?;

        let image = GpuBuffer::<u32>::new_output(&context, cells)?;
        let staging = GpuBuffer::<u32>::new_download(&context, cells)?;

        let copy_group = |front: usize| {
            copy.bind_group(
                &context,
                &[
                    (0, Binding::from(&source_texture.view)),
                    (1, Binding::from(&fields[front].view)),
                ],
            )
        };
        let transfer_group = |front: usize| {
            transfer.bind_group(
                &context,
                &[
                    (0, Binding::from(&fields[front].view)),
                    (1, Binding::from(&fields[1 - front].view)),
                    (2, Binding::from(&image)),
                ],
            )
        };
        let copy_groups = [copy_group(0)?, copy_group(1)?];
        let transfer_groups = [transfer_group(0)?, transfer_group(1)?];

        Ok(Self {
            context,
            copy,
            transfer,
            _source: source_texture,
            fields,
            image,
            staging,
            copy_groups,
            transfer_groups,
            front: 0,
            dim,
            steps_per_frame,
        })
    }

    /// Record `steps` steps and return which texture is front afterwards.
    fn record_steps(&self, recorder: &mut CommandRecorder<'_>, steps: u32) -> Result<usize> {
        let grid = Grid::tiled(self.dim, self.dim, TILE);
        let mut front = self.front;
        for _ in 0..steps {
            recorder.compute_pass(&self.copy, Some(&self.copy_groups[front]), grid)?;
            recorder.compute_pass(&self.transfer, Some(&self.transfer_groups[front]), grid)?;
            front = 1 - front;
        }
        Ok(front)
    }

    /// Run `steps` steps without producing a frame.
    pub fn advance(&mut self, steps: u32) -> Result<()> {
        let mut recorder = CommandRecorder::new(&self.context, "heat_steps");
        let front = self.record_steps(&mut recorder, steps)?;
        recorder.submit()?;
        self.front = front;
        Ok(())
    }

    /// Current temperatures, row-major.
    pub fn read_field(&self) -> Result<Vec<f32>> {
        let mut recorder = CommandRecorder::new(&self.context, "heat_field_readback");
        let readback = self.fields[self.front].record_readback(&self.context, &mut recorder)?;
        let token = recorder.submit()?;
        let bytes = readback.read_blocking(&self.context, &token)?;
        Ok(bytemuck::pod_collect_to_vec(&bytes))
    }
}

impl Animation for HeatTransfer {
    fn name(&self) -> &str {
        "heat-transfer"
    }

    fn next_frame(&mut self) -> Result<Bitmap> {
        let mut recorder = CommandRecorder::new(&self.context, "heat_frame");
        let front = self.record_steps(&mut recorder, self.steps_per_frame)?;
        recorder.copy_buffer(
            &self.image.buffer,
            0,
            &self.staging.buffer,
            0,
            self.image.byte_len(),
        )?;
        let token = recorder.submit()?;
        self.front = front;
        debug!("heat-transfer frame submitted, front texture {front}");

        let packed = self.staging.read_to_vec(&self.context, &token)?;
        Bitmap::from_packed(self.dim, self.dim, &packed)
    }
}

pub fn run(session: &mut Session) -> Result<Artifact> {
    let heat = HeatTransfer::new(session.take_gpu()?)?;
    Ok(Artifact::Animation(Box::new(heat)))
}
