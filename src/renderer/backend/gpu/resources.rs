//! GPU objects behind the backend's resource ids.

use std::collections::HashMap;

use wgpu::util::DeviceExt;

use crate::renderer::backend::gpu::pipelines::DEPTH_FORMAT;
use crate::renderer::backend::{
    CubeMapDesc, CubeMapFormat, CubeMapId, GeometryDesc, GeometryId, TargetSetId, TextureDesc,
    TextureFormat, TextureId,
};
use crate::renderer::framebuffer::{ColorFormat, DepthFormat, TargetSetKind, TargetSetLayout};

pub(crate) struct GpuTexture {
    pub(crate) _texture: wgpu::Texture,
    pub(crate) view: wgpu::TextureView,
}

impl GpuTexture {
    pub(crate) fn new(device: &wgpu::Device, queue: &wgpu::Queue, desc: &TextureDesc<'_>) -> Self {
        let format = match desc.format {
            TextureFormat::Rgba8Srgb => wgpu::TextureFormat::Rgba8UnormSrgb,
            TextureFormat::Rgba8Linear => wgpu::TextureFormat::Rgba8Unorm,
        };
        let size = wgpu::Extent3d {
            width: desc.width,
            height: desc.height,
            depth_or_array_layers: 1,
        };
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(desc.label),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            desc.pixels,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * desc.width),
                rows_per_image: Some(desc.height),
            },
            size,
        );
        Self {
            view: texture.create_view(&wgpu::TextureViewDescriptor::default()),
            _texture: texture,
        }
    }
}

pub(crate) struct GpuCubeMap {
    pub(crate) texture: wgpu::Texture,
    /// All six faces and every mip, for sampling.
    pub(crate) view: wgpu::TextureView,
    pub(crate) resolution: u32,
    pub(crate) mip_levels: u32,
}

impl GpuCubeMap {
    pub(crate) fn new(device: &wgpu::Device, queue: &wgpu::Queue, desc: &CubeMapDesc<'_>) -> Self {
        let (format, texel_size) = match desc.format {
            CubeMapFormat::Rgba8Srgb => (wgpu::TextureFormat::Rgba8UnormSrgb, 4),
            CubeMapFormat::Rgba16Float => (wgpu::TextureFormat::Rgba16Float, 8),
        };
        let mut usage = wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST;
        if desc.faces.is_none() {
            usage |= wgpu::TextureUsages::RENDER_ATTACHMENT;
        }
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(desc.label),
            size: wgpu::Extent3d {
                width: desc.resolution,
                height: desc.resolution,
                depth_or_array_layers: 6,
            },
            mip_level_count: desc.mip_levels,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });

        if let Some(faces) = desc.faces {
            for (layer, pixels) in faces.iter().enumerate() {
                queue.write_texture(
                    wgpu::TexelCopyTextureInfo {
                        texture: &texture,
                        mip_level: 0,
                        origin: wgpu::Origin3d {
                            x: 0,
                            y: 0,
                            z: layer as u32,
                        },
                        aspect: wgpu::TextureAspect::All,
                    },
                    pixels,
                    wgpu::TexelCopyBufferLayout {
                        offset: 0,
                        bytes_per_row: Some(texel_size * desc.resolution),
                        rows_per_image: Some(desc.resolution),
                    },
                    wgpu::Extent3d {
                        width: desc.resolution,
                        height: desc.resolution,
                        depth_or_array_layers: 1,
                    },
                );
            }
        }

        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(desc.label),
            dimension: Some(wgpu::TextureViewDimension::Cube),
            ..Default::default()
        });
        Self {
            texture,
            view,
            resolution: desc.resolution,
            mip_levels: desc.mip_levels,
        }
    }

    /// A single face of one mip, for rendering into.
    pub(crate) fn face_view(&self, face: u32, mip: u32) -> wgpu::TextureView {
        self.texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("CubeFaceView"),
            dimension: Some(wgpu::TextureViewDimension::D2),
            base_mip_level: mip,
            mip_level_count: Some(1),
            base_array_layer: face,
            array_layer_count: Some(1),
            ..Default::default()
        })
    }
}

pub(crate) struct GpuGeometry {
    pub(crate) vertices: wgpu::Buffer,
    pub(crate) indices: wgpu::Buffer,
    pub(crate) index_count: u32,
}

impl GpuGeometry {
    pub(crate) fn new(device: &wgpu::Device, desc: &GeometryDesc<'_>) -> Self {
        let vertices = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(desc.label),
            contents: bytemuck::cast_slice(desc.vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let indices = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(desc.label),
            contents: bytemuck::cast_slice(desc.indices),
            usage: wgpu::BufferUsages::INDEX,
        });
        Self {
            vertices,
            indices,
            index_count: desc.indices.len() as u32,
        }
    }
}

pub(crate) struct Attachment {
    pub(crate) texture: wgpu::Texture,
    pub(crate) view: wgpu::TextureView,
}

impl Attachment {
    fn new(device: &wgpu::Device, label: &str, width: u32, height: u32, format: wgpu::TextureFormat) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Self { texture, view }
    }
}

fn color_format(format: ColorFormat) -> wgpu::TextureFormat {
    match format {
        ColorFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        ColorFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        ColorFormat::R16Float => wgpu::TextureFormat::R16Float,
        ColorFormat::Rg32Float => wgpu::TextureFormat::Rg32Float,
    }
}

/// Color attachments plus depth, all the same size.
pub(crate) struct GpuTargetSet {
    pub(crate) kind: TargetSetKind,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) colors: Vec<Attachment>,
    pub(crate) depth: Attachment,
}

impl GpuTargetSet {
    pub(crate) fn new(device: &wgpu::Device, layout: &TargetSetLayout) -> Self {
        let label = format!("{} target set", layout.kind);
        let colors = layout
            .colors
            .iter()
            .map(|format| {
                Attachment::new(device, &label, layout.width, layout.height, color_format(*format))
            })
            .collect();
        let depth = match layout.depth {
            DepthFormat::Depth32Float => {
                Attachment::new(device, &label, layout.width, layout.height, DEPTH_FORMAT)
            }
        };
        Self {
            kind: layout.kind,
            width: layout.width,
            height: layout.height,
            colors,
            depth,
        }
    }

    pub(crate) fn extent(&self) -> wgpu::Extent3d {
        wgpu::Extent3d {
            width: self.width,
            height: self.height,
            depth_or_array_layers: 1,
        }
    }
}

/// Live objects by id. Ids are never reused.
#[derive(Default)]
pub(crate) struct ResourceTable {
    next_id: u64,
    pub(crate) textures: HashMap<TextureId, GpuTexture>,
    pub(crate) cube_maps: HashMap<CubeMapId, GpuCubeMap>,
    pub(crate) geometries: HashMap<GeometryId, GpuGeometry>,
    pub(crate) target_sets: HashMap<TargetSetId, GpuTargetSet>,
}

impl ResourceTable {
    pub(crate) fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub(crate) fn len(&self) -> usize {
        self.textures.len() + self.cube_maps.len() + self.geometries.len() + self.target_sets.len()
    }
}
