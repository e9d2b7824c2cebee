use std::mem;
use std::num::NonZeroU64;

use crate::renderer::geometry::Vertex;
use crate::renderer::uniforms::{InstanceRaw, LightingUniform, ParamsUniform, ViewUniform};

pub(crate) const HDR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
pub(crate) const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
pub(crate) const GEOMETRY_FORMATS: [wgpu::TextureFormat; 4] = [
    wgpu::TextureFormat::Rgba16Float,
    wgpu::TextureFormat::Rgba8Unorm,
    wgpu::TextureFormat::Rgba8Unorm,
    wgpu::TextureFormat::Rgba16Float,
];
/// Sky irradiance, sky environment filter, then one irradiance and one
/// environment-filter cube per light-map slot.
pub(crate) const LIGHTING_CUBES: usize = 10;

/// Fluent render pipeline construction with the defaults this renderer uses.
pub(crate) struct PipelineBuilder<'a> {
    device: &'a wgpu::Device,
    label: Option<&'a str>,
    layout: &'a wgpu::PipelineLayout,
    shader: &'a wgpu::ShaderModule,
    vertex_buffers: Vec<wgpu::VertexBufferLayout<'a>>,
    color_targets: Vec<Option<wgpu::ColorTargetState>>,
    depth_stencil: Option<wgpu::DepthStencilState>,
    primitive: wgpu::PrimitiveState,
}

impl<'a> PipelineBuilder<'a> {
    pub(crate) fn new(
        device: &'a wgpu::Device,
        layout: &'a wgpu::PipelineLayout,
        shader: &'a wgpu::ShaderModule,
    ) -> Self {
        Self {
            device,
            label: None,
            layout,
            shader,
            vertex_buffers: Vec::new(),
            color_targets: Vec::new(),
            depth_stencil: None,
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                cull_mode: Some(wgpu::Face::Back),
                front_face: wgpu::FrontFace::Ccw,
                polygon_mode: wgpu::PolygonMode::Fill,
                ..Default::default()
            },
        }
    }

    pub(crate) fn with_label(mut self, label: &'a str) -> Self {
        self.label = Some(label);
        self
    }

    pub(crate) fn with_vertex_buffer(mut self, layout: wgpu::VertexBufferLayout<'a>) -> Self {
        self.vertex_buffers.push(layout);
        self
    }

    pub(crate) fn with_color_target(
        mut self,
        format: wgpu::TextureFormat,
        blend: Option<wgpu::BlendState>,
    ) -> Self {
        self.color_targets.push(Some(wgpu::ColorTargetState {
            format,
            blend,
            write_mask: wgpu::ColorWrites::ALL,
        }));
        self
    }

    pub(crate) fn with_depth(mut self, depth_write: bool, depth_compare: wgpu::CompareFunction) -> Self {
        self.depth_stencil = Some(wgpu::DepthStencilState {
            format: DEPTH_FORMAT,
            depth_write_enabled: depth_write,
            depth_compare,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        });
        self
    }

    pub(crate) fn with_no_culling(mut self) -> Self {
        self.primitive.cull_mode = None;
        self
    }

    pub(crate) fn build(self) -> wgpu::RenderPipeline {
        self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: self.label,
            layout: Some(self.layout),
            vertex: wgpu::VertexState {
                module: self.shader,
                entry_point: Some("vs_main"),
                buffers: &self.vertex_buffers,
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: self.shader,
                entry_point: Some("fs_main"),
                targets: &self.color_targets,
                compilation_options: Default::default(),
            }),
            primitive: self.primitive,
            depth_stencil: self.depth_stencil,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        })
    }
}

fn uniform_entry<T>(binding: u32, visibility: wgpu::ShaderStages) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: true,
            min_binding_size: NonZeroU64::new(mem::size_of::<T>() as u64),
        },
        count: None,
    }
}

fn texture_entry(
    binding: u32,
    view_dimension: wgpu::TextureViewDimension,
    filterable: bool,
) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable },
            view_dimension,
            multisampled: false,
        },
        count: None,
    }
}

fn sampler_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        count: None,
    }
}

pub(crate) struct BindLayouts {
    pub(crate) view: wgpu::BindGroupLayout,
    pub(crate) material: wgpu::BindGroupLayout,
    pub(crate) gbuffer: wgpu::BindGroupLayout,
    pub(crate) lighting: wgpu::BindGroupLayout,
    pub(crate) cube: wgpu::BindGroupLayout,
    pub(crate) params: wgpu::BindGroupLayout,
    pub(crate) blit: wgpu::BindGroupLayout,
}

impl BindLayouts {
    fn new(device: &wgpu::Device) -> Self {
        let both = wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT;
        let layout = |label: &str, entries: &[wgpu::BindGroupLayoutEntry]| {
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(label),
                entries,
            })
        };

        let gbuffer: Vec<_> = (0..GEOMETRY_FORMATS.len() as u32)
            .map(|binding| texture_entry(binding, wgpu::TextureViewDimension::D2, false))
            .collect();

        let mut lighting = vec![uniform_entry::<LightingUniform>(0, wgpu::ShaderStages::FRAGMENT)];
        lighting.extend(
            (1..=LIGHTING_CUBES as u32)
                .map(|binding| texture_entry(binding, wgpu::TextureViewDimension::Cube, true)),
        );
        lighting.push(sampler_entry(LIGHTING_CUBES as u32 + 1));

        Self {
            view: layout("ViewBindGroupLayout", &[uniform_entry::<ViewUniform>(0, both)]),
            material: layout(
                "MaterialBindGroupLayout",
                &[
                    texture_entry(0, wgpu::TextureViewDimension::D2, true),
                    texture_entry(1, wgpu::TextureViewDimension::D2, true),
                    sampler_entry(2),
                ],
            ),
            gbuffer: layout("GBufferBindGroupLayout", &gbuffer),
            lighting: layout("LightingBindGroupLayout", &lighting),
            cube: layout(
                "CubeBindGroupLayout",
                &[
                    texture_entry(0, wgpu::TextureViewDimension::Cube, true),
                    sampler_entry(1),
                ],
            ),
            params: layout(
                "ParamsBindGroupLayout",
                &[uniform_entry::<ParamsUniform>(0, both)],
            ),
            blit: layout(
                "BlitBindGroupLayout",
                &[
                    texture_entry(0, wgpu::TextureViewDimension::D2, true),
                    sampler_entry(1),
                ],
            ),
        }
    }
}

/// Every pipeline the executor can bind, built once per device.
pub(crate) struct Pipelines {
    pub(crate) layouts: BindLayouts,
    pub(crate) sampler: wgpu::Sampler,
    pub(crate) geometry: wgpu::RenderPipeline,
    pub(crate) composite: wgpu::RenderPipeline,
    pub(crate) sky_box: wgpu::RenderPipeline,
    pub(crate) forward: wgpu::RenderPipeline,
    pub(crate) irradiance: wgpu::RenderPipeline,
    pub(crate) environment_filter: wgpu::RenderPipeline,
    pub(crate) present: wgpu::RenderPipeline,
}

impl Pipelines {
    fn shader(device: &wgpu::Device, label: &str, parts: &[&str]) -> wgpu::ShaderModule {
        device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(parts.join("\n").into()),
        })
    }

    fn pipeline_layout(
        device: &wgpu::Device,
        label: &str,
        groups: &[&wgpu::BindGroupLayout],
    ) -> wgpu::PipelineLayout {
        device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(label),
            bind_group_layouts: groups,
            push_constant_ranges: &[],
        })
    }

    pub(crate) fn new(device: &wgpu::Device, surface_format: wgpu::TextureFormat) -> Self {
        let layouts = BindLayouts::new(device);
        let common = include_str!("../../../shader/common.wgsl");
        let mesh = include_str!("../../../shader/mesh.wgsl");
        let lighting = include_str!("../../../shader/lighting.wgsl");

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("LinearClampSampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let geometry_shader = Self::shader(
            device,
            "GeometryShader",
            &[common, mesh, include_str!("../../../shader/geometry.wgsl")],
        );
        let geometry_layout = Self::pipeline_layout(
            device,
            "GeometryPipelineLayout",
            &[&layouts.view, &layouts.material],
        );
        let geometry = GEOMETRY_FORMATS
            .iter()
            .fold(
                PipelineBuilder::new(device, &geometry_layout, &geometry_shader)
                    .with_label("GeometryPipeline")
                    .with_vertex_buffer(Vertex::layout())
                    .with_vertex_buffer(InstanceRaw::layout()),
                |builder, format| builder.with_color_target(*format, None),
            )
            .with_depth(true, wgpu::CompareFunction::Less)
            // Cube-face projections flip Y and with it the winding.
            .with_no_culling()
            .build();

        let composite_shader = Self::shader(
            device,
            "CompositeShader",
            &[common, lighting, include_str!("../../../shader/composite.wgsl")],
        );
        let composite_layout = Self::pipeline_layout(
            device,
            "CompositePipelineLayout",
            &[&layouts.view, &layouts.gbuffer, &layouts.lighting],
        );
        let composite = PipelineBuilder::new(device, &composite_layout, &composite_shader)
            .with_label("CompositePipeline")
            .with_color_target(HDR_FORMAT, None)
            .with_depth(false, wgpu::CompareFunction::Always)
            .with_no_culling()
            .build();

        let sky_shader = Self::shader(
            device,
            "SkyBoxShader",
            &[common, include_str!("../../../shader/sky_box.wgsl")],
        );
        let sky_layout = Self::pipeline_layout(
            device,
            "SkyBoxPipelineLayout",
            &[&layouts.view, &layouts.cube, &layouts.params],
        );
        let sky_box = PipelineBuilder::new(device, &sky_layout, &sky_shader)
            .with_label("SkyBoxPipeline")
            .with_color_target(HDR_FORMAT, None)
            .with_depth(false, wgpu::CompareFunction::LessEqual)
            .with_no_culling()
            .build();

        let forward_shader = Self::shader(
            device,
            "ForwardShader",
            &[common, mesh, lighting, include_str!("../../../shader/forward.wgsl")],
        );
        let forward_layout = Self::pipeline_layout(
            device,
            "ForwardPipelineLayout",
            &[&layouts.view, &layouts.material, &layouts.lighting],
        );
        let forward = PipelineBuilder::new(device, &forward_layout, &forward_shader)
            .with_label("ForwardPipeline")
            .with_vertex_buffer(Vertex::layout())
            .with_vertex_buffer(InstanceRaw::layout())
            .with_color_target(HDR_FORMAT, Some(wgpu::BlendState::ALPHA_BLENDING))
            .with_depth(false, wgpu::CompareFunction::LessEqual)
            .with_no_culling()
            .build();

        let convolution_layout = Self::pipeline_layout(
            device,
            "ConvolutionPipelineLayout",
            &[&layouts.cube, &layouts.params],
        );
        let irradiance_shader = Self::shader(
            device,
            "IrradianceShader",
            &[common, include_str!("../../../shader/irradiance.wgsl")],
        );
        let irradiance = PipelineBuilder::new(device, &convolution_layout, &irradiance_shader)
            .with_label("IrradiancePipeline")
            .with_color_target(HDR_FORMAT, None)
            .with_no_culling()
            .build();
        let filter_shader = Self::shader(
            device,
            "EnvironmentFilterShader",
            &[common, include_str!("../../../shader/environment_filter.wgsl")],
        );
        let environment_filter = PipelineBuilder::new(device, &convolution_layout, &filter_shader)
            .with_label("EnvironmentFilterPipeline")
            .with_color_target(HDR_FORMAT, None)
            .with_no_culling()
            .build();

        let present_shader = Self::shader(
            device,
            "PresentShader",
            &[common, include_str!("../../../shader/present.wgsl")],
        );
        let present_layout =
            Self::pipeline_layout(device, "PresentPipelineLayout", &[&layouts.blit]);
        let present = PipelineBuilder::new(device, &present_layout, &present_shader)
            .with_label("PresentPipeline")
            .with_color_target(surface_format, None)
            .with_no_culling()
            .build();

        Self {
            layouts,
            sampler,
            geometry,
            composite,
            sky_box,
            forward,
            irradiance,
            environment_filter,
            present,
        }
    }
}
