//! `Pod` layouts shared with the shaders.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3, Vec4};
use std::mem;

use crate::renderer::lights::{LightArrays, LightRaw, MAX_DEFERRED_LIGHTS};
use crate::renderer::light_maps::{LightMapArrays, LightMapRaw, MAX_DEFERRED_LIGHT_MAPS};
use crate::renderer::material::ResolvedMaterial;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq)]
pub struct ViewUniform {
    pub view: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
    pub view_projection: [[f32; 4]; 4],
    pub inverse_view_projection: [[f32; 4]; 4],
    pub eye: [f32; 4],
}

impl ViewUniform {
    pub fn new(view: Mat4, projection: Mat4, eye: Vec3) -> Self {
        let view_projection = projection * view;
        Self {
            view: view.to_cols_array_2d(),
            projection: projection.to_cols_array_2d(),
            view_projection: view_projection.to_cols_array_2d(),
            inverse_view_projection: view_projection.inverse().to_cols_array_2d(),
            eye: eye.extend(1.0).to_array(),
        }
    }
}

/// Per-instance vertex stream for geometry and forward draws.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq)]
pub struct InstanceRaw {
    pub model: [[f32; 4]; 4],
    pub tex_coords_offset: [f32; 4],
    pub albedo: [f32; 4],
    /// metallic, roughness, ambient occlusion, emission
    pub material: [f32; 4],
    pub height: f32,
    pub flags: u32,
    pub _padding: [u32; 2],
}

impl InstanceRaw {
    pub const ATTRS: [wgpu::VertexAttribute; 9] = wgpu::vertex_attr_array![
        3 => Float32x4,
        4 => Float32x4,
        5 => Float32x4,
        6 => Float32x4,
        7 => Float32x4,
        8 => Float32x4,
        9 => Float32x4,
        10 => Float32,
        11 => Uint32
    ];

    pub fn new(model: Mat4, tex_coords_offset: Vec4, material: &ResolvedMaterial) -> Self {
        Self {
            model: model.to_cols_array_2d(),
            tex_coords_offset: tex_coords_offset.to_array(),
            albedo: material.albedo.to_array(),
            material: [
                material.metallic,
                material.roughness,
                material.ambient_occlusion,
                material.emission,
            ],
            height: material.height,
            flags: material.flags.bits(),
            _padding: [0; 2],
        }
    }

    pub fn layout<'a>() -> wgpu::VertexBufferLayout<'a> {
        wgpu::VertexBufferLayout {
            array_stride: mem::size_of::<InstanceRaw>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &Self::ATTRS,
        }
    }
}

/// Ambient term used where no light map applies.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ambient {
    pub color: Vec3,
    pub brightness: f32,
}

impl Ambient {
    pub const NONE: Ambient = Ambient {
        color: Vec3::ZERO,
        brightness: 0.0,
    };
}

/// Lights, light maps and ambient for one composite or forward draw.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct LightingUniform {
    /// light slots, light map slots
    pub counts: [u32; 4],
    pub ambient: [f32; 4],
    pub lights: [LightRaw; MAX_DEFERRED_LIGHTS],
    pub light_maps: [LightMapRaw; MAX_DEFERRED_LIGHT_MAPS],
}

impl LightingUniform {
    pub fn from_arrays(lights: &LightArrays, light_maps: &LightMapArrays, ambient: &Ambient) -> Self {
        let mut uniform = Self::zeroed();

        let light_count = lights.len().min(MAX_DEFERRED_LIGHTS);
        uniform.counts[0] = light_count as u32;
        for (slot, dst) in uniform.lights.iter_mut().enumerate().take(light_count) {
            *dst = LightRaw::from_arrays(lights, slot);
        }

        let map_count = light_maps.len().min(MAX_DEFERRED_LIGHT_MAPS);
        uniform.counts[1] = map_count as u32;
        for (slot, dst) in uniform.light_maps.iter_mut().enumerate().take(map_count) {
            *dst = LightMapRaw::from_arrays(light_maps, slot);
        }

        uniform.ambient = ambient.color.extend(ambient.brightness).to_array();
        uniform
    }
}

/// Small parameter block shared by the sky box and the convolution passes.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq)]
pub struct ParamsUniform {
    pub a: [f32; 4],
    pub b: [f32; 4],
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::lights::LIGHT_DISABLED;

    #[test]
    fn view_uniform_size_is_multiple_of_16() {
        assert_eq!(mem::size_of::<ViewUniform>() % 16, 0);
    }

    #[test]
    fn instance_stride_matches_struct_size() {
        assert_eq!(mem::size_of::<InstanceRaw>(), 128);
        assert_eq!(
            InstanceRaw::layout().array_stride,
            mem::size_of::<InstanceRaw>() as wgpu::BufferAddress
        );
    }

    #[test]
    fn lighting_uniform_carries_disabled_slots() {
        let lights = LightArrays::disabled(4);
        let maps = LightMapArrays::disabled(2);
        let uniform = LightingUniform::from_arrays(&lights, &maps, &Ambient::NONE);
        assert_eq!(uniform.counts, [4, 2, 0, 0]);
        assert_eq!(uniform.lights[0].direction_type[3], LIGHT_DISABLED as f32);
        assert_eq!(uniform.light_maps[0].origin_enabled[3], 0.0);
    }
}
