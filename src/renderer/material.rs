//! Per-surface material data baked into batch keys.

use bitflags::bitflags;
use glam::Vec4;

use crate::renderer::backend::TextureId;

bitflags! {
    /// Per-surface switches packed into the instance stream.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct SurfaceFlags: u32 {
        const INVERT_ROUGHNESS = 1 << 0;
        const NORMAL_MAP = 1 << 1;
    }
}

/// The material baked into a surface when its model is loaded.
///
/// Scalars are stored as u8 so the surface can be used as a batch key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceMaterial {
    pub albedo: [u8; 4],
    pub metallic: u8,
    pub roughness: u8,
    pub ambient_occlusion: u8,
    pub emission: u8,
    pub height: u8,
    pub flags: SurfaceFlags,
    pub albedo_texture: TextureId,
    pub normal_texture: TextureId,
}

fn to_unorm8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn from_unorm8(value: u8) -> f32 {
    value as f32 / 255.0
}

impl SurfaceMaterial {
    pub fn new(albedo_texture: TextureId, normal_texture: TextureId) -> Self {
        Self {
            albedo: [255, 255, 255, 255],
            metallic: 0,
            roughness: 128,
            ambient_occlusion: 255,
            emission: 0,
            height: 0,
            flags: SurfaceFlags::empty(),
            albedo_texture,
            normal_texture,
        }
    }

    pub fn with_albedo(mut self, albedo: Vec4) -> Self {
        self.albedo = albedo.to_array().map(to_unorm8);
        self
    }

    pub fn with_metallic(mut self, metallic: f32) -> Self {
        self.metallic = to_unorm8(metallic);
        self
    }

    pub fn with_roughness(mut self, roughness: f32) -> Self {
        self.roughness = to_unorm8(roughness);
        self
    }

    pub fn with_ambient_occlusion(mut self, ambient_occlusion: f32) -> Self {
        self.ambient_occlusion = to_unorm8(ambient_occlusion);
        self
    }

    pub fn with_emission(mut self, emission: f32) -> Self {
        self.emission = to_unorm8(emission);
        self
    }

    pub fn with_height(mut self, height: f32) -> Self {
        self.height = to_unorm8(height);
        self
    }

    pub fn with_flags(mut self, flags: SurfaceFlags) -> Self {
        self.flags |= flags;
        self
    }

    /// Applies per-instance overrides on top of the baked values.
    pub fn resolve(&self, overrides: &MaterialProperties) -> ResolvedMaterial {
        let mut flags = self.flags;
        if let Some(invert) = overrides.invert_roughness {
            flags.set(SurfaceFlags::INVERT_ROUGHNESS, invert);
        }
        ResolvedMaterial {
            albedo: overrides
                .albedo
                .unwrap_or_else(|| Vec4::from_array(self.albedo.map(from_unorm8))),
            metallic: overrides.metallic.unwrap_or(from_unorm8(self.metallic)),
            roughness: overrides.roughness.unwrap_or(from_unorm8(self.roughness)),
            ambient_occlusion: overrides
                .ambient_occlusion
                .unwrap_or(from_unorm8(self.ambient_occlusion)),
            emission: overrides.emission.unwrap_or(from_unorm8(self.emission)),
            height: overrides.height.unwrap_or(from_unorm8(self.height)),
            flags,
        }
    }
}

/// Optional per-instance overrides. Unset fields fall back to the surface.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MaterialProperties {
    pub albedo: Option<Vec4>,
    pub metallic: Option<f32>,
    pub roughness: Option<f32>,
    pub ambient_occlusion: Option<f32>,
    pub emission: Option<f32>,
    pub height: Option<f32>,
    pub invert_roughness: Option<bool>,
}

impl MaterialProperties {
    pub const EMPTY: MaterialProperties = MaterialProperties {
        albedo: None,
        metallic: None,
        roughness: None,
        ambient_occlusion: None,
        emission: None,
        height: None,
        invert_roughness: None,
    };
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedMaterial {
    pub albedo: Vec4,
    pub metallic: f32,
    pub roughness: f32,
    pub ambient_occlusion: f32,
    pub emission: f32,
    pub height: f32,
    pub flags: SurfaceFlags,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn material() -> SurfaceMaterial {
        SurfaceMaterial::new(TextureId(1), TextureId(2))
            .with_metallic(1.0)
            .with_roughness(0.25)
    }

    #[test]
    fn unset_overrides_fall_back_to_surface() {
        let resolved = material().resolve(&MaterialProperties::default());
        assert_eq!(resolved.metallic, 1.0);
        assert!((resolved.roughness - 0.25).abs() < 1.0 / 255.0);
        assert_eq!(resolved.albedo, Vec4::ONE);
        assert!(!resolved.flags.contains(SurfaceFlags::INVERT_ROUGHNESS));
    }

    #[test]
    fn set_overrides_win() {
        let overrides = MaterialProperties {
            albedo: Some(Vec4::new(1.0, 0.0, 0.0, 0.5)),
            roughness: Some(0.9),
            invert_roughness: Some(true),
            ..MaterialProperties::default()
        };
        let resolved = material().resolve(&overrides);
        assert_eq!(resolved.albedo, Vec4::new(1.0, 0.0, 0.0, 0.5));
        assert_eq!(resolved.roughness, 0.9);
        assert_eq!(resolved.metallic, 1.0);
        assert!(resolved.flags.contains(SurfaceFlags::INVERT_ROUGHNESS));
    }

    #[test]
    fn override_can_clear_a_baked_flag() {
        let baked = material().with_flags(SurfaceFlags::INVERT_ROUGHNESS);
        let overrides = MaterialProperties {
            invert_roughness: Some(false),
            ..MaterialProperties::EMPTY
        };
        assert!(!baked
            .resolve(&overrides)
            .flags
            .contains(SurfaceFlags::INVERT_ROUGHNESS));
    }
}
