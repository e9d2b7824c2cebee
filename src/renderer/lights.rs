use bytemuck::{Pod, Zeroable};
use glam::{Quat, Vec3};

/// Shader array size for the composite pass.
pub const MAX_DEFERRED_LIGHTS: usize = 32;
/// Shader array size for each forward draw.
pub const MAX_FORWARD_LIGHTS: usize = 8;

/// Light type code of an empty slot.
pub const LIGHT_DISABLED: i32 = -1;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum LightType {
    Point,
    Spot { cone_inner: f32, cone_outer: f32 },
    Directional,
}

impl LightType {
    pub fn code(&self) -> i32 {
        match self {
            LightType::Point => 0,
            LightType::Spot { .. } => 1,
            LightType::Directional => 2,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Light {
    pub origin: Vec3,
    pub direction: Vec3,
    pub color: Vec3,
    pub brightness: f32,
    pub attenuation_linear: f32,
    pub attenuation_quadratic: f32,
    pub cutoff: f32,
    pub light_type: LightType,
    pub desire_shadows: bool,
}

impl Light {
    /// Lights point down their local -Z axis.
    pub fn direction_from_rotation(rotation: Quat) -> Vec3 {
        (rotation * Vec3::NEG_Z).normalize_or_zero()
    }
}

/// A light plus selection scratch.
///
/// `distance_squared` is rewritten at the start of every selection and is
/// meaningless outside of one.
#[derive(Clone, Copy, Debug)]
pub struct SortableLight {
    pub light: Light,
    /// Submission index; breaks distance ties.
    pub order: usize,
    distance_squared: f32,
}

impl SortableLight {
    pub fn new(light: Light, order: usize) -> Self {
        Self {
            light,
            order,
            distance_squared: f32::MAX,
        }
    }
}

impl PartialEq for SortableLight {
    fn eq(&self, other: &Self) -> bool {
        self.light == other.light && self.order == other.order
    }
}

/// Fixed-size per-attribute arrays, one slot per selected light.
#[derive(Clone, Debug, PartialEq)]
pub struct LightArrays {
    pub origins: Vec<[f32; 3]>,
    pub directions: Vec<[f32; 3]>,
    pub colors: Vec<[f32; 3]>,
    pub brightnesses: Vec<f32>,
    pub attenuation_linears: Vec<f32>,
    pub attenuation_quadratics: Vec<f32>,
    pub cutoffs: Vec<f32>,
    pub cones_inner: Vec<f32>,
    pub cones_outer: Vec<f32>,
    pub types: Vec<i32>,
    pub desire_shadows: Vec<bool>,
}

impl LightArrays {
    /// `len` slots, all disabled.
    pub fn disabled(len: usize) -> Self {
        Self {
            origins: vec![[0.0; 3]; len],
            directions: vec![[0.0; 3]; len],
            colors: vec![[0.0; 3]; len],
            brightnesses: vec![0.0; len],
            attenuation_linears: vec![0.0; len],
            attenuation_quadratics: vec![0.0; len],
            cutoffs: vec![0.0; len],
            cones_inner: vec![0.0; len],
            cones_outer: vec![0.0; len],
            types: vec![LIGHT_DISABLED; len],
            desire_shadows: vec![false; len],
        }
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn enabled_count(&self) -> usize {
        self.types.iter().filter(|t| **t != LIGHT_DISABLED).count()
    }

    fn write(&mut self, slot: usize, light: &Light) {
        self.origins[slot] = light.origin.to_array();
        self.directions[slot] = light.direction.to_array();
        self.colors[slot] = light.color.to_array();
        self.brightnesses[slot] = light.brightness;
        self.attenuation_linears[slot] = light.attenuation_linear;
        self.attenuation_quadratics[slot] = light.attenuation_quadratic;
        self.cutoffs[slot] = light.cutoff;
        if let LightType::Spot {
            cone_inner,
            cone_outer,
        } = light.light_type
        {
            self.cones_inner[slot] = cone_inner;
            self.cones_outer[slot] = cone_outer;
        }
        self.types[slot] = light.light_type.code();
        self.desire_shadows[slot] = light.desire_shadows;
    }
}

/// Picks the `max_count` lights closest to `reference`.
///
/// Ties keep submission order. The result always has exactly `max_count`
/// slots; unused slots carry [`LIGHT_DISABLED`].
pub fn select_lights(max_count: usize, reference: Vec3, lights: &mut [SortableLight]) -> LightArrays {
    for sortable in lights.iter_mut() {
        sortable.distance_squared = sortable.light.origin.distance_squared(reference);
    }
    lights.sort_by(|a, b| {
        a.distance_squared
            .total_cmp(&b.distance_squared)
            .then(a.order.cmp(&b.order))
    });

    let mut arrays = LightArrays::disabled(max_count);
    for (slot, sortable) in lights.iter().take(max_count).enumerate() {
        arrays.write(slot, &sortable.light);
    }
    arrays
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq)]
pub struct LightRaw {
    pub origin_cutoff: [f32; 4],
    pub direction_type: [f32; 4],
    pub color_brightness: [f32; 4],
    pub attenuation_cone: [f32; 4],
}

impl LightRaw {
    pub fn from_arrays(arrays: &LightArrays, slot: usize) -> Self {
        let [ox, oy, oz] = arrays.origins[slot];
        let [dx, dy, dz] = arrays.directions[slot];
        let [r, g, b] = arrays.colors[slot];
        let mut inner = arrays.cones_inner[slot];
        let mut outer = arrays.cones_outer[slot];
        if inner > outer {
            std::mem::swap(&mut inner, &mut outer);
        }
        Self {
            origin_cutoff: [ox, oy, oz, arrays.cutoffs[slot]],
            direction_type: [dx, dy, dz, arrays.types[slot] as f32],
            color_brightness: [r, g, b, arrays.brightnesses[slot]],
            attenuation_cone: [
                arrays.attenuation_linears[slot],
                arrays.attenuation_quadratics[slot],
                (inner * 0.5).cos(),
                (outer * 0.5).cos(),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(x: f32) -> Light {
        Light {
            origin: Vec3::new(x, 0.0, 0.0),
            direction: Vec3::NEG_Z,
            color: Vec3::ONE,
            brightness: 1.0,
            attenuation_linear: 0.1,
            attenuation_quadratic: 0.01,
            cutoff: 10.0,
            light_type: LightType::Point,
            desire_shadows: false,
        }
    }

    fn sortables(xs: &[f32]) -> Vec<SortableLight> {
        xs.iter()
            .enumerate()
            .map(|(i, x)| SortableLight::new(point(*x), i))
            .collect()
    }

    #[test]
    fn selects_closest_first() {
        let mut lights = sortables(&[10.0, 1.0, 5.0]);
        let arrays = select_lights(2, Vec3::ZERO, &mut lights);
        assert_eq!(arrays.len(), 2);
        assert_eq!(arrays.origins[0], [1.0, 0.0, 0.0]);
        assert_eq!(arrays.origins[1], [5.0, 0.0, 0.0]);
    }

    #[test]
    fn pads_with_disabled_sentinel() {
        let mut lights = sortables(&[3.0]);
        let arrays = select_lights(MAX_FORWARD_LIGHTS, Vec3::ZERO, &mut lights);
        assert_eq!(arrays.len(), MAX_FORWARD_LIGHTS);
        assert_eq!(arrays.types[0], LightType::Point.code());
        assert!(arrays.types[1..].iter().all(|t| *t == LIGHT_DISABLED));
        assert_eq!(arrays.enabled_count(), 1);
    }

    #[test]
    fn ties_keep_submission_order_regardless_of_input_order() {
        let mut a = sortables(&[2.0, -2.0, 2.0]);
        let mut b = a.clone();
        b.reverse();
        let first = select_lights(3, Vec3::ZERO, &mut a);
        let second = select_lights(3, Vec3::ZERO, &mut b);
        assert_eq!(first, second);
        assert_eq!(a.iter().map(|l| l.order).collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn distances_are_recomputed_per_call() {
        let mut lights = sortables(&[0.0, 10.0]);
        let near_origin = select_lights(1, Vec3::ZERO, &mut lights);
        let near_ten = select_lights(1, Vec3::new(9.0, 0.0, 0.0), &mut lights);
        assert_eq!(near_origin.origins[0], [0.0, 0.0, 0.0]);
        assert_eq!(near_ten.origins[0], [10.0, 0.0, 0.0]);
    }

    #[test]
    fn raw_light_is_four_vec4s() {
        assert_eq!(std::mem::size_of::<LightRaw>(), 64);
    }
}
