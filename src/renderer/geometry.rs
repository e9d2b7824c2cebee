use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use std::mem;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub tex_coords: [f32; 2],
}

impl Vertex {
    pub const ATTRS: [wgpu::VertexAttribute; 3] = wgpu::vertex_attr_array![
        0 => Float32x3,
        1 => Float32x3,
        2 => Float32x2
    ];

    pub fn new(position: Vec3, normal: Vec3, tex_coords: [f32; 2]) -> Self {
        Self {
            position: position.to_array(),
            normal: normal.to_array(),
            tex_coords,
        }
    }

    pub fn layout<'a>() -> wgpu::VertexBufferLayout<'a> {
        wgpu::VertexBufferLayout {
            array_stride: mem::size_of::<Vertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRS,
        }
    }
}

/// Axis-aligned bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub const UNIT: Aabb = Aabb {
        min: Vec3::splat(-0.5),
        max: Vec3::splat(0.5),
    };

    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Option<Self> {
        points.into_iter().fold(None, |bounds, point| match bounds {
            None => Some(Aabb::new(point, point)),
            Some(b) => Some(Aabb::new(b.min.min(point), b.max.max(point))),
        })
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn contains(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb::new(self.min.min(other.min), self.max.max(other.max))
    }

    /// Bounds of the eight transformed corners.
    pub fn transformed(&self, transform: Mat4) -> Aabb {
        let corners = (0..8).map(|i| {
            let pick = |bit: usize, lo: f32, hi: f32| if i & bit == 0 { lo } else { hi };
            transform.transform_point3(Vec3::new(
                pick(1, self.min.x, self.max.x),
                pick(2, self.min.y, self.max.y),
                pick(4, self.min.z, self.max.z),
            ))
        });
        Aabb::from_points(corners).unwrap_or(*self)
    }
}

/// The shared billboard quad: XY plane, facing +Z, one unit across.
pub fn unit_quad() -> (Vec<Vertex>, Vec<u32>) {
    let normal = Vec3::Z;
    let vertices = vec![
        Vertex::new(Vec3::new(-0.5, -0.5, 0.0), normal, [0.0, 1.0]),
        Vertex::new(Vec3::new(0.5, -0.5, 0.0), normal, [1.0, 1.0]),
        Vertex::new(Vec3::new(0.5, 0.5, 0.0), normal, [1.0, 0.0]),
        Vertex::new(Vec3::new(-0.5, 0.5, 0.0), normal, [0.0, 0.0]),
    ];
    (vertices, vec![0, 1, 2, 0, 2, 3])
}

pub fn cube() -> (Vec<Vertex>, Vec<u32>) {
    // (normal, u, v) with u x v == normal so every face winds counter-clockwise.
    let faces = [
        (Vec3::X, Vec3::NEG_Z, Vec3::Y),
        (Vec3::NEG_X, Vec3::Z, Vec3::Y),
        (Vec3::Y, Vec3::X, Vec3::NEG_Z),
        (Vec3::NEG_Y, Vec3::X, Vec3::Z),
        (Vec3::Z, Vec3::X, Vec3::Y),
        (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
    ];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (normal, u, v) in faces {
        let base = vertices.len() as u32;
        let center = normal * 0.5;
        vertices.push(Vertex::new(center - u * 0.5 - v * 0.5, normal, [0.0, 1.0]));
        vertices.push(Vertex::new(center + u * 0.5 - v * 0.5, normal, [1.0, 1.0]));
        vertices.push(Vertex::new(center + u * 0.5 + v * 0.5, normal, [1.0, 0.0]));
        vertices.push(Vertex::new(center - u * 0.5 + v * 0.5, normal, [0.0, 0.0]));
        indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    (vertices, indices)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_stride_matches_struct_size() {
        assert_eq!(
            Vertex::layout().array_stride,
            std::mem::size_of::<Vertex>() as wgpu::BufferAddress
        );
    }

    #[test]
    fn cube_counts_look_right() {
        let (vertices, indices) = cube();
        assert_eq!(vertices.len(), 24);
        assert_eq!(indices.len(), 36);
        let bounds = Aabb::from_points(vertices.iter().map(|v| Vec3::from(v.position))).unwrap();
        assert_eq!(bounds, Aabb::UNIT);
    }

    #[test]
    fn cube_faces_wind_counter_clockwise() {
        let (vertices, indices) = cube();
        for tri in indices.chunks(3) {
            let a = Vec3::from(vertices[tri[0] as usize].position);
            let b = Vec3::from(vertices[tri[1] as usize].position);
            let c = Vec3::from(vertices[tri[2] as usize].position);
            let normal = Vec3::from(vertices[tri[0] as usize].normal);
            assert!((b - a).cross(c - a).dot(normal) > 0.0);
        }
    }

    #[test]
    fn transformed_bounds_follow_translation() {
        let moved = Aabb::UNIT.transformed(Mat4::from_translation(Vec3::new(2.0, 0.0, 0.0)));
        assert_eq!(moved.center(), Vec3::new(2.0, 0.0, 0.0));
        assert!(moved.contains(Vec3::new(2.4, 0.0, 0.0)));
        assert!(!moved.contains(Vec3::ZERO));
    }
}
