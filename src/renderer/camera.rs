use glam::{Mat4, Quat, Vec3};
use std::f32::consts::FRAC_PI_2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width: width.max(1),
            height: height.max(1),
        }
    }

    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height as f32
    }
}

/// Perspective parameters shared by the eye and probe captures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lens {
    pub fov_y: f32,
    pub near: f32,
    pub far: f32,
}

/// Cube face directions and up vectors in +X, -X, +Y, -Y, +Z, -Z order.
pub const CUBE_FACES: [(Vec3, Vec3); 6] = [
    (Vec3::X, Vec3::NEG_Y),
    (Vec3::NEG_X, Vec3::NEG_Y),
    (Vec3::Y, Vec3::Z),
    (Vec3::NEG_Y, Vec3::NEG_Z),
    (Vec3::Z, Vec3::NEG_Y),
    (Vec3::NEG_Z, Vec3::NEG_Y),
];

/// Resolved matrices for one rendering of the scene.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewpoint {
    pub center: Vec3,
    /// World to view for relative (world-space) geometry.
    pub view_relative: Mat4,
    /// View for absolute (screen-anchored) geometry.
    pub view_absolute: Mat4,
    /// Rotation-only view for the sky box.
    pub view_sky_box: Mat4,
    pub projection: Mat4,
    pub viewport: Viewport,
}

impl Viewpoint {
    pub fn from_eye(center: Vec3, rotation: Quat, viewport: Viewport, lens: &Lens) -> Self {
        let forward = rotation * Vec3::NEG_Z;
        let up = rotation * Vec3::Y;
        Self {
            center,
            view_relative: Mat4::look_to_rh(center, forward, up),
            view_absolute: Mat4::IDENTITY,
            view_sky_box: Mat4::from_quat(rotation.inverse()),
            projection: Mat4::perspective_rh(lens.fov_y, viewport.aspect(), lens.near, lens.far),
            viewport,
        }
    }

    /// A 90 degree square view down one cube face.
    ///
    /// The projection flips Y: framebuffer rows run top-down, and the flip
    /// makes each face image land in the orientation cube sampling expects.
    pub fn cube_face(center: Vec3, face: usize, resolution: u32, lens: &Lens) -> Self {
        let (direction, up) = CUBE_FACES[face % 6];
        let flip = Mat4::from_scale(Vec3::new(1.0, -1.0, 1.0));
        Self {
            center,
            view_relative: Mat4::look_to_rh(center, direction, up),
            view_absolute: Mat4::IDENTITY,
            view_sky_box: Mat4::look_to_rh(Vec3::ZERO, direction, up),
            projection: flip * Mat4::perspective_rh(FRAC_PI_2, 1.0, lens.near, lens.far),
            viewport: Viewport::new(resolution, resolution),
        }
    }

    pub fn forward(&self) -> Vec3 {
        -self.view_sky_box.transpose().z_axis.truncate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lens() -> Lens {
        Lens {
            fov_y: 60f32.to_radians(),
            near: 0.1,
            far: 100.0,
        }
    }

    fn approx(a: Vec3, b: Vec3) -> bool {
        (a - b).abs().max_element() < 1e-5
    }

    #[test]
    fn identity_rotation_looks_down_negative_z() {
        let viewpoint = Viewpoint::from_eye(Vec3::ZERO, Quat::IDENTITY, Viewport::new(4, 4), &lens());
        assert!(approx(viewpoint.forward(), Vec3::NEG_Z));
        let ahead = viewpoint.view_relative.transform_point3(Vec3::new(0.0, 0.0, -5.0));
        assert!(approx(ahead, Vec3::new(0.0, 0.0, -5.0)));
    }

    #[test]
    fn sky_box_view_ignores_translation() {
        let rotation = Quat::from_rotation_y(0.7);
        let a = Viewpoint::from_eye(Vec3::ZERO, rotation, Viewport::new(4, 4), &lens());
        let b = Viewpoint::from_eye(Vec3::new(10.0, 2.0, -3.0), rotation, Viewport::new(4, 4), &lens());
        assert_eq!(a.view_sky_box, b.view_sky_box);
        assert_ne!(a.view_relative, b.view_relative);
    }

    #[test]
    fn cube_faces_look_down_their_axes() {
        for (face, (direction, _)) in CUBE_FACES.iter().enumerate() {
            let viewpoint = Viewpoint::cube_face(Vec3::ONE, face, 16, &lens());
            assert!(approx(viewpoint.forward(), *direction));
            assert_eq!(viewpoint.viewport, Viewport::new(16, 16));
        }
    }

    #[test]
    fn zero_sized_viewports_are_clamped() {
        let viewport = Viewport::new(0, 0);
        assert_eq!((viewport.width, viewport.height), (1, 1));
        assert_eq!(viewport.aspect(), 1.0);
    }
}
