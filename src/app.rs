//! The demo window: drives a [`Renderer`] over a small scene.

use std::sync::Arc;

use glam::{Mat4, Quat, Vec3, Vec4};
use instant::Instant;
use winit::{
    application::ApplicationHandler,
    event::*,
    event_loop::ActiveEventLoop,
    keyboard::{Key, NamedKey},
    window::{Window, WindowId},
};

use crate::asset::{AssetTag, DirectoryResolver};
use crate::renderer::geometry::{cube, Aabb};
use crate::renderer::message::{
    LightDescriptor, LightProbeDescriptor, MaterialDescriptor, SkyBoxDescriptor,
    StaticModelDescriptor, StaticModelsDescriptor, SurfaceDescriptor,
};
use crate::renderer::{
    LightProbe, LightType, MaterialProperties, ProbeId, RenderMessage, RenderType, Renderer,
    WgpuBackend,
};
use crate::settings::RenderSettings;

const ASSET_ROOT: &str = "assets";
const DEMO_PACKAGE: &str = "demo";
const GRID: i32 = 5;

/// Windowed host: owns the renderer and feeds it a small orbiting scene.
pub struct App {
    settings: RenderSettings,
    window: Option<Arc<Window>>,
    window_id: Option<WindowId>,
    renderer: Option<Renderer<WgpuBackend>>,
    started: Instant,
    models_created: bool,
}

impl App {
    pub fn new(settings: RenderSettings) -> Self {
        Self {
            settings,
            window: None,
            window_id: None,
            renderer: None,
            started: Instant::now(),
            models_created: false,
        }
    }

    fn create_renderer(&self, window: Arc<Window>) -> Option<Renderer<WgpuBackend>> {
        let backend = match pollster::block_on(WgpuBackend::new(window, &self.settings)) {
            Ok(backend) => backend,
            Err(err) => {
                log::error!("Graphics backend unavailable: {}", err);
                return None;
            }
        };
        match Renderer::new(
            backend,
            self.settings.clone(),
            Box::new(DirectoryResolver::new(ASSET_ROOT)),
        ) {
            Ok(renderer) => Some(renderer),
            Err(err) => {
                log::error!("Renderer setup failed: {}", err);
                None
            }
        }
    }

    fn shut_down(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(renderer) = self.renderer.as_mut() {
            renderer.clean_up();
        }
        event_loop.exit();
    }

    fn frame_messages(&mut self, time: f32) -> Vec<RenderMessage> {
        let mut messages = Vec::new();
        if !self.models_created {
            messages.extend(user_models());
            self.models_created = true;
        }
        messages.extend(scene_messages(time));
        messages
    }
}

fn block() -> AssetTag {
    AssetTag::new(DEMO_PACKAGE, "block")
}

fn user_models() -> Vec<RenderMessage> {
    let (vertices, indices) = cube();
    vec![RenderMessage::CreateUserDefinedStaticModel {
        asset: block(),
        surfaces: vec![SurfaceDescriptor {
            vertices,
            indices,
            transform: Mat4::IDENTITY,
            material: MaterialDescriptor {
                albedo: Vec4::new(0.8, 0.8, 0.8, 1.0),
                roughness: 0.5,
                ..MaterialDescriptor::default()
            },
        }],
    }]
}

fn scene_messages(time: f32) -> Vec<RenderMessage> {
    let mut messages = vec![
        RenderMessage::SkyBox(SkyBoxDescriptor {
            color: Vec3::ONE,
            brightness: 1.0,
            ambient_color: Vec3::new(0.6, 0.7, 1.0),
            ambient_brightness: 0.1,
            cube_map: AssetTag::new(DEMO_PACKAGE, "sky"),
        }),
        RenderMessage::LightProbe(LightProbeDescriptor {
            id: ProbeId(1),
            probe: LightProbe {
                enabled: true,
                origin: Vec3::new(0.0, 1.0, 0.0),
                bounds: Aabb::new(Vec3::new(-8.0, -2.0, -8.0), Vec3::new(8.0, 6.0, 8.0)),
                ambient_color: Vec3::ONE,
                ambient_brightness: 0.05,
                stale: false,
            },
        }),
        RenderMessage::Light(LightDescriptor {
            origin: Vec3::ZERO,
            rotation: Quat::from_euler(glam::EulerRot::YXZ, 0.6, -0.9, 0.0),
            color: Vec3::new(1.0, 0.95, 0.85),
            brightness: 2.0,
            attenuation_linear: 0.0,
            attenuation_quadratic: 0.0,
            cutoff: 0.0,
            light_type: LightType::Directional,
            desire_shadows: false,
        }),
        RenderMessage::Light(LightDescriptor {
            origin: Vec3::new(4.0 * time.cos(), 2.5, 4.0 * time.sin()),
            rotation: Quat::IDENTITY,
            color: Vec3::new(1.0, 0.4, 0.2),
            brightness: 8.0,
            attenuation_linear: 0.2,
            attenuation_quadratic: 0.1,
            cutoff: 0.01,
            light_type: LightType::Point,
            desire_shadows: false,
        }),
        // Floor.
        RenderMessage::StaticModel(StaticModelDescriptor {
            absolute: false,
            model: Mat4::from_scale_rotation_translation(
                Vec3::new(12.0, 0.2, 12.0),
                Quat::IDENTITY,
                Vec3::new(0.0, -0.6, 0.0),
            ),
            inset: None,
            properties: MaterialProperties {
                roughness: Some(0.9),
                ..MaterialProperties::EMPTY
            },
            render_type: RenderType::Deferred,
            static_model: block(),
        }),
    ];

    // Metallic along x, roughness along z.
    let mut instances = Vec::new();
    for x in 0..GRID {
        for z in 0..GRID {
            let offset = (GRID - 1) as f32 * 0.5;
            let position = Vec3::new((x as f32 - offset) * 1.6, 0.0, (z as f32 - offset) * 1.6);
            let step = (GRID - 1) as f32;
            instances.push((
                Mat4::from_scale_rotation_translation(
                    Vec3::splat(0.5),
                    Quat::from_rotation_y(time * 0.5),
                    position,
                ),
                None,
                MaterialProperties {
                    albedo: Some(Vec4::new(0.9, 0.6, 0.3, 1.0)),
                    metallic: Some(x as f32 / step),
                    roughness: Some((z as f32 / step).max(0.05)),
                    ..MaterialProperties::EMPTY
                },
            ));
        }
    }
    messages.push(RenderMessage::StaticModels(StaticModelsDescriptor {
        absolute: false,
        static_model: block(),
        render_type: RenderType::Deferred,
        instances,
    }));

    messages.push(RenderMessage::StaticModel(StaticModelDescriptor {
        absolute: false,
        model: Mat4::from_scale_rotation_translation(
            Vec3::splat(1.2),
            Quat::IDENTITY,
            Vec3::new(0.0, 2.0, 0.0),
        ),
        inset: None,
        properties: MaterialProperties {
            albedo: Some(Vec4::new(0.3, 0.6, 1.0, 0.4)),
            roughness: Some(0.1),
            ..MaterialProperties::EMPTY
        },
        render_type: RenderType::Forward {
            subsort: 0.0,
            sort: 0.0,
        },
        static_model: block(),
    }));

    messages
}

/// Eye orbiting the origin, looking at it.
fn orbit_eye(time: f32) -> (Vec3, Quat) {
    let angle = time * 0.2;
    let center = Vec3::new(12.0 * angle.sin(), 5.0, 12.0 * angle.cos());
    let world_from_eye = Mat4::look_at_rh(center, Vec3::ZERO, Vec3::Y).inverse();
    (center, Quat::from_mat4(&world_from_eye))
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let size = winit::dpi::PhysicalSize::new(
            self.settings.resolution.width,
            self.settings.resolution.height,
        );
        let attributes = Window::default_attributes()
            .with_title("wgpu deferred")
            .with_inner_size(size);
        let window = match event_loop.create_window(attributes) {
            Ok(window) => Arc::new(window),
            Err(err) => {
                log::error!("Window creation failed: {}", err);
                event_loop.exit();
                return;
            }
        };

        let Some(renderer) = self.create_renderer(window.clone()) else {
            event_loop.exit();
            return;
        };

        self.window_id = Some(window.id());
        window.request_redraw();
        self.window = Some(window);
        self.renderer = Some(renderer);
        self.started = Instant::now();
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, id: WindowId, event: WindowEvent) {
        if Some(id) != self.window_id {
            return;
        }

        match event {
            WindowEvent::CloseRequested | WindowEvent::Destroyed => {
                self.shut_down(event_loop);
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        logical_key: Key::Named(NamedKey::Escape),
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => {
                self.shut_down(event_loop);
            }
            WindowEvent::Resized(_) => {
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            WindowEvent::RedrawRequested => {
                let Some(window) = self.window.clone() else {
                    return;
                };
                let time = self.started.elapsed().as_secs_f32();
                let messages = self.frame_messages(time);
                let (eye_center, eye_rotation) = orbit_eye(time);
                let size = window.inner_size();

                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.render(eye_center, eye_rotation, (size.width, size.height), &messages);
                    window.pre_present_notify();
                    renderer.swap();
                }
                window.request_redraw();
            }
            _ => {}
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(renderer) = self.renderer.as_mut() {
            renderer.clean_up();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orbit_eye_looks_at_the_origin() {
        let (center, rotation) = orbit_eye(3.0);
        let forward = rotation * Vec3::NEG_Z;
        let to_origin = (-center).normalize();
        assert!(forward.dot(to_origin) > 0.999);
    }

    #[test]
    fn user_models_are_only_sent_once() {
        let mut app = App::new(RenderSettings::default());
        let first = app.frame_messages(0.0);
        let second = app.frame_messages(0.1);
        let creates = |messages: &[RenderMessage]| {
            messages
                .iter()
                .filter(|m| matches!(m, RenderMessage::CreateUserDefinedStaticModel { .. }))
                .count()
        };
        assert_eq!(creates(&first), 1);
        assert_eq!(creates(&second), 0);
        assert_eq!(first.len(), second.len() + 1);
    }
}
