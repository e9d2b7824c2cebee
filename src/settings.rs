use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::renderer::bake::CaptureSettings;
use crate::renderer::camera::Lens;
use crate::renderer::light_maps::{MAX_DEFERRED_LIGHT_MAPS, MAX_FORWARD_LIGHT_MAPS};
use crate::renderer::lights::{MAX_DEFERRED_LIGHTS, MAX_FORWARD_LIGHTS};
use crate::renderer::passes::Budgets;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderSettings {
    #[serde(default)]
    pub resolution: Resolution,
    #[serde(default)]
    pub present_mode: PresentModeSetting,
    #[serde(default = "RenderSettings::default_field_of_view")]
    pub field_of_view_degrees: f32,
    #[serde(default = "RenderSettings::default_near_plane")]
    pub near_plane: f32,
    #[serde(default = "RenderSettings::default_far_plane")]
    pub far_plane: f32,
    #[serde(default = "RenderSettings::default_light_map_resolution")]
    pub light_map_resolution: u32,
    #[serde(default = "RenderSettings::default_irradiance_resolution")]
    pub irradiance_resolution: u32,
    #[serde(default = "RenderSettings::default_environment_filter_resolution")]
    pub environment_filter_resolution: u32,
    #[serde(default = "RenderSettings::default_environment_filter_mips")]
    pub environment_filter_mips: u32,
    #[serde(default = "RenderSettings::default_lights_max_deferred")]
    pub lights_max_deferred: usize,
    #[serde(default = "RenderSettings::default_lights_max_forward")]
    pub lights_max_forward: usize,
    #[serde(default = "RenderSettings::default_light_maps_max_deferred")]
    pub light_maps_max_deferred: usize,
    #[serde(default = "RenderSettings::default_light_maps_max_forward")]
    pub light_maps_max_forward: usize,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            resolution: Resolution::default(),
            present_mode: PresentModeSetting::default(),
            field_of_view_degrees: Self::default_field_of_view(),
            near_plane: Self::default_near_plane(),
            far_plane: Self::default_far_plane(),
            light_map_resolution: Self::default_light_map_resolution(),
            irradiance_resolution: Self::default_irradiance_resolution(),
            environment_filter_resolution: Self::default_environment_filter_resolution(),
            environment_filter_mips: Self::default_environment_filter_mips(),
            lights_max_deferred: Self::default_lights_max_deferred(),
            lights_max_forward: Self::default_lights_max_forward(),
            light_maps_max_deferred: Self::default_light_maps_max_deferred(),
            light_maps_max_forward: Self::default_light_maps_max_forward(),
        }
    }
}

impl RenderSettings {
    pub fn load() -> Self {
        Self::load_from_path("settings.json")
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Self {
        use std::fs;

        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<RenderSettings>(&contents) {
                Ok(settings) => {
                    info!("Loaded render settings from {:?}", path);
                    settings.validate()
                }
                Err(err) => {
                    warn!(
                        "Failed to parse {:?} ({}). Falling back to default render settings.",
                        path, err
                    );
                    RenderSettings::default()
                }
            },
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(
                    "Render settings file {:?} not found. Using default settings.",
                    path
                );
                RenderSettings::default()
            }
            Err(err) => {
                warn!(
                    "Failed to read {:?} ({}). Falling back to default render settings.",
                    path, err
                );
                RenderSettings::default()
            }
        }
    }

    pub fn validate(mut self) -> Self {
        if self.resolution.width == 0 || self.resolution.height == 0 {
            warn!("Resolution must be greater than zero. Using default resolution.");
            self.resolution = Resolution::default();
        }

        if !(1.0..179.0).contains(&self.field_of_view_degrees) {
            warn!("Field of view must be between 1 and 179 degrees. Using default value.");
            self.field_of_view_degrees = Self::default_field_of_view();
        }

        if self.near_plane <= 0.0 || self.far_plane <= self.near_plane {
            warn!("Clip planes must satisfy 0 < near < far. Using default planes.");
            self.near_plane = Self::default_near_plane();
            self.far_plane = Self::default_far_plane();
        }

        for (name, value, default) in [
            (
                "Light map resolution",
                &mut self.light_map_resolution,
                Self::default_light_map_resolution(),
            ),
            (
                "Irradiance resolution",
                &mut self.irradiance_resolution,
                Self::default_irradiance_resolution(),
            ),
            (
                "Environment filter resolution",
                &mut self.environment_filter_resolution,
                Self::default_environment_filter_resolution(),
            ),
        ] {
            if *value == 0 {
                warn!("{} must be greater than zero. Using default value.", name);
                *value = default;
            }
        }

        let max_mips = 32 - self.environment_filter_resolution.leading_zeros();
        if self.environment_filter_mips == 0 || self.environment_filter_mips > max_mips {
            warn!(
                "Environment filter mips must be between 1 and {}. Clamping.",
                max_mips
            );
            self.environment_filter_mips = self.environment_filter_mips.clamp(1, max_mips);
        }

        clamp_budget("Deferred light budget", &mut self.lights_max_deferred, MAX_DEFERRED_LIGHTS);
        clamp_budget("Forward light budget", &mut self.lights_max_forward, MAX_FORWARD_LIGHTS);
        clamp_budget(
            "Deferred light map budget",
            &mut self.light_maps_max_deferred,
            MAX_DEFERRED_LIGHT_MAPS,
        );
        clamp_budget(
            "Forward light map budget",
            &mut self.light_maps_max_forward,
            MAX_FORWARD_LIGHT_MAPS,
        );

        self
    }

    pub fn present_mode(&self, available: &[wgpu::PresentMode]) -> wgpu::PresentMode {
        let desired = self.present_mode.to_wgpu();
        if available.contains(&desired) {
            return desired;
        }

        warn!(
            "Requested present mode {:?} is not supported. Falling back to FIFO.",
            desired
        );

        if available.contains(&wgpu::PresentMode::Fifo) {
            wgpu::PresentMode::Fifo
        } else {
            available
                .first()
                .copied()
                .unwrap_or(wgpu::PresentMode::Fifo)
        }
    }

    pub fn lens(&self) -> Lens {
        Lens {
            fov_y: self.field_of_view_degrees.to_radians(),
            near: self.near_plane,
            far: self.far_plane,
        }
    }

    pub fn budgets(&self) -> Budgets {
        Budgets {
            lights_deferred: self.lights_max_deferred,
            lights_forward: self.lights_max_forward,
            light_maps_deferred: self.light_maps_max_deferred,
            light_maps_forward: self.light_maps_max_forward,
        }
    }

    pub fn capture_settings(&self) -> CaptureSettings {
        CaptureSettings {
            resolution: self.light_map_resolution,
            irradiance_resolution: self.irradiance_resolution,
            environment_filter_resolution: self.environment_filter_resolution,
            environment_filter_mips: self.environment_filter_mips,
            lens: self.lens(),
        }
    }

    const fn default_field_of_view() -> f32 {
        60.0
    }

    const fn default_near_plane() -> f32 {
        0.1
    }

    const fn default_far_plane() -> f32 {
        1000.0
    }

    const fn default_light_map_resolution() -> u32 {
        256
    }

    const fn default_irradiance_resolution() -> u32 {
        32
    }

    const fn default_environment_filter_resolution() -> u32 {
        128
    }

    const fn default_environment_filter_mips() -> u32 {
        5
    }

    const fn default_lights_max_deferred() -> usize {
        MAX_DEFERRED_LIGHTS
    }

    const fn default_lights_max_forward() -> usize {
        MAX_FORWARD_LIGHTS
    }

    const fn default_light_maps_max_deferred() -> usize {
        MAX_DEFERRED_LIGHT_MAPS
    }

    const fn default_light_maps_max_forward() -> usize {
        MAX_FORWARD_LIGHT_MAPS
    }
}

fn clamp_budget(name: &str, value: &mut usize, max: usize) {
    if *value > max {
        warn!("{} {} exceeds the shader limit of {}. Clamping.", name, value, max);
        *value = max;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Default for Resolution {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresentModeSetting {
    #[default]
    Fifo,
    FifoRelaxed,
    Immediate,
    Mailbox,
    AutoVsync,
    AutoNoVsync,
}

impl PresentModeSetting {
    fn to_wgpu(&self) -> wgpu::PresentMode {
        match self {
            PresentModeSetting::Fifo => wgpu::PresentMode::Fifo,
            PresentModeSetting::FifoRelaxed => wgpu::PresentMode::FifoRelaxed,
            PresentModeSetting::Immediate => wgpu::PresentMode::Immediate,
            PresentModeSetting::Mailbox => wgpu::PresentMode::Mailbox,
            PresentModeSetting::AutoVsync => wgpu::PresentMode::AutoVsync,
            PresentModeSetting::AutoNoVsync => wgpu::PresentMode::AutoNoVsync,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invalid_settings() -> RenderSettings {
        RenderSettings {
            resolution: Resolution {
                width: 0,
                height: 0,
            },
            field_of_view_degrees: 0.0,
            near_plane: 10.0,
            far_plane: 1.0,
            light_map_resolution: 0,
            environment_filter_mips: 0,
            lights_max_deferred: 500,
            light_maps_max_forward: 9,
            ..RenderSettings::default()
        }
    }

    #[test]
    fn validate_replaces_invalid_values_with_defaults() {
        let validated = invalid_settings().validate();
        let defaults = RenderSettings::default();

        assert_eq!(validated.resolution, defaults.resolution);
        assert_eq!(validated.field_of_view_degrees, defaults.field_of_view_degrees);
        assert_eq!(validated.near_plane, defaults.near_plane);
        assert_eq!(validated.far_plane, defaults.far_plane);
        assert_eq!(validated.light_map_resolution, defaults.light_map_resolution);
        assert_eq!(validated.environment_filter_mips, 1);
    }

    #[test]
    fn validate_clamps_budgets_to_shader_limits() {
        let validated = invalid_settings().validate();
        assert_eq!(validated.lights_max_deferred, MAX_DEFERRED_LIGHTS);
        assert_eq!(validated.light_maps_max_forward, MAX_FORWARD_LIGHT_MAPS);
    }

    #[test]
    fn validate_preserves_valid_values() {
        let valid = RenderSettings {
            resolution: Resolution {
                width: 1920,
                height: 1080,
            },
            present_mode: PresentModeSetting::Mailbox,
            field_of_view_degrees: 75.0,
            lights_max_forward: 4,
            environment_filter_resolution: 64,
            environment_filter_mips: 7,
            ..RenderSettings::default()
        };

        let validated = valid.clone().validate();

        assert_eq!(validated, valid);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let parsed: RenderSettings =
            serde_json::from_str(r#"{ "light_map_resolution": 64 }"#).unwrap();
        assert_eq!(parsed.light_map_resolution, 64);
        assert_eq!(parsed.irradiance_resolution, 32);
        assert_eq!(parsed.lights_max_deferred, MAX_DEFERRED_LIGHTS);
        assert_eq!(parsed.budgets().light_maps_forward, MAX_FORWARD_LIGHT_MAPS);
    }

    #[test]
    fn missing_file_uses_defaults() {
        let settings = RenderSettings::load_from_path("no/such/settings.json");
        assert_eq!(settings, RenderSettings::default());
    }

    #[test]
    fn present_mode_returns_desired_when_available() {
        let settings = RenderSettings {
            present_mode: PresentModeSetting::Mailbox,
            ..RenderSettings::default()
        };

        let available = [
            wgpu::PresentMode::Fifo,
            wgpu::PresentMode::Mailbox,
            wgpu::PresentMode::Immediate,
        ];

        assert_eq!(
            settings.present_mode(&available),
            wgpu::PresentMode::Mailbox
        );
    }

    #[test]
    fn present_mode_falls_back_to_fifo_when_desired_missing() {
        let settings = RenderSettings {
            present_mode: PresentModeSetting::Mailbox,
            ..RenderSettings::default()
        };

        let available = [wgpu::PresentMode::Fifo, wgpu::PresentMode::Immediate];

        assert_eq!(settings.present_mode(&available), wgpu::PresentMode::Fifo);
    }

    #[test]
    fn present_mode_uses_first_available_when_fifo_missing() {
        let settings = RenderSettings {
            present_mode: PresentModeSetting::Mailbox,
            ..RenderSettings::default()
        };

        let available = [wgpu::PresentMode::Immediate];

        assert_eq!(
            settings.present_mode(&available),
            wgpu::PresentMode::Immediate
        );
    }
}
