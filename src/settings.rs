use log::{info, warn};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderSettings {
    #[serde(default = "RenderSettings::default_max_render_distance")]
    pub max_render_distance: f32,
    #[serde(default = "RenderSettings::default_objects_max_render_distance")]
    pub objects_max_render_distance: f32,
    #[serde(default)]
    pub shadow_quality: ShadowQuality,
    #[serde(default)]
    pub shadow_render_distance: Option<f32>,
    #[serde(default = "RenderSettings::default_shadow_cascade_overlap_ratio")]
    pub shadow_cascade_overlap_ratio: f32,
    #[serde(default = "RenderSettings::default_shadow_cascade_out_of_view_pullback")]
    pub shadow_cascade_out_of_view_pullback: f32,
    /// Upper bound on shadow renders refreshed per frame; `None` refreshes all of them.
    #[serde(default)]
    pub max_shadow_refreshes_per_frame: Option<u32>,
    #[serde(default)]
    pub resolution: Resolution,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            max_render_distance: Self::default_max_render_distance(),
            objects_max_render_distance: Self::default_objects_max_render_distance(),
            shadow_quality: ShadowQuality::default(),
            shadow_render_distance: None,
            shadow_cascade_overlap_ratio: Self::default_shadow_cascade_overlap_ratio(),
            shadow_cascade_out_of_view_pullback: Self::default_shadow_cascade_out_of_view_pullback(),
            max_shadow_refreshes_per_frame: None,
            resolution: Resolution::default(),
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
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|err| {
                warn!(
                    "Failed to parse {:?} ({}). Falling back to default render settings.",
                    path, err
                );
                RenderSettings::default()
            }),
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

    pub fn from_json(contents: &str) -> Result<Self, serde_json::Error> {
        let settings = serde_json::from_str::<RenderSettings>(contents)?;
        info!("Loaded render settings");
        Ok(settings.validate())
    }

    pub fn validate(mut self) -> Self {
        if !(self.max_render_distance > 0.0) {
            warn!("Max render distance must be positive. Using default value.");
            self.max_render_distance = Self::default_max_render_distance();
        }

        if !(self.objects_max_render_distance > 0.0) {
            warn!("Objects max render distance must be positive. Using default value.");
            self.objects_max_render_distance = Self::default_objects_max_render_distance();
        }

        if let Some(distance) = self.shadow_render_distance {
            if !(distance > 0.0) {
                warn!("Shadow render distance must be positive. Ignoring it.");
                self.shadow_render_distance = None;
            }
        }

        if !(0.0..1.0).contains(&self.shadow_cascade_overlap_ratio) {
            warn!("Shadow cascade overlap ratio must be in [0, 1). Using default value.");
            self.shadow_cascade_overlap_ratio = Self::default_shadow_cascade_overlap_ratio();
        }

        if !(self.shadow_cascade_out_of_view_pullback >= 0.0) {
            warn!("Shadow cascade pullback must not be negative. Using default value.");
            self.shadow_cascade_out_of_view_pullback =
                Self::default_shadow_cascade_out_of_view_pullback();
        }

        if self.max_shadow_refreshes_per_frame == Some(0) {
            warn!("Shadow refresh budget of zero would starve shadows. Removing the budget.");
            self.max_shadow_refreshes_per_frame = None;
        }

        if self.resolution.width == 0 || self.resolution.height == 0 {
            warn!("Resolution must be greater than zero. Using default resolution.");
            self.resolution = Resolution::default();
        }

        self
    }

    /// Edge length in texels of every shadow map.
    pub fn shadow_map_resolution(&self) -> u32 {
        self.shadow_quality.resolution()
    }

    const fn default_max_render_distance() -> f32 {
        5000.0
    }

    const fn default_objects_max_render_distance() -> f32 {
        2000.0
    }

    const fn default_shadow_cascade_overlap_ratio() -> f32 {
        0.2
    }

    const fn default_shadow_cascade_out_of_view_pullback() -> f32 {
        150.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ShadowQuality {
    Low,
    Medium,
    #[default]
    High,
}

impl ShadowQuality {
    pub fn resolution(self) -> u32 {
        match self {
            ShadowQuality::Low => 1024,
            ShadowQuality::Medium => 2048,
            ShadowQuality::High => 4096,
        }
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
