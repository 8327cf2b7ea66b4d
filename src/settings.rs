use egui::Color32;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::io::EngineError;

/// Tunables for tools, history and input.  Persisted as a plain
/// `key=value` file; unknown keys are ignored and unparsable values keep
/// their defaults.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Brush radius in image pixels
    pub brush_radius: f32,
    /// Exponential smoothing factor for brush input (1.0 = no smoothing)
    pub smoothing_alpha: f32,
    /// Stamp spacing as a fraction of the current radius
    pub spacing_ratio: f32,
    pub min_width_scale: f32,
    pub max_width_scale: f32,
    /// Pointer speed (px/ms) at which the width is halfway between min and max
    pub speed_half_width: f32,
    /// 1.0 = hard edge, 0.0 = fully feathered
    pub hardness: f32,
    pub line_width: f32,
    /// Fill tolerance as an L1 RGBA distance (0..=1020)
    pub fill_tolerance: u32,
    pub curve_samples_per_segment: usize,
    pub max_history_steps: usize,
    /// 0 disables the memory cap
    pub max_history_megabytes: usize,
    pub double_click_ms: u64,
    pub double_click_distance: f32,
    pub primary_color: Color32,
    pub secondary_color: Color32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            brush_radius: 6.0,
            smoothing_alpha: 0.5,
            spacing_ratio: 0.25,
            min_width_scale: 0.4,
            max_width_scale: 1.0,
            speed_half_width: 1.5,
            hardness: 0.85,
            line_width: 3.0,
            fill_tolerance: 0,
            curve_samples_per_segment: 16,
            max_history_steps: 50,
            max_history_megabytes: 100,
            double_click_ms: 350,
            double_click_distance: 4.0,
            primary_color: Color32::BLACK,
            secondary_color: Color32::WHITE,
        }
    }
}

impl EngineSettings {
    pub fn to_config_string(&self) -> String {
        format!(
            "brush_radius={}\n\
             smoothing_alpha={}\n\
             spacing_ratio={}\n\
             min_width_scale={}\n\
             max_width_scale={}\n\
             speed_half_width={}\n\
             hardness={}\n\
             line_width={}\n\
             fill_tolerance={}\n\
             curve_samples_per_segment={}\n\
             max_history_steps={}\n\
             max_history_megabytes={}\n\
             double_click_ms={}\n\
             double_click_distance={}\n\
             primary_color={}\n\
             secondary_color={}\n",
            self.brush_radius,
            self.smoothing_alpha,
            self.spacing_ratio,
            self.min_width_scale,
            self.max_width_scale,
            self.speed_half_width,
            self.hardness,
            self.line_width,
            self.fill_tolerance,
            self.curve_samples_per_segment,
            self.max_history_steps,
            self.max_history_megabytes,
            self.double_click_ms,
            self.double_click_distance,
            color_to_hex(self.primary_color),
            color_to_hex(self.secondary_color),
        )
    }

    pub fn from_config_str(content: &str) -> Self {
        let mut s = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, val)) = line.split_once('=') else { continue };
            let key = key.trim();
            let val = val.trim();
            match key {
                "brush_radius" => parse_into(val, &mut s.brush_radius),
                "smoothing_alpha" => parse_into(val, &mut s.smoothing_alpha),
                "spacing_ratio" => parse_into(val, &mut s.spacing_ratio),
                "min_width_scale" => parse_into(val, &mut s.min_width_scale),
                "max_width_scale" => parse_into(val, &mut s.max_width_scale),
                "speed_half_width" => parse_into(val, &mut s.speed_half_width),
                "hardness" => parse_into(val, &mut s.hardness),
                "line_width" => parse_into(val, &mut s.line_width),
                "fill_tolerance" => parse_into(val, &mut s.fill_tolerance),
                "curve_samples_per_segment" => parse_into(val, &mut s.curve_samples_per_segment),
                "max_history_steps" => parse_into(val, &mut s.max_history_steps),
                "max_history_megabytes" => parse_into(val, &mut s.max_history_megabytes),
                "double_click_ms" => parse_into(val, &mut s.double_click_ms),
                "double_click_distance" => parse_into(val, &mut s.double_click_distance),
                "primary_color" => {
                    if let Some(c) = color_from_hex(val) {
                        s.primary_color = c;
                    }
                }
                "secondary_color" => {
                    if let Some(c) = color_from_hex(val) {
                        s.secondary_color = c;
                    }
                }
                _ => {}
            }
        }
        s.sanitize();
        s
    }

    /// Load settings from disk.  A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(Self::from_config_str(&content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), EngineError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_config_string())?;
        Ok(())
    }

    /// Memory cap for history in bytes (`None` = unlimited).
    pub fn history_memory_limit(&self) -> Option<usize> {
        (self.max_history_megabytes > 0).then(|| self.max_history_megabytes * 1024 * 1024)
    }

    fn sanitize(&mut self) {
        self.brush_radius = self.brush_radius.clamp(0.5, 1000.0);
        self.smoothing_alpha = self.smoothing_alpha.clamp(0.01, 1.0);
        self.spacing_ratio = self.spacing_ratio.clamp(0.01, 4.0);
        self.min_width_scale = self.min_width_scale.clamp(0.01, 10.0);
        self.max_width_scale = self.max_width_scale.clamp(self.min_width_scale, 10.0);
        self.speed_half_width = self.speed_half_width.max(0.001);
        self.hardness = self.hardness.clamp(0.0, 1.0);
        self.line_width = self.line_width.clamp(0.5, 1000.0);
        self.fill_tolerance = self.fill_tolerance.min(1020);
        self.curve_samples_per_segment = self.curve_samples_per_segment.clamp(1, 256);
        self.max_history_steps = self.max_history_steps.max(1);
    }
}

fn parse_into<T: std::str::FromStr>(val: &str, slot: &mut T) {
    if let Ok(v) = val.parse::<T>() {
        *slot = v;
    }
}

fn color_to_hex(c: Color32) -> String {
    let [r, g, b, a] = c.to_srgba_unmultiplied();
    format!("#{:02x}{:02x}{:02x}{:02x}", r, g, b, a)
}

fn color_from_hex(s: &str) -> Option<Color32> {
    let hex = s.strip_prefix('#').unwrap_or(s);
    let byte = |i: usize| hex.get(i..i + 2).and_then(|h| u8::from_str_radix(h, 16).ok());
    match hex.len() {
        6 => Some(Color32::from_rgb(byte(0)?, byte(2)?, byte(4)?)),
        8 => Some(Color32::from_rgba_unmultiplied(byte(0)?, byte(2)?, byte(4)?, byte(6)?)),
        _ => None,
    }
}
