use image::Rgba;
use std::path::{Path, PathBuf};

use crate::components::tools::{BrushSettings, DEFAULT_BRUSH_SIZE_PERCENT, Tool};
use crate::error::MaskError;
use crate::ops::brush::BrushShape;
use crate::ops::codec::DEFAULT_OVERLAY_ALPHA;

/// Default paint colour of the editing form (must not be black, or painted
/// pixels would binarize as unpainted).
pub const DEFAULT_PAINT_COLOR: [u8; 3] = [255, 255, 255];

/// Mask editor settings that persist across sessions
#[derive(Clone, Debug, PartialEq)]
pub struct MaskSettings {
    /// Brush size as a fraction of the editing canvas diagonal
    pub brush_size_percent: f32,
    pub tool: Tool,
    pub brush_shape: BrushShape,
    /// Opacity of the green preview overlay (0.0–1.0)
    pub overlay_alpha: f32,
    /// Colour painted strokes take in the editing form
    pub paint_color: [u8; 3],
}

impl Default for MaskSettings {
    fn default() -> Self {
        Self {
            brush_size_percent: DEFAULT_BRUSH_SIZE_PERCENT,
            tool: Tool::Brush,
            brush_shape: BrushShape::Circle,
            overlay_alpha: DEFAULT_OVERLAY_ALPHA,
            paint_color: DEFAULT_PAINT_COLOR,
        }
    }
}

impl MaskSettings {
    /// Path to the settings file.
    /// On Linux:   ~/.config/inpaintfe/mask_settings.cfg  (XDG_CONFIG_HOME respected)
    /// On Windows: %APPDATA%\InpaintFE\mask_settings.cfg
    /// On macOS:   ~/Library/Application Support/InpaintFE/mask_settings.cfg
    /// Fallback:   same directory as the executable.
    pub fn settings_path() -> Option<PathBuf> {
        #[cfg(target_os = "linux")]
        {
            let config_dir = std::env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| {
                    let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
                    PathBuf::from(home).join(".config")
                })
                .join("inpaintfe");
            Some(config_dir.join("mask_settings.cfg"))
        }
        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var("APPDATA")
                .or_else(|_| std::env::var("USERPROFILE"))
                .ok()?;
            Some(PathBuf::from(appdata).join("InpaintFE").join("mask_settings.cfg"))
        }
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var("HOME").ok()?;
            Some(
                PathBuf::from(home)
                    .join("Library")
                    .join("Application Support")
                    .join("InpaintFE")
                    .join("mask_settings.cfg"),
            )
        }
        #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
        {
            std::env::current_exe()
                .ok()
                .and_then(|p| p.parent().map(|d| d.join("mask_settings.cfg")))
        }
    }

    pub fn brush(&self) -> BrushSettings {
        BrushSettings {
            tool: self.tool,
            shape: self.brush_shape,
            size_percent: self.brush_size_percent,
            ..BrushSettings::default()
        }
    }

    /// Fold the brush state of a finished session back into the settings.
    pub fn remember_brush(&mut self, brush: &BrushSettings) {
        self.brush_size_percent = brush.size_percent;
        self.tool = brush.tool;
        self.brush_shape = brush.shape;
    }

    pub fn paint_rgba(&self) -> Rgba<u8> {
        let [r, g, b] = self.paint_color;
        Rgba([r, g, b, 255])
    }

    pub fn to_config_string(&self) -> String {
        let tool_str = match self.tool {
            Tool::Brush => "brush",
            Tool::Eraser => "eraser",
        };
        let shape_str = match self.brush_shape {
            BrushShape::Circle => "circle",
            BrushShape::Square => "square",
        };
        let [r, g, b] = self.paint_color;
        format!(
            "brush_size_percent={}\n\
             tool={tool_str}\n\
             brush_shape={shape_str}\n\
             overlay_alpha={}\n\
             paint_color={},{},{}\n",
            self.brush_size_percent, self.overlay_alpha, r, g, b,
        )
    }

    /// Parse `key=value` lines. Unknown keys are ignored and malformed values
    /// keep their defaults.
    pub fn parse(content: &str) -> Self {
        let mut s = Self::default();
        for line in content.lines() {
            if let Some((key, val)) = line.split_once('=') {
                s.apply(key, val);
            }
        }
        s
    }

    /// Set one key from its text form. Returns `false` for an unknown key or
    /// a value out of range, leaving the setting unchanged.
    pub fn apply(&mut self, key: &str, val: &str) -> bool {
        let val = val.trim();
        match key.trim() {
            "brush_size_percent" => match val.parse::<f32>() {
                Ok(v) if v.is_finite() && v > 0.0 => self.brush_size_percent = v,
                _ => return false,
            },
            "tool" => match val {
                "brush" => self.tool = Tool::Brush,
                "eraser" => self.tool = Tool::Eraser,
                _ => return false,
            },
            "brush_shape" => match val {
                "circle" => self.brush_shape = BrushShape::Circle,
                "square" => self.brush_shape = BrushShape::Square,
                _ => return false,
            },
            "overlay_alpha" => match val.parse::<f32>() {
                Ok(v) if (0.0..=1.0).contains(&v) => self.overlay_alpha = v,
                _ => return false,
            },
            "paint_color" => match Self::str_to_color(val) {
                Some(c) => self.paint_color = c,
                None => return false,
            },
            _ => return false,
        }
        true
    }

    /// Parse "r,g,b"; black is rejected.
    fn str_to_color(s: &str) -> Option<[u8; 3]> {
        let parts: Vec<&str> = s.split(',').collect();
        if parts.len() != 3 {
            return None;
        }
        let r = parts[0].trim().parse::<u8>().ok()?;
        let g = parts[1].trim().parse::<u8>().ok()?;
        let b = parts[2].trim().parse::<u8>().ok()?;
        if r | g | b == 0 {
            return None;
        }
        Some([r, g, b])
    }

    pub fn save_to(&self, path: &Path) -> Result<(), MaskError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_config_string())?;
        Ok(())
    }

    /// Missing or unreadable file → defaults.
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content),
            Err(_) => Self::default(),
        }
    }

    /// Save settings to the default location
    pub fn save(&self) -> Result<(), MaskError> {
        match Self::settings_path() {
            Some(path) => self.save_to(&path),
            None => Ok(()),
        }
    }

    /// Load settings from the default location
    pub fn load() -> Self {
        Self::settings_path()
            .map(|p| Self::load_from(&p))
            .unwrap_or_default()
    }
}
