// ============================================================================
// SETTINGS: persistent key=value configuration
// ============================================================================

use std::path::{Path, PathBuf};

use egui::Color32;
use image::Rgba;

use crate::uv_guide::GuideStyle;
use crate::viewport::{DEFAULT_MAX_ZOOM, DEFAULT_MIN_ZOOM, DEFAULT_ZOOM_STEP, Viewport};

const SETTINGS_FILE: &str = "skinstack_settings.cfg";

pub const DEFAULT_TEXTURE_SIZE: u32 = 512;
const MAX_TEXTURE_SIZE: u32 = 8192;

#[derive(Clone, Debug, PartialEq)]
pub struct AppSettings {
    /// Side length of the square baked texture, in pixels.
    pub texture_size: u32,
    pub background_color: Color32,
    pub guide_color: Color32,
    pub guide_line_width: f32,
    /// Draw the UV guide into the baked texture, not just the editor preview.
    pub bake_guide: bool,
    pub zoom_step: f32,
    pub min_zoom: f32,
    pub max_zoom: f32,
    /// Bake on every drag move; otherwise bake once when the drag ends.
    pub bake_during_drag: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        let guide = GuideStyle::default();
        Self {
            texture_size: DEFAULT_TEXTURE_SIZE,
            background_color: Color32::WHITE,
            guide_color: guide.color,
            guide_line_width: guide.line_width,
            bake_guide: false,
            zoom_step: DEFAULT_ZOOM_STEP,
            min_zoom: DEFAULT_MIN_ZOOM,
            max_zoom: DEFAULT_MAX_ZOOM,
            bake_during_drag: true,
        }
    }
}

impl AppSettings {
    /// Path to the settings file.
    /// On Linux:   ~/.config/skinstack/skinstack_settings.cfg  (XDG_CONFIG_HOME respected)
    /// On Windows: %APPDATA%\SkinStack\skinstack_settings.cfg
    /// On macOS:   ~/Library/Application Support/SkinStack/skinstack_settings.cfg
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
                .join("skinstack");
            let _ = std::fs::create_dir_all(&config_dir);
            return Some(config_dir.join(SETTINGS_FILE));
        }
        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var("APPDATA")
                .or_else(|_| std::env::var("USERPROFILE"))
                .unwrap_or_default();
            let config_dir = PathBuf::from(appdata).join("SkinStack");
            let _ = std::fs::create_dir_all(&config_dir);
            return Some(config_dir.join(SETTINGS_FILE));
        }
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
            let config_dir = PathBuf::from(home)
                .join("Library")
                .join("Application Support")
                .join("SkinStack");
            let _ = std::fs::create_dir_all(&config_dir);
            return Some(config_dir.join(SETTINGS_FILE));
        }
        #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
        {
            std::env::current_exe()
                .ok()
                .and_then(|p| p.parent().map(|d| d.join(SETTINGS_FILE)))
        }
    }

    /// "r,g,b,a", premultiplied as stored in `Color32`.
    fn color_to_str(c: Color32) -> String {
        format!("{},{},{},{}", c.r(), c.g(), c.b(), c.a())
    }

    fn str_to_color(s: &str) -> Option<Color32> {
        let parts: Vec<&str> = s.split(',').collect();
        if parts.len() == 4 {
            let r = parts[0].trim().parse::<u8>().ok()?;
            let g = parts[1].trim().parse::<u8>().ok()?;
            let b = parts[2].trim().parse::<u8>().ok()?;
            let a = parts[3].trim().parse::<u8>().ok()?;
            Some(Color32::from_rgba_premultiplied(r, g, b, a))
        } else {
            None
        }
    }

    pub fn to_config_string(&self) -> String {
        format!(
            "texture_size={}\n\
             background_color={}\n\
             guide_color={}\n\
             guide_line_width={}\n\
             bake_guide={}\n\
             zoom_step={}\n\
             min_zoom={}\n\
             max_zoom={}\n\
             bake_during_drag={}\n",
            self.texture_size,
            Self::color_to_str(self.background_color),
            Self::color_to_str(self.guide_color),
            self.guide_line_width,
            self.bake_guide,
            self.zoom_step,
            self.min_zoom,
            self.max_zoom,
            self.bake_during_drag,
        )
    }

    /// Parse settings text. Unknown keys are ignored; unparseable values keep
    /// their defaults.
    pub fn from_config_str(content: &str) -> Self {
        let d = Self::default();
        let mut s = Self::default();
        for line in content.lines() {
            let Some((key, val)) = line.split_once('=') else { continue };
            let key = key.trim();
            let val = val.trim();
            match key {
                "texture_size" => {
                    s.texture_size = val
                        .parse()
                        .ok()
                        .filter(|&n: &u32| n > 0 && n <= MAX_TEXTURE_SIZE)
                        .unwrap_or(d.texture_size);
                }
                "background_color" => {
                    if let Some(c) = Self::str_to_color(val) { s.background_color = c; }
                }
                "guide_color" => {
                    if let Some(c) = Self::str_to_color(val) { s.guide_color = c; }
                }
                "guide_line_width" => {
                    s.guide_line_width = parse_positive(val).unwrap_or(d.guide_line_width);
                }
                "bake_guide" => {
                    s.bake_guide = val == "true";
                }
                "zoom_step" => {
                    s.zoom_step = parse_positive(val).filter(|&v| v > 1.0).unwrap_or(d.zoom_step);
                }
                "min_zoom" => {
                    s.min_zoom = parse_positive(val).unwrap_or(d.min_zoom);
                }
                "max_zoom" => {
                    s.max_zoom = parse_positive(val).unwrap_or(d.max_zoom);
                }
                "bake_during_drag" => {
                    s.bake_during_drag = val != "false";
                }
                _ => {}
            }
        }
        if s.min_zoom > s.max_zoom {
            s.min_zoom = d.min_zoom;
            s.max_zoom = d.max_zoom;
        }
        s
    }

    pub fn save(&self) {
        let Some(path) = Self::settings_path() else { return };
        if let Err(e) = self.save_to(&path) {
            crate::log_warn!("could not save settings to {}: {}", path.display(), e);
        }
    }

    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        std::fs::write(path, self.to_config_string())
    }

    /// Load settings from disk (returns default if file missing or corrupt)
    pub fn load() -> Self {
        match Self::settings_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Self {
        let Ok(content) = std::fs::read_to_string(path) else { return Self::default() };
        Self::from_config_str(&content)
    }

    pub fn guide_style(&self) -> GuideStyle {
        GuideStyle {
            color: self.guide_color,
            line_width: self.guide_line_width,
        }
    }

    /// Bake background; the canvas is always opaque.
    pub fn background_rgba(&self) -> Rgba<u8> {
        let [r, g, b, _] = self.background_color.to_srgba_unmultiplied();
        Rgba([r, g, b, 255])
    }

    pub fn viewport(&self) -> Viewport {
        Viewport::new(self.zoom_step, self.min_zoom, self.max_zoom)
    }
}

fn parse_positive(val: &str) -> Option<f32> {
    val.parse::<f32>().ok().filter(|v| v.is_finite() && *v > 0.0)
}
