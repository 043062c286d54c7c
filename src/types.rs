use std::{fmt, str::FromStr, time::Instant};

#[derive(Clone, Debug)]
pub struct Frame {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
    #[allow(dead_code)]
    pub timestamp: Instant,
}

impl Frame {
    pub fn new(rgba: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            rgba,
            width,
            height,
            timestamp: Instant::now(),
        }
    }

    /// A frame is usable when it has pixels and the buffer holds exactly
    /// `width * height` RGBA texels.
    pub fn is_well_formed(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.rgba.len() == self.width as usize * self.height as usize * 4
    }
}

/// Fraction of the frame's shorter side used as the triangle base.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Scale(f64);

impl Scale {
    pub const MIN: f64 = 0.1;
    pub const MAX: f64 = 2.0;
    pub const DEFAULT: f64 = 0.5;

    pub fn new(value: f64) -> Self {
        if !value.is_finite() || value <= 0.0 {
            log::warn!("invalid scale {value}, falling back to {}", Self::DEFAULT);
            return Scale(Self::DEFAULT);
        }
        Scale(value.clamp(Self::MIN, Self::MAX))
    }

    pub fn get(self) -> f64 {
        self.0
    }
}

impl Default for Scale {
    fn default() -> Self {
        Scale(Self::DEFAULT)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FacingMode {
    #[default]
    Front,
    Back,
}

impl FacingMode {
    pub fn label(&self) -> &'static str {
        match self {
            FacingMode::Front => "front",
            FacingMode::Back => "back",
        }
    }
}

impl fmt::Display for FacingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for FacingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "front" | "user" => Ok(FacingMode::Front),
            "back" | "rear" | "environment" => Ok(FacingMode::Back),
            other => Err(format!("unknown facing mode `{other}` (expected front or back)")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportMode {
    /// The whole output surface.
    Display,
    /// One repeat tile cut from the surface origin.
    Pattern,
}

impl ExportMode {
    pub fn label(&self) -> &'static str {
        match self {
            ExportMode::Display => "display",
            ExportMode::Pattern => "pattern",
        }
    }
}

impl FromStr for ExportMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "display" => Ok(ExportMode::Display),
            "pattern" => Ok(ExportMode::Pattern),
            other => Err(format!("unknown export mode `{other}` (expected display or pattern)")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExportRequest {
    pub mode: ExportMode,
}

/// Parameters the render loop reads once per tick. Never mutated in place;
/// changes produce a new value that is swapped in between ticks.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct KaleidoConfig {
    pub scale: Scale,
    pub facing: FacingMode,
}

impl KaleidoConfig {
    pub fn with_scale(self, scale: Scale) -> Self {
        Self { scale, ..self }
    }

    pub fn with_facing(self, facing: FacingMode) -> Self {
        Self { facing, ..self }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_clamps_into_range() {
        assert_eq!(Scale::new(0.01).get(), Scale::MIN);
        assert_eq!(Scale::new(5.0).get(), Scale::MAX);
        assert_eq!(Scale::new(0.75).get(), 0.75);
    }

    #[test]
    fn invalid_scale_falls_back_to_default() {
        assert_eq!(Scale::new(f64::NAN).get(), 0.5);
        assert_eq!(Scale::new(-1.0).get(), 0.5);
        assert_eq!(Scale::new(0.0).get(), 0.5);
        assert_eq!(Scale::new(f64::INFINITY).get(), 0.5);
    }

    #[test]
    fn facing_mode_accepts_browser_names() {
        assert_eq!("user".parse::<FacingMode>(), Ok(FacingMode::Front));
        assert_eq!("Environment".parse::<FacingMode>(), Ok(FacingMode::Back));
        assert!("sideways".parse::<FacingMode>().is_err());
    }

    #[test]
    fn config_changes_produce_new_values() {
        let base = KaleidoConfig::default();
        let changed = base.with_scale(Scale::new(1.0)).with_facing(FacingMode::Back);

        assert_eq!(base.scale.get(), 0.5);
        assert_eq!(base.facing, FacingMode::Front);
        assert_eq!(changed.scale.get(), 1.0);
        assert_eq!(changed.facing, FacingMode::Back);
    }

    #[test]
    fn malformed_frames_are_detected() {
        assert!(Frame::new(vec![0; 16], 2, 2).is_well_formed());
        assert!(!Frame::new(vec![0; 15], 2, 2).is_well_formed());
        assert!(!Frame::new(Vec::new(), 0, 0).is_well_formed());
    }
}
