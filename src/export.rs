use std::{
    fs,
    io::Cursor,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Local, TimeDelta};
use image::{
    ImageError, ImageFormat, RgbaImage,
    error::{ParameterError, ParameterErrorKind},
};

use crate::{
    error::{ExportError, PreconditionError},
    kaleido::OutputSurface,
    types::{ExportMode, ExportRequest},
};

const FILE_PREFIX: &str = "mangankyo_";

/// An encoded still, not yet on disk.
#[derive(Clone, Debug)]
pub struct ExportedImage {
    pub width: u32,
    pub height: u32,
    pub png: Vec<u8>,
}

/// `mangankyo_YYYYMMDDHHmmss.png` in local time.
pub fn export_filename(now: DateTime<Local>) -> String {
    format!("{FILE_PREFIX}{}.png", now.format("%Y%m%d%H%M%S"))
}

/// Encodes the surface (display) or its top-left repeat tile (pattern).
/// `pattern_size` is the pixel size of the last composed tile.
pub fn encode_export(
    request: ExportRequest,
    surface: &OutputSurface,
    pattern_size: Option<(u32, u32)>,
) -> Result<ExportedImage, ExportError> {
    if !surface.is_filled() {
        return Err(PreconditionError::NothingRendered.into());
    }

    let (rgba, width, height) = match request.mode {
        ExportMode::Display => (surface.rgba().to_vec(), surface.width(), surface.height()),
        ExportMode::Pattern => {
            let (width, height) = pattern_size.ok_or(PreconditionError::PatternMissing)?;
            (surface.crop_origin(width, height), width, height)
        }
    };

    let image = RgbaImage::from_raw(width, height, rgba).ok_or_else(|| {
        ImageError::Parameter(ParameterError::from_kind(
            ParameterErrorKind::DimensionMismatch,
        ))
    })?;
    let mut png = Vec::new();
    image.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;

    Ok(ExportedImage { width, height, png })
}

/// Writes exports into one directory.
#[derive(Clone, Debug)]
pub struct Exporter {
    out_dir: PathBuf,
}

impl Exporter {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
        }
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    pub fn export(
        &self,
        request: ExportRequest,
        surface: &OutputSurface,
        pattern_size: Option<(u32, u32)>,
    ) -> Result<PathBuf, ExportError> {
        let encoded = encode_export(request, surface, pattern_size)?;
        let path = self.write(Local::now(), &encoded.png)?;
        log::info!(
            "exported {} image {}x{} to {}",
            request.mode.label(),
            encoded.width,
            encoded.height,
            path.display()
        );
        Ok(path)
    }

    fn write(&self, now: DateTime<Local>, bytes: &[u8]) -> Result<PathBuf, ExportError> {
        fs::create_dir_all(&self.out_dir)?;
        let path = unique_path(&self.out_dir, now);
        write_through_part_file(&path, bytes)?;
        Ok(path)
    }
}

/// Writes next to `path` and renames into place, so a failure leaves nothing
/// behind under either name.
fn write_through_part_file(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp_path = path.with_extension("png.part");
    let result = fs::write(&tmp_path, bytes).and_then(|()| fs::rename(&tmp_path, path));
    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

/// First free export name at or after `now`. A taken name moves the
/// timestamp forward a second, so names stay digits only and nothing is
/// overwritten.
fn unique_path(dir: &Path, now: DateTime<Local>) -> PathBuf {
    (0..)
        .map(|offset| dir.join(export_filename(now + TimeDelta::seconds(offset))))
        .find(|path| !path.exists())
        .unwrap_or_else(|| dir.join(export_filename(now)))
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use chrono::TimeZone;

    use super::*;
    use crate::kaleido::{PatternTile, geometry::TriangleGeometry};

    fn scratch_dir(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        std::env::temp_dir().join(format!("mangankyo-{name}-{}-{nanos}", std::process::id()))
    }

    fn filled_surface(
        width: u32,
        height: u32,
        geometry: TriangleGeometry,
    ) -> (OutputSurface, (u32, u32)) {
        let (pw, ph) = geometry.pattern_pixel_size();
        let pattern = PatternTile {
            rgba: vec![90; pw as usize * ph as usize * 4],
            width: pw,
            height: ph,
            geometry,
        };
        let mut surface = OutputSurface::new(width, height).expect("surface");
        surface.fill_with(&pattern);
        (surface, (pw, ph))
    }

    #[test]
    fn filename_is_prefix_and_fourteen_digits() {
        let moment = Local
            .with_ymd_and_hms(2024, 3, 9, 7, 5, 1)
            .single()
            .expect("unambiguous local time");
        assert_eq!(export_filename(moment), "mangankyo_20240309070501.png");
    }

    #[test]
    fn pattern_export_uses_tile_size() {
        let geometry = TriangleGeometry::from_base(100.0);
        assert!((geometry.height - 86.602).abs() < 1e-3);
        let (surface, pattern_size) = filled_surface(640, 480, geometry);

        let image = encode_export(
            ExportRequest {
                mode: ExportMode::Pattern,
            },
            &surface,
            Some(pattern_size),
        )
        .expect("export");
        assert_eq!((image.width, image.height), (300, 173));

        let decoded = image::load_from_memory(&image.png).expect("decode");
        assert_eq!((decoded.width(), decoded.height()), (300, 173));
    }

    #[test]
    fn pattern_export_keeps_tile_size_on_a_smaller_surface() {
        let (surface, pattern_size) = filled_surface(200, 100, TriangleGeometry::from_base(100.0));
        assert_eq!(pattern_size, (300, 173));

        let image = encode_export(
            ExportRequest {
                mode: ExportMode::Pattern,
            },
            &surface,
            Some(pattern_size),
        )
        .expect("export");
        assert_eq!((image.width, image.height), (300, 173));

        let decoded = image::load_from_memory(&image.png).expect("decode").to_rgba8();
        assert_eq!(decoded.get_pixel(10, 10).0, [90, 90, 90, 90]);
        assert_eq!(decoded.get_pixel(250, 10).0, [0, 0, 0, 0]);
        assert_eq!(decoded.get_pixel(10, 150).0, [0, 0, 0, 0]);
    }

    #[test]
    fn display_export_uses_surface_size() {
        let (surface, pattern_size) =
            filled_surface(640, 480, TriangleGeometry::from_base(100.0));
        let image = encode_export(
            ExportRequest {
                mode: ExportMode::Display,
            },
            &surface,
            Some(pattern_size),
        )
        .expect("export");
        assert_eq!((image.width, image.height), (640, 480));
    }

    #[test]
    fn export_before_first_frame_is_a_precondition_error() {
        let surface = OutputSurface::new(64, 64).expect("surface");
        let dir = scratch_dir("precondition");
        let exporter = Exporter::new(&dir);

        for mode in [ExportMode::Display, ExportMode::Pattern] {
            let err = exporter
                .export(ExportRequest { mode }, &surface, None)
                .expect_err("nothing rendered");
            assert!(matches!(
                err,
                ExportError::Precondition(PreconditionError::NothingRendered)
            ));
        }
        assert!(!dir.exists(), "no file or directory should be created");
    }

    #[test]
    fn export_writes_png_files_without_clobbering() {
        let (surface, pattern_size) = filled_surface(32, 32, TriangleGeometry::from_base(6.0));
        let dir = scratch_dir("write");
        let exporter = Exporter::new(&dir);

        let first = exporter
            .export(
                ExportRequest {
                    mode: ExportMode::Display,
                },
                &surface,
                Some(pattern_size),
            )
            .expect("first export");
        let second = exporter
            .export(
                ExportRequest {
                    mode: ExportMode::Pattern,
                },
                &surface,
                Some(pattern_size),
            )
            .expect("second export");

        assert_ne!(first, second);
        for path in [&first, &second] {
            let name = path.file_name().and_then(|n| n.to_str()).expect("file name");
            let digits = name
                .strip_prefix(FILE_PREFIX)
                .and_then(|rest| rest.strip_suffix(".png"))
                .expect("export name");
            assert!(digits.len() == 14 && digits.bytes().all(|b| b.is_ascii_digit()), "{name}");
            assert!(path.exists());
        }
        let leftovers = fs::read_dir(&dir)
            .expect("read dir")
            .filter_map(Result::ok)
            .filter(|entry| entry.path().to_string_lossy().ends_with(".part"))
            .count();
        assert_eq!(leftovers, 0);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn taken_names_move_to_the_next_free_second() {
        let dir = scratch_dir("taken");
        fs::create_dir_all(&dir).expect("dir");
        let moment = Local
            .with_ymd_and_hms(2024, 3, 9, 7, 5, 59)
            .single()
            .expect("unambiguous local time");
        assert_eq!(unique_path(&dir, moment), dir.join("mangankyo_20240309070559.png"));

        fs::write(dir.join("mangankyo_20240309070559.png"), b"x").expect("write");
        fs::write(dir.join("mangankyo_20240309070600.png"), b"x").expect("write");
        assert_eq!(unique_path(&dir, moment), dir.join("mangankyo_20240309070601.png"));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn failed_rename_removes_the_part_file() {
        let dir = scratch_dir("rename");
        // A non-empty directory under the final name makes the rename fail.
        let blocked = dir.join("mangankyo_20240309070501.png");
        fs::create_dir_all(blocked.join("inner")).expect("dir");

        assert!(write_through_part_file(&blocked, b"png").is_err());
        assert!(!blocked.with_extension("png.part").exists());

        let _ = fs::remove_dir_all(&dir);
    }
}
