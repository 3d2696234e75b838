//! Directory tile source: PNG tiles georeferenced by ESRI world files

use image::ImageReader;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::types::{Affine, PixelFormat, SourceError, Tile, TileId};
use crate::crs::Crs;

/// World file extensions accepted next to a `.png`
const WORLD_FILE_EXTENSIONS: &[&str] = &["pgw", "pngw", "wld"];

/// A tile waiting to be read; loading happens on whichever worker runs it
pub struct TileJob {
    pub id: TileId,
    load: Box<dyn FnOnce() -> Result<Tile, SourceError> + Send>,
}

impl TileJob {
    pub fn new<F>(id: TileId, load: F) -> Self
    where
        F: FnOnce() -> Result<Tile, SourceError> + Send + 'static,
    {
        Self {
            id,
            load: Box::new(load),
        }
    }

    /// Job for a tile that is already in memory
    pub fn ready(tile: Tile) -> Self {
        Self::new(tile.id.clone(), move || Ok(tile))
    }

    pub fn load(self) -> Result<Tile, SourceError> {
        (self.load)()
    }
}

impl std::fmt::Debug for TileJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileJob").field("id", &self.id).finish()
    }
}

#[derive(Debug, Clone)]
struct TileFile {
    id: TileId,
    png: PathBuf,
    world: PathBuf,
}

/// Lazily yields decoded tiles from a directory, one at a time, in file-name order.
///
/// Tiles without a world file are skipped when the directory is scanned.
pub struct DirectoryTileSource {
    entries: std::vec::IntoIter<TileFile>,
    crs: Option<Crs>,
    format: PixelFormat,
}

impl DirectoryTileSource {
    pub fn open(dir: &Path, crs: Option<Crs>, format: PixelFormat) -> Result<Self, SourceError> {
        let read_dir = std::fs::read_dir(dir).map_err(|source| SourceError::Directory {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut entries = Vec::new();
        for entry in read_dir.flatten() {
            let path = entry.path();
            let is_png = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("png"));
            if !is_png || !path.is_file() {
                continue;
            }

            let id = path
                .file_stem()
                .and_then(|s| s.to_str())
                .map(TileId::new)
                .unwrap_or_else(|| TileId::new(format!("tile_{}", entries.len())));

            match find_world_file(&path) {
                Some(world) => entries.push(TileFile {
                    id,
                    png: path,
                    world,
                }),
                None => warn!("Skipping tile {}: no world file next to {:?}", id, path),
            }
        }
        entries.sort_by(|a, b| a.png.cmp(&b.png));

        info!("Found {} georeferenced tiles in {:?}", entries.len(), dir);

        Ok(Self {
            entries: entries.into_iter(),
            crs,
            format,
        })
    }

    pub fn remaining(&self) -> usize {
        self.entries.len()
    }

    /// Defer decoding to the consumer of each job
    pub fn into_jobs(self) -> impl Iterator<Item = TileJob> + Send + 'static {
        let (crs, format) = (self.crs, self.format);
        self.entries
            .map(move |file| TileJob::new(file.id.clone(), move || load_tile(file, crs, format)))
    }
}

impl Iterator for DirectoryTileSource {
    type Item = Result<Tile, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        let file = self.entries.next()?;
        Some(load_tile(file, self.crs, self.format))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}

fn load_tile(file: TileFile, crs: Option<Crs>, format: PixelFormat) -> Result<Tile, SourceError> {
    let TileFile { id, png, world } = file;

    let text = std::fs::read_to_string(&world).map_err(|source| SourceError::Io {
        tile: id.clone(),
        source,
    })?;
    let transform = parse_world_file(&text).map_err(|message| SourceError::WorldFile {
        tile: id.clone(),
        message,
    })?;

    let image = ImageReader::open(&png)
        .map_err(|source| SourceError::Io {
            tile: id.clone(),
            source,
        })?
        .decode()
        .map_err(|e| SourceError::Decode {
            tile: id.clone(),
            message: e.to_string(),
        })?;

    let (width, height) = (image.width(), image.height());
    let pixels = match format {
        PixelFormat::Rgba8 => image.into_rgba8().into_raw(),
        PixelFormat::Rgb8 => image.into_rgb8().into_raw(),
        PixelFormat::Gray8 => image.into_luma8().into_raw(),
    };
    debug!("Decoded tile {} ({}x{})", id, width, height);

    Ok(Tile {
        id,
        width,
        height,
        format,
        pixels,
        transform,
        crs,
    })
}

fn find_world_file(png: &Path) -> Option<PathBuf> {
    WORLD_FILE_EXTENSIONS
        .iter()
        .map(|ext| png.with_extension(ext))
        .find(|p| p.is_file())
}

/// Parse the six world file lines (A, D, B, E, C, F).
///
/// World files reference the center of the top-left pixel; the returned
/// transform references its outer corner.
pub fn parse_world_file(text: &str) -> Result<Affine, String> {
    let values: Vec<f64> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| l.parse::<f64>().map_err(|e| format!("'{}': {}", l, e)))
        .collect::<Result<_, _>>()?;

    let [a, d, b, e, c, f] = values[..] else {
        return Err(format!("expected 6 values, found {}", values.len()));
    };

    Ok(Affine::new(a, b, c - a / 2.0 - b / 2.0, d, e, f - d / 2.0 - e / 2.0))
}

/// Write a world file for `transform` (inverse of `parse_world_file`)
pub fn format_world_file(transform: &Affine) -> String {
    let Affine { a, b, c, d, e, f } = *transform;
    format!(
        "{}\n{}\n{}\n{}\n{}\n{}\n",
        a,
        d,
        b,
        e,
        c + a / 2.0 + b / 2.0,
        f + d / 2.0 + e / 2.0
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use tempfile::tempdir;

    #[test]
    fn test_parse_world_file_shifts_to_corner() {
        let t = parse_world_file("10.0\n0.0\n0.0\n-10.0\n1005.0\n1995.0\n").unwrap();
        assert_eq!(t, Affine::north_up(1000.0, 2000.0, 10.0));
        assert_eq!(parse_world_file(&format_world_file(&t)).unwrap(), t);
    }

    #[test]
    fn test_parse_world_file_errors() {
        assert!(parse_world_file("1\n2\n3\n").is_err());
        assert!(parse_world_file("1\n0\n0\nx\n0\n0\n").is_err());
    }

    #[test]
    fn test_directory_source_reads_in_name_order() {
        let dir = tempdir().unwrap();
        for (name, color) in [("b", [255, 0, 0, 255]), ("a", [0, 255, 0, 255])] {
            let img = RgbaImage::from_pixel(2, 3, Rgba(color));
            img.save(dir.path().join(format!("{}.png", name))).unwrap();
            std::fs::write(
                dir.path().join(format!("{}.pgw", name)),
                format_world_file(&Affine::north_up(0.0, 0.0, 1.0)),
            )
            .unwrap();
        }
        // no world file: skipped
        RgbaImage::new(1, 1).save(dir.path().join("c.png")).unwrap();

        let source = DirectoryTileSource::open(dir.path(), Some(Crs::WEB_MERCATOR), PixelFormat::Rgba8).unwrap();
        assert_eq!(source.remaining(), 2);

        let tiles: Vec<Tile> = source.map(|t| t.unwrap()).collect();
        assert_eq!(tiles[0].id, TileId::new("a"));
        assert_eq!(tiles[1].id, TileId::new("b"));
        assert_eq!((tiles[0].width, tiles[0].height), (2, 3));
        assert_eq!(&tiles[0].pixels[..4], &[0, 255, 0, 255]);
        assert_eq!(tiles[0].crs, Some(Crs::WEB_MERCATOR));
    }

    #[test]
    fn test_corrupt_png_reported_per_tile() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("bad.png"), b"not a png").unwrap();
        std::fs::write(
            dir.path().join("bad.pgw"),
            format_world_file(&Affine::north_up(0.0, 0.0, 1.0)),
        )
        .unwrap();

        let mut source = DirectoryTileSource::open(dir.path(), None, PixelFormat::Rgba8).unwrap();
        let err = source.next().unwrap().unwrap_err();
        assert_eq!(err.tile(), Some(&TileId::new("bad")));
        assert!(source.next().is_none());
    }

    #[test]
    fn test_jobs_load_lazily() {
        let dir = tempdir().unwrap();
        RgbaImage::from_pixel(4, 4, Rgba([1, 2, 3, 255]))
            .save(dir.path().join("t.png"))
            .unwrap();
        std::fs::write(
            dir.path().join("t.pgw"),
            format_world_file(&Affine::north_up(10.0, 20.0, 2.0)),
        )
        .unwrap();

        let source = DirectoryTileSource::open(dir.path(), None, PixelFormat::Rgb8).unwrap();
        let jobs: Vec<TileJob> = source.into_jobs().collect();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, TileId::new("t"));

        let tile = jobs.into_iter().next().unwrap().load().unwrap();
        assert_eq!(tile.format, PixelFormat::Rgb8);
        assert_eq!(tile.pixels.len(), 4 * 4 * 3);
        assert_eq!(tile.transform, Affine::north_up(10.0, 20.0, 2.0));
    }
}
