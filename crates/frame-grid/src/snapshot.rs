use crate::{CompositeGrid, Error, Result, SnapshotWriter};
use image::{ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::OffsetDateTime;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotFormat {
    #[default]
    Jpeg,
    Png,
}

impl SnapshotFormat {
    pub fn extension(self) -> &'static str {
        match self {
            SnapshotFormat::Jpeg => "jpg",
            SnapshotFormat::Png => "png",
        }
    }

    fn image_format(self) -> ImageFormat {
        match self {
            SnapshotFormat::Jpeg => ImageFormat::Jpeg,
            SnapshotFormat::Png => ImageFormat::Png,
        }
    }
}

/// Writes `<N>view_snapshot_<unix_millis>.<ext>` files into a directory.
#[derive(Clone, Debug)]
pub struct ImageSnapshotWriter {
    dir: PathBuf,
    format: SnapshotFormat,
}

impl ImageSnapshotWriter {
    pub fn new(dir: impl Into<PathBuf>, format: SnapshotFormat) -> Self {
        Self {
            dir: dir.into(),
            format,
        }
    }

    fn next_path(&self, cells: usize) -> PathBuf {
        let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
        let ext = self.format.extension();
        let base = format!("{cells}view_snapshot_{millis}");
        let mut path = self.dir.join(format!("{base}.{ext}"));
        let mut n = 1;
        while path.exists() {
            path = self.dir.join(format!("{base}_{n}.{ext}"));
            n += 1;
        }
        path
    }
}

impl SnapshotWriter for ImageSnapshotWriter {
    fn write(&self, grid: &CompositeGrid) -> Result<PathBuf> {
        let frame = &grid.frame;
        let mut rgb = frame.data.clone();
        for px in rgb.chunks_exact_mut(3) {
            px.swap(0, 2);
        }
        let img = RgbImage::from_raw(frame.width, frame.height, rgb)
            .ok_or_else(|| Error::Snapshot("grid buffer does not match its geometry".into()))?;

        std::fs::create_dir_all(&self.dir)?;
        let path = self.next_path(grid.layout.cells);
        img.save_with_format(&path, self.format.image_format())
            .map_err(|e| Error::Snapshot(format!("{}: {e}", path.display())))?;
        Ok(path)
    }
}
