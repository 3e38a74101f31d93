//! Assembly of per-source frames into one fixed-layout BGR image.

use crate::{Error, Frame, FrameSlot, PixelFormat, Resolution, Result};
use std::sync::Arc;
use tracing::warn;

/// Fixed grid geometry: `cells` slots laid out row-major over `columns`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct GridLayout {
    pub cells: usize,
    pub columns: usize,
    pub cell: Resolution,
}

impl GridLayout {
    /// Square-ish layout: ceil(sqrt(cells)) columns.
    pub fn auto(cells: usize, cell: Resolution) -> Self {
        let mut columns = 1;
        while columns * columns < cells {
            columns += 1;
        }
        Self {
            cells,
            columns,
            cell,
        }
    }

    pub fn with_columns(cells: usize, columns: usize, cell: Resolution) -> Result<Self> {
        if cells == 0 || columns == 0 {
            return Err(Error::Config("grid needs at least one cell and column".into()));
        }
        if cell.width == 0 || cell.height == 0 {
            return Err(Error::Config(format!("invalid cell resolution {cell}")));
        }
        let layout = Self {
            cells,
            columns: columns.min(cells),
            cell,
        };
        if layout.checked_output_resolution().is_none() {
            return Err(Error::Config(format!(
                "{} columns x {} rows of {cell} cells is too large",
                layout.columns,
                layout.rows()
            )));
        }
        Ok(layout)
    }

    /// Output size, or None when the BGR buffer for it would not be addressable.
    fn checked_output_resolution(&self) -> Option<Resolution> {
        let columns = u32::try_from(self.columns).ok()?;
        let rows = u32::try_from(self.rows()).ok()?;
        let width = self.cell.width.checked_mul(columns)?;
        let height = self.cell.height.checked_mul(rows)?;
        (width as usize)
            .checked_mul(height as usize)?
            .checked_mul(3)?;
        Some(Resolution::new(width, height))
    }

    pub fn rows(&self) -> usize {
        self.cells.div_ceil(self.columns)
    }

    pub fn output_resolution(&self) -> Resolution {
        Resolution::new(
            self.cell.width.saturating_mul(self.columns as u32),
            self.cell.height.saturating_mul(self.rows() as u32),
        )
    }

    /// Top-left pixel of cell `index`.
    pub fn origin(&self, index: usize) -> (u32, u32) {
        let col = (index % self.columns) as u32;
        let row = (index / self.columns) as u32;
        (col * self.cell.width, row * self.cell.height)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CellContent {
    Live,
    Placeholder,
}

/// Result of one compose pass.
#[derive(Clone, Debug)]
pub struct CompositeGrid {
    pub frame: Frame,
    pub layout: GridLayout,
    pub cells: Vec<CellContent>,
}

impl CompositeGrid {
    /// Copy out the pixels of one cell.
    pub fn cell_frame(&self, index: usize) -> Option<Frame> {
        if index >= self.layout.cells {
            return None;
        }
        let cell = self.layout.cell;
        let (x0, y0) = self.layout.origin(index);
        let stride = self.frame.row_bytes();
        let row_len = cell.width as usize * 3;
        let mut data = Vec::with_capacity(cell.pixels() * 3);
        for y in 0..cell.height as usize {
            let start = (y0 as usize + y) * stride + x0 as usize * 3;
            data.extend_from_slice(self.frame.data.get(start..start + row_len)?);
        }
        Some(Frame {
            width: cell.width,
            height: cell.height,
            pixel_format: PixelFormat::Bgr8,
            data,
            ts: None,
        })
    }

    pub fn live_count(&self) -> usize {
        self.cells
            .iter()
            .filter(|c| **c == CellContent::Live)
            .count()
    }
}

pub struct Compositor {
    layout: GridLayout,
    placeholder: Frame,
    placeholder_bgr: [u8; 3],
}

impl Compositor {
    pub fn new(layout: GridLayout, placeholder_bgr: [u8; 3]) -> Self {
        Self {
            layout,
            placeholder: Frame::solid(layout.cell, placeholder_bgr),
            placeholder_bgr,
        }
    }

    pub fn layout(&self) -> GridLayout {
        self.layout
    }

    pub fn placeholder(&self) -> &Frame {
        &self.placeholder
    }

    /// Snapshot every slot and assemble the grid. Slot `i` lands in cell `i`,
    /// row-major from the top-left. Slots beyond the layout are ignored and
    /// missing slots show the placeholder.
    pub fn compose(&self, slots: &[Arc<FrameSlot>]) -> CompositeGrid {
        let snapshots: Vec<Option<Arc<Frame>>> = (0..self.layout.cells)
            .map(|i| slots.get(i).and_then(|slot| slot.snapshot()))
            .collect();

        let out_res = self.layout.output_resolution();
        let mut canvas = Frame::solid(out_res, self.placeholder_bgr);
        let stride = canvas.row_bytes();
        let mut cells = Vec::with_capacity(self.layout.cells);

        for (index, snapshot) in snapshots.iter().enumerate() {
            let (content, cell) = match snapshot {
                Some(frame) if self.fits(frame) => (CellContent::Live, &**frame),
                Some(frame) => {
                    warn!(
                        cell = index,
                        got = %frame.resolution(),
                        want = %self.layout.cell,
                        "frame does not match cell geometry, showing placeholder"
                    );
                    (CellContent::Placeholder, &self.placeholder)
                }
                None => (CellContent::Placeholder, &self.placeholder),
            };
            cells.push(content);

            let (x0, y0) = self.layout.origin(index);
            let row_len = cell.row_bytes();
            if row_len == 0 {
                continue;
            }
            for (y, row) in cell.data.chunks_exact(row_len).enumerate() {
                let start = (y0 as usize + y) * stride + x0 as usize * 3;
                canvas.data[start..start + row_len].copy_from_slice(row);
            }
        }

        CompositeGrid {
            frame: canvas,
            layout: self.layout,
            cells,
        }
    }

    fn fits(&self, frame: &Frame) -> bool {
        frame.resolution() == self.layout.cell
            && frame.pixel_format == PixelFormat::Bgr8
            && frame.data.len() == frame.expected_len()
    }
}
