//! Tile-grid change detection between two frames.

use rayon::prelude::*;
use shared::protocol::{Frame, Rect, SliceCount};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiffError {
    #[error("current frame is missing")]
    NoCurrentFrame,

    /// A configuration bug, not a transient condition: the grid is never
    /// silently truncated to fit.
    #[error("frame {axis} {size} is not divisible by slice count {count}")]
    NotDivisible {
        axis: &'static str,
        size: u32,
        count: SliceCount,
    },
}

/// Partition `current` into a `slice_count` x `slice_count` grid and
/// return one [`Rect`] per tile whose RGB content differs from
/// `previous`. A missing previous frame or `force_full` marks every tile.
///
/// Tiles are scanned in parallel and joined before returning; the output
/// is assembled column-major, so order is stable across calls.
pub fn diff(
    previous: Option<&Frame>,
    current: Option<&Frame>,
    slice_count: SliceCount,
    force_full: bool,
) -> Result<Vec<Rect>, DiffError> {
    let current = current.ok_or(DiffError::NoCurrentFrame)?;
    let (width, height) = (current.width(), current.height());

    if width % slice_count != 0 {
        return Err(DiffError::NotDivisible {
            axis: "width",
            size: width,
            count: slice_count,
        });
    }
    if height % slice_count != 0 {
        return Err(DiffError::NotDivisible {
            axis: "height",
            size: height,
            count: slice_count,
        });
    }

    let tile_width = width / slice_count;
    let tile_height = height / slice_count;
    let cols = width / tile_width;
    let rows = height / tile_height;

    let changed: Vec<bool> = match previous {
        None => vec![true; (cols * rows) as usize],
        Some(_) if force_full => vec![true; (cols * rows) as usize],
        Some(previous) => (0..cols * rows)
            .into_par_iter()
            .map(|tile| {
                let col = tile / rows;
                let row = tile % rows;
                tile_changed(
                    previous,
                    current,
                    col * tile_width,
                    row * tile_height,
                    tile_width,
                    tile_height,
                )
            })
            .collect(),
    };

    let mut rects = Vec::new();
    for col in 0..cols {
        for row in 0..rows {
            if !changed[(col * rows + row) as usize] {
                continue;
            }
            let x = col * tile_width;
            let y = row * tile_height;
            rects.push(Rect {
                x: u64::from(x),
                y: u64::from(y),
                frame: current.crop(x, y, tile_width, tile_height),
            });
        }
    }

    Ok(rects)
}

/// Compare one tile's RGB content, alpha ignored. Any differing pixel
/// short-circuits the scan.
fn tile_changed(previous: &Frame, current: &Frame, x: u32, y: u32, width: u32, height: u32) -> bool {
    // Clamped to both frame edges; under the divisibility invariant this
    // only matters if the two frames disagree on geometry.
    let x_max = (x + width).min(current.width()).min(previous.width());
    let y_max = (y + height).min(current.height()).min(previous.height());

    for px in x..x_max {
        for py in y..y_max {
            if previous.rgb(px, py) != current.rgb(px, py) {
                return true;
            }
        }
    }

    false
}
