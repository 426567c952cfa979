use crate::extent::{Extent, PieceExtent};

use derive_new::new;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Strategy for cutting a whole extent into pieces.
#[derive(Clone, Copy, Debug, Default, Display, EnumString, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum SplitMode {
    XSlab,
    YSlab,
    ZSlab,
    /// Repeatedly halve the longest axis.
    #[default]
    Block,
}

impl SplitMode {
    fn preferred_axis(&self) -> Option<usize> {
        match self {
            SplitMode::XSlab => Some(0),
            SplitMode::YSlab => Some(1),
            SplitMode::ZSlab => Some(2),
            SplitMode::Block => None,
        }
    }
}

/// Translates piece requests into structured extents.  Pieces are produced
/// by recursive bisection; neighbouring pieces share their boundary points.
#[derive(new, Clone, Copy, Debug, Default)]
pub struct ExtentTranslator {
    mode: SplitMode,
}

impl ExtentTranslator {
    pub fn mode(&self) -> SplitMode {
        self.mode
    }

    /// Extent of `piece` (ghost levels ignored), or `None` when the whole
    /// extent is too small to give this piece any points.
    pub fn piece_extent(&self, whole: &Extent, piece: u32, pieces: u32) -> Option<Extent> {
        if pieces == 0 || piece >= pieces {
            return None;
        }
        let mut bounds = whole.as_array();
        let mut piece = piece;
        let mut pieces = pieces;
        while pieces > 1 {
            let size = [0, 1, 2].map(|axis| bounds[2 * axis + 1] - bounds[2 * axis]);
            let axis = match self.mode.preferred_axis() {
                Some(axis) if size[axis] > 1 => Some(axis),
                _ => Self::longest_axis(size),
            };
            match axis {
                None => {
                    // cannot split further, the first piece keeps everything
                    if piece == 0 {
                        pieces = 1;
                    } else {
                        return None;
                    }
                }
                Some(axis) => {
                    let first_half = pieces / 2;
                    let mid = bounds[2 * axis] + size[axis] * first_half as i64 / pieces as i64;
                    if piece < first_half {
                        bounds[2 * axis + 1] = mid;
                        pieces = first_half;
                    } else {
                        bounds[2 * axis] = mid;
                        pieces -= first_half;
                        piece -= first_half;
                    }
                }
            }
        }
        Extent::from_array(bounds).ok()
    }

    /// Extent of the piece plus its ghost layers, clipped to `whole`.
    pub fn ghosted_extent(&self, whole: &Extent, piece: &PieceExtent) -> Option<Extent> {
        self.piece_extent(whole, piece.piece(), piece.pieces())
            .and_then(|extent| extent.grow(piece.ghost_levels() as i64).clip(whole))
    }

    fn longest_axis(size: [i64; 3]) -> Option<usize> {
        if size[2] >= size[1] && size[2] >= size[0] && size[2] / 2 >= 1 {
            Some(2)
        } else if size[1] >= size[0] && size[1] / 2 >= 1 {
            Some(1)
        } else if size[0] / 2 >= 1 {
            Some(0)
        } else {
            None
        }
    }
}
