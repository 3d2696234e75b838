//! Morphological gap closing
//!
//! Raster closing uses a square structuring element of half-size `radius`
//! (side `2·radius + 1`), computed separably with running window counts.
//! Pixels outside the tile count as empty for dilation and as full for
//! erosion, so closing never removes an input pixel, including along tile
//! edges.

use geo::{Buffer, MultiPolygon};

use super::types::{ClassifiedMask, Label};

/// Dilate-then-erode closing applied per label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GapCloser {
    radius: u32,
}

impl GapCloser {
    pub fn new(radius: u32) -> Self {
        Self { radius }
    }

    pub fn radius(&self) -> u32 {
        self.radius
    }

    /// Close every label of `mask`.
    ///
    /// Only background pixels are filled. Labels are processed in ascending
    /// order against the original mask, so when two labels would both fill a
    /// pixel the lower label wins.
    pub fn close(&self, mask: &ClassifiedMask) -> ClassifiedMask {
        if self.radius == 0 {
            return mask.clone();
        }

        let (w, h) = (mask.width as usize, mask.height as usize);
        let r = self.radius as usize;
        let mut out = mask.clone();

        for label in mask.present_labels() {
            let bits: Vec<bool> = mask.labels.iter().map(|&l| l == label.0).collect();
            let closed = close_bits(&bits, w, h, r);
            for (dst, fill) in out.labels.iter_mut().zip(closed) {
                if fill && *dst == Label::BACKGROUND.0 {
                    *dst = label.0;
                }
            }
        }

        out
    }
}

/// Vector closing: buffer out by `distance`, then back in
pub fn close_polygons(polygons: &MultiPolygon<f64>, distance: f64) -> MultiPolygon<f64> {
    if distance <= 0.0 || polygons.0.is_empty() {
        return polygons.clone();
    }
    polygons.buffer(distance).buffer(-distance)
}

fn close_bits(bits: &[bool], w: usize, h: usize, r: usize) -> Vec<bool> {
    let dilated = dilate(bits, w, h, r);
    let inverted: Vec<bool> = dilated.iter().map(|b| !b).collect();
    // erosion(X) = !dilation(!X); outside counts as empty in the inner dilation
    dilate(&inverted, w, h, r).into_iter().map(|b| !b).collect()
}

fn dilate(bits: &[bool], w: usize, h: usize, r: usize) -> Vec<bool> {
    let rows = sweep(bits, w, h, r, Axis::Row);
    sweep(&rows, w, h, r, Axis::Column)
}

#[derive(Clone, Copy)]
enum Axis {
    Row,
    Column,
}

/// `out[i]` is set if any pixel within `r` of `i` along `axis` is set
fn sweep(bits: &[bool], w: usize, h: usize, r: usize, axis: Axis) -> Vec<bool> {
    let (lines, len) = match axis {
        Axis::Row => (h, w),
        Axis::Column => (w, h),
    };
    let index = |line: usize, pos: usize| match axis {
        Axis::Row => line * w + pos,
        Axis::Column => pos * w + line,
    };

    let mut out = vec![false; bits.len()];
    let mut prefix = vec![0usize; len + 1];
    for line in 0..lines {
        for pos in 0..len {
            prefix[pos + 1] = prefix[pos] + bits[index(line, pos)] as usize;
        }
        for pos in 0..len {
            let lo = pos.saturating_sub(r);
            let hi = (pos + r + 1).min(len);
            out[index(line, pos)] = prefix[hi] > prefix[lo];
        }
    }
    out
}
