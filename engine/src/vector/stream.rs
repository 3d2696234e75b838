//! Streaming vectorization with a bounded seam-merge window

use geo::{BooleanOps, BoundingRect, Polygon, Rect};
use std::collections::VecDeque;
use tracing::{debug, info};

use super::trace::trace_tile;
use super::types::{RawGeometry, StreamReport, TileFailure};
use crate::raster::{ClassifiedMask, Tile};

/// Holds border-touching geometries of the last `window` tiles so regions
/// crossing a tile edge can be merged before they are emitted.
///
/// Geometries that do not touch their tile border cannot continue into a
/// neighbour and are emitted immediately.
#[derive(Debug)]
pub struct SeamMerger {
    window: usize,
    slots: VecDeque<Vec<RawGeometry>>,
    merges: usize,
}

impl SeamMerger {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            slots: VecDeque::with_capacity(window.max(1) + 1),
            merges: 0,
        }
    }

    /// Accept one tile's geometries and return the ones that are final
    pub fn push_tile(&mut self, geometries: Vec<RawGeometry>) -> Vec<RawGeometry> {
        let mut ready = Vec::new();
        let mut slot = Vec::new();

        for geometry in geometries {
            if !geometry.touches_border {
                ready.push(geometry);
                continue;
            }
            let merged = self.absorb(geometry);
            slot.push(merged);
        }

        self.slots.push_back(slot);
        while self.slots.len() > self.window {
            if let Some(oldest) = self.slots.pop_front() {
                ready.extend(oldest);
            }
        }
        ready
    }

    /// Emit everything still held
    pub fn flush(&mut self) -> Vec<RawGeometry> {
        self.slots.drain(..).flatten().collect()
    }

    /// Geometries currently held in the window
    pub fn pending(&self) -> usize {
        self.slots.iter().map(Vec::len).sum()
    }

    pub fn merges(&self) -> usize {
        self.merges
    }

    /// Repeatedly union `geometry` with touching pending geometries of the same label
    fn absorb(&mut self, mut geometry: RawGeometry) -> RawGeometry {
        while let Some((slot, index, polygon)) = self.find_partner(&geometry) {
            let partner = self.slots[slot].swap_remove(index);

            // keep the earliest tile as the primary source
            let (primary, secondary) = if partner.tile_id <= geometry.tile_id {
                (partner, geometry)
            } else {
                (geometry, partner)
            };
            let mut merged_from = primary.merged_from;
            merged_from.push(secondary.tile_id);
            merged_from.extend(secondary.merged_from);
            merged_from.sort();
            merged_from.dedup();
            merged_from.retain(|t| *t != primary.tile_id);

            self.merges += 1;
            geometry = RawGeometry {
                label: primary.label,
                tile_id: primary.tile_id,
                polygon,
                touches_border: true,
                merged_from,
            };
        }
        geometry
    }

    /// First pending geometry whose union with `geometry` is a single polygon
    fn find_partner(&self, geometry: &RawGeometry) -> Option<(usize, usize, Polygon<f64>)> {
        let bounds = expanded_bounds(geometry)?;
        for (s, slot) in self.slots.iter().enumerate() {
            for (i, candidate) in slot.iter().enumerate() {
                if candidate.label != geometry.label {
                    continue;
                }
                let Some(other) = candidate.polygon.bounding_rect() else {
                    continue;
                };
                if !rects_overlap(&bounds, &other) {
                    continue;
                }
                let mut union = geometry.polygon.union(&candidate.polygon).0;
                if union.len() == 1 {
                    return union.pop().map(|p| (s, i, p));
                }
            }
        }
        None
    }
}

fn expanded_bounds(geometry: &RawGeometry) -> Option<Rect<f64>> {
    let rect = geometry.polygon.bounding_rect()?;
    let scale = rect
        .min()
        .x
        .abs()
        .max(rect.min().y.abs())
        .max(rect.max().x.abs())
        .max(rect.max().y.abs())
        .max(1.0);
    let tol = scale * 1e-9;
    Some(Rect::new(
        (rect.min().x - tol, rect.min().y - tol),
        (rect.max().x + tol, rect.max().y + tol),
    ))
}

fn rects_overlap(a: &Rect<f64>, b: &Rect<f64>) -> bool {
    a.min().x <= b.max().x && b.min().x <= a.max().x && a.min().y <= b.max().y && b.min().y <= a.max().y
}

/// Lazy, one-pass conversion of classified tiles into raw geometry.
///
/// At most one tile and its mask are held at a time, plus the geometries
/// buffered by the seam window. Tiles that fail upstream or during tracing
/// are recorded and skipped.
pub struct StreamingVectorizer<I> {
    input: I,
    merger: SeamMerger,
    ready: VecDeque<RawGeometry>,
    report: StreamReport,
    exhausted: bool,
}

impl<I> StreamingVectorizer<I>
where
    I: Iterator<Item = Result<(Tile, ClassifiedMask), TileFailure>>,
{
    pub fn new(input: I, window_tiles: usize) -> Self {
        Self {
            input,
            merger: SeamMerger::new(window_tiles),
            ready: VecDeque::new(),
            report: StreamReport::default(),
            exhausted: false,
        }
    }

    /// Counters so far; complete once the iterator returned `None`
    pub fn report(&self) -> &StreamReport {
        &self.report
    }

    pub fn into_report(mut self) -> StreamReport {
        self.report.seam_merges = self.merger.merges();
        self.report
    }

    fn process(&mut self, tile: Tile, mask: ClassifiedMask) {
        match trace_tile(&tile, &mask) {
            Ok(geometries) => {
                self.report.record_tile();
                let final_geometries = self.merger.push_tile(geometries);
                debug!(
                    "Tile {}: {} geometries ready, {} pending",
                    tile.id,
                    final_geometries.len(),
                    self.merger.pending()
                );
                self.ready.extend(final_geometries);
            }
            Err(e) => self.report.record_failure(TileFailure::vectorize(tile.id.clone(), &e)),
        }
    }
}

impl<I> Iterator for StreamingVectorizer<I>
where
    I: Iterator<Item = Result<(Tile, ClassifiedMask), TileFailure>>,
{
    type Item = RawGeometry;

    fn next(&mut self) -> Option<RawGeometry> {
        loop {
            if let Some(geometry) = self.ready.pop_front() {
                self.report.geometries_emitted += 1;
                return Some(geometry);
            }
            if self.exhausted {
                return None;
            }
            match self.input.next() {
                Some(Ok((tile, mask))) => self.process(tile, mask),
                Some(Err(failure)) => self.report.record_failure(failure),
                None => {
                    self.exhausted = true;
                    self.ready.extend(self.merger.flush());
                    self.report.seam_merges = self.merger.merges();
                    info!(
                        "Vectorized {} tiles ({} failed), {} seam merges",
                        self.report.tiles_processed,
                        self.report.failed_tiles.len(),
                        self.report.seam_merges
                    );
                }
            }
        }
    }
}
