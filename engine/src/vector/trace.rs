//! Boundary tracing of label-connected pixel regions
//!
//! Every pixel edge separating a filled pixel from a non-filled one becomes a
//! directed unit edge with the filled pixel on its right (pixel space, y down).
//! Linking the edges, always preferring the tightest right turn, yields closed
//! walks; splitting those walks at repeated vertices gives simple rings. Rings
//! with positive signed area are shells, negative ones are holes. Filled
//! regions are 4-connected.

use geo::orient::{Direction, Orient};
use geo::{Contains, Coord, LineString, Polygon};
use metrics::histogram;
use rstar::{AABB, RTree, RTreeObject};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, warn};

use super::types::{RawGeometry, VectorizationError};
use crate::raster::{Affine, ClassifiedMask, Label, Tile};

type Vertex = (i64, i64);
type Step = (i64, i64);

/// A traced region in pixel-corner coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct PixelPolygon {
    pub shell: Vec<Vertex>,
    pub holes: Vec<Vec<Vertex>>,
    pub touches_border: bool,
}

impl PixelPolygon {
    /// Area in pixels
    pub fn area(&self) -> i64 {
        let holes: i64 = self.holes.iter().map(|h| signed_area2(h).abs()).sum();
        (signed_area2(&self.shell).abs() - holes) / 2
    }

    /// Map into CRS coordinates through the tile transform
    pub fn to_polygon(&self, transform: &Affine) -> Polygon<f64> {
        let ring = |vertices: &[Vertex]| -> LineString<f64> {
            vertices
                .iter()
                .map(|&(x, y)| transform.apply(x as f64, y as f64))
                .collect::<Vec<Coord<f64>>>()
                .into()
        };
        let holes = self.holes.iter().map(|h| ring(h)).collect();
        Polygon::new(ring(&self.shell), holes).orient(Direction::Default)
    }
}

/// Trace every non-background label of a tile into RawGeometry
pub fn trace_tile(tile: &Tile, mask: &ClassifiedMask) -> Result<Vec<RawGeometry>, VectorizationError> {
    if tile.transform.is_degenerate() {
        return Err(VectorizationError::DegenerateTransform {
            tile: tile.id.clone(),
            transform: tile.transform,
        });
    }
    if mask.width != tile.width || mask.height != tile.height {
        return Err(VectorizationError::ShapeMismatch {
            tile: tile.id.clone(),
            mask_width: mask.width,
            mask_height: mask.height,
            tile_width: tile.width,
            tile_height: tile.height,
        });
    }

    let start = Instant::now();
    let mut geometries = Vec::new();
    for label in mask.present_labels() {
        for region in trace_label(mask, label) {
            geometries.push(RawGeometry {
                label,
                tile_id: tile.id.clone(),
                polygon: region.to_polygon(&tile.transform),
                touches_border: region.touches_border,
                merged_from: Vec::new(),
            });
        }
    }
    histogram!("coverage_tile_vectorize_seconds").record(start.elapsed());
    debug!(
        "Traced tile {}: {} polygons in {:?}",
        tile.id,
        geometries.len(),
        start.elapsed()
    );

    Ok(geometries)
}

/// Trace all regions carrying `label`
pub fn trace_label(mask: &ClassifiedMask, label: Label) -> Vec<PixelPolygon> {
    let edges = boundary_edges(mask, label);
    let rings = link_rings(&edges);

    let mut shells = Vec::new();
    let mut holes = Vec::new();
    for ring in rings {
        let ring = drop_collinear(ring);
        if ring.len() < 4 {
            continue;
        }
        match signed_area2(&ring) {
            a if a > 0 => shells.push(ring),
            a if a < 0 => holes.push(ring),
            _ => {}
        }
    }

    let (w, h) = (mask.width as i64, mask.height as i64);
    let mut polygons: Vec<PixelPolygon> = shells
        .into_iter()
        .map(|shell| {
            let touches_border = shell
                .iter()
                .any(|&(x, y)| x == 0 || y == 0 || x == w || y == h);
            PixelPolygon {
                shell,
                holes: Vec::new(),
                touches_border,
            }
        })
        .collect();

    assign_holes(&mut polygons, holes);
    polygons
}

fn filled(mask: &ClassifiedMask, label: Label, col: i64, row: i64) -> bool {
    mask.get(col, row) == label
}

/// Directed unit edges (start vertex, step) with the filled pixel on the right
fn boundary_edges(mask: &ClassifiedMask, label: Label) -> Vec<(Vertex, Step)> {
    let mut edges = Vec::new();
    for row in 0..mask.height as i64 {
        for col in 0..mask.width as i64 {
            if !filled(mask, label, col, row) {
                continue;
            }
            if !filled(mask, label, col, row - 1) {
                edges.push(((col, row), (1, 0)));
            }
            if !filled(mask, label, col + 1, row) {
                edges.push(((col + 1, row), (0, 1)));
            }
            if !filled(mask, label, col, row + 1) {
                edges.push(((col + 1, row + 1), (-1, 0)));
            }
            if !filled(mask, label, col - 1, row) {
                edges.push(((col, row + 1), (0, -1)));
            }
        }
    }
    edges
}

/// Follow edges into closed walks and split them into simple rings
fn link_rings(edges: &[(Vertex, Step)]) -> Vec<Vec<Vertex>> {
    let mut outgoing: HashMap<Vertex, Vec<usize>> = HashMap::with_capacity(edges.len());
    for (i, (start, _)) in edges.iter().enumerate() {
        outgoing.entry(*start).or_default().push(i);
    }

    let mut used = vec![false; edges.len()];
    let mut rings = Vec::new();

    for seed in 0..edges.len() {
        if used[seed] {
            continue;
        }
        let mut walk = Vec::new();
        let mut current = seed;
        loop {
            used[current] = true;
            let (start, step) = edges[current];
            walk.push(start);
            let end = (start.0 + step.0, start.1 + step.1);
            let next = outgoing
                .get(&end)
                .and_then(|candidates| pick_next(step, candidates, edges, &used));
            match next {
                Some(n) => current = n,
                None => break,
            }
        }
        rings.extend(split_at_repeats(walk));
    }

    rings
}

/// Right turn, then straight, then left
fn pick_next(step: Step, candidates: &[usize], edges: &[(Vertex, Step)], used: &[bool]) -> Option<usize> {
    let (dx, dy) = step;
    [(-dy, dx), (dx, dy), (dy, -dx)].into_iter().find_map(|wanted| {
        candidates
            .iter()
            .copied()
            .find(|&i| !used[i] && edges[i].1 == wanted)
    })
}

fn split_at_repeats(walk: Vec<Vertex>) -> Vec<Vec<Vertex>> {
    let mut stack: Vec<Vertex> = Vec::with_capacity(walk.len());
    let mut position: HashMap<Vertex, usize> = HashMap::new();
    let mut rings = Vec::new();

    for v in walk {
        if let Some(&p) = position.get(&v) {
            let ring: Vec<Vertex> = stack.drain(p..).collect();
            for u in &ring {
                position.remove(u);
            }
            rings.push(ring);
        }
        position.insert(v, stack.len());
        stack.push(v);
    }
    if !stack.is_empty() {
        rings.push(stack);
    }
    rings
}

fn drop_collinear(ring: Vec<Vertex>) -> Vec<Vertex> {
    let n = ring.len();
    if n < 3 {
        return ring;
    }
    (0..n)
        .filter(|&i| {
            let prev = ring[(i + n - 1) % n];
            let v = ring[i];
            let next = ring[(i + 1) % n];
            (v.0 - prev.0) * (next.1 - v.1) - (v.1 - prev.1) * (next.0 - v.0) != 0
        })
        .map(|i| ring[i])
        .collect()
}

/// Twice the shoelace area; positive for shells in y-down pixel space
fn signed_area2(ring: &[Vertex]) -> i64 {
    let n = ring.len();
    (0..n)
        .map(|i| {
            let (x0, y0) = ring[i];
            let (x1, y1) = ring[(i + 1) % n];
            x0 * y1 - x1 * y0
        })
        .sum()
}

struct ShellEntry {
    index: usize,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for ShellEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Attach each hole to the smallest shell containing the pixel beside it
fn assign_holes(polygons: &mut [PixelPolygon], holes: Vec<Vec<Vertex>>) {
    if holes.is_empty() {
        return;
    }

    let shells: Vec<(Polygon<f64>, i64)> = polygons
        .iter()
        .map(|p| {
            let ring: Vec<Coord<f64>> = p
                .shell
                .iter()
                .map(|&(x, y)| Coord { x: x as f64, y: y as f64 })
                .collect();
            (Polygon::new(ring.into(), vec![]), signed_area2(&p.shell))
        })
        .collect();

    let entries = polygons
        .iter()
        .enumerate()
        .map(|(index, p)| {
            let (mut min, mut max) = ([f64::MAX; 2], [f64::MIN; 2]);
            for &(x, y) in &p.shell {
                min = [min[0].min(x as f64), min[1].min(y as f64)];
                max = [max[0].max(x as f64), max[1].max(y as f64)];
            }
            ShellEntry {
                index,
                envelope: AABB::from_corners(min, max),
            }
        })
        .collect();
    let tree = RTree::bulk_load(entries);

    for hole in holes {
        let (x0, y0) = hole[0];
        let (x1, y1) = hole[1];
        let (ux, uy) = ((x1 - x0).signum() as f64, (y1 - y0).signum() as f64);
        let probe = Coord {
            x: x0 as f64 + 0.5 * ux - 0.5 * uy,
            y: y0 as f64 + 0.5 * uy + 0.5 * ux,
        };

        let owner = tree
            .locate_in_envelope_intersecting(&AABB::from_point([probe.x, probe.y]))
            .filter(|entry| shells[entry.index].0.contains(&probe))
            .min_by_key(|entry| shells[entry.index].1)
            .map(|entry| entry.index);

        match owner {
            Some(index) => polygons[index].holes.push(hole),
            None => warn!("Hole at pixel {:?} has no enclosing shell", hole[0]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::TileId;
    use crate::test_utils::mask_from_rows;
    use geo::Area;

    #[test]
    fn test_single_pixel() {
        let mask = mask_from_rows(&["1"]);
        let regions = trace_label(&mask, Label(1));
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].shell.len(), 4);
        assert_eq!(regions[0].area(), 1);
        assert!(regions[0].touches_border);
    }

    #[test]
    fn test_square_with_hole() {
        let mask = mask_from_rows(&[
            "00000", //
            "01110",
            "01010",
            "01110",
            "00000",
        ]);
        let regions = trace_label(&mask, Label(1));
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].holes.len(), 1);
        assert_eq!(regions[0].area(), 8);
        assert!(!regions[0].touches_border);
    }

    #[test]
    fn test_diagonal_pixels_are_separate_regions() {
        let mask = mask_from_rows(&[
            "10", //
            "01",
        ]);
        let regions = trace_label(&mask, Label(1));
        assert_eq!(regions.len(), 2);
        assert!(regions.iter().all(|r| r.area() == 1 && r.holes.is_empty()));
    }

    #[test]
    fn test_hole_pinched_against_outside() {
        // The hole at (1,2) touches the outside background at the corner (2,2)
        let mask = mask_from_rows(&[
            "0000", //
            "1100",
            "1010",
            "1110",
        ]);
        let regions = trace_label(&mask, Label(1));
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].holes.len(), 1);
        assert_eq!(regions[0].area(), mask.count(Label(1)) as i64);
    }

    #[test]
    fn test_island_inside_hole() {
        let mask = mask_from_rows(&[
            "11111", //
            "10001",
            "10101",
            "10001",
            "11111",
        ]);
        let mut regions = trace_label(&mask, Label(1));
        regions.sort_by_key(|r| r.area());
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0].area(), 1);
        assert!(regions[0].holes.is_empty());
        assert_eq!(regions[1].area(), 16);
        assert_eq!(regions[1].holes.len(), 1);
    }

    #[test]
    fn test_labels_traced_independently() {
        let mask = mask_from_rows(&[
            "1122", //
            "1122",
        ]);
        assert_eq!(trace_label(&mask, Label(1))[0].area(), 4);
        assert_eq!(trace_label(&mask, Label(2))[0].area(), 4);
        assert!(trace_label(&mask, Label(3)).is_empty());
    }

    #[test]
    fn test_trace_tile_maps_through_transform() {
        let mask = mask_from_rows(&[
            "11", //
            "11",
        ]);
        let tile = crate::test_utils::tile_for_mask(&mask, Affine::north_up(1000.0, 2000.0, 10.0));
        let geoms = trace_tile(&tile, &mask).unwrap();
        assert_eq!(geoms.len(), 1);
        assert_eq!(geoms[0].label, Label(1));
        assert_eq!(geoms[0].tile_id, TileId::new("mask"));
        assert!((geoms[0].polygon.unsigned_area() - 400.0).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_transform_rejected() {
        let mask = mask_from_rows(&["1"]);
        let tile = crate::test_utils::tile_for_mask(&mask, Affine::new(0.0, 0.0, 0.0, 0.0, 0.0, 0.0));
        assert!(matches!(
            trace_tile(&tile, &mask),
            Err(VectorizationError::DegenerateTransform { .. })
        ));
    }
}
