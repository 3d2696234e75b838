//! R-tree over grouping polygon bounding boxes

use geo::{BoundingRect, Rect};
use rstar::{AABB, RTree, RTreeObject};

use super::types::GroupPolygon;

/// Entry in the group index: bounding box and index into the groups vector
#[derive(Debug, Clone)]
struct GroupEntry {
    index: usize,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for GroupEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Finds grouping polygons whose bounds intersect a query rectangle
pub struct GroupIndex<'a> {
    tree: RTree<GroupEntry>,
    groups: &'a [GroupPolygon],
}

impl<'a> GroupIndex<'a> {
    pub fn new(groups: &'a [GroupPolygon]) -> Self {
        let entries = groups
            .iter()
            .enumerate()
            .filter_map(|(index, group)| {
                group.geometry.bounding_rect().map(|rect| GroupEntry {
                    index,
                    envelope: to_aabb(&rect),
                })
            })
            .collect();

        Self {
            tree: RTree::bulk_load(entries),
            groups,
        }
    }

    /// Indices of candidate groups, ascending
    pub fn candidates(&self, rect: &Rect<f64>) -> Vec<usize> {
        let mut hits: Vec<usize> = self
            .tree
            .locate_in_envelope_intersecting(&to_aabb(rect))
            .map(|entry| entry.index)
            .collect();
        hits.sort_unstable();
        hits
    }

    pub fn group(&self, index: usize) -> &'a GroupPolygon {
        &self.groups[index]
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }
}

fn to_aabb(rect: &Rect<f64>) -> AABB<[f64; 2]> {
    AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::rect;
    use geo::MultiPolygon;

    fn group(key: &str, x0: f64, x1: f64) -> GroupPolygon {
        GroupPolygon {
            key: key.to_string(),
            geometry: MultiPolygon::new(vec![rect(x0, 0.0, x1, 10.0)]),
        }
    }

    #[test]
    fn test_candidates_by_bounds() {
        let groups = vec![group("west", 0.0, 10.0), group("east", 10.0, 20.0), group("far", 100.0, 110.0)];
        let index = GroupIndex::new(&groups);
        assert_eq!(index.len(), 3);

        let query = Rect::new((8.0, 2.0), (12.0, 4.0));
        assert_eq!(index.candidates(&query), vec![0, 1]);

        let query = Rect::new((50.0, 2.0), (60.0, 4.0));
        assert!(index.candidates(&query).is_empty());
        assert_eq!(index.group(2).key, "far");
    }

    #[test]
    fn test_empty_groups_skipped() {
        let groups = vec![GroupPolygon {
            key: "empty".into(),
            geometry: MultiPolygon::new(vec![]),
        }];
        assert!(GroupIndex::new(&groups).is_empty());
    }
}
