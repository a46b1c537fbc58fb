//! Arena-backed quadtree with path-encoded record identifiers.
//!
//! Every record id packs the quadrant choices taken from the root down to
//! the record's leaf (two bits per level, [`PATH_LEVELS`] levels) into its
//! upper 32 bits and a per-leaf slot number into its lower 32 bits, so a
//! record can be found again by replaying its path instead of searching.

use crate::geometry::{Point, Region, quadrant_about};
use crate::{IndexError, NeighborhoodIndex};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Maximum number of records stored in a single leaf.
pub const LEAF_CAPACITY: usize = 32;
/// Number of two-bit quadrant choices encoded in a record path.
pub const PATH_LEVELS: u32 = 16;
/// Leaves at this depth (root = 0) never split; a full one rejects inserts.
pub const MAX_SPLIT_DEPTH: u32 = PATH_LEVELS - 1;

type Bucket = [Record; LEAF_CAPACITY];

const EMPTY_BUCKET: Bucket = [Record::EMPTY; LEAF_CAPACITY];

#[inline]
fn path_quadrant(path: u32, level: u32) -> usize {
    ((path >> (2 * level)) & 0b11) as usize
}

/// 64-bit record identifier: `path << 32 | slot`.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord,
)]
pub struct RecordId(pub u64);

impl RecordId {
    /// Reserved value never handed out by [`Quadtree::insert`].
    pub const INVALID: Self = Self(u64::MAX);

    #[must_use]
    pub const fn new(path: u32, slot: u32) -> Self {
        Self(((path as u64) << 32) | slot as u64)
    }

    /// Quadrant choices from the root, level 0 in the lowest two bits.
    #[must_use]
    pub const fn path(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Per-leaf disambiguator.
    #[must_use]
    pub const fn slot(self) -> u32 {
        self.0 as u32
    }

    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }
}

/// Index of a node inside the tree arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    /// The root node; always present.
    pub const ROOT: Self = Self(0);

    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Arena node. The root is its own parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Node {
    Internal { parent: NodeId, children: [NodeId; 4] },
    Leaf { parent: NodeId, bucket: usize, len: usize },
}

impl Node {
    #[must_use]
    pub const fn parent(&self) -> NodeId {
        match self {
            Self::Internal { parent, .. } | Self::Leaf { parent, .. } => *parent,
        }
    }

    #[must_use]
    pub const fn is_leaf(&self) -> bool {
        matches!(self, Self::Leaf { .. })
    }
}

/// A stored point with its identifier and caller payload.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Record {
    pub point: Point,
    pub id: RecordId,
    pub payload: usize,
}

impl Record {
    const EMPTY: Self = Self {
        point: Point::new(0.0, 0.0),
        id: RecordId::INVALID,
        payload: usize::MAX,
    };
}

/// A record found by [`Quadtree::find_neighbours`] with its distance to the query center.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbour {
    pub record: Record,
    pub distance: f32,
}

/// Outcome of a bounded neighbour search.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NeighbourSearch {
    /// Entries written to the output buffer.
    pub written: usize,
    /// Records within range, including those that did not fit.
    pub total_found: usize,
}

impl NeighbourSearch {
    /// True when more records were in range than the buffer could hold.
    #[must_use]
    pub const fn truncated(&self) -> bool {
        self.total_found > self.written
    }
}

/// Traversal control returned by [`Quadtree::visit_nodes`] visitors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    /// Descend into the node's children.
    Continue,
    /// Do not descend below this node.
    Skip,
    /// Abort the whole traversal.
    Exit,
}

/// How records are relocated when the tree is rebuilt over a new region.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum RelocationPolicy {
    /// Recompute path and slot from each record's point under the new region.
    /// Ids change across a rebuild.
    #[default]
    RecomputePath,
    /// Re-resolve each record through the path bits of its existing id and keep
    /// the id. Quadrant choices made under the old region are replayed against
    /// the new one, so records can land in leaves that do not cover their point.
    PreservePath,
}

/// Result of [`Quadtree::ensure_region`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionChange {
    /// The requested region was already covered.
    Unchanged,
    /// The tree was rebuilt over a larger region; cached ids may be stale.
    Rebuilt,
}

/// Region-subdivision tree over 2D points.
#[derive(Debug, Clone)]
pub struct Quadtree {
    region: Region,
    policy: RelocationPolicy,
    nodes: Vec<Node>,
    buckets: Vec<Bucket>,
    len: usize,
}

impl Default for Quadtree {
    fn default() -> Self {
        Self::new(Region::UNIT)
    }
}

impl Quadtree {
    /// Create an empty tree covering `region`.
    #[must_use]
    pub fn new(region: Region) -> Self {
        Self::with_policy(region, RelocationPolicy::default())
    }

    /// Create an empty tree with an explicit relocation policy.
    #[must_use]
    pub fn with_policy(region: Region, policy: RelocationPolicy) -> Self {
        Self {
            region,
            policy,
            nodes: vec![Self::root_leaf()],
            buckets: vec![EMPTY_BUCKET],
            len: 0,
        }
    }

    const fn root_leaf() -> Node {
        Node::Leaf {
            parent: NodeId::ROOT,
            bucket: 0,
            len: 0,
        }
    }

    /// Root region; bounds every stored point.
    #[must_use]
    pub const fn region(&self) -> Region {
        self.region
    }

    #[must_use]
    pub const fn policy(&self) -> RelocationPolicy {
        self.policy
    }

    /// Number of stored records.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of arena nodes (internal and leaf).
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn node(&self, node: NodeId) -> Option<&Node> {
        self.nodes.get(node.0)
    }

    /// Insert `point`, returning its id. Full leaves along the point's path are
    /// split until one has room. Returns `None` when the destination leaf is
    /// full at [`MAX_SPLIT_DEPTH`], when the point is not finite, or when
    /// growing the region to cover it failed.
    pub fn insert(&mut self, point: Point, payload: usize) -> Option<RecordId> {
        if !point.is_finite() {
            return None;
        }
        if !self.region.contains(point) {
            let grown = self.region.union_point(point);
            if let Err(err) = self.resize(grown) {
                debug!(%err, x = point.x, y = point.y, "insert could not grow index region");
                return None;
            }
        }
        let path = self.compute_path(point);
        self.insert_at(path, point, payload)
    }

    fn insert_at(&mut self, path: u32, point: Point, payload: usize) -> Option<RecordId> {
        let leaf = self.leaf_with_room(path)?;
        let id = RecordId::new(path, self.free_slot(leaf));
        self.push_record(leaf, Record { point, id, payload });
        Some(id)
    }

    /// Remove the record `id`, returning it. Unknown ids are ignored.
    pub fn erase(&mut self, id: RecordId) -> Option<Record> {
        let node = self.resolve(id.path());
        let Node::Leaf { bucket, len, .. } = &mut self.nodes[node.0] else {
            return None;
        };
        let records = &mut self.buckets[*bucket];
        let position = records[..*len].iter().position(|record| record.id == id)?;
        let removed = records[position];
        records.copy_within(position + 1..*len, position);
        *len -= 1;
        records[*len] = Record::EMPTY;
        self.len -= 1;
        Some(removed)
    }

    /// Look up a record by id.
    #[must_use]
    pub fn get(&self, id: RecordId) -> Option<&Record> {
        self.leaf_records(self.resolve(id.path()))
            .iter()
            .find(|record| record.id == id)
    }

    /// Mutable access to a record's payload. Moving the point through this
    /// handle is not supported; erase and reinsert instead.
    pub fn get_mut(&mut self, id: RecordId) -> Option<&mut usize> {
        let node = self.resolve(id.path());
        let Node::Leaf { bucket, len, .. } = self.nodes[node.0] else {
            return None;
        };
        self.buckets[bucket][..len]
            .iter_mut()
            .find(|record| record.id == id)
            .map(|record| &mut record.payload)
    }

    /// Collect up to `capacity` records within `max_distance` of `center` into
    /// `out`, nearest first. Records at equal distance keep traversal order.
    pub fn find_neighbours(
        &self,
        center: Point,
        max_distance: f32,
        out: &mut Vec<Neighbour>,
        capacity: usize,
    ) -> NeighbourSearch {
        out.clear();
        let mut total_found = 0;
        self.for_each_within(center, max_distance, |record, distance| {
            total_found += 1;
            insert_bounded(
                out,
                capacity,
                Neighbour {
                    record: *record,
                    distance,
                },
            );
        });
        NeighbourSearch {
            written: out.len(),
            total_found,
        }
    }

    fn for_each_within(
        &self,
        center: Point,
        max_distance: f32,
        mut visitor: impl FnMut(&Record, f32),
    ) {
        self.visit_nodes(|node, region| {
            if !region.overlaps_circle(center, max_distance) {
                return Visit::Skip;
            }
            for record in self.leaf_records(node) {
                let distance = record.point.distance(center);
                if distance <= max_distance {
                    visitor(record, distance);
                }
            }
            Visit::Continue
        });
    }

    /// Grow the tree so it covers `region`. Cheap when already covered.
    pub fn ensure_region(&mut self, region: Region) -> Result<RegionChange, IndexError> {
        if !region.is_valid() {
            return Err(IndexError::InvalidRegion("region must be finite with min <= max"));
        }
        if self.region.contains_region(&region) {
            return Ok(RegionChange::Unchanged);
        }
        self.resize(self.region.union(&region))?;
        Ok(RegionChange::Rebuilt)
    }

    /// Rebuild the tree over `region`, reinserting every record according to
    /// the tree's [`RelocationPolicy`]. On failure the tree is left untouched.
    pub fn resize(&mut self, region: Region) -> Result<(), IndexError> {
        if !region.is_valid() {
            return Err(IndexError::InvalidRegion("region must be finite with min <= max"));
        }
        if self.records().any(|record| !region.contains(record.point)) {
            return Err(IndexError::InvalidRegion(
                "region must contain every stored record",
            ));
        }

        let mut rebuilt = Self::with_policy(region, self.policy);
        for (placed, record) in self.records().enumerate() {
            if !rebuilt.relocate(record) {
                return Err(IndexError::Rebuild {
                    id: record.id.0,
                    placed,
                    total: self.len,
                });
            }
        }
        debug!(
            records = self.len,
            nodes = rebuilt.nodes.len(),
            min_x = region.min.x,
            min_y = region.min.y,
            max_x = region.max.x,
            max_y = region.max.y,
            policy = ?self.policy,
            "rebuilt quadtree"
        );
        *self = rebuilt;
        Ok(())
    }

    fn relocate(&mut self, record: &Record) -> bool {
        match self.policy {
            RelocationPolicy::RecomputePath => {
                let path = self.compute_path(record.point);
                self.insert_at(path, record.point, record.payload).is_some()
            }
            RelocationPolicy::PreservePath => match self.leaf_with_room(record.id.path()) {
                Some(leaf) => {
                    self.push_record(leaf, *record);
                    true
                }
                None => false,
            },
        }
    }

    /// Drop every record, keeping the current region.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.buckets.clear();
        self.nodes.push(Self::root_leaf());
        self.buckets.push(EMPTY_BUCKET);
        self.len = 0;
    }

    /// Depth-first traversal from the root in quadrant order. Returns `false`
    /// if the visitor exited early.
    pub fn visit_nodes(&self, mut visitor: impl FnMut(NodeId, Region) -> Visit) -> bool {
        self.visit_from(NodeId::ROOT, self.region, &mut visitor)
    }

    fn visit_from(
        &self,
        node: NodeId,
        region: Region,
        visitor: &mut impl FnMut(NodeId, Region) -> Visit,
    ) -> bool {
        match visitor(node, region) {
            Visit::Exit => false,
            Visit::Skip => true,
            Visit::Continue => {
                if let Node::Internal { children, .. } = self.nodes[node.0] {
                    for (quadrant, child) in children.into_iter().enumerate() {
                        if !self.visit_from(child, region.quadrant(quadrant), visitor) {
                            return false;
                        }
                    }
                }
                true
            }
        }
    }

    /// Records stored in `node`; empty for internal or unknown nodes.
    #[must_use]
    pub fn leaf_records(&self, node: NodeId) -> &[Record] {
        match self.nodes.get(node.0) {
            Some(Node::Leaf { bucket, len, .. }) => &self.buckets[*bucket][..*len],
            _ => &[],
        }
    }

    /// Every stored record, in arena order.
    pub fn records(&self) -> impl Iterator<Item = &Record> + '_ {
        self.nodes.iter().flat_map(|node| match node {
            Node::Leaf { bucket, len, .. } => &self.buckets[*bucket][..*len],
            Node::Internal { .. } => &[][..],
        })
    }

    /// Leaf that currently owns the path of `point` under the root region.
    #[must_use]
    pub fn locate(&self, point: Point) -> NodeId {
        self.resolve(self.compute_path(point))
    }

    /// Number of edges between `node` and the root.
    #[must_use]
    pub fn node_depth(&self, node: NodeId) -> Option<u32> {
        self.nodes.get(node.0)?;
        let mut depth = 0;
        let mut current = node;
        loop {
            let parent = self.nodes[current.0].parent();
            if parent == current {
                return Some(depth);
            }
            current = parent;
            depth += 1;
        }
    }

    /// Rectangle covered by `node`, replayed from the root through the
    /// quadrant each ancestor assigned to its child.
    #[must_use]
    pub fn node_region(&self, node: NodeId) -> Option<Region> {
        self.nodes.get(node.0)?;
        let mut choices = [0usize; PATH_LEVELS as usize];
        let mut depth = 0;
        let mut current = node;
        loop {
            let parent = self.nodes[current.0].parent();
            if parent == current {
                break;
            }
            let Node::Internal { children, .. } = self.nodes[parent.0] else {
                return None;
            };
            choices[depth] = children.iter().position(|&child| child == current)?;
            depth += 1;
            current = parent;
        }
        Some(
            choices[..depth]
                .iter()
                .rev()
                .fold(self.region, |region, &quadrant| region.quadrant(quadrant)),
        )
    }

    fn compute_path(&self, point: Point) -> u32 {
        let mut region = self.region;
        let mut path = 0;
        for level in 0..PATH_LEVELS {
            let quadrant = region.quadrant_of(point);
            path |= (quadrant as u32) << (2 * level);
            region = region.quadrant(quadrant);
        }
        path
    }

    /// Walk from the root consuming two path bits per internal node.
    fn resolve(&self, path: u32) -> NodeId {
        let mut node = NodeId::ROOT;
        for level in 0..PATH_LEVELS {
            match self.nodes[node.0] {
                Node::Leaf { .. } => break,
                Node::Internal { children, .. } => node = children[path_quadrant(path, level)],
            }
        }
        node
    }

    /// Resolve `path`, splitting full leaves along it until the owning leaf
    /// has room or sits at [`MAX_SPLIT_DEPTH`].
    fn leaf_with_room(&mut self, path: u32) -> Option<NodeId> {
        let mut leaf = self.resolve(path);
        while self.should_split(leaf) {
            if !self.split(leaf) {
                break;
            }
            leaf = self.resolve(path);
        }
        (self.leaf_records(leaf).len() < LEAF_CAPACITY).then_some(leaf)
    }

    fn should_split(&self, node: NodeId) -> bool {
        matches!(self.nodes[node.0], Node::Leaf { len, .. } if len == LEAF_CAPACITY)
            && self
                .node_depth(node)
                .is_some_and(|depth| depth < MAX_SPLIT_DEPTH)
    }

    /// Turn a leaf into an internal node with four leaf children and
    /// redistribute its records by quadrant. The first child reuses the
    /// parent's bucket. Returns `false` if `node` was not a splittable leaf.
    fn split(&mut self, node: NodeId) -> bool {
        let Node::Leaf { parent, bucket, len } = self.nodes[node.0] else {
            return false;
        };
        let Some(region) = self.node_region(node) else {
            return false;
        };
        let mid = region.midpoint();
        let old = std::mem::replace(&mut self.buckets[bucket], EMPTY_BUCKET);

        let first = self.nodes.len();
        let mut children = [NodeId::ROOT; 4];
        for (quadrant, child) in children.iter_mut().enumerate() {
            let child_bucket = if quadrant == 0 {
                bucket
            } else {
                self.buckets.push(EMPTY_BUCKET);
                self.buckets.len() - 1
            };
            self.nodes.push(Node::Leaf {
                parent: node,
                bucket: child_bucket,
                len: 0,
            });
            *child = NodeId(first + quadrant);
        }
        self.nodes[node.0] = Node::Internal { parent, children };

        for record in &old[..len] {
            let child = children[quadrant_about(record.point, mid)];
            if let Node::Leaf {
                bucket: child_bucket,
                len: child_len,
                ..
            } = &mut self.nodes[child.0]
            {
                self.buckets[*child_bucket][*child_len] = *record;
                *child_len += 1;
            }
        }
        true
    }

    /// Smallest slot number not used by another record in `leaf`.
    fn free_slot(&self, leaf: NodeId) -> u32 {
        let used = self
            .leaf_records(leaf)
            .iter()
            .map(|record| record.id.slot())
            .filter(|&slot| slot < u64::BITS)
            .fold(0u64, |mask, slot| mask | (1 << slot));
        (!used).trailing_zeros()
    }

    fn push_record(&mut self, leaf: NodeId, record: Record) {
        if let Node::Leaf { bucket, len, .. } = &mut self.nodes[leaf.0] {
            self.buckets[*bucket][*len] = record;
            *len += 1;
            self.len += 1;
        }
    }
}

/// Insert into an ascending buffer of at most `capacity` entries, dropping the
/// farthest entry when full. Equal distances go after existing ones.
fn insert_bounded(out: &mut Vec<Neighbour>, capacity: usize, candidate: Neighbour) {
    let at = out.partition_point(|existing| existing.distance <= candidate.distance);
    if at >= capacity {
        return;
    }
    if out.len() >= capacity {
        out.pop();
    }
    out.insert(at, candidate);
}

impl NeighborhoodIndex for Quadtree {
    fn rebuild(&mut self, positions: &[Point]) -> Result<Vec<Option<RecordId>>, IndexError> {
        let Some(first) = positions.first() else {
            self.clear();
            return Ok(Vec::new());
        };
        let bounds = positions
            .iter()
            .fold(Region::new(*first, *first), |region, &point| {
                region.union_point(point)
            });
        if !bounds.is_valid() {
            return Err(IndexError::InvalidRegion("positions must be finite"));
        }
        self.clear();
        self.region = self.region.union(&bounds);
        Ok(positions
            .iter()
            .enumerate()
            .map(|(payload, &point)| self.insert(point, payload))
            .collect())
    }

    fn neighbors_within(
        &self,
        center: Point,
        radius: f32,
        visitor: &mut dyn FnMut(usize, OrderedFloat<f32>),
    ) {
        self.for_each_within(center, radius, |record, distance| {
            visitor(record.payload, OrderedFloat(distance));
        });
    }
}
