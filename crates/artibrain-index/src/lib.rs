//! Spatial indexing for neuron neighbourhood queries.

use ordered_float::OrderedFloat;
use thiserror::Error;

mod geometry;
mod quadtree;

pub use geometry::{Point, Region, quadrant_about};
pub use quadtree::{
    LEAF_CAPACITY, MAX_SPLIT_DEPTH, Neighbour, NeighbourSearch, Node, NodeId, PATH_LEVELS,
    Quadtree, Record, RecordId, RegionChange, RelocationPolicy, Visit,
};

/// Errors emitted by spatial index implementations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IndexError {
    /// A region that is non-finite, inverted, or fails to cover stored records.
    #[error("invalid region: {0}")]
    InvalidRegion(&'static str),
    /// A rebuild could not place every record; the previous tree was kept.
    #[error("rebuild failed on record {id:#018x} after placing {placed} of {total} records")]
    Rebuild { id: u64, placed: usize, total: usize },
}

/// Common behaviour exposed by neighbourhood indices.
pub trait NeighborhoodIndex {
    /// Replace the index contents with `positions`, using each position's slice
    /// offset as its payload. Returns the id assigned to each position, `None`
    /// where the index had no room for it.
    fn rebuild(&mut self, positions: &[Point]) -> Result<Vec<Option<RecordId>>, IndexError>;

    /// Visit the payload of every entry within `radius` of `center`, with its distance.
    fn neighbors_within(
        &self,
        center: Point,
        radius: f32,
        visitor: &mut dyn FnMut(usize, OrderedFloat<f32>),
    );
}
