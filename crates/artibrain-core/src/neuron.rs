//! Neuron and connection records owned by [`crate::Brain`].

use artibrain_index::{Point, RecordId};
use serde::{Deserialize, Serialize};

/// A spatially positioned neuron.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Neuron {
    /// Stable position in [`crate::Brain::neurons`].
    pub index: usize,
    /// Spatial index record, `None` when the index had no room for it.
    pub record: Option<RecordId>,
    pub position: Point,
    /// Value visible during the current tick.
    pub value: f32,
    /// Accumulator committed into `value` at the next tick boundary.
    pub next_value: f32,
    /// Running sum of the strengths of incident connections.
    pub max_strength: f32,
    /// Growth eligibility counter, advanced on ticks with a nonzero value.
    pub connect_tick: u16,
    /// Counter threshold at which the neuron attempts to grow.
    pub connect_ticks: u16,
    pub can_connect: bool,
    /// Indices into [`crate::Brain::connections`], in creation order.
    pub connections: Vec<usize>,
}

impl Neuron {
    #[must_use]
    pub fn new(index: usize, position: Point, connect_ticks: u16) -> Self {
        Self {
            index,
            record: None,
            position,
            value: 0.0,
            next_value: 0.0,
            max_strength: 0.0,
            connect_tick: 0,
            connect_ticks,
            can_connect: true,
            connections: Vec::new(),
        }
    }

    /// True once the eligibility counter has reached its threshold.
    #[must_use]
    pub fn ready_to_grow(&self) -> bool {
        self.can_connect && self.connect_tick >= self.connect_ticks
    }
}

/// Which endpoint of a [`Connection`] drives a direction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Side {
    /// Signal flows from `a` to `b`.
    A,
    /// Signal flows from `b` to `a`.
    B,
}

impl Side {
    pub const BOTH: [Self; 2] = [Self::A, Self::B];
}

/// One direction of a connection: a firing window on the source value and a strength.
///
/// A window with `min > max` never fires.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Synapse {
    pub min: f32,
    pub max: f32,
    pub strength: f32,
}

impl Synapse {
    #[must_use]
    pub const fn new(min: f32, max: f32, strength: f32) -> Self {
        Self { min, max, strength }
    }

    /// Whether `value` falls inside the firing window.
    #[must_use]
    pub fn admits(&self, value: f32) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Link between two neurons stored once and driven in both directions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Connection {
    pub a: usize,
    pub b: usize,
    /// How `a`'s value reaches `b`.
    pub from_a: Synapse,
    /// How `b`'s value reaches `a`.
    pub from_b: Synapse,
}

impl Connection {
    #[must_use]
    pub const fn new(a: usize, b: usize, from_a: Synapse, from_b: Synapse) -> Self {
        Self {
            a,
            b,
            from_a,
            from_b,
        }
    }

    /// `(source, target)` neuron indices for `side`.
    #[must_use]
    pub const fn endpoints(&self, side: Side) -> (usize, usize) {
        match side {
            Side::A => (self.a, self.b),
            Side::B => (self.b, self.a),
        }
    }

    #[must_use]
    pub const fn synapse(&self, side: Side) -> &Synapse {
        match side {
            Side::A => &self.from_a,
            Side::B => &self.from_b,
        }
    }

    pub fn synapse_mut(&mut self, side: Side) -> &mut Synapse {
        match side {
            Side::A => &mut self.from_a,
            Side::B => &mut self.from_b,
        }
    }

    /// The endpoint opposite `neuron`, if `neuron` is an endpoint.
    #[must_use]
    pub const fn peer_of(&self, neuron: usize) -> Option<usize> {
        if neuron == self.a {
            Some(self.b)
        } else if neuron == self.b {
            Some(self.a)
        } else {
            None
        }
    }
}
