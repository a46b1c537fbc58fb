//! Read-only views handed to render front ends once per tick.

use crate::{Brain, Tick};
use artibrain_index::Point;
use serde::Serialize;

/// Per-neuron data a renderer needs.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct NeuronView {
    pub position: Point,
    pub value: f32,
    pub max_strength: f32,
}

/// Per-connection data a renderer needs; windows are `(min, max)`.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct ConnectionView {
    pub a: Point,
    pub b: Point,
    pub window_a: (f32, f32),
    pub window_b: (f32, f32),
    pub strength_a: f32,
    pub strength_b: f32,
}

/// Snapshot of the whole population after a tick.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BrainSnapshot {
    pub tick: Tick,
    pub neurons: Vec<NeuronView>,
    pub connections: Vec<ConnectionView>,
}

impl BrainSnapshot {
    pub(crate) fn capture(brain: &Brain) -> Self {
        let neurons = brain.neurons();
        Self {
            tick: brain.tick_count(),
            neurons: neurons
                .iter()
                .map(|neuron| NeuronView {
                    position: neuron.position,
                    value: neuron.value,
                    max_strength: neuron.max_strength,
                })
                .collect(),
            connections: brain
                .connections()
                .iter()
                .map(|connection| ConnectionView {
                    a: neurons[connection.a].position,
                    b: neurons[connection.b].position,
                    window_a: (connection.from_a.min, connection.from_a.max),
                    window_b: (connection.from_b.min, connection.from_b.max),
                    strength_a: connection.from_a.strength,
                    strength_b: connection.from_b.strength,
                })
                .collect(),
        }
    }
}
