//! Growing neuron population: double-buffered values, plastic directional
//! connections, and neighbour-driven growth of new links.

use artibrain_index::{IndexError, NeighborhoodIndex, Neighbour, Quadtree, RegionChange};
use rand::{Rng, SeedableRng, rngs::SmallRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{trace, warn};

mod neuron;
mod snapshot;

pub use artibrain_index::{Point, Region, RelocationPolicy};
pub use neuron::{Connection, Neuron, Side, Synapse};
pub use snapshot::{BrainSnapshot, ConnectionView, NeuronView};

const FULL_TURN: f32 = std::f32::consts::TAU;
const HALF_TURN: f32 = std::f32::consts::PI;

fn wrap_signed_angle(mut angle: f32) -> f32 {
    if angle.is_nan() {
        return 0.0;
    }
    while angle <= -HALF_TURN {
        angle += FULL_TURN;
    }
    while angle > HALF_TURN {
        angle -= FULL_TURN;
    }
    angle
}

/// Move `value` toward `target` by a random fraction of the remaining gap.
fn nudge(rng: &mut SmallRng, value: f32, target: f32, step_min: f32, step_max: f32) -> f32 {
    value + (target - value) * rng.random_range(step_min..=step_max)
}

/// Simulation clock (ticks processed since construction).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Tick(pub u64);

impl Tick {
    /// Returns the next sequential tick.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }
}

/// Events emitted after processing a tick.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TickEvents {
    pub tick: Tick,
    /// Directional connections formed (two per new connection).
    pub new_connections: usize,
    /// Neurons that reached their growth threshold this tick.
    pub growth_attempts: usize,
    /// Growth queries that found more candidates than they could keep.
    pub truncated_queries: usize,
}

/// Outcome of a populate call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PopulateReport {
    /// Neurons appended to the population.
    pub spawned: usize,
    /// Spawned neurons the spatial index had no room for.
    pub unindexed: usize,
    /// Whether the index was rebuilt over a larger region first.
    pub rebuilt: bool,
}

/// Errors that can occur when constructing or populating a brain.
#[derive(Debug, Error, PartialEq)]
pub enum BrainError {
    /// Indicates an invalid configuration or argument value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Static configuration for a brain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrainConfig {
    /// Optional RNG seed for reproducible runs.
    pub rng_seed: Option<u64>,
    /// Inclusive lower bound of the per-neuron growth threshold.
    pub connect_ticks_min: u16,
    /// Inclusive upper bound of the per-neuron growth threshold.
    pub connect_ticks_max: u16,
    /// Neighbour query radius used when growing.
    pub growth_radius: f32,
    /// Maximum candidates considered per growth attempt, nearest first.
    pub max_candidates: usize,
    /// Half-angle (radians) around an existing link in which new links are refused.
    pub occlusion_angle: f32,
    /// Values are clamped to at most this when committed.
    pub value_ceiling: f32,
    /// Strength a firing direction is pulled toward.
    pub reinforce_target: f32,
    /// Strength an idle direction decays toward.
    pub decay_floor: f32,
    /// Lower end of the permissive firing window.
    pub window_floor: f32,
    /// Upper end of the permissive firing window.
    pub window_ceiling: f32,
    /// Inclusive lower bound for new connection strengths.
    pub strength_min: f32,
    /// Inclusive upper bound for new connection strengths.
    pub strength_max: f32,
    /// Smallest fraction of the remaining gap covered by one plasticity nudge.
    pub plasticity_step_min: f32,
    /// Largest fraction of the remaining gap covered by one plasticity nudge.
    pub plasticity_step_max: f32,
    /// Region the spatial index covers before anything is inserted.
    pub initial_region: Region,
    /// How index records are relocated when the index region grows.
    pub relocation: RelocationPolicy,
}

impl Default for BrainConfig {
    fn default() -> Self {
        Self {
            rng_seed: None,
            connect_ticks_min: 5,
            connect_ticks_max: 25,
            growth_radius: 3.5,
            max_candidates: 64,
            occlusion_angle: std::f32::consts::FRAC_PI_8,
            value_ceiling: 1.0,
            reinforce_target: 0.8,
            decay_floor: 0.05,
            window_floor: -0.1,
            window_ceiling: 1.1,
            strength_min: 0.05,
            strength_max: 0.8,
            plasticity_step_min: 0.0001,
            plasticity_step_max: 0.01,
            initial_region: Region::UNIT,
            relocation: RelocationPolicy::default(),
        }
    }
}

impl BrainConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), BrainError> {
        if self.connect_ticks_min == 0 || self.connect_ticks_min > self.connect_ticks_max {
            return Err(BrainError::InvalidConfig(
                "connect_ticks range must be non-empty and start at 1 or more",
            ));
        }
        if !(self.growth_radius.is_finite() && self.growth_radius > 0.0) {
            return Err(BrainError::InvalidConfig(
                "growth_radius must be positive and finite",
            ));
        }
        if self.max_candidates == 0 {
            return Err(BrainError::InvalidConfig("max_candidates must be non-zero"));
        }
        if !(0.0..=HALF_TURN).contains(&self.occlusion_angle) {
            return Err(BrainError::InvalidConfig(
                "occlusion_angle must lie in [0, PI]",
            ));
        }
        if !self.value_ceiling.is_finite()
            || !self.reinforce_target.is_finite()
            || !self.decay_floor.is_finite()
        {
            return Err(BrainError::InvalidConfig(
                "value_ceiling, reinforce_target and decay_floor must be finite",
            ));
        }
        if !(self.window_floor.is_finite()
            && self.window_ceiling.is_finite()
            && self.window_floor <= self.window_ceiling)
        {
            return Err(BrainError::InvalidConfig(
                "window_floor must not exceed window_ceiling",
            ));
        }
        if !(self.strength_min.is_finite()
            && self.strength_max.is_finite()
            && self.strength_min <= self.strength_max)
        {
            return Err(BrainError::InvalidConfig(
                "strength_min must not exceed strength_max",
            ));
        }
        if !(0.0..=1.0).contains(&self.plasticity_step_min)
            || !(0.0..=1.0).contains(&self.plasticity_step_max)
            || self.plasticity_step_min > self.plasticity_step_max
        {
            return Err(BrainError::InvalidConfig(
                "plasticity steps must satisfy 0 <= min <= max <= 1",
            ));
        }
        if !self.initial_region.is_valid() {
            return Err(BrainError::InvalidConfig(
                "initial_region must be finite with min <= max",
            ));
        }
        Ok(())
    }

    /// Returns the configured RNG seed, generating one from entropy if absent.
    fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => {
                let seed: u64 = rand::random();
                SmallRng::seed_from_u64(seed)
            }
        }
    }
}

/// Neuron population, its connections, and the spatial index over positions.
pub struct Brain {
    config: BrainConfig,
    tick: Tick,
    rng: SmallRng,
    index: Quadtree,
    neurons: Vec<Neuron>,
    connections: Vec<Connection>,
    candidates: Vec<Neighbour>,
}

impl fmt::Debug for Brain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Brain")
            .field("config", &self.config)
            .field("tick", &self.tick)
            .field("neuron_count", &self.neurons.len())
            .field("connection_count", &self.connections.len())
            .field("indexed", &self.index.len())
            .finish()
    }
}

impl Brain {
    /// Instantiate an empty brain using the supplied configuration.
    pub fn new(config: BrainConfig) -> Result<Self, BrainError> {
        config.validate()?;
        let rng = config.seeded_rng();
        let index = Quadtree::with_policy(config.initial_region, config.relocation);
        let candidates = Vec::with_capacity(config.max_candidates);
        Ok(Self {
            config,
            tick: Tick::zero(),
            rng,
            index,
            neurons: Vec::new(),
            connections: Vec::new(),
            candidates,
        })
    }

    /// Append `count` neurons at uniformly random positions inside `region`.
    pub fn populate(&mut self, count: usize, region: Region) -> Result<PopulateReport, BrainError> {
        let rebuilt = self.prepare_region(region)?;
        let positions: Vec<Point> = (0..count)
            .map(|_| {
                Point::new(
                    self.rng.random_range(region.min.x..=region.max.x),
                    self.rng.random_range(region.min.y..=region.max.y),
                )
            })
            .collect();
        Ok(self.spawn(positions, rebuilt))
    }

    /// Append one neuron per point, in order.
    pub fn populate_points(&mut self, points: &[Point]) -> Result<PopulateReport, BrainError> {
        let Some(first) = points.first() else {
            return Ok(PopulateReport::default());
        };
        let bounds = points
            .iter()
            .fold(Region::new(*first, *first), |region, &point| {
                region.union_point(point)
            });
        let rebuilt = self.prepare_region(bounds)?;
        Ok(self.spawn(points.to_vec(), rebuilt))
    }

    /// Append a `side x side` lattice centred on the origin, `spacing` apart.
    pub fn populate_grid(&mut self, side: usize, spacing: f32) -> Result<PopulateReport, BrainError> {
        if !(spacing.is_finite() && spacing > 0.0) {
            return Err(BrainError::InvalidConfig(
                "grid spacing must be positive and finite",
            ));
        }
        let half = side as f32 / 2.0;
        let mut points = Vec::with_capacity(side * side);
        for i in 0..side {
            for j in 0..side {
                points.push(Point::new(
                    (i as f32 - half) * spacing,
                    (j as f32 - half) * spacing,
                ));
            }
        }
        self.populate_points(&points)
    }

    fn prepare_region(&mut self, region: Region) -> Result<bool, BrainError> {
        match self.index.ensure_region(region)? {
            RegionChange::Unchanged => Ok(false),
            RegionChange::Rebuilt => {
                self.refresh_records();
                Ok(true)
            }
        }
    }

    fn spawn(&mut self, positions: Vec<Point>, rebuilt: bool) -> PopulateReport {
        let region_before = self.index.region();
        let first = self.neurons.len();
        let mut unindexed = 0;
        self.neurons.reserve(positions.len());
        for (offset, position) in positions.into_iter().enumerate() {
            let index = first + offset;
            let connect_ticks = self
                .rng
                .random_range(self.config.connect_ticks_min..=self.config.connect_ticks_max);
            let mut neuron = Neuron::new(index, position, connect_ticks);
            neuron.record = self.index.insert(position, index);
            if neuron.record.is_none() {
                unindexed += 1;
            }
            self.neurons.push(neuron);
        }
        if self.index.region() != region_before {
            self.refresh_records();
        }

        let spawned = self.neurons.len() - first;
        if unindexed > 0 {
            warn!(
                spawned,
                unindexed,
                "spatial index rejected neurons; growth queries will not find them"
            );
        }
        PopulateReport {
            spawned,
            unindexed,
            rebuilt,
        }
    }

    /// Re-read every neuron's record id after the index re-keyed its records.
    fn refresh_records(&mut self) {
        for neuron in &mut self.neurons {
            neuron.record = None;
        }
        for record in self.index.records() {
            if let Some(neuron) = self.neurons.get_mut(record.payload) {
                neuron.record = Some(record.id);
            }
        }
    }

    /// Rebuild the spatial index from current neuron positions. Returns the
    /// number of neurons left out of the index.
    pub fn reindex(&mut self) -> Result<usize, BrainError> {
        let positions: Vec<Point> = self.neurons.iter().map(|neuron| neuron.position).collect();
        let ids = self.index.rebuild(&positions)?;
        let mut unindexed = 0;
        for (neuron, id) in self.neurons.iter_mut().zip(ids) {
            neuron.record = id;
            unindexed += usize::from(id.is_none());
        }
        Ok(unindexed)
    }

    /// Queue `value` into a neuron's next-tick accumulator. Out-of-range
    /// indices are ignored.
    pub fn write(&mut self, index: usize, value: f32) {
        if let Some(neuron) = self.neurons.get_mut(index) {
            neuron.next_value += value;
        }
    }

    /// Current committed value of a neuron, or 0 for out-of-range indices.
    #[must_use]
    pub fn read(&self, index: usize) -> f32 {
        self.neurons.get(index).map_or(0.0, |neuron| neuron.value)
    }

    /// Allow or forbid a neuron from growing new connections. Returns false
    /// for out-of-range indices.
    pub fn set_can_connect(&mut self, index: usize, can_connect: bool) -> bool {
        match self.neurons.get_mut(index) {
            Some(neuron) => {
                neuron.can_connect = can_connect;
                true
            }
            None => false,
        }
    }

    fn stage_commit(&mut self) {
        let ceiling = self.config.value_ceiling;
        self.neurons.par_iter_mut().for_each(|neuron| {
            neuron.value = neuron.next_value.min(ceiling);
            neuron.next_value = 0.0;
            if neuron.can_connect && neuron.value != 0.0 {
                neuron.connect_tick = neuron.connect_tick.saturating_add(1);
            }
        });
    }

    fn stage_propagate(&mut self) {
        let Self {
            config,
            rng,
            neurons,
            connections,
            ..
        } = self;
        let (step_min, step_max) = (config.plasticity_step_min, config.plasticity_step_max);
        for connection in connections.iter_mut() {
            for side in Side::BOTH {
                let (source, target) = connection.endpoints(side);
                let source_value = neurons[source].value;
                let synapse = connection.synapse_mut(side);
                let before = synapse.strength;
                if synapse.admits(source_value) {
                    neurons[target].next_value += source_value * before;
                    synapse.strength = nudge(rng, before, config.reinforce_target, step_min, step_max);
                    synapse.min = nudge(rng, synapse.min, source_value, step_min, step_max);
                    synapse.max = nudge(rng, synapse.max, source_value, step_min, step_max);
                } else {
                    synapse.strength = nudge(rng, before, config.decay_floor, step_min, step_max);
                    synapse.min = nudge(rng, synapse.min, config.window_floor, step_min, step_max);
                    synapse.max = nudge(rng, synapse.max, config.window_ceiling, step_min, step_max);
                }
                let delta = synapse.strength - before;
                neurons[target].max_strength += delta;
                neurons[source].max_strength += delta;
            }
        }
    }

    fn stage_growth(&mut self) -> TickEvents {
        let mut events = TickEvents::default();
        let radius = self.config.growth_radius;
        let capacity = self.config.max_candidates;
        let mut candidates = std::mem::take(&mut self.candidates);

        for index in 0..self.neurons.len() {
            if !self.neurons[index].ready_to_grow() {
                continue;
            }
            self.neurons[index].connect_tick = 0;
            events.growth_attempts += 1;

            let center = self.neurons[index].position;
            let search = self
                .index
                .find_neighbours(center, radius, &mut candidates, capacity);
            if search.truncated() {
                events.truncated_queries += 1;
                trace!(
                    neuron = index,
                    found = search.total_found,
                    kept = search.written,
                    "growth query truncated"
                );
            }

            for candidate in &candidates {
                let peer = candidate.record.payload;
                if peer == index || peer >= self.neurons.len() {
                    continue;
                }
                if self.linked(index, peer)
                    || self.occluded(index, peer)
                    || self.occluded(peer, index)
                {
                    continue;
                }
                self.connect(index, peer);
                events.new_connections += 2;
            }
        }

        self.candidates = candidates;
        events
    }

    fn linked(&self, a: usize, b: usize) -> bool {
        let holds = |from: usize, to: usize| {
            self.neurons[from]
                .connections
                .iter()
                .any(|&connection| self.connections[connection].peer_of(from) == Some(to))
        };
        holds(a, b) || holds(b, a)
    }

    /// True when one of `from`'s links points within the occlusion angle of `to`.
    fn occluded(&self, from: usize, to: usize) -> bool {
        let origin = self.neurons[from].position;
        let heading = (self.neurons[to].position - origin).angle();
        self.neurons[from].connections.iter().any(|&connection| {
            self.connections[connection]
                .peer_of(from)
                .is_some_and(|peer| {
                    let existing = (self.neurons[peer].position - origin).angle();
                    wrap_signed_angle(existing - heading).abs() <= self.config.occlusion_angle
                })
        })
    }

    fn random_synapse(&mut self) -> Synapse {
        let (floor, ceiling) = (self.config.window_floor, self.config.window_ceiling);
        let min = self.rng.random_range(floor..=ceiling);
        let max = self.rng.random_range(floor..=ceiling);
        let strength = self
            .rng
            .random_range(self.config.strength_min..=self.config.strength_max);
        Synapse::new(min, max, strength)
    }

    fn connect(&mut self, a: usize, b: usize) -> usize {
        let from_a = self.random_synapse();
        let from_b = self.random_synapse();
        let connection = self.connections.len();
        self.connections.push(Connection::new(a, b, from_a, from_b));
        let added = from_a.strength + from_b.strength;
        for endpoint in [a, b] {
            let neuron = &mut self.neurons[endpoint];
            neuron.connections.push(connection);
            neuron.max_strength += added;
        }
        connection
    }

    /// Advance the simulation by one tick: commit values, propagate and adapt
    /// along existing connections, then grow new ones.
    pub fn step(&mut self) -> TickEvents {
        let next_tick = self.tick.next();
        self.stage_commit();
        self.stage_propagate();
        let mut events = self.stage_growth();
        self.tick = next_tick;
        events.tick = next_tick;
        trace!(
            tick = next_tick.0,
            new_connections = events.new_connections,
            growth_attempts = events.growth_attempts,
            truncated = events.truncated_queries,
            connections = self.connections.len(),
            "tick complete"
        );
        events
    }

    /// Advance one tick, returning the number of directional connections formed.
    pub fn tick(&mut self) -> usize {
        self.step().new_connections
    }

    /// Returns an immutable reference to configuration.
    #[must_use]
    pub fn config(&self) -> &BrainConfig {
        &self.config
    }

    /// Ticks processed so far.
    #[must_use]
    pub const fn tick_count(&self) -> Tick {
        self.tick
    }

    #[must_use]
    pub fn neurons(&self) -> &[Neuron] {
        &self.neurons
    }

    #[must_use]
    pub fn neuron(&self, index: usize) -> Option<&Neuron> {
        self.neurons.get(index)
    }

    #[must_use]
    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    #[must_use]
    pub fn connection(&self, index: usize) -> Option<&Connection> {
        self.connections.get(index)
    }

    /// Spatial index over neuron positions.
    #[must_use]
    pub fn index(&self) -> &Quadtree {
        &self.index
    }

    /// Copy out the data a renderer consumes.
    #[must_use]
    pub fn render_snapshot(&self) -> BrainSnapshot {
        BrainSnapshot::capture(self)
    }
}
