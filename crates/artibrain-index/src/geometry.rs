//! Planar points and axis-aligned regions shared by the index and the simulation.

use serde::{Deserialize, Serialize};
use std::ops::{Add, Div, Mul, Sub};

/// 2D coordinate in world units.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    /// Construct a new point.
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Unit vector pointing along `angle` (radians, counter-clockwise from +x).
    #[must_use]
    pub fn from_angle(angle: f32) -> Self {
        let (sin, cos) = angle.sin_cos();
        Self::new(cos, sin)
    }

    /// Euclidean length of the vector from the origin.
    #[must_use]
    pub fn length(self) -> f32 {
        self.length_squared().sqrt()
    }

    #[must_use]
    pub fn length_squared(self) -> f32 {
        self.x * self.x + self.y * self.y
    }

    /// Heading of the vector in radians, in `(-PI, PI]`.
    #[must_use]
    pub fn angle(self) -> f32 {
        self.y.atan2(self.x)
    }

    /// Distance between two points.
    #[must_use]
    pub fn distance(self, other: Self) -> f32 {
        (other - self).length()
    }

    #[must_use]
    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl Add for Point {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Point {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul for Point {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        Self::new(self.x * rhs.x, self.y * rhs.y)
    }
}

impl Mul<f32> for Point {
    type Output = Self;

    fn mul(self, rhs: f32) -> Self {
        Self::new(self.x * rhs, self.y * rhs)
    }
}

impl Mul<Point> for f32 {
    type Output = Point;

    fn mul(self, rhs: Point) -> Point {
        rhs * self
    }
}

impl Div for Point {
    type Output = Self;

    fn div(self, rhs: Self) -> Self {
        Self::new(self.x / rhs.x, self.y / rhs.y)
    }
}

impl Div<f32> for Point {
    type Output = Self;

    fn div(self, rhs: f32) -> Self {
        Self::new(self.x / rhs, self.y / rhs)
    }
}

impl Div<Point> for f32 {
    type Output = Point;

    fn div(self, rhs: Point) -> Point {
        Point::new(self / rhs.x, self / rhs.y)
    }
}

/// Quadrant of a point relative to a split midpoint.
///
/// Bit 0 selects high-x, bit 1 selects high-y, so the four quadrants are
/// low-x/low-y (0), high-x/low-y (1), low-x/high-y (2) and high-x/high-y (3).
#[inline]
#[must_use]
pub fn quadrant_about(point: Point, mid: Point) -> usize {
    usize::from(point.x >= mid.x) | (usize::from(point.y >= mid.y) << 1)
}

/// Axis-aligned rectangle, inclusive on both edges.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Region {
    pub min: Point,
    pub max: Point,
}

impl Default for Region {
    fn default() -> Self {
        Self::UNIT
    }
}

impl Region {
    /// The unit square `[0, 1] x [0, 1]`.
    pub const UNIT: Self = Self::new(Point::new(0.0, 0.0), Point::new(1.0, 1.0));

    #[must_use]
    pub const fn new(min: Point, max: Point) -> Self {
        Self { min, max }
    }

    /// Region spanning `[min_x, max_x] x [min_y, max_y]`.
    #[must_use]
    pub const fn from_bounds(min_x: f32, max_x: f32, min_y: f32, max_y: f32) -> Self {
        Self::new(Point::new(min_x, min_y), Point::new(max_x, max_y))
    }

    /// True when both corners are finite and `min <= max` on each axis.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.min.is_finite()
            && self.max.is_finite()
            && self.min.x <= self.max.x
            && self.min.y <= self.max.y
    }

    #[must_use]
    pub fn width(&self) -> f32 {
        self.max.x - self.min.x
    }

    #[must_use]
    pub fn height(&self) -> f32 {
        self.max.y - self.min.y
    }

    #[must_use]
    pub fn midpoint(&self) -> Point {
        Point::new(
            self.min.x + self.width() / 2.0,
            self.min.y + self.height() / 2.0,
        )
    }

    #[must_use]
    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.min.x
            && point.y >= self.min.y
            && point.x <= self.max.x
            && point.y <= self.max.y
    }

    #[must_use]
    pub fn contains_region(&self, other: &Self) -> bool {
        other.min.x >= self.min.x
            && other.min.y >= self.min.y
            && other.max.x <= self.max.x
            && other.max.y <= self.max.y
    }

    /// Smallest region covering both `self` and `point`.
    #[must_use]
    pub fn union_point(&self, point: Point) -> Self {
        Self::new(
            Point::new(self.min.x.min(point.x), self.min.y.min(point.y)),
            Point::new(self.max.x.max(point.x), self.max.y.max(point.y)),
        )
    }

    /// Smallest region covering both rectangles.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        self.union_point(other.min).union_point(other.max)
    }

    /// Sub-rectangle for `quadrant` (see [`quadrant_about`] for the numbering).
    #[must_use]
    pub fn quadrant(&self, quadrant: usize) -> Self {
        let mid = self.midpoint();
        match quadrant & 0b11 {
            0b00 => Self::new(self.min, mid),
            0b01 => Self::new(Point::new(mid.x, self.min.y), Point::new(self.max.x, mid.y)),
            0b10 => Self::new(Point::new(self.min.x, mid.y), Point::new(mid.x, self.max.y)),
            _ => Self::new(mid, self.max),
        }
    }

    /// Quadrant `point` falls in when this region is split at its midpoint.
    #[must_use]
    pub fn quadrant_of(&self, point: Point) -> usize {
        quadrant_about(point, self.midpoint())
    }

    /// Rectangle/circle overlap using the clamped nearest point of the rectangle.
    #[must_use]
    pub fn overlaps_circle(&self, center: Point, radius: f32) -> bool {
        let nearest = Point::new(
            center.x.clamp(self.min.x, self.max.x),
            center.y.clamp(self.min.y, self.max.y),
        );
        (center - nearest).length_squared() <= radius * radius
    }
}
