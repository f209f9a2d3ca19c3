//! Points in a bounded parameter space, and their byte encoding
//!
//! Both demo agents search the same square `[-BOUND, BOUND]²` and ship their
//! points as candidate payloads: little-endian `f64`s, nothing else.

use rand::Rng;

/// Half the side length of the search space
pub const BOUND: f64 = 199.0;

/// Payload kind tag for encoded points
pub const KIND: &str = "vector";

pub type Point = [f64; 2];

pub fn encode(point: &Point) -> Vec<u8> {
    point.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// `None` when the payload is not exactly two `f64`s
pub fn decode(bytes: &[u8]) -> Option<Point> {
    if bytes.len() != 16 {
        return None;
    }
    let mut point = [0.0; 2];
    for (slot, chunk) in point.iter_mut().zip(bytes.chunks_exact(8)) {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(chunk);
        *slot = f64::from_le_bytes(raw);
    }
    Some(point)
}

pub fn distance(a: &Point, b: &Point) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

/// Longest distance inside the search space
pub fn diameter() -> f64 {
    (2.0 * BOUND) * std::f64::consts::SQRT_2
}

pub fn clamp(point: Point) -> Point {
    point.map(|v| v.clamp(-BOUND, BOUND))
}

/// Uniformly random point in the search space
pub fn random_point<R: Rng + ?Sized>(rng: &mut R) -> Point {
    [rng.gen_range(-BOUND..=BOUND), rng.gen_range(-BOUND..=BOUND)]
}

/// Random step of at most `radius` per axis from `origin`, kept in bounds
pub fn step<R: Rng + ?Sized>(rng: &mut R, origin: &Point, radius: f64) -> Point {
    if radius <= 0.0 {
        return *origin;
    }
    clamp([
        origin[0] + rng.gen_range(-radius..=radius),
        origin[1] + rng.gen_range(-radius..=radius),
    ])
}
