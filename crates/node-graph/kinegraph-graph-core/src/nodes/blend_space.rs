//! Delaunay-triangulated 2D blend space with adjacency walking.
//!
//! Triangles are stored counter-clockwise. `adjacency[t][i]` is the triangle across the edge
//! opposite vertex `i` of triangle `t`, or `None` on the convex hull.

use delaunator::{Point, EMPTY};
use nalgebra::Vector2;

const INSIDE_EPSILON: f32 = 1e-6;
const MAX_WALK_STEPS: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct BlendSpace {
    points: Vec<Vector2<f32>>,
    triangles: Vec<[usize; 3]>,
    adjacency: Vec<[Option<usize>; 3]>,
}

/// Result of locating a query point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlendWeights {
    pub triangle: usize,
    /// Sample indices of the triangle's corners.
    pub samples: [usize; 3],
    /// Non-negative, summing to 1.
    pub weights: [f32; 3],
    /// False when the query lies outside the convex hull and the weights were clamped.
    pub inside: bool,
}

fn orient(a: &Point, b: &Point, c: &Point) -> f64 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

/// Delaunay triangles, turned counter-clockwise, with the neighbour across each corner.
fn triangulate(points: &[Vector2<f32>]) -> (Vec<[usize; 3]>, Vec<[Option<usize>; 3]>) {
    let coords: Vec<Point> = points
        .iter()
        .map(|p| Point {
            x: f64::from(p.x),
            y: f64::from(p.y),
        })
        .collect();
    let delaunay = delaunator::triangulate(&coords);
    let neighbour = |half_edge: usize| match delaunay.halfedges[half_edge] {
        EMPTY => None,
        opposite => Some(opposite / 3),
    };

    delaunay
        .triangles
        .chunks_exact(3)
        .enumerate()
        .map(|(t, corners)| {
            let e = 3 * t;
            let mut triangle = [corners[0], corners[1], corners[2]];
            // Half-edge `e + k` runs from corner k to corner k + 1, facing corner k + 2.
            let mut across = [neighbour(e + 1), neighbour(e + 2), neighbour(e)];
            let [a, b, c] = triangle.map(|i| &coords[i]);
            if orient(a, b, c) < 0.0 {
                triangle.swap(1, 2);
                across.swap(1, 2);
            }
            (triangle, across)
        })
        .unzip()
}

impl BlendSpace {
    /// Triangulate `points`. Fails with fewer than three distinct, non-collinear points, or
    /// when a point ends up in no triangle and could never be blended in full.
    pub fn new(points: Vec<Vector2<f32>>) -> Result<Self, String> {
        if points.len() < 3 {
            return Err(format!("needs at least 3 points, got {}", points.len()));
        }
        if let Some(bad) = points.iter().position(|p| !p.x.is_finite() || !p.y.is_finite()) {
            return Err(format!("point {bad} is not finite"));
        }
        for (i, a) in points.iter().enumerate() {
            if let Some(j) = points[i + 1..].iter().position(|b| (a - b).norm() <= INSIDE_EPSILON) {
                return Err(format!("points {i} and {} coincide", i + 1 + j));
            }
        }
        let (triangles, adjacency) = triangulate(&points);
        if triangles.is_empty() {
            return Err("points are collinear".to_string());
        }
        let mut covered = vec![false; points.len()];
        for triangle in &triangles {
            let [a, b, c] = triangle.map(|i| points[i]);
            if (b - a).perp(&(c - a)) == 0.0 {
                return Err(format!("degenerate triangle {triangle:?}"));
            }
            for &corner in triangle {
                covered[corner] = true;
            }
        }
        if let Some(missing) = covered.iter().position(|c| !c) {
            return Err(format!("point {missing} is not part of any triangle"));
        }
        Ok(Self {
            points,
            triangles,
            adjacency,
        })
    }

    /// Build from a flat `[x0, y0, x1, y1, ...]` list.
    pub fn from_flat(coords: &[f32]) -> Result<Self, String> {
        if coords.len() % 2 != 0 {
            return Err(format!("odd coordinate count {}", coords.len()));
        }
        Self::new(
            coords
                .chunks_exact(2)
                .map(|c| Vector2::new(c[0], c[1]))
                .collect(),
        )
    }

    pub fn points(&self) -> &[Vector2<f32>] {
        &self.points
    }

    pub fn triangles(&self) -> &[[usize; 3]] {
        &self.triangles
    }

    pub fn adjacency(&self) -> &[[Option<usize>; 3]] {
        &self.adjacency
    }

    fn barycentric(&self, triangle: usize, p: &Vector2<f32>) -> [f32; 3] {
        let [ia, ib, ic] = self.triangles[triangle];
        let (a, b, c) = (self.points[ia], self.points[ib], self.points[ic]);
        let cross = |u: Vector2<f32>, v: Vector2<f32>| u.x * v.y - u.y * v.x;
        let area = cross(b - a, c - a);
        let wa = cross(b - p, c - p) / area;
        let wb = cross(c - p, a - p) / area;
        [wa, wb, 1.0 - wa - wb]
    }

    /// Locate `query`, walking adjacency from `start` (usually last frame's triangle).
    pub fn locate(&self, query: Vector2<f32>, start: usize) -> BlendWeights {
        let mut triangle = if start < self.triangles.len() { start } else { 0 };
        let mut weights = self.barycentric(triangle, &query);
        let mut inside = false;

        for _ in 0..MAX_WALK_STEPS {
            if weights.iter().all(|&w| w >= -INSIDE_EPSILON) {
                inside = true;
                break;
            }
            // Step across the most violated edge that has a neighbour.
            let mut order = [0usize, 1, 2];
            order.sort_by(|&a, &b| weights[a].total_cmp(&weights[b]));
            let next = order
                .iter()
                .filter(|&&i| weights[i] < -INSIDE_EPSILON)
                .find_map(|&i| self.adjacency[triangle][i]);
            match next {
                Some(t) => {
                    triangle = t;
                    weights = self.barycentric(triangle, &query);
                }
                None => break,
            }
        }

        if !inside {
            for w in &mut weights {
                *w = w.max(0.0);
            }
        }
        let sum: f32 = weights.iter().sum();
        if sum > f32::EPSILON && sum.is_finite() {
            for w in &mut weights {
                *w /= sum;
            }
        } else {
            weights = [1.0, 0.0, 0.0];
        }
        if inside {
            // Tiny negatives from the inside tolerance.
            for w in &mut weights {
                *w = w.clamp(0.0, 1.0);
            }
        }

        BlendWeights {
            triangle,
            samples: self.triangles[triangle],
            weights,
            inside,
        }
    }
}
