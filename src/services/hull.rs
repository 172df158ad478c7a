//! 3D convex hull (quickhull), used for the volume fallback on open meshes.
//!
//! Every live face owns the set of not-yet-processed points lying above it.
//! Each step takes the farthest point of one such set, walks the patch of
//! faces it can see, and replaces that patch with a fan from the point to the
//! patch's horizon. Only the points owned by the removed faces are
//! redistributed, which keeps pile-sized scans close to `n log n`.

use std::collections::HashMap;

use super::mesh::{cross, dot, norm, sub, Point3};

/// Relative tolerance, scaled by the point cloud's largest extent.
const RELATIVE_EPS: f64 = 1e-10;

#[derive(Debug, Clone)]
struct Face {
    v: [usize; 3],
    /// Outward (unnormalized) plane normal.
    normal: Point3,
    offset: f64,
    /// Length of `normal`; zero for a sliver.
    scale: f64,
    /// Points above this face still waiting to be processed.
    outside: Vec<usize>,
    alive: bool,
}

impl Face {
    /// Signed distance of `p` above the face plane.
    fn distance(&self, p: Point3) -> f64 {
        if self.scale > 0.0 {
            (dot(self.normal, p) - self.offset) / self.scale
        } else {
            f64::NEG_INFINITY
        }
    }
}

/// Closed convex hull over a point set.
#[derive(Debug, Clone)]
pub struct ConvexHull {
    points: Vec<Point3>,
    faces: Vec<Face>,
    /// Directed edge `(a, b)` to the live face whose winding contains it.
    edges: HashMap<(usize, usize), usize>,
    interior: Point3,
}

impl ConvexHull {
    /// Build the hull of `points`.
    ///
    /// Fails when fewer than four points are given or when all points lie on
    /// a common plane or line, since such sets enclose no volume.
    pub fn build(points: &[Point3]) -> Result<Self, HullError> {
        if points.len() < 4 {
            return Err(HullError::TooFewPoints(points.len()));
        }
        if points.iter().flatten().any(|c| !c.is_finite()) {
            return Err(HullError::NonFinite);
        }

        let eps = tolerance(points);
        if eps == 0.0 {
            return Err(HullError::Degenerate);
        }
        let seed = initial_simplex(points, eps)?;

        let interior = {
            let mut c = [0.0; 3];
            for &i in &seed {
                for axis in 0..3 {
                    c[axis] += points[i][axis] / 4.0;
                }
            }
            c
        };

        let mut hull = ConvexHull {
            points: points.to_vec(),
            faces: Vec::new(),
            edges: HashMap::new(),
            interior,
        };
        let [a, b, c, d] = seed;
        let mut seed_faces = Vec::with_capacity(4);
        for tri in [[a, b, c], [a, b, d], [a, c, d], [b, c, d]] {
            let tri = hull.orient_outward(tri);
            seed_faces.push(hull.insert_face(tri));
        }

        for i in 0..points.len() {
            if !seed.contains(&i) {
                hull.assign(i, &seed_faces, eps);
            }
        }

        let mut pending = seed_faces;
        while let Some(fi) = pending.pop() {
            if hull.faces[fi].alive && !hull.faces[fi].outside.is_empty() {
                pending.extend(hull.expand(fi, eps));
            }
        }

        Ok(hull)
    }

    /// Enclosed volume, summed as tetrahedra from the interior point.
    pub fn volume(&self) -> f64 {
        self.live_faces()
            .map(|f| {
                let a = sub(self.points[f.v[0]], self.interior);
                let b = sub(self.points[f.v[1]], self.interior);
                let c = sub(self.points[f.v[2]], self.interior);
                dot(a, cross(b, c)) / 6.0
            })
            .sum()
    }

    pub fn face_count(&self) -> usize {
        self.live_faces().count()
    }

    fn live_faces(&self) -> impl Iterator<Item = &Face> {
        self.faces.iter().filter(|f| f.alive)
    }

    /// Wind `v` so its normal points away from the interior point.
    fn orient_outward(&self, mut v: [usize; 3]) -> [usize; 3] {
        let a = self.points[v[0]];
        let normal = cross(sub(self.points[v[1]], a), sub(self.points[v[2]], a));
        if dot(normal, sub(self.interior, a)) > 0.0 {
            v.swap(1, 2);
        }
        v
    }

    fn insert_face(&mut self, v: [usize; 3]) -> usize {
        let a = self.points[v[0]];
        let normal = cross(sub(self.points[v[1]], a), sub(self.points[v[2]], a));
        let index = self.faces.len();
        self.faces.push(Face {
            v,
            normal,
            offset: dot(normal, a),
            scale: norm(normal),
            outside: Vec::new(),
            alive: true,
        });
        for k in 0..3 {
            self.edges.insert((v[k], v[(k + 1) % 3]), index);
        }
        index
    }

    /// Hand point `p` to the candidate face it lies farthest above, if any.
    fn assign(&mut self, p: usize, candidates: &[usize], eps: f64) {
        let point = self.points[p];
        let best = candidates
            .iter()
            .map(|&fi| (fi, self.faces[fi].distance(point)))
            .filter(|&(_, d)| d > eps)
            .max_by(|x, y| x.1.total_cmp(&y.1));
        if let Some((fi, _)) = best {
            self.faces[fi].outside.push(p);
        }
    }

    /// Add the farthest outside point of face `start` to the hull and return
    /// the faces created for it.
    fn expand(&mut self, start: usize, eps: f64) -> Vec<usize> {
        let eye = {
            let face = &self.faces[start];
            let mut best = face.outside[0];
            let mut best_distance = f64::NEG_INFINITY;
            for &p in &face.outside {
                let d = face.distance(self.points[p]);
                if d > best_distance {
                    best = p;
                    best_distance = d;
                }
            }
            best
        };
        let eye_point = self.points[eye];

        // Faces visible from the eye form a connected patch around `start`;
        // its boundary edges, as wound by the visible faces, are the horizon.
        let mut visible = vec![start];
        let mut decided: HashMap<usize, bool> = HashMap::from([(start, true)]);
        let mut horizon = Vec::new();
        let mut cursor = 0;
        while cursor < visible.len() {
            let v = self.faces[visible[cursor]].v;
            cursor += 1;
            for k in 0..3 {
                let (x, y) = (v[k], v[(k + 1) % 3]);
                let Some(&neighbour) = self.edges.get(&(y, x)) else {
                    continue;
                };
                let neighbour_visible = match decided.get(&neighbour) {
                    Some(&seen) => seen,
                    None => {
                        let seen = self.faces[neighbour].distance(eye_point) > eps;
                        decided.insert(neighbour, seen);
                        if seen {
                            visible.push(neighbour);
                        }
                        seen
                    }
                };
                if !neighbour_visible {
                    horizon.push((x, y));
                }
            }
        }

        let mut orphans = Vec::new();
        for &fi in &visible {
            let face = &mut self.faces[fi];
            face.alive = false;
            orphans.append(&mut face.outside);
            let v = face.v;
            for k in 0..3 {
                let key = (v[k], v[(k + 1) % 3]);
                if self.edges.get(&key) == Some(&fi) {
                    self.edges.remove(&key);
                }
            }
        }

        let created: Vec<usize> = horizon
            .into_iter()
            .map(|(x, y)| self.insert_face([x, y, eye]))
            .collect();

        for p in orphans {
            if p != eye {
                self.assign(p, &created, eps);
            }
        }
        created
    }
}

/// Volume of the convex hull of `points`.
pub fn convex_hull_volume(points: &[Point3]) -> Result<f64, HullError> {
    Ok(ConvexHull::build(points)?.volume())
}

fn tolerance(points: &[Point3]) -> f64 {
    let mut min = points[0];
    let mut max = points[0];
    for p in points {
        for axis in 0..3 {
            min[axis] = min[axis].min(p[axis]);
            max[axis] = max[axis].max(p[axis]);
        }
    }
    let extent = (0..3).map(|a| max[a] - min[a]).fold(0.0, f64::max);
    extent * RELATIVE_EPS
}

/// Four affinely independent points to seed the hull.
fn initial_simplex(points: &[Point3], eps: f64) -> Result<[usize; 4], HullError> {
    let farthest = |score: &dyn Fn(Point3) -> f64| -> (usize, f64) {
        points
            .iter()
            .enumerate()
            .map(|(i, p)| (i, score(*p)))
            .fold((0, f64::NEG_INFINITY), |best, cur| if cur.1 > best.1 { cur } else { best })
    };

    let (i0, _) = farthest(&|p: Point3| -p[0]);
    let p0 = points[i0];

    let (i1, d1) = farthest(&|p: Point3| norm(sub(p, p0)));
    if d1 <= eps {
        return Err(HullError::Degenerate);
    }
    let dir = sub(points[i1], p0);

    let (i2, d2) = farthest(&|p: Point3| norm(cross(sub(p, p0), dir)) / norm(dir));
    if d2 <= eps {
        return Err(HullError::Degenerate);
    }
    let plane = cross(dir, sub(points[i2], p0));

    let (i3, d3) = farthest(&|p: Point3| dot(sub(p, p0), plane).abs() / norm(plane));
    if d3 <= eps {
        return Err(HullError::Degenerate);
    }

    Ok([i0, i1, i2, i3])
}

#[derive(Debug, thiserror::Error)]
pub enum HullError {
    #[error("Convex hull needs at least 4 points, got {0}")]
    TooFewPoints(usize),

    #[error("Points are coplanar or collinear; hull encloses no volume")]
    Degenerate,

    #[error("Point set contains non-finite coordinates")]
    NonFinite,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cube(size: f64) -> Vec<Point3> {
        let mut pts = Vec::new();
        for x in [0.0, size] {
            for y in [0.0, size] {
                for z in [0.0, size] {
                    pts.push([x, y, z]);
                }
            }
        }
        pts
    }

    #[test]
    fn test_tetrahedron_volume() {
        let pts = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
        let v = convex_hull_volume(&pts).unwrap();
        assert!((v - 1.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_cube_with_interior_points() {
        let mut pts = cube(2.0);
        pts.extend([[1.0, 1.0, 1.0], [0.5, 1.5, 0.2], [1.9, 0.1, 1.0]]);
        let hull = ConvexHull::build(&pts).unwrap();
        assert!((hull.volume() - 8.0).abs() < 1e-9);
        assert_eq!(hull.face_count(), 12);
    }

    #[test]
    fn test_pile_shape() {
        // Square footprint 4x4 with an apex at height 3: pyramid volume 16.
        let mut pts = vec![
            [0.0, 0.0, 0.0],
            [4.0, 0.0, 0.0],
            [4.0, 4.0, 0.0],
            [0.0, 4.0, 0.0],
            [2.0, 2.0, 3.0],
        ];
        // Surface samples on the pyramid faces must not change the hull.
        pts.push([1.0, 2.0, 1.5]);
        pts.push([2.0, 1.0, 1.5]);
        let v = convex_hull_volume(&pts).unwrap();
        assert!((v - 16.0).abs() < 1e-9);
    }

    #[test]
    fn test_order_independent() {
        let mut pts = cube(3.0);
        pts.push([1.5, 1.5, 4.0]);
        let forward = convex_hull_volume(&pts).unwrap();
        pts.reverse();
        let backward = convex_hull_volume(&pts).unwrap();
        assert!((forward - backward).abs() < 1e-9);
        assert!((forward - (27.0 + 9.0 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_inputs() {
        assert!(matches!(
            convex_hull_volume(&[[0.0; 3], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]),
            Err(HullError::TooFewPoints(3))
        ));
        let flat = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [1.0, 1.0, 0.0]];
        assert!(matches!(convex_hull_volume(&flat), Err(HullError::Degenerate)));
        let line = [[0.0; 3], [1.0, 1.0, 1.0], [2.0, 2.0, 2.0], [3.0, 3.0, 3.0]];
        assert!(matches!(convex_hull_volume(&line), Err(HullError::Degenerate)));
        let same = [[1.0; 3]; 5];
        assert!(matches!(convex_hull_volume(&same), Err(HullError::Degenerate)));
    }

    /// Golden-angle spiral over the upper unit hemisphere: every point is a hull vertex.
    fn dome(n: usize) -> Vec<Point3> {
        let golden = std::f64::consts::PI * (3.0 - 5.0_f64.sqrt());
        (0..n)
            .map(|i| {
                let z = 1.0 - (i as f64 + 0.5) / n as f64;
                let r = (1.0 - z * z).sqrt();
                let theta = golden * i as f64;
                [r * theta.cos(), r * theta.sin(), z]
            })
            .collect()
    }

    #[test]
    fn test_dome_scan_scales() {
        let pts = dome(40_000);
        let started = std::time::Instant::now();
        let hull = ConvexHull::build(&pts).unwrap();
        let elapsed = started.elapsed();

        let hemisphere = 2.0 * std::f64::consts::PI / 3.0;
        assert!((hull.volume() - hemisphere).abs() < 0.01, "volume {}", hull.volume());
        assert!(
            elapsed < std::time::Duration::from_secs(15),
            "hull of 40k dome points took {elapsed:?}"
        );
    }

    #[test]
    fn test_dome_hull_is_closed() {
        let pts = dome(2_000);
        let hull = ConvexHull::build(&pts).unwrap();
        // Closed triangulated surface over all V points: F = 2V - 4.
        assert_eq!(hull.face_count(), 2 * pts.len() - 4);

        let mut edges: HashMap<(usize, usize), u32> = HashMap::new();
        for f in hull.live_faces() {
            for k in 0..3 {
                *edges.entry((f.v[k], f.v[(k + 1) % 3])).or_insert(0) += 1;
            }
        }
        for (&(a, b), &n) in &edges {
            assert_eq!(n, 1);
            assert_eq!(edges.get(&(b, a)), Some(&1));
        }
    }
}
