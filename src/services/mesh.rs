//! Triangle mesh loading and measurement.

use std::collections::HashMap;
use std::path::Path;

pub type Point3 = [f64; 3];

/// A single combined triangle mesh.
///
/// Every object and group in the source file is flattened into one vertex
/// list and one triangle list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriangleMesh {
    pub vertices: Vec<Point3>,
    pub triangles: Vec<[usize; 3]>,
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Point3,
    pub max: Point3,
}

impl Aabb {
    /// Extents along X, Y and Z.
    pub fn extents(&self) -> Point3 {
        [
            self.max[0] - self.min[0],
            self.max[1] - self.min[1],
            self.max[2] - self.min[2],
        ]
    }
}

impl TriangleMesh {
    /// Read and parse a Wavefront OBJ file.
    pub fn load_obj(path: &Path) -> Result<Self, MeshError> {
        let content = std::fs::read_to_string(path).map_err(MeshError::Io)?;
        Self::parse_obj(&content)
    }

    /// Parse Wavefront OBJ text.
    ///
    /// Only `v` and `f` records matter for measurement; texture coordinates,
    /// normals, materials and grouping are ignored. Polygons are split into a
    /// triangle fan around their first vertex.
    pub fn parse_obj(content: &str) -> Result<Self, MeshError> {
        let mut mesh = TriangleMesh::default();

        for (idx, raw) in content.lines().enumerate() {
            let line_no = idx + 1;
            let line = raw.trim();
            let mut parts = line.split_whitespace();

            match parts.next() {
                Some("v") => {
                    let mut coord = [0.0; 3];
                    for c in coord.iter_mut() {
                        let token = parts.next().ok_or(MeshError::Parse {
                            line: line_no,
                            detail: "vertex needs three coordinates".to_string(),
                        })?;
                        *c = token.parse::<f64>().map_err(|_| MeshError::Parse {
                            line: line_no,
                            detail: format!("invalid coordinate '{token}'"),
                        })?;
                        if !c.is_finite() {
                            return Err(MeshError::Parse {
                                line: line_no,
                                detail: format!("non-finite coordinate '{token}'"),
                            });
                        }
                    }
                    mesh.vertices.push(coord);
                }
                Some("f") => {
                    let corners = parts
                        .map(|token| resolve_index(token, mesh.vertices.len(), line_no))
                        .collect::<Result<Vec<_>, _>>()?;
                    if corners.len() < 3 {
                        return Err(MeshError::Parse {
                            line: line_no,
                            detail: "face needs at least three vertices".to_string(),
                        });
                    }
                    for i in 1..corners.len() - 1 {
                        mesh.triangles.push([corners[0], corners[i], corners[i + 1]]);
                    }
                }
                _ => {}
            }
        }

        if mesh.triangles.is_empty() {
            return Err(MeshError::Empty);
        }
        Ok(mesh)
    }

    /// True when every edge is shared by exactly two triangles.
    pub fn is_watertight(&self) -> bool {
        if self.triangles.is_empty() {
            return false;
        }
        let mut edges: HashMap<(usize, usize), u32> = HashMap::with_capacity(self.triangles.len() * 3);
        for tri in &self.triangles {
            for k in 0..3 {
                let (a, b) = (tri[k], tri[(k + 1) % 3]);
                let key = if a < b { (a, b) } else { (b, a) };
                *edges.entry(key).or_insert(0) += 1;
            }
        }
        edges.values().all(|&n| n == 2)
    }

    /// Signed enclosed volume (divergence theorem).
    ///
    /// Positive for a closed mesh with outward-facing winding, negative when
    /// the winding is inverted. Meaningless for open meshes.
    pub fn signed_volume(&self) -> f64 {
        // Translate to the first vertex to limit cancellation on far-from-origin scans.
        let origin = self.vertices.first().copied().unwrap_or([0.0; 3]);
        self.triangles
            .iter()
            .map(|t| {
                let a = sub(self.vertices[t[0]], origin);
                let b = sub(self.vertices[t[1]], origin);
                let c = sub(self.vertices[t[2]], origin);
                dot(a, cross(b, c))
            })
            .sum::<f64>()
            / 6.0
    }

    pub fn surface_area(&self) -> f64 {
        self.triangles
            .iter()
            .map(|t| {
                let a = self.vertices[t[0]];
                let ab = sub(self.vertices[t[1]], a);
                let ac = sub(self.vertices[t[2]], a);
                norm(cross(ab, ac)) / 2.0
            })
            .sum()
    }

    /// Axis-aligned bounding box of all vertices.
    pub fn bounding_box(&self) -> Option<Aabb> {
        let (first, rest) = self.vertices.split_first()?;
        let mut aabb = Aabb {
            min: *first,
            max: *first,
        };
        for v in rest {
            for axis in 0..3 {
                aabb.min[axis] = aabb.min[axis].min(v[axis]);
                aabb.max[axis] = aabb.max[axis].max(v[axis]);
            }
        }
        Some(aabb)
    }
}

/// Turn a face token (`7`, `7/2`, `7//3`, `-1/...`) into a zero-based index.
fn resolve_index(token: &str, vertex_count: usize, line: usize) -> Result<usize, MeshError> {
    let head = token.split('/').next().unwrap_or_default();
    let raw: i64 = head.parse().map_err(|_| MeshError::Parse {
        line,
        detail: format!("invalid face index '{token}'"),
    })?;

    let resolved = if raw > 0 {
        raw - 1
    } else if raw < 0 {
        vertex_count as i64 + raw
    } else {
        -1
    };

    if resolved < 0 || resolved as usize >= vertex_count {
        return Err(MeshError::Parse {
            line,
            detail: format!("face index {raw} out of range ({vertex_count} vertices)"),
        });
    }
    Ok(resolved as usize)
}

pub(crate) fn sub(a: Point3, b: Point3) -> Point3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

pub(crate) fn dot(a: Point3, b: Point3) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

pub(crate) fn cross(a: Point3, b: Point3) -> Point3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

pub(crate) fn norm(a: Point3) -> f64 {
    dot(a, a).sqrt()
}

#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    #[error("Failed to read mesh file: {0}")]
    Io(#[source] std::io::Error),

    #[error("Malformed OBJ at line {line}: {detail}")]
    Parse { line: usize, detail: String },

    #[error("Mesh contains no faces")]
    Empty,
}
