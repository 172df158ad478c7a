use tracing::{debug, warn};

use crate::models::job::Measurements;
use crate::models::stage::VolumeSource;
use crate::services::hull::{convex_hull_volume, HullError};
use crate::services::mesh::TriangleMesh;

/// Measurements of a mesh plus how they were obtained.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshReport {
    pub measurements: Measurements,
    pub volume_source: VolumeSource,
    pub watertight: bool,
    pub vertices: usize,
    pub faces: usize,
    pub surface_area: f64,
}

/// Pick the volume to report.
///
/// The signed mesh volume is trusted only for a watertight mesh with a
/// positive result. Otherwise the convex hull volume is used, and if the hull
/// cannot be built the volume is zero.
pub fn resolve_volume<F>(watertight: bool, mesh_volume: f64, hull: F) -> (f64, VolumeSource)
where
    F: FnOnce() -> Result<f64, HullError>,
{
    if watertight && mesh_volume > 0.0 && mesh_volume.is_finite() {
        return (mesh_volume, VolumeSource::Mesh);
    }

    match hull() {
        Ok(v) if v.is_finite() && v >= 0.0 => (v, VolumeSource::ConvexHull),
        Ok(v) => {
            warn!(hull_volume = v, "Convex hull produced an unusable volume");
            (0.0, VolumeSource::Unavailable)
        }
        Err(e) => {
            warn!(error = %e, "Convex hull fallback failed, reporting zero volume");
            (0.0, VolumeSource::Unavailable)
        }
    }
}

/// Compute volume, bounding extents and estimated mass of a loaded mesh.
///
/// `density` is in kg/m³; mesh units are taken to be metres.
pub fn measure(mesh: &TriangleMesh, density: f64) -> MeshReport {
    let watertight = mesh.is_watertight();
    let mesh_volume = mesh.signed_volume();
    debug!(
        watertight,
        mesh_volume,
        vertices = mesh.vertices.len(),
        faces = mesh.triangles.len(),
        "Mesh loaded"
    );

    let (volume, volume_source) =
        resolve_volume(watertight, mesh_volume, || convex_hull_volume(&mesh.vertices));

    let [length, width, height] = mesh
        .bounding_box()
        .map(|b| b.extents())
        .unwrap_or([0.0; 3]);

    MeshReport {
        measurements: Measurements {
            volume,
            length,
            width,
            height,
            weight: volume * density,
        },
        volume_source,
        watertight,
        vertices: mesh.vertices.len(),
        faces: mesh.triangles.len(),
        surface_area: mesh.surface_area(),
    }
}
