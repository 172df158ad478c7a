//! Mesh fixtures shaped like reconstructed piles

#![allow(dead_code)]

/// Closed box with outward winding: volume `lx * ly * lz`.
pub fn box_obj(lx: f64, ly: f64, lz: f64) -> String {
    format!(
        "# closed box\n\
         o pile\n\
         v 0 0 0\nv {lx} 0 0\nv {lx} {ly} 0\nv 0 {ly} 0\n\
         v 0 0 {lz}\nv {lx} 0 {lz}\nv {lx} {ly} {lz}\nv 0 {ly} {lz}\n\
         vt 0 0\nvn 0 0 1\n\
         usemtl coal\n\
         f 1/1/1 4/1/1 3/1/1 2/1/1\n\
         f 5 6 7 8\n\
         f 1 2 6 5\n\
         f 2 3 7 6\n\
         f 3 4 8 7\n\
         f 4 1 5 8\n"
    )
}

/// 3 x 3 x 1 box missing its floor, with every face wound inward.
///
/// Open (not watertight), signed volume -9.0, convex hull volume 9.0. This is
/// what a photogrammetric scan of a pile sitting on the ground tends to look like.
pub const OPEN_INVERTED_PILE: &str = "\
o scan
v 0 0 0
v 3 0 0
v 3 3 0
v 0 3 0
v 0 0 1
v 3 0 1
v 3 3 1
v 0 3 1
f 8 7 6 5
f 5 6 2 1
f 6 7 3 2
f 7 8 4 3
f 8 5 1 4
";

/// Single flat sheet: open and with no enclosed hull.
pub const FLAT_SHEET: &str = "v 0 0 0\nv 4 0 0\nv 4 2 0\nv 0 2 0\nf 1 2 3 4\n";

/// Text that is not a mesh at all.
pub const NOT_A_MESH: &str = "PK\u{3}\u{4} this is a zip header, not an OBJ file";
