//! Sobel gradient magnitude reducer.

use super::{Plane, max_to_bytes};

/// 3×3 Sobel gradient magnitude √(Sx² + Sy²), normalized to bytes.
pub fn extract(plane: &Plane) -> Vec<u8> {
    let (w, h) = (plane.width, plane.height);
    let mut magnitude = Vec::with_capacity(w * h);

    for y in 0..h as isize {
        for x in 0..w as isize {
            let tl = plane.at_clamped(x - 1, y - 1);
            let tc = plane.at_clamped(x, y - 1);
            let tr = plane.at_clamped(x + 1, y - 1);
            let ml = plane.at_clamped(x - 1, y);
            let mr = plane.at_clamped(x + 1, y);
            let bl = plane.at_clamped(x - 1, y + 1);
            let bc = plane.at_clamped(x, y + 1);
            let br = plane.at_clamped(x + 1, y + 1);

            let sx = (tr + 2.0 * mr + br) - (tl + 2.0 * ml + bl);
            let sy = (bl + 2.0 * bc + br) - (tl + 2.0 * tc + tr);
            magnitude.push((sx * sx + sy * sy).sqrt());
        }
    }

    max_to_bytes(&magnitude)
}
