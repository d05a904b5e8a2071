//! Non-deterministic window sampling.
//!
//! Two ingestions of the same frame must not walk the same windows, so the
//! RNG seed mixes the wall clock (microseconds) with a hash of the frame
//! contents. The windows themselves are reduced by the Laplacian reducer at
//! the call site.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::Plane;

/// Sample `count` windows of `size`×`size` pixels at random positions.
///
/// Planes too small to host a window yield no samples.
pub fn sample(plane: &Plane, count: usize, size: usize) -> Vec<Plane> {
    if plane.width <= size || plane.height <= size {
        return Vec::new();
    }

    let mut rng = StdRng::seed_from_u64(window_seed(plane));
    let mut windows = Vec::with_capacity(count);

    for _ in 0..count {
        let x0 = rng.random_range(0..plane.width - size);
        let y0 = rng.random_range(0..plane.height - size);
        let mut px = Vec::with_capacity(size * size);
        for y in y0..y0 + size {
            for x in x0..x0 + size {
                px.push(plane.at(x, y));
            }
        }
        windows.push(Plane::new(size, size, px));
    }

    windows
}

/// Wall-clock microseconds XORed with a content hash of the plane.
fn window_seed(plane: &Plane) -> u64 {
    let micros = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64;

    let mut hasher = blake3::Hasher::new();
    for &v in plane.px.iter().take(1024) {
        hasher.update(&(v as i64).to_le_bytes());
    }
    let digest = hasher.finalize();
    let content = u64::from_le_bytes(digest.as_bytes()[..8].try_into().unwrap());

    micros ^ content
}
