//! FFT high-pass reducer over luminance.
//!
//! Low spatial frequencies carry the scene; the high band carries fine detail
//! and noise. The 2-D spectrum is computed row-then-column, a centered disk
//! around DC is zeroed, and the inverse transform's magnitudes are normalized
//! to bytes.

use rustfft::{FftPlanner, num_complex::Complex};

use super::{Plane, max_to_bytes};

/// High-pass filter the plane, removing a DC-centered disk of the spectrum.
///
/// `cutoff_ratio` is the fraction of the half-spectrum removed:
/// radius = ⌊min(H, W)/2⌋ · (1 − cutoff_ratio).
pub fn extract(plane: &Plane, cutoff_ratio: f64) -> Vec<u8> {
    let (w, h) = (plane.width, plane.height);
    if w == 0 || h == 0 {
        return Vec::new();
    }

    let mut planner = FftPlanner::<f64>::new();
    let row_fft = planner.plan_fft_forward(w);
    let col_fft = planner.plan_fft_forward(h);
    let row_ifft = planner.plan_fft_inverse(w);
    let col_ifft = planner.plan_fft_inverse(h);

    let mut buf: Vec<Complex<f64>> = plane.px.iter().map(|&v| Complex::new(v, 0.0)).collect();

    for row in buf.chunks_exact_mut(w) {
        row_fft.process(row);
    }
    let mut buf = transpose(&buf, w, h);
    for col in buf.chunks_exact_mut(h) {
        col_fft.process(col);
    }
    let mut buf = transpose(&buf, h, w);

    // Zero the low band. Working on the unshifted spectrum, the distance of
    // bin (u, v) from DC with wrap-around equals its distance from the center
    // after an fftshift, so no explicit quadrant swap is needed.
    let radius = ((w.min(h) / 2) as f64 * (1.0 - cutoff_ratio)).floor();
    let r2 = radius * radius;
    for v in 0..h {
        let dv = v.min(h - v) as f64;
        for u in 0..w {
            let du = u.min(w - u) as f64;
            if du * du + dv * dv <= r2 {
                buf[v * w + u] = Complex::new(0.0, 0.0);
            }
        }
    }

    for row in buf.chunks_exact_mut(w) {
        row_ifft.process(row);
    }
    let mut buf = transpose(&buf, w, h);
    for col in buf.chunks_exact_mut(h) {
        col_ifft.process(col);
    }
    let buf = transpose(&buf, h, w);

    let scale = (w * h) as f64;
    let magnitudes: Vec<f64> = buf.iter().map(|c| c.norm() / scale).collect();
    max_to_bytes(&magnitudes)
}

fn transpose(buf: &[Complex<f64>], w: usize, h: usize) -> Vec<Complex<f64>> {
    let mut out = vec![Complex::new(0.0, 0.0); buf.len()];
    for y in 0..h {
        for x in 0..w {
            out[x * h + y] = buf[y * w + x];
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_length_matches_plane() {
        let plane = Plane::new(16, 16, (0..256).map(|i| (i % 11) as f64).collect());
        assert_eq!(extract(&plane, 0.8).len(), 256);
    }

    #[test]
    fn constant_plane_is_fully_suppressed() {
        // A constant image is pure DC; the high-pass leaves nothing.
        let plane = Plane::new(16, 16, vec![200.0; 256]);
        let out = extract(&plane, 0.8);
        assert!(out.iter().all(|&b| b == 0));
    }

    #[test]
    fn alternating_pattern_survives_the_high_pass() {
        // A pixel-rate checkerboard lives at the Nyquist corner, far outside
        // the suppressed disk.
        let px: Vec<f64> = (0..256)
            .map(|i| if (i / 16 + i % 16) % 2 == 0 { 255.0 } else { 0.0 })
            .collect();
        let out = extract(&Plane::new(16, 16, px), 0.8);
        assert!(out.iter().any(|&b| b > 128));
    }

    #[test]
    fn cutoff_one_removes_nothing_but_dc_neighbourhood() {
        // cutoff_ratio = 1.0 gives radius 0: only the exact DC bin is zeroed.
        let px: Vec<f64> = (0..64).map(|i| (i * 3 % 256) as f64).collect();
        let out = extract(&Plane::new(8, 8, px), 1.0);
        assert_eq!(out.len(), 64);
        assert!(out.iter().any(|&b| b > 0));
    }
}
