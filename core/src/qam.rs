//! Gray-coded 64-QAM constellation mapping.
//!
//! A 6-bit label splits into two 3-bit halves; each half picks one of the
//! levels {-7,-5,-3,-1,+1,+3,+5,+7} through a per-axis Gray code, and the
//! point is scaled by 1/sqrt(42) for unit average energy.

use rustfft::num_complex::Complex;

pub const BITS_PER_POINT: usize = 6;

const SQRT42: f32 = 6.480_741;
const LEVELS: [f32; 8] = [-7.0, -5.0, -3.0, -1.0, 1.0, 3.0, 5.0, 7.0];
/// Level index -> Gray label (i ^ (i >> 1)).
const GRAY: [u8; 8] = [0, 1, 3, 2, 6, 7, 5, 4];
/// Gray label -> level index.
const GRAY_INV: [usize; 8] = [0, 1, 3, 2, 7, 6, 4, 5];

/// Map a 6-bit label (high 3 bits = I axis, low 3 = Q axis) to a point.
pub fn map(label: u8) -> Complex<f32> {
    debug_assert!(label < 64);
    let i = LEVELS[GRAY_INV[(label >> 3) as usize]];
    let q = LEVELS[GRAY_INV[(label & 7) as usize]];
    Complex::new(i / SQRT42, q / SQRT42)
}

/// Hard decision back to the 6-bit label; ties go to the lower label.
pub fn demap(z: Complex<f32>) -> u8 {
    (axis_label(z.re) << 3) | axis_label(z.im)
}

fn axis_label(v: f32) -> u8 {
    let scaled = v * SQRT42;
    let mut best_label = 0u8;
    let mut best_dist = f32::INFINITY;
    for label in 0..8u8 {
        let dist = (scaled - LEVELS[GRAY_INV[label as usize]]).abs();
        if dist < best_dist {
            best_dist = dist;
            best_label = label;
        }
    }
    best_label
}

/// Split bytes (a multiple of 3) into 6-bit labels, MSB first.
pub fn bytes_to_labels(bytes: &[u8]) -> Vec<u8> {
    debug_assert_eq!(bytes.len() % 3, 0);
    let mut out = Vec::with_capacity(bytes.len() / 3 * 4);
    for chunk in bytes.chunks_exact(3) {
        let v = ((chunk[0] as u32) << 16) | ((chunk[1] as u32) << 8) | chunk[2] as u32;
        out.push(((v >> 18) & 0x3F) as u8);
        out.push(((v >> 12) & 0x3F) as u8);
        out.push(((v >> 6) & 0x3F) as u8);
        out.push((v & 0x3F) as u8);
    }
    out
}

/// Repack 6-bit labels (a multiple of 4) into bytes.
pub fn labels_to_bytes(labels: &[u8]) -> Vec<u8> {
    debug_assert_eq!(labels.len() % 4, 0);
    let mut out = Vec::with_capacity(labels.len() / 4 * 3);
    for chunk in labels.chunks_exact(4) {
        let v = ((chunk[0] as u32) << 18)
            | ((chunk[1] as u32) << 12)
            | ((chunk[2] as u32) << 6)
            | chunk[3] as u32;
        out.push((v >> 16) as u8);
        out.push((v >> 8) as u8);
        out.push(v as u8);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_labels_roundtrip() {
        for label in 0..64u8 {
            assert_eq!(demap(map(label)), label, "label {label}");
        }
    }

    #[test]
    fn unit_average_energy() {
        let total: f32 = (0..64u8).map(|l| map(l).norm_sqr()).sum();
        assert!((total / 64.0 - 1.0).abs() < 1e-4);
    }

    #[test]
    fn gray_neighbors_differ_in_one_bit() {
        for i in 0..7 {
            let diff = GRAY[i] ^ GRAY[i + 1];
            assert_eq!(diff.count_ones(), 1, "levels {i} and {}", i + 1);
        }
    }

    #[test]
    fn demap_survives_small_noise() {
        for label in 0..64u8 {
            let z = map(label) + Complex::new(0.04, -0.04);
            assert_eq!(demap(z), label);
        }
    }

    #[test]
    fn byte_label_packing_roundtrip() {
        let bytes: Vec<u8> = (0..48u8).collect();
        let labels = bytes_to_labels(&bytes);
        assert_eq!(labels.len(), 64);
        assert!(labels.iter().all(|&l| l < 64));
        assert_eq!(labels_to_bytes(&labels), bytes);
    }
}
