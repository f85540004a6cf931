//! Index arithmetic for the 3×3×3 halo layout.
//!
//! Every unit-cell site owns a block of 27 consecutive node indices. Inside
//! a block the replica at per-axis coordinates (x, y, z) ∈ {0,1,2}³ sits at
//! offset `9x + 3y + z`. Node indices are `usize`, so negative indices from
//! upstream arithmetic cannot reach this module unnoticed.

/// Replicas along each lattice axis.
pub const REPLICAS_PER_AXIS: usize = 3;

/// Images of each site in the halo.
pub const HALO_IMAGES: usize = REPLICAS_PER_AXIS * REPLICAS_PER_AXIS * REPLICAS_PER_AXIS;

/// Offset of the central (original cell) replica, (1, 1, 1).
pub const CENTRAL_REPLICA: usize = 13;

/// Offset of the replica at per-axis coordinates `coords` within a block.
pub fn replica_offset(coords: [usize; 3]) -> usize {
    debug_assert!(coords.iter().all(|&c| c < REPLICAS_PER_AXIS));
    coords[0] * 9 + coords[1] * 3 + coords[2]
}

/// Per-axis replica coordinates of a node index.
pub fn replica_coords(index: usize) -> [usize; 3] {
    [(index / 9) % 3, (index / 3) % 3, index % 3]
}

/// Node index of `uc_index`'s image at replica `offset`.
pub fn halo_index(uc_index: usize, offset: usize) -> usize {
    debug_assert!(offset < HALO_IMAGES);
    uc_index * HALO_IMAGES + offset
}

/// Move `index` by `shift` replicas, wrapping each axis modulo 3.
///
/// The result stays inside the 27-block of the input, i.e. it is an image
/// of the same unit-cell site.
pub fn shift(index: usize, shift: [i64; 3]) -> usize {
    let block = index - index % HALO_IMAGES;
    let coords = replica_coords(index);
    let mut moved = [0usize; 3];
    let period = REPLICAS_PER_AXIS as i64;
    for axis in 0..3 {
        let step = shift[axis].rem_euclid(period);
        moved[axis] = (coords[axis] as i64 + step).rem_euclid(period) as usize;
    }
    block + replica_offset(moved)
}
