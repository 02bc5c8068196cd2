// src/redist/path.rs
//
// Monotone-path neighborhoods.
//
// A monotone path from a VoF c is a walk of face-connected VoFs in which
// every step moves further from c along its axis: the per-axis offset never
// shrinks, so a path cannot reach around a solid corner and come back.
// Every per-axis offset is bounded by the path radius.

use std::collections::{HashSet, VecDeque};

use crate::amr::rect::shift_iv;
use crate::geometry::{EbGeometry, VofId, vofs_at};

/// VoFs reachable from `start` by monotone paths of `radius`, excluding
/// `start` itself, sorted by identity.
pub fn monotone_neighbors<G>(geom: &G, start: VofId, radius: usize) -> Vec<VofId>
where
    G: EbGeometry + ?Sized,
{
    let domain = geom.domain();
    let radius = radius as isize;

    let mut seen: HashSet<VofId> = HashSet::new();
    seen.insert(start);
    let mut q: VecDeque<(VofId, [isize; 2])> = VecDeque::new();
    q.push_back((start, [0, 0]));

    while let Some((vof, offset)) = q.pop_front() {
        for dir in 0..2 {
            for side in [-1isize, 1] {
                let next = offset[dir] + side;
                if next.abs() <= offset[dir].abs() || next.abs() > radius {
                    continue;
                }
                let Some(iv) = shift_iv(vof.iv, dir, side, domain) else {
                    continue;
                };
                for nb in vofs_at(geom, iv) {
                    if seen.contains(&nb) || !geom.connected(vof, nb) {
                        continue;
                    }
                    seen.insert(nb);
                    let mut o = offset;
                    o[dir] = next;
                    q.push_back((nb, o));
                }
            }
        }
    }

    seen.remove(&start);
    let mut out: Vec<VofId> = seen.into_iter().collect();
    out.sort_unstable();
    out
}

/// `start` followed by its monotone neighbors.
pub fn monotone_neighborhood<G>(geom: &G, start: VofId, radius: usize) -> Vec<VofId>
where
    G: EbGeometry + ?Sized,
{
    let mut out = Vec::with_capacity(9);
    out.push(start);
    out.extend(monotone_neighbors(geom, start, radius));
    out
}
