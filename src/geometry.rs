// src/geometry.rs
//
// Embedded-boundary geometry: volume fractions, face apertures and the
// connectivity between volumes of fluid (VoFs).
//
// The core only consumes the `EbGeometry` trait. `CutCellGeometry` is the
// concrete provider used to drive the core: per-cell kappa, per-face
// apertures, and an explicit override table for multi-valued cells.
//
// Conventions (same as the AMR patch code):
// - index space starts at (0,0) in the lower-left corner
// - cell centres at ((i+0.5)*dx, (j+0.5)*dx)
// - x-face `i` of row `j` separates cells (i-1, j) and (i, j)

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::amr::rect::{IntVect, Rect2i, coarsen_iv, shift_iv};

/// Spatial dimension of the mesh.
pub const SPACE_DIM: u32 = 2;

/// Identity of one volume of fluid on a level.
///
/// Regular and ordinary cut cells have `sub == 0`. A multi-valued cell (one
/// coordinate, several disconnected fluid regions) has one VoF per region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VofId {
    pub iv: IntVect,
    pub sub: u16,
}

impl VofId {
    #[inline]
    pub fn new(iv: IntVect, sub: u16) -> Self {
        Self { iv, sub }
    }

    #[inline]
    pub fn single(i: usize, j: usize) -> Self {
        Self { iv: [i, j], sub: 0 }
    }
}

/// Face between two face-adjacent VoFs; `lo` is on the low side along `dir`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FaceId {
    pub lo: VofId,
    pub hi: VofId,
    pub dir: usize,
}

impl FaceId {
    /// The face shared by `a` and `b`, if their cells are face neighbours.
    pub fn between(a: VofId, b: VofId) -> Option<FaceId> {
        let di = a.iv[0].abs_diff(b.iv[0]);
        let dj = a.iv[1].abs_diff(b.iv[1]);
        let dir = match (di, dj) {
            (1, 0) => 0,
            (0, 1) => 1,
            _ => return None,
        };
        let (lo, hi) = if a.iv[dir] < b.iv[dir] { (a, b) } else { (b, a) };
        Some(FaceId { lo, hi, dir })
    }
}

/// Read-only geometry of one level, stable for the lifetime of a topology.
pub trait EbGeometry: Send + Sync {
    /// Index-space extent of the level.
    fn domain(&self) -> Rect2i;

    /// Number of VoFs at `iv` (0 for a covered cell).
    fn num_vofs(&self, iv: IntVect) -> usize;

    fn volume_fraction(&self, vof: VofId) -> f64;

    fn area_fraction(&self, face: FaceId) -> f64;

    /// Adjacency used to build monotone paths.
    fn connected(&self, a: VofId, b: VofId) -> bool {
        match FaceId::between(a, b) {
            Some(face) => self.area_fraction(face) > 0.0,
            None => false,
        }
    }

    /// Cut or multi-valued.
    fn is_irregular(&self, vof: VofId) -> bool {
        self.num_vofs(vof.iv) > 1 || self.volume_fraction(vof) < 1.0
    }

    /// VoF of `coarse` (this level coarsened by `ratio`) that `fine` lies in.
    ///
    /// A multi-valued coarse cell is resolved by connectivity: the fine
    /// region of `fine` inside the coarse cell is flood-filled, and the coarse
    /// VoF linked to the most coarse neighbours that region opens onto wins.
    /// Without any such link the sub identity is used, clamped to the coarse
    /// VoF count.
    fn coarsen_vof(&self, fine: VofId, ratio: usize, coarse: &dyn EbGeometry) -> Option<VofId> {
        let civ = coarsen_iv(fine.iv, ratio);
        let n = coarse.num_vofs(civ);
        match n {
            0 => return None,
            1 => return Some(VofId::new(civ, 0)),
            _ => {}
        }

        let reached = coarse_cells_reached(self, fine, ratio);
        let mut best: Option<(usize, VofId)> = None;
        for cv in vofs_at(coarse, civ) {
            let score = reached
                .iter()
                .filter(|&&nb_iv| vofs_at(coarse, nb_iv).any(|nb| coarse.connected(cv, nb)))
                .count();
            if score > 0 && best.map_or(true, |(s, _)| score > s) {
                best = Some((score, cv));
            }
        }
        match best {
            Some((_, cv)) => Some(cv),
            None => Some(VofId::new(civ, (fine.sub as usize).min(n - 1) as u16)),
        }
    }
}

/// All VoFs at one cell index.
pub fn vofs_at<G: EbGeometry + ?Sized>(geom: &G, iv: IntVect) -> impl Iterator<Item = VofId> {
    (0..geom.num_vofs(iv)).map(move |s| VofId::new(iv, s as u16))
}

/// Coarse cells, other than the one containing `fine`, that the fine region
/// of `fine` inside its coarse cell is face-connected to.
fn coarse_cells_reached<G: EbGeometry + ?Sized>(
    geom: &G,
    fine: VofId,
    ratio: usize,
) -> BTreeSet<IntVect> {
    let domain = geom.domain();
    let civ = coarsen_iv(fine.iv, ratio);
    let mut seen: HashSet<VofId> = HashSet::new();
    seen.insert(fine);
    let mut q: VecDeque<VofId> = VecDeque::new();
    q.push_back(fine);
    let mut reached = BTreeSet::new();

    while let Some(vof) = q.pop_front() {
        for dir in 0..2 {
            for side in [-1isize, 1] {
                let Some(iv) = shift_iv(vof.iv, dir, side, domain) else {
                    continue;
                };
                for nb in vofs_at(geom, iv) {
                    if !geom.connected(vof, nb) {
                        continue;
                    }
                    let nb_civ = coarsen_iv(iv, ratio);
                    if nb_civ != civ {
                        reached.insert(nb_civ);
                    } else if seen.insert(nb) {
                        q.push_back(nb);
                    }
                }
            }
        }
    }
    reached
}

/// Volume fractions of the VoFs of a multi-valued cell.
#[derive(Debug, Clone)]
struct MultiCell {
    kappas: Vec<f64>,
}

/// Concrete cut-cell geometry on a single level.
#[derive(Debug, Clone)]
pub struct CutCellGeometry {
    pub nx: usize,
    pub ny: usize,
    kappa: Vec<f64>,
    /// x-faces: (nx+1)*ny, index j*(nx+1)+i.
    ax: Vec<f64>,
    /// y-faces: nx*(ny+1), index j*nx+i.
    ay: Vec<f64>,
    multi: HashMap<IntVect, MultiCell>,
    /// Apertures of faces touching a multi-valued cell, keyed (lo, hi).
    links: HashMap<(VofId, VofId), f64>,
}

impl CutCellGeometry {
    /// All cells regular, all interior faces open.
    pub fn regular(nx: usize, ny: usize) -> Self {
        Self::from_kappa(nx, ny, vec![1.0; nx * ny])
    }

    /// Cells with the given kappa (row-major). Interior face apertures are
    /// approximated by the smaller kappa of the two cells; faces touching a
    /// covered cell or the domain boundary are closed.
    pub fn from_kappa(nx: usize, ny: usize, kappa: Vec<f64>) -> Self {
        assert_eq!(kappa.len(), nx * ny, "kappa must have nx*ny entries");
        assert!(
            kappa.iter().all(|k| (0.0..=1.0).contains(k)),
            "kappa must lie in [0, 1]"
        );
        let mut g = Self {
            nx,
            ny,
            kappa,
            ax: vec![0.0; (nx + 1) * ny],
            ay: vec![0.0; nx * (ny + 1)],
            multi: HashMap::new(),
            links: HashMap::new(),
        };
        g.rebuild_apertures();
        g
    }

    /// Sample an implicit fluid region `inside(x, y)` with `samples`² points per
    /// cell for kappa and `samples` points per face for the apertures.
    pub fn from_level_set<F>(nx: usize, ny: usize, dx: f64, samples: usize, inside: F) -> Self
    where
        F: Fn(f64, f64) -> bool,
    {
        assert!(samples >= 1, "samples must be >= 1");
        let s = samples as f64;
        let mut kappa = vec![0.0; nx * ny];
        for j in 0..ny {
            for i in 0..nx {
                let mut hits = 0usize;
                for sj in 0..samples {
                    for si in 0..samples {
                        let x = (i as f64 + (si as f64 + 0.5) / s) * dx;
                        let y = (j as f64 + (sj as f64 + 0.5) / s) * dx;
                        if inside(x, y) {
                            hits += 1;
                        }
                    }
                }
                kappa[j * nx + i] = hits as f64 / (s * s);
            }
        }

        let mut g = Self::from_kappa(nx, ny, kappa);
        for j in 0..ny {
            for i in 1..nx {
                let hits = (0..samples)
                    .filter(|&t| inside(i as f64 * dx, (j as f64 + (t as f64 + 0.5) / s) * dx))
                    .count();
                let open = g.kappa[j * nx + i - 1] > 0.0 && g.kappa[j * nx + i] > 0.0;
                g.ax[j * (nx + 1) + i] = if open { hits as f64 / s } else { 0.0 };
            }
        }
        for j in 1..ny {
            for i in 0..nx {
                let hits = (0..samples)
                    .filter(|&t| inside((i as f64 + (t as f64 + 0.5) / s) * dx, j as f64 * dx))
                    .count();
                let open = g.kappa[(j - 1) * nx + i] > 0.0 && g.kappa[j * nx + i] > 0.0;
                g.ay[j * nx + i] = if open { hits as f64 / s } else { 0.0 };
            }
        }
        g
    }

    fn rebuild_apertures(&mut self) {
        let (nx, ny) = (self.nx, self.ny);
        self.ax.iter_mut().for_each(|a| *a = 0.0);
        self.ay.iter_mut().for_each(|a| *a = 0.0);
        for j in 0..ny {
            for i in 1..nx {
                let a = self.kappa[j * nx + i - 1].min(self.kappa[j * nx + i]);
                self.ax[j * (nx + 1) + i] = a;
            }
        }
        for j in 1..ny {
            for i in 0..nx {
                let a = self.kappa[(j - 1) * nx + i].min(self.kappa[j * nx + i]);
                self.ay[j * nx + i] = a;
            }
        }
    }

    #[inline]
    fn cell(&self, iv: IntVect) -> usize {
        debug_assert!(iv[0] < self.nx && iv[1] < self.ny);
        iv[1] * self.nx + iv[0]
    }

    fn face_slot(&mut self, iv_hi: IntVect, dir: usize) -> &mut f64 {
        let [i, j] = iv_hi;
        if dir == 0 {
            &mut self.ax[j * (self.nx + 1) + i]
        } else {
            &mut self.ay[j * self.nx + i]
        }
    }

    /// Set the volume fraction of a single-valued cell. Apertures are untouched.
    pub fn set_kappa(&mut self, iv: IntVect, kappa: f64) {
        assert!((0.0..=1.0).contains(&kappa), "kappa must lie in [0, 1]");
        assert!(!self.multi.contains_key(&iv), "use split_cell for multi-valued cells");
        let c = self.cell(iv);
        self.kappa[c] = kappa;
    }

    /// Set the aperture of the face between two single-valued face neighbours.
    /// An aperture of zero models a thin wall.
    pub fn set_aperture(&mut self, a: IntVect, b: IntVect, alpha: f64) {
        let face = FaceId::between(VofId::new(a, 0), VofId::new(b, 0))
            .unwrap_or_else(|| panic!("cells {a:?} and {b:?} are not face neighbours"));
        *self.face_slot(face.hi.iv, face.dir) = alpha;
    }

    /// Turn `iv` into a multi-valued cell with one VoF per entry of `kappas`.
    ///
    /// `links` lists (sub, neighbour VoF, aperture): every face between a VoF
    /// of this cell and a neighbour must be listed, unlisted faces are closed.
    pub fn split_cell(&mut self, iv: IntVect, kappas: &[f64], links: &[(u16, VofId, f64)]) {
        assert!(kappas.len() >= 2, "a multi-valued cell needs at least two VoFs");
        let c = self.cell(iv);
        self.kappa[c] = kappas.iter().sum::<f64>().min(1.0);
        self.multi.insert(iv, MultiCell { kappas: kappas.to_vec() });
        self.links.retain(|(lo, hi), _| lo.iv != iv && hi.iv != iv);
        for &(sub, nb, alpha) in links {
            assert!((sub as usize) < kappas.len(), "link sub {sub} out of range");
            let here = VofId::new(iv, sub);
            let face = FaceId::between(here, nb)
                .unwrap_or_else(|| panic!("{here:?} and {nb:?} are not face neighbours"));
            self.links.insert((face.lo, face.hi), alpha);
        }
    }

    /// Geometry of the level `ratio` times coarser.
    ///
    /// kappa is the mean of the fine kappas; a coarse face aperture is the mean
    /// over the `ratio` fine faces it covers. Multi-valued fine cells count
    /// with their total kappa and coarse cells are single-valued.
    pub fn coarsen(&self, ratio: usize) -> CutCellGeometry {
        assert!(ratio >= 1, "ratio must be >= 1");
        assert!(
            self.nx % ratio == 0 && self.ny % ratio == 0,
            "fine domain ({}, {}) not divisible by ratio {}",
            self.nx,
            self.ny,
            ratio
        );
        let (cnx, cny) = (self.nx / ratio, self.ny / ratio);
        let r2 = (ratio * ratio) as f64;
        let r1 = ratio as f64;

        let mut kappa = vec![0.0; cnx * cny];
        for j in 0..self.ny {
            for i in 0..self.nx {
                kappa[(j / ratio) * cnx + i / ratio] += self.kappa[j * self.nx + i] / r2;
            }
        }
        let mut g = CutCellGeometry {
            nx: cnx,
            ny: cny,
            kappa: kappa.into_iter().map(|k| k.min(1.0)).collect(),
            ax: vec![0.0; (cnx + 1) * cny],
            ay: vec![0.0; cnx * (cny + 1)],
            multi: HashMap::new(),
            links: HashMap::new(),
        };
        for j in 0..self.ny {
            for ic in 1..cnx {
                let i = ic * ratio;
                let a = self.fine_face_aperture([i, j], 0);
                g.ax[(j / ratio) * (cnx + 1) + ic] += a / r1;
            }
        }
        for jc in 1..cny {
            for i in 0..self.nx {
                let j = jc * ratio;
                let a = self.fine_face_aperture([i, j], 1);
                g.ay[jc * cnx + i / ratio] += a / r1;
            }
        }
        g
    }

    /// Total aperture of the face on the low side of `iv_hi` along `dir`,
    /// summing the links of multi-valued cells.
    fn fine_face_aperture(&self, iv_hi: IntVect, dir: usize) -> f64 {
        let mut iv_lo = iv_hi;
        iv_lo[dir] -= 1;
        if self.multi.contains_key(&iv_hi) || self.multi.contains_key(&iv_lo) {
            return self
                .links
                .iter()
                .filter(|((lo, hi), _)| lo.iv == iv_lo && hi.iv == iv_hi)
                .map(|(_, a)| *a)
                .sum::<f64>()
                .min(1.0);
        }
        let [i, j] = iv_hi;
        if dir == 0 {
            self.ax[j * (self.nx + 1) + i]
        } else {
            self.ay[j * self.nx + i]
        }
    }
}

impl EbGeometry for CutCellGeometry {
    fn domain(&self) -> Rect2i {
        Rect2i::new(0, 0, self.nx, self.ny)
    }

    fn num_vofs(&self, iv: IntVect) -> usize {
        if iv[0] >= self.nx || iv[1] >= self.ny {
            return 0;
        }
        match self.multi.get(&iv) {
            Some(m) => m.kappas.len(),
            None => usize::from(self.kappa[self.cell(iv)] > 0.0),
        }
    }

    fn volume_fraction(&self, vof: VofId) -> f64 {
        if vof.iv[0] >= self.nx || vof.iv[1] >= self.ny {
            return 0.0;
        }
        match self.multi.get(&vof.iv) {
            Some(m) => m.kappas.get(vof.sub as usize).copied().unwrap_or(0.0),
            None if vof.sub == 0 => self.kappa[self.cell(vof.iv)],
            None => 0.0,
        }
    }

    fn area_fraction(&self, face: FaceId) -> f64 {
        if self.multi.contains_key(&face.lo.iv) || self.multi.contains_key(&face.hi.iv) {
            return self.links.get(&(face.lo, face.hi)).copied().unwrap_or(0.0);
        }
        if face.lo.sub != 0 || face.hi.sub != 0 {
            return 0.0;
        }
        if self.volume_fraction(face.lo) <= 0.0 || self.volume_fraction(face.hi) <= 0.0 {
            return 0.0;
        }
        let [i, j] = face.hi.iv;
        if face.dir == 0 {
            self.ax[j * (self.nx + 1) + i]
        } else {
            self.ay[j * self.nx + i]
        }
    }
}
