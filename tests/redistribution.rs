// tests/redistribution.rs
//
// End-to-end checks of normalization, redistribution and the multi-level
// synchronization.
// Run with: cargo test --test redistribution

use eb_redist::amr::{EbHierarchy, LevelPhase, NoReflux, Rect2i, RefluxRedistOrchestrator};
use eb_redist::amr::layout::{LevelLayout, TopologyId};
use eb_redist::amr::reflux::InterfaceFluxRegister;
use eb_redist::redist::{KappaNormalizer, RedistStencil, monotone_neighbors};
use eb_redist::{
    CutCellGeometry, EbGeometry, LevelState, MassReweightOrder, RedistConfig, RedistError, VofId,
};

fn approx_eq(a: f64, b: f64, tol: f64) -> bool {
    (a - b).abs() <= tol
}

fn level0(geom: &CutCellGeometry) -> LevelLayout {
    LevelLayout::single(TopologyId { level: 0, generation: 0 }, geom.domain(), None)
}

fn five_cell_row() -> CutCellGeometry {
    CutCellGeometry::from_kappa(5, 1, vec![1.0, 1.0, 0.25, 1.0, 1.0])
}

/// Coarse 4x4 / fine 8x8; fine cell (2,4) is solid so coarse (1,2) is cut
/// (kappa 0.75). The fine patch covers coarse columns 2..4.
fn two_level(ncomp: usize) -> EbHierarchy {
    let mut k = vec![1.0; 64];
    k[4 * 8 + 2] = 0.0;
    let fine = CutCellGeometry::from_kappa(8, 8, k);
    let coarse = fine.coarsen(2);
    let mut h = EbHierarchy::single_level(Box::new(coarse), 1.0, ncomp);
    h.add_level(Box::new(fine), 2, &[(Rect2i::new(4, 0, 4, 8), 0)]).unwrap();
    h
}

fn run_step<F>(o: &mut RefluxRedistOrchestrator, h: &mut EbHierarchy, incr: F)
where
    F: FnOnce(&mut RefluxRedistOrchestrator),
{
    o.begin_step(h).unwrap();
    incr(o);
    for l in 0..o.num_levels() {
        o.finish_advance(l).unwrap();
    }
    o.post_time_step(h, &mut NoReflux).unwrap();
}

#[test]
fn five_cell_row_normalizes_to_uniform_value() {
    let geom = five_cell_row();
    let layout = level0(&geom);
    let mut q = LevelState::new(&geom, &layout, 1);
    let kq = [2.0, 2.0, 0.5, 2.0, 2.0];
    q.fill_with(|v, _| kq[v.iv[0]]);

    KappaNormalizer::new(&geom, &layout, 1).normalize_all(&mut q).unwrap();

    for i in 0..5 {
        assert!(approx_eq(q.get(VofId::single(i, 0), 0).unwrap(), 2.0, 1e-14));
    }
}

#[test]
fn normalization_is_identity_away_from_the_boundary() {
    let geom = CutCellGeometry::from_level_set(16, 16, 1.0, 4, |x, y| {
        (x - 8.0).powi(2) + (y - 8.0).powi(2) > 9.0
    });
    let layout = level0(&geom);
    let field = |v: VofId, _| (v.iv[0] as f64 * 0.37).sin() + v.iv[1] as f64;
    let mut q = LevelState::new(&geom, &layout, 1);
    q.fill_with(field);
    let mut before = LevelState::new(&geom, &layout, 1);
    before.fill_with(field);

    // kappa * Q, then normalize back
    q.scale_by_kappa(0..1).unwrap();
    KappaNormalizer::new(&geom, &layout, 1).normalize_all(&mut q).unwrap();

    let mut checked = 0;
    for (vof, k, vals) in q.iter() {
        let regular_nbhd = k == 1.0
            && monotone_neighbors(&geom, vof, 1)
                .iter()
                .all(|&d| geom.volume_fraction(d) == 1.0);
        if regular_nbhd {
            assert_eq!(vals[0], before.get(vof, 0).unwrap(), "{vof:?}");
            checked += 1;
        }
    }
    assert!(checked > 100);
}

#[test]
fn stencil_weights_sum_to_one() {
    let geom = CutCellGeometry::from_level_set(24, 24, 1.0, 6, |x, y| {
        let r = ((x - 12.0).powi(2) + (y - 12.0).powi(2)).sqrt();
        r > 5.0 && y > 0.3 * x
    });
    let layout = level0(&geom);
    for radius in 1..=3 {
        let st = RedistStencil::new(&geom, &layout, radius).unwrap();
        for (vof, s) in st.iter() {
            assert!(approx_eq(s.weight_sum(), 1.0, 1e-10), "{vof:?} radius {radius}");
        }
    }
}

#[test]
fn monotone_paths_do_not_cross_an_l_shaped_wall() {
    // Thin L wall with its corner at the node (1,1): x = 1 for j >= 1 and
    // y = 1 for i >= 1. (0,0) and (1,1) are diagonal neighbours on opposite
    // arms of the wall.
    let mut geom = CutCellGeometry::from_kappa(4, 4, {
        let mut k = vec![1.0; 16];
        k[0] = 0.6;
        k[5] = 0.6;
        k
    });
    for j in 1..4 {
        geom.set_aperture([0, j], [1, j], 0.0);
    }
    for i in 1..4 {
        geom.set_aperture([i, 0], [i, 1], 0.0);
    }

    for radius in 1..=3 {
        let from_outer = monotone_neighbors(&geom, VofId::single(0, 0), radius);
        assert!(!from_outer.contains(&VofId::single(1, 1)), "radius {radius}");
        assert!(from_outer.contains(&VofId::single(1, 0)));
        assert!(from_outer.contains(&VofId::single(0, 1)));

        let from_inner = monotone_neighbors(&geom, VofId::single(1, 1), radius);
        assert!(!from_inner.contains(&VofId::single(0, 0)));
        assert!(from_inner.contains(&VofId::single(2, 2)));
    }
}

#[test]
fn a_path_that_turns_back_is_not_monotone() {
    // (0,0) | (1,0) walled off; (0,0) -> (0,1) -> (1,1) -> (1,0) would need
    // the y offset to shrink again.
    let mut geom = CutCellGeometry::regular(2, 2);
    geom.set_aperture([0, 0], [1, 0], 0.0);
    let n = monotone_neighbors(&geom, VofId::single(0, 0), 2);
    assert_eq!(n, vec![VofId::single(0, 1), VofId::single(1, 1)]);
}

#[test]
fn single_level_redistribution_conserves_across_workers() {
    let geom = CutCellGeometry::from_level_set(16, 8, 0.5, 4, |x, y| {
        (x - 4.0).powi(2) + (y - 2.0).powi(2) > 1.2
    });
    let rects = [(Rect2i::new(0, 0, 8, 8), 0), (Rect2i::new(8, 0, 8, 8), 1)];
    let mut h = EbHierarchy::new(Box::new(geom), 0.5, 2, &rects);
    h.level_mut(0).state.fill_with(|v, c| 1.0 + (v.iv[0] + c) as f64 * 0.1);
    let mut o = RefluxRedistOrchestrator::new(RedistConfig::new(2).with_radius(2), &h).unwrap();

    let cut: Vec<VofId> =
        o.level_redistribution(0).stencil().unwrap().iter().map(|(v, _)| *v).collect();
    assert!(cut.len() > 4);

    let before = [h.conserved_total(0), h.conserved_total(1)];
    let mut sum = [0.0, 0.0];
    run_step(&mut o, &mut h, |o| {
        for (n, &v) in cut.iter().enumerate() {
            let d = [0.3 * (n as f64).cos(), -0.05 * n as f64];
            sum[0] += d[0];
            sum[1] += d[1];
            o.increment(0, v, &d).unwrap();
        }
    });
    for c in 0..2 {
        let expect = before[c] + sum[c] * 0.25;
        let got = h.conserved_total(c);
        let tol = 1e-10 * expect.abs().max(1.0);
        assert!(approx_eq(got, expect, tol), "comp {c}: {got} vs {expect}");
    }
}

#[test]
fn fine_to_coarse_scales_by_refinement_volume() {
    // Fine row pair whose cut cells (3,0) and (3,1) only see the cells just
    // outside the fine patch, which both coarsen to coarse (2,0).
    let mut k = vec![1.0; 16];
    k[3] = 0.5;
    k[8 + 3] = 0.5;
    let mut fine = CutCellGeometry::from_kappa(8, 2, k);
    fine.set_aperture([2, 0], [3, 0], 0.0);
    fine.set_aperture([2, 1], [3, 1], 0.0);
    fine.set_aperture([3, 0], [3, 1], 0.0);
    let coarse = fine.coarsen(2);

    let mut h = EbHierarchy::single_level(Box::new(coarse), 1.0, 1);
    h.add_level(Box::new(fine), 2, &[(Rect2i::new(0, 0, 4, 2), 0)]).unwrap();
    let mut o = RefluxRedistOrchestrator::new(RedistConfig::new(1), &h).unwrap();

    let v = 0.8;
    let n = 2.0;
    let before = h.conserved_total(0);
    run_step(&mut o, &mut h, |o| {
        o.increment(1, VofId::single(3, 0), &[v]).unwrap();
        o.increment(1, VofId::single(3, 1), &[v]).unwrap();
    });

    let coarse_incr = h.level(0).state.get(VofId::single(2, 0), 0).unwrap();
    assert!(approx_eq(coarse_incr, v * n / 4.0, 1e-14));
    assert!(approx_eq(h.conserved_total(0), before + n * v * 0.25, 1e-14));
    assert_eq!(o.phase(0), LevelPhase::Done);
    assert_eq!(o.phase(1), LevelPhase::Done);
}

#[test]
fn coarse_to_fine_spreads_over_the_covered_fine_cells() {
    let mut h = two_level(1);
    let mut o = RefluxRedistOrchestrator::new(RedistConfig::new(1), &h).unwrap();
    let before = h.conserved_total(0);

    run_step(&mut o, &mut h, |o| {
        o.increment(0, VofId::single(1, 2), &[1.0]).unwrap();
    });

    // eight neighbours of weight 1/8; coarse (2,2) is covered and each of its
    // four fine cells gets (1/8)·4/4 per unit volume
    for iv in Rect2i::new(4, 4, 2, 2).cells() {
        let q = h.level(1).state.get(VofId::new(iv, 0), 0).unwrap();
        assert!(approx_eq(q, 0.125, 1e-14), "{iv:?}");
    }
    assert!(approx_eq(h.level(0).state.get(VofId::single(2, 2), 0).unwrap(), 0.125, 1e-14));
    assert!(approx_eq(h.level(0).state.get(VofId::single(0, 2), 0).unwrap(), 0.125, 1e-14));
    assert!(approx_eq(h.conserved_total(0), before + 1.0, 1e-12));
}

#[test]
fn fine_to_coarse_scales_by_refinement_volume_at_ratio_four() {
    // Cut cells (7,j) are walled off from the rest of the fine patch and only
    // reach fine column 8, which coarsens to coarse (2,0).
    let mut k = vec![1.0; 64];
    for j in 0..4 {
        k[j * 16 + 7] = 0.5;
    }
    let mut fine = CutCellGeometry::from_kappa(16, 4, k);
    for j in 0..4 {
        fine.set_aperture([6, j], [7, j], 0.0);
    }
    for j in 0..3 {
        fine.set_aperture([7, j], [7, j + 1], 0.0);
    }
    let coarse = fine.coarsen(4);

    let mut h = EbHierarchy::single_level(Box::new(coarse), 1.0, 1);
    h.add_level(Box::new(fine), 4, &[(Rect2i::new(0, 0, 8, 4), 0)]).unwrap();
    let mut o = RefluxRedistOrchestrator::new(RedistConfig::new(1), &h).unwrap();

    let v = 0.8;
    let n = 4.0;
    let before = h.conserved_total(0);
    run_step(&mut o, &mut h, |o| {
        for j in 0..4 {
            o.increment(1, VofId::single(7, j), &[v]).unwrap();
        }
    });

    // r^D = 16
    let coarse_incr = h.level(0).state.get(VofId::single(2, 0), 0).unwrap();
    assert!(approx_eq(coarse_incr, v * n / 16.0, 1e-14), "{coarse_incr}");
    assert!(approx_eq(h.conserved_total(0), before + n * v / 16.0, 1e-14));
}

#[test]
fn coarse_to_fine_spreads_over_the_covered_fine_cells_at_ratio_four() {
    // Coarse 4x4 / fine 16x16; fine cell (4,8) is solid so coarse (1,2) is
    // cut. The fine patch covers coarse columns 2..4.
    let mut k = vec![1.0; 256];
    k[8 * 16 + 4] = 0.0;
    let fine = CutCellGeometry::from_kappa(16, 16, k);
    let coarse = fine.coarsen(4);
    let mut h = EbHierarchy::single_level(Box::new(coarse), 1.0, 1);
    h.add_level(Box::new(fine), 4, &[(Rect2i::new(8, 0, 8, 16), 0)]).unwrap();
    let mut o = RefluxRedistOrchestrator::new(RedistConfig::new(1), &h).unwrap();
    let before = h.conserved_total(0);

    run_step(&mut o, &mut h, |o| {
        o.increment(0, VofId::single(1, 2), &[1.0]).unwrap();
    });

    // coarse (2,2) gets 1/8; its sixteen fine cells each get (1/8)·16/16
    for iv in Rect2i::new(8, 8, 4, 4).cells() {
        let q = h.level(1).state.get(VofId::new(iv, 0), 0).unwrap();
        assert!(approx_eq(q, 0.125, 1e-14), "{iv:?}: {q}");
    }
    assert_eq!(h.level(1).state.get(VofId::single(12, 8), 0), Some(0.0));
    assert!(approx_eq(h.level(0).state.get(VofId::single(2, 2), 0).unwrap(), 0.125, 1e-14));
    assert!(approx_eq(h.conserved_total(0), before + 1.0, 1e-12));
}

#[test]
fn split_coarse_cell_sends_corrections_to_its_own_fine_region() {
    // Coarse cell 1 holds two regions, one open to each side; on the fine
    // level a wall runs down its middle.
    let mut coarse = CutCellGeometry::from_kappa(3, 1, vec![0.5, 1.0, 0.5]);
    coarse.split_cell(
        [1, 0],
        &[0.5, 0.5],
        &[(0, VofId::single(0, 0), 0.5), (1, VofId::single(2, 0), 0.5)],
    );
    let mut fine = CutCellGeometry::regular(6, 2);
    fine.set_aperture([2, 0], [3, 0], 0.0);
    fine.set_aperture([2, 1], [3, 1], 0.0);

    let mut h = EbHierarchy::single_level(Box::new(coarse), 1.0, 1);
    h.add_level(Box::new(fine), 2, &[(Rect2i::new(2, 0, 2, 2), 0)]).unwrap();
    let mut o = RefluxRedistOrchestrator::new(RedistConfig::new(1), &h).unwrap();
    let before = h.conserved_total(0);

    run_step(&mut o, &mut h, |o| {
        o.increment(0, VofId::single(0, 0), &[1.0]).unwrap();
    });

    // all of it lands left of the wall: 1·r^D/Σκ_f = 2 per fine cell
    let fine_q = |i, j| h.level(1).state.get(VofId::single(i, j), 0).unwrap();
    for j in 0..2 {
        assert!(approx_eq(fine_q(2, j), 2.0, 1e-14));
        assert_eq!(fine_q(3, j), 0.0);
    }
    let coarse_q = |sub| h.level(0).state.get(VofId::new([1, 0], sub), 0).unwrap();
    assert!(approx_eq(coarse_q(0), 2.0, 1e-14));
    assert_eq!(coarse_q(1), 0.0);
    assert!(approx_eq(h.conserved_total(0), before + 1.0, 1e-12));
}

#[test]
fn coarse_corrections_follow_a_fine_level_created_mid_step() {
    let mut k = vec![1.0; 64];
    k[4 * 8 + 2] = 0.0;
    let fine = CutCellGeometry::from_kappa(8, 8, k);
    let coarse = fine.coarsen(2);
    let mut h = EbHierarchy::single_level(Box::new(coarse), 1.0, 1);
    let mut o = RefluxRedistOrchestrator::new(RedistConfig::new(1), &h).unwrap();

    o.begin_step(&h).unwrap();
    o.increment(0, VofId::single(1, 2), &[1.0]).unwrap();

    let l = o
        .add_level(&mut h, Box::new(fine), 2, &[(Rect2i::new(4, 0, 4, 8), 0)])
        .unwrap();
    assert_eq!(o.phase(l), LevelPhase::Advancing);
    o.sync_with_fine_level(&h, 0).unwrap();

    let before = h.conserved_total(0);
    o.finish_advance(0).unwrap();
    o.finish_advance(1).unwrap();
    o.post_time_step(&mut h, &mut NoReflux).unwrap();

    let q = h.level(1).state.get(VofId::single(5, 5), 0).unwrap();
    assert!(approx_eq(q, 0.125, 1e-14));
    assert!(approx_eq(h.conserved_total(0), before + 1.0, 1e-12));
}

#[test]
fn regrid_without_resync_is_refused() {
    let mut h = two_level(1);
    let mut o = RefluxRedistOrchestrator::new(RedistConfig::new(1), &h).unwrap();

    o.regrid_level(&mut h, 1, &[(Rect2i::new(4, 2, 4, 4), 0)]).unwrap();
    assert!(matches!(o.begin_step(&h), Err(RedistError::UndefinedRegister { .. })));

    o.sync_with_fine_level(&h, 0).unwrap();
    run_step(&mut o, &mut h, |o| {
        o.increment(0, VofId::single(1, 2), &[1.0]).unwrap();
    });
}

#[test]
fn hierarchy_changed_behind_the_registers_is_a_topology_mismatch() {
    let mut h = two_level(1);
    let mut o = RefluxRedistOrchestrator::new(RedistConfig::new(1), &h).unwrap();
    o.begin_step(&h).unwrap();
    o.increment(0, VofId::single(1, 2), &[1.0]).unwrap();
    o.finish_advance(0).unwrap();
    o.finish_advance(1).unwrap();

    h.replace_patches_preserve_overlap(1, &[(Rect2i::new(4, 4, 4, 4), 0)]).unwrap();
    assert!(matches!(
        o.post_time_step(&mut h, &mut NoReflux),
        Err(RedistError::TopologyMismatch { level: 0, .. })
    ));
}

#[test]
fn regrid_moves_orphaned_corrections_to_the_new_owners() {
    let mut k = vec![1.0; 64];
    k[5 * 8 + 5] = 0.5;
    let fine = CutCellGeometry::from_kappa(8, 8, k);
    let coarse = fine.coarsen(2);
    let mut h = EbHierarchy::single_level(Box::new(coarse), 1.0, 1);
    h.add_level(Box::new(fine), 2, &[(Rect2i::new(4, 4, 4, 4), 0)]).unwrap();
    let mut o = RefluxRedistOrchestrator::new(RedistConfig::new(1), &h).unwrap();

    o.begin_step(&h).unwrap();
    o.increment(1, VofId::single(5, 5), &[0.9]).unwrap();
    // the source leaves the layout; three of its eight neighbours stay
    o.regrid_level(&mut h, 1, &[(Rect2i::new(6, 4, 2, 4), 1)]).unwrap();

    for j in 4..7 {
        let q = h.level(1).state.get(VofId::single(6, j), 0).unwrap();
        assert!(approx_eq(q, 0.3, 1e-14), "(6,{j}): {q}");
    }
    assert_eq!(h.level(1).state.get(VofId::single(6, 7), 0), Some(0.0));

    o.sync_with_fine_level(&h, 0).unwrap();
    o.finish_advance(0).unwrap();
    o.finish_advance(1).unwrap();
    o.post_time_step(&mut h, &mut NoReflux).unwrap();
    assert!(o.level_redistribution(1).is_empty());
}

#[test]
fn regrid_that_strands_a_correction_is_a_topology_mismatch() {
    let mut k = vec![1.0; 64];
    k[5 * 8 + 5] = 0.5;
    let fine = CutCellGeometry::from_kappa(8, 8, k);
    let coarse = fine.coarsen(2);
    let mut h = EbHierarchy::single_level(Box::new(coarse), 1.0, 1);
    h.add_level(Box::new(fine), 2, &[(Rect2i::new(4, 4, 4, 4), 0)]).unwrap();
    let mut o = RefluxRedistOrchestrator::new(RedistConfig::new(1), &h).unwrap();

    o.begin_step(&h).unwrap();
    o.increment(1, VofId::single(5, 5), &[0.9]).unwrap();
    // none of (4..7, 4..7) survives
    assert!(matches!(
        o.regrid_level(&mut h, 1, &[(Rect2i::new(4, 0, 4, 4), 0)]),
        Err(RedistError::TopologyMismatch { level: 1, .. })
    ));
}

#[test]
fn mass_weights_before_redistribution() {
    let geom = five_cell_row();
    let mut h = EbHierarchy::single_level(Box::new(geom), 1.0, 2);
    let rho = [1.0, 3.0, 2.0, 1.0, 1.0];
    h.level_mut(0).state.fill_with(|v, c| if c == 0 { rho[v.iv[0]] } else { 0.0 });
    let cfg = RedistConfig::new(2).with_mass_weighting(0, MassReweightOrder::BeforeRedistribution);
    let mut o = RefluxRedistOrchestrator::new(cfg, &h).unwrap();

    run_step(&mut o, &mut h, |o| {
        o.increment(0, VofId::single(2, 0), &[0.0, 1.0]).unwrap();
    });
    let s = &h.level(0).state;
    assert!(approx_eq(s.get(VofId::single(1, 0), 1).unwrap(), 0.75, 1e-14));
    assert!(approx_eq(s.get(VofId::single(3, 0), 1).unwrap(), 0.25, 1e-14));

    // weights are back to kappa for the next step
    let st = o.level_redistribution(0).stencil().unwrap();
    let w = st.get(VofId::single(2, 0)).unwrap().entries();
    assert!(approx_eq(w[0].weight, 0.5, 1e-15));
}

#[test]
fn mass_weights_after_density_use_the_updated_density() {
    let geom = five_cell_row();
    let mut h = EbHierarchy::single_level(Box::new(geom), 1.0, 2);
    let rho = [1.0, 3.0, 2.0, 1.0, 1.0];
    h.level_mut(0).state.fill_with(|v, c| if c == 0 { rho[v.iv[0]] } else { 0.0 });
    let cfg = RedistConfig::new(2).with_mass_weighting(0, MassReweightOrder::AfterDensity);
    let mut o = RefluxRedistOrchestrator::new(cfg, &h).unwrap();

    run_step(&mut o, &mut h, |o| {
        o.increment(0, VofId::single(2, 0), &[2.0, 3.0]).unwrap();
    });
    let s = &h.level(0).state;
    // density split by kappa: 3+1 and 1+1, then momentum by 4:2
    assert!(approx_eq(s.get(VofId::single(1, 0), 0).unwrap(), 4.0, 1e-14));
    assert!(approx_eq(s.get(VofId::single(3, 0), 0).unwrap(), 2.0, 1e-14));
    assert!(approx_eq(s.get(VofId::single(1, 0), 1).unwrap(), 2.0, 1e-14));
    assert!(approx_eq(s.get(VofId::single(3, 0), 1).unwrap(), 1.0, 1e-14));
}

#[test]
fn multi_valued_cell_redistributes_per_region() {
    let mut geom = CutCellGeometry::regular(3, 1);
    geom.split_cell(
        [1, 0],
        &[0.3, 0.2],
        &[(0, VofId::single(0, 0), 0.5), (1, VofId::single(2, 0), 0.4)],
    );
    let mut h = EbHierarchy::single_level(Box::new(geom), 1.0, 1);
    let mut o = RefluxRedistOrchestrator::new(RedistConfig::new(1), &h).unwrap();

    run_step(&mut o, &mut h, |o| {
        o.increment(0, VofId::new([1, 0], 0), &[1.0]).unwrap();
        o.increment(0, VofId::new([1, 0], 1), &[-0.5]).unwrap();
    });
    let s = &h.level(0).state;
    assert_eq!(s.get(VofId::single(0, 0), 0), Some(1.0));
    assert_eq!(s.get(VofId::single(2, 0), 0), Some(-0.5));
    assert_eq!(s.get(VofId::new([1, 0], 0), 0), Some(0.0));
}

#[test]
fn reflux_runs_between_the_level_and_cross_level_steps() {
    let mut h = two_level(1);
    let mut o = RefluxRedistOrchestrator::new(RedistConfig::new(1), &h).unwrap();
    let mut flux = InterfaceFluxRegister::new(1);
    flux.increment_coarse(0, VofId::single(1, 1), &[0.2]).unwrap();
    flux.increment_fine(0, VofId::single(1, 1), &[0.5]).unwrap();

    o.begin_step(&h).unwrap();
    o.finish_advance(0).unwrap();
    o.finish_advance(1).unwrap();
    o.post_time_step(&mut h, &mut flux).unwrap();

    assert!(approx_eq(h.level(0).state.get(VofId::single(1, 1), 0).unwrap(), 0.3, 1e-15));
    assert!(flux.is_empty());
}

#[test]
fn config_round_trips_through_a_file() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = RedistConfig::new(4)
        .with_radius(2)
        .with_mass_weighting(0, MassReweightOrder::AfterDensity)
        .without_reflux();
    cfg.write_to_dir(dir.path()).unwrap();
    let back = RedistConfig::from_file(&dir.path().join("config.json")).unwrap();
    assert_eq!(back, cfg);
}
