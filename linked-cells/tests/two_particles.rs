//! A single interacting pair next to a distant particle, computed with every traversal

use linked_cells::*;

const EXTENT: f64 = 4.0;
const CUTOFF: f64 = 1.0;

fn forces(kind: TraversalKind) -> (Vec<[f64; 3]>, usize) {
    forces_with_lj_cutoff(kind, CUTOFF)
}

fn forces_with_lj_cutoff(kind: TraversalKind, lj_cutoff: f64) -> (Vec<[f64; 3]>, usize) {
    let config = GridConfig::builder(CUTOFF)
        .with_lj_cutoff(lj_cutoff)
        .with_traversal(kind)
        .with_num_threads(1)
        .build().unwrap();
    let dd = DomainDecomposition::single([0.0; 3], [EXTENT; 3]).unwrap();
    let lj = LennardJonesProcessor::from_config(&config, 1.0, 1.0).unwrap();
    let mut sim = SimulationBuilder::new(config, dd).build(SingleProcess::new(), lj).unwrap();
    assert!(sim.add_particle(Particle::new(0, 0, [1.5, 1.5, 1.5])));
    assert!(sim.add_particle(Particle::new(1, 0, [2.4, 1.5, 1.5])));
    assert!(sim.add_particle(Particle::new(2, 0, [0.5, 3.5, 0.5])));
    sim.compute_forces().unwrap();
    assert_eq!(sim.tuner().selected(), kind);
    let mut forces = vec![[0.0; 3]; 3];
    sim.grid().for_each_particle(IterateType::All, |p| forces[p.id as usize] = p.f);
    (forces, sim.processor().interactions())
}

#[test]
fn pair_force_matches_analytic_value() {
    let (forces, interactions) = forces(TraversalKind::C08);
    assert_eq!(interactions, 1);
    let r: f64 = 0.9;
    let lj6 = r.powi(-6);
    let expected = 24.0 * (2.0 * lj6 * lj6 - lj6) / r;
    assert!((forces[0][0] + expected).abs() < 1e-9, "Got {:?}, expected {}", forces[0], -expected);
    assert!((forces[1][0] - expected).abs() < 1e-9);
    assert_eq!(forces[0][1], 0.0);
    assert_eq!(forces[2], [0.0; 3]);
}

#[test]
fn all_traversals_agree() {
    let (reference, _) = forces(TraversalKind::Original);
    let mut kinds = vec![TraversalKind::C08, TraversalKind::Sliced];
    if cfg!(feature = "scheduled") {
        kinds.push(TraversalKind::Scheduled);
    }
    for kind in kinds {
        let (forces, interactions) = forces(kind);
        assert_eq!(interactions, 1, "{:?}", kind);
        for (f, f_ref) in forces.iter().zip(&reference) {
            for d in 0..3 {
                assert!((f[d] - f_ref[d]).abs() < 1e-12, "{:?} disagrees with original: {:?} vs. {:?}", kind, f, f_ref);
            }
        }
    }
}

#[test]
fn serial_traversal_is_deterministic() {
    let first = forces(TraversalKind::C08);
    let second = forces(TraversalKind::C08);
    assert_eq!(first, second);
}

#[test]
fn shorter_lj_cutoff_drops_the_pair() {
    for kind in [TraversalKind::Original, TraversalKind::C08, TraversalKind::Sliced] {
        let (forces, interactions) = forces_with_lj_cutoff(kind, 0.85);
        assert_eq!(interactions, 0, "{:?}", kind);
        assert!(forces.iter().all(|f| *f == [0.0; 3]));
    }
}
