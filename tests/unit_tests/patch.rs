use matrixcompare::assert_scalar_eq;
use nalgebra::{DVector, Point3};
use recoup::basis::MonomialBasis;
use recoup::patch::{accumulate_element, merge_maps, ElementContribution, PatchMap};

#[test]
fn single_sample_accumulation_is_a_rank_one_update() {
    let basis = MonomialBasis::new(2, 1).unwrap();
    let q = basis.num_terms();
    let mut contribution = ElementContribution::zeros(q);
    let mut buffer = DVector::zeros(q);

    let x = Point3::new(2.0, 3.0, 0.0);
    accumulate_element(&basis, &[0.5], &[x], &[7.0], &mut buffer, &mut contribution);

    // p = (1, x, y) up to ordering; check via the exponent table.
    let p = basis.evaluate(&x);
    for i in 0..q {
        assert_scalar_eq!(contribution.vector()[i], 0.5 * 7.0 * p[i], comp = abs, tol = 1e-14);
        for j in 0..q {
            assert_scalar_eq!(contribution.matrix()[(i, j)], 0.5 * p[i] * p[j], comp = abs, tol = 1e-14);
        }
    }
}

#[test]
fn accumulated_matrix_is_symmetric() {
    let basis = MonomialBasis::new(2, 2).unwrap();
    let q = basis.num_terms();
    let mut contribution = ElementContribution::zeros(q);
    let mut buffer = DVector::zeros(q);

    let points = [
        Point3::new(0.1, 0.4, 0.0),
        Point3::new(0.7, 0.2, 0.0),
        Point3::new(0.3, 0.9, 0.0),
    ];
    let weights = [0.2, 0.5, 0.3];
    let samples = [1.0, -2.0, 0.5];
    accumulate_element(&basis, &weights, &points, &samples, &mut buffer, &mut contribution);

    let a = contribution.matrix();
    for i in 0..q {
        for j in 0..q {
            assert_scalar_eq!(a[(i, j)], a[(j, i)], comp = abs, tol = 1e-14);
        }
    }
}

#[test]
#[should_panic(expected = "at least one quadrature point")]
fn empty_quadrature_rule_is_rejected() {
    let basis = MonomialBasis::new(2, 1).unwrap();
    let mut contribution = ElementContribution::zeros(basis.num_terms());
    let mut buffer = DVector::zeros(basis.num_terms());
    accumulate_element(&basis, &[], &[], &[], &mut buffer, &mut contribution);
}

#[test]
fn merging_maps_sums_shared_elements() {
    let basis = MonomialBasis::new(1, 1).unwrap();
    let q = basis.num_terms();

    let make_map = |element, x: f64, value: f64| {
        let mut buffer = DVector::zeros(q);
        let mut contribution = ElementContribution::zeros(q);
        accumulate_element(
            &basis,
            &[1.0],
            &[Point3::new(x, 0.0, 0.0)],
            &[value],
            &mut buffer,
            &mut contribution,
        );
        let mut map = PatchMap::default();
        map.insert(element, contribution);
        map
    };

    let mut joined = make_map(0, 0.5, 1.0);
    merge_maps(&mut joined, make_map(0, 0.25, 2.0));
    merge_maps(&mut joined, make_map(1, 0.75, 3.0));

    assert_eq!(joined.len(), 2);
    // The constant-term entry of b sums w * value over all merged samples.
    let b0 = joined[&0].vector();
    assert_scalar_eq!(b0[0], 1.0 + 2.0, comp = abs, tol = 1e-14);
}
