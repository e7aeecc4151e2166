//! Shape and ordering properties of ensemble scans.

#![allow(non_snake_case)]

use ndarray as nd;
use proptest::prelude::*;
use rand::{ rngs::StdRng, SeedableRng };
use tlf_obe::scan::{
    handle_randomized_ensemble_solution,
    permute,
    restore_permutation,
    ScanAxis,
    ScanRequest,
};

fn axes(lens: &[usize]) -> Vec<ScanAxis> {
    lens.iter().enumerate()
        .map(|(d, &n)| {
            ScanAxis::new([format!("x{d}")], (0..n).map(|k| k as f64).collect())
        })
        .collect()
}

proptest! {
    #[test]
    fn grid_has_one_row_per_point(lens in prop::collection::vec(1usize..5, 1..4)) {
        let request = ScanRequest::outer_product(axes(&lens)).unwrap();
        let N: usize = lens.iter().product();
        prop_assert_eq!(request.len(), N);
        prop_assert_eq!(request.grid.dim(), (N, lens.len()));
        prop_assert_eq!(&request.shape, &lens);
        for coords in request.coordinates() {
            prop_assert_eq!(coords.shape(), lens.as_slice());
        }
        // trajectory outputs reshape back onto the grid
        let values: nd::ArrayD<f64>
            = nd::Array1::from_iter((0..N).map(|k| k as f64)).into_dyn();
        let (_, restored) = handle_randomized_ensemble_solution(&request, &values).unwrap();
        let reshaped = restored.into_shape(nd::IxDyn(&lens)).unwrap();
        prop_assert_eq!(reshaped.shape(), lens.as_slice());
    }

    #[test]
    fn shuffling_is_undone(lens in prop::collection::vec(1usize..5, 1..4), seed in any::<u64>()) {
        let request = ScanRequest::outer_product(axes(&lens)).unwrap();
        let shuffled = request.clone().shuffled(&mut StdRng::seed_from_u64(seed));
        // each trajectory returns its row of the submitted grid
        let values: nd::ArrayD<f64> = shuffled.grid.clone().into_dyn();
        let (grid, restored)
            = handle_randomized_ensemble_solution(&shuffled, &values).unwrap();
        prop_assert_eq!(&grid, &request.grid);
        prop_assert_eq!(restored, request.grid.clone().into_dyn());
    }

    #[test]
    fn restore_inverts_permute(x in prop::collection::vec(any::<i64>(), 1..64), seed in any::<u64>()) {
        use rand::seq::SliceRandom;
        let x = nd::Array1::from(x);
        let mut perm: Vec<usize> = (0..x.len()).collect();
        perm.shuffle(&mut StdRng::seed_from_u64(seed));
        let permuted = permute(&x, &perm);
        for (j, &k) in perm.iter().enumerate() {
            prop_assert_eq!(permuted[j], x[k]);
        }
        prop_assert_eq!(restore_permutation(&permuted, &perm), x);
    }
}
