//! Property-based tests for the index components.
//!
//! Invariants checked regardless of input:
//! - Distance kernel behaves like a squared metric.
//! - Grid cells stay inside the declared grid.
//! - Search output is sorted and bounded by `k`.
//! - Growing the search list only grows the result set.

use std::collections::HashSet;
use std::sync::OnceLock;

use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use stratum::{squared_l2, BuildParams, GridMap, Index, IndexBuilder, PointStore};

fn shared_index() -> &'static Index<u8> {
    static INDEX: OnceLock<Index<u8>> = OnceLock::new();
    INDEX.get_or_init(|| {
        let mut rng = StdRng::seed_from_u64(97);
        let rows: Vec<Vec<u8>> = (0..500)
            .map(|_| vec![rng.random::<u8>(), rng.random::<u8>()])
            .collect();
        let points = PointStore::from_rows(&rows).expect("valid rows");
        let mut params = BuildParams::grid_2d();
        params.num_threads = 1;
        IndexBuilder::new(points, params)
            .expect("valid config")
            .build()
            .expect("build succeeds")
    })
}

mod distance_props {
    use super::*;

    prop_compose! {
        fn arb_point(dim: usize)(coords in prop::collection::vec(any::<u8>(), dim)) -> Vec<u8> {
            coords
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn non_negative(a in arb_point(3), b in arb_point(3)) {
            prop_assert!(squared_l2(&a, &b) >= 0.0);
        }

        #[test]
        fn symmetric(a in arb_point(3), b in arb_point(3)) {
            prop_assert_eq!(squared_l2(&a, &b), squared_l2(&b, &a));
        }

        #[test]
        fn zero_iff_identical(a in arb_point(3)) {
            prop_assert_eq!(squared_l2(&a, &a), 0.0);
        }
    }
}

mod grid_props {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn cells_stay_inside_the_grid(
            x in any::<u8>(),
            y in any::<u8>(),
            grid_size in 1u32..64,
            cell_size in 1u32..64,
        ) {
            let grid = GridMap::new(grid_size, cell_size, 2).unwrap();
            let cell = grid.cell(&[x, y]);
            prop_assert!(cell[0] < grid_size);
            prop_assert!(cell[1] < grid_size);
        }

        #[test]
        fn stratum_is_symmetric(
            p in prop::collection::vec(any::<u8>(), 2),
            q in prop::collection::vec(any::<u8>(), 2),
        ) {
            let grid = GridMap::new(32, 8, 2).unwrap();
            prop_assert_eq!(grid.stratum_of(&p, &q), grid.stratum_of(&q, &p));
        }
    }
}

mod search_props {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn results_are_sorted_and_bounded(
            x in any::<u8>(),
            y in any::<u8>(),
            k in 1usize..12,
        ) {
            let index = shared_index();
            let out = index.search(&[x, y], k, 50).unwrap();
            prop_assert!(out.results.len() <= k);
            for pair in out.results.windows(2) {
                prop_assert!(pair[0].dist <= pair[1].dist);
            }
        }

        #[test]
        fn larger_lists_only_add_results(
            x in any::<u8>(),
            y in any::<u8>(),
            l in 24usize..48,
            extra in 0usize..64,
        ) {
            let index = shared_index();
            let k = 5;
            let narrow: HashSet<u32> = index
                .search(&[x, y], k, l)
                .unwrap()
                .results
                .iter()
                .map(|c| c.id)
                .collect();
            let wide: HashSet<u32> = index
                .search(&[x, y], k, l + extra)
                .unwrap()
                .results
                .iter()
                .map(|c| c.id)
                .collect();
            prop_assert!(narrow.is_subset(&wide), "narrow {narrow:?} wide {wide:?}");
        }

        #[test]
        fn k_zero_returns_nothing(x in any::<u8>(), y in any::<u8>()) {
            let index = shared_index();
            let out = index.search(&[x, y], 0, 16).unwrap();
            prop_assert!(out.results.is_empty());
            prop_assert_eq!(out.stats.hops, 0);
            prop_assert_eq!(out.stats.comparisons, 1); // the entry seed
        }
    }
}
