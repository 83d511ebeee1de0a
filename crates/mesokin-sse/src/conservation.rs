//! Stoichiometric conservation analysis.
//!
//! A pivoted LU elimination of the transposed stoichiometry matrix
//! partitions the species into independent and dependent sets and
//! produces the conservation matrix, the reduced stoichiometry and the
//! link matrices:
//!
//! * permutation `P` reordering species, independent first,
//! * `S_ind`, the first `n_ind` rows of `P * S`,
//! * `Gamma = [-L0 | I]` with `Gamma * P * S = 0`,
//! * `L = [I; L0]` with `P * S = L * S_ind`.

use mesokin_core::{MesokinError, Result};
use ndarray::{Array1, Array2};

/// Result of the conservation analysis of one stoichiometry matrix.
#[derive(Debug, Clone)]
pub struct ConservationData {
    /// `permutation[i]` is the original species index at permuted
    /// position `i`; positions `0..num_independent` are the independent
    /// species.
    pub permutation: Vec<usize>,
    pub num_independent: usize,
    pub num_dependent: usize,
    /// Reduced stoichiometry, `num_independent x num_reactions`.
    pub reduced_stoichiometry: Array2<f64>,
    /// Conservation matrix in the permuted species basis,
    /// `num_dependent x num_species`.
    pub conservation_matrix: Array2<f64>,
    /// `L0`, `num_dependent x num_independent`.
    pub link_zero: Array2<f64>,
    /// `L = [I; L0]`, `num_species x num_independent`.
    pub link: Array2<f64>,
}

impl ConservationData {
    /// Run the analysis on a species-by-reactions stoichiometry matrix.
    pub fn analyze(stoichiometry: &Array2<f64>) -> Result<Self> {
        let num_species = stoichiometry.nrows();
        let num_reactions = stoichiometry.ncols();
        if num_species == 0 {
            return Err(MesokinError::SemanticError(
                "conservation analysis of a model without species".to_string(),
            ));
        }

        // full-pivot elimination of S^T; its column permutation is the
        // species reordering
        let mut a = stoichiometry.t().to_owned();
        let mut col_perm: Vec<usize> = (0..num_species).collect();
        let scale = a.iter().fold(0.0f64, |m, v| m.max(v.abs()));
        let eps = 1e-10 * scale.max(1.0);

        let steps = num_reactions.min(num_species);
        let mut rank = 0;
        for step in 0..steps {
            // locate the largest remaining pivot
            let mut pivot = (step, step);
            let mut best = 0.0;
            for i in step..num_reactions {
                for j in step..num_species {
                    let v = a[[i, j]].abs();
                    if v > best {
                        best = v;
                        pivot = (i, j);
                    }
                }
            }
            if best <= eps {
                break;
            }
            if pivot.0 != step {
                swap_rows(&mut a, step, pivot.0);
            }
            if pivot.1 != step {
                swap_cols(&mut a, step, pivot.1);
                col_perm.swap(step, pivot.1);
            }
            for i in (step + 1)..num_reactions {
                let factor = a[[i, step]] / a[[step, step]];
                if factor != 0.0 {
                    for j in step..num_species {
                        a[[i, j]] -= factor * a[[step, j]];
                    }
                }
            }
            rank += 1;
        }

        let num_independent = rank;
        let num_dependent = num_species - rank;

        // kernel of S^T from the triangular factor: for each free
        // column f, back-substitute U11 * y = -U12[:, f]
        let mut kernel = Array2::zeros((num_species, num_dependent));
        for f in 0..num_dependent {
            let free = rank + f;
            kernel[[free, f]] = 1.0;
            for i in (0..rank).rev() {
                let mut acc = a[[i, free]];
                for j in (i + 1)..rank {
                    acc += a[[i, j]] * kernel[[j, f]];
                }
                kernel[[i, f]] = -acc / a[[i, i]];
            }
        }

        // Gamma rows are the kernel vectors; by construction the
        // dependent block is the identity
        let mut conservation_matrix = Array2::zeros((num_dependent, num_species));
        for d in 0..num_dependent {
            for s in 0..num_species {
                conservation_matrix[[d, s]] = kernel[[s, d]];
            }
        }

        let mut link_zero = Array2::zeros((num_dependent, num_independent));
        for d in 0..num_dependent {
            for i in 0..num_independent {
                link_zero[[d, i]] = -conservation_matrix[[d, i]];
            }
        }

        let mut link = Array2::zeros((num_species, num_independent));
        for i in 0..num_independent {
            link[[i, i]] = 1.0;
        }
        for d in 0..num_dependent {
            for i in 0..num_independent {
                link[[num_independent + d, i]] = link_zero[[d, i]];
            }
        }

        // permuted stoichiometry and its independent rows
        let mut permuted = Array2::zeros((num_species, num_reactions));
        for i in 0..num_species {
            for j in 0..num_reactions {
                permuted[[i, j]] = stoichiometry[[col_perm[i], j]];
            }
        }
        let reduced_stoichiometry = permuted
            .slice(ndarray::s![0..num_independent, ..])
            .to_owned();

        let data = Self {
            permutation: col_perm,
            num_independent,
            num_dependent,
            reduced_stoichiometry,
            conservation_matrix,
            link_zero,
            link,
        };
        data.verify(&permuted)?;
        Ok(data)
    }

    /// Apply the species permutation to a vector in model order.
    pub fn permute(&self, values: &[f64]) -> Array1<f64> {
        Array1::from_iter(self.permutation.iter().map(|&i| values[i]))
    }

    /// Invariants `Gamma * P * S = 0` and `P * S = L * S_ind`.
    fn verify(&self, permuted_stoichiometry: &Array2<f64>) -> Result<()> {
        let zero = self.conservation_matrix.dot(permuted_stoichiometry);
        let reconstructed = self.link.dot(&self.reduced_stoichiometry);
        let tol = 1e-8;
        if zero.iter().any(|v| v.abs() > tol)
            || reconstructed
                .iter()
                .zip(permuted_stoichiometry.iter())
                .any(|(a, b)| (a - b).abs() > tol)
        {
            return Err(MesokinError::InternalError(
                "conservation analysis produced inconsistent link matrices".to_string(),
            ));
        }
        Ok(())
    }
}

fn swap_rows(a: &mut Array2<f64>, r1: usize, r2: usize) {
    for j in 0..a.ncols() {
        a.swap([r1, j], [r2, j]);
    }
}

fn swap_cols(a: &mut Array2<f64>, c1: usize, c2: usize) {
    for i in 0..a.nrows() {
        a.swap([i, c1], [i, c2]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesokin_ast::fixtures;

    #[test]
    fn test_michaelis_menten_conservation() {
        let model = fixtures::michaelis_menten();
        let s = model.stoichiometry_matrix().unwrap();
        let data = ConservationData::analyze(&s).unwrap();

        // two conserved groups: E + ES and S + ES + P
        assert_eq!(data.num_independent, 2);
        assert_eq!(data.num_dependent, 2);
        assert_eq!(data.reduced_stoichiometry.shape(), &[2, 3]);

        // Gamma * P * S = 0
        let mut permuted = Array2::zeros((4, 3));
        for i in 0..4 {
            for j in 0..3 {
                permuted[[i, j]] = s[[data.permutation[i], j]];
            }
        }
        let zero = data.conservation_matrix.dot(&permuted);
        assert!(zero.iter().all(|v| v.abs() < 1e-12));
    }

    #[test]
    fn test_birth_death_no_conservation() {
        let model = fixtures::birth_death(10.0, 1.0, 0.0);
        let s = model.stoichiometry_matrix().unwrap();
        let data = ConservationData::analyze(&s).unwrap();
        assert_eq!(data.num_independent, 1);
        assert_eq!(data.num_dependent, 0);
    }

    #[test]
    fn test_gamma_has_identity_dependent_block() {
        let model = fixtures::michaelis_menten();
        let s = model.stoichiometry_matrix().unwrap();
        let data = ConservationData::analyze(&s).unwrap();
        // Gamma = [-L0 | I]: each conservation law carries exactly one
        // dependent species with unit coefficient
        for d in 0..data.num_dependent {
            for e in 0..data.num_dependent {
                let expected = if d == e { 1.0 } else { 0.0 };
                let got = data.conservation_matrix[[d, data.num_independent + e]];
                assert!((got - expected).abs() < 1e-12);
            }
        }
        // and the independent block is -L0
        for d in 0..data.num_dependent {
            for i in 0..data.num_independent {
                let got = data.conservation_matrix[[d, i]];
                assert!((got + data.link_zero[[d, i]]).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_dependent_reconstruction_along_dynamics() {
        // the dependent rows of P*S equal L0 * S_ind, so dependent
        // amounts follow x_dep(t) = cycles + L0 * x_ind(t)
        let model = fixtures::michaelis_menten();
        let s = model.stoichiometry_matrix().unwrap();
        let data = ConservationData::analyze(&s).unwrap();
        for d in 0..data.num_dependent {
            for j in 0..s.ncols() {
                let dep_row: f64 = (0..data.num_independent)
                    .map(|i| data.link_zero[[d, i]] * data.reduced_stoichiometry[[i, j]])
                    .sum();
                let direct = s[[data.permutation[data.num_independent + d], j]];
                assert!((dep_row - direct).abs() < 1e-12);
            }
        }
    }
}
