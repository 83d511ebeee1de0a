//! The expansion hierarchy: RE, LNA/EMRE and IOS models.
//!
//! Each model owns a flat symbolic update vector over its state layout,
//! all blocks in colexicographic packing:
//!
//! 1. independent-species concentrations,
//! 2. packed LNA covariance,
//! 3. EMRE corrections,
//! 4. packed third central moments (IOS),
//! 5. packed IOS covariance corrections,
//! 6. IOS-EMRE corrections.
//!
//! Construction is purely symbolic and happens once per model; analyses
//! fold constants and compile the result for hot-loop evaluation.

use crate::system::SseSystem;
use mesokin_ast::Model;
use mesokin_core::{
    packed3_index_any, packed3_len, packed_index, packed_len, MesokinError, Result,
};
use mesokin_expr::{Expr, Substitution, Symbol};
use mesokin_trafo::ConstantFolder;
use ndarray::{Array1, Array2};
use std::collections::HashMap;

/// Order of the expansion carried by a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SseLevel {
    /// Deterministic rate equations.
    Re,
    /// Linear noise approximation with EMRE mean corrections.
    Lna,
    /// Inverse-omega-squared corrections on top of LNA/EMRE.
    Ios,
}

/// A fully derived SSE model ready for compilation.
#[derive(Debug, Clone)]
pub struct SseModel {
    system: SseSystem,
    level: SseLevel,
    dim: usize,
    state_symbols: Vec<Symbol>,
    state_index: HashMap<Symbol, usize>,
    update: Vec<Expr>,
}

/// Constant-folded update vector and Jacobian, the handoff to the
/// evaluation engine.
#[derive(Debug, Clone)]
pub struct PreparedSse {
    pub dim: usize,
    pub update: Vec<Expr>,
    pub jacobian: Vec<Vec<Expr>>,
    pub state_index: HashMap<Symbol, usize>,
    pub initial_state: Array1<f64>,
}

/// Reconstructed observables in the original species order.
#[derive(Debug, Clone)]
pub struct FullState {
    pub concentrations: Array1<f64>,
    pub covariance: Option<Array2<f64>>,
    pub emre: Option<Array1<f64>>,
    pub third_moments: Option<Array1<f64>>,
    pub ios_covariance: Option<Array2<f64>>,
    pub ios_emre: Option<Array1<f64>>,
}

impl SseModel {
    /// Rate-equation model.
    pub fn re(model: &Model) -> Result<Self> {
        Self::build(model, SseLevel::Re)
    }

    /// LNA model with EMRE corrections.
    pub fn lna(model: &Model) -> Result<Self> {
        Self::build(model, SseLevel::Lna)
    }

    /// IOS model with third moments and second-order corrections.
    pub fn ios(model: &Model) -> Result<Self> {
        Self::build(model, SseLevel::Ios)
    }

    fn build(input: &Model, level: SseLevel) -> Result<Self> {
        let mut system = SseSystem::new(input)?;
        let n = system.num_independent();
        let dim_cov = packed_len(n);
        let dim_3 = packed3_len(n);

        let dim = match level {
            SseLevel::Re => n,
            SseLevel::Lna => n + dim_cov + n,
            SseLevel::Ios => n + dim_cov + n + dim_3 + dim_cov + n,
        };

        let mut state_symbols: Vec<Symbol> =
            (0..n).map(|i| system.independent_symbol(i)).collect();
        for _ in n..dim {
            state_symbols.push(system.fresh_symbol("sse"));
        }
        let state_index: HashMap<Symbol, usize> = state_symbols
            .iter()
            .enumerate()
            .map(|(i, s)| (*s, i))
            .collect();

        let builder = UpdateBuilder {
            system: &system,
            state_symbols: &state_symbols,
            n,
            dim_cov,
            dim_3,
        };

        let mut update = system.rate_equations().to_vec();
        if level != SseLevel::Re {
            update.extend(builder.lna_covariance_update());
            update.extend(builder.emre_update());
        }
        if level == SseLevel::Ios {
            update.extend(builder.third_moment_update());
            update.extend(builder.ios_covariance_update());
            update.extend(builder.ios_emre_update());
        }
        debug_assert_eq!(update.len(), dim);

        Ok(Self {
            system,
            level,
            dim,
            state_symbols,
            state_index,
            update,
        })
    }

    pub fn system(&self) -> &SseSystem {
        &self.system
    }

    pub fn level(&self) -> SseLevel {
        self.level
    }

    pub fn dimension(&self) -> usize {
        self.dim
    }

    pub fn state_symbols(&self) -> &[Symbol] {
        &self.state_symbols
    }

    pub fn state_index(&self) -> &HashMap<Symbol, usize> {
        &self.state_index
    }

    /// The symbolic update vector; parameters and conservation
    /// constants are still symbolic.
    pub fn update_vector(&self) -> &[Expr] {
        &self.update
    }

    /// Symbol of the `s`-th state variable seen by analyses.
    pub fn state_symbol(&self, s: usize) -> Symbol {
        self.state_symbols[s]
    }

    /// Fold constants, conservation cycles and caller overrides; the
    /// result references state symbols only.
    pub fn prepare(&self, overrides: &Substitution) -> Result<PreparedSse> {
        let folder = ConstantFolder::new(self.system.model())?;
        let cons_map = self.system.conservation_substitution(overrides)?;

        let fold = |e: &Expr| -> Expr {
            folder
                .apply(&e.substitute(overrides))
                .substitute(&cons_map)
        };
        let update: Vec<Expr> = self.update.iter().map(fold).collect();

        for (i, e) in update.iter().enumerate() {
            if let Some(stray) = e
                .symbols()
                .into_iter()
                .find(|s| !self.state_index.contains_key(s))
            {
                return Err(MesokinError::SemanticError(format!(
                    "update entry {} still references `{}` after constant folding",
                    i,
                    self.system.model().symbols().name(stray)
                )));
            }
        }

        let jacobian: Vec<Vec<Expr>> = update
            .iter()
            .map(|e| {
                self.state_symbols
                    .iter()
                    .map(|s| e.diff(*s))
                    .collect()
            })
            .collect();

        Ok(PreparedSse {
            dim: self.dim,
            update,
            jacobian,
            state_index: self.state_index.clone(),
            initial_state: self.initial_state(overrides)?,
        })
    }

    /// Deterministic initial conditions: permuted independent
    /// concentrations followed by zeros for every fluctuation block.
    pub fn initial_state(&self, overrides: &Substitution) -> Result<Array1<f64>> {
        let n = self.system.num_independent();
        let mut x = Array1::zeros(self.dim);
        let ics = self.initial_concentrations(overrides)?;
        for i in 0..n {
            x[i] = ics[self.system.conservation().permutation[i]];
        }
        Ok(x)
    }

    fn initial_concentrations(&self, overrides: &Substitution) -> Result<Vec<f64>> {
        self.system
            .model()
            .species()
            .iter()
            .map(|s| {
                let init = s.initial.clone().ok_or_else(|| {
                    MesokinError::SemanticError(format!(
                        "species `{}` has no initial value",
                        s.id
                    ))
                })?;
                self.system
                    .model()
                    .evaluate_initial_value(&init.substitute(overrides))
            })
            .collect()
    }

    /// Reconstruct all observables in the original species order from a
    /// reduced state vector.
    pub fn full_state(&self, state: &Array1<f64>, overrides: &Substitution) -> Result<FullState> {
        let n = self.system.num_independent();
        let n_spec = self.system.num_species();
        let dim_cov = packed_len(n);
        let dim_3 = packed3_len(n);
        let cons = self.system.conservation();

        // concentrations: dependent species follow from the cycles
        let cycles = self.system.conserved_cycles(overrides)?;
        let link0 = self.system.link_zero_numeric()?;
        let mut permuted = vec![0.0; n_spec];
        for (i, value) in permuted.iter_mut().enumerate().take(n) {
            *value = state[i];
        }
        for d in 0..cons.num_dependent {
            let mut v = cycles[d];
            for i in 0..n {
                v += link0[[d, i]] * state[i];
            }
            permuted[n + d] = v;
        }
        let mut concentrations = Array1::zeros(n_spec);
        for (pos, &orig) in cons.permutation.iter().enumerate() {
            concentrations[orig] = permuted[pos];
        }

        if self.level == SseLevel::Re {
            return Ok(FullState {
                concentrations,
                covariance: None,
                emre: None,
                third_moments: None,
                ios_covariance: None,
                ios_emre: None,
            });
        }

        // species-space projection of the reduced fluctuations
        let link = self.system.link_numeric()?;
        let mut cmat = Array2::zeros((n_spec, n));
        for (pos, &orig) in cons.permutation.iter().enumerate() {
            for i in 0..n {
                cmat[[orig, i]] = link[[pos, i]];
            }
        }

        let cov_ind = unpack_symmetric(&state.as_slice().unwrap()[n..n + dim_cov], n);
        let covariance = cmat.dot(&cov_ind).dot(&cmat.t());
        let emre_ind =
            Array1::from_iter(state.iter().skip(n + dim_cov).take(n).copied());
        let emre = cmat.dot(&emre_ind);

        if self.level == SseLevel::Lna {
            return Ok(FullState {
                concentrations,
                covariance: Some(covariance),
                emre: Some(emre),
                third_moments: None,
                ios_covariance: None,
                ios_emre: None,
            });
        }

        // central third moments and skewness in species space
        let base3 = n + dim_cov + n;
        let mut central3 = vec![0.0; dim_3];
        for i in 0..n {
            for j in 0..=i {
                for k in 0..=j {
                    let idx = mesokin_core::packed3_index(i, j, k);
                    central3[idx] =
                        state[base3 + idx] - emre_ind[i] * emre_ind[j] * emre_ind[k];
                }
            }
        }
        let mut skewness = Array1::zeros(n_spec);
        for s in 0..n_spec {
            let mut acc = 0.0;
            for j in 0..n {
                for k in 0..n {
                    for l in 0..n {
                        acc += cmat[[s, j]]
                            * cmat[[s, k]]
                            * cmat[[s, l]]
                            * central3[packed3_index_any(j, k, l)];
                    }
                }
            }
            let sigma = covariance[[s, s]];
            skewness[s] = if sigma > 0.0 {
                acc / (sigma * sigma.sqrt())
            } else {
                0.0
            };
        }

        // IOS covariance correction, centered on the EMRE shift
        let base_ios = base3 + dim_3;
        let mut ios_ind = unpack_symmetric(
            &state.as_slice().unwrap()[base_ios..base_ios + dim_cov],
            n,
        );
        for i in 0..n {
            for j in 0..n {
                ios_ind[[i, j]] -= emre_ind[i] * emre_ind[j];
            }
        }
        let ios_covariance = cmat.dot(&ios_ind).dot(&cmat.t());

        let base_iosemre = base_ios + dim_cov;
        let ios_emre_ind =
            Array1::from_iter(state.iter().skip(base_iosemre).take(n).copied());
        let ios_emre = cmat.dot(&ios_emre_ind);

        Ok(FullState {
            concentrations,
            covariance: Some(covariance),
            emre: Some(emre),
            third_moments: Some(skewness),
            ios_covariance: Some(ios_covariance),
            ios_emre: Some(ios_emre),
        })
    }
}

/// Unpack a colex lower-triangle slice into a full symmetric matrix.
fn unpack_symmetric(packed: &[f64], n: usize) -> Array2<f64> {
    let mut out = Array2::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let v = packed[packed_index(i, j)];
            out[[i, j]] = v;
            out[[j, i]] = v;
        }
    }
    out
}

// =============================================================================
// UPDATE CONSTRUCTION
// =============================================================================

/// Wick pairing of a fourth Gaussian moment,
/// `<e_r e_s e_a e_b> = C_rs C_ab + C_ra C_sb + C_rb C_sa`.
fn wick4(
    cov: &dyn Fn(usize, usize) -> Expr,
    r: usize,
    s: usize,
    a: usize,
    b: usize,
) -> Expr {
    Expr::add(vec![
        Expr::mul(vec![cov(r, s), cov(a, b)]),
        Expr::mul(vec![cov(r, a), cov(s, b)]),
        Expr::mul(vec![cov(r, b), cov(s, a)]),
    ])
}

/// Multiplicity weight of a packed pair: off-diagonal entries stand for
/// two positions of the full sum.
fn pair_weight(i: usize, j: usize) -> Expr {
    if i == j {
        Expr::rational(1, 2)
    } else {
        Expr::one()
    }
}

/// Multiplicity weight of a packed triple relative to the full
/// `1/6`-weighted triple sum.
fn triple_weight(i: usize, j: usize, k: usize) -> Expr {
    if i == j && j == k {
        Expr::rational(1, 6)
    } else if i == j || j == k || i == k {
        Expr::rational(1, 2)
    } else {
        Expr::one()
    }
}

struct UpdateBuilder<'a> {
    system: &'a SseSystem,
    state_symbols: &'a [Symbol],
    n: usize,
    dim_cov: usize,
    dim_3: usize,
}

impl UpdateBuilder<'_> {
    fn cov(&self, i: usize, j: usize) -> Expr {
        let idx = packed_index(i.max(j), i.min(j));
        Expr::var(self.state_symbols[self.n + idx])
    }

    fn emre(&self, i: usize) -> Expr {
        Expr::var(self.state_symbols[self.n + self.dim_cov + i])
    }

    fn third(&self, i: usize, j: usize, k: usize) -> Expr {
        let base = self.n + self.dim_cov + self.n;
        Expr::var(self.state_symbols[base + packed3_index_any(i, j, k)])
    }

    fn ios_cov(&self, i: usize, j: usize) -> Expr {
        let base = self.n + self.dim_cov + self.n + self.dim_3;
        let idx = packed_index(i.max(j), i.min(j));
        Expr::var(self.state_symbols[base + idx])
    }

    fn ios_emre(&self, i: usize) -> Expr {
        let base = self.n + self.dim_cov + self.n + self.dim_3 + self.dim_cov;
        Expr::var(self.state_symbols[base + i])
    }

    /// `dC_ij/dt = sum_k J_ik C_kj + J_jk C_ik + B_ij`.
    fn lna_covariance_update(&self) -> Vec<Expr> {
        let jac = self.system.jacobian();
        let diff = self.system.diffusion();
        let mut update = Vec::with_capacity(self.dim_cov);
        for i in 0..self.n {
            for j in 0..=i {
                let mut terms = vec![diff[i][j].clone()];
                for k in 0..self.n {
                    terms.push(Expr::mul(vec![jac[i][k].clone(), self.cov(k, j)]));
                    terms.push(Expr::mul(vec![jac[j][k].clone(), self.cov(k, i)]));
                }
                update.push(Expr::add(terms));
            }
        }
        update
    }

    /// `dm_i/dt = sum_k J_ik m_k + 1/2 sum_jk H_ijk C_jk + F1_i`.
    fn emre_update(&self) -> Vec<Expr> {
        let jac = self.system.jacobian();
        let hess = self.system.hessian();
        let recorr = self.system.rate_corrections();
        let mut update = Vec::with_capacity(self.n);
        for i in 0..self.n {
            let mut terms = vec![recorr[i].clone()];
            for k in 0..self.n {
                terms.push(Expr::mul(vec![jac[i][k].clone(), self.emre(k)]));
            }
            for j in 0..self.n {
                for k in 0..=j {
                    terms.push(Expr::mul(vec![
                        pair_weight(j, k),
                        hess[i][packed_index(j, k)].clone(),
                        self.cov(j, k),
                    ]));
                }
            }
            update.push(Expr::add(terms));
        }
        update
    }

    /// Update of the packed third central moments `M_ijk`.
    fn third_moment_update(&self) -> Vec<Expr> {
        let jac = self.system.jacobian();
        let hess = self.system.hessian();
        let recorr = self.system.rate_corrections();
        let diff = self.system.diffusion();
        let diff_jac = self.system.diffusion_jac();
        let diff3 = self.system.diffusion3();
        let cov = |i: usize, j: usize| self.cov(i, j);

        let mut update = Vec::with_capacity(self.dim_3);
        for i in 0..self.n {
            for j in 0..=i {
                for k in 0..=j {
                    let idx = mesokin_core::packed3_index(i, j, k);
                    let mut terms = vec![diff3[idx].clone()];

                    // mesoscopic rate corrections couple to the covariance
                    terms.push(Expr::mul(vec![recorr[i].clone(), self.cov(j, k)]));
                    terms.push(Expr::mul(vec![recorr[j].clone(), self.cov(i, k)]));
                    terms.push(Expr::mul(vec![recorr[k].clone(), self.cov(i, j)]));

                    // diffusion couples to the mean correction
                    terms.push(Expr::mul(vec![diff[j][k].clone(), self.emre(i)]));
                    terms.push(Expr::mul(vec![diff[i][k].clone(), self.emre(j)]));
                    terms.push(Expr::mul(vec![diff[i][j].clone(), self.emre(k)]));

                    for r in 0..self.n {
                        let dj = |a: usize, b: usize| {
                            diff_jac[packed_index(a.max(b), a.min(b))][r].clone()
                        };
                        terms.push(Expr::mul(vec![dj(i, j), self.cov(r, k)]));
                        terms.push(Expr::mul(vec![dj(i, k), self.cov(r, j)]));
                        terms.push(Expr::mul(vec![dj(j, k), self.cov(r, i)]));

                        // transport by the deterministic Jacobian
                        terms.push(Expr::mul(vec![
                            jac[i][r].clone(),
                            self.third(r, j, k),
                        ]));
                        terms.push(Expr::mul(vec![
                            jac[j][r].clone(),
                            self.third(r, i, k),
                        ]));
                        terms.push(Expr::mul(vec![
                            jac[k][r].clone(),
                            self.third(r, i, j),
                        ]));

                        // Wick-contracted fourth moments against the Hessian
                        for s in 0..=r {
                            let w = pair_weight(r, s);
                            let idy = packed_index(r, s);
                            terms.push(Expr::mul(vec![
                                w.clone(),
                                hess[i][idy].clone(),
                                wick4(&cov, r, s, j, k),
                            ]));
                            terms.push(Expr::mul(vec![
                                w.clone(),
                                hess[j][idy].clone(),
                                wick4(&cov, r, s, i, k),
                            ]));
                            terms.push(Expr::mul(vec![
                                w,
                                hess[k][idy].clone(),
                                wick4(&cov, r, s, i, j),
                            ]));
                        }
                    }
                    update.push(Expr::add(terms));
                }
            }
        }
        update
    }

    /// Update of the packed IOS covariance corrections.
    fn ios_covariance_update(&self) -> Vec<Expr> {
        let jac = self.system.jacobian();
        let jac1 = self.system.jacobian_correction();
        let hess = self.system.hessian();
        let phi = self.system.philippian();
        let recorr = self.system.rate_corrections();
        let diff1 = self.system.diffusion_correction();
        let diff_jac = self.system.diffusion_jac();
        let diff_hess = self.system.diffusion_hess();
        let cov = |i: usize, j: usize| self.cov(i, j);

        let mut update = Vec::with_capacity(self.dim_cov);
        for i in 0..self.n {
            for j in 0..=i {
                let idx = packed_index(i, j);
                let mut terms = vec![diff1[i][j].clone()];

                terms.push(Expr::mul(vec![recorr[i].clone(), self.emre(j)]));
                terms.push(Expr::mul(vec![recorr[j].clone(), self.emre(i)]));

                for k in 0..self.n {
                    terms.push(Expr::mul(vec![jac1[i][k].clone(), self.cov(k, j)]));
                    terms.push(Expr::mul(vec![jac1[j][k].clone(), self.cov(k, i)]));
                    terms.push(Expr::mul(vec![
                        diff_jac[idx][k].clone(),
                        self.emre(k),
                    ]));
                    terms.push(Expr::mul(vec![jac[i][k].clone(), self.ios_cov(k, j)]));
                    terms.push(Expr::mul(vec![jac[j][k].clone(), self.ios_cov(k, i)]));

                    for l in 0..=k {
                        let w = pair_weight(k, l);
                        let idy = packed_index(k, l);
                        terms.push(Expr::mul(vec![
                            w.clone(),
                            hess[i][idy].clone(),
                            self.third(j, k, l),
                        ]));
                        terms.push(Expr::mul(vec![
                            w.clone(),
                            hess[j][idy].clone(),
                            self.third(i, k, l),
                        ]));
                        terms.push(Expr::mul(vec![
                            w,
                            diff_hess[idx][idy].clone(),
                            self.cov(k, l),
                        ]));
                    }
                }

                // third-derivative coupling through the Gaussian fourth
                // moment
                for k in 0..self.n {
                    for l in 0..=k {
                        for m in 0..=l {
                            let w = triple_weight(k, l, m);
                            let idz = mesokin_core::packed3_index(k, l, m);
                            terms.push(Expr::mul(vec![
                                w.clone(),
                                phi[i][idz].clone(),
                                wick4_triple(&cov, k, l, m, j),
                            ]));
                            terms.push(Expr::mul(vec![
                                w,
                                phi[j][idz].clone(),
                                wick4_triple(&cov, k, l, m, i),
                            ]));
                        }
                    }
                }

                update.push(Expr::add(terms));
            }
        }
        update
    }

    /// Update of the IOS-EMRE corrections.
    fn ios_emre_update(&self) -> Vec<Expr> {
        let jac = self.system.jacobian();
        let jac1 = self.system.jacobian_correction();
        let hess = self.system.hessian();
        let phi = self.system.philippian();

        let mut update = Vec::with_capacity(self.n);
        for i in 0..self.n {
            let mut terms = Vec::new();
            for j in 0..self.n {
                terms.push(Expr::mul(vec![jac[i][j].clone(), self.ios_emre(j)]));
                terms.push(Expr::mul(vec![jac1[i][j].clone(), self.emre(j)]));
                for k in 0..=j {
                    terms.push(Expr::mul(vec![
                        pair_weight(j, k),
                        hess[i][packed_index(j, k)].clone(),
                        self.ios_cov(j, k),
                    ]));
                    for l in 0..=k {
                        terms.push(Expr::mul(vec![
                            triple_weight(j, k, l),
                            phi[i][mesokin_core::packed3_index(j, k, l)].clone(),
                            self.third(j, k, l),
                        ]));
                    }
                }
            }
            update.push(Expr::add(terms));
        }
        update
    }
}

/// Wick pairing `<e_k e_l e_m e_a>` of three summed indices against one
/// free index.
fn wick4_triple(
    cov: &dyn Fn(usize, usize) -> Expr,
    k: usize,
    l: usize,
    m: usize,
    a: usize,
) -> Expr {
    Expr::add(vec![
        Expr::mul(vec![cov(k, l), cov(m, a)]),
        Expr::mul(vec![cov(k, m), cov(l, a)]),
        Expr::mul(vec![cov(k, a), cov(l, m)]),
    ])
}
