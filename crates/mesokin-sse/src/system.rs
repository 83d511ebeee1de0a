//! Symbolic coefficient construction for the system-size expansion.
//!
//! From a prepared network (irreversible, intensive units, supported
//! fragment) this derives, once per model, every symbolic quantity the
//! expansion hierarchy needs: the conservation-reduced rates and their
//! derivatives, the rate-equation vector, Jacobians, Hessians, third
//! derivatives and the diffusion family. Parameters and conservation
//! constants stay symbolic so analyses can fold them late (parameter
//! scans hold scan variables out until per-set evaluation).
//!
//! Packed indexing is colexicographic throughout: `(i, j)` with
//! `i >= j` and `(i, j, k)` with `i >= j >= k`.

use crate::conservation::ConservationData;
use crate::expansion::{expand_propensities, ExpandedRates};
use mesokin_ast::Model;
use mesokin_core::{packed3_index, packed3_len, packed_index, packed_len, MesokinError, Result};
use mesokin_expr::{Expr, Substitution, Symbol};
use mesokin_trafo::{assert_analysis_fragment, convert_to_irreversible, intensive_species};
use ndarray::Array2;

/// Symbolic SSE coefficients of one reaction network.
#[derive(Debug, Clone)]
pub struct SseSystem {
    model: Model,
    species_symbols: Vec<Symbol>,
    cons: ConservationData,

    /// Compartment symbol of each species, model order.
    volumes: Vec<Expr>,
    omega_ind: Vec<Expr>,
    omega_dep: Vec<Expr>,

    conservation_constants: Vec<Symbol>,
    dependent_substitution: Substitution,

    /// Macroscopic rates and corrections after removing dependent
    /// species, one per reaction.
    rates: Vec<Expr>,
    rates1: Vec<Expr>,

    // assembled coefficients, all reduced to independent species
    res: Vec<Expr>,
    recorr: Vec<Expr>,
    jacobian: Vec<Vec<Expr>>,
    jacobian1: Vec<Vec<Expr>>,
    hessian: Vec<Vec<Expr>>,
    philippian: Vec<Vec<Expr>>,
    diffusion: Vec<Vec<Expr>>,
    diffusion1: Vec<Vec<Expr>>,
    diffusion_jac: Vec<Vec<Expr>>,
    diffusion_hess: Vec<Vec<Expr>>,
    diffusion3: Vec<Expr>,
}

impl SseSystem {
    /// Prepare `input` (split reversible reactions, convert to
    /// concentrations, expand propensities) and derive all symbolic
    /// coefficients.
    pub fn new(input: &Model) -> Result<Self> {
        let mut model = input.clone();
        convert_to_irreversible(&mut model)?;
        assert_analysis_fragment(&model)?;

        let stoichiometry = model.stoichiometry_matrix()?;
        let cons = ConservationData::analyze(&stoichiometry)?;

        intensive_species(&mut model)?;
        let ExpandedRates { rates, rates1 } = expand_propensities(&mut model)?;

        let species_symbols: Vec<Symbol> = model.species().iter().map(|s| s.symbol).collect();
        let volumes: Vec<Expr> = model
            .species()
            .iter()
            .map(|s| Expr::var(s.compartment))
            .collect();

        let n_ind = cons.num_independent;
        let n_dep = cons.num_dependent;
        let n_reac = model.num_reactions();

        let omega_ind: Vec<Expr> = (0..n_ind)
            .map(|i| volumes[cons.permutation[i]].clone())
            .collect();
        let omega_dep: Vec<Expr> = (0..n_dep)
            .map(|d| volumes[cons.permutation[n_ind + d]].clone())
            .collect();

        // placeholders for the constants arising from conservation laws
        let conservation_constants: Vec<Symbol> =
            (0..n_dep).map(|_| model.symbols_mut().fresh("cnsv")).collect();

        // dependent species are affine in the independent ones:
        // x_dep = c + Link0C * x_ind with the volume-scaled link matrix
        let ind_symbol =
            |i: usize| -> Symbol { species_symbols[cons.permutation[i]] };
        let mut dependent_substitution = Substitution::new();
        for d in 0..n_dep {
            let dep_sym = species_symbols[cons.permutation[n_ind + d]];
            let mut terms = vec![Expr::var(conservation_constants[d])];
            for i in 0..n_ind {
                let l0 = cons.link_zero[[d, i]];
                if l0 != 0.0 {
                    terms.push(Expr::div(
                        Expr::mul(vec![
                            Expr::num(l0),
                            omega_ind[i].clone(),
                            Expr::var(ind_symbol(i)),
                        ]),
                        omega_dep[d].clone(),
                    ));
                }
            }
            dependent_substitution.insert(dep_sym, Expr::add(terms));
        }

        let rates: Vec<Expr> = rates
            .iter()
            .map(|r| r.substitute(&dependent_substitution))
            .collect();
        let rates1: Vec<Expr> = rates1
            .iter()
            .map(|r| r.substitute(&dependent_substitution))
            .collect();

        // derivative tables of the reduced rates
        let mut grad = vec![vec![Expr::zero(); n_ind]; n_reac];
        let mut grad1 = vec![vec![Expr::zero(); n_ind]; n_reac];
        let mut hess = vec![vec![Expr::zero(); packed_len(n_ind)]; n_reac];
        let mut third = vec![vec![Expr::zero(); packed3_len(n_ind)]; n_reac];
        for m in 0..n_reac {
            for j in 0..n_ind {
                grad[m][j] = rates[m].diff(ind_symbol(j));
                grad1[m][j] = rates1[m].diff(ind_symbol(j));
                for k in 0..=j {
                    let idx = packed_index(j, k);
                    hess[m][idx] = grad[m][j].diff(ind_symbol(k));
                    for l in 0..=k {
                        third[m][packed3_index(j, k, l)] =
                            hess[m][idx].diff(ind_symbol(l));
                    }
                }
            }
        }

        let s_ind = &cons.reduced_stoichiometry;
        let reduce = |table: &dyn Fn(usize) -> Expr, i: usize| -> Expr {
            let mut terms = Vec::new();
            for m in 0..n_reac {
                let s = s_ind[[i, m]];
                if s != 0.0 {
                    terms.push(Expr::mul(vec![Expr::num(s), table(m)]));
                }
            }
            Expr::div(Expr::add(terms), omega_ind[i].clone())
        };

        let mut res = Vec::with_capacity(n_ind);
        let mut recorr = Vec::with_capacity(n_ind);
        let mut jacobian = vec![vec![Expr::zero(); n_ind]; n_ind];
        let mut jacobian1 = vec![vec![Expr::zero(); n_ind]; n_ind];
        let mut hessian = vec![vec![Expr::zero(); packed_len(n_ind)]; n_ind];
        let mut philippian = vec![vec![Expr::zero(); packed3_len(n_ind)]; n_ind];
        for i in 0..n_ind {
            res.push(reduce(&|m| rates[m].clone(), i));
            recorr.push(reduce(&|m| rates1[m].clone(), i));
            for k in 0..n_ind {
                jacobian[i][k] = reduce(&|m| grad[m][k].clone(), i);
                jacobian1[i][k] = reduce(&|m| grad1[m][k].clone(), i);
            }
            for idx in 0..packed_len(n_ind) {
                hessian[i][idx] = reduce(&|m| hess[m][idx].clone(), i);
            }
            for idx in 0..packed3_len(n_ind) {
                philippian[i][idx] = reduce(&|m| third[m][idx].clone(), i);
            }
        }

        // diffusion family, scaled by the volumes of both row species
        let pair_scale = |i: usize, j: usize, numerator: Expr| -> Expr {
            Expr::div(
                numerator,
                Expr::mul(vec![omega_ind[i].clone(), omega_ind[j].clone()]),
            )
        };
        let mut diffusion = vec![vec![Expr::zero(); n_ind]; n_ind];
        let mut diffusion1 = vec![vec![Expr::zero(); n_ind]; n_ind];
        for i in 0..n_ind {
            for j in 0..n_ind {
                let mut terms = Vec::new();
                let mut terms1 = Vec::new();
                for m in 0..n_reac {
                    let w = s_ind[[i, m]] * s_ind[[j, m]];
                    if w != 0.0 {
                        terms.push(Expr::mul(vec![Expr::num(w), rates[m].clone()]));
                        terms1.push(Expr::mul(vec![Expr::num(w), rates1[m].clone()]));
                    }
                }
                diffusion[i][j] = pair_scale(i, j, Expr::add(terms));
                diffusion1[i][j] = pair_scale(i, j, Expr::add(terms1));
            }
        }

        let mut diffusion_jac = vec![vec![Expr::zero(); n_ind]; packed_len(n_ind)];
        let mut diffusion_hess =
            vec![vec![Expr::zero(); packed_len(n_ind)]; packed_len(n_ind)];
        for i in 0..n_ind {
            for j in 0..=i {
                let row = packed_index(i, j);
                for k in 0..n_ind {
                    let mut terms = Vec::new();
                    for m in 0..n_reac {
                        let w = s_ind[[i, m]] * s_ind[[j, m]];
                        if w != 0.0 {
                            terms.push(Expr::mul(vec![Expr::num(w), grad[m][k].clone()]));
                        }
                    }
                    diffusion_jac[row][k] = pair_scale(i, j, Expr::add(terms));
                }
                for idy in 0..packed_len(n_ind) {
                    let mut terms = Vec::new();
                    for m in 0..n_reac {
                        let w = s_ind[[i, m]] * s_ind[[j, m]];
                        if w != 0.0 {
                            terms.push(Expr::mul(vec![Expr::num(w), hess[m][idy].clone()]));
                        }
                    }
                    diffusion_hess[row][idy] = pair_scale(i, j, Expr::add(terms));
                }
            }
        }

        let mut diffusion3 = vec![Expr::zero(); packed3_len(n_ind)];
        for i in 0..n_ind {
            for j in 0..=i {
                for k in 0..=j {
                    let mut terms = Vec::new();
                    for m in 0..n_reac {
                        let w = s_ind[[i, m]] * s_ind[[j, m]] * s_ind[[k, m]];
                        if w != 0.0 {
                            terms.push(Expr::mul(vec![Expr::num(w), rates[m].clone()]));
                        }
                    }
                    diffusion3[packed3_index(i, j, k)] = Expr::div(
                        Expr::add(terms),
                        Expr::mul(vec![
                            omega_ind[i].clone(),
                            omega_ind[j].clone(),
                            omega_ind[k].clone(),
                        ]),
                    );
                }
            }
        }

        Ok(Self {
            model,
            species_symbols,
            cons,
            volumes,
            omega_ind,
            omega_dep,
            conservation_constants,
            dependent_substitution,
            rates,
            rates1,
            res,
            recorr,
            jacobian,
            jacobian1,
            hessian,
            philippian,
            diffusion,
            diffusion1,
            diffusion_jac,
            diffusion_hess,
            diffusion3,
        })
    }

    // -------------------------------------------------------------------------
    // Structure
    // -------------------------------------------------------------------------

    /// The prepared internal model (irreversible, intensive units).
    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Mint a fresh symbol in the internal model's table.
    pub fn fresh_symbol(&mut self, prefix: &str) -> Symbol {
        self.model.symbols_mut().fresh(prefix)
    }

    pub fn num_species(&self) -> usize {
        self.species_symbols.len()
    }

    pub fn num_independent(&self) -> usize {
        self.cons.num_independent
    }

    pub fn num_dependent(&self) -> usize {
        self.cons.num_dependent
    }

    pub fn num_reactions(&self) -> usize {
        self.rates.len()
    }

    pub fn conservation(&self) -> &ConservationData {
        &self.cons
    }

    /// Symbol of the `i`-th independent species.
    pub fn independent_symbol(&self, i: usize) -> Symbol {
        self.species_symbols[self.cons.permutation[i]]
    }

    pub fn species_symbols(&self) -> &[Symbol] {
        &self.species_symbols
    }

    pub fn conservation_constants(&self) -> &[Symbol] {
        &self.conservation_constants
    }

    pub fn dependent_substitution(&self) -> &Substitution {
        &self.dependent_substitution
    }

    // -------------------------------------------------------------------------
    // Coefficients
    // -------------------------------------------------------------------------

    pub fn rate_equations(&self) -> &[Expr] {
        &self.res
    }

    pub fn rate_corrections(&self) -> &[Expr] {
        &self.recorr
    }

    pub fn jacobian(&self) -> &[Vec<Expr>] {
        &self.jacobian
    }

    pub fn jacobian_correction(&self) -> &[Vec<Expr>] {
        &self.jacobian1
    }

    /// Packed Hessian rows: `hessian()[i][packed_index(j, k)]`.
    pub fn hessian(&self) -> &[Vec<Expr>] {
        &self.hessian
    }

    /// Packed third-derivative rows.
    pub fn philippian(&self) -> &[Vec<Expr>] {
        &self.philippian
    }

    pub fn diffusion(&self) -> &[Vec<Expr>] {
        &self.diffusion
    }

    pub fn diffusion_correction(&self) -> &[Vec<Expr>] {
        &self.diffusion1
    }

    /// `diffusion_jac()[packed_index(i, j)][k]` is the derivative of
    /// the diffusion entry `(i, j)` by independent species `k`.
    pub fn diffusion_jac(&self) -> &[Vec<Expr>] {
        &self.diffusion_jac
    }

    pub fn diffusion_hess(&self) -> &[Vec<Expr>] {
        &self.diffusion_hess
    }

    pub fn diffusion3(&self) -> &[Expr] {
        &self.diffusion3
    }

    // -------------------------------------------------------------------------
    // Numerics
    // -------------------------------------------------------------------------

    /// Initial concentrations in model order.
    pub fn initial_concentrations(&self) -> Result<Vec<f64>> {
        self.model.initial_species_values()
    }

    /// Numeric volume of each species' compartment, model order.
    pub fn volume_values(&self) -> Result<Vec<f64>> {
        self.volumes
            .iter()
            .map(|v| {
                let value = self.model.evaluate_initial_value(v)?;
                if !(value.is_finite() && value > 0.0) {
                    return Err(MesokinError::SemanticError(format!(
                        "compartment volume evaluates to {}",
                        value
                    )));
                }
                Ok(value)
            })
            .collect()
    }

    /// Numeric conservation constants `Gamma * P * (Omega .* x0) / Omega_dep`,
    /// optionally with parameter overrides applied to the initial values.
    pub fn conserved_cycles(&self, overrides: &Substitution) -> Result<Vec<f64>> {
        let n_ind = self.cons.num_independent;
        let volumes = self.volume_values()?;
        let mut ics = Vec::with_capacity(self.num_species());
        for s in self.model.species() {
            let init = s.initial.clone().ok_or_else(|| {
                MesokinError::SemanticError(format!("species `{}` has no initial value", s.id))
            })?;
            ics.push(
                self.model
                    .evaluate_initial_value(&init.substitute(overrides))?,
            );
        }

        let mut cycles = Vec::with_capacity(self.cons.num_dependent);
        for d in 0..self.cons.num_dependent {
            let mut acc = 0.0;
            for s in 0..self.num_species() {
                let orig = self.cons.permutation[s];
                acc += self.cons.conservation_matrix[[d, s]] * volumes[orig] * ics[orig];
            }
            let dep_volume = volumes[self.cons.permutation[n_ind + d]];
            let value = acc / dep_volume;
            if !value.is_finite() {
                return Err(MesokinError::NumericError(format!(
                    "conservation constant {} does not evaluate to a finite number",
                    d
                )));
            }
            cycles.push(value);
        }
        Ok(cycles)
    }

    /// Substitution folding the conservation-constant placeholders.
    pub fn conservation_substitution(&self, overrides: &Substitution) -> Result<Substitution> {
        let cycles = self.conserved_cycles(overrides)?;
        let mut map = Substitution::new();
        for (sym, value) in self.conservation_constants.iter().zip(cycles.iter()) {
            map.insert(*sym, Expr::num(*value));
        }
        Ok(map)
    }

    /// Numeric volume-scaled link-zero matrix (concentration units).
    pub fn link_zero_numeric(&self) -> Result<Array2<f64>> {
        let volumes = self.volume_values()?;
        let n_ind = self.cons.num_independent;
        let n_dep = self.cons.num_dependent;
        let mut out = Array2::zeros((n_dep, n_ind));
        for d in 0..n_dep {
            let dep_volume = volumes[self.cons.permutation[n_ind + d]];
            for i in 0..n_ind {
                let ind_volume = volumes[self.cons.permutation[i]];
                out[[d, i]] = self.cons.link_zero[[d, i]] * ind_volume / dep_volume;
            }
        }
        Ok(out)
    }

    /// Numeric volume-scaled link matrix mapping independent
    /// concentrations to all permuted species concentrations.
    pub fn link_numeric(&self) -> Result<Array2<f64>> {
        let volumes = self.volume_values()?;
        let n_ind = self.cons.num_independent;
        let n = self.num_species();
        let mut out = Array2::zeros((n, n_ind));
        for s in 0..n {
            let row_volume = volumes[self.cons.permutation[s]];
            for i in 0..n_ind {
                let ind_volume = volumes[self.cons.permutation[i]];
                out[[s, i]] = self.cons.link[[s, i]] * ind_volume / row_volume;
            }
        }
        Ok(out)
    }
}
