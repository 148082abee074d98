//! Cut generation from single-row relaxations.
//!
//! The pipeline complements variables so every one is non-negative,
//! identifies a minimal cover by greedy weight, then tries the lifted
//! knapsack cover, the mixed-binary cover, the general-integer cover (the
//! MIR of the cover scale), and the c-MIR heuristic over a randomized scale
//! search. The surviving cut is complemented back, scaled to integers when
//! a common denominator exists, stripped of near-zero coefficients, checked
//! for efficacy, and fingerprinted into the pool. All accumulating sums run
//! in extended precision.

use std::collections::HashSet;
use std::hash::{Hash, Hasher};

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::mip::VarType;
use crate::numeric::{DDouble, integral_scale};
use crate::options::Options;
use crate::{E, I, is_neg_infinite, is_pos_infinite};

/// A linear inequality `a x <= rhs` over structural columns.
#[derive(Debug, Clone)]
pub struct Cut {
    pub index: Vec<I>,
    pub value: Vec<E>,
    pub rhs: E,
    /// Whether every coefficient is integral after scaling.
    pub integral_coefficients: bool,
    /// Violation over coefficient norm at generation time.
    pub efficacy: E,
    pub age: I,
}

/// Deduplicating pool of generated cuts.
#[derive(Default)]
pub struct CutPool {
    cuts: Vec<Cut>,
    fingerprints: HashSet<u64>,
    age_limit: I,
}

impl CutPool {
    pub fn new(age_limit: I) -> Self {
        Self {
            cuts: Vec::new(),
            fingerprints: HashSet::new(),
            age_limit,
        }
    }

    pub fn len(&self) -> I {
        self.cuts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cuts.is_empty()
    }

    pub fn cuts(&self) -> &[Cut] {
        &self.cuts
    }

    fn fingerprint(index: &[I], value: &[E], rhs: E) -> u64 {
        let mut order: Vec<usize> = (0..index.len()).collect();
        order.sort_by_key(|&k| index[k]);
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        for &k in &order {
            index[k].hash(&mut hasher);
            value[k].to_bits().hash(&mut hasher);
        }
        rhs.to_bits().hash(&mut hasher);
        hasher.finish()
    }

    /// Inserts unless an identical cut is already pooled.
    pub fn add_cut(&mut self, cut: Cut) -> bool {
        let fingerprint = Self::fingerprint(&cut.index, &cut.value, cut.rhs);
        if !self.fingerprints.insert(fingerprint) {
            return false;
        }
        self.cuts.push(cut);
        true
    }

    /// Ages every cut and evicts the ones idle past the limit. `active`
    /// reports whether the cut at an index is tight in the current
    /// relaxation.
    pub fn age_cuts(&mut self, active: impl Fn(usize) -> bool) {
        let age_limit = self.age_limit;
        let mut kept = Vec::with_capacity(self.cuts.len());
        for (k, mut cut) in self.cuts.drain(..).enumerate() {
            if active(k) {
                cut.age = 0;
            } else {
                cut.age += 1;
            }
            if cut.age <= age_limit {
                kept.push(cut);
            } else {
                self.fingerprints
                    .remove(&Self::fingerprint(&cut.index, &cut.value, cut.rhs));
            }
        }
        self.cuts = kept;
    }
}

/// One complemented working entry of the row being separated.
#[derive(Debug, Clone, Copy)]
struct Entry {
    col: I,
    /// Coefficient in the complemented space.
    value: E,
    /// Solution value in the complemented space.
    solval: E,
    /// Finite range of the complemented variable, infinite when unbounded.
    range: E,
    /// Complemented against the upper bound (x' = u - x).
    at_upper: bool,
    /// Shift applied (the bound used), for complementing back.
    shift: E,
    integral: bool,
}

/// Generator state shared across separation calls.
pub struct CutGeneration<'a> {
    options: &'a Options,
    rng: SmallRng,
}

impl<'a> CutGeneration<'a> {
    pub fn new(options: &'a Options) -> Self {
        Self {
            options,
            rng: SmallRng::seed_from_u64(options.random_seed ^ 0x9e3779b97f4a7c15),
        }
    }

    /// Separates the LP point against the single-row relaxation
    /// `sum vals[k] * x[inds[k]] <= rhs`. Returns true when a cut entered
    /// the pool.
    #[allow(clippy::too_many_arguments)]
    pub fn generate_cut(
        &mut self,
        inds: &[I],
        vals: &[E],
        rhs: E,
        col_lower: &[E],
        col_upper: &[E],
        solval: &[E],
        var_type: &[VarType],
        pool: &mut CutPool,
    ) -> bool {
        let feastol = self.options.mip_feasibility_tolerance;

        // 1. Complement to the non-negative orthant.
        let mut entries = Vec::with_capacity(inds.len());
        let mut work_rhs = DDouble::from(rhs);
        let mut has_general_ints = false;
        let mut has_continuous = false;
        for (&col, &value) in inds.iter().zip(vals) {
            if value.abs() < 1e-12 {
                continue;
            }
            let lower = col_lower[col];
            let upper = col_upper[col];
            let integral = var_type[col] != VarType::Continuous;
            let has_lower = !is_neg_infinite(lower);
            let has_upper = !is_pos_infinite(upper);

            let at_upper = match (has_lower, has_upper) {
                (true, true) => upper - solval[col] < solval[col] - lower,
                (true, false) => false,
                (false, true) => true,
                // A variable with no finite bound cannot be complemented;
                // rows with unbounded support are not separated.
                (false, false) => return false,
            };
            let (new_value, new_solval, shift) = if at_upper {
                (-value, upper - solval[col], upper)
            } else {
                (value, solval[col] - lower, lower)
            };
            work_rhs = work_rhs - value * shift;
            let range = if has_lower && has_upper {
                upper - lower
            } else {
                crate::INFTY
            };
            if integral {
                if range > 1.0 + feastol {
                    has_general_ints = true;
                }
            } else {
                has_continuous = true;
            }
            entries.push(Entry {
                col,
                value: new_value,
                solval: new_solval.max(0.0),
                range,
                at_upper,
                shift,
                integral,
            });
        }
        if entries.is_empty() {
            return false;
        }

        // Drop tiny coefficients, relaxing soundly: positive against the
        // zero lower bound, negative against the finite range.
        let scale = entries.iter().fold(0.0f64, |m, e| m.max(e.value.abs()));
        let epsilon = 1e-11 * scale.max(1.0);
        let mut kept = Vec::with_capacity(entries.len());
        for entry in entries {
            if entry.value.abs() >= epsilon {
                kept.push(entry);
            } else if entry.value < 0.0 {
                if entry.range >= crate::INFTY_THRESHOLD {
                    kept.push(entry);
                } else {
                    work_rhs = work_rhs - entry.value * entry.range;
                }
            }
        }
        let entries = kept;
        let rhs_value = work_rhs.to_f64();

        // 2. Greedy cover over the positive integer support.
        let cover = determine_cover(&entries, rhs_value);

        let mut best: Option<(Vec<E>, E)> = None;
        let mut consider = |coeffs: Vec<E>, cut_rhs: E, entries: &[Entry]| {
            let efficacy = cut_efficacy(&coeffs, cut_rhs, entries);
            if efficacy > self.options.mip_min_cut_efficacy
                && best
                    .as_ref()
                    .map_or(true, |(b_coeffs, b_rhs)| {
                        efficacy > cut_efficacy(b_coeffs, *b_rhs, entries)
                    })
            {
                best = Some((coeffs, cut_rhs));
            }
        };

        // 3. Lifted cover variants.
        if let Some(cover) = &cover {
            let lambda = cover.lambda;
            if !has_continuous && !has_general_ints {
                if let Some((coeffs, cut_rhs)) =
                    lifted_knapsack_cover(&entries, &cover.members, lambda)
                {
                    consider(coeffs, cut_rhs, &entries);
                }
            } else if !has_general_ints {
                if let Some((coeffs, cut_rhs)) =
                    lifted_mixed_binary_cover(&entries, &cover.members, lambda)
                {
                    consider(coeffs, cut_rhs, &entries);
                }
            } else {
                // General integers: the cover scale feeds the MIR function.
                if lambda > feastol {
                    if let Some((coeffs, cut_rhs)) = cmir_cut(&entries, rhs_value, lambda) {
                        consider(coeffs, cut_rhs, &entries);
                    }
                }
            }
        }

        // 4. c-MIR scale search over randomized delta candidates.
        let mut deltas: Vec<E> = vec![1.0];
        let mut support: Vec<&Entry> = entries
            .iter()
            .filter(|e| e.integral && e.solval.fract().abs() > feastol)
            .collect();
        support.sort_by(|a, b| {
            let fa = (a.solval - a.solval.round()).abs();
            let fb = (b.solval - b.solval.round()).abs();
            fb.partial_cmp(&fa).unwrap()
        });
        for entry in support.iter().take(8) {
            deltas.push(entry.value.abs());
        }
        deltas.shuffle(&mut self.rng);
        for &delta in &deltas {
            if delta < 1e-9 || delta > 1e9 {
                continue;
            }
            if let Some((coeffs, cut_rhs)) = cmir_cut(&entries, rhs_value, delta) {
                consider(coeffs, cut_rhs, &entries);
            }
        }

        let Some((coeffs, cut_rhs)) = best else {
            return false;
        };

        // 5. Postprocess: complement back, scale, drop near-zeros, check
        // efficacy in the original space, and pool the survivor.
        self.postprocess_and_pool(&entries, coeffs, cut_rhs, col_lower, col_upper, solval, pool)
    }

    #[allow(clippy::too_many_arguments)]
    fn postprocess_and_pool(
        &mut self,
        entries: &[Entry],
        coeffs: Vec<E>,
        cut_rhs: E,
        col_lower: &[E],
        col_upper: &[E],
        solval: &[E],
        pool: &mut CutPool,
    ) -> bool {
        // Complement back to the original space.
        let mut rhs = DDouble::from(cut_rhs);
        let mut index = Vec::new();
        let mut value = Vec::new();
        for (entry, &coeff) in entries.iter().zip(&coeffs) {
            if coeff == 0.0 {
                continue;
            }
            let original = if entry.at_upper { -coeff } else { coeff };
            if entry.at_upper {
                rhs = rhs - coeff * entry.shift;
            } else {
                rhs = rhs + coeff * entry.shift;
            }
            index.push(entry.col);
            value.push(original);
        }
        if index.is_empty() {
            return false;
        }

        // Drop near-zero coefficients with a sound bound relaxation.
        let magnitude = value.iter().fold(0.0f64, |m, v| m.max(v.abs()));
        let epsilon = 1e-10 * magnitude.max(1.0);
        let mut keep_index = Vec::new();
        let mut keep_value = Vec::new();
        for (&col, &coeff) in index.iter().zip(&value) {
            if coeff.abs() >= epsilon {
                keep_index.push(col);
                keep_value.push(coeff);
            } else if coeff > 0.0 && !is_neg_infinite(col_lower[col]) {
                rhs = rhs - coeff * col_lower[col];
            } else if coeff < 0.0 && !is_pos_infinite(col_upper[col]) {
                rhs = rhs - coeff * col_upper[col];
            } else if coeff != 0.0 {
                keep_index.push(col);
                keep_value.push(coeff);
            }
        }
        let index = keep_index;
        let mut value = keep_value;
        let mut rhs = rhs.to_f64();
        if index.is_empty() {
            return false;
        }

        // Scale to integers when a reasonable common denominator exists.
        let mut integral_coefficients = false;
        let scale = integral_scale(&value, self.options.mip_feasibility_tolerance, 1e-9);
        if scale != 0.0 && scale <= 1e6 {
            for v in &mut value {
                *v = (*v * scale).round();
            }
            // The right-hand side may only be snapped, never floored: the
            // cut can carry continuous variables.
            let scaled_rhs = (DDouble::from(rhs) * scale).to_f64();
            rhs = if (scaled_rhs - scaled_rhs.round()).abs() < 1e-9 {
                scaled_rhs.round()
            } else {
                scaled_rhs
            };
            integral_coefficients = true;
        }

        // Final efficacy check against the LP point.
        let mut violation = DDouble::ZERO;
        let mut norm = 0.0;
        for (&col, &coeff) in index.iter().zip(&value) {
            violation = violation + DDouble::from(coeff) * solval[col];
            norm += coeff * coeff;
        }
        let violation = (violation - rhs).to_f64();
        let norm = norm.sqrt().max(1e-12);
        let efficacy = violation / norm;
        if efficacy < self.options.mip_min_cut_efficacy {
            return false;
        }

        pool.add_cut(Cut {
            index,
            value,
            rhs,
            integral_coefficients,
            efficacy,
            age: 0,
        })
    }
}

struct Cover {
    /// Indices into the entry list.
    members: Vec<usize>,
    lambda: E,
}

/// Greedy cover: integer entries with positive coefficients, largest
/// `solval * value` first, until the weight exceeds the right-hand side.
fn determine_cover(entries: &[Entry], rhs: E) -> Option<Cover> {
    if rhs <= 0.0 {
        return None;
    }
    let mut candidates: Vec<usize> = (0..entries.len())
        .filter(|&k| entries[k].integral && entries[k].value > 0.0)
        .collect();
    candidates.sort_by(|&a, &b| {
        let wa = entries[a].solval * entries[a].value;
        let wb = entries[b].solval * entries[b].value;
        wb.partial_cmp(&wa).unwrap()
    });

    let mut weight = DDouble::ZERO;
    let mut members = Vec::new();
    for k in candidates {
        members.push(k);
        weight = weight + entries[k].value;
        if weight > rhs {
            let lambda = (weight - rhs).to_f64();
            return Some(Cover { members, lambda });
        }
    }
    None
}

/// Sequential up-lifting over the cover's partial sums (all-binary rows).
fn lifted_knapsack_cover(
    entries: &[Entry],
    cover: &[usize],
    lambda: E,
) -> Option<(Vec<E>, E)> {
    if lambda <= 0.0 {
        return None;
    }
    // Partial sums of the cover coefficients, largest first, in extended
    // precision.
    let mut weights: Vec<E> = cover.iter().map(|&k| entries[k].value).collect();
    weights.sort_by(|a, b| b.partial_cmp(a).unwrap());
    let mut partial = Vec::with_capacity(weights.len() + 1);
    let mut sum = DDouble::ZERO;
    partial.push(0.0);
    for &w in &weights {
        sum = sum + w;
        partial.push(sum.to_f64());
    }

    let in_cover: HashSet<usize> = cover.iter().copied().collect();
    let mut coeffs = vec![0.0; entries.len()];
    for &k in cover {
        coeffs[k] = 1.0;
    }
    for (k, entry) in entries.iter().enumerate() {
        if in_cover.contains(&k) || !entry.integral || entry.value <= 0.0 {
            continue;
        }
        // Largest h with partial[h] <= value.
        let mut lift = 0;
        for (h, &s) in partial.iter().enumerate() {
            if entry.value >= s - 1e-12 {
                lift = h;
            }
        }
        coeffs[k] = lift as E;
    }
    Some((coeffs, cover.len() as E - 1.0))
}

/// Mixed-binary cover: coefficients clipped at lambda on the cover, the
/// negative-coefficient continuous part kept as the slack it is.
fn lifted_mixed_binary_cover(
    entries: &[Entry],
    cover: &[usize],
    lambda: E,
) -> Option<(Vec<E>, E)> {
    if lambda <= 0.0 {
        return None;
    }
    let mut coeffs = vec![0.0; entries.len()];
    let mut rhs = DDouble::ZERO;
    for &k in cover {
        let clipped = entries[k].value.min(lambda);
        coeffs[k] = clipped;
        rhs = rhs + clipped;
    }
    for (k, entry) in entries.iter().enumerate() {
        if !entry.integral && entry.value < 0.0 {
            coeffs[k] = entry.value;
        }
    }
    Some((coeffs, (rhs - lambda).to_f64()))
}

/// The c-MIR function at one scale: integers through the MIR rounding,
/// positive continuous scaled into the fractional slack.
fn cmir_cut(entries: &[Entry], rhs: E, delta: E) -> Option<(Vec<E>, E)> {
    let scaled_rhs = DDouble::from(rhs) / delta;
    let down = scaled_rhs.floor();
    let f0 = (scaled_rhs - down).to_f64();
    if !(0.01..=0.99).contains(&f0) {
        return None;
    }
    let one_minus = 1.0 - f0;

    let mut coeffs = vec![0.0; entries.len()];
    for (k, entry) in entries.iter().enumerate() {
        if entry.integral {
            let scaled = DDouble::from(entry.value) / delta;
            let floor = scaled.floor();
            let fraction = (scaled - floor).to_f64();
            coeffs[k] = floor.to_f64() + (fraction - f0).max(0.0) / one_minus;
        } else if entry.value > 0.0 {
            coeffs[k] = -entry.value / (delta * one_minus);
        }
        // Negative continuous coefficients relax away against x' >= 0.
    }
    Some((coeffs, down.to_f64()))
}

/// Violation over norm in the complemented space.
fn cut_efficacy(coeffs: &[E], rhs: E, entries: &[Entry]) -> E {
    let mut violation = DDouble::ZERO;
    let mut norm = 0.0;
    for (entry, &coeff) in entries.iter().zip(coeffs) {
        violation = violation + DDouble::from(coeff) * entry.solval;
        norm += coeff * coeff;
    }
    if norm == 0.0 {
        return -crate::INFTY;
    }
    (violation - rhs).to_f64() / norm.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binary_entries(values: &[E], solvals: &[E]) -> Vec<Entry> {
        values
            .iter()
            .zip(solvals)
            .enumerate()
            .map(|(col, (&value, &solval))| Entry {
                col,
                value,
                solval,
                range: 1.0,
                at_upper: false,
                shift: 0.0,
                integral: true,
            })
            .collect()
    }

    #[test]
    fn greedy_cover_exceeds_rhs() {
        let entries = binary_entries(&[5.0, 5.0, 5.0], &[0.9, 0.8, 0.7]);
        let cover = determine_cover(&entries, 10.0).unwrap();
        assert_eq!(cover.members.len(), 3);
        assert!((cover.lambda - 5.0).abs() < 1e-12);
    }

    #[test]
    fn lifted_cover_of_equal_weights() {
        // 5x1 + 5x2 + 5x3 <= 10: cover cut x1 + x2 + x3 <= 2; a variable
        // with weight 10 lifts to coefficient 2.
        let entries = binary_entries(&[5.0, 5.0, 5.0, 10.0], &[0.9, 0.8, 0.7, 0.0]);
        let cover = vec![0, 1, 2];
        let (coeffs, rhs) = lifted_knapsack_cover(&entries, &cover, 5.0).unwrap();
        assert_eq!(coeffs, vec![1.0, 1.0, 1.0, 2.0]);
        assert_eq!(rhs, 2.0);
    }

    #[test]
    fn mir_rounds_an_integer_row() {
        // x1 + 2.5 x2 <= 7.5 at delta 1: f0 = 0.5, giving x1 + 2 x2 <= 7.
        let entries = binary_entries(&[1.0, 2.5], &[0.5, 0.5]);
        let (coeffs, rhs) = cmir_cut(&entries, 7.5, 1.0).unwrap();
        assert!((coeffs[0] - 1.0).abs() < 1e-12);
        assert!((coeffs[1] - 2.0).abs() < 1e-12);
        assert_eq!(rhs, 7.0);
    }

    #[test]
    fn pool_deduplicates_identical_cuts() {
        let mut pool = CutPool::new(10);
        let cut = Cut {
            index: vec![0, 2],
            value: vec![1.0, 1.0],
            rhs: 1.0,
            integral_coefficients: true,
            efficacy: 0.5,
            age: 0,
        };
        assert!(pool.add_cut(cut.clone()));
        assert!(!pool.add_cut(cut));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn idle_cuts_age_out() {
        let mut pool = CutPool::new(1);
        pool.add_cut(Cut {
            index: vec![0],
            value: vec![1.0],
            rhs: 1.0,
            integral_coefficients: true,
            efficacy: 0.5,
            age: 0,
        });
        pool.age_cuts(|_| false);
        assert_eq!(pool.len(), 1);
        pool.age_cuts(|_| false);
        assert!(pool.is_empty());
    }

    #[test]
    fn violated_knapsack_cover_reaches_the_pool() {
        // max-style fractional point violating the cover of
        // 3x1 + 4x2 + 5x3 <= 8 over binaries.
        let options = Options::default();
        let mut generator = CutGeneration::new(&options);
        let mut pool = CutPool::new(10);

        let inds = vec![0, 1, 2];
        let vals = vec![3.0, 4.0, 5.0];
        let col_lower = vec![0.0; 3];
        let col_upper = vec![1.0; 3];
        // x* = (0, 0.95, 0.9): 4*0.95 + 5*0.9 = 8.3 > 8.
        let solval = vec![0.0, 0.95, 0.9];
        let var_type = vec![VarType::Integer; 3];

        let added = generator.generate_cut(
            &inds, &vals, 8.0, &col_lower, &col_upper, &solval, &var_type, &mut pool,
        );
        assert!(added);
        let cut = &pool.cuts()[0];
        // The point must be cut off.
        let mut activity = 0.0;
        for (&col, &coeff) in cut.index.iter().zip(&cut.value) {
            activity += coeff * solval[col];
        }
        assert!(activity > cut.rhs + 1e-9);
        // Every feasible binary point must survive.
        for x1 in 0..2 {
            for x2 in 0..2 {
                for x3 in 0..2 {
                    let point = [x1 as E, x2 as E, x3 as E];
                    if 3.0 * point[0] + 4.0 * point[1] + 5.0 * point[2] > 8.0 {
                        continue;
                    }
                    let mut lhs = 0.0;
                    for (&col, &coeff) in cut.index.iter().zip(&cut.value) {
                        lhs += coeff * point[col];
                    }
                    assert!(lhs <= cut.rhs + 1e-9, "feasible point cut off: {point:?}");
                }
            }
        }
    }
}
