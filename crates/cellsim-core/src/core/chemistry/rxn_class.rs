use super::ReactionError;
use super::pb_factor::EncounterGeometry;
use crate::core::models::ids::SpeciesId;
use crate::core::models::reaction::ReactantSpec;
use rand::Rng;
use std::cell::Cell;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct Pathway {
    /// Index of the originating rule in the registry.
    pub rule: usize,
    pub name: String,
    pub rate: f64,
    pub pb_factor: f64,
    /// Reactant requirements in the class's canonical order.
    pub reactants: Vec<ReactantSpec>,
    pub products: Vec<ReactantSpec>,
}

impl Pathway {
    pub fn probability(&self) -> f64 {
        self.rate * self.pb_factor
    }
}

/// All pathways sharing one ordered reactant set.
///
/// For unimolecular classes the cumulative array holds rates (1/s); for every other class
/// it holds per-encounter probabilities.
#[derive(Debug, Clone)]
pub struct ReactionClass {
    pub reactants: Vec<SpeciesId>,
    pub geometry: EncounterGeometry,
    pub label: String,
    pathways: Vec<Pathway>,
    cum_probs: Vec<f64>,
    max_fixed_p: f64,
    min_noreaction_p: f64,
    overflow_warned: Cell<bool>,
}

impl ReactionClass {
    pub fn new(
        reactants: Vec<SpeciesId>,
        geometry: EncounterGeometry,
        label: String,
        pathways: Vec<Pathway>,
    ) -> Result<Self, ReactionError> {
        let mut class = Self {
            reactants,
            geometry,
            label,
            pathways,
            cum_probs: Vec::new(),
            max_fixed_p: 0.0,
            min_noreaction_p: 0.0,
            overflow_warned: Cell::new(false),
        };
        class.recompute_cumulative()?;
        Ok(class)
    }

    fn recompute_cumulative(&mut self) -> Result<(), ReactionError> {
        let mut acc = 0.0;
        self.cum_probs = self
            .pathways
            .iter()
            .map(|p| {
                acc += p.probability();
                acc
            })
            .collect();
        self.refresh_bounds();
        self.check_monotonic()
    }

    fn refresh_bounds(&mut self) {
        let total = self.cum_probs.last().copied().unwrap_or(0.0);
        self.max_fixed_p = total;
        self.min_noreaction_p = total;
    }

    fn check_monotonic(&self) -> Result<(), ReactionError> {
        let scale = self.min_noreaction_p.abs().max(f64::MIN_POSITIVE);
        let ok = self.cum_probs.first().is_none_or(|&c| c >= -1e-12 * scale)
            && self
                .cum_probs
                .windows(2)
                .all(|w| w[1] >= w[0] - 1e-12 * scale);
        if ok {
            Ok(())
        } else {
            Err(ReactionError::NonMonotonic {
                class: self.label.clone(),
            })
        }
    }

    pub fn pathways(&self) -> &[Pathway] {
        &self.pathways
    }

    pub fn pathway(&self, index: usize) -> &Pathway {
        &self.pathways[index]
    }

    pub fn cumulative(&self) -> &[f64] {
        &self.cum_probs
    }

    /// Total probability (or total rate for unimolecular classes) of any pathway firing.
    pub fn total_probability(&self) -> f64 {
        self.min_noreaction_p
    }

    pub fn max_fixed_p(&self) -> f64 {
        self.max_fixed_p
    }

    /// Probability that an encounter produces no reaction.
    pub fn no_reaction_probability(&self) -> f64 {
        (1.0 - self.min_noreaction_p).max(0.0)
    }

    pub fn pathway_probability(&self, index: usize) -> f64 {
        let below = if index == 0 {
            0.0
        } else {
            self.cum_probs[index - 1]
        };
        self.cum_probs[index] - below
    }

    pub fn is_unimolecular(&self) -> bool {
        self.geometry == EncounterGeometry::Unimolecular
    }

    /// Selects a pathway for a uniform draw `u` in `[0, 1)` scaled by `scaling`.
    ///
    /// When the class's total probability exceeds `scaling`, the draw is stretched over
    /// the total instead so that a pathway is always chosen; this is logged once.
    pub fn select(&self, u: f64, scaling: f64) -> Option<usize> {
        let total = self.min_noreaction_p;
        if total <= 0.0 {
            return None;
        }
        let p = if total > scaling {
            if !self.overflow_warned.replace(true) {
                warn!(
                    class = %self.label,
                    total,
                    scaling,
                    "Reaction probability exceeds one; time step is too long for this class"
                );
            }
            u * total
        } else {
            u * scaling
        };
        if p >= total {
            return None;
        }
        let idx = self.cum_probs.partition_point(|&c| c <= p);
        (idx < self.cum_probs.len()).then_some(idx)
    }

    /// Draws a uniform number and tests a bimolecular (or trimolecular) encounter.
    pub fn test_encounter(&self, rng: &mut impl Rng, scaling: f64) -> Option<usize> {
        if self.min_noreaction_p <= 0.0 {
            return None;
        }
        let u: f64 = rng.gen_range(0.0..1.0);
        self.select(u, scaling)
    }

    /// Selects the pathway of a unimolecular event that is known to fire.
    pub fn select_unimolecular(&self, rng: &mut impl Rng) -> Option<usize> {
        let u: f64 = rng.gen_range(0.0..1.0);
        self.select(u, self.min_noreaction_p)
    }

    /// Samples the delay (internal time units) until the next unimolecular event, or
    /// `None` when the total rate is zero.
    pub fn sample_lifetime(&self, rng: &mut impl Rng, time_unit: f64) -> Option<f64> {
        let k_tot = self.min_noreaction_p;
        if k_tot <= 0.0 {
            return None;
        }
        let u: f64 = 1.0 - rng.gen_range(0.0..1.0);
        Some(-u.ln() / (k_tot * time_unit))
    }

    /// Changes one pathway's rate, shifting that entry and every later cumulative entry by
    /// the probability delta.
    ///
    /// # Errors
    ///
    /// [`ReactionError::InvalidRate`] (before any mutation) for a negative or non-finite
    /// rate, [`ReactionError::NonMonotonic`] if the cumulative array breaks.
    pub fn modify_pathway_rate(&mut self, index: usize, new_rate: f64) -> Result<(), ReactionError> {
        if !new_rate.is_finite() || new_rate < 0.0 {
            return Err(ReactionError::InvalidRate(new_rate));
        }
        let pathway = &mut self.pathways[index];
        let delta = (new_rate - pathway.rate) * pathway.pb_factor;
        pathway.rate = new_rate;
        for c in &mut self.cum_probs[index..] {
            *c += delta;
        }
        self.refresh_bounds();
        self.check_monotonic()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::reaction::Orientation;
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn pathway(rule: usize, rate: f64, pb: f64) -> Pathway {
        Pathway {
            rule,
            name: format!("r{rule}"),
            rate,
            pb_factor: pb,
            reactants: vec![ReactantSpec::new(SpeciesId(0), Orientation::Any)],
            products: vec![],
        }
    }

    fn class(rates: &[f64], pb: f64) -> ReactionClass {
        ReactionClass::new(
            vec![SpeciesId(0), SpeciesId(1)],
            EncounterGeometry::VolVol,
            "A + B".into(),
            rates
                .iter()
                .enumerate()
                .map(|(i, &r)| pathway(i, r, pb))
                .collect(),
        )
        .unwrap()
    }

    fn assert_consistent(c: &ReactionClass) {
        assert!(c.cumulative().windows(2).all(|w| w[0] <= w[1]));
        let sum: f64 = (0..c.pathways().len()).map(|i| c.pathway_probability(i)).sum();
        assert_relative_eq!(sum + c.no_reaction_probability(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn cumulative_array_accumulates_rate_times_factor() {
        let c = class(&[1.0, 2.0, 3.0], 0.05);
        assert_relative_eq!(c.cumulative()[0], 0.05);
        assert_relative_eq!(c.cumulative()[2], 0.3);
        assert_relative_eq!(c.no_reaction_probability(), 0.7);
        assert_consistent(&c);
    }

    #[test]
    fn selection_walks_cumulative_array() {
        let c = class(&[1.0, 2.0], 0.1);
        assert_eq!(c.select(0.05, 1.0), Some(0));
        assert_eq!(c.select(0.15, 1.0), Some(1));
        assert_eq!(c.select(0.5, 1.0), None);
    }

    #[test]
    fn local_scaling_reduces_reaction_chance() {
        let c = class(&[1.0], 0.3);
        assert_eq!(c.select(0.2, 1.0), Some(0));
        // With scaling 2/3 the draw 0.2 maps to 0.133, still reacting; 0.5 maps to 0.333.
        assert_eq!(c.select(0.5, 2.0 / 3.0), None);
    }

    #[test]
    fn overflowing_total_always_reacts() {
        let c = class(&[10.0, 10.0], 0.1);
        for u in [0.0, 0.3, 0.99] {
            assert!(c.select(u, 1.0).is_some());
        }
    }

    #[test]
    fn rate_update_keeps_invariants() {
        let mut c = class(&[1.0, 2.0, 3.0], 0.05);
        c.modify_pathway_rate(1, 0.5).unwrap();
        assert_relative_eq!(c.pathway_probability(1), 0.025);
        assert_relative_eq!(c.total_probability(), 0.225);
        assert_consistent(&c);
        c.modify_pathway_rate(0, 0.0).unwrap();
        assert_consistent(&c);
    }

    #[test]
    fn negative_rate_is_rejected_before_mutation() {
        let mut c = class(&[1.0, 2.0], 0.1);
        let before = c.cumulative().to_vec();
        assert_eq!(
            c.modify_pathway_rate(0, -1.0),
            Err(ReactionError::InvalidRate(-1.0))
        );
        assert_eq!(c.cumulative(), before.as_slice());
        assert_eq!(c.pathway(0).rate, 1.0);
    }

    #[test]
    fn unimolecular_lifetime_is_forever_for_zero_rate() {
        let c = ReactionClass::new(
            vec![SpeciesId(0)],
            EncounterGeometry::Unimolecular,
            "A".into(),
            vec![pathway(0, 0.0, 1.0)],
        )
        .unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert!(c.sample_lifetime(&mut rng, 1e-6).is_none());
    }

    #[test]
    fn unimolecular_lifetimes_average_inverse_rate() {
        let c = ReactionClass::new(
            vec![SpeciesId(0)],
            EncounterGeometry::Unimolecular,
            "A".into(),
            vec![pathway(0, 1000.0, 1.0), pathway(1, 1000.0, 1.0)],
        )
        .unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let n = 20_000;
        let mean: f64 = (0..n)
            .map(|_| c.sample_lifetime(&mut rng, 1e-6).unwrap())
            .sum::<f64>()
            / n as f64;
        // Expected 1 / (2000 1/s * 1e-6 s) = 500 time units.
        assert!((mean - 500.0).abs() < 25.0, "mean {mean}");
        let picks: usize = (0..1000)
            .filter(|_| c.select_unimolecular(&mut rng) == Some(0))
            .count();
        assert!((400..600).contains(&picks));
    }
}
