use super::ReactionError;
use super::pb_factor::{PbContext, classify, compute_pb_factor};
use super::rxn_class::{Pathway, ReactionClass};
use crate::core::models::ids::SpeciesId;
use crate::core::models::reaction::{Orientation, ReactantSpec, ReactionKind, ReactionRule};
use crate::core::models::species::{Species, SpeciesError, SpeciesTable};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info};

/// What a surface class does to a molecule touching it, independent of probabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceBehavior {
    pub kind: ReactionKind,
    pub molecule_orientation: Orientation,
    pub surface_orientation: Orientation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum ClassKey {
    Uni(SpeciesId),
    Bi([SpeciesId; 2]),
    Tri([SpeciesId; 3]),
}

/// Result of a runtime rate change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateUpdate {
    /// Species whose unimolecular lifetimes must be resampled.
    pub unimolecular_species: Vec<SpeciesId>,
}

/// Every reaction class of the network, keyed by canonical (sorted) reactant set.
#[derive(Debug, Clone, Default)]
pub struct ReactionRegistry {
    rules: Vec<ReactionRule>,
    unimolecular: BTreeMap<SpeciesId, ReactionClass>,
    bimolecular: BTreeMap<[SpeciesId; 2], ReactionClass>,
    trimolecular: BTreeMap<[SpeciesId; 3], ReactionClass>,
    surface_behaviors: BTreeMap<(SpeciesId, SpeciesId), SurfaceBehavior>,
    partners: BTreeMap<SpeciesId, BTreeSet<SpeciesId>>,
    rule_locations: HashMap<String, Vec<(ClassKey, usize)>>,
}

fn canonical<const N: usize>(mut ids: [SpeciesId; N]) -> [SpeciesId; N] {
    ids.sort();
    ids
}

/// Reorders a rule's reactant specs to match the sorted class key.
fn in_key_order<const N: usize>(key: &[SpeciesId; N], reactants: &[ReactantSpec]) -> Vec<ReactantSpec> {
    let mut remaining: Vec<ReactantSpec> = reactants.to_vec();
    key.iter()
        .filter_map(|id| {
            let pos = remaining.iter().position(|r| r.species == *id)?;
            Some(remaining.remove(pos))
        })
        .collect()
}

impl ReactionRegistry {
    /// Validates every rule and groups standard rules into reaction classes.
    ///
    /// # Arguments
    ///
    /// * `species` - Species table with steps already derived.
    /// * `rules` - Reaction rules with resolved species ids.
    /// * `ctx` - Unit context for probability factors.
    /// * `vacancy_search_radius` - Radius (µm) searched for free tiles for extra surface products.
    ///
    /// # Errors
    ///
    /// Any [`ReactionError`] describing an invalid rule or unsimulatable class.
    pub fn build(
        species: &SpeciesTable,
        rules: Vec<ReactionRule>,
        ctx: &PbContext,
        vacancy_search_radius: f64,
    ) -> Result<Self, ReactionError> {
        let mut registry = Self::default();
        let mut grouped: BTreeMap<ClassKey, Vec<(usize, Vec<ReactantSpec>)>> = BTreeMap::new();

        for (index, rule) in rules.iter().enumerate() {
            let reactants = resolve(species, &rule.reactants)?;
            let products = resolve(species, &rule.products)?;
            validate_rule(rule, &reactants, &products, vacancy_search_radius)?;

            if rule.kind != ReactionKind::Standard {
                let (molecule, surface) = match (reactants[0].0.is_surface_class(), reactants[1].0.is_surface_class()) {
                    (false, true) => (rule.reactants[0], rule.reactants[1]),
                    _ => (rule.reactants[1], rule.reactants[0]),
                };
                registry.surface_behaviors.insert(
                    (molecule.species, surface.species),
                    SurfaceBehavior {
                        kind: rule.kind,
                        molecule_orientation: molecule.orientation,
                        surface_orientation: surface.orientation,
                    },
                );
                continue;
            }

            let ids: Vec<SpeciesId> = rule.reactants.iter().map(|r| r.species).collect();
            let (key, ordered) = match ids.as_slice() {
                [a] => (ClassKey::Uni(*a), rule.reactants.clone()),
                [a, b] => {
                    let key = canonical([*a, *b]);
                    (ClassKey::Bi(key), in_key_order(&key, &rule.reactants))
                }
                [a, b, c] => {
                    let key = canonical([*a, *b, *c]);
                    (ClassKey::Tri(key), in_key_order(&key, &rule.reactants))
                }
                _ => {
                    return Err(ReactionError::ReactantCount {
                        name: rule.name.clone(),
                        count: ids.len(),
                    });
                }
            };
            grouped.entry(key).or_default().push((index, ordered));
        }

        for (key, members) in grouped {
            let ids: Vec<SpeciesId> = match key {
                ClassKey::Uni(a) => vec![a],
                ClassKey::Bi(k) => k.to_vec(),
                ClassKey::Tri(k) => k.to_vec(),
            };
            let members_species: Vec<&Species> = ids
                .iter()
                .map(|id| species.get(*id).ok_or_else(|| SpeciesError::Unknown(id.to_string())))
                .collect::<Result<_, _>>()?;
            let label = members_species
                .iter()
                .map(|s| s.name.as_str())
                .collect::<Vec<_>>()
                .join(" + ");
            let geometry = classify(&members_species).ok_or_else(|| ReactionError::UnsupportedReactants {
                name: label.clone(),
            })?;

            let mut pathways = Vec::with_capacity(members.len());
            for (slot, (rule_index, ordered)) in members.into_iter().enumerate() {
                let rule = &rules[rule_index];
                let with_orientation: Vec<(&Species, Orientation)> = ordered
                    .iter()
                    .zip(&members_species)
                    .map(|(spec, s)| (*s, spec.orientation))
                    .collect();
                let pb_factor = compute_pb_factor(geometry, &with_orientation, ctx, &label)?;
                debug!(rule = %rule.name, class = %label, pb_factor, "Registered pathway");
                registry
                    .rule_locations
                    .entry(rule.name.clone())
                    .or_default()
                    .push((key, slot));
                pathways.push(Pathway {
                    rule: rule_index,
                    name: rule.name.clone(),
                    rate: rule.rate,
                    pb_factor,
                    reactants: ordered,
                    products: rule.products.clone(),
                });
            }

            let class = ReactionClass::new(ids.clone(), geometry, label, pathways)?;
            match key {
                ClassKey::Uni(a) => {
                    registry.unimolecular.insert(a, class);
                }
                ClassKey::Bi(k) => {
                    registry.partners.entry(k[0]).or_default().insert(k[1]);
                    registry.partners.entry(k[1]).or_default().insert(k[0]);
                    registry.bimolecular.insert(k, class);
                }
                ClassKey::Tri(k) => {
                    for (i, &a) in k.iter().enumerate() {
                        for (j, &b) in k.iter().enumerate() {
                            if i != j {
                                registry.partners.entry(a).or_default().insert(b);
                            }
                        }
                    }
                    registry.trimolecular.insert(k, class);
                }
            }
        }

        info!(
            rules = rules.len(),
            unimolecular = registry.unimolecular.len(),
            bimolecular = registry.bimolecular.len(),
            trimolecular = registry.trimolecular.len(),
            surface_behaviors = registry.surface_behaviors.len(),
            "Reaction network initialized"
        );
        registry.rules = rules;
        Ok(registry)
    }

    pub fn rules(&self) -> &[ReactionRule] {
        &self.rules
    }

    pub fn unimolecular(&self, species: SpeciesId) -> Option<&ReactionClass> {
        self.unimolecular.get(&species)
    }

    pub fn bimolecular(&self, a: SpeciesId, b: SpeciesId) -> Option<&ReactionClass> {
        self.bimolecular.get(&canonical([a, b]))
    }

    pub fn trimolecular(&self, a: SpeciesId, b: SpeciesId, c: SpeciesId) -> Option<&ReactionClass> {
        self.trimolecular.get(&canonical([a, b, c]))
    }

    pub fn has_trimolecular(&self) -> bool {
        !self.trimolecular.is_empty()
    }

    pub fn surface_behavior(&self, species: SpeciesId, surface_class: SpeciesId) -> Option<&SurfaceBehavior> {
        self.surface_behaviors.get(&(species, surface_class))
    }

    /// Whether `species` takes part in any bimolecular or trimolecular class.
    pub fn has_partners(&self, species: SpeciesId) -> bool {
        self.partners.get(&species).is_some_and(|p| !p.is_empty())
    }

    pub fn can_react_with(&self, a: SpeciesId, b: SpeciesId) -> bool {
        self.partners.get(&a).is_some_and(|p| p.contains(&b))
    }

    /// Current rate of every rule, in rule order.
    pub fn current_rates(&self) -> Vec<(String, f64)> {
        self.rules.iter().map(|r| (r.name.clone(), r.rate)).collect()
    }

    fn class_mut(&mut self, key: ClassKey) -> Option<&mut ReactionClass> {
        match key {
            ClassKey::Uni(a) => self.unimolecular.get_mut(&a),
            ClassKey::Bi(k) => self.bimolecular.get_mut(&k),
            ClassKey::Tri(k) => self.trimolecular.get_mut(&k),
        }
    }

    /// Changes the rate of every pathway created from rule `name`.
    ///
    /// # Errors
    ///
    /// [`ReactionError::InvalidRate`] is returned before anything changes;
    /// [`ReactionError::UnknownReaction`] for a name that has no pathway.
    pub fn modify_rate(&mut self, name: &str, new_rate: f64) -> Result<RateUpdate, ReactionError> {
        if !new_rate.is_finite() || new_rate < 0.0 {
            return Err(ReactionError::InvalidRate(new_rate));
        }
        let locations = self
            .rule_locations
            .get(name)
            .cloned()
            .ok_or_else(|| ReactionError::UnknownReaction(name.to_string()))?;

        let mut update = RateUpdate::default();
        for (key, slot) in locations {
            let Some(class) = self.class_mut(key) else {
                continue;
            };
            class.modify_pathway_rate(slot, new_rate)?;
            if let ClassKey::Uni(species) = key {
                update.unimolecular_species.push(species);
            }
        }
        for rule in self.rules.iter_mut().filter(|r| r.name == name) {
            rule.rate = new_rate;
        }
        info!(reaction = name, rate = new_rate, "Reaction rate updated");
        Ok(update)
    }
}

fn resolve<'a>(
    species: &'a SpeciesTable,
    specs: &[ReactantSpec],
) -> Result<Vec<(&'a Species, Orientation)>, ReactionError> {
    specs
        .iter()
        .map(|r| {
            species
                .get(r.species)
                .map(|s| (s, r.orientation))
                .ok_or_else(|| ReactionError::from(SpeciesError::Unknown(r.species.to_string())))
        })
        .collect()
}

fn validate_rule(
    rule: &ReactionRule,
    reactants: &[(&Species, Orientation)],
    products: &[(&Species, Orientation)],
    vacancy_search_radius: f64,
) -> Result<(), ReactionError> {
    let name = || rule.name.clone();
    if !(1..=3).contains(&reactants.len()) {
        return Err(ReactionError::ReactantCount {
            name: name(),
            count: reactants.len(),
        });
    }
    if rule.kind == ReactionKind::Standard && (rule.rate < 0.0 || !rule.rate.is_finite()) {
        return Err(ReactionError::NegativeRate {
            name: name(),
            rate: rule.rate,
        });
    }
    if let Some((sc, _)) = products.iter().find(|(s, _)| s.is_surface_class()) {
        return Err(ReactionError::SurfaceClassProduct {
            name: name(),
            species: sc.name.clone(),
        });
    }

    let n_vol = reactants.iter().filter(|(s, _)| s.is_volume()).count();
    let n_surf = reactants.iter().filter(|(s, _)| s.is_surface()).count();
    let n_wall = reactants.iter().filter(|(s, _)| s.is_surface_class()).count();
    if n_wall > 1 {
        return Err(ReactionError::MultipleSurfaceClasses { name: name() });
    }

    if rule.kind != ReactionKind::Standard {
        if reactants.len() != 2 || n_wall != 1 || !products.is_empty() {
            return Err(ReactionError::InvalidSurfaceClassRule {
                name: name(),
                kind: format!("{:?}", rule.kind),
            });
        }
        return Ok(());
    }

    let n_surf_products = products.iter().filter(|(s, _)| s.is_surface()).count();
    if n_surf_products > 0 && n_surf == 0 && n_wall == 0 {
        return Err(ReactionError::SurfaceProductWithoutSurface { name: name() });
    }
    let single_adsorption = n_vol == 1 && n_surf == 0 && n_surf_products == 1;
    if n_surf_products > n_surf && vacancy_search_radius <= 0.0 && !single_adsorption {
        return Err(ReactionError::NoRoomForSurfaceProducts {
            name: name(),
            products: n_surf_products,
            reactants: n_surf,
        });
    }

    let refs: Vec<&Species> = reactants.iter().map(|(s, _)| *s).collect();
    if classify(&refs).is_none() {
        return Err(ReactionError::UnsupportedReactants { name: name() });
    }
    Ok(())
}
