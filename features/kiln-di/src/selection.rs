use crate::{
    errors::ConfigError,
    params::OverrideParameters,
    recipe::{ConstructorSpec, ParameterSpec, TypeRecipe},
    types::TypeInfo,
};

/// Answers whether the catalog currently holds a valid builder for a contract
pub trait CatalogProbe {
    fn can_autowire(&self, target: TypeInfo) -> bool;
}

/// Finds the eligible constructors of a recipe
pub trait ConstructorFinder: Send + Sync {
    fn find<'a>(&self, recipe: &'a TypeRecipe) -> Vec<&'a ConstructorSpec>;
}

/// Default finder: public constructors only
pub struct PublicConstructors;
impl ConstructorFinder for PublicConstructors {
    fn find<'a>(&self, recipe: &'a TypeRecipe) -> Vec<&'a ConstructorSpec> {
        recipe
            .constructors
            .iter()
            .filter(|spec| spec.is_public())
            .collect()
    }
}

/// Finder including internal constructors
pub struct AllConstructors;
impl ConstructorFinder for AllConstructors {
    fn find<'a>(&self, recipe: &'a TypeRecipe) -> Vec<&'a ConstructorSpec> {
        recipe.constructors.iter().collect()
    }
}

/// Picks the constructor to compile: finds candidates, sorts them ascending
/// by parameter count, and takes the first whose every parameter is either
/// covered by an override or independently autowirable.
pub struct ConstructorSelector {
    finder: Box<dyn ConstructorFinder>,
}

impl Default for ConstructorSelector {
    fn default() -> Self {
        ConstructorSelector {
            finder: Box::new(PublicConstructors),
        }
    }
}

impl ConstructorSelector {
    pub fn new(finder: Box<dyn ConstructorFinder>) -> Self {
        ConstructorSelector { finder }
    }

    pub fn select<'a>(
        &self,
        recipe: &'a TypeRecipe,
        config: &OverrideParameters,
        catalog: &dyn CatalogProbe,
    ) -> Result<&'a ConstructorSpec, ConfigError> {
        let mut candidates = self.finder.find(recipe);
        candidates.sort_by_key(|spec| spec.arity());

        for candidate in candidates {
            if Self::satisfiable(candidate, config, catalog) {
                return Ok(candidate);
            }
        }

        Err(ConfigError::NoConstructor {
            concrete: recipe.info,
        })
    }

    fn satisfiable(
        candidate: &ConstructorSpec,
        config: &OverrideParameters,
        catalog: &dyn CatalogProbe,
    ) -> bool {
        let params = candidate.params();

        match config {
            OverrideParameters::None => params
                .iter()
                .all(|param| autowirable(param, catalog)),
            OverrideParameters::Positional(values) => {
                if values.len() > params.len() {
                    return false;
                }
                // Match by position then by type; the remaining tail must
                // be autowirable on its own.
                let positions_match = values
                    .iter()
                    .zip(params)
                    .all(|(value, param)| value.info().type_id == param.target.type_id);
                positions_match
                    && params[values.len()..]
                        .iter()
                        .all(|param| autowirable(param, catalog))
            }
            OverrideParameters::Named(values) => {
                let all_names_land = values.iter().all(|(name, value)| {
                    params.iter().any(|param| {
                        param.name == name && value.info().type_id == param.target.type_id
                    })
                });
                all_names_land
                    && params.iter().all(|param| {
                        values.iter().any(|(name, _)| name == param.name)
                            || autowirable(param, catalog)
                    })
            }
        }
    }
}

fn autowirable(param: &ParameterSpec, catalog: &dyn CatalogProbe) -> bool {
    // Collections resolve to an empty set rather than failing
    param.has_default() || param.collection || catalog.can_autowire(param.target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Instance;
    use std::any::TypeId;

    struct Db;
    struct Cache;
    struct Service;

    struct Probe(Vec<TypeId>);
    impl CatalogProbe for Probe {
        fn can_autowire(&self, target: TypeInfo) -> bool {
            self.0.contains(&target.type_id)
        }
    }

    fn recipe() -> TypeRecipe {
        TypeRecipe::of::<Service>()
            .constructor(ConstructorSpec::new(
                vec![
                    ParameterSpec::of::<Db>("db"),
                    ParameterSpec::of::<Cache>("cache"),
                ],
                |_| Ok(Instance::new(Service)),
            ))
            .constructor(ConstructorSpec::new(
                vec![ParameterSpec::of::<Db>("db")],
                |_| Ok(Instance::new(Service)),
            ))
    }

    #[test]
    fn smallest_satisfiable_constructor_wins() {
        let recipe = recipe();
        let probe = Probe(vec![TypeId::of::<Db>()]);

        let selected = ConstructorSelector::default()
            .select(&recipe, &OverrideParameters::None, &probe)
            .unwrap();
        assert_eq!(selected.arity(), 1);
    }

    #[test]
    fn named_override_unlocks_the_larger_constructor() {
        let recipe = recipe();
        let probe = Probe(vec![TypeId::of::<Db>()]);

        let config = OverrideParameters::one_named("cache", Cache);
        // Ascending arity still prefers the one-parameter constructor, which
        // is satisfiable on its own; drop Db from the catalog to force the
        // named parameter into play.
        let empty_probe = Probe(vec![]);
        assert!(ConstructorSelector::default()
            .select(&recipe, &config, &empty_probe)
            .is_err());

        let selected = ConstructorSelector::default()
            .select(&recipe, &config, &probe)
            .unwrap();
        assert_eq!(selected.arity(), 1);
    }

    #[test]
    fn positional_override_must_match_prefix_types() {
        let recipe = recipe();
        let probe = Probe(vec![TypeId::of::<Cache>()]);

        // Db by position, Cache autowired
        let config = OverrideParameters::positional([Instance::new(Db)]);
        let selected = ConstructorSelector::default()
            .select(&recipe, &config, &probe)
            .unwrap();
        assert_eq!(selected.arity(), 1);

        // Wrong type in position 0 never matches
        let config = OverrideParameters::positional([Instance::new(7u32)]);
        assert!(ConstructorSelector::default()
            .select(&recipe, &config, &probe)
            .is_err());
    }

    #[test]
    fn no_candidate_is_a_configuration_error() {
        let recipe = recipe();
        let probe = Probe(vec![]);

        let result = ConstructorSelector::default().select(&recipe, &OverrideParameters::None, &probe);
        assert!(matches!(result, Err(ConfigError::NoConstructor { .. })));
    }

    #[test]
    fn internal_constructors_need_the_wider_finder() {
        let recipe = TypeRecipe::of::<Service>().constructor(
            ConstructorSpec::new(vec![], |_| Ok(Instance::new(Service))).internal(),
        );
        let probe = Probe(vec![]);

        assert!(ConstructorSelector::default()
            .select(&recipe, &OverrideParameters::None, &probe)
            .is_err());
        assert!(ConstructorSelector::new(Box::new(AllConstructors))
            .select(&recipe, &OverrideParameters::None, &probe)
            .is_ok());
    }
}
