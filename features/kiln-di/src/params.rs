use crate::{
    errors::ConfigError,
    types::{Injectable, Instance, TypeInfo},
};

/// Caller-supplied override parameters for one build call.
///
/// Positional overrides match by position then by type; named overrides match
/// by parameter name and type and may sit in any constructor position.
#[derive(Clone, Default)]
pub enum OverrideParameters {
    #[default]
    None,
    Positional(Vec<Instance>),
    Named(Vec<(String, Instance)>),
}

impl OverrideParameters {
    pub fn positional(values: impl IntoIterator<Item = Instance>) -> Self {
        OverrideParameters::Positional(values.into_iter().collect())
    }

    pub fn named(values: impl IntoIterator<Item = (String, Instance)>) -> Self {
        OverrideParameters::Named(values.into_iter().collect())
    }

    /// Convenience for a single named override
    pub fn one_named<T: Injectable>(name: impl Into<String>, value: T) -> Self {
        OverrideParameters::Named(vec![(name.into(), Instance::new(value))])
    }

    pub fn is_empty(&self) -> bool {
        match self {
            OverrideParameters::None => true,
            OverrideParameters::Positional(values) => values.is_empty(),
            OverrideParameters::Named(values) => values.is_empty(),
        }
    }

    /// Number of supplied override values
    pub fn supplied(&self) -> usize {
        match self {
            OverrideParameters::None => 0,
            OverrideParameters::Positional(values) => values.len(),
            OverrideParameters::Named(values) => values.len(),
        }
    }

    /// The override value for one parameter slot, if any
    pub(crate) fn match_slot(
        &self,
        position: usize,
        name: &str,
        target: TypeInfo,
    ) -> Option<Instance> {
        match self {
            OverrideParameters::None => None,
            OverrideParameters::Positional(values) => values
                .get(position)
                .filter(|value| value.info().type_id == target.type_id)
                .cloned(),
            OverrideParameters::Named(values) => values
                .iter()
                .find(|(n, value)| n == name && value.info().type_id == target.type_id)
                .map(|(_, value)| value.clone()),
        }
    }

    /// More overrides than declared parameters is a reported error,
    /// never truncated silently.
    pub(crate) fn check_arity(&self, declared: usize) -> Result<(), ConfigError> {
        let supplied = self.supplied();
        if supplied > declared {
            return Err(ConfigError::ParameterCount { supplied, declared });
        }
        Ok(())
    }
}

impl std::fmt::Debug for OverrideParameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OverrideParameters::None => f.write_str("None"),
            OverrideParameters::Positional(values) => {
                write!(f, "Positional({})", values.len())
            }
            OverrideParameters::Named(values) => {
                let names: Vec<&str> = values.iter().map(|(n, _)| n.as_str()).collect();
                write!(f, "Named({names:?})")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positional_matches_by_position_and_type() {
        let overrides = OverrideParameters::positional([Instance::new(1u32), Instance::new("x")]);

        let hit = overrides.match_slot(0, "count", TypeInfo::of::<u32>());
        assert!(hit.is_some());

        // Right position, wrong type
        assert!(overrides.match_slot(1, "label", TypeInfo::of::<u32>()).is_none());
        // Beyond the supplied values
        assert!(overrides.match_slot(2, "other", TypeInfo::of::<u32>()).is_none());
    }

    #[test]
    fn named_matches_anywhere_by_name_and_type() {
        let overrides = OverrideParameters::one_named("count", 7u32);

        assert!(overrides.match_slot(5, "count", TypeInfo::of::<u32>()).is_some());
        assert!(overrides.match_slot(0, "count", TypeInfo::of::<i64>()).is_none());
        assert!(overrides.match_slot(0, "other", TypeInfo::of::<u32>()).is_none());
    }

    #[test]
    fn arity_overflow_is_an_error() {
        let overrides = OverrideParameters::positional([Instance::new(1u32), Instance::new(2u32)]);
        let error = overrides.check_arity(1);
        assert!(matches!(
            error,
            Err(ConfigError::ParameterCount { supplied: 2, declared: 1 })
        ));
        assert!(overrides.check_arity(2).is_ok());
    }
}
