use std::sync::Arc;

use thiserror::Error;

use crate::types::{DynError, TypeInfo};

/// Errors when trying to resolve a contract type from the kernel
#[derive(Error, Debug, Clone)]
pub enum ResolveError {
    /// No valid builder is registered for the contract
    #[error("no builder is registered for '{0}'")]
    NotFound(TypeInfo),
    /// More than one valid builder matched a single-result lookup
    #[error("{count} builders match '{contract}' where exactly one was requested")]
    Ambiguous { contract: TypeInfo, count: usize },
    /// A captured builder reference has since been unregistered or deactivated
    #[error("the builder for '{0}' is no longer registered")]
    Obsolete(TypeInfo),

    #[error("failed to downcast, required: '{required_type}' actual: '{actual_type}'")]
    DowncastFailed {
        required_type: &'static str,
        actual_type: &'static str,
    },

    /// Construction of the instance failed
    #[error(transparent)]
    Build(#[from] BuildError),
}

/// Errors while building an instance
#[derive(Error, Debug, Clone)]
pub enum BuildError {
    /// An in-flight ancestor is already building the same object
    #[error("a cyclic dependency was detected: {}", fmt_chain(.chain))]
    Cyclic { chain: Vec<TypeInfo> },

    /// The builder's configuration could not be compiled
    #[error(transparent)]
    Configuration(#[from] ConfigError),

    /// A dependency of the object under construction could not be resolved
    #[error("'{parent}' needs '{target}' but it could not be resolved: {source}")]
    Dependency {
        parent: TypeInfo,
        target: TypeInfo,
        #[source]
        source: Box<ResolveError>,
    },

    /// The construction callback itself failed
    #[error("construction of '{product}' failed: {error}")]
    Construction {
        product: &'static str,
        error: Arc<DynError>,
    },

    /// A constructor argument did not have the expected type
    #[error("constructor argument {position} is not a '{required_type}'")]
    Argument {
        position: usize,
        required_type: &'static str,
    },
}

/// Configuration errors reported at compile time, never silently defaulted
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    /// No constructor satisfies the supplied parameters
    #[error("no constructor of '{concrete}' can be satisfied by the supplied parameters")]
    NoConstructor { concrete: TypeInfo },

    /// More override parameters were supplied than the constructor declares
    #[error("{supplied} override parameters were supplied but the constructor declares {declared}")]
    ParameterCount { supplied: usize, declared: usize },

    /// A required member injection target cannot be satisfied
    #[error("member '{member}' of '{concrete}' cannot be satisfied")]
    MemberUnsatisfied {
        concrete: TypeInfo,
        member: &'static str,
    },
}

fn fmt_chain(chain: &[TypeInfo]) -> String {
    chain
        .iter()
        .map(|info| info.type_name)
        .collect::<Vec<_>>()
        .join(" -> ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cyclic_error_lists_the_full_chain() {
        let chain = vec![TypeInfo::of::<u8>(), TypeInfo::of::<u16>(), TypeInfo::of::<u8>()];
        let error = BuildError::Cyclic { chain };
        let message = error.to_string();
        assert!(message.contains("u8 -> u16 -> u8"), "got: {message}");
    }

    #[test]
    fn parameter_count_error_names_both_counts() {
        let error = ConfigError::ParameterCount {
            supplied: 3,
            declared: 1,
        };
        assert!(error.to_string().contains('3'));
        assert!(error.to_string().contains('1'));
    }
}
