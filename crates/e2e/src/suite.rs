//! Built-in scenarios for the documentation site
//!
//! The YAML files under `specs/` are compiled into the library so the suite
//! runs without a checkout of the spec directory.

use crate::error::E2eResult;
use crate::spec::{ensure_unique_names, TestSpec};

const BUILTIN: &[(&str, &str)] = &[
    ("01-homepage-title.yaml", include_str!("../specs/01-homepage-title.yaml")),
    ("02-docs-navigation.yaml", include_str!("../specs/02-docs-navigation.yaml")),
    ("03-search-interaction.yaml", include_str!("../specs/03-search-interaction.yaml")),
];

/// Parse the built-in scenarios in declaration order
pub fn builtin_specs() -> E2eResult<Vec<TestSpec>> {
    let specs = BUILTIN
        .iter()
        .map(|(_, yaml)| TestSpec::from_yaml(yaml))
        .collect::<E2eResult<Vec<_>>>()?;
    ensure_unique_names(&specs)?;
    Ok(specs)
}
