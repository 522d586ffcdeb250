//! Channel widths of the named try-on inputs.
//!
//! Each input kind a dataset can produce (cloth image, pose heatmaps, flow,
//! ...) carries a fixed tensor depth. Networks size their first layers by
//! summing the depths of the inputs selected in the configuration.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;

use crate::errors::{Result, TrainingError};

pub const AGNOSTIC_CHANNELS: usize = 3;
pub const BODY_SHAPE_CHANNELS: usize = 1;
pub const CLOTH_CHANNELS: usize = 3;
pub const CLOTH_MASK_CHANNELS: usize = 1;
pub const COCOPOSE_CHANNELS: usize = 18;
pub const DENSEPOSE_CHANNELS: usize = 3;
pub const FACE_CHANNELS: usize = 3;
pub const FLOW_CHANNELS: usize = 2;
pub const IMAGE_CHANNELS: usize = 3;
pub const PERSON_CHANNELS: usize = 3;

const BUILTIN_INPUTS: &[(&str, usize)] = &[
    ("agnostic", AGNOSTIC_CHANNELS),
    ("body_shape", BODY_SHAPE_CHANNELS),
    ("cloth", CLOTH_CHANNELS),
    ("cloth_mask", CLOTH_MASK_CHANNELS),
    ("cocopose", COCOPOSE_CHANNELS),
    ("densepose", DENSEPOSE_CHANNELS),
    ("face", FACE_CHANNELS),
    ("flow", FLOW_CHANNELS),
    ("image", IMAGE_CHANNELS),
    ("person", PERSON_CHANNELS),
];

static DEFAULT_REGISTRY: Lazy<ChannelRegistry> = Lazy::new(ChannelRegistry::builtin);

/// Normalizes an input kind so `Body_Shape`, `bodyshape` and `BODY_SHAPE`
/// resolve to the same entry.
pub fn normalize_input_name(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_')
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Read-only table from input kind to channel depth.
#[derive(Debug, Clone, Default)]
pub struct ChannelRegistry {
    channels: BTreeMap<String, usize>,
}

impl ChannelRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry holding every input kind the built-in datasets emit.
    pub fn builtin() -> Self {
        BUILTIN_INPUTS
            .iter()
            .fold(Self::empty(), |registry, (name, channels)| {
                registry.with_input(name, *channels)
            })
    }

    /// Adds or replaces an entry. Only available while the registry is owned,
    /// i.e. before it is shared.
    pub fn with_input(mut self, name: &str, channels: usize) -> Self {
        self.channels.insert(normalize_input_name(name), channels);
        self
    }

    pub fn get(&self, name: &str) -> Option<usize> {
        self.channels.get(&normalize_input_name(name)).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Total channel depth of the given inputs.
    pub fn channel_count<N: InputNames + ?Sized>(&self, names: &N) -> Result<usize> {
        let mut total = 0;
        for name in names.input_names() {
            let channels = self
                .get(name)
                .ok_or_else(|| TrainingError::UnknownInputKind(name.to_string()))?;
            total += channels;
        }
        Ok(total)
    }
}

/// Sums channel depths using the built-in registry.
pub fn channel_count<N: InputNames + ?Sized>(names: &N) -> Result<usize> {
    DEFAULT_REGISTRY.channel_count(names)
}

pub fn default_registry() -> &'static ChannelRegistry {
    &DEFAULT_REGISTRY
}

/// One or many input names. A bare string counts as a single input.
pub trait InputNames {
    fn input_names(&self) -> Vec<&str>;
}

impl InputNames for str {
    fn input_names(&self) -> Vec<&str> {
        vec![self]
    }
}

impl InputNames for String {
    fn input_names(&self) -> Vec<&str> {
        vec![self.as_str()]
    }
}

impl<S: AsRef<str>> InputNames for [S] {
    fn input_names(&self) -> Vec<&str> {
        self.iter().map(AsRef::as_ref).collect()
    }
}

impl<S: AsRef<str>, const N: usize> InputNames for [S; N] {
    fn input_names(&self) -> Vec<&str> {
        self.iter().map(AsRef::as_ref).collect()
    }
}

impl<S: AsRef<str>> InputNames for Vec<S> {
    fn input_names(&self) -> Vec<&str> {
        self.iter().map(AsRef::as_ref).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sums_selected_inputs() {
        assert_eq!(
            channel_count(&["cloth", "person"]).unwrap(),
            CLOTH_CHANNELS + PERSON_CHANNELS
        );
        assert_eq!(
            channel_count(&vec!["agnostic".to_string(), "cocopose".to_string()]).unwrap(),
            21
        );
    }

    #[test]
    fn single_name_is_one_input() {
        assert_eq!(channel_count("cloth").unwrap(), CLOTH_CHANNELS);
        assert_eq!(channel_count(&"flow".to_string()).unwrap(), FLOW_CHANNELS);
    }

    #[test]
    fn lookup_ignores_case_and_underscores() {
        assert_eq!(channel_count("BODY_SHAPE").unwrap(), 1);
        assert_eq!(channel_count("bodyShape").unwrap(), 1);
        assert_eq!(channel_count("Cloth_Mask").unwrap(), 1);
    }

    #[test]
    fn unknown_input_is_reported() {
        let err = channel_count(&["unknown_type"]).unwrap_err();
        assert!(matches!(err, TrainingError::UnknownInputKind(name) if name == "unknown_type"));
    }

    #[test]
    fn empty_selection_has_no_channels() {
        let none: [&str; 0] = [];
        assert_eq!(channel_count(&none).unwrap(), 0);
    }

    #[test]
    fn custom_registry_extends_builtin() {
        let registry = ChannelRegistry::builtin().with_input("edge_map", 1);
        assert_eq!(registry.channel_count(&["edge_map", "cloth"]).unwrap(), 4);
        assert!(!default_registry().contains("edge_map"));
    }
}
