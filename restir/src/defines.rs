use std::fmt;

use fxhash::FxHashMap;

/// Preprocessor definitions a stage program is specialized with.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Defines {
    items: FxHashMap<String, String>,
}

impl Defines {
    pub fn set(
        &mut self,
        name: impl Into<String>,
        value: impl ToString,
    ) -> &mut Self {
        self.items.insert(name.into(), value.to_string());
        self
    }

    pub fn set_flag(
        &mut self,
        name: impl Into<String>,
        value: bool,
    ) -> &mut Self {
        self.set(name, if value { "1" } else { "0" })
    }

    pub fn extend(&mut self, other: &Defines) -> &mut Self {
        for (name, value) in &other.items {
            self.items.insert(name.clone(), value.clone());
        }

        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.items.get(name).map(|value| value.as_str())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns all definitions, sorted by name so that the generated code is
    /// stable across runs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        let mut items: Vec<_> = self
            .items
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
            .collect();

        items.sort_unstable();
        items.into_iter()
    }
}

impl fmt::Debug for Defines {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}
