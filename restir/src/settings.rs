use log::warn;

use crate::{Toggles, TopologyKind};

const DEFAULT_MAX_BOUNCES: u32 = 3;

/// User-facing configuration of a pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Settings {
    pub toggles: Toggles,
    pub max_bounces: u32,
    pub topology: TopologyKind,
}

impl Settings {
    pub fn with_toggles(mut self, toggles: Toggles) -> Self {
        self.toggles = toggles;
        self
    }

    pub fn with_max_bounces(mut self, max_bounces: u32) -> Self {
        self.max_bounces = max_bounces;
        self
    }

    pub fn with_topology(mut self, topology: TopologyKind) -> Self {
        assert!(
            topology != TopologyKind::Custom,
            "Custom topologies must be passed via Pipeline::with_topology()"
        );

        self.topology = topology;
        self
    }

    /// Parses the property bag a render-graph host passes when it creates
    /// the pipeline.
    ///
    /// Unknown keys and malformed values are reported and skipped, keeping
    /// the defaults.
    pub fn from_properties<'a>(
        props: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Self {
        let mut this = Self::default();

        for (key, value) in props {
            match key {
                "temporalReuse" => {
                    parse_bool(key, value, &mut this.toggles.temporal_reuse);
                }

                "spatialReuse" => {
                    parse_bool(key, value, &mut this.toggles.spatial_reuse);
                }

                "directLight" => {
                    parse_bool(key, value, &mut this.toggles.direct_light);
                }

                "indirectLight" => {
                    parse_bool(key, value, &mut this.toggles.indirect_light);
                }

                "maxBounces" => match value.parse() {
                    Ok(value) => this.max_bounces = value,
                    Err(_) => warn!("Ignoring malformed `{key}`: {value}"),
                },

                "topology" => match TopologyKind::parse(value) {
                    Some(kind) => this.topology = kind,
                    None => warn!("Ignoring unknown topology: {value}"),
                },

                _ => warn!("Ignoring unknown property: {key}"),
            }
        }

        this
    }

    /// Serializes settings back into the property bag understood by
    /// [`Self::from_properties()`].
    pub fn properties(&self) -> Vec<(&'static str, String)> {
        vec![
            ("temporalReuse", self.toggles.temporal_reuse.to_string()),
            ("spatialReuse", self.toggles.spatial_reuse.to_string()),
            ("directLight", self.toggles.direct_light.to_string()),
            ("indirectLight", self.toggles.indirect_light.to_string()),
            ("maxBounces", self.max_bounces.to_string()),
            ("topology", self.topology.name().to_string()),
        ]
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            toggles: Default::default(),
            max_bounces: DEFAULT_MAX_BOUNCES,
            topology: Default::default(),
        }
    }
}

fn parse_bool(key: &str, value: &str, out: &mut bool) {
    match value {
        "true" | "1" => *out = true,
        "false" | "0" => *out = false,
        _ => warn!("Ignoring malformed `{key}`: {value}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_properties() {
        let target = Settings::from_properties([
            ("spatialReuse", "false"),
            ("indirectLight", "0"),
            ("maxBounces", "5"),
            ("topology", "split"),
        ]);

        assert_eq!(
            Settings {
                toggles: Toggles {
                    temporal_reuse: true,
                    spatial_reuse: false,
                    direct_light: true,
                    indirect_light: false,
                },
                max_bounces: 5,
                topology: TopologyKind::Split,
            },
            target
        );
    }

    #[test]
    fn from_malformed_properties() {
        let target = Settings::from_properties([
            ("temporalReuse", "maybe"),
            ("maxBounces", "-1"),
            ("topology", "custom"),
            ("samplesPerPixel", "4"),
        ]);

        assert_eq!(Settings::default(), target);
    }

    #[test]
    fn properties() {
        let target = Settings::default()
            .with_max_bounces(1)
            .with_topology(TopologyKind::UpdateShade);

        let props = target.properties();

        assert_eq!(("maxBounces", "1".to_string()), props[4]);
        assert_eq!(("topology", "update_shade".to_string()), props[5]);

        let props: Vec<_> =
            props.iter().map(|(k, v)| (*k, v.as_str())).collect();

        assert_eq!(target, Settings::from_properties(props));
    }
}
