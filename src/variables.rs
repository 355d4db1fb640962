use crate::auth::Session;
use anyhow::{anyhow, Result};
use std::collections::HashSet;

const CAPABILITIES_API: &str = "https://n5eil02u.ecs.nsidc.org/egi/capabilities";

/// The six beam / ground-track groups of every ICESat-2 granule.
pub const BEAM_GROUPS: [&str; 6] = ["gt1l", "gt1r", "gt2l", "gt2r", "gt3l", "gt3r"];

/// Variables included whenever an append call asks for the defaults. Time and
/// spacecraft orientation, plus the coordinate pair.
pub const DEFAULT_VARIABLES: [&str; 9] = [
    "delta_time",
    "latitude",
    "longitude",
    "sc_orient",
    "atlas_sdp_gps_epoch",
    "cycle_number",
    "rgt",
    "data_start_utc",
    "data_end_utc",
];

/// Where a named variable lives inside a granule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariablePath {
    /// Scalar under /orbit_info.
    OrbitInfo(String),
    /// Scalar under /ancillary_data.
    Ancillary(String),
    /// Per-point dataset under /<beam>/..., one instance per beam group.
    PerBeam(String),
}

impl VariablePath {
    pub fn of(name: &str) -> VariablePath {
        match name {
            "rgt" | "cycle_number" | "sc_orient" | "orbit_number" => {
                VariablePath::OrbitInfo(format!("orbit_info/{name}"))
            }
            "atlas_sdp_gps_epoch" | "data_start_utc" | "data_end_utc" | "start_geoseg"
            | "end_geoseg" | "granule_start_utc" | "granule_end_utc" => {
                VariablePath::Ancillary(format!("ancillary_data/{name}"))
            }
            "dh_fit_dx" | "dh_fit_dy" | "dh_fit_dx_sigma" => {
                VariablePath::PerBeam(format!("land_ice_segments/fit_statistics/{name}"))
            }
            "sigma_geo_h" => {
                VariablePath::PerBeam(format!("land_ice_segments/ground_track/{name}"))
            }
            _ => VariablePath::PerBeam(format!("land_ice_segments/{name}")),
        }
    }

    /// Full dataset path; `beam` is only consulted for per-beam variables.
    pub fn resolve(&self, beam: &str) -> String {
        match self {
            VariablePath::OrbitInfo(p) | VariablePath::Ancillary(p) => format!("/{p}"),
            VariablePath::PerBeam(p) => format!("/{beam}/{p}"),
        }
    }
}

/// Order-preserving, duplicate-eliminating accumulator for the variables of a
/// subset or read request. Conventionally built up over several append calls
/// (coordinates, then quality, then geophysical fields) so the request stays
/// auditable.
#[derive(Debug, Clone, Default)]
pub struct VariableSelection {
    wanted: Vec<String>,
    seen: HashSet<String>,
}

impl VariableSelection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append variables; with `defaults` the library-defined default set is
    /// appended first. Names already present keep their original position.
    pub fn append(&mut self, defaults: bool, var_list: &[&str]) -> &mut Self {
        if defaults {
            for name in DEFAULT_VARIABLES {
                self.push(name);
            }
        }
        for name in var_list {
            self.push(name);
        }
        self
    }

    fn push(&mut self, name: &str) {
        if self.seen.insert(name.to_string()) {
            self.wanted.push(name.to_string());
        }
    }

    pub fn wanted(&self) -> &[String] {
        &self.wanted
    }

    pub fn is_empty(&self) -> bool {
        self.wanted.is_empty()
    }

    /// Freeze the accumulated selection.
    pub fn finalize(self) -> VariableList {
        VariableList { names: self.wanted }
    }
}

/// Immutable, finalized variable selection.
#[derive(Debug, Clone)]
pub struct VariableList {
    names: Vec<String>,
}

impl VariableList {
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Expand the selection into the full dataset paths of the subset
    /// request's Coverage parameter, per-beam variables across all six beam
    /// groups.
    pub fn coverage(self: &Self) -> String {
        let mut paths: Vec<String> = vec![];
        for name in &self.names {
            match VariablePath::of(name) {
                p @ VariablePath::PerBeam(_) => {
                    for beam in BEAM_GROUPS {
                        paths.push(p.resolve(beam));
                    }
                }
                p => paths.push(p.resolve("")),
            }
        }
        paths.join(",")
    }
}

/// All path+variable combinations the subsetter can deliver for a product,
/// from the archive's capabilities document.
pub async fn avail(session: &Session, short_name: &str, version: &str) -> Result<Vec<String>> {
    let url = format!("{CAPABILITIES_API}/{short_name}.{version}.xml");
    let content = session.get(&url).send().await?.error_for_status()?.text().await?;
    parse_capabilities(&content)
}

fn parse_capabilities(content: &str) -> Result<Vec<String>> {
    let doc = roxmltree::Document::parse(content)?;
    let variables = doc
        .descendants()
        .filter(|n| n.has_tag_name("SubsetVariable"))
        .filter_map(|n| n.attribute("value").map(str::to_string))
        .collect::<Vec<_>>();
    if variables.is_empty() {
        return Err(anyhow!("capabilities document lists no subset variables"));
    }
    Ok(variables)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_preserves_first_appended_order() {
        let mut selection = VariableSelection::new();
        selection.append(false, &["latitude", "longitude"]);
        selection.append(false, &["h_li", "h_li_sigma"]);
        selection.append(false, &["atl06_quality_summary"]);
        assert_eq!(
            selection.wanted(),
            &[
                "latitude",
                "longitude",
                "h_li",
                "h_li_sigma",
                "atl06_quality_summary"
            ]
        );
    }

    #[test]
    fn test_append_eliminates_duplicates() {
        let mut selection = VariableSelection::new();
        selection.append(false, &["h_li", "latitude"]);
        selection.append(false, &["latitude", "h_li", "rgt"]);
        assert_eq!(selection.wanted(), &["h_li", "latitude", "rgt"]);
    }

    #[test]
    fn test_defaults_appended_once() {
        let mut selection = VariableSelection::new();
        selection.append(true, &["latitude", "longitude"]);
        selection.append(true, &["h_li"]);
        let wanted = selection.wanted();
        assert_eq!(
            wanted.iter().filter(|n| n.as_str() == "delta_time").count(),
            1
        );
        assert_eq!(wanted[0], "delta_time");
        assert_eq!(wanted.last().unwrap(), "h_li");
    }

    #[test]
    fn test_variable_paths() {
        assert_eq!(
            VariablePath::of("h_li").resolve("gt2r"),
            "/gt2r/land_ice_segments/h_li"
        );
        assert_eq!(
            VariablePath::of("dh_fit_dx").resolve("gt1l"),
            "/gt1l/land_ice_segments/fit_statistics/dh_fit_dx"
        );
        assert_eq!(VariablePath::of("rgt").resolve("gt1l"), "/orbit_info/rgt");
        assert_eq!(
            VariablePath::of("start_geoseg").resolve("gt1l"),
            "/ancillary_data/start_geoseg"
        );
    }

    #[test]
    fn test_coverage_expands_beam_groups() {
        let mut selection = VariableSelection::new();
        selection.append(false, &["h_li", "rgt"]);
        let coverage = selection.finalize().coverage();
        let paths: Vec<_> = coverage.split(',').collect();
        assert_eq!(paths.len(), 7);
        assert_eq!(paths[0], "/gt1l/land_ice_segments/h_li");
        assert_eq!(paths[5], "/gt3r/land_ice_segments/h_li");
        assert_eq!(paths[6], "/orbit_info/rgt");
    }

    #[test]
    fn test_parse_capabilities() {
        let xml = r#"<Capabilities>
            <SubsetVariables>
                <SubsetVariable value="/gt1l/land_ice_segments/h_li"/>
                <SubsetVariable value="/gt1l/land_ice_segments/latitude"/>
            </SubsetVariables>
        </Capabilities>"#;
        let variables = parse_capabilities(xml).unwrap();
        assert_eq!(variables.len(), 2);
        assert_eq!(variables[0], "/gt1l/land_ice_segments/h_li");
    }

    #[test]
    fn test_parse_capabilities_empty() {
        assert!(parse_capabilities("<Capabilities/>").is_err());
    }
}
