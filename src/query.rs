use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Most recent ATL06 product version on the archive.
pub const LATEST_VERSION: &str = "006";

/// Search descriptor for one run: product, spatial extent, date range.
/// Built once at the top of the pipeline and consumed read-only by the
/// search, subset and order stages.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct Query {
    short_name: String,
    version: String,
    date_range: [NaiveDate; 2],
    extent: SpatialExtent,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(untagged)]
pub enum SpatialExtent {
    /// [west, south, east, north] in decimal degrees.
    BoundingBox { bbox: [f64; 4] },
    /// Vector file whose first polygon is used as the search region.
    PolygonFile { polygon_file: PathBuf },
    /// Explicit orbit cycles and reference ground tracks, no spatial filter.
    OrbitalTracks {
        cycles: Vec<String>,
        tracks: Vec<String>,
    },
}

impl Query {
    pub fn new(short_name: &str, extent: SpatialExtent, date_range: [&str; 2]) -> Result<Self> {
        let start = date_range[0].parse::<NaiveDate>()?;
        let end = date_range[1].parse::<NaiveDate>()?;
        Ok(Self {
            short_name: short_name.to_string(),
            version: LATEST_VERSION.to_string(),
            date_range: [start, end],
            extent,
        })
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    pub fn short_name(&self) -> &str {
        &self.short_name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn extent(&self) -> &SpatialExtent {
        &self.extent
    }

    #[allow(dead_code)]
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let query: Self = toml::from_str(&content)?;
        Ok(query)
    }

    #[allow(dead_code)]
    pub fn write<P: AsRef<Path>>(self: &Self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Parameters for the CMR granule search endpoint.
    pub fn cmr_params(self: &Self) -> Result<Vec<(String, String)>> {
        let mut params = vec![
            ("short_name".to_string(), self.short_name.clone()),
            ("version".to_string(), self.version.clone()),
            ("temporal".to_string(), self.temporal()),
        ];
        match &self.extent {
            SpatialExtent::BoundingBox { bbox } => {
                params.push(("bounding_box".to_string(), join_floats(bbox)));
            }
            SpatialExtent::PolygonFile { polygon_file } => {
                let ring = polygon_ring(polygon_file)?;
                params.push(("polygon".to_string(), join_ring(&ring)));
            }
            SpatialExtent::OrbitalTracks { cycles, tracks } => {
                params.push((
                    "options[readable_granule_name][pattern]".to_string(),
                    "true".to_string(),
                ));
                for track in tracks {
                    for cycle in cycles {
                        params.push((
                            "readable_granule_name[]".to_string(),
                            format!("*_{track}{cycle}??_*"),
                        ));
                    }
                }
            }
        }
        Ok(params)
    }

    /// Parameters for the subsetting side of an order request. The subsetter
    /// uses different keys than the metadata search for the same constraints.
    pub fn subset_params(self: &Self) -> Result<Vec<(String, String)>> {
        let mut params = vec![("time".to_string(), self.temporal())];
        match &self.extent {
            SpatialExtent::BoundingBox { bbox } => {
                params.push(("bbox".to_string(), join_floats(bbox)));
            }
            SpatialExtent::PolygonFile { polygon_file } => {
                let ring = polygon_ring(polygon_file)?;
                params.push(("Boundingshape".to_string(), join_ring(&ring)));
            }
            // Track-based queries carry no spatial subset constraint.
            SpatialExtent::OrbitalTracks { .. } => {}
        }
        Ok(params)
    }

    fn temporal(&self) -> String {
        format!(
            "{}T00:00:00Z,{}T23:59:59Z",
            self.date_range[0], self.date_range[1]
        )
    }
}

fn join_floats(values: &[f64]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn join_ring(ring: &[(f64, f64)]) -> String {
    ring.iter()
        .map(|(lon, lat)| format!("{lon},{lat}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Read the outer ring of the first polygon in a shapefile as lon,lat pairs.
/// The ring is closed (first vertex repeated at the end) as the search API
/// expects.
fn polygon_ring(path: &Path) -> Result<Vec<(f64, f64)>> {
    let polygons = shapefile::read_shapes_as::<_, shapefile::Polygon>(path)?;
    let polygon = polygons
        .first()
        .ok_or(anyhow!("no polygons found in {}", path.display()))?;
    let ring = polygon
        .rings()
        .iter()
        .find_map(|r| match r {
            shapefile::PolygonRing::Outer(points) => Some(points),
            shapefile::PolygonRing::Inner(_) => None,
        })
        .ok_or(anyhow!("polygon in {} has no outer ring", path.display()))?;

    let mut coords: Vec<(f64, f64)> = ring.iter().map(|p| (p.x, p.y)).collect();
    close_ring(&mut coords);
    Ok(coords)
}

fn close_ring(coords: &mut Vec<(f64, f64)>) {
    if coords.first() != coords.last() {
        if let Some(first) = coords.first().copied() {
            coords.push(first);
        }
    }
}
