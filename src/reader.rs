use crate::error::GranuleError;
use crate::table::{Column, MergedTable, TableBlock};
use crate::variables::{VariablePath, VariableSelection, BEAM_GROUPS};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use hdf5::types::VarLenUnicode;
use log::warn;
use regex::Regex;
use std::path::{Path, PathBuf};

/// Variables every load materializes regardless of the caller's selection:
/// the coordinate pair plus the time fields attached to each granule.
const REQUIRED_VARIABLES: [&str; 5] = [
    "latitude",
    "longitude",
    "delta_time",
    "atlas_sdp_gps_epoch",
    "data_end_utc",
];

/// Filename contract for subsetted granules delivered by the archive. Fixed
/// field widths; anything else is not recognized as loadable input.
const FILENAME_PATTERN: &str = r"^processed_ATL(?<product>\d{2})_(?<datetime>\d{14})_(?<rgt>\d{4})(?<cycle>\d{2})(?<orbitsegment>\d{2})_(?<version>\d{3})_(?<revision>\d{2})\.h5$";

/// Metadata encoded in a processed granule filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GranuleFilename {
    pub product: String,
    pub start_time: NaiveDateTime,
    pub rgt: u16,
    pub cycle: u8,
    pub orbit_segment: u8,
    pub version: String,
    pub revision: String,
}

impl GranuleFilename {
    pub fn parse(name: &str) -> Result<Self, GranuleError> {
        let re = Regex::new(FILENAME_PATTERN).expect("Regex pattern should always compile");
        let captures = re
            .captures(name)
            .ok_or(GranuleError::Pattern(name.to_string()))?;

        let start_time = NaiveDateTime::parse_from_str(&captures["datetime"], "%Y%m%d%H%M%S")
            .map_err(|_| GranuleError::Pattern(name.to_string()))?;
        let parse_err = || GranuleError::Pattern(name.to_string());

        Ok(Self {
            product: format!("ATL{}", &captures["product"]),
            start_time,
            rgt: captures["rgt"].parse().map_err(|_| parse_err())?,
            cycle: captures["cycle"].parse().map_err(|_| parse_err())?,
            orbit_segment: captures["orbitsegment"].parse().map_err(|_| parse_err())?,
            version: captures["version"].to_string(),
            revision: captures["revision"].to_string(),
        })
    }
}

/// Discovers processed granules under a root directory and loads the
/// selected variables of every file into one [`MergedTable`].
pub struct GranuleReader {
    files: Vec<(PathBuf, GranuleFilename)>,
    vars: VariableSelection,
}

impl GranuleReader {
    /// Scan `root` for files of `product` matching the filename contract.
    /// Non-matching files are skipped with a warning.
    pub fn new<P: AsRef<Path>>(root: P, product: &str) -> Result<Self> {
        let mut entries: Vec<PathBuf> = std::fs::read_dir(&root)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect();
        // Deterministic file-enumeration order
        entries.sort();

        let mut files = vec![];
        for path in entries {
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default();
            match GranuleFilename::parse(name) {
                Ok(meta) if meta.product == product => files.push((path, meta)),
                Ok(meta) => {
                    warn!("skipping {name}: product {} does not match {product}", meta.product);
                }
                Err(_) => {
                    warn!("skipping {name}: does not match granule filename pattern");
                }
            }
        }

        let mut vars = VariableSelection::new();
        vars.append(false, &REQUIRED_VARIABLES);
        Ok(Self { files, vars })
    }

    pub fn files(&self) -> &[(PathBuf, GranuleFilename)] {
        &self.files
    }

    /// Selection of variables to materialize, accumulated before `load`.
    pub fn vars_mut(&mut self) -> &mut VariableSelection {
        &mut self.vars
    }

    /// Read every discovered file and concatenate them in enumeration order.
    pub fn load(self: &Self) -> Result<MergedTable> {
        let list = self.vars.clone().finalize();
        let mut table = MergedTable::new();
        for (path, _) in &self.files {
            let block = read_granule(path, &list)
                .map_err(|e| anyhow!("error reading {}: {e}", path.display()))?;
            table.extend(block)?;
        }
        Ok(table)
    }
}

fn read_granule(path: &Path, list: &crate::variables::VariableList) -> Result<TableBlock> {
    let file = hdf5::File::open(path)?;
    let sdp_epoch = read_sdp_epoch(&file)?;

    // Beam groups present in this (possibly subsetted) granule, with their
    // point counts
    let mut beams: Vec<(&str, usize)> = vec![];
    for beam in BEAM_GROUPS {
        let lat_path = format!("/{beam}/land_ice_segments/latitude");
        if let Ok(dataset) = file.dataset(&lat_path) {
            beams.push((beam, dataset.read_raw::<f64>()?.len()));
        }
    }
    let rows: usize = beams.iter().map(|(_, n)| n).sum();
    if rows == 0 {
        return Err(anyhow!("granule contains no measurement points"));
    }

    let mut block = TableBlock::new();
    for name in list.names() {
        let column = match name.as_str() {
            "delta_time" => {
                let mut values = Vec::with_capacity(rows);
                for (beam, n) in &beams {
                    let seconds = read_per_beam(&file, &VariablePath::of(name).resolve(beam), *n)?;
                    values.extend(seconds.into_iter().map(|s| add_seconds(sdp_epoch, s)));
                }
                Column::Datetime(values)
            }
            "atlas_sdp_gps_epoch" => Column::Datetime(vec![sdp_epoch; rows]),
            "data_start_utc" | "data_end_utc" | "granule_start_utc" | "granule_end_utc" => {
                let stamp = read_utc_string(&file, &VariablePath::of(name).resolve(""))?;
                Column::Datetime(vec![stamp; rows])
            }
            _ => match VariablePath::of(name) {
                VariablePath::OrbitInfo(p) | VariablePath::Ancillary(p) => {
                    let value = read_scalar(&file, &format!("/{p}"))?;
                    Column::Int(vec![value.round() as i64; rows])
                }
                path @ VariablePath::PerBeam(_) => {
                    let mut values = Vec::with_capacity(rows);
                    for (beam, n) in &beams {
                        values.extend(read_per_beam(&file, &path.resolve(beam), *n)?);
                    }
                    Column::Float(values)
                }
            },
        };
        block.push(name, column)?;
    }
    Ok(block)
}

fn read_per_beam(file: &hdf5::File, path: &str, expected: usize) -> Result<Vec<f64>> {
    let values = file.dataset(path)?.read_raw::<f64>()?;
    if values.len() != expected {
        return Err(anyhow!(
            "dataset {path} has {} values, expected {expected}",
            values.len()
        ));
    }
    Ok(values)
}

fn read_scalar(file: &hdf5::File, path: &str) -> Result<f64> {
    let values = file.dataset(path)?.read_raw::<f64>()?;
    values
        .first()
        .copied()
        .ok_or(anyhow!("dataset {path} is empty"))
}

/// The granule's reference epoch: seconds on the GPS time scale, anchored at
/// the GPS epoch.
fn read_sdp_epoch(file: &hdf5::File) -> Result<DateTime<Utc>> {
    let seconds = read_scalar(file, "/ancillary_data/atlas_sdp_gps_epoch")?;
    Ok(add_seconds(gps_epoch(), seconds))
}

fn read_utc_string(file: &hdf5::File, path: &str) -> Result<DateTime<Utc>> {
    let values = file.dataset(path)?.read_raw::<VarLenUnicode>()?;
    let text = values
        .first()
        .ok_or(anyhow!("dataset {path} is empty"))?
        .as_str()
        .to_string();
    parse_utc(&text).ok_or(anyhow!("dataset {path} holds no parseable timestamp: {text}"))
}

fn parse_utc(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(stamp) = DateTime::parse_from_rfc3339(text) {
        return Some(stamp.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn gps_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(1980, 1, 6, 0, 0, 0)
        .single()
        .expect("GPS epoch is a valid timestamp")
}

fn add_seconds(epoch: DateTime<Utc>, seconds: f64) -> DateTime<Utc> {
    epoch + Duration::milliseconds((seconds * 1e3).round() as i64)
}
