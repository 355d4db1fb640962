use crate::table::{Column, MergedTable};
use anyhow::{anyhow, Result};
use log::warn;
use shapefile::dbase::{FieldName, FieldValue, Record, TableWriterBuilder};
use shapefile::Point;
use std::path::{Path, PathBuf};

/// Attribute names are limited to 10 characters by the DBF format.
const MAX_FIELD_NAME_LEN: usize = 10;

/// Reinterpret the merged table as point features and write them to
/// `<out_dir>/<name>.shp` (plus sidecar files). One feature per table row,
/// no filtering; geometries come from the longitude/latitude columns and all
/// columns are carried as attributes. Datetime columns are normalized to
/// `YYYY-MM-DD` strings, discarding time of day.
pub fn write_shapefile(table: &MergedTable, out_dir: &Path, name: &str) -> Result<PathBuf> {
    let longitude = table.float_column("longitude")?;
    let latitude = table.float_column("latitude")?;

    let field_names: Vec<String> = table
        .column_names()
        .iter()
        .map(|n| dbf_field_name(n))
        .collect();
    let mut seen = std::collections::HashSet::new();
    for (column_name, field_name) in table.column_names().iter().zip(&field_names) {
        if !seen.insert(field_name.as_str()) {
            return Err(anyhow!(
                "column '{}' collides with another attribute after truncation to '{}'",
                column_name,
                field_name
            ));
        }
    }

    let mut builder = TableWriterBuilder::new();
    for (column_name, field_name) in table.column_names().iter().zip(&field_names) {
        let field = FieldName::try_from(field_name.as_str())
            .map_err(|e| anyhow!("invalid attribute name {field_name:?}: {e:?}"))?;
        builder = match table.column(column_name) {
            Some(Column::Float(_)) => builder.add_numeric_field(field, 20, 8),
            Some(Column::Int(_)) => builder.add_numeric_field(field, 11, 0),
            Some(Column::Datetime(_)) => builder.add_character_field(field, 10),
            None => return Err(anyhow!("missing column '{}'", column_name)),
        };
    }

    if !out_dir.exists() {
        std::fs::create_dir_all(out_dir)?;
    }
    let shp_path = out_dir.join(format!("{name}.shp"));
    let mut writer = shapefile::Writer::from_path(&shp_path, builder)?;

    for row in 0..table.rows() {
        let geometry = Point::new(longitude[row], latitude[row]);

        let mut record = Record::default();
        for (column_name, field_name) in table.column_names().iter().zip(&field_names) {
            let value = match table.column(column_name) {
                Some(Column::Float(values)) => FieldValue::Numeric(Some(values[row])),
                Some(Column::Int(values)) => FieldValue::Numeric(Some(values[row] as f64)),
                Some(Column::Datetime(values)) => {
                    FieldValue::Character(Some(values[row].format("%Y-%m-%d").to_string()))
                }
                None => return Err(anyhow!("missing column '{}'", column_name)),
            };
            record.insert(field_name.clone(), value);
        }
        writer.write_shape_and_record(&geometry, &record)?;
    }

    Ok(shp_path)
}

fn dbf_field_name(name: &str) -> String {
    let truncated: String = name.chars().take(MAX_FIELD_NAME_LEN).collect();
    if truncated != name {
        warn!("attribute name '{name}' truncated to '{truncated}'");
    }
    truncated
}
