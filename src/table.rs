use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// One column of the merged table.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Float(Vec<f64>),
    Int(Vec<i64>),
    Datetime(Vec<DateTime<Utc>>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Float(v) => v.len(),
            Column::Int(v) => v.len(),
            Column::Datetime(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn append(&mut self, other: Column) -> Result<()> {
        match (self, other) {
            (Column::Float(a), Column::Float(b)) => a.extend(b),
            (Column::Int(a), Column::Int(b)) => a.extend(b),
            (Column::Datetime(a), Column::Datetime(b)) => a.extend(b),
            _ => return Err(anyhow!("column type changed between granules")),
        }
        Ok(())
    }
}

/// Columns contributed by a single granule file, all of equal length.
#[derive(Debug, Default)]
pub struct TableBlock {
    columns: Vec<(String, Column)>,
}

impl TableBlock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: &str, column: Column) -> Result<()> {
        if let Some((_, first)) = self.columns.first() {
            if first.len() != column.len() {
                return Err(anyhow!(
                    "column '{}' has {} values, expected {}",
                    name,
                    column.len(),
                    first.len()
                ));
            }
        }
        self.columns.push((name.to_string(), column));
        Ok(())
    }

    pub fn rows(&self) -> usize {
        self.columns.first().map(|(_, c)| c.len()).unwrap_or(0)
    }
}

/// The unified in-memory relation: one row per measurement point, one column
/// per requested variable. Built once by concatenating per-file blocks in
/// file-enumeration order; read-only afterward.
#[derive(Debug, Default)]
pub struct MergedTable {
    order: Vec<String>,
    columns: HashMap<String, Column>,
    rows: usize,
}

impl MergedTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Column names in first-appended order.
    pub fn column_names(&self) -> &[String] {
        &self.order
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    pub fn float_column(&self, name: &str) -> Result<&[f64]> {
        match self.columns.get(name) {
            Some(Column::Float(values)) => Ok(values),
            Some(_) => Err(anyhow!("column '{}' is not numeric", name)),
            None => Err(anyhow!("missing column '{}'", name)),
        }
    }

    /// Append a granule's rows. The first block establishes the schema; every
    /// later block must carry the same columns.
    pub fn extend(&mut self, block: TableBlock) -> Result<()> {
        if self.order.is_empty() {
            self.rows = block.rows();
            for (name, column) in block.columns {
                self.order.push(name.clone());
                self.columns.insert(name, column);
            }
            return Ok(());
        }

        if block.columns.len() != self.order.len() {
            return Err(anyhow!(
                "granule contributed {} columns, expected {}",
                block.columns.len(),
                self.order.len()
            ));
        }
        let added = block.rows();
        for (name, column) in block.columns {
            self.columns
                .get_mut(&name)
                .ok_or(anyhow!("granule contributed unknown column '{}'", name))?
                .append(column)?;
        }
        self.rows += added;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn block(offset: f64, n: usize) -> TableBlock {
        let mut block = TableBlock::new();
        block
            .push(
                "h_li",
                Column::Float((0..n).map(|i| offset + i as f64).collect()),
            )
            .unwrap();
        block.push("rgt", Column::Int(vec![116; n])).unwrap();
        block
            .push(
                "delta_time",
                Column::Datetime(vec![
                    Utc.with_ymd_and_hms(2020, 1, 3, 7, 36, 53).unwrap();
                    n
                ]),
            )
            .unwrap();
        block
    }

    #[test]
    fn test_block_rejects_ragged_columns() {
        let mut block = TableBlock::new();
        block.push("h_li", Column::Float(vec![1.0, 2.0])).unwrap();
        assert!(block.push("latitude", Column::Float(vec![1.0])).is_err());
    }

    #[test]
    fn test_merge_row_count_is_sum_of_blocks() {
        let mut table = MergedTable::new();
        table.extend(block(0.0, 10)).unwrap();
        table.extend(block(100.0, 10)).unwrap();
        assert_eq!(table.rows(), 20);
        assert_eq!(table.column_names(), &["h_li", "rgt", "delta_time"]);

        let h_li = table.float_column("h_li").unwrap();
        assert_eq!(h_li.len(), 20);
        // File-enumeration order is preserved across the merge
        assert_eq!(h_li[0], 0.0);
        assert_eq!(h_li[10], 100.0);
    }

    #[test]
    fn test_merge_rejects_schema_change() {
        let mut table = MergedTable::new();
        table.extend(block(0.0, 5)).unwrap();

        let mut bad = TableBlock::new();
        bad.push("h_li", Column::Float(vec![1.0])).unwrap();
        assert!(table.extend(bad).is_err());
    }

    #[test]
    fn test_merge_rejects_type_change() {
        let mut table = MergedTable::new();
        table.extend(block(0.0, 2)).unwrap();

        let mut bad = TableBlock::new();
        bad.push("h_li", Column::Int(vec![1, 2])).unwrap();
        bad.push("rgt", Column::Int(vec![116, 116])).unwrap();
        bad.push(
            "delta_time",
            Column::Datetime(vec![
                Utc.with_ymd_and_hms(2020, 1, 3, 7, 36, 53).unwrap();
                2
            ]),
        )
        .unwrap();
        assert!(table.extend(bad).is_err());
    }

    #[test]
    fn test_float_column_type_mismatch() {
        let mut table = MergedTable::new();
        table.extend(block(0.0, 2)).unwrap();
        assert!(table.float_column("rgt").is_err());
        assert!(table.float_column("nope").is_err());
    }
}
