//! Tabular containers: the raw per-artifact table and the combined price table.

use chrono::NaiveDate;

use crate::domain::PriceRecord;

pub const COL_SISTEMA: &str = "Sistema";
pub const COL_FECHA: &str = "Fecha";
pub const COL_HORA: &str = "Hora";
pub const COL_CLAVE: &str = "Clave";
pub const COL_PML: &str = "PML";
pub const COL_ENERGIA: &str = "Energia";
pub const COL_PERDIDAS: &str = "Perdidas";
pub const COL_CONGESTION: &str = "Congestion";

/// Columns the ingestion API requires, in payload order.
pub const REQUIRED_COLUMNS: [&str; 8] = [
    COL_SISTEMA,
    COL_FECHA,
    COL_HORA,
    COL_CLAVE,
    COL_PML,
    COL_ENERGIA,
    COL_CONGESTION,
    COL_PERDIDAS,
];

/// Column order of the combined CSV export.
const EXPORT_COLUMNS: [&str; 8] = [
    COL_SISTEMA,
    COL_FECHA,
    COL_HORA,
    COL_CLAVE,
    COL_PML,
    COL_ENERGIA,
    COL_PERDIDAS,
    COL_CONGESTION,
];

/// A table as the artifact presents it: cleaned header labels and string cells.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTable {
    pub headers: Vec<String>,
    /// Data rows with the 1-based line number they came from.
    pub rows: Vec<(usize, Vec<String>)>,
}

impl RawTable {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }
}

/// The combined, normalized table for one report date.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceTable {
    pub date: NaiveDate,
    /// Column labels present after renaming (canonical names where mapped).
    pub columns: Vec<String>,
    /// Records in subsystem order, source row order within a subsystem.
    pub records: Vec<PriceRecord>,
}

impl PriceTable {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    /// Required API columns absent from this table.
    pub fn missing_columns(&self) -> Vec<String> {
        REQUIRED_COLUMNS
            .iter()
            .filter(|c| !self.has_column(c))
            .map(|c| c.to_string())
            .collect()
    }

    /// Render the canonical columns as CSV.
    pub fn to_csv(&self) -> Result<String, csv::Error> {
        let mut wtr = csv::Writer::from_writer(vec![]);
        wtr.write_record(EXPORT_COLUMNS)?;
        for r in &self.records {
            wtr.write_record([
                r.subsystem.to_string(),
                r.date.format("%Y-%m-%d").to_string(),
                r.hora.to_string(),
                r.node.clone(),
                r.pml.to_string(),
                r.energy.to_string(),
                r.loss.to_string(),
                r.congestion.to_string(),
            ])?;
        }
        let data = wtr.into_inner().map_err(|e| e.into_error())?;
        Ok(String::from_utf8_lossy(&data).into_owned())
    }

    /// BLAKE3 digest of [`PriceTable::to_csv`].
    pub fn content_hash(&self) -> Result<String, csv::Error> {
        Ok(blake3::hash(self.to_csv()?.as_bytes()).to_hex().to_string())
    }
}
