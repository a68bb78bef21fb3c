//! Typed persisted tables.
//!
//! Wide tables hold one row per checkpoint with a column group per strategy;
//! each column is named `{field}{strategy_id}`, for example `totalAssetA` or
//! `ppsB`. Rows are unique by block and kept ascending.

use alloy::primitives::Address;
use std::collections::HashSet;
use std::str::FromStr;

use crate::merge::MergedRow;
use crate::store::{RawTable, StoreError};
use silo_chain::{CollateralRawRecord, StrategyRawRecord};

pub const BLOCK_COLUMN: &str = "block";

/// A record that is persisted as a group of columns.
pub trait ColumnGroup: Sized {
    /// Field names, in column order.
    const FIELDS: &'static [&'static str];

    /// Cells in [`Self::FIELDS`] order.
    fn encode(&self) -> Vec<String>;

    /// Rebuild from cells in [`Self::FIELDS`] order.
    fn decode(block: u64, cells: &[&str], suffix: &str) -> Result<Self, StoreError>;
}

fn parse_cell<T: FromStr>(column: &str, suffix: &str, value: &str) -> Result<T, StoreError> {
    value.trim().parse().map_err(|_| StoreError::InvalidValue {
        column: format!("{column}{suffix}"),
        value: value.to_string(),
    })
}

/// Float cells may be empty or `NaN`; both decode to NaN.
fn parse_float(column: &str, suffix: &str, value: &str) -> Result<f64, StoreError> {
    if value.trim().is_empty() {
        return Ok(f64::NAN);
    }
    parse_cell(column, suffix, value)
}

impl ColumnGroup for StrategyRawRecord {
    const FIELDS: &'static [&'static str] = &[
        "collateral",
        "collateralSymbol",
        "ratePerSec",
        "fullUtilizationRate",
        "lowExchangeRate",
        "highExchangeRate",
        "maxLTV",
        "totalAsset",
        "totalCollateral",
        "totalBorrow",
        "newCurrentRateInfo",
        "feeToProtocolRate",
    ];

    fn encode(&self) -> Vec<String> {
        vec![
            self.collateral.to_checksum(None),
            self.collateral_symbol.clone(),
            self.pair_rate_per_sec.to_string(),
            self.full_utilization_rate.to_string(),
            self.low_exchange_rate.to_string(),
            self.high_exchange_rate.to_string(),
            self.max_ltv.to_string(),
            self.total_asset.to_string(),
            self.total_collateral.to_string(),
            self.total_borrow.to_string(),
            self.rate_per_sec.to_string(),
            self.fee_to_protocol_rate.to_string(),
        ]
    }

    fn decode(block: u64, cells: &[&str], suffix: &str) -> Result<Self, StoreError> {
        let f = Self::FIELDS;
        Ok(Self {
            block,
            collateral: parse_cell::<Address>(f[0], suffix, cells[0])?,
            collateral_symbol: cells[1].to_string(),
            pair_rate_per_sec: parse_cell(f[2], suffix, cells[2])?,
            full_utilization_rate: parse_cell(f[3], suffix, cells[3])?,
            low_exchange_rate: parse_float(f[4], suffix, cells[4])?,
            high_exchange_rate: parse_float(f[5], suffix, cells[5])?,
            max_ltv: parse_float(f[6], suffix, cells[6])?,
            total_asset: parse_float(f[7], suffix, cells[7])?,
            total_collateral: parse_float(f[8], suffix, cells[8])?,
            total_borrow: parse_float(f[9], suffix, cells[9])?,
            rate_per_sec: parse_cell(f[10], suffix, cells[10])?,
            fee_to_protocol_rate: parse_cell(f[11], suffix, cells[11])?,
        })
    }
}

impl ColumnGroup for CollateralRawRecord {
    const FIELDS: &'static [&'static str] = &["pps"];

    fn encode(&self) -> Vec<String> {
        vec![self.share_price.to_string()]
    }

    fn decode(block: u64, cells: &[&str], suffix: &str) -> Result<Self, StoreError> {
        Ok(Self {
            block,
            share_price: parse_float(Self::FIELDS[0], suffix, cells[0])?,
        })
    }
}

/// Block-indexed table with one column group per strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct WideTable<R> {
    ids: Vec<String>,
    rows: Vec<MergedRow<R>>,
}

/// Raw strategy series for all strategies.
pub type StrategyTable = WideTable<StrategyRawRecord>;

/// Collateral share-price series for all strategies.
pub type PpsTable = WideTable<CollateralRawRecord>;

impl<R: ColumnGroup + Clone> WideTable<R> {
    /// Empty table for the given strategy ids.
    pub fn new(ids: Vec<String>) -> Self {
        Self {
            ids,
            rows: Vec::new(),
        }
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn rows(&self) -> &[MergedRow<R>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn latest_block(&self) -> Option<u64> {
        self.rows.last().map(|r| r.block)
    }

    pub fn last(&self) -> Option<&MergedRow<R>> {
        self.rows.last()
    }

    /// Append rows whose block is not present yet and restore ascending
    /// order. Returns the number of rows added.
    pub fn append(&mut self, rows: Vec<MergedRow<R>>) -> usize {
        let width = self.ids.len();
        let mut known: HashSet<u64> = self.rows.iter().map(|r| r.block).collect();

        let before = self.rows.len();
        self.rows.extend(
            rows.into_iter()
                .filter(|row| row.values.len() == width)
                .filter(|row| known.insert(row.block)),
        );
        self.rows.sort_by_key(|r| r.block);

        self.rows.len() - before
    }

    /// Column names: `block` then `{field}{id}` per strategy.
    pub fn header(&self) -> Vec<String> {
        let mut header = vec![BLOCK_COLUMN.to_string()];
        for id in &self.ids {
            header.extend(R::FIELDS.iter().map(|field| format!("{field}{id}")));
        }
        header
    }

    pub fn to_raw(&self) -> RawTable {
        let mut raw = RawTable::new(self.header());
        for row in &self.rows {
            let mut cells = vec![row.block.to_string()];
            for value in &row.values {
                cells.extend(value.encode());
            }
            raw.rows.push(cells);
        }
        raw
    }

    /// Decode the column groups for `ids` from `raw`.
    ///
    /// Columns are looked up by name, so extra columns and column order do
    /// not matter. Duplicate blocks keep their first row.
    pub fn from_raw(table: &str, raw: &RawTable, ids: Vec<String>) -> Result<Self, StoreError> {
        raw.check_aligned(table)?;

        let block_col = raw.column(table, BLOCK_COLUMN)?;
        let groups = ids
            .iter()
            .map(|id| {
                R::FIELDS
                    .iter()
                    .map(|field| raw.column(table, &format!("{field}{id}")))
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut rows = Vec::with_capacity(raw.rows.len());
        for cells in &raw.rows {
            let block: u64 = parse_cell(BLOCK_COLUMN, "", &cells[block_col])?;
            let values = ids
                .iter()
                .zip(&groups)
                .map(|(id, columns)| {
                    let group: Vec<&str> = columns.iter().map(|&c| cells[c].as_str()).collect();
                    R::decode(block, &group, id)
                })
                .collect::<Result<Vec<_>, _>>()?;
            rows.push(MergedRow { block, values });
        }

        let mut table = Self::new(ids);
        table.append(rows);
        Ok(table)
    }
}

/// Discovered borrower addresses, one row per (discovery block, address).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressLog {
    rows: Vec<(u64, String)>,
}

impl AddressLog {
    const HEADER: [&'static str; 2] = [BLOCK_COLUMN, "address"];

    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest_block(&self) -> Option<u64> {
        self.rows.iter().map(|(block, _)| *block).max()
    }

    /// Addresses logged at the latest discovery block.
    pub fn latest_addresses(&self) -> Vec<String> {
        let Some(latest) = self.latest_block() else {
            return Vec::new();
        };
        self.rows
            .iter()
            .filter(|(block, address)| *block == latest && !address.is_empty())
            .map(|(_, address)| address.clone())
            .collect()
    }

    /// Record the addresses discovered at `block`, dropping duplicates.
    ///
    /// An empty discovery is logged as a single row with a blank address so
    /// the discovery block still advances.
    pub fn record(&mut self, block: u64, addresses: &[String]) {
        if addresses.is_empty() {
            if !self.rows.iter().any(|(b, _)| *b == block) {
                self.rows.push((block, String::new()));
                self.rows.sort_by_key(|(block, _)| *block);
            }
            return;
        }

        let mut seen: HashSet<&str> = self
            .rows
            .iter()
            .filter(|(b, _)| *b == block)
            .map(|(_, a)| a.as_str())
            .collect();
        let fresh: Vec<(u64, String)> = addresses
            .iter()
            .filter(|a| seen.insert(a.as_str()))
            .map(|a| (block, a.clone()))
            .collect();
        self.rows.extend(fresh);
        self.rows.sort_by_key(|(block, _)| *block);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn to_raw(&self) -> RawTable {
        RawTable {
            header: Self::HEADER.iter().map(|h| h.to_string()).collect(),
            rows: self
                .rows
                .iter()
                .map(|(block, address)| vec![block.to_string(), address.clone()])
                .collect(),
        }
    }

    pub fn from_raw(table: &str, raw: &RawTable) -> Result<Self, StoreError> {
        raw.check_aligned(table)?;
        let block_col = raw.column(table, BLOCK_COLUMN)?;
        let address_col = raw.column(table, Self::HEADER[1])?;

        let mut rows = Vec::with_capacity(raw.rows.len());
        for cells in &raw.rows {
            let block: u64 = parse_cell(BLOCK_COLUMN, "", &cells[block_col])?;
            rows.push((block, cells[address_col].clone()));
        }
        rows.sort_by_key(|(block, _)| *block);

        Ok(Self { rows })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::tests::raw_strategy;

    fn ids() -> Vec<String> {
        vec!["A".to_string(), "B".to_string()]
    }

    fn pps_row(block: u64, a: f64, b: f64) -> MergedRow<CollateralRawRecord> {
        MergedRow {
            block,
            values: vec![
                CollateralRawRecord { block, share_price: a },
                CollateralRawRecord { block, share_price: b },
            ],
        }
    }

    #[test]
    fn test_header_names() {
        let table = PpsTable::new(ids());
        assert_eq!(table.header(), vec!["block", "ppsA", "ppsB"]);

        let table = StrategyTable::new(ids());
        let header = table.header();
        assert_eq!(header.len(), 1 + 2 * StrategyRawRecord::FIELDS.len());
        assert!(header.contains(&"totalAssetA".to_string()));
        assert!(header.contains(&"newCurrentRateInfoB".to_string()));
    }

    #[test]
    fn test_append_skips_existing_blocks_and_sorts() {
        let mut table = PpsTable::new(ids());
        assert_eq!(table.append(vec![pps_row(300, 1.3, 2.3), pps_row(100, 1.1, 2.1)]), 2);

        // Head refetch of block 300 is ignored
        let added = table.append(vec![pps_row(300, 9.9, 9.9), pps_row(200, 1.2, 2.2)]);
        assert_eq!(added, 1);

        let blocks: Vec<u64> = table.rows().iter().map(|r| r.block).collect();
        assert_eq!(blocks, vec![100, 200, 300]);
        assert_eq!(table.last().unwrap().values[0].share_price, 1.3);
        assert_eq!(table.latest_block(), Some(300));
    }

    #[test]
    fn test_strategy_table_raw_round_trip() {
        let mut table = StrategyTable::new(ids());
        table.append(vec![MergedRow {
            block: 100,
            values: vec![raw_strategy(100), raw_strategy(100)],
        }]);

        let raw = table.to_raw();
        let decoded = StrategyTable::from_raw("strategy", &raw, ids()).unwrap();
        assert_eq!(decoded, table);
    }

    #[test]
    fn test_from_raw_subset_of_columns() {
        let mut table = PpsTable::new(ids());
        table.append(vec![pps_row(100, 1.1, 2.1)]);
        let raw = table.to_raw();

        let only_b = PpsTable::from_raw("pps", &raw, vec!["B".to_string()]).unwrap();
        assert_eq!(only_b.rows()[0].values[0].share_price, 2.1);

        let err = PpsTable::from_raw("pps", &raw, vec!["C".to_string()]).unwrap_err();
        assert!(matches!(err, StoreError::MissingColumn { .. }));
    }

    #[test]
    fn test_from_raw_invalid_value() {
        let raw = RawTable {
            header: vec!["block".into(), "ppsA".into()],
            rows: vec![vec!["100".into(), "abc".into()]],
        };
        let err = PpsTable::from_raw("pps", &raw, vec!["A".to_string()]).unwrap_err();
        assert!(matches!(err, StoreError::InvalidValue { .. }));
    }

    #[test]
    fn test_empty_float_cell_is_nan() {
        let raw = RawTable {
            header: vec!["block".into(), "ppsA".into()],
            rows: vec![vec!["100".into(), "".into()]],
        };
        let table = PpsTable::from_raw("pps", &raw, vec!["A".to_string()]).unwrap();
        assert!(table.rows()[0].values[0].share_price.is_nan());
    }

    #[test]
    fn test_address_log() {
        let mut log = AddressLog::new();
        assert!(log.latest_addresses().is_empty());

        log.record(1_000, &["0xaa".to_string(), "0xbb".to_string(), "0xaa".to_string()]);
        log.record(2_000, &["0xcc".to_string()]);

        assert_eq!(log.len(), 3);
        assert_eq!(log.latest_block(), Some(2_000));
        assert_eq!(log.latest_addresses(), vec!["0xcc".to_string()]);

        let decoded = AddressLog::from_raw("borrowers", &log.to_raw()).unwrap();
        assert_eq!(decoded, log);
    }

    #[test]
    fn test_address_log_empty_discovery_advances() {
        let mut log = AddressLog::new();
        log.record(1_000, &["0xaa".to_string()]);
        log.record(2_000, &[]);

        assert_eq!(log.latest_block(), Some(2_000));
        assert!(log.latest_addresses().is_empty());

        // Marker survives persistence
        let decoded = AddressLog::from_raw("borrowers", &log.to_raw()).unwrap();
        assert_eq!(decoded.latest_block(), Some(2_000));
        assert!(decoded.latest_addresses().is_empty());
    }
}
