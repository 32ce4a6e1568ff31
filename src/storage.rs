use std::path::Path;

use rusqlite::{params, Connection};

use crate::block::SymbioticBlock;
use crate::error::Result;

/// Per-cycle block ledger, read by the capital-allocation side.
pub struct LedgerStore {
    conn: Connection,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockCycleRow {
    pub cycle: u64,
    pub block_id: u32,
    pub fitness: f64,
    pub capital: f64,
    pub position: f64,
    pub dominant_emotion: String,
    pub dominant_tag: Option<String>,
}

impl LedgerStore {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self { conn: Connection::open(path)? })
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self { conn: Connection::open_in_memory()? })
    }

    pub fn init(&mut self) -> Result<()> {
        self.conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS block_cycles (
                cycle INTEGER NOT NULL,
                block_id INTEGER NOT NULL,
                fitness REAL NOT NULL,
                capital REAL NOT NULL,
                position REAL NOT NULL,
                dominant_emotion TEXT NOT NULL,
                dominant_tag TEXT,
                PRIMARY KEY (cycle, block_id)
            );
            COMMIT;",
        )?;
        Ok(())
    }

    /// One row per block for `cycle`, in a single transaction. Re-recording
    /// a cycle replaces its rows.
    pub fn record_cycle(&mut self, cycle: u64, blocks: &[SymbioticBlock]) -> Result<()> {
        let tx = self.conn.transaction()?;
        for b in blocks {
            tx.execute(
                "INSERT OR REPLACE INTO block_cycles
                 (cycle, block_id, fitness, capital, position, dominant_emotion, dominant_tag)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    cycle as i64,
                    b.id.0 as i64,
                    b.last_fitness(),
                    b.capital,
                    b.position,
                    b.dominant_emotion().as_str(),
                    b.dominant_subtag().map(|t| t.as_str()),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn rows_for_cycle(&self, cycle: u64) -> Result<Vec<BlockCycleRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT cycle, block_id, fitness, capital, position, dominant_emotion, dominant_tag
             FROM block_cycles WHERE cycle = ?1 ORDER BY block_id",
        )?;
        let rows = stmt
            .query_map(params![cycle as i64], |r| {
                Ok(BlockCycleRow {
                    cycle: r.get::<_, i64>(0)? as u64,
                    block_id: r.get::<_, i64>(1)? as u32,
                    fitness: r.get(2)?,
                    capital: r.get(3)?,
                    position: r.get(4)?,
                    dominant_emotion: r.get(5)?,
                    dominant_tag: r.get(6)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn cycle_count(&self) -> Result<u64> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(DISTINCT cycle) FROM block_cycles", [], |r| r.get(0))?;
        Ok(n as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BlockId, BlockParams};
    use crate::entity::{EntityId, SymbolicEntity};
    use crate::logging::Logger;
    use crate::symbols::Tag;

    fn block(id: u32) -> SymbioticBlock {
        let entities = vec![SymbolicEntity::new(EntityId(id), Tag::Earth, 0.5, 10, Logger::null())];
        SymbioticBlock::new(BlockId(id), entities, BlockParams::default(), Logger::null())
            .with_ledger(9_000.0, 0.02)
    }

    #[test]
    fn records_and_reads_back() {
        let mut store = LedgerStore::in_memory().unwrap();
        store.init().unwrap();
        let blocks = vec![block(0), block(1)];
        store.record_cycle(3, &blocks).unwrap();
        store.record_cycle(3, &blocks).unwrap();
        let rows = store.rows_for_cycle(3).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].block_id, 1);
        assert_eq!(rows[0].capital, 9_000.0);
        assert_eq!(rows[0].position, 0.02);
        assert_eq!(rows[0].dominant_emotion, "neutral");
        assert_eq!(rows[0].dominant_tag, None);
        assert_eq!(store.cycle_count().unwrap(), 1);
    }
}
