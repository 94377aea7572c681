use obs_sqlite::{Db, Id, Table};

/// In-memory surrogate id counters, one per table. Only the store mutates
/// them, so a plain array under the store lock is enough.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdAllocator {
    next: [Id; Table::ALL.len()],
}

impl Default for IdAllocator {
    fn default() -> Self {
        IdAllocator { next: [1; Table::ALL.len()] }
    }
}

impl IdAllocator {
    /// Continue after the largest id already stored in every table.
    pub fn restore(db: &Db) -> anyhow::Result<Self> {
        let mut ids = IdAllocator::default();
        for t in Table::ALL {
            ids.next[t.index()] = db.max_id(t)? + 1;
        }
        Ok(ids)
    }

    pub fn next(&mut self, table: Table) -> Id {
        let slot = &mut self.next[table.index()];
        let id = *slot;
        *slot += 1;
        id
    }

    pub fn peek(&self, table: Table) -> Id {
        self.next[table.index()]
    }
}
