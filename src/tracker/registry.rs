//! Agent registry
//!
//! Records live in one arena; three maps index into it by vault, underlying
//! address and collateral pool. All mutation goes through `&mut self`, so a
//! reader always sees a record in all three indices or in none.

use alloy::primitives::Address;
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::domain::{AgentRecord, AgentStatus};
use crate::error::{Result, WatchError};

#[derive(Debug, Default)]
pub struct AgentRegistry {
    slots: Vec<Option<AgentRecord>>,
    free: Vec<usize>,
    by_vault: HashMap<Address, usize>,
    by_underlying: HashMap<String, usize>,
    by_pool: HashMap<Address, usize>,
    /// Vaults of destroyed agents
    tombstones: HashSet<Address>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert into all three indices.
    ///
    /// Fails with `DuplicateAgent` if any of the three keys is taken.
    pub fn create(&mut self, record: AgentRecord) -> Result<&AgentRecord> {
        if self.by_vault.contains_key(&record.vault) {
            return Err(WatchError::DuplicateAgent(format!("vault {}", record.vault)));
        }
        if self.by_underlying.contains_key(&record.underlying_address) {
            return Err(WatchError::DuplicateAgent(format!(
                "underlying address {}",
                record.underlying_address
            )));
        }
        if self.by_pool.contains_key(&record.collateral_pool) {
            return Err(WatchError::DuplicateAgent(format!(
                "collateral pool {}",
                record.collateral_pool
            )));
        }

        let slot = match self.free.pop() {
            Some(slot) => slot,
            None => {
                self.slots.push(None);
                self.slots.len() - 1
            }
        };

        self.by_vault.insert(record.vault, slot);
        self.by_underlying.insert(record.underlying_address.clone(), slot);
        self.by_pool.insert(record.collateral_pool, slot);
        self.tombstones.remove(&record.vault);
        debug!("Registered agent {} in slot {}", record.vault, slot);

        Ok(&*self.slots[slot].insert(record))
    }

    pub fn get(&self, vault: &Address) -> Option<&AgentRecord> {
        self.by_vault.get(vault).and_then(|&slot| self.slot(slot))
    }

    pub fn get_by_underlying(&self, underlying: &str) -> Option<&AgentRecord> {
        self.by_underlying.get(underlying).and_then(|&slot| self.slot(slot))
    }

    pub fn get_by_pool(&self, pool: &Address) -> Option<&AgentRecord> {
        self.by_pool.get(pool).and_then(|&slot| self.slot(slot))
    }

    pub fn get_mut(&mut self, vault: &Address) -> Option<&mut AgentRecord> {
        let slot = *self.by_vault.get(vault)?;
        self.slots.get_mut(slot).and_then(Option::as_mut)
    }

    pub fn get_by_pool_mut(&mut self, pool: &Address) -> Option<&mut AgentRecord> {
        let slot = *self.by_pool.get(pool)?;
        self.slots.get_mut(slot).and_then(Option::as_mut)
    }

    pub fn contains(&self, vault: &Address) -> bool {
        self.by_vault.contains_key(vault)
    }

    /// Remove or retire an agent.
    ///
    /// With `hard_delete` the record leaves all three indices and is
    /// returned. Otherwise it stays indexed with status `Destroyed` and a
    /// copy is returned.
    pub fn destroy(&mut self, vault: &Address, hard_delete: bool) -> Option<AgentRecord> {
        let slot = *self.by_vault.get(vault)?;
        self.tombstones.insert(*vault);

        if !hard_delete {
            let record = self.slots.get_mut(slot).and_then(Option::as_mut)?;
            record.status = AgentStatus::Destroyed;
            return Some(record.clone());
        }

        let record = self.slots.get_mut(slot).and_then(Option::take)?;
        self.by_vault.remove(&record.vault);
        self.by_underlying.remove(&record.underlying_address);
        self.by_pool.remove(&record.collateral_pool);
        self.free.push(slot);
        debug!("Removed agent {} from slot {}", record.vault, slot);
        Some(record)
    }

    /// True if an agent with this vault was destroyed
    pub fn is_tombstoned(&self, vault: &Address) -> bool {
        self.tombstones.contains(vault)
    }

    /// Records not marked `Destroyed`, in slot order
    pub fn iter_live(&self) -> impl Iterator<Item = &AgentRecord> {
        self.slots
            .iter()
            .filter_map(Option::as_ref)
            .filter(|r| !r.is_destroyed())
    }

    pub fn live_vaults(&self) -> Vec<Address> {
        self.iter_live().map(|r| r.vault).collect()
    }

    /// Indexed records, retained destroyed ones included
    pub fn len(&self) -> usize {
        self.by_vault.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_vault.is_empty()
    }

    fn slot(&self, slot: usize) -> Option<&AgentRecord> {
        self.slots.get(slot).and_then(Option::as_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(n: u8) -> AgentRecord {
        AgentRecord::new(
            Address::repeat_byte(n),
            Address::repeat_byte(0xee),
            format!("rUnderlying{n}"),
            Address::repeat_byte(n.wrapping_add(0x80)),
            Address::repeat_byte(0xcc),
        )
    }

    #[test]
    fn test_create_indexes_all_keys() {
        let mut registry = AgentRegistry::new();
        registry.create(agent(1)).unwrap();

        let vault = Address::repeat_byte(1);
        assert_eq!(registry.get(&vault).unwrap().vault, vault);
        assert_eq!(registry.get_by_underlying("rUnderlying1").unwrap().vault, vault);
        assert_eq!(registry.get_by_pool(&Address::repeat_byte(0x81)).unwrap().vault, vault);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let mut registry = AgentRegistry::new();
        registry.create(agent(1)).unwrap();

        let mut clash = agent(2);
        clash.underlying_address = "rUnderlying1".to_string();
        assert!(matches!(registry.create(clash), Err(WatchError::DuplicateAgent(_))));

        // Nothing of the rejected record leaked into the indices
        assert!(registry.get(&Address::repeat_byte(2)).is_none());
        assert!(registry.get_by_pool(&Address::repeat_byte(0x82)).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_hard_destroy_clears_every_index_and_reuses_slot() {
        let mut registry = AgentRegistry::new();
        registry.create(agent(1)).unwrap();
        registry.create(agent(2)).unwrap();

        let vault = Address::repeat_byte(1);
        let removed = registry.destroy(&vault, true).unwrap();
        assert_eq!(removed.vault, vault);
        assert!(registry.get(&vault).is_none());
        assert!(registry.get_by_underlying("rUnderlying1").is_none());
        assert!(registry.get_by_pool(&Address::repeat_byte(0x81)).is_none());
        assert!(registry.is_tombstoned(&vault));
        assert_eq!(registry.len(), 1);

        registry.create(agent(3)).unwrap();
        assert_eq!(registry.slots.len(), 2);
        assert_eq!(registry.iter_live().count(), 2);
    }

    #[test]
    fn test_retained_destroy_marks_record() {
        let mut registry = AgentRegistry::new();
        registry.create(agent(1)).unwrap();

        let vault = Address::repeat_byte(1);
        let retained = registry.destroy(&vault, false).unwrap();
        assert_eq!(retained.status, AgentStatus::Destroyed);
        assert_eq!(registry.get(&vault).unwrap().status, AgentStatus::Destroyed);
        assert_eq!(registry.iter_live().count(), 0);
        assert!(registry.is_tombstoned(&vault));
    }

    #[test]
    fn test_destroy_unknown_is_none() {
        let mut registry = AgentRegistry::new();
        assert!(registry.destroy(&Address::repeat_byte(9), true).is_none());
        assert!(!registry.is_tombstoned(&Address::repeat_byte(9)));
    }
}
