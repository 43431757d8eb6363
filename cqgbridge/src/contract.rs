// cqgbridge/src/contract.rs
// Resolved contract metadata and the process-wide symbol cache.

use crate::base::BridgeError;
use crate::protocol;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Static description of a tradable instrument, as resolved by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractMetadata {
  /// Never 0 once resolved.
  pub contract_id: u32,
  pub contract_symbol: String,
  /// Real price = scaled integer price * price_scale. Always > 0.
  pub price_scale: f64,
  pub tick_size: f64,
  pub description: String,
  pub title: String,
}

impl ContractMetadata {
  pub(crate) fn from_wire(meta: &protocol::ContractMetadata) -> Result<Self, BridgeError> {
    let contract_id = meta.contract_id.unwrap_or(0);
    if contract_id == 0 {
      return Err(BridgeError::ProtocolError("Contract metadata without contract id".to_string()));
    }
    let price_scale = meta.correct_price_scale.unwrap_or(0.0);
    if !(price_scale > 0.0) {
      return Err(BridgeError::ProtocolError(format!(
        "Contract {} has non-positive price scale {}", contract_id, price_scale)));
    }
    Ok(ContractMetadata {
      contract_id,
      contract_symbol: meta.contract_symbol.clone().unwrap_or_default(),
      price_scale,
      tick_size: meta.tick_size.unwrap_or(0.0),
      description: meta.description.clone().unwrap_or_default(),
      title: meta.title.clone().unwrap_or_default(),
    })
  }
}

/// Symbol -> metadata. Shared by every session in the process; an entry is
/// written once, when a symbol first resolves, and only read afterwards.
#[derive(Debug, Default)]
pub struct ContractCache {
  entries: RwLock<HashMap<String, ContractMetadata>>,
}

impl ContractCache {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get(&self, symbol: &str) -> Option<ContractMetadata> {
    self.entries.read().get(symbol).cloned()
  }

  /// Inserts unless the symbol is already present. Returns the cached entry.
  pub fn insert_if_absent(&self, symbol: &str, metadata: ContractMetadata) -> ContractMetadata {
    let mut entries = self.entries.write();
    entries.entry(symbol.to_string()).or_insert(metadata).clone()
  }

  pub fn len(&self) -> usize {
    self.entries.read().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn wire(contract_id: u32, scale: f64) -> protocol::ContractMetadata {
    protocol::ContractMetadata {
      contract_id: Some(contract_id),
      contract_symbol: Some("F.US.EP".to_string()),
      correct_price_scale: Some(scale),
      ..Default::default()
    }
  }

  #[test]
  fn rejects_zero_id_and_bad_scale() {
    assert!(ContractMetadata::from_wire(&wire(0, 0.25)).is_err());
    assert!(ContractMetadata::from_wire(&wire(7, 0.0)).is_err());
    assert!(ContractMetadata::from_wire(&wire(7, -1.0)).is_err());
  }

  #[test]
  fn cache_keeps_first_entry() {
    let cache = ContractCache::new();
    let first = ContractMetadata::from_wire(&wire(7, 0.25)).unwrap();
    let second = ContractMetadata::from_wire(&wire(8, 0.5)).unwrap();
    cache.insert_if_absent("ESZ4", first.clone());
    let kept = cache.insert_if_absent("ESZ4", second);
    assert_eq!(kept, first);
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.get("ESZ4").unwrap().contract_id, 7);
  }
}
