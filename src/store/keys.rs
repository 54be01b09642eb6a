//! Keyspace prefixes and composite key construction
//!
//! Every component of a composite key is terminated with `/`. Integers are
//! encoded as 8 big-endian bytes so byte order equals numeric order.

/// Pool records
pub const POOL_PREFIX: &[u8] = &[0x01];
/// Staker records by `account/pool_id`
pub const STAKER_PREFIX: &[u8] = &[0x02];
/// Staker index by `pool_id/account`
pub const STAKER_BY_POOL_PREFIX: &[u8] = &[0x03];
/// Funder records by `account/pool_id`
pub const FUNDER_PREFIX: &[u8] = &[0x04];
/// Funder index by `pool_id/account`
pub const FUNDER_BY_POOL_PREFIX: &[u8] = &[0x05];
/// Delegator records by `pool_id/staker/delegator`
pub const DELEGATOR_PREFIX: &[u8] = &[0x06];
/// Delegator index by `delegator/pool_id/staker`
pub const DELEGATOR_BY_ADDRESS_PREFIX: &[u8] = &[0x07];
/// F1 accumulators by `pool_id/staker`
pub const DELEGATION_DATA_PREFIX: &[u8] = &[0x08];
/// F1 checkpoints by `pool_id/staker/k`
pub const DELEGATION_ENTRY_PREFIX: &[u8] = &[0x09];
/// In-flight undelegations by `pool_id/staker/delegator`
pub const UNBONDING_DELEGATOR_PREFIX: &[u8] = &[0x0a];
/// Finalized proposals by bundle id
pub const PROPOSAL_PREFIX: &[u8] = &[0x0b];
/// Proposal index by `pool_id/from_height`
pub const PROPOSAL_BY_HEIGHT_PREFIX: &[u8] = &[0x0c];
/// Queue counters, entries and secondary indices
pub const QUEUE_PREFIX: &[u8] = &[0x0d];
/// Emergency halt plan
pub const HALT_PLAN_KEY: &[u8] = &[0x0e];

/// Builder for composite keys
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    bytes: Vec<u8>,
}

impl KeyBuilder {
    /// Start a key under the given prefix
    pub fn new(prefix: &[u8]) -> Self {
        Self {
            bytes: prefix.to_vec(),
        }
    }

    /// Append a big-endian integer component
    pub fn u64(mut self, value: u64) -> Self {
        self.bytes.extend_from_slice(&value.to_be_bytes());
        self.bytes.push(b'/');
        self
    }

    /// Append a string component
    pub fn str(mut self, value: &str) -> Self {
        self.bytes.extend_from_slice(value.as_bytes());
        self.bytes.push(b'/');
        self
    }

    /// Append raw bytes as they are
    pub fn raw(mut self, value: &[u8]) -> Self {
        self.bytes.extend_from_slice(value);
        self
    }

    /// Finish the key
    pub fn build(self) -> Vec<u8> {
        self.bytes
    }
}

/// Read the trailing big-endian integer component of a key
pub fn trailing_u64(key: &[u8]) -> Option<u64> {
    let without_sep = key.strip_suffix(b"/")?;
    if without_sep.len() < 8 {
        return None;
    }
    let start = without_sep.len() - 8;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&without_sep[start..]);
    Some(u64::from_be_bytes(buf))
}

/// Key of a pool
pub fn pool_key(pool_id: u64) -> Vec<u8> {
    KeyBuilder::new(POOL_PREFIX).u64(pool_id).build()
}

/// Primary key of a staker
pub fn staker_key(staker: &str, pool_id: u64) -> Vec<u8> {
    KeyBuilder::new(STAKER_PREFIX).str(staker).u64(pool_id).build()
}

/// Prefix of every staker record of an account, across pools
pub fn stakers_of_account_prefix(staker: &str) -> Vec<u8> {
    KeyBuilder::new(STAKER_PREFIX).str(staker).build()
}

/// By-pool index key of a staker
pub fn staker_by_pool_key(pool_id: u64, staker: &str) -> Vec<u8> {
    KeyBuilder::new(STAKER_BY_POOL_PREFIX)
        .u64(pool_id)
        .str(staker)
        .build()
}

/// Primary key of a funder
pub fn funder_key(funder: &str, pool_id: u64) -> Vec<u8> {
    KeyBuilder::new(FUNDER_PREFIX).str(funder).u64(pool_id).build()
}

/// Prefix of every funder record of an account, across pools
pub fn funders_of_account_prefix(funder: &str) -> Vec<u8> {
    KeyBuilder::new(FUNDER_PREFIX).str(funder).build()
}

/// By-pool index key of a funder
pub fn funder_by_pool_key(pool_id: u64, funder: &str) -> Vec<u8> {
    KeyBuilder::new(FUNDER_BY_POOL_PREFIX)
        .u64(pool_id)
        .str(funder)
        .build()
}

/// Primary key of a delegator
pub fn delegator_key(pool_id: u64, staker: &str, delegator: &str) -> Vec<u8> {
    KeyBuilder::new(DELEGATOR_PREFIX)
        .u64(pool_id)
        .str(staker)
        .str(delegator)
        .build()
}

/// Prefix of every delegator of a staker
pub fn delegators_of_staker_prefix(pool_id: u64, staker: &str) -> Vec<u8> {
    KeyBuilder::new(DELEGATOR_PREFIX)
        .u64(pool_id)
        .str(staker)
        .build()
}

/// By-address index key of a delegator
pub fn delegator_by_address_key(delegator: &str, pool_id: u64, staker: &str) -> Vec<u8> {
    KeyBuilder::new(DELEGATOR_BY_ADDRESS_PREFIX)
        .str(delegator)
        .u64(pool_id)
        .str(staker)
        .build()
}

/// Prefix of every delegation of an address
pub fn delegations_of_address_prefix(delegator: &str) -> Vec<u8> {
    KeyBuilder::new(DELEGATOR_BY_ADDRESS_PREFIX)
        .str(delegator)
        .build()
}

/// Key of an F1 accumulator
pub fn delegation_data_key(pool_id: u64, staker: &str) -> Vec<u8> {
    KeyBuilder::new(DELEGATION_DATA_PREFIX)
        .u64(pool_id)
        .str(staker)
        .build()
}

/// Key of an F1 checkpoint
pub fn delegation_entry_key(pool_id: u64, staker: &str, k_index: u64) -> Vec<u8> {
    KeyBuilder::new(DELEGATION_ENTRY_PREFIX)
        .u64(pool_id)
        .str(staker)
        .u64(k_index)
        .build()
}

/// Prefix of every F1 checkpoint of a staker
pub fn delegation_entries_prefix(pool_id: u64, staker: &str) -> Vec<u8> {
    KeyBuilder::new(DELEGATION_ENTRY_PREFIX)
        .u64(pool_id)
        .str(staker)
        .build()
}

/// Key of an in-flight undelegation
pub fn unbonding_delegator_key(pool_id: u64, staker: &str, delegator: &str) -> Vec<u8> {
    KeyBuilder::new(UNBONDING_DELEGATOR_PREFIX)
        .u64(pool_id)
        .str(staker)
        .str(delegator)
        .build()
}

/// Key of a finalized proposal
pub fn proposal_key(bundle_id: &str) -> Vec<u8> {
    KeyBuilder::new(PROPOSAL_PREFIX).str(bundle_id).build()
}

/// Height index key of a finalized proposal
pub fn proposal_by_height_key(pool_id: u64, from_height: u64) -> Vec<u8> {
    KeyBuilder::new(PROPOSAL_BY_HEIGHT_PREFIX)
        .u64(pool_id)
        .u64(from_height)
        .build()
}

/// Prefix of every finalized proposal of a pool
pub fn proposals_of_pool_prefix(pool_id: u64) -> Vec<u8> {
    KeyBuilder::new(PROPOSAL_BY_HEIGHT_PREFIX).u64(pool_id).build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_components_sort_numerically() {
        let low = delegation_entry_key(1, "staker", 2);
        let high = delegation_entry_key(1, "staker", 256);
        assert!(low < high);
    }

    #[test]
    fn test_string_prefix_does_not_leak_into_longer_names() {
        let prefix = delegators_of_staker_prefix(1, "alice");
        let other = delegator_key(1, "alice2", "bob");
        assert!(!other.starts_with(&prefix));

        let own = delegator_key(1, "alice", "bob");
        assert!(own.starts_with(&prefix));
    }

    #[test]
    fn test_trailing_u64() {
        let key = delegation_entry_key(3, "staker", 77);
        assert_eq!(trailing_u64(&key), Some(77));
        assert_eq!(trailing_u64(b"short/"), None);
        assert_eq!(trailing_u64(b"no-separator"), None);
    }
}
