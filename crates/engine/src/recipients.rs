//! Recipient name to chain address resolution.

use std::collections::HashMap;

use indexmap::IndexMap;
use zkflow_types::Blockchain;

use crate::config::RecipientAddresses;
use crate::error::StepError;

const DEMO_ETH_ADDRESS: &str = "0x37b6c846ca0483a0fc6c7702707372ebcd131188";
const DEMO_SOL_ADDRESS: &str = "HsZdbBxZVNzEn4qR9Ebx5XxDSZ136Mu14VlH1nbXGhfG";
const BUILT_IN_RECIPIENTS: [&str; 3] = ["alice", "bob", "charlie"];

/// Case-insensitive address book. Raw chain addresses pass through unchanged.
#[derive(Debug, Clone)]
pub struct AddressBook {
    entries: HashMap<String, RecipientAddresses>,
}

impl Default for AddressBook {
    fn default() -> Self {
        let entries = BUILT_IN_RECIPIENTS
            .iter()
            .map(|name| {
                (
                    name.to_string(),
                    RecipientAddresses {
                        eth: Some(DEMO_ETH_ADDRESS.to_string()),
                        sol: Some(DEMO_SOL_ADDRESS.to_string()),
                    },
                )
            })
            .collect();
        Self { entries }
    }
}

impl AddressBook {
    /// Built-in entries extended, and per chain overridden, by configured ones.
    pub fn with_overrides(overrides: &IndexMap<String, RecipientAddresses>) -> Self {
        let mut book = Self::default();
        for (name, addresses) in overrides {
            let entry = book.entries.entry(name.trim().to_ascii_lowercase()).or_default();
            if addresses.eth.is_some() {
                entry.eth = addresses.eth.clone();
            }
            if addresses.sol.is_some() {
                entry.sol = addresses.sol.clone();
            }
        }
        book
    }

    pub fn resolve(&self, recipient: &str, blockchain: Blockchain) -> Result<String, StepError> {
        let recipient = recipient.trim();
        if is_chain_address(recipient, blockchain) {
            return Ok(recipient.to_string());
        }
        self.entries
            .get(&recipient.to_ascii_lowercase())
            .and_then(|addresses| match blockchain {
                Blockchain::Eth => addresses.eth.clone(),
                Blockchain::Sol => addresses.sol.clone(),
            })
            .ok_or_else(|| StepError::unknown_recipient(recipient, blockchain))
    }
}

/// `0x` plus 40 hex digits on ETH; 32 to 44 ASCII alphanumerics without a `0x` prefix on SOL.
///
/// The SOL rule is looser than strict base58 because the demo address book carries
/// addresses outside that alphabet.
pub fn is_chain_address(candidate: &str, blockchain: Blockchain) -> bool {
    match blockchain {
        Blockchain::Eth => candidate
            .strip_prefix("0x")
            .is_some_and(|hex| hex.len() == 40 && hex.chars().all(|character| character.is_ascii_hexdigit())),
        Blockchain::Sol => {
            (32..=44).contains(&candidate.len())
                && !candidate.get(..2).is_some_and(|prefix| prefix.eq_ignore_ascii_case("0x"))
                && candidate
                    .chars()
                    .all(|character| character.is_ascii_alphanumeric())
        }
    }
}
