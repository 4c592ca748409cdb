use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::address::Address;

/// Address plus a process-lifetime-unique random uid. A restarted node comes
/// back with the same [`Address`] but a fresh uid and is a different member.
#[derive(Debug, Clone, Eq, PartialEq, Encode, Decode, Serialize, Deserialize)]
pub struct UniqueAddress {
    pub address: Address,
    pub uid: i64,
}

impl UniqueAddress {
    pub fn new(address: Address, uid: i64) -> Self {
        Self { address, uid }
    }

    /// Drawn once at startup.
    pub fn random_uid() -> i64 {
        rand::random()
    }
}

/// Addresses recur across incarnations; uids do not.
impl Hash for UniqueAddress {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.uid.hash(state);
    }
}

impl PartialOrd for UniqueAddress {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for UniqueAddress {
    fn cmp(&self, other: &Self) -> Ordering {
        Address::ordering(&self.address, &other.address).then_with(|| self.uid.cmp(&other.uid))
    }
}

impl Display for UniqueAddress {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}[{}]", self.address, self.uid)
    }
}
