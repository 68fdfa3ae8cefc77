//! Role table checked at the start of every privileged operation

use crate::errors::{EscrowError, EscrowResult};
use crate::escrow::types::Address;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    GlobalAdmin,
    GameAdmin,
    Pauser,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::GlobalAdmin, Role::GameAdmin, Role::Pauser];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::GlobalAdmin => "global_admin",
            Role::GameAdmin => "game_admin",
            Role::Pauser => "pauser",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessControl {
    members: BTreeMap<Role, BTreeSet<Address>>,
}

impl AccessControl {
    /// Table with a single global admin and no other members
    pub fn with_admin(admin: Address) -> Self {
        let mut table = Self::default();
        table.insert(Role::GlobalAdmin, admin);
        table
    }

    pub fn has_role(&self, role: Role, account: &Address) -> bool {
        self.members
            .get(&role)
            .map(|set| set.contains(account))
            .unwrap_or(false)
    }

    pub fn require(&self, role: Role, caller: &Address) -> EscrowResult<()> {
        if self.has_role(role, caller) {
            Ok(())
        } else {
            Err(EscrowError::Unauthorized { caller: *caller, role })
        }
    }

    /// Passes if the caller holds any of `roles`; reports the first on failure
    pub fn require_any(&self, roles: &[Role], caller: &Address) -> EscrowResult<()> {
        if roles.iter().any(|role| self.has_role(*role, caller)) {
            return Ok(());
        }
        Err(EscrowError::Unauthorized {
            caller: *caller,
            role: roles.first().copied().unwrap_or(Role::GlobalAdmin),
        })
    }

    pub fn grant(&mut self, caller: &Address, role: Role, account: Address) -> EscrowResult<bool> {
        self.require(Role::GlobalAdmin, caller)?;
        if account.is_zero() {
            return Err(EscrowError::InvalidAddress);
        }
        Ok(self.insert(role, account))
    }

    pub fn revoke(&mut self, caller: &Address, role: Role, account: &Address) -> EscrowResult<bool> {
        self.require(Role::GlobalAdmin, caller)?;
        let Some(set) = self.members.get_mut(&role) else {
            return Ok(false);
        };
        let removed = set.remove(account);
        if set.is_empty() {
            self.members.remove(&role);
        }
        Ok(removed)
    }

    pub fn members(&self, role: Role) -> impl Iterator<Item = &Address> {
        self.members.get(&role).into_iter().flatten()
    }

    pub(crate) fn insert(&mut self, role: Role, account: Address) -> bool {
        self.members.entry(role).or_default().insert(account)
    }
}
