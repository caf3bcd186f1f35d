// Copyright (c) 2026 Joseph Verdicchio and QualityGate Contributors
// SPDX-License-Identifier: Apache-2.0

//! Access-control bookkeeping over ciphertext handles.
//!
//! Grants are only ever added. A handle that has been made public stays
//! public.

use crate::error::{GateError, GateResult};
use crate::handle::{Handle, Identity};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "identity", rename_all = "snake_case")]
pub enum AclScope {
    /// The evaluator itself, so later computations may reuse the handle.
    Contract,
    Address(Identity),
    Public,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclGrant {
    pub handle: Handle,
    pub scope: AclScope,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandleAcl {
    pub allowed: BTreeSet<Identity>,
    pub public: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclEntry {
    pub handle: Handle,
    #[serde(flatten)]
    pub acl: HandleAcl,
}

/// Grants collected during one operation and committed together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagedGrants {
    grants: Vec<AclGrant>,
}

impl StagedGrants {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant_self(&mut self, handle: Handle) {
        self.grants.push(AclGrant {
            handle,
            scope: AclScope::Contract,
        });
    }

    pub fn grant_address(&mut self, handle: Handle, identity: Identity) -> GateResult<()> {
        if identity.is_zero() {
            return Err(GateError::ZeroAddress { field: "grantee" });
        }
        self.grants.push(AclGrant {
            handle,
            scope: AclScope::Address(identity),
        });
        Ok(())
    }

    pub fn grant_public(&mut self, handle: Handle) {
        self.grants.push(AclGrant {
            handle,
            scope: AclScope::Public,
        });
    }

    pub fn grants(&self) -> &[AclGrant] {
        &self.grants
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }
}

#[derive(Debug)]
pub struct AccessControlManager {
    contract: Identity,
    entries: RwLock<HashMap<Handle, HandleAcl>>,
}

impl AccessControlManager {
    pub fn new(contract: Identity) -> GateResult<Self> {
        if contract.is_zero() {
            return Err(GateError::ZeroAddress { field: "contract" });
        }
        Ok(Self {
            contract,
            entries: RwLock::new(HashMap::new()),
        })
    }

    pub fn restore(contract: Identity, entries: Vec<AclEntry>) -> GateResult<Self> {
        let acl = Self::new(contract)?;
        {
            let mut map = acl.entries.write();
            for entry in entries {
                map.insert(entry.handle, entry.acl);
            }
        }
        Ok(acl)
    }

    /// Identity that `AclScope::Contract` grants resolve to.
    pub fn contract(&self) -> Identity {
        self.contract
    }

    pub fn grant_self(&self, handle: Handle) {
        let mut staged = StagedGrants::new();
        staged.grant_self(handle);
        self.commit(staged);
    }

    pub fn grant_address(&self, handle: Handle, identity: Identity) -> GateResult<()> {
        let mut staged = StagedGrants::new();
        staged.grant_address(handle, identity)?;
        self.commit(staged);
        Ok(())
    }

    /// Returns `true` if this call made the handle public; calling it again is
    /// a no-op that returns `false`.
    pub fn grant_public(&self, handle: Handle) -> bool {
        let mut entries = self.entries.write();
        let entry = entries.entry(handle).or_default();
        let newly = !entry.public;
        entry.public = true;
        if newly {
            tracing::info!(target: "qualitygate.acl", handle = %handle, "handle made public");
        }
        newly
    }

    /// Applies every staged grant under one write lock. Returns how many
    /// handles this call made public.
    pub fn commit(&self, staged: StagedGrants) -> usize {
        if staged.is_empty() {
            return 0;
        }
        let mut newly_public = 0;
        let mut entries = self.entries.write();
        for grant in staged.grants {
            let entry = entries.entry(grant.handle).or_default();
            match grant.scope {
                AclScope::Contract => {
                    entry.allowed.insert(self.contract);
                }
                AclScope::Address(identity) => {
                    entry.allowed.insert(identity);
                }
                AclScope::Public => {
                    if !entry.public {
                        entry.public = true;
                        newly_public += 1;
                    }
                }
            }
            tracing::debug!(target: "qualitygate.acl", handle = %grant.handle, scope = ?grant.scope, "grant committed");
        }
        newly_public
    }

    pub fn is_allowed(&self, handle: Handle, identity: Identity) -> bool {
        self.entries
            .read()
            .get(&handle)
            .map(|acl| acl.public || acl.allowed.contains(&identity))
            .unwrap_or(false)
    }

    pub fn is_public(&self, handle: Handle) -> bool {
        self.entries
            .read()
            .get(&handle)
            .map(|acl| acl.public)
            .unwrap_or(false)
    }

    pub fn grants_for(&self, handle: Handle) -> Option<HandleAcl> {
        self.entries.read().get(&handle).cloned()
    }

    pub fn snapshot(&self) -> Vec<AclEntry> {
        let mut out: Vec<AclEntry> = self
            .entries
            .read()
            .iter()
            .map(|(handle, acl)| AclEntry {
                handle: *handle,
                acl: acl.clone(),
            })
            .collect();
        out.sort_by(|a, b| a.handle.cmp(&b.handle));
        out
    }
}
