// Copyright (c) 2026 Joseph Verdicchio and QualityGate Contributors
// SPDX-License-Identifier: Apache-2.0

use crate::error::{GateError, GateResult};
use crate::handle::Identity;
use parking_lot::{RwLock, RwLockReadGuard};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roles {
    pub owner: Identity,
    /// Granted decrypt rights on every verdict registered while it is set.
    pub quality_app: Identity,
}

impl Roles {
    pub fn new(owner: Identity, quality_app: Identity) -> GateResult<Self> {
        if owner.is_zero() {
            return Err(GateError::ZeroAddress { field: "owner" });
        }
        if quality_app.is_zero() {
            return Err(GateError::ZeroAddress {
                field: "quality_app",
            });
        }
        Ok(Self { owner, quality_app })
    }
}

#[derive(Debug)]
pub struct AdminControl {
    roles: RwLock<Roles>,
}

/// Proof that the caller was the owner. Holding it blocks ownership changes
/// until the owner-only operation completes.
pub struct OwnerGuard<'a> {
    roles: RwLockReadGuard<'a, Roles>,
}

impl OwnerGuard<'_> {
    pub fn owner(&self) -> Identity {
        self.roles.owner
    }
}

impl AdminControl {
    pub fn new(roles: Roles) -> Self {
        Self {
            roles: RwLock::new(roles),
        }
    }

    pub fn roles(&self) -> Roles {
        *self.roles.read()
    }

    pub fn owner(&self) -> Identity {
        self.roles.read().owner
    }

    /// Pins the current roles. Role changes wait until the pin is dropped.
    pub fn read(&self) -> RwLockReadGuard<'_, Roles> {
        self.roles.read()
    }

    pub fn quality_app(&self) -> Identity {
        self.roles.read().quality_app
    }

    pub fn authorize_owner(
        &self,
        caller: Identity,
        operation: &'static str,
    ) -> GateResult<OwnerGuard<'_>> {
        let roles = self.roles.read();
        if roles.owner != caller {
            return Err(GateError::Authorization { caller, operation });
        }
        Ok(OwnerGuard { roles })
    }

    /// Replaces the owner immediately. Returns the previous owner.
    /// `on_change` runs with the previous owner before the roles are released.
    pub fn transfer_ownership(
        &self,
        caller: Identity,
        new_owner: Identity,
        on_change: impl FnOnce(Identity),
    ) -> GateResult<Identity> {
        let mut roles = self.roles.write();
        if roles.owner != caller {
            return Err(GateError::Authorization {
                caller,
                operation: "transfer ownership",
            });
        }
        if new_owner.is_zero() {
            return Err(GateError::ZeroAddress { field: "new_owner" });
        }
        let previous = std::mem::replace(&mut roles.owner, new_owner);
        on_change(previous);
        Ok(previous)
    }

    /// Replaces the delegated application. Grants already made to the
    /// previous application are kept. Returns the previous application.
    pub fn set_quality_app(
        &self,
        caller: Identity,
        new_app: Identity,
        on_change: impl FnOnce(Identity),
    ) -> GateResult<Identity> {
        let mut roles = self.roles.write();
        if roles.owner != caller {
            return Err(GateError::Authorization {
                caller,
                operation: "set quality app",
            });
        }
        if new_app.is_zero() {
            return Err(GateError::ZeroAddress { field: "new_app" });
        }
        let previous = std::mem::replace(&mut roles.quality_app, new_app);
        on_change(previous);
        Ok(previous)
    }
}
