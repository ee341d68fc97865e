// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Backend module - the provisioning capability contract.

pub mod mock;
pub mod registry;
mod traits;

pub use mock::{MockBackend, MockResourceState};
pub use registry::BackendRegistry;
pub use traits::*;
