// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Connectivity state machine.
//!
//! The [`ConnectivityManager`] owns network bring-up, the one-time clock
//! synchronization, the broker session and its recovery. Inbound messages
//! go to a [`MessageHandler`] and status changes to an [`EventListener`].

mod event;
mod manager;
mod policy;
mod state;

pub use event::{ConnectivityEvent, EventListener, MessageHandler};
pub use manager::ConnectivityManager;
pub use policy::{ConnectMode, RetryPolicy};
pub use state::ConnectionState;
