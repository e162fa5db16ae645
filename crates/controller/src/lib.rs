/*
 * Resource Guard - Kubernetes Resource Policy Controller
 * Copyright (C) 2025 5D Labs
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 */

#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc, clippy::doc_markdown)]

//! Resource policy controller library
//!
//! Watches Deployments, checks that every container declares resource
//! requests and limits, and notifies a chat channel about the ones that don't.

pub mod config;
pub mod controller;
pub mod dedup;
pub mod error;
pub mod handler;
pub mod health;
pub mod key;
pub mod namespaces;
pub mod policy;
pub mod queue;
pub mod sink;
pub mod source;

// Re-export commonly used types
pub use config::GuardConfig;
pub use controller::{Controller, ControllerSettings};
pub use error::{Error, Result};
pub use handler::{SyncHandler, SyncOutcome};
pub use key::ObjectKey;
pub use queue::WorkQueue;
