// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cloud Adaptor Core - data model, persistence and the task event log.
//!
//! This crate owns everything that must survive a restart of the provisioning
//! engine: stored credentials, cluster metadata for RKE and imported clusters,
//! per-cluster platform overrides, task rows and the per-task event log.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                 cloud-adaptor-engine                          │
//! │   task handlers ──► EventSink ◄── usecase (list events)       │
//! └──────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │            cloud-adaptor-core (This Crate)                    │
//! │  ┌───────────┐   ┌────────────────────┐   ┌───────────────┐   │
//! │  │   model   │   │ sink::EventSink    │   │  migrations   │   │
//! │  └───────────┘   └────────────────────┘   └───────────────┘   │
//! │                  ┌────────────────────┐                       │
//! │                  │ trait Persistence  │                       │
//! │                  └────────────────────┘                       │
//! └──────────────────────────────────────────────────────────────┘
//!              │                                  │
//!              ▼                                  ▼
//!     SqlitePersistence (DB_TYPE=sqlite3)   MySqlPersistence (DB_TYPE=mysql)
//! ```
//!
//! # Event log rules
//!
//! Events are unique per `(enterprise_id, task_id, step_type)`. A repeated
//! write overwrites status and message unless the stored status is already
//! `success`, in which case the write is dropped. See [`sink`] for how events
//! drive task status.

pub mod error;
pub mod migrations;
pub mod model;
pub mod persistence;
pub mod sink;
pub mod steps;

pub use error::{CoreError, Result};
pub use sink::EventSink;
