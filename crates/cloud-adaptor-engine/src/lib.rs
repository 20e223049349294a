// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Cloud Adaptor Engine - cluster provisioning and platform installation
//!
//! This crate creates Kubernetes clusters through provider adaptors, installs
//! the Rainbond region on them through its operator, and grows RKE clusters
//! with new nodes. All three run as asynchronous tasks: the usecase persists a
//! task row, publishes it on the bus and returns; a handler picks it up and
//! streams step events into the durable event log.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                 cloud-adaptor-server (HTTP)                           │
//! └──────────────────────────────────────────────────────────────────────┘
//!                                  │
//!                                  ▼
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                cloud-adaptor-engine (This Crate)                      │
//! │                                                                      │
//! │  usecase::ClusterUsecase ──publish──► bus (in-process | NSQ)          │
//! │        │                                   │                          │
//! │        │                                   ▼                          │
//! │        │                          handler::TaskHandler                │
//! │        │                                   │ spawn                    │
//! │        ▼                                   ▼                          │
//! │  adaptor::{ack, rke, custom} ◄──── task::{Create, Init, Update}       │
//! │                                            │                          │
//! │                                            ▼                          │
//! │                      operator (helm, RainbondCluster CRs, polling)    │
//! └──────────────────────────────────────────────────────────────────────┘
//!                                  │
//!                                  ▼
//!                  cloud-adaptor-core (persistence, event sink)
//! ```
//!
//! # Task protocol
//!
//! A task emits `(step, status, message)` triples on a channel and always
//! finishes with `Close`, whatever happened before. The handler forwards every
//! other message to the event sink, which also moves the task row to its
//! terminal status. Step names live in [`cloud_adaptor_core::steps`].
//!
//! # Embedding
//!
//! [`runtime::EngineRuntime`] assembles the whole engine from a persistence
//! handle and an [`config::EngineConfig`].

pub mod adaptor;
pub mod bus;
pub mod config;
pub mod error;
pub mod handler;
pub mod operator;
pub mod poll;
pub mod runtime;
pub mod task;
pub mod usecase;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{Error, Result};
