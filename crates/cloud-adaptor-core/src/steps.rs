// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Step names emitted by tasks and understood by the event sink.

/// First step of every task.
pub const INIT: &str = "Init";
/// End-of-stream sentinel. Never persisted.
pub const CLOSE: &str = "Close";
/// Synthesized by handlers when a task cannot be constructed.
pub const CREATE_TASK: &str = "CreateTask";

/// Managed-cloud cluster provisioning finished.
pub const CREATE_CLUSTER: &str = "CreateCluster";
/// RKE installer finished.
pub const INSTALL_KUBERNETES: &str = "InstallKubernetes";
/// RKE node expansion finished.
pub const UPDATE_KUBERNETES: &str = "UpdateKubernetes";

pub const CREATE_VPC: &str = "CreateVPC";
pub const CREATE_VSWITCH: &str = "CreateVSwitch";
pub const CHECK_CLUSTER: &str = "CheckCluster";
pub const CREATE_RDS: &str = "CreateRDS";
pub const CREATE_NAS: &str = "CreateNAS";
pub const CREATE_NAS_MOUNT: &str = "CreateNASMount";
pub const CREATE_LOAD_BALANCER: &str = "CreateLoadBalancer";
pub const BOUND_LOAD_BALANCER: &str = "BoundLoadBalancer";
pub const SET_SECURITY_GROUP: &str = "SetSecurityGroup";
pub const INIT_REGION_OPERATOR: &str = "InitRainbondRegionOperator";
pub const INIT_REGION_IMAGE_HUB: &str = "InitRainbondRegionImageHub";
pub const INIT_REGION_PACKAGE: &str = "InitRainbondRegionPackage";
pub const INIT_REGION_CONFIG: &str = "InitRainbondRegionRegionConfig";
/// Platform init finished.
pub const INIT_REGION: &str = "InitRainbondRegion";
