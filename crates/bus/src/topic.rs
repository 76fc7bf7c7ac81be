// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The fixed topic taxonomy.

use serde::{Deserialize, Serialize};

/// Topics carried by the bus. The set is closed; routing is exhaustive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Topic {
    /// Work intake, keyed by `source_id`.
    RawItems,
    /// Intra-workflow claim fan-out, keyed by `workflow_id`.
    Claims,
    /// High-risk notifications, keyed by `workflow_id`.
    Alerts,
    /// User-visible events, keyed by recipient scope.
    Notifications,
    /// Poison messages, keyed by original topic+offset.
    Dlq,
}

impl Topic {
    pub const ALL: [Topic; 5] =
        [Topic::RawItems, Topic::Claims, Topic::Alerts, Topic::Notifications, Topic::Dlq];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::RawItems => "raw-items",
            Topic::Claims => "claims",
            Topic::Alerts => "alerts",
            Topic::Notifications => "notifications",
            Topic::Dlq => "dlq",
        }
    }

    /// Default partition count, sized per topic role.
    pub fn default_partitions(&self) -> u32 {
        match self {
            Topic::RawItems => 4,
            Topic::Claims => 4,
            Topic::Alerts => 1,
            Topic::Notifications => 1,
            Topic::Dlq => 1,
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
