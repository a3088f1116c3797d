use std::fmt;

use crate::GuestKind;

/// A read-only API request the exporter knows how to issue.
///
/// Every operation maps to one request path relative to `/api2/json/` and to
/// a cache key. Cache keys never mention the endpoint: all members of a
/// cluster answer with the same logical state, so a response from one
/// endpoint is interchangeable with a response from another.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Operation {
    /// `GET /version`
    Version,

    /// `GET /nodes`
    Nodes,

    /// `GET /nodes/{node}/status`
    NodeStatus {
        /// Node name.
        node: String,
    },

    /// `GET /nodes/{node}/qemu` or `GET /nodes/{node}/lxc`
    NodeGuests {
        /// Node name.
        node: String,
        /// Which guest listing.
        kind: GuestKind,
    },

    /// `GET /nodes/{node}/storage`
    NodeStorage {
        /// Node name.
        node: String,
    },

    /// `GET /nodes/{node}/disks/list`
    NodeDisks {
        /// Node name.
        node: String,
    },

    /// `GET /nodes/{node}/certificates/info`
    NodeCertificates {
        /// Node name.
        node: String,
    },

    /// `GET /cluster/status`
    ClusterStatus,

    /// `GET /cluster/resources?type=vm`
    ClusterResources,

    /// `GET /nodes/{node}/{kind}/{vmid}/snapshot`
    GuestSnapshots {
        /// Node name.
        node: String,
        /// Guest kind.
        kind: GuestKind,
        /// Guest id.
        vmid: u64,
    },
}

impl Operation {
    /// Short, stable name used in logs, errors and cache keys.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Version => "version",
            Self::Nodes => "nodes",
            Self::NodeStatus { .. } => "node_status",
            Self::NodeGuests {
                kind: GuestKind::Qemu,
                ..
            } => "node_qemu",
            Self::NodeGuests {
                kind: GuestKind::Lxc,
                ..
            } => "node_lxc",
            Self::NodeStorage { .. } => "node_storage",
            Self::NodeDisks { .. } => "node_disks",
            Self::NodeCertificates { .. } => "node_certificates",
            Self::ClusterStatus => "cluster_status",
            Self::ClusterResources => "cluster_resources",
            Self::GuestSnapshots { .. } => "guest_snapshots",
        }
    }

    /// Request path relative to the API root, including any query string.
    #[must_use]
    pub fn path(&self) -> String {
        match self {
            Self::Version => "version".to_string(),
            Self::Nodes => "nodes".to_string(),
            Self::NodeStatus { node } => format!("nodes/{node}/status"),
            Self::NodeGuests { node, kind } => format!("nodes/{node}/{kind}"),
            Self::NodeStorage { node } => format!("nodes/{node}/storage"),
            Self::NodeDisks { node } => format!("nodes/{node}/disks/list"),
            Self::NodeCertificates { node } => format!("nodes/{node}/certificates/info"),
            Self::ClusterStatus => "cluster/status".to_string(),
            Self::ClusterResources => "cluster/resources?type=vm".to_string(),
            Self::GuestSnapshots { node, kind, vmid } => {
                format!("nodes/{node}/{kind}/{vmid}/snapshot")
            }
        }
    }

    /// Endpoint-agnostic cache key: operation name plus resource identifier.
    #[must_use]
    pub fn cache_key(&self) -> String {
        match self {
            Self::Version | Self::Nodes | Self::ClusterStatus | Self::ClusterResources => {
                self.name().to_string()
            }
            Self::NodeStatus { node }
            | Self::NodeGuests { node, .. }
            | Self::NodeStorage { node }
            | Self::NodeDisks { node }
            | Self::NodeCertificates { node } => format!("{}/{node}", self.name()),
            Self::GuestSnapshots { node, kind, vmid } => {
                format!("{}/{node}/{kind}/{vmid}", self.name())
            }
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}
