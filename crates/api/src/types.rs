//! Response models for the subset of the Proxmox VE API the exporter reads.
//!
//! Only fields that feed a metric are modelled; everything else in the
//! payload is ignored.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::serde_lenient;

/// Response of `GET /version`.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Version {
    /// Major release, e.g. `8.2`.
    #[serde(default)]
    pub release: String,

    /// Full manager version, e.g. `8.2.4`.
    #[serde(default)]
    pub version: String,

    /// Repository commit the build came from.
    #[serde(default)]
    pub repoid: Option<String>,
}

/// One element of `GET /nodes`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct NodeListEntry {
    /// Node name.
    pub node: String,

    /// Node state as reported by the cluster (`online`, `offline`, `unknown`).
    #[serde(default)]
    pub status: String,

    /// Number of logical CPUs, when the node is online.
    #[serde(default, deserialize_with = "serde_lenient::opt_u64_from_any")]
    pub maxcpu: Option<u64>,

    /// Total memory in bytes, when the node is online.
    #[serde(default, deserialize_with = "serde_lenient::opt_u64_from_any")]
    pub maxmem: Option<u64>,
}

impl NodeListEntry {
    /// Whether the cluster reports this node as online.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.status.eq_ignore_ascii_case("online")
    }
}

/// CPU section of `GET /nodes/{node}/status`.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct CpuInfo {
    /// Logical CPUs (cores × threads × sockets).
    #[serde(default, deserialize_with = "serde_lenient::u64_from_any")]
    pub cpus: u64,

    /// Physical sockets.
    #[serde(default, deserialize_with = "serde_lenient::u64_from_any")]
    pub sockets: u64,

    /// CPU model string.
    #[serde(default)]
    pub model: String,
}

/// Memory section of `GET /nodes/{node}/status`.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct MemoryInfo {
    /// Total memory in bytes.
    #[serde(default, deserialize_with = "serde_lenient::u64_from_any")]
    pub total: u64,

    /// Used memory in bytes.
    #[serde(default, deserialize_with = "serde_lenient::u64_from_any")]
    pub used: u64,

    /// Free memory in bytes.
    #[serde(default, deserialize_with = "serde_lenient::u64_from_any")]
    pub free: u64,
}

/// Response of `GET /nodes/{node}/status`.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct NodeStatus {
    /// CPU information.
    #[serde(default)]
    pub cpuinfo: CpuInfo,

    /// Memory information.
    #[serde(default)]
    pub memory: MemoryInfo,

    /// Manager version string, e.g. `pve-manager/8.2.4/faa83925c9641325`.
    #[serde(default)]
    pub pveversion: String,

    /// Running kernel version.
    #[serde(default)]
    pub kversion: String,
}

/// The two guest flavours a node can host.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GuestKind {
    /// QEMU/KVM virtual machine.
    Qemu,
    /// LXC container.
    Lxc,
}

impl GuestKind {
    /// Path segment and metric label used for this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Qemu => "qemu",
            Self::Lxc => "lxc",
        }
    }
}

impl fmt::Display for GuestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One element of `GET /nodes/{node}/qemu` or `GET /nodes/{node}/lxc`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct GuestEntry {
    /// Cluster-unique numeric guest id. Older releases send it as a string
    /// for containers.
    #[serde(deserialize_with = "serde_lenient::u64_from_any")]
    pub vmid: u64,

    /// Display name; not unique across the cluster.
    #[serde(default)]
    pub name: String,

    /// Run state (`running`, `stopped`, ...).
    #[serde(default)]
    pub status: String,

    /// Configured vCPU count.
    #[serde(default, deserialize_with = "serde_lenient::u64_from_any")]
    pub cpus: u64,

    /// Configured memory in bytes.
    #[serde(default, deserialize_with = "serde_lenient::u64_from_any")]
    pub maxmem: u64,

    /// Set on template guests by releases that report it in the listing.
    #[serde(default, deserialize_with = "serde_lenient::flag")]
    pub template: bool,
}

impl GuestEntry {
    /// Whether the guest is currently running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status.eq_ignore_ascii_case("running")
    }
}

/// One element of `GET /nodes/{node}/storage`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct StorageEntry {
    /// Storage id.
    pub storage: String,

    /// Storage plugin type (`dir`, `lvmthin`, `zfspool`, `nfs`, ...).
    #[serde(rename = "type", default)]
    pub storage_type: String,

    /// Whether the storage is shared across cluster members.
    #[serde(default, deserialize_with = "serde_lenient::flag")]
    pub shared: bool,

    /// Capacity in bytes.
    #[serde(default, deserialize_with = "serde_lenient::u64_from_any")]
    pub total: u64,

    /// Used bytes.
    #[serde(default, deserialize_with = "serde_lenient::u64_from_any")]
    pub used: u64,
}

/// One element of `GET /nodes/{node}/disks/list`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct DiskEntry {
    /// Device path, e.g. `/dev/sda`.
    pub devpath: String,

    /// SMART health summary (`PASSED`, `OK`, `FAILED`, `UNKNOWN`), if known.
    #[serde(default)]
    pub health: Option<String>,

    /// Disk model.
    #[serde(default)]
    pub model: Option<String>,
}

impl DiskEntry {
    /// Whether SMART reports the disk as healthy. Missing or unrecognised
    /// health values count as unhealthy.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.health.as_deref().is_some_and(|health| {
            health.eq_ignore_ascii_case("PASSED") || health.eq_ignore_ascii_case("OK")
        })
    }
}

/// One element of `GET /nodes/{node}/certificates/info`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct CertificateInfo {
    /// Certificate subject.
    #[serde(default)]
    pub subject: String,

    /// Expiry as a unix timestamp.
    #[serde(default)]
    pub notafter: Option<i64>,

    /// File the certificate was loaded from.
    #[serde(default)]
    pub filename: Option<String>,
}

/// One element of `GET /cluster/status`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ClusterStatusEntry {
    /// Entry id, e.g. `cluster` or `node/pve1`.
    #[serde(default)]
    pub id: String,

    /// Cluster or node name.
    #[serde(default)]
    pub name: String,

    /// Entry kind: `cluster` or `node`.
    #[serde(rename = "type", default)]
    pub entry_type: String,
}

/// One element of `GET /cluster/resources`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ClusterResource {
    /// Resource id, e.g. `qemu/100`.
    #[serde(default)]
    pub id: String,

    /// Resource kind (`qemu`, `lxc`, `node`, `storage`, ...).
    #[serde(rename = "type", default)]
    pub resource_type: String,

    /// Guest id, for guest resources.
    #[serde(default, deserialize_with = "serde_lenient::opt_u64_from_any")]
    pub vmid: Option<u64>,

    /// Guest name, for guest resources.
    #[serde(default)]
    pub name: Option<String>,

    /// Node the resource lives on.
    #[serde(default)]
    pub node: Option<String>,

    /// Whether the guest is a template.
    #[serde(default, deserialize_with = "serde_lenient::flag")]
    pub template: bool,
}

/// One element of `GET /nodes/{node}/{qemu|lxc}/{vmid}/snapshot`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Snapshot {
    /// Snapshot name; the pseudo-entry for the live state is named `current`.
    pub name: String,

    /// Parent snapshot, if any.
    #[serde(default)]
    pub parent: Option<String>,
}
