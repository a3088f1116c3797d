//! Builders for API payloads in the shape the real API returns them.

use serde_json::{Value, json};

/// An element of `GET /nodes`.
#[must_use]
pub fn node(name: &str, status: &str) -> Value {
    json!({ "node": name, "status": status, "type": "node", "id": format!("node/{name}") })
}

/// Response of `GET /nodes/{node}/status`.
#[must_use]
pub fn node_status(cpus: u64, memory_total: u64, pveversion: &str) -> Value {
    json!({
        "cpuinfo": { "cpus": cpus, "sockets": 1, "model": "Mock CPU" },
        "memory": { "total": memory_total, "used": 0, "free": memory_total },
        "pveversion": pveversion,
        "kversion": "Linux 6.8.12-1-pve",
    })
}

/// An element of `GET /nodes/{node}/qemu` or `.../lxc`.
#[must_use]
pub fn guest(vmid: u64, name: &str, status: &str, cpus: u64, maxmem: u64) -> Value {
    json!({
        "vmid": vmid,
        "name": name,
        "status": status,
        "cpus": cpus,
        "maxmem": maxmem,
    })
}

/// An element of `GET /nodes/{node}/lxc` as older releases send it, with the
/// id as a string.
#[must_use]
pub fn legacy_container(vmid: u64, name: &str, status: &str, cpus: u64, maxmem: u64) -> Value {
    json!({
        "vmid": vmid.to_string(),
        "name": name,
        "status": status,
        "cpus": cpus,
        "maxmem": maxmem,
        "type": "lxc",
    })
}

/// An element of `GET /nodes/{node}/storage`.
#[must_use]
pub fn storage(name: &str, storage_type: &str, shared: bool, total: u64, used: u64) -> Value {
    json!({
        "storage": name,
        "type": storage_type,
        "shared": u8::from(shared),
        "total": total,
        "used": used,
        "active": 1,
    })
}

/// An element of `GET /nodes/{node}/disks/list`.
#[must_use]
pub fn disk(devpath: &str, health: &str) -> Value {
    json!({ "devpath": devpath, "health": health, "model": "Mock SSD" })
}

/// An element of `GET /nodes/{node}/certificates/info`.
#[must_use]
pub fn certificate(subject: &str, notafter: i64) -> Value {
    json!({ "subject": subject, "notafter": notafter, "filename": "pve-ssl.pem" })
}

/// Response of `GET /cluster/status` for a cluster named `name` with the
/// given member nodes.
#[must_use]
pub fn cluster_status(name: &str, members: &[&str]) -> Value {
    let mut entries = vec![json!({
        "id": "cluster",
        "name": name,
        "type": "cluster",
        "nodes": members.len(),
        "quorate": 1,
    })];
    entries.extend(members.iter().map(|member| {
        json!({ "id": format!("node/{member}"), "name": member, "type": "node", "online": 1 })
    }));
    Value::Array(entries)
}

/// An element of `GET /cluster/resources?type=vm`.
#[must_use]
pub fn vm_resource(vmid: u64, name: &str, node: &str, template: bool) -> Value {
    json!({
        "id": format!("qemu/{vmid}"),
        "type": "qemu",
        "vmid": vmid,
        "name": name,
        "node": node,
        "template": u8::from(template),
    })
}

/// Response of `GET /nodes/{node}/{kind}/{vmid}/snapshot` with the given
/// snapshot names followed by the `current` pseudo-entry.
#[must_use]
pub fn snapshots(names: &[&str]) -> Value {
    let mut entries: Vec<Value> = names.iter().map(|name| json!({ "name": name })).collect();
    entries.push(json!({ "name": "current", "description": "You are here!" }));
    Value::Array(entries)
}
