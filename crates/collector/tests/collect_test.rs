use std::time::Duration;

use proxmox_exporter_api::{GuestKind, Operation};
use proxmox_exporter_api_mock::{MockCluster, fixtures};
use proxmox_exporter_collector::{CollectorConfig, Error};
use tracing_test::traced_test;

mod common;
use common::{DAY, Exposition, NOW, TestCluster};

const GIB: u64 = 1024 * 1024 * 1024;

fn single_node() -> MockCluster {
    let upstream = MockCluster::new();
    upstream
        .with_nodes(&[("pve1", "online")])
        .with_empty_node("pve1", 16, 64 * GIB);
    upstream
}

#[tokio::test]
async fn test_allocation_counts_stopped_guests() {
    let upstream = single_node();
    upstream
        .with_guests(
            "pve1",
            GuestKind::Qemu,
            vec![
                fixtures::guest(100, "web", "running", 2, 4096),
                fixtures::guest(101, "db", "running", 4, 8192),
            ],
        )
        .with_guests(
            "pve1",
            GuestKind::Lxc,
            vec![fixtures::legacy_container(200, "dns", "stopped", 1, 1024)],
        );
    let cluster = TestCluster::new(&upstream);

    let metrics = cluster.scrape().await;

    let node = [("node", "pve1")];
    assert_eq!(metrics.value("proxmox_node_cpus_allocated", &node), Some(7.0));
    assert_eq!(
        metrics.value("proxmox_node_memory_allocated_bytes", &node),
        Some(13312.0)
    );
    assert_eq!(
        metrics.value("proxmox_guest_up", &[("vmid", "100"), ("type", "qemu")]),
        Some(1.0)
    );
    assert_eq!(
        metrics.value("proxmox_guest_up", &[("vmid", "101"), ("name", "db")]),
        Some(1.0)
    );
    assert_eq!(
        metrics.value("proxmox_guest_up", &[("vmid", "200"), ("type", "lxc")]),
        Some(0.0)
    );
    assert_eq!(metrics.value("proxmox_cluster_cpus_allocated", &[]), Some(7.0));
    assert_eq!(
        metrics.value("proxmox_cluster_memory_allocated_bytes", &[]),
        Some(13312.0)
    );
    assert_eq!(metrics.value("proxmox_cluster_cpus_total", &[]), Some(16.0));
}

#[tokio::test]
async fn test_allocation_saturates_instead_of_overflowing() {
    let upstream = single_node();
    upstream
        .with_guests(
            "pve1",
            GuestKind::Qemu,
            vec![
                fixtures::guest(100, "big", "running", 2, u64::MAX),
                fixtures::guest(101, "bigger", "running", 2, u64::MAX),
            ],
        )
        .with_guests(
            "pve1",
            GuestKind::Lxc,
            vec![fixtures::guest(200, "dns", "running", 1, 1024)],
        );
    let cluster = TestCluster::new(&upstream);

    let metrics = cluster.scrape().await;

    #[allow(clippy::cast_precision_loss)]
    let max = u64::MAX as f64;
    assert_eq!(
        metrics.value("proxmox_node_memory_allocated_bytes", &[("node", "pve1")]),
        Some(max)
    );
    assert_eq!(metrics.value("proxmox_cluster_memory_allocated_bytes", &[]), Some(max));
    assert_eq!(metrics.value("proxmox_node_cpus_allocated", &[("node", "pve1")]), Some(5.0));
}

#[tokio::test]
async fn test_node_metrics() {
    let upstream = single_node();
    upstream
        .with_node_status("pve1", 32, 128 * GIB, "pve-manager/8.2.4/faa83925c9641325")
        .with_storage(
            "pve1",
            vec![
                fixtures::storage("local", "dir", false, 100 * GIB, 40 * GIB),
                fixtures::storage("ceph", "rbd", true, 1000 * GIB, 10 * GIB),
            ],
        )
        .with_disks(
            "pve1",
            vec![
                fixtures::disk("/dev/sda", "PASSED"),
                fixtures::disk("/dev/nvme0n1", "OK"),
                fixtures::disk("/dev/sdb", "FAILED"),
            ],
        );
    let cluster = TestCluster::new(&upstream);

    let metrics = cluster.scrape().await;

    assert_eq!(metrics.value("proxmox_node_up", &[("node", "pve1")]), Some(1.0));
    assert_eq!(
        metrics.value(
            "proxmox_node_version",
            &[("node", "pve1"), ("version", "pve-manager/8.2.4/faa83925c9641325")]
        ),
        Some(1.0)
    );
    assert_eq!(
        metrics.value("proxmox_node_memory_total_bytes", &[("node", "pve1")]),
        Some((128 * GIB) as f64)
    );
    assert_eq!(
        metrics.value(
            "proxmox_node_storage_used_bytes",
            &[("storage", "local"), ("type", "dir"), ("shared", "false")]
        ),
        Some((40 * GIB) as f64)
    );
    assert_eq!(
        metrics.value(
            "proxmox_node_storage_total_bytes",
            &[("storage", "ceph"), ("type", "rbd"), ("shared", "true")]
        ),
        Some((1000 * GIB) as f64)
    );
    assert_eq!(
        metrics.value("proxmox_node_disk_smart_status", &[("devpath", "/dev/sda")]),
        Some(1.0)
    );
    assert_eq!(
        metrics.value("proxmox_node_disk_smart_status", &[("devpath", "/dev/nvme0n1")]),
        Some(1.0)
    );
    assert_eq!(
        metrics.value("proxmox_node_disk_smart_status", &[("devpath", "/dev/sdb")]),
        Some(0.0)
    );
}

#[tokio::test]
async fn test_certificate_expiry_in_days() {
    let upstream = single_node();
    upstream.with_certificates(
        "pve1",
        vec![
            fixtures::certificate("/CN=pve1.example.com", NOW + 10 * DAY),
            fixtures::certificate("/CN=Proxmox Virtual Environment", NOW + 3650 * DAY + 500),
        ],
    );
    let cluster = TestCluster::new(&upstream);

    let metrics = cluster.scrape().await;

    assert_eq!(
        metrics.value(
            "proxmox_node_days_until_cert_expiration",
            &[("node", "pve1"), ("subject", "/CN=pve1.example.com")]
        ),
        Some(10.0)
    );
    assert_eq!(
        metrics.value(
            "proxmox_node_days_until_cert_expiration",
            &[("subject", "/CN=Proxmox Virtual Environment")]
        ),
        Some(3650.0)
    );
}

#[tokio::test]
#[traced_test]
async fn test_certificate_failure_reports_zero() {
    let upstream = single_node();
    let certificates = Operation::NodeCertificates {
        node: "pve1".to_string(),
    };
    upstream.fail(&certificates);
    let cluster = TestCluster::new(&upstream);

    let metrics = cluster.scrape().await;

    assert_eq!(
        metrics.value(
            "proxmox_node_days_until_cert_expiration",
            &[("node", "pve1"), ("subject", "unknown")]
        ),
        Some(0.0)
    );
    assert!(logs_contain(
        "Reporting 0 days until expiry for certificate unknown on node pve1"
    ));
}

#[tokio::test(start_paused = true)]
async fn test_certificate_failure_keeps_known_subjects() {
    let upstream = single_node();
    upstream.with_certificates(
        "pve1",
        vec![fixtures::certificate("/CN=pve1.example.com", NOW + 10 * DAY)],
    );
    let cluster = TestCluster::new(&upstream);
    cluster.scrape().await;

    let certificates = Operation::NodeCertificates {
        node: "pve1".to_string(),
    };
    upstream.fail(&certificates);
    tokio::time::advance(Duration::from_secs(25)).await;
    let metrics = cluster.scrape().await;

    assert_eq!(
        metrics.value(
            "proxmox_node_days_until_cert_expiration",
            &[("subject", "/CN=pve1.example.com")]
        ),
        Some(0.0)
    );
    assert_eq!(
        metrics.value("proxmox_node_days_until_cert_expiration", &[("subject", "unknown")]),
        None
    );
}

#[tokio::test]
#[traced_test]
async fn test_certificate_without_expiry_reports_zero() {
    let upstream = single_node();
    upstream.with_certificates(
        "pve1",
        vec![serde_json::json!({ "subject": "/CN=broken", "filename": "pveproxy-ssl.pem" })],
    );
    let cluster = TestCluster::new(&upstream);

    let metrics = cluster.scrape().await;

    assert_eq!(
        metrics.value("proxmox_node_days_until_cert_expiration", &[("subject", "/CN=broken")]),
        Some(0.0)
    );
    assert!(logs_contain(
        "Certificate /CN=broken on node pve1 has no expiry, reporting 0 days"
    ));
}

#[tokio::test]
async fn test_offline_node_emits_only_up() {
    let upstream = MockCluster::new();
    upstream
        .with_nodes(&[("pve1", "online"), ("pve2", "offline")])
        .with_empty_node("pve1", 8, 32 * GIB)
        .with_empty_node("pve2", 64, 512 * GIB)
        .with_guests(
            "pve2",
            GuestKind::Qemu,
            vec![fixtures::guest(300, "orphan", "running", 16, 64 * GIB)],
        )
        .with_storage(
            "pve2",
            vec![fixtures::storage("local", "dir", false, GIB, GIB)],
        );
    let cluster = TestCluster::new(&upstream);

    let metrics = cluster.scrape().await;

    let pve2 = [("node", "pve2")];
    assert_eq!(metrics.value("proxmox_node_up", &pve2), Some(0.0));
    assert_eq!(metrics.find("proxmox_guest_up", &pve2).len(), 0);
    assert_eq!(metrics.find("proxmox_node_storage_total_bytes", &pve2).len(), 0);
    assert_eq!(metrics.find("proxmox_node_cpus_total", &pve2).len(), 0);
    assert_eq!(metrics.value("proxmox_cluster_cpus_total", &[]), Some(8.0));
    assert_eq!(
        metrics.value("proxmox_cluster_memory_total_bytes", &[]),
        Some((32 * GIB) as f64)
    );
    assert_eq!(
        upstream.request_count(&Operation::NodeStatus {
            node: "pve2".to_string()
        }),
        0
    );
}

#[tokio::test]
async fn test_partial_failures_only_drop_their_share() {
    let upstream = MockCluster::new();
    upstream
        .with_nodes(&[("pve1", "online"), ("pve2", "online"), ("pve3", "online")])
        .with_empty_node("pve1", 8, 1000)
        .with_empty_node("pve2", 16, 2000)
        .with_empty_node("pve3", 32, 4000);
    for node in ["pve1", "pve2", "pve3"] {
        upstream.with_guests(
            node,
            GuestKind::Qemu,
            vec![fixtures::guest(100, "vm", "running", 2, 100)],
        );
    }

    // pve2 loses its status, pve3 its container listing.
    upstream.fail(&Operation::NodeStatus {
        node: "pve2".to_string(),
    });
    upstream.fail(&Operation::NodeGuests {
        node: "pve3".to_string(),
        kind: GuestKind::Lxc,
    });
    let cluster = TestCluster::with_config(&upstream, 3, CollectorConfig::default());

    let metrics = cluster.scrape().await;

    assert_eq!(metrics.value("proxmox_cluster_cpus_total", &[]), Some(40.0));
    assert_eq!(
        metrics.value("proxmox_cluster_memory_total_bytes", &[]),
        Some(5000.0)
    );
    assert_eq!(metrics.value("proxmox_cluster_cpus_allocated", &[]), Some(4.0));
    assert_eq!(
        metrics.value("proxmox_cluster_memory_allocated_bytes", &[]),
        Some(200.0)
    );

    assert_eq!(metrics.value("proxmox_node_cpus_total", &[("node", "pve2")]), None);
    assert_eq!(
        metrics.value("proxmox_node_cpus_allocated", &[("node", "pve2")]),
        Some(2.0)
    );
    assert_eq!(metrics.value("proxmox_node_cpus_allocated", &[("node", "pve3")]), None);
    assert_eq!(
        metrics.value("proxmox_guest_up", &[("node", "pve3"), ("type", "qemu")]),
        Some(1.0)
    );
    assert_eq!(metrics.count("proxmox_node_up"), 3);
}

#[tokio::test]
async fn test_node_listing_failure_fails_scrape() {
    let upstream = single_node();
    upstream.fail(&Operation::Nodes);
    let cluster = TestCluster::new(&upstream);

    let result = cluster.collector.collect().await;

    assert!(matches!(result, Err(Error::NodeListing(_))));
}

#[tokio::test]
async fn test_second_scrape_within_ttl_is_served_from_cache() {
    let upstream = single_node();
    upstream.with_guests(
        "pve1",
        GuestKind::Qemu,
        vec![fixtures::guest(100, "web", "running", 2, 4096)],
    );
    let cluster = TestCluster::new(&upstream);

    let first = cluster.scrape().await;
    let requests = upstream.total_requests();
    let second = cluster.scrape().await;

    assert_eq!(first, second);
    assert_eq!(upstream.total_requests(), requests);
}

#[tokio::test(start_paused = true)]
async fn test_scrape_after_ttl_refetches() {
    let upstream = single_node();
    let cluster = TestCluster::new(&upstream);

    cluster.scrape().await;
    tokio::time::advance(Duration::from_secs(24)).await;
    cluster.scrape().await;

    assert_eq!(upstream.request_count(&Operation::Nodes), 2);
}

#[tokio::test]
async fn test_templates_are_matched_by_vmid() {
    let upstream = single_node();
    upstream
        .with_guests(
            "pve1",
            GuestKind::Qemu,
            vec![
                fixtures::guest(100, "ubuntu", "running", 2, 4096),
                fixtures::guest(9000, "ubuntu", "stopped", 8, 8192),
            ],
        )
        .set_response(
            &Operation::ClusterStatus,
            fixtures::cluster_status("lab", &["pve1"]),
        );
    upstream.set_response(
        &Operation::ClusterResources,
        serde_json::json!([
            fixtures::vm_resource(100, "ubuntu", "pve1", false),
            fixtures::vm_resource(9000, "ubuntu", "pve1", true),
        ]),
    );
    let cluster = TestCluster::new(&upstream);
    cluster.context.detect_cluster_name().await;

    let metrics = cluster.scrape().await;

    assert_eq!(metrics.count("proxmox_guest_up"), 1);
    assert_eq!(
        metrics.value("proxmox_guest_up", &[("vmid", "100"), ("cluster", "lab")]),
        Some(1.0)
    );
    assert_eq!(
        metrics.value("proxmox_node_cpus_allocated", &[("node", "pve1")]),
        Some(2.0)
    );
}

#[tokio::test]
async fn test_cluster_resources_failure_excludes_nothing() {
    let upstream = single_node();
    upstream
        .with_guests(
            "pve1",
            GuestKind::Qemu,
            vec![fixtures::guest(9000, "template", "stopped", 8, 8192)],
        )
        .set_response(
            &Operation::ClusterStatus,
            fixtures::cluster_status("lab", &["pve1"]),
        );
    upstream.fail(&Operation::ClusterResources);
    let cluster = TestCluster::with_config(&upstream, 2, CollectorConfig::default());
    cluster.context.detect_cluster_name().await;

    let metrics = cluster.scrape().await;

    assert_eq!(metrics.value("proxmox_guest_up", &[("vmid", "9000")]), Some(0.0));
}

#[tokio::test]
async fn test_listing_template_flag_is_honoured() {
    let upstream = single_node();
    let mut template = fixtures::guest(9001, "golden", "stopped", 4, 4096);
    template["template"] = serde_json::json!(1);
    upstream.with_guests("pve1", GuestKind::Qemu, vec![template]);
    let cluster = TestCluster::new(&upstream);

    let metrics = cluster.scrape().await;

    assert_eq!(metrics.count("proxmox_guest_up"), 0);
    assert_eq!(
        metrics.value("proxmox_node_cpus_allocated", &[("node", "pve1")]),
        Some(0.0)
    );
}

#[tokio::test(start_paused = true)]
async fn test_deadline_cancels_hanging_requests() {
    let upstream = single_node();
    upstream.hang(&Operation::NodeDisks {
        node: "pve1".to_string(),
    });
    let cluster = TestCluster::with_config(
        &upstream,
        2,
        CollectorConfig {
            scrape_timeout: Duration::from_secs(5),
            ..CollectorConfig::default()
        },
    );

    let started = tokio::time::Instant::now();
    let metrics = cluster.scrape().await;

    assert!(started.elapsed() <= Duration::from_secs(6));
    assert_eq!(metrics.value("proxmox_node_up", &[("node", "pve1")]), Some(1.0));
    assert_eq!(metrics.value("proxmox_cluster_cpus_total", &[]), Some(16.0));
    assert_eq!(metrics.count("proxmox_node_disk_smart_status"), 0);
    assert!(
        cluster
            .context
            .pool()
            .statuses()
            .iter()
            .all(|status| status.is_active())
    );
}

#[tokio::test(start_paused = true)]
async fn test_dropped_scrape_leaves_no_task_behind() {
    let upstream = single_node();
    upstream.hang(&Operation::NodeDisks {
        node: "pve1".to_string(),
    });
    let cluster = TestCluster::with_config(
        &upstream,
        1,
        CollectorConfig {
            scrape_timeout: Duration::from_secs(5),
            ..CollectorConfig::default()
        },
    );

    let abandoned = tokio::time::timeout(Duration::from_secs(1), cluster.collector.collect()).await;
    assert!(abandoned.is_err());
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(tokio::runtime::Handle::current().metrics().num_alive_tasks(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_bounded_node_concurrency() {
    let upstream = MockCluster::new();
    let nodes: Vec<String> = (1..=6).map(|i| format!("pve{i}")).collect();
    let listing: Vec<(&str, &str)> = nodes.iter().map(|n| (n.as_str(), "online")).collect();
    upstream.with_nodes(&listing);
    for node in &nodes {
        upstream.with_empty_node(node, 4, 1024);
    }
    upstream.set_latency(Duration::from_millis(100));
    let cluster = TestCluster::with_config(
        &upstream,
        1,
        CollectorConfig {
            max_concurrent_nodes: 2,
            ..CollectorConfig::default()
        },
    );

    let metrics = cluster.scrape().await;

    assert_eq!(metrics.count("proxmox_node_up"), 6);
    assert_eq!(metrics.value("proxmox_cluster_cpus_total", &[]), Some(24.0));
}

#[tokio::test]
async fn test_snapshot_metrics_are_opt_in() {
    let upstream = single_node();
    upstream.with_guests(
        "pve1",
        GuestKind::Qemu,
        vec![fixtures::guest(100, "web", "running", 2, 4096)],
    );
    upstream.set_response(
        &Operation::GuestSnapshots {
            node: "pve1".to_string(),
            kind: GuestKind::Qemu,
            vmid: 100,
        },
        fixtures::snapshots(&["before-upgrade", "nightly"]),
    );

    let disabled = TestCluster::new(&upstream).scrape().await;
    assert_eq!(disabled.count("proxmox_guest_snapshots_count"), 0);

    let enabled = TestCluster::with_config(
        &upstream,
        1,
        CollectorConfig {
            enable_snapshot_metrics: true,
            ..CollectorConfig::default()
        },
    )
    .scrape()
    .await;
    assert_eq!(
        enabled.value(
            "proxmox_guest_snapshots_count",
            &[("node", "pve1"), ("type", "qemu"), ("vmid", "100")]
        ),
        Some(2.0)
    );
}

#[tokio::test]
async fn test_failover_keeps_scrape_complete() {
    let upstream = single_node();
    let cluster = TestCluster::with_config(&upstream, 2, CollectorConfig::default());
    cluster.endpoints[0].set_reachable(false);

    let metrics = cluster.scrape().await;

    assert_eq!(metrics.value("proxmox_cluster_cpus_total", &[]), Some(16.0));
    assert_eq!(cluster.endpoints[0].requests(), 1);
    assert!(!cluster.context.pool().statuses()[0].is_active());
}

#[test]
fn test_exposition_unescapes_label_values() {
    let metrics = Exposition::parse(concat!(
        "# HELP proxmox_guest_info Guest\n",
        r#"proxmox_guest_info{name="a \"b\", c",node="pve1"} 1"#,
        "\n",
    ));

    assert_eq!(
        metrics.value("proxmox_guest_info", &[("name", r#"a "b", c"#), ("node", "pve1")]),
        Some(1.0)
    );
}
