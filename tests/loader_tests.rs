mod common;

use autozone::dispatch::DnsHandler;
use autozone::dns::enums::DNSResourceType;
use autozone::dns::DNSPacket;
use autozone::zone::{LookupResult, ReloadHandle, ZoneNotifier};
use common::{dispatcher_for, loader_for, tcp_request, write_zone, zone_text};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;

#[tokio::test]
async fn test_malformed_file_does_not_affect_others() {
    let dir = TempDir::new().unwrap();
    write_zone(dir.path(), "db.one.test", &zone_text(1, ""));
    write_zone(dir.path(), "db.two.test", &zone_text(1, ""));
    write_zone(dir.path(), "db.three.test", &zone_text(1, ""));
    write_zone(dir.path(), "db.broken.test", "@ IN SOA ns1 hostmaster (\n");
    write_zone(dir.path(), "README", "not a zone");

    let (mut loader, table) = loader_for(&dir, &["."]);
    let report = loader.reload().await.unwrap();

    assert_eq!(report.loaded.len(), 3);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "db.broken.test");
    assert_eq!(table.len(), 3);
    assert!(table.lookup("broken.test.").is_none());
}

#[tokio::test]
async fn test_failed_rebuild_keeps_last_good_zone() {
    let dir = TempDir::new().unwrap();
    write_zone(dir.path(), "db.example.test", &zone_text(1, "www IN A 192.0.2.1\n"));
    let (mut loader, table) = loader_for(&dir, &["."]);
    loader.reload().await.unwrap();

    // No SOA at all
    write_zone(dir.path(), "db.example.test", "www IN A 192.0.2.2\n");
    let report = loader.reload().await.unwrap();
    assert_eq!(report.failed.len(), 1);

    let zone = table.lookup("example.test.").unwrap();
    assert_eq!(zone.serial, 1);
    let lookup = zone.lookup("www.example.test.", DNSResourceType::A);
    assert_eq!(lookup.answer[0].rdata_text(), "192.0.2.1");
}

#[tokio::test]
async fn test_removed_file_withdraws_zone() {
    let dir = TempDir::new().unwrap();
    write_zone(dir.path(), "db.keep.test", &zone_text(1, ""));
    write_zone(dir.path(), "db.gone.test", &zone_text(1, ""));
    let (mut loader, table) = loader_for(&dir, &["."]);
    loader.reload().await.unwrap();
    assert_eq!(table.len(), 2);

    std::fs::remove_file(dir.path().join("db.gone.test")).unwrap();
    let report = loader.reload().await.unwrap();

    assert_eq!(report.removed, vec!["gone.test."]);
    assert_eq!(report.unchanged, vec!["keep.test."]);
    assert!(table.lookup("gone.test.").is_none());
    assert!(table.lookup("keep.test.").is_some());
}

#[tokio::test]
async fn test_updated_zone_extends_journal() {
    let dir = TempDir::new().unwrap();
    write_zone(dir.path(), "db.example.test", &zone_text(1, "www IN A 192.0.2.1\n"));
    let (mut loader, table) = loader_for(&dir, &["."]);
    loader.reload().await.unwrap();

    write_zone(
        dir.path(),
        "db.example.test",
        &zone_text(2, "www IN A 192.0.2.1\nftp IN A 192.0.2.7\n"),
    );
    let report = loader.reload().await.unwrap();
    assert_eq!(report.loaded, vec!["example.test."]);

    let zone = table.lookup("example.test.").unwrap();
    assert_eq!(zone.serial, 2);
    let deltas = zone.deltas_since(1).unwrap();
    assert_eq!(deltas.len(), 1);
    assert!(deltas[0].removed.is_empty());
    assert_eq!(deltas[0].added.len(), 1);
    assert_eq!(deltas[0].added[0].owner(), "ftp.example.test.");
}

#[tokio::test]
async fn test_failed_new_zone_is_retried_until_it_builds() {
    let dir = TempDir::new().unwrap();
    write_zone(
        dir.path(),
        "db.example.test",
        &zone_text(1, "$INCLUDE extra.inc\n"),
    );
    let (mut loader, table) = loader_for(&dir, &["."]);

    let first = loader.reload().await.unwrap();
    assert_eq!(first.failed.len(), 1);
    assert!(table.lookup("example.test.").is_none());

    // Still failing: reported as a failure again, never as unchanged
    let second = loader.reload().await.unwrap();
    assert_eq!(second.failed.len(), 1);
    assert!(second.unchanged.is_empty());

    // The zone file itself is untouched, only its include appears
    write_zone(dir.path(), "extra.inc", "www IN A 192.0.2.44\n");
    let third = loader.reload().await.unwrap();
    assert_eq!(third.loaded, vec!["example.test."]);

    let zone = table.lookup("example.test.").unwrap();
    let lookup = zone.lookup("www.example.test.", DNSResourceType::A);
    assert_eq!(lookup.answer[0].rdata_text(), "192.0.2.44");

    let fourth = loader.reload().await.unwrap();
    assert_eq!(fourth.unchanged, vec!["example.test."]);
}

#[tokio::test]
async fn test_edit_without_serial_bump_forces_full_ixfr() {
    let dir = TempDir::new().unwrap();
    let (mut loader, table) = loader_for(&dir, &["."]);

    write_zone(dir.path(), "db.example.test", &zone_text(1, "www IN A 192.0.2.1\n"));
    loader.reload().await.unwrap();
    let old_soa = table.lookup("example.test.").unwrap().soa().clone();

    write_zone(dir.path(), "db.example.test", &zone_text(2, "www IN A 192.0.2.2\n;v2\n"));
    loader.reload().await.unwrap();
    assert_eq!(table.lookup("example.test.").unwrap().deltas_since(1).unwrap().len(), 1);

    write_zone(
        dir.path(),
        "db.example.test",
        &zone_text(2, "www IN A 192.0.2.3\nftpxx IN A 192.0.2.9\n"),
    );
    let report = loader.reload().await.unwrap();
    assert_eq!(report.loaded, vec!["example.test."]);

    let zone = table.lookup("example.test.").unwrap();
    assert!(zone.deltas_since(1).is_none());

    let mut request = tcp_request("example.test", DNSResourceType::IXFR);
    request.packet.authorities.push(old_soa);
    let served = dispatcher_for(table.clone()).serve(&request).await.unwrap();

    let data: HashSet<String> = served
        .messages
        .iter()
        .flat_map(|m| m.answers.iter())
        .filter(|r| r.rtype == DNSResourceType::A)
        .map(|r| r.rdata_text())
        .collect();
    assert!(data.contains("192.0.2.3"));
    assert!(data.contains("192.0.2.9"));
    assert!(!data.contains("192.0.2.1"));
    assert!(!data.contains("192.0.2.2"));

    let soas = served
        .messages
        .iter()
        .flat_map(|m| m.answers.iter())
        .filter(|r| r.rtype == DNSResourceType::SOA)
        .count();
    assert_eq!(soas, 2);
}

#[tokio::test]
async fn test_custom_pattern_and_template() {
    let dir = TempDir::new().unwrap();
    write_zone(dir.path(), "example.test.zone", &zone_text(1, ""));
    write_zone(dir.path(), "db.example.test", &zone_text(1, ""));

    let config = autozone::AutoConfig {
        directory: dir.path().to_path_buf(),
        name_pattern: r"(?P<zone>.+)\.zone".to_string(),
        name_template: "${zone}".to_string(),
        ..Default::default()
    };
    config.validate().unwrap();
    let table = Arc::new(autozone::ZoneTable::new(&config.origins).unwrap());
    let mut loader = autozone::ZoneLoader::new(table.clone(), &config).unwrap();

    let report = loader.reload().await.unwrap();
    assert_eq!(report.loaded, vec!["example.test."]);
    assert_eq!(
        table.lookup("example.test.").unwrap().file_path.as_deref(),
        Some(dir.path().join("example.test.zone").as_path())
    );
}

#[tokio::test]
async fn test_include_resolves_against_zone_directory() {
    let dir = TempDir::new().unwrap();
    write_zone(dir.path(), "hosts.inc", "www IN A 192.0.2.80\n");
    write_zone(
        dir.path(),
        "db.example.test",
        &zone_text(1, "$INCLUDE hosts.inc\n"),
    );

    let (mut loader, table) = loader_for(&dir, &["."]);
    loader.reload().await.unwrap();

    let zone = table.lookup("example.test.").unwrap();
    let lookup = zone.lookup("www.example.test.", DNSResourceType::A);
    assert_eq!(lookup.result, LookupResult::Success);
    assert_eq!(lookup.answer[0].rdata_text(), "192.0.2.80");
}

#[tokio::test]
async fn test_run_reloads_on_trigger_and_stops_on_shutdown() {
    let dir = TempDir::new().unwrap();
    write_zone(dir.path(), "db.first.test", &zone_text(1, ""));

    let config = autozone::AutoConfig {
        directory: dir.path().to_path_buf(),
        reload_interval: Some(Duration::from_secs(3600)),
        ..Default::default()
    };
    let table = Arc::new(autozone::ZoneTable::new(&config.origins).unwrap());
    let loader = autozone::ZoneLoader::new(table.clone(), &config).unwrap();

    let (shutdown_tx, _) = broadcast::channel(1);
    let (handle, trigger) = ReloadHandle::channel();
    let task = tokio::spawn(loader.run(shutdown_tx.subscribe(), trigger));

    wait_for(|| table.lookup("first.test.").is_some()).await;

    write_zone(dir.path(), "db.second.test", &zone_text(1, ""));
    assert!(handle.trigger());
    wait_for(|| table.lookup("second.test.").is_some()).await;

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_notify_only_on_serial_increase() {
    let secondary = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let notifier = Arc::new(
        ZoneNotifier::new(vec![secondary.local_addr().unwrap()])
            .with_timeout(Duration::from_millis(200)),
    );

    let dir = TempDir::new().unwrap();
    write_zone(dir.path(), "db.example.test", &zone_text(1, ""));
    let (loader, _table) = loader_for(&dir, &["."]);
    let mut loader = loader.with_notifier(notifier);

    // A new zone is not announced
    loader.reload().await.unwrap();
    let mut buf = vec![0u8; 512];
    assert!(
        tokio::time::timeout(Duration::from_millis(300), secondary.recv_from(&mut buf))
            .await
            .is_err()
    );

    write_zone(dir.path(), "db.example.test", &zone_text(20, ""));
    loader.reload().await.unwrap();

    let (len, _) = tokio::time::timeout(Duration::from_secs(2), secondary.recv_from(&mut buf))
        .await
        .unwrap()
        .unwrap();
    let notify = DNSPacket::parse(&buf[..len]).unwrap();
    assert_eq!(notify.header.opcode, 4);
    assert_eq!(notify.questions[0].qname(), "example.test.");
    assert_eq!(notify.answers[0].soa_serial(), Some(20));
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not reached in time");
}
