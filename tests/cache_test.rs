#![cfg(feature = "sqlite")]

mod common;

use serde::{Deserialize, Serialize};
use time::Duration;

use kvlite::cache::{CacheConfig, ClearMode};
use kvlite::error::Error;
use kvlite::value::Json;

use common::{at, cache_at, cache_with_config};

#[test]
fn timed_entry_hits_then_misses_after_expiry() {
    let t = cache_at(1000);
    t.cache
        .set_timed(("p", "k"), "hello", at(1060), &[])
        .unwrap();

    t.clock.set(1059);
    assert_eq!(
        t.cache.get::<String>(("p", "k")).unwrap(),
        Some("hello".to_string())
    );

    // The expiry instant itself is already expired.
    t.clock.set(1060);
    assert_eq!(t.cache.get::<String>(("p", "k")).unwrap(), None);
}

#[test]
fn timed_reads_do_not_extend_expiry() {
    let t = cache_at(1000);
    t.cache.set_timed(("p", "k"), "v", at(1060), &[]).unwrap();

    t.clock.set(1030);
    t.cache.get::<String>(("p", "k")).unwrap().unwrap();
    t.cache.get::<String>(("p", "k")).unwrap().unwrap();

    let entry = t.cache.peek_entry(("p", "k")).unwrap().unwrap();
    assert_eq!(entry.utc_expiry, 1060);
    assert_eq!(entry.interval, 0);
    assert!(!entry.is_sliding());
}

#[test]
fn sliding_reads_extend_expiry() {
    let t = cache_at(0);
    t.cache
        .set_sliding(("p", "k"), "v", Duration::seconds(30), &[])
        .unwrap();

    t.clock.set(20);
    assert_eq!(
        t.cache.get::<String>(("p", "k")).unwrap(),
        Some("v".to_string())
    );
    assert_eq!(
        t.cache.peek_entry(("p", "k")).unwrap().unwrap().utc_expiry,
        50
    );

    t.clock.set(49);
    assert_eq!(
        t.cache.get::<String>(("p", "k")).unwrap(),
        Some("v".to_string())
    );
    assert_eq!(
        t.cache.peek_entry(("p", "k")).unwrap().unwrap().utc_expiry,
        79
    );
}

#[test]
fn peek_never_extends() {
    let t = cache_at(0);
    t.cache
        .set_sliding(("p", "k"), "v", Duration::seconds(30), &[])
        .unwrap();

    t.clock.set(20);
    assert_eq!(
        t.cache.peek::<String>(("p", "k")).unwrap(),
        Some("v".to_string())
    );
    assert_eq!(
        t.cache.peek_entry(("p", "k")).unwrap().unwrap().utc_expiry,
        30
    );
}

#[test]
fn get_entry_reports_the_extended_expiry() {
    let t = cache_at(0);
    t.cache
        .set_sliding(("p", "k"), "v", Duration::seconds(30), &[])
        .unwrap();

    t.clock.set(10);
    let entry = t.cache.get_entry(("p", "k")).unwrap().unwrap();
    assert_eq!(entry.utc_expiry, 40);
}

#[test]
fn overwrite_preserves_uniqueness_and_creation() {
    let t = cache_at(500);
    t.cache.set_timed(("p", "k"), "a", at(1000), &[]).unwrap();

    t.clock.set(600);
    t.cache.set_timed(("p", "k"), "b", at(2000), &[]).unwrap();

    assert_eq!(t.cache.count(Some("p")).unwrap(), 1);
    assert_eq!(
        t.cache.get::<String>(("p", "k")).unwrap(),
        Some("b".to_string())
    );
    let entry = t.cache.peek_entry(("p", "k")).unwrap().unwrap();
    assert_eq!(entry.utc_expiry, 2000);
    // Set at t=500; the overwrite at t=600 kept the original creation.
    assert_eq!(entry.utc_creation, 500);
}

#[test]
fn static_entries_slide_with_the_configured_interval() {
    let t = cache_at(0);
    t.cache.set_static(("p", "k"), "v", &[]).unwrap();

    let entry = t.cache.peek_entry(("p", "k")).unwrap().unwrap();
    assert_eq!(entry.interval, 30 * 86_400);
    assert_eq!(entry.utc_expiry, 30 * 86_400);

    t.clock.set(100);
    t.cache.get::<String>(("p", "k")).unwrap().unwrap();
    let entry = t.cache.peek_entry(("p", "k")).unwrap().unwrap();
    assert_eq!(entry.utc_expiry, 100 + 30 * 86_400);
}

#[test]
fn bare_keys_land_in_the_default_partition() {
    let t = cache_at(0);
    t.cache.set_timed("k", "v", at(100), &[]).unwrap();

    assert_eq!(
        t.cache.get::<String>(("default", "k")).unwrap(),
        Some("v".to_string())
    );
    assert_eq!(t.cache.default_partition(), "default");
    assert_eq!(t.cache.count(Some("default")).unwrap(), 1);
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
struct User {
    name: String,
    logins: u32,
}

#[test]
fn value_kinds_round_trip() {
    let t = cache_at(0);

    t.cache.set_timed(("p", "s"), "text", at(100), &[]).unwrap();
    assert_eq!(
        t.cache.get::<String>(("p", "s")).unwrap(),
        Some("text".to_string())
    );

    let blob = vec![0x00u8, 0xff, 0x01];
    t.cache.set_timed(("p", "b"), &blob, at(100), &[]).unwrap();
    assert_eq!(t.cache.get::<Vec<u8>>(("p", "b")).unwrap(), Some(blob));

    let user = User {
        name: "alice".to_string(),
        logins: 7,
    };
    t.cache
        .set_timed(("p", "o"), &Json(user.clone()), at(100), &[])
        .unwrap();
    let stored: Json<User> = t.cache.get(("p", "o")).unwrap().unwrap();
    assert_eq!(stored.0, user);
}

#[test]
fn large_values_compress_transparently() {
    let t = cache_with_config(
        0,
        CacheConfig {
            compression_threshold: 64,
            ..Default::default()
        },
    );
    let large = "z".repeat(50_000);
    t.cache
        .set_timed(("p", "big"), large.as_str(), at(100), &[])
        .unwrap();

    let entry = t.cache.peek_entry(("p", "big")).unwrap().unwrap();
    assert!(entry.compressed);
    assert_eq!(t.cache.get::<String>(("p", "big")).unwrap(), Some(large));
}

#[test]
fn entry_value_decodes_scanned_entries() {
    let t = cache_at(0);
    t.cache.set_timed(("p", "k"), "v", at(100), &[]).unwrap();
    let entry = t.cache.peek_entry(("p", "k")).unwrap().unwrap();
    assert_eq!(t.cache.entry_value::<String>(&entry).unwrap(), "v");
    assert!(matches!(
        t.cache.entry_value::<Vec<u8>>(&entry).unwrap_err(),
        Error::InvalidData(_)
    ));
}

#[test]
fn empty_partition_and_key_are_rejected() {
    let t = cache_at(0);
    assert!(matches!(
        t.cache.set_timed(("p", ""), "v", at(100), &[]).unwrap_err(),
        Error::InvalidArgument(_)
    ));
    assert!(matches!(
        t.cache.set_timed(("", "k"), "v", at(100), &[]).unwrap_err(),
        Error::InvalidArgument(_)
    ));
    assert!(matches!(
        t.cache.get::<String>(("", "k")).unwrap_err(),
        Error::InvalidArgument(_)
    ));
}

#[test]
fn length_bounds_are_inclusive() {
    let t = cache_at(0);
    let partition = "p".repeat(255);
    let key = "k".repeat(255);
    t.cache
        .set_timed((partition.as_str(), key.as_str()), "v", at(100), &[])
        .unwrap();
    assert!(t
        .cache
        .contains((partition.as_str(), key.as_str()))
        .unwrap());

    let over = "k".repeat(256);
    assert!(matches!(
        t.cache
            .set_timed(("p", over.as_str()), "v", at(100), &[])
            .unwrap_err(),
        Error::InvalidArgument(_)
    ));
    let over_partition = "p".repeat(256);
    assert!(matches!(
        t.cache
            .set_timed((over_partition.as_str(), "k"), "v", at(100), &[])
            .unwrap_err(),
        Error::InvalidArgument(_)
    ));
}

#[test]
fn a_sixth_parent_key_is_rejected() {
    let t = cache_at(0);
    for i in 0..6 {
        t.cache
            .set_timed(("p", format!("parent{i}").as_str()), "v", at(100), &[])
            .unwrap();
    }

    let five: Vec<&str> = vec!["parent0", "parent1", "parent2", "parent3", "parent4"];
    t.cache
        .set_timed(("p", "five"), "v", at(100), &five)
        .unwrap();

    let six: Vec<&str> = vec![
        "parent0", "parent1", "parent2", "parent3", "parent4", "parent5",
    ];
    assert!(matches!(
        t.cache
            .set_timed(("p", "six"), "v", at(100), &six)
            .unwrap_err(),
        Error::InvalidArgument(_)
    ));
}

#[test]
fn contains_and_count_see_only_live_entries() {
    let t = cache_at(0);
    t.cache.set_timed(("p", "live"), "v", at(100), &[]).unwrap();
    t.cache.set_timed(("p", "dead"), "v", at(10), &[]).unwrap();
    t.cache.set_timed(("q", "live"), "v", at(100), &[]).unwrap();

    t.clock.set(50);
    assert!(t.cache.contains(("p", "live")).unwrap());
    assert!(!t.cache.contains(("p", "dead")).unwrap());
    assert!(!t.cache.contains(("p", "missing")).unwrap());

    assert_eq!(t.cache.count(Some("p")).unwrap(), 1);
    assert_eq!(t.cache.count(None).unwrap(), 2);
    assert_eq!(t.cache.count_including_expired(Some("p")).unwrap(), 2);
    assert_eq!(t.cache.count_including_expired(None).unwrap(), 3);
}

#[test]
fn scans_filter_expired_rows_and_partitions() {
    let t = cache_at(0);
    t.cache.set_timed(("p", "a"), "1", at(100), &[]).unwrap();
    t.cache.set_timed(("p", "b"), "2", at(10), &[]).unwrap();
    t.cache.set_timed(("q", "c"), "3", at(100), &[]).unwrap();

    t.clock.set(50);
    let all = t.cache.peek_entries(None).unwrap();
    assert_eq!(all.len(), 2);

    let p = t.cache.peek_entries(Some("p")).unwrap();
    assert_eq!(p.len(), 1);
    assert_eq!(p[0].key, "a");
}

#[test]
fn get_entries_extends_sliding_rows_only() {
    let t = cache_at(0);
    t.cache
        .set_sliding(("p", "sliding"), "v", Duration::seconds(30), &[])
        .unwrap();
    t.cache
        .set_timed(("p", "timed"), "v", at(100), &[])
        .unwrap();

    t.clock.set(20);
    let entries = t.cache.get_entries(Some("p")).unwrap();
    assert_eq!(entries.len(), 2);
    for entry in &entries {
        match entry.key.as_str() {
            "sliding" => assert_eq!(entry.utc_expiry, 50),
            "timed" => assert_eq!(entry.utc_expiry, 100),
            other => panic!("unexpected key {other}"),
        }
    }

    // The extension is persisted, not just reported.
    assert_eq!(
        t.cache
            .peek_entry(("p", "sliding"))
            .unwrap()
            .unwrap()
            .utc_expiry,
        50
    );
}

#[test]
fn remove_is_idempotent() {
    let t = cache_at(0);
    t.cache.set_timed(("p", "k"), "v", at(100), &[]).unwrap();
    t.cache.remove(("p", "k")).unwrap();
    assert_eq!(t.cache.get::<String>(("p", "k")).unwrap(), None);
    t.cache.remove(("p", "k")).unwrap();
}

#[test]
fn clear_partition_empties_it() {
    let t = cache_at(0);
    t.cache.set_timed(("p", "a"), "1", at(100), &[]).unwrap();
    t.cache.set_timed(("p", "b"), "2", at(100), &[]).unwrap();
    t.cache.set_timed(("q", "c"), "3", at(100), &[]).unwrap();

    assert_eq!(t.cache.clear(Some("p"), ClearMode::All).unwrap(), 2);
    assert_eq!(t.cache.count(Some("p")).unwrap(), 0);
    assert_eq!(t.cache.count(Some("q")).unwrap(), 1);
}

#[test]
fn clear_expired_keeps_live_rows() {
    let t = cache_at(0);
    t.cache.set_timed(("p", "dead"), "1", at(10), &[]).unwrap();
    t.cache.set_timed(("p", "live"), "2", at(100), &[]).unwrap();

    t.clock.set(50);
    assert_eq!(t.cache.clear(None, ClearMode::Expired).unwrap(), 1);
    assert_eq!(t.cache.count_including_expired(Some("p")).unwrap(), 1);
    assert!(t.cache.contains(("p", "live")).unwrap());
}

#[test]
fn close_disposes_the_engine() {
    let t = cache_at(0);
    t.cache.set_timed(("p", "k"), "v", at(100), &[]).unwrap();
    t.cache.close();
    t.cache.close();

    assert!(matches!(
        t.cache.get::<String>(("p", "k")).unwrap_err(),
        Error::Disposed
    ));
    assert!(matches!(
        t.cache.set_timed(("p", "k"), "v", at(100), &[]).unwrap_err(),
        Error::Disposed
    ));
    assert!(matches!(t.cache.count(None).unwrap_err(), Error::Disposed));
}
