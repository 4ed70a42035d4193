//! Integration tests for file creation, decoding and the read interfaces.

use alopex_rrd::fetch::open_for_read;
use alopex_rrd::{
    create, fetch, first, info, last, CfName, CreateConfig, Creator, ErrorKind, RrdError,
    SyncMode,
};
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use tempfile::TempDir;

const DEFS: [&str; 4] = [
    "DS:in:COUNTER:600:0:U",
    "DS:out:COUNTER:600:0:U",
    "RRA:AVERAGE:0.5:1:288",
    "RRA:MAX:0.5:12:168",
];

#[test]
fn test_create_and_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("traffic.rrd");

    let created = create(&path, 300, 1_000_000_200, &DEFS).unwrap();
    let reopened = open_for_read(&path).unwrap();
    assert_eq!(created.header, reopened.header);
    // Unbounded limits are NaN, so compare the fields that identify a source.
    for (a, b) in created.data_sources.iter().zip(&reopened.data_sources) {
        assert_eq!((&a.name, a.kind, a.heartbeat), (&b.name, b.kind, b.heartbeat));
        assert_eq!(a.min, b.min);
        assert!(b.max.is_nan());
    }
    assert_eq!(created.archives, reopened.archives);
    assert_eq!(created.live, reopened.live);
    assert_eq!(created.current_rows, reopened.current_rows);
    assert_eq!(created.pdp, reopened.pdp);

    let expected_len = reopened.layout().unwrap().total;
    assert_eq!(std::fs::metadata(&path).unwrap().len(), expected_len);

    let summary = info(&path).unwrap();
    assert_eq!(summary.version, "0003");
    assert_eq!(summary.step, 300);
    assert_eq!(summary.last_update.last_update, 1_000_000_200);
    assert_eq!(summary.data_sources.len(), 2);
    assert_eq!(summary.archives.len(), 2);
    assert_eq!(summary.current_rows, vec![287, 167]);
}

#[test]
fn test_create_refuses_existing_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("exists.rrd");
    create(&path, 300, 1_000_000_200, &DEFS).unwrap();

    let err = create(&path, 300, 1_000_000_200, &DEFS).unwrap_err();
    assert!(matches!(err, RrdError::AlreadyExists(_)));

    let mut creator = Creator::new(60).start(0).config(
        CreateConfig::default()
            .with_overwrite(true)
            .with_sync_mode(SyncMode::None),
    );
    for def in ["DS:a:GAUGE:120:U:U", "RRA:LAST:0:1:10"] {
        creator = creator.definition(def).unwrap();
    }
    creator.create(&path).unwrap();
    assert_eq!(open_for_read(&path).unwrap().step(), 60);
}

#[test]
fn test_create_rejects_bad_definitions() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("bad.rrd");

    let cases: [&[&str]; 4] = [
        &["DS:a:GAUGE:600:U:U"],
        &["DS:a:GAUGE:600:U:U", "DS:a:GAUGE:600:U:U", "RRA:LAST:0:1:1"],
        &["DS:a:SOMETHING:600:U:U", "RRA:LAST:0:1:1"],
        &["DS:a:GAUGE:600:U:U", "RRA:AVERAGE:0.5:1:0"],
    ];
    for defs in cases {
        assert!(create(&path, 300, 0, defs).is_err(), "{:?}", defs);
    }
    assert!(!path.exists());
}

#[test]
fn test_corrupt_cookie() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("cookie.rrd");
    create(&path, 300, 1_000_000_200, &DEFS).unwrap();

    let mut file = OpenOptions::new().write(true).open(&path).unwrap();
    file.write_all(b"XYZ\0").unwrap();
    drop(file);

    let err = open_for_read(&path).unwrap_err();
    assert!(matches!(err, RrdError::InvalidCookie(_)));
    assert_eq!(err.kind(), ErrorKind::Format);
}

#[test]
fn test_unsupported_version() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("version.rrd");
    create(&path, 300, 1_000_000_200, &DEFS).unwrap();

    let mut file = OpenOptions::new().write(true).open(&path).unwrap();
    file.seek(SeekFrom::Start(4)).unwrap();
    file.write_all(b"0009").unwrap();
    drop(file);

    assert!(matches!(
        open_for_read(&path),
        Err(RrdError::UnsupportedVersion(_))
    ));
}

#[test]
fn test_size_mismatch() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("size.rrd");
    create(&path, 300, 1_000_000_200, &DEFS).unwrap();
    let len = std::fs::metadata(&path).unwrap().len();

    // Truncated value area.
    let file = OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(len - 8).unwrap();
    drop(file);
    let err = open_for_read(&path).unwrap_err();
    assert!(matches!(err, RrdError::SizeMismatch { .. }));
    assert_eq!(err.kind(), ErrorKind::Format);

    // Trailing garbage.
    let file = OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(len + 1).unwrap();
    drop(file);
    assert!(matches!(
        open_for_read(&path),
        Err(RrdError::SizeMismatch { .. })
    ));
}

#[test]
fn test_oversized_ds_count() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("counts.rrd");
    create(&path, 300, 1_000_000_200, &DEFS).unwrap();

    // ds_cnt sits at byte 24 of the static header.
    let mut file = OpenOptions::new().write(true).open(&path).unwrap();
    file.seek(SeekFrom::Start(24)).unwrap();
    file.write_all(&(u64::MAX / 100).to_ne_bytes()).unwrap();
    drop(file);

    let err = open_for_read(&path).unwrap_err();
    assert!(matches!(err, RrdError::InvalidLayout(_)));
    assert_eq!(err.kind(), ErrorKind::Format);
}

#[test]
fn test_read_interfaces_on_fresh_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("fresh.rrd");
    create(&path, 300, 1_000_000_200, &DEFS).unwrap();

    assert_eq!(last(&path).unwrap(), 1_000_000_200);
    // 1_000_000_200 is a multiple of 300 but not of 3600.
    assert_eq!(first(&path, 0).unwrap(), 1_000_000_200 - 287 * 300);
    assert_eq!(
        first(&path, 1).unwrap(),
        1_000_000_200 - 1_000_000_200 % 3600 - 167 * 3600
    );
    assert!(matches!(first(&path, 2), Err(RrdError::UnknownArchive(2))));

    let result = fetch(&path, CfName::Average, 1_000_000_200 - 3000, 1_000_000_200, 300).unwrap();
    assert_eq!(result.ds_names, vec!["in", "out"]);
    assert_eq!(result.rows.len(), 10);
    assert!(result.rows.iter().flatten().all(|v| v.is_nan()));

    let err = fetch(&path, CfName::Minimum, 0, 1, 300).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownName);
}
