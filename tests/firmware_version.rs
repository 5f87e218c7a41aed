mod common;

use bl600_mobile_lib::modem::firmware::{compare_le, locate_version, MINIMUM_FIRMWARE};
use bl600_mobile_lib::modem::{FirmwareError, FirmwareGate, FirmwareVersion};

use common::ScriptedModem;

#[test]
fn test_parse_and_display_roundtrip() {
    let version = FirmwareVersion::parse("1.8.88.0").unwrap();
    assert_eq!(version, FirmwareVersion::new(1, 8, 88, 0));
    assert_eq!(version.to_string(), "1.8.88.0");

    // Line breaks separate like dots; trailing records are ignored
    let version = FirmwareVersion::parse("1.8.89.3\r\n00\r").unwrap();
    assert_eq!(version.components(), [1, 8, 89, 3]);
}

#[test]
fn test_parse_rejects_short_or_bad_tokens() {
    assert!(matches!(FirmwareVersion::parse("1.8.88"), Err(FirmwareError::MalformedVersion { .. })));
    assert!(matches!(FirmwareVersion::parse("1.8.x.0"), Err(FirmwareError::MalformedVersion { .. })));
    assert!(matches!(FirmwareVersion::parse(""), Err(FirmwareError::MalformedVersion { .. })));
}

#[test]
fn test_compare_le_boundaries() {
    let min = MINIMUM_FIRMWARE;
    assert!(compare_le(&min, &FirmwareVersion::new(1, 8, 88, 0)));
    assert!(compare_le(&min, &FirmwareVersion::new(1, 8, 88, 1)));
    assert!(compare_le(&min, &FirmwareVersion::new(1, 9, 0, 0)));
    assert!(compare_le(&min, &FirmwareVersion::new(2, 0, 0, 0)));
    assert!(!compare_le(&min, &FirmwareVersion::new(1, 8, 87, 9)));
    assert!(!compare_le(&min, &FirmwareVersion::new(1, 7, 99, 99)));
    assert!(!compare_le(&min, &FirmwareVersion::new(0, 99, 99, 99)));

    // Equal prefixes fall through to the build number
    let min = FirmwareVersion::new(1, 8, 88, 5);
    assert!(!compare_le(&min, &FirmwareVersion::new(1, 8, 88, 4)));
    assert!(compare_le(&min, &FirmwareVersion::new(1, 8, 88, 5)));
}

#[test]
fn test_locate_version_requires_prefix() {
    assert_eq!(locate_version("\n10\t3\t1.8.88.0\r").unwrap(), "1.8.88.0\r");
    assert!(matches!(locate_version("\n01\tE007\r"), Err(FirmwareError::UnexpectedResponse { .. })));
}

#[test]
fn test_gate_accepts_current_firmware() {
    let mut modem = ScriptedModem::new(&[b"10\t3\t1.8.88.0\r\n"]);
    let mut trace = Vec::new();

    let check = FirmwareGate::default().check(&mut modem, Some(&mut trace)).unwrap();
    assert!(check.compatible);
    assert_eq!(check.reported, FirmwareVersion::new(1, 8, 88, 0));
    assert_eq!(check.required, MINIMUM_FIRMWARE);
    assert_eq!(modem.commands, vec!["AT I 3"]);

    let trace = String::from_utf8(trace).unwrap();
    assert!(trace.starts_with("0# AT I 3\n"), "trace was {:?}", trace);
    assert!(trace.contains("bytes: \"10\\t3\\t1.8.88.0\\r\\n\""), "trace was {:?}", trace);
}

#[test]
fn test_gate_flags_old_firmware() {
    let mut modem = ScriptedModem::new(&[b"10\t3\t1.8.87.0\r\n"]);
    let check = FirmwareGate::default().check(&mut modem, None).unwrap();
    assert!(!check.compatible);
    assert_eq!(check.reported, FirmwareVersion::new(1, 8, 87, 0));
}

#[test]
fn test_gate_shape_and_parse_errors() {
    let mut modem = ScriptedModem::new(&[b"\n01\tE007\r"]);
    let err = FirmwareGate::default().check(&mut modem, None).unwrap_err();
    assert!(matches!(err, FirmwareError::UnexpectedResponse { .. }));

    let mut modem = ScriptedModem::new(&[b"10\t3\t1.8.x.0\r\n"]);
    let err = FirmwareGate::default().check(&mut modem, None).unwrap_err();
    assert!(matches!(err, FirmwareError::MalformedVersion { .. }));

    // Silence is a zero-length response and therefore the wrong shape
    let mut modem = ScriptedModem::new(&[]);
    let err = FirmwareGate::default().check(&mut modem, None).unwrap_err();
    assert!(matches!(err, FirmwareError::UnexpectedResponse { .. }));
}

#[test]
fn test_gate_query_failure_skips_later_stages() {
    let mut modem = ScriptedModem::new(&[b"10\t3\t1.8.88.0\r\n"]).failing_at(0);
    let err = FirmwareGate::default().check(&mut modem, None).unwrap_err();
    match err {
        FirmwareError::Query(batch) => assert_eq!(batch.index, 0),
        other => panic!("expected query failure, got {:?}", other),
    }
}

#[test]
fn test_gate_respects_custom_minimum() {
    let gate = FirmwareGate::new(FirmwareVersion::new(1, 9, 0, 0));
    let check = gate.evaluate(b"10\t3\t1.8.88.0\r\n").unwrap();
    assert!(!check.compatible);
    assert_eq!(check.required.to_string(), "1.9.0.0");
}

#[test]
fn test_gate_tolerates_padded_and_signed_components() {
    let mut modem = ScriptedModem::new(&[b"10\t3\t 1.+8.88.0\r\n"]);
    let check = FirmwareGate::default().check(&mut modem, None).unwrap();
    assert!(check.compatible);
    assert_eq!(check.reported, FirmwareVersion::new(1, 8, 88, 0));

    let mut modem = ScriptedModem::new(&[b"10\t3\t1.-8.88.0\r\n"]);
    let err = FirmwareGate::default().check(&mut modem, None).unwrap_err();
    assert!(matches!(err, FirmwareError::MalformedVersion { .. }));
}
