// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use crate::{Fingerprint, EMPTY_FINGERPRINT};

#[test]
fn from_bytes_unsafe() {
    assert_eq!(
        Fingerprint::from_bytes_unsafe(&[
            0xab, 0xab, 0xab, 0xab, 0xab, 0xab, 0xab, 0xab, 0xab, 0xab, 0xab, 0xab, 0xab, 0xab,
            0xab, 0xab, 0xab, 0xab, 0xab, 0xab, 0xab, 0xab, 0xab, 0xab, 0xab, 0xab, 0xab, 0xab,
            0xab, 0xab, 0xab, 0xab,
        ],),
        Fingerprint([0xab; 32])
    );
}

#[test]
fn from_hex_string() {
    assert_eq!(
        Fingerprint::from_hex_string(
            "0123456789abcdefFEDCBA98765432100000000000000000ffFFfFfFFfFfFFff",
        )
        .unwrap(),
        Fingerprint([
            0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef, 0xfe, 0xdc, 0xba, 0x98, 0x76, 0x54,
            0x32, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff,
        ],)
    )
}

#[test]
fn from_hex_string_not_long_enough() {
    Fingerprint::from_hex_string("abcd").expect_err("Want err");
}

#[test]
fn to_hex() {
    assert_eq!(
        Fingerprint([
            0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef, 0xfe, 0xdc, 0xba, 0x98, 0x76, 0x54,
            0x32, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff, 0xff, 0xff, 0xff,
            0xff, 0xff, 0xff, 0xff,
        ],)
        .to_hex(),
        "0123456789abcdeffedcba98765432100000000000000000ffffffffffffffff".to_lowercase()
    )
}

#[test]
fn of_bytes_empty_is_empty_fingerprint() {
    assert_eq!(Fingerprint::of_bytes(b""), EMPTY_FINGERPRINT);
}

#[test]
fn display() {
    let hex = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";
    assert_eq!(
        Fingerprint::from_hex_string(hex).unwrap().to_string(),
        hex.to_lowercase()
    )
}
