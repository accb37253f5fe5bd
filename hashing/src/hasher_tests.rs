// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use crate::Hasher;

#[test]
fn deterministic() {
    let mut a = Hasher::new();
    a.update_str("name").update_str("foo");
    let mut b = Hasher::new();
    b.update_str("name").update_str("foo");
    assert_eq!(a.finish(), b.finish());
}

#[test]
fn field_boundaries_matter() {
    let mut a = Hasher::new();
    a.update_str("ab").update_str("c");
    let mut b = Hasher::new();
    b.update_str("a").update_str("bc");
    assert_ne!(a.finish(), b.finish());
}

#[test]
fn value_changes_fingerprint() {
    let mut a = Hasher::new();
    a.update_str("srcs").update_str("Foo.java");
    let mut b = Hasher::new();
    b.update_str("srcs").update_str("Bar.java");
    assert_ne!(a.finish(), b.finish());
}
