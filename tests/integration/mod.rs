//! Integration tests for domtape
//!
//! These tests drive a recording end to end and replay what reached the store.

#[path = "../common/mod.rs"]
pub mod common;

pub mod playback;
pub mod roundtrip;
pub mod storage;
