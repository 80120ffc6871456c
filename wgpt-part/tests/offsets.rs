#![allow(missing_docs)]

use log as _;
use num_traits as _;
use test_log::test;

#[test]
fn start_size_to_end_entry_array() {
    // 124 GPT entries of 128 bytes on 512-byte blocks, right after the primary header
    assert_eq!(wgpt_part::start_size_to_end(2_u64, 31), 32);
}

#[test]
fn start_size_to_end_single_lba() {
    assert_eq!(wgpt_part::start_size_to_end(2_u64, 1), 2);
}

#[test]
fn start_size_to_end_whole_disk() {
    // Protective MBR record, starting at LBA 1 on a 71680 LBAs disk
    assert_eq!(wgpt_part::start_size_to_end(1_u64, 71_679), 71_679);
}

#[test]
#[should_panic]
fn start_size_to_end_negative_start() {
    let _ = wgpt_part::start_size_to_end(-2, 31);
}

#[test]
#[should_panic]
fn start_size_to_end_empty_array() {
    let _ = wgpt_part::start_size_to_end(2_u64, 0);
}
