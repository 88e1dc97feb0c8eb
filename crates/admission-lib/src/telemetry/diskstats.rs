//! Block device I/O counters from `/proc/diskstats`
//!
//! Line format (kernel docs, Documentation/admin-guide/iostats.rst):
//! `major minor name reads merged sectors_read ms writes merged sectors_written ...`
//! Sector counts are always in 512-byte units regardless of the device.

use anyhow::{Context, Result};
use std::path::Path;

const SECTOR_SIZE: u64 = 512;

/// Cumulative bytes read and written across whole block devices
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskCounters {
    pub read_bytes: u64,
    pub write_bytes: u64,
}

/// Parse `/proc/diskstats` contents into host-wide counters.
///
/// Only physical whole devices are summed. Loop, ram and zram devices are
/// ignored, as are device-mapper (`dm-*`) and software RAID (`md*`) volumes
/// whose I/O is already counted on their backing disks. A partition is a
/// listed device name followed by a number: `sda1` under `sda`, and with a
/// `p` separator when the disk name ends in a digit (`nvme0n1p2` under
/// `nvme0n1`).
pub fn parse_diskstats(content: &str) -> DiskCounters {
    let devices: Vec<(&str, u64, u64)> = content
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 10 {
                return None;
            }
            let sectors_read = parts[5].parse::<u64>().ok()?;
            let sectors_written = parts[9].parse::<u64>().ok()?;
            Some((parts[2], sectors_read, sectors_written))
        })
        .filter(|(name, _, _)| !is_virtual_device(name))
        .collect();

    devices
        .iter()
        .filter(|(name, _, _)| {
            !devices
                .iter()
                .any(|(disk, _, _)| is_partition_of(name, disk))
        })
        .fold(DiskCounters::default(), |acc, (_, read, written)| DiskCounters {
            read_bytes: acc.read_bytes.saturating_add(read.saturating_mul(SECTOR_SIZE)),
            write_bytes: acc
                .write_bytes
                .saturating_add(written.saturating_mul(SECTOR_SIZE)),
        })
}

fn is_virtual_device(name: &str) -> bool {
    let numbered = |prefix: &str| {
        name.strip_prefix(prefix)
            .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
    };
    ["loop", "ram", "zram", "md"].iter().any(|prefix| numbered(prefix)) || name.starts_with("dm-")
}

fn is_partition_of(name: &str, disk: &str) -> bool {
    let Some(suffix) = name.strip_prefix(disk) else {
        return false;
    };
    let number = if disk.ends_with(|c: char| c.is_ascii_digit()) {
        match suffix.strip_prefix('p') {
            Some(number) => number,
            None => return false,
        }
    } else {
        suffix
    };
    !number.is_empty() && number.bytes().all(|b| b.is_ascii_digit())
}

/// Read and parse a diskstats file
pub fn read_diskstats(path: &Path) -> Result<DiskCounters> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(parse_diskstats(&content))
}
