//! End-to-end scenarios seeded straight from the specification's own
//! worked examples, run against a mounted [`Sofs14`] handle rather than
//! against individual modules (those already have their own unit tests).

use std::io::Cursor;

use sofs14::{
    consistency_check, format, FileBlockDevice, Geometry, InodeNum, InodeType, Sofs14, SofsError,
    BLOCK_SIZE,
};

fn formatted(nblocks: u64, ninodes: u64, name: &str) -> FileBlockDevice<Cursor<Vec<u8>>> {
    let buf = vec![0u8; (nblocks * BLOCK_SIZE) as usize];
    let mut dev = FileBlockDevice::new(Cursor::new(buf), BLOCK_SIZE);
    format(&mut dev, nblocks, ninodes, name).unwrap();
    dev
}

/// Scenario 1: format a 19-block device with 16 inodes.
#[test]
fn scenario_1_format_geometry_and_free_counts() {
    let g = Geometry::compute(19, 16).unwrap();
    assert_eq!(g.itable_blocks, 2);
    assert_eq!(g.n_clusters_total, 4);
    assert_eq!(g.n_inodes, 16);

    let dev = formatted(19, 16, "vol");
    let mut fs = Sofs14::mount(dev).unwrap();
    let info = fs.info();
    assert_eq!(info.total_inodes, 16);
    assert_eq!(info.free_inodes, 15);
    assert_eq!(info.total_clusters, 4);
    assert_eq!(info.free_clusters, 3);

    let root = fs.stat(InodeNum::ROOT).unwrap();
    assert_eq!(root.kind(), Some(InodeType::Directory));
    assert_eq!(root.refcount, 2);

    let mut dev = fs.unmount().unwrap();
    let defects = consistency_check(&mut dev).unwrap();
    assert!(defects.is_empty(), "{defects:?}");
}

/// Scenario 2: drain the free-inode list, then free every inode back in
/// reverse order. The final free must leave every inode dirty (its prior
/// type bits retained) rather than clean, and freeing inode 0 is rejected.
#[test]
fn scenario_2_inode_allocate_free_fifo_cycle() {
    let dev = formatted(19, 16, "vol");
    let mut fs = Sofs14::mount(dev).unwrap();

    let mut created = Vec::new();
    for i in 0..15 {
        let n = fs
            .create(InodeNum::ROOT, &format!("f{i}"), 0, 0, 0o644)
            .unwrap();
        created.push(n);
    }
    assert_eq!(fs.info().free_inodes, 0);

    assert_eq!(
        fs.create(InodeNum::ROOT, "one-too-many", 0, 0, 0o644),
        Err(SofsError::NoSpace)
    );

    for (i, &n) in created.iter().enumerate().rev() {
        let before = fs.stat(n).unwrap();
        fs.unlink(InodeNum::ROOT, &format!("f{i}"), 0, 0).unwrap();
        let after = fs.stat(n).unwrap();
        assert!(after.is_free_dirty(), "{before:?} -> {after:?}");
        assert_eq!(after.kind(), before.kind());
    }

    assert_eq!(fs.info().free_inodes, 15);

    let mut dev = fs.unmount().unwrap();
    let defects = consistency_check(&mut dev).unwrap();
    assert!(defects.is_empty(), "{defects:?}");
}

/// Scenario 3: cross both the single- and double-indirect boundaries for
/// one inode's cluster references, then release them again. The indices
/// used here are derived from this implementation's actual `N_DIRECT`/
/// `RPC` (the spec's own worked numbers assume a different, illustrative
/// geometry), but the invariant under test is the one the scenario names:
/// free-cluster accounting round-trips exactly once the inode is cleaned.
#[test]
fn scenario_3_cluster_reference_tree_crosses_indirect_boundaries() {
    let n_direct = sofs14::N_DIRECT as u64;
    let rpc = sofs14::RPC as u64;
    let last_single = n_direct + rpc - 1;
    let first_double = n_direct + rpc;

    let nblocks = (first_double + 4) * 4 + 200;
    let dev = formatted(nblocks, 8, "vol");
    let mut fs = Sofs14::mount(dev).unwrap();

    let n = fs.create(InodeNum::ROOT, "big", 0, 0, 0o644).unwrap();
    let free_before = fs.info().free_clusters;

    let payload = sofs14::CLUSTER_SIZE as u64 - 12;
    for logical in [0u64, 1, n_direct, last_single, first_double] {
        fs.write(n, logical * payload, b"x").unwrap();
    }

    let mid = fs.stat(n).unwrap();
    assert!(
        mid.cluster_count >= 5 + 2,
        "expected the 5 data clusters plus at least an i1 and an i2 index cluster, got {}",
        mid.cluster_count
    );
    assert!(fs.info().free_clusters < free_before);

    fs.unlink(InodeNum::ROOT, "big", 0, 0).unwrap();
    assert_eq!(fs.info().free_clusters, free_before);
}

/// Scenario 4: build a small directory hierarchy, rename within it,
/// remove everything, and check the refcount invariant at every step.
#[test]
fn scenario_4_directory_hierarchy_rename_and_removal() {
    let dev = formatted(200, 32, "vol");
    let mut fs = Sofs14::mount(dev).unwrap();

    let a = fs.mkdir(InodeNum::ROOT, "a", 0, 0, 0o755).unwrap();
    let b = fs.mkdir(a, "b", 0, 0, 0o755).unwrap();
    let _c = fs.mkdir(a, "c", 0, 0, 0o755).unwrap();
    let f1 = fs.create(b, "f1", 0, 0, 0o644).unwrap();
    let _f2 = fs.create(b, "f2", 0, 0, 0o644).unwrap();
    let _f3 = fs.create(a, "f3", 0, 0, 0o644).unwrap();
    let _s = fs.symlink(a, "s", "b/f1", 0, 0).unwrap();

    assert_eq!(fs.stat(a).unwrap().refcount, 2 + 2); // "." + ".." + b + c
    assert_eq!(fs.stat(b).unwrap().refcount, 2); // "." + ".."

    fs.rename(b, "f1", a, "f1-renamed").unwrap();
    assert_eq!(fs.lookup(a, "f1-renamed").unwrap(), f1);

    fs.rename(a, "c", a, "c-renamed").unwrap();

    assert_eq!(
        fs.rename(a, ".", a, "whatever"),
        Err(SofsError::InvalidArgument)
    );

    // tear it all back down
    fs.unlink(a, "s", 0, 0).unwrap();
    fs.unlink(a, "f3", 0, 0).unwrap();
    fs.unlink(a, "f1-renamed", 0, 0).unwrap();
    fs.unlink(b, "f2", 0, 0).unwrap();
    fs.rmdir(a, "c-renamed", 0, 0).unwrap();
    fs.rmdir(a, "b", 0, 0).unwrap();
    fs.rmdir(InodeNum::ROOT, "a", 0, 0).unwrap();

    let root = fs.stat(InodeNum::ROOT).unwrap();
    assert_eq!(root.refcount, 2);

    let mut dev = fs.unmount().unwrap();
    let defects = consistency_check(&mut dev).unwrap();
    assert!(defects.is_empty(), "{defects:?}");
}

/// Scenario 5: resolve a path through exactly one symlink hop, and reject
/// a chain that needs two.
#[test]
fn scenario_5_path_resolution_through_symlinks() {
    let dev = formatted(200, 32, "vol");
    let mut fs = Sofs14::mount(dev).unwrap();

    let a = fs.mkdir(InodeNum::ROOT, "a", 0, 0, 0o755).unwrap();
    let b = fs.mkdir(a, "b", 0, 0, 0o755).unwrap();
    let x = fs.create(b, "x", 0, 0, 0o644).unwrap();
    fs.symlink(InodeNum::ROOT, "s", "a", 0, 0).unwrap();

    assert_eq!(fs.resolve("/s/b/x").unwrap(), x);

    // a chain of two symlinks in a row is one hop too many
    fs.symlink(InodeNum::ROOT, "s2", "s", 0, 0).unwrap();
    assert_eq!(fs.resolve("/s2/b/x"), Err(SofsError::TooManySymlinks));
}

/// Scenario 6: write and read back a 1 MiB file on a device with at least
/// 2,500 clusters.
#[test]
fn scenario_6_large_file_write_and_read_back() {
    let nblocks = 2_600 * 4 + 100;
    let dev = formatted(nblocks, 64, "vol");
    let mut fs = Sofs14::mount(dev).unwrap();

    let n = fs.create(InodeNum::ROOT, "big", 0, 0, 0o644).unwrap();
    let size = 1024 * 1024usize;
    let mut data = vec![0u8; size];
    for (i, b) in data.iter_mut().enumerate() {
        *b = (i % 251) as u8;
    }

    fs.write(n, 0, &data).unwrap();
    let mut readback = vec![0u8; size];
    let read = fs.read(n, 0, &mut readback).unwrap();
    assert_eq!(read, size);
    assert_eq!(readback, data);

    let payload_per_cluster = sofs14::CLUSTER_SIZE as u64 - 12;
    let data_clusters = (size as u64).div_ceil(payload_per_cluster);
    let inode = fs.stat(n).unwrap();
    assert!(
        u64::from(inode.cluster_count) >= data_clusters,
        "cluster_count {} should be at least the {} data clusters the payload needs",
        inode.cluster_count,
        data_clusters
    );
}
