//! End-to-end behaviour of composed backends.

use std::sync::Arc;

use kasane_vfs::{
    AsyncMirror, DirectorySource, ErrorKind, FileIndex, FileSystem, IndexedFileSystem,
    ListingNode, MemoryBackend, MirrorState, MountTable, OpenAction, OpenFlags,
};
use tempfile::TempDir;

fn indexed_site() -> (TempDir, IndexedFileSystem<DirectorySource>) {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();
    let listing = ListingNode::directory("/", vec![ListingNode::file("a.txt", Some(5))]);
    let index = FileIndex::from_listing(&listing).unwrap();
    let fs = IndexedFileSystem::new(index, DirectorySource::new(dir.path()));
    (dir, fs)
}

#[tokio::test]
async fn indexed_listing_answers_from_metadata() {
    let (_dir, fs) = indexed_site();

    let attr = fs.stat("/a.txt").await.unwrap();
    assert!(attr.is_file());
    assert_eq!(attr.size, 5);

    let err = fs.stat("/missing").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    assert_eq!(fs.readdir("/").await.unwrap(), vec!["a.txt".to_string()]);
}

#[tokio::test]
async fn indexed_open_reuses_cached_handle() {
    let (_dir, fs) = indexed_site();

    let first = fs.open("/a.txt", OpenFlags::read()).await.unwrap();
    let second = fs.open("/a.txt", OpenFlags::read()).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.contents(), b"hello");

    let err = fs.write_file("/a.txt", b"nope").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
}

#[tokio::test]
async fn nested_mounts_route_by_longest_segment_prefix() {
    let table = MountTable::new();
    let a = Arc::new(MemoryBackend::new());
    let ab = Arc::new(MemoryBackend::new());
    table.mount_arc("/a", a.clone()).await.unwrap();
    table.mount_arc("/a/b", ab.clone()).await.unwrap();

    table.write_file("/a/bc", b"sibling").await.unwrap();
    table.write_file("/a/b/c", b"nested").await.unwrap();

    // "/a/bc" belongs to /a, not /a/b
    assert_eq!(a.read_file("/bc").await.unwrap(), b"sibling");
    assert_eq!(ab.read_file("/c").await.unwrap(), b"nested");
    assert!(!ab.exists("/bc").await);

    let names = table.readdir("/a").await.unwrap();
    assert!(names.contains(&"b".to_string()));
    assert!(names.contains(&"bc".to_string()));
}

#[tokio::test]
async fn empty_mount_is_visible_in_parent_listing() {
    let table = MountTable::new();
    table.mount("/mnt", MemoryBackend::new()).await.unwrap();

    let names = table.readdir("/").await.unwrap();
    assert!(names.contains(&"mnt".to_string()));
    assert!(table.stat("/mnt").await.unwrap().is_dir());
    assert!(table.readdir("/mnt").await.unwrap().is_empty());
}

#[tokio::test]
async fn cross_mount_rename_moves_the_file() {
    let table = MountTable::new();
    table.mount("/left", MemoryBackend::new()).await.unwrap();
    table.mount("/right", MemoryBackend::new()).await.unwrap();

    table.write_file("/left/f", b"payload").await.unwrap();
    table.rename("/left/f", "/right/g").await.unwrap();

    assert!(!table.exists("/left/f").await);
    assert_eq!(table.read_file("/right/g").await.unwrap(), b"payload");
}

#[tokio::test]
async fn mirror_converges_after_drain() {
    let sync: Arc<dyn FileSystem> = Arc::new(MemoryBackend::new());
    let slow = Arc::new(MemoryBackend::new());
    slow.mkdir("/seed").await.unwrap();
    slow.write_file("/seed/base.txt", b"base").await.unwrap();

    let mirror = AsyncMirror::create(Arc::clone(&sync), slow.clone()).await.unwrap();
    assert_eq!(mirror.state(), MirrorState::Ready);
    assert_eq!(sync.read_file("/seed/base.txt").await.unwrap(), b"base");

    mirror.mkdir("/work").await.unwrap();
    for i in 0..10 {
        mirror
            .write_file(&format!("/work/{i}.txt"), format!("v{i}").as_bytes())
            .await
            .unwrap();
    }
    mirror.rename("/work/0.txt", "/work/zero.txt").await.unwrap();
    mirror.unlink("/seed/base.txt").await.unwrap();

    mirror.drained().await;
    assert_eq!(mirror.pending(), 0);

    let mut expected = sync.readdir("/work").await.unwrap();
    let mut actual = slow.readdir("/work").await.unwrap();
    expected.sort();
    actual.sort();
    assert_eq!(expected, actual);
    assert_eq!(slow.read_file("/work/zero.txt").await.unwrap(), b"v0");
    assert_eq!(slow.read_file("/work/9.txt").await.unwrap(), b"v9");
    assert!(!slow.exists("/seed/base.txt").await);
}

#[tokio::test]
async fn mirror_inside_mount_table() {
    let slow = Arc::new(MemoryBackend::new());
    let mirror = Arc::new(
        AsyncMirror::create(Arc::new(MemoryBackend::new()), slow.clone())
            .await
            .unwrap(),
    );
    let table = MountTable::new();
    table.mount_arc("/data", mirror.clone()).await.unwrap();
    assert!(table.supports_synch());

    table.write_file("/data/notes", b"kept").await.unwrap();
    mirror.drained().await;
    assert_eq!(slow.read_file("/notes").await.unwrap(), b"kept");
}

#[test]
fn open_table_is_backend_independent() {
    let cases = [
        (OpenFlags::read(), true, OpenAction::Reuse),
        (OpenFlags::read(), false, OpenAction::RejectMissing),
        (OpenFlags::create(), false, OpenAction::CreateFile),
        (OpenFlags::create_truncate(), true, OpenAction::Truncate),
        (OpenFlags::create_exclusive(), true, OpenAction::RejectExists),
        (OpenFlags::create_exclusive(), false, OpenAction::CreateFile),
    ];
    for (flags, exists, action) in cases {
        assert_eq!(flags.resolve(exists), action, "{flags:?} exists={exists}");
    }

    let err = OpenAction::RejectExists.into_result("/f").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    let err = OpenAction::RejectMissing.into_result("/f").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn same_flags_same_outcome_across_backends() {
    let dir = TempDir::new().unwrap();
    let backends: Vec<Arc<dyn FileSystem>> = vec![
        Arc::new(MemoryBackend::new()),
        Arc::new(kasane_vfs::LocalBackend::new(dir.path())),
    ];
    for fs in backends {
        let err = fs.open("/nope", OpenFlags::read()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound, "{}", fs.name());

        fs.open("/new", OpenFlags::create_exclusive()).await.unwrap();
        let err = fs.open("/new", OpenFlags::create_exclusive()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists, "{}", fs.name());
    }
}

#[tokio::test]
async fn out_of_range_writes_fail_through_composites() {
    let slow = Arc::new(MemoryBackend::new());
    let mirror = Arc::new(
        AsyncMirror::create(Arc::new(MemoryBackend::new()), slow.clone())
            .await
            .unwrap(),
    );
    let table = MountTable::new();
    table.mount_arc("/data", mirror.clone()).await.unwrap();
    table.write_file("/data/f", b"abc").await.unwrap();

    let err = table.write("/data/f", u64::MAX, b"x").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    let err = table.truncate("/data/f", u64::MAX).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    mirror.drained().await;
    assert_eq!(mirror.pending(), 0);
    assert_eq!(slow.read_file("/f").await.unwrap(), b"abc");
}

#[tokio::test]
async fn mount_below_a_file_is_rejected() {
    let table = MountTable::new();
    table.write_file("/file", b"x").await.unwrap();

    let err = table.mount("/file/sub", MemoryBackend::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotADirectory);
    assert!(table.stat("/file/sub").await.is_err());
}
