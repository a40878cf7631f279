//! Directory provisioning on a real filesystem.
//!
//! As root the directories are handed to the grader uid/gid, which differs from
//! the creating user, so a missing chown shows up. Without root only the
//! creating user's own ids can be applied and the ownership change itself goes
//! unchecked.

#![cfg(unix)]

use grader_setup::storage::{LocalDirectoryProvisioner, Ownership, StorageError};
use grader_setup::{CourseIdentity, DirectoryProvisioner, IdentityResolver};
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use tempfile::TempDir;

const GRADER: Ownership = Ownership {
    uid: 10001,
    gid: 100,
};

/// Owner of a freshly created file, i.e. the effective uid/gid of the test process
fn process_owner(dir: &Path) -> Ownership {
    let marker = dir.join(".owner");
    std::fs::write(&marker, b"").unwrap();
    let meta = std::fs::metadata(&marker).unwrap();
    std::fs::remove_file(&marker).unwrap();
    Ownership::new(meta.uid(), meta.gid())
}

/// Target owner for the test and whether it differs from the creator
fn target_owner(tmp: &TempDir) -> (Ownership, bool) {
    let creator = process_owner(tmp.path());
    if creator.uid == 0 {
        assert_ne!(creator, GRADER);
        (GRADER, true)
    } else {
        (creator, false)
    }
}

fn assert_owned(path: &Path, owner: Ownership) {
    let meta = std::fs::metadata(path).unwrap();
    assert!(meta.is_dir(), "{} should be a directory", path.display());
    assert_eq!(meta.uid(), owner.uid, "uid of {}", path.display());
    assert_eq!(meta.gid(), owner.gid, "gid of {}", path.display());
}

#[tokio::test]
async fn creates_missing_ancestors_and_sets_owner() {
    let tmp = tempfile::tempdir().unwrap();
    let (owner, _) = target_owner(&tmp);
    let provisioner = LocalDirectoryProvisioner::new(tmp.path());

    let logical = Path::new("/illumidesk-courses/orgA/home/grader-cs101/cs101");
    provisioner.ensure_directory(logical, owner).await.unwrap();

    let course_dir = tmp
        .path()
        .join("illumidesk-courses/orgA/home/grader-cs101/cs101");
    assert_owned(&course_dir, owner);
    assert_owned(course_dir.parent().unwrap(), owner);
}

#[tokio::test]
async fn existing_directory_is_handed_to_owner() {
    let tmp = tempfile::tempdir().unwrap();
    let (owner, distinct) = target_owner(&tmp);
    let provisioner = LocalDirectoryProvisioner::new(tmp.path());

    let course_dir = tmp.path().join("courses/org/home/grader-c1/c1");
    std::fs::create_dir_all(&course_dir).unwrap();
    std::fs::write(course_dir.join("keep.txt"), b"existing").unwrap();
    if distinct {
        let before = std::fs::metadata(&course_dir).unwrap();
        assert_ne!(before.uid(), owner.uid);
    }

    let logical = Path::new("/courses/org/home/grader-c1/c1");
    provisioner.ensure_directory(logical, owner).await.unwrap();
    provisioner.ensure_directory(logical, owner).await.unwrap();

    assert_owned(&course_dir, owner);
    assert_owned(course_dir.parent().unwrap(), owner);
    assert_eq!(
        std::fs::read(course_dir.join("keep.txt")).unwrap(),
        b"existing"
    );
}

#[tokio::test]
async fn grandparent_keeps_its_owner() {
    let tmp = tempfile::tempdir().unwrap();
    let (owner, distinct) = target_owner(&tmp);
    if !distinct {
        return;
    }
    let provisioner = LocalDirectoryProvisioner::new(tmp.path());

    provisioner
        .ensure_directory(Path::new("/courses/org/home/grader-c1/c1"), owner)
        .await
        .unwrap();

    let creator = process_owner(tmp.path());
    let home = tmp.path().join("courses/org/home");
    assert_eq!(std::fs::metadata(&home).unwrap().uid(), creator.uid);
}

#[tokio::test]
async fn file_in_the_way_is_a_filesystem_error() {
    let tmp = tempfile::tempdir().unwrap();
    let (owner, _) = target_owner(&tmp);
    let provisioner = LocalDirectoryProvisioner::new(tmp.path());

    std::fs::write(tmp.path().join("blocked"), b"not a directory").unwrap();

    let err = provisioner
        .ensure_directory(Path::new("/blocked/child"), owner)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::CreateDirectory { .. }));
}

#[tokio::test]
async fn parent_segments_in_identity_are_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let (owner, _) = target_owner(&tmp);
    let provisioner = LocalDirectoryProvisioner::new(tmp.path());

    let identity = IdentityResolver::new("default", "illumidesk-courses")
        .resolve(&CourseIdentity::new("..", "cs101"));

    let err = provisioner
        .ensure_directory(&identity.storage_path, owner)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidPath { .. }));
    assert!(!tmp.path().join("home").exists());
}
