use std::fs;
use std::path::PathBuf;

use buildstamp::ConfigurationError;
use buildstamp::depfile::write_depfile;

#[test]
fn single_line_edge_list() {
    let dir = tempfile::tempdir().unwrap();
    let depfile = dir.path().join("app.d");

    write_depfile(
        &depfile,
        &PathBuf::from("out/app.zip"),
        &[PathBuf::from("srcs/a.java"), PathBuf::from("srcs/b.java")],
        None,
    )
    .unwrap();

    assert_eq!(
        fs::read_to_string(&depfile).unwrap(),
        "out/app.zip: srcs/a.java srcs/b.java\n"
    );
}

#[test]
fn no_dependencies_still_declares_the_output() {
    let dir = tempfile::tempdir().unwrap();
    let depfile = dir.path().join("app.d");

    write_depfile(&depfile, &PathBuf::from("out/app.zip"), &[], None).unwrap();

    assert_eq!(fs::read_to_string(&depfile).unwrap(), "out/app.zip:\n");
}

#[test]
fn spaces_in_paths_are_escaped() {
    let dir = tempfile::tempdir().unwrap();
    let depfile = dir.path().join("app.d");

    write_depfile(
        &depfile,
        &PathBuf::from("out dir/app.zip"),
        &[PathBuf::from("my sources/a.java")],
        None,
    )
    .unwrap();

    assert_eq!(
        fs::read_to_string(&depfile).unwrap(),
        "out\\ dir/app.zip: my\\ sources/a.java\n"
    );
}

#[test]
fn base_directory_is_stripped() {
    let dir = tempfile::tempdir().unwrap();
    let depfile = dir.path().join("app.d");

    write_depfile(
        &depfile,
        &PathBuf::from("/work/out/app.zip"),
        &[
            PathBuf::from("/work/srcs/a.java"),
            PathBuf::from("/elsewhere/b.java"),
        ],
        Some(PathBuf::from("/work").as_path()),
    )
    .unwrap();

    assert_eq!(
        fs::read_to_string(&depfile).unwrap(),
        "out/app.zip: srcs/a.java /elsewhere/b.java\n"
    );
}

#[test]
fn depfile_must_not_be_its_own_output() {
    let dir = tempfile::tempdir().unwrap();
    let depfile = dir.path().join("app.d");

    let err = write_depfile(&depfile, &depfile, &[PathBuf::from("a")], None).unwrap_err();
    assert!(err.downcast_ref::<ConfigurationError>().is_some());
    assert!(!depfile.exists());
}

#[test]
fn parent_directories_are_created() {
    let dir = tempfile::tempdir().unwrap();
    let depfile = dir.path().join("deep/nested/app.d");

    write_depfile(&depfile, &PathBuf::from("out/app.zip"), &[], None).unwrap();
    assert!(depfile.exists());
}
