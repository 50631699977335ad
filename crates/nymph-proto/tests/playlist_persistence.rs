use nymph_proto::playlist::{PlaylistEntry, PlaylistStore};
use std::path::{Path, PathBuf};

fn media_files(dir: &Path, names: &[&str]) -> Vec<PathBuf> {
    names
        .iter()
        .map(|name| {
            let path = dir.join(name);
            std::fs::write(&path, b"media").expect("write media file");
            path
        })
        .collect()
}

fn persisted_lines(store: &PlaylistStore) -> Vec<String> {
    std::fs::read_to_string(store.file())
        .expect("read playlist file")
        .lines()
        .map(str::to_string)
        .collect()
}

fn in_memory_lines(store: &PlaylistStore) -> Vec<String> {
    store
        .entries()
        .iter()
        .map(|e| e.path.display().to_string())
        .collect()
}

#[test]
fn persisted_file_tracks_in_memory_order_through_adds_and_removes() {
    let dir = tempfile::tempdir().unwrap();
    let files = media_files(dir.path(), &["a.mp3", "b.mp3", "c.flac", "d.ogg", "e.wav"]);
    let mut store = PlaylistStore::load(dir.path().join("filepaths.conf")).unwrap();

    // (add index | remove index) script; removals refer to the current order.
    enum Op {
        Add(usize),
        Remove(usize),
    }
    let script = [
        Op::Add(0),
        Op::Add(1),
        Op::Add(2),
        Op::Remove(1),
        Op::Add(3),
        Op::Add(1),
        Op::Remove(0),
        Op::Add(4),
        Op::Remove(3),
    ];

    for op in script {
        match op {
            Op::Add(i) => {
                store.add(&files[i]).unwrap();
            }
            Op::Remove(i) => {
                store.remove(i).unwrap();
            }
        }
        assert_eq!(persisted_lines(&store), in_memory_lines(&store));
    }

    let names: Vec<&str> = store.entries().iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["c.flac", "d.ogg", "b.mp3"]);
}

#[test]
fn removing_an_entry_keeps_relative_order() {
    let dir = tempfile::tempdir().unwrap();
    let files = media_files(dir.path(), &["1.mp3", "2.mp3", "3.mp3", "4.mp3"]);
    let mut store = PlaylistStore::load(dir.path().join("filepaths.conf")).unwrap();
    for f in &files {
        store.add(f).unwrap();
    }

    let removed = store.remove(1).unwrap();
    assert_eq!(removed, PlaylistEntry::new(files[1].clone()));

    let remaining: Vec<PathBuf> = store.entries().iter().map(|e| e.path.clone()).collect();
    assert_eq!(remaining, vec![files[0].clone(), files[2].clone(), files[3].clone()]);
}

#[test]
fn reload_restores_the_same_order() {
    let dir = tempfile::tempdir().unwrap();
    let files = media_files(dir.path(), &["x.mp3", "y.mp3", "z.mp3"]);
    let playlist_file = dir.path().join("filepaths.conf");
    {
        let mut store = PlaylistStore::load(playlist_file.clone()).unwrap();
        for f in &files {
            store.add(f).unwrap();
        }
        store.remove(0).unwrap();
    }

    let reloaded = PlaylistStore::load(playlist_file).unwrap();
    let paths: Vec<PathBuf> = reloaded.entries().iter().map(|e| e.path.clone()).collect();
    assert_eq!(paths, vec![files[1].clone(), files[2].clone()]);
}

#[test]
fn relative_paths_are_stored_absolute() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = PlaylistStore::load(dir.path().join("filepaths.conf")).unwrap();

    // Tests run from the package directory.
    let entry = store.add(Path::new("Cargo.toml")).unwrap().clone();
    assert!(entry.path.is_absolute());
    assert!(entry.path.ends_with("Cargo.toml"));
    assert_eq!(persisted_lines(&store), in_memory_lines(&store));
}

#[cfg(unix)]
#[test]
fn non_utf8_names_survive_a_reload() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let dir = tempfile::tempdir().unwrap();
    let media = dir.path().join(OsStr::from_bytes(b"caf\xE9.mp3"));
    std::fs::write(&media, b"media").unwrap();
    let playlist_file = dir.path().join("filepaths.conf");
    {
        let mut store = PlaylistStore::load(playlist_file.clone()).unwrap();
        store.add(&media).unwrap();
    }

    let reloaded = PlaylistStore::load(playlist_file).unwrap();
    assert_eq!(reloaded.len(), 1);
    assert_eq!(reloaded.entries()[0].path, media);
    assert!(reloaded.entries()[0].path.is_file());
}
