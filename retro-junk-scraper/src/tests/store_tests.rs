use super::*;

fn sample_record() -> GameRecord {
    GameRecord::new("nes", "Super Mario Bros. (World)", "Super Mario Bros.")
        .with_rom("Super Mario Bros. (World).nes", 40976)
}

#[test]
fn test_flat_file_roundtrip_and_list() {
    let tmp = tempfile::tempdir().unwrap();
    let store = FlatFileStore::new(tmp.path().join("meta"), tmp.path().join("media"));
    store.put(&sample_record()).unwrap();
    store
        .put(&GameRecord::new("nes", "Contra (USA)", "Contra"))
        .unwrap();

    let loaded = store.load("nes", "Super Mario Bros. (World)").unwrap();
    assert_eq!(loaded.file_size, Some(40976));
    assert_eq!(
        store.list("nes").unwrap(),
        vec!["Contra (USA)", "Super Mario Bros. (World)"]
    );
    assert!(store.list("snes").unwrap().is_empty());
}

#[test]
fn test_flat_file_missing_record() {
    let tmp = tempfile::tempdir().unwrap();
    let store = FlatFileStore::new(tmp.path().join("meta"), tmp.path().join("media"));
    assert!(matches!(
        store.load("nes", "nope"),
        Err(StoreError::Missing { .. })
    ));
}

#[test]
fn test_flat_file_save_asset_records_path() {
    let tmp = tempfile::tempdir().unwrap();
    let store = FlatFileStore::new(tmp.path().join("meta"), tmp.path().join("media"));
    let record = sample_record();
    store.put(&record).unwrap();

    assert!(!store.has_asset("nes", &record.id, MediaKind::Cover));
    let path = store
        .save_asset("nes", &record.id, MediaKind::Cover, "png", b"PNG")
        .unwrap();
    assert!(path.ends_with("nes/covers/Super Mario Bros. (World).png"));
    assert_eq!(std::fs::read(&path).unwrap(), b"PNG");
    assert!(store.has_asset("nes", &record.id, MediaKind::Cover));
}

#[test]
fn test_flat_file_save_metadata_preserves_media() {
    let tmp = tempfile::tempdir().unwrap();
    let store = FlatFileStore::new(tmp.path().join("meta"), tmp.path().join("media"));
    let record = sample_record();
    store.put(&record).unwrap();
    store
        .save_asset("nes", &record.id, MediaKind::Screenshot, "png", b"x")
        .unwrap();

    let metadata = GameMetadata {
        name: "Super Mario Bros.".to_string(),
        ..GameMetadata::default()
    };
    store.save_metadata("nes", &record.id, &metadata).unwrap();

    let loaded = store.load("nes", &record.id).unwrap();
    assert_eq!(loaded.metadata, Some(metadata));
    assert!(loaded.media.contains_key(&MediaKind::Screenshot));
}

#[test]
fn test_for_library_layout() {
    let store = FlatFileStore::for_library(Path::new("/games/roms"));
    let path = store.asset_path("snes", "Zelda", MediaKind::Video, "mp4");
    assert_eq!(path, PathBuf::from("/games/roms-media/snes/videos/Zelda.mp4"));

    let moved = FlatFileStore::for_library(Path::new("/games/roms")).with_media_dir("/mnt/media");
    let path = moved.asset_path("snes", "Zelda", MediaKind::Cover, "png");
    assert!(path.starts_with("/mnt/media/snes"));
}

#[test]
fn test_memory_store_assets() {
    let store = MemoryStore::with_records([sample_record()]);
    let id = "Super Mario Bros. (World)";
    let path = store
        .save_asset("nes", id, MediaKind::Marquee, "png", b"logo")
        .unwrap();
    assert_eq!(store.asset_bytes(&path), Some(b"logo".to_vec()));
    assert!(store.has_asset("nes", id, MediaKind::Marquee));
    assert!(!store.has_asset("nes", "missing", MediaKind::Marquee));
    assert!(store.save_metadata("nes", "missing", &GameMetadata::default()).is_err());
}
