use super::*;

const CSV: &str = "\
system,title,sha1,md5,crc32,serial,developer,publisher,genre,players,release_date,rating,description
nes,Super Mario Bros.,EA343F4E445A9050D4B4FBAC2C77D0693B1D0922,,3337EC46,,Nintendo,Nintendo,Platform,1-2,1985-09-13,0.9,Save the princess
nes,\"Legend of Zelda, The\",,,,,Nintendo,Nintendo,Adventure,1,1986-02-21,,
ps1,Crash Bandicoot,,,,SCUS-94900,Naughty Dog,Sony,Platform,1,1996-09-09,0.8,
nes,Super Mario Bros. (duplicate),ea343f4e445a9050d4b4fbac2c77d0693b1d0922,,,,,,,,,,
";

fn db() -> LocalDatabase {
    LocalDatabase::from_reader(CSV.as_bytes()).unwrap()
}

#[test]
fn test_normalize_title() {
    assert_eq!(normalize_title("Legend of Zelda, The (USA) [!]"), "legendofzeldathe");
    assert_eq!(normalize_title("Super Mario Bros."), "supermariobros");
    assert_eq!(normalize_title("(Beta)"), "");
}

#[test]
fn test_lookup_by_sha1_case_insensitive_keeps_first() {
    let db = db();
    assert_eq!(db.len(), 4);
    let record = GameRecord::new("nes", "smb", "whatever")
        .with_sha1("ea343f4e445a9050d4b4fbac2c77d0693b1d0922");
    let entry = db.lookup(&record).unwrap();
    assert_eq!(entry.title, "Super Mario Bros.");
}

#[test]
fn test_lookup_by_crc_then_serial() {
    let db = db();
    let record = GameRecord::new("nes", "smb", "whatever").with_crc32("3337ec46");
    assert_eq!(db.lookup(&record).unwrap().title, "Super Mario Bros.");

    let record = GameRecord::new("ps1", "crash", "whatever").with_serial("scus-94900");
    assert_eq!(db.lookup(&record).unwrap().title, "Crash Bandicoot");
}

#[test]
fn test_lookup_by_title_is_per_system() {
    let db = db();
    let record = GameRecord::new("nes", "Legend of Zelda, The (USA)", "");
    assert_eq!(db.lookup(&record).unwrap().title, "Legend of Zelda, The");

    let wrong_system = GameRecord::new("snes", "Legend of Zelda, The (USA)", "");
    assert!(db.lookup(&wrong_system).is_none());
}

#[tokio::test]
async fn test_fetch_metadata_and_not_found() {
    let db = db();
    let record = GameRecord::new("ps1", "Crash Bandicoot (USA)", "Crash Bandicoot");
    let meta = db.fetch_metadata(&record).await.unwrap();
    assert_eq!(meta.provider, Some(ProviderId::BulkLocal));
    assert_eq!(meta.developer.as_deref(), Some("Naughty Dog"));
    assert_eq!(meta.rating, Some(0.8));
    assert!(meta.description.is_none());

    let missing = GameRecord::new("ps1", "Unknown Game", "Unknown Game");
    assert!(matches!(
        db.fetch_metadata(&missing).await,
        Err(ProviderError::NotFound)
    ));
}

#[tokio::test]
async fn test_capabilities() {
    let db = db();
    assert!(db.supports(TaskKind::MetadataScrape));
    assert!(!db.supports(TaskKind::ImageDownload));
    assert!(db.verify("nes").await.is_ok());

    let empty = LocalDatabase::from_entries(Vec::new());
    assert!(empty.verify("nes").await.unwrap_err().is_fatal());
}
