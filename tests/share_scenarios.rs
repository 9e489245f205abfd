//! End-to-end scenarios against a real tempdir share: search, listings,
//! resolution, temp shares, refresh semantics, and cache restore.

mod helpers;

use helpers::{content_tth, HarnessBuilder};
use hubshare::{
    AdcQuery, FileCategory, LegacyQuery, Peer, RefreshKind, ShareError, REFRESH_ALL,
    REFRESH_BLOCKING, REFRESH_UPDATE,
};
use pretty_assertions::assert_eq;

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

#[test]
fn audio_search_returns_virtual_path() {
    let song = vec![0u8; 1_234_567];
    let h = HarnessBuilder::new().root("Music", "music").file("music/Song.mp3", &song).start();

    let hits = h
        .manager
        .search(&LegacyQuery::new("song", FileCategory::Audio, 10), &Peer::default());
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].virtual_path, "/Music/Song.mp3");
    assert_eq!(hits[0].size, 1_234_567);
    assert_eq!(hits[0].tth, Some(content_tth(&song)));
    assert!(!hits[0].is_directory);
    assert_eq!(h.manager.hits(), 1);
}

#[test]
fn search_requires_every_atom() {
    let h = HarnessBuilder::new()
        .root("Music", "music")
        .file("music/Artist - Title.mp3", b"a")
        .start();

    let peer = Peer::default();
    let q = |terms: &str| LegacyQuery::new(terms, FileCategory::Any, 10);
    assert_eq!(h.manager.search(&q("artist title"), &peer).len(), 1);
    assert_eq!(h.manager.search(&q("artist nothere"), &peer).len(), 0);
    // Bloom prefilter: a term that occurs nowhere short-circuits to empty.
    assert_eq!(h.manager.search(&q("zzzzzzzzzz"), &peer).len(), 0);
}

#[test]
fn hub_exclusion_is_applied_at_query_time() {
    let h = HarnessBuilder::new()
        .root_excluding("Secret", "secret", &["adc://secret"])
        .file("secret/payload.mp3", b"shh")
        .start();

    let q = LegacyQuery::new("payload", FileCategory::Any, 10);
    assert!(h.manager.search(&q, &Peer::new("cid", "adc://secret")).is_empty());
    assert_eq!(h.manager.search(&q, &Peer::new("cid", "adc://open")).len(), 1);

    // The catalog itself still indexes the file; only queries filter.
    assert!(h.manager.is_tth_shared(&content_tth(b"shh")));
}

#[test]
fn adc_search_by_tth_and_extension() {
    let h = HarnessBuilder::new()
        .root("Media", "media")
        .file("media/Show/e01.mkv", b"ep1")
        .file("media/Show/notes.txt", b"n")
        .start();

    let peer = Peer::default();
    let q = AdcQuery::from_params(&[format!("TR{}", content_tth(b"ep1"))]).unwrap();
    let hits = h.manager.search_adc(&q, &peer, 10);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].virtual_path, "/Media/Show/e01.mkv");

    let q = AdcQuery::from_params(&["ANshow", "EXmkv"]).unwrap();
    let hits = h.manager.search_adc(&q, &peer, 10);
    assert_eq!(hits.len(), 1);
    assert!(hits[0].virtual_path.ends_with("e01.mkv"));
}

// ---------------------------------------------------------------------------
// Listings
// ---------------------------------------------------------------------------

#[test]
fn partial_list_merges_aliased_roots() {
    let h = HarnessBuilder::new()
        .root("Media", "a")
        .root("Media", "b")
        .file("a/X.avi", b"x")
        .file("b/Y.mkv", b"y")
        .start();

    let xml = h.manager.generate_partial_list("/Media/", false, &Peer::default()).unwrap();
    let text = String::from_utf8(xml).unwrap();
    assert_eq!(text.matches("<Directory Name=\"Media\">").count(), 1);
    assert!(text.contains("X.avi"));
    assert!(text.contains("Y.mkv"));
}

#[test]
fn full_list_artifact_and_guard() {
    let h = HarnessBuilder::new().root("Music", "music").file("music/a.mp3", b"a").start();

    let first = h.manager.generate_xml_list(None, false).unwrap();
    let path = first.bz_path.clone().unwrap();
    assert!(path.exists());
    assert!(first.xml_tth.is_some());
    assert!(first.bz_len > 0);

    // Clean list inside the guard window: cached record returned.
    let second = h.manager.generate_xml_list(None, false).unwrap();
    assert_eq!(second.list_n, first.list_n);

    // A refresh force-dirties every list; the next request regenerates.
    h.write("music/b.mp3", b"b");
    h.refresh();
    let third = h.manager.generate_xml_list(None, false).unwrap();
    assert_eq!(third.list_n, first.list_n + 1);
    assert!(!path.exists(), "superseded artifact is removed");
}

#[test]
fn tth_list_covers_subtree() {
    let h = HarnessBuilder::new()
        .root("Media", "media")
        .file("media/Show/e01.mkv", b"ep1")
        .file("media/Show/Extras/cut.mkv", b"cut")
        .start();

    let flat = h.manager.generate_tth_list("/Media/Show/", false, &Peer::default()).unwrap();
    assert_eq!(String::from_utf8(flat).unwrap().lines().count(), 1);

    let deep = h.manager.generate_tth_list("/Media/Show/", true, &Peer::default()).unwrap();
    let text = String::from_utf8(deep).unwrap();
    assert_eq!(text.lines().count(), 2);
    assert!(text.contains(&content_tth(b"cut").to_base32()));
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

#[test]
fn tth_resolution_and_unshare() {
    let h = HarnessBuilder::new().root("Music", "music").file("music/Song.mp3", b"tune").start();

    let tth = content_tth(b"tune");
    let virtual_file = format!("TTH/{}", tth.to_base32());
    let real =
        h.manager.to_real(&virtual_file, true, &Peer::default(), "").unwrap();
    assert_eq!(real, h.path("music/Song.mp3"));
    assert_eq!(h.manager.get_real_path(&tth).unwrap(), h.path("music/Song.mp3"));
    assert_eq!(h.manager.to_virtual(&tth, &Peer::default()).unwrap(), "/Music/Song.mp3");

    h.manager.remove_directory(&h.path("music")).unwrap();
    h.refresh();
    assert!(matches!(
        h.manager.to_real(&virtual_file, true, &Peer::default(), ""),
        Err(ShareError::NotShared(_))
    ));
    assert!(!h.manager.is_tth_shared(&tth));
}

#[test]
fn temp_share_is_scoped_to_its_key() {
    let h = HarnessBuilder::new().root("Music", "music").start();
    h.write("outside/file.bin", b"data");

    let tth = content_tth(b"data");
    assert!(h.manager.add_temp_share(
        "peer-cid-42",
        tth,
        &h.path("outside/file.bin"),
        42,
        true
    ));

    let virtual_file = format!("TTH/{}", tth.to_base32());
    let (real, size) = h
        .manager
        .to_real_with_size(&virtual_file, false, &Peer::new("peer-cid-42", ""), "")
        .unwrap();
    assert_eq!(real, h.path("outside/file.bin"));
    assert_eq!(size, 42);

    assert!(matches!(
        h.manager.to_real(&virtual_file, false, &Peer::new("other-cid", ""), ""),
        Err(ShareError::NotShared(_))
    ));

    h.manager.remove_temp_share("peer-cid-42", &tth);
    assert!(!h.manager.has_temp_shares());
}

#[test]
fn virtual_resolution_errors() {
    let h = HarnessBuilder::new().root("Music", "music").file("music/a.mp3", b"a").start();

    assert!(matches!(
        h.manager.to_real("/Music/a.mp3", false, &Peer::default(), ""),
        Err(ShareError::NoAccess)
    ));
    assert!(matches!(
        h.manager.to_real("/Nope/a.mp3", true, &Peer::default(), ""),
        Err(ShareError::NotShared(_))
    ));
    assert!(matches!(
        h.manager.to_real("not-a-path", true, &Peer::default(), ""),
        Err(ShareError::InvalidPath(_))
    ));
}

// ---------------------------------------------------------------------------
// Refresh semantics
// ---------------------------------------------------------------------------

#[test]
fn refresh_returns_started_when_idle() {
    let h = HarnessBuilder::new().root("Music", "music").file("music/a.mp3", b"a").start();
    assert_eq!(h.manager.refresh(REFRESH_ALL | REFRESH_BLOCKING), RefreshKind::Started);
    assert_eq!(h.manager.refresh(REFRESH_ALL | REFRESH_BLOCKING), RefreshKind::Started);
    assert!(!h.manager.is_refreshing());
}

#[test]
fn refresh_path_unknown_root() {
    let h = HarnessBuilder::new().root("Music", "music").start();
    assert_eq!(
        h.manager.refresh_path(std::path::Path::new("/definitely/not/shared")),
        RefreshKind::PathNotFound
    );
}

#[test]
fn refresh_is_idempotent_on_unchanged_filesystem() {
    let h = HarnessBuilder::new()
        .root("Music", "music")
        .file("music/Album/one.mp3", b"one")
        .file("music/Album/two.flac", b"two")
        .start();

    let before = h.manager.generate_xml_list(None, true).unwrap();
    let size_before = h.manager.share_size(None);

    h.refresh();
    h.refresh();

    let after = h.manager.generate_xml_list(None, true).unwrap();
    assert_eq!(before.xml_tth, after.xml_tth, "identical listings byte for byte");
    assert_eq!(h.manager.share_size(None), size_before);
    assert!(h.manager.is_tth_shared(&content_tth(b"one")));
    assert!(h.manager.is_tth_shared(&content_tth(b"two")));
}

#[test]
fn update_refresh_picks_up_new_files() {
    let h = HarnessBuilder::new().root("Music", "music").file("music/a.mp3", b"a").start();
    assert_eq!(h.manager.shared_file_count(), 1);

    // Root mtimes are second-granular; step past the scan's timestamp so
    // the UPDATE pass sees the directory as changed.
    std::thread::sleep(std::time::Duration::from_millis(1100));
    h.write("music/b.mp3", b"b");
    assert_eq!(
        h.manager.refresh(REFRESH_ALL | REFRESH_UPDATE | REFRESH_BLOCKING),
        RefreshKind::Started
    );
    h.manager.wait_for_hashing();
    assert_eq!(h.manager.shared_file_count(), 2);
    assert!(h.manager.is_tth_shared(&content_tth(b"b")));
}

// ---------------------------------------------------------------------------
// Roots and administration
// ---------------------------------------------------------------------------

#[test]
fn add_rename_remove_directory() {
    let h = HarnessBuilder::new().root("Music", "music").file("music/a.mp3", b"a").start();
    h.write("extra/x.avi", b"x");

    h.manager.add_directory(&h.path("extra"), "Extra").unwrap();
    assert!(matches!(
        h.manager.add_directory(&h.path("extra"), "Extra2"),
        Err(ShareError::DuplicateVirtualName(_))
    ));
    assert!(h.manager.has_virtual("extra"));
    h.refresh();
    assert_eq!(h.manager.shared_file_count(), 2);

    h.manager.rename_directory(&h.path("extra"), "Videos").unwrap();
    assert!(h.manager.has_virtual("videos"));
    assert!(!h.manager.has_virtual("extra"));
    let hits = h
        .manager
        .search(&LegacyQuery::new("x", FileCategory::Video, 10), &Peer::default());
    assert_eq!(hits[0].virtual_path, "/Videos/x.avi");

    h.manager.remove_directory(&h.path("extra")).unwrap();
    assert!(!h.manager.has_virtual("videos"));
    assert!(matches!(
        h.manager.remove_directory(&h.path("extra")),
        Err(ShareError::PathNotFound(_))
    ));
}

#[test]
fn release_names_are_tracked() {
    let h = HarnessBuilder::new()
        .root("Incoming", "incoming")
        .release_pattern(r"(?i)^\w+(\.\w+)+-\w+$")
        .file("incoming/Some.Show.S01-GRP/e01.mkv", b"e")
        .file("incoming/loose/file.bin", b"f")
        .start();

    assert!(h.manager.is_release_shared("Some.Show.S01-GRP"));
    assert!(h.manager.is_release_shared("some.show.s01-grp"));
    assert!(!h.manager.is_release_shared("loose"));
}

#[test]
fn exclusions_prune_at_next_refresh() {
    let h = HarnessBuilder::new()
        .root("Media", "media")
        .file("media/keep/a.bin", b"aaaa")
        .file("media/skip/b.bin", b"bbbb")
        .start();
    assert_eq!(h.manager.shared_file_count(), 2);

    let reclaimed = h.manager.add_exclude_folder(&h.path("media/skip"));
    assert_eq!(reclaimed, 4);

    // Before the pruning refresh the subtree is still indexed, so lifting
    // the exclusion reports the same size coming back.
    assert_eq!(h.manager.remove_exclude_folder(&h.path("media/skip")), 4);
    assert_eq!(h.manager.add_exclude_folder(&h.path("media/skip")), 4);

    h.refresh();
    assert_eq!(h.manager.shared_file_count(), 1);
    assert!(!h.manager.is_tth_shared(&content_tth(b"bbbb")));

    // After pruning, the restored size is unknown until a refresh
    // re-indexes the subtree; a never-excluded path restores nothing.
    assert_eq!(h.manager.remove_exclude_folder(&h.path("media/skip")), 0);
    assert_eq!(h.manager.remove_exclude_folder(&h.path("media/keep")), 0);
    h.refresh();
    assert_eq!(h.manager.shared_file_count(), 2);
}

// ---------------------------------------------------------------------------
// Cache restore
// ---------------------------------------------------------------------------

#[test]
fn startup_restores_from_cache_without_rehash() {
    let h = HarnessBuilder::new()
        .root("Music", "music")
        .file("music/Album/song.mp3", b"tune")
        .start();
    h.manager.save_cache_blocking().unwrap();
    h.manager.shutdown();

    // Same config, fresh manager: catalog comes back from the cache XML.
    let reopened = h.reopen();
    assert_eq!(reopened.shared_file_count(), 1);
    assert!(reopened.is_tth_shared(&content_tth(b"tune")));
    let hits =
        reopened.search(&LegacyQuery::new("song", FileCategory::Audio, 10), &Peer::default());
    assert_eq!(hits.len(), 1);
    reopened.shutdown();
}

#[test]
fn corrupt_cache_forces_rescan() {
    let h = HarnessBuilder::new()
        .root("Music", "music")
        .file("music/a.mp3", b"a")
        .build_cold();
    std::fs::write(h.config.cache_file(), b"<Share><Root Virtual=").unwrap();

    h.manager.startup().unwrap();
    h.manager.wait_for_hashing();
    assert_eq!(h.manager.shared_file_count(), 1);
    assert!(h.manager.is_tth_shared(&content_tth(b"a")));
}
