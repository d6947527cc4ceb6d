mod common;

use common::*;
use palettizer_core::prelude::*;
use palettizer_core::store;
use std::fs;

fn packed() -> (Session, MemRaster) {
    let mut raster = MemRaster::new();
    raster.add_texture("wood", 64, 64);
    raster.add_texture("stone", 32, 48);
    raster.add_texture("glass", 16, 16);
    let cfg = PaletteConfig::builder()
        .group("shared", "shared", &[])
        .group("chars", "chars", &["shared"])
        .asset("chars/*", &["chars"])
        .asset("*", &["shared"])
        .build();
    let mut session = Session::new(cfg).expect("session");
    session.update_asset(asset("chars/hero.egg", vec![full("wood"), full("glass")]));
    session.update_asset(asset("level.egg", vec![full("wood"), full("stone")]));
    session
        .process(&raster, ProcessOptions::default())
        .expect("process");
    session.clear_stale();
    (session, raster)
}

#[test]
fn save_then_load_restores_the_graph() {
    let (session, raster) = packed();
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("state").join("palettizer.json");
    store::save(&session, &path).expect("save");
    assert!(path.exists());
    assert!(!dir.path().join("state").join("palettizer.json.tmp").exists());

    let mut loaded = store::load(&path, session.config().clone()).expect("load");
    assert_eq!(loaded.stats(), session.stats());
    for name in ["wood", "stone", "glass"] {
        let before = placements_of(&session, name);
        let after = placements_of(&loaded, name);
        assert_eq!(
            before.keys().collect::<Vec<_>>(),
            after.keys().collect::<Vec<_>>()
        );
        for (group, p) in &before {
            assert_eq!(after[group].placed, p.placed, "{name} in {group}");
            assert_eq!(after[group].omit_reason, p.omit_reason);
        }
    }

    // derived indices are rebuilt: a second pass changes nothing
    let summary = loaded
        .process(&raster, ProcessOptions::default())
        .expect("process after load");
    assert_eq!(summary.resized_images, 0);
    assert!(loaded.assets().all(|(_, a)| !a.stale));
    assert_layout_valid(&loaded);

    let wood = loaded.texture_by_name("wood").expect("wood");
    let users: Vec<_> = loaded.texture(wood).expect("texture").referencing_assets().collect();
    assert_eq!(users.len(), 2);
    let shared = loaded.group_by_name("shared").expect("shared");
    assert!(loaded.group(shared).expect("group").placements().count() >= 1);
}

#[test]
fn newer_store_version_is_refused() {
    let (session, _) = packed();
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("palettizer.json");
    store::save(&session, &path).expect("save");

    let mut value: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("json");
    value["version"] = serde_json::json!(STORE_VERSION + 1);
    fs::write(&path, value.to_string()).expect("write");

    match store::load(&path, session.config().clone()) {
        Err(PalettizerError::StoreVersion { found, .. }) => assert_eq!(found, STORE_VERSION + 1),
        other => panic!("expected version error, got {:?}", other.map(|_| ())),
    }
    let (fresh, outcome) = store::load_or_new(&path, session.config().clone()).expect("fallback");
    assert!(matches!(outcome, LoadOutcome::Discarded(_)));
    assert_eq!(fresh.textures().count(), 0);
}

#[test]
fn dangling_reference_is_corrupt() {
    let (session, _) = packed();
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("palettizer.json");
    store::save(&session, &path).expect("save");

    let mut value: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("json");
    let placements = value["placements"]["slots"]
        .as_array_mut()
        .expect("placement slots");
    let live = placements
        .iter_mut()
        .find(|p| !p.is_null())
        .expect("a live placement");
    live["texture"] = serde_json::json!(9999);
    fs::write(&path, value.to_string()).expect("write");

    assert!(matches!(
        store::load(&path, session.config().clone()),
        Err(PalettizerError::CorruptStore(_))
    ));
}

#[test]
fn missing_store_starts_fresh() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (session, outcome) =
        store::load_or_new(&dir.path().join("none.json"), PaletteConfig::default()).expect("fresh");
    assert_eq!(outcome, LoadOutcome::Fresh);
    assert!(session.group_by_name("default").is_some());
}

#[test]
fn changed_margin_on_load_resets_images() {
    let (session, raster) = packed();
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("palettizer.json");
    store::save(&session, &path).expect("save");

    let mut cfg = session.config().clone();
    cfg.margin = 6;
    let mut loaded = store::load(&path, cfg).expect("load");
    assert_eq!(loaded.images().count(), 0);
    loaded
        .process(&raster, ProcessOptions::default())
        .expect("repack");
    let wood = &placements_of(&loaded, "wood")["shared"];
    assert_eq!(wood.position.margin, 6);
    assert_layout_valid(&loaded);
}

#[test]
fn removed_objects_leave_no_holes_after_reload() {
    let (mut session, raster) = packed();
    let hero = session.asset_by_name("chars/hero.egg").expect("hero");
    session.remove_asset(hero);
    session
        .process(&raster, ProcessOptions::default())
        .expect("process");
    assert!(placements_of(&session, "glass").is_empty());

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("palettizer.json");
    store::save(&session, &path).expect("save");
    let value: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("json");
    let has_holes = |v: &serde_json::Value, arena: &str| {
        v[arena]["slots"]
            .as_array()
            .is_some_and(|slots| slots.iter().any(|s| s.is_null()))
    };
    assert!(has_holes(&value, "placements") || has_holes(&value, "assets"));

    let mut loaded = store::load(&path, session.config().clone()).expect("load");
    store::save(&loaded, &path).expect("save again");
    let value: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("json");
    for arena in ["groups", "textures", "placements", "pages", "images", "assets"] {
        assert!(!has_holes(&value, arena), "{arena} still has holes");
    }

    assert_eq!(loaded.stats(), session.stats());
    for name in ["wood", "stone"] {
        let before = placements_of(&session, name);
        let after = placements_of(&loaded, name);
        assert_eq!(before.len(), after.len());
        for (group, p) in &before {
            assert_eq!(after[group].placed, p.placed, "{name} in {group}");
        }
    }
    let level = loaded.asset_by_name("level.egg").expect("level");
    assert!(loaded.asset(level).expect("asset").references.iter().all(|r| {
        r.placement.is_some_and(|pid| loaded.placement(pid).is_some_and(|p| p.texture == r.texture))
    }));
    loaded
        .process(&raster, ProcessOptions::default())
        .expect("process after load");
    assert_layout_valid(&loaded);
}
