mod common;

use common::*;
use palettizer_core::prelude::*;

fn run_once(session: &mut Session, raster: &MemRaster) -> ProcessSummary {
    session
        .process(raster, ProcessOptions::default())
        .expect("process")
}

fn stale_names(session: &Session) -> Vec<String> {
    session
        .assets()
        .filter(|(_, a)| a.stale)
        .map(|(_, a)| a.name.clone())
        .collect()
}

#[test]
fn growing_uv_range_replaces_and_marks_stale() {
    let mut raster = MemRaster::new();
    raster.add_texture("brick", 64, 64);
    raster.add_texture("moss", 64, 64);
    let half = UvBounds::new([0.0, 0.0], [0.5, 0.5]);
    let mut session = Session::new(PaletteConfig::builder().margin(0).build()).expect("session");
    session.update_asset(asset("wall.egg", vec![with_uv("brick", half)]));
    session.update_asset(asset("floor.egg", vec![full("moss")]));
    run_once(&mut session, &raster);
    assert_eq!(placements_of(&session, "brick")["default"].size(), (32, 32));
    session.clear_stale();

    session.update_asset(asset("wall.egg", vec![full("brick")]));
    run_once(&mut session, &raster);

    let brick = &placements_of(&session, "brick")["default"];
    assert_eq!(brick.omit_reason, OmitReason::None);
    assert_eq!(brick.placed_rect().map(|r| (r.w, r.h)), Some((64, 64)));
    assert!(stale_names(&session).contains(&"wall.egg".to_string()));
    assert_layout_valid(&session);
}

#[test]
fn shrinking_uv_range_inside_placed_area_keeps_position() {
    let mut raster = MemRaster::new();
    raster.add_texture("brick", 64, 64);
    let mut session = Session::new(PaletteConfig::builder().margin(0).build()).expect("session");
    session.update_asset(asset("wall.egg", vec![full("brick")]));
    run_once(&mut session, &raster);
    let before = placements_of(&session, "brick")["default"].placed;
    session.clear_stale();

    // fuzz keeps 0.995 rounded to a full unit
    let almost = UvBounds::new([0.0, 0.0], [1.005, 0.995]);
    session.update_asset(asset("wall.egg", vec![with_uv("brick", almost)]));
    run_once(&mut session, &raster);
    assert_eq!(placements_of(&session, "brick")["default"].placed, before);
}

#[test]
fn unused_placement_returns_to_work() {
    let mut raster = MemRaster::new();
    raster.add_texture("decal", 32, 32);
    let mut session = Session::new(PaletteConfig::default()).expect("session");
    let mut no_uv = full("decal");
    no_uv.uv = None;
    session.update_asset(asset("prop.egg", vec![no_uv]));
    run_once(&mut session, &raster);
    assert_eq!(
        placements_of(&session, "decal")["default"].omit_reason,
        OmitReason::Unused
    );

    session.update_asset(asset("prop.egg", vec![full("decal")]));
    run_once(&mut session, &raster);
    let p = &placements_of(&session, "decal")["default"];
    assert_eq!(p.omit_reason, OmitReason::None);
    assert!(p.is_placed());
}

#[test]
fn missing_source_is_unknown_until_it_appears() {
    let mut raster = MemRaster::new();
    let mut session = Session::new(PaletteConfig::default()).expect("session");
    session.update_asset(asset("prop.egg", vec![full("late")]));
    let summary = run_once(&mut session, &raster);
    assert_eq!(summary.placed, 0);
    assert_eq!(
        placements_of(&session, "late")["default"].omit_reason,
        OmitReason::Unknown
    );

    raster.add_texture("late", 40, 40);
    let summary = run_once(&mut session, &raster);
    assert_eq!(summary.resolved_unknown, 1);
    assert_eq!(summary.placed, 1);
}

#[test]
fn changed_source_size_resizes_placement() {
    let mut raster = MemRaster::new();
    raster.add_texture("skin", 32, 32);
    let mut session = Session::new(PaletteConfig::builder().margin(0).build()).expect("session");
    session.update_asset(asset("actor.egg", vec![full("skin")]));
    run_once(&mut session, &raster);
    session.clear_stale();

    raster.add_texture("skin", 64, 48);
    run_once(&mut session, &raster);
    let p = &placements_of(&session, "skin")["default"];
    assert_eq!(p.placed_rect().map(|r| (r.w, r.h)), Some((64, 48)));
    assert_eq!(stale_names(&session), vec!["actor.egg".to_string()]);
}

#[test]
fn removed_asset_releases_its_textures() {
    let mut raster = MemRaster::new();
    raster.add_texture("a", 32, 32);
    raster.add_texture("b", 32, 32);
    let mut session = Session::new(PaletteConfig::default()).expect("session");
    session.update_asset(asset("one.egg", vec![full("a")]));
    let two = session.update_asset(asset("two.egg", vec![full("b")]));
    run_once(&mut session, &raster);
    assert_eq!(placements_of(&session, "b").len(), 1);

    session.remove_asset(two);
    run_once(&mut session, &raster);
    assert!(placements_of(&session, "b").is_empty());
    assert_eq!(placements_of(&session, "a").len(), 1);
    assert!(session.asset_by_name("two.egg").is_none());
    assert_layout_valid(&session);
}

#[test]
fn failed_rescan_drops_the_asset() {
    let mut raster = MemRaster::new();
    raster.add_texture("a", 32, 32);
    raster.add_texture("b", 32, 32);
    let mut scanner = MemScanner::default();
    scanner.put(asset("keep.egg", vec![full("a")]));

    let mut session = Session::new(PaletteConfig::default()).expect("session");
    session.update_asset(asset("keep.egg", vec![full("a")]));
    session.update_asset(asset("gone.egg", vec![full("b")]));
    run_once(&mut session, &raster);
    session.clear_stale();

    // A new palette size repacks everything, so both assets need rewriting.
    let bigger = PaletteConfig::builder().with_palette_size(1024, 1024).build();
    session.apply_config(bigger).expect("new config");
    let report = session
        .run(&mut scanner, &mut raster, None, ProcessOptions::default(), |_| {})
        .expect("run");

    assert_eq!(report.failed_assets.len(), 1);
    assert_eq!(report.failed_assets[0].0, "gone.egg");
    assert!(session.asset_by_name("gone.egg").is_none());
    assert!(placements_of(&session, "b").is_empty());
    assert!(report.generated.is_none());
    assert_eq!(report.stale_assets, vec!["keep.egg".to_string()]);
}

#[test]
fn packing_parameter_change_resets_layout() {
    let mut raster = MemRaster::new();
    raster.add_texture("a", 32, 32);
    raster.add_texture("b", 32, 32);
    let mut session = Session::new(PaletteConfig::default()).expect("session");
    session.update_asset(asset("one.egg", vec![full("a"), full("b")]));
    run_once(&mut session, &raster);
    session.clear_stale();

    let unchanged = session.config().clone();
    assert!(!session.apply_config(unchanged).expect("same config"));

    let bigger = PaletteConfig::builder().with_palette_size(1024, 1024).build();
    assert!(session.apply_config(bigger).expect("new config"));
    assert_eq!(session.images().count(), 0);
    assert!(session
        .placements()
        .all(|(_, p)| p.omit_reason == OmitReason::Working));
    assert_eq!(stale_names(&session), vec!["one.egg".to_string()]);

    let summary = run_once(&mut session, &raster);
    assert_eq!(summary.placed, 2);
    assert_eq!(session.packing_params().palette_width, 1024);
}

#[test]
fn omit_reasons_follow_directives() {
    let mut raster = MemRaster::new();
    for name in ["tiled", "skip", "fine", "huge"] {
        raster.add_texture(name, 64, 64);
    }
    raster.add_texture("huge", 600, 16);
    let cfg = PaletteConfig::builder()
        .texture(TextureDirective {
            pattern: "skip".into(),
            omit: true,
            ..Default::default()
        })
        .build();
    let mut session = Session::new(cfg).expect("session");
    session.update_asset(asset(
        "mix.egg",
        vec![
            with_uv("tiled", UvBounds::new([0.0, 0.0], [2.0, 2.0])),
            full("skip"),
            full("fine"),
            full("huge"),
        ],
    ));
    run_once(&mut session, &raster);

    let reason = |t: &str| placements_of(&session, t)["default"].omit_reason;
    assert_eq!(reason("tiled"), OmitReason::Coverage);
    assert_eq!(reason("skip"), OmitReason::Omitted);
    assert_eq!(reason("huge"), OmitReason::Size);
    assert_eq!(reason("fine"), OmitReason::None);
}

#[test]
fn omit_everything_and_solitary() {
    let mut raster = MemRaster::new();
    raster.add_texture("lonely", 64, 64);

    let cfg = PaletteConfig::builder().omit_everything(true).build();
    let mut session = Session::new(cfg).expect("session");
    session.update_asset(asset("a.egg", vec![full("lonely")]));
    run_once(&mut session, &raster);
    assert_eq!(
        placements_of(&session, "lonely")["default"].omit_reason,
        OmitReason::DefaultOmit
    );

    let cfg = PaletteConfig::builder().omit_solitary(true).build();
    let mut session = Session::new(cfg).expect("session");
    session.update_asset(asset("a.egg", vec![full("lonely")]));
    run_once(&mut session, &raster);
    let p = &placements_of(&session, "lonely")["default"];
    assert_eq!(p.omit_reason, OmitReason::Solitary);
    let (iid, _) = session.images().next().expect("image");
    assert!(session.image_is_empty(iid));
}

#[test]
fn repeating_reference_sets_wrap() {
    let mut raster = MemRaster::new();
    raster.add_texture("rope", 16, 64);
    let mut session = Session::new(PaletteConfig::default()).expect("session");
    let mut r = full("rope");
    r.wrap_v = WrapMode::Repeat;
    session.update_asset(asset("ship.egg", vec![r]));
    run_once(&mut session, &raster);
    let placed = placements_of(&session, "rope")["default"].placed.expect("placed");
    assert_eq!(placed.wrap_u, WrapMode::Clamp);
    assert_eq!(placed.wrap_v, WrapMode::Repeat);
}

#[test]
fn solitary_texture_joining_a_palette_marks_its_asset_stale() {
    let mut raster = MemRaster::new();
    raster.add_texture("x", 64, 64);
    raster.add_texture("y", 64, 64);
    let cfg = PaletteConfig::builder().omit_solitary(true).build();
    let mut session = Session::new(cfg).expect("session");
    session.update_asset(asset("a.egg", vec![full("x")]));
    run_once(&mut session, &raster);
    assert_eq!(placements_of(&session, "x")["default"].omit_reason, OmitReason::Solitary);
    session.clear_stale();

    let bigger = PaletteConfig::builder()
        .omit_solitary(true)
        .with_palette_size(1024, 1024)
        .build();
    assert!(session.apply_config(bigger).expect("new config"));
    session.update_asset(asset("b.egg", vec![full("y")]));
    run_once(&mut session, &raster);

    assert_eq!(placements_of(&session, "x")["default"].omit_reason, OmitReason::None);
    assert_eq!(placements_of(&session, "y")["default"].omit_reason, OmitReason::None);
    let a = session.asset_by_name("a.egg").expect("a.egg");
    assert!(session.asset(a).expect("live asset").stale);
}

#[test]
fn unparsable_known_asset_is_dropped() {
    let mut raster = MemRaster::new();
    raster.add_texture("a", 32, 32);
    raster.add_texture("b", 32, 32);
    let mut scanner = MemScanner::default();
    scanner.put(asset("keep.egg", vec![full("a")]));
    scanner.put(asset("broken.egg", vec![full("b")]));

    let mut session = Session::new(PaletteConfig::default()).expect("session");
    for name in ["keep.egg", "broken.egg"] {
        session
            .rescan_asset(&mut scanner, name, std::path::Path::new(name))
            .expect("first scan");
    }
    run_once(&mut session, &raster);
    assert_eq!(placements_of(&session, "b").len(), 1);

    scanner.assets.remove("broken.egg");
    let err = session
        .rescan_asset(&mut scanner, "broken.egg", std::path::Path::new("broken.egg"))
        .expect_err("scan fails");
    assert_eq!(scan_failure_reason(err), "gone");
    assert!(session.asset_by_name("broken.egg").is_none());

    run_once(&mut session, &raster);
    assert!(placements_of(&session, "b").is_empty());
    assert!(session.asset_by_name("keep.egg").is_some());

    // A name the session never saw is just reported.
    assert!(session
        .rescan_asset(&mut scanner, "new.egg", std::path::Path::new("new.egg"))
        .is_err());
    assert_eq!(session.assets().count(), 1);
}

#[test]
fn freshly_scanned_assets_are_not_rescanned() {
    let mut raster = MemRaster::new();
    raster.add_texture("a", 32, 32);
    let mut scanner = MemScanner::default();
    scanner.put(asset("one.egg", vec![full("a")]));

    let mut session = Session::new(PaletteConfig::default()).expect("session");
    session
        .rescan_asset(&mut scanner, "one.egg", std::path::Path::new("one.egg"))
        .expect("scan");
    let report = session
        .run(&mut scanner, &mut raster, None, ProcessOptions::default(), |_| {})
        .expect("run");
    assert_eq!(scanner.scans, vec!["one.egg".to_string()]);
    assert_eq!(report.stale_assets, vec!["one.egg".to_string()]);
    session.clear_stale();

    let bigger = PaletteConfig::builder().with_palette_size(1024, 1024).build();
    session.apply_config(bigger).expect("new config");
    session
        .run(&mut scanner, &mut raster, None, ProcessOptions::default(), |_| {})
        .expect("run");
    assert_eq!(scanner.scans.len(), 2);
}
