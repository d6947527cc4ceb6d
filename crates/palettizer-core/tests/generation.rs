mod common;

use common::*;
use image::Rgba;
use palettizer_core::prelude::*;
use std::path::{Path, PathBuf};

const WOOD: [u8; 4] = [200, 100, 50, 255];

fn out_dir() -> PathBuf {
    PathBuf::from("out")
}

fn setup(cfg: PaletteConfig) -> (Session, MemRaster) {
    let mut raster = MemRaster::new();
    raster.add_texture("wood", 64, 64);
    raster.add("textures/leaf.png", 32, 32, [0, 180, 0, 255]);
    let mut session = Session::new(cfg).expect("session");
    session.update_asset(asset("tree.egg", vec![full("wood"), full("leaf")]));
    session
        .process(&raster, ProcessOptions::default())
        .expect("process");
    (session, raster)
}

fn image_path(session: &Session) -> PathBuf {
    let (_, img) = session.images().next().expect("image");
    out_dir().join(img.filename.as_ref().expect("named"))
}

fn center(session: &Session, texture: &str) -> (u32, u32) {
    let r = placements_of(session, texture)["default"]
        .placed_rect()
        .expect("placed");
    (r.x + r.w / 2, r.y + r.h / 2)
}

#[test]
fn writes_palette_with_texture_pixels() {
    let (mut session, mut raster) = setup(PaletteConfig::default());
    let summary = session
        .generate_images(&mut raster, &out_dir(), false, |_| {})
        .expect("generate");
    assert_eq!(summary.written, 1);

    let path = image_path(&session);
    assert_eq!(
        path,
        Path::new("out/default/default_palette_rgba_1.png").to_path_buf()
    );
    let canvas = raster.get(&path).expect("written");
    let (img_w, img_h) = {
        let (_, img) = session.images().next().expect("image");
        (img.width, img.height)
    };
    assert_eq!(canvas.dimensions(), (img_w, img_h));

    let (x, y) = center(&session, "wood");
    assert_eq!(*canvas.get_pixel(x, y), Rgba(WOOD));
    let (x, y) = center(&session, "leaf");
    assert_eq!(*canvas.get_pixel(x, y), Rgba([0, 180, 0, 255]));
    assert!(session.placements().all(|(_, p)| p.is_filled));
}

#[test]
fn up_to_date_images_are_skipped() {
    let (mut session, mut raster) = setup(PaletteConfig::default());
    session
        .generate_images(&mut raster, &out_dir(), false, |_| {})
        .expect("first");
    let writes = raster.writes.len();

    let summary = session
        .generate_images(&mut raster, &out_dir(), false, |_| {})
        .expect("second");
    assert_eq!(summary.up_to_date, 1);
    assert_eq!(raster.writes.len(), writes);

    let summary = session
        .generate_images(&mut raster, &out_dir(), true, |_| {})
        .expect("redo");
    assert_eq!(summary.written, 1);
}

#[test]
fn newer_source_is_repainted() {
    let (mut session, mut raster) = setup(PaletteConfig::default());
    session
        .generate_images(&mut raster, &out_dir(), false, |_| {})
        .expect("first");

    raster.add("textures/leaf.png", 32, 32, [0, 0, 255, 255]);
    session
        .process(&raster, ProcessOptions::default())
        .expect("process");
    let summary = session
        .generate_images(&mut raster, &out_dir(), false, |_| {})
        .expect("second");
    assert_eq!(summary.written, 1);

    let canvas = raster.get(&image_path(&session)).expect("written");
    let (x, y) = center(&session, "leaf");
    assert_eq!(*canvas.get_pixel(x, y), Rgba([0, 0, 255, 255]));
    let (x, y) = center(&session, "wood");
    assert_eq!(*canvas.get_pixel(x, y), Rgba(WOOD));
}

#[test]
fn unreadable_source_is_flagged_red() {
    let (mut session, mut raster) = setup(PaletteConfig::default());
    raster.files.remove(Path::new("textures/leaf.png"));
    session
        .generate_images(&mut raster, &out_dir(), false, |_| {})
        .expect("generate");
    let canvas = raster.get(&image_path(&session)).expect("written");
    let (x, y) = center(&session, "leaf");
    assert_eq!(*canvas.get_pixel(x, y), Rgba([255, 0, 0, 255]));
}

#[test]
fn solitary_image_is_not_written() {
    let mut raster = MemRaster::new();
    raster.add_texture("wood", 64, 64);
    let cfg = PaletteConfig::builder().omit_solitary(true).build();
    let mut session = Session::new(cfg).expect("session");
    session.update_asset(asset("crate.egg", vec![full("wood")]));
    session
        .process(&raster, ProcessOptions::default())
        .expect("process");

    let summary = session
        .generate_images(&mut raster, &out_dir(), false, |_| {})
        .expect("generate");
    assert_eq!(summary.removed, 1);
    assert!(raster.writes.is_empty());

    let remaps = session.asset_remaps(false);
    assert_eq!(remaps[0].entries[0].image, None);
    assert_eq!(remaps[0].entries[0].uv_transform, UvTransform::identity());
}

#[test]
fn swaps_get_their_own_files() {
    let cfg = PaletteConfig::builder()
        .texture(TextureDirective {
            pattern: "wood".into(),
            swaps: vec![PathBuf::from("textures/wood_burnt.png")],
            ..Default::default()
        })
        .build();
    let mut raster = MemRaster::new();
    raster.add("textures/wood_burnt.png", 64, 64, [20, 20, 20, 255]);
    raster.add_texture("wood", 64, 64);
    raster.add("textures/leaf.png", 32, 32, [0, 180, 0, 255]);
    let mut session = Session::new(cfg).expect("session");
    session.update_asset(asset("tree.egg", vec![full("wood"), full("leaf")]));
    session
        .process(&raster, ProcessOptions::default())
        .expect("process");
    session
        .generate_images(&mut raster, &out_dir(), false, |_| {})
        .expect("generate");

    let main = image_path(&session);
    let swap = main.with_file_name("default_palette_rgba_1_swp_1.png");
    let canvas = raster.get(&swap).expect("swap written");
    let (x, y) = center(&session, "wood");
    assert_eq!(*canvas.get_pixel(x, y), Rgba([20, 20, 20, 255]));
    let (x, y) = center(&session, "leaf");
    assert_eq!(*canvas.get_pixel(x, y), Rgba([0, 180, 0, 255]));
    assert_eq!(*raster.get(&main).expect("main").get_pixel(x, y), Rgba([0, 180, 0, 255]));
}

#[test]
fn run_reports_generation_and_remaps() {
    let mut raster = MemRaster::new();
    raster.add_texture("wood", 64, 64);
    raster.add_texture("bark", 64, 64);
    let refs = vec![full("wood"), full("bark")];
    let mut scanner = MemScanner::default();
    scanner.put(asset("tree.egg", refs.clone()));
    let mut session = Session::new(PaletteConfig::default()).expect("session");
    session.update_asset(asset("tree.egg", refs));

    let mut names = Vec::new();
    let report = session
        .run(
            &mut scanner,
            &mut raster,
            Some(&out_dir()),
            ProcessOptions::default(),
            |n| names.push(n.to_string()),
        )
        .expect("run");
    assert_eq!(report.generated.map(|g| g.written), Some(1));
    assert_eq!(names, vec!["default_palette_rgba_1".to_string()]);
    assert_eq!(report.stale_assets, vec!["tree.egg".to_string()]);

    let remaps = session.asset_remaps(true);
    assert_eq!(remaps.len(), 1);
    for entry in &remaps[0].entries {
        assert!(entry.image.is_some());
        let t = entry.uv_transform;
        let lo = t.apply([0.0, 0.0]);
        let hi = t.apply([1.0, 1.0]);
        assert!(lo[0] >= 0.0 && lo[1] >= 0.0 && hi[0] <= 1.0 && hi[1] <= 1.0);
        assert!(hi[0] > lo[0] && hi[1] > lo[1]);
    }

    let layout = to_json_layout(&session);
    assert_eq!(layout["images"].as_array().map(Vec::len), Some(1));
    assert_eq!(layout["images"][0]["frames"].as_array().map(Vec::len), Some(2));
    assert_eq!(layout["meta"]["margin"], 2);

    session.clear_stale();
    assert!(session.asset_remaps(true).is_empty());
}
