mod common;

use common::*;
use palettizer_core::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn no_resize() -> ProcessOptions {
    ProcessOptions {
        optimal_resize: false,
        redo_all: false,
    }
}

fn packed_session(textures: &[(&str, u32, u32)]) -> (Session, MemRaster) {
    let mut raster = MemRaster::new();
    let mut refs = Vec::new();
    for &(name, w, h) in textures {
        raster.add_texture(name, w, h);
        refs.push(full(name));
    }
    let cfg = PaletteConfig::builder()
        .with_palette_size(256, 256)
        .margin(0)
        .build();
    let mut session = Session::new(cfg).expect("session");
    session.update_asset(asset("scene.egg", refs));
    session.process(&raster, no_resize()).expect("process");
    (session, raster)
}

#[test]
fn failed_resize_restores_everything() {
    let (mut session, _raster) =
        packed_session(&[("a", 100, 100), ("b", 100, 60), ("c", 60, 60)]);
    let (iid, _) = session.images().next().expect("one image");
    let before_img = session.image(iid).expect("image").clone();
    let before: Vec<_> = before_img
        .placements
        .iter()
        .map(|&pid| session.placement(pid).expect("placement").clone())
        .collect();
    session.clear_stale();

    assert!(!session.resize_image(iid, 64, 64));

    let after_img = session.image(iid).expect("image");
    assert_eq!((after_img.width, after_img.height), (256, 256));
    assert_eq!(after_img.placements, before_img.placements);
    assert_eq!(after_img.is_new, before_img.is_new);
    for (pid, old) in before_img.placements.iter().zip(&before) {
        let now = session.placement(*pid).expect("placement");
        assert_eq!(now.placed, old.placed);
        assert_eq!(now.image, old.image);
        assert_eq!(now.omit_reason, old.omit_reason);
    }
    assert!(session.assets().all(|(_, a)| !a.stale));
    assert_layout_valid(&session);
}

#[test]
fn successful_resize_keeps_layout_valid() {
    let (mut session, _raster) = packed_session(&[("a", 64, 64), ("b", 64, 64)]);
    let (iid, _) = session.images().next().expect("one image");
    assert!(session.resize_image(iid, 128, 64));
    let img = session.image(iid).expect("image");
    assert_eq!((img.width, img.height), (128, 64));
    assert!(img.is_new);
    assert_layout_valid(&session);
}

#[test]
fn optimal_resize_shrinks_until_nothing_fits() {
    let (mut session, _raster) = packed_session(&[("a", 64, 64), ("b", 64, 64)]);
    let (iid, _) = session.images().next().expect("one image");
    assert!(session.optimal_resize(iid));
    let img = session.image(iid).expect("image");
    assert_eq!(img.area(), 2 * 64 * 64);
    assert_layout_valid(&session);
    assert!(!session.optimal_resize(iid));
}

#[test]
fn optimal_resize_leaves_single_placement_alone() {
    let (mut session, _raster) = packed_session(&[("only", 32, 32)]);
    let (iid, _) = session.images().next().expect("one image");
    assert!(!session.optimal_resize(iid));
    let img = session.image(iid).expect("image");
    assert_eq!((img.width, img.height), (256, 256));
}

#[test]
fn random_textures_never_overlap() {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    for round in 0..8 {
        let mut raster = MemRaster::new();
        let mut refs = Vec::new();
        let count = rng.gen_range(5..40);
        for i in 0..count {
            let name = format!("r{round}_{i}");
            raster.add_texture(&name, rng.gen_range(1..200), rng.gen_range(1..200));
            let lo = [rng.gen_range(0.0..0.4), rng.gen_range(0.0..0.4)];
            let hi = [rng.gen_range(0.6..1.0), rng.gen_range(0.6..1.0)];
            refs.push(with_uv(&name, UvBounds::new(lo, hi)));
        }
        let cfg = PaletteConfig::builder()
            .with_palette_size(256, 256)
            .margin(rng.gen_range(0..4))
            .build();
        let mut session = Session::new(cfg).expect("session");
        session.update_asset(asset("random.egg", refs));
        session
            .process(&raster, ProcessOptions::default())
            .expect("process");
        assert_layout_valid(&session);

        let stats = session.stats();
        assert_eq!(stats.num_placements, count);
        for (_, p) in session.placements() {
            assert!(
                matches!(p.omit_reason, OmitReason::None | OmitReason::Size),
                "unexpected {}",
                p.omit_reason
            );
        }
    }
}
