// Resource System Tests
// Engine-level tests for loading, sharing, budgeting, teardown and the
// usage table, driven through the in-memory backend.

use std::cell::{Cell, RefCell};
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use crate::config::{EngineConfig, LoadMode};
use crate::resource::backend::{BackendStats, MemoryBackend, ObjectKind, SceneMode};
use crate::resource::engine::Engine;
use crate::resource::loadable::{Handle, KindTag, Status};
use crate::resource::manifest::{AssetEntry, Manifest, PackageDescriptor};

const BATTLE_MANIFEST: &str = r#"
{
  "name": "main",
  "version": 4,
  "timestamp": 1718000000000,
  "packages": [
    { "name": "scene_battle", "hash": "a1" },
    { "name": "scene_harbor", "hash": "a2" },
    { "name": "scene_broken", "hash": "a3" },
    { "name": "map_common", "hash": "b1" },
    { "name": "fx_common", "hash": "c1" },
    { "name": "props", "hash": "d1" },
    { "name": "credits.txt", "hash": "e1" },
    { "name": "legal.txt", "hash": "e2" }
  ],
  "assets": [
    { "address": "scene/Battle", "package": "scene_battle",
      "dependencies": ["maps/ground.mat", "fx/spark.png", "audio/battle.ogg"] },
    { "address": "scene/Harbor", "package": "scene_harbor",
      "dependencies": ["maps/ground.mat"] },
    { "address": "scene/Broken", "package": "scene_broken",
      "dependencies": ["missing/thing.mat"] },
    { "address": "maps/ground.mat", "package": "map_common" },
    { "address": "fx/spark.png", "package": "fx_common" },
    { "address": "audio/battle.ogg", "package": "fx_common" },
    { "address": "props/crate.prefab", "package": "props",
      "dependencies": ["maps/ground.mat"] },
    { "address": "text/credits.txt", "package": "credits.txt" },
    { "address": "text/legal.txt", "package": "legal.txt" }
  ]
}
"#;

fn relaxed_config() -> EngineConfig {
    EngineConfig {
        build_dir: PathBuf::from("build"),
        time_slice: Duration::from_secs(60),
        ..EngineConfig::default()
    }
}

fn battle_backend() -> MemoryBackend {
    MemoryBackend::new()
        .with_package("scene_battle_a1.pack")
        .with_package("scene_harbor_a2.pack")
        .with_package("map_common_b1.pack")
        .with_package("fx_common_c1.pack")
        .with_package("props_d1.pack")
        .with_file("build/credits_e1.txt")
}

fn engine_with(backend: MemoryBackend, config: EngineConfig) -> (Engine, Rc<RefCell<BackendStats>>) {
    let stats = backend.stats();
    let manifest = Manifest::from_str(BATTLE_MANIFEST).expect("manifest parses");
    (Engine::new(config, manifest, Box::new(backend)), stats)
}

fn battle_engine() -> (Engine, Rc<RefCell<BackendStats>>) {
    engine_with(battle_backend(), relaxed_config())
}

/// Update until `handle` is terminal; returns the number of frames taken
fn run_until_terminal(engine: &mut Engine, handle: Handle, max_frames: usize) -> usize {
    for frame in 1..=max_frames {
        engine.update();
        if engine.is_terminal(handle) {
            return frame;
        }
    }
    panic!("{:?} not finished after {} frames", engine.address(handle), max_frames);
}

#[cfg(test)]
mod scenario_tests {
    use super::*;

    #[test]
    fn test_battle_scene_loads_in_two_frames() {
        let (mut engine, stats) = battle_engine();

        let scene = engine.acquire_scene("scene/Battle", SceneMode::Single);
        assert_eq!(engine.status(scene), Some(Status::DependentLoading));

        engine.update();
        assert!(!engine.is_done(scene));
        engine.update();

        assert_eq!(engine.status(scene), Some(Status::Done));
        assert_eq!(engine.progress(scene), 1.0);
        assert_eq!(engine.reference_count(KindTag::Package, "map_common_b1.pack"), 1);
        assert_eq!(engine.reference_count(KindTag::Package, "fx_common_c1.pack"), 1);
        assert_eq!(engine.reference_count(KindTag::Package, "scene_battle_a1.pack"), 1);
        assert_eq!(engine.active_scene(), Some("scene/Battle"));
        assert_eq!(engine.in_flight_count(), 0);

        // Only the material and the texture are preloaded
        assert_eq!(stats.borrow().objects_loaded, 2);

        engine.release(scene);

        assert_eq!(engine.reference_count(KindTag::Package, "map_common_b1.pack"), 0);
        assert_eq!(engine.reference_count(KindTag::Package, "fx_common_c1.pack"), 0);
        let stats = stats.borrow();
        assert_eq!(stats.closed("map_common_b1.pack"), 1);
        assert_eq!(stats.closed("fx_common_c1.pack"), 1);
        assert_eq!(stats.closed("scene_battle_a1.pack"), 1);
        assert_eq!(stats.objects_released, 2);
        assert_eq!(stats.scenes_unloaded, vec!["scene/Battle".to_string()]);
        assert_eq!(engine.live_count(), 0);
        assert_eq!(engine.active_scene(), None);
    }

    #[test]
    fn test_completion_callback_fires_once() {
        let (mut engine, _) = battle_engine();
        let fired = Rc::new(Cell::new(0));

        let scene = engine.acquire_scene("scene/Battle", SceneMode::Single);
        let counter = Rc::clone(&fired);
        engine.on_complete(scene, move |completion| {
            assert!(completion.is_ok());
            assert_eq!(completion.address, "scene/Battle");
            counter.set(counter.get() + 1);
        });

        // Not before the acquiring call returns
        assert_eq!(fired.get(), 0);
        for _ in 0..5 {
            engine.update();
        }
        assert_eq!(fired.get(), 1);

        // Late subscribers run immediately
        let counter = Rc::clone(&fired);
        engine.on_complete(scene, move |_| counter.set(counter.get() + 10));
        assert_eq!(fired.get(), 11);
    }
}

#[cfg(test)]
mod cache_tests {
    use super::*;

    #[test]
    fn test_single_instance_sharing() {
        let (mut engine, stats) = battle_engine();

        let first = engine.acquire_asset("maps/ground.mat");
        let second = engine.acquire_asset("maps/ground.mat");
        assert_eq!(first, second);
        assert_eq!(engine.reference_count(KindTag::Asset, "maps/ground.mat"), 2);

        run_until_terminal(&mut engine, first, 10);
        assert!(engine.is_done(first));
        let object_id = engine.object(first).map(|o| o.id);
        assert!(object_id.is_some());

        engine.release(first);
        assert!(engine.is_done(second));
        assert_eq!(engine.object(second).map(|o| o.id), object_id);
        assert_eq!(stats.borrow().closed("map_common_b1.pack"), 0);

        engine.release(second);
        assert_eq!(engine.status(second), None);
        assert_eq!(stats.borrow().objects_released, 1);
        assert_eq!(stats.borrow().closed("map_common_b1.pack"), 1);
    }

    #[test]
    fn test_shared_package_loads_once() {
        let (mut engine, stats) = battle_engine();

        let battle = engine.acquire_scene("scene/Battle", SceneMode::Single);
        let harbor = engine.acquire_scene("scene/Harbor", SceneMode::Additive);
        run_until_terminal(&mut engine, battle, 10);
        run_until_terminal(&mut engine, harbor, 10);

        assert_eq!(stats.borrow().opened("map_common_b1.pack"), 1);
        assert_eq!(engine.reference_count(KindTag::Package, "map_common_b1.pack"), 2);

        engine.release(battle);
        assert_eq!(engine.reference_count(KindTag::Package, "map_common_b1.pack"), 1);
        assert_eq!(stats.borrow().closed("map_common_b1.pack"), 0);

        engine.release(harbor);
        assert_eq!(engine.reference_count(KindTag::Package, "map_common_b1.pack"), 0);
        assert_eq!(stats.borrow().closed("map_common_b1.pack"), 1);
    }

    #[test]
    fn test_release_while_loading_finishes_then_unloads() {
        let (mut engine, stats) = engine_with(battle_backend().with_latency(2), relaxed_config());
        let fired = Rc::new(Cell::new(0));

        let asset = engine.acquire_asset("maps/ground.mat");
        let counter = Rc::clone(&fired);
        engine.on_complete(asset, move |c| {
            assert_eq!(c.status, Status::Done);
            counter.set(counter.get() + 1);
        });

        engine.release(asset);
        // Still in flight, nothing cancelled
        assert_eq!(engine.status(asset), Some(Status::DependentLoading));

        for _ in 0..20 {
            engine.update();
        }

        assert_eq!(fired.get(), 1);
        assert_eq!(engine.status(asset), None);
        assert!(!engine.is_cached(KindTag::Asset, "maps/ground.mat"));
        assert_eq!(stats.borrow().objects_released, 1);
        assert_eq!(stats.borrow().closed("map_common_b1.pack"), 1);
        assert_eq!(engine.live_count(), 0);
    }

    #[test]
    fn test_over_release_is_absorbed() {
        let (mut engine, _) = battle_engine();

        let asset = engine.acquire_asset("maps/ground.mat");
        run_until_terminal(&mut engine, asset, 10);
        engine.release(asset);
        engine.release(asset);
        engine.release(asset);

        assert_eq!(engine.reference_count(KindTag::Asset, "maps/ground.mat"), 0);

        // The slot is reused under a new version; the old handle stays dead
        let again = engine.acquire_asset("maps/ground.mat");
        assert_ne!(again, asset);
        engine.release(asset);
        assert_eq!(engine.reference_count(KindTag::Asset, "maps/ground.mat"), 1);
    }

    #[test]
    fn test_shared_dependency_set_picks_up_preload() {
        let (mut engine, stats) = battle_engine();

        let plain = engine.acquire_dependencies("scene/Battle");
        let scene = engine.acquire_scene("scene/Battle", SceneMode::Single);
        assert_eq!(engine.reference_count(KindTag::Dependency, "scene/Battle"), 2);

        run_until_terminal(&mut engine, scene, 10);

        assert!(engine.is_done(plain));
        // Material and texture, as if the scene had created the set
        assert_eq!(stats.borrow().objects_loaded, 2);

        engine.release(scene);
        engine.release(plain);
        assert_eq!(stats.borrow().objects_released, 2);
        assert_eq!(engine.live_count(), 0);
    }

    #[test]
    fn test_finished_dependency_set_is_not_reopened_for_preload() {
        let (mut engine, stats) = battle_engine();

        let plain = engine.acquire_dependencies("props/crate.prefab");
        run_until_terminal(&mut engine, plain, 10);
        assert_eq!(stats.borrow().objects_loaded, 0);

        let prefab = engine.acquire_asset("props/crate.prefab");
        run_until_terminal(&mut engine, prefab, 10);

        assert!(engine.is_done(prefab));
        assert!(engine.is_done(plain));
        // Only the prefab itself; the finished set stays as it was
        assert_eq!(stats.borrow().objects_loaded, 1);
    }

    #[test]
    fn test_scene_node_keeps_packages_parked() {
        let (mut engine, stats) = battle_engine();

        let prefab = engine.acquire_asset("props/crate.prefab");
        run_until_terminal(&mut engine, prefab, 10);
        let object = engine.object(prefab).cloned().expect("prefab instantiated");
        assert_eq!(object.kind, ObjectKind::SceneNode);

        engine.release(prefab);

        // The node is the host's; its package data must survive
        assert_eq!(engine.reference_count(KindTag::Package, "props_d1.pack"), 0);
        assert!(engine.is_cached(KindTag::Package, "props_d1.pack"));
        assert_eq!(engine.parked_count(), 2);
        assert_eq!(stats.borrow().closed("props_d1.pack"), 0);
        // Only the preloaded material was released
        assert_eq!(stats.borrow().objects_released, 1);

        // Parked packages are revived, not reopened
        let ground = engine.acquire_asset("maps/ground.mat");
        run_until_terminal(&mut engine, ground, 10);
        assert_eq!(stats.borrow().opened("map_common_b1.pack"), 1);
        assert_eq!(engine.reference_count(KindTag::Package, "map_common_b1.pack"), 1);
        assert_eq!(engine.parked_count(), 1);

        // Over-release of a parked entry changes nothing
        let props = engine.lookup(KindTag::Package, "props_d1.pack").unwrap();
        engine.release(props);
        assert!(engine.is_cached(KindTag::Package, "props_d1.pack"));

        engine.object_destroyed(object.id);
        assert!(!engine.is_cached(KindTag::Package, "props_d1.pack"));
        assert_eq!(stats.borrow().closed("props_d1.pack"), 1);
        // Still referenced by the material asset
        assert_eq!(stats.borrow().closed("map_common_b1.pack"), 0);

        engine.release(ground);
        assert_eq!(stats.borrow().closed("map_common_b1.pack"), 1);
        assert_eq!(engine.live_count(), 0);
    }
}

#[cfg(test)]
mod budget_tests {
    use super::*;
    use rstest::rstest;

    /// `bundle` lives in pkg0 and references one item in each of pkg1..pkgN-1
    fn bundle_manifest(packages: usize) -> Manifest {
        let mut manifest = Manifest::new("bundle", 1, 0);
        let mut dependencies = Vec::new();
        for i in 0..packages {
            manifest.insert_package(PackageDescriptor::new(format!("pkg{}", i), format!("{:02}", i)));
            if i > 0 {
                let address = format!("items/item{}.bin", i);
                manifest.insert_asset(AssetEntry::new(address.clone(), format!("pkg{}", i)));
                dependencies.push(address);
            }
        }
        manifest.insert_asset(AssetEntry::new("bundle", "pkg0").with_dependencies(dependencies));
        manifest
    }

    fn capped_engine(packages: usize, cap: usize) -> Engine {
        let mut backend = MemoryBackend::new();
        for i in 0..packages {
            backend = backend.with_package(format!("pkg{0}_{0:02}.pack", i));
        }
        let config = EngineConfig {
            max_items_per_frame: Some(cap),
            ..relaxed_config()
        };
        Engine::new(config, bundle_manifest(packages), Box::new(backend))
    }

    #[rstest]
    #[case(6, 2, 3)]
    #[case(5, 2, 3)]
    #[case(7, 3, 3)]
    #[case(4, 4, 1)]
    #[case(3, 10, 1)]
    fn test_dependency_walk_respects_item_cap(
        #[case] packages: usize,
        #[case] cap: usize,
        #[case] expected_frames: usize,
    ) {
        let mut engine = capped_engine(packages, cap);
        let deps = engine.acquire_dependencies("bundle");

        let frames = run_until_terminal(&mut engine, deps, 20);

        assert!(engine.is_done(deps));
        assert_eq!(frames, expected_frames);
        assert_eq!(frames, packages.div_ceil(cap));
    }

    #[test]
    fn test_preload_walk_respects_item_cap() {
        let mut manifest = Manifest::new("textures", 1, 0);
        manifest.insert_package(PackageDescriptor::new("atlas", "ff"));
        let textures: Vec<String> = (0..6).map(|i| format!("tex/{}.png", i)).collect();
        for texture in &textures {
            manifest.insert_asset(AssetEntry::new(texture.clone(), "atlas"));
        }
        manifest.insert_asset(AssetEntry::new("scene/Gallery", "atlas").with_dependencies(textures));

        let config = EngineConfig {
            max_items_per_frame: Some(2),
            ..relaxed_config()
        };
        let backend = MemoryBackend::new().with_package("atlas_ff.pack");
        let stats = backend.stats();
        let mut engine = Engine::new(config, manifest, Box::new(backend));

        let deps = engine.acquire_dependencies_with("scene/Gallery", true);
        let frames = run_until_terminal(&mut engine, deps, 20);

        // One package plus six preloads at two items per frame
        assert!(frames >= 6usize.div_ceil(2));
        assert_eq!(frames, 4);
        assert_eq!(stats.borrow().objects_loaded, 6);
    }

    #[test]
    fn test_progress_is_monotonic() {
        let (mut engine, _) = engine_with(
            battle_backend().with_latency(3),
            EngineConfig {
                max_items_per_frame: Some(1),
                ..relaxed_config()
            },
        );

        let scene = engine.acquire_scene("scene/Battle", SceneMode::Single);
        let mut last = engine.progress(scene);
        let mut samples = 0;
        while !engine.is_terminal(scene) {
            engine.update();
            let progress = engine.progress(scene);
            assert!(progress >= last, "progress went from {} to {}", last, progress);
            assert!(progress <= 1.0);
            last = progress;
            samples += 1;
            assert!(samples < 200, "scene never finished");
        }

        assert!(engine.is_done(scene));
        assert_eq!(engine.progress(scene), 1.0);
        assert!(samples > 3);
    }

    /// Owner and dependency-set progress after each frame, one poll of
    /// latency per backend operation
    fn weighted_run(scene: bool, backend: MemoryBackend) -> (Engine, Handle, Handle, Vec<(f32, f32)>) {
        let (mut engine, _) = engine_with(backend.with_latency(1), relaxed_config());
        let (owner, address) = if scene {
            (engine.acquire_scene("scene/Harbor", SceneMode::Single), "scene/Harbor")
        } else {
            (engine.acquire_asset("props/crate.prefab"), "props/crate.prefab")
        };
        let deps = engine.lookup(KindTag::Dependency, address).unwrap();

        let mut samples = Vec::new();
        for _ in 0..5 {
            engine.update();
            samples.push((engine.progress(owner), engine.progress(deps)));
        }
        (engine, owner, deps, samples)
    }

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[rstest]
    #[case::scene(true, 0.3)]
    #[case::asset(false, 0.5)]
    fn test_progress_is_weighted_by_phase(#[case] scene: bool, #[case] weight: f32) {
        let (engine, owner, _, samples) = weighted_run(scene, battle_backend());

        // Two packages open, the material preload is still pending
        assert!(close(samples[1].1, 2.0 / 3.0), "{:?}", samples);
        // The owner sees the set's progress one tick later, scaled by the weight
        assert!(close(samples[2].0, weight * 2.0 / 3.0), "{:?}", samples);
        assert!(close(samples[2].1, 1.0), "{:?}", samples);
        // Own phase half way: weight + (1 - weight) * 0.5
        assert!(close(samples[3].0, weight + (1.0 - weight) * 0.5), "{:?}", samples);
        assert!(engine.is_done(owner));
        assert_eq!(samples[4].0, 1.0);
    }

    #[rstest]
    #[case::scene(true, "scene/Harbor", 0.3)]
    #[case::asset(false, "props/crate.prefab", 0.5)]
    fn test_finished_dependencies_count_exactly_the_weight(
        #[case] scene: bool,
        #[case] address: &str,
        #[case] weight: f32,
    ) {
        // The owner's own phase fails at once, freezing progress at the hand-over
        let (engine, owner, deps, _) = weighted_run(scene, battle_backend().with_failure(address));

        assert!(engine.is_done(deps));
        assert!(engine.has_error(owner));
        assert_eq!(engine.progress(owner), weight);
    }

    #[test]
    fn test_exhausted_time_slice_defers_work() {
        let (mut engine, stats) = engine_with(
            battle_backend(),
            EngineConfig {
                time_slice: Duration::ZERO,
                ..relaxed_config()
            },
        );

        let asset = engine.acquire_asset("maps/ground.mat");
        for _ in 0..3 {
            engine.update();
        }

        assert!(!engine.is_terminal(asset));
        assert_eq!(stats.borrow().opened("map_common_b1.pack"), 0);

        // Immediate loads ignore the budget
        engine.load_immediately(asset);
        assert!(engine.is_done(asset));
    }
}

#[cfg(test)]
mod lifecycle_tests {
    use super::*;

    #[test]
    fn test_load_immediately_matches_async_result() {
        let (mut engine, stats) = engine_with(battle_backend().with_latency(3), relaxed_config());
        let fired = Rc::new(Cell::new(0));

        let scene = engine.acquire_scene("scene/Battle", SceneMode::Single);
        let counter = Rc::clone(&fired);
        engine.on_complete(scene, move |_| counter.set(counter.get() + 1));

        engine.load_immediately(scene);

        assert_eq!(engine.frame(), 0);
        assert!(engine.is_done(scene));
        assert_eq!(engine.progress(scene), 1.0);
        assert_eq!(engine.active_scene(), Some("scene/Battle"));
        assert_eq!(engine.reference_count(KindTag::Package, "map_common_b1.pack"), 1);
        assert_eq!(engine.in_flight_count(), 0);
        assert_eq!(fired.get(), 1);
        assert_eq!(stats.borrow().objects_loaded, 2);

        engine.update();
        engine.load_immediately(scene);
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn test_missing_package_fails_scene_and_keeps_active() {
        let (mut engine, _) = battle_engine();

        let battle = engine.acquire_scene("scene/Battle", SceneMode::Single);
        run_until_terminal(&mut engine, battle, 10);

        let broken = engine.acquire_scene("scene/Broken", SceneMode::Single);
        run_until_terminal(&mut engine, broken, 10);

        assert!(engine.has_error(broken));
        let message = engine.error(broken).unwrap();
        assert!(message.contains("scene/Broken"), "{}", message);
        assert!(message.contains("scene_broken_a3.pack"), "{}", message);
        assert_eq!(engine.active_scene(), Some("scene/Battle"));

        // Failures are never retried
        let progress = engine.progress(broken);
        engine.update();
        assert!(engine.has_error(broken));
        assert_eq!(engine.progress(broken), progress);

        engine.release(broken);
        assert!(!engine.is_cached(KindTag::Scene, "scene/Broken"));
        assert!(!engine.is_cached(KindTag::Package, "scene_broken_a3.pack"));
    }

    #[test]
    fn test_manifest_miss_is_an_error() {
        let (mut engine, stats) = battle_engine();

        let asset = engine.acquire_asset("does/not/exist.mat");
        assert!(engine.has_error(asset));
        assert!(engine.error(asset).unwrap().contains("not found in manifest"));
        assert_eq!(engine.in_flight_count(), 0);

        engine.release(asset);
        assert_eq!(engine.live_count(), 0);
        assert!(stats.borrow().packages_opened.is_empty());
    }

    #[test]
    fn test_raw_file_resolves_hashed_path() {
        let (mut engine, _) = battle_engine();

        let credits = engine.acquire_raw_file("text/credits.txt");
        assert_eq!(engine.raw_file_path(credits), None);
        run_until_terminal(&mut engine, credits, 5);

        assert!(engine.is_done(credits));
        assert_eq!(
            engine.raw_file_path(credits),
            Some(PathBuf::from("build/credits_e1.txt").as_path())
        );
    }

    #[test]
    fn test_raw_file_missing_fails_on_first_tick() {
        let (mut engine, _) = battle_engine();

        let legal = engine.acquire_raw_file("text/legal.txt");
        let frames = run_until_terminal(&mut engine, legal, 5);

        assert_eq!(frames, 1);
        assert!(engine.has_error(legal));
        let message = engine.error(legal).unwrap();
        assert!(message.starts_with("file not found:"), "{}", message);
        assert!(message.contains("legal_e2.txt"), "{}", message);
        assert_eq!(engine.raw_file_path(legal), None);
    }

    #[test]
    fn test_direct_mode_reads_source_files() {
        let config = EngineConfig {
            load_mode: LoadMode::Direct,
            source_dir: PathBuf::from("content"),
            ..relaxed_config()
        };
        let backend = MemoryBackend::new()
            .with_file("content/ui/logo.png")
            .with_file("content/text/readme.txt");
        let stats = backend.stats();
        let mut engine = Engine::new(config, Manifest::new("empty", 0, 0), Box::new(backend));

        let logo = engine.acquire_asset("ui/logo.png");
        let readme = engine.acquire_raw_file("text/readme.txt");
        let menu = engine.acquire_scene("scene/Menu", SceneMode::Single);
        let deps = engine.acquire_dependencies("ui/logo.png");
        engine.update();

        assert!(engine.is_done(logo));
        assert!(engine.is_done(readme));
        assert!(engine.is_done(menu));
        assert!(engine.is_done(deps));
        assert_eq!(
            engine.raw_file_path(readme),
            Some(PathBuf::from("content/text/readme.txt").as_path())
        );
        assert_eq!(engine.active_scene(), Some("scene/Menu"));
        assert!(stats.borrow().packages_opened.is_empty());

        let missing = engine.acquire_asset("ui/missing.png");
        engine.update();
        assert!(engine.has_error(missing));
    }

    #[test]
    fn test_swap_manifest_affects_new_requests() {
        let (mut engine, _) = battle_engine();
        let ground = engine.acquire_asset("maps/ground.mat");
        run_until_terminal(&mut engine, ground, 10);

        let mut next = Manifest::new("main", 5, 1719000000000);
        next.insert_package(PackageDescriptor::new("credits.txt", "e9"));
        next.insert_asset(AssetEntry::new("text/credits.txt", "credits.txt"));
        engine.swap_manifest(next);

        assert_eq!(engine.manifest().version(), 5);
        // Loaded content is untouched
        assert!(engine.is_done(ground));

        let credits = engine.acquire_raw_file("text/credits.txt");
        run_until_terminal(&mut engine, credits, 5);
        let message = engine.error(credits).unwrap();
        assert!(message.contains("credits_e9.txt"), "{}", message);

        let harbor = engine.acquire_scene("scene/Harbor", SceneMode::Single);
        assert!(engine.has_error(harbor));
    }

    #[test]
    fn test_nested_dependencies_open_every_package() {
        let mut manifest = Manifest::new("chain", 1, 0);
        for package in ["pa", "pb", "pc"] {
            manifest.insert_package(PackageDescriptor::new(package, "01"));
        }
        manifest.insert_asset(AssetEntry::new("a", "pa").with_dependencies(["b"]));
        manifest.insert_asset(AssetEntry::new("b", "pb").with_dependencies(["c"]));
        manifest.insert_asset(AssetEntry::new("c", "pc"));

        let backend = MemoryBackend::new()
            .with_package("pa_01.pack")
            .with_package("pb_01.pack")
            .with_package("pc_01.pack");
        let stats = backend.stats();
        let mut engine = Engine::new(relaxed_config(), manifest, Box::new(backend));

        let a = engine.acquire_asset("a");
        run_until_terminal(&mut engine, a, 10);

        assert!(engine.is_done(a));
        assert_eq!(stats.borrow().opened("pc_01.pack"), 1);
        assert_eq!(engine.reference_count(KindTag::Package, "pc_01.pack"), 1);

        engine.release(a);
        assert_eq!(stats.borrow().closed("pc_01.pack"), 1);
        assert_eq!(engine.live_count(), 0);
    }

    #[test]
    fn test_swap_with_new_hash_opens_new_package() {
        let backend = battle_backend().with_package("map_common_b2.pack");
        let (mut engine, stats) = engine_with(backend, relaxed_config());

        let ground = engine.acquire_asset("maps/ground.mat");
        run_until_terminal(&mut engine, ground, 10);

        let mut next = Manifest::new("main", 5, 1719000000000);
        next.insert_package(PackageDescriptor::new("map_common", "b2"));
        next.insert_asset(AssetEntry::new("maps/ground.mat", "map_common"));
        next.insert_asset(AssetEntry::new("maps/road.mat", "map_common"));
        engine.swap_manifest(next);

        let road = engine.acquire_asset("maps/road.mat");
        run_until_terminal(&mut engine, road, 10);

        assert!(engine.is_done(road));
        assert_eq!(stats.borrow().opened("map_common_b2.pack"), 1);
        assert_eq!(engine.reference_count(KindTag::Package, "map_common_b1.pack"), 1);
        assert_eq!(engine.reference_count(KindTag::Package, "map_common_b2.pack"), 1);

        // The old file lives exactly as long as its holders
        engine.release(ground);
        assert_eq!(stats.borrow().closed("map_common_b1.pack"), 1);
        assert_eq!(stats.borrow().closed("map_common_b2.pack"), 0);

        engine.release(road);
        assert_eq!(stats.borrow().closed("map_common_b2.pack"), 1);
        assert_eq!(engine.live_count(), 0);
    }

    #[test]
    fn test_diagnostics() {
        let (mut engine, _) = battle_engine();
        assert_eq!(engine.frame(), 0);

        let scene = engine.acquire_scene("scene/Harbor", SceneMode::Single);
        // scene, dependency set and two packages
        assert_eq!(engine.in_flight_count(), 4);
        assert_eq!(engine.loaded_count(), 0);

        run_until_terminal(&mut engine, scene, 10);
        assert_eq!(engine.frame(), 2);
        assert_eq!(engine.in_flight_count(), 0);
        assert_eq!(engine.loaded_count(), 4);
        assert_eq!(engine.live_count(), 4);
        assert!(format!("{:?}", engine).contains("scene/Harbor"));
    }
}

#[cfg(test)]
mod refcount_proptests {
    use super::*;
    use proptest::prelude::*;

    const ADDRESSES: [&str; 3] = ["maps/ground.mat", "fx/spark.png", "props/crate.prefab"];

    #[derive(Debug, Clone)]
    enum Op {
        Acquire(usize),
        Release(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..ADDRESSES.len()).prop_map(Op::Acquire),
            (0..ADDRESSES.len()).prop_map(Op::Release),
        ]
    }

    proptest! {
        #[test]
        fn test_refcount_never_negative(ops in proptest::collection::vec(op(), 1..40)) {
            let (mut engine, _) = battle_engine();
            let mut live: Vec<Vec<Handle>> = vec![Vec::new(); ADDRESSES.len()];
            let mut dead: Vec<Option<Handle>> = vec![None; ADDRESSES.len()];

            for op in ops {
                match op {
                    Op::Acquire(i) => live[i].push(engine.acquire_asset(ADDRESSES[i])),
                    Op::Release(i) => match live[i].pop() {
                        Some(handle) => {
                            engine.release(handle);
                            dead[i] = Some(handle);
                        }
                        // Releasing beyond acquisitions must be a no-op
                        None => {
                            if let Some(handle) = dead[i] {
                                engine.release(handle);
                            }
                        }
                    },
                }
                engine.update();
                engine.update();

                for (i, address) in ADDRESSES.iter().enumerate() {
                    prop_assert_eq!(engine.reference_count(KindTag::Asset, address), live[i].len());
                    prop_assert_eq!(engine.is_cached(KindTag::Asset, address), !live[i].is_empty());
                }
            }
        }
    }
}
