use std::cell::Cell;
use std::process::ExitCode;
use std::rc::Rc;

use anyhow::{Context, Result};
use clap::Parser;

use resload::cli::{Cli, Command, VersionAction};
use resload::config::{self, EngineConfig, LoadMode};
use resload::logging;
use resload::resource::version::{self, VersionStore};
use resload::resource::{Engine, FsBackend, Handle, Manifest, SceneMode, Status};

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => {
            log::error!("{:#}", err);
            eprintln!("error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();

    logging::init_logging(cli.log_level()?, cli.logfile.as_deref())?;
    log::info!("resload {} starting", env!("CARGO_PKG_VERSION"));

    let config = config::load_config(cli.config.as_deref())?;
    let config = cli.merge_into_config(config)?;
    log::debug!("Configuration: {:?}", config);

    let Some(command) = cli.command.clone() else {
        log::info!("No command given; nothing to do");
        return Ok(ExitCode::SUCCESS);
    };

    match command {
        Command::Resolve { address } => resolve(&config, &address),
        Command::Load {
            address,
            scene,
            additive,
            raw,
            immediate,
            max_frames,
        } => {
            let kind = if scene {
                LoadKind::Scene(if additive {
                    SceneMode::Additive
                } else {
                    SceneMode::Single
                })
            } else if raw {
                LoadKind::RawFile
            } else {
                LoadKind::Asset
            };
            load(&config, &address, kind, immediate, max_frames)
        }
        Command::Version { action } => version_command(&config, action),
    }
}

fn load_manifest(config: &EngineConfig) -> Result<Manifest> {
    if config.load_mode == LoadMode::Direct {
        return Ok(Manifest::new(config.manifest_name.clone(), 0, 0));
    }
    let path = config.manifest_path();
    Manifest::from_file(&path).with_context(|| format!("Failed to load manifest {}", path.display()))
}

fn resolve(config: &EngineConfig, address: &str) -> Result<ExitCode> {
    let manifest = load_manifest(config)?;
    let Some(packages) = manifest.dependency_packages(address) else {
        println!("{}: not found in manifest '{}'", address, manifest.name());
        return Ok(ExitCode::FAILURE);
    };

    println!(
        "{} (manifest '{}' v{})",
        address,
        manifest.name(),
        manifest.version()
    );
    for package in packages {
        let file_name = manifest.package_file_name(&package).unwrap_or_default();
        let path = config.build_dir.join(&file_name);
        let marker = if path.exists() { "ok" } else { "missing" };
        println!("  {:<24} {} [{}]", package, path.display(), marker);
    }
    Ok(ExitCode::SUCCESS)
}

#[derive(Debug, Clone, Copy)]
enum LoadKind {
    Asset,
    RawFile,
    Scene(SceneMode),
}

fn load(
    config: &EngineConfig,
    address: &str,
    kind: LoadKind,
    immediate: bool,
    max_frames: usize,
) -> Result<ExitCode> {
    let manifest = load_manifest(config)?;
    let mut engine = Engine::new(config.clone(), manifest, Box::new(FsBackend::new()));

    let handle: Handle = match kind {
        LoadKind::Asset => engine.acquire_asset(address),
        LoadKind::RawFile => engine.acquire_raw_file(address),
        LoadKind::Scene(mode) => engine.acquire_scene(address, mode),
    };

    let finished = Rc::new(Cell::new(false));
    let flag = Rc::clone(&finished);
    engine.on_complete(handle, move |completion| {
        log::info!("'{}' finished: {}", completion.address, completion.status);
        flag.set(true);
    });

    if immediate {
        engine.load_immediately(handle);
    } else {
        while !finished.get() && (engine.frame() as usize) < max_frames {
            engine.update();
            log::debug!(
                "frame {}: {:.0}%",
                engine.frame(),
                engine.progress(handle) * 100.0
            );
        }
    }

    let status = engine.status(handle);
    let code = match status {
        Some(Status::Done) => {
            println!("{}: done in {} frames", address, engine.frame());
            if let Some(object) = engine.object(handle) {
                println!("  object {} ({:?})", object.id, object.kind);
            }
            if let Some(path) = engine.raw_file_path(handle) {
                println!("  file {}", path.display());
            }
            ExitCode::SUCCESS
        }
        Some(Status::Error) => {
            println!("{}: {}", address, engine.error(handle).unwrap_or("failed"));
            ExitCode::FAILURE
        }
        _ => {
            println!(
                "{}: still loading after {} frames ({:.0}%)",
                address,
                engine.frame(),
                engine.progress(handle) * 100.0
            );
            ExitCode::FAILURE
        }
    };

    engine.release(handle);
    log::debug!("{} loadables left after release", engine.live_count());
    Ok(code)
}

fn version_command(config: &EngineConfig, action: VersionAction) -> Result<ExitCode> {
    let store = VersionStore::new(&config.build_dir, &config.upload_dir);
    let name = &config.manifest_name;

    match action {
        VersionAction::Show => match store.current(name)? {
            Some(record) => println!(
                "{} v{} (timestamp {})",
                name, record.version, record.timestamp
            ),
            None => println!("{}: no published version", name),
        },
        VersionAction::Publish => {
            let manifest = load_manifest(config)?;
            let mut packages: Vec<String> = Vec::new();
            let mut names: Vec<String> = manifest
                .addresses()
                .filter_map(|address| manifest.asset(address))
                .map(|entry| entry.package.clone())
                .collect();
            names.sort();
            names.dedup();
            for package in names {
                if let Some(file_name) = manifest.package_file_name(&package) {
                    packages.push(file_name);
                }
            }
            let record = store.publish(name, &packages, version::now_millis())?;
            println!("{} published as v{}", name, record.version);
        }
        VersionAction::Rename { from, to } => {
            let report = store.rename(name, from, to)?;
            for path in &report.renamed {
                println!("  {}", path.display());
            }
            println!(
                "{} v{} renamed to v{}{}",
                name,
                from,
                to,
                if report.stats_line_updated {
                    " (upload stats updated)"
                } else {
                    ""
                }
            );
        }
    }
    Ok(ExitCode::SUCCESS)
}
