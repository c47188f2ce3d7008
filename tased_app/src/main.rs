//! `tased`: print a summary of a TAS editor project file.
//!
//! Usage: `tased [-v] <project> [config.json]`

use std::{env, path::Path, process::ExitCode};

use tased_api::{
    load_config, read_project,
    tased_log::LagState,
    tased_timeline::{BranchGraph, Parent},
    EditorConfig, Error, Project, VersionSkew,
};

use crate::logging::print_to_log_file;

mod logging;

const LOG_FILE: &str = "tased.log";

fn main() -> ExitCode {
    let mut args: Vec<String> = env::args().skip(1).collect();
    let verbose = match args.iter().position(|arg| arg == "-v") {
        Some(index) => {
            args.remove(index);
            true
        }
        None => false,
    };
    let Some(project_path) = args.first() else {
        eprintln!("usage: tased [-v] <project> [config.json]");
        return ExitCode::FAILURE;
    };

    if let Err(error) = logging::init(Path::new(LOG_FILE), verbose) {
        eprintln!("failed to open {}: {}", LOG_FILE, error);
    }
    print_to_log_file(&"-".repeat(80));
    tracing::info!("tased {}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Platform: {} {}", env::consts::OS, env::consts::ARCH);

    match inspect(project_path, args.get(1).map(String::as_str)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            tracing::error!("{}", error);
            ExitCode::FAILURE
        }
    }
}

fn inspect(project_path: &str, config_path: Option<&str>) -> Result<(), Error> {
    let config = match config_path {
        Some(config_path) => load_config(config_path)?,
        None => EditorConfig::default(),
    };
    let project = read_project(project_path, &config.timeline, VersionSkew::BestEffort)?;
    print_summary(project_path, project);
    Ok(())
}

fn print_summary(project_path: &str, project: Project) {
    println!("{} (format version {})", project_path, project.version);
    println!(
        "movie: {} frames, {} joysticks",
        project.input.len(),
        project.input.joysticks_per_frame()
    );

    match &project.markers {
        Some(markers) => {
            println!("markers: {}", markers.count());
            for id in 1..=markers.count() {
                if let Some(frame) = markers.frame_of(id) {
                    println!("  {:>8}  {}", frame, markers.note(id));
                }
            }
        }
        None => println!("markers: none"),
    }

    match &project.history {
        Some(history) => {
            println!("history: {} entries", history.len());
            for (index, entry) in history.entries().enumerate() {
                let cursor = if index == history.cursor() { '>' } else { ' ' };
                let snapshot = entry.snapshot();
                println!(
                    " {} {:>4}  {}  {}",
                    cursor,
                    index,
                    snapshot.timestamp(),
                    snapshot.description()
                );
            }
        }
        None => println!("history: none"),
    }

    match project.branches {
        Some(mut branches) => {
            println!("branches: {}", branches.occupied().count());
            print_branch_tree(&mut branches, Parent::Cloud, 1);
        }
        None => println!("branches: none"),
    }

    match &project.greenzone {
        Some(greenzone) => {
            let lag = greenzone.lag();
            let lagged = (0..lag.len())
                .filter(|&frame| lag.get(frame) == LagState::Lagged)
                .count();
            println!(
                "greenzone: {} frames explored, {} checkpoints, {} lag frames, playback at {}",
                greenzone.size(),
                greenzone.checkpoint_count(),
                lagged,
                project.playback_frame
            );
        }
        None => println!("greenzone: none"),
    }
}

fn print_branch_tree(branches: &mut BranchGraph, node: Parent, depth: usize) {
    for slot in branches.children(node) {
        if let Some(branch) = branches.slot(slot) {
            println!(
                "{}[{}] frame {}  {}",
                "  ".repeat(depth),
                slot,
                branch.key_frame(),
                branch.snapshot.description()
            );
        }
        print_branch_tree(branches, Parent::Slot(slot), depth + 1);
    }
}
