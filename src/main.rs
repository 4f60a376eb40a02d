//! Command-line driver: load a Kickstart ROM image and run the core for a
//! fixed number of frames, reporting final beam position and CPU state.
//! Host video/audio/input are out of scope for this crate.

use std::env;
use std::fs;
use std::process::ExitCode;

use agnus_core::config::CoreConfig;
use agnus_core::Amiga;

const DEFAULT_CHIP_RAM: usize = 512 * 1024;

fn main() -> ExitCode {
    env_logger::init();

    let mut args = env::args().skip(1);
    let Some(rom_path) = args.next() else {
        eprintln!("usage: agnus-core <kickstart-rom> [frames]");
        return ExitCode::FAILURE;
    };
    let frames: u32 = args.next().and_then(|s| s.parse().ok()).unwrap_or(1);

    let rom = match fs::read(&rom_path) {
        Ok(bytes) => bytes,
        Err(err) => {
            eprintln!("failed to read {rom_path}: {err}");
            return ExitCode::FAILURE;
        }
    };

    let config = CoreConfig::from_env();
    log::info!("booting with {config:?}, {frames} frame(s) requested");

    let mut amiga = Amiga::new(config, DEFAULT_CHIP_RAM, rom);
    if let Some(stop) = amiga.run_frames(frames) {
        log::info!("stopped early: {stop:?}");
    }

    println!(
        "ran {frames} frame(s); beam at v={} h={}; cpu state {:?}; pc={:#x}",
        amiga.beam.v,
        amiga.beam.h,
        amiga.cpu.state(),
        amiga.cpu.regs.pc,
    );

    ExitCode::SUCCESS
}
