// SPDX-License-Identifier: GPL-3.0-or-later
/*
 * PLDM firmware update utility.
 *
 * Copyright (c) 2023 Code Construct
 */

use anyhow::{bail, Context};
use argh::FromArgs;
use enumset::{EnumSet, EnumSetType};
use std::io::Write;

use mctp::Eid;
use mctp_mux::{MuxKind, MuxSocket};
use pldm_fw::{pkg::Package, UpdateOptions};

fn comma_separated<T: EnumSetType + std::fmt::Debug>(e: EnumSet<T>) -> String {
    e.iter()
        .map(|i| format!("{i:?}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn print_package(pkg: &Package) {
    println!("Package:");
    println!("  Identifier:   {} ({:?})", pkg.identifier, pkg.format);
    println!("  Version:      {}", pkg.version);
    println!("  Applicable devices:");
    for (idx, dev) in pkg.devices.iter().enumerate() {
        println!("   {:2}: {}", idx, dev.ids);
        println!("       version:    {}", dev.version);
        println!("       options:    0x{:x}", dev.option_flags);
        println!("       components: {}", dev.components.as_index_str());
    }
    if !pkg.downstream_devices.is_empty() {
        println!("  Downstream devices:");
        for (idx, dev) in pkg.downstream_devices.iter().enumerate() {
            println!("   {:2}: {}", idx, dev.ids);
            println!("       version:    {}", dev.version);
            println!("       components: {}", dev.components.as_index_str());
        }
    }
    println!("  Components:");
    for (idx, cmp) in pkg.components.iter().enumerate() {
        println!("   {:2}:", idx);
        println!("       classification: {:?}", cmp.classification);
        println!("       identifier:     0x{:04x}", cmp.identifier);
        println!("       version:        {}", cmp.version);
        println!("       comparison:     0x{:08x}", cmp.comparison_stamp);
        println!("       options:        0x{:04x}", cmp.options);
        println!(
            "       activation:     [0x{:04x}] {}",
            cmp.activation_method.as_u16_truncated(),
            comma_separated(cmp.activation_method)
        );
        println!("       file size:      0x{:04x}", cmp.file_size);
        if !cmp.opaque_data.is_empty() {
            println!("       opaque data:    {} bytes", cmp.opaque_data.len());
        }
    }
}

fn extract_component(pkg: &Package, idx: usize) -> anyhow::Result<()> {
    let Some(comp) = pkg.components.get(idx) else {
        bail!("no component with index {}", idx);
    };

    let fname = format!("component-{}.{:04x}.bin", idx, comp.identifier);
    let mut f = std::fs::File::create(&fname)
        .with_context(|| format!("Can't open output file {}", fname))?;

    println!("extracting component {} to {}", idx, fname);

    let buf = pkg.component_image(comp)?;
    f.write_all(&buf)?;

    Ok(())
}

fn confirm_update() -> bool {
    let mut line = String::new();

    print!("\nConfirm update (y,N)? ");
    let _ = std::io::stdout().flush();
    if std::io::stdin().read_line(&mut line).is_err() {
        return false;
    }

    line.trim().eq_ignore_ascii_case("y")
}

fn open_package(fname: &str) -> anyhow::Result<Package> {
    let f = std::fs::File::open(fname)
        .with_context(|| format!("Can't open PLDM package {}", fname))?;

    let pkg = Package::parse(f)
        .with_context(|| format!("Can't parse PLDM package {}", fname))?;

    Ok(pkg)
}

fn connect(bus: u8) -> anyhow::Result<MuxSocket> {
    MuxSocket::connect(MuxKind::FirmwareUpdate, bus)
        .with_context(|| format!("Can't connect to firmware update mux for bus {bus}"))
}

#[derive(FromArgs, Debug)]
#[argh(description = "PLDM update utility")]
struct Args {
    /// log debug messages
    #[argh(switch, short = 'v')]
    verbose: bool,

    #[argh(subcommand)]
    command: Command,
}

#[derive(FromArgs, Debug)]
#[argh(subcommand)]
enum Command {
    Update(UpdateCommand),
    Status(StatusCommand),
    Cancel(CancelCommand),
    PkgInfo(PkgInfoCommand),
    Version(VersionCommand),
    Extract(ExtractCommand),
}

#[derive(FromArgs, Debug)]
#[argh(
    subcommand,
    name = "update",
    description = "Update FD from a package file"
)]
struct UpdateCommand {
    /// bus number of the PLDM daemon
    #[argh(option, short = 'b', default = "0")]
    bus: u8,

    /// MCTP EID of device
    #[argh(positional)]
    eid: Eid,

    #[argh(positional)]
    file: String,

    /// provide a specific Component Classification Index (for all
    /// components) during update, defaults to the component position.
    #[argh(option)]
    component_index: Option<u8>,

    /// only update the component with this identifier
    #[argh(option)]
    component: Option<u16>,

    /// set self-contained activation flag for activate
    #[argh(switch)]
    self_contained_activation: bool,

    /// don't cancel an update already in progress on the device
    #[argh(switch)]
    no_reset: bool,

    /// don't require confirmation to update
    #[argh(switch, short = 'y')]
    confirm: bool,
}

#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "status", description = "Query FD update state")]
struct StatusCommand {
    /// bus number of the PLDM daemon
    #[argh(option, short = 'b', default = "0")]
    bus: u8,

    /// MCTP EID of device
    #[argh(positional)]
    eid: Eid,
}

#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "cancel", description = "Cancel ongoing update")]
struct CancelCommand {
    /// bus number of the PLDM daemon
    #[argh(option, short = 'b', default = "0")]
    bus: u8,

    /// MCTP EID of device
    #[argh(positional)]
    eid: Eid,
}

#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "pkg-info", description = "Query package contents")]
struct PkgInfoCommand {
    #[argh(positional)]
    file: String,
}

#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "extract", description = "Extract package contents")]
struct ExtractCommand {
    #[argh(positional)]
    file: String,

    /// components to extract (by index)
    #[argh(positional)]
    components: Vec<usize>,
}

#[derive(FromArgs, Debug)]
#[argh(subcommand, name = "version", description = "Print pldm-fw version")]
struct VersionCommand {}

fn duration_str(d: &chrono::Duration) -> String {
    let secs = d.num_seconds();
    if secs < 0 {
        "unknown".to_string()
    } else if secs > 86400 {
        format!("{} days", secs / 86400)
    } else {
        let mut s = secs;
        let h = s / 3600;
        s -= h * 3600;
        let m = s / 60;
        s -= m * 60;
        format!("{:02}:{:02}:{:02}", h, m, s)
    }
}

fn bps_str(bps: f32) -> String {
    const B_PER_MB: f32 = 1_000_000.0;
    #[allow(non_upper_case_globals)]
    const B_PER_kB: f32 = 1_000.0;
    let threshold = 0.8;

    if bps > (B_PER_MB * threshold) {
        format!("{:.2} MB/sec", bps / B_PER_MB)
    } else if bps > (B_PER_kB * threshold) {
        format!("{:.2} kB/sec", bps / B_PER_kB)
    } else {
        format!("{:.0} B/sec", bps)
    }
}

fn progress(p: &pldm_fw::UpdateTransferProgress) {
    if p.complete {
        println!(
            "Component {} transfer complete, duration {}, {}",
            p.component,
            duration_str(&p.duration),
            bps_str(p.bps)
        );
    } else {
        let (offset, len) = p.cur_xfer.unwrap_or((0, 0));
        println!(
            "Data request: offset 0x{:08x}, len 0x{:x}, {:2}% {}, {} remaining",
            offset,
            len,
            p.percent,
            bps_str(p.bps),
            duration_str(&p.remaining),
        );
    }
}

fn update(u: UpdateCommand) -> anyhow::Result<()> {
    let pkg = open_package(&u.file)?;

    println!("Proposed update for EID {} on bus {}:", u.eid, u.bus);
    println!("  Package version: {}", pkg.image_set_version());
    println!("  Components to update:");
    for (idx, cmp) in pkg.components.iter().enumerate() {
        if u.component.is_some_and(|id| id != cmp.identifier) {
            continue;
        }
        println!(
            "   {:2}: id {:04x}, version {}",
            idx, cmp.identifier, cmp.version
        );
    }

    if !(u.confirm || confirm_update()) {
        return Ok(());
    }

    let opts = UpdateOptions {
        classification_index: u.component_index,
        component: u.component,
        reset_stale_session: !u.no_reset,
        self_contained_activation: u.self_contained_activation,
    };

    let mut chan = connect(u.bus)?;
    pldm_fw::run_update(&mut chan, u.eid, &pkg, &opts, progress)
        .context("Update failed")?;
    println!("Update complete");
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args: Args = argh::from_env();

    let level = if args.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Warn
    };
    env_logger::Builder::new().filter_level(level).init();

    match args.command {
        Command::Update(u) => update(u)?,
        Command::Status(s) => {
            let mut chan = connect(s.bus)?;
            let st = pldm_fw::ua::get_status(&mut chan, s.eid)?;
            println!("Current state:  {:?}", st.current_state);
            println!("Previous state: {:?}", st.previous_state);
            println!("Progress:       {}%", st.progress_percent);
            println!("Reason code:    0x{:02x}", st.reason_code);
        }
        Command::Cancel(c) => {
            let mut chan = connect(c.bus)?;
            pldm_fw::ua::cancel_update(&mut chan, c.eid)?;
        }
        Command::PkgInfo(p) => {
            let pkg = open_package(&p.file)?;
            print_package(&pkg);
        }
        Command::Extract(e) => {
            let pkg = open_package(&e.file)?;
            if e.components.is_empty() {
                println!("No components specified to extract");
            }
            for idx in e.components {
                if let Err(e) = extract_component(&pkg, idx) {
                    println!("Error extracting: {:?}", e);
                }
            }
        }
        Command::Version(_) => {
            println!("pldm-fw version {}", env!("VERSION"));
        }
    }

    Ok(())
}
