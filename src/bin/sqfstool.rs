// Copyright 2024 The sqfs Developers. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0

//! Command-line inspection of SquashFS v4.0 images: superblock stats,
//! directory listings, file contents and symlink targets.

use std::fs::OpenOptions;
use std::io::Write;

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use sqfs::{Entry, SquashFs};

fn image_arg() -> Arg {
    Arg::new("IMAGE")
        .help("path to the SquashFS image")
        .required(true)
        .index(1)
}

fn path_arg() -> Arg {
    Arg::new("PATH")
        .help("path inside the image")
        .required(true)
        .index(2)
}

fn open_image(matches: &ArgMatches) -> Result<SquashFs> {
    let path = matches.get_one::<String>("IMAGE").unwrap();
    let file = OpenOptions::new()
        .read(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path))?;

    SquashFs::open(file).with_context(|| format!("{} is not a readable SquashFS image", path))
}

/// Render a mode word the way `ls -l` does.
fn render_mode(mode: u32) -> String {
    let kind = match mode & 0o170000 {
        0o040000 => 'd',
        0o120000 => 'l',
        0o060000 => 'b',
        0o020000 => 'c',
        0o010000 => 'p',
        0o140000 => 's',
        _ => '-',
    };

    let mut out = String::new();
    out.push(kind);
    for shift in [6u32, 3, 0] {
        let bits = (mode >> shift) & 7;
        out.push(if bits & 4 != 0 { 'r' } else { '-' });
        out.push(if bits & 2 != 0 { 'w' } else { '-' });
        out.push(if bits & 1 != 0 { 'x' } else { '-' });
    }
    out
}

fn print_entry(entry: &Entry, name: &str) {
    println!(
        "{} {:>4} {:>4} {:>10}  {}",
        render_mode(entry.mode()),
        entry.uid(),
        entry.gid(),
        entry.size(),
        name,
    );
}

fn cmd_stats(matches: &ArgMatches) -> Result<()> {
    let path = matches.get_one::<String>("IMAGE").unwrap();
    let file = OpenOptions::new()
        .read(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path))?;

    let stats = sqfs::read_stats(&file)?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

fn cmd_ls(matches: &ArgMatches) -> Result<()> {
    let fs = open_image(matches)?;
    let path = matches.get_one::<String>("PATH").unwrap();

    let entry = fs.stat(path)?;
    if !entry.is_dir() {
        print_entry(&entry, path);
        return Ok(());
    }

    for child in fs.read_dir(path)? {
        let info = child.info()?;
        print_entry(&info, child.name());
    }
    Ok(())
}

fn cmd_stat(matches: &ArgMatches) -> Result<()> {
    let fs = open_image(matches)?;
    let path = matches.get_one::<String>("PATH").unwrap();

    let entry = if matches.get_flag("no-follow") {
        fs.lstat(path)?
    } else {
        fs.stat(path)?
    };

    println!("name:  {}", entry.name());
    println!("inode: {}", entry.ino());
    println!("mode:  {} ({:o})", render_mode(entry.mode()), entry.mode());
    println!("size:  {}", entry.size());
    println!("uid:   {}", entry.uid());
    println!("gid:   {}", entry.gid());
    println!("mtime: {}", entry.mtime());
    println!("links: {}", entry.nlink());
    if let Some(target) = entry.symlink_target() {
        println!("target: {}", target);
    }
    if let Some(device) = entry.device() {
        println!("device: {:#x}", device);
    }
    Ok(())
}

fn cmd_cat(matches: &ArgMatches) -> Result<()> {
    let fs = open_image(matches)?;
    let path = matches.get_one::<String>("PATH").unwrap();

    let data = fs.read_file(path)?;
    std::io::stdout().write_all(&data)?;
    Ok(())
}

fn cmd_readlink(matches: &ArgMatches) -> Result<()> {
    let fs = open_image(matches)?;
    let path = matches.get_one::<String>("PATH").unwrap();

    println!("{}", fs.read_link(path)?);
    Ok(())
}

fn main() -> Result<()> {
    let app = Command::new("sqfstool")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Inspect SquashFS v4.0 images")
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .help("trace, debug, info, warn or error")
                .default_value("warn")
                .global(true),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("stats")
                .about("Print superblock statistics as JSON")
                .arg(image_arg()),
        )
        .subcommand(
            Command::new("ls")
                .about("List a directory inside the image")
                .arg(image_arg())
                .arg(path_arg()),
        )
        .subcommand(
            Command::new("stat")
                .about("Show one entry's attributes")
                .arg(image_arg())
                .arg(path_arg())
                .arg(
                    Arg::new("no-follow")
                        .help("Do not follow a symlink in the final position")
                        .long("no-follow")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("cat")
                .about("Write a file's contents to stdout")
                .arg(image_arg())
                .arg(path_arg()),
        )
        .subcommand(
            Command::new("readlink")
                .about("Print a symlink's target")
                .arg(image_arg())
                .arg(path_arg()),
        );

    let matches = app.get_matches();

    let level = matches
        .get_one::<String>("log-level")
        .unwrap()
        .parse()
        .unwrap_or(log::LevelFilter::Warn);
    sqfs_utils::setup_logging(None, level).context("failed to set up logging")?;

    match matches.subcommand() {
        Some(("stats", m)) => cmd_stats(m),
        Some(("ls", m)) => cmd_ls(m),
        Some(("stat", m)) => cmd_stat(m),
        Some(("cat", m)) => cmd_cat(m),
        Some(("readlink", m)) => cmd_readlink(m),
        _ => unreachable!("subcommand is required"),
    }
}
