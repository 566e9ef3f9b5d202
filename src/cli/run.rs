//! Subcommand dispatch and key-stream processing.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};

use crate::cli::args::{Cli, Command};
use crate::cli::set_display_level;
use crate::displaylevel;
use crate::file::{FILE_PRELOAD, FILE_READONLY, FILE_TRUNCATE};
use crate::sketch::{Sketch, SketchMode};

/// Execute the parsed command line. Returns an error for the caller to
/// print; the exit code is its presence.
pub fn run(cli: Cli) -> anyhow::Result<()> {
    if cli.quiet {
        set_display_level(1);
    } else {
        set_display_level(2 + u32::from(cli.verbose));
    }

    match cli.command {
        Command::Create {
            sketch,
            width,
            max_value,
            seed,
            truncate,
        } => {
            let flags = if truncate { FILE_TRUNCATE } else { 0 };
            let created = Sketch::create(width, max_value, Some(&sketch), flags, seed)
                .with_context(|| format!("cannot create sketch {}", sketch.display()))?;
            displaylevel!(
                3,
                "created {} (width {}, max value {})",
                sketch.display(),
                created.width(),
                created.max_value()
            );
            Ok(())
        }
        Command::Get {
            sketch,
            files,
            preload,
        } => {
            let sketch = open_sketch(&sketch, FILE_READONLY | preload_flag(preload))?;
            let stdout = io::stdout().lock();
            let mut out = BufWriter::new(stdout);
            for_each_line(&files, |line| {
                let value = sketch.get(line.as_bytes());
                writeln!(out, "{line}\t{value}").context("cannot write to stdout")
            })?;
            out.flush().context("cannot write to stdout")
        }
        Command::Set {
            sketch,
            files,
            preload,
        } => {
            let mut sketch = open_sketch(&sketch, preload_flag(preload))?;
            for_each_line(&files, |line| {
                let (key, value) = split_key_value(line)?;
                sketch.set(key.as_bytes(), value);
                Ok(())
            })
        }
        Command::Inc {
            sketch,
            files,
            preload,
        } => {
            let mut sketch = open_sketch(&sketch, preload_flag(preload))?;
            for_each_line(&files, |line| {
                sketch.inc(line.as_bytes());
                Ok(())
            })
        }
        Command::Add {
            sketch,
            files,
            preload,
        } => {
            let mut sketch = open_sketch(&sketch, preload_flag(preload))?;
            for_each_line(&files, |line| {
                let (key, value) = split_key_value(line)?;
                sketch.add(key.as_bytes(), value);
                Ok(())
            })
        }
        Command::Info { sketch } => {
            let opened = open_sketch(&sketch, FILE_READONLY)?;
            let stdout = io::stdout().lock();
            let mut out = BufWriter::new(stdout);
            print_info(&mut out, &sketch, &opened).context("cannot write to stdout")
        }
    }
}

fn preload_flag(preload: bool) -> u32 {
    if preload {
        FILE_PRELOAD
    } else {
        0
    }
}

fn open_sketch(path: &Path, flags: u32) -> anyhow::Result<Sketch> {
    let sketch = Sketch::open(path, flags)
        .with_context(|| format!("cannot open sketch {}", path.display()))?;
    displaylevel!(
        3,
        "opened {} (width {}, depth {}, {} bytes)",
        path.display(),
        sketch.width(),
        sketch.depth(),
        sketch.file_size()
    );
    Ok(sketch)
}

/// Feed every line of the given files (or stdin, when none) to `handle`.
fn for_each_line(
    files: &[PathBuf],
    mut handle: impl FnMut(&str) -> anyhow::Result<()>,
) -> anyhow::Result<()> {
    if files.is_empty() {
        let stdin = io::stdin().lock();
        return drain(stdin, &mut handle).context("error reading stdin");
    }
    for path in files {
        let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
        drain(BufReader::new(file), &mut handle)
            .with_context(|| format!("error reading {}", path.display()))?;
    }
    Ok(())
}

fn drain(
    reader: impl BufRead,
    handle: &mut impl FnMut(&str) -> anyhow::Result<()>,
) -> anyhow::Result<()> {
    for line in reader.lines() {
        handle(&line?)?;
    }
    Ok(())
}

/// Split a `key<TAB>value` line on its last tab.
fn split_key_value(line: &str) -> anyhow::Result<(&str, u64)> {
    let Some((key, value)) = line.rsplit_once('\t') else {
        bail!("malformed line (expected key<TAB>value): {line:?}");
    };
    let value = value
        .parse::<u64>()
        .with_context(|| format!("malformed count in line {line:?}"))?;
    Ok((key, value))
}

fn print_info(out: &mut impl Write, path: &Path, sketch: &Sketch) -> io::Result<()> {
    writeln!(out, "Path: {}", path.display())?;
    writeln!(
        out,
        "Width: {} {}",
        sketch.width(),
        if sketch.width_mask() != 0 {
            "(fast index path)"
        } else {
            "(generic index path)"
        }
    )?;
    writeln!(out, "Depth: {}", sketch.depth())?;
    writeln!(out, "MaxValue: {}", sketch.max_value())?;
    writeln!(out, "ValueSize: {}", sketch.value_size())?;
    writeln!(out, "Seed: {}", sketch.seed())?;
    writeln!(out, "TableSize: {}", sketch.table_size())?;
    writeln!(out, "FileSize: {}", sketch.file_size())?;
    writeln!(
        out,
        "Mode: {}",
        match sketch.mode() {
            SketchMode::Exact => "exact",
            SketchMode::Approx => "approx",
        }
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_value_lines_split_on_the_last_tab() {
        assert_eq!(split_key_value("banana\t2").unwrap(), ("banana", 2));
        assert_eq!(
            split_key_value("tab\tin\tkey\t10").unwrap(),
            ("tab\tin\tkey", 10)
        );
        assert!(split_key_value("no tab").is_err());
        assert!(split_key_value("key\tnot-a-number").is_err());
    }
}
