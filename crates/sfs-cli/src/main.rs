#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use serde::Serialize;
use sfs::{
    Command, EntryKind, FileByteDevice, FsConfig, FsUsage, Outcome, SfsError, SimFs, StatInfo,
    TreeNode,
};
use std::env;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Default)]
struct Options {
    config: Option<PathBuf>,
    size: Option<u64>,
    block_size: Option<u32>,
    direct: Option<u32>,
    image: Option<PathBuf>,
    keep_image: bool,
    json: bool,
}

/// One line of `--json` output.
#[derive(Debug, Serialize)]
struct JsonLine<'a> {
    verb: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    ok: Option<&'a Outcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    errno: Option<i32>,
}

fn main() {
    if let Err(error) = run() {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let mut args = env::args().skip(1);
    let mut opts = Options::default();
    let mut command = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => opts.config = Some(PathBuf::from(value(&mut args, &arg)?)),
            "--size" => opts.size = Some(number(&mut args, &arg)?),
            "--block-size" => opts.block_size = Some(number(&mut args, &arg)?),
            "--direct" => opts.direct = Some(number(&mut args, &arg)?),
            "--image" => opts.image = Some(PathBuf::from(value(&mut args, &arg)?)),
            "--keep-image" => opts.keep_image = true,
            "--json" => opts.json = true,
            "--help" | "-h" | "help" => {
                print_usage();
                return Ok(());
            }
            _ => {
                command = Some(arg);
                break;
            }
        }
    }

    match command.as_deref() {
        None | Some("shell") => {
            let mut fs = build_fs(&opts)?;
            let stdin = io::stdin();
            run_lines(&mut fs, stdin.lock(), opts.json)
        }
        Some("run") => {
            let Some(script) = args.next() else {
                bail!("run requires a script path");
            };
            let mut fs = build_fs(&opts)?;
            let file = std::fs::File::open(&script)
                .with_context(|| format!("failed to open script {script}"))?;
            run_lines(&mut fs, io::BufReader::new(file), opts.json)
        }
        Some(other) => {
            print_usage();
            bail!("unknown command: {other}")
        }
    }
}

fn value(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<String> {
    args.next()
        .with_context(|| format!("{flag} requires a value"))
}

fn number<T: std::str::FromStr>(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw = value(args, flag)?;
    raw.parse()
        .with_context(|| format!("{flag} expects a number, got {raw:?}"))
}

fn print_usage() {
    println!("sfs\n");
    println!("USAGE:");
    println!("  sfs [OPTIONS] [shell]          read commands from stdin");
    println!("  sfs [OPTIONS] run <script>     read commands from a file");
    println!();
    println!("OPTIONS:");
    println!("  --config <file.json>   fs_size / block_size / direct_blocks");
    println!("  --size <bytes>         total filesystem size");
    println!("  --block-size <bytes>   block size");
    println!("  --direct <n>           direct block slots per inode");
    println!("  --image <path>         back the store with an image file");
    println!("  --keep-image           leave the image file on exit");
    println!("  --json                 one JSON object per result");
    println!();
    println!("COMMANDS:");
    for (_, synopsis) in sfs::command::VERBS {
        println!("  {synopsis}");
    }
}

fn load_config(opts: &Options) -> Result<FsConfig> {
    let mut config = match &opts.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("invalid config {}", path.display()))?
        }
        None => FsConfig::default(),
    };
    if let Some(size) = opts.size {
        config.fs_size = size;
    }
    if let Some(block_size) = opts.block_size {
        config.block_size = block_size;
    }
    if let Some(direct) = opts.direct {
        config.direct_blocks = direct;
    }
    Ok(config)
}

fn build_fs(opts: &Options) -> Result<SimFs> {
    let config = load_config(opts)?;
    let geometry = config.geometry().context("invalid filesystem geometry")?;
    match &opts.image {
        Some(path) => {
            let dev = create_image(path, geometry.total_bytes(), opts.keep_image)?;
            SimFs::with_device(&config, Box::new(dev))
                .with_context(|| format!("failed to create filesystem on {}", path.display()))
        }
        None => SimFs::new(&config).context("failed to create in-memory filesystem"),
    }
}

fn create_image(path: &Path, len: u64, keep: bool) -> Result<FileByteDevice> {
    let dev = FileByteDevice::create(path, len)
        .with_context(|| format!("failed to create image {}", path.display()))?;
    Ok(if keep { dev.keep() } else { dev })
}

fn run_lines(fs: &mut SimFs, input: impl BufRead, json: bool) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for line in input.lines() {
        let line = line.context("failed to read command input")?;
        match Command::parse(&line) {
            Ok(None) => {}
            Ok(Some(command)) => {
                for result in fs.execute(&command) {
                    report(&mut out, command.verb(), &result, json)?;
                }
            }
            Err(err) => {
                let verb = line.split_whitespace().next().unwrap_or_default();
                report(&mut out, verb, &Err(err), json)?;
            }
        }
    }
    fs.sync().context("failed to flush backing store")?;
    out.flush().context("failed to flush stdout")
}

fn report(
    out: &mut impl Write,
    verb: &str,
    result: &sfs::Result<Outcome>,
    json: bool,
) -> Result<()> {
    if json {
        let line = match result {
            Ok(outcome) => JsonLine {
                verb,
                ok: Some(outcome),
                error: None,
                errno: None,
            },
            Err(err) => JsonLine {
                verb,
                ok: None,
                error: Some(err.to_string()),
                errno: Some(err.to_errno()),
            },
        };
        let text = serde_json::to_string(&line).context("serialize output")?;
        writeln!(out, "{text}")?;
        return Ok(());
    }

    match result {
        Ok(outcome) => print_outcome(out, outcome)?,
        Err(err @ SfsError::Usage { .. }) => writeln!(out, "{err}")?,
        Err(err) => {
            out.flush()?;
            eprintln!("{verb}: error: {err}");
        }
    }
    Ok(())
}

fn print_outcome(out: &mut impl Write, outcome: &Outcome) -> io::Result<()> {
    match outcome {
        Outcome::Opened(fd) => writeln!(out, "SUCCESS: fd = {fd}"),
        Outcome::Read(data) | Outcome::Contents(data) => {
            writeln!(out, "{}", String::from_utf8_lossy(data))
        }
        Outcome::Written(n) => writeln!(out, "wrote {n} bytes"),
        Outcome::Sought(offset) => writeln!(out, "cursor at {offset}"),
        Outcome::Closed(fd) => writeln!(out, "closed {fd}"),
        Outcome::Copied(n) => writeln!(out, "copied {n} bytes"),
        Outcome::Created(_)
        | Outcome::Removed(_)
        | Outcome::Changed(_)
        | Outcome::Linked { .. }
        | Outcome::Unlinked(_) => Ok(()),
        Outcome::Cwd(path) => writeln!(out, "{path}"),
        Outcome::Stat(info) => print_stat(out, info),
        Outcome::Listing(entries) => {
            for entry in entries {
                match entry.kind {
                    EntryKind::Directory => writeln!(out, "{}/", entry.name)?,
                    EntryKind::File => writeln!(out, "{}", entry.name)?,
                }
            }
            Ok(())
        }
        Outcome::Tree(node) => print_tree(out, node, 0),
        Outcome::Usage(usage) => print_usage_report(out, usage),
    }
}

fn print_stat(out: &mut impl Write, info: &StatInfo) -> io::Result<()> {
    match info {
        StatInfo::File {
            name,
            inode,
            links,
            size,
            blocks,
        } => {
            writeln!(out, "  File: {name}")?;
            writeln!(out, "  Type: file")?;
            writeln!(out, " Inode: {inode}")?;
            writeln!(out, " Links: {links}")?;
            writeln!(out, "  Size: {size}")?;
            writeln!(out, "Blocks: {blocks}")
        }
        StatInfo::Directory { name, entries } => {
            writeln!(out, "   File: {name}")?;
            writeln!(out, "   Type: directory")?;
            writeln!(out, "Entries: {entries}")
        }
    }
}

fn print_tree(out: &mut impl Write, node: &TreeNode, depth: usize) -> io::Result<()> {
    let indent = "  ".repeat(depth);
    match node.size {
        Some(size) => writeln!(out, "{indent}{} ({size} bytes)", node.name)?,
        None => writeln!(out, "{indent}{}/", node.name)?,
    }
    for child in &node.children {
        print_tree(out, child, depth + 1)?;
    }
    Ok(())
}

fn print_usage_report(out: &mut impl Write, usage: &FsUsage) -> io::Result<()> {
    writeln!(out, "block_size: {}", usage.block_size)?;
    writeln!(out, "total_blocks: {}", usage.total_blocks)?;
    writeln!(out, "free_blocks: {}", usage.free_blocks)?;
    writeln!(out, "used_blocks: {}", usage.used_blocks)?;
    writeln!(
        out,
        "free_extents: {} (largest {})",
        usage.free_extents, usage.largest_free_extent
    )?;
    writeln!(out, "inodes: {}", usage.inodes)?;
    writeln!(out, "entries: {}", usage.entries)?;
    writeln!(out, "open_files: {}", usage.open_files)
}
