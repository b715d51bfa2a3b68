pub mod args;

use save_tool::save::chunk::ChunkTable;
use save_tool::save::{NodeSummary, SaveFile};
use save_tool::types::{SaveConfig, SaveHeader};
use save_tool::utils;
use serde::Serialize;
use std::io::Write;

lazy_static::lazy_static! {
    static ref COUNTER: utils::counter::Counter = utils::counter::Counter::new();
}

#[derive(Serialize)]
struct InfoJson<'a> {
    file: &'a str,
    header: &'a SaveHeader,
    chunks: &'a ChunkTable,
    roots: &'a [usize],
    nodes: Vec<NodeSummary>,
}

fn build_config(arg: &args::Arg) -> SaveConfig {
    let mut config = if arg.opaque_only {
        SaveConfig::opaque_only()
    } else {
        SaveConfig::default()
    };
    if let Some(size) = arg.chunk_size {
        config = config.with_max_chunk_size(size);
    }
    if let Some(workers) = arg.workers {
        config = config.with_workers(workers);
    }
    config.with_compression_level(arg.compression_level)
}

fn output_path(filename: &str, output: &str, is_dir: bool, ext: Option<&str>) -> String {
    if !is_dir {
        return output.to_string();
    }
    let f = std::path::PathBuf::from(filename);
    let mut pb = std::path::PathBuf::from(output);
    if let Some(fname) = f.file_name() {
        pb.push(fname);
    }
    if let Some(ext) = ext {
        pb.set_extension(ext);
    }
    pb.to_string_lossy().into_owned()
}

fn load(filename: &str, config: &SaveConfig) -> anyhow::Result<SaveFile> {
    let mut file = SaveFile::new(config.clone());
    file.load_file(filename)?;
    Ok(file)
}

pub fn info_file(filename: &str, config: &SaveConfig, json: bool) -> anyhow::Result<()> {
    let file = load(filename, config)?;
    let tree = file.tree();
    if json {
        let info = InfoJson {
            file: filename,
            header: file.header(),
            chunks: file.chunks(),
            roots: tree.roots(),
            nodes: tree.summary(),
        };
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }
    let header = file.header();
    println!("{}", filename);
    println!(
        "Version: {}, {}, {}; header {} bytes; {} chunks, {} body bytes",
        header.version1,
        header.version2,
        header.version3,
        header.header_size,
        file.chunks().chunks.len(),
        file.chunks().decompressed_size()
    );
    println!("{} nodes, {} roots", tree.len(), tree.roots().len());
    for (depth, index) in tree.walk() {
        let Some(node) = tree.get(index) else {
            continue;
        };
        let summary = node.value().map(|v| v.summary()).unwrap_or_default();
        let codec = file.registry().codec_for(&node.name).display_name();
        if summary.is_empty() {
            println!(
                "{}[{}] {} ({} bytes) {}",
                "  ".repeat(depth + 1),
                node.id,
                node.name,
                node.true_size,
                codec
            );
        } else {
            println!(
                "{}[{}] {} ({} bytes) {}: {}",
                "  ".repeat(depth + 1),
                node.id,
                node.name,
                node.true_size,
                codec,
                summary
            );
        }
    }
    Ok(())
}

pub fn repack_file(
    filename: &str,
    output: &str,
    config: &SaveConfig,
    verify: bool,
) -> anyhow::Result<()> {
    eprintln!("Repacking {}", filename);
    let mut file = load(filename, config)?;
    let data = file.save()?;
    if verify {
        let mut check = SaveFile::new(config.clone());
        check.load(&data)?;
        if check.tree().summary() != file.tree().summary() {
            return Err(anyhow::anyhow!(
                "Node structure changed after repacking {}",
                filename
            ));
        }
        if check.header() != file.header() {
            return Err(anyhow::anyhow!("Header changed after repacking {}", filename));
        }
        eprintln!("Verified {} nodes", check.tree().len());
    }
    utils::files::make_sure_dir_exists(output)?;
    let mut f = utils::files::write_file(output)?;
    f.write_all(&data)?;
    f.flush()?;
    Ok(())
}

pub fn decompress_file(filename: &str, output: &str, config: &SaveConfig) -> anyhow::Result<()> {
    eprintln!("Decompressing {}", filename);
    let data = utils::files::read_file(filename)?;
    let body = save_tool::save::body_image(&data, config.workers)?;
    utils::files::make_sure_dir_exists(output)?;
    let mut f = utils::files::write_file(output)?;
    f.write_all(&body)?;
    f.flush()?;
    Ok(())
}

fn prepare_output_dir(output: &str) -> bool {
    let op = std::path::Path::new(output);
    if op.exists() {
        if !op.is_dir() {
            eprintln!("Output path is not a directory");
            return false;
        }
    } else if let Err(e) = std::fs::create_dir_all(op) {
        eprintln!("Failed to create {}: {}", output, e);
        return false;
    }
    true
}

fn report(filename: &str, action: &str, re: anyhow::Result<()>, backtrace: bool) {
    match re {
        Ok(_) => COUNTER.inc_ok(),
        Err(e) => {
            COUNTER.inc_error();
            eprintln!("Error {} {}: {:#}", action, filename, e);
            if backtrace {
                eprintln!("Backtrace: {}", e.backtrace());
            }
        }
    }
}

fn main() {
    let arg = args::parse_args();
    if arg.backtrace {
        unsafe { std::env::set_var("RUST_LIB_BACKTRACE", "1") };
    }
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();
    let config = build_config(&arg);
    let (input, output) = match &arg.command {
        args::Command::Info { input, .. } => (input, None),
        args::Command::Repack { input, output, .. } => (input, Some(output)),
        args::Command::Decompress { input, output } => (input, Some(output)),
    };
    let files = match utils::files::collect_files(input) {
        Ok(files) => files,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };
    let is_dir = std::path::Path::new(input).is_dir();
    if is_dir {
        if let Some(output) = output {
            if !prepare_output_dir(output) {
                std::process::exit(1);
            }
        }
    }
    for filename in files.iter() {
        match &arg.command {
            args::Command::Info { json, .. } => {
                report(
                    filename,
                    "reading",
                    info_file(filename, &config, *json),
                    arg.backtrace,
                );
            }
            args::Command::Repack { output, verify, .. } => {
                let out = output_path(filename, output, is_dir, None);
                report(
                    filename,
                    "repacking",
                    repack_file(filename, &out, &config, *verify),
                    arg.backtrace,
                );
            }
            args::Command::Decompress { output, .. } => {
                let out = output_path(filename, output, is_dir, Some("bin"));
                report(
                    filename,
                    "decompressing",
                    decompress_file(filename, &out, &config),
                    arg.backtrace,
                );
            }
        }
    }
    eprintln!("{}", *COUNTER);
    if COUNTER.errors() > 0 {
        std::process::exit(1);
    }
}
