use clap::{Parser, Subcommand};
use sarc::codec::{CodecId, DEFAULT_COMPRESSION_LEVEL};
use sarc::{ContainerFile, ContainerOptions};
use std::path::PathBuf;
use tracing::warn;

#[derive(Parser)]
#[command(name = "sarc", about = "Append-only streaming container CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Append one or more files to a container (created if missing)
    Add {
        container: PathBuf,
        #[arg(required = true, num_args = 1..)]
        input: Vec<PathBuf>,
        /// Codec: zstd (default), lz4, none
        #[arg(short, long, default_value = "zstd")]
        codec: String,
        /// Compression level (zstd only)
        #[arg(short, long, default_value_t = DEFAULT_COMPRESSION_LEVEL)]
        level: i32,
        /// Store payloads uncompressed
        #[arg(long)]
        no_compress: bool,
    },
    /// List stored names in physical order
    List {
        container: PathBuf,
        /// Emit the index entries as JSON
        #[arg(long)]
        json: bool,
    },
    /// Extract one file by name, or every file with --all
    Extract {
        container: PathBuf,
        name: Option<String>,
        #[arg(short = 'C', long, default_value = ".")]
        output_dir: PathBuf,
        #[arg(short, long)]
        all: bool,
    },
    /// Remove files by name (rewrites the container)
    Remove {
        container: PathBuf,
        #[arg(required = true, num_args = 1..)]
        names: Vec<String>,
        /// Directory to stage the rewritten container in
        #[arg(long)]
        temp_dir: Option<PathBuf>,
    },
    /// List names matching a regular expression
    Search {
        container: PathBuf,
        pattern: String,
    },
    /// Print the folder tree of stored names
    Tree {
        container: PathBuf,
    },
    /// Show container summary
    Info {
        container: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {

        // ── Add ──────────────────────────────────────────────────────────────
        Commands::Add { container, input, codec, level, no_compress } => {
            let opts = ContainerOptions {
                codec: parse_codec(&codec),
                level,
                compress: !no_compress,
                temp_dir: None,
            };
            let mut c = ContainerFile::open_with_options(&container, opts)?;
            for path in &input {
                let entry = c.add_source_file(path)?;
                println!("  added  {} ({} B)", entry.name, entry.length);
            }
            println!("Container: {} ({} entries)", container.display(), c.index().len());
        }

        // ── List ─────────────────────────────────────────────────────────────
        Commands::List { container, json } => {
            let c = ContainerFile::open(&container)?;
            if json {
                println!("{}", serde_json::to_string_pretty(c.index().all())?);
            } else {
                println!("{:>12} {:>12}  Name", "Offset", "Stored");
                for e in c.index() {
                    println!("{:>12} {:>12}  {}", e.data_start, e.length, e.name);
                }
            }
        }

        // ── Extract ──────────────────────────────────────────────────────────
        Commands::Extract { container, name, output_dir, all } => {
            let c = ContainerFile::open(&container)?;
            if all {
                for path in c.extract_all(&output_dir)? {
                    println!("  extracted  {}", path.display());
                }
            } else {
                let name = name.ok_or("a name or --all is required")?;
                let record = c.get_file(&name)?;
                std::fs::create_dir_all(&output_dir)?;
                let out = record.output_path(&output_dir)?;
                record.save_to(&out)?;
                println!("  extracted  {}", out.display());
            }
        }

        // ── Remove ───────────────────────────────────────────────────────────
        Commands::Remove { container, names, temp_dir } => {
            let opts = ContainerOptions { temp_dir, ..ContainerOptions::default() };
            let mut c = ContainerFile::open_with_options(&container, opts)?;
            let removed = c.remove_names(&names)?;
            println!("Removed {removed} entr{}; {} remain", if removed == 1 { "y" } else { "ies" }, c.index().len());
        }

        // ── Search ───────────────────────────────────────────────────────────
        Commands::Search { container, pattern } => {
            let c = ContainerFile::open(&container)?;
            for e in c.index().search(&pattern)? {
                println!("{}", e.name);
            }
        }

        // ── Tree ─────────────────────────────────────────────────────────────
        Commands::Tree { container } => {
            let c = ContainerFile::open(&container)?;
            print!("{}", c.index().directory_tree().render());
        }

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { container } => {
            let c = ContainerFile::open(&container)?;
            let index = c.index();
            let stored: u64 = index.iter().map(|e| e.length).sum();
            let overhead: u64 = index.iter().map(|e| 2 + e.header_len as u64).sum();

            println!("── Container ────────────────────────────────────────────");
            println!("  Path           {}", container.display());
            println!("  Size           {} B", c.size_on_disk()?);
            println!("  Entries        {}", index.len());
            println!("  Directories    {}", index.directories().len());
            println!("  Payload bytes  {} B", stored);
            println!("  Header bytes   {} B", overhead);
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn parse_codec(s: &str) -> CodecId {
    CodecId::from_name(s).unwrap_or_else(|| {
        warn!(codec = s, "unknown codec, defaulting to zstd");
        CodecId::Zstd
    })
}
