//! Command-line shell for the demo collection.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use wgpu_by_example::demos::{self, Artifact, Session};
use wgpu_by_example::Bitmap;

#[derive(Parser)]
#[command(name = "wgpu-by-example")]
#[command(version, about = "GPU programming demos on wgpu")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the available demos.
    List,

    /// Run one demo.
    Run {
        /// Demo name, as printed by `list`.
        demo: String,

        /// Directory for image output.
        #[arg(short, long, default_value = "out")]
        out: PathBuf,

        /// Number of frames to render for animated demos.
        #[arg(short, long, default_value_t = 3)]
        frames: u32,

        /// Text file for the histogram demos instead of the bundled sample.
        #[arg(short, long)]
        corpus: Option<PathBuf>,

        /// Bundled corpus for the histogram demos (`sherlock` or `test`).
        #[arg(short, long, conflicts_with = "corpus")]
        sample: Option<String>,
    },
}

fn list() {
    for demo in demos::registry() {
        println!("{:<26} {:<16} {}", demo.name, demo.category, demo.summary);
    }
}

fn save(image: &Bitmap, out: &Path, name: &str) -> Result<()> {
    fs::create_dir_all(out).with_context(|| format!("creating {}", out.display()))?;
    let path = out.join(format!("{name}.png"));
    image
        .save_png(&path)
        .with_context(|| format!("writing {}", path.display()))?;
    println!("wrote {}", path.display());
    Ok(())
}

fn session(corpus: Option<&Path>, sample: Option<&str>) -> Result<Session> {
    if let Some(path) = corpus {
        let bytes = fs::read(path).with_context(|| format!("reading corpus {}", path.display()))?;
        return Ok(Session::with_corpus(bytes));
    }
    match sample {
        Some(name) => {
            let bytes = demos::sample(name).with_context(|| format!("no bundled corpus `{name}`"))?;
            Ok(Session::with_corpus(bytes.to_vec()))
        }
        None => Ok(Session::new()),
    }
}

fn run(name: &str, out: &Path, frames: u32, mut session: Session) -> Result<()> {

    let artifact = demos::run(name, &mut session).with_context(|| format!("demo `{name}` failed"))?;
    match artifact {
        Artifact::Text(text) => println!("{text}"),
        Artifact::Image(image) => save(&image, out, name)?,
        Artifact::Captioned { caption, image } => {
            println!("{caption}");
            save(&image, out, name)?;
        }
        Artifact::Animation(mut animation) => {
            for frame in 0..frames {
                let image = animation
                    .next_frame()
                    .with_context(|| format!("frame {frame} of `{}`", animation.name()))?;
                save(&image, out, &format!("{name}-{frame:03}"))?;
            }
            info!("{} frames of `{name}` rendered", frames);
        }
    }
    Ok(())
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::List => {
            list();
            Ok(())
        }
        Commands::Run {
            demo,
            out,
            frames,
            corpus,
            sample,
        } => session(corpus.as_deref(), sample.as_deref())
            .and_then(|session| run(&demo, &out, frames, session)),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
