//! The demo collection and its registry.
//!
//! Each demo is an independent entry point `fn(&mut Session) ->
//! Result<Artifact>`.  A [`Session`] lives for one run: it acquires its own
//! device on first use and holds the text corpus the histogram demos read.
//! The shell looks demos up by name with [`find`] and displays whatever
//! [`Artifact`] comes back.

use std::fmt;

use log::info;

use crate::bitmap::Bitmap;
use crate::error::{GpuError, Result};
use crate::GpuContext;

pub mod add;
pub mod compute_render;
pub mod dot_product;
pub mod heat_transfer;
pub mod histogram;
pub mod julia;
pub mod parallel_sum;
pub mod raytracing;
pub mod render;
pub mod ripple;
pub mod shared_bitmap;
pub mod timestamp_query;

/// Sample text used by the histogram demos when no corpus file is given.
pub const SAMPLE_CORPUS: &[u8] = include_bytes!("../../assets/sherlock.txt");

/// Short pangram text with digits, quotes and a tab.
pub const TEST_CORPUS: &[u8] = include_bytes!("../../assets/test.txt");

/// Bundled corpora by name.
pub const SAMPLES: &[(&str, &[u8])] = &[("sherlock", SAMPLE_CORPUS), ("test", TEST_CORPUS)];

pub fn sample(name: &str) -> Option<&'static [u8]> {
    SAMPLES
        .iter()
        .find(|(sample, _)| *sample == name)
        .map(|&(_, bytes)| bytes)
}

/// A demo that produces one frame per submit/readback cycle.
pub trait Animation {
    fn name(&self) -> &str;

    /// Run one cycle and return its frame.  Each call resolves before
    /// returning, so cycles never overlap.
    fn next_frame(&mut self) -> Result<Bitmap>;
}

/// What a demo hands back to the shell.
pub enum Artifact {
    Text(String),
    Image(Bitmap),
    Captioned { caption: String, image: Bitmap },
    Animation(Box<dyn Animation>),
}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Artifact::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Artifact::Image(image) => write!(f, "Image({}x{})", image.width, image.height),
            Artifact::Captioned { caption, image } => write!(
                f,
                "Captioned({caption:?}, {}x{})",
                image.width, image.height
            ),
            Artifact::Animation(animation) => write!(f, "Animation({})", animation.name()),
        }
    }
}

/// State owned by a single demo run.
pub struct Session {
    corpus: Vec<u8>,
    context: Option<GpuContext>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self::with_corpus(SAMPLE_CORPUS.to_vec())
    }

    pub fn with_corpus(corpus: Vec<u8>) -> Self {
        Self {
            corpus,
            context: None,
        }
    }

    pub fn corpus(&self) -> &[u8] {
        &self.corpus
    }

    /// The session's device, acquired on first use.
    pub fn gpu(&mut self) -> Result<&GpuContext> {
        if self.context.is_none() {
            self.context = Some(GpuContext::new_blocking()?);
        }
        self.context
            .as_ref()
            .ok_or_else(|| GpuError::UnsupportedBackend("device not acquired".into()))
    }

    /// Move the device out of the session, for artifacts that outlive the
    /// entry point call.
    pub fn take_gpu(&mut self) -> Result<GpuContext> {
        match self.context.take() {
            Some(context) => Ok(context),
            None => GpuContext::new_blocking(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    CudaByExample,
    Experiments,
    Fundamentals,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Category::CudaByExample => "cuda-by-example",
            Category::Experiments => "experiments",
            Category::Fundamentals => "fundamentals",
        })
    }
}

pub struct Demo {
    pub name: &'static str,
    pub category: Category,
    pub summary: &'static str,
    pub run: fn(&mut Session) -> Result<Artifact>,
}

impl fmt::Debug for Demo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Demo")
            .field("name", &self.name)
            .field("category", &self.category)
            .finish()
    }
}

static DEMOS: &[Demo] = &[
    Demo {
        name: "add",
        category: Category::CudaByExample,
        summary: "add two integers in a storage buffer",
        run: add::run,
    },
    Demo {
        name: "parallelsum-workgroups",
        category: Category::CudaByExample,
        summary: "vector sum, one workgroup per element",
        run: parallel_sum::run_workgroups,
    },
    Demo {
        name: "parallelsum-invocations",
        category: Category::CudaByExample,
        summary: "vector sum, one invocation per element in a single workgroup",
        run: parallel_sum::run_invocations,
    },
    Demo {
        name: "parallelsum-both",
        category: Category::CudaByExample,
        summary: "vector sum over workgroups and invocations",
        run: parallel_sum::run_both,
    },
    Demo {
        name: "juliaset-cpu",
        category: Category::CudaByExample,
        summary: "Julia set computed on the host",
        run: julia::run_cpu,
    },
    Demo {
        name: "juliaset-gpu",
        category: Category::CudaByExample,
        summary: "Julia set computed by a kernel",
        run: julia::run_gpu,
    },
    Demo {
        name: "ripple",
        category: Category::CudaByExample,
        summary: "animated ripple, one dispatch per frame",
        run: ripple::run,
    },
    Demo {
        name: "dotproduct",
        category: Category::CudaByExample,
        summary: "dot product with a shared-memory reduction",
        run: dot_product::run,
    },
    Demo {
        name: "sharedbitmap",
        category: Category::CudaByExample,
        summary: "workgroup-shared tile with a barrier",
        run: shared_bitmap::run,
    },
    Demo {
        name: "raytracing",
        category: Category::CudaByExample,
        summary: "orthographic ray-sphere hits, optionally timed",
        run: raytracing::run,
    },
    Demo {
        name: "heat-transfer",
        category: Category::CudaByExample,
        summary: "animated heat diffusion with ping-pong textures",
        run: heat_transfer::run,
    },
    Demo {
        name: "histogram-cpu",
        category: Category::CudaByExample,
        summary: "byte histogram on the host",
        run: histogram::run_cpu,
    },
    Demo {
        name: "histogram-gpu",
        category: Category::CudaByExample,
        summary: "byte histogram with shared atomics",
        run: histogram::run_gpu,
    },
    Demo {
        name: "compute-render",
        category: Category::Experiments,
        summary: "compute shader writing a storage texture",
        run: compute_render::run,
    },
    Demo {
        name: "timestamp-query",
        category: Category::Experiments,
        summary: "time a busy kernel with timestamp queries",
        run: timestamp_query::run,
    },
    Demo {
        name: "render",
        category: Category::Fundamentals,
        summary: "render pipeline drawing one triangle",
        run: render::run,
    },
];

pub fn registry() -> &'static [Demo] {
    DEMOS
}

pub fn find(name: &str) -> Result<&'static Demo> {
    DEMOS
        .iter()
        .find(|demo| demo.name == name)
        .ok_or_else(|| GpuError::UnknownDemo(name.to_owned()))
}

/// Look up `name` and run it in `session`.
pub fn run(name: &str, session: &mut Session) -> Result<Artifact> {
    let demo = find(name)?;
    info!("running {}/{}", demo.category, demo.name);
    (demo.run)(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn demo_names_are_unique() {
        let names: HashSet<_> = registry().iter().map(|demo| demo.name).collect();
        assert_eq!(names.len(), registry().len());
    }

    #[test]
    fn unknown_demo_is_reported() {
        assert!(matches!(find("nope"), Err(GpuError::UnknownDemo(name)) if name == "nope"));
        assert_eq!(find("dotproduct").unwrap().category, Category::CudaByExample);
    }

    #[test]
    fn host_only_demos_run_without_a_device() {
        let mut session = Session::with_corpus(b"aab\0c".to_vec());
        match run("histogram-cpu", &mut session).unwrap() {
            Artifact::Text(text) => {
                assert!(text.contains("\"a\": 2"));
                assert!(text.contains("\"c\": 1"));
            }
            other => panic!("unexpected artifact {other:?}"),
        }
    }

    #[test]
    fn sample_corpus_is_not_empty() {
        assert!(!SAMPLE_CORPUS.is_empty());
        assert_eq!(Session::new().corpus(), SAMPLE_CORPUS);
        assert_eq!(sample("test"), Some(TEST_CORPUS));
        assert_eq!(sample("sherlock"), Some(SAMPLE_CORPUS));
        assert_eq!(sample("moby"), None);
    }
}
