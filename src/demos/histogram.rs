//! Byte histograms of a text corpus.
//!
//! The kernel views the corpus as 32-bit words, so the bytes are
//! zero-padded to a multiple of four first.  Padding lands in bin 0, which
//! every report skips along with any real NUL bytes.

use serde_json::{Map, Value};

use crate::buffer::pad_to_word;
use crate::compute::{Grid, RoundTrip};
use crate::demos::{Artifact, Session};
use crate::error::Result;
use crate::GpuContext;

pub type Histogram = [u32; 256];

pub const WORKGROUPS: u32 = 32;
pub const WORKGROUP_SIZE: usize = 256;

const SHADER: &str = r#"
@group(0) @binding(0) var<storage, read> data: array<u32>;
@group(0) @binding(1) var<storage, read_write> output: array<atomic<u32>, 256>;

var<workgroup> temp: array<atomic<u32>, 256>;

@compute @workgroup_size(256)
fn histogram(
    @builtin(local_invocation_id) iid: vec3<u32>,
    @builtin(workgroup_id) wid: vec3<u32>,
    @builtin(num_workgroups) groups: vec3<u32>,
) {
    var i = iid.x + wid.x * 256u;
    let stride = 256u * groups.x;

    while (i < arrayLength(&data)) {
        let word = data[i];
        atomicAdd(&temp[word & 0xffu], 1u);
        atomicAdd(&temp[(word >> 8u) & 0xffu], 1u);
        atomicAdd(&temp[(word >> 16u) & 0xffu], 1u);
        atomicAdd(&temp[(word >> 24u) & 0xffu], 1u);
        i += stride;
    }

    workgroupBarrier();

    atomicAdd(&output[iid.x], atomicLoad(&temp[iid.x]));
}
"#;

/// Sequential count of every byte value.
pub fn histogram_cpu(bytes: &[u8]) -> Histogram {
    let mut histo = [0u32; 256];
    for &byte in bytes {
        histo[byte as usize] += 1;
    }
    histo
}

/// Host model of the kernel: padded words, grid-stride scan per
/// invocation, per-group counters merged into the global table.
pub fn histogram_grouped(bytes: &[u8], groups: usize) -> Histogram {
    let words: Vec<u32> = bytemuck::pod_collect_to_vec(&pad_to_word(bytes));
    let mut global = [0u32; 256];
    for group in 0..groups {
        let mut local = [0u32; 256];
        for lane in 0..WORKGROUP_SIZE {
            for &word in words
                .iter()
                .skip(group * WORKGROUP_SIZE + lane)
                .step_by(WORKGROUP_SIZE * groups)
            {
                for byte in word.to_le_bytes() {
                    local[byte as usize] += 1;
                }
            }
        }
        for (total, count) in global.iter_mut().zip(local) {
            *total += count;
        }
    }
    global
}

pub fn histogram_gpu(context: &GpuContext, bytes: &[u8]) -> Result<Histogram> {
    let mut histo = [0u32; 256];
    if bytes.is_empty() {
        return Ok(histo);
    }
    let words: Vec<u32> = bytemuck::pod_collect_to_vec(&pad_to_word(bytes));
    let counts: Vec<u32> = RoundTrip::new(SHADER, "histogram")
        .input(0, &words)
        .output(1, std::mem::size_of::<Histogram>())
        .grid(Grid::linear(WORKGROUPS))
        .run_typed(context)?;
    for (slot, count) in histo.iter_mut().zip(counts) {
        *slot = count;
    }
    Ok(histo)
}

/// Sum of all reported bins, i.e. every bin except byte 0.
pub fn reported_total(histo: &Histogram) -> u64 {
    histo[1..].iter().map(|&count| count as u64).sum()
}

/// Pretty-printed JSON object of the non-zero counts for bytes 1..=255,
/// keyed by the byte as a Latin-1 character.  Digit keys come first, then
/// the rest in byte order, which is how a JavaScript object orders its
/// integer-like keys.
pub fn report(histo: &Histogram) -> String {
    let (digits, rest): (Vec<_>, Vec<_>) = histo
        .iter()
        .enumerate()
        .skip(1)
        .filter(|&(_, &count)| count != 0)
        .partition(|&(byte, _)| (byte as u8).is_ascii_digit());
    let counts: Map<String, Value> = digits
        .into_iter()
        .chain(rest)
        .map(|(byte, &count)| ((byte as u8 as char).to_string(), Value::from(count)))
        .collect();
    format!("{:#}", Value::Object(counts))
}

pub fn run_cpu(session: &mut Session) -> Result<Artifact> {
    Ok(Artifact::Text(report(&histogram_cpu(session.corpus()))))
}

pub fn run_gpu(session: &mut Session) -> Result<Artifact> {
    let corpus = session.corpus().to_vec();
    let histo = histogram_gpu(session.gpu()?, &corpus)?;
    Ok(Artifact::Text(report(&histo)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demos::SAMPLE_CORPUS;

    fn zero_bytes(bytes: &[u8]) -> u64 {
        bytes.iter().filter(|&&b| b == 0).count() as u64
    }

    #[test]
    fn reported_total_excludes_nul() {
        let input = b"hello\0world\0\0";
        let histo = histogram_cpu(input);
        assert_eq!(
            reported_total(&histo),
            input.len() as u64 - zero_bytes(input)
        );
    }

    #[test]
    fn grouped_and_sequential_agree_on_reported_bins() {
        assert_ne!(SAMPLE_CORPUS.len() % 4, 0, "corpus should exercise padding");
        let sequential = histogram_cpu(SAMPLE_CORPUS);
        let grouped = histogram_grouped(SAMPLE_CORPUS, WORKGROUPS as usize);
        assert_eq!(sequential[1..], grouped[1..]);
        assert_eq!(
            reported_total(&grouped),
            SAMPLE_CORPUS.len() as u64 - zero_bytes(SAMPLE_CORPUS)
        );
    }

    #[test]
    fn padding_only_touches_bin_zero() {
        let input = b"abcde";
        let grouped = histogram_grouped(input, 3);
        assert_eq!(grouped[0], 3);
        assert_eq!(reported_total(&grouped), 5);
    }

    #[test]
    fn report_lists_nonzero_bins_in_byte_order() {
        let histo = histogram_cpu(b"b\"a\0a\n");
        assert_eq!(report(&histo), "{\n  \"\\n\": 1,\n  \"\\\"\": 1,\n  \"a\": 2,\n  \"b\": 1\n}");
        assert_eq!(report(&histogram_cpu(b"\0\0")), "{}");
    }

    #[test]
    fn report_puts_digit_keys_first() {
        let histo = histogram_cpu(b"a 9 1 11");
        assert_eq!(
            report(&histo),
            "{\n  \"1\": 3,\n  \"9\": 1,\n  \" \": 3,\n  \"a\": 1\n}"
        );
    }

    #[test]
    fn report_is_valid_json() {
        let histo = histogram_cpu(crate::demos::TEST_CORPUS);
        let parsed: Value = serde_json::from_str(&report(&histo)).unwrap();
        let object = parsed.as_object().unwrap();
        assert_eq!(object["\t"], 1);
        let total: u64 = object.values().map(|v| v.as_u64().unwrap()).sum();
        assert_eq!(total, reported_total(&histo));
    }
}
