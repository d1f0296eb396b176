//! Per-engine progress scrapers.
//!
//! Each compute engine reports progress in its own log format. The agent
//! only needs one [`ProgressSample`] per exponent, so every variant reads the
//! tail of its log and keeps the low median of the most recent speed
//! figures.

use anyhow::Result;
use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};

use crate::assignment::queue::read_lines;
use crate::progress::sample::ProgressSample;

const SPEED_SAMPLES: usize = 5;
const GPUOWL_SCAN_LIMIT: usize = 20;

fn pattern(source: &str) -> Regex {
    Regex::new(source).expect("engine log pattern compiles")
}

static MLUCAS_ITER: Lazy<Regex> = Lazy::new(|| {
    pattern(r"(Iter#|S1|S2)(?: bit| at q)? = ([0-9]+) \[ ?([0-9]+\.[0-9]+)% complete\] .*\[ *([0-9]+\.[0-9]+) (m?sec)/iter\]")
});
static MLUCAS_FFT: Lazy<Regex> = Lazy::new(|| pattern(r"FFT length [0-9]{3,}K = ([0-9]{6,})"));
static MLUCAS_S2_START: Lazy<Regex> = Lazy::new(|| pattern(r"Stage 2 q0 = ([0-9]+)"));

static GPUOWL_LINE: Lazy<Regex> = Lazy::new(|| pattern(r"([0-9]{7,}) (LL|P1|OK|EE)? +([0-9]{5,})"));
static GPUOWL_US: Lazy<Regex> = Lazy::new(|| pattern(r"\b([0-9]+) us/it;?\b"));
static GPUOWL_FFT: Lazy<Regex> =
    Lazy::new(|| pattern(r"\b[0-9]{7,} FFT: ([0-9]+(?:\.[0-9]+)?[KM])\b"));
static GPUOWL_BITS: Lazy<Regex> = Lazy::new(|| {
    pattern(r"\b[0-9]{7,} P1(?: B1=[0-9]+, B2=[0-9]+;|\([0-9]+(?:\.[0-9])?M?\)) ([0-9]+) bits;?\b")
});
static GPUOWL_BLOCKS: Lazy<Regex> = Lazy::new(|| {
    pattern(r"[0-9]{7,} P2\([0-9]+(?:\.[0-9])?M?,[0-9]+(?:\.[0-9])?M?\) ([0-9]+) blocks: ([0-9]+) - ([0-9]+);")
});
static GPUOWL_P1_MARK: Lazy<Regex> = Lazy::new(|| pattern(r"\| P1\([0-9]+(?:\.[0-9])?M?\)"));
static GPUOWL_P2: Lazy<Regex> = Lazy::new(|| {
    pattern(r"[0-9]{7,} P2(?: ([0-9]+)/([0-9]+)|\([0-9]+(?:\.[0-9])?M?,[0-9]+(?:\.[0-9])?M?\) OK @([0-9]+)):")
});

static CUDA_EXPONENT: Lazy<Regex> = Lazy::new(|| pattern(r"\bM([0-9]{7,})\b"));
static CUDA_ITER: Lazy<Regex> = Lazy::new(|| pattern(r"\b[0-9]{5,}\b"));
static CUDA_MS: Lazy<Regex> = Lazy::new(|| pattern(r"\b[0-9]+\.[0-9]{1,5}\b"));
static CUDA_ETA: Lazy<Regex> =
    Lazy::new(|| pattern(r"\b(?:(?:([0-9]+):)?([0-9]{1,2}):)?([0-9]{1,2}):([0-9]{2})\b"));
static CUDA_FFT: Lazy<Regex> = Lazy::new(|| pattern(r"\b([0-9]{3,})K\b"));

/// Anything that can report progress for an exponent in a work directory.
pub trait ProgressSource: Send + Sync {
    fn read_sample<'a>(&'a self, dir: &'a Path, exponent: u64) -> BoxFuture<'a, Result<ProgressSample>>;
}

/// The supported engines and where each one logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineLog {
    /// `p<exponent>.stat` in the work directory.
    Mlucas,
    /// `gpuowl.log` in the work directory.
    GpuOwl,
    /// The configured console output file.
    CudaLucas { output_file: PathBuf },
}

impl EngineLog {
    pub fn program_name(&self) -> &'static str {
        match self {
            EngineLog::Mlucas => "Mlucas",
            EngineLog::GpuOwl => "GpuOwl",
            EngineLog::CudaLucas { .. } => "CUDALucas",
        }
    }

    pub fn program_version(&self) -> &'static str {
        match self {
            EngineLog::Mlucas => "20.1.1",
            EngineLog::GpuOwl => "7.2.1",
            EngineLog::CudaLucas { .. } => "2.06",
        }
    }

    /// Log file consulted for `exponent`.
    pub fn log_path(&self, dir: &Path, exponent: u64) -> PathBuf {
        match self {
            EngineLog::Mlucas => dir.join(format!("p{exponent}.stat")),
            EngineLog::GpuOwl => dir.join("gpuowl.log"),
            EngineLog::CudaLucas { output_file } => dir.join(output_file),
        }
    }

    /// Whether results from this engine come as one-line legacy records.
    pub fn writes_legacy_results(&self) -> bool {
        matches!(self, EngineLog::CudaLucas { .. })
    }

    /// Whether the engine can run work of type `code`.
    pub fn supports_work_type(&self, code: u32) -> bool {
        match self {
            EngineLog::CudaLucas { .. } => matches!(code, 100 | 101 | 150),
            EngineLog::Mlucas | EngineLog::GpuOwl => matches!(code, 100 | 101 | 150 | 4),
        }
    }

    pub fn parse(&self, lines: &[String], exponent: u64) -> ProgressSample {
        match self {
            EngineLog::Mlucas => parse_mlucas(lines),
            EngineLog::GpuOwl => parse_gpuowl(lines, exponent),
            EngineLog::CudaLucas { .. } => parse_cudalucas(lines, exponent),
        }
    }
}

impl ProgressSource for EngineLog {
    fn read_sample<'a>(&'a self, dir: &'a Path, exponent: u64) -> BoxFuture<'a, Result<ProgressSample>> {
        Box::pin(async move {
            let path = self.log_path(dir, exponent);
            let lines = read_lines(&path).await?;
            if lines.is_empty() {
                tracing::debug!(path = %path.display(), exponent, "no engine log to read progress from");
                return Ok(ProgressSample::idle());
            }
            Ok(self.parse(&lines, exponent))
        })
    }
}

fn median_low(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    Some(values[(values.len() - 1) / 2])
}

fn capture_u64(captures: &regex::Captures<'_>, index: usize) -> u64 {
    captures
        .get(index)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

fn capture_f64(captures: &regex::Captures<'_>, index: usize) -> f64 {
    captures
        .get(index)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0.0)
}

pub fn parse_mlucas(lines: &[String]) -> ProgressSample {
    let mut found = 0;
    let mut iteration = 0u64;
    let mut percent = 0.0f64;
    let mut bits = 0u64;
    let mut stage2 = 0u64;
    let mut fft_length = None;
    let mut speeds = Vec::new();

    for line in lines.iter().rev() {
        let iter_match = MLUCAS_ITER.captures(line);
        if let Some(captures) = iter_match.filter(|_| found < SPEED_SAMPLES) {
            found += 1;
            let tag = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
            if found == 1 {
                iteration = capture_u64(&captures, 2);
                percent = capture_f64(&captures, 3);
                if tag == "S1" && percent > 0.0 {
                    bits = (iteration as f64 / (percent / 100.0)) as u64;
                } else if tag == "S2" {
                    stage2 = iteration;
                }
            }
            if (bits == 0 || tag == "S1") && (stage2 == 0 || tag == "S2") {
                let mut ms = capture_f64(&captures, 4);
                if captures.get(5).map(|m| m.as_str()) == Some("sec") {
                    ms *= 1000.0;
                }
                speeds.push(ms);
            }
        } else if let Some(captures) = MLUCAS_S2_START.captures(line).filter(|_| stage2 > 0) {
            if percent > 0.0 {
                let start = capture_u64(&captures, 1) as f64;
                let span = (iteration as f64 - start).max(0.0);
                stage2 = (span / (percent / 100.0) / 20.0) as u64;
                iteration = (stage2 as f64 * (percent / 100.0)) as u64;
            }
        } else if fft_length.is_none() {
            if let Some(captures) = MLUCAS_FFT.captures(line) {
                fft_length = Some(capture_u64(&captures, 1));
            }
        }
        if found == SPEED_SAMPLES && fft_length.is_some() {
            break;
        }
    }

    if found == 0 {
        return ProgressSample {
            fft_length,
            stage1_bits: bits,
            stage2_units: stage2,
            ..ProgressSample::default()
        };
    }
    ProgressSample {
        iteration,
        ms_per_iter: median_low(&mut speeds),
        fft_length,
        stage1_bits: bits,
        stage2_units: stage2,
    }
}

fn gpuowl_fft_length(text: &str) -> Option<u64> {
    let (number, unit) = text.split_at(text.len().checked_sub(1)?);
    let value: f64 = number.parse().ok()?;
    let scale = match unit {
        "K" => 1024.0,
        "M" => 1024.0 * 1024.0,
        _ => 1.0,
    };
    Some((value * scale) as u64)
}

pub fn parse_gpuowl(lines: &[String], exponent: u64) -> ProgressSample {
    let mut found = 0usize;
    let mut iteration = 0u64;
    let mut fft_length = None;
    let mut in_p1 = false;
    let mut in_p2 = false;
    let mut buffers = 0u64;
    let mut bits = 0u64;
    let mut speeds_us: Vec<f64> = Vec::new();

    for line in lines.iter().rev() {
        let line_match = GPUOWL_LINE.captures(line);
        if let Some(captures) = &line_match {
            if capture_u64(captures, 1) != exponent {
                if found == 0 {
                    tracing::debug!(exponent, found = capture_u64(captures, 1), "log belongs to another exponent");
                }
                break;
            }
        }
        let us = GPUOWL_US.captures(line);

        if let Some(captures) = GPUOWL_P2.captures(line) {
            found += 1;
            if found == 1 {
                if captures.get(3).is_some() {
                    iteration = capture_u64(&captures, 3);
                    in_p2 = true;
                } else {
                    iteration = capture_u64(&captures, 1);
                    buffers = capture_u64(&captures, 2);
                }
            }
        } else if let (Some(captures), Some(us), true) =
            (&line_match, &us, found < GPUOWL_SCAN_LIMIT)
        {
            found += 1;
            let tag = captures.get(2).map(|m| m.as_str());
            let current = capture_u64(captures, 3);
            if found == 1 {
                iteration = current;
                in_p1 = tag == Some("P1");
            } else if current > iteration {
                break;
            }
            if !in_p1 && !(in_p2 || buffers > 0) {
                in_p1 = tag == Some("OK") && GPUOWL_P1_MARK.is_match(line);
            }
            if speeds_us.len() < SPEED_SAMPLES {
                speeds_us.push(capture_f64(us, 1));
            }
        } else if let Some(captures) = GPUOWL_BLOCKS.captures(line).filter(|_| in_p2) {
            if buffers == 0 {
                buffers = capture_u64(&captures, 1);
                iteration = iteration.saturating_sub(capture_u64(&captures, 2));
            }
        } else if let Some(captures) = GPUOWL_BITS.captures(line).filter(|_| in_p1) {
            if bits == 0 {
                bits = capture_u64(&captures, 1);
                iteration = iteration.min(bits);
            }
        } else if fft_length.is_none() {
            if let Some(captures) = GPUOWL_FFT.captures(line) {
                fft_length = captures.get(1).and_then(|m| gpuowl_fft_length(m.as_str()));
            }
        }

        let scanned_enough =
            found == GPUOWL_SCAN_LIMIT && !in_p2 && (!in_p1 || bits > 0);
        if (buffers > 0 || scanned_enough) && fft_length.is_some() {
            break;
        }
    }

    if found == 0 {
        return ProgressSample {
            fft_length,
            stage1_bits: bits,
            stage2_units: buffers,
            ..ProgressSample::default()
        };
    }
    ProgressSample {
        iteration,
        ms_per_iter: median_low(&mut speeds_us).map(|us| us / 1000.0),
        fft_length,
        stage1_bits: bits,
        stage2_units: buffers,
    }
}

/// CUDALucas prints its own ETA; the average speed derived from it is
/// steadier than the per-line timings.
pub fn parse_cudalucas(lines: &[String], exponent: u64) -> ProgressSample {
    let mut found = 0usize;
    let mut iteration = 0u64;
    let mut average_ms = None;
    let mut fft_length = None;

    for line in lines.iter().rev() {
        let Some(line_exponent) = CUDA_EXPONENT
            .captures(line)
            .map(|captures| capture_u64(&captures, 1))
        else {
            continue;
        };
        let iterations: Vec<u64> = CUDA_ITER
            .find_iter(line)
            .filter_map(|m| m.as_str().parse().ok())
            .collect();
        let timings = CUDA_MS.find_iter(line).count();
        let etas: Vec<regex::Captures<'_>> = CUDA_ETA.captures_iter(line).collect();
        let fft = CUDA_FFT.captures(line);
        let (Some(&current), Some(fft)) = (iterations.first(), fft) else {
            continue;
        };
        if timings == 0 || etas.is_empty() {
            continue;
        }
        if line_exponent != exponent {
            if found == 0 {
                tracing::debug!(exponent, found = line_exponent, "log belongs to another exponent");
            }
            break;
        }
        found += 1;
        if found == 1 {
            iteration = current;
            if let Some(eta) = etas.get(1) {
                let days = capture_u64(eta, 1);
                let hours = capture_u64(eta, 2);
                let minutes = capture_u64(eta, 3);
                let seconds = capture_u64(eta, 4);
                let time_left = ((days * 24 + hours) * 60 + minutes) * 60 + seconds;
                if exponent > iteration {
                    average_ms = Some(time_left as f64 * 1000.0 / (exponent - iteration) as f64);
                }
            }
            fft_length = Some(capture_u64(&fft, 1) * 1024);
        } else if current > iteration {
            break;
        }
        if found == SPEED_SAMPLES {
            break;
        }
    }

    if found == 0 {
        return ProgressSample {
            fft_length,
            ..ProgressSample::default()
        };
    }
    ProgressSample {
        iteration,
        ms_per_iter: average_ms,
        fft_length,
        ..ProgressSample::default()
    }
}
