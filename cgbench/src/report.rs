//! Benchmark output: progress table, verification block, result summary
//! and the optional JSON report.

use crate::error::Result;
use crate::timers::SectionTimes;
use cgbench_core::{MatrixShape, TransferStats};
use cgbench_solver::{IterationRecord, PowerRunSummary, ProblemParams, Verification};
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Formats `value` like C's `%.<precision>E`: the exponent carries a sign
/// and at least two digits.
pub fn sci(value: f64, precision: usize) -> String {
    let formatted = format!("{:.*E}", precision, value);
    match formatted.split_once('E') {
        Some((mantissa, exponent)) => match exponent.parse::<i32>() {
            Ok(exp) => format!(
                "{}E{}{:02}",
                mantissa,
                if exp < 0 { '-' } else { '+' },
                exp.unsigned_abs()
            ),
            Err(_) => formatted,
        },
        // inf and NaN have no exponent
        None => formatted,
    }
}

pub fn header(params: &ProblemParams) -> String {
    format!(
        "\n\n CG Benchmark - wgpu offload\n\n Size: {:>11}\n Iterations:                  {:>5}\n",
        params.na, params.niter
    )
}

pub fn progress_line(record: &IterationRecord) -> String {
    let mut line = String::new();
    if record.iteration == 1 {
        line.push_str("\n   iteration           ||r||                 zeta\n");
    }
    line.push_str(&format!(
        "    {:>5}       {:>20}{:20.13}",
        record.iteration,
        sci(record.rnorm, 14),
        record.zeta
    ));
    line
}

pub fn verification_block(zeta: f64, verification: &Verification) -> String {
    match verification {
        Verification::Checked {
            error,
            passed: true,
            ..
        } => format!(
            " VERIFICATION SUCCESSFUL\n Zeta is    {:>20}\n Error is   {:>20}",
            sci(zeta, 13),
            sci(*error, 13)
        ),
        Verification::Checked {
            reference,
            passed: false,
            ..
        } => format!(
            " VERIFICATION FAILED\n Zeta                {:>20}\n The correct zeta is {:>20}",
            sci(zeta, 13),
            sci(*reference, 13)
        ),
        Verification::NotPerformed => {
            " Problem size unknown\n NO VERIFICATION PERFORMED".to_string()
        }
    }
}

/// Millions of operations per second for a run taking `seconds`.
pub fn mops(params: &ProblemParams, seconds: f64) -> f64 {
    if seconds == 0.0 {
        0.0
    } else {
        params.operation_count() / seconds / 1.0e6
    }
}

pub fn results_block(params: &ProblemParams, summary: &PowerRunSummary, device: &str) -> String {
    format!(
        "\n\n CG Benchmark Completed.\n Class           = {:>24}\n Size            = {:>24}\n Iterations      = {:>24}\n Time in seconds = {:>24.2}\n Mop/s total     = {:>24.2}\n Operation type  = {:>24}\n Verification    = {:>24}\n Device          = {:>24}\n",
        params.class_letter(),
        params.na,
        params.niter,
        summary.benchmark_seconds,
        mops(params, summary.benchmark_seconds),
        "floating point",
        if summary.verification.passed() {
            "SUCCESSFUL"
        } else {
            "UNSUCCESSFUL"
        },
        device
    )
}

/// Machine-readable record of one run.
#[derive(Debug, Serialize)]
pub struct BenchReport<'a> {
    pub class: char,
    pub params: &'a ProblemParams,
    pub device: &'a str,
    pub matrix: MatrixShape,
    pub mops: f64,
    pub times: SectionTimes,
    pub transfers: Option<TransferStats>,
    pub summary: &'a PowerRunSummary,
}

impl BenchReport<'_> {
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, self)?;
        log::info!("Wrote JSON report to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgbench_solver::ProblemClass;

    #[test]
    fn test_sci_matches_c_exponent_format() {
        assert_eq!(sci(8.5971775078648, 13), "8.5971775078648E+00");
        assert_eq!(sci(1.5e-13, 3), "1.500E-13");
        assert_eq!(sci(-2.0e105, 1), "-2.0E+105");
        assert_eq!(sci(0.0, 2), "0.00E+00");
    }

    #[test]
    fn test_progress_line_layout() {
        let first = progress_line(&IterationRecord {
            iteration: 1,
            rnorm: 1.25e-13,
            zeta: 8.5971775078648,
        });
        let lines: Vec<&str> = first.lines().collect();
        assert_eq!(lines[1], "   iteration           ||r||                 zeta");
        assert_eq!(
            lines[2],
            "        1       1.25000000000000E-13     8.5971775078648"
        );

        let later = progress_line(&IterationRecord {
            iteration: 2,
            rnorm: 1.0,
            zeta: 1.0,
        });
        assert!(!later.contains("iteration"));
    }

    #[test]
    fn test_header_aligns_size_and_iterations() {
        let text = header(&ProblemClass::S.params());
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines.contains(&" Size:        1400"));
        assert!(lines.contains(&" Iterations:                     15"));
    }

    #[test]
    fn test_verification_blocks() {
        let p = ProblemClass::S.params();
        let ok = verification_block(8.5971775078648, &p.verify(8.5971775078648));
        assert!(ok.starts_with(" VERIFICATION SUCCESSFUL"));
        let bad = verification_block(9.0, &p.verify(9.0));
        assert!(bad.contains("The correct zeta is  8.5971775078648E+00"));
        let unknown = verification_block(1.0, &Verification::NotPerformed);
        assert!(unknown.ends_with("NO VERIFICATION PERFORMED"));
    }

    #[test]
    fn test_mops() {
        let p = ProblemClass::S.params();
        assert_eq!(mops(&p, 0.0), 0.0);
        assert_eq!(mops(&p, 1.0), p.operation_count() / 1.0e6);
    }
}
