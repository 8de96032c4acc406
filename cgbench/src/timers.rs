//! Section timers, printed when `timer.flag` exists.

use serde::Serialize;
use std::fmt::Write;

/// Wall times of the benchmark sections, in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SectionTimes {
    /// Matrix generation and device setup.
    pub init: f64,
    /// The timed inverse power loop.
    pub benchmark: f64,
    /// CG solves inside the timed loop.
    pub conj_grad: f64,
}

impl SectionTimes {
    /// Time of the timed loop spent outside CG.
    pub fn rest(&self) -> f64 {
        self.benchmark - self.conj_grad
    }

    /// Section table with percentages of the benchmark time.
    pub fn render(&self) -> String {
        let total = if self.benchmark == 0.0 { 1.0 } else { self.benchmark };
        let percent = |t: f64| t * 100.0 / total;
        let mut out = String::new();
        let _ = writeln!(out, "  SECTION   Time (secs)");
        let _ = writeln!(out, "  {:>8}:{:9.3}", "init", self.init);
        let _ = writeln!(
            out,
            "  {:>8}:{:9.3}  ({:6.2}%)",
            "benchmk",
            self.benchmark,
            percent(self.benchmark)
        );
        let _ = writeln!(
            out,
            "  {:>8}:{:9.3}  ({:6.2}%)",
            "conjgd",
            self.conj_grad,
            percent(self.conj_grad)
        );
        let _ = writeln!(
            out,
            "    --> {:>8}:{:9.3}  ({:6.2}%)",
            "rest",
            self.rest(),
            percent(self.rest())
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_sections() {
        let times = SectionTimes {
            init: 0.5,
            benchmark: 2.0,
            conj_grad: 1.5,
        };
        let text = times.render();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "  SECTION   Time (secs)");
        assert_eq!(lines[1], "      init:    0.500");
        assert_eq!(lines[2], "   benchmk:    2.000  (100.00%)");
        assert_eq!(lines[3], "    conjgd:    1.500  ( 75.00%)");
        assert_eq!(lines[4], "    -->     rest:    0.500  ( 25.00%)");
    }

    #[test]
    fn test_zero_benchmark_time_does_not_divide_by_zero() {
        let text = SectionTimes::default().render();
        assert!(text.contains("(  0.00%)"));
    }
}
