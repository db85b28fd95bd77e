//! flamepipe turns "how slow is this binary on this input?" into a [flame graph] with one
//! command. It builds a binary of your cargo project in release mode, runs it under a sampling
//! profiler while feeding it an input file, collapses the sampled stacks, and draws the result
//! as an SVG.
//!
//! The four steps are separate pieces you can use on their own:
//!
//!  - [`build`]: produce a fresh optimized executable ([`build::CargoBuilder`]).
//!  - [`sample`]: run it under a profiler and capture raw stacks ([`sample::PerfSource`]), or
//!    replay stacks captured earlier ([`sample::ReplaySource`]).
//!  - [`collapse`]: fold raw `perf script` output into one line per distinct call path with
//!    the number of times it was seen.
//!  - [`flamegraph`]: draw folded stacks as an interactive SVG.
//!
//! [`pipeline::Pipeline`] runs them in order and stops at the first failure.
//!
//! # Command-line use
//!
//! Profiles are only as good as their symbols, so first set
//!
//! ```toml
//! [profile.release]
//! debug = true
//! ```
//!
//! in your `Cargo.toml`, and then run:
//!
//! ```console
//! $ flamepipe day9 inputs/day9.txt -o day9.svg
//! ```
//!
//! The stages are also available as `flamepipe-collapse` and `flamepipe-flamegraph`, which
//! work like the classic `stackcollapse-perf.pl` and `flamegraph.pl`:
//!
//! ```console
//! $ perf record --call-graph dwarf target/release/day9 < inputs/day9.txt
//! $ perf script | flamepipe-collapse > stacks.folded
//! $ flamepipe-flamegraph stacks.folded > day9.svg
//! ```
//!
//! # Programmatic access
//!
//! ```no_run
//! use flamepipe::build::CargoBuilder;
//! use flamepipe::pipeline::{Options, Pipeline};
//! use flamepipe::sample::PerfSource;
//!
//! let mut opt = Options::new("day9");
//! opt.input = Some("inputs/day9.txt".into());
//! let mut pipeline = Pipeline::new(
//!     opt,
//!     Box::new(CargoBuilder::default()),
//!     Box::new(PerfSource::default()),
//! );
//! let report = pipeline.run().unwrap();
//! println!("{} samples in {}", report.total_samples, report.output.display());
//! ```
//!
//!   [flame graph]: http://www.brendangregg.com/flamegraphs.html

#![deny(missing_docs)]

#[cfg(test)]
#[macro_use]
extern crate pretty_assertions;

#[macro_use]
extern crate log;

pub mod build;

/// Folding sampled stacks into collapsed call paths.
///
/// See the [crate-level documentation] for details.
///
///   [crate-level documentation]: ../index.html
pub mod collapse;

/// Tools for producing flame graphs from folded stack traces.
///
/// See the [crate-level documentation] for details.
///
///   [crate-level documentation]: ../index.html
pub mod flamegraph;

pub mod pipeline;

/// Capturing call stacks from a running program.
pub mod sample;
