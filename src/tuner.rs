//! Empirical search over kernel execution parameters.
//!
//! # Autotuner
//!
//! The same kernel can be launched with many workgroup shapes, and which
//! one is fastest varies across device families in ways no static
//! heuristic predicts. The tuner times a bounded candidate set the first
//! time a given (operator, shape) signature runs, remembers the winner,
//! and replays it on every later run of that signature.
//!
//! ## Cost model
//!
//! Search runs at most once per distinct tuning key per process, so the
//! total tuning overhead is bounded by
//! `O(distinct signatures x candidates)` regardless of how many times the
//! graph executes. Inference graphs run the same shapes repeatedly at
//! high frequency, so everything after warm-up is an O(1) cache hit.
//! A profile persisted from an earlier process seeds the cache so even the
//! warm-up cost is paid once per device model, not once per launch.
//!
//! ## Candidate filtering
//!
//! Candidates with a zero component or whose component product exceeds
//! the device's workgroup bound are structurally invalid: they are
//! silently dropped from the search set, not reported as errors. A failed
//! *timed run*, by contrast, is a device-level condition and is never
//! swallowed: if no candidate survives, the default configuration runs
//! and its status is the tuner's status.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use crate::activation::ActivationKind;
use crate::error::Result;
use crate::future::CompletionToken;

/// A timing strategy for one candidate run.
///
/// The tuner stays agnostic of how elapsed time is obtained; GPU callers
/// measure through the completion token's underlying event, tests supply
/// deterministic fakes.
pub trait Timer {
    /// Runs `run` once and returns the elapsed execution time, or the
    /// device failure that prevented measurement.
    fn measure(&mut self, run: &mut dyn FnMut() -> Result<CompletionToken>) -> Result<Duration>;
}

/// Times a run by waiting on its completion token.
#[derive(Debug, Default)]
pub struct EventTimer;

impl Timer for EventTimer {
    fn measure(&mut self, run: &mut dyn FnMut() -> Result<CompletionToken>) -> Result<Duration> {
        let mut token = run()?;
        token.wait()
    }
}

#[derive(Debug, Clone)]
struct TuneEntry {
    params: Vec<u32>,
    /// Whether the entry came from a persisted profile rather than a
    /// search in this process.
    seeded: bool,
}

/// Keyed cache of winning execution-parameter configurations.
///
/// Process-wide callers share [`Tuner::global`]; tests construct their own
/// instances so no global reset is ever needed.
#[derive(Debug, Default)]
pub struct Tuner {
    entries: Mutex<HashMap<String, TuneEntry>>,
    /// Serializes first-time searches so concurrent misses on the same
    /// key do not both pay the candidate sweep.
    search: Mutex<()>,
}

impl Tuner {
    /// An empty tuner with no remembered configurations.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide tuner shared by all operator instances.
    pub fn global() -> &'static Tuner {
        static TUNER: OnceLock<Tuner> = OnceLock::new();
        TUNER.get_or_init(Tuner::new)
    }

    /// The remembered configuration for `key`, if one exists.
    pub fn best_params(&self, key: &str) -> Option<Vec<u32>> {
        self.entries
            .lock()
            .expect("tuner cache poisoned")
            .get(key)
            .map(|e| e.params.clone())
    }

    /// Runs `run` with the best-known configuration for `key`, searching
    /// for one first if the key has never been tuned.
    ///
    /// - A remembered entry short-circuits straight to a single run.
    /// - Otherwise every structurally valid candidate (no zero component,
    ///   component product within `limit`) is timed via `timer`; the
    ///   fastest wins, ties going to the earlier candidate.
    /// - If no candidate is valid or every timed run fails, `default`
    ///   runs once and is remembered only if it succeeds.
    ///
    /// The returned token represents the run that backs the cached
    /// decision; for a fresh search it carries the winner's measured
    /// time.
    pub fn tune_or_run<G, R, T>(
        &self,
        key: &str,
        default: &[u32],
        limit: u32,
        candidates: G,
        mut run: R,
        timer: &mut T,
    ) -> Result<CompletionToken>
    where
        G: FnOnce() -> Vec<Vec<u32>>,
        R: FnMut(&[u32]) -> Result<CompletionToken>,
        T: Timer,
    {
        if let Some(best) = self.best_params(key) {
            return run(&best);
        }

        let _search = self.search.lock().expect("tuner search lock poisoned");
        // A concurrent search may have resolved the key while this caller
        // waited for the lock.
        if let Some(best) = self.best_params(key) {
            return run(&best);
        }

        let mut best: Option<(Vec<u32>, Duration)> = None;
        for candidate in candidates() {
            if !is_valid(&candidate, limit) {
                continue;
            }
            let mut attempt = || run(&candidate);
            match timer.measure(&mut attempt) {
                Ok(cost) => {
                    if best.as_ref().is_none_or(|(_, fastest)| cost < *fastest) {
                        best = Some((candidate, cost));
                    }
                }
                Err(err) => {
                    tracing::warn!(key, params = ?candidate, error = %err, "tuning candidate failed");
                }
            }
        }

        match best {
            Some((winner, cost)) => {
                tracing::debug!(key, params = ?winner, micros = cost.as_micros() as u64, "tuned");
                self.record(key, winner, false);
                Ok(CompletionToken::done(cost))
            }
            None => {
                // Remembered only when the default itself succeeds.
                let token = run(default)?;
                self.record(key, default.to_vec(), false);
                Ok(token)
            }
        }
    }

    /// Remembers `params` for `key` unless the key already has an entry.
    /// Returns whether anything was actually inserted.
    fn record(&self, key: &str, params: Vec<u32>, seeded: bool) -> bool {
        use std::collections::hash_map::Entry;
        match self
            .entries
            .lock()
            .expect("tuner cache poisoned")
            .entry(key.to_string())
        {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(TuneEntry { params, seeded });
                true
            }
        }
    }

    /// Seeds the cache from a profile persisted by an earlier run on the
    /// same device model. Returns how many entries were actually applied;
    /// lines whose key is already remembered, and malformed lines, do not
    /// count.
    pub fn load_profile(&self, path: impl AsRef<Path>) -> Result<usize> {
        let text = std::fs::read_to_string(path)?;
        let mut loaded = 0;
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, params)) = line.split_once('=') else {
                tracing::warn!(line, "skipping malformed tuning profile line");
                continue;
            };
            let parsed: std::result::Result<Vec<u32>, _> =
                params.split(',').map(|v| v.trim().parse::<u32>()).collect();
            match parsed {
                Ok(params) if !params.is_empty() => {
                    // A key already remembered (an earlier line, or a live
                    // search) keeps its entry and does not count as loaded.
                    if self.record(key, params, true) {
                        loaded += 1;
                    }
                }
                _ => tracing::warn!(line, "skipping malformed tuning profile line"),
            }
        }
        Ok(loaded)
    }

    /// Writes every remembered configuration, sorted by key so the file
    /// is stable across runs.
    pub fn save_profile(&self, path: impl AsRef<Path>) -> Result<()> {
        let entries = self.entries.lock().expect("tuner cache poisoned");
        let mut keys: Vec<&String> = entries.keys().collect();
        keys.sort();
        let mut text = String::new();
        for key in keys {
            let params = &entries[key].params;
            let joined: Vec<String> = params.iter().map(u32::to_string).collect();
            let _ = writeln!(text, "{key}={}", joined.join(","));
        }
        std::fs::write(path, text)?;
        Ok(())
    }

    /// How many keys were seeded from a persisted profile (as opposed to
    /// searched this process lifetime).
    pub fn seeded_count(&self) -> usize {
        self.entries
            .lock()
            .expect("tuner cache poisoned")
            .values()
            .filter(|e| e.seeded)
            .count()
    }
}

fn is_valid(params: &[u32], limit: u32) -> bool {
    if params.is_empty() || params.contains(&0) {
        return false;
    }
    let product: u64 = params.iter().map(|&v| v as u64).product();
    product <= limit as u64
}

/// Derives the deterministic signature grouping invocations that share a
/// winning configuration: operator identity, activation kind, and output
/// shape.
pub fn tuning_key(op: &str, activation: ActivationKind, output_shape: &[usize]) -> String {
    let dims: Vec<String> = output_shape.iter().map(usize::to_string).collect();
    format!("{op}_{activation}_{}", dims.join("x"))
}
